// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod realtime;
pub mod server;
pub mod state;
pub mod telemetry;

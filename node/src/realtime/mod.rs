// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Real-time delivery: connection registry, WebSocket sessions, fan-out hooks.

pub mod messages;
pub mod notifier;
pub mod registry;
pub mod session;

pub use registry::{ConnectionId, ConnectionRegistry, OpenError, Outbound, PendingConnection};

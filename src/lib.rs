// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! caseline-kernel: append-only per-case event timelines with idempotent
//! ingestion and cursor-based catch-up.

pub mod config;
pub mod error;
pub mod types;
pub mod track;
pub mod event;
pub mod cases;
pub mod log;
pub mod sync;

#[cfg(test)]
pub mod tests;

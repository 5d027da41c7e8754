//! Snapfeed - turns camera snapshots and recordings into a continuous live feed
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod playlist;
pub mod queue;
pub mod scheduler;
pub mod transport;
pub mod watch;

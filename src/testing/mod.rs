//! Tools for testing the orchestration without touching the host's network.

pub mod mock;

// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod api;
pub mod error;
pub mod health;
pub mod metrics;
pub mod model;
pub mod server;
pub mod smtp;
pub mod stats;
pub mod store;

// Startup plumbing used by the binary.
pub mod cli;
pub mod config;
pub mod logging;

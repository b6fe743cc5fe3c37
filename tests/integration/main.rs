//! sift integration test harness.
//!
//! Every test runs a real sift API server on an ephemeral loopback port,
//! pointed at a scripted research backend on another. Nothing outside the
//! test process is required:
//!
//!   cargo test --test integration
//!
//! Each test owns its servers; they stop when the runtime shuts down.

mod infra;
mod lifecycle;
mod polling;
mod relay;

pub use infra::*;

//! CLI command modules.

pub mod http;
pub mod research;
pub mod stream;
pub mod tasks;

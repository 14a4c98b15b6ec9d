// Infrastructure layer - configuration and diagnostics adapters
pub mod config;
pub mod log_sink;

// Application layer - cycle orchestration and reporting
pub mod cycle_runner;
pub mod diagnostics;
pub mod format;

// Diagnostics trait for progress messages

/// Write-only sink for timestamped progress messages.
///
/// `record` must never fail from the caller's point of view; sinks deal
/// with their own I/O problems.
pub trait Diagnostics: Send + Sync {
    fn record(&self, message: &str);
}

// File and console diagnostics sink
use crate::application::diagnostics::Diagnostics;
use crate::infrastructure::config::LoggingSettings;
use chrono::{Local, Timelike};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::sync::Mutex;

/// Writes every message to stdout and appends it to the log file.
///
/// When the log file cannot be written because of permissions the message
/// goes to the fallback file instead; any other failure is noted there as
/// an `ERROR:` line.
pub struct LogDiagnostics {
    settings: LoggingSettings,
    // Serializes file appends from concurrent cycles.
    file_lock: Mutex<()>,
}

impl LogDiagnostics {
    pub fn new(settings: LoggingSettings) -> Self {
        Self {
            settings,
            file_lock: Mutex::new(()),
        }
    }

    fn write_console(&self, message: &str) {
        if !self.settings.console {
            return;
        }
        let now = Local::now();
        println!(
            "{}.{:05} - {}",
            now.format("%H:%M:%S"),
            now.nanosecond() % 1_000_000_000 / 10_000,
            message
        );
    }

    fn write_file(&self, message: &str) {
        let _guard = self
            .file_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let primary = fs::create_dir_all(&self.settings.directory).and_then(|_| {
            append_line(
                &self.settings.log_path(),
                &format!("{} - {}", stamp, message),
            )
        });

        if let Err(e) = primary.or_else(|e| self.write_fallback(e, &stamp, message)) {
            tracing::warn!(
                "Failed to write diagnostics to {}: {}",
                self.settings.fallback_file.display(),
                e
            );
        }
    }

    /// Route a message the primary log rejected with `error`.
    fn write_fallback(&self, error: io::Error, stamp: &str, message: &str) -> io::Result<()> {
        let fallback = &self.settings.fallback_file;
        if error.kind() != ErrorKind::PermissionDenied {
            return append_line(fallback, &format!("{} - ERROR: {}", stamp, error));
        }

        self.write_console(&format!(
            "Unable to write to {}, using fallback log at {}",
            self.settings.directory.display(),
            fallback.display()
        ));
        start_fallback(fallback)?;
        append_line(fallback, &format!("{} - {}", stamp, message))
    }
}

/// Create `path` with a `Log started at:` header unless it already exists.
fn start_fallback(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    append_line(
        path,
        &format!("Log started at: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
    )
}

impl Diagnostics for LogDiagnostics {
    fn record(&self, message: &str) {
        self.write_file(message);
        self.write_console(message);
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

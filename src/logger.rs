//! Session logger: routes `tracing` output to a single file in the OS data
//! directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\GarmentFE\garmentfe.log`
//!   Linux:    `~/.local/share/GarmentFE/garmentfe.log`
//!   macOS:    `~/Library/Application Support/GarmentFE/garmentfe.log`
//!
//! Filtering follows `GARMENTFE_LOG` (same syntax as `RUST_LOG`), default
//! `info`, or `debug` when verbose output was requested.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "GARMENTFE_LOG";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise logging into the per-user data directory. When `verbose` is
/// set, output is mirrored to stderr as well.
pub fn init(verbose: bool) {
    init_at(&log_file_path(), verbose);
}

/// Initialise logging into `path`.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that records the panic before propagating to
///   the default handler.
///
/// A second call in the same process is a no-op.
pub fn init_at(path: &Path, verbose: bool) {
    if LOG_PATH.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    // Open file, truncating any previous session's content
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path);
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            // Can't open log file, not fatal: log to stderr only
            eprintln!("[logger] Failed to open log file {}: {}", path.display(), e);
            install(None, true);
            return;
        }
    };

    let _ = writeln!(file, "=== GarmentFE session started (unix {}) ===", unix_seconds());
    let _ = writeln!(file, "Log file: {}", path.display());
    let _ = writeln!(file);
    let _ = LOG_PATH.set(path.to_path_buf());

    install(Some(file), verbose);

    // Panic hook: mirrors panic info to the log, then runs the default handler
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(target: "panic", "PANIC: {info}");
        prev(info);
    }));
}

fn install(file: Option<File>, to_stderr: bool) {
    let default_level = if to_stderr { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = file.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(f))
    });
    let stderr_layer = to_stderr.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("[logger] tracing subscriber already installed: {e}");
    }
}

fn log_file_path() -> PathBuf {
    data_dir().join("GarmentFE").join("garmentfe.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_file_is_truncated_and_headed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "stale output from last run\n").unwrap();

        init_at(&path, false);
        tracing::info!("hello from the test");

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale output"));
        assert!(content.starts_with("=== GarmentFE session started"));
    }
}

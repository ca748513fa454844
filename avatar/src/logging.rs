//! Process-wide tracing subscriber.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: agent diagnostics filtered by `RUST_LOG`,
//!   written to stderr and to the workspace's process log
//!   (`<root>/logs/avatar.log`).
//!
//! - **Task logs (`io/task_log`)**: per-task narrative under
//!   `<root>/logs/tasks/`. Always written, unaffected by `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Process log file name inside the workspace log directory.
pub const LOG_FILE: &str = "avatar.log";

/// Install the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`. Output goes to stderr (compact) and,
/// when `log_file` is given, appended to it without ANSI colors.
///
/// # Example
/// ```bash
/// RUST_LOG=avatar=debug avatar run
/// ```
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open {}", path.display()))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")
}

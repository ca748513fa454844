//! Per-task log sink at `<root>/logs/tasks/task_<id>.log`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::Level;

/// Append-only narrative for one task, one line per entry:
/// `<rfc3339> <LEVEL> <message>`.
#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
}

impl TaskLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn append(&self, level: Level, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open task log {}", self.path.display()))?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for line in message.lines() {
            writeln!(file, "{timestamp} {level} {line}")
                .with_context(|| format!("write task log {}", self.path.display()))?;
        }
        if message.is_empty() {
            writeln!(file, "{timestamp} {level}")
                .with_context(|| format!("write task log {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_formatted_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/tasks/task_1.log");
        let log = TaskLog::open(&path).expect("open");
        log.append(Level::INFO, "Starting task processing").expect("write");
        log.append(Level::ERROR, "Task failed\nclone refused").expect("write");

        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" INFO Starting task processing"));
        assert!(lines[1].ends_with(" ERROR Task failed"));
        assert!(lines[2].ends_with(" ERROR clone refused"));
        let stamp = lines[0].split(' ').next().expect("timestamp");
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}

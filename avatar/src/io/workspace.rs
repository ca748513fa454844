//! Workspace Manager: the agent's on-disk root.
//!
//! ```text
//! <root>/
//!   workspace.json          manifest (creation time, schema version)
//!   repos/<application-id>/ persistent clone, shared by every task of that application
//!   temp/task_<task-id>/    per-task scratch, removed at the task's terminal state
//!   logs/avatar.log         process log
//!   logs/tasks/task_<task-id>.log
//!   cache/
//!   config/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "workspace.json";
pub const MANIFEST_VERSION: &str = "1.0";
/// Created with the layout but not used by the agent itself.
const RESERVED_DIRS: [&str; 2] = ["cache", "config"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    pub created_at: String,
    pub version: String,
}

/// All canonical paths under a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    repos_dir: PathBuf,
    temp_dir: PathBuf,
    logs_dir: PathBuf,
    manifest_path: PathBuf,
}

impl WorkspaceManager {
    /// Create the fixed subtree under `root` and write the manifest if absent.
    ///
    /// Safe to call against an already-initialized root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let logs_dir = root.join("logs");
        let workspace = Self {
            repos_dir: root.join("repos"),
            temp_dir: root.join("temp"),
            manifest_path: root.join(MANIFEST_FILE),
            logs_dir,
            root,
        };
        for dir in [&workspace.repos_dir, &workspace.temp_dir, &workspace.logs_dir] {
            create_dir(dir)?;
        }
        for reserved in RESERVED_DIRS {
            create_dir(&workspace.root.join(reserved))?;
        }
        if !workspace.manifest_path.exists() {
            let manifest = WorkspaceManifest {
                created_at: Utc::now().to_rfc3339(),
                version: MANIFEST_VERSION.to_string(),
            };
            let mut buf = serde_json::to_string_pretty(&manifest).context("serialize manifest")?;
            buf.push('\n');
            fs::write(&workspace.manifest_path, buf)
                .with_context(|| format!("write {}", workspace.manifest_path.display()))?;
            info!(root = %workspace.root.display(), "workspace initialized");
        }
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Persistent clone location for an application. Pure path derivation.
    pub fn repo_path(&self, application_id: u64) -> PathBuf {
        self.repos_dir.join(application_id.to_string())
    }

    /// Scratch location for a task, without creating it.
    pub fn scratch_dir(&self, task_id: u64) -> PathBuf {
        self.temp_dir.join(format!("task_{task_id}"))
    }

    /// Scratch directory for a task, created on first call.
    pub fn scratch_path(&self, task_id: u64) -> Result<PathBuf> {
        let path = self.scratch_dir(task_id);
        create_dir(&path)?;
        Ok(path)
    }

    /// Scratch directory wrapped in a guard that removes it when dropped.
    pub fn scratch(&self, task_id: u64) -> Result<ScratchGuard<'_>> {
        let path = self.scratch_path(task_id)?;
        Ok(ScratchGuard {
            workspace: self,
            task_id,
            path,
            released: false,
        })
    }

    pub fn process_log_path(&self) -> PathBuf {
        self.logs_dir.join(crate::logging::LOG_FILE)
    }

    pub fn task_log_path(&self, task_id: u64) -> PathBuf {
        self.logs_dir
            .join("tasks")
            .join(format!("task_{task_id}.log"))
    }

    /// Remove one task's scratch directory, or every entry under `temp/`.
    ///
    /// Returns how many entries were removed. Repository clones are never touched.
    pub fn cleanup(&self, task_id: Option<u64>) -> Result<usize> {
        match task_id {
            Some(task_id) => {
                let path = self.scratch_dir(task_id);
                if !path.exists() {
                    return Ok(0);
                }
                fs::remove_dir_all(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
                debug!(task_id, "scratch directory removed");
                Ok(1)
            }
            None => {
                if !self.temp_dir.exists() {
                    return Ok(0);
                }
                let mut removed = 0;
                let entries = fs::read_dir(&self.temp_dir)
                    .with_context(|| format!("read {}", self.temp_dir.display()))?;
                for entry in entries {
                    let path = entry
                        .with_context(|| format!("read {}", self.temp_dir.display()))?
                        .path();
                    let result = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    result.with_context(|| format!("remove {}", path.display()))?;
                    removed += 1;
                }
                info!(removed, "scratch space purged");
                Ok(removed)
            }
        }
    }

    /// True when the manifest exists. Subtree completeness is not checked.
    pub fn is_valid_workspace(&self) -> bool {
        self.manifest_path.is_file()
    }

    pub fn manifest(&self) -> Result<Option<WorkspaceManifest>> {
        if !self.manifest_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.manifest_path)
            .with_context(|| format!("read {}", self.manifest_path.display()))?;
        let manifest = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", self.manifest_path.display()))?;
        Ok(Some(manifest))
    }
}

/// Owns a task's scratch directory and deletes it exactly once.
///
/// Deletion happens on [`ScratchGuard::release`] or, failing that, on drop
/// (including unwinding).
#[derive(Debug)]
pub struct ScratchGuard<'a> {
    workspace: &'a WorkspaceManager,
    task_id: u64,
    path: PathBuf,
    released: bool,
}

impl ScratchGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Write an artifact into the scratch directory.
    pub fn write_artifact(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.workspace.cleanup(Some(self.task_id)).map(|_| ())
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.workspace.cleanup(Some(self.task_id)) {
            warn!(task_id = self.task_id, err = %format!("{err:#}"), "scratch cleanup failed");
        }
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

//! Version-Control Adapter.
//!
//! Clone, checkout-or-create, stage-and-commit and push over the `git` CLI.
//! Every operation returns a [`GitResult`]; callers branch on the value and
//! nothing here panics or propagates subprocess faults.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandRunner, CommandSpec, DEFAULT_TIMEOUT, ProcessOutcome, SystemRunner};

/// What a successful version-control operation actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOutcome {
    Cloned,
    /// Target directory already held a clone; nothing was run.
    AlreadyCloned,
    SwitchedBranch,
    CreatedBranch,
    Committed,
    /// Nothing was staged after `add`; treated as success.
    NoOpCommit,
    Pushed { remote: String },
    /// Repository has no remote; nothing to push to.
    NoRemote,
    /// Worktree restored after an abandoned change set.
    Discarded,
}

impl fmt::Display for VcsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcsOutcome::Cloned => f.write_str("repository cloned"),
            VcsOutcome::AlreadyCloned => f.write_str("repository already cloned"),
            VcsOutcome::SwitchedBranch => f.write_str("switched to existing branch"),
            VcsOutcome::CreatedBranch => f.write_str("created new branch"),
            VcsOutcome::Committed => f.write_str("changes committed"),
            VcsOutcome::NoOpCommit => f.write_str("nothing to commit"),
            VcsOutcome::Pushed { remote } => write!(f, "pushed to {remote}"),
            VcsOutcome::NoRemote => f.write_str("no remote configured, push skipped"),
            VcsOutcome::Discarded => f.write_str("uncommitted changes discarded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsErrorKind {
    Clone,
    Checkout,
    Stage,
    Commit,
    Push,
    Config,
    Restore,
    Timeout,
}

impl fmt::Display for VcsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VcsErrorKind::Clone => "clone",
            VcsErrorKind::Checkout => "checkout",
            VcsErrorKind::Stage => "stage",
            VcsErrorKind::Commit => "commit",
            VcsErrorKind::Push => "push",
            VcsErrorKind::Config => "config",
            VcsErrorKind::Restore => "restore",
            VcsErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("git {kind} failed: {diagnostic}")]
pub struct VcsError {
    pub kind: VcsErrorKind,
    pub diagnostic: String,
}

impl VcsError {
    fn from_outcome(kind: VcsErrorKind, outcome: &ProcessOutcome) -> Self {
        let kind = if outcome.timed_out {
            VcsErrorKind::Timeout
        } else {
            kind
        };
        Self {
            kind,
            diagnostic: outcome.diagnostic(),
        }
    }
}

pub type GitResult = Result<VcsOutcome, VcsError>;

/// Uniform `(success, diagnostic-text)` view of a [`GitResult`].
pub trait GitResultExt {
    fn is_success(&self) -> bool;
    fn diagnostic(&self) -> String;
}

impl GitResultExt for GitResult {
    fn is_success(&self) -> bool {
        self.is_ok()
    }

    fn diagnostic(&self) -> String {
        match self {
            Ok(outcome) => outcome.to_string(),
            Err(err) => err.to_string(),
        }
    }
}

/// Committer identity. Empty fields are left to git's own configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl GitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn config_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.name.trim().is_empty() {
            args.push("-c".to_string());
            args.push(format!("user.name={}", self.name));
        }
        if !self.email.trim().is_empty() {
            args.push("-c".to_string());
            args.push(format!("user.email={}", self.email));
        }
        args
    }
}

/// Wrapper for executing git commands through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct Git<R: CommandRunner = SystemRunner> {
    runner: R,
    identity: GitIdentity,
    timeout: Duration,
}

impl Git<SystemRunner> {
    pub fn system() -> Self {
        Self::new(SystemRunner::default())
    }
}

impl<R: CommandRunner> Git<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            identity: GitIdentity::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_identity(mut self, identity: GitIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Clone `url` into `path` unless `path` already holds a non-empty directory.
    #[instrument(skip_all, fields(url, path = %path.display()))]
    pub fn clone_repo(&self, url: &str, path: &Path) -> GitResult {
        if is_non_empty_dir(path) {
            debug!("clone target already populated, skipping clone");
            return Ok(VcsOutcome::AlreadyCloned);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = std::fs::create_dir_all(parent) {
                return Err(VcsError {
                    kind: VcsErrorKind::Clone,
                    diagnostic: format!("create {}: {err}", parent.display()),
                });
            }
        }
        let target = path.to_string_lossy().into_owned();
        let outcome = self.git(None, ["clone", url, target.as_str()]);
        if !outcome.success {
            warn!(exit_code = ?outcome.exit_code, "git clone failed");
            return Err(VcsError::from_outcome(VcsErrorKind::Clone, &outcome));
        }
        info!("repository cloned");
        Ok(VcsOutcome::Cloned)
    }

    /// Switch to `branch`, creating it first when it does not exist locally.
    ///
    /// A branch known only on `origin` is created tracking the remote one.
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub fn checkout_or_create(&self, path: &Path, branch: &str) -> GitResult {
        let local_ref = format!("refs/heads/{branch}");
        if self.ref_exists(path, &local_ref)? {
            let outcome = self.git(Some(path), ["checkout", branch]);
            if !outcome.success {
                return Err(VcsError::from_outcome(VcsErrorKind::Checkout, &outcome));
            }
            debug!("switched to existing branch");
            return Ok(VcsOutcome::SwitchedBranch);
        }

        let remote_ref = format!("refs/remotes/origin/{branch}");
        let start_point = format!("origin/{branch}");
        let outcome = if self.ref_exists(path, &remote_ref)? {
            self.git(Some(path), ["checkout", "-b", branch, start_point.as_str()])
        } else {
            self.git(Some(path), ["checkout", "-b", branch])
        };
        if !outcome.success {
            return Err(VcsError::from_outcome(VcsErrorKind::Checkout, &outcome));
        }
        debug!("created new branch");
        Ok(VcsOutcome::CreatedBranch)
    }

    /// Stage `files` (or everything when `None`) and commit.
    ///
    /// An empty staged change set yields [`VcsOutcome::NoOpCommit`].
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn commit(&self, path: &Path, message: &str, files: Option<&[String]>) -> GitResult {
        let mut add = vec!["add".to_string()];
        match files {
            Some(files) => {
                add.push("--".to_string());
                add.extend(files.iter().cloned());
            }
            None => add.push("-A".to_string()),
        }
        let staged = self.git(Some(path), add);
        if !staged.success {
            return Err(VcsError::from_outcome(VcsErrorKind::Stage, &staged));
        }

        let diff = self.git(Some(path), ["diff", "--cached", "--quiet"]);
        match diff.exit_code {
            Some(0) => {
                info!("no staged changes, commit is a no-op");
                return Ok(VcsOutcome::NoOpCommit);
            }
            Some(1) => {}
            _ => return Err(VcsError::from_outcome(VcsErrorKind::Commit, &diff)),
        }

        let mut commit = self.identity.config_args();
        commit.extend(["commit".to_string(), "-m".to_string(), message.to_string()]);
        let outcome = self.git(Some(path), commit);
        if outcome.success {
            info!("changes committed");
            return Ok(VcsOutcome::Committed);
        }
        if !outcome.timed_out && self.worktree_is_clean(path) {
            info!("commit reported failure on a clean worktree, treating as no-op");
            return Ok(VcsOutcome::NoOpCommit);
        }
        warn!(exit_code = ?outcome.exit_code, "git commit failed");
        Err(VcsError::from_outcome(VcsErrorKind::Commit, &outcome))
    }

    /// Push `branch` to the default remote; a repository without remotes is a no-op.
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub fn push(&self, path: &Path, branch: &str) -> GitResult {
        let remotes = self.git(Some(path), ["remote"]);
        if !remotes.success {
            return Err(VcsError::from_outcome(VcsErrorKind::Push, &remotes));
        }
        let Some(remote) = default_remote(&remotes.stdout) else {
            info!("no remote configured, skipping push");
            return Ok(VcsOutcome::NoRemote);
        };

        let outcome = self.git(Some(path), ["push", "-u", remote.as_str(), branch]);
        if !outcome.success {
            warn!(remote = %remote, exit_code = ?outcome.exit_code, "git push failed");
            return Err(VcsError::from_outcome(VcsErrorKind::Push, &outcome));
        }
        info!(remote = %remote, "changes pushed");
        Ok(VcsOutcome::Pushed { remote })
    }

    /// Unstage everything, restore tracked files and remove the untracked `files`.
    ///
    /// Untracked content outside `files` is left alone.
    #[instrument(skip_all, fields(path = %path.display(), files = files.len()))]
    pub fn discard_changes(&self, path: &Path, files: &[String]) -> GitResult {
        let reset = self.git(Some(path), ["reset", "-q"]);
        if !reset.success {
            return Err(VcsError::from_outcome(VcsErrorKind::Restore, &reset));
        }
        let restore = self.git(Some(path), ["checkout", "--", "."]);
        if !restore.success {
            return Err(VcsError::from_outcome(VcsErrorKind::Restore, &restore));
        }
        if !files.is_empty() {
            let mut clean = vec!["clean".to_string(), "-fd".to_string(), "--".to_string()];
            clean.extend(files.iter().cloned());
            let outcome = self.git(Some(path), clean);
            if !outcome.success {
                return Err(VcsError::from_outcome(VcsErrorKind::Restore, &outcome));
            }
        }
        info!("uncommitted changes discarded");
        Ok(VcsOutcome::Discarded)
    }

    /// Write the identity into git's global configuration.
    #[instrument(skip_all)]
    pub fn configure_global_identity(&self) -> Result<(), VcsError> {
        let pairs = [
            ("user.name", self.identity.name.as_str()),
            ("user.email", self.identity.email.as_str()),
        ];
        for (key, value) in pairs {
            if value.trim().is_empty() {
                continue;
            }
            let outcome = self.git(None, ["config", "--global", key, value]);
            if !outcome.success {
                return Err(VcsError::from_outcome(VcsErrorKind::Config, &outcome));
            }
            debug!(key, "global git identity set");
        }
        Ok(())
    }

    /// Name of the checked-out branch, if any.
    pub fn current_branch(&self, path: &Path) -> Option<String> {
        let outcome = self.git(Some(path), ["rev-parse", "--abbrev-ref", "HEAD"]);
        let name = outcome.stdout.trim();
        (outcome.success && !name.is_empty() && name != "HEAD").then(|| name.to_string())
    }

    fn ref_exists(&self, path: &Path, reference: &str) -> Result<bool, VcsError> {
        let outcome = self.git(Some(path), ["show-ref", "--verify", "--quiet", reference]);
        match outcome.exit_code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(VcsError::from_outcome(VcsErrorKind::Checkout, &outcome)),
        }
    }

    fn worktree_is_clean(&self, path: &Path) -> bool {
        let outcome = self.git(Some(path), ["status", "--porcelain"]);
        outcome.success && outcome.stdout.trim().is_empty()
    }

    fn git<I, S>(&self, cwd: Option<&Path>, args: I) -> ProcessOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new("git", args).timeout(self.timeout);
        if let Some(dir) = cwd {
            spec = spec.cwd(dir);
        }
        debug!(command = %spec.display(), "running git");
        self.runner.run(&spec)
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn default_remote(listing: &str) -> Option<String> {
    let remotes: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if remotes.contains(&"origin") {
        return Some("origin".to_string());
    }
    remotes.first().map(|remote| (*remote).to_string())
}

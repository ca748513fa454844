//! Test-only doubles for the agent's seams, plus a git fixture with a local
//! bare remote.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{Application, Task, TaskMessage, TaskStatus, Topic};
use crate::io::backend::{Backend, BackendError};
use crate::io::completion::{CompletionError, CompletionRequest, CompletionService};
use crate::io::git::GitIdentity;
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutcome, SystemRunner};
use crate::poller::{Shutdown, Sleeper};

/// One `PUT /api/tasks/{id}/status` call as received by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub task_id: u64,
    pub status: TaskStatus,
    pub details: Value,
}

#[derive(Debug)]
struct FakeState {
    healthy: bool,
    topics: Vec<Topic>,
    tasks: HashMap<u64, Task>,
    applications: HashMap<u64, Application>,
    messages: HashMap<u64, Vec<TaskMessage>>,
    fetch_failures: u32,
    fetch_count: u32,
    fail_status: bool,
    statuses: Vec<StatusRecord>,
    logs: HashMap<u64, Vec<String>>,
}

/// In-memory backend. Queued messages are delivered by the next fetch only,
/// and status updates are applied to the stored task.
#[derive(Debug)]
pub struct FakeBackend {
    state: RefCell<FakeState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(FakeState {
                healthy: true,
                topics: Vec::new(),
                tasks: HashMap::new(),
                applications: HashMap::new(),
                messages: HashMap::new(),
                fetch_failures: 0,
                fetch_count: 0,
                fail_status: false,
                statuses: Vec::new(),
                logs: HashMap::new(),
            }),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.borrow_mut().healthy = healthy;
    }

    pub fn add_topic(&self, id: u64, name: &str) {
        self.state.borrow_mut().topics.push(Topic {
            id,
            name: name.to_string(),
        });
    }

    pub fn add_task(&self, task: Task) {
        self.state.borrow_mut().tasks.insert(task.id, task);
    }

    pub fn add_application(&self, application: Application) {
        self.state
            .borrow_mut()
            .applications
            .insert(application.id, application);
    }

    pub fn push_messages(&self, topic_id: u64, messages: Vec<TaskMessage>) {
        self.state
            .borrow_mut()
            .messages
            .entry(topic_id)
            .or_default()
            .extend(messages);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_fetches(&self, count: u32) {
        self.state.borrow_mut().fetch_failures = count;
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.state.borrow_mut().fail_status = fail;
    }

    pub fn fetch_count(&self) -> u32 {
        self.state.borrow().fetch_count
    }

    pub fn status_updates(&self) -> Vec<StatusRecord> {
        self.state.borrow().statuses.clone()
    }

    /// Step tags of every status update for `task_id`, in order.
    pub fn steps(&self, task_id: u64) -> Vec<String> {
        self.state
            .borrow()
            .statuses
            .iter()
            .filter(|record| record.task_id == task_id)
            .filter_map(|record| record.details["step"].as_str().map(str::to_string))
            .collect()
    }

    pub fn logs(&self, task_id: u64) -> Vec<String> {
        self.state
            .borrow()
            .logs
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Backend for FakeBackend {
    fn health_check(&self) -> bool {
        self.state.borrow().healthy
    }

    fn find_topic(&self, name: &str) -> Result<Option<Topic>, BackendError> {
        Ok(self
            .state
            .borrow()
            .topics
            .iter()
            .find(|topic| topic.name == name)
            .cloned())
    }

    fn fetch_messages(&self, topic_id: u64) -> Result<Vec<TaskMessage>, BackendError> {
        let mut state = self.state.borrow_mut();
        state.fetch_count += 1;
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(BackendError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(state.messages.remove(&topic_id).unwrap_or_default())
    }

    fn get_task(&self, task_id: u64) -> Result<Task, BackendError> {
        self.state
            .borrow()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("task {task_id}")))
    }

    fn get_application(&self, application_id: u64) -> Result<Application, BackendError> {
        self.state
            .borrow()
            .applications
            .get(&application_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("application {application_id}")))
    }

    fn update_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        details: &Value,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if state.fail_status {
            return Err(BackendError::Status {
                status: 500,
                body: "status update rejected".to_string(),
            });
        }
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.status = Some(status);
        }
        state.statuses.push(StatusRecord {
            task_id,
            status,
            details: details.clone(),
        });
        Ok(())
    }

    fn post_task_logs(&self, task_id: u64, logs: &str) -> Result<(), BackendError> {
        self.state
            .borrow_mut()
            .logs
            .entry(task_id)
            .or_default()
            .push(logs.to_string());
        Ok(())
    }
}

/// Completion service that replays canned responses in order.
///
/// Once the script is exhausted every call fails.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    responses: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(str::to_string).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CompletionError::Other("no scripted response left".to_string()))
    }
}

/// Runs commands for real while recording them. Optionally fails any command
/// carrying a given argument.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    inner: SystemRunner,
    fail_on: Option<String>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command whose arguments include `arg`, without running it.
    pub fn failing_on(arg: &str) -> Self {
        Self {
            fail_on: Some(arg.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Number of recorded commands whose arguments include `arg`.
    pub fn count_with_arg(&self, arg: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|spec| spec.args.iter().any(|a| a == arg))
            .count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> ProcessOutcome {
        self.calls.borrow_mut().push(spec.clone());
        if let Some(arg) = &self.fail_on {
            if spec.args.iter().any(|a| a == arg) {
                return ProcessOutcome::failed(format!("injected failure: {}", spec.display()));
            }
        }
        self.inner.run(spec)
    }
}

/// Sleeper that returns immediately and records each requested duration.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _shutdown: &Shutdown) {
        self.sleeps.borrow_mut().push(duration);
    }
}

/// Identity used for commits made by tests.
pub fn test_identity() -> GitIdentity {
    GitIdentity::new("Avatar Test", "avatar-test@example.com")
}

/// Temp directory holding a bare remote (`remote.git`) whose `main` branch
/// has one seeded commit containing `README.md`.
pub struct TestRepo {
    temp: TempDir,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let remote = temp.path().join("remote.git");
        let seed = temp.path().join("seed");
        std::fs::create_dir_all(&seed).context("create seed dir")?;

        git(temp.path(), &["init", "--bare", "remote.git"])?;
        git(&seed, &["init"])?;
        std::fs::write(seed.join("README.md"), "# demo\n").context("write README")?;
        git(&seed, &["add", "README.md"])?;
        git(
            &seed,
            &[
                "-c",
                "user.name=Avatar Test",
                "-c",
                "user.email=avatar-test@example.com",
                "commit",
                "-m",
                "initial commit",
            ],
        )?;
        let remote_arg = remote.to_string_lossy().into_owned();
        git(&seed, &["push", &remote_arg, "HEAD:refs/heads/main"])?;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        Ok(Self { temp, remote })
    }

    /// Scratch space next to the remote, e.g. for a workspace root.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    pub fn remote_has_branch(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        git(&self.remote, &["rev-parse", "--verify", "--quiet", &reference]).is_ok()
    }

    /// File contents at the tip of `branch` on the remote.
    pub fn remote_file(&self, branch: &str, path: &str) -> Result<String> {
        git(&self.remote, &["show", &format!("{branch}:{path}")])
    }

    /// Subject line of the tip commit of `branch` on the remote.
    pub fn remote_subject(&self, branch: &str) -> Result<String> {
        let out = git(&self.remote, &["log", "-1", "--format=%s", branch])?;
        Ok(out.trim().to_string())
    }
}

/// Run git in `cwd` and return stdout, failing on a non-zero exit.
pub fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

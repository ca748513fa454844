//! Shared deterministic types for the task pipeline.
//!
//! These mirror the backend's records as the agent sees them. They carry no
//! I/O and serialize to the exact field names of the backend contract.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend-owned task status.
///
/// Transitions only move forward: `todo -> in_progress -> {done, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named checkpoint reported to the backend as pipeline progress.
///
/// Unknown tags round-trip verbatim through [`StepTag::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepTag {
    GettingTaskInfo,
    TaskInfoReceived,
    GettingApplicationInfo,
    ApplicationInfoReceived,
    CloningRepository,
    RepositoryReady,
    CheckingOutBranch,
    BranchCheckedOut,
    AnalyzingTask,
    TaskAnalyzed,
    GeneratingCode,
    CodeGenerated,
    WritingFiles,
    FilesWritten,
    RunningTests,
    TestsCompleted,
    CommittingChanges,
    ChangesCommitted,
    PushingChanges,
    ChangesPushed,
    Other(String),
}

impl StepTag {
    const KNOWN: [StepTag; 20] = [
        StepTag::GettingTaskInfo,
        StepTag::TaskInfoReceived,
        StepTag::GettingApplicationInfo,
        StepTag::ApplicationInfoReceived,
        StepTag::CloningRepository,
        StepTag::RepositoryReady,
        StepTag::CheckingOutBranch,
        StepTag::BranchCheckedOut,
        StepTag::AnalyzingTask,
        StepTag::TaskAnalyzed,
        StepTag::GeneratingCode,
        StepTag::CodeGenerated,
        StepTag::WritingFiles,
        StepTag::FilesWritten,
        StepTag::RunningTests,
        StepTag::TestsCompleted,
        StepTag::CommittingChanges,
        StepTag::ChangesCommitted,
        StepTag::PushingChanges,
        StepTag::ChangesPushed,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            StepTag::GettingTaskInfo => "getting_task_info",
            StepTag::TaskInfoReceived => "task_info_received",
            StepTag::GettingApplicationInfo => "getting_application_info",
            StepTag::ApplicationInfoReceived => "application_info_received",
            StepTag::CloningRepository => "cloning_repository",
            StepTag::RepositoryReady => "repository_ready",
            StepTag::CheckingOutBranch => "checking_out_branch",
            StepTag::BranchCheckedOut => "branch_checked_out",
            StepTag::AnalyzingTask => "analyzing_task",
            StepTag::TaskAnalyzed => "task_analyzed",
            StepTag::GeneratingCode => "generating_code",
            StepTag::CodeGenerated => "code_generated",
            StepTag::WritingFiles => "writing_files",
            StepTag::FilesWritten => "files_written",
            StepTag::RunningTests => "running_tests",
            StepTag::TestsCompleted => "tests_completed",
            StepTag::CommittingChanges => "committing_changes",
            StepTag::ChangesCommitted => "changes_committed",
            StepTag::PushingChanges => "pushing_changes",
            StepTag::ChangesPushed => "changes_pushed",
            StepTag::Other(tag) => tag,
        }
    }

    pub fn parse(raw: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|tag| tag.as_str() == raw)
            .cloned()
            .unwrap_or_else(|| StepTag::Other(raw.to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, StepTag::Other(_))
    }
}

impl fmt::Display for StepTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(StepTag::parse(&raw))
    }
}

/// A unit of work as returned by `GET /api/tasks/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub code_branch: Option<String>,
    pub application_id: u64,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Task {
    /// Declared branch, or `dev-<id>` when the task names none.
    pub fn branch_name(&self) -> String {
        match self.code_branch.as_deref().map(str::trim) {
            Some(branch) if !branch.is_empty() => branch.to_string(),
            _ => format!("dev-{}", self.id),
        }
    }
}

/// A registered project with a repository, read-only to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub git_repo_url: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Queue topic resolved once at subscription time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub name: String,
}

/// Payload carried by a queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub task_id: Option<u64>,
}

/// One pending entry of the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub data: MessageData,
}

impl TaskMessage {
    pub fn for_task(task_id: u64) -> Self {
        Self {
            id: None,
            data: MessageData {
                task_id: Some(task_id),
            },
        }
    }

    pub fn task_id(&self) -> Option<u64> {
        self.data.task_id
    }
}

/// Append-only progress record for a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepUpdate {
    pub task_id: u64,
    pub status: TaskStatus,
    pub step: Option<StepTag>,
    pub detail: serde_json::Value,
    pub timestamp: String,
}

/// A file produced by the completion service, relative to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Advisory breakdown of a task description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub functional_requirements: Vec<String>,
    pub technical_requirements: Vec<String>,
    pub files_to_create: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub estimated_complexity: String,
}

impl TaskAnalysis {
    /// Fallback used when the completion service returns unusable output.
    pub fn unknown() -> Self {
        Self {
            functional_requirements: Vec::new(),
            technical_requirements: Vec::new(),
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
            estimated_complexity: "unknown".to_string(),
        }
    }
}

//! Task Executor: drives one task through the fixed pipeline.
//!
//! ```text
//! fetch_task → fetch_application → ensure_repository_cloned → checkout_branch
//!   → analyze_task → generate_code → write_files → run_tests
//!   → commit_changes → push_changes → done
//! ```
//!
//! Every step reports an `in_progress` checkpoint before and after it runs.
//! The first failing step short-circuits the rest and the task is reported
//! `failed`. Panics are caught at the task boundary and treated the same way.
//! The task's scratch directory is removed on every exit path, and a failure
//! after files were written restores the clone.
//!
//! A task the backend already reports as `done` or `failed` is skipped
//! without any status report.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{Level, error, info, instrument, warn};

use crate::core::pipeline::PipelineStep;
use crate::core::types::{Task, TaskMessage, TaskStatus};
use crate::io::backend::{Backend, BackendError};
use crate::io::codegen::{CodeGenerator, project_context, write_files};
use crate::io::completion::CompletionService;
use crate::io::config::PipelineConfig;
use crate::io::git::Git;
use crate::io::process::{CommandRunner, SystemRunner};
use crate::io::status::StatusReporter;
use crate::io::task_log::TaskLog;
use crate::io::test_command::run_tests;
use crate::io::workspace::{ScratchGuard, WorkspaceManager};

pub const ANALYSIS_ARTIFACT: &str = "analysis.json";
pub const GENERATION_ARTIFACT: &str = "generation.txt";
pub const TESTS_ARTIFACT: &str = "tests.log";

/// Terminal result of one task execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done {
        files: Vec<String>,
        duration: f64,
    },
    Failed {
        step: PipelineStep,
        error: String,
        duration: f64,
    },
    /// The backend already held a terminal status; nothing ran.
    Skipped { status: TaskStatus },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Done { .. } => TaskStatus::Done,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
            TaskOutcome::Skipped { status } => *status,
        }
    }

    /// Seconds from pipeline entry to the terminal report.
    pub fn duration(&self) -> f64 {
        match self {
            TaskOutcome::Done { duration, .. } | TaskOutcome::Failed { duration, .. } => *duration,
            TaskOutcome::Skipped { .. } => 0.0,
        }
    }
}

pub struct TaskExecutor<B: Backend, C: CompletionService, R: CommandRunner = SystemRunner> {
    workspace: WorkspaceManager,
    git: Git<R>,
    codegen: CodeGenerator<C>,
    reporter: StatusReporter<B>,
    settings: PipelineConfig,
}

impl<B: Backend, C: CompletionService, R: CommandRunner> TaskExecutor<B, C, R> {
    pub fn new(
        workspace: WorkspaceManager,
        git: Git<R>,
        codegen: CodeGenerator<C>,
        reporter: StatusReporter<B>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            workspace,
            git,
            codegen,
            reporter,
            settings,
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn git(&self) -> &Git<R> {
        &self.git
    }

    pub fn codegen(&self) -> &CodeGenerator<C> {
        &self.codegen
    }

    pub fn reporter(&self) -> &StatusReporter<B> {
        &self.reporter
    }

    /// Poller entry point. A message without a task id is ignored.
    pub fn handle_message(&mut self, message: &TaskMessage) -> Option<TaskOutcome> {
        let Some(task_id) = message.task_id() else {
            warn!(message_id = ?message.id, "message has no task id, ignoring");
            return None;
        };
        Some(self.execute(task_id))
    }

    /// Run the whole pipeline for `task_id`. Never panics and never returns an error:
    /// every failure ends as [`TaskOutcome::Failed`].
    #[instrument(skip(self))]
    pub fn execute(&mut self, task_id: u64) -> TaskOutcome {
        let started = Instant::now();
        let fetched = self.reporter.backend().get_task(task_id);
        let current = fetched.as_ref().ok().and_then(|task| task.status);
        if let Some(status) = current.filter(|status| status.is_terminal()) {
            info!(%status, "task already finished, skipping");
            return TaskOutcome::Skipped { status };
        }

        let log = match TaskLog::open(self.workspace.task_log_path(task_id)) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "task log unavailable");
                None
            }
        };
        self.reporter.begin(task_id, log, current);
        self.reporter
            .note(task_id, Level::INFO, "Starting task processing");
        info!("task started");

        let mut run = Run {
            task_id,
            workspace: &self.workspace,
            git: &self.git,
            codegen: &self.codegen,
            settings: &self.settings,
            reporter: &mut self.reporter,
            step: PipelineStep::FetchTask,
            scratch: None,
            repo: None,
            written: Vec::new(),
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| run.pipeline(fetched)));
        let duration = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(Ok(files)) => TaskOutcome::Done { files, duration },
            Ok(Err(err)) => TaskOutcome::Failed {
                step: run.step,
                error: format!("{err:#}"),
                duration,
            },
            Err(payload) => TaskOutcome::Failed {
                step: run.step,
                error: format!("unexpected panic: {}", panic_message(payload.as_ref())),
                duration,
            },
        };
        if matches!(outcome, TaskOutcome::Failed { .. }) {
            run.discard_written();
        }
        run.finish_task(&outcome);
        run.reporter.end(task_id);

        if let Some(scratch) = run.scratch.take() {
            if let Err(err) = scratch.release() {
                warn!(err = %format!("{err:#}"), "scratch cleanup failed");
            }
        }
        outcome
    }
}

/// Borrowed state of one execution.
struct Run<'a, B: Backend, C: CompletionService, R: CommandRunner> {
    task_id: u64,
    workspace: &'a WorkspaceManager,
    git: &'a Git<R>,
    codegen: &'a CodeGenerator<C>,
    settings: &'a PipelineConfig,
    reporter: &'a mut StatusReporter<B>,
    /// Step currently running; the failed step once the pipeline stops.
    step: PipelineStep,
    scratch: Option<ScratchGuard<'a>>,
    /// Clone and paths touched by `write_files`, once it has started.
    repo: Option<PathBuf>,
    written: Vec<String>,
}

impl<B: Backend, C: CompletionService, R: CommandRunner> Run<'_, B, C, R> {
    fn pipeline(&mut self, fetched: Result<Task, BackendError>) -> Result<Vec<String>> {
        let task_id = self.task_id;

        self.begin(PipelineStep::FetchTask, json!({ "task_id": task_id }));
        let task = fetched.with_context(|| format!("fetch task {task_id}"))?;
        self.finish(json!({ "title": task.title }));
        let workspace = self.workspace;
        self.scratch = Some(workspace.scratch(task_id)?);

        self.begin(
            PipelineStep::FetchApplication,
            json!({ "application_id": task.application_id }),
        );
        let application = self
            .reporter
            .backend()
            .get_application(task.application_id)
            .with_context(|| format!("fetch application {}", task.application_id))?;
        self.finish(json!({ "name": application.name }));

        let repo = workspace.repo_path(task.application_id);
        self.begin(
            PipelineStep::EnsureRepositoryCloned,
            json!({ "url": application.git_repo_url, "path": repo.display().to_string() }),
        );
        let cloned = self.git.clone_repo(&application.git_repo_url, &repo)?;
        self.finish(json!({ "outcome": cloned.to_string() }));

        let branch = task.branch_name();
        self.begin(PipelineStep::CheckoutBranch, json!({ "branch": branch }));
        let checkout = self.git.checkout_or_create(&repo, &branch)?;
        self.finish(json!({ "branch": branch, "outcome": checkout.to_string() }));

        self.begin(PipelineStep::AnalyzeTask, Value::Null);
        let analysis = self.codegen.analyze(&task.description);
        let analysis_json =
            serde_json::to_string_pretty(&analysis).context("serialize task analysis")?;
        self.artifact(ANALYSIS_ARTIFACT, &analysis_json)?;
        self.reporter
            .report_log(task_id, &format!("Task analysis:\n{analysis_json}"));
        self.finish(json!({ "complexity": analysis.estimated_complexity }));

        self.begin(PipelineStep::GenerateCode, Value::Null);
        let context = project_context(&application.name, &repo, self.settings.context_max_entries);
        let generation = self
            .codegen
            .generate_files(&task.description, Some(&context))?;
        self.artifact(GENERATION_ARTIFACT, &generation.raw)?;
        let names: Vec<String> = generation.files.iter().map(|file| file.path.clone()).collect();
        self.reporter.report_log(
            task_id,
            &format!("Generated {} files: {}", names.len(), names.join(", ")),
        );
        self.finish(json!({ "files": names.len() }));

        self.begin(PipelineStep::WriteFiles, json!({ "files": names }));
        self.repo = Some(repo.clone());
        self.written = names.clone();
        let written = write_files(&generation.files, &repo)?;
        self.finish(json!({ "written": written.len() }));

        self.begin(PipelineStep::RunTests, Value::Null);
        let tests = run_tests(
            self.git.runner(),
            &self.settings.test_command,
            &repo,
            Duration::from_secs(self.settings.test_timeout_secs),
        );
        self.artifact(TESTS_ARTIFACT, &tests.log_text())?;
        let summary = tests.summary();
        self.reporter.report_log(task_id, &summary);
        if tests.is_failure() {
            bail!("{}", summary.lines().next().unwrap_or("Tests failed"));
        }
        self.finish(Value::Null);

        self.begin(PipelineStep::CommitChanges, Value::Null);
        let message = commit_message(task_id, &task.title);
        let commit = self.git.commit(&repo, &message, Some(names.as_slice()))?;
        self.reporter
            .report_log(task_id, &format!("Commit: {commit}"));
        self.finish(json!({ "outcome": commit.to_string() }));

        self.begin(PipelineStep::PushChanges, json!({ "branch": branch }));
        let push = self.git.push(&repo, &branch)?;
        self.reporter.report_log(task_id, &format!("Push: {push}"));
        self.finish(json!({ "outcome": push.to_string() }));

        Ok(names)
    }

    fn begin(&mut self, step: PipelineStep, detail: Value) {
        self.step = step;
        info!(task_id = self.task_id, %step, "step started");
        self.reporter
            .report_status(self.task_id, TaskStatus::InProgress, Some(step.start_tag()), detail);
    }

    fn finish(&mut self, detail: Value) {
        let step = self.step;
        self.reporter.report_status(
            self.task_id,
            TaskStatus::InProgress,
            Some(step.finish_tag()),
            detail,
        );
    }

    fn artifact(&self, name: &str, contents: &str) -> Result<()> {
        if let Some(scratch) = &self.scratch {
            scratch.write_artifact(name, contents)?;
        }
        Ok(())
    }

    /// Put the clone back to its committed state after a failed run.
    fn discard_written(&mut self) {
        let Some(repo) = self.repo.take() else {
            return;
        };
        match self.git.discard_changes(&repo, &self.written) {
            Ok(outcome) => info!(task_id = self.task_id, %outcome, "clone restored"),
            Err(err) => warn!(task_id = self.task_id, err = %err, "clone restore failed"),
        }
    }

    /// Terminal status report and task log line.
    fn finish_task(&mut self, outcome: &TaskOutcome) {
        let task_id = self.task_id;
        match outcome {
            TaskOutcome::Done { files, duration } => {
                info!(task_id, duration, "task completed");
                self.reporter.report_status(
                    task_id,
                    TaskStatus::Done,
                    None,
                    json!({ "duration": duration, "files": files }),
                );
                self.reporter
                    .note(task_id, Level::INFO, "Task completed successfully");
            }
            TaskOutcome::Failed {
                step,
                error,
                duration,
            } => {
                error!(task_id, %step, duration, error = %error, "task failed");
                self.reporter.report_status(
                    task_id,
                    TaskStatus::Failed,
                    None,
                    json!({ "error": error, "step": step.as_str(), "duration": duration }),
                );
                self.reporter
                    .report_log(task_id, &format!("Task failed at {step}: {error}"));
            }
            TaskOutcome::Skipped { .. } => {}
        }
    }
}

/// `feat: complete development task <id> - <title>`
pub fn commit_message(task_id: u64, title: &str) -> String {
    format!("feat: complete development task {task_id} - {}", title.trim())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

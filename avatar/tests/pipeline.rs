//! End-to-end pipeline tests against a local bare remote.
//!
//! Each test builds a `TaskExecutor` over the in-memory backend, real git and
//! either the placeholder or a scripted completion service, then asserts on
//! the reported statuses, the remote repository, and the workspace tree.

use std::path::Path;

use avatar::core::pipeline::PipelineStep;
use avatar::core::types::{Application, Task, TaskMessage, TaskStatus};
use avatar::io::codegen::CodeGenerator;
use avatar::io::completion::{
    CompletionError, CompletionKind, CompletionRequest, CompletionService, PlaceholderCompletion,
};
use avatar::io::config::{LlmConfig, PipelineConfig};
use avatar::io::git::Git;
use avatar::io::status::StatusReporter;
use avatar::io::workspace::WorkspaceManager;
use avatar::pipeline::{TaskExecutor, TaskOutcome};
use avatar::test_support::{
    FakeBackend, RecordingRunner, ScriptedCompletion, TestRepo, git, test_identity,
};

const ANALYSIS: &str = r#"{"functional_requirements":["health endpoint"],"technical_requirements":[],"files_to_create":["health.py"],"files_to_modify":[],"estimated_complexity":"simple"}"#;

type Executor<'a> = TaskExecutor<&'a FakeBackend, Box<dyn CompletionService>, RecordingRunner>;

fn executor<'a>(
    backend: &'a FakeBackend,
    root: &Path,
    completion: Box<dyn CompletionService>,
    runner: RecordingRunner,
    settings: PipelineConfig,
) -> Executor<'a> {
    TaskExecutor::new(
        WorkspaceManager::open(root).expect("workspace"),
        Git::new(runner).with_identity(test_identity()),
        CodeGenerator::new(completion, &LlmConfig::default()),
        StatusReporter::new(backend),
        settings,
    )
}

fn task(id: u64, branch: Option<&str>) -> Task {
    Task {
        id,
        title: "Health endpoint".to_string(),
        description: "add a health endpoint".to_string(),
        status: Some(TaskStatus::Todo),
        assignee: None,
        code_branch: branch.map(str::to_string),
        application_id: 1,
        started_at: None,
        completed_at: None,
    }
}

fn seed(backend: &FakeBackend, repo: &TestRepo) {
    backend.add_task(task(1, Some("feature/x")));
    backend.add_application(Application {
        id: 1,
        name: "demo".to_string(),
        git_repo_url: repo.remote_url(),
        owner: None,
    });
}

fn expected_steps() -> Vec<String> {
    PipelineStep::ORDER
        .iter()
        .flat_map(|step| [step.start_tag(), step.finish_tag()])
        .map(|tag| tag.as_str().to_string())
        .collect()
}

#[test]
fn placeholder_run_commits_and_pushes_one_file() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let outcome = executor.execute(1);

    let TaskOutcome::Done { files, duration } = &outcome else {
        panic!("expected done, got {outcome:?}");
    };
    assert_eq!(files, &vec!["app.py".to_string()]);
    assert!(*duration >= 0.0);

    assert!(repo.remote_has_branch("feature/x"));
    assert_eq!(
        repo.remote_subject("feature/x").expect("subject"),
        "feat: complete development task 1 - Health endpoint"
    );
    let content = repo.remote_file("feature/x", "app.py").expect("app.py");
    assert!(content.contains("Hello, World!"));

    assert_eq!(backend.steps(1), expected_steps());
    let last = backend.status_updates().pop().expect("terminal status");
    assert_eq!(last.status, TaskStatus::Done);
    assert!(last.details["duration"].as_f64().expect("duration") >= 0.0);
    assert_eq!(last.details["files"][0], "app.py");

    let logs = backend.logs(1);
    assert!(logs.iter().any(|line| line == "Generated 1 files: app.py"));
    assert!(logs.iter().any(|line| line.starts_with("Task analysis:")));
    assert!(logs.iter().any(|line| line.starts_with("Tests skipped")));

    let workspace = executor.workspace();
    assert!(!workspace.scratch_dir(1).exists());
    assert!(workspace.repo_path(1).join(".git").exists());
    let task_log = std::fs::read_to_string(workspace.task_log_path(1)).expect("task log");
    assert!(task_log.contains("INFO Starting task processing"));
    assert!(task_log.contains("INFO Task completed successfully"));
}

/// The second task on the same application reuses the clone, defaults its
/// branch name, and commits nothing new.
#[test]
fn second_task_reuses_clone_and_default_branch() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    backend.add_task(task(2, None));
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    assert_eq!(executor.execute(1).status(), TaskStatus::Done);
    let outcome = executor.execute(2);
    assert_eq!(outcome.status(), TaskStatus::Done, "{outcome:?}");

    assert_eq!(executor.git().runner().count_with_arg("clone"), 1);
    assert!(repo.remote_has_branch("dev-2"));
    assert!(backend.logs(2).iter().any(|line| line == "Commit: nothing to commit"));
}

#[test]
fn response_without_file_blocks_fails_the_task() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let completion = ScriptedCompletion::new(vec![ANALYSIS, "I could not produce any code."]);
    let mut executor = executor(
        &backend,
        &root,
        Box::new(completion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let outcome = executor.execute(1);

    let TaskOutcome::Failed { step, error, .. } = &outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(*step, PipelineStep::GenerateCode);
    assert!(error.contains("no files generated"), "{error}");

    let last = backend.status_updates().pop().expect("terminal status");
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.details["step"], "generate_code");
    assert!(
        last.details["error"]
            .as_str()
            .expect("error")
            .contains("no files generated")
    );
    assert!(last.details["duration"].as_f64().expect("duration") >= 0.0);
    assert!(!repo.remote_has_branch("feature/x"));
    assert!(!executor.workspace().scratch_dir(1).exists());
}

struct FailureCase {
    step: PipelineStep,
    completion: Box<dyn CompletionService>,
    runner: RecordingRunner,
    settings: PipelineConfig,
    application_id: u64,
}

impl FailureCase {
    fn new(step: PipelineStep) -> Self {
        Self {
            step,
            completion: Box::new(PlaceholderCompletion),
            runner: RecordingRunner::new(),
            settings: PipelineConfig::default(),
            application_id: 1,
        }
    }
}

/// Forcing a failure at each step after the scratch directory exists leaves
/// no scratch directory behind and ends in `failed`.
#[test]
fn scratch_is_removed_whichever_step_fails() {
    let mut failing_tests = FailureCase::new(PipelineStep::RunTests);
    failing_tests.settings.test_command = vec!["false".to_string()];
    let mut missing_application = FailureCase::new(PipelineStep::FetchApplication);
    missing_application.application_id = 404;

    let cases = vec![
        missing_application,
        FailureCase {
            runner: RecordingRunner::failing_on("clone"),
            ..FailureCase::new(PipelineStep::EnsureRepositoryCloned)
        },
        FailureCase {
            runner: RecordingRunner::failing_on("checkout"),
            ..FailureCase::new(PipelineStep::CheckoutBranch)
        },
        FailureCase {
            completion: Box::new(ScriptedCompletion::new(Vec::new())),
            ..FailureCase::new(PipelineStep::GenerateCode)
        },
        FailureCase {
            completion: Box::new(ScriptedCompletion::new(vec![
                ANALYSIS,
                "FILE: ../escape.py\nCONTENT:\nprint('x')\nEND_FILE",
            ])),
            ..FailureCase::new(PipelineStep::WriteFiles)
        },
        failing_tests,
        FailureCase {
            runner: RecordingRunner::failing_on("commit"),
            ..FailureCase::new(PipelineStep::CommitChanges)
        },
        FailureCase {
            runner: RecordingRunner::failing_on("push"),
            ..FailureCase::new(PipelineStep::PushChanges)
        },
    ];

    for case in cases {
        let repo = TestRepo::new().expect("repo");
        let root = repo.path().join("workspace");
        let backend = FakeBackend::new();
        seed(&backend, &repo);
        let mut broken = task(1, Some("feature/x"));
        broken.application_id = case.application_id;
        backend.add_task(broken);
        let mut executor = executor(&backend, &root, case.completion, case.runner, case.settings);

        let outcome = executor.execute(1);

        match &outcome {
            TaskOutcome::Failed { step, .. } => assert_eq!(*step, case.step, "{outcome:?}"),
            other => panic!("expected {} to fail, got {other:?}", case.step),
        }
        let statuses = backend.status_updates();
        let last = statuses.last().expect("terminal status");
        assert_eq!(last.status, TaskStatus::Failed, "{}", case.step);
        assert_eq!(
            statuses
                .iter()
                .filter(|record| record.status == TaskStatus::Failed)
                .count(),
            1
        );
        assert!(
            !executor.workspace().scratch_dir(1).exists(),
            "scratch left behind after {} failed",
            case.step
        );
    }
}

#[test]
fn missing_task_fails_before_scratch_is_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = FakeBackend::new();
    let mut executor = executor(
        &backend,
        temp.path(),
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let outcome = executor.execute(77);

    assert!(matches!(
        outcome,
        TaskOutcome::Failed {
            step: PipelineStep::FetchTask,
            ..
        }
    ));
    assert!(!executor.workspace().scratch_dir(77).exists());
    assert!(executor.git().runner().calls().is_empty());
}

#[test]
fn message_without_task_id_is_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = FakeBackend::new();
    let mut executor = executor(
        &backend,
        temp.path(),
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let message = TaskMessage {
        id: Some(3),
        data: Default::default(),
    };
    assert_eq!(executor.handle_message(&message), None);
    assert!(backend.status_updates().is_empty());
}

/// A redelivered message for a finished task must not move it out of `done`.
#[test]
fn finished_task_is_skipped_without_reports() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let mut finished = task(1, Some("feature/x"));
    finished.status = Some(TaskStatus::Done);
    backend.add_task(finished);
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let outcome = executor.execute(1);

    assert_eq!(
        outcome,
        TaskOutcome::Skipped {
            status: TaskStatus::Done
        }
    );
    assert!(backend.status_updates().is_empty());
    assert!(backend.logs(1).is_empty());
    assert!(executor.git().runner().calls().is_empty());
    assert!(!executor.workspace().scratch_dir(1).exists());
    assert!(!executor.workspace().task_log_path(1).exists());
}

#[test]
fn task_delivered_twice_runs_once() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    assert_eq!(executor.execute(1).status(), TaskStatus::Done);
    let sent = backend.status_updates().len();
    let again = executor.execute(1);

    assert!(matches!(again, TaskOutcome::Skipped { .. }), "{again:?}");
    let statuses = backend.status_updates();
    assert_eq!(statuses.len(), sent);
    assert_eq!(statuses.last().map(|record| record.status), Some(TaskStatus::Done));
    assert_eq!(executor.git().runner().count_with_arg("clone"), 1);
    assert!(executor.reporter().history().is_empty());
}

/// Analysis succeeds, then the completion service panics mid-generation.
struct PanickingCompletion;

impl CompletionService for PanickingCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match request.kind {
            CompletionKind::Analysis => Ok(ANALYSIS.to_string()),
            CompletionKind::Generation => panic!("completion backend exploded"),
        }
    }
}

#[test]
fn panic_during_generation_fails_the_task() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PanickingCompletion),
        RecordingRunner::new(),
        PipelineConfig::default(),
    );

    let outcome = executor.execute(1);

    let TaskOutcome::Failed { step, error, .. } = &outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(*step, PipelineStep::GenerateCode);
    assert!(error.contains("unexpected panic"), "{error}");
    assert!(error.contains("completion backend exploded"), "{error}");

    let failed: Vec<_> = backend
        .status_updates()
        .into_iter()
        .filter(|record| record.status == TaskStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].details["step"], "generate_code");
    assert!(failed[0].details["duration"].as_f64().expect("duration") >= 0.0);
    assert!(!executor.workspace().scratch_dir(1).exists());
    assert!(!repo.remote_has_branch("feature/x"));
}

/// Files written before a failing test run do not linger in the shared clone.
#[test]
fn failed_tests_leave_clone_clean() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path().join("workspace");
    let backend = FakeBackend::new();
    seed(&backend, &repo);
    let settings = PipelineConfig {
        test_command: vec!["false".to_string()],
        ..PipelineConfig::default()
    };
    let mut executor = executor(
        &backend,
        &root,
        Box::new(PlaceholderCompletion),
        RecordingRunner::new(),
        settings,
    );

    let outcome = executor.execute(1);

    assert!(
        matches!(
            outcome,
            TaskOutcome::Failed {
                step: PipelineStep::RunTests,
                ..
            }
        ),
        "{outcome:?}"
    );
    let clone = executor.workspace().repo_path(1);
    assert!(clone.join("README.md").exists());
    assert!(!clone.join("app.py").exists());
    let status = git(&clone, &["status", "--porcelain"]).expect("status");
    assert!(status.trim().is_empty(), "{status}");
}

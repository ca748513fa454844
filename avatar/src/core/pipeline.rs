//! Fixed step order of the task pipeline and the tags each step reports.

use std::fmt;

use crate::core::types::StepTag;

/// One state of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    FetchTask,
    FetchApplication,
    EnsureRepositoryCloned,
    CheckoutBranch,
    AnalyzeTask,
    GenerateCode,
    WriteFiles,
    RunTests,
    CommitChanges,
    PushChanges,
}

impl PipelineStep {
    pub const ORDER: [PipelineStep; 10] = [
        PipelineStep::FetchTask,
        PipelineStep::FetchApplication,
        PipelineStep::EnsureRepositoryCloned,
        PipelineStep::CheckoutBranch,
        PipelineStep::AnalyzeTask,
        PipelineStep::GenerateCode,
        PipelineStep::WriteFiles,
        PipelineStep::RunTests,
        PipelineStep::CommitChanges,
        PipelineStep::PushChanges,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::FetchTask => "fetch_task",
            PipelineStep::FetchApplication => "fetch_application",
            PipelineStep::EnsureRepositoryCloned => "ensure_repository_cloned",
            PipelineStep::CheckoutBranch => "checkout_branch",
            PipelineStep::AnalyzeTask => "analyze_task",
            PipelineStep::GenerateCode => "generate_code",
            PipelineStep::WriteFiles => "write_files",
            PipelineStep::RunTests => "run_tests",
            PipelineStep::CommitChanges => "commit_changes",
            PipelineStep::PushChanges => "push_changes",
        }
    }

    /// Checkpoint reported before the step runs.
    pub fn start_tag(self) -> StepTag {
        match self {
            PipelineStep::FetchTask => StepTag::GettingTaskInfo,
            PipelineStep::FetchApplication => StepTag::GettingApplicationInfo,
            PipelineStep::EnsureRepositoryCloned => StepTag::CloningRepository,
            PipelineStep::CheckoutBranch => StepTag::CheckingOutBranch,
            PipelineStep::AnalyzeTask => StepTag::AnalyzingTask,
            PipelineStep::GenerateCode => StepTag::GeneratingCode,
            PipelineStep::WriteFiles => StepTag::WritingFiles,
            PipelineStep::RunTests => StepTag::RunningTests,
            PipelineStep::CommitChanges => StepTag::CommittingChanges,
            PipelineStep::PushChanges => StepTag::PushingChanges,
        }
    }

    /// Checkpoint reported after the step succeeds.
    pub fn finish_tag(self) -> StepTag {
        match self {
            PipelineStep::FetchTask => StepTag::TaskInfoReceived,
            PipelineStep::FetchApplication => StepTag::ApplicationInfoReceived,
            PipelineStep::EnsureRepositoryCloned => StepTag::RepositoryReady,
            PipelineStep::CheckoutBranch => StepTag::BranchCheckedOut,
            PipelineStep::AnalyzeTask => StepTag::TaskAnalyzed,
            PipelineStep::GenerateCode => StepTag::CodeGenerated,
            PipelineStep::WriteFiles => StepTag::FilesWritten,
            PipelineStep::RunTests => StepTag::TestsCompleted,
            PipelineStep::CommitChanges => StepTag::ChangesCommitted,
            PipelineStep::PushChanges => StepTag::ChangesPushed,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

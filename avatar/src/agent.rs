//! Composition root: builds every component from [`AgentConfig`] and runs the
//! startup sequence before handing control to the poller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::io::backend::{Backend, HttpBackend};
use crate::io::codegen::CodeGenerator;
use crate::io::completion::{self, CompletionService};
use crate::io::config::AgentConfig;
use crate::io::git::{Git, GitIdentity};
use crate::io::process::{CommandRunner, SystemRunner};
use crate::io::status::StatusReporter;
use crate::io::workspace::{WorkspaceManager, WorkspaceManifest};
use crate::pipeline::{TaskExecutor, TaskOutcome};
use crate::poller::{PollSummary, Shutdown, Sleeper, TaskPoller, ThreadSleeper};

/// How [`Agent::start`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The poll loop ran and stopped on shutdown or its cycle limit.
    Completed(PollSummary),
    BackendUnavailable,
    SubscriptionFailed,
}

/// Serializable snapshot for `avatar status`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub topic: String,
    pub backend_url: String,
    pub workspace_root: PathBuf,
    pub log_dir: PathBuf,
    pub placeholder_mode: bool,
    pub valid_workspace: bool,
    pub workspace: Option<WorkspaceManifest>,
}

/// The production agent built by [`Agent::from_config`].
pub type SystemAgent = Agent<HttpBackend, Box<dyn CompletionService>>;

pub struct Agent<B, C, R = SystemRunner, S = ThreadSleeper>
where
    B: Backend + Clone,
    C: CompletionService,
    R: CommandRunner,
    S: Sleeper,
{
    config: AgentConfig,
    backend: B,
    executor: TaskExecutor<B, C, R>,
    sleeper: S,
}

impl SystemAgent {
    /// Build the production agent: HTTP backend, system git, configured completion client.
    ///
    /// `workspace` is opened by the caller so the process log can live in it.
    pub fn from_config(config: AgentConfig, workspace: WorkspaceManager) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend).context("build backend client")?;
        let completion = completion::from_config(&config.llm).context("build completion client")?;
        let git = Git::new(SystemRunner::new(config.pipeline.output_limit_bytes))
            .with_identity(GitIdentity::new(&config.git.username, &config.git.email))
            .with_timeout(Duration::from_secs(config.git.timeout_secs));
        let executor = TaskExecutor::new(
            workspace,
            git,
            CodeGenerator::new(completion, &config.llm),
            StatusReporter::new(backend.clone()),
            config.pipeline.clone(),
        );
        Ok(Self::from_parts(config, backend, executor, ThreadSleeper))
    }
}

impl<B, C, R, S> Agent<B, C, R, S>
where
    B: Backend + Clone,
    C: CompletionService,
    R: CommandRunner,
    S: Sleeper,
{
    pub fn from_parts(
        config: AgentConfig,
        backend: B,
        executor: TaskExecutor<B, C, R>,
        sleeper: S,
    ) -> Self {
        Self {
            config,
            backend,
            executor,
            sleeper,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn executor(&self) -> &TaskExecutor<B, C, R> {
        &self.executor
    }

    /// Startup sequence then the poll loop.
    ///
    /// 1. backend health check
    /// 2. global git identity
    /// 3. purge stale scratch directories
    /// 4. subscribe to the topic
    /// 5. poll until `shutdown` or `max_cycles`
    pub fn start(&mut self, shutdown: Shutdown, max_cycles: Option<u64>) -> StartOutcome {
        info!(backend = %self.config.backend.url, "starting agent");
        if !self.backend.health_check() {
            error!(backend = %self.config.backend.url, "backend unavailable");
            return StartOutcome::BackendUnavailable;
        }

        if let Err(err) = self.executor.git().configure_global_identity() {
            warn!(err = %err, "could not apply git identity");
        }

        match self.executor.workspace().cleanup(None) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "removed stale scratch directories"),
            Err(err) => warn!(err = %format!("{err:#}"), "stale scratch cleanup failed"),
        }

        let mut poller = TaskPoller::new(
            self.backend.clone(),
            self.config.polling.topic.clone(),
            self.config.polling.interval(),
        )
        .with_sleeper(&self.sleeper)
        .with_shutdown(shutdown)
        .with_max_cycles(max_cycles);
        if !poller.subscribe() {
            return StartOutcome::SubscriptionFailed;
        }

        let executor = &mut self.executor;
        let summary = poller.run(|message| {
            executor.handle_message(message);
            Ok(())
        });
        info!(?summary, "agent stopped");
        StartOutcome::Completed(summary)
    }

    /// Run a single task without polling.
    pub fn run_task(&mut self, task_id: u64) -> TaskOutcome {
        self.executor.execute(task_id)
    }

    /// Remove every scratch directory. Returns the number removed.
    pub fn clean(&self) -> Result<usize> {
        self.executor.workspace().cleanup(None)
    }

    pub fn status(&self) -> Result<AgentStatus> {
        let workspace = self.executor.workspace();
        Ok(AgentStatus {
            topic: self.config.polling.topic.clone(),
            backend_url: self.config.backend.url.clone(),
            workspace_root: workspace.root().to_path_buf(),
            log_dir: workspace.logs_dir().to_path_buf(),
            placeholder_mode: self.executor.codegen().completion().is_placeholder(),
            valid_workspace: workspace.is_valid_workspace(),
            workspace: workspace.manifest()?,
        })
    }
}

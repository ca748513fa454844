//! Agent configuration.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `avatar.toml` (or the path given on the command line)
//! 3. `avatar.local.toml` next to it, if present
//! 4. Environment variables, `AVATAR_` prefix with `__` between sections
//!    (`AVATAR_BACKEND__URL` -> `backend.url`)
//!
//! `OPENAI_API_KEY` fills `llm.api_key` when nothing else set it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "avatar.toml";
pub const LOCAL_CONFIG_FILE: &str = "avatar.local.toml";
pub const ENV_PREFIX: &str = "AVATAR_";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Key shipped in sample configs; treated like an empty key.
pub const PLACEHOLDER_API_KEY: &str = "your_openai_api_key_here";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: BackendConfig,
    pub polling: PollingConfig,
    pub workspace: WorkspaceConfig,
    pub llm: LlmConfig,
    pub git: GitConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when non-empty.
    pub api_token: String,
    pub health_path: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7301".to_string(),
            api_token: String::new(),
            health_path: "/docs".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub topic: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            topic: "tasks".to_string(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./workspace"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Empty or placeholder value selects offline placeholder mode.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn is_placeholder(&self) -> bool {
        let key = self.api_key.trim();
        key.is_empty() || key == PLACEHOLDER_API_KEY
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub username: String,
    pub email: String,
    /// Bound for every git subprocess.
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            email: String::new(),
            timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Command run in the repository by the `run_tests` step (e.g. `["cargo","test"]`).
    /// Empty skips the step.
    pub test_command: Vec<String>,
    pub test_timeout_secs: u64,
    /// Truncate captured subprocess stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Upper bound on repository paths listed in the generation context.
    pub context_max_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            test_command: Vec::new(),
            test_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            context_max_entries: 200,
        }
    }
}

impl AgentConfig {
    /// Load and validate configuration rooted at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg: AgentConfig = Self::figment(path).extract()?;
        if cfg.llm.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                cfg.llm.api_key = key.trim().to_string();
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Provider chain used by [`AgentConfig::load`].
    pub fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        let local = path.with_file_name(LOCAL_CONFIG_FILE);
        if local != path && local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        }

        if self.backend.url.trim().is_empty() {
            return invalid("backend.url", "must not be empty");
        }
        if self.backend.timeout_secs == 0 {
            return invalid("backend.timeout_secs", "must be > 0");
        }
        if self.polling.interval_secs == 0 {
            return invalid("polling.interval_secs", "must be > 0");
        }
        if self.polling.topic.trim().is_empty() {
            return invalid("polling.topic", "must not be empty");
        }
        if self.workspace.root.as_os_str().is_empty() {
            return invalid("workspace.root", "must not be empty");
        }
        if self.llm.timeout_secs == 0 {
            return invalid("llm.timeout_secs", "must be > 0");
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens", "must be > 0");
        }
        if self.git.timeout_secs == 0 {
            return invalid("git.timeout_secs", "must be > 0");
        }
        if self.pipeline.test_timeout_secs == 0 {
            return invalid("pipeline.test_timeout_secs", "must be > 0");
        }
        if self.pipeline.output_limit_bytes == 0 {
            return invalid("pipeline.output_limit_bytes", "must be > 0");
        }
        if self.pipeline.context_max_entries == 0 {
            return invalid("pipeline.context_max_entries", "must be > 0");
        }
        if self
            .pipeline
            .test_command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return invalid("pipeline.test_command", "program must not be blank");
        }
        Ok(())
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Code Generation Adapter.
//!
//! Analysis is advisory: unusable output degrades to [`TaskAnalysis::unknown`].
//! Generation is not: a response without a single `FILE:` block is an error.

use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::grammar::parse_blocks;
use crate::core::path::is_safe_relative;
use crate::core::types::{GeneratedFile, TaskAnalysis};
use crate::io::completion::{
    ANALYSIS_TEMPERATURE, CompletionError, CompletionKind, CompletionRequest, CompletionService,
};
use crate::io::config::LlmConfig;
use crate::io::prompt::{ANALYSIS_SYSTEM, GENERATION_SYSTEM, PromptEngine};

const ANALYSIS_SCHEMA: &str = include_str!("schemas/task_analysis.schema.json");

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("no files generated")]
    NoFilesGenerated,

    #[error("unsafe generated path '{0}'")]
    UnsafePath(String),

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("render prompt: {0}")]
    Prompt(String),

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw completion text plus the files parsed out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub raw: String,
    pub files: Vec<GeneratedFile>,
}

pub struct CodeGenerator<C: CompletionService> {
    completion: C,
    prompts: PromptEngine,
    analysis_schema: Option<Validator>,
    temperature: f32,
    max_tokens: u32,
}

impl<C: CompletionService> CodeGenerator<C> {
    pub fn new(completion: C, llm: &LlmConfig) -> Self {
        let analysis_schema = serde_json::from_str::<Value>(ANALYSIS_SCHEMA)
            .ok()
            .and_then(|schema| jsonschema::validator_for(&schema).ok());
        if analysis_schema.is_none() {
            warn!("task analysis schema failed to compile, analysis output is not validated");
        }
        Self {
            completion,
            prompts: PromptEngine::new(),
            analysis_schema,
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    /// Break a task description down into requirements. Never fails.
    #[instrument(skip_all)]
    pub fn analyze(&self, description: &str) -> TaskAnalysis {
        let prompt = match self.prompts.render_analysis(description) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "analysis prompt failed to render");
                return TaskAnalysis::unknown();
            }
        };
        let request = CompletionRequest {
            kind: CompletionKind::Analysis,
            system: ANALYSIS_SYSTEM.to_string(),
            prompt,
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: None,
            json_response: true,
        };
        match self.completion.complete(&request) {
            Ok(text) => self.parse_analysis(&text),
            Err(err) => {
                warn!(err = %err, "analysis request failed");
                TaskAnalysis::unknown()
            }
        }
    }

    /// Ask the completion service for code. Returns the raw response text.
    #[instrument(skip_all)]
    pub fn generate(&self, description: &str, context: Option<&str>) -> Result<String, CodegenError> {
        let prompt = self
            .prompts
            .render_generation(description, context)
            .map_err(|err| CodegenError::Prompt(format!("{err:#}")))?;
        let request = CompletionRequest {
            kind: CompletionKind::Generation,
            system: GENERATION_SYSTEM.to_string(),
            prompt,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            json_response: false,
        };
        Ok(self.completion.complete(&request)?)
    }

    /// Generate and parse. Zero extracted files is [`CodegenError::NoFilesGenerated`].
    pub fn generate_files(&self, description: &str, context: Option<&str>) -> Result<Generation, CodegenError> {
        let raw = self.generate(description, context)?;
        let files = parse_blocks(&raw);
        if files.is_empty() {
            warn!(response_bytes = raw.len(), "completion contained no file blocks");
            return Err(CodegenError::NoFilesGenerated);
        }
        info!(files = files.len(), "files generated");
        Ok(Generation { raw, files })
    }

    fn parse_analysis(&self, text: &str) -> TaskAnalysis {
        let body = strip_json_fence(text.trim());
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(err = %err, "analysis response is not JSON");
                return TaskAnalysis::unknown();
            }
        };
        if let Some(schema) = &self.analysis_schema {
            if !schema.is_valid(&value) {
                let messages: Vec<String> =
                    schema.iter_errors(&value).map(|err| err.to_string()).collect();
                warn!(errors = %messages.join("; "), "analysis response failed schema validation");
                return TaskAnalysis::unknown();
            }
        }
        serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(err = %err, "analysis response has unexpected shape");
            TaskAnalysis::unknown()
        })
    }
}

/// Write generated files below `base`, creating parent directories.
///
/// Every path is checked before anything is written.
#[instrument(skip_all, fields(base = %base.display(), files = files.len()))]
pub fn write_files(files: &[GeneratedFile], base: &Path) -> Result<Vec<PathBuf>, CodegenError> {
    if let Some(bad) = files.iter().find(|file| !is_safe_relative(&file.path)) {
        warn!(path = %bad.path, "refusing to write outside the repository");
        return Err(CodegenError::UnsafePath(bad.path.clone()));
    }
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = base.join(&file.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CodegenError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, &file.content).map_err(|source| CodegenError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %file.path, bytes = file.content.len(), "file written");
        written.push(path);
    }
    Ok(written)
}

/// Project description plus a bounded listing of the repository's files.
pub fn project_context(application_name: &str, repo: &Path, max_entries: usize) -> String {
    let mut context = format!("This is the {application_name} application.");
    let mut listed: Vec<String> = WalkDir::new(repo)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(repo)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .take(max_entries + 1)
        .collect();
    if listed.is_empty() {
        return context;
    }
    let truncated = listed.len() > max_entries;
    listed.truncate(max_entries);
    context.push_str("\n\nRepository files:\n");
    for path in &listed {
        context.push_str("- ");
        context.push_str(path);
        context.push('\n');
    }
    if truncated {
        context.push_str("- (listing truncated)\n");
    }
    context
}

fn strip_json_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

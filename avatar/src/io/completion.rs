//! Completion service clients.
//!
//! [`OpenAiClient`] talks to an OpenAI-compatible `/chat/completions`
//! endpoint. [`PlaceholderCompletion`] answers offline with fixed stubs so the
//! whole pipeline runs without network access or credentials.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::grammar::render_blocks;
use crate::core::types::{GeneratedFile, TaskAnalysis};
use crate::io::config::LlmConfig;

/// Temperature for analysis requests; lower than generation for stable output.
pub const ANALYSIS_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Analysis,
    Generation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub kind: CompletionKind,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the service for a JSON object response.
    pub json_response: bool,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("completion response had no content")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

pub trait CompletionService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// True for the offline stub.
    fn is_placeholder(&self) -> bool {
        false
    }
}

impl<T: CompletionService + ?Sized> CompletionService for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request)
    }

    fn is_placeholder(&self) -> bool {
        (**self).is_placeholder()
    }
}

impl<T: CompletionService + ?Sized> CompletionService for Box<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request)
    }

    fn is_placeholder(&self) -> bool {
        (**self).is_placeholder()
    }
}

/// Placeholder when the credential is empty or the sample value, HTTP client otherwise.
pub fn from_config(config: &LlmConfig) -> Result<Box<dyn CompletionService>, CompletionError> {
    if config.is_placeholder() {
        info!("no completion credential configured, using placeholder completions");
        return Ok(Box::new(PlaceholderCompletion));
    }
    Ok(Box::new(OpenAiClient::new(config)?))
}

/// Offline stub: one fixed analysis and one fixed illustrative file.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderCompletion;

impl PlaceholderCompletion {
    pub fn analysis() -> TaskAnalysis {
        TaskAnalysis {
            functional_requirements: vec!["Implement a simple Hello World feature".to_string()],
            technical_requirements: vec!["Use Python 3.x".to_string()],
            files_to_create: vec!["app.py".to_string()],
            files_to_modify: Vec::new(),
            estimated_complexity: "simple".to_string(),
        }
    }

    pub fn file() -> GeneratedFile {
        GeneratedFile::new(
            "app.py",
            "#!/usr/bin/env python3\n\n\
             def hello_world():\n    return \"Hello, World!\"\n\n\
             if __name__ == \"__main__\":\n    print(hello_world())",
        )
    }
}

impl CompletionService for PlaceholderCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match request.kind {
            CompletionKind::Analysis => serde_json::to_string(&Self::analysis())
                .map_err(|err| CompletionError::Other(format!("serialize stub analysis: {err}"))),
            CompletionKind::Generation => Ok(render_blocks(&[Self::file()])),
        }
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.trim().to_string(),
            model: config.model.clone(),
        })
    }
}

impl CompletionService for OpenAiClient {
    #[instrument(skip_all, fields(kind = ?request.kind, model = %self.model))]
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let messages = [
            ChatMessage {
                role: "system",
                content: &request.system,
            },
            ChatMessage {
                role: "user",
                content: &request.prompt,
            },
        ];
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if request.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        debug!(endpoint = %self.endpoint, "requesting completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        let parsed: ChatResponse = response.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grammar::parse_blocks;

    fn request(kind: CompletionKind) -> CompletionRequest {
        CompletionRequest {
            kind,
            system: String::new(),
            prompt: "add a health endpoint".to_string(),
            temperature: 0.7,
            max_tokens: None,
            json_response: false,
        }
    }

    #[test]
    fn placeholder_generation_yields_one_file() {
        let text = PlaceholderCompletion
            .complete(&request(CompletionKind::Generation))
            .expect("complete");
        let files = parse_blocks(&text);
        assert_eq!(files, vec![PlaceholderCompletion::file()]);
    }

    #[test]
    fn placeholder_analysis_is_valid_json() {
        let text = PlaceholderCompletion
            .complete(&request(CompletionKind::Analysis))
            .expect("complete");
        let analysis: TaskAnalysis = serde_json::from_str(&text).expect("parse");
        assert_eq!(analysis.files_to_create, vec!["app.py".to_string()]);
    }

    #[test]
    fn config_selects_placeholder_for_sample_key() {
        let mut config = LlmConfig::default();
        assert!(from_config(&config).expect("client").is_placeholder());
        config.api_key = crate::io::config::PLACEHOLDER_API_KEY.to_string();
        assert!(from_config(&config).expect("client").is_placeholder());
        config.api_key = "sk-test".to_string();
        assert!(!from_config(&config).expect("client").is_placeholder());
    }
}

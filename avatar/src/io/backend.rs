//! Backend REST client.
//!
//! | call                 | endpoint                           |
//! |----------------------|------------------------------------|
//! | health               | `GET  <health_path>` (200 = up)    |
//! | topic by name        | `GET  /api/topics/tasks` or `GET /api/topics` |
//! | pending messages     | `GET  /api/topics/{id}/messages`   |
//! | task                 | `GET  /api/tasks/{id}`             |
//! | application          | `GET  /api/applications/{id}`      |
//! | status transition    | `PUT  /api/tasks/{id}/status`      |
//! | execution log        | `POST /api/tasks/{id}/logs`        |

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::{Application, Task, TaskMessage, TaskStatus, Topic};
use crate::io::config::BackendConfig;

/// Topic with a dedicated lookup endpoint.
pub const DEFAULT_TOPIC: &str = "tasks";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// The agent's view of the backend.
pub trait Backend {
    /// True when the backend answers its health endpoint with 200.
    fn health_check(&self) -> bool;
    fn find_topic(&self, name: &str) -> Result<Option<Topic>, BackendError>;
    fn fetch_messages(&self, topic_id: u64) -> Result<Vec<TaskMessage>, BackendError>;
    fn get_task(&self, task_id: u64) -> Result<Task, BackendError>;
    fn get_application(&self, application_id: u64) -> Result<Application, BackendError>;
    fn update_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        details: &Value,
    ) -> Result<(), BackendError>;
    fn post_task_logs(&self, task_id: u64, logs: &str) -> Result<(), BackendError>;
}

impl<T: Backend + ?Sized> Backend for &T {
    fn health_check(&self) -> bool {
        (**self).health_check()
    }

    fn find_topic(&self, name: &str) -> Result<Option<Topic>, BackendError> {
        (**self).find_topic(name)
    }

    fn fetch_messages(&self, topic_id: u64) -> Result<Vec<TaskMessage>, BackendError> {
        (**self).fetch_messages(topic_id)
    }

    fn get_task(&self, task_id: u64) -> Result<Task, BackendError> {
        (**self).get_task(task_id)
    }

    fn get_application(&self, application_id: u64) -> Result<Application, BackendError> {
        (**self).get_application(application_id)
    }

    fn update_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        details: &Value,
    ) -> Result<(), BackendError> {
        (**self).update_task_status(task_id, status, details)
    }

    fn post_task_logs(&self, task_id: u64, logs: &str) -> Result<(), BackendError> {
        (**self).post_task_logs(task_id, logs)
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

/// Blocking HTTP implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: String,
    health_path: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token: config.api_token.trim().to_string(),
            health_path: config.health_path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_token)
        }
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, BackendError> {
        let url = self.url(endpoint);
        debug!(%url, "GET");
        let response = self.authorized(self.client.get(&url)).send()?;
        decode(check_response(response, endpoint)?, endpoint)
    }

    fn send_json(&self, request: RequestBuilder, endpoint: &str, body: &Value) -> Result<(), BackendError> {
        let response = self.authorized(request).json(body).send()?;
        check_response(response, endpoint)?;
        Ok(())
    }
}

impl Backend for HttpBackend {
    #[instrument(skip_all)]
    fn health_check(&self) -> bool {
        let url = self.url(&self.health_path);
        match self.client.get(&url).send() {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                warn!(%url, status = response.status().as_u16(), "backend health check failed");
                false
            }
            Err(err) => {
                warn!(%url, err = %err, "backend unreachable");
                false
            }
        }
    }

    #[instrument(skip(self))]
    fn find_topic(&self, name: &str) -> Result<Option<Topic>, BackendError> {
        if name == DEFAULT_TOPIC {
            return match self.get_json::<Topic>("/api/topics/tasks") {
                Ok(topic) => Ok(Some(topic)),
                Err(BackendError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            };
        }
        let topics: DataEnvelope<Topic> = self.get_json("/api/topics")?;
        Ok(topics.data.into_iter().find(|topic| topic.name == name))
    }

    fn fetch_messages(&self, topic_id: u64) -> Result<Vec<TaskMessage>, BackendError> {
        let envelope: DataEnvelope<TaskMessage> =
            self.get_json(&format!("/api/topics/{topic_id}/messages"))?;
        Ok(envelope.data)
    }

    fn get_task(&self, task_id: u64) -> Result<Task, BackendError> {
        self.get_json(&format!("/api/tasks/{task_id}"))
    }

    fn get_application(&self, application_id: u64) -> Result<Application, BackendError> {
        self.get_json(&format!("/api/applications/{application_id}"))
    }

    fn update_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        details: &Value,
    ) -> Result<(), BackendError> {
        let endpoint = format!("/api/tasks/{task_id}/status");
        let mut body = json!({ "status": status });
        if !details.is_null() {
            body["details"] = details.clone();
        }
        self.send_json(self.client.put(self.url(&endpoint)), &endpoint, &body)
    }

    fn post_task_logs(&self, task_id: u64, logs: &str) -> Result<(), BackendError> {
        let endpoint = format!("/api/tasks/{task_id}/logs");
        let body = json!({ "logs": logs });
        self.send_json(self.client.post(self.url(&endpoint)), &endpoint, &body)
    }
}

fn check_response(response: Response, endpoint: &str) -> Result<Response, BackendError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(endpoint.to_string()));
    }
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        });
    }
    Ok(response)
}

fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, BackendError> {
    let text = response.text()?;
    serde_json::from_str(&text).map_err(|err| BackendError::Decode(format!("{endpoint}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            url: url.to_string(),
            ..BackendConfig::default()
        })
        .expect("client")
    }

    #[test]
    fn url_joins_without_double_slash() {
        let backend = backend("http://localhost:7301/");
        assert_eq!(backend.base_url(), "http://localhost:7301");
        assert_eq!(backend.url("/api/tasks/1"), "http://localhost:7301/api/tasks/1");
        assert_eq!(backend.url("docs"), "http://localhost:7301/docs");
    }

    #[test]
    fn unreachable_backend_is_unhealthy() {
        let backend = HttpBackend::new(&BackendConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..BackendConfig::default()
        })
        .expect("client");
        assert!(!backend.health_check());
    }

    #[test]
    fn envelope_tolerates_missing_data() {
        let envelope: DataEnvelope<TaskMessage> = serde_json::from_str("{}").expect("parse");
        assert!(envelope.data.is_empty());
    }
}

//! Status Reporter.
//!
//! Reporting is best-effort: a backend failure is logged and returned as
//! `false`, never propagated into the pipeline step that triggered it.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{Level, debug, warn};

use crate::core::transition::validate_transition;
use crate::core::types::{StepTag, StepUpdate, TaskStatus};
use crate::io::backend::Backend;
use crate::io::task_log::TaskLog;

pub struct StatusReporter<B: Backend> {
    backend: B,
    last: HashMap<u64, TaskStatus>,
    history: Vec<StepUpdate>,
    logs: HashMap<u64, TaskLog>,
}

impl<B: Backend> StatusReporter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            last: HashMap::new(),
            history: Vec::new(),
            logs: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start tracking an execution of `task_id` whose backend status is `current`.
    ///
    /// Narrative goes to `log`. A terminal status already reported in this
    /// process is kept, so the task can never leave it.
    pub fn begin(&mut self, task_id: u64, log: Option<TaskLog>, current: Option<TaskStatus>) {
        let reported_terminal = self
            .last
            .get(&task_id)
            .is_some_and(|status| status.is_terminal());
        if !reported_terminal {
            match current {
                Some(status) => {
                    self.last.insert(task_id, status);
                }
                None => {
                    self.last.remove(&task_id);
                }
            }
        }
        match log {
            Some(log) => {
                self.logs.insert(task_id, log);
            }
            None => {
                self.logs.remove(&task_id);
            }
        }
    }

    /// Stop tracking `task_id` and hand back the updates sent for it.
    pub fn end(&mut self, task_id: u64) -> Vec<StepUpdate> {
        self.logs.remove(&task_id);
        self.last.remove(&task_id);
        let (ended, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.history)
            .into_iter()
            .partition(|update| update.task_id == task_id);
        self.history = kept;
        ended
    }

    pub fn last_status(&self, task_id: u64) -> Option<TaskStatus> {
        self.last.get(&task_id).copied()
    }

    /// Updates sent for tasks still being tracked, oldest first.
    pub fn history(&self) -> &[StepUpdate] {
        &self.history
    }

    /// Report a status transition with an optional step tag and detail object.
    ///
    /// Returns `false` when the transition was refused or the backend call failed.
    pub fn report_status(
        &mut self,
        task_id: u64,
        status: TaskStatus,
        step: Option<StepTag>,
        detail: Value,
    ) -> bool {
        if let Err(reason) = validate_transition(self.last_status(task_id), status) {
            warn!(task_id, %status, "{reason}");
            return false;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let details = build_details(step.as_ref(), &timestamp, &detail);
        self.last.insert(task_id, status);
        self.history.push(StepUpdate {
            task_id,
            status,
            step: step.clone(),
            detail,
            timestamp,
        });

        let step_name = step.as_ref().map_or("-", StepTag::as_str);
        debug!(task_id, %status, step = step_name, "reporting status");
        self.write_local(
            task_id,
            if status == TaskStatus::Failed {
                Level::ERROR
            } else {
                Level::INFO
            },
            &format!("status {status} step {step_name}"),
        );

        match self.backend.update_task_status(task_id, status, &details) {
            Ok(()) => true,
            Err(err) => {
                warn!(task_id, %status, step = step_name, err = %err, "status report failed");
                false
            }
        }
    }

    /// Append free-text narrative to the task log and the backend.
    pub fn report_log(&mut self, task_id: u64, text: &str) -> bool {
        self.write_local(task_id, Level::INFO, text);
        match self.backend.post_task_logs(task_id, text) {
            Ok(()) => true,
            Err(err) => {
                warn!(task_id, err = %err, "log report failed");
                false
            }
        }
    }

    /// Local-only narrative line.
    pub fn note(&self, task_id: u64, level: Level, text: &str) {
        self.write_local(task_id, level, text);
    }

    fn write_local(&self, task_id: u64, level: Level, text: &str) {
        let Some(log) = self.logs.get(&task_id) else {
            return;
        };
        if let Err(err) = log.append(level, text) {
            warn!(task_id, err = %format!("{err:#}"), "task log write failed");
        }
    }
}

/// `{"step": tag, "timestamp": ts, ...detail}`. A non-object detail goes under `"detail"`.
fn build_details(step: Option<&StepTag>, timestamp: &str, detail: &Value) -> Value {
    let mut map = Map::new();
    if let Some(step) = step {
        map.insert("step".to_string(), Value::String(step.as_str().to_string()));
    }
    map.insert("timestamp".to_string(), Value::String(timestamp.to_string()));
    match detail {
        Value::Null => {}
        Value::Object(fields) => {
            for (key, value) in fields {
                map.insert(key.clone(), value.clone());
            }
        }
        other => {
            map.insert("detail".to_string(), other.clone());
        }
    }
    Value::Object(map)
}

//! Client side of the task pipeline: poll a task id until it is terminal.
//!
//! Dropping the `wait` future stops polling only. The job itself keeps running
//! and a later poll with the same id still sees its result.

use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::types::{TaskStatus, TaskStatusResponse};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(Value),
    Failure(String),
    /// Attempts ran out while the task was still pending. Not a failure.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct TaskPoller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl TaskPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(config.interval, config.max_attempts)
    }

    /// Poll with `fetch` every `interval`, at most `max_attempts` times.
    ///
    /// A fetch error counts as an attempt. An unknown task id is a failure,
    /// since enqueue records the task before returning its id.
    pub async fn wait<F, Fut, E>(&self, task_id: &str, mut fetch: F) -> PollOutcome
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Option<TaskStatusResponse>, E>>,
        E: Display,
    {
        for attempt in 1..=self.max_attempts {
            match fetch(task_id.to_string()).await {
                Ok(Some(status)) => match status.status {
                    TaskStatus::Success => {
                        return PollOutcome::Success(status.result.unwrap_or(Value::Null))
                    }
                    TaskStatus::Failure => return PollOutcome::Failure(failure_message(status.result)),
                    TaskStatus::Pending => {
                        debug!(task_id, attempt, "Task still pending");
                    }
                },
                Ok(None) => {
                    return PollOutcome::Failure(format!("Task {} not found or expired", task_id))
                }
                Err(e) => warn!(task_id, attempt, "Task status poll failed: {}", e),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        PollOutcome::Timeout
    }
}

fn failure_message(result: Option<Value>) -> String {
    result
        .as_ref()
        .and_then(|r| r.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "Task failed".to_string())
}

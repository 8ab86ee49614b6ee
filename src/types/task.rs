//! Task pipeline types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle. Transitions are monotonic: `Pending` to one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Stored state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub job: String,
    pub status: TaskStatus,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Human-readable failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn pending(task_id: String, job: &JobRequest) -> Self {
        Self {
            task_id,
            job: job.name().to_string(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Terminal copy of this record. Terminal records are returned unchanged.
    pub fn finish(&self, outcome: Result<Value, String>) -> Self {
        if self.status.is_terminal() {
            return self.clone();
        }
        let mut next = self.clone();
        next.completed_at = Some(Utc::now());
        match outcome {
            Ok(value) => {
                next.status = TaskStatus::Success;
                next.result = Some(value);
            }
            Err(message) => {
                next.status = TaskStatus::Failure;
                next.error = Some(message);
            }
        }
        next
    }
}

/// Wire shape of `GET /tasks/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    /// Success payload, or `{ "error": message }` on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(record: TaskRecord) -> Self {
        let result = match record.status {
            TaskStatus::Pending => None,
            TaskStatus::Success => record.result,
            TaskStatus::Failure => Some(serde_json::json!({
                "error": record.error.unwrap_or_else(|| "Task failed".to_string())
            })),
        };
        Self {
            task_id: record.task_id,
            status: record.status,
            result,
        }
    }
}

/// `202 Accepted` body for every enqueue endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: String,
}

/// Named job with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum JobRequest {
    MarketDataEnrich {
        symbol: String,
        period: String,
        interval: String,
    },
    AiAnalyze {
        symbol: String,
        language: String,
    },
    AiStrategize {
        symbol: String,
        language: String,
    },
    AiPortfolioAnalyze {
        portfolio_id: i64,
        language: String,
    },
    SymbolSearch {
        query: String,
    },
    PortfolioSnapshot {
        portfolio_id: i64,
    },
}

impl JobRequest {
    pub fn name(&self) -> &'static str {
        match self {
            JobRequest::MarketDataEnrich { .. } => "market_data_enrich",
            JobRequest::AiAnalyze { .. } => "ai_analyze",
            JobRequest::AiStrategize { .. } => "ai_strategize",
            JobRequest::AiPortfolioAnalyze { .. } => "ai_portfolio_analyze",
            JobRequest::SymbolSearch { .. } => "symbol_search",
            JobRequest::PortfolioSnapshot { .. } => "portfolio_snapshot",
        }
    }
}

/// What travels over the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub job: JobRequest,
}

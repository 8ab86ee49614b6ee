use tracing::{error, info};
use uuid::Uuid;

use super::broker::Broker;
use super::task_store::TaskStore;
use crate::error::Result;
use crate::types::{JobRequest, TaskEnvelope, TaskRecord, TaskStatusResponse};

/// Front door of the task pipeline: records PENDING, hands the job to the
/// broker and answers status polls.
#[derive(Clone)]
pub struct TaskDispatcher {
    broker: Broker,
    store: TaskStore,
}

impl TaskDispatcher {
    pub fn new(broker: Broker, store: TaskStore) -> Self {
        Self { broker, store }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Enqueue a job and return its fresh task id. PENDING is written before
    /// the job is published, so a worker can never complete an unknown task.
    pub async fn enqueue(&self, job: JobRequest) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        self.store
            .put_pending(&TaskRecord::pending(task_id.clone(), &job))
            .await?;

        let job_name = job.name();
        let envelope = TaskEnvelope {
            task_id: task_id.clone(),
            job,
        };
        if let Err(e) = self.broker.publish(&envelope).await {
            error!(task_id = %task_id, job = job_name, "Failed to publish job: {}", e);
            self.store
                .complete(&task_id, Err(format!("Failed to enqueue job: {}", e)))
                .await?;
            return Err(e);
        }

        info!(task_id = %task_id, job = job_name, "Job enqueued");
        Ok(task_id)
    }

    /// Current state of a task. Pure read; `None` when unknown or expired.
    pub async fn poll(&self, task_id: &str) -> Result<Option<TaskStatusResponse>> {
        Ok(self.store.get(task_id).await?.map(TaskStatusResponse::from))
    }
}

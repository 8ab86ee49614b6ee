//! Worker pool: N independent loops pulling jobs from the broker.
//!
//! Each job runs in its own spawned task, so a handler that errors or panics
//! turns into a FAILURE record and the worker moves on to the next job.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::Broker;
use super::task_store::TaskStore;
use crate::types::{JobRequest, TaskEnvelope, TaskStatus};

/// Executes one job. Errors are human-readable messages stored as the FAILURE payload.
pub trait JobHandler: Send + Sync {
    fn handle<'a>(&'a self, job: JobRequest) -> BoxFuture<'a, Result<Value, String>>;
}

pub struct WorkerPool {
    broker: Broker,
    store: TaskStore,
    handler: Arc<dyn JobHandler>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(broker: Broker, store: TaskStore, handler: Arc<dyn JobHandler>, workers: usize) -> Self {
        Self {
            broker,
            store,
            handler,
            workers: workers.max(1),
        }
    }

    /// Start the worker loops. They run until their handles are aborted.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        info!("Starting {} task workers", self.workers);
        (0..self.workers)
            .map(|worker_id| {
                let broker = self.broker.clone();
                let store = self.store.clone();
                let handler = self.handler.clone();
                tokio::spawn(run_worker(worker_id, broker, store, handler))
            })
            .collect()
    }
}

async fn run_worker(worker_id: usize, broker: Broker, store: TaskStore, handler: Arc<dyn JobHandler>) {
    let mut subscriber = loop {
        match broker.subscribe().await {
            Ok(s) => break s,
            Err(e) => {
                error!(worker_id, "Worker failed to subscribe: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    };
    debug!(worker_id, "Worker ready");

    loop {
        match subscriber.next().await {
            Ok(Some(envelope)) => process(&store, &handler, envelope).await,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, "Failed to receive job: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Run one job to its terminal state and record the outcome.
pub async fn process(store: &TaskStore, handler: &Arc<dyn JobHandler>, envelope: TaskEnvelope) {
    let TaskEnvelope { task_id, job } = envelope;
    let job_name = job.name();
    let started = Instant::now();
    debug!(task_id = %task_id, job = job_name, "Job started");

    let handler = handler.clone();
    let outcome = match tokio::spawn(async move { handler.handle(job).await }).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => Err("Task handler panicked".to_string()),
        Err(_) => Err("Task was cancelled".to_string()),
    };

    match store.complete(&task_id, outcome).await {
        Ok(Some(record)) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if record.status == TaskStatus::Failure {
                warn!(
                    task_id = %task_id,
                    job = job_name,
                    elapsed_ms,
                    error = record.error.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            } else {
                info!(task_id = %task_id, job = job_name, elapsed_ms, "Job succeeded");
            }
        }
        Ok(None) => warn!(task_id = %task_id, job = job_name, "Task expired before completion"),
        Err(e) => error!(task_id = %task_id, job = job_name, "Failed to store task result: {}", e),
    }
}

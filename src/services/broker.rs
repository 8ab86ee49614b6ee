//! Job broker between the dispatcher and the worker pool.
//!
//! The in-process broker is an unbounded channel whose receiver is shared by
//! all workers. The Redis broker is a list: `LPUSH` to publish, `BRPOP` to
//! consume. Neither redelivers a job whose worker died mid-flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::redis_store::RedisStore;
use crate::error::{AppError, Result};
use crate::types::TaskEnvelope;

/// How long a consumer blocks before reporting an empty queue.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub enum Broker {
    Memory(MemoryBroker),
    Redis(RedisBroker),
}

impl Broker {
    pub fn memory() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Broker::Memory(MemoryBroker {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        })
    }

    pub fn redis(redis: &RedisStore, queue: &str) -> Self {
        Broker::Redis(RedisBroker {
            redis: redis.clone(),
            queue: queue.to_string(),
        })
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Broker::Memory(_) => "memory",
            Broker::Redis(_) => "redis",
        }
    }

    pub async fn publish(&self, envelope: &TaskEnvelope) -> Result<()> {
        match self {
            Broker::Memory(broker) => broker
                .tx
                .send(envelope.clone())
                .map_err(|_| AppError::Internal("job queue is closed".to_string())),
            Broker::Redis(broker) => {
                let mut conn = broker.redis.connection();
                redis::cmd("LPUSH")
                    .arg(&broker.queue)
                    .arg(serde_json::to_string(envelope)?)
                    .query_async::<_, i64>(&mut conn)
                    .await?;
                Ok(())
            }
        }
    }

    /// Consumer handle for one worker.
    pub async fn subscribe(&self) -> Result<Subscriber> {
        match self {
            Broker::Memory(broker) => Ok(Subscriber::Memory(broker.rx.clone())),
            Broker::Redis(broker) => Ok(Subscriber::Redis {
                conn: broker.redis.dedicated_connection().await?,
                queue: broker.queue.clone(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct MemoryBroker {
    tx: mpsc::UnboundedSender<TaskEnvelope>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<TaskEnvelope>>>,
}

#[derive(Clone)]
pub struct RedisBroker {
    redis: RedisStore,
    queue: String,
}

pub enum Subscriber {
    Memory(Arc<Mutex<mpsc::UnboundedReceiver<TaskEnvelope>>>),
    Redis {
        conn: redis::aio::MultiplexedConnection,
        queue: String,
    },
}

impl Subscriber {
    /// Next job, or `None` when the queue stayed empty for the receive timeout.
    pub async fn next(&mut self) -> Result<Option<TaskEnvelope>> {
        match self {
            Subscriber::Memory(rx) => {
                let mut rx = rx.lock().await;
                match tokio::time::timeout(RECEIVE_TIMEOUT, rx.recv()).await {
                    Ok(Some(envelope)) => Ok(Some(envelope)),
                    Ok(None) => Err(AppError::Internal("job queue is closed".to_string())),
                    Err(_) => Ok(None),
                }
            }
            Subscriber::Redis { conn, queue } => {
                let popped: Option<(String, String)> = redis::cmd("BRPOP")
                    .arg(queue.as_str())
                    .arg(RECEIVE_TIMEOUT.as_secs())
                    .query_async(conn)
                    .await?;
                match popped {
                    Some((_, raw)) => match serde_json::from_str(&raw) {
                        Ok(envelope) => Ok(Some(envelope)),
                        Err(e) => {
                            debug!("Dropping malformed job envelope: {}", e);
                            Err(AppError::SerdeJson(e))
                        }
                    },
                    None => Ok(None),
                }
            }
        }
    }
}

use redis::{aio::ConnectionManager, RedisResult};
use tracing::{info, warn};

/// Key prefix of task status entries.
pub const TASK_KEY_PREFIX: &str = "holdview:task:";

pub fn task_key(task_id: &str) -> String {
    format!("{}{}", TASK_KEY_PREFIX, task_id)
}

/// Shared Redis handles for the task pipeline.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis. Returns `None` (with a warning) when the server is
    /// unreachable, so callers can fall back to in-process pipeline state.
    pub async fn connect(redis_url: &str) -> Option<Self> {
        match Self::try_connect(redis_url).await {
            Ok(store) => {
                info!("Connected to Redis at {}", redis_url);
                Some(store)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Using the in-process broker and task store.",
                    e
                );
                None
            }
        }
    }

    async fn try_connect(redis_url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client.clone()).await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client, conn })
    }

    /// Multiplexed connection shared by non-blocking commands.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Fresh connection for blocking commands such as `BRPOP`, which would
    /// otherwise stall every other command on the shared connection.
    pub async fn dedicated_connection(&self) -> RedisResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }
}

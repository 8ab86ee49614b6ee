//! Task status store: task id to `{status, result, error}` with bounded retention.
//!
//! Writes are monotonic. Once a record is terminal, further completions leave
//! it untouched, so a redelivered job cannot overwrite the first result.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::redis_store::{task_key, RedisStore};
use crate::error::Result;
use crate::types::TaskRecord;

/// Replace the stored record only while it is still PENDING. Returns the
/// record that is stored afterwards, or nil when the key is gone.
const COMPLETE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return false
end
local record = cjson.decode(current)
if record['status'] ~= 'PENDING' then
  return current
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[2]))
return ARGV[1]
"#;

#[derive(Clone)]
pub enum TaskStore {
    Memory(Arc<MemoryTaskStore>),
    Redis(RedisTaskStore),
}

impl TaskStore {
    pub fn memory(ttl: Duration) -> Self {
        TaskStore::Memory(Arc::new(MemoryTaskStore::new(ttl)))
    }

    pub fn redis(redis: &RedisStore, ttl: Duration) -> Self {
        TaskStore::Redis(RedisTaskStore {
            redis: redis.clone(),
            ttl,
        })
    }

    pub async fn put_pending(&self, record: &TaskRecord) -> Result<()> {
        match self {
            TaskStore::Memory(store) => {
                store.put(record.clone());
                Ok(())
            }
            TaskStore::Redis(store) => store.put(record).await,
        }
    }

    /// Move a PENDING task to its terminal state. Returns the stored record,
    /// or `None` when the task is unknown or expired.
    pub async fn complete(
        &self,
        task_id: &str,
        outcome: std::result::Result<Value, String>,
    ) -> Result<Option<TaskRecord>> {
        match self {
            TaskStore::Memory(store) => Ok(store.complete(task_id, outcome)),
            TaskStore::Redis(store) => store.complete(task_id, outcome).await,
        }
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        match self {
            TaskStore::Memory(store) => Ok(store.get(task_id)),
            TaskStore::Redis(store) => store.get(task_id).await,
        }
    }

    /// Drop expired entries. Redis expires keys on its own.
    pub fn purge_expired(&self) {
        if let TaskStore::Memory(store) = self {
            store.purge_expired();
        }
    }
}

/// In-process task store.
pub struct MemoryTaskStore {
    entries: DashMap<String, (TaskRecord, Instant)>,
    ttl: Duration,
}

impl MemoryTaskStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn put(&self, record: TaskRecord) {
        self.entries
            .insert(record.task_id.clone(), (record, Instant::now() + self.ttl));
    }

    fn complete(&self, task_id: &str, outcome: std::result::Result<Value, String>) -> Option<TaskRecord> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(task_id)?;
        let (record, expires) = entry.value_mut();
        if *expires <= now {
            drop(entry);
            self.entries.remove(task_id);
            return None;
        }
        if !record.status.is_terminal() {
            *record = record.finish(outcome);
            *expires = now + self.ttl;
        }
        Some(record.clone())
    }

    fn get(&self, task_id: &str) -> Option<TaskRecord> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(task_id) {
            if entry.1 > now {
                return Some(entry.0.clone());
            }
        }
        self.entries.remove_if(task_id, |_, (_, expires)| *expires <= now);
        None
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Task store shared across processes through Redis.
#[derive(Clone)]
pub struct RedisTaskStore {
    redis: RedisStore,
    ttl: Duration,
}

impl RedisTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<()> {
        let mut conn = self.redis.connection();
        redis::cmd("SET")
            .arg(task_key(&record.task_id))
            .arg(serde_json::to_string(record)?)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.redis.connection();
        let raw: Option<String> = redis::cmd("GET")
            .arg(task_key(task_id))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn complete(
        &self,
        task_id: &str,
        outcome: std::result::Result<Value, String>,
    ) -> Result<Option<TaskRecord>> {
        let Some(current) = self.get(task_id).await? else {
            return Ok(None);
        };
        if current.status.is_terminal() {
            debug!("Task {} already terminal, keeping first result", task_id);
            return Ok(Some(current));
        }

        let finished = current.finish(outcome);
        let mut conn = self.redis.connection();
        let stored: Option<String> = redis::Script::new(COMPLETE_SCRIPT)
            .key(task_key(task_id))
            .arg(serde_json::to_string(&finished)?)
            .arg(self.ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(stored.map(|s| serde_json::from_str(&s)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobRequest, TaskStatus};
    use serde_json::json;

    fn pending(id: &str) -> TaskRecord {
        TaskRecord::pending(
            id.to_string(),
            &JobRequest::SymbolSearch {
                query: "apple".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let store = TaskStore::memory(Duration::from_secs(60));
        store.put_pending(&pending("t1")).await.unwrap();

        let first = store.complete("t1", Ok(json!({"n": 1}))).await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Success);

        let second = store
            .complete("t1", Err("late failure".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, TaskStatus::Success);
        assert_eq!(second.result, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let store = TaskStore::memory(Duration::from_secs(60));
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.complete("missing", Ok(json!(null))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_task_is_gone() {
        let store = TaskStore::memory(Duration::ZERO);
        store.put_pending(&pending("t2")).await.unwrap();
        assert!(store.get("t2").await.unwrap().is_none());
    }
}

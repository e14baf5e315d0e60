use crate::error::StoreError;
use crate::store::{JobQueue, JobStore};
use crate::types::{Job, JobResult, JobState, Submission};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

/// Redis key semantics shared by API and worker so the two never drift

pub const QUEUE_KEY: &str = "codecup:queue";
pub const RESULT_PREFIX: &str = "codecup:result";
pub const STATUS_PREFIX: &str = "codecup:status";

/// Result key for a job
pub fn result_key(job_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Status key for a job
pub fn status_key(job_id: &Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

/// Forward-only transition, evaluated atomically on the server.
/// Returns -1 for an unknown job, 0 for a refused move, 1 when applied.
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local rank = { pending = 0, started = 1, success = 2, failure = 2 }
local from = rank[current]
local to = rank[ARGV[1]]
if from == nil or to == nil or to <= from then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
if ARGV[2] ~= '' then
  redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
end
return 1
"#;

/// Job store over two keys per job: the state string and the result JSON.
/// Both expire after `ttl_seconds`.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { conn, ttl_seconds }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(status_key(&id))
            .arg(JobState::Pending.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;

        match created {
            Some(_) => Ok(()),
            None => Err(StoreError::Duplicate(id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let (state, result): (Option<String>, Option<String>) = redis::pipe()
            .get(status_key(&id))
            .get(result_key(&id))
            .query_async(&mut conn)
            .await?;

        let Some(state) = state else {
            return Ok(None);
        };
        let state: JobState = state.parse().map_err(StoreError::Corrupt)?;
        let result = match result {
            Some(payload) => Some(serde_json::from_str::<JobResult>(&payload)?),
            None => None,
        };

        Ok(Some(Job { id, state, result }))
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobState,
        result: Option<&JobResult>,
    ) -> Result<(), StoreError> {
        let payload = match result {
            Some(result) => serde_json::to_string(result)?,
            None => String::new(),
        };

        let mut conn = self.conn.clone();
        let outcome: i64 = redis::Script::new(TRANSITION_SCRIPT)
            .key(status_key(&id))
            .key(result_key(&id))
            .arg(to.as_str())
            .arg(payload)
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(()),
            -1 => Err(StoreError::NotFound(id)),
            _ => {
                let from = self
                    .get(id)
                    .await?
                    .map(|job| job.state)
                    .ok_or(StoreError::NotFound(id))?;
                Err(StoreError::IllegalTransition { id, from, to })
            }
        }
    }
}

/// FIFO queue on a Redis list: RPUSH to enqueue, BLPOP to dequeue.
///
/// BLPOP parks the connection it runs on, so each worker owns its own
/// `RedisJobQueue` built from a dedicated connection manager.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, submission: &Submission) -> Result<(), StoreError> {
        let payload = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Submission>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> =
            conn.blpop(QUEUE_KEY, timeout.as_secs_f64()).await?;

        match popped {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

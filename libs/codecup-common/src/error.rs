use thiserror::Error;
use uuid::Uuid;

use crate::types::JobState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("job {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to read task file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid task file: {0}")]
    Format(String),

    #[error("task {task}: {reason}")]
    Invalid { task: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("source code exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

//! Job store and job queue abstractions.
//!
//! The store is a keyed map with explicit create / read / transition
//! operations; transitions only move forward. The queue hands each
//! submission to exactly one worker.

use crate::error::StoreError;
use crate::types::{Job, JobResult, JobState, Submission};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new job in `pending`
    async fn create(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Move a job forward, attaching a result when given.
    /// Backward or terminal-to-terminal moves fail with `IllegalTransition`.
    async fn transition(
        &self,
        id: Uuid,
        to: JobState,
        result: Option<&JobResult>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Wait up to `timeout` for the next submission
    async fn pop(&self, timeout: Duration) -> Result<Option<Submission>, StoreError>;
}

/// In-process job store
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Job>>, StoreError> {
        self.jobs
            .lock()
            .map_err(|_| StoreError::Corrupt("job map lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        jobs.insert(
            id,
            Job {
                id,
                state: JobState::Pending,
                result: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobState,
        result: Option<&JobResult>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !job.state.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                id,
                from: job.state,
                to,
            });
        }
        job.state = to;
        if let Some(result) = result {
            job.result = Some(result.clone());
        }
        Ok(())
    }
}

/// In-process FIFO queue
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    items: Mutex<VecDeque<Submission>>,
    ready: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self) -> Result<Option<Submission>, StoreError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| StoreError::Corrupt("queue lock poisoned".to_string()))?;
        Ok(items.pop_front())
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, submission: &Submission) -> Result<(), StoreError> {
        {
            let mut items = self
                .items
                .lock()
                .map_err(|_| StoreError::Corrupt("queue lock poisoned".to_string()))?;
            items.push_back(submission.clone());
        }
        self.ready.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Submission>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(submission) = self.try_pop()? {
                return Ok(Some(submission));
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }
}

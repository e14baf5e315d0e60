/// Job Coordinator - submission gate and job lifecycle
///
/// **Core Responsibility:**
/// Run the Security Analyzer synchronously on every submission, create and
/// enqueue a job only for accepted code, and expose read-only polling.
///
/// **Lifecycle:**
/// pending -> started -> {success | failure}
/// - `success`: grading completed and a JobResult is attached, whatever
///   the grading outcome was
/// - `failure`: the pipeline faulted before any JobResult existed
///
/// A rejected submission never creates a job and never reaches a worker.

use crate::error::{CoordinatorError, StoreError};
use crate::security::SecurityAnalyzer;
use crate::store::{JobQueue, JobStore};
use crate::tasks::TaskProvider;
use crate::types::{JobResult, JobState, JobStatusView, SecurityVerdict, Submission};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Maximum accepted source size when none is configured
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 64 * 1024;

/// Message attached to a job that faulted before producing a result
pub const FAILURE_MESSAGE: &str = "internal error while grading, please try again later";

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted { job_id: Uuid },
    Rejected(SecurityVerdict),
}

#[derive(Clone)]
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    tasks: Arc<dyn TaskProvider>,
    analyzer: SecurityAnalyzer,
    max_source_bytes: usize,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        tasks: Arc<dyn TaskProvider>,
    ) -> Self {
        Self {
            store,
            queue,
            tasks,
            analyzer: SecurityAnalyzer::new(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    pub fn with_max_source_bytes(mut self, max_source_bytes: usize) -> Self {
        self.max_source_bytes = max_source_bytes;
        self
    }

    pub fn tasks(&self) -> &Arc<dyn TaskProvider> {
        &self.tasks
    }

    /// Gate a submission and, when accepted, hand it to the workers
    pub async fn submit(&self, task_id: &str, code: &str) -> Result<SubmitOutcome, CoordinatorError> {
        if code.len() > self.max_source_bytes {
            return Err(CoordinatorError::SourceTooLarge {
                limit: self.max_source_bytes,
            });
        }

        let task = self
            .tasks
            .task(task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))?;

        let verdict = self
            .analyzer
            .with_excluded_modules(&task.excluded_modules)
            .check(code);
        if !verdict.accepted {
            info!(
                task_id = %task_id,
                category = ?verdict.category,
                symbol = ?verdict.symbol,
                "Submission rejected"
            );
            return Ok(SubmitOutcome::Rejected(verdict));
        }

        let submission = Submission::new(task_id, code);
        let job_id = submission.job_id;
        self.store.create(job_id).await?;

        if let Err(e) = self.queue.push(&submission).await {
            error!(job_id = %job_id, error = %e, "Failed to enqueue job");
            if let Err(e) = self.store.transition(job_id, JobState::Failure, None).await {
                warn!(job_id = %job_id, error = %e, "Failed to mark unqueued job as failed");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job_id,
            task_id = %task_id,
            source_size = code.len(),
            "Job queued"
        );
        Ok(SubmitOutcome::Accepted { job_id })
    }

    /// Current state of a job; the result is only present once terminal
    pub async fn poll_status(&self, job_id: Uuid) -> Result<JobStatusView, CoordinatorError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(CoordinatorError::JobNotFound(job_id))?;

        let view = match job.state {
            JobState::Success => JobStatusView {
                state: job.state,
                result: job.result,
                error: None,
            },
            JobState::Failure => JobStatusView {
                state: job.state,
                result: None,
                error: Some(FAILURE_MESSAGE.to_string()),
            },
            JobState::Pending | JobState::Started => JobStatusView {
                state: job.state,
                result: None,
                error: None,
            },
        };
        Ok(view)
    }

    /// Worker picked the job up
    pub async fn start(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.store.transition(job_id, JobState::Started, None).await
    }

    /// Grading completed and produced a result
    pub async fn complete(&self, job_id: Uuid, result: &JobResult) -> Result<(), StoreError> {
        self.store
            .transition(job_id, JobState::Success, Some(result))
            .await
    }

    /// Grading pipeline faulted before producing a result
    pub async fn fail(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.store.transition(job_id, JobState::Failure, None).await
    }

    pub async fn next_submission(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<Submission>, StoreError> {
        self.queue.pop(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryJobQueue, MemoryJobStore};
    use crate::tasks::{HiddenTestCase, JsonTaskProvider, Task};
    use crate::types::{CaseStatus, GradeStatus, TestOutcome, ViolationCategory};
    use async_trait::async_trait;
    use std::time::Duration;

    fn add_task() -> Task {
        Task {
            id: "1".to_string(),
            name: "Sum of two".to_string(),
            time_limit_seconds: 2,
            hidden_tests: vec![HiddenTestCase {
                ordinal: 1,
                fragment: "assert add(2, 3) == 5".to_string(),
            }],
            excluded_modules: vec!["math".to_string()],
        }
    }

    fn coordinator() -> (JobCoordinator, Arc<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::new());
        let coordinator = JobCoordinator::new(
            Arc::new(MemoryJobStore::new()),
            queue.clone(),
            Arc::new(JsonTaskProvider::from_tasks([add_task()])),
        );
        (coordinator, queue)
    }

    fn passed() -> JobResult {
        JobResult::graded(
            2.0,
            vec![TestOutcome {
                name: "test_1".to_string(),
                status: CaseStatus::Passed,
                message: String::new(),
            }],
        )
    }

    #[tokio::test]
    async fn test_rejected_submission_creates_no_job() {
        let (coordinator, queue) = coordinator();
        let outcome = coordinator
            .submit("1", "import os\nos.system('ls')")
            .await
            .unwrap();

        match outcome {
            SubmitOutcome::Rejected(verdict) => {
                assert_eq!(verdict.category, Some(ViolationCategory::ForbiddenImport));
                assert!(verdict.message.contains("os"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_task_exclusions_apply_at_submit() {
        let (coordinator, queue) = coordinator();
        let outcome = coordinator.submit("1", "import math\n").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_submission_is_pending_and_queued() {
        let (coordinator, queue) = coordinator();
        let outcome = coordinator
            .submit("1", "def add(a, b):\n    return a + b\n")
            .await
            .unwrap();

        let SubmitOutcome::Accepted { job_id } = outcome else {
            panic!("expected acceptance");
        };
        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Pending);
        assert!(view.result.is_none());

        let queued = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(queued.job_id, job_id);
        assert_eq!(queued.task_id, "1");
    }

    #[tokio::test]
    async fn test_lifecycle_exposes_result_only_when_terminal() {
        let (coordinator, _queue) = coordinator();
        let SubmitOutcome::Accepted { job_id } = coordinator
            .submit("1", "def add(a, b):\n    return a + b\n")
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };

        coordinator.start(job_id).await.unwrap();
        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Started);
        assert!(view.result.is_none());

        coordinator.complete(job_id, &passed()).await.unwrap();
        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Success);
        assert_eq!(view.result.unwrap().status, GradeStatus::Passed);

        assert!(coordinator.fail(job_id).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_job_reports_generic_error() {
        let (coordinator, _queue) = coordinator();
        let SubmitOutcome::Accepted { job_id } =
            coordinator.submit("1", "x = 1\n").await.unwrap()
        else {
            panic!("expected acceptance");
        };

        coordinator.start(job_id).await.unwrap();
        coordinator.fail(job_id).await.unwrap();
        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Failure);
        assert!(view.result.is_none());
        assert_eq!(view.error.as_deref(), Some(FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_unknown_task_and_job() {
        let (coordinator, _queue) = coordinator();
        assert!(matches!(
            coordinator.submit("404", "x = 1").await,
            Err(CoordinatorError::TaskNotFound(_))
        ));
        assert!(matches!(
            coordinator.poll_status(Uuid::new_v4()).await,
            Err(CoordinatorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_source_is_refused() {
        let (coordinator, queue) = coordinator();
        let coordinator = coordinator.with_max_source_bytes(8);
        assert!(matches!(
            coordinator.submit("1", "x = 123456789").await,
            Err(CoordinatorError::SourceTooLarge { limit: 8 })
        ));
        assert!(queue.is_empty());
    }

    /// Refuses every push, remembering the job it turned away
    #[derive(Default)]
    struct BrokenQueue {
        refused: std::sync::Mutex<Option<Uuid>>,
    }

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn push(&self, submission: &Submission) -> Result<(), StoreError> {
            *self.refused.lock().unwrap() = Some(submission.job_id);
            Err(StoreError::Corrupt("queue offline".to_string()))
        }

        async fn pop(&self, _timeout: Duration) -> Result<Option<Submission>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_job_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(BrokenQueue::default());
        let coordinator = JobCoordinator::new(
            store.clone(),
            queue.clone(),
            Arc::new(JsonTaskProvider::from_tasks([add_task()])),
        );

        let err = coordinator.submit("1", "x = 1").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Store(_)));

        let refused = *queue.refused.lock().unwrap();
        let job_id = refused.expect("push was attempted");
        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failure);
        assert!(job.result.is_none());
        assert_eq!(
            coordinator.poll_status(job_id).await.unwrap().state,
            JobState::Failure
        );
    }
}

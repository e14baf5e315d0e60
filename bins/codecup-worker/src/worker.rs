// Worker loop: pop a submission, move its job forward, grade, record.

use crate::executor::Grader;
use codecup_common::types::Submission;
use codecup_common::JobCoordinator;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Queue pop timeout; the shutdown flag is checked between pops
pub const POP_TIMEOUT: Duration = Duration::from_secs(5);

const BACKOFF: Duration = Duration::from_secs(1);

#[instrument(skip(coordinator, grader, shutdown))]
pub async fn worker_loop(
    worker_id: usize,
    coordinator: JobCoordinator,
    grader: std::sync::Arc<Grader>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(engine = grader.engine_name(), "Worker ready");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let popped = tokio::select! {
            popped = coordinator.next_submission(POP_TIMEOUT) => popped,
            _ = shutdown.changed() => break,
        };

        match popped {
            Ok(Some(submission)) => process_submission(&coordinator, &grader, submission).await,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Queue error");
                tokio::time::sleep(BACKOFF).await;
            }
        }
    }
    info!("Worker stopped");
}

/// Grade one submission. A job that cannot be moved to `started` (already
/// taken, expired) is skipped; a grading fault or a result that cannot be
/// stored marks the job `failure`.
pub async fn process_submission(
    coordinator: &JobCoordinator,
    grader: &Grader,
    submission: Submission,
) {
    let job_id = submission.job_id;
    info!(
        job_id = %job_id,
        task_id = %submission.task_id,
        source_size = submission.code.len(),
        "Received job"
    );

    if let Err(e) = coordinator.start(job_id).await {
        warn!(job_id = %job_id, error = %e, "Job could not be started, skipping");
        return;
    }

    let started = std::time::Instant::now();
    match grader.grade(&submission.task_id, &submission.code).await {
        Ok(result) => {
            debug!(
                job_id = %job_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Persisting result"
            );
            match coordinator.complete(job_id, &result).await {
                Ok(()) => info!(job_id = %job_id, status = %result.status, "Job completed"),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to persist result");
                    if let Err(e) = coordinator.fail(job_id).await {
                        error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
                    }
                }
            }
        }
        Err(e) => {
            error!(job_id = %job_id, error = %format!("{:#}", e), "Grading failed");
            if let Err(e) = coordinator.fail(job_id).await {
                error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunOutcome;
    use crate::executor::tests::{add_task, ScriptedEngine};
    use crate::formatter::ResultFormatter;
    use codecup_common::coordinator::FAILURE_MESSAGE;
    use async_trait::async_trait;
    use codecup_common::types::{GradeStatus, Job, JobResult, JobState};
    use codecup_common::{
        JobStore, JsonTaskProvider, MemoryJobQueue, MemoryJobStore, StoreError, SubmitOutcome,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    /// Memory store that refuses to persist results
    struct ResultRejectingStore {
        inner: MemoryJobStore,
    }

    #[async_trait]
    impl JobStore for ResultRejectingStore {
        async fn create(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.create(id).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
            self.inner.get(id).await
        }

        async fn transition(
            &self,
            id: Uuid,
            to: JobState,
            result: Option<&JobResult>,
        ) -> Result<(), StoreError> {
            if to == JobState::Success {
                return Err(StoreError::Corrupt("result too large to store".to_string()));
            }
            self.inner.transition(id, to, result).await
        }
    }

    fn setup(outcome: anyhow::Result<RunOutcome>) -> (JobCoordinator, Arc<Grader>) {
        setup_with_store(Arc::new(MemoryJobStore::new()), outcome)
    }

    fn setup_with_store(
        store: Arc<dyn JobStore>,
        outcome: anyhow::Result<RunOutcome>,
    ) -> (JobCoordinator, Arc<Grader>) {
        let tasks = Arc::new(JsonTaskProvider::from_tasks([add_task()]));
        let coordinator = JobCoordinator::new(store, Arc::new(MemoryJobQueue::new()), tasks.clone());
        let grader = Arc::new(Grader::new(
            tasks,
            Arc::new(ScriptedEngine::new(outcome)),
            ResultFormatter::new(200, 200),
            1000,
        ));
        (coordinator, grader)
    }

    async fn submit(coordinator: &JobCoordinator) -> Submission {
        let SubmitOutcome::Accepted { job_id } = coordinator
            .submit("1", "def add(a, b):\n    return a + b\n")
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };
        let submission = coordinator
            .next_submission(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.job_id, job_id);
        submission
    }

    #[tokio::test]
    async fn test_timeout_still_completes_job() {
        let (coordinator, grader) = setup(Ok(RunOutcome::TimedOut { elapsed_ms: 3000.0 }));
        let submission = submit(&coordinator).await;
        let job_id = submission.job_id;

        process_submission(&coordinator, &grader, submission).await;

        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Success);
        assert_eq!(view.result.unwrap().status, GradeStatus::Timeout);
    }

    #[tokio::test]
    async fn test_pipeline_fault_fails_job() {
        let (coordinator, grader) = setup(Err(anyhow::anyhow!("docker daemon unreachable")));
        let submission = submit(&coordinator).await;
        let job_id = submission.job_id;

        process_submission(&coordinator, &grader, submission).await;

        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Failure);
        assert!(view.result.is_none());
        assert_eq!(view.error.as_deref(), Some(FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_unstorable_result_fails_job() {
        let store = Arc::new(ResultRejectingStore {
            inner: MemoryJobStore::new(),
        });
        let (coordinator, grader) =
            setup_with_store(store, Ok(RunOutcome::TimedOut { elapsed_ms: 3000.0 }));
        let submission = submit(&coordinator).await;
        let job_id = submission.job_id;

        process_submission(&coordinator, &grader, submission).await;

        let view = coordinator.poll_status(job_id).await.unwrap();
        assert_eq!(view.state, JobState::Failure);
        assert!(view.result.is_none());
        assert_eq!(view.error.as_deref(), Some(FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_already_started_job_is_skipped() {
        let (coordinator, grader) = setup(Ok(RunOutcome::TimedOut { elapsed_ms: 1.0 }));
        let submission = submit(&coordinator).await;
        let job_id = submission.job_id;
        coordinator.start(job_id).await.unwrap();

        process_submission(&coordinator, &grader, submission).await;
        assert_eq!(
            coordinator.poll_status(job_id).await.unwrap().state,
            JobState::Started
        );
    }

    #[tokio::test]
    async fn test_worker_loop_stops_on_shutdown() {
        let (coordinator, grader) = setup(Ok(RunOutcome::TimedOut { elapsed_ms: 1.0 }));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker_loop(0, coordinator, grader, rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}

// HTTP route handlers for the Codecup API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use codecup_common::types::ViolationCategory;
use codecup_common::{CoordinatorError, SubmitOutcome};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(deserialize_with = "task_id_from_any")]
    pub task_id: String,
    pub code: String,
}

/// Task ids are strings, but import files number them; accept both
fn task_id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "task_id must be a string or a number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitAccepted {
    pub accepted: bool,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitRejected {
    pub accepted: bool,
    pub violation: String,
    pub category: Option<ViolationCategory>,
    pub status: &'static str,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

/// POST /submit - Gate a submission and queue it for grading
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    match state.coordinator.submit(&payload.task_id, &payload.code).await {
        Ok(SubmitOutcome::Accepted { job_id }) => {
            metrics::record_submission("accepted");
            (
                StatusCode::ACCEPTED,
                Json(SubmitAccepted {
                    accepted: true,
                    job_id: job_id.to_string(),
                }),
            )
                .into_response()
        }
        Ok(SubmitOutcome::Rejected(verdict)) => {
            metrics::record_submission("rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(SubmitRejected {
                    accepted: false,
                    violation: verdict.message,
                    category: verdict.category,
                    status: "error",
                }),
            )
                .into_response()
        }
        Err(CoordinatorError::TaskNotFound(task_id)) => {
            metrics::record_submission("unknown_task");
            error_body(StatusCode::NOT_FOUND, format!("Task '{}' not found", task_id))
        }
        Err(e @ CoordinatorError::SourceTooLarge { .. }) => {
            metrics::record_submission("too_large");
            error_body(StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
        }
        Err(e) => {
            metrics::record_submission("error");
            error!(task_id = %payload.task_id, error = %e, "Failed to queue submission");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to queue submission")
        }
    }
}

/// GET /status/{job_id} - Current job state, with the result once terminal
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let job_uuid = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "Invalid job ID format"),
    };

    match state.coordinator.poll_status(job_uuid).await {
        Ok(view) => {
            metrics::record_poll(view.state.as_str());
            info!(job_id = %job_uuid, state = view.state.as_str(), "Job status retrieved");
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(CoordinatorError::JobNotFound(_)) => {
            metrics::record_poll("unknown");
            error_body(StatusCode::NOT_FOUND, "Job not found")
        }
        Err(e) => {
            error!(job_id = %job_uuid, error = %e, "Failed to fetch job status");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to query job status")
        }
    }
}

/// GET /health - Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecup_common::tasks::{HiddenTestCase, JsonTaskProvider, Task};
    use codecup_common::types::{CaseStatus, JobResult, JobState, TestOutcome};
    use codecup_common::{JobCoordinator, MemoryJobQueue, MemoryJobStore};
    use serde_json::Value;

    fn state() -> Arc<AppState> {
        let task = Task {
            id: "1".to_string(),
            name: "Sum of two".to_string(),
            time_limit_seconds: 2,
            hidden_tests: vec![HiddenTestCase {
                ordinal: 1,
                fragment: "assert add(2, 3) == 5".to_string(),
            }],
            excluded_modules: vec!["random".to_string()],
        };
        let coordinator = JobCoordinator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryJobQueue::new()),
            Arc::new(JsonTaskProvider::from_tasks([task])),
        )
        .with_max_source_bytes(256);
        Arc::new(AppState { coordinator })
    }

    fn request(task_id: &str, code: &str) -> Json<SubmitRequest> {
        Json(SubmitRequest {
            task_id: task_id.to_string(),
            code: code.to_string(),
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_accepted_submission_returns_job_id() {
        let response = submit(
            State(state()),
            request("1", "def add(a, b):\n    return a + b\n"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["accepted"], true);
        assert!(Uuid::parse_str(body["job_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_forbidden_import_is_rejected_without_job() {
        let response = submit(State(state()), request("1", "import os\n")).await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["status"], "error");
        assert_eq!(body["category"], "ForbiddenImport");
        assert!(body["violation"].as_str().unwrap().contains("os"));
        assert!(body.get("job_id").is_none());
    }

    #[tokio::test]
    async fn test_task_exclusions_apply() {
        let response = submit(State(state()), request("1", "import random\n")).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let response = submit(State(state()), request("99", "x = 1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_source_is_refused() {
        let response = submit(State(state()), request("1", &"#".repeat(1000))).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_numeric_task_id_is_accepted() {
        let request: SubmitRequest =
            serde_json::from_str(r#"{"task_id": 7, "code": "x = 1"}"#).unwrap();
        assert_eq!(request.task_id, "7");
        assert!(serde_json::from_str::<SubmitRequest>(r#"{"task_id": [1], "code": ""}"#).is_err());
    }

    #[tokio::test]
    async fn test_status_follows_job_lifecycle() {
        let state = state();
        let SubmitOutcome::Accepted { job_id } = state
            .coordinator
            .submit("1", "def add(a, b):\n    return a + b\n")
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };

        let response = get_status(State(state.clone()), Path(job_id.to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "pending");
        assert!(body.get("result").is_none());

        state.coordinator.start(job_id).await.unwrap();
        let result = JobResult::graded(
            3.0,
            vec![TestOutcome {
                name: "test_1".to_string(),
                status: CaseStatus::Passed,
                message: "test passed".to_string(),
            }],
        );
        state.coordinator.complete(job_id, &result).await.unwrap();

        let body = body_json(get_status(State(state), Path(job_id.to_string())).await).await;
        assert_eq!(body["state"], JobState::Success.as_str());
        assert_eq!(body["result"]["status"], "passed");
        assert_eq!(body["result"]["stats"]["passedTests"], 1);
    }

    #[tokio::test]
    async fn test_status_rejects_bad_and_unknown_ids() {
        let response = get_status(State(state()), Path("not-a-uuid".to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get_status(State(state()), Path(Uuid::new_v4().to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exports_text() {
        let _ = submit(State(state()), request("1", "import os\n")).await;
        let response = metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("codecup_submissions_total{outcome=\"rejected\"}"));
    }
}

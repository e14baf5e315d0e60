use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One grading request as it travels through the queue.
/// Immutable once created; the worker that pops it owns it until the job is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: Uuid,
    pub task_id: String,
    pub code: String,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(task_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            task_id: task_id.into(),
            code: code.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Why the static analyzer refused a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationCategory {
    SyntaxError,
    ForbiddenImport,
    ForbiddenCall,
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationCategory::SyntaxError => "SyntaxError",
            ViolationCategory::ForbiddenImport => "ForbiddenImport",
            ViolationCategory::ForbiddenCall => "ForbiddenCall",
        };
        f.write_str(name)
    }
}

/// Shape counts gathered while walking an accepted submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub functions: u32,
    pub classes: u32,
    pub lines: u32,
}

/// Static analyzer decision. Never persisted: a rejection is answered
/// synchronously and no job is created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub accepted: bool,
    pub category: Option<ViolationCategory>,
    /// Module or callable name that triggered the rejection
    pub symbol: Option<String>,
    pub message: String,
    pub stats: Option<SourceStats>,
}

impl SecurityVerdict {
    pub fn accept(stats: SourceStats) -> Self {
        Self {
            accepted: true,
            category: None,
            symbol: None,
            message: "OK".to_string(),
            stats: Some(stats),
        }
    }

    pub fn reject(
        category: ViolationCategory,
        symbol: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            accepted: false,
            category: Some(category),
            symbol,
            message: message.into(),
            stats: None,
        }
    }
}

/// Fault raised by submitted code, reduced to its class name and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedError {
    pub kind: String,
    pub message: String,
}

/// Fault kind used when the sandbox never produced a report
pub const INTERNAL_ERROR_KIND: &str = "InternalError";

/// Raw outcome of one hidden test function as reported by the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub error: Option<RaisedError>,
}

/// Internal execution report produced inside the isolated process.
/// Discarded once translated into a JobResult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub error: Option<RaisedError>,
    #[serde(default)]
    pub cases: Vec<CaseReport>,
}

impl ExecutionReport {
    /// Report for a child that exited without writing a result
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            duration_ms: 0.0,
            error: Some(RaisedError {
                kind: INTERNAL_ERROR_KIND.to_string(),
                message: message.into(),
            }),
            cases: Vec::new(),
        }
    }

    pub fn is_internal_error(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.kind == INTERNAL_ERROR_KIND)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
}

/// Sanitized outcome of one hidden test case. Position in
/// `JobResult::test_details` is the case ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: CaseStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStatus {
    Passed,
    Failed,
    Error,
    Timeout,
}

impl fmt::Display for GradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GradeStatus::Passed => "passed",
            GradeStatus::Failed => "failed",
            GradeStatus::Error => "error",
            GradeStatus::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStats {
    pub passed_tests: u32,
    pub total_tests: u32,
    pub success_rate: f64,
}

impl GradeStats {
    pub fn from_outcomes(outcomes: &[TestOutcome]) -> Self {
        let passed_tests = outcomes
            .iter()
            .filter(|o| o.status == CaseStatus::Passed)
            .count() as u32;
        let total_tests = outcomes.len() as u32;
        let success_rate = if total_tests == 0 {
            0.0
        } else {
            round2(passed_tests as f64 / total_tests as f64 * 100.0)
        };

        Self {
            passed_tests,
            total_tests,
            success_rate,
        }
    }

    pub fn empty() -> Self {
        Self {
            passed_tests: 0,
            total_tests: 0,
            success_rate: 0.0,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Outward-facing grading result. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// True when the grading run completed (status passed or failed)
    pub success: bool,
    pub status: GradeStatus,
    pub execution_time_ms: f64,
    pub stats: GradeStats,
    pub test_details: Vec<TestOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl JobResult {
    /// Result for a run that completed and produced one outcome per case
    pub fn graded(execution_time_ms: f64, test_details: Vec<TestOutcome>) -> Self {
        let stats = GradeStats::from_outcomes(&test_details);
        let status = if stats.total_tests > 0 && stats.passed_tests == stats.total_tests {
            GradeStatus::Passed
        } else {
            GradeStatus::Failed
        };

        Self {
            success: true,
            status,
            execution_time_ms: round2(execution_time_ms),
            stats,
            test_details,
            message: None,
            output: None,
        }
    }

    pub fn timeout(execution_time_ms: f64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: GradeStatus::Timeout,
            execution_time_ms: round2(execution_time_ms),
            stats: GradeStats::empty(),
            test_details: Vec::new(),
            message: Some(message.into()),
            output: None,
        }
    }

    pub fn error(
        execution_time_ms: f64,
        test_details: Vec<TestOutcome>,
        message: impl Into<String>,
    ) -> Self {
        let stats = GradeStats::from_outcomes(&test_details);
        Self {
            success: false,
            status: GradeStatus::Error,
            execution_time_ms: round2(execution_time_ms),
            stats,
            test_details,
            message: Some(message.into()),
            output: None,
        }
    }
}

/// Job lifecycle. Transitions only move forward:
/// pending -> started -> {success | failure}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Started,
    Success,
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Started => "started",
            JobState::Success => "success",
            JobState::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Started => 1,
            JobState::Success | JobState::Failure => 2,
        }
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "started" => Ok(JobState::Started),
            "success" => Ok(JobState::Success),
            "failure" => Ok(JobState::Failure),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub result: Option<JobResult>,
}

/// What `pollStatus` hands back: the result only once the job is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Grade Evaluator - Classification and Aggregation
///
/// **Core Responsibility:**
/// Turn a raw run outcome into a JobResult: one TestOutcome per hidden
/// case, in task order, with sanitized messages and aggregate stats.
///
/// **Critical Properties:**
/// - Knows nothing about processes, containers or Redis
/// - Pure function: (task, run outcome) -> JobResult
/// - Never copies raw failure text into a message
///
/// **Case Rules:**
/// - case passed -> `passed`
/// - AssertionError -> `failed`
/// - any other fault -> `error`
///
/// **Run Rules:**
/// - timeout -> status `timeout`, no test details
/// - no report from the sandbox -> status `error`, generic message
/// - syntax error while loading the submission -> status `error`,
///   no case executed
/// - other fault while loading the submission -> every case `error`,
///   status `failed`

use crate::engine::RunOutcome;
use codecup_common::tasks::Task;
use codecup_common::types::{
    CaseReport, CaseStatus, ExecutionReport, JobResult, RaisedError, TestOutcome,
};
use lazy_static::lazy_static;
use regex::Regex;

pub const PASSED_MESSAGE: &str = "test passed";
pub const NOT_FOUND_MESSAGE: &str =
    "function not found, check the function name in the task description";
pub const SYNTAX_MESSAGE: &str = "syntax error in submitted code";
pub const INCORRECT_MESSAGE: &str = "incorrect result";
pub const INTERNAL_MESSAGE: &str = "internal error while grading, please try again later";
pub const NOT_RUN_MESSAGE: &str = "test was not run";

lazy_static! {
    static ref UNDEFINED_NAME: Regex =
        Regex::new(r"^NameError:|is not defined").expect("valid undefined-name pattern");
    static ref SYNTAX_FAILURE: Regex =
        Regex::new(r"^(?:SyntaxError|IndentationError|TabError):").expect("valid syntax pattern");
}

/// Map a raw fault to one of the fixed outward messages
pub fn sanitize_failure(fault: &RaisedError) -> &'static str {
    let raw = format!("{}: {}", fault.kind, fault.message);
    if UNDEFINED_NAME.is_match(&raw) {
        NOT_FOUND_MESSAGE
    } else if SYNTAX_FAILURE.is_match(&raw) {
        SYNTAX_MESSAGE
    } else {
        INCORRECT_MESSAGE
    }
}

pub fn evaluate_case(report: &CaseReport) -> TestOutcome {
    if report.passed {
        return TestOutcome {
            name: report.name.clone(),
            status: CaseStatus::Passed,
            message: PASSED_MESSAGE.to_string(),
        };
    }

    let (status, message) = match &report.error {
        Some(fault) if fault.kind == "AssertionError" => {
            (CaseStatus::Failed, sanitize_failure(fault))
        }
        Some(fault) => (CaseStatus::Error, sanitize_failure(fault)),
        None => (CaseStatus::Failed, INCORRECT_MESSAGE),
    };

    TestOutcome {
        name: report.name.clone(),
        status,
        message: message.to_string(),
    }
}

pub fn evaluate(task: &Task, outcome: RunOutcome) -> JobResult {
    match outcome {
        RunOutcome::TimedOut { elapsed_ms } => JobResult::timeout(
            elapsed_ms,
            format!(
                "time limit exceeded: execution took longer than {} seconds",
                task.time_limit_seconds
            ),
        ),
        RunOutcome::Finished(report) => evaluate_report(task, report),
    }
}

fn evaluate_report(task: &Task, report: ExecutionReport) -> JobResult {
    if report.is_internal_error() {
        return JobResult::error(report.duration_ms, Vec::new(), INTERNAL_MESSAGE);
    }

    let output = Some(report.stdout.clone()).filter(|s| !s.is_empty());

    if let Some(fault) = &report.error {
        let message = sanitize_failure(fault);
        let mut result = if message == SYNTAX_MESSAGE {
            JobResult::error(report.duration_ms, Vec::new(), SYNTAX_MESSAGE)
        } else {
            let details = task
                .hidden_tests
                .iter()
                .map(|case| TestOutcome {
                    name: case.name(),
                    status: CaseStatus::Error,
                    message: message.to_string(),
                })
                .collect();
            let mut result = JobResult::graded(report.duration_ms, details);
            result.message = Some(message.to_string());
            result
        };
        result.output = output;
        return result;
    }

    let details = task
        .hidden_tests
        .iter()
        .map(|case| {
            let name = case.name();
            match report.cases.iter().find(|c| c.name == name) {
                Some(case_report) => evaluate_case(case_report),
                None => TestOutcome {
                    name,
                    status: CaseStatus::Error,
                    message: NOT_RUN_MESSAGE.to_string(),
                },
            }
        })
        .collect();

    let mut result = JobResult::graded(report.duration_ms, details);
    result.output = output;
    result
}

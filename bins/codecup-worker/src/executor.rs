/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// `grade(task_id, code) -> JobResult`
///
/// **Architecture:**
/// 1. Load the task (time limit and ordered hidden cases)
/// 2. Materialize the program with one wrapper per case (harness.rs)
/// 3. Run it through the configured engine (engine.rs / docker.rs)
/// 4. Classify and aggregate the outcome (evaluator.rs)
/// 5. Sanitize every text field (formatter.rs)
///
/// This module is the glue layer. An `Err` means the pipeline itself
/// faulted and no JobResult exists; the job is then marked `failure`.

use crate::engine::{ExecutionEngine, RunOutcome};
use crate::evaluator;
use crate::formatter::ResultFormatter;
use crate::harness;
use anyhow::{Context, Result};
use codecup_common::tasks::TaskProvider;
use codecup_common::types::JobResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct Grader {
    tasks: Arc<dyn TaskProvider>,
    engine: Arc<dyn ExecutionEngine>,
    formatter: ResultFormatter,
    max_output_chars: usize,
}

impl Grader {
    pub fn new(
        tasks: Arc<dyn TaskProvider>,
        engine: Arc<dyn ExecutionEngine>,
        formatter: ResultFormatter,
        max_output_chars: usize,
    ) -> Self {
        Self {
            tasks,
            engine,
            formatter,
            max_output_chars,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    #[instrument(skip(self, code), fields(engine = self.engine.name(), source_size = code.len()))]
    pub async fn grade(&self, task_id: &str, code: &str) -> Result<JobResult> {
        let task = self
            .tasks
            .task(task_id)
            .with_context(|| format!("Task '{}' not found", task_id))?;

        let program = harness::materialize(code, &task, self.max_output_chars);
        let timeout = Duration::from_secs(task.time_limit_seconds);
        let outcome = self
            .engine
            .run(&program, timeout)
            .await
            .context("Sandbox execution failed")?;

        match &outcome {
            RunOutcome::TimedOut { elapsed_ms } => warn!(
                elapsed_ms,
                time_limit_s = task.time_limit_seconds,
                "Execution timed out; no case can pass"
            ),
            RunOutcome::Finished(report) if report.is_internal_error() => {
                warn!("Sandbox produced no report")
            }
            RunOutcome::Finished(report) if report.error.is_some() => {
                warn!("Submission faulted while loading")
            }
            RunOutcome::Finished(_) => {}
        }

        let result = self.formatter.format(evaluator::evaluate(&task, outcome), &task);
        info!(
            status = %result.status,
            passed = result.stats.passed_tests,
            total = result.stats.total_tests,
            execution_ms = result.execution_time_ms,
            "Grading completed"
        );
        Ok(result)
    }
}

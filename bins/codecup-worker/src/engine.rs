/// Execution Engine - Abstraction for Isolated Code Execution
///
/// **Core Responsibility:**
/// Run one sandbox program in a separate OS process under a wall-clock
/// budget and hand back the raw execution report.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to isolate (local process, container)
/// - Engine does NOT classify failures
/// - Engine does NOT build the outward-facing result
/// - Engine returns the raw report (or a timeout) for the Evaluator
///
/// **Timeout Rules:**
/// - The child is polled for liveness until the deadline
/// - A child still alive at the deadline is killed, and the run is
///   reported as timed out without waiting for a report
/// - A child that exits without a report yields an `InternalError` report
///
/// `ProcessEngine` is the default; `DockerEngine` (docker.rs) trades
/// start-up latency for kernel-level isolation.

use crate::sandbox::{self, SandboxProgram, BOOTSTRAP, DEFAULT_MAX_OUTPUT_CHARS};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use async_trait::async_trait;
use codecup_common::types::{round2, ExecutionReport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Liveness poll period while waiting on the child
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stdout kept from the child; the rest is drained and dropped
const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// Largest file the child may create
const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The child exited; the report may be an `InternalError` stand-in
    Finished(ExecutionReport),
    /// The child was still alive at the deadline and was killed
    TimedOut { elapsed_ms: f64 },
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run a program to completion or until `timeout` elapses.
    /// `Err` means the engine itself failed (spawn, I/O, daemon).
    async fn run(&self, program: &SandboxProgram, timeout: Duration) -> Result<RunOutcome>;

    /// Run bare code with no hidden cases
    async fn execute(&self, code: &str, timeout: Duration) -> Result<RunOutcome> {
        let program = SandboxProgram::new(code, DEFAULT_MAX_OUTPUT_CHARS);
        self.run(&program, timeout).await
    }
}

/// Resource limits applied to the child between fork and exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub memory_bytes: u64,
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
}

impl ProcessLimits {
    /// CPU budget is the wall-clock budget rounded up plus one second, so
    /// the wall-clock deadline normally fires first
    pub fn for_timeout(memory_bytes: u64, timeout: Duration) -> Self {
        Self {
            memory_bytes,
            cpu_seconds: timeout.as_secs_f64().ceil() as u64 + 1,
            file_size_bytes: MAX_FILE_SIZE_BYTES,
        }
    }

    #[cfg(unix)]
    fn apply(&self) -> std::io::Result<()> {
        use rlimit::{setrlimit, Resource};

        setrlimit(Resource::AS, self.memory_bytes, self.memory_bytes)?;
        setrlimit(Resource::CPU, self.cpu_seconds, self.cpu_seconds)?;
        setrlimit(Resource::FSIZE, self.file_size_bytes, self.file_size_bytes)?;
        // no core dumps
        setrlimit(Resource::CORE, 0, 0)?;
        Ok(())
    }
}

/// Runs the bootstrap with a local interpreter:
/// `python -I -S -B bootstrap.py program.json`, inside a fresh workspace,
/// with a scrubbed environment and rlimits.
pub struct ProcessEngine {
    python_bin: String,
    memory_limit_bytes: u64,
    workspace_root: Option<PathBuf>,
}

impl ProcessEngine {
    pub fn new(python_bin: impl Into<String>, memory_limit_bytes: u64) -> Self {
        Self {
            python_bin: python_bin.into(),
            memory_limit_bytes,
            workspace_root: None,
        }
    }

    pub fn with_workspace_root(mut self, root: Option<PathBuf>) -> Self {
        self.workspace_root = root;
        self
    }

    fn command(&self, workspace: &Workspace, limits: ProcessLimits) -> Result<Command> {
        let script = workspace.write("bootstrap.py", BOOTSTRAP)?;

        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k == "PATH" || k == "LANG" || k == "TZ")
            .collect();
        env.insert("HOME".to_string(), workspace.path().display().to_string());

        let mut cmd = Command::new(&self.python_bin);
        cmd.args(["-I", "-S", "-B"])
            .arg(script)
            .arg(workspace.path().join("program.json"))
            .current_dir(workspace.path())
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }
        #[cfg(not(unix))]
        let _ = limits;

        Ok(cmd)
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, program: &SandboxProgram, timeout: Duration) -> Result<RunOutcome> {
        let workspace = Workspace::create(self.workspace_root.as_deref())?;
        workspace.write("program.json", program.to_json()?)?;

        let limits = ProcessLimits::for_timeout(self.memory_limit_bytes, timeout);
        let mut cmd = self.command(&workspace, limits)?;

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.python_bin))?;
        let stdout = child.stdout.take().context("Failed to capture sandbox stdout")?;
        let stderr = child.stderr.take().context("Failed to capture sandbox stderr")?;
        let stdout_task = tokio::spawn(read_capped(stdout, MAX_CAPTURE_BYTES));
        let stderr_task = tokio::spawn(read_capped(stderr, MAX_STDERR_BYTES));

        let deadline = started + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().context("Failed to poll sandbox process")? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let Some(status) = status else {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Sandbox exceeded its time limit, killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out sandbox");
            }
            stdout_task.abort();
            stderr_task.abort();
            return Ok(RunOutcome::TimedOut {
                elapsed_ms: elapsed_ms(started),
            });
        };

        let stdout = stdout_task.await.context("Sandbox stdout reader panicked")??;
        let stderr = stderr_task.await.context("Sandbox stderr reader panicked")??;
        let stdout = String::from_utf8_lossy(&stdout);

        debug!(
            exit_status = %status,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            elapsed_ms = elapsed_ms(started),
            "Sandbox exited"
        );

        match sandbox::parse_report(&stdout, &program.report_token) {
            Some(report) => Ok(RunOutcome::Finished(report)),
            None => {
                warn!(exit_status = %status, "Sandbox exited without a report");
                Ok(RunOutcome::Finished(ExecutionReport::internal_error(format!(
                    "sandbox exited with {} without a report",
                    status
                ))))
            }
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    round2(started.elapsed().as_secs_f64() * 1000.0)
}

/// Read up to `limit` bytes, then drain the rest so the child never
/// blocks on a full pipe
async fn read_capped<R>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

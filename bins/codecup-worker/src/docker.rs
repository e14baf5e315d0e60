/// Docker-based execution engine
///
/// **Container Rules:**
/// 1. Pulls the interpreter image if it is not cached
/// 2. Creates a container with:
///    - networking disabled
///    - memory, CPU and pid limits
///    - read-only root filesystem
/// 3. Passes the program base64-encoded in an environment variable and
///    runs the bootstrap with `python3 -I -S -B -c`
/// 4. Collects stdout until exit, under a hard wall-clock timeout
/// 5. Kills the container on timeout
/// 6. Removes the container on every path via a drop guard

use crate::engine::{elapsed_ms, ExecutionEngine, RunOutcome};
use crate::sandbox::{self, SandboxProgram, BOOTSTRAP, PROGRAM_ENV};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use codecup_common::types::ExecutionReport;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;
const PIDS_LIMIT: i64 = 64;

/// Container cleanup guard - removes the container on drop, including
/// when the run future is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

pub struct DockerEngine {
    docker: Docker,
    image: String,
    memory_limit_bytes: i64,
    nano_cpus: i64,
}

impl DockerEngine {
    pub fn new(image: impl Into<String>, memory_limit_bytes: u64, cpu_limit: f64) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            image: image.into(),
            memory_limit_bytes: memory_limit_bytes as i64,
            nano_cpus: (cpu_limit * 1_000_000_000.0) as i64,
        })
    }

    /// Pull the image on a cache miss
    pub async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %self.image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, program: &SandboxProgram) -> Result<Config<String>> {
        Ok(Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python3".to_string(),
                "-I".to_string(),
                "-S".to_string(),
                "-B".to_string(),
                "-c".to_string(),
                BOOTSTRAP.to_string(),
            ]),
            env: Some(vec![format!("{}={}", PROGRAM_ENV, program.encoded()?)]),
            working_dir: Some("/tmp".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(self.memory_limit_bytes),
                memory_swap: Some(self.memory_limit_bytes),
                nano_cpus: Some(self.nano_cpus),
                pids_limit: Some(PIDS_LIMIT),
                readonly_rootfs: Some(true),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn collect_stdout(&self, container_id: &str) -> String {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut stdout = String::new();
        let mut stderr_bytes = 0usize;
        let mut logs = self.docker.logs(container_id, options);
        while let Some(output) = logs.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => {
                    if stdout.len() < MAX_CAPTURE_BYTES {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                }
                Ok(LogOutput::StdErr { message }) => stderr_bytes += message.len(),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let mut wait = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        if let Some(Ok(response)) = wait.next().await {
            debug!(
                exit_code = response.status_code,
                stderr_bytes,
                "Container exited"
            );
        }

        stdout
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, program: &SandboxProgram, timeout: Duration) -> Result<RunOutcome> {
        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}'", self.image))?;

        let name = format!("codecup-{}", uuid::Uuid::new_v4());
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                self.container_config(program)?,
            )
            .await
            .context("Failed to create Docker container")?;

        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };

        let started = Instant::now();
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        match tokio::time::timeout(timeout, self.collect_stdout(&container.id)).await {
            Ok(stdout) => match sandbox::parse_report(&stdout, &program.report_token) {
                Some(report) => Ok(RunOutcome::Finished(report)),
                None => {
                    warn!(container_id = %container.id, "Container exited without a report");
                    Ok(RunOutcome::Finished(ExecutionReport::internal_error(
                        "container exited without a report",
                    )))
                }
            },
            Err(_) => {
                warn!(
                    container_id = %container.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Container exceeded its time limit, killing"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container.id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                Ok(RunOutcome::TimedOut {
                    elapsed_ms: elapsed_ms(started),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_is_locked_down() {
        let Ok(engine) = DockerEngine::new("python:3.12-slim", 128 * 1024 * 1024, 0.5) else {
            return;
        };
        let config = engine
            .container_config(&SandboxProgram::new("x = 1", 100))
            .unwrap();

        assert_eq!(config.network_disabled, Some(true));
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert!(config.env.unwrap()[0].starts_with("CODECUP_PROGRAM="));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_engine_runs_bootstrap() {
        let engine = DockerEngine::new("python:3.12-slim", 256 * 1024 * 1024, 1.0).unwrap();
        let outcome = engine
            .execute("print('hello')", Duration::from_secs(30))
            .await
            .unwrap();

        match outcome {
            RunOutcome::Finished(report) => {
                assert!(report.success);
                assert_eq!(report.stdout, "hello\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}

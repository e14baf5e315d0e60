// Worker configuration: sandbox limits, engine selection and pool size
use crate::sandbox::DEFAULT_MAX_OUTPUT_CHARS;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/worker.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local interpreter process with rlimits and a scrubbed environment
    Process,
    /// Throwaway container with networking disabled
    Docker,
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "process" => Ok(EngineKind::Process),
            "docker" => Ok(EngineKind::Docker),
            other => bail!("unknown engine '{}', valid options: process, docker", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub engine: EngineKind,
    pub python_bin: String,
    pub docker_image: String,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub max_output_chars: usize,
    pub max_message_chars: usize,
    pub concurrency: usize,
    /// Parent directory for per-run workspaces; the system temp dir when unset
    pub workspace_root: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Process,
            python_bin: "python3".to_string(),
            docker_image: "python:3.12-slim".to_string(),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_message_chars: 500,
            concurrency: 2,
            workspace_root: None,
        }
    }
}

impl WorkerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Worker config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: WorkerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `config/worker.json` when present, built-in defaults otherwise,
    /// then environment overrides on top
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply WORKER_ENGINE, WORKER_CONCURRENCY and PYTHON_BIN
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(engine) = lookup("WORKER_ENGINE") {
            self.engine = engine.parse()?;
        }
        if let Some(concurrency) = lookup("WORKER_CONCURRENCY") {
            self.concurrency = concurrency
                .parse()
                .with_context(|| format!("Invalid WORKER_CONCURRENCY '{}'", concurrency))?;
        }
        if let Some(python_bin) = lookup("PYTHON_BIN") {
            self.python_bin = python_bin;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be positive");
        }
        if self.cpu_limit <= 0.0 {
            bail!("cpu_limit must be positive");
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb * 1024 * 1024
    }
}

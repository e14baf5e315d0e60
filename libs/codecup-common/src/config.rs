// Settings shared by the API and the worker, read from the environment

use crate::coordinator::DEFAULT_MAX_SOURCE_BYTES;
use std::path::PathBuf;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_TASKS_PATH: &str = "config/tasks.json";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
/// Jobs and results expire after 24 hours
pub const DEFAULT_JOB_TTL_SECONDS: u64 = 86400;

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub tasks_path: PathBuf,
    pub job_ttl_seconds: u64,
    pub bind_addr: String,
    pub max_source_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            tasks_path: PathBuf::from(DEFAULT_TASKS_PATH),
            job_ttl_seconds: DEFAULT_JOB_TTL_SECONDS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or unparsable values keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            tasks_path: lookup("TASKS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.tasks_path),
            job_ttl_seconds: lookup("JOB_TTL_SECONDS")
                .and_then(|v| v.parse().ok())
                .filter(|ttl| *ttl > 0)
                .unwrap_or(defaults.job_ttl_seconds),
            bind_addr: lookup("API_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_source_bytes: lookup("MAX_SOURCE_BYTES")
                .and_then(|v| v.parse().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.max_source_bytes),
        }
    }
}

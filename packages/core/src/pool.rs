//! Worker pool configuration and state snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of a worker inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Availability of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready to take a job.
    Idle,
    /// Running a job.
    Busy,
    /// Held by a suspension, not available for dispatch.
    Suspended,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Suspended => write!(f, "suspended"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pool config: {0}")]
    Invalid(String),
}

/// Configuration for the worker pool and its payload store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers to spawn.
    pub workers: u32,
    /// Largest single payload (or result) accepted for transfer, in bytes.
    pub max_payload_bytes: usize,
    /// Total bytes of live payload regions allowed at once.
    pub shared_memory_bytes: usize,
    /// Default execution timeout for a job, in milliseconds. `None` disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_timeout_ms: Option<u64>,
    /// Capacity of the diagnostics event channel.
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_payload_bytes: 1024 * 1024,
            shared_memory_bytes: 64 * 1024 * 1024,
            execution_timeout_ms: Some(30_000),
            event_capacity: 1024,
        }
    }
}

impl PoolConfig {
    /// A config with a fixed number of workers and default limits.
    pub fn with_workers(workers: u32) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the per-payload limit.
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Set the total shared memory budget.
    pub fn with_shared_memory_bytes(mut self, bytes: usize) -> Self {
        self.shared_memory_bytes = bytes;
        self
    }

    /// Set the default execution timeout. `None` or zero disables it.
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout_ms = timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .filter(|ms| *ms > 0);
        self
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// Build a config from environment variables.
    ///
    /// - `JOB_WORKERS` (default: available parallelism)
    /// - `JOB_MAX_PAYLOAD_BYTES` (default: 1 MiB)
    /// - `JOB_SHARED_MEMORY_BYTES` (default: 64 MiB)
    /// - `JOB_EXECUTION_TIMEOUT_MS` (default: 30000, `0` disables)
    /// - `JOB_EVENT_CAPACITY` (default: 1024)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(workers) = parse_var(&lookup, "JOB_WORKERS")? {
            cfg.workers = workers;
        }
        if let Some(bytes) = parse_var(&lookup, "JOB_MAX_PAYLOAD_BYTES")? {
            cfg.max_payload_bytes = bytes;
        }
        if let Some(bytes) = parse_var(&lookup, "JOB_SHARED_MEMORY_BYTES")? {
            cfg.shared_memory_bytes = bytes;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "JOB_EXECUTION_TIMEOUT_MS")? {
            cfg.execution_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(capacity) = parse_var(&lookup, "JOB_EVENT_CAPACITY")? {
            cfg.event_capacity = capacity;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_payload_bytes must be positive".into(),
            ));
        }
        if self.shared_memory_bytes < self.max_payload_bytes {
            return Err(ConfigError::Invalid(format!(
                "shared_memory_bytes ({}) is smaller than max_payload_bytes ({})",
                self.shared_memory_bytes, self.max_payload_bytes
            )));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn default_workers() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
        .max(1)
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::Invalid(format!("{key}={raw}: {e}")))
}

/// Snapshot of the worker pool state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolStats {
    /// Live workers.
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub suspended: usize,
    /// Submissions blocked waiting for capacity.
    pub waiting_submissions: usize,
    pub shutting_down: bool,
    pub terminated: bool,
}

impl PoolStats {
    /// Workers that still hold work (busy or suspended).
    pub fn in_flight(&self) -> usize {
        self.busy + self.suspended
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn zero_execution_timeout_disables_it() {
        let cfg = PoolConfig::default().with_execution_timeout(Some(Duration::ZERO));
        assert_eq!(cfg.execution_timeout(), None);

        let cfg = PoolConfig::default().with_execution_timeout(Some(Duration::MAX));
        assert_eq!(cfg.execution_timeout_ms, Some(u64::MAX));

        let cfg =
            PoolConfig::default().with_execution_timeout(Some(Duration::from_millis(250)));
        assert_eq!(cfg.execution_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn reads_overrides_from_environment() -> Result<(), ConfigError> {
        let cfg = PoolConfig::from_lookup(lookup(&[
            ("JOB_WORKERS", "3"),
            ("JOB_MAX_PAYLOAD_BYTES", "2048"),
            ("JOB_SHARED_MEMORY_BYTES", "8192"),
            ("JOB_EXECUTION_TIMEOUT_MS", "0"),
        ]))?;
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.max_payload_bytes, 2048);
        assert_eq!(cfg.shared_memory_bytes, 8192);
        assert_eq!(cfg.execution_timeout(), None);
        assert_eq!(cfg.event_capacity, 1024);
        Ok(())
    }

    #[test]
    fn rejects_garbage_and_inconsistent_limits() {
        let garbage = PoolConfig::from_lookup(lookup(&[("JOB_WORKERS", "many")]));
        assert!(matches!(garbage, Err(ConfigError::Invalid(_))));

        let zero = PoolConfig::from_lookup(lookup(&[("JOB_WORKERS", "0")]));
        assert!(zero.is_err());

        let budget = PoolConfig::from_lookup(lookup(&[
            ("JOB_MAX_PAYLOAD_BYTES", "4096"),
            ("JOB_SHARED_MEMORY_BYTES", "1024"),
        ]));
        assert!(budget.is_err());
    }
}

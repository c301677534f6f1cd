//! Configuration of the execution pool.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an [`ExecutionPool`](crate::ExecutionPool).
///
/// Controls how many interpreters exist, how long callers wait for one, and
/// when a used interpreter is thrown away instead of reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on live contexts.
    ///
    /// Defaults to 8.
    pub max_contexts: usize,

    /// Contexts created eagerly when the pool is built.
    ///
    /// Defaults to 0 (all contexts are created on demand).
    pub prewarm: usize,

    /// How long `acquire` waits for a free context. `None` waits forever.
    ///
    /// Defaults to 30 seconds.
    #[serde(with = "optional_millis")]
    pub acquire_timeout: Option<Duration>,

    /// Wall-clock limit of one run. `None` disables the limit.
    ///
    /// Defaults to 60 seconds.
    #[serde(with = "optional_millis")]
    pub execution_timeout: Option<Duration>,

    /// Guest instructions between two deadline checks.
    ///
    /// Defaults to 10,000.
    pub hook_interval: u32,

    /// Interpreter heap limit in bytes.
    ///
    /// Defaults to 128MB.
    pub memory_limit: Option<usize>,

    /// Discard a context after this many runs.
    pub max_runs_per_context: Option<u64>,

    /// Discard a context whose heap, after a full collection, exceeds this.
    pub recycle_memory_bytes: Option<usize>,
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 8,
            prewarm: 0,
            acquire_timeout: Some(Duration::from_secs(30)),
            execution_timeout: Some(Duration::from_secs(60)),
            hook_interval: 10_000,
            memory_limit: Some(128 * 1024 * 1024), // 128MB
            max_runs_per_context: None,
            recycle_memory_bytes: None,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of contexts.
    pub fn with_max_contexts(mut self, max: usize) -> Self {
        self.max_contexts = max;
        self
    }

    /// Set the number of contexts created up front.
    pub fn with_prewarm(mut self, count: usize) -> Self {
        self.prewarm = count;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the per-run wall-clock limit.
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the instruction interval of the deadline hook.
    pub fn with_hook_interval(mut self, instructions: u32) -> Self {
        self.hook_interval = instructions;
        self
    }

    /// Set the interpreter heap limit.
    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Discard contexts after `runs` runs.
    pub fn with_max_runs_per_context(mut self, runs: u64) -> Self {
        self.max_runs_per_context = Some(runs);
        self
    }

    /// Discard contexts retaining more than `bytes` after a run.
    pub fn with_recycle_memory(mut self, bytes: usize) -> Self {
        self.recycle_memory_bytes = Some(bytes);
        self
    }

    /// A single short-lived context, for tests and one-off runs.
    pub fn minimal() -> Self {
        Self {
            max_contexts: 1,
            prewarm: 0,
            acquire_timeout: Some(Duration::from_secs(1)),
            execution_timeout: Some(Duration::from_secs(5)),
            hook_interval: 1_000,
            memory_limit: Some(16 * 1024 * 1024), // 16MB
            max_runs_per_context: Some(1),
            recycle_memory_bytes: None,
        }
    }

    /// Default settings for typical workloads.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Many long-running contexts.
    pub fn generous() -> Self {
        Self {
            max_contexts: 64,
            prewarm: 4,
            acquire_timeout: None,
            execution_timeout: Some(Duration::from_secs(600)),
            hook_interval: 100_000,
            memory_limit: Some(1024 * 1024 * 1024), // 1GB
            max_runs_per_context: None,
            recycle_memory_bytes: Some(256 * 1024 * 1024),
        }
    }
}

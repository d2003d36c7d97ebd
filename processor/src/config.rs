//! Processor configuration

use std::time::Duration;

pub const DEFAULT_MAX_OCCUPANCY: u32 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for [`crate::TransactionProcessor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Worker threads executing handler tasks
    pub worker_threads: usize,
    /// Requests the validator may have in flight per handler
    pub max_occupancy: u32,
    /// Overall budget for in-flight tasks at shutdown
    pub shutdown_timeout: Duration,
    /// How long `stop` waits for the unregister acknowledgement
    pub unregister_timeout: Duration,
    /// Per-receive wait while draining; draining ends on the first timeout
    pub drain_poll: Duration,
    /// Main-loop receive wait between stop-flag checks
    pub receive_poll: Duration,
    /// Pause after a failed registration attempt
    pub register_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_occupancy: DEFAULT_MAX_OCCUPANCY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            unregister_timeout: Duration::from_secs(1),
            drain_poll: Duration::from_secs(1),
            receive_poll: Duration::from_millis(100),
            register_backoff: Duration::from_secs(1),
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ProcessorConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    pub fn with_max_occupancy(mut self, max_occupancy: u32) -> Self {
        self.max_occupancy = max_occupancy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_unregister_timeout(mut self, timeout: Duration) -> Self {
        self.unregister_timeout = timeout;
        self
    }

    pub fn with_drain_poll(mut self, poll: Duration) -> Self {
        self.drain_poll = poll;
        self
    }

    pub fn with_receive_poll(mut self, poll: Duration) -> Self {
        self.receive_poll = poll;
        self
    }

    pub fn with_register_backoff(mut self, backoff: Duration) -> Self {
        self.register_backoff = backoff;
        self
    }

    /// Applies `TP_WORKER_THREADS`, `TP_MAX_OCCUPANCY` and
    /// `TP_SHUTDOWN_TIMEOUT_SECS`. Unparseable values are logged and skipped.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(value) = env_number::<usize>("TP_WORKER_THREADS") {
            self.worker_threads = value.max(1);
        }
        if let Some(value) = env_number::<u32>("TP_MAX_OCCUPANCY") {
            self.max_occupancy = value;
        }
        if let Some(value) = env_number::<u64>("TP_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout = Duration::from_secs(value);
        }
        self
    }
}

fn env_number<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {key}, ignoring: {err}");
            None
        }
    }
}

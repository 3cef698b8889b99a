//! Configuration for spawning and supervising the worker process

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable configuration for the worker supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path to the worker executable
    pub worker_path: PathBuf,
    /// Extra arguments passed to the worker ahead of any protocol flags
    pub worker_args: Vec<String>,
    /// Polling interval forwarded to the worker as `--poll-interval`, in
    /// milliseconds. `None` leaves the worker on its native backend.
    pub poll_interval_ms: Option<u64>,
    /// How long to wait for the worker's readiness line (default: 10s)
    pub ready_timeout_ms: u64,
    /// How long `kill` waits for the worker to acknowledge the final
    /// unwatch-all request before terminating it (default: 2s)
    pub shutdown_timeout_ms: u64,
    /// Event batches buffered per subscription before new batches are
    /// dropped (default: 1024)
    pub event_channel_capacity: usize,
}

impl SupervisorConfig {
    /// Create a configuration with default timeouts for the given worker
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            worker_args: Vec::new(),
            poll_interval_ms: None,
            ready_timeout_ms: 10_000,
            shutdown_timeout_ms: 2_000,
            event_channel_capacity: 1024,
        }
    }

    /// Create configuration from builder
    pub fn builder(worker_path: impl Into<PathBuf>) -> SupervisorConfigBuilder {
        SupervisorConfigBuilder {
            config: Self::new(worker_path),
        }
    }

    /// Get the readiness timeout duration
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Get the shutdown drain timeout duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Builder for SupervisorConfig
#[derive(Debug)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    /// Append one argument for the worker command line
    pub fn worker_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.worker_args.push(arg.into());
        self
    }

    /// Replace the worker argument list
    pub fn worker_args(mut self, args: Vec<String>) -> Self {
        self.config.worker_args = args;
        self
    }

    /// Set the polling interval forwarded to the worker
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = Some(ms);
        self
    }

    /// Set the readiness timeout in milliseconds
    pub fn ready_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ready_timeout_ms = ms;
        self
    }

    /// Set the shutdown drain timeout in milliseconds
    pub fn shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_timeout_ms = ms;
        self
    }

    /// Set the per-subscription event buffer size
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SupervisorConfig {
        self.config
    }
}

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Supervisor for a long-lived file system watcher worker process
//!
//! This crate runs a watcher worker as a child process and multiplexes any
//! number of watch subscriptions over its line-delimited JSON pipe:
//! - Spawning, readiness handshake, and teardown of the worker
//! - Request/response correlation over the worker's stdin and stdout
//! - Per-subscription event streams with ordered delivery
//! - Crash detection with captured stderr in the diagnostics
//!
//! # Example
//!
//! ```no_run
//! use notifymux::{Supervisor, SupervisorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SupervisorConfig::builder("/usr/local/bin/notify-worker")
//!     .poll_interval_ms(200)
//!     .build();
//! let supervisor = Supervisor::spawn(config).await?;
//!
//! let mut watch = supervisor.watch_path("/path/to/project").await?;
//! while let Some(batch) = watch.recv().await {
//!     for event in batch {
//!         println!("changed: {}", event.path().display());
//!     }
//! }
//!
//! supervisor.kill().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod correlator;
mod error;
mod registry;
mod subscription;
mod supervisor;

pub use config::{SupervisorConfig, SupervisorConfigBuilder};
pub use error::{Error, Fault, Result};
pub use registry::EventBatch;
pub use subscription::Watch;
pub use supervisor::{ProcessState, Supervisor};

// Wire-level types callers interact with directly
pub use notifymux_protocol::{RequestId, WatchEvent, WatchId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::SupervisorConfig;
    pub use crate::error::{Error, Result};
    pub use crate::subscription::Watch;
    pub use crate::supervisor::Supervisor;
    pub use notifymux_protocol::WatchEvent;
}

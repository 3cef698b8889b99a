//! Shared setup for supervisor integration tests
//!
//! Tests drive a real worker process: the stub worker from this workspace,
//! which speaks the full protocol over a deliberately simple polling
//! scanner and can inject worker-side failures on demand.

#![allow(dead_code)]

use notifymux::{Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Scan interval the stub worker runs at during tests
pub const POLL_INTERVAL_MS: u64 = 25;

/// Generous bound for anything that should happen promptly
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Several scan intervals without an event counts as silence
pub const QUIET_PERIOD: Duration = Duration::from_millis(400);

/// Get the path to the stub worker binary
///
/// Automatically builds the binary on first call if it doesn't exist.
/// Uses OnceLock to ensure the build happens only once per test run.
pub fn worker_binary() -> PathBuf {
    use std::process::Command;
    use std::sync::OnceLock;

    static BINARY_PATH: OnceLock<PathBuf> = OnceLock::new();

    BINARY_PATH
        .get_or_init(|| {
            let manifest_dir = env!("CARGO_MANIFEST_DIR");
            let workspace_root = std::path::Path::new(manifest_dir)
                .parent()
                .and_then(|crates| crates.parent())
                .expect("crate directory should sit inside the workspace");
            let binary_path = workspace_root.join("target/debug/notifymux-test-worker");

            if !binary_path.exists() {
                eprintln!("Building notifymux-test-worker binary (one-time)...");
                let status = Command::new("cargo")
                    .args(["build", "--package", "notifymux-test-worker"])
                    .current_dir(workspace_root)
                    .status()
                    .expect("Failed to spawn cargo build");

                if !status.success() {
                    panic!("Failed to build notifymux-test-worker binary");
                }
            }

            binary_path
        })
        .clone()
}

/// Default test configuration: fast polling, stock timeouts
pub fn worker_config() -> SupervisorConfig {
    SupervisorConfig::builder(worker_binary())
        .poll_interval_ms(POLL_INTERVAL_MS)
        .build()
}

/// Test configuration with extra worker flags for fault injection
pub fn worker_config_with(args: &[&str]) -> SupervisorConfig {
    let mut builder = SupervisorConfig::builder(worker_binary()).poll_interval_ms(POLL_INTERVAL_MS);
    for arg in args {
        builder = builder.worker_arg(*arg);
    }
    builder.build()
}

/// Spawn a healthy worker or fail the test
pub async fn spawn_worker() -> Supervisor {
    Supervisor::spawn(worker_config())
        .await
        .expect("stub worker should spawn")
}

/// The worker canonicalizes watch roots, so event paths come back
/// canonicalized too; compare against this form.
pub fn canonical(dir: &TempDir) -> PathBuf {
    dir.path()
        .canonicalize()
        .expect("temp directory should canonicalize")
}

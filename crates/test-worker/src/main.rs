//! Stub watcher worker for exercising the supervisor end to end
//!
//! Speaks the complete wire protocol over stdin/stdout with a naive polling
//! scanner behind it, plus flags that inject the failure modes a supervisor
//! has to survive: late or missing readiness, initialization errors,
//! mid-session crashes, responses nobody asked for, and output that does
//! not decode.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod scanner;

use anyhow::{Context, Result};
use clap::Parser;
use notifymux_protocol::{
    encode, FrameReader, FrameWriter, Request, WatchEvent, WatchId, WorkerMessage, READY_MARKER,
};
use scanner::WatchTable;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "notifymux-test-worker")]
#[command(about = "Protocol-complete stub worker for supervisor tests")]
struct Args {
    /// Scan interval in milliseconds
    #[arg(long, default_value_t = 50)]
    poll_interval: u64,

    /// Delay the readiness announcement by this many milliseconds
    #[arg(long, default_value_t = 0)]
    ready_delay_ms: u64,

    /// Never announce readiness; absorb input forever
    #[arg(long)]
    never_ready: bool,

    /// Report this initialization error and exit instead of starting
    #[arg(long)]
    fail_init: Option<String>,

    /// Exit abruptly when the first watch request arrives
    #[arg(long)]
    crash_on_watch: bool,

    /// Exit abruptly this many milliseconds after acknowledging a watch
    /// (0 disables)
    #[arg(long, default_value_t = 0)]
    crash_after_watch_ms: u64,

    /// Answer unwatch requests with a not-found rejection after this many
    /// milliseconds (0 disables)
    #[arg(long, default_value_t = 0)]
    reject_unwatch_after_ms: u64,

    /// Emit an out-of-band watcherError with this text once ready
    #[arg(long)]
    announce_error: Option<String>,

    /// Emit a response for a request id nobody sent
    #[arg(long)]
    rogue_response: bool,

    /// Emit one line of undecodable bytes once ready, then idle
    #[arg(long)]
    garbage_frame: bool,

    /// Emit this many synthetic one-event batches after each watch ack
    #[arg(long, default_value_t = 0)]
    echo_batches: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut stdout = tokio::io::stdout();

    if let Some(description) = &args.fail_init {
        let frame = encode(&WorkerMessage::WatcherError {
            description: description.clone(),
        })?;
        stdout.write_all(frame.as_bytes()).await?;
        stdout.flush().await?;
        eprintln!("initialization failed: {description}");
        std::process::exit(1);
    }

    if args.ready_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.ready_delay_ms)).await;
    }

    if args.never_ready {
        info!("configured to never announce readiness");
        let mut input = FrameReader::new(tokio::io::stdin());
        while input.next_line().await?.is_some() {}
        return Ok(());
    }

    stdout
        .write_all(format!("{READY_MARKER}\n").as_bytes())
        .await?;
    stdout.flush().await?;
    info!("ready, poll interval {}ms", args.poll_interval);

    if args.garbage_frame {
        info!("emitting an undecodable line");
        stdout.write_all(b"\xff\xfe garbage \xff\n").await?;
        stdout.flush().await?;
        let mut input = FrameReader::new(tokio::io::stdin());
        while input.next_line().await?.is_some() {}
        return Ok(());
    }

    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_writer(frames_rx, stdout));

    if let Some(description) = &args.announce_error {
        let _ = frames_tx.send(WorkerMessage::WatcherError {
            description: description.clone(),
        });
    }
    if args.rogue_response {
        let _ = frames_tx.send(WorkerMessage::OkResponse {
            request_id: 999_999,
        });
    }

    let table = scanner::new_table();
    let scanner_stop = Arc::new(AtomicBool::new(false));
    scanner::start(
        Arc::clone(&table),
        Duration::from_millis(args.poll_interval),
        frames_tx.clone(),
        Arc::clone(&scanner_stop),
    );

    serve(&table, &frames_tx, &args).await?;

    // Let the writer drain anything the scanner already queued
    scanner_stop.store(true, Ordering::Relaxed);
    drop(frames_tx);
    writer.await.context("writer task panicked")??;
    Ok(())
}

/// Handle requests until stdin closes
async fn serve(
    table: &WatchTable,
    frames: &mpsc::UnboundedSender<WorkerMessage>,
    args: &Args,
) -> Result<()> {
    let mut input = FrameReader::new(tokio::io::stdin());
    loop {
        let request = match input.next_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(error) => {
                warn!("ignoring unreadable input line: {error}");
                continue;
            }
        };
        match request {
            Request::Watch {
                request_id,
                watch_id,
                root,
            } => {
                if args.crash_on_watch {
                    eprintln!("synthetic crash while handling watch {watch_id}");
                    std::process::exit(7);
                }
                match add_watch(table, watch_id, &root) {
                    Ok(canonical_root) => {
                        debug!(watch_id, root = %canonical_root.display(), "watching");
                        let _ = frames.send(WorkerMessage::OkResponse { request_id });
                        send_echo_batches(frames, watch_id, &canonical_root, args.echo_batches);
                        if args.crash_after_watch_ms > 0 {
                            schedule_crash(args.crash_after_watch_ms, watch_id);
                        }
                    }
                    Err(description) => {
                        let _ = frames.send(WorkerMessage::ErrorResponse {
                            request_id,
                            description,
                        });
                    }
                }
            }
            Request::Unwatch {
                request_id,
                watch_id,
            } => {
                if args.reject_unwatch_after_ms > 0 {
                    // Answer as a worker whose table was already cleared
                    // by an unwatch-all would
                    tokio::time::sleep(Duration::from_millis(args.reject_unwatch_after_ms)).await;
                    let _ = frames.send(WorkerMessage::ErrorResponse {
                        request_id,
                        description: format!("No watch found for id {watch_id}"),
                    });
                    continue;
                }
                let mut entries = scanner::lock_table(table);
                let before = entries.len();
                entries.retain(|entry| entry.watch_id != watch_id);
                let response = if entries.len() < before {
                    debug!(watch_id, "unwatched");
                    WorkerMessage::OkResponse { request_id }
                } else {
                    WorkerMessage::ErrorResponse {
                        request_id,
                        description: format!("No watch found for id {watch_id}"),
                    }
                };
                drop(entries);
                let _ = frames.send(response);
            }
            Request::UnwatchAll { request_id } => {
                scanner::lock_table(table).clear();
                debug!("unwatched everything");
                let _ = frames.send(WorkerMessage::OkResponse { request_id });
            }
        }
    }
    debug!("stdin closed, shutting down");
    Ok(())
}

/// Register a watch, reporting back the canonical root all of its event
/// paths will be under
fn add_watch(
    table: &WatchTable,
    watch_id: WatchId,
    root: &Path,
) -> std::result::Result<PathBuf, String> {
    let root = root
        .canonicalize()
        .map_err(|_| format!("No path was found for {}", root.display()))?;
    let entry = scanner::snapshot_entry(watch_id, root.clone());
    scanner::lock_table(table).push(entry);
    Ok(root)
}

/// Arrange an abrupt exit shortly after a watch was acknowledged
fn schedule_crash(delay_ms: u64, watch_id: WatchId) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        eprintln!("synthetic crash after acknowledging watch {watch_id}");
        std::process::exit(7);
    });
}

fn send_echo_batches(
    frames: &mpsc::UnboundedSender<WorkerMessage>,
    watch_id: WatchId,
    root: &Path,
    count: u64,
) {
    for index in 0..count {
        let batch = WorkerMessage::WatchEvents {
            watch_id,
            events: vec![WatchEvent::Created {
                path: root.join(format!("synthetic-{index}")),
            }],
        };
        let _ = frames.send(batch);
    }
}

/// All frames leave through one task, so they never interleave
async fn run_writer(
    mut frames: mpsc::UnboundedReceiver<WorkerMessage>,
    stdout: tokio::io::Stdout,
) -> Result<()> {
    let mut writer = FrameWriter::new(stdout);
    while let Some(frame) = frames.recv().await {
        writer.send(&frame).await.context("writing frame")?;
    }
    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
}

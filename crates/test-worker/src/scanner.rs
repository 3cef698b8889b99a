//! Polling directory scanner behind the protocol loop
//!
//! Deliberately naive: a snapshot of paths, sizes, and mtimes per watch,
//! diffed on an interval. Enough to produce real events for every protocol
//! path without pretending to be a production watcher backend.

use notifymux_protocol::{WatchEvent, WatchId, WorkerMessage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

type Snapshot = HashMap<PathBuf, Stamp>;

// Size is part of the stamp because mtime alone misses rewrites that land
// within one filesystem timestamp tick
#[derive(Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
    is_dir: bool,
}

/// One active watch with its last-seen directory state
pub struct WatchEntry {
    pub watch_id: WatchId,
    pub root: PathBuf,
    snapshot: Snapshot,
}

pub type WatchTable = Arc<Mutex<Vec<WatchEntry>>>;

pub fn new_table() -> WatchTable {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn lock_table(table: &WatchTable) -> MutexGuard<'_, Vec<WatchEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build an entry whose baseline is the directory as it stands right now.
///
/// Taking the baseline before the watch is acknowledged guarantees that
/// files already present never show up as created.
pub fn snapshot_entry(watch_id: WatchId, root: PathBuf) -> WatchEntry {
    let snapshot = scan(&root);
    WatchEntry {
        watch_id,
        root,
        snapshot,
    }
}

/// Start the polling thread. It drops its `sink` clone and exits within
/// one interval of `stop` being set, which lets the writer see the frame
/// channel close during shutdown.
pub fn start(
    table: WatchTable,
    interval: Duration,
    sink: mpsc::UnboundedSender<WorkerMessage>,
    stop: Arc<AtomicBool>,
) {
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut entries = lock_table(&table);
        for entry in entries.iter_mut() {
            let current = scan(&entry.root);
            let events = diff(&entry.snapshot, &current);
            entry.snapshot = current;
            if events.is_empty() {
                continue;
            }
            let batch = WorkerMessage::WatchEvents {
                watch_id: entry.watch_id,
                events,
            };
            if sink.send(batch).is_err() {
                return;
            }
        }
    });
}

fn scan(root: &Path) -> Snapshot {
    let mut snapshot = Snapshot::new();
    walk(root, &mut snapshot);
    snapshot
}

fn walk(dir: &Path, snapshot: &mut Snapshot) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let stamp = Stamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            is_dir: metadata.is_dir(),
        };
        snapshot.insert(path.clone(), stamp);
        if stamp.is_dir {
            walk(&path, snapshot);
        }
    }
}

fn diff(before: &Snapshot, after: &Snapshot) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for (path, stamp) in after {
        match before.get(path) {
            None => events.push(WatchEvent::Created { path: path.clone() }),
            // Directory mtimes move whenever children change; those child
            // changes are reported on their own
            Some(previous) if previous != stamp && !stamp.is_dir => {
                events.push(WatchEvent::Modified { path: path.clone() });
            }
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            events.push(WatchEvent::Deleted { path: path.clone() });
        }
    }
    events.sort_by(|a, b| a.path().cmp(b.path()));
    events
}

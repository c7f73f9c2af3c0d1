//! Concurrent task tracking
//!
//! Rust has no runtime-wide list of live tasks to dump, so tasks that should
//! be leak-checked register themselves here for as long as their body runs:
//! [`spawn`] for OS threads, [`track`] for futures on any executor, or a
//! bare [`register`] guard for anything else.
//!
//! Optionally the OS threads of the whole process (from procfs) are folded
//! into the same signature list.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use crate::procfs::ProcFs;

/// Signatures containing any of these are always-present housekeeping
/// threads, never leaks
pub const IGNORED_TASKS: &[&str] = &[
    // allocator background purging
    "\"jemalloc_bg_thd\"",
    // signal delivery
    "\"ctrl-c\"",
    "\"signal-hook\"",
    // log writers (comm is truncated to 15 bytes)
    "\"tracing-appende\"",
    // GLib main loop and D-Bus worker, started lazily by linked C libraries
    "\"gmain\"",
    "\"gdbus\"",
];

#[derive(Debug)]
struct TaskEntry {
    name: String,
    location: &'static Location<'static>,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: OnceLock<Mutex<BTreeMap<u64, TaskEntry>>> = OnceLock::new();

fn registry() -> MutexGuard<'static, BTreeMap<u64, TaskEntry>> {
    REGISTRY
        .get_or_init(|| Mutex::new(BTreeMap::new()))
        .lock()
        // poisoned only by a panicking task body; the map is still consistent
        .unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a task registered until dropped
#[derive(Debug)]
#[must_use = "the task is deregistered as soon as the guard is dropped"]
pub struct TaskGuard {
    id: u64,
}

impl TaskGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        registry().remove(&self.id);
    }
}

/// Register a live task, attributed to the caller's source location
#[track_caller]
pub fn register(name: impl Into<String>) -> TaskGuard {
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let entry = TaskEntry {
        name: name.into(),
        location: Location::caller(),
    };
    tracing::trace!("Registered task #{} {:?} at {}", id, entry.name, entry.location);
    registry().insert(id, entry);
    TaskGuard { id }
}

/// Spawn a named OS thread that stays registered until its closure returns
///
/// The task is registered before the thread starts, so a check taken right
/// after `spawn` already sees it.
#[track_caller]
pub fn spawn<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    let guard = register(name.clone());
    thread::Builder::new().name(name).spawn(move || {
        let _guard = guard;
        f()
    })
}

/// Wrap a future so it stays registered until it completes or is dropped
///
/// Works with any executor: hand the returned future to `tokio::spawn`,
/// `block_on`, etc.
#[track_caller]
pub fn track<F>(name: impl Into<String>, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let guard = register(name);
    async move {
        let _guard = guard;
        future.await
    }
}

/// Signatures of every registered task, in registration order
pub fn registered_tasks() -> Vec<String> {
    registry()
        .iter()
        .map(|(id, entry)| {
            format!(
                "task #{} \"{}\" spawned at {}",
                id, entry.name, entry.location
            )
        })
        .collect()
}

/// Signatures of this process's OS threads, except the calling one
///
/// Threads that exit mid-scan are skipped; an unreadable task directory
/// yields nothing.
pub fn os_threads(procfs: &ProcFs) -> Vec<String> {
    let own_tid = nix::unistd::gettid().as_raw();
    let entries = match std::fs::read_dir(procfs.self_task_dir()) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot list threads: {}", e);
            return Vec::new();
        }
    };

    let mut threads = Vec::new();
    for entry in entries.flatten() {
        let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if tid == own_tid {
            continue;
        }
        match procfs.read_thread_name(tid) {
            Ok(comm) => threads.push(format!("thread {} \"{}\"", tid, comm)),
            Err(e) => tracing::trace!("Skipping thread {}: {}", tid, e),
        }
    }
    threads
}

/// Tasks worth leak-checking: trimmed, denylist applied, sorted
pub fn interesting_tasks(procfs: &ProcFs, scan_os_threads: bool) -> Vec<String> {
    let mut tasks = registered_tasks();
    if scan_os_threads {
        tasks.extend(os_threads(procfs));
    }

    let mut tasks: Vec<String> = tasks
        .into_iter()
        .map(|sig| sig.trim().to_string())
        .filter(|sig| !sig.is_empty() && !is_ignored(sig))
        .collect();
    tasks.sort();
    tasks
}

fn is_ignored(signature: &str) -> bool {
    IGNORED_TASKS.iter().any(|pattern| signature.contains(pattern))
}

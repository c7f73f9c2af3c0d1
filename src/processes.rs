//! Descendant process enumeration
//!
//! Snapshot the process table, then walk it. The table keeps changing while
//! it is read, so a process can exit or a pid can be reused between the two
//! steps. Good enough for controlled test environments, not for adversarial
//! or heavily forking production processes.

use std::collections::{HashMap, HashSet};

use crate::error::{LeakCheckError, Result};
use crate::procfs::ProcFs;
use crate::report::LeakedProcess;

/// Maximum parent→child depth followed (guards against corrupt parent data)
const MAX_TREE_DEPTH: usize = 1024;

/// Every transitive descendant of `pid` that is still running, sorted
///
/// Processes whose stat cannot be read (usually because they exited
/// mid-scan) are skipped, and so are zombies: they have exited and only
/// wait to be reaped. Only failing to list the process table is an error.
pub fn descendants(procfs: &ProcFs, pid: i32) -> Result<Vec<i32>> {
    let pids = procfs
        .list_pids()
        .map_err(|source| LeakCheckError::ListProcesses {
            path: procfs.root().to_path_buf(),
            source,
        })?;

    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for candidate in pids {
        match procfs.read_stat(candidate) {
            // A zombie's own children are already reparented, so it has none
            Ok(stat) if stat.is_zombie() => {
                tracing::trace!("Skipping exited pid {} ({})", candidate, stat.name)
            }
            Ok(stat) => children.entry(stat.ppid).or_default().push(candidate),
            Err(e) => tracing::trace!("Skipping pid {}: {}", candidate, e),
        }
    }

    let mut found = collect_descendants(&children, pid);
    found.sort_unstable();
    Ok(found)
}

/// Depth-first walk of the parent→children map starting below `root`
fn collect_descendants(children: &HashMap<i32, Vec<i32>>, root: i32) -> Vec<i32> {
    let mut found = Vec::new();
    let mut visited = HashSet::from([root]);
    let mut stack = vec![(root, 0usize)];

    while let Some((pid, depth)) = stack.pop() {
        if depth >= MAX_TREE_DEPTH {
            tracing::debug!("Process tree deeper than {} below pid {}", MAX_TREE_DEPTH, root);
            continue;
        }
        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if visited.insert(child) {
                found.push(child);
                stack.push((child, depth + 1));
            }
        }
    }

    found
}

/// Pid plus its name if the process is still around to ask
pub fn describe_pid(procfs: &ProcFs, pid: i32) -> LeakedProcess {
    LeakedProcess {
        pid,
        name: procfs.read_stat(pid).ok().map(|stat| stat.name),
    }
}

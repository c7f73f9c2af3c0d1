//! Read-only access to procfs
//!
//! Every path is resolved against a configurable root so that tests can point
//! the enumerators at a synthetic tree instead of the live `/proc`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name, state and parent of one process, from `/proc/<pid>/stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStat {
    pub name: String,
    /// Single-letter scheduler state (`R`, `S`, `Z`, ...)
    pub state: char,
    pub ppid: i32,
}

impl ProcessStat {
    /// Parse the contents of a `stat` file
    ///
    /// Format: `pid (comm) state ppid ...`. The command name may itself
    /// contain spaces and parentheses, so it spans from the first `(` to the
    /// last `)`.
    ///
    /// # Example
    /// ```
    /// use leakcheck::procfs::ProcessStat;
    ///
    /// let stat = ProcessStat::parse("4242 (my (odd) cmd) S 17 4242 4242 0").unwrap();
    /// assert_eq!(stat.name, "my (odd) cmd");
    /// assert_eq!(stat.state, 'S');
    /// assert_eq!(stat.ppid, 17);
    /// ```
    pub fn parse(contents: &str) -> Option<Self> {
        let open = contents.find('(')?;
        let close = contents.rfind(')')?;
        if close < open {
            return None;
        }

        let name = contents[open + 1..close].to_string();
        let mut fields = contents[close + 1..].split_whitespace();
        let state = fields.next()?.chars().next()?;
        let ppid = fields.next()?.parse().ok()?;

        Some(Self { name, state, ppid })
    }

    /// Exited but not yet reaped by its parent
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Handle on a procfs mount
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one entry per open descriptor of this process
    pub fn self_fd_dir(&self) -> PathBuf {
        self.root.join("self").join("fd")
    }

    /// Directory holding one entry per thread of this process
    pub fn self_task_dir(&self) -> PathBuf {
        self.root.join("self").join("task")
    }

    /// Pids of every process visible under the root
    ///
    /// Non-numeric entries (`self`, `sys`, ...) are skipped. Only failing to
    /// read the root itself is an error.
    pub fn list_pids(&self) -> io::Result<Vec<i32>> {
        let mut pids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else {
                continue;
            };
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    pub fn read_stat(&self, pid: i32) -> io::Result<ProcessStat> {
        let path = self.root.join(pid.to_string()).join("stat");
        let contents = fs::read_to_string(&path)?;
        ProcessStat::parse(&contents).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed stat in {}", path.display()),
            )
        })
    }

    /// `comm` of one thread of this process
    pub fn read_thread_name(&self, tid: i32) -> io::Result<String> {
        let path = self.self_task_dir().join(tid.to_string()).join("comm");
        Ok(fs::read_to_string(path)?.trim().to_string())
    }
}

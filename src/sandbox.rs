//! Private temp directory for the duration of a check
//!
//! `TMPDIR` is pointed at a fresh empty directory, so anything the workload
//! creates through `std::env::temp_dir()` or `tempfile` lands there and can
//! simply be listed afterwards. A well-behaved workload removes its own temp
//! files, so whatever is left over is a leak.
//!
//! `TMPDIR` is process-wide. Two sandboxes alive at once in the same process
//! clobber each other's redirection; callers must not overlap checks.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{LeakCheckError, Result};

/// Environment variable consulted for the temp location
pub const TEMP_DIR_ENV: &str = "TMPDIR";

/// Temp location override; restored on [`release`](Sandbox::release) or drop
#[derive(Debug)]
pub struct Sandbox {
    dir: Option<TempDir>,
    previous: Option<OsString>,
}

impl Sandbox {
    /// Create the sandbox directory and redirect `TMPDIR` to it
    pub fn acquire() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("leakcheck")
            .tempdir()
            .map_err(LeakCheckError::CreateSandbox)?;

        let previous = std::env::var_os(TEMP_DIR_ENV);
        std::env::set_var(TEMP_DIR_ENV, dir.path());
        tracing::debug!("Redirected {} to {}", TEMP_DIR_ENV, dir.path().display());

        Ok(Self {
            dir: Some(dir),
            previous,
        })
    }

    /// Sandbox directory (empty path once released)
    pub fn path(&self) -> &Path {
        self.dir.as_ref().map(TempDir::path).unwrap_or(Path::new(""))
    }

    /// `TMPDIR` as it was before the sandbox, `None` if it was unset
    pub fn previous(&self) -> Option<&OsStr> {
        self.previous.as_deref()
    }

    /// Every path below the sandbox root, sorted
    pub fn leaked_files(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };

        WalkDir::new(dir.path())
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.into_path()),
                Err(e) => {
                    tracing::trace!("Skipping unreadable sandbox entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Restore `TMPDIR` and delete the sandbox with everything in it
    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        match &self.previous {
            Some(value) => std::env::set_var(TEMP_DIR_ENV, value),
            None => std::env::remove_var(TEMP_DIR_ENV),
        }

        let path = dir.path().to_path_buf();
        dir.close()
            .map_err(|source| LeakCheckError::RemoveSandbox { path, source })
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!("{}", e);
        }
    }
}

//! Open file descriptor enumeration
//!
//! A descriptor number that is closed and reused between two snapshots is
//! indistinguishable from one that was never touched; this only catches
//! numbers that appear.

use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::io;
use std::os::fd::AsRawFd;

use crate::error::{LeakCheckError, Result};
use crate::procfs::ProcFs;

/// Sorted descriptor numbers currently open in this process
///
/// The directory handle used for the listing is itself an open descriptor;
/// it is left out so it never shows up as a leak.
pub fn open_fds(procfs: &ProcFs) -> Result<Vec<i32>> {
    let path = procfs.self_fd_dir();
    let list_error = |err: nix::Error| LeakCheckError::ListFds {
        path: path.clone(),
        source: io::Error::from(err),
    };

    let mut dir = Dir::open(
        path.as_path(),
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(list_error)?;
    let own_fd = dir.as_raw_fd();

    let mut fds = Vec::new();
    for entry in dir.iter() {
        let entry = entry.map_err(list_error)?;
        let Some(fd) = entry
            .file_name()
            .to_str()
            .ok()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue; // "." and ".."
        };
        if fd != own_fd {
            fds.push(fd);
        }
    }

    fds.sort_unstable();
    tracing::trace!("{} open fds", fds.len());
    Ok(fds)
}

//! Error types for leak checking
//!
//! Only infrastructure failures live here. A leak is not an error: it is a
//! [`Finding`](crate::report::Finding) handed to the reporter.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that make a leak check untrustworthy
#[derive(Error, Debug)]
pub enum LeakCheckError {
    #[error("Failed to list open file descriptors in {path}: {source}")]
    ListFds {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list processes in {path}: {source}")]
    ListProcesses {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create temp sandbox: {0}")]
    CreateSandbox(#[source] io::Error),

    #[error("Failed to remove temp sandbox {path}: {source}")]
    RemoveSandbox {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, LeakCheckError>;

//! Leakcheck - resource leak detection for test bodies
//!
//! Wraps a workload and reports whatever it left behind: registered tasks
//! (and optionally OS threads) still running, file descriptors still open,
//! descendant processes still alive, and temp files still on disk.
//!
//! ```no_run
//! let sum = leakcheck::check(|| {
//!     let worker = leakcheck::tasks::spawn("adder", || 2 + 2).unwrap();
//!     worker.join().unwrap()
//! });
//! assert_eq!(sum, 4);
//! ```
//!
//! Linux only: all introspection goes through procfs. The temp-file check
//! redirects the process-wide `TMPDIR`, so checks must never overlap within
//! one process.

pub mod check;
pub mod cli;
pub mod config;
pub mod error;
pub mod fds;
pub mod processes;
pub mod procfs;
pub mod report;
pub mod sandbox;
pub mod set_diff;
pub mod tasks;

pub use check::{check, check_with, LeakCheck};
pub use config::CheckConfig;
pub use error::LeakCheckError;
pub use report::{CollectingReporter, Finding, LeakedProcess, Reporter, TracingReporter};

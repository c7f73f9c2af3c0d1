//! Reporting leak findings
//!
//! The detector never decides whether a leak fails anything. It hands each
//! category's finding to a [`Reporter`], which is typically a thin adapter
//! over the test framework's failure mechanism.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::LeakCheckError;

/// A process that appeared during the check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakedProcess {
    pub pid: i32,
    /// `None` once the process is gone or its stat is unreadable
    pub name: Option<String>,
}

impl fmt::Display for LeakedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", self.pid, name),
            None => write!(f, "{}", self.pid),
        }
    }
}

/// Resources of one category present after the workload but not before
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "leaked", rename_all = "snake_case")]
pub enum Finding {
    Fds(Vec<i32>),
    Processes(Vec<LeakedProcess>),
    Tasks(Vec<String>),
    TempFiles(Vec<PathBuf>),
}

impl Finding {
    /// Number of leaked resources in this finding
    pub fn len(&self) -> usize {
        match self {
            Finding::Fds(fds) => fds.len(),
            Finding::Processes(procs) => procs.len(),
            Finding::Tasks(tasks) => tasks.len(),
            Finding::TempFiles(paths) => paths.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn category(&self) -> &'static str {
        match self {
            Finding::Fds(_) => "fds",
            Finding::Processes(_) => "child processes",
            Finding::Tasks(_) => "tasks",
            Finding::TempFiles(_) => "temp files",
        }
    }
}

fn write_list<T, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    T: fmt::Display,
    I: IntoIterator<Item = T>,
{
    write!(f, "[")?;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Leaked {}: ", self.category())?;
        match self {
            Finding::Fds(fds) => write_list(f, fds),
            Finding::Processes(procs) => write_list(f, procs),
            Finding::Tasks(tasks) => write_list(f, tasks),
            Finding::TempFiles(paths) => write_list(f, paths.iter().map(|p| p.display())),
        }
    }
}

/// Receiver of leak check results
///
/// `report_finding` may be called once per category in a single check;
/// `report_fatal` means the check itself could not inspect the process and
/// its result must not be trusted.
pub trait Reporter {
    fn report_finding(&mut self, finding: &Finding);
    fn report_fatal(&mut self, error: &LeakCheckError);
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report_finding(&mut self, finding: &Finding) {
        (**self).report_finding(finding);
    }

    fn report_fatal(&mut self, error: &LeakCheckError) {
        (**self).report_fatal(error);
    }
}

/// Keeps everything it is told, for inspection after the check
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub findings: Vec<Finding>,
    pub fatal: Vec<String>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// No findings and no fatal errors
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.fatal.is_empty()
    }

    pub fn fds(&self) -> Option<&[i32]> {
        self.findings.iter().find_map(|f| match f {
            Finding::Fds(fds) => Some(fds.as_slice()),
            _ => None,
        })
    }

    pub fn processes(&self) -> Option<&[LeakedProcess]> {
        self.findings.iter().find_map(|f| match f {
            Finding::Processes(procs) => Some(procs.as_slice()),
            _ => None,
        })
    }

    pub fn tasks(&self) -> Option<&[String]> {
        self.findings.iter().find_map(|f| match f {
            Finding::Tasks(tasks) => Some(tasks.as_slice()),
            _ => None,
        })
    }

    pub fn temp_files(&self) -> Option<&[PathBuf]> {
        self.findings.iter().find_map(|f| match f {
            Finding::TempFiles(paths) => Some(paths.as_slice()),
            _ => None,
        })
    }
}

impl Reporter for CollectingReporter {
    fn report_finding(&mut self, finding: &Finding) {
        self.findings.push(finding.clone());
    }

    fn report_fatal(&mut self, error: &LeakCheckError) {
        self.fatal.push(error.to_string());
    }
}

impl fmt::Display for CollectingReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.fatal {
            writeln!(f, "Leak check failed: {}", error)?;
        }
        for finding in &self.findings {
            writeln!(f, "{}", finding)?;
        }
        Ok(())
    }
}

/// Logs findings through `tracing` and counts them
#[derive(Debug, Default)]
pub struct TracingReporter {
    pub findings: usize,
    pub fatal: usize,
}

impl Reporter for TracingReporter {
    fn report_finding(&mut self, finding: &Finding) {
        self.findings += 1;
        tracing::warn!(category = finding.category(), count = finding.len(), "{}", finding);
    }

    fn report_fatal(&mut self, error: &LeakCheckError) {
        self.fatal += 1;
        tracing::error!("Leak check failed: {}", error);
    }
}

//! Leak check orchestration
//!
//! [`LeakCheck::start`] snapshots the process before the workload,
//! [`LeakCheck::finish`] snapshots it again, diffs the two and reports one
//! finding per leaking category.
//!
//! Only one check may be in flight per process: the temp sandbox overrides
//! the process-wide `TMPDIR`, and the fd and process snapshots see whatever
//! else the process is doing. Tests using this must not run concurrently
//! with each other (use `serial_test` or `--test-threads=1`).

use std::path::Path;
use std::time::Instant;

use crate::config::CheckConfig;
use crate::error::LeakCheckError;
use crate::fds::open_fds;
use crate::processes::{describe_pid, descendants};
use crate::procfs::ProcFs;
use crate::report::{CollectingReporter, Finding, Reporter};
use crate::sandbox::Sandbox;
use crate::set_diff::set_minus;
use crate::tasks::interesting_tasks;

/// Resource sets captured before the workload
#[derive(Debug)]
struct Baseline {
    tasks: Vec<String>,
    fds: Vec<i32>,
    processes: Vec<i32>,
}

/// An in-flight leak check
///
/// # Example
/// ```no_run
/// use leakcheck::{CollectingReporter, LeakCheck};
///
/// let check = LeakCheck::start(CollectingReporter::new());
/// // ... workload ...
/// let reporter = check.finish();
/// assert!(reporter.is_clean(), "{}", reporter);
/// ```
#[derive(Debug)]
pub struct LeakCheck<R: Reporter> {
    reporter: R,
    config: CheckConfig,
    procfs: ProcFs,
    pid: i32,
    baseline: Option<Baseline>,
    sandbox: Option<Sandbox>,
}

impl<R: Reporter> LeakCheck<R> {
    /// Start a check with the default configuration
    pub fn start(reporter: R) -> Self {
        Self::start_with_config(reporter, CheckConfig::default())
    }

    /// Capture the baseline and redirect temp files into a sandbox
    ///
    /// If anything cannot be captured the error goes to
    /// [`Reporter::report_fatal`] and the returned check is inert: `finish`
    /// only hands the reporter back. Callers should treat a fatal report as
    /// "do not run the workload".
    pub fn start_with_config(reporter: R, config: CheckConfig) -> Self {
        let procfs = ProcFs::new(&config.proc_root);
        let pid = std::process::id() as i32;

        let mut check = Self {
            reporter,
            config,
            procfs,
            pid,
            baseline: None,
            sandbox: None,
        };

        match check.capture() {
            Ok((baseline, sandbox)) => {
                tracing::debug!(
                    fds = baseline.fds.len(),
                    processes = baseline.processes.len(),
                    tasks = baseline.tasks.len(),
                    "Leak check baseline captured"
                );
                check.baseline = Some(baseline);
                check.sandbox = Some(sandbox);
            }
            Err(e) => check.reporter.report_fatal(&e),
        }

        check
    }

    fn capture(&self) -> Result<(Baseline, Sandbox), LeakCheckError> {
        self.config.validate()?;
        let fds = open_fds(&self.procfs)?;
        let processes = descendants(&self.procfs, self.pid)?;
        let tasks = interesting_tasks(&self.procfs, self.config.scan_os_threads);
        let sandbox = Sandbox::acquire()?;
        Ok((Baseline { tasks, fds, processes }, sandbox))
    }

    /// Whether the baseline was captured and `finish` will actually check
    pub fn is_active(&self) -> bool {
        self.baseline.is_some()
    }

    /// Path of the temp sandbox, while the check is active
    pub fn sandbox_path(&self) -> Option<&Path> {
        self.sandbox.as_ref().map(Sandbox::path)
    }

    /// Diff against the baseline, report findings, release the sandbox
    ///
    /// Every category is checked and reported independently. The sandbox is
    /// released last, whatever happened before.
    pub fn finish(self) -> R {
        let Self {
            mut reporter,
            config,
            procfs,
            pid,
            baseline,
            sandbox,
        } = self;

        if let Some(baseline) = baseline {
            check_fds(&procfs, &baseline, &mut reporter);
            check_processes(&procfs, pid, &baseline, &mut reporter);
            check_tasks(&procfs, &config, &baseline, &mut reporter);
            if let Some(sandbox) = &sandbox {
                check_temp_files(sandbox, &mut reporter);
            }
        }

        if let Some(sandbox) = sandbox {
            if let Err(e) = sandbox.release() {
                reporter.report_fatal(&e);
            }
        }

        reporter
    }
}

fn check_fds<R: Reporter>(procfs: &ProcFs, baseline: &Baseline, reporter: &mut R) {
    match open_fds(procfs) {
        Ok(after) => {
            let leaked = set_minus(&after, &baseline.fds);
            if !leaked.is_empty() {
                reporter.report_finding(&Finding::Fds(leaked));
            }
        }
        Err(e) => reporter.report_fatal(&e),
    }
}

fn check_processes<R: Reporter>(
    procfs: &ProcFs,
    pid: i32,
    baseline: &Baseline,
    reporter: &mut R,
) {
    match descendants(procfs, pid) {
        Ok(after) => {
            let leaked = set_minus(&after, &baseline.processes);
            if !leaked.is_empty() {
                let described = leaked
                    .into_iter()
                    .map(|pid| describe_pid(procfs, pid))
                    .collect();
                reporter.report_finding(&Finding::Processes(described));
            }
        }
        Err(e) => reporter.report_fatal(&e),
    }
}

/// Tasks may still be unwinding when the workload returns, so keep polling
/// until they are gone or the settle budget runs out
fn check_tasks<R: Reporter>(
    procfs: &ProcFs,
    config: &CheckConfig,
    baseline: &Baseline,
    reporter: &mut R,
) {
    let deadline = Instant::now() + config.settle_timeout;
    let mut polls = 0u32;

    loop {
        polls += 1;
        let current = interesting_tasks(procfs, config.scan_os_threads);
        let leaked = set_minus(&current, &baseline.tasks);
        if leaked.is_empty() {
            tracing::debug!("Tasks settled after {} polls", polls);
            return;
        }
        if Instant::now() < deadline {
            std::thread::sleep(config.poll_interval);
            continue;
        }
        reporter.report_finding(&Finding::Tasks(leaked));
        return;
    }
}

fn check_temp_files<R: Reporter>(sandbox: &Sandbox, reporter: &mut R) {
    let leaked = sandbox.leaked_files();
    if !leaked.is_empty() {
        reporter.report_finding(&Finding::TempFiles(leaked));
    }
}

/// Run `f` under a leak check and panic if anything leaked
///
/// Meant for test bodies:
/// ```no_run
/// #[test]
/// fn downloads_cleanly() {
///     leakcheck::check(|| {
///         // ... workload ...
///     });
/// }
/// ```
pub fn check<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    check_with(CheckConfig::default(), f)
}

/// [`check`] with an explicit configuration
pub fn check_with<F, T>(config: CheckConfig, f: F) -> T
where
    F: FnOnce() -> T,
{
    let leak_check = LeakCheck::start_with_config(CollectingReporter::new(), config);
    if !leak_check.is_active() {
        let reporter = leak_check.finish();
        panic!("{}", reporter);
    }

    let value = f();

    let reporter = leak_check.finish();
    if !reporter.is_clean() {
        panic!("{}", reporter);
    }
    value
}

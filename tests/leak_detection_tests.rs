// Leak detection across fds, child processes and temp files
//
// Every test here runs a full check, and a check sees the whole process, so
// they are all #[serial].

use leakcheck::{
    check, check_with, CheckConfig, CollectingReporter, Finding, LeakCheck, LeakCheckError, Reporter,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serial_test::serial;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::process::Command;
use std::time::Duration;

fn quick_config() -> CheckConfig {
    CheckConfig::default()
        .with_settle_timeout(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(10))
}

fn run<F: FnOnce()>(workload: F) -> CollectingReporter {
    let check = LeakCheck::start_with_config(CollectingReporter::new(), quick_config());
    assert!(check.is_active());
    workload();
    check.finish()
}

// ============================================================================
// No leaks
// ============================================================================

#[test]
#[serial]
fn test_clean_workload_reports_nothing() {
    let reporter = run(|| {
        let file = File::open("/dev/null").unwrap();
        drop(file);

        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();

        let worker = leakcheck::tasks::spawn("clean-worker", || 21 * 2).unwrap();
        assert_eq!(worker.join().unwrap(), 42);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        drop(tmp);
    });
    assert!(reporter.is_clean(), "{}", reporter);
}

#[test]
#[serial]
fn test_empty_workload_reports_nothing() {
    let reporter = run(|| std::thread::sleep(Duration::from_millis(100)));
    assert!(reporter.is_clean(), "{}", reporter);
}

// ============================================================================
// File descriptors
// ============================================================================

#[test]
#[serial]
fn test_leaked_fd_is_reported_by_number() {
    let mut leaked = None;
    let reporter = run(|| {
        leaked = Some(File::open("/dev/null").unwrap());
    });
    let leaked = leaked.unwrap();

    assert_eq!(reporter.fds(), Some(&[leaked.as_raw_fd()][..]));
    assert_eq!(reporter.findings.len(), 1);
}

#[test]
#[serial]
fn test_fd_opened_after_closing_earlier_one_is_reported() {
    let before = File::open("/dev/null").unwrap();
    let mut leaked = None;

    let reporter = run(|| {
        // Open first so the new descriptor cannot reuse the old number
        leaked = Some(File::open("/dev/null").unwrap());
        drop(before);
    });
    let leaked = leaked.unwrap();

    assert_eq!(reporter.fds(), Some(&[leaked.as_raw_fd()][..]));
}

#[test]
#[serial]
fn test_closing_preexisting_fd_is_not_a_leak() {
    let before = File::open("/dev/null").unwrap();
    let reporter = run(|| drop(before));
    assert!(reporter.is_clean(), "{}", reporter);
}

// ============================================================================
// Child processes
// ============================================================================

#[test]
#[serial]
fn test_leaked_child_is_reported_with_name() {
    let mut leaked = None;
    let reporter = run(|| {
        leaked = Some(Command::new("sleep").arg("30").spawn().unwrap());
    });
    let mut child = leaked.unwrap();

    let processes = reporter.processes().unwrap().to_vec();
    child.kill().unwrap();
    child.wait().unwrap();

    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].pid, child.id() as i32);
    assert_eq!(processes[0].name.as_deref(), Some("sleep"));
    assert_eq!(
        Finding::Processes(processes.clone()).to_string(),
        format!("Leaked child processes: [{} sleep]", child.id())
    );
}

#[test]
#[serial]
fn test_grandchild_is_reported() {
    let mut leaked = None;
    let reporter = run(|| {
        leaked = Some(
            Command::new("sh")
                .arg("-c")
                .arg("sleep 30; true")
                .spawn()
                .unwrap(),
        );
        // Give sh time to fork its sleep
        std::thread::sleep(Duration::from_millis(200));
    });
    let mut shell = leaked.unwrap();

    let pids: Vec<i32> = reporter
        .processes()
        .unwrap()
        .iter()
        .map(|p| p.pid)
        .collect();
    let names: Vec<Option<String>> = reporter
        .processes()
        .unwrap()
        .iter()
        .map(|p| p.name.clone())
        .collect();

    // Killing only the shell would orphan sleep to init
    for pid in &pids {
        let _ = kill(Pid::from_raw(*pid), Signal::SIGKILL);
    }
    shell.wait().unwrap();

    assert!(pids.contains(&(shell.id() as i32)));
    assert_eq!(pids.len(), 2, "expected sh and sleep, got {:?}", names);
    assert!(names.contains(&Some("sleep".to_string())));
}

#[test]
#[serial]
fn test_child_killed_inside_workload_is_not_a_leak() {
    let mut before = Command::new("sleep").arg("30").spawn().unwrap();
    let reporter = run(|| {
        before.kill().unwrap();
        before.wait().unwrap();
    });
    assert!(reporter.is_clean(), "{}", reporter);
}

#[test]
#[serial]
fn test_replacing_child_is_reported() {
    let mut before = Command::new("sleep").arg("30").spawn().unwrap();
    let mut replacement = None;
    let reporter = run(|| {
        before.kill().unwrap();
        before.wait().unwrap();
        replacement = Some(Command::new("sleep").arg("30").spawn().unwrap());
    });
    let mut replacement = replacement.unwrap();
    replacement.kill().unwrap();
    replacement.wait().unwrap();

    let processes = reporter.processes().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].pid, replacement.id() as i32);
}

// ============================================================================
// Temp files
// ============================================================================

#[test]
#[serial]
fn test_leaked_temp_file_is_reported() {
    let check = LeakCheck::start_with_config(CollectingReporter::new(), quick_config());
    let sandbox = check.sandbox_path().unwrap().to_path_buf();

    let leaked = std::env::temp_dir().join("testleak.txt");
    std::fs::write(&leaked, b"left behind").unwrap();

    let reporter = check.finish();
    assert!(leaked.starts_with(&sandbox));
    assert_eq!(reporter.temp_files(), Some(&[leaked][..]));
    assert!(!sandbox.exists());
}

#[test]
#[serial]
fn test_leaked_tempfile_crate_file_is_reported() {
    let reporter = run(|| {
        let (_file, _path) = tempfile::Builder::new()
            .prefix("testleak")
            .tempfile()
            .unwrap()
            .keep()
            .unwrap();
    });
    let files = reporter.temp_files().unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("testleak"));
}

#[test]
#[serial]
fn test_nested_temp_dirs_are_all_listed() {
    let reporter = run(|| {
        let root = std::env::temp_dir().join("outer");
        std::fs::create_dir_all(root.join("inner")).unwrap();
        std::fs::write(root.join("inner").join("file"), b"x").unwrap();
    });
    let files = reporter.temp_files().unwrap();
    assert_eq!(files.len(), 3);
    assert!(files[0].ends_with("outer"));
    assert!(files[1].ends_with("outer/inner"));
    assert!(files[2].ends_with("outer/inner/file"));
}

#[test]
#[serial]
fn test_temp_file_removed_by_workload_is_not_a_leak() {
    let reporter = run(|| {
        let path = std::env::temp_dir().join("scratch");
        std::fs::write(&path, b"transient").unwrap();
        std::fs::remove_file(&path).unwrap();
    });
    assert!(reporter.is_clean(), "{}", reporter);
}

// ============================================================================
// Reporting and cleanup
// ============================================================================

#[test]
#[serial]
fn test_every_category_reported_in_one_pass() {
    let mut fd = None;
    let mut child = None;
    let reporter = run(|| {
        fd = Some(File::open("/dev/null").unwrap());
        child = Some(Command::new("sleep").arg("30").spawn().unwrap());
        std::fs::write(std::env::temp_dir().join("leftover"), b"x").unwrap();
    });
    let mut child = child.unwrap();
    child.kill().unwrap();
    child.wait().unwrap();
    drop(fd);

    assert_eq!(reporter.findings.len(), 3, "{}", reporter);
    assert!(reporter.fds().is_some());
    assert!(reporter.processes().is_some());
    assert!(reporter.temp_files().is_some());
    assert!(reporter.fatal.is_empty());
}

#[test]
#[serial]
fn test_tmpdir_restored_after_findings() {
    let original = std::env::var_os("TMPDIR");
    let check = LeakCheck::start_with_config(CollectingReporter::new(), quick_config());
    let sandbox = check.sandbox_path().unwrap().to_path_buf();
    assert_eq!(std::env::var_os("TMPDIR"), Some(sandbox.clone().into_os_string()));
    std::fs::write(sandbox.join("leak"), b"x").unwrap();
    let reporter = check.finish();

    assert!(!reporter.is_clean());
    assert!(!sandbox.exists());
    assert_eq!(std::env::var_os("TMPDIR"), original);
}

#[test]
#[serial]
fn test_tmpdir_restored_after_clean_run() {
    let original = std::env::var_os("TMPDIR");
    let check = LeakCheck::start_with_config(CollectingReporter::new(), quick_config());
    let sandbox = check.sandbox_path().unwrap().to_path_buf();
    let reporter = check.finish();

    assert!(reporter.is_clean(), "{}", reporter);
    assert!(!sandbox.exists());
    assert_eq!(std::env::var_os("TMPDIR"), original);
}

#[test]
#[serial]
fn test_tmpdir_restored_when_workload_panics() {
    let original = std::env::var_os("TMPDIR");

    let result = std::panic::catch_unwind(|| {
        let check = LeakCheck::start_with_config(CollectingReporter::new(), quick_config());
        let sandbox = check.sandbox_path().unwrap().to_path_buf();
        if sandbox.exists() {
            panic!("workload failed");
        }
        check.finish()
    });

    assert!(result.is_err());
    assert_eq!(std::env::var_os("TMPDIR"), original);
}

#[test]
#[serial]
fn test_baseline_failure_is_fatal_and_inert() {
    let original = std::env::var_os("TMPDIR");
    let config = quick_config().with_proc_root("/nonexistent/leakcheck/proc");

    let check = LeakCheck::start_with_config(CollectingReporter::new(), config);
    assert!(!check.is_active());
    assert!(check.sandbox_path().is_none());
    assert_eq!(std::env::var_os("TMPDIR"), original);

    let reporter = check.finish();
    assert_eq!(reporter.fatal.len(), 1);
    assert!(reporter.fatal[0].contains("file descriptors"));
    assert!(reporter.findings.is_empty());
}

/// Counts fd listing failures and keeps everything else
#[derive(Default)]
struct FdFailureReporter {
    list_fds_failures: usize,
    inner: CollectingReporter,
}

impl Reporter for FdFailureReporter {
    fn report_finding(&mut self, finding: &Finding) {
        self.inner.report_finding(finding);
    }

    fn report_fatal(&mut self, error: &LeakCheckError) {
        if matches!(error, LeakCheckError::ListFds { .. }) {
            self.list_fds_failures += 1;
        }
        self.inner.report_fatal(error);
    }
}

#[test]
#[serial]
fn test_fd_listing_failure_at_finish_still_checks_the_rest() {
    let original = std::env::var_os("TMPDIR");

    // Synthetic procfs with a listable fd dir and no processes
    let proc_root = tempfile::tempdir().unwrap();
    let fd_dir = proc_root.path().join("self").join("fd");
    std::fs::create_dir_all(&fd_dir).unwrap();
    for fd in ["0", "1", "2"] {
        std::fs::write(fd_dir.join(fd), b"").unwrap();
    }

    let config = quick_config().with_proc_root(proc_root.path());
    let check = LeakCheck::start_with_config(FdFailureReporter::default(), config);
    assert!(check.is_active());
    let sandbox = check.sandbox_path().unwrap().to_path_buf();

    std::fs::remove_dir_all(&fd_dir).unwrap();
    std::fs::write(std::env::temp_dir().join("left-behind"), b"x").unwrap();

    let reporter = check.finish();

    assert_eq!(reporter.list_fds_failures, 1);
    assert_eq!(reporter.inner.fatal.len(), 1);
    assert_eq!(
        reporter.inner.temp_files(),
        Some(&[sandbox.join("left-behind")][..])
    );
    assert!(reporter.inner.fds().is_none());
    assert!(!sandbox.exists());
    assert_eq!(std::env::var_os("TMPDIR"), original);
}

#[test]
#[serial]
fn test_invalid_config_is_fatal() {
    let config = quick_config().with_poll_interval(Duration::ZERO);
    let reporter = LeakCheck::start_with_config(CollectingReporter::new(), config).finish();
    assert_eq!(reporter.fatal.len(), 1);
    assert!(reporter.fatal[0].contains("poll interval"));
}

#[test]
#[serial]
fn test_borrowed_reporter() {
    let mut reporter = CollectingReporter::new();
    let check = LeakCheck::start_with_config(&mut reporter, quick_config());
    std::fs::write(std::env::temp_dir().join("borrowed"), b"x").unwrap();
    check.finish();
    assert!(reporter.temp_files().is_some());
}

// ============================================================================
// check() convenience
// ============================================================================

#[test]
#[serial]
fn test_check_returns_workload_value() {
    let value = check(|| "done");
    assert_eq!(value, "done");
}

#[test]
#[serial]
#[should_panic(expected = "Leaked temp files")]
fn test_check_panics_on_leak() {
    check_with(quick_config(), || {
        std::fs::write(std::env::temp_dir().join("oops"), b"x").unwrap();
    });
}

#[test]
#[serial]
#[should_panic(expected = "Leak check failed")]
fn test_check_panics_on_fatal() {
    check_with(quick_config().with_proc_root("/nonexistent/leakcheck/proc"), || {
        unreachable!("workload must not run without a baseline")
    });
}

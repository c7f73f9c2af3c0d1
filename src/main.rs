use anyhow::{Context, Result};
use clap::Parser;
use leakcheck::cli::{Cli, OutputFormat};
use leakcheck::{CollectingReporter, Finding, LeakCheck, LeakCheckError};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde::Serialize;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};
use tracing_subscriber::EnvFilter;

/// Exit status when anything leaked or the check itself failed
const LEAK_EXIT_CODE: i32 = 3;

/// Waits over the killed pids before giving up on the stragglers
const REAP_PASSES: usize = 3;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    command: &'a [String],
    exit_code: Option<i32>,
    clean: bool,
    findings: &'a [Finding],
    fatal: &'a [String],
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

fn print_report(
    format: OutputFormat,
    command: &[String],
    exit_code: Option<i32>,
    reporter: &CollectingReporter,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for line in reporter.to_string().lines() {
                eprintln!("[leakcheck: {}]", line);
            }
        }
        OutputFormat::Json => {
            let report = JsonReport {
                command,
                exit_code,
                clean: reporter.is_clean(),
                findings: &reporter.findings,
                fatal: &reporter.fatal,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Collect orphans that already exited, without blocking on live ones
///
/// As subreaper we inherit every orphan of the command; the ones that are
/// done would otherwise sit as zombies until we exit.
fn reap_exited() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => tracing::trace!("Reaped {:?}", status),
            Err(Errno::EINTR) => continue,
            Err(_) => break, // ECHILD
        }
    }
}

/// SIGKILL every leaked descendant, then reap the ones that were killed
///
/// Only the killed pids are waited for. A killed pid that is not our child
/// yet (its parent was killed too and has not been reaped) gets one more
/// pass once the earlier ones are collected. Anything forked after the
/// snapshot is left alone.
fn reap_leaked(reporter: &CollectingReporter) {
    let Some(leaked) = reporter.processes() else {
        return;
    };

    let mut pending = Vec::new();
    for process in leaked {
        match kill(Pid::from_raw(process.pid), Signal::SIGKILL) {
            Ok(()) => {
                tracing::debug!("Killed leaked process {}", process);
                pending.push(Pid::from_raw(process.pid));
            }
            Err(e) => tracing::debug!("Could not kill {}: {}", process, e),
        }
    }

    for _ in 0..REAP_PASSES {
        pending.retain(|&pid| !wait_killed(pid));
        if pending.is_empty() {
            break;
        }
    }
    if !pending.is_empty() {
        tracing::debug!("Not our children, left unreaped: {:?}", pending);
    }
    reap_exited();
}

/// Wait for one killed pid; false if it is not (yet) our child
fn wait_killed(pid: Pid) -> bool {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                tracing::trace!("Reaped {:?}", status);
                return true;
            }
            Err(Errno::EINTR) => continue,
            Err(_) => return false, // ECHILD
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let command = match args.command.as_deref() {
        Some(command) if !command.is_empty() => command.to_vec(),
        _ => anyhow::bail!("Must specify a command. Usage: leakcheck -- COMMAND [ARGS...]"),
    };
    let config = args.check_config()?;

    // Orphans of the command get reparented to us instead of init, which is
    // what makes them visible as descendants
    nix::sys::prctl::set_child_subreaper(true).context("Failed to become child subreaper")?;

    let check = LeakCheck::start_with_config(CollectingReporter::new(), config);
    if !check.is_active() {
        let reporter = check.finish();
        print_report(args.format, &command, None, &reporter)?;
        std::process::exit(LEAK_EXIT_CODE);
    }

    let status = Command::new(&command[0]).args(&command[1..]).status();
    reap_exited();
    let reporter = check.finish();
    let status = status
        .map_err(LeakCheckError::Spawn)
        .with_context(|| format!("Failed to run {}", command[0]))?;
    let code = exit_code(status);

    print_report(args.format, &command, Some(code), &reporter)?;
    if args.reap {
        reap_leaked(&reporter);
    }

    if !reporter.is_clean() {
        std::process::exit(LEAK_EXIT_CODE);
    }
    std::process::exit(code);
}

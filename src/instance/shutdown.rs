//! Stop and cleanup helpers for `MysqldInstance`.
//!
//! Nothing here propagates errors: teardown runs from `Drop`, so failures are
//! logged and the caller moves on.

use std::fmt::Display;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::fs::{RemovalOutcome, remove_dir_all_if_exists, remove_file_if_exists};
use crate::observability::LOG_TARGET;

use super::process::is_alive;

const ORPHAN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signals `pid` and blocks until it exits, escalating to `SIGKILL` once
/// `timeout` lapses.
pub(super) fn terminate(
    pid: Pid,
    child: Option<&mut Child>,
    signal: Signal,
    timeout: Duration,
    context: &str,
) {
    info!(
        target: LOG_TARGET,
        context = %context,
        pid = pid.as_raw(),
        signal = %signal,
        "stopping mysqld"
    );
    match kill(pid, signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!(target: LOG_TARGET, pid = pid.as_raw(), "mysqld already exited"),
        Err(err) => warn_signal_failure(context, signal, &err),
    }

    let exited = match child {
        Some(handle) => wait_child(handle, pid, timeout, context),
        None => wait_orphan(pid, timeout),
    };
    if !exited {
        warn_stop_timeout(timeout.as_secs(), context);
    }
}

fn wait_child(child: &mut Child, pid: Pid, timeout: Duration, context: &str) -> bool {
    use wait_timeout::ChildExt;

    match child.wait_timeout(timeout) {
        Ok(Some(_)) => true,
        Ok(None) => {
            escalate(pid, context);
            drop(child.wait());
            false
        }
        Err(err) => {
            debug!(target: LOG_TARGET, error = %err, "ignoring wait failure for mysqld");
            true
        }
    }
}

fn wait_orphan(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            if let Err(err) = kill(pid, Signal::SIGKILL) {
                debug!(target: LOG_TARGET, pid = pid.as_raw(), error = %err, "SIGKILL failed");
            }
            return false;
        }
        thread::sleep(ORPHAN_POLL_INTERVAL);
    }
    true
}

fn escalate(pid: Pid, context: &str) {
    if let Err(err) = kill(pid, Signal::SIGKILL) {
        if err != Errno::ESRCH {
            warn_signal_failure(context, Signal::SIGKILL, &err);
        }
    }
}

/// Best-effort removal of the readiness artefact.
pub(super) fn remove_pid_file(path: &Utf8Path, context: &str) {
    match remove_file_if_exists(path) {
        Ok(RemovalOutcome::Removed) => {
            debug!(target: LOG_TARGET, context = %context, path = %path, "removed pid file");
        }
        Ok(RemovalOutcome::Missing) => {}
        Err(err) => warn_cleanup_removal_failure(context, "pid file", path, &err),
    }
}

/// Best-effort removal of an owned base directory.
pub(super) fn remove_base_dir(path: &Utf8Path, context: &str) {
    match remove_dir_all_if_exists(path) {
        Ok(RemovalOutcome::Removed) => info!(
            target: LOG_TARGET,
            context = %context,
            path = %path,
            "removed mysqld base directory"
        ),
        Ok(RemovalOutcome::Missing) => debug!(
            target: LOG_TARGET,
            context = %context,
            path = %path,
            "mysqld base directory already removed"
        ),
        Err(err) => warn_cleanup_removal_failure(context, "base directory", path, &err),
    }
}

fn warn_signal_failure(context: &str, signal: Signal, err: &impl Display) {
    warn!(
        target: LOG_TARGET,
        context = %context,
        signal = %signal,
        error = %err,
        "failed to signal mysqld"
    );
}

fn warn_stop_timeout(timeout_secs: u64, context: &str) {
    warn!(
        target: LOG_TARGET,
        context = %context,
        timeout_secs,
        "mysqld did not exit within {timeout_secs}s; sent SIGKILL"
    );
}

fn warn_cleanup_removal_failure(context: &str, label: &str, path: &Utf8Path, err: &impl Display) {
    warn!(
        target: LOG_TARGET,
        context = %context,
        path = %path,
        error = %err,
        "failed to remove mysqld {label}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_warn_logs;
    use std::process::Command;
    use tempfile::tempdir;

    #[test]
    fn terminate_reaps_a_sleeping_child() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
        terminate(
            pid,
            Some(&mut child),
            Signal::SIGTERM,
            Duration::from_secs(5),
            "test",
        );
        assert!(child.try_wait().expect("poll child").is_some());
    }

    #[test]
    fn terminate_escalates_when_signal_is_ignored() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .expect("spawn shell");
        let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
        thread::sleep(Duration::from_millis(200));
        let (logs, ()) = capture_warn_logs(|| {
            terminate(
                pid,
                Some(&mut child),
                Signal::SIGTERM,
                Duration::from_millis(300),
                "test",
            );
        });
        assert!(child.try_wait().expect("poll child").is_some());
        assert!(logs.iter().any(|line| line.contains("sent SIGKILL")));
    }

    #[test]
    fn terminate_kills_an_orphan_that_ignores_the_signal() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .expect("spawn shell");
        let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
        thread::sleep(Duration::from_millis(200));
        let (logs, ()) = capture_warn_logs(|| {
            terminate(pid, None, Signal::SIGTERM, Duration::from_millis(300), "test");
        });
        let status = child.wait().expect("reap shell");
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
        assert!(logs.iter().any(|line| line.contains("sent SIGKILL")));
    }

    #[test]
    fn removing_missing_paths_is_silent() {
        let temp = tempdir().expect("tempdir");
        let root = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let (logs, ()) = capture_warn_logs(|| {
            remove_pid_file(&root.join("mysqld.pid"), "test");
            remove_base_dir(&root.join("absent"), "test");
        });
        assert!(logs.is_empty());
    }
}

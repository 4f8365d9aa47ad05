//! Spawns the server and waits for its readiness artefact.

use std::fs::{File, OpenOptions};
use std::io::Read as _;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use color_eyre::eyre::{Context, eyre};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info};

use crate::error::{InstanceError, InstanceResult};
use crate::observability::LOG_TARGET;

use super::paths::InstancePaths;

/// Fixed account flag passed to every server invocation.
pub(crate) const SERVER_USER_FLAG: &str = "--user=root";

/// Inputs for one spawn-and-wait cycle.
#[derive(Debug)]
pub(crate) struct SpawnRequest<'a> {
    pub mysqld: &'a Utf8Path,
    pub paths: &'a InstancePaths,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

pub(crate) fn server_args(paths: &InstancePaths) -> [String; 2] {
    [
        format!("--defaults-file={}", paths.my_cnf),
        SERVER_USER_FLAG.to_owned(),
    ]
}

/// Launches the server with its combined output appended to the log file.
pub(crate) fn spawn(request: &SpawnRequest<'_>) -> InstanceResult<Child> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&request.paths.log_file)
        .with_context(|| format!("failed to open server log {}", request.paths.log_file))?;
    let stderr = log
        .try_clone()
        .context("failed to share server log handle")?;

    let mut command = Command::new(request.mysqld.as_std_path());
    command
        .args(server_args(request.paths))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr));

    let child = command.spawn().map_err(|err| {
        InstanceError::startup_failed(eyre!("failed to spawn {}: {err}", request.mysqld))
    })?;
    info!(
        target: LOG_TARGET,
        pid = child.id(),
        mysqld = %request.mysqld,
        "spawned mysqld"
    );
    Ok(child)
}

/// Polls until the pid file appears, the child exits, or the timeout lapses.
///
/// On every failure path the child has been reaped before returning.
pub(crate) fn wait_until_ready(child: &mut Child, request: &SpawnRequest<'_>) -> InstanceResult<()> {
    let deadline = Instant::now() + request.timeout;
    loop {
        if request.paths.pid_file.exists() {
            info!(
                target: LOG_TARGET,
                pid = child.id(),
                pid_file = %request.paths.pid_file,
                "mysqld ready"
            );
            return Ok(());
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(InstanceError::startup_failed(eyre!(
                    "mysqld exited before becoming ready ({status}):\n{}",
                    read_log(&request.paths.log_file)
                )));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(target: LOG_TARGET, error = %err, "failed to poll mysqld status");
            }
        }

        if Instant::now() >= deadline {
            drop(child.kill());
            drop(child.wait());
            return Err(InstanceError::startup_failed(eyre!(
                "mysqld did not create {} within {}s:\n{}",
                request.paths.pid_file,
                request.timeout.as_secs(),
                read_log(&request.paths.log_file)
            )));
        }

        thread::sleep(request.poll_interval);
    }
}

/// Converts the OS child id into a signal target.
pub(crate) fn child_pid(child: &Child) -> InstanceResult<Pid> {
    i32::try_from(child.id())
        .map(Pid::from_raw)
        .map_err(|err| InstanceError::from(eyre!("child pid out of range: {err}")))
}

/// Signal-0 liveness check for a pid this process cannot wait on.
pub(crate) fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// Reads the captured server log, returning an empty string when absent.
pub(crate) fn read_log(path: &Utf8Path) -> String {
    let mut text = String::new();
    if let Ok(mut file) = File::open(path) {
        drop(file.read_to_string(&mut text));
    }
    text
}

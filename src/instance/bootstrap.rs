//! Creates the system tables of a fresh data directory.
//!
//! The server's own `--initialize-insecure` mode is tried first. When it fails
//! (servers older than 5.7) and a legacy `mysql_install_db` tool is available,
//! the tool is run with the same arguments instead.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read as _};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use tracing::{info, warn};
use wait_timeout::ChildExt;

use crate::error::{InstanceError, InstanceResult};
use crate::locator::INSTALL_DB_PROGRAM;
use crate::observability::LOG_TARGET;

use super::paths::InstancePaths;

const OUTPUT_CHAR_LIMIT: usize = 2_048;
const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Executables and limits for one bootstrap run.
#[derive(Debug)]
pub(crate) struct BootstrapRequest<'a> {
    pub mysqld: &'a Utf8Path,
    pub install_db: Option<&'a Utf8Path>,
    pub paths: &'a InstancePaths,
    pub timeout: Duration,
}

pub(crate) fn run(request: &BootstrapRequest<'_>) -> InstanceResult<()> {
    let args = bootstrap_args(request.paths, request.install_db);

    info!(
        target: LOG_TARGET,
        data_dir = %request.paths.data_dir,
        "initialising data directory"
    );
    let mut initialize = Command::new(request.mysqld.as_std_path());
    initialize.args(&args).arg("--initialize-insecure");
    let status = execute(&mut initialize, request, "mysqld --initialize-insecure")?;
    if status.success() {
        return Ok(());
    }

    let Some(install_db) = request.install_db else {
        return Err(failure(request.paths, "mysqld --initialize-insecure", status));
    };

    warn!(
        target: LOG_TARGET,
        status = %status,
        tool = %install_db,
        "--initialize-insecure failed; falling back to {INSTALL_DB_PROGRAM}"
    );
    let mut legacy = Command::new(install_db.as_std_path());
    legacy.args(&args);
    let legacy_status = execute(&mut legacy, request, INSTALL_DB_PROGRAM)?;
    if legacy_status.success() {
        Ok(())
    } else {
        Err(failure(request.paths, INSTALL_DB_PROGRAM, legacy_status))
    }
}

fn bootstrap_args(paths: &InstancePaths, install_db: Option<&Utf8Path>) -> Vec<String> {
    let mut args = vec![
        format!("--defaults-file={}", paths.my_cnf),
        format!("--datadir={}", paths.data_dir),
    ];
    if let Some(basedir) = install_db.and_then(install_basedir) {
        args.push(format!("--basedir={basedir}"));
    }
    args
}

/// Returns the installation prefix owning `tool`.
///
/// One level of symlink is followed relative to the link's directory; when
/// the resolved path ends in `<dir>/mysql_install_db` the prefix is the
/// directory above `<dir>`.
pub(crate) fn install_basedir(tool: &Utf8Path) -> Option<Utf8PathBuf> {
    let resolved = resolve_link(tool);
    if resolved.file_name() != Some(INSTALL_DB_PROGRAM) {
        return None;
    }
    resolved
        .parent()
        .and_then(Utf8Path::parent)
        .filter(|prefix| !prefix.as_str().is_empty())
        .map(Utf8Path::to_path_buf)
}

fn resolve_link(tool: &Utf8Path) -> Utf8PathBuf {
    let Ok(target) = fs::read_link(tool) else {
        return tool.to_path_buf();
    };
    let Ok(target_utf8) = Utf8PathBuf::from_path_buf(target) else {
        return tool.to_path_buf();
    };
    let joined = tool
        .parent()
        .map_or_else(|| target_utf8.clone(), |parent| parent.join(&target_utf8));
    normalise(&joined)
}

fn normalise(path: &Utf8Path) -> Utf8PathBuf {
    use camino::Utf8Component;

    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Utf8Component::CurDir => {}
            other => out.push(other.as_str()),
        }
    }
    out
}

fn execute(
    command: &mut Command,
    request: &BootstrapRequest<'_>,
    label: &str,
) -> InstanceResult<ExitStatus> {
    let log = open_log(&request.paths.bootstrap_log)?;
    let stderr = log
        .try_clone()
        .context("failed to share bootstrap log handle")
        .map_err(InstanceError::setup)?;
    command.stdin(Stdio::null());
    command.stdout(Stdio::from(log));
    command.stderr(Stdio::from(stderr));

    let mut child = command
        .spawn()
        .map_err(|err| InstanceError::setup(eyre!("failed to spawn {label}: {err}")))?;

    match child.wait_timeout(request.timeout) {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            match child.kill() {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::InvalidInput => {}
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to kill {label}");
                }
            }
            drop(child.wait());
            Err(InstanceError::setup(eyre!(
                "{label} timed out after {}s\n{}",
                request.timeout.as_secs(),
                read_log_tail(&request.paths.bootstrap_log)
            )))
        }
        Err(err) => Err(InstanceError::setup(eyre!(
            "failed to wait for {label}: {err}"
        ))),
    }
}

fn open_log(path: &Utf8Path) -> InstanceResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open bootstrap log {path}"))
        .map_err(InstanceError::setup)
}

fn failure(paths: &InstancePaths, label: &str, status: ExitStatus) -> InstanceError {
    InstanceError::setup(eyre!(
        "{label} exited with {status}\n{}",
        read_log_tail(&paths.bootstrap_log)
    ))
}

fn read_log_tail(path: &Utf8Path) -> String {
    let mut text = String::new();
    if let Ok(mut file) = File::open(path) {
        drop(file.read_to_string(&mut text));
    }
    truncate_output(&text)
}

fn truncate_output(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(OUTPUT_CHAR_LIMIT).collect();
    if chars.next().is_none() {
        head
    } else {
        format!("{head}{TRUNCATION_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MyCnf;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn basedir_is_grandparent_of_install_tool() {
        let basedir = install_basedir(Utf8Path::new("/opt/mysql/bin/mysql_install_db"));
        assert_eq!(basedir.as_deref(), Some(Utf8Path::new("/opt/mysql")));
    }

    #[test]
    fn basedir_requires_install_tool_name() {
        assert!(install_basedir(Utf8Path::new("/opt/mysql/bin/mysqld")).is_none());
        assert!(install_basedir(Utf8Path::new("mysql_install_db")).is_none());
    }

    #[test]
    fn basedir_follows_relative_symlink() {
        let temp = tempdir().expect("tempdir");
        let root = utf8(temp.path());
        let real = root.join("dist/scripts");
        fs::create_dir_all(&real).expect("create dist tree");
        fs::write(real.join(INSTALL_DB_PROGRAM), b"#!/bin/sh\n").expect("write tool");
        let bin = root.join("bin");
        fs::create_dir_all(&bin).expect("create bin");
        symlink("../dist/scripts/mysql_install_db", bin.join(INSTALL_DB_PROGRAM))
            .expect("symlink tool");

        let basedir = install_basedir(&bin.join(INSTALL_DB_PROGRAM));
        assert_eq!(basedir, Some(root.join("dist")));
    }

    #[test]
    fn args_include_defaults_file_and_datadir() {
        let mut cnf = MyCnf::new();
        let paths = InstancePaths::derive(Utf8Path::new("/srv/inst"), &mut cnf);
        let args = bootstrap_args(&paths, None);
        assert_eq!(
            args,
            [
                "--defaults-file=/srv/inst/etc/my.cnf",
                "--datadir=/srv/inst/var"
            ]
        );
    }

    #[test]
    fn truncate_output_marks_long_logs() {
        let long = "x".repeat(OUTPUT_CHAR_LIMIT + 10);
        let truncated = truncate_output(&long);
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(truncate_output("short"), "short");
    }
}

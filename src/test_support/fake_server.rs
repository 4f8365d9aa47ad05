//! Shell stand-ins for `mysqld` so lifecycle tests run without MySQL.
//!
//! The scripts parse `--defaults-file`, honour `--initialize-insecure` by
//! creating the system-table marker, write `$$` to the configured pid file,
//! and remove it again on `SIGTERM`.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, Result};

use crate::fs::set_permissions;

/// Behaviour of a generated fake server.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FakeServerMode {
    /// Writes its pid file and runs until terminated.
    Healthy,
    /// Prints `boom` and exits with status 1 before writing the pid file.
    CrashBeforeReady,
    /// Writes its pid file, then exits with status 1 a second later and
    /// leaves the pid file behind.
    CrashAfterReady,
    /// Runs forever without ever writing the pid file.
    NeverReady,
    /// Succeeds at serving but rejects `--initialize-insecure`.
    LegacyBootstrap,
}

const PRELUDE: &str = r#"#!/bin/sh
defaults=""
init=0
for arg in "$@"; do
  case "$arg" in
    --defaults-file=*) defaults="${arg#--defaults-file=}" ;;
    --initialize-insecure) init=1 ;;
  esac
done
conf() {
  sed -n "s/^$1=//p" "$defaults" | tail -n 1
}
datadir="$(conf datadir)"
pidfile="$(conf pid-file)"
"#;

const INIT_OK: &str = r#"if [ "$init" = 1 ]; then
  mkdir -p "$datadir/mysql"
  echo "initialised $datadir"
  exit 0
fi
"#;

const INIT_REJECTED: &str = r#"if [ "$init" = 1 ]; then
  echo "unknown option '--initialize-insecure'" >&2
  exit 7
fi
"#;

const SERVE: &str = r#"trap 'rm -f "$pidfile"; exit 0' TERM INT
echo "mysqld starting with $defaults"
echo $$ > "$pidfile"
while :; do
  sleep 1 &
  wait $!
done
"#;

const CRASH: &str = r#"echo "boom"
exit 1
"#;

const CRASH_AFTER_READY: &str = r#"echo "mysqld starting with $defaults"
echo $$ > "$pidfile"
sleep 1
echo "crashed"
exit 1
"#;

const NEVER_READY: &str = r#"trap 'exit 0' TERM INT
while :; do
  sleep 1 &
  wait $!
done
"#;

const INSTALL_DB: &str = r#"#!/bin/sh
datadir=""
for arg in "$@"; do
  case "$arg" in
    --datadir=*) datadir="${arg#--datadir=}" ;;
  esac
done
mkdir -p "$datadir/mysql"
echo "legacy install $*"
"#;

/// Renders the fake server script for `mode`.
#[must_use]
pub fn script(mode: FakeServerMode) -> String {
    let (init, body) = match mode {
        FakeServerMode::Healthy => (INIT_OK, SERVE),
        FakeServerMode::CrashBeforeReady => (INIT_OK, CRASH),
        FakeServerMode::CrashAfterReady => (INIT_OK, CRASH_AFTER_READY),
        FakeServerMode::NeverReady => (INIT_OK, NEVER_READY),
        FakeServerMode::LegacyBootstrap => (INIT_REJECTED, SERVE),
    };
    format!("{PRELUDE}{init}{body}")
}

/// Writes an executable fake `mysqld` into `dir` and returns its path.
///
/// # Errors
/// Returns an error when the script cannot be written or made executable.
pub fn write_fake_mysqld(dir: &Utf8Path, mode: FakeServerMode) -> Result<Utf8PathBuf> {
    write_executable(&dir.join("mysqld"), &script(mode))
}

/// Writes an executable fake `mysql_install_db` into `dir`.
///
/// # Errors
/// Returns an error when the script cannot be written or made executable.
pub fn write_fake_install_db(dir: &Utf8Path) -> Result<Utf8PathBuf> {
    write_executable(&dir.join("mysql_install_db"), INSTALL_DB)
}

fn write_executable(path: &Utf8Path, contents: &str) -> Result<Utf8PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
    }
    fs::write(path, contents).with_context(|| format!("write {path}"))?;
    set_permissions(path, 0o755)?;
    Ok(path.to_path_buf())
}

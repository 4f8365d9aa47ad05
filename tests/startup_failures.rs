//! Error reporting for instances that cannot be prepared or started.
#![cfg(unix)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use color_eyre::eyre::{Result, ensure, eyre};
use mysqld_ephemeral::test_support::{FakeServerMode, FakeServerSandbox, fake_sandbox};
use mysqld_ephemeral::{
    AutoStart, ConnectionParameters, DatabaseProvisioner, InstanceConfig, InstanceError,
    InstanceErrorKind, InstanceResult, MysqldInstance,
};
use rstest::rstest;

#[path = "support/process.rs"]
mod process;

use process::process_exists;

fn expect_failure(config: InstanceConfig) -> Result<InstanceError> {
    match MysqldInstance::new(config) {
        Ok(instance) => Err(eyre!(
            "expected construction to fail, got {:?}",
            instance.state()
        )),
        Err(err) => Ok(err),
    }
}

#[test]
fn crash_before_ready_reports_server_log() -> Result<()> {
    let sandbox = FakeServerSandbox::new(FakeServerMode::CrashBeforeReady)?;
    let err = expect_failure(sandbox.config())?;

    assert_eq!(err.kind(), InstanceErrorKind::StartupFailed);
    let message = err.to_string();
    ensure!(message.contains("exited before becoming ready"), "{message}");
    ensure!(message.contains("boom"), "log should be attached: {message}");
    assert!(!sandbox.base_dir().join("tmp/mysqld.pid").exists());
    Ok(())
}

#[test]
fn readiness_wait_is_bounded() -> Result<()> {
    let sandbox = FakeServerSandbox::new(FakeServerMode::NeverReady)?;
    let config = sandbox.config().with_start_timeout(Duration::from_secs(1));

    let err = expect_failure(config)?;

    assert_eq!(err.kind(), InstanceErrorKind::StartupFailed);
    let message = err.to_string();
    ensure!(message.contains("within 1s"), "{message}");
    Ok(())
}

#[test]
fn failed_bootstrap_is_a_setup_error() -> Result<()> {
    // No mysql_install_db sits next to this server, so the fallback fails too.
    let sandbox = FakeServerSandbox::new(FakeServerMode::LegacyBootstrap)?;
    let err = expect_failure(sandbox.config())?;

    assert_eq!(err.kind(), InstanceErrorKind::Setup);
    assert!(!sandbox.base_dir().join("var/mysql").exists());
    Ok(())
}

#[rstest]
fn existing_pid_file_blocks_second_instance(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let first = MysqldInstance::new(fake_sandbox.config())?;

    let err = expect_failure(fake_sandbox.config())?;

    assert_eq!(err.kind(), InstanceErrorKind::AlreadyRunning);
    assert!(first.is_alive(), "the failed instance must not stop the first");
    assert!(first.pid_file().is_file());
    Ok(())
}

#[rstest]
fn explicit_start_reports_existing_pid_file(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let first = MysqldInstance::new(fake_sandbox.config())?;
    let mut second =
        MysqldInstance::new(fake_sandbox.config().with_auto_start(AutoStart::Disabled))?;

    let err = match second.start() {
        Ok(()) => return Err(eyre!("second start should fail")),
        Err(err) => err,
    };

    assert_eq!(err.kind(), InstanceErrorKind::AlreadyRunning);
    drop(second);
    assert!(first.is_alive());
    Ok(())
}

/// Records the server pid, then refuses to create the database.
#[derive(Debug, Default)]
struct FailingProvisioner {
    seen_pid: Mutex<Option<u32>>,
}

impl DatabaseProvisioner for FailingProvisioner {
    fn create_database(&self, params: &ConnectionParameters) -> InstanceResult<()> {
        let pid = params
            .unix_socket()
            .map(|socket| socket.with_file_name("mysqld.pid"))
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|raw| raw.trim().parse().ok());
        *self.seen_pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
        Err(InstanceError::setup(eyre!(
            "cannot create database {}",
            params.database()
        )))
    }
}

#[rstest]
fn provisioning_failure_stops_server(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let provisioner = Arc::new(FailingProvisioner::default());
    let config = fake_sandbox.config().with_provisioner(provisioner.clone());

    let err = expect_failure(config)?;

    assert_eq!(err.kind(), InstanceErrorKind::Setup);
    ensure!(err.to_string().contains("cannot create database test"));
    let seen_pid = *provisioner
        .seen_pid
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let pid = seen_pid.ok_or_else(|| eyre!("provisioner did not observe a running server"))?;
    assert!(!process_exists(pid), "server should be stopped");
    assert!(!fake_sandbox.base_dir().join("tmp/mysqld.pid").exists());
    Ok(())
}

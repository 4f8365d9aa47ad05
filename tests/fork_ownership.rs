//! Ensures a forked child cannot tear down its parent's server.
#![cfg(unix)]

use color_eyre::eyre::{Result, ensure, eyre};
use mysqld_ephemeral::MysqldInstance;
use mysqld_ephemeral::test_support::{FakeServerSandbox, fake_config, fake_sandbox};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use rstest::rstest;
use serial_test::serial;

#[path = "support/process.rs"]
mod process;

use process::process_exists;

/// Runs `child` in a forked process and returns its wait status.
fn in_forked_child<F>(child: F) -> Result<WaitStatus>
where
    F: FnOnce(),
{
    // SAFETY: the child only runs `child` and then calls `_exit`, never
    // returning into the test harness.
    match unsafe { fork() }? {
        ForkResult::Child => {
            child();
            // SAFETY: terminates the forked child without running the
            // parent's atexit handlers or destructors.
            unsafe { libc::_exit(0) }
        }
        ForkResult::Parent { child } => Ok(waitpid(child, None)?),
    }
}

#[rstest]
#[serial]
fn child_stop_and_drop_leave_parent_server_running(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let mut instance = MysqldInstance::new(fake_config(fake_sandbox.mysqld()))?;
    let pid = instance.pid().ok_or_else(|| eyre!("missing pid"))?;
    let base_dir = instance.base_dir().to_path_buf();

    let status = in_forked_child(|| {
        instance.stop();
        instance.cleanup();
    })?;
    ensure!(
        matches!(status, WaitStatus::Exited(_, 0)),
        "forked child exited abnormally: {status:?}"
    );

    assert!(instance.is_alive(), "parent server should survive the child");
    assert!(process_exists(pid));
    assert!(instance.pid_file().is_file(), "pid file should survive");
    assert!(base_dir.join("var/mysql").is_dir(), "data should survive");

    instance.stop();
    assert!(!process_exists(pid));
    Ok(())
}

#[rstest]
#[serial]
fn child_drop_keeps_owned_base_dir(fake_sandbox: FakeServerSandbox) -> Result<()> {
    let instance = MysqldInstance::new(fake_config(fake_sandbox.mysqld()))?;
    let base_dir = instance.base_dir().to_path_buf();
    let mut slot = Some(instance);

    let status = in_forked_child(|| drop(slot.take()))?;
    ensure!(
        matches!(status, WaitStatus::Exited(_, 0)),
        "forked child exited abnormally: {status:?}"
    );

    let instance = slot.ok_or_else(|| eyre!("parent lost its instance"))?;
    assert!(base_dir.is_dir(), "owned base dir should survive the child");
    assert!(instance.is_alive());

    drop(instance);
    assert!(!base_dir.exists());
    Ok(())
}

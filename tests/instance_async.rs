//! Async construction and teardown of instances.
#![cfg(all(unix, feature = "async-api"))]

use color_eyre::eyre::{Result, eyre};
use mysqld_ephemeral::test_support::{FakeServerMode, FakeServerSandbox, fake_config};
use mysqld_ephemeral::{InstanceErrorKind, InstanceState, MysqldInstance};

#[tokio::test]
async fn spawn_and_stop_without_blocking_the_runtime() -> Result<()> {
    let sandbox = FakeServerSandbox::new(FakeServerMode::Healthy)?;
    let instance = MysqldInstance::spawn_async(fake_config(sandbox.mysqld())).await?;
    assert_eq!(instance.state(), InstanceState::Running);
    let base_dir = instance.base_dir().to_path_buf();

    instance.stop_async().await?;

    assert!(!base_dir.exists(), "owned base dir should be removed");
    Ok(())
}

#[tokio::test]
async fn spawn_async_reports_startup_failures() -> Result<()> {
    let sandbox = FakeServerSandbox::new(FakeServerMode::CrashBeforeReady)?;

    let Err(err) = MysqldInstance::spawn_async(sandbox.config()).await else {
        return Err(eyre!("a crashing server should not start"));
    };

    assert_eq!(err.kind(), InstanceErrorKind::StartupFailed);
    Ok(())
}

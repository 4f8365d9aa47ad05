//! `rstest` fixtures for tests that drive the fake server.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, Result, eyre};
#[cfg(not(doc))]
use rstest::fixture;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::fake_server::{FakeServerMode, write_fake_mysqld};
use crate::config::{AutoStart, InstanceConfig};
use crate::provision::NoopProvisioner;

/// Temporary sandbox holding a fake `mysqld` and a caller-owned base dir.
#[derive(Debug)]
pub struct FakeServerSandbox {
    _root: TempDir,
    bin_dir: Utf8PathBuf,
    base_dir: Utf8PathBuf,
    mysqld: Utf8PathBuf,
}

impl FakeServerSandbox {
    /// Creates a sandbox whose fake server behaves according to `mode`.
    ///
    /// # Errors
    /// Returns an error when the sandbox or script cannot be created.
    pub fn new(mode: FakeServerMode) -> Result<Self> {
        let root = tempfile::tempdir().context("create sandbox")?;
        let root_path = Utf8PathBuf::from_path_buf(root.path().to_path_buf())
            .map_err(|path| eyre!("sandbox path is not UTF-8: {}", path.display()))?;
        let bin_dir = root_path.join("bin");
        let mysqld = write_fake_mysqld(&bin_dir, mode)?;
        Ok(Self {
            _root: root,
            base_dir: root_path.join("instance"),
            bin_dir,
            mysqld,
        })
    }

    /// Directory containing the fake executables.
    #[must_use]
    pub fn bin_dir(&self) -> &Utf8Path {
        &self.bin_dir
    }

    /// Path to the fake `mysqld`.
    #[must_use]
    pub fn mysqld(&self) -> &Utf8Path {
        &self.mysqld
    }

    /// Caller-owned base directory inside the sandbox.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Configuration that drives the fake server over a socket with short
    /// timeouts and no database provisioning.
    #[must_use]
    pub fn config(&self) -> InstanceConfig {
        fake_config(&self.mysqld).with_base_dir(&self.base_dir)
    }
}

/// Configuration for a fake server at `mysqld` using an owned base dir.
#[must_use]
pub fn fake_config(mysqld: &Utf8Path) -> InstanceConfig {
    let mut config = InstanceConfig::default()
        .with_auto_start(AutoStart::PrepareAndStart)
        .with_mysqld(mysqld)
        .with_install_db(mysqld.with_file_name("mysql_install_db"))
        .with_flag("skip-networking")
        .with_start_timeout(Duration::from_secs(10))
        .with_provisioner(Arc::new(NoopProvisioner));
    config.timeouts.shutdown = Duration::from_secs(5);
    config.poll_interval = Duration::from_millis(20);
    config
}

/// `rstest` fixture yielding a healthy fake-server sandbox.
///
/// # Panics
/// Panics when the sandbox cannot be created.
#[must_use]
#[cfg_attr(not(doc), fixture)]
pub fn fake_sandbox() -> FakeServerSandbox {
    FakeServerSandbox::new(FakeServerMode::Healthy)
        .unwrap_or_else(|err| panic!("failed to create fake server sandbox: {err:?}"))
}

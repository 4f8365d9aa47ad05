//! Provisions throwaway `mysqld` servers for test suites.
//!
//! A [`MysqldInstance`] materialises a private directory tree, bootstraps a
//! data directory, starts the server, and tears everything down again when
//! dropped. Teardown is tied to the process that created the instance, so a
//! test runner that forks never kills its parent's server.
//! [`MysqldFactory`] amortises the bootstrap cost by seeding instances from a
//! template data directory.

mod config;
mod error;
mod factory;
mod fs;
mod instance;
mod locator;
mod observability;
mod provision;
#[doc(hidden)]
pub mod test_support;

pub use config::{
    AutoStart, BOOTSTRAP_TIMEOUT_ENV, DEFAULT_POLL_INTERVAL, DEFAULT_USER, InstanceConfig,
    LifecycleTimeouts, MyCnf, SECTION_HEADER, SHUTDOWN_TIMEOUT_ENV, START_TIMEOUT_ENV,
};
pub use error::{
    ConfigError, ConfigResult, InstanceError, InstanceErrorKind, InstanceResult,
    MysqldError as Error, Result,
};
pub use factory::{Initializer, MysqldFactory};
pub use instance::{
    ConnectionOverrides, ConnectionParameters, DEFAULT_DATABASE, DEFAULT_HOST, InstanceState,
    MysqldInstance, ServerAddress, URL_SCHEME,
};
pub use locator::{
    CLIENT_PROGRAM, INSTALL_DB_PROGRAM, INSTALL_DB_SUBDIRS, ProgramLocator, SEARCH_PATHS,
    SERVER_PROGRAM, SERVER_SUBDIRS, find_program,
};
pub use nix::sys::signal::Signal;
pub use provision::{DatabaseProvisioner, MysqlClientProvisioner, NoopProvisioner};

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, eyre};
use ortho_config::OrthoConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;

use crate::observability::LOG_TARGET;

/// Captures instance settings supplied via `MYSQLD_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "MYSQLD")]
///
/// # Examples
/// ```
/// use mysqld_ephemeral::MysqldEnvCfg;
///
/// let cfg = MysqldEnvCfg::default();
/// assert!(cfg.port.is_none());
/// ```
pub struct MysqldEnvCfg {
    /// Caller-owned base directory for the instance tree.
    pub base_dir: Option<Utf8PathBuf>,
    /// Explicit `mysqld` binary.
    pub mysqld: Option<Utf8PathBuf>,
    /// Explicit `mysql_install_db` tool.
    pub install_db: Option<Utf8PathBuf>,
    /// TCP port; an unused port is allocated when unset.
    pub port: Option<u16>,
    /// Account used for client connections.
    pub user: Option<String>,
    /// Password for `user`.
    pub password: Option<String>,
    /// Data directory copied into the instance before bootstrap.
    pub copy_data_from: Option<Utf8PathBuf>,
}

impl MysqldEnvCfg {
    /// Loads configuration from environment variables without parsing CLI
    /// arguments.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when a variable cannot be parsed.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("mysqld-ephemeral")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Merges the loaded values over [`InstanceConfig::default`], including
    /// timeouts read from the environment.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when a timeout variable is invalid.
    pub fn to_config(&self) -> ConfigResult<InstanceConfig> {
        let mut config = InstanceConfig::default().with_timeouts(LifecycleTimeouts::from_env()?);
        config.base_dir.clone_from(&self.base_dir);
        config.mysqld.clone_from(&self.mysqld);
        config.install_db.clone_from(&self.install_db);
        config.copy_data_from.clone_from(&self.copy_data_from);
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(user) = &self.user {
            config.user.clone_from(user);
        }
        config.password = self.password.clone().map(SecretString::from);
        Ok(config)
    }
}

/// Prepares, but never starts, an instance directory at `MYSQLD_BASE_DIR`
/// so it can later serve as a `copy_data_from` source.
///
/// Returns the prepared data directory.
///
/// # Errors
/// Returns an error when configuration is invalid, `MYSQLD_BASE_DIR` is
/// unset, or preparation fails.
pub fn run() -> Result<Utf8PathBuf> {
    if let Err(err) = color_eyre::install() {
        tracing::debug!(target: LOG_TARGET, "color_eyre already installed: {err}");
    }

    let cfg = MysqldEnvCfg::load()?;
    if cfg.base_dir.is_none() {
        return Err(ConfigError::from(eyre!(
            "MYSQLD_BASE_DIR must name the directory to prepare"
        ))
        .into());
    }
    let config = cfg
        .to_config()
        .context("failed to resolve instance configuration")
        .map_err(ConfigError::from)?
        .with_auto_start(AutoStart::Disabled);

    let mut instance = MysqldInstance::new(config)?;
    instance.prepare()?;
    tracing::info!(
        target: LOG_TARGET,
        data_dir = %instance.data_directory(),
        "prepared mysqld data directory"
    );
    Ok(instance.data_directory().to_path_buf())
}

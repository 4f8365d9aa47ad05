//! Typed configuration for a single ephemeral server instance.
//!
//! [`InstanceConfig`] enumerates every recognised option. Server directives
//! that the crate does not interpret live in [`MyCnf`] and are rendered
//! verbatim into the option file.

mod env;
mod my_cnf;

pub use self::env::{
    BOOTSTRAP_TIMEOUT_ENV, LifecycleTimeouts, SHUTDOWN_TIMEOUT_ENV, START_TIMEOUT_ENV,
};
pub use self::my_cnf::{MyCnf, SECTION_HEADER};

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::provision::{DatabaseProvisioner, MysqlClientProvisioner};

/// Default account used for client connections.
pub const DEFAULT_USER: &str = "root";

/// Interval between readiness probes while waiting for the pid file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How much of the lifecycle runs during construction.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum AutoStart {
    /// Nothing beyond path derivation; the caller drives `prepare`/`start`.
    Disabled,
    /// Start the server over an already prepared directory tree.
    Start,
    /// Prepare the directory tree and data directory, then start the server.
    #[default]
    PrepareAndStart,
}

impl AutoStart {
    /// Returns `true` when construction starts the server.
    #[must_use]
    pub const fn starts(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Returns `true` when construction prepares the directory tree first.
    #[must_use]
    pub const fn prepares(self) -> bool {
        matches!(self, Self::PrepareAndStart)
    }
}

impl TryFrom<u8> for AutoStart {
    type Error = ConfigError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Start),
            2 => Ok(Self::PrepareAndStart),
            other => Err(ConfigError::from(eyre!(
                "auto-start level must be 0, 1, or 2 (received {other})"
            ))),
        }
    }
}

/// Options recognised when constructing a [`MysqldInstance`](crate::MysqldInstance).
///
/// # Examples
/// ```
/// use mysqld_ephemeral::{AutoStart, InstanceConfig};
///
/// let config = InstanceConfig::default()
///     .with_auto_start(AutoStart::Disabled)
///     .with_flag("skip-networking");
/// assert!(config.my_cnf.contains("skip-networking"));
/// assert_eq!(config.user, "root");
/// ```
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Lifecycle steps run during construction.
    pub auto_start: AutoStart,
    /// Caller-owned base directory. When `None` an owned temporary directory
    /// is created and removed by `cleanup`.
    pub base_dir: Option<Utf8PathBuf>,
    /// Explicit server binary; located on the search path when `None`.
    pub mysqld: Option<Utf8PathBuf>,
    /// Explicit legacy bootstrap tool; located on the search path when `None`.
    pub install_db: Option<Utf8PathBuf>,
    /// Server directives merged over the derived defaults.
    pub my_cnf: MyCnf,
    /// Account used for client connections.
    pub user: String,
    /// Optional password for `user`.
    pub password: Option<SecretString>,
    /// Data directory copied into the instance before bootstrap.
    pub copy_data_from: Option<Utf8PathBuf>,
    /// Timeouts bounding the blocking lifecycle phases.
    pub timeouts: LifecycleTimeouts,
    /// Interval between readiness probes.
    pub poll_interval: Duration,
    /// Creates the default database once the server is ready.
    pub provisioner: Arc<dyn DatabaseProvisioner>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            auto_start: AutoStart::default(),
            base_dir: None,
            mysqld: None,
            install_db: None,
            my_cnf: MyCnf::new(),
            user: DEFAULT_USER.to_owned(),
            password: None,
            copy_data_from: None,
            timeouts: LifecycleTimeouts::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            provisioner: Arc::new(MysqlClientProvisioner::default()),
        }
    }
}

impl InstanceConfig {
    /// Sets how much of the lifecycle runs during construction.
    #[must_use]
    pub fn with_auto_start(mut self, auto_start: AutoStart) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Uses `base_dir` instead of an owned temporary directory.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<Utf8PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Uses an explicit server binary.
    #[must_use]
    pub fn with_mysqld(mut self, mysqld: impl Into<Utf8PathBuf>) -> Self {
        self.mysqld = Some(mysqld.into());
        self
    }

    /// Uses an explicit legacy bootstrap tool.
    #[must_use]
    pub fn with_install_db(mut self, install_db: impl Into<Utf8PathBuf>) -> Self {
        self.install_db = Some(install_db.into());
        self
    }

    /// Adds or replaces a `key=value` server directive.
    #[must_use]
    pub fn with_directive(mut self, key: &str, value: impl Into<String>) -> Self {
        self.my_cnf.set(key, value);
        self
    }

    /// Adds a flag-only server directive.
    #[must_use]
    pub fn with_flag(mut self, key: &str) -> Self {
        self.my_cnf.set_flag(key);
        self
    }

    /// Pins the TCP port instead of allocating an unused one.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.my_cnf.set("port", port.to_string());
        self
    }

    /// Sets the account used for client connections.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the password used for client connections.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Seeds the data directory from a copy of `source`.
    #[must_use]
    pub fn with_copy_data_from(mut self, source: impl Into<Utf8PathBuf>) -> Self {
        self.copy_data_from = Some(source.into());
        self
    }

    /// Replaces the lifecycle timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: LifecycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bounds the readiness wait.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.start = timeout;
        self
    }

    /// Replaces the component that creates the default database.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Arc<dyn DatabaseProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }
}

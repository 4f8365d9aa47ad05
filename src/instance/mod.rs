//! Lifecycle controller for a single ephemeral `mysqld` process.
//!
//! A [`MysqldInstance`] records the process that constructed it. Only that
//! process may signal the server or delete its files, so a value inherited by
//! a forked child stays inert there.

#[cfg(feature = "async-api")]
mod async_api;
mod bootstrap;
mod connection;
mod paths;
mod prepare;
mod process;
mod shutdown;

pub use connection::{
    ConnectionOverrides, ConnectionParameters, DEFAULT_DATABASE, DEFAULT_HOST, ServerAddress,
    URL_SCHEME,
};
pub(crate) use connection::InstanceEndpoint;

use std::process::Child;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use nix::sys::signal::Signal;
use nix::unistd::{Pid, getpid};
use tracing::{Span, debug, info, info_span, warn};

use crate::config::{InstanceConfig, MyCnf};
use crate::error::{InstanceError, InstanceResult};
use crate::locator::{
    INSTALL_DB_PROGRAM, INSTALL_DB_SUBDIRS, ProgramLocator, SERVER_PROGRAM, SERVER_SUBDIRS,
};
use crate::observability::LOG_TARGET;

use self::paths::InstancePaths;
use self::prepare::PrepareRequest;
use self::process::SpawnRequest;

const TEMP_DIR_PREFIX: &str = "mysqld-ephemeral.";

/// Lifecycle position of a [`MysqldInstance`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InstanceState {
    /// Paths are derived; nothing has touched the filesystem yet.
    Unstarted,
    /// The directory tree and data directory are being materialised.
    Preparing,
    /// The directory tree and data directory are ready; no server has been
    /// started.
    Prepared,
    /// The server was spawned and readiness is pending.
    Starting,
    /// The pid file appeared and the default database exists.
    Running,
    /// The stop signal was sent and the process is being reaped.
    Stopping,
    /// The server has exited, either on request or unexpectedly.
    Stopped,
}

/// Owns one `mysqld` child process and the directory tree it runs from.
///
/// Dropping the value in the constructing process stops a running server and
/// removes an owned base directory. Dropping it anywhere else does nothing.
///
/// # Examples
/// ```no_run
/// use mysqld_ephemeral::{ConnectionOverrides, InstanceConfig, MysqldInstance};
///
/// let instance = MysqldInstance::new(InstanceConfig::default())?;
/// let url = instance.url(ConnectionOverrides::default().with_driver("mysqlclient"));
/// assert!(url.starts_with("mysql+mysqlclient://root@"));
/// # Ok::<(), mysqld_ephemeral::InstanceError>(())
/// ```
#[derive(Debug)]
pub struct MysqldInstance {
    config: InstanceConfig,
    paths: InstancePaths,
    owns_base_dir: bool,
    owner: Pid,
    mysqld: Utf8PathBuf,
    install_db: Option<Utf8PathBuf>,
    child: Mutex<Option<Child>>,
    pid: Option<Pid>,
    state: InstanceState,
    span: Span,
}

impl MysqldInstance {
    /// Builds an instance and runs the lifecycle steps selected by
    /// `config.auto_start`.
    ///
    /// # Errors
    /// - [`InstanceErrorKind::NotFound`](crate::InstanceErrorKind::NotFound)
    ///   when `mysqld` cannot be located.
    /// - [`InstanceErrorKind::AlreadyRunning`](crate::InstanceErrorKind::AlreadyRunning)
    ///   when a start is requested and the pid file already exists.
    /// - Any error raised by [`Self::prepare`] or [`Self::start`].
    pub fn new(mut config: InstanceConfig) -> InstanceResult<Self> {
        let locator = ProgramLocator::from_env();
        let mysqld = match config.mysqld.take() {
            Some(path) => path,
            None => locator.locate(SERVER_PROGRAM, SERVER_SUBDIRS)?,
        };
        let install_db = config
            .install_db
            .take()
            .or_else(|| locator.locate(INSTALL_DB_PROGRAM, INSTALL_DB_SUBDIRS).ok());

        let (base_dir, owns_base_dir) = match config.base_dir.take() {
            Some(dir) => (absolute(dir)?, false),
            None => (create_owned_base_dir()?, true),
        };
        let paths = InstancePaths::derive(&base_dir, &mut config.my_cnf);
        let span = info_span!(target: LOG_TARGET, "mysqld_instance", base_dir = %base_dir);

        let mut instance = Self {
            config,
            paths,
            owns_base_dir,
            owner: getpid(),
            mysqld,
            install_db,
            child: Mutex::new(None),
            pid: None,
            state: InstanceState::Unstarted,
            span,
        };

        let auto_start = instance.config.auto_start;
        if auto_start.starts() {
            instance.ensure_not_running()?;
        }
        if auto_start.prepares() {
            instance.prepare()?;
        }
        if auto_start.starts() {
            instance.start()?;
        }
        Ok(instance)
    }

    /// Materialises the directory tree, writes `my.cnf`, and bootstraps the
    /// data directory when it lacks system tables.
    ///
    /// Bootstrap is skipped when the data directory is already initialised.
    ///
    /// # Errors
    /// Returns an [`InstanceErrorKind::Setup`](crate::InstanceErrorKind::Setup)
    /// error when copying seed data, writing files, or bootstrapping fails.
    pub fn prepare(&mut self) -> InstanceResult<()> {
        let _entered = self.span.clone().entered();
        let previous = self.state;
        self.state = InstanceState::Preparing;
        let request = PrepareRequest {
            paths: &self.paths,
            copy_data_from: self.config.copy_data_from.as_deref(),
            mysqld: &self.mysqld,
            install_db: self.install_db.as_deref(),
            bootstrap_timeout: self.config.timeouts.bootstrap,
        };
        let outcome = prepare::prepare(&request, &mut self.config.my_cnf);
        // A running server keeps its state; rewriting my.cnf does not stop it.
        self.state = if outcome.is_ok() && self.pid.is_none() {
            InstanceState::Prepared
        } else {
            previous
        };
        outcome?;
        info!(target: LOG_TARGET, data_dir = %self.paths.data_dir, "instance prepared");
        Ok(())
    }

    /// Spawns the server, waits for its pid file, and creates the default
    /// database. Does nothing when the server is already running.
    ///
    /// A server that exited since the last call is reaped first, its stale
    /// pid file removed, and a fresh one spawned.
    ///
    /// # Errors
    /// - [`InstanceErrorKind::AlreadyRunning`](crate::InstanceErrorKind::AlreadyRunning)
    ///   when another server's pid file is present.
    /// - [`InstanceErrorKind::StartupFailed`](crate::InstanceErrorKind::StartupFailed)
    ///   when the server exits or fails to become ready in time. The message
    ///   carries the captured server log.
    /// - Any error raised while creating the default database; the server is
    ///   stopped first.
    pub fn start(&mut self) -> InstanceResult<()> {
        let _entered = self.span.clone().entered();
        self.reap_exited_server();
        if self.is_alive() {
            debug!(target: LOG_TARGET, "mysqld already running");
            return Ok(());
        }
        self.ensure_not_running()?;

        self.state = InstanceState::Starting;
        let request = SpawnRequest {
            mysqld: &self.mysqld,
            paths: &self.paths,
            timeout: self.config.timeouts.start,
            poll_interval: self.config.poll_interval,
        };
        let mut child = match process::spawn(&request) {
            Ok(child) => child,
            Err(err) => {
                self.state = InstanceState::Stopped;
                return Err(err);
            }
        };
        if let Err(err) = process::wait_until_ready(&mut child, &request) {
            self.state = InstanceState::Stopped;
            return Err(err);
        }

        self.pid = Some(process::child_pid(&child)?);
        *self.child.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(child);
        self.state = InstanceState::Running;

        let params = self.connection_parameters(ConnectionOverrides::default());
        if let Err(err) = self.config.provisioner.create_database(&params) {
            self.stop();
            return Err(err);
        }
        Ok(())
    }

    /// Stops the server with `SIGTERM`.
    pub fn stop(&mut self) {
        self.stop_with_signal(Signal::SIGTERM);
    }

    /// Sends `signal` to the server and waits for it to exit, escalating to
    /// `SIGKILL` after the shutdown timeout.
    ///
    /// Does nothing when the server is not running or when called from a
    /// process other than the one that constructed the instance.
    pub fn stop_with_signal(&mut self, signal: Signal) {
        let _entered = self.span.clone().entered();
        if !self.is_owner() {
            debug!(
                target: LOG_TARGET,
                owner = self.owner.as_raw(),
                "ignoring stop from non-owner process"
            );
            return;
        }
        self.reap_exited_server();
        let Some(pid) = self.pid else {
            debug!(target: LOG_TARGET, "mysqld not running; nothing to stop");
            return;
        };

        self.state = InstanceState::Stopping;
        let context = self.paths.base_dir.to_string();
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        shutdown::terminate(
            pid,
            child.as_mut(),
            signal,
            self.config.timeouts.shutdown,
            &context,
        );
        *child = None;
        self.pid = None;
        shutdown::remove_pid_file(&self.paths.pid_file, &context);
        self.state = InstanceState::Stopped;
        info!(target: LOG_TARGET, "mysqld stopped");
    }

    /// Removes the base directory when this instance created it, stopping the
    /// server first. Caller-supplied directories are left untouched.
    ///
    /// Does nothing outside the constructing process.
    pub fn cleanup(&mut self) {
        let _entered = self.span.clone().entered();
        if !self.is_owner() {
            debug!(target: LOG_TARGET, "ignoring cleanup from non-owner process");
            return;
        }
        if self.pid.is_some() {
            self.stop();
        }
        if self.owns_base_dir {
            shutdown::remove_base_dir(&self.paths.base_dir, self.paths.base_dir.as_str());
            self.owns_base_dir = false;
        }
    }

    /// Stops and cleans up the instance now rather than at scope exit.
    pub fn close(self) {
        drop(self);
    }

    /// Returns `true` while the recorded server has not exited.
    ///
    /// The spawned child is polled without blocking, so a server that crashed
    /// after becoming ready is reaped and reported dead. Without a child
    /// handle, as in a forked process, the pid is checked with signal 0.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(_))) => false,
            Some(Ok(None)) => true,
            Some(Err(_)) | None => process::is_alive(pid),
        }
    }

    /// Returns the server pid while it is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
            .filter(|_| self.is_alive())
            .and_then(|pid| u32::try_from(pid.as_raw()).ok())
    }

    /// Returns the current lifecycle position.
    ///
    /// A server that exited on its own reports [`InstanceState::Stopped`].
    #[must_use]
    pub fn state(&self) -> InstanceState {
        if self.state == InstanceState::Running && !self.is_alive() {
            return InstanceState::Stopped;
        }
        self.state
    }

    /// Returns `true` when the base directory will be deleted by
    /// [`Self::cleanup`].
    #[must_use]
    pub const fn owns_base_dir(&self) -> bool {
        self.owns_base_dir
    }

    /// Returns the instance base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.paths.base_dir
    }

    /// Returns the generated option file path.
    #[must_use]
    pub fn my_cnf_path(&self) -> &Utf8Path {
        &self.paths.my_cnf
    }

    /// Returns the effective server directives.
    #[must_use]
    pub const fn my_cnf(&self) -> &MyCnf {
        &self.config.my_cnf
    }

    /// Returns the data directory (the `datadir` directive).
    #[must_use]
    pub fn data_directory(&self) -> &Utf8Path {
        &self.paths.data_dir
    }

    /// Returns the readiness pid file path.
    #[must_use]
    pub fn pid_file(&self) -> &Utf8Path {
        &self.paths.pid_file
    }

    /// Returns the local socket path.
    #[must_use]
    pub fn socket(&self) -> &Utf8Path {
        &self.paths.socket
    }

    /// Returns the server log path.
    #[must_use]
    pub fn log_file(&self) -> &Utf8Path {
        &self.paths.log_file
    }

    /// Returns the configured TCP port, if networking is enabled.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.config
            .my_cnf
            .value("port")
            .and_then(|port| port.parse().ok())
    }

    /// Reads the captured server log.
    #[must_use]
    pub fn read_log(&self) -> String {
        process::read_log(&self.paths.log_file)
    }

    /// Resolves client connection parameters, preferring TCP when a port is
    /// configured and the local socket otherwise.
    #[must_use]
    pub fn connection_parameters(&self, overrides: ConnectionOverrides) -> ConnectionParameters {
        let endpoint = InstanceEndpoint {
            port: self.port(),
            bind_address: self.config.my_cnf.value("bind-address"),
            socket: &self.paths.socket,
            user: &self.config.user,
            password: self.config.password.as_ref(),
        };
        ConnectionParameters::resolve(endpoint, overrides)
    }

    /// Builds a connection URL from [`Self::connection_parameters`].
    #[must_use]
    pub fn url(&self, overrides: ConnectionOverrides) -> String {
        self.connection_parameters(overrides).url()
    }

    fn ensure_not_running(&self) -> InstanceResult<()> {
        if self.paths.pid_file.exists() {
            return Err(InstanceError::already_running(eyre!(
                "mysqld is already running ({})",
                self.paths.pid_file
            )));
        }
        Ok(())
    }

    fn is_owner(&self) -> bool {
        getpid() == self.owner
    }

    /// Forgets a server that exited without being stopped and removes the
    /// pid file it left behind.
    fn reap_exited_server(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if !self.is_owner() || self.is_alive() {
            return;
        }
        let status = self
            .child
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .and_then(|mut child| child.try_wait().ok().flatten());
        warn!(
            target: LOG_TARGET,
            pid = pid.as_raw(),
            status = ?status,
            "mysqld exited unexpectedly"
        );
        self.pid = None;
        shutdown::remove_pid_file(&self.paths.pid_file, self.paths.base_dir.as_str());
        self.state = InstanceState::Stopped;
    }
}

impl Drop for MysqldInstance {
    fn drop(&mut self) {
        if !self.is_owner() {
            return;
        }
        if self.pid.is_some() {
            self.stop();
        }
        self.cleanup();
    }
}

fn create_owned_base_dir() -> InstanceResult<Utf8PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .context("failed to create temporary base directory")
        .map_err(InstanceError::setup)?
        .keep();
    Utf8PathBuf::from_path_buf(dir).map_err(|path| {
        drop(std::fs::remove_dir_all(&path));
        InstanceError::setup(eyre!(
            "temporary base directory is not valid UTF-8: {}",
            path.display()
        ))
    })
}

fn absolute(dir: Utf8PathBuf) -> InstanceResult<Utf8PathBuf> {
    if dir.is_absolute() {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let joined = cwd.join(dir.as_std_path());
    Utf8PathBuf::from_path_buf(joined).map_err(|path| {
        InstanceError::from(eyre!("base directory is not valid UTF-8: {}", path.display()))
    })
}

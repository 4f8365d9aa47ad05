//! Creates the default working database once the server is ready.
//!
//! The controller never speaks the wire protocol itself. It hands the
//! resolved [`ConnectionParameters`] to a [`DatabaseProvisioner`]; the stock
//! implementation shells out to the `mysql` command-line client.

use std::fs::File;
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, eyre};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::error::{InstanceError, InstanceResult};
use crate::instance::{ConnectionParameters, ServerAddress};
use crate::locator::{CLIENT_PROGRAM, ProgramLocator};
use crate::observability::LOG_TARGET;

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const OUTPUT_CHAR_LIMIT: usize = 2_048;

/// Creates a database on a freshly started server.
pub trait DatabaseProvisioner: std::fmt::Debug + Send + Sync {
    /// Ensures `params.database()` exists, connecting with `params`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be created.
    fn create_database(&self, params: &ConnectionParameters) -> InstanceResult<()>;
}

/// Provisioner that leaves the server untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

impl DatabaseProvisioner for NoopProvisioner {
    fn create_database(&self, params: &ConnectionParameters) -> InstanceResult<()> {
        debug!(
            target: LOG_TARGET,
            database = params.database(),
            "skipping default database creation"
        );
        Ok(())
    }
}

/// Provisioner that runs `CREATE DATABASE IF NOT EXISTS` through the `mysql`
/// command-line client.
#[derive(Debug, Clone)]
pub struct MysqlClientProvisioner {
    client: Option<Utf8PathBuf>,
    timeout: Duration,
}

impl Default for MysqlClientProvisioner {
    fn default() -> Self {
        Self {
            client: None,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

impl MysqlClientProvisioner {
    /// Uses an explicit client binary instead of searching `PATH`.
    #[must_use]
    pub fn with_client(mut self, client: impl Into<Utf8PathBuf>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Bounds how long the client may run.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> InstanceResult<Utf8PathBuf> {
        match &self.client {
            Some(path) => Ok(path.clone()),
            None => ProgramLocator::from_env().locate(CLIENT_PROGRAM, &["bin"]),
        }
    }

    fn command(&self, params: &ConnectionParameters, sql: &str) -> InstanceResult<Command> {
        let mut command = Command::new(self.client()?.as_std_path());
        command.arg("--no-defaults");
        match params.address() {
            ServerAddress::Tcp { host, port } => {
                command.arg("--protocol=TCP");
                command.arg(format!("--host={host}"));
                command.arg(format!("--port={port}"));
            }
            ServerAddress::Socket(path) => {
                command.arg("--protocol=SOCKET");
                command.arg(format!("--socket={path}"));
            }
        }
        command.arg(format!("--user={}", params.user()));
        if let Some(password) = params.password() {
            command.env("MYSQL_PWD", password.expose_secret());
        }
        command.arg("--execute").arg(sql);
        command.stdin(Stdio::null());
        Ok(command)
    }

    fn run(&self, command: &mut Command) -> InstanceResult<()> {
        let capture = tempfile::tempfile().context("failed to create client output buffer")?;
        let stderr = capture
            .try_clone()
            .context("failed to share client output buffer")?;
        command.stdout(Stdio::from(capture.try_clone().context("failed to share client output buffer")?));
        command.stderr(Stdio::from(stderr));

        let mut child = command
            .spawn()
            .map_err(|err| InstanceError::setup(eyre!("failed to spawn mysql client: {err}")))?;
        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                drop(child.kill());
                drop(child.wait());
                return Err(InstanceError::setup(eyre!(
                    "mysql client timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            Err(err) => {
                drop(child.kill());
                drop(child.wait());
                return Err(InstanceError::setup(eyre!(
                    "failed to wait for mysql client: {err}"
                )));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(InstanceError::setup(eyre!(
                "mysql client exited with {status}: {}",
                read_captured(capture)
            )))
        }
    }
}

impl DatabaseProvisioner for MysqlClientProvisioner {
    fn create_database(&self, params: &ConnectionParameters) -> InstanceResult<()> {
        let sql = format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_identifier(params.database())
        );
        let mut command = self.command(params, &sql)?;
        self.run(&mut command)?;
        info!(
            target: LOG_TARGET,
            database = params.database(),
            "default database ready"
        );
        Ok(())
    }
}

fn read_captured(mut file: File) -> String {
    use std::io::{Read as _, Seek as _, SeekFrom};

    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_string(&mut text).is_err() {
        return String::from("<client output unavailable>");
    }
    text.chars().take(OUTPUT_CHAR_LIMIT).collect()
}

/// Quotes `name` as a MySQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

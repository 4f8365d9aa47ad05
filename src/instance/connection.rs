//! Connection parameters and URLs for a running instance.
//!
//! When a TCP port is configured the parameters prefer host/port addressing;
//! otherwise they point at the instance's local socket.
use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use secrecy::SecretString;

/// Default database created after startup and used by connection helpers.
pub const DEFAULT_DATABASE: &str = "test";

/// Host used for TCP addressing when no `bind-address` is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// URL scheme shared by every generated connection string.
pub const URL_SCHEME: &str = "mysql";

/// Caller-supplied values that take precedence over instance defaults.
///
/// # Examples
/// ```
/// use mysqld_ephemeral::ConnectionOverrides;
///
/// let overrides = ConnectionOverrides::default()
///     .with_database("app")
///     .with_charset("utf8mb4");
/// assert_eq!(overrides.database.as_deref(), Some("app"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    /// Host for TCP addressing.
    pub host: Option<String>,
    /// TCP port; forces host/port addressing.
    pub port: Option<u16>,
    /// Local socket path.
    ///
    /// Applies only when neither this override nor the instance configures a
    /// TCP port; any port forces host/port addressing.
    pub unix_socket: Option<Utf8PathBuf>,
    /// Account name.
    pub user: Option<String>,
    /// Account password.
    pub password: Option<SecretString>,
    /// Database name.
    pub database: Option<String>,
    /// Driver qualifier appended to the URL scheme (`mysql+<driver>`).
    pub driver: Option<String>,
    /// Character set appended to the URL query.
    pub charset: Option<String>,
}

impl ConnectionOverrides {
    /// Overrides the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Overrides the URL driver qualifier.
    #[must_use]
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Requests a character set in the URL query.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Overrides the account name.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Forces host/port addressing on `host:port`.
    #[must_use]
    pub fn with_tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }
}

/// How a client reaches the server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ServerAddress {
    /// TCP addressing.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Local socket addressing.
    Socket(Utf8PathBuf),
}

/// Resolved parameters for a database client.
#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    address: ServerAddress,
    user: String,
    password: Option<SecretString>,
    database: String,
    driver: Option<String>,
    charset: Option<String>,
}

/// Instance-side defaults consumed by [`ConnectionParameters::resolve`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct InstanceEndpoint<'a> {
    pub port: Option<u16>,
    pub bind_address: Option<&'a str>,
    pub socket: &'a Utf8Path,
    pub user: &'a str,
    pub password: Option<&'a SecretString>,
}

impl ConnectionParameters {
    pub(crate) fn resolve(endpoint: InstanceEndpoint<'_>, overrides: ConnectionOverrides) -> Self {
        let ConnectionOverrides {
            host,
            port,
            unix_socket,
            user,
            password,
            database,
            driver,
            charset,
        } = overrides;

        let address = match (port, unix_socket, endpoint.port) {
            (Some(port), _, _) => ServerAddress::Tcp {
                host: tcp_host(host, endpoint.bind_address),
                port,
            },
            (None, _, Some(port)) => ServerAddress::Tcp {
                host: tcp_host(host, endpoint.bind_address),
                port,
            },
            (None, Some(socket), None) => ServerAddress::Socket(socket),
            (None, None, None) => ServerAddress::Socket(endpoint.socket.to_path_buf()),
        };

        Self {
            address,
            user: user.unwrap_or_else(|| endpoint.user.to_owned()),
            password: password.or_else(|| endpoint.password.cloned()),
            database: database.unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            driver,
            charset,
        }
    }

    /// Returns how the client reaches the server.
    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the TCP host when using host/port addressing.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match &self.address {
            ServerAddress::Tcp { host, .. } => Some(host.as_str()),
            ServerAddress::Socket(_) => None,
        }
    }

    /// Returns the TCP port when using host/port addressing.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        match &self.address {
            ServerAddress::Tcp { port, .. } => Some(*port),
            ServerAddress::Socket(_) => None,
        }
    }

    /// Returns the socket path when using local socket addressing.
    #[must_use]
    pub fn unix_socket(&self) -> Option<&Utf8Path> {
        match &self.address {
            ServerAddress::Tcp { .. } => None,
            ServerAddress::Socket(path) => Some(path.as_path()),
        }
    }

    /// Returns the account name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the account password, if any.
    #[must_use]
    pub const fn password(&self) -> Option<&SecretString> {
        self.password.as_ref()
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns a copy addressing `database` instead.
    #[must_use]
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Builds a driver-qualified connection URL.
    ///
    /// Socket addressing yields
    /// `mysql[+driver]://user@localhost/db?unix_socket=<path>[&charset=cs]`;
    /// host/port addressing yields
    /// `mysql[+driver]://user@host:port/db[?charset=cs]`. The password is
    /// never embedded.
    ///
    /// Without a driver override the scheme is the unqualified `mysql`;
    /// `mysql+<driver>` appears only when [`ConnectionOverrides::driver`] is
    /// set.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = self.driver.as_deref().map_or_else(
            || URL_SCHEME.to_owned(),
            |driver| format!("{URL_SCHEME}+{driver}"),
        );
        let mut url = match &self.address {
            ServerAddress::Tcp { host, port } => {
                format!("{scheme}://{}@{host}:{port}/{}", self.user, self.database)
            }
            ServerAddress::Socket(path) => format!(
                "{scheme}://{}@localhost/{}?unix_socket={path}",
                self.user, self.database
            ),
        };
        if let Some(charset) = &self.charset {
            let separator = if url.contains('?') { '&' } else { '?' };
            // Writing into a String cannot fail.
            let _ignored = write!(url, "{separator}charset={charset}");
        }
        url
    }
}

fn tcp_host(host: Option<String>, bind_address: Option<&str>) -> String {
    host.or_else(|| bind_address.map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_HOST.to_owned())
}

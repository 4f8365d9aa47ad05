//! Resolves the executables an instance needs.
//!
//! Lookup first probes the search path, then falls back to treating each
//! known `mysql` client binary as an anchor and checking its sibling
//! directories (`<prefix>/bin/mysql` → `<prefix>/<subdir>/<name>`), which
//! covers tarball installs where `mysqld` lives in `libexec` or `sbin`.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tracing::debug;

use crate::error::{InstanceError, InstanceResult};
use crate::observability::LOG_TARGET;

/// Well-known installation prefixes probed for a `bin/mysql` anchor.
pub const SEARCH_PATHS: &[&str] = &["/usr/local/mysql"];

/// Subdirectories that may hold the `mysqld` server binary.
pub const SERVER_SUBDIRS: &[&str] = &["bin", "libexec", "sbin"];

/// Subdirectories that may hold the legacy `mysql_install_db` tool.
pub const INSTALL_DB_SUBDIRS: &[&str] = &["bin", "scripts"];

/// Executable name of the server.
pub const SERVER_PROGRAM: &str = "mysqld";

/// Executable name of the legacy bootstrap tool.
pub const INSTALL_DB_PROGRAM: &str = "mysql_install_db";

/// Executable name of the command-line client used as a sibling anchor.
pub const CLIENT_PROGRAM: &str = "mysql";

const ANCHOR_SUFFIX: &str = "/bin/mysql";

/// Stateless executable lookup over an explicit search path and root list.
///
/// # Examples
/// ```
/// use std::ffi::OsString;
/// use mysqld_ephemeral::ProgramLocator;
///
/// let locator = ProgramLocator::new(Some(OsString::new()), Vec::new());
/// assert!(locator.locate("mysqld", &["bin"]).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ProgramLocator {
    search_path: Option<OsString>,
    roots: Vec<Utf8PathBuf>,
}

impl ProgramLocator {
    /// Creates a locator over `search_path` (formatted like `PATH`) and the
    /// installation `roots` probed for a `bin/mysql` anchor.
    #[must_use]
    pub const fn new(search_path: Option<OsString>, roots: Vec<Utf8PathBuf>) -> Self {
        Self { search_path, roots }
    }

    /// Creates a locator from the process `PATH` and [`SEARCH_PATHS`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            env::var_os("PATH"),
            SEARCH_PATHS.iter().map(Utf8PathBuf::from).collect(),
        )
    }

    /// Resolves `name`, trying the search path first and then each anchor's
    /// sibling `subdirs` in order.
    ///
    /// # Errors
    /// Returns an [`InstanceErrorKind::NotFound`](crate::InstanceErrorKind::NotFound)
    /// error when no candidate exists.
    pub fn locate(&self, name: &str, subdirs: &[&str]) -> InstanceResult<Utf8PathBuf> {
        if let Some(path) = self.on_search_path(name) {
            debug!(target: LOG_TARGET, program = name, path = %path, "found on search path");
            return Ok(path);
        }

        for anchor in self.anchors() {
            if let Some(path) = sibling_candidates(&anchor, name, subdirs)
                .into_iter()
                .find(|candidate| is_executable_file(candidate))
            {
                debug!(
                    target: LOG_TARGET,
                    program = name,
                    anchor = %anchor,
                    path = %path,
                    "found beside client binary"
                );
                return Ok(path);
            }
        }

        Err(InstanceError::not_found(eyre!("command not found: {name}")))
    }

    /// Returns the first executable called `name` on the search path.
    #[must_use]
    pub fn on_search_path(&self, name: &str) -> Option<Utf8PathBuf> {
        let path_var = self.search_path.as_ref()?;
        env::split_paths(path_var)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(name))
            .filter_map(|candidate| Utf8PathBuf::from_path_buf(candidate).ok())
            .find(|candidate| is_executable_file(candidate))
    }

    fn anchors(&self) -> Vec<Utf8PathBuf> {
        let mut anchors: Vec<Utf8PathBuf> = self
            .roots
            .iter()
            .map(|root| root.join("bin").join(CLIENT_PROGRAM))
            .collect();
        anchors.extend(self.on_search_path(CLIENT_PROGRAM));
        anchors.retain(|anchor| anchor.exists());
        anchors
    }
}

impl Default for ProgramLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Resolves `name` using the process environment.
///
/// # Errors
/// Returns a `NotFound` error when the program cannot be located.
pub fn find_program(name: &str, subdirs: &[&str]) -> InstanceResult<Utf8PathBuf> {
    ProgramLocator::from_env().locate(name, subdirs)
}

fn sibling_candidates(anchor: &Utf8Path, name: &str, subdirs: &[&str]) -> Vec<Utf8PathBuf> {
    let Some(prefix) = anchor.as_str().strip_suffix(ANCHOR_SUFFIX) else {
        return Vec::new();
    };
    subdirs
        .iter()
        .map(|subdir| Utf8PathBuf::from(format!("{prefix}/{subdir}/{name}")))
        .collect()
}

fn is_executable_file(path: &Utf8Path) -> bool {
    let Ok(metadata) = std::fs::metadata(PathBuf::from(path.as_str())) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

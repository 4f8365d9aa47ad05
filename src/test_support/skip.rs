//! Capability check that decides whether `mysqld`-backed tests can run.
//!
//! Test harnesses call [`check_mysqld_installed`] before building an
//! instance and soft-skip on [`Availability::Skip`], printing the reason.

use crate::locator::{ProgramLocator, SERVER_PROGRAM, SERVER_SUBDIRS};

/// Prefix used by messages that tests convert into skips.
pub const SKIP_MYSQLD_PREFIX: &str = "SKIP-MYSQLD";

/// Message substrings that signal an environmental failure rather than a bug.
const DEFAULT_SKIP_CONDITIONS: &[(&str, &str)] = &[
    ("command not found", "mysqld binaries are not installed"),
    (
        "No such file or directory",
        "mysqld binaries were unavailable for the requested operation",
    ),
    (
        "Permission denied",
        "mysqld lacks filesystem permissions in this sandbox",
    ),
    (
        "--initialize-insecure",
        "the installed mysqld could not initialise a data directory",
    ),
    (
        "Address already in use",
        "another process claimed the allocated port",
    ),
];

/// Outcome of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Prerequisites are present.
    Run,
    /// Prerequisites are missing; the payload explains why.
    Skip(String),
}

impl Availability {
    /// Returns `true` when the test should run.
    #[must_use]
    pub const fn should_run(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Reports whether a `mysqld` binary can be located.
///
/// # Examples
/// ```
/// use mysqld_ephemeral::test_support::{Availability, check_mysqld_installed};
///
/// if let Availability::Skip(reason) = check_mysqld_installed() {
///     assert!(reason.starts_with("SKIP-MYSQLD"));
/// }
/// ```
#[must_use]
pub fn check_mysqld_installed() -> Availability {
    check_with(&ProgramLocator::from_env())
}

/// Runs the capability check against an explicit locator.
#[must_use]
pub fn check_with(locator: &ProgramLocator) -> Availability {
    match locator.locate(SERVER_PROGRAM, SERVER_SUBDIRS) {
        Ok(_) => Availability::Run,
        Err(err) => Availability::Skip(format_skip_reason(err.to_string())),
    }
}

/// Formats a skip message when any known environmental condition appears in
/// `message` or `debug`.
#[must_use]
pub fn skip_message(message: &str, debug: Option<&str>) -> Option<String> {
    let message_lc = message.to_ascii_lowercase();
    let debug_lc = debug.map_or_else(String::new, str::to_ascii_lowercase);
    DEFAULT_SKIP_CONDITIONS
        .iter()
        .find(|(needle, _)| {
            let needle_lc = needle.to_ascii_lowercase();
            message_lc.contains(&needle_lc) || debug_lc.contains(&needle_lc)
        })
        .map(|(_, reason)| format!("{SKIP_MYSQLD_PREFIX}: {reason}: {message}"))
}

/// Prefixes `reason` with the shared skip marker.
#[must_use]
pub fn format_skip_reason(reason: impl AsRef<str>) -> String {
    format!("{SKIP_MYSQLD_PREFIX}: {}", reason.as_ref())
}

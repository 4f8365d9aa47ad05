//! Parses timeout overrides from the environment.

use std::env::{self, VarError};
use std::time::Duration;

use color_eyre::eyre::eyre;

use crate::error::{ConfigError, ConfigResult};

pub(crate) const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(180);
const MAX_TIMEOUT_SECS: u64 = 600;

/// Environment variable bounding the readiness wait.
pub const START_TIMEOUT_ENV: &str = "MYSQLD_START_TIMEOUT_SECS";
/// Environment variable bounding the wait after the stop signal.
pub const SHUTDOWN_TIMEOUT_ENV: &str = "MYSQLD_SHUTDOWN_TIMEOUT_SECS";
/// Environment variable bounding the data-directory bootstrap.
pub const BOOTSTRAP_TIMEOUT_ENV: &str = "MYSQLD_BOOTSTRAP_TIMEOUT_SECS";

/// Timeouts applied to the blocking lifecycle phases.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LifecycleTimeouts {
    /// Maximum time to wait for the pid file after spawning the server.
    pub start: Duration,
    /// Grace period after the stop signal before the server is killed.
    pub shutdown: Duration,
    /// Maximum time the bootstrap tool may run.
    pub bootstrap: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_TIMEOUT,
            shutdown: DEFAULT_SHUTDOWN_TIMEOUT,
            bootstrap: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

impl LifecycleTimeouts {
    /// Reads all three timeouts, falling back to defaults for unset variables.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when a variable is empty, non-numeric, zero,
    /// larger than ten minutes, or not valid UTF-8.
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            start: timeout_from_env(START_TIMEOUT_ENV, DEFAULT_START_TIMEOUT)?,
            shutdown: timeout_from_env(SHUTDOWN_TIMEOUT_ENV, DEFAULT_SHUTDOWN_TIMEOUT)?,
            bootstrap: timeout_from_env(BOOTSTRAP_TIMEOUT_ENV, DEFAULT_BOOTSTRAP_TIMEOUT)?,
        })
    }
}

pub(crate) fn timeout_from_env(name: &str, default: Duration) -> ConfigResult<Duration> {
    match env::var(name) {
        Ok(raw) => parse_timeout(name, &raw),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(value)) => Err(ConfigError::from(eyre!(
            "{name} must contain a valid UTF-8 value (received {value:?})"
        ))),
    }
}

fn parse_timeout(name: &str, raw: &str) -> ConfigResult<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::from(eyre!("{name} is present but empty")));
    }

    let seconds: u64 = trimmed.parse().map_err(|err| {
        ConfigError::from(eyre!("failed to parse {name} from '{trimmed}': {err}"))
    })?;

    if seconds == 0 {
        return Err(ConfigError::from(eyre!(
            "{name} must be at least 1 second (received {trimmed})"
        )));
    }

    if seconds > MAX_TIMEOUT_SECS {
        return Err(ConfigError::from(eyre!(
            "{name} must be {MAX_TIMEOUT_SECS} seconds or less (received {trimmed})"
        )));
    }

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;
    use temp_env::with_var;

    #[rstest]
    #[case::empty("   ", "present but empty")]
    #[case::garbage("soon", "failed to parse")]
    #[case::zero("0", "at least 1 second")]
    #[case::too_large("601", "600 seconds or less")]
    fn rejects_invalid_values(#[case] raw: &str, #[case] needle: &str) {
        let err = parse_timeout(START_TIMEOUT_ENV, raw).expect_err("invalid timeout");
        assert!(err.to_string().contains(needle), "unexpected error: {err}");
    }

    #[test]
    fn accepts_padded_values() {
        let parsed = parse_timeout(START_TIMEOUT_ENV, " 42 ").expect("valid timeout");
        assert_eq!(parsed, Duration::from_secs(42));
    }

    #[test]
    #[serial]
    fn unset_variables_fall_back_to_defaults() {
        let timeouts = temp_env::with_vars_unset(
            [START_TIMEOUT_ENV, SHUTDOWN_TIMEOUT_ENV, BOOTSTRAP_TIMEOUT_ENV],
            LifecycleTimeouts::from_env,
        )
        .expect("defaults");
        assert_eq!(timeouts, LifecycleTimeouts::default());
    }

    #[test]
    #[serial]
    fn environment_overrides_start_timeout() {
        let timeouts = with_var(START_TIMEOUT_ENV, Some("5"), LifecycleTimeouts::from_env)
            .expect("override");
        assert_eq!(timeouts.start, Duration::from_secs(5));
    }
}

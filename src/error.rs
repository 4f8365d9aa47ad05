//! Domain error types for the ephemeral `mysqld` controller.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return a [`MysqldError`].
pub type Result<T> = std::result::Result<T, MysqldError>;

/// Result alias for instance lifecycle operations.
pub type InstanceResult<T> = std::result::Result<T, InstanceError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum MysqldError {
    /// Indicates an instance lifecycle operation failed.
    #[error("mysqld instance lifecycle failed")]
    Instance(#[from] InstanceError),
    /// Indicates configuration parsing failed.
    #[error("configuration parsing failed")]
    Config(#[from] ConfigError),
}

/// Categorises lifecycle failures so callers can branch on structured errors.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum InstanceErrorKind {
    /// Represents errors without a more specific semantic meaning.
    #[default]
    Other,
    /// A required executable could not be located.
    NotFound,
    /// A pid file already exists where the instance wants to start.
    AlreadyRunning,
    /// Copying seed data or bootstrapping the data directory failed.
    Setup,
    /// The server exited, or never signalled readiness, during startup.
    StartupFailed,
}

/// Captures lifecycle failures alongside their diagnostic chain.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct InstanceError {
    kind: InstanceErrorKind,
    #[source]
    report: Report,
}

impl InstanceError {
    /// Constructs a new instance error with the provided kind and diagnostic
    /// report.
    #[must_use]
    pub const fn new(kind: InstanceErrorKind, report: Report) -> Self {
        Self { kind, report }
    }

    /// Builds a [`InstanceErrorKind::NotFound`] error.
    #[must_use]
    pub const fn not_found(report: Report) -> Self {
        Self::new(InstanceErrorKind::NotFound, report)
    }

    /// Builds a [`InstanceErrorKind::AlreadyRunning`] error.
    #[must_use]
    pub const fn already_running(report: Report) -> Self {
        Self::new(InstanceErrorKind::AlreadyRunning, report)
    }

    /// Builds a [`InstanceErrorKind::Setup`] error.
    #[must_use]
    pub const fn setup(report: Report) -> Self {
        Self::new(InstanceErrorKind::Setup, report)
    }

    /// Builds a [`InstanceErrorKind::StartupFailed`] error.
    #[must_use]
    pub const fn startup_failed(report: Report) -> Self {
        Self::new(InstanceErrorKind::StartupFailed, report)
    }

    /// Returns the semantic category for this failure.
    #[must_use]
    pub const fn kind(&self) -> InstanceErrorKind {
        self.kind
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }
}

impl From<Report> for InstanceError {
    fn from(report: Report) -> Self {
        Self::new(InstanceErrorKind::Other, report)
    }
}

impl From<ConfigError> for InstanceError {
    fn from(err: ConfigError) -> Self {
        let ConfigError(report) = err;
        Self::new(InstanceErrorKind::Other, report)
    }
}

impl From<MysqldError> for InstanceError {
    fn from(err: MysqldError) -> Self {
        match err {
            MysqldError::Instance(inner) => inner,
            MysqldError::Config(inner) => inner.into(),
        }
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(InstanceError::not_found(eyre!("x")), InstanceErrorKind::NotFound)]
    #[case::running(
        InstanceError::already_running(eyre!("x")),
        InstanceErrorKind::AlreadyRunning
    )]
    #[case::setup(InstanceError::setup(eyre!("x")), InstanceErrorKind::Setup)]
    #[case::startup(
        InstanceError::startup_failed(eyre!("x")),
        InstanceErrorKind::StartupFailed
    )]
    #[case::report(InstanceError::from(eyre!("x")), InstanceErrorKind::Other)]
    fn constructors_assign_kind(#[case] err: InstanceError, #[case] expected: InstanceErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn config_error_unwraps_into_other_kind() {
        let err = InstanceError::from(MysqldError::from(ConfigError::from(eyre!("bad env"))));
        assert_eq!(err.kind(), InstanceErrorKind::Other);
        assert!(err.to_string().contains("bad env"));
    }

    #[test]
    fn instance_error_survives_round_trip_through_top_level() {
        let original = InstanceError::startup_failed(eyre!("exited early"));
        let err = InstanceError::from(MysqldError::from(original));
        assert_eq!(err.kind(), InstanceErrorKind::StartupFailed);
    }
}

//! Helpers shared by unit and integration tests.
//!
//! Provides the `mysqld` capability check used to soft-skip tests, shell
//! stand-ins for the server, and sandbox fixtures built on them. Log capture
//! is available under `cfg(test)` or the `test-logging` feature.

mod fake_server;
mod fixtures;
#[cfg(any(test, feature = "test-logging"))]
mod logging;
mod skip;

pub use fake_server::{FakeServerMode, script, write_fake_install_db, write_fake_mysqld};
pub use fixtures::{FakeServerSandbox, fake_config, fake_sandbox};
#[cfg(any(test, feature = "test-logging"))]
pub use logging::{capture_debug_logs, capture_warn_logs};
pub use skip::{
    Availability, SKIP_MYSQLD_PREFIX, check_mysqld_installed, check_with, format_skip_reason,
    skip_message,
};

//! Async wrappers that run the blocking lifecycle on Tokio's blocking pool.

use color_eyre::eyre::eyre;
use tracing::{Instrument as _, info_span};

use super::MysqldInstance;
use crate::config::InstanceConfig;
use crate::error::{InstanceError, InstanceResult};
use crate::observability::LOG_TARGET;

impl MysqldInstance {
    /// Constructs an instance from within an async context.
    ///
    /// Spawning, the readiness wait, and provisioning run through
    /// [`tokio::task::spawn_blocking`], so the caller's runtime keeps serving
    /// other tasks meanwhile.
    ///
    /// # Errors
    /// Returns the same errors as [`MysqldInstance::new`], or an `Other`
    /// error when the blocking task panics.
    ///
    /// # Examples
    /// ```no_run
    /// use mysqld_ephemeral::{InstanceConfig, MysqldInstance};
    ///
    /// # async fn demo() -> mysqld_ephemeral::InstanceResult<()> {
    /// let instance = MysqldInstance::spawn_async(InstanceConfig::default()).await?;
    /// assert!(instance.is_alive());
    /// instance.stop_async().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn spawn_async(config: InstanceConfig) -> InstanceResult<Self> {
        let span = info_span!(target: LOG_TARGET, "mysqld_spawn", async_mode = true);
        tokio::task::spawn_blocking(move || Self::new(config))
            .instrument(span)
            .await
            .map_err(|err| InstanceError::from(eyre!("mysqld spawn task panicked: {err}")))?
    }

    /// Stops the server and removes an owned base directory without blocking
    /// the async runtime.
    ///
    /// # Errors
    /// Returns an `Other` error when the blocking task panics.
    pub async fn stop_async(self) -> InstanceResult<()> {
        tokio::task::spawn_blocking(move || self.close())
            .await
            .map_err(|err| InstanceError::from(eyre!("mysqld stop task panicked: {err}")))
    }
}

//! Produces instances that start from a shared, pre-initialised data
//! directory.
//!
//! Bootstrapping a data directory is the slowest step of an instance's
//! lifecycle. A [`MysqldFactory`] with template caching builds one seed data
//! directory, optionally populates it through an initializer, and seeds every
//! later instance by copying it.
//!
//! # Cross-process reuse
//!
//! With [`MysqldFactory::with_cache_root`] the template lives at
//! `<root>/<key>`, where `key` hashes the factory configuration and the
//! initializer identity. Builds are serialised with an exclusive file lock
//! and finished templates carry a `.complete` marker, so parallel test
//! binaries share one build.

mod lock;
mod template;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use nix::unistd::{Pid, getpid};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::InstanceConfig;
use crate::error::{InstanceError, InstanceResult};
use crate::fs::{RemovalOutcome, remove_dir_all_if_exists};
use crate::instance::MysqldInstance;
use crate::observability::LOG_TARGET;

use self::lock::TemplateLock;

const TEMPLATE_DIR_PREFIX: &str = "mysqld-template.";

/// Callback that populates the template while its seed server runs.
pub type Initializer = Arc<dyn Fn(&MysqldInstance) -> color_eyre::Result<()> + Send + Sync>;

enum TemplateStore {
    /// Template private to this factory, removed with it.
    Owned { root: TempDir, data_dir: Utf8PathBuf },
    /// Template shared through the cache root.
    Shared {
        entry: Utf8PathBuf,
        data_dir: Utf8PathBuf,
    },
}

impl TemplateStore {
    fn data_dir(&self) -> &Utf8Path {
        match self {
            Self::Owned { data_dir, .. } | Self::Shared { data_dir, .. } => data_dir,
        }
    }
}

/// Creates [`MysqldInstance`]s from one base configuration.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use mysqld_ephemeral::{InstanceConfig, MysqldFactory, MysqldInstance};
///
/// let factory = MysqldFactory::new(InstanceConfig::default())
///     .with_template_cache()
///     .with_initializer(
///         "schema-v1",
///         Arc::new(|instance: &MysqldInstance| -> color_eyre::Result<()> {
///             assert!(instance.is_alive());
///             Ok(())
///         }),
///     );
/// let first = factory.create()?;
/// let second = factory.create()?;
/// assert_ne!(first.base_dir(), second.base_dir());
/// factory.clear_cache();
/// # Ok::<(), mysqld_ephemeral::InstanceError>(())
/// ```
pub struct MysqldFactory {
    config: InstanceConfig,
    cache_template: bool,
    cache_root: Option<Utf8PathBuf>,
    initializer: Option<(String, Initializer)>,
    template: Mutex<Option<TemplateStore>>,
    owner: Pid,
}

impl fmt::Debug for MysqldFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqldFactory")
            .field("config", &self.config)
            .field("cache_template", &self.cache_template)
            .field("cache_root", &self.cache_root)
            .field(
                "initializer",
                &self.initializer.as_ref().map(|(id, _)| id.as_str()),
            )
            .finish_non_exhaustive()
    }
}

impl MysqldFactory {
    /// Creates a factory that builds every instance from `config`.
    #[must_use]
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            cache_template: false,
            cache_root: None,
            initializer: None,
            template: Mutex::new(None),
            owner: getpid(),
        }
    }

    /// Seeds instances from a template data directory built once per factory.
    #[must_use]
    pub const fn with_template_cache(mut self) -> Self {
        self.cache_template = true;
        self
    }

    /// Shares the template with other processes through `root`. Implies
    /// [`Self::with_template_cache`].
    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.cache_template = true;
        self.cache_root = Some(root.into());
        self
    }

    /// Runs `initializer` against a started seed instance before the template
    /// is captured. `id` identifies the initializer in the cache key; change
    /// it whenever the callback's effect changes.
    #[must_use]
    pub fn with_initializer(mut self, id: impl Into<String>, initializer: Initializer) -> Self {
        self.initializer = Some((id.into(), initializer));
        self
    }

    /// Builds an instance, copying the template data directory when caching
    /// is enabled.
    ///
    /// Concurrent callers never build the template twice: the first builds
    /// it while the rest wait.
    ///
    /// # Errors
    /// Returns any error raised while building the template or constructing
    /// the instance.
    pub fn create(&self) -> InstanceResult<MysqldInstance> {
        if !self.cache_template {
            return MysqldInstance::new(self.config.clone());
        }
        let data_dir = self.ensure_template()?;
        MysqldInstance::new(self.config.clone().with_copy_data_from(data_dir))
    }

    /// Returns the template data directory once it has been built.
    #[must_use]
    pub fn template_dir(&self) -> Option<Utf8PathBuf> {
        self.lock_state()
            .as_ref()
            .map(|store| store.data_dir().to_path_buf())
    }

    /// Deletes the template and forgets it; the next [`Self::create`]
    /// rebuilds it.
    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        match state.take() {
            Some(TemplateStore::Owned { root, data_dir }) => {
                info!(target: LOG_TARGET, data_dir = %data_dir, "discarding template");
                drop(root);
            }
            Some(TemplateStore::Shared { entry, .. }) => remove_shared_entry(&entry),
            None => match self.cache_entry() {
                Some(entry) => remove_shared_entry(&entry),
                None => debug!(target: LOG_TARGET, "no template to clear"),
            },
        }
    }

    fn ensure_template(&self) -> InstanceResult<Utf8PathBuf> {
        let mut state = self.lock_state();
        if let Some(store) = state.as_ref() {
            if store.data_dir().is_dir() {
                return Ok(store.data_dir().to_path_buf());
            }
            warn!(
                target: LOG_TARGET,
                data_dir = %store.data_dir(),
                "template data directory vanished; rebuilding"
            );
        }

        let store = match &self.cache_root {
            Some(root) => self.build_shared(root)?,
            None => self.build_owned()?,
        };
        let data_dir = store.data_dir().to_path_buf();
        *state = Some(store);
        Ok(data_dir)
    }

    fn build_owned(&self) -> InstanceResult<TemplateStore> {
        let root = tempfile::Builder::new()
            .prefix(TEMPLATE_DIR_PREFIX)
            .tempdir()
            .context("failed to create template directory")
            .map_err(InstanceError::setup)?;
        let base = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).map_err(|path| {
            InstanceError::setup(eyre!(
                "template directory is not valid UTF-8: {}",
                path.display()
            ))
        })?;
        let data_dir = template::build(&self.config, &base, self.initializer_fn())?;
        Ok(TemplateStore::Owned { root, data_dir })
    }

    fn build_shared(&self, root: &Utf8Path) -> InstanceResult<TemplateStore> {
        let key = self.template_key();
        let entry = root.join(&key);
        let _lock = TemplateLock::acquire(root, &key)
            .with_context(|| format!("failed to lock template {entry}"))
            .map_err(InstanceError::setup)?;

        if template::is_complete(&entry) {
            if let Ok(data_dir) = template::recorded_data_dir(&entry, &key) {
                info!(target: LOG_TARGET, entry = %entry, "reusing cached template");
                return Ok(TemplateStore::Shared { entry, data_dir });
            }
        }

        if let Err(err) = remove_dir_all_if_exists(&entry) {
            return Err(InstanceError::setup(eyre!(
                "failed to clear partial template {entry}: {err}"
            )));
        }
        let data_dir = template::build(&self.config, &entry, self.initializer_fn())?;
        template::mark_complete(&entry, &key, &data_dir)?;
        info!(target: LOG_TARGET, entry = %entry, "template cached");
        Ok(TemplateStore::Shared { entry, data_dir })
    }

    fn template_key(&self) -> String {
        template::template_key(
            &self.config,
            self.initializer.as_ref().map(|(id, _)| id.as_str()),
        )
    }

    fn cache_entry(&self) -> Option<Utf8PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(self.template_key()))
    }

    fn initializer_fn(&self) -> Option<&Initializer> {
        self.initializer.as_ref().map(|(_, init)| init)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<TemplateStore>> {
        self.template.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MysqldFactory {
    fn drop(&mut self) {
        if getpid() == self.owner {
            return;
        }
        // A forked copy must leave the parent's private template in place.
        if let Some(TemplateStore::Owned { root, .. }) = self.lock_state().take() {
            drop(root.keep());
        }
    }
}

fn remove_shared_entry(entry: &Utf8Path) {
    match remove_dir_all_if_exists(entry) {
        Ok(RemovalOutcome::Removed) => {
            info!(target: LOG_TARGET, entry = %entry, "removed cached template");
        }
        Ok(RemovalOutcome::Missing) => {
            debug!(target: LOG_TARGET, entry = %entry, "cached template already absent");
        }
        Err(err) => warn!(
            target: LOG_TARGET,
            entry = %entry,
            error = %err,
            "failed to remove cached template"
        ),
    }
}

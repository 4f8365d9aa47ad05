//! Building and locating initialised template data directories.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::{AutoStart, InstanceConfig};
use crate::error::{InstanceError, InstanceResult};
use crate::instance::MysqldInstance;
use crate::observability::LOG_TARGET;

use super::Initializer;

/// Marker written once a shared template has been fully built.
pub(crate) const COMPLETION_MARKER: &str = ".complete";

/// Directives that place files and must point inside the seed's own tree.
const PATH_DIRECTIVES: &[&str] = &["datadir", "socket", "pid-file", "tmpdir", "port"];

/// Derives the cache key for a factory configuration.
///
/// The key covers everything that shapes the initialised data: the server
/// binary, non-path directives, the account, any seed copy, and the
/// initializer identity.
pub(crate) fn template_key(config: &InstanceConfig, initializer_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"mysqld\0");
    if let Some(mysqld) = &config.mysqld {
        hasher.update(mysqld.as_str());
    }
    hasher.update(b"\0my.cnf\0");
    for (key, value) in config.my_cnf.iter() {
        if PATH_DIRECTIVES.contains(&key) {
            continue;
        }
        hasher.update(key);
        hasher.update(b"=");
        hasher.update(value.unwrap_or_default());
        hasher.update(b"\n");
    }
    hasher.update(b"\0user\0");
    hasher.update(&config.user);
    hasher.update(b"\0copy\0");
    if let Some(source) = &config.copy_data_from {
        hasher.update(source.as_str());
    }
    hasher.update(b"\0init\0");
    if let Some(id) = initializer_id {
        hasher.update(id);
    }
    format!("{:x}", hasher.finalize())
}

/// Returns the seed configuration: never auto-started and rooted at
/// `base_dir` regardless of the caller's path directives.
pub(crate) fn seed_config(config: &InstanceConfig, base_dir: &Utf8Path) -> InstanceConfig {
    let mut seed = config.clone();
    for key in PATH_DIRECTIVES {
        if *key != "port" {
            seed.my_cnf.remove(key);
        }
    }
    seed.auto_start = AutoStart::Disabled;
    seed.base_dir = Some(base_dir.to_path_buf());
    seed
}

/// Prepares a seed instance under `base_dir`, runs `initializer` against it
/// while started, and returns the resulting data directory.
pub(crate) fn build(
    config: &InstanceConfig,
    base_dir: &Utf8Path,
    initializer: Option<&Initializer>,
) -> InstanceResult<Utf8PathBuf> {
    info!(target: LOG_TARGET, base_dir = %base_dir, "building template data directory");
    let mut seed = MysqldInstance::new(seed_config(config, base_dir))?;
    seed.prepare()?;

    if let Some(init) = initializer {
        seed.start()?;
        let outcome = init(&seed);
        seed.stop();
        outcome
            .wrap_err("template initializer failed")
            .map_err(InstanceError::setup)?;
    }

    Ok(seed.data_directory().to_path_buf())
}

pub(crate) fn is_complete(entry: &Utf8Path) -> bool {
    entry.join(COMPLETION_MARKER).is_file()
}

/// Contents of the completion marker.
#[derive(Debug, Serialize, Deserialize)]
struct TemplateMarker {
    key: String,
    data_dir: Utf8PathBuf,
}

pub(crate) fn mark_complete(
    entry: &Utf8Path,
    key: &str,
    data_dir: &Utf8Path,
) -> InstanceResult<()> {
    let marker = TemplateMarker {
        key: key.to_owned(),
        data_dir: data_dir.to_path_buf(),
    };
    let payload = serde_json::to_vec_pretty(&marker)
        .context("failed to serialise template marker")
        .map_err(InstanceError::setup)?;
    fs::write(entry.join(COMPLETION_MARKER), payload)
        .with_context(|| format!("failed to mark template {entry} complete"))
        .map_err(InstanceError::setup)
}

/// Reads the data directory recorded by [`mark_complete`], rejecting markers
/// written for another key or pointing at a missing directory.
pub(crate) fn recorded_data_dir(entry: &Utf8Path, key: &str) -> InstanceResult<Utf8PathBuf> {
    let raw = fs::read(entry.join(COMPLETION_MARKER))
        .with_context(|| format!("failed to read template marker in {entry}"))
        .map_err(InstanceError::setup)?;
    let marker: TemplateMarker = serde_json::from_slice(&raw)
        .with_context(|| format!("template marker in {entry} is malformed"))
        .map_err(InstanceError::setup)?;
    if marker.key != key {
        return Err(InstanceError::setup(eyre!(
            "template marker in {entry} belongs to key {}",
            marker.key
        )));
    }
    if marker.data_dir.is_dir() {
        Ok(marker.data_dir)
    } else {
        Err(InstanceError::setup(eyre!(
            "template data directory {} recorded in {entry} is missing",
            marker.data_dir
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_path_directives() {
        let plain = InstanceConfig::default();
        let moved = InstanceConfig::default()
            .with_directive("datadir", "/elsewhere")
            .with_port(3307);
        assert_eq!(template_key(&plain, None), template_key(&moved, None));
    }

    #[test]
    fn key_tracks_directives_and_initializer() {
        let plain = InstanceConfig::default();
        let tuned = InstanceConfig::default().with_directive("character-set-server", "utf8mb4");
        assert_ne!(template_key(&plain, None), template_key(&tuned, None));
        assert_ne!(
            template_key(&plain, None),
            template_key(&plain, Some("schema-v2"))
        );
    }

    #[test]
    fn seed_config_roots_paths_under_seed_dir() {
        let config = InstanceConfig::default()
            .with_directive("datadir", "/shared/var")
            .with_port(3307)
            .with_auto_start(AutoStart::PrepareAndStart);
        let seed = seed_config(&config, Utf8Path::new("/cache/abc"));
        assert!(!seed.my_cnf.contains("datadir"));
        assert_eq!(seed.my_cnf.value("port"), Some("3307"));
        assert_eq!(seed.auto_start, AutoStart::Disabled);
        assert_eq!(seed.base_dir.as_deref(), Some(Utf8Path::new("/cache/abc")));
    }

    #[test]
    fn marker_records_key_and_data_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let entry = Utf8Path::from_path(temp.path()).expect("utf8 path");
        let data_dir = entry.join("var");
        fs::create_dir_all(&data_dir).expect("create data dir");

        assert!(!is_complete(entry));
        mark_complete(entry, "abc", &data_dir).expect("mark complete");
        assert!(is_complete(entry));
        assert_eq!(recorded_data_dir(entry, "abc").expect("recorded"), data_dir);
        assert!(recorded_data_dir(entry, "def").is_err());

        fs::remove_dir_all(&data_dir).expect("remove data dir");
        assert!(recorded_data_dir(entry, "abc").is_err());
    }
}

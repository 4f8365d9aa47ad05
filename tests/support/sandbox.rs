//! Scratch directories with UTF-8 paths for integration tests.

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, Result, eyre};
use tempfile::TempDir;

/// Creates a temporary directory and returns it with its UTF-8 path.
pub fn utf8_tempdir() -> Result<(TempDir, Utf8PathBuf)> {
    let dir = tempfile::tempdir().context("create temporary directory")?;
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|path| eyre!("temporary path is not UTF-8: {}", path.display()))?;
    Ok((dir, path))
}

//! Prepares a `mysqld` instance directory at `MYSQLD_BASE_DIR` without
//! starting the server.
//!
//! The directory tree, `my.cnf`, and an initialised data directory are left
//! in place so tests can seed instances from it via `MYSQLD_COPY_DATA_FROM`.
//! Configuration is read from `MYSQLD_*` environment variables parsed by
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). The binary exits
//! with status code `0` on success and `1` on error.

fn main() -> color_eyre::eyre::Result<()> {
    mysqld_ephemeral::run().map_err(|err| color_eyre::eyre::eyre!(err))?;
    Ok(())
}

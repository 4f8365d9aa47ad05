//! Materialises the instance directory tree and data directory.

use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use camino::Utf8Path;
use color_eyre::eyre::{Context, eyre};
use tracing::{debug, info};

use crate::config::MyCnf;
use crate::error::{InstanceError, InstanceResult};
use crate::fs::{copy_dir_recursive, ensure_dir_exists, is_missing_or_empty};
use crate::observability::LOG_TARGET;

use super::bootstrap::{self, BootstrapRequest};
use super::paths::InstancePaths;

/// Inputs for [`prepare`].
#[derive(Debug)]
pub(crate) struct PrepareRequest<'a> {
    pub paths: &'a InstancePaths,
    pub copy_data_from: Option<&'a Utf8Path>,
    pub mysqld: &'a Utf8Path,
    pub install_db: Option<&'a Utf8Path>,
    pub bootstrap_timeout: Duration,
}

/// Copies seed data, creates the directory tree, writes `my.cnf`, and
/// bootstraps the data directory when its system tables are missing.
pub(crate) fn prepare(request: &PrepareRequest<'_>, my_cnf: &mut MyCnf) -> InstanceResult<()> {
    let paths = request.paths;
    if let Some(source) = request.copy_data_from {
        copy_seed(source, &paths.data_dir)?;
    }

    for dir in [&paths.etc_dir, &paths.data_dir, &paths.tmp_dir] {
        ensure_dir_exists(dir).map_err(InstanceError::setup)?;
    }

    assign_port(my_cnf)?;
    write_my_cnf(&paths.my_cnf, my_cnf)?;

    if paths.system_tables_marker().exists() {
        debug!(
            target: LOG_TARGET,
            data_dir = %paths.data_dir,
            "data directory already initialised"
        );
        return Ok(());
    }

    bootstrap::run(&BootstrapRequest {
        mysqld: request.mysqld,
        install_db: request.install_db,
        paths,
        timeout: request.bootstrap_timeout,
    })
}

fn copy_seed(source: &Utf8Path, data_dir: &Utf8Path) -> InstanceResult<()> {
    let empty = is_missing_or_empty(data_dir)
        .with_context(|| format!("failed to inspect {data_dir}"))
        .map_err(InstanceError::setup)?;
    if !empty {
        return Err(InstanceError::setup(eyre!(
            "cannot copy {source} into non-empty data directory {data_dir}"
        )));
    }
    copy_dir_recursive(source.as_std_path(), data_dir.as_std_path())
        .with_context(|| format!("failed to copy {source} to {data_dir}"))
        .map_err(InstanceError::setup)?;
    info!(
        target: LOG_TARGET,
        source = %source,
        data_dir = %data_dir,
        "seeded data directory from copy"
    );
    Ok(())
}

/// Allocates an unused loopback port unless networking is pinned or disabled.
fn assign_port(my_cnf: &mut MyCnf) -> InstanceResult<()> {
    if my_cnf.contains("port") || my_cnf.contains("skip-networking") {
        return Ok(());
    }
    let port = unused_port()?;
    my_cnf.set("port", port.to_string());
    debug!(target: LOG_TARGET, port, "assigned unused TCP port");
    Ok(())
}

pub(crate) fn unused_port() -> InstanceResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .context("failed to reserve a loopback port")
        .map_err(InstanceError::setup)?;
    let addr = listener
        .local_addr()
        .context("failed to read reserved port")
        .map_err(InstanceError::setup)?;
    Ok(addr.port())
}

fn write_my_cnf(path: &Utf8Path, my_cnf: &MyCnf) -> InstanceResult<()> {
    fs::write(path, my_cnf.render())
        .with_context(|| format!("failed to write {path}"))
        .map_err(InstanceError::setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstanceErrorKind;
    use camino::Utf8PathBuf;
    use tempfile::tempdir;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn assign_port_respects_skip_networking() {
        let mut cnf = MyCnf::new();
        cnf.set_flag("skip-networking");
        assign_port(&mut cnf).expect("assign");
        assert!(!cnf.contains("port"));
    }

    #[test]
    fn assign_port_keeps_explicit_port() {
        let mut cnf = MyCnf::new();
        cnf.set("port", "3307");
        assign_port(&mut cnf).expect("assign");
        assert_eq!(cnf.value("port"), Some("3307"));
    }

    #[test]
    fn assign_port_allocates_when_unset() {
        let mut cnf = MyCnf::new();
        assign_port(&mut cnf).expect("assign");
        let port: u16 = cnf
            .value("port")
            .expect("port assigned")
            .parse()
            .expect("numeric port");
        assert_ne!(port, 0);
    }

    #[test]
    fn copy_seed_refuses_populated_destination() {
        let temp = tempdir().expect("tempdir");
        let root = utf8(temp.path());
        let source = root.join("seed");
        let dest = root.join("var");
        fs::create_dir_all(source.join("mysql")).expect("create seed");
        fs::create_dir_all(&dest).expect("create dest");
        fs::write(dest.join("stale"), b"x").expect("populate dest");

        let err = copy_seed(&source, &dest).expect_err("populated destination");
        assert_eq!(err.kind(), InstanceErrorKind::Setup);
    }

    #[test]
    fn copy_seed_fills_missing_destination() {
        let temp = tempdir().expect("tempdir");
        let root = utf8(temp.path());
        let source = root.join("seed");
        fs::create_dir_all(source.join("mysql")).expect("create seed");
        fs::write(source.join("mysql/db.frm"), b"frm").expect("write seed");

        copy_seed(&source, &root.join("var")).expect("copy seed");
        assert!(root.join("var/mysql/db.frm").is_file());
    }
}

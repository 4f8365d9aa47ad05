//! Filesystem layout derived from the instance base directory.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::MyCnf;

pub(crate) const ETC_DIR: &str = "etc";
pub(crate) const DATA_DIR: &str = "var";
pub(crate) const TMP_DIR: &str = "tmp";
pub(crate) const MY_CNF: &str = "my.cnf";
pub(crate) const SERVER_LOG: &str = "mysqld.log";
pub(crate) const BOOTSTRAP_LOG: &str = "bootstrap.log";

/// Directory within the data directory whose presence marks a bootstrapped
/// data directory.
pub(crate) const SYSTEM_TABLES_MARKER: &str = "mysql";

/// Resolved locations for one instance.
#[derive(Debug, Clone)]
pub(crate) struct InstancePaths {
    pub base_dir: Utf8PathBuf,
    pub etc_dir: Utf8PathBuf,
    pub tmp_dir: Utf8PathBuf,
    pub data_dir: Utf8PathBuf,
    pub my_cnf: Utf8PathBuf,
    pub pid_file: Utf8PathBuf,
    pub socket: Utf8PathBuf,
    pub log_file: Utf8PathBuf,
    pub bootstrap_log: Utf8PathBuf,
}

impl InstancePaths {
    /// Fills the path directives the caller left unset and reads the
    /// effective locations back from `my_cnf`.
    pub(crate) fn derive(base_dir: &Utf8Path, my_cnf: &mut MyCnf) -> Self {
        let etc_dir = base_dir.join(ETC_DIR);
        let tmp_dir = base_dir.join(TMP_DIR);

        my_cnf.set_default("socket", tmp_dir.join("mysql.sock").as_str());
        my_cnf.set_default("datadir", base_dir.join(DATA_DIR).as_str());
        my_cnf.set_default("pid-file", tmp_dir.join("mysqld.pid").as_str());
        my_cnf.set_default("tmpdir", tmp_dir.as_str());

        let data_dir = resolve(my_cnf, "datadir", base_dir, base_dir.join(DATA_DIR));
        // mysqld reads relative pid-file and socket paths from inside datadir.
        let pid_file = resolve(my_cnf, "pid-file", &data_dir, tmp_dir.join("mysqld.pid"));
        let socket = resolve(my_cnf, "socket", &data_dir, tmp_dir.join("mysql.sock"));

        Self {
            base_dir: base_dir.to_path_buf(),
            my_cnf: etc_dir.join(MY_CNF),
            log_file: tmp_dir.join(SERVER_LOG),
            bootstrap_log: tmp_dir.join(BOOTSTRAP_LOG),
            etc_dir,
            tmp_dir,
            data_dir,
            pid_file,
            socket,
        }
    }

    pub(crate) fn system_tables_marker(&self) -> Utf8PathBuf {
        self.data_dir.join(SYSTEM_TABLES_MARKER)
    }
}

/// Makes the `key` directive absolute against `parent` and writes it back so
/// the server and the readiness poller agree on the location. A flag-only
/// directive takes `fallback`.
fn resolve(
    my_cnf: &mut MyCnf,
    key: &str,
    parent: &Utf8Path,
    fallback: Utf8PathBuf,
) -> Utf8PathBuf {
    let path = my_cnf
        .value(key)
        .map_or(fallback, |value| absolutise(parent, value));
    my_cnf.set(key, path.as_str());
    path
}

fn absolutise(base_dir: &Utf8Path, value: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

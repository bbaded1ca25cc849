//! Local layout of collected auto-update logs

use std::path::{Path, PathBuf};

use crate::filesys::file::File;

/// Subdirectory of the caller's log directory holding auto-update logs
pub const AUTO_UPDATE_LOG_DIR: &str = "autoupdate_logs";

/// Name of the main cros-update log of a host and process
pub fn au_log_filename(host_name: &str, pid: i64) -> String {
    format!("CrOS_update_{}_{}.log", host_name, pid)
}

/// `<log_dir>/autoupdate_logs`, one file set per (host, pid)
#[derive(Debug, Clone)]
pub struct AuLogDir {
    path: PathBuf,
}

impl AuLogDir {
    /// Auto-update log directory under the caller's `log_dir`
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            path: log_dir.as_ref().join(AUTO_UPDATE_LOG_DIR),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cros-update log of one auto-update process
    pub fn main_log(&self, host_name: &str, pid: i64) -> File {
        File::new(self.path.join(au_log_filename(host_name, pid)))
    }

    /// A log pulled from the DUT, e.g. `update_engine`
    pub fn host_log(&self, name: &str, host_name: &str, pid: i64) -> File {
        File::new(self.path.join(format!("{}_{}_{}", name, host_name, pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_layout() {
        let dir = AuLogDir::new("/var/log/provision");
        assert_eq!(
            dir.main_log("chromeos1-row1-host1", 1234).path(),
            Path::new("/var/log/provision/autoupdate_logs/CrOS_update_chromeos1-row1-host1_1234.log")
        );
        assert_eq!(
            dir.host_log("update_engine", "10.0.0.9", 7).path(),
            Path::new("/var/log/provision/autoupdate_logs/update_engine_10.0.0.9_7")
        );
    }
}

//! Post-attempt auto-update housekeeping
//!
//! None of these steps fails an auto-update by itself: each reports whether
//! it worked and logs why it did not.

use devserver_api::AuLogs;
use tracing::debug;

use crate::errors::DevServerError;
use crate::filesys::log_dir::AuLogDir;
use crate::servers::ImageServer;

fn au_args(host_name: &str, pid: i64) -> [(String, String); 2] {
    [
        ("host_name".to_string(), host_name.to_string()),
        ("pid".to_string(), pid.to_string()),
    ]
}

impl ImageServer {
    /// Kill a lingering auto-update process of `host_name` on the devserver
    pub async fn kill_au_process_for_host(&self, host_name: &str, pid: i64) -> bool {
        let response = self
            .call_rpc("kill_au_proc", &au_args(host_name, pid), self.options().rpc.call_timeout)
            .await;
        match response {
            Ok(answer) if answer == "True" => true,
            Ok(answer) => {
                debug!(
                    "Failed to kill the triggered CrOS auto_update process on devserver {}, the response is {}",
                    self.url(),
                    answer
                );
                false
            }
            Err(e) => {
                debug!("Failed to kill auto_update process {} for {}: {}", pid, host_name, e);
                false
            }
        }
    }

    /// Remove the devserver's track-status file of an auto-update process
    pub async fn clean_track_log(&self, host_name: &str, pid: i64) -> bool {
        if pid == 0 {
            return false;
        }
        match self
            .call_rpc("handler_cleanup", &au_args(host_name, pid), self.options().rpc.call_timeout)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    "Failed to clean track_status_file on devserver for host {} and process id {}: {}",
                    host_name, pid, e
                );
                false
            }
        }
    }

    /// Save the logs of an auto-update process under `log_dir`
    pub async fn collect_au_log(&self, host_name: &str, pid: i64, log_dir: &AuLogDir) -> bool {
        if pid == 0 {
            return false;
        }
        match self.write_au_logs(host_name, pid, log_dir).await {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Failed to collect auto-update log on devserver for host {} and process id {}: {}",
                    host_name, pid, e
                );
                false
            }
        }
    }

    async fn write_au_logs(&self, host_name: &str, pid: i64, log_dir: &AuLogDir) -> Result<(), DevServerError> {
        let response = self
            .call_rpc(
                "collect_cros_au_log",
                &au_args(host_name, pid),
                self.options().rpc.call_timeout,
            )
            .await?;
        let main_log = log_dir.main_log(host_name, pid);
        debug!("Saving auto-update logs into {}", main_log.path().display());

        let logs: AuLogs = serde_json::from_str(&response).map_err(|e| {
            debug!("Failed to load json response: {}", response);
            DevServerError::Devserver(e.to_string())
        })?;

        for (name, contents) in &logs.host_logs {
            log_dir
                .host_log(name, host_name, pid)
                .write_string(contents)
                .await
                .map_err(|e| {
                    DevServerError::Devserver(format!("Failed to write auto-update hostlogs: {}", e))
                })?;
        }

        main_log.write_string(&logs.cros_au_log).await.map_err(|_| {
            DevServerError::Devserver(format!(
                "Failed to write auto-update logs into {}",
                main_log.path().display()
            ))
        })
    }
}

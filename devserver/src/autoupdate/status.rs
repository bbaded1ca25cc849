//! Tracking a triggered auto-update until the devserver reports it finished

use devserver_api::{AuStatus, AuTriggerResponse};
use tracing::debug;

use crate::errors::DevServerError;
use crate::servers::ImageServer;
use crate::utils::poll_until;

/// Outcome of waiting on one triggered auto-update
#[derive(Debug)]
pub struct AuProgress {
    /// The process ran to completion or failed for good
    pub finished: bool,
    /// Error that ended the wait, if any
    pub raised_error: Option<DevServerError>,
    /// Auto-update process id on the devserver; 0 when nothing was started,
    /// -1 for a process kicked off without tracking
    pub pid: i64,
}

/// Interpret one `get_au_status` answer
fn parse_au_status(body: &str) -> Result<bool, DevServerError> {
    let status: AuStatus = serde_json::from_str(body)
        .map_err(|e| DevServerError::Devserver(format!("{} (Got AU status: {:?})", e, body)))?;
    match status {
        AuStatus::Detailed(detail) => {
            if let Some(msg) = detail.detailed_error_msg.filter(|m| !m.is_empty()) {
                return Err(DevServerError::Devserver(msg));
            }
            if !detail.finished {
                debug!("Current CrOS auto-update status: {:?}", detail.status);
            }
            Ok(detail.finished)
        }
        AuStatus::Pair(finished, status) => {
            if !finished {
                debug!("Current CrOS auto-update status: {}", status);
            }
            Ok(finished)
        }
    }
}

impl ImageServer {
    /// Parse the `cros_au` answer and, for a tracked process, poll
    /// `get_au_status` until it finishes.
    ///
    /// Failures are returned in [`AuProgress::raised_error`] together with
    /// whatever pid was learned, so the caller can still clean up after the
    /// process.
    pub async fn check_for_auto_update_finished(
        &self,
        response: &str,
        args: &[(String, String)],
    ) -> AuProgress {
        let trigger: AuTriggerResponse = match serde_json::from_str(response) {
            Ok(trigger) => trigger,
            Err(e) => {
                debug!("Failed to trigger auto-update process on devserver");
                return AuProgress {
                    finished: true,
                    raised_error: Some(DevServerError::Devserver(format!(
                        "{} (Got cros_au response: {:?})",
                        e, response
                    ))),
                    pid: 0,
                };
            }
        };

        let pid = if trigger.kicked_off() { trigger.pid() } else { 0 };
        if pid <= 0 {
            return AuProgress {
                finished: false,
                raised_error: None,
                pid,
            };
        }

        debug!("start process {} for auto_update in devserver", pid);
        match self.wait_for_auto_update(pid, args).await {
            Ok(()) => AuProgress {
                finished: true,
                raised_error: None,
                pid,
            },
            Err(e) => {
                debug!("Failed to finish auto-update process {}: {}", pid, e);
                AuProgress {
                    finished: true,
                    raised_error: Some(e),
                    pid,
                }
            }
        }
    }

    async fn wait_for_auto_update(&self, pid: i64, args: &[(String, String)]) -> Result<(), DevServerError> {
        debug!("Check the progress for auto-update process {}", pid);
        let mut status_args = args.to_vec();
        status_args.push(("pid".to_string(), pid.to_string()));
        let call = self.build_call("get_au_status", status_args);

        let au = &self.options().au;
        let call = &call;
        poll_until(
            &format!("CrOS auto-update process {} to finish", pid),
            au.finish_timeout,
            au.poll_interval,
            move || async move {
                match self.run_call(call, None).await {
                    Ok(body) => parse_au_status(&body),
                    Err(e) if e.is_transient() => {
                        debug!("get_au_status failed, will retry: {}", e);
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            },
        )
        .await?;
        debug!("CrOS auto-update is finished");
        Ok(())
    }
}

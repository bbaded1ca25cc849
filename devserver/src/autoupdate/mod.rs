//! CrOS auto-update orchestration
//!
//! One [`ImageServer::auto_update`] call runs a bounded number of attempts.
//! Each attempt triggers `cros_au`, waits for the devserver to finish, then
//! collects logs and cleans up the remote state. Failed attempts are
//! classified to decide whether to retry here, retry with the original
//! stateful payload, or hand the DUT to another devserver.

use std::path::PathBuf;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::app::state::Context;
use crate::build_name::metric_fields;
use crate::classify::{ClassifiedError, RetryPolicy};
use crate::errors::DevServerError;
use crate::filesys::log_dir::AuLogDir;
use crate::http::bool_arg;
use crate::servers::ImageServer;
use crate::telemetry::{Metric, PROVISION_PATH};

mod cleanup;
mod status;

pub use crate::filesys::log_dir::{au_log_filename, AUTO_UPDATE_LOG_DIR};
pub use status::AuProgress;

/// Parameters of one auto-update operation
#[derive(Debug, Clone)]
pub struct AuRequest {
    /// DUT to update
    pub host_name: String,
    /// Build to install, e.g. `lumpy-release/R60-9500.0.0`
    pub build_name: String,
    /// Board of the build currently on the DUT
    pub original_board: Option<String>,
    /// Release version currently on the DUT
    pub original_release_version: Option<String>,
    /// Where to save devserver-side logs; nothing is saved without it
    pub log_dir: Option<PathBuf>,
    /// Update even if the DUT already runs `build_name`
    pub force_update: bool,
    /// Skip stateful update and reimage directly
    pub full_update: bool,
    /// Exact, already staged payload to update from
    pub payload_filename: Option<String>,
    /// Update stateful with the payload of the current build
    pub force_original: bool,
    /// Clean install of stateful
    pub clobber_stateful: bool,
    /// Try quick provision first
    pub quick_provision: bool,
}

impl AuRequest {
    pub fn new(host_name: impl Into<String>, build_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            build_name: build_name.into(),
            original_board: None,
            original_release_version: None,
            log_dir: None,
            force_update: false,
            full_update: false,
            payload_filename: None,
            force_original: false,
            clobber_stateful: true,
            quick_provision: false,
        }
    }

    fn args(&self, host_name: &str) -> Vec<(String, String)> {
        let mut args = vec![
            ("host_name".to_string(), host_name.to_string()),
            ("build_name".to_string(), self.build_name.clone()),
            ("force_update".to_string(), bool_arg(self.force_update)),
            ("full_update".to_string(), bool_arg(self.full_update)),
            ("clobber_stateful".to_string(), bool_arg(self.clobber_stateful)),
            ("quick_provision".to_string(), bool_arg(self.quick_provision)),
        ];
        if let Some(payload) = &self.payload_filename {
            args.push(("payload_filename".to_string(), payload.clone()));
        }
        args
    }
}

/// Fields shared by the attempt and provision metrics
#[derive(Debug, Clone)]
struct BuildFields {
    board: String,
    build_type: String,
    milestone: String,
    dut_host_name: String,
    dev_server: String,
    build_name: String,
}

impl BuildFields {
    fn tag(&self, metric: Metric) -> Metric {
        metric
            .field("board", &self.board)
            .field("build_type", &self.build_type)
            .field("dut_host_name", &self.dut_host_name)
            .field("dev_server", &self.dev_server)
    }
}

/// Emits the per-attempt metrics when dropped
struct AttemptOutcome {
    ctx: Context,
    fields: BuildFields,
    attempt: u32,
    started: Instant,
    success: bool,
    failure: Option<&'static str>,
}

impl Drop for AttemptOutcome {
    fn drop(&mut self) {
        let tag = |metric: Metric| {
            self.fields
                .tag(metric)
                .field("attempt", self.attempt)
                .field("success", self.success)
        };
        self.ctx.metrics.record(tag(Metric::string(
            format!("{}/auto_update_build_by_devserver_dut", PROVISION_PATH),
            &self.fields.build_name,
        )));
        if !self.success {
            self.ctx.metrics.record(tag(Metric::string(
                format!("{}/auto_update_failure_reason_by_devserver_dut", PROVISION_PATH),
                self.failure.unwrap_or_default(),
            )));
        }
        self.ctx.metrics.record(tag(Metric::seconds(
            format!("{}/auto_update_duration_by_devserver_dut", PROVISION_PATH),
            self.started.elapsed().as_secs() as f64,
        )));
    }
}

/// Emits the per-operation metrics when dropped
struct ProvisionOutcome {
    ctx: Context,
    fields: BuildFields,
    started: Instant,
    success: bool,
    first_failure: Option<&'static str>,
}

impl Drop for ProvisionOutcome {
    fn drop(&mut self) {
        let tag = |metric: Metric| self.fields.tag(metric).field("success", self.success);
        self.ctx.metrics.record(tag(Metric::string(
            format!("{}/provision_build_by_devserver_dut", PROVISION_PATH),
            &self.fields.build_name,
        )));
        if let Some(reason) = self.first_failure {
            self.ctx.metrics.record(tag(Metric::string(
                format!("{}/provision_failure_reason_by_devserver_dut", PROVISION_PATH),
                reason,
            )));
        }
        self.ctx.metrics.record(tag(Metric::seconds(
            format!("{}/provision_duration_by_devserver_dut", PROVISION_PATH),
            self.started.elapsed().as_secs() as f64,
        )));
    }
}

/// Error for a failed operation given the failures of its attempts
fn aggregate_failures(
    host_name: &str,
    failures: &[ClassifiedError],
    switch_devserver: bool,
) -> DevServerError {
    let Some(first) = failures.first() else {
        return DevServerError::Devserver(format!(
            "CrOS auto-update failed for host {}: RPC calls after the whole auto-update process failed.",
            host_name
        ));
    };

    let summary = failures
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}) {}", i, e.summary()))
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!("CrOS auto-update failed for host {}: {}", host_name, summary);

    // The first attempt's category picks the error type.
    if switch_devserver {
        DevServerError::RetryableProvision(message)
    } else {
        first.category().to_error(message)
    }
}

impl ImageServer {
    /// Auto-update a CrOS DUT to `req.build_name`.
    ///
    /// Returns `(true, pid)` of the successful devserver process. Failures
    /// that another devserver may not have surface as
    /// [`DevServerError::RetryableProvision`].
    pub async fn auto_update(&self, req: &AuRequest) -> Result<(bool, i64), DevServerError> {
        let ctx = self.context();
        let au = &self.options().au;
        let au_log_dir = req.log_dir.as_ref().map(AuLogDir::new);

        let (board, build_type, milestone) = metric_fields(&req.build_name);
        let fields = BuildFields {
            board,
            build_type,
            milestone,
            dut_host_name: req.host_name.clone(),
            dev_server: self.resolved_hostname(),
            build_name: req.build_name.clone(),
        };
        let mut provision = ProvisionOutcome {
            ctx: ctx.clone(),
            fields: fields.clone(),
            started: Instant::now(),
            success: false,
            first_failure: None,
        };

        let mut host_name = req.host_name.clone();
        let mut force_original = req.force_original;
        let mut switch_devserver = false;
        let mut failures: Vec<ClassifiedError> = Vec::new();
        let mut pid = 0;

        for attempt in 0..au.retry_limit {
            debug!(
                "Start CrOS auto-update for host {} at {} time(s).",
                req.host_name,
                attempt + 1
            );
            let mut outcome = AttemptOutcome {
                ctx: ctx.clone(),
                fields: fields.clone(),
                attempt: attempt + 1,
                started: Instant::now(),
                success: false,
                failure: None,
            };
            let args = req.args(&host_name);

            let mut trigger_args = args.clone();
            if let (true, Some(version)) = (force_original, &req.original_release_version) {
                let original_build = format!(
                    "{}/{}",
                    req.original_board.as_deref().unwrap_or_default(),
                    version
                );
                ctx.metrics.record(
                    Metric::counter(format!("{}/cros_update_with_original_build", PROVISION_PATH))
                        .field("dev_server", &fields.dev_server)
                        .field("board", &fields.board)
                        .field("build_type", &fields.build_type)
                        .field("milestone", &fields.milestone)
                        .field("original_build", &original_build),
                );
                debug!(
                    "Try updating stateful partition of the host with the same version of its current rootfs partition: {}",
                    original_build
                );
                trigger_args.push(("original_build".to_string(), original_build));
            }
            trigger_args.push(("async".to_string(), bool_arg(true)));

            let failure = match self
                .call_rpc("cros_au", &trigger_args, self.options().rpc.call_timeout)
                .await
            {
                Err(e) => {
                    debug!("Exception raised on auto_update attempt #{}:\n{}", attempt + 1, e);
                    Some(ClassifiedError::new(&e.to_string(), true))
                }
                Ok(response) => {
                    info!("Received response from devserver for cros_au call: {:?}", response);
                    let progress = self.check_for_auto_update_finished(&response, &args).await;
                    pid = progress.pid;

                    let collected = match &au_log_dir {
                        Some(dir) => self.collect_au_log(&host_name, pid, dir).await,
                        None => true,
                    };
                    let cleaned = if pid >= 0 {
                        self.clean_track_log(&host_name, pid).await
                    } else {
                        true
                    };

                    if progress.raised_error.is_none() && cleaned && collected {
                        debug!("CrOS auto-update succeed for host {}", req.host_name);
                        outcome.success = true;
                        None
                    } else {
                        if !self.kill_au_process_for_host(&host_name, pid).await {
                            debug!("Failed to kill auto_update process {}", pid);
                        }
                        progress.raised_error.map(|e| {
                            let error = e.to_string();
                            debug!("Exception raised on auto_update attempt #{}:\n{}", attempt + 1, error);
                            if let Some(dir) = &au_log_dir {
                                debug!(
                                    "Please see error details in log {}",
                                    dir.main_log(&host_name, pid).path().display()
                                );
                            }
                            let classified = ClassifiedError::new(&error, false);
                            match classified.retry_policy() {
                                RetryPolicy::SwitchDevserver => switch_devserver = true,
                                RetryPolicy::UseOriginalPayload => force_original = true,
                                RetryPolicy::SameHost => {}
                            }
                            classified
                        })
                    }
                }
            };

            outcome.failure = failure.as_ref().map(|f| f.classification());
            let success = outcome.success;
            drop(outcome);
            if let Some(failure) = failure {
                failures.push(failure);
                provision.first_failure = failures.first().map(|f| f.classification());
            }

            if success {
                provision.success = true;
                return Ok((true, pid));
            }
            if switch_devserver {
                break;
            }
            if attempt + 1 < au.retry_limit {
                tokio::time::sleep(au.retry_interval).await;
                // Route around name resolution trouble on the next attempt.
                if let Some(ip) = ctx.resolver.lookup(&req.host_name).await {
                    host_name = ip.to_string();
                    debug!("AU failed, trying IP instead of hostname: {}", host_name);
                }
            }
        }

        Err(aggregate_failures(&req.host_name, &failures, switch_devserver))
    }
}

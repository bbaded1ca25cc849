//! Asynchronous artifact staging
//!
//! `stage` only queues work on the devserver and answers `Success`. The
//! client then polls `is_staged` with the same arguments until the artifacts
//! are in place, so a long download never ties up a devserver worker.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::build_name::LaunchControlBuild;
use crate::classify::PROXY_ERROR;
use crate::errors::DevServerError;
use crate::http::{bool_arg, call_with_policy};
use crate::servers::DevServer;
use crate::telemetry::{Metric, DEVSERVER_PATH};
use crate::utils::poll_until;

/// Artifacts needed to start installing a CrOS image
pub const ARTIFACTS_FOR_IMAGE: &str = "full_payload,test_suites,stateful";

/// Everything a CrOS test run needs, including autotest
pub const ARTIFACTS_FOR_IMAGE_WITH_AUTOTEST: &str =
    "full_payload,test_suites,control_files,stateful,autotest_packages";

/// Artifacts needed to reimage a device from a Launch Control build
pub const ARTIFACTS_FOR_LAUNCH_CONTROL: &str = "zip_images,vendor_partitions";

/// Plain answer of a devserver that accepted a request
pub const SUCCESS: &str = "Success";

pub(crate) type Args = Vec<(String, String)>;

pub(crate) fn arg(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Records the staging outcome when dropped
struct StageOutcome {
    ctx: crate::app::state::Context,
    artifacts: String,
    dev_server: String,
    started: Instant,
    success: bool,
}

impl Drop for StageOutcome {
    fn drop(&mut self) {
        self.ctx.metrics.record(
            Metric::seconds(
                format!("{}/stage_artifact_duration", DEVSERVER_PATH),
                self.started.elapsed().as_secs_f64(),
            )
            .field("artifacts", &self.artifacts)
            .field("dev_server", &self.dev_server),
        );
        self.ctx.metrics.record(
            Metric::counter(format!("{}/stage_artifact", DEVSERVER_PATH))
                .field("success", self.success)
                .field("artifacts", &self.artifacts)
                .field("dev_server", &self.dev_server),
        );
    }
}

impl DevServer {
    /// Issue an async RPC and wait until `is_staged` confirms the same
    /// arguments.
    ///
    /// A `Proxy Error` answer means the devserver is overloaded; the call is
    /// retried after a back-off by the call policy. Any other answer than
    /// `expected` fails with `error_message`.
    pub(crate) async fn call_and_wait(
        &self,
        method: &str,
        args: &Args,
        expected: Option<&str>,
        error_message: &str,
    ) -> Result<String, DevServerError> {
        let ctx = self.context();
        call_with_policy(
            ctx,
            "call_and_wait",
            &self.hostname(),
            ctx.options.rpc.call_timeout,
            move || async move { self.call_and_wait_once(method, args, expected, error_message).await },
        )
        .await
    }

    async fn call_and_wait_once(
        &self,
        method: &str,
        args: &Args,
        expected: Option<&str>,
        error_message: &str,
    ) -> Result<String, DevServerError> {
        let mut call_args = args.clone();
        call_args.push(arg("async", bool_arg(true)));
        let call = self.build_call(method, call_args);

        let response = self.run_call(&call, None).await?;
        debug!("response for RPC: {:?}", response);
        if response.contains(PROXY_ERROR) {
            debug!(
                "Proxy error happens in RPC call, will retry in {:?}",
                self.options().stage.overload_backoff
            );
            tokio::time::sleep(self.options().stage.overload_backoff).await;
            return Err(DevServerError::Overloaded);
        }

        if let Some(expected) = expected {
            if response != expected {
                return Err(DevServerError::Devserver(error_message.to_string()));
            }
        }

        self.poll_is_staged(args).await?;
        Ok(response)
    }

    /// Poll `is_staged` until it answers `True`.
    ///
    /// Transport failures keep the poll going. An error the devserver reports
    /// ends it: the staging job itself failed.
    pub(crate) async fn poll_is_staged(&self, args: &Args) -> Result<(), DevServerError> {
        let call = self.build_call("is_staged", args.iter().cloned());
        let stage = &self.options().stage;
        let call = &call;
        poll_until("is_staged", stage.timeout, stage.poll_interval, move || async move {
            match self.run_call(call, None).await {
                Ok(result) => {
                    debug!("whether artifact is staged: {:?}", result);
                    Ok(result == "True")
                }
                Err(e) if e.is_transient() => {
                    warn!("Error in is_staged: {}, will retry", e);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Stage `artifacts` and `files` of `build`, then wait for them.
    ///
    /// `extra` carries build identification beyond `archive_url`, such as
    /// the Launch Control triple.
    pub(crate) async fn stage_build(
        &self,
        build: &str,
        artifacts: &[&str],
        files: &[&str],
        archive_url: Option<&str>,
        extra: Args,
    ) -> Result<(), DevServerError> {
        let archive_url = match archive_url {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("{}{}", self.options().storage_server_for(artifacts), build),
        };
        let artifacts_arg = artifacts.join(",");
        let files_arg = files.join(",");
        let error_message = format!(
            "staging artifacts={} files={}  for {} failed;HTTP OK not accompanied by 'Success'.",
            artifacts_arg, files_arg, build
        );
        let staging_info = format!(
            "build={}, artifacts={:?}, files={:?}, archive_url={}",
            build, artifacts, files, archive_url
        );
        info!("Staging artifacts on devserver {}: {}", self.url(), staging_info);

        let mut outcome = StageOutcome {
            ctx: self.context().clone(),
            artifacts: artifacts_arg.clone(),
            dev_server: self.resolved_hostname(),
            started: Instant::now(),
            success: false,
        };

        let mut args = vec![
            arg("archive_url", archive_url),
            arg("artifacts", artifacts_arg),
            arg("files", files_arg),
        ];
        args.extend(extra);

        match self.call_and_wait("stage", &args, Some(SUCCESS), &error_message).await {
            Ok(_) => {
                info!("Finished staging artifacts: {}", staging_info);
                outcome.success = true;
                Ok(())
            }
            Err(DevServerError::PollTimeout(_)) | Err(DevServerError::Timeout { .. }) => {
                error!("stage_artifacts timed out: {}", staging_info);
                Err(DevServerError::Devserver(format!(
                    "stage_artifacts timed out: {}",
                    staging_info
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the devserver to stage `artifacts` of `build`. When `synchronous`,
    /// block until staging is complete.
    pub(crate) async fn trigger_build_download(
        &self,
        build: &str,
        artifacts: &str,
        synchronous: bool,
        build_info: Option<&LaunchControlBuild>,
    ) -> Result<(), DevServerError> {
        let archive_url = match build_info {
            Some(_) => String::new(),
            None => format!("{}{}", self.options().image_storage_server, build),
        };
        let error_message = format!(
            "trigger_download for {} failed;HTTP OK not accompanied by 'Success'.",
            build
        );
        let args = download_args(archive_url, artifacts, build_info);

        info!("trigger_download starts for {}", build);
        let response = match self.call_and_wait("stage", &args, Some(SUCCESS), &error_message).await {
            Ok(response) => response,
            Err(DevServerError::PollTimeout(_)) | Err(DevServerError::Timeout { .. }) => {
                error!("trigger_download timed out for {}.", build);
                return Err(DevServerError::Devserver(format!(
                    "trigger_download timed out for {}.",
                    build
                )));
            }
            Err(e) => return Err(e),
        };
        info!("trigger_download finishes for {}", build);

        if response == SUCCESS && synchronous {
            self.finish_build_download(build, artifacts, build_info)
                .await?;
        }
        Ok(())
    }

    /// Wait until every artifact in `artifacts` is staged for `build`
    pub(crate) async fn finish_build_download(
        &self,
        build: &str,
        artifacts: &str,
        build_info: Option<&LaunchControlBuild>,
    ) -> Result<(), DevServerError> {
        let archive_url = format!("{}{}", self.options().image_storage_server, build);
        let error_message = format!(
            "finish_download for {} failed;HTTP OK not accompanied by 'Success'.",
            build
        );
        let args = download_args(archive_url, artifacts, build_info);

        match self.call_and_wait("stage", &args, Some(SUCCESS), &error_message).await {
            Ok(_) => Ok(()),
            Err(DevServerError::PollTimeout(_)) | Err(DevServerError::Timeout { .. }) => {
                error!("finish_download timed out for {}", build);
                Err(DevServerError::Devserver(format!(
                    "finish_download timed out for {}.",
                    build
                )))
            }
            Err(e) => Err(e),
        }
    }
}

fn download_args(archive_url: String, artifacts: &str, build_info: Option<&LaunchControlBuild>) -> Args {
    let mut args = vec![
        arg("archive_url", archive_url),
        arg("artifacts", artifacts),
        arg("files", ""),
    ];
    if let Some(info) = build_info {
        args.extend(info.args());
        args.push(arg("os_type", "android"));
    }
    args
}

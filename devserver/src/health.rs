//! Devserver load and health checks

use std::time::Duration;

use devserver_api::HealthReport;
use tracing::{debug, error};

use crate::app::options::ClientOptions;
use crate::app::state::Context;
use crate::host::{hostname_of, reverse_lookup};
use crate::http::{build_call, call_with_policy, run_call, NO_ARGS};
use crate::telemetry::{Metric, DEVSERVER_PATH};

/// Minimum free disk space, in GB
pub const MIN_FREE_DISK_GB: f64 = 20.0;

/// Maximum live Apache connections
pub const MAX_APACHE_CLIENT_COUNT: u64 = 75;

/// CPU load ceiling for least-loaded selection, in percent
pub const MAX_CPU_PERCENT: f64 = 80.0;

/// Network throughput ceiling for least-loaded selection, 80 MB/s
pub const MAX_NETWORK_IO: f64 = 1024.0 * 1024.0 * 80.0;

/// Fetch the load report of a devserver.
///
/// Returns `None` on any failure so one bad devserver never fails a whole
/// selection.
pub async fn get_devserver_load(
    ctx: &Context,
    devserver: &str,
    timeout: Duration,
) -> Option<HealthReport> {
    let call = build_call(devserver, "check_health", NO_ARGS);
    let hostname = hostname_of(devserver);

    let result = {
        let call = &call;
        call_with_policy(ctx, "get_load", &hostname, timeout, move || {
            run_call(ctx, call, Some(timeout))
        })
        .await
    }
    .and_then(|body| serde_json::from_str::<HealthReport>(&body).map_err(Into::into));

    match result {
        Ok(load) => Some(load),
        Err(e) => {
            error!(
                "Devserver call failed: \"{}\", timeout: {} seconds, Error: {}",
                call,
                timeout.as_secs_f64(),
                e
            );
            None
        }
    }
}

/// Whether the devserver has enough free disk. A report without the metric
/// does not pass.
pub fn is_free_disk_ok(options: &ClientOptions, load: &HealthReport) -> bool {
    if options.skip_health_check {
        debug!("devserver health check is skipped.");
        return true;
    }
    matches!(load.free_disk, Some(free) if free >= MIN_FREE_DISK_GB)
}

/// Whether the devserver has Apache connections to spare
pub fn is_apache_client_count_ok(options: &ClientOptions, load: &HealthReport) -> bool {
    if options.skip_health_check {
        debug!("devserver health check is skipped.");
        return true;
    }
    match load.apache_client_count {
        Some(count) => count <= MAX_APACHE_CLIENT_COUNT,
        None => {
            debug!("Apache client count is not collected from devserver.");
            true
        }
    }
}

/// Whether CPU and network load leave room for another job
pub fn is_load_healthy(devserver: &str, load: &HealthReport) -> bool {
    if let Some(cpu) = load.cpu_percent {
        if cpu > MAX_CPU_PERCENT {
            debug!(
                "CPU load of devserver {} is at {}%, which is higher than the threshold of {}%",
                devserver, cpu, MAX_CPU_PERCENT
            );
            return false;
        }
    }
    if let Some(network) = load.network_total_bytes_per_second {
        if network > MAX_NETWORK_IO {
            debug!(
                "Network IO of devserver {} is at {} Bps, which is higher than the threshold of {} bytes per second.",
                devserver, network, MAX_NETWORK_IO
            );
            return false;
        }
    }
    true
}

/// Emits the health check outcome when dropped
struct HealthCheckOutcome<'a> {
    ctx: &'a Context,
    dev_server: String,
    healthy: bool,
    reason: &'static str,
    au_count: Option<u64>,
}

impl Drop for HealthCheckOutcome<'_> {
    fn drop(&mut self) {
        self.ctx.metrics.record(
            Metric::counter(format!("{}/devserver_healthy", DEVSERVER_PATH))
                .field("dev_server", &self.dev_server)
                .field("healthy", self.healthy)
                .field("reason", self.reason),
        );
        if let Some(count) = self.au_count.filter(|c| *c > 0) {
            self.ctx.metrics.record(
                Metric::gauge(format!("{}/devserver_au_count", DEVSERVER_PATH), count as f64)
                    .field("dev_server", &self.dev_server),
            );
        }
    }
}

/// Whether a devserver can take a new staging job
pub async fn devserver_healthy(ctx: &Context, devserver: &str) -> bool {
    let load = get_devserver_load(ctx, devserver, ctx.options.rpc.health_timeout).await;
    let mut outcome = HealthCheckOutcome {
        ctx,
        dev_server: reverse_lookup(&hostname_of(devserver), &ctx.options.hostname_addr_map),
        healthy: false,
        reason: "",
        au_count: load.as_ref().and_then(|l| l.au_process_count),
    };

    let Some(load) = load else {
        outcome.reason = "(1) Failed to get load.";
        return false;
    };

    if !is_apache_client_count_ok(&ctx.options, &load) {
        outcome.reason = "(2) Apache client count too high.";
        error!(
            "Devserver check_health failed. Live Apache client count is too high: {}.",
            load.apache_client_count.unwrap_or_default()
        );
        return false;
    }

    if !is_free_disk_ok(&ctx.options, &load) {
        outcome.reason = "(3) Disk space too low.";
        error!(
            "Devserver check_health failed. Free disk space is low. Only {}GB is available.",
            load.free_disk.unwrap_or_default()
        );
        return false;
    }

    outcome.healthy = true;
    true
}

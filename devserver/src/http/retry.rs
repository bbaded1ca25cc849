//! Retry policy for devserver RPCs

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::app::state::Context;
use crate::errors::DevServerError;
use crate::telemetry::{Metric, DEVSERVER_PATH};
use crate::utils::calc_exp_backoff;

/// Run `op`, retrying transient failures until `budget` is spent.
///
/// Only errors for which [`DevServerError::is_transient`] holds are retried;
/// anything the devserver reported on purpose is returned at once. A final
/// timeout is counted under `call_timeout`, tagged with the RPC `label` and
/// the devserver `hostname`.
pub async fn call_with_policy<T, F, Fut>(
    ctx: &Context,
    label: &str,
    hostname: &str,
    budget: Duration,
    mut op: F,
) -> Result<T, DevServerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DevServerError>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = calc_exp_backoff(&ctx.options.rpc.backoff, attempt);
        if err.is_transient() && started.elapsed() + delay < budget {
            warn!("{} failed on {}: {}. Retrying in {:?}", label, hostname, err, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        if err.is_timeout() {
            debug!("RPC call {} has timed out on devserver {}.", label, hostname);
            ctx.metrics.record(
                Metric::counter(format!("{}/call_timeout", DEVSERVER_PATH))
                    .field("dev_server", hostname)
                    .field("healthy", label),
            );
        }
        return Err(err);
    }
}

//! Least-loaded devserver selection

use std::sync::Arc;

use devserver_api::HealthReport;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::errors::DevServerError;
use crate::health::{get_devserver_load, is_apache_client_count_ok, is_free_disk_ok, is_load_healthy};
use crate::resolver::Resolver;

/// Max concurrent `check_health` calls
const MAX_CONCURRENT: usize = 32;

impl Resolver {
    /// The devserver with the least disk I/O among those with spare capacity.
    ///
    /// Candidates follow the same location policy as [`Resolver::resolve`]:
    /// the search widens to the unrestricted pool only when no candidate is
    /// healthy and widening is allowed. Loads are fetched concurrently, each
    /// bounded by the configured load timeout. Ties go to the earlier server
    /// in configuration order. Returns `None` when no devserver qualifies.
    pub async fn get_least_loaded_devserver(
        &self,
        hostname: Option<&str>,
    ) -> Result<Option<String>, DevServerError> {
        debug!("Get the least loaded {}", self.kind);
        let (mut devservers, can_retry) = self.get_available_devservers(hostname).await?;

        if self
            .get_healthy_devserver("", devservers.clone(), &[])
            .await
            .is_none()
        {
            if !can_retry {
                return Ok(None);
            }
            devservers = self.get_available_devservers(None).await?.0;
        }

        let loads = self.fetch_loads(&devservers).await;

        let loads: Vec<(String, HealthReport)> = loads
            .into_iter()
            .filter_map(|(server, load)| load.map(|l| (server, l)))
            .filter(|(_, load)| {
                load.cpu_percent.is_some()
                    && is_free_disk_ok(&self.ctx.options, load)
                    && is_apache_client_count_ok(&self.ctx.options, load)
            })
            .collect();
        if loads.is_empty() {
            debug!("Failed to retrieve load stats from any devserver. No load balancing can be applied.");
            return Ok(None);
        }

        let loads: Vec<(String, HealthReport)> = loads
            .into_iter()
            .filter(|(server, load)| is_load_healthy(server, load))
            .collect();
        if loads.is_empty() {
            error!("No devserver has the capacity to be selected.");
            return Ok(None);
        }

        let mut best: Option<(String, f64)> = None;
        for (server, load) in loads {
            let disk_io = load.disk_total_bytes_per_second.unwrap_or_default();
            match &best {
                Some((_, lowest)) if disk_io >= *lowest => {}
                _ => best = Some((server, disk_io)),
            }
        }
        Ok(best.map(|(server, _)| server))
    }

    /// Load of every server, in input order. A server whose task panicked or
    /// timed out reports `None`.
    async fn fetch_loads(&self, devservers: &[String]) -> Vec<(String, Option<HealthReport>)> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let timeout = self.ctx.options.rpc.load_timeout;

        let handles = devservers.iter().map(|server| {
            let sem = Arc::clone(&semaphore);
            let ctx = self.ctx.clone();
            let server = server.clone();
            tokio::spawn(async move {
                let _permit = sem.acquire().await.ok()?;
                tokio::time::timeout(timeout, get_devserver_load(&ctx, &server, timeout))
                    .await
                    .ok()
                    .flatten()
            })
        });

        join_all(handles)
            .await
            .into_iter()
            .zip(devservers.iter().cloned())
            .map(|(joined, server)| (server, joined.ok().flatten()))
            .collect()
    }
}

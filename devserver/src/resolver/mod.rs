//! Devserver selection
//!
//! A build hashes to the same devserver for every caller, so repeated
//! requests for one build land where it is likely cached. Selection honors
//! the requesting DUT's location: DUTs in a restricted subnet only ever get a
//! devserver from that subnet.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use tracing::{debug, error, info};

use crate::app::state::Context;
use crate::errors::DevServerError;
use crate::health::devserver_healthy;
use crate::host::hostname_of;
use crate::http::RpcCall;
use crate::net::{is_in_same_subnet, restricted_subnet_for};
use crate::servers::{DevServer, ServerKind};
use crate::telemetry::{Metric, DEVSERVER_PATH};
use crate::utils::{build_hash, synthetic_build_name};

mod least_loaded;

/// Picks devservers of one kind
#[derive(Clone)]
pub struct Resolver {
    ctx: Context,
    kind: ServerKind,
}

impl Resolver {
    pub fn new(ctx: Context, kind: ServerKind) -> Self {
        Self { ctx, kind }
    }

    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    /// Every configured server of this kind
    pub fn servers(&self) -> Vec<String> {
        self.kind.servers(&self.ctx.options).to_vec()
    }

    async fn server_ip(&self, server: &str) -> Option<Ipv4Addr> {
        self.ctx.resolver.lookup(&hostname_of(server)).await
    }

    /// Servers outside every restricted subnet
    pub async fn get_unrestricted_devservers(&self) -> Vec<String> {
        let subnets = &self.ctx.options.restricted_subnets;
        let servers = self.servers();
        if subnets.is_empty() {
            return servers;
        }

        let mut unrestricted = Vec::with_capacity(servers.len());
        for server in servers {
            let restricted = match self.server_ip(&server).await {
                Some(ip) => restricted_subnet_for(ip, subnets).is_some(),
                None => false,
            };
            if !restricted {
                unrestricted.push(server);
            }
        }
        unrestricted
    }

    /// Servers in the `/mask_bits` subnet of `ip`
    pub async fn get_devservers_in_same_subnet(
        &self,
        ip: Ipv4Addr,
        mask_bits: u8,
        unrestricted_only: bool,
    ) -> Result<Vec<String>, DevServerError> {
        let candidates = if unrestricted_only {
            self.get_unrestricted_devservers().await
        } else {
            self.servers()
        };
        if candidates.is_empty() {
            let pool = if unrestricted_only { "unrestricted only" } else { "all" };
            return Err(DevServerError::FailToLocate(format!(
                "Fail to locate a devserver for dut {} in {} devservers",
                ip, pool
            )));
        }

        let mut same_subnet = Vec::new();
        for server in candidates {
            if let Some(server_ip) = self.server_ip(&server).await {
                if is_in_same_subnet(ip, server_ip, mask_bits) {
                    same_subnet.push(server);
                }
            }
        }
        Ok(same_subnet)
    }

    /// Candidate servers for a DUT and whether the caller may widen the
    /// search when none of them is usable
    pub async fn get_available_devservers(
        &self,
        hostname: Option<&str>,
    ) -> Result<(Vec<String>, bool), DevServerError> {
        if !self.kind.is_location_bound() {
            return Ok((self.servers(), false));
        }

        info!("Getting devservers for host: {}", hostname.unwrap_or("None"));
        let host_ip = match hostname {
            Some(name) => {
                let ip = self.ctx.resolver.lookup(name).await;
                if ip.is_none() {
                    error!(
                        "Failed to get IP address of {}. Will pick a devserver without subnet constraint.",
                        name
                    );
                }
                ip
            }
            None => None,
        };

        let Some(host_ip) = host_ip else {
            return Ok((self.get_unrestricted_devservers().await, false));
        };

        let options = &self.ctx.options;
        if let Some(subnet) = restricted_subnet_for(host_ip, &options.restricted_subnets) {
            debug!(
                "The host {} ({}) is in a restricted subnet. Try to locate a devserver inside subnet {}.",
                hostname.unwrap_or_default(),
                host_ip,
                subnet
            );
            let servers = self
                .get_devservers_in_same_subnet(subnet.ip(), subnet.mask_bits(), false)
                .await?;
            return Ok((servers, false));
        }

        if options.prefer_local_devserver {
            let servers = self
                .get_devservers_in_same_subnet(host_ip, options.subnet_mask_bits, true)
                .await?;
            return Ok((servers, true));
        }

        Ok((self.get_unrestricted_devservers().await, false))
    }

    /// Pop devservers by build hash until a healthy one turns up.
    ///
    /// Banned devservers are skipped without a health check.
    pub async fn get_healthy_devserver(
        &self,
        build: &str,
        mut devservers: Vec<String>,
        ban_list: &[String],
    ) -> Option<DevServer> {
        debug!("Pick one healthy devserver from {:?}", devservers);
        let hash = build_hash(build);
        while !devservers.is_empty() {
            let index = (hash % devservers.len() as u64) as usize;
            let devserver = devservers.remove(index);
            debug!("Check health for {}", devserver);
            if ban_list.contains(&devserver) {
                continue;
            }
            if devserver_healthy(&self.ctx, &devserver).await {
                debug!("Pick {}", devserver);
                return Some(DevServer::new(self.ctx.clone(), devserver));
            }
        }
        None
    }

    /// Resolve `build` to a healthy devserver near `hostname`
    pub async fn resolve(
        &self,
        build: &str,
        hostname: Option<&str>,
        ban_list: &[String],
    ) -> Result<DevServer, DevServerError> {
        let mut tried: BTreeSet<String> = BTreeSet::new();
        let (devservers, can_retry) = self.get_available_devservers(hostname).await?;
        tried.extend(devservers.iter().cloned());

        let mut picked = self.get_healthy_devserver(build, devservers, ban_list).await;

        if picked.is_none() && can_retry {
            let (devservers, _) = self.get_available_devservers(None).await?;
            tried.extend(devservers.iter().cloned());
            picked = self.get_healthy_devserver(build, devservers, ban_list).await;
        }

        if let Some(devserver) = picked {
            return Ok(devserver);
        }

        let subnet = self.searched_subnet(hostname).await;
        let hostname_field = hostname.unwrap_or("None");
        let message = format!(
            "All devservers in subnet: {} are currently down: {:?}. (dut hostname: {})",
            subnet, tried, hostname_field
        );
        error!("{}", message);
        self.ctx.metrics.record(
            Metric::counter(format!("{}/subnet_without_devservers", DEVSERVER_PATH))
                .field("subnet", &subnet)
                .field("hostname", hostname_field),
        );
        Err(DevServerError::Devserver(message))
    }

    async fn searched_subnet(&self, hostname: Option<&str>) -> String {
        let unrestricted = "unrestricted subnet".to_string();
        let Some(name) = hostname else {
            return unrestricted;
        };
        match self.ctx.resolver.lookup(name).await {
            Some(ip) => restricted_subnet_for(ip, &self.ctx.options.restricted_subnets)
                .map(|subnet| subnet.to_string())
                .unwrap_or(unrestricted),
            None => unrestricted,
        }
    }

    /// Any healthy devserver, without build affinity
    pub async fn random(&self) -> Result<DevServer, DevServerError> {
        self.resolve(&synthetic_build_name(), None, &[]).await
    }

    /// One call per healthy server of this kind
    pub async fn build_all_calls<K, V>(&self, method: &str, args: &[(K, V)]) -> Vec<RpcCall>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut calls = Vec::new();
        for server in self.servers() {
            if devserver_healthy(&self.ctx, &server).await {
                calls.push(crate::http::build_call(
                    &server,
                    method,
                    args.iter().map(|(k, v)| (k.as_ref(), v.as_ref())),
                ));
            }
        }
        calls
    }
}

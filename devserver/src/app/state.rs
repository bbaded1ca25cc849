//! Shared client state

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::app::options::ClientOptions;
use crate::errors::DevServerError;
use crate::http::ssh::SshTransport;
use crate::http::{HttpTransport, RoutedTransport, RpcTransport};
use crate::net::{NameResolver, SystemResolver};
use crate::storage::settings::Settings;
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Everything a devserver operation needs, passed into every constructor.
///
/// Cloning is cheap; all members are shared.
#[derive(Clone)]
pub struct Context {
    /// Client configuration
    pub options: Arc<ClientOptions>,

    /// RPC transport
    pub transport: Arc<dyn RpcTransport>,

    /// Hostname resolution for DUTs and devservers
    pub resolver: Arc<dyn NameResolver>,

    /// Metric destination
    pub metrics: Arc<dyn MetricsSink>,
}

impl Context {
    pub fn new(
        options: ClientOptions,
        transport: Arc<dyn RpcTransport>,
        resolver: Arc<dyn NameResolver>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            transport,
            resolver,
            metrics,
        }
    }

    /// Production wiring: HTTP, ssh for restricted subnets, system DNS and
    /// metrics as `tracing` events
    pub fn from_options(options: ClientOptions) -> Result<Self, DevServerError> {
        let options = Arc::new(options);
        let resolver: Arc<dyn NameResolver> = Arc::new(SystemResolver);
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);

        let http = Arc::new(HttpTransport::new()?);
        let ssh = Arc::new(SshTransport::new(options.rpc.ssh_timeout, metrics.clone()));
        let transport = Arc::new(RoutedTransport::new(
            http,
            ssh,
            options.clone(),
            resolver.clone(),
        ));

        info!(
            "Devserver client ready: {} devservers, {} crash servers, {} restricted subnets",
            options.dev_servers.len(),
            options.crash_servers.len(),
            options.restricted_subnets.len()
        );

        Ok(Self {
            options,
            transport,
            resolver,
            metrics,
        })
    }

    /// Load a settings file and wire a production context from it
    pub async fn from_settings_file(path: impl AsRef<Path>) -> Result<Self, DevServerError> {
        let settings = Settings::load(path).await?;
        Self::from_options(ClientOptions::from_settings(&settings)?)
    }
}

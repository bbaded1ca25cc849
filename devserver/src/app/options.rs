//! Client configuration options

use std::time::Duration;

use crate::errors::DevServerError;
use crate::net::Subnet;
use crate::storage::settings::{HostnameAddr, Settings};
use crate::utils::CooldownOptions;

/// Immutable client configuration, built once and shared through
/// [`crate::app::state::Context`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Devserver URLs
    pub dev_servers: Vec<String>,

    /// Crash server URLs
    pub crash_servers: Vec<String>,

    /// Image storage server prefix, e.g. `gs://chromeos-image-archive/`
    pub image_storage_server: String,

    /// Canary channel server prefix
    pub canary_channel_server: String,

    /// Artifact staged from the canary channel server instead
    pub factory_artifact: Option<String>,

    /// Hostname to address table, in precedence order
    pub hostname_addr_map: Vec<HostnameAddr>,

    /// Subnets only reachable through their own devservers
    pub restricted_subnets: Vec<Subnet>,

    /// Skip the disk and Apache client checks
    pub skip_health_check: bool,

    /// Prefer a devserver in the DUT's subnet
    pub prefer_local_devserver: bool,

    /// Reach restricted devservers over ssh + curl
    pub enable_ssh: bool,

    /// Mask width used when preferring a local devserver
    pub subnet_mask_bits: u8,

    /// Android build name template (`{branch}`, `{target}`, `{build_id}`)
    pub android_build_name_pattern: String,

    /// Update URL template (`{devserver}`, `{image}`)
    pub image_url_pattern: String,

    /// RPC options
    pub rpc: RpcOptions,

    /// Staging options
    pub stage: StageOptions,

    /// Auto-update options
    pub au: AuOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            dev_servers: Vec::new(),
            crash_servers: Vec::new(),
            image_storage_server: settings.image_storage_server,
            canary_channel_server: settings.canary_channel_server,
            factory_artifact: None,
            hostname_addr_map: Vec::new(),
            restricted_subnets: Vec::new(),
            skip_health_check: false,
            prefer_local_devserver: false,
            enable_ssh: false,
            subnet_mask_bits: settings.subnet_mask_bits,
            android_build_name_pattern: settings.android_build_name_pattern,
            image_url_pattern: settings.image_url_pattern,
            rpc: RpcOptions::default(),
            stage: StageOptions::default(),
            au: AuOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Build options from a settings file, with default timings
    pub fn from_settings(settings: &Settings) -> Result<Self, DevServerError> {
        let restricted_subnets = settings
            .restricted_subnets
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Subnet>, _>>()?;
        if settings.subnet_mask_bits > 32 {
            return Err(DevServerError::Config(format!(
                "Invalid subnet mask bits: {}",
                settings.subnet_mask_bits
            )));
        }

        Ok(Self {
            dev_servers: settings.dev_servers.clone(),
            crash_servers: settings.crash_servers.clone(),
            image_storage_server: settings.image_storage_server.clone(),
            canary_channel_server: settings.canary_channel_server.clone(),
            factory_artifact: settings
                .factory_artifact
                .clone()
                .filter(|a| !a.is_empty()),
            hostname_addr_map: settings.hostname_addr_map.clone(),
            restricted_subnets,
            skip_health_check: settings.skip_devserver_health_check,
            prefer_local_devserver: settings.prefer_local_devserver,
            enable_ssh: settings.enable_ssh_connection_for_devserver,
            subnet_mask_bits: settings.subnet_mask_bits,
            android_build_name_pattern: settings.android_build_name_pattern.clone(),
            image_url_pattern: settings.image_url_pattern.clone(),
            ..Self::default()
        })
    }

    /// Storage server holding `artifacts`
    pub fn storage_server_for(&self, artifacts: &[&str]) -> &str {
        match &self.factory_artifact {
            Some(factory) if artifacts.iter().any(|a| *a == factory.as_str()) => &self.canary_channel_server,
            _ => &self.image_storage_server,
        }
    }
}

/// RPC call options
#[derive(Debug, Clone)]
pub struct RpcOptions {
    /// Budget of the retry policy for most RPCs
    pub call_timeout: Duration,

    /// Timeout of an ssh + curl call when none is given
    pub ssh_timeout: Duration,

    /// Timeout of the `check_health` call behind a health check
    pub health_timeout: Duration,

    /// Timeout of a `check_health` call when comparing devserver load
    pub load_timeout: Duration,

    /// How long to keep re-polling a devserver answering "Service Unavailable"
    pub unavailable_window: Duration,

    /// Interval between "Service Unavailable" re-polls
    pub unavailable_interval: Duration,

    /// Backoff between retries of transient failures
    pub backoff: CooldownOptions,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(100 * 60),
            ssh_timeout: Duration::from_secs(60),
            health_timeout: Duration::from_secs(60),
            load_timeout: Duration::from_secs(2),
            unavailable_window: Duration::from_secs(60),
            unavailable_interval: Duration::from_secs(5),
            backoff: CooldownOptions::default(),
        }
    }
}

/// Artifact staging options
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Interval between `is_staged` polls
    pub poll_interval: Duration,

    /// Give up polling after this long
    pub timeout: Duration,

    /// Sleep before reporting an overloaded devserver
    pub overload_backoff: Duration,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(100 * 60),
            overload_backoff: Duration::from_secs(30),
        }
    }
}

/// Auto-update options
#[derive(Debug, Clone)]
pub struct AuOptions {
    /// Attempts per auto-update operation
    pub retry_limit: u32,

    /// Interval between `get_au_status` polls
    pub poll_interval: Duration,

    /// Give up polling after this long
    pub finish_timeout: Duration,

    /// Sleep between attempts
    pub retry_interval: Duration,
}

impl Default for AuOptions {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            poll_interval: Duration::from_secs(10),
            finish_timeout: Duration::from_secs(100 * 60),
            retry_interval: Duration::from_secs(20),
        }
    }
}

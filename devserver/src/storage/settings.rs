//! Settings file management

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::DevServerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Devserver client settings, as stored in the lab configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Devserver URLs, e.g. `http://10.1.1.10:8082`
    #[serde(default)]
    pub dev_servers: Vec<String>,

    /// Crash server URLs
    #[serde(default)]
    pub crash_servers: Vec<String>,

    /// Image storage server, e.g. `gs://chromeos-image-archive/`
    #[serde(default = "default_image_storage_server")]
    pub image_storage_server: String,

    /// Canary channel server, used for the factory artifact
    #[serde(default)]
    pub canary_channel_server: String,

    /// Artifact that must be staged from the canary channel server
    #[serde(default)]
    pub factory_artifact: Option<String>,

    /// Hostname to address table, in precedence order
    #[serde(default)]
    pub hostname_addr_map: Vec<HostnameAddr>,

    /// Restricted subnets, `ip/bits` (or legacy `ip:bits`)
    #[serde(default)]
    pub restricted_subnets: Vec<String>,

    /// Skip the disk and Apache client checks
    #[serde(default)]
    pub skip_devserver_health_check: bool,

    /// Prefer a devserver in the DUT's subnet
    #[serde(default)]
    pub prefer_local_devserver: bool,

    /// Reach restricted devservers over ssh + curl
    #[serde(default)]
    pub enable_ssh_connection_for_devserver: bool,

    /// Mask width used when preferring a local devserver
    #[serde(default = "default_subnet_mask_bits")]
    pub subnet_mask_bits: u8,

    /// Template for Android build names
    #[serde(default = "default_android_build_name_pattern")]
    pub android_build_name_pattern: String,

    /// Template for update URLs
    #[serde(default = "default_image_url_pattern")]
    pub image_url_pattern: String,
}

/// One entry of the hostname to address table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostnameAddr {
    pub hostname: String,
    pub address: String,
}

fn default_image_storage_server() -> String {
    "gs://chromeos-image-archive/".to_string()
}

fn default_subnet_mask_bits() -> u8 {
    19
}

fn default_android_build_name_pattern() -> String {
    "{branch}/{target}/{build_id}".to_string()
}

fn default_image_url_pattern() -> String {
    "{devserver}/update/{image}".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            dev_servers: Vec::new(),
            crash_servers: Vec::new(),
            image_storage_server: default_image_storage_server(),
            canary_channel_server: String::new(),
            factory_artifact: None,
            hostname_addr_map: Vec::new(),
            restricted_subnets: Vec::new(),
            skip_devserver_health_check: false,
            prefer_local_devserver: false,
            enable_ssh_connection_for_devserver: false,
            subnet_mask_bits: default_subnet_mask_bits(),
            android_build_name_pattern: default_android_build_name_pattern(),
            image_url_pattern: default_image_url_pattern(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DevServerError> {
        File::new(path.as_ref()).read_json().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_document() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.subnet_mask_bits, 19);
        assert_eq!(settings.image_storage_server, "gs://chromeos-image-archive/");
        assert!(!settings.skip_devserver_health_check);
        assert!(settings.dev_servers.is_empty());
    }

    #[test]
    fn test_settings_keeps_hostname_order() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "dev_servers": ["http://10.0.0.1:8082"],
                "hostname_addr_map": [
                    {"hostname": "ds-a", "address": "10.0.0.1"},
                    {"hostname": "ds-b", "address": "10.0.0.1"}
                ],
                "log_level": "debug"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.hostname_addr_map[0].hostname, "ds-a");
        assert_eq!(settings.log_level, LogLevel::Debug);
    }
}

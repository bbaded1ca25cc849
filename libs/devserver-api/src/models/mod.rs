//! API models

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Load report returned by `check_health`.
///
/// Every metric is optional: older devservers omit some of them, and callers
/// decide how a missing metric is treated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Free disk space in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_disk: Option<f64>,

    /// CPU load percentage (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,

    /// Network throughput in bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_total_bytes_per_second: Option<f64>,

    /// Disk throughput in bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_total_bytes_per_second: Option<f64>,

    /// Number of running auto-update processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub au_process_count: Option<u64>,

    /// Number of live staging threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_thread_count: Option<u64>,

    /// Number of live Apache client connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apache_client_count: Option<u64>,

    /// Metrics this client does not interpret
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Response of `cros_au`: `[kicked_off, pid]`.
///
/// A pid of `-1` means the update was started asynchronously without a
/// tracked process; `0` means nothing was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuTriggerResponse(pub bool, pub i64);

impl AuTriggerResponse {
    pub fn kicked_off(&self) -> bool {
        self.0
    }

    pub fn pid(&self) -> i64 {
        self.1
    }
}

/// Response of `get_au_status`.
///
/// Newer devservers answer with an object, older ones with a
/// `[finished, status]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuStatus {
    // Listed first: a struct would also accept a sequence.
    Pair(bool, serde_json::Value),
    Detailed(AuStatusDetail),
}

/// Object form of `get_au_status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuStatusDetail {
    #[serde(default)]
    pub finished: bool,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub detailed_error_msg: Option<String>,
}

/// Response of `collect_cros_au_log`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuLogs {
    /// The cros-update execution log
    pub cros_au_log: String,

    /// Additional logs pulled from the DUT, keyed by log name
    #[serde(default)]
    pub host_logs: BTreeMap<String, String>,
}

/// Response of `list_suite_controls`: control file path to contents
pub type SuiteControls = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_report_keeps_unknown_metrics() {
        let report: HealthReport = serde_json::from_str(
            r#"{"free_disk": 120.5, "apache_client_count": 3, "gsutil_count": 2}"#,
        )
        .unwrap();

        assert_eq!(report.free_disk, Some(120.5));
        assert_eq!(report.apache_client_count, Some(3));
        assert!(report.cpu_percent.is_none());
        assert_eq!(report.extra.get("gsutil_count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_au_status_forms() {
        let pair: AuStatus = serde_json::from_str(r#"[false, "in progress"]"#).unwrap();
        assert_eq!(pair, AuStatus::Pair(false, serde_json::json!("in progress")));

        let detail: AuStatus =
            serde_json::from_str(r#"{"finished": true, "status": "done"}"#).unwrap();
        match detail {
            AuStatus::Detailed(d) => {
                assert!(d.finished);
                assert_eq!(d.status.as_deref(), Some("done"));
                assert!(d.detailed_error_msg.is_none());
            }
            other => panic!("unexpected form: {:?}", other),
        }
    }

    #[test]
    fn test_au_trigger_response() {
        let resp: AuTriggerResponse = serde_json::from_str("[true, 1234]").unwrap();
        assert!(resp.kicked_off());
        assert_eq!(resp.pid(), 1234);
    }
}

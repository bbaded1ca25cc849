//! Metrics emission
//!
//! Metric names and field sets are consumed by an external monitoring system
//! and must stay stable.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// `tracing` target used by [`TracingMetrics`]
pub const METRICS_TARGET: &str = "devserver::metrics";

pub const DEVSERVER_PATH: &str = "chromeos/autotest/devserver";
pub const PROVISION_PATH: &str = "chromeos/autotest/provision";
pub const CRASHSERVER_PATH: &str = "chromeos/autotest/crashserver";

/// Kind of metric being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Distribution,
    StringValue,
}

/// Reported value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

/// A single metric event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: MetricValue,
    pub fields: Vec<(String, String)>,
}

impl Metric {
    /// Counter increment by one
    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter, MetricValue::Number(1.0))
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, MetricValue::Number(value))
    }

    /// Distribution sample, in seconds
    pub fn seconds(name: impl Into<String>, secs: f64) -> Self {
        Self::new(name, MetricKind::Distribution, MetricValue::Number(secs))
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MetricKind::StringValue, MetricValue::Text(value.into()))
    }

    fn new(name: impl Into<String>, kind: MetricKind, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            fields: Vec::new(),
        }
    }

    /// Attach a field
    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    /// Look up a field value
    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Destination for metric events
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: Metric);
}

/// Emits every metric as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, metric: Metric) {
        let fields = serde_json::to_string(&metric.fields).unwrap_or_default();
        match &metric.value {
            MetricValue::Number(v) => tracing::info!(
                target: METRICS_TARGET,
                metric = %metric.name,
                kind = ?metric.kind,
                value = *v,
                fields = %fields,
                "metric"
            ),
            MetricValue::Text(v) => tracing::info!(
                target: METRICS_TARGET,
                metric = %metric.name,
                kind = ?metric.kind,
                value = %v,
                fields = %fields,
                "metric"
            ),
        }
    }
}

/// Keeps metrics in memory
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    events: Mutex<Vec<Metric>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded metrics, oldest first
    pub fn events(&self) -> Vec<Metric> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded metrics with the given name
    pub fn named(&self, name: &str) -> Vec<Metric> {
        self.events()
            .into_iter()
            .filter(|m| m.name == name)
            .collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, metric: Metric) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_metrics_records_fields() {
        let sink = MemoryMetrics::new();
        sink.record(
            Metric::counter(format!("{}/devserver_healthy", DEVSERVER_PATH))
                .field("dev_server", "10.0.0.1")
                .field("healthy", false),
        );

        let events = sink.named("chromeos/autotest/devserver/devserver_healthy");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_field("healthy"), Some("false"));
        assert_eq!(events[0].value, MetricValue::Number(1.0));
    }
}

//! Metric emission for backend health and agent-reported samples.
//!
//! Metrics are fire-and-forget: sinks never fail the operation that feeds
//! them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lbcp_core::{AccountId, InstanceId};
use serde::{Deserialize, Serialize};

/// One health observation for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSample {
    /// Owning account of the balancer.
    pub account_id: AccountId,
    /// Balancer name.
    pub load_balancer: String,
    /// Zone of the backend, when known.
    pub zone: Option<String>,
    /// The backend.
    pub instance_id: InstanceId,
}

/// A metric sample pushed by a servo agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name, such as `Latency` or `RequestCount`.
    pub name: String,
    /// Observed value.
    pub value: f64,
    /// Unit of the value.
    #[serde(default)]
    pub unit: Option<String>,
    /// When the value was observed.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Additional dimensions.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

/// Destination for control plane metrics.
pub trait MetricsSink: Send + Sync {
    /// Record that a backend was observed healthy.
    fn record_healthy(&self, sample: &HealthSample);

    /// Record that a backend was observed unhealthy.
    fn record_unhealthy(&self, sample: &HealthSample);

    /// Record a batch of samples reported by a servo agent.
    fn record_metric_batch(&self, servo_id: &InstanceId, samples: &[MetricSample]);
}

/// Emits every metric as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_healthy(&self, sample: &HealthSample) {
        tracing::info!(
            target: "lbcp::metrics",
            account_id = %sample.account_id,
            load_balancer = %sample.load_balancer,
            zone = sample.zone.as_deref().unwrap_or(""),
            instance_id = %sample.instance_id,
            healthy_host_count = 1,
            "HealthyHostCount"
        );
    }

    fn record_unhealthy(&self, sample: &HealthSample) {
        tracing::info!(
            target: "lbcp::metrics",
            account_id = %sample.account_id,
            load_balancer = %sample.load_balancer,
            zone = sample.zone.as_deref().unwrap_or(""),
            instance_id = %sample.instance_id,
            unhealthy_host_count = 1,
            "UnHealthyHostCount"
        );
    }

    fn record_metric_batch(&self, servo_id: &InstanceId, samples: &[MetricSample]) {
        for sample in samples {
            tracing::info!(
                target: "lbcp::metrics",
                servo_id = %servo_id,
                metric = %sample.name,
                value = sample.value,
                unit = sample.unit.as_deref().unwrap_or("None"),
                "Agent metric"
            );
        }
    }
}

/// A sink for tests that keeps everything it receives.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    healthy: parking_lot::Mutex<Vec<HealthSample>>,
    unhealthy: parking_lot::Mutex<Vec<HealthSample>>,
    batches: parking_lot::Mutex<Vec<(InstanceId, Vec<MetricSample>)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingMetricsSink {
    /// Healthy observations so far.
    #[must_use]
    pub fn healthy(&self) -> Vec<HealthSample> {
        self.healthy.lock().clone()
    }

    /// Unhealthy observations so far.
    #[must_use]
    pub fn unhealthy(&self) -> Vec<HealthSample> {
        self.unhealthy.lock().clone()
    }

    /// Metric batches so far.
    #[must_use]
    pub fn batches(&self) -> Vec<(InstanceId, Vec<MetricSample>)> {
        self.batches.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MetricsSink for RecordingMetricsSink {
    fn record_healthy(&self, sample: &HealthSample) {
        self.healthy.lock().push(sample.clone());
    }

    fn record_unhealthy(&self, sample: &HealthSample) {
        self.unhealthy.lock().push(sample.clone());
    }

    fn record_metric_batch(&self, servo_id: &InstanceId, samples: &[MetricSample]) {
        self.batches
            .lock()
            .push((servo_id.clone(), samples.to_vec()));
    }
}

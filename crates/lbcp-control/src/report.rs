//! Processing of state reports pushed by servo agents.
//!
//! Each report entry is applied in its own store update, so a bad entry
//! never prevents the rest of the batch from landing. Entries that cannot be
//! applied are logged and counted as dropped.

use chrono::Utc;
use lbcp_core::InstanceId;
use lbcp_store::{BackendState, Store, StoreError};

use crate::gate::AdmittedAgent;
use crate::health::{self, ReportedState, Transition};
use crate::metrics::{HealthSample, MetricsSink};
use crate::types::{InstanceStateReport, ReportSummary, ServoReport};

/// Apply an admitted agent's report.
pub fn apply<S: Store>(
    store: &S,
    metrics: &dyn MetricsSink,
    agent: &AdmittedAgent,
    report: &ServoReport,
) -> ReportSummary {
    let mut summary = ReportSummary {
        admitted: true,
        ..ReportSummary::default()
    };

    for entry in &report.instances {
        match apply_entry(store, agent, entry) {
            Ok((instance_id, zone, transition)) => {
                summary.applied += 1;
                let sample = HealthSample {
                    account_id: agent.load_balancer.account_id,
                    load_balancer: agent.load_balancer.name.clone(),
                    zone,
                    instance_id,
                };
                if transition.to == BackendState::InService {
                    metrics.record_healthy(&sample);
                } else {
                    metrics.record_unhealthy(&sample);
                }
                if transition.from != transition.to {
                    tracing::info!(
                        load_balancer = %agent.load_balancer.name,
                        instance_id = %sample.instance_id,
                        from = %transition.from,
                        to = %transition.to,
                        "Backend state changed"
                    );
                }
            }
            Err(reason) => {
                summary.dropped += 1;
                tracing::warn!(
                    servo_id = %agent.servo.servo_id,
                    load_balancer = %agent.load_balancer.name,
                    instance_id = %entry.instance_id,
                    state = %entry.state,
                    reason = %reason,
                    "Dropped report entry"
                );
            }
        }
    }

    if !report.metrics.is_empty() {
        metrics.record_metric_batch(&agent.servo.servo_id, &report.metrics);
    }

    summary
}

fn apply_entry<S: Store>(
    store: &S,
    agent: &AdmittedAgent,
    entry: &InstanceStateReport,
) -> Result<(InstanceId, Option<String>, Transition), String> {
    let instance_id: InstanceId = entry.instance_id.parse().map_err(|e| format!("{e}"))?;
    let reported: ReportedState = entry.state.parse().map_err(|e| format!("{e}"))?;

    let lb = &agent.load_balancer;
    let now = Utc::now();
    let mut outcome = None;

    store
        .update_load_balancer(&lb.account_id, &lb.name, &mut |current| {
            let backend = current
                .backend_mut(&instance_id)
                .ok_or_else(|| StoreError::Rejected("instance is not registered".into()))?;
            if backend.zone.as_deref().is_some_and(|z| z != agent.zone.as_str()) {
                return Err(StoreError::Rejected(
                    "instance is outside the agent's zone".into(),
                ));
            }
            let transition = health::apply_report(backend, reported, now)
                .ok_or_else(|| StoreError::Rejected("instance is in error".into()))?;
            outcome = Some((backend.zone.clone(), transition));
            Ok(())
        })
        .map_err(|e| e.to_string())?;

    let (zone, transition) = outcome.ok_or_else(|| "update did not run".to_string())?;
    Ok((instance_id, zone, transition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetricsSink;
    use lbcp_core::AccountId;
    use lbcp_store::{BackendInstance, LoadBalancer, RocksStore, ServoInstance, Zone, ZoneState};
    use tempfile::TempDir;

    fn setup() -> (RocksStore, TempDir, AdmittedAgent) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let mut lb = LoadBalancer::new(AccountId::from_bytes([1u8; 32]), "web");
        lb.zones = vec![Zone {
            name: "zone-a".into(),
            state: ZoneState::InService,
        }];
        for (id, state, zone) in [
            ("i-0000000a", BackendState::OutOfService, "zone-a"),
            ("i-0000000b", BackendState::Error, "zone-a"),
            ("i-0000000c", BackendState::OutOfService, "zone-b"),
        ] {
            lb.backends.push(BackendInstance {
                instance_id: id.parse().unwrap(),
                ip_address: None,
                zone: Some(zone.into()),
                state,
                reason_code: None,
                description: None,
                updated_at: Utc::now(),
            });
        }
        store.allocate_load_balancer(&lb, &|_| true).unwrap();

        let agent = AdmittedAgent {
            servo: ServoInstance {
                servo_id: "i-0a1b2c3d".parse().unwrap(),
                public_address: None,
                private_address: None,
                assignment: None,
                registered_at: Utc::now(),
            },
            load_balancer: lb,
            zone: "zone-a".into(),
        };
        (store, dir, agent)
    }

    fn report(entries: &[(&str, &str)]) -> ServoReport {
        ServoReport {
            instances: entries
                .iter()
                .map(|(id, state)| InstanceStateReport::new(*id, *state))
                .collect(),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn applies_valid_entries_and_drops_the_rest() {
        let (store, _dir, agent) = setup();
        let sink = RecordingMetricsSink::default();

        let summary = apply(
            &store,
            &sink,
            &agent,
            &report(&[
                ("i-0000000a", "InService"),
                ("i-0000000b", "InService"),
                ("i-0000000c", "InService"),
                ("i-000000ff", "InService"),
                ("i-0000000a", "Unknown"),
                ("garbage", "InService"),
            ]),
        );

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.dropped, 5);
        assert_eq!(sink.healthy().len(), 1);

        let lb = store
            .get_load_balancer(&agent.load_balancer.account_id, "web")
            .unwrap();
        let a: InstanceId = "i-0000000a".parse().unwrap();
        let b: InstanceId = "i-0000000b".parse().unwrap();
        let c: InstanceId = "i-0000000c".parse().unwrap();
        assert_eq!(lb.backend(&a).unwrap().state, BackendState::InService);
        assert_eq!(lb.backend(&b).unwrap().state, BackendState::Error);
        assert_eq!(lb.backend(&c).unwrap().state, BackendState::OutOfService);
    }

    #[test]
    fn unhealthy_report_records_metric() {
        let (store, _dir, agent) = setup();
        let sink = RecordingMetricsSink::default();

        apply(&store, &sink, &agent, &report(&[("i-0000000a", "OutOfService")]));

        let unhealthy = sink.unhealthy();
        assert_eq!(unhealthy.len(), 1);
        assert_eq!(unhealthy[0].zone.as_deref(), Some("zone-a"));
    }

    #[test]
    fn metric_batch_is_forwarded() {
        let (store, _dir, agent) = setup();
        let sink = RecordingMetricsSink::default();
        let mut r = report(&[]);
        r.metrics.push(crate::metrics::MetricSample {
            name: "Latency".into(),
            value: 0.25,
            unit: Some("Seconds".into()),
            timestamp: None,
            dimensions: std::collections::BTreeMap::new(),
        });

        apply(&store, &sink, &agent, &r);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, agent.servo.servo_id);
    }
}

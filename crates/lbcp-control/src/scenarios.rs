//! End-to-end scenarios driving the full service over a real store.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lbcp_core::{AccountId, InstanceId};
use lbcp_store::{BackendState, DnsRecord, RocksStore, Store};
use tempfile::TempDir;

use crate::access::Principal;
use crate::dispatch::MockEventDispatcher;
use crate::dns::{DnsError, DnsProvisioner, DomainDnsProvisioner};
use crate::health::REASON_INSTANCE;
use crate::inventory::{InstanceLocation, StaticInstanceResolver};
use crate::metrics::RecordingMetricsSink;
use crate::service::{ControlPlane, LoadBalancingService};
use crate::types::{
    ConfigureHealthCheckRequest, ControlConfig, CreateLoadBalancerRequest, InstanceStateReport,
    ListenerSpec, RegisterServoRequest, ServoReport,
};

const TARGET: &str = "i-00000001";
const OTHER_TARGET: &str = "i-00000002";
const SERVO_A: &str = "i-0000aaaa";
const SERVO_B: &str = "i-0000bbbb";

struct World {
    control: LoadBalancingService<RocksStore>,
    store: Arc<RocksStore>,
    dispatcher: Arc<MockEventDispatcher>,
    metrics: Arc<RecordingMetricsSink>,
    _dir: TempDir,
}

fn world() -> World {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let dispatcher = Arc::new(MockEventDispatcher::new());
    let metrics = Arc::new(RecordingMetricsSink::default());
    let inventory = Arc::new(StaticInstanceResolver::new());
    for (id, ip, zone) in [
        (TARGET, "10.0.0.1", "zone-a"),
        (OTHER_TARGET, "10.0.0.2", "zone-b"),
    ] {
        inventory.insert(
            id.parse().unwrap(),
            InstanceLocation {
                ip_address: ip.parse().unwrap(),
                zone: zone.into(),
            },
        );
    }

    let control = LoadBalancingService::with_defaults(Arc::clone(&store), ControlConfig::default())
        .with_dispatcher(dispatcher.clone())
        .with_metrics(metrics.clone())
        .with_inventory(inventory);

    World {
        control,
        store,
        dispatcher,
        metrics,
        _dir: dir,
    }
}

fn owner() -> Principal {
    Principal::account(AccountId::from_bytes([7u8; 32]))
}

fn id(s: &str) -> InstanceId {
    s.parse().unwrap()
}

fn servo_addr(servo: &str) -> IpAddr {
    match servo {
        SERVO_A => "10.1.0.1".parse().unwrap(),
        _ => "10.1.0.2".parse().unwrap(),
    }
}

impl World {
    async fn create_web(&self) {
        self.control
            .create_load_balancer(
                &owner(),
                CreateLoadBalancerRequest::new("web")
                    .with_zones(["zone-a", "zone-b"])
                    .with_listener(ListenerSpec::new("HTTP", 80, 8080)),
            )
            .await
            .unwrap();

        for (servo, zone) in [(SERVO_A, "zone-a"), (SERVO_B, "zone-b")] {
            self.control
                .register_servo(
                    &owner(),
                    id(servo),
                    RegisterServoRequest {
                        public_address: None,
                        private_address: Some(servo_addr(servo)),
                        account_id: owner().account_id,
                        load_balancer: "web".into(),
                        zone: zone.into(),
                        security_group: None,
                    },
                )
                .await
                .unwrap();
        }
    }

    async fn report(&self, servo: &str, origin: IpAddr, target: &str, state: &str) -> u32 {
        self.control
            .report_state(
                &id(servo),
                origin,
                ServoReport {
                    instances: vec![InstanceStateReport::new(target, state)],
                    metrics: Vec::new(),
                },
            )
            .await
            .applied
    }

    fn backend_state(&self, target: &str) -> BackendState {
        self.store
            .get_load_balancer(&owner().account_id, "web")
            .unwrap()
            .backend(&id(target))
            .unwrap()
            .state
    }
}

#[tokio::test]
async fn listener_dispatch_failure_leaves_nothing_behind() {
    let w = world();
    w.dispatcher.fail_on("create_listener", Some("no capacity"));

    let err = w
        .control
        .create_load_balancer(
            &owner(),
            CreateLoadBalancerRequest::new("web")
                .with_zones(["zone-a"])
                .with_listener(ListenerSpec::new("HTTP", 80, 8080)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Failed to create listener: no capacity");

    assert!(w
        .store
        .list_load_balancers_by_account(&owner().account_id)
        .unwrap()
        .is_empty());
    assert!(w.store.find_load_balancers_by_name("web").unwrap().is_empty());

    // The name is free again once the failure clears.
    w.dispatcher.clear_failures();
    w.create_web().await;
}

/// Refuses the first allocation, then hands out names normally.
struct FlakyDns {
    refused: AtomicBool,
    inner: DomainDnsProvisioner,
}

#[async_trait]
impl DnsProvisioner for FlakyDns {
    async fn allocate(&self, account_id: &AccountId, name: &str) -> Result<DnsRecord, DnsError> {
        if !self.refused.swap(true, Ordering::SeqCst) {
            return Err(DnsError("resolver unavailable".into()));
        }
        self.inner.allocate(account_id, name).await
    }
}

#[tokio::test]
async fn dns_failure_releases_name_and_quota() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let dispatcher = Arc::new(MockEventDispatcher::new());
    let config = ControlConfig {
        max_load_balancers_per_account: 1,
        ..ControlConfig::default()
    };
    let control = LoadBalancingService::with_defaults(Arc::clone(&store), config)
        .with_dispatcher(dispatcher.clone())
        .with_dns(Arc::new(FlakyDns {
            refused: AtomicBool::new(false),
            inner: DomainDnsProvisioner::new("lb.test"),
        }));
    let request = || {
        CreateLoadBalancerRequest::new("web")
            .with_zones(["zone-a"])
            .with_listener(ListenerSpec::new("HTTP", 80, 8080))
    };

    let err = control
        .create_load_balancer(&owner(), request())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "internal error: New dns name could not be created");

    assert!(control
        .describe_load_balancers(&owner(), &[])
        .await
        .unwrap()
        .is_empty());
    assert!(store.find_load_balancers_by_name("web").unwrap().is_empty());
    assert!(dispatcher.kinds().is_empty());

    // With a quota of one, this only fits if the failed attempt was released.
    control.create_load_balancer(&owner(), request()).await.unwrap();
    assert_eq!(dispatcher.kinds(), vec!["new_load_balancer", "create_listener"]);
}

#[tokio::test]
async fn deleting_missing_balancer_succeeds() {
    let w = world();
    w.control.delete_load_balancer(&owner(), "ghost").await.unwrap();

    w.create_web().await;
    w.control.delete_load_balancer(&owner(), "web").await.unwrap();
    w.control.delete_load_balancer(&owner(), "web").await.unwrap();

    // Servos outlive the balancer but are no longer assigned to it.
    let servo = w.store.get_servo_instance(&id(SERVO_A)).unwrap().unwrap();
    assert!(servo.assignment.is_none());
}

#[tokio::test]
async fn registering_twice_does_not_duplicate() {
    let w = world();
    w.create_web().await;

    let first = w
        .control
        .register_instances(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();
    let second = w
        .control
        .register_instances(&owner(), "web", vec![TARGET.into(), TARGET.into()])
        .await
        .unwrap();

    assert_eq!(first, vec![id(TARGET)]);
    assert_eq!(second, vec![id(TARGET)]);
    let registrations = w
        .dispatcher
        .kinds()
        .into_iter()
        .filter(|k| *k == "register_instances")
        .count();
    assert_eq!(registrations, 1);
}

#[tokio::test]
async fn spoofed_or_unknown_agents_change_nothing() {
    let w = world();
    w.create_web().await;
    w.control
        .register_instances(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();

    let spoofed: IpAddr = "192.0.2.66".parse().unwrap();
    assert_eq!(w.report(SERVO_A, spoofed, TARGET, "InService").await, 0);
    assert_eq!(
        w.report("i-0000dead", servo_addr(SERVO_A), TARGET, "InService").await,
        0
    );
    assert!(w
        .control
        .describe_assigned_load_balancer(&id(SERVO_A), spoofed)
        .await
        .is_none());

    assert_eq!(w.backend_state(TARGET), BackendState::OutOfService);
    assert!(w.metrics.healthy().is_empty());
}

#[tokio::test]
async fn disabled_zone_backends_are_never_described() {
    let w = world();
    w.create_web().await;
    w.control
        .register_instances(&owner(), "web", vec![TARGET.into(), OTHER_TARGET.into()])
        .await
        .unwrap();
    assert_eq!(
        w.report(SERVO_B, servo_addr(SERVO_B), OTHER_TARGET, "InService").await,
        1
    );

    w.control
        .disable_zones(&owner(), "web", vec!["zone-b".into()])
        .await
        .unwrap();

    let desc = w
        .control
        .describe_load_balancers(&owner(), &[])
        .await
        .unwrap();
    assert_eq!(desc[0].zones, vec!["zone-a"]);
    assert_eq!(desc[0].instances, vec![id(TARGET)]);

    let health = w
        .control
        .describe_instance_health(&owner(), "web", vec![])
        .await
        .unwrap();
    let ids: Vec<_> = health.iter().map(|h| h.instance_id.clone()).collect();
    assert_eq!(ids, vec![id(TARGET)]);
    assert!(w
        .control
        .describe_instance_health(&owner(), "web", vec![OTHER_TARGET.into()])
        .await
        .unwrap()
        .is_empty());

    // The zone-b agent is cut off while its zone is disabled.
    assert!(w
        .control
        .describe_assigned_load_balancer(&id(SERVO_B), servo_addr(SERVO_B))
        .await
        .is_none());
    assert_eq!(
        w.report(SERVO_B, servo_addr(SERVO_B), OTHER_TARGET, "OutOfService").await,
        0
    );
    assert_eq!(w.backend_state(OTHER_TARGET), BackendState::InService);
}

#[tokio::test]
async fn configured_health_check_is_described_exactly() {
    let w = world();
    w.create_web().await;

    w.control
        .configure_health_check(
            &owner(),
            "web",
            ConfigureHealthCheckRequest {
                interval: Some(30),
                target: Some("HTTP:80/".into()),
                timeout: Some(5),
                healthy_threshold: Some(2),
                unhealthy_threshold: Some(2),
            },
        )
        .await
        .unwrap();

    let desc = w
        .control
        .describe_load_balancers(&owner(), &["web".to_string()])
        .await
        .unwrap();
    let hc = desc[0].health_check.as_ref().unwrap();
    assert_eq!(hc.interval_seconds, 30);
    assert_eq!(hc.target, "HTTP:80/");
    assert_eq!(hc.timeout_seconds, 5);
    assert_eq!(hc.healthy_threshold, 2);
    assert_eq!(hc.unhealthy_threshold, 2);

    let assigned = w
        .control
        .describe_assigned_load_balancer(&id(SERVO_A), servo_addr(SERVO_A))
        .await
        .unwrap();
    assert_eq!(assigned.health_check.as_ref(), Some(hc));
}

#[tokio::test]
async fn backend_follows_agent_reports() {
    let w = world();
    w.create_web().await;
    w.control
        .register_instances(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();
    assert_eq!(w.backend_state(TARGET), BackendState::OutOfService);

    let assigned = w
        .control
        .describe_assigned_load_balancer(&id(SERVO_A), servo_addr(SERVO_A))
        .await
        .unwrap();
    assert_eq!(assigned.backends.len(), 1);
    assert_eq!(assigned.backends[0].ip_address, Some("10.0.0.1".parse().unwrap()));

    assert_eq!(
        w.report(SERVO_A, servo_addr(SERVO_A), TARGET, "InService").await,
        1
    );
    let health = w
        .control
        .describe_instance_health(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();
    assert_eq!(health[0].state, BackendState::InService);
    assert!(health[0].reason_code.is_none());

    assert_eq!(
        w.report(SERVO_A, servo_addr(SERVO_A), TARGET, "OutOfService").await,
        1
    );
    let health = w
        .control
        .describe_instance_health(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();
    assert_eq!(health[0].state, BackendState::OutOfService);
    assert_eq!(health[0].reason_code.as_deref(), Some(REASON_INSTANCE));

    assert_eq!(w.metrics.healthy().len(), 1);
    assert_eq!(w.metrics.unhealthy().len(), 1);
    assert_eq!(w.metrics.unhealthy()[0].zone.as_deref(), Some("zone-a"));
}

#[tokio::test]
async fn unsupported_state_tokens_are_dropped() {
    let w = world();
    w.create_web().await;
    w.control
        .register_instances(&owner(), "web", vec![TARGET.into()])
        .await
        .unwrap();

    assert_eq!(
        w.report(SERVO_A, servo_addr(SERVO_A), TARGET, "Error").await,
        0
    );
    assert_eq!(
        w.report(SERVO_A, servo_addr(SERVO_A), TARGET, "inservice").await,
        0
    );
    assert_eq!(w.backend_state(TARGET), BackendState::OutOfService);
}

#[tokio::test]
async fn repeated_state_still_counts_as_applied() {
    let w = world();
    w.create_web().await;
    w.control
        .register_instances(&owner(), "web", vec![TARGET.into(), OTHER_TARGET.into()])
        .await
        .unwrap();

    for _ in 0..2 {
        assert_eq!(
            w.report(SERVO_A, servo_addr(SERVO_A), TARGET, "InService").await,
            1
        );
    }
    // Out of the agent's zone: admitted but not applied.
    assert_eq!(
        w.report(SERVO_A, servo_addr(SERVO_A), OTHER_TARGET, "InService").await,
        0
    );
    assert_eq!(w.metrics.healthy().len(), 2);
}

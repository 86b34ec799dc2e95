//! E2E tests against the real MQTT transport and a loopback broker.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{DEVICE_ID, DEVICE_KEY, RECEPTOR_ID, START_EPOCH, scan};
use sl_edge_agent::clock::{ClockGate, HostTimeSync, ManualClock};
use sl_edge_agent::config::ClockConfig;
use sl_edge_agent::credential::{AuthStrategy, CredentialProvider, DeviceKeySigner};
use sl_edge_agent::encoder::TelemetryEncoder;
use sl_edge_agent::inbox::RecordingInbox;
use sl_edge_agent::network::MockNetwork;
use sl_edge_agent::scanner::VecScanSource;
use sl_edge_agent::supervisor::{Collaborators, Supervisor, SupervisorSettings, SupervisorState};
use sl_mqtt_channel::{LoopbackBroker, MqttConnector};
use sl_protocol::{Identity, topics};

fn supervisor_for(broker: &LoopbackBroker, records: usize) -> Supervisor {
    let clock = ManualClock::at_epoch(START_EPOCH);
    let signer = Arc::new(DeviceKeySigner::from_base64(DEVICE_KEY).expect("valid key"));
    let identity = Identity::derive(broker.host(), DEVICE_ID).expect("identity fits buffers");

    Supervisor::new(
        identity,
        TelemetryEncoder::new(-76, topics::telemetry(DEVICE_ID), RECEPTOR_ID),
        Collaborators {
            network: Arc::new(MockNetwork::new(true)),
            clock_gate: ClockGate::new(
                Arc::new(clock.clone()),
                Arc::new(HostTimeSync),
                ClockConfig::default(),
            ),
            credentials: CredentialProvider::new(
                Arc::new(clock),
                AuthStrategy::SignedToken {
                    signer,
                    lifetime_minutes: 60,
                },
            ),
            connector: Arc::new(MqttConnector::new(broker.config())),
            scans: Box::new(VecScanSource::new(
                (0..records).map(|i| scan(-50, &(i as u32).to_be_bytes())),
            )),
            inbox: Arc::new(RecordingInbox::new()),
            storage: None,
        },
        SupervisorSettings::default(),
    )
}

/// A burst far larger than both the event channel and the transport's
/// request queue goes out in a single tick.
#[tokio::test]
async fn e2e_large_burst_publishes_over_real_transport() {
    let broker = LoopbackBroker::start().await.unwrap();
    let mut supervisor = supervisor_for(&broker, 300);

    for _ in 0..3 {
        supervisor.step().await;
    }
    assert_eq!(supervisor.state(), SupervisorState::SessionActive);

    tokio::time::timeout(Duration::from_secs(10), supervisor.tick())
        .await
        .expect("tick stalled while publishing");

    assert_eq!(supervisor.stats().published, 300);
    assert_eq!(
        broker.wait_for_publishes(300, Duration::from_secs(10)).await,
        300
    );
    assert_eq!(broker.connect_count(), 1);
}

/// A broker that refuses the credential sends the supervisor into backoff
/// without leaving a session behind.
#[tokio::test(start_paused = true)]
async fn e2e_refused_connection_backs_off() {
    let broker = LoopbackBroker::with_connack_code(5).await.unwrap();
    let mut supervisor = supervisor_for(&broker, 0);

    supervisor.step().await;
    supervisor.step().await;
    supervisor.step().await;

    assert_eq!(supervisor.state(), SupervisorState::Provisioning);
    assert!(supervisor.session().is_none());
    assert_eq!(supervisor.stats().provisioning_failures, 1);
}

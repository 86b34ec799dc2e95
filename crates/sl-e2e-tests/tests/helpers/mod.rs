//! Shared test harness for scenario tests.
//!
//! Wires a real `Supervisor` to the mock broker, a settable network link,
//! a manual clock and in-memory scan input and log, so every scenario runs
//! the same code paths as the binary.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use sl_edge_agent::clock::{ClockGate, HostTimeSync, ManualClock};
use sl_edge_agent::config::ClockConfig;
use sl_edge_agent::credential::{AuthStrategy, CredentialProvider, DeviceKeySigner, Signer};
use sl_edge_agent::encoder::TelemetryEncoder;
use sl_edge_agent::inbox::RecordingInbox;
use sl_edge_agent::network::MockNetwork;
use sl_edge_agent::scanner::ChannelScanSource;
use sl_edge_agent::storage::MemorySink;
use sl_edge_agent::supervisor::{Collaborators, Supervisor, SupervisorSettings, SupervisorState};
use sl_mqtt_channel::{MockChannel, MockConnector};
use sl_protocol::{Identity, ScanRecord, topics};

pub const DEVICE_ID: &str = "esp32-lobby";
pub const HUB_HOST: &str = "my-hub.azure-devices.net";
pub const RECEPTOR_ID: &str = "24:6f:28:aa:bb:cc";
pub const DEVICE_KEY: &str = "c2VjcmV0LWRldmljZS1rZXk=";
/// Wall-clock time the harness starts at (2023-11-14T22:13:20Z).
pub const START_EPOCH: i64 = 1_700_000_000;
pub const TELEMETRY_TOPIC: &str = "devices/esp32-lobby/messages/events/";
pub const INBOX_FILTER: &str = "devices/esp32-lobby/messages/devicebound/#";

pub struct TestHarness {
    pub supervisor: Supervisor,
    pub clock: ManualClock,
    pub network: Arc<MockNetwork>,
    pub connector: Arc<MockConnector>,
    pub scans: mpsc::Sender<ScanRecord>,
    pub log: Arc<MemorySink>,
    pub inbox: Arc<RecordingInbox>,
}

impl TestHarness {
    /// Signed-token auth with a 60-minute lifetime.
    pub fn new() -> Self {
        let signer: Arc<dyn Signer> = Arc::new(
            DeviceKeySigner::from_base64(DEVICE_KEY).expect("test key is valid base64"),
        );
        Self::with_strategy(AuthStrategy::SignedToken {
            signer,
            lifetime_minutes: 60,
        })
    }

    pub fn with_strategy(strategy: AuthStrategy) -> Self {
        let clock = ManualClock::at_epoch(START_EPOCH);
        let network = Arc::new(MockNetwork::new(true));
        let connector = Arc::new(MockConnector::new());
        let log = Arc::new(MemorySink::new());
        let inbox = Arc::new(RecordingInbox::new());
        let (scans, source) = ChannelScanSource::new(64);

        let identity = Identity::derive(HUB_HOST, DEVICE_ID).expect("identity fits buffers");
        let encoder = TelemetryEncoder::new(-76, topics::telemetry(DEVICE_ID), RECEPTOR_ID);

        let supervisor = Supervisor::new(
            identity,
            encoder,
            Collaborators {
                network: network.clone(),
                clock_gate: ClockGate::new(
                    Arc::new(clock.clone()),
                    Arc::new(HostTimeSync),
                    ClockConfig::default(),
                ),
                credentials: CredentialProvider::new(Arc::new(clock.clone()), strategy),
                connector: connector.clone(),
                scans: Box::new(source),
                inbox: inbox.clone(),
                storage: Some(log.clone()),
            },
            SupervisorSettings::default(),
        );

        Self {
            supervisor,
            clock,
            network,
            connector,
            scans,
            log,
            inbox,
        }
    }

    /// Run the startup pipeline and drain the handshake events.
    pub async fn bring_up(&mut self) {
        for _ in 0..3 {
            self.supervisor.step().await;
        }
        assert_eq!(self.supervisor.state(), SupervisorState::SessionActive);
        self.supervisor.process_pending_events().await;
    }

    pub async fn push_scan(&self, rssi: i16, payload: &[u8]) {
        self.scans
            .send(scan(rssi, payload))
            .await
            .expect("scan source alive");
    }

    /// Channel of the current (latest) session.
    pub fn channel(&self) -> Arc<MockChannel> {
        self.connector
            .last_channel()
            .expect("a session has been established")
    }

    /// All telemetry published on every session so far.
    pub fn all_telemetry(&self) -> Vec<serde_json::Value> {
        self.connector
            .channels()
            .iter()
            .flat_map(|c| c.published_to(TELEMETRY_TOPIC))
            .map(|m| serde_json::from_slice(&m.payload).expect("telemetry is valid JSON"))
            .collect()
    }

    pub fn advance_clock_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub fn scan(rssi: i16, payload: &[u8]) -> ScanRecord {
    ScanRecord::new(
        "AA:BB:CC:DD:EE:FF",
        rssi,
        payload.to_vec(),
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap(),
    )
}

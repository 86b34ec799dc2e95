//! ScanLink edge agent: publishes nearby-device scans over an
//! authenticated broker session.
//!
//! Scan records arrive as JSON lines on stdin (one per observation) from
//! the platform's scanning helper.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sl_edge_agent::clock::{ClockGate, HostTimeSync, SystemClock};
use sl_edge_agent::config::{AgentConfig, AuthConfig};
use sl_edge_agent::credential::{AuthStrategy, CredentialProvider, DeviceKeySigner};
use sl_edge_agent::encoder::TelemetryEncoder;
use sl_edge_agent::inbox::LoggingInbox;
use sl_edge_agent::network::{InterfaceLink, interface_mac};
use sl_edge_agent::scanner::{ChannelScanSource, spawn_json_lines_reader};
use sl_edge_agent::storage::{CsvFileSink, RecordSink};
use sl_edge_agent::supervisor::{Collaborators, Supervisor, SupervisorSettings};
use sl_mqtt_channel::MqttConnector;
use sl_protocol::{Identity, topics};

/// Scan records buffered between the stdin reader and the supervisor.
const SCAN_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sl-edge-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/scanlink/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    let identity = Identity::derive(&config.hub_host, &config.device_id)?;
    tracing::info!(
        device_id = %identity.device_id(),
        hub_host = %identity.hub_host(),
        scheme = ?config.mqtt.scheme,
        "config loaded"
    );

    // ── Receptor identity ───────────────────────────────────────
    let receptor_id = match &config.receptor_id {
        Some(id) => id.clone(),
        None => match interface_mac(&config.network_interface).await {
            Some(mac) => mac,
            None => {
                tracing::warn!(
                    interface = %config.network_interface,
                    "interface MAC unavailable, using device id as receptor id"
                );
                identity.device_id().to_string()
            }
        },
    };
    tracing::info!(receptor_id = %receptor_id, "receptor identity resolved");

    // ── Credentials ─────────────────────────────────────────────
    let clock = Arc::new(SystemClock);
    let strategy = match &config.auth {
        AuthConfig::SasToken {
            device_key,
            token_lifetime_minutes,
        } => AuthStrategy::SignedToken {
            signer: Arc::new(DeviceKeySigner::from_base64(device_key)?),
            lifetime_minutes: *token_lifetime_minutes,
        },
        AuthConfig::X509 {
            cert_path,
            key_path,
        } => AuthStrategy::CertificatePair {
            cert_path: cert_path.clone(),
            key_path: key_path.clone(),
        },
    };
    let credentials = CredentialProvider::new(clock.clone(), strategy);

    // ── Scan input and log ──────────────────────────────────────
    let (scan_tx, scan_source) = ChannelScanSource::new(SCAN_QUEUE_CAPACITY);
    let _reader = spawn_json_lines_reader(tokio::io::BufReader::new(tokio::io::stdin()), scan_tx);

    let storage: Option<Arc<dyn RecordSink>> = match &config.log_dir {
        Some(dir) => match CsvFileSink::create(dir, chrono::Utc::now()).await {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                tracing::warn!(error = %e, "scan log disabled");
                None
            }
        },
        None => None,
    };

    // ── Supervisor ──────────────────────────────────────────────
    let encoder = TelemetryEncoder::new(
        config.rssi_threshold,
        topics::telemetry(identity.device_id()),
        receptor_id,
    );
    let collaborators = Collaborators {
        network: Arc::new(InterfaceLink::new(&config.network_interface)),
        clock_gate: ClockGate::new(clock, Arc::new(HostTimeSync), config.clock.clone()),
        credentials,
        connector: Arc::new(MqttConnector::new(config.mqtt.clone())),
        scans: Box::new(scan_source),
        inbox: Arc::new(LoggingInbox),
        storage,
    };
    let mut supervisor = Supervisor::new(
        identity,
        encoder,
        collaborators,
        SupervisorSettings::from_config(&config),
    );

    // Graceful shutdown on SIGINT
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "signal handler unavailable");
                // Dropping the sender would stop the supervisor.
                std::future::pending::<()>().await;
            }
        }
    });

    tracing::info!("sl-edge-agent ready");
    supervisor.run(shutdown_rx).await;

    tracing::info!("sl-edge-agent stopped");
    Ok(())
}

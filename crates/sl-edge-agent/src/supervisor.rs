//! Session supervisor.
//!
//! Drives the device through
//! `Disconnected → ClockSyncing → Provisioning → SessionActive ⇄ Renewing`.
//! The supervisor owns the broker session outright. Transport events arrive
//! over an mpsc channel and are applied here, on the supervisor's own task,
//! so nothing else ever mutates the session.

use std::sync::Arc;
use std::time::Duration;

use sl_mqtt_channel::{BrokerSession, Connector, InboundEvent, QoS, SessionEvent};
use sl_protocol::{Credential, Identity, ScanRecord, topics};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::clock::ClockGate;
use crate::config::AgentConfig;
use crate::credential::CredentialProvider;
use crate::encoder::TelemetryEncoder;
use crate::error::ProvisionError;
use crate::inbox::InboxHandler;
use crate::network::{NetworkLink, wait_for_network};
use crate::scanner::ScanSource;
use crate::storage::RecordSink;

/// Capacity of the transport → supervisor event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    ClockSyncing,
    Provisioning,
    SessionActive,
    Renewing,
}

/// Timing knobs for the supervisory loop.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub tick_interval: Duration,
    /// Delay after a failed network wait, clock sync or provisioning attempt.
    pub backoff: Duration,
    pub network_poll: Duration,
    pub network_timeout: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            backoff: Duration::from_secs(config.retry.backoff_secs),
            network_poll: Duration::from_millis(500),
            network_timeout: Duration::from_secs(config.retry.network_timeout_secs),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            backoff: Duration::from_secs(10),
            network_poll: Duration::from_millis(500),
            network_timeout: Duration::from_secs(60),
        }
    }
}

/// Running counters. Every dropped record and every event kind lands in one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub published: u64,
    pub publish_failures: u64,
    pub below_threshold: u64,
    pub encode_failures: u64,
    pub storage_failures: u64,
    /// PUBACKs received.
    pub acknowledged: u64,
    pub unknown_events: u64,
    pub subscribe_calls: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub renewals: u64,
    pub provisioning_failures: u64,
}

/// Everything the supervisor talks to.
pub struct Collaborators {
    pub network: Arc<dyn NetworkLink>,
    pub clock_gate: ClockGate,
    pub credentials: CredentialProvider,
    pub connector: Arc<dyn Connector>,
    pub scans: Box<dyn ScanSource>,
    pub inbox: Arc<dyn InboxHandler>,
    /// Scan log. `None` disables it.
    pub storage: Option<Arc<dyn RecordSink>>,
}

pub struct Supervisor {
    identity: Identity,
    encoder: TelemetryEncoder,
    network: Arc<dyn NetworkLink>,
    clock_gate: ClockGate,
    credentials: CredentialProvider,
    connector: Arc<dyn Connector>,
    scans: Box<dyn ScanSource>,
    inbox: Arc<dyn InboxHandler>,
    storage: Option<Arc<dyn RecordSink>>,
    settings: SupervisorSettings,

    state: SupervisorState,
    session: Option<BrokerSession>,
    credential: Option<Credential>,
    generation: u64,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    ticker: Option<Interval>,
    stats: SupervisorStats,
}

impl Supervisor {
    pub fn new(
        identity: Identity,
        encoder: TelemetryEncoder,
        collaborators: Collaborators,
        settings: SupervisorSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let Collaborators {
            network,
            clock_gate,
            credentials,
            connector,
            scans,
            inbox,
            storage,
        } = collaborators;

        Self {
            identity,
            encoder,
            network,
            clock_gate,
            credentials,
            connector,
            scans,
            inbox,
            storage,
            settings,
            state: SupervisorState::Disconnected,
            session: None,
            credential: None,
            generation: 0,
            events_tx,
            events_rx,
            ticker: None,
            stats: SupervisorStats::default(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    pub fn session(&self) -> Option<&BrokerSession> {
        self.session.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Generation of the most recently provisioned session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run until `shutdown` reads `true` or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(device_id = %self.identity.device_id(), "supervisor started");
        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.step() => {}
            }
        }
        self.teardown().await;
        tracing::info!(stats = ?self.stats, "supervisor stopped");
    }

    /// Perform the work of the current state once.
    pub async fn step(&mut self) {
        match self.state {
            SupervisorState::Disconnected => self.await_network().await,
            SupervisorState::ClockSyncing => self.sync_clock().await,
            SupervisorState::Provisioning => self.provision().await,
            SupervisorState::SessionActive => self.run_active().await,
            SupervisorState::Renewing => self.renew().await,
        }
    }

    /// One supervisory tick. Network first, then credential expiry, then
    /// session health, then publishing.
    pub async fn tick(&mut self) {
        self.process_pending_events().await;

        if !self.network.is_connected().await {
            tracing::warn!("network connectivity lost");
            self.teardown().await;
            self.transition(SupervisorState::Disconnected);
            return;
        }

        if self.credential_expired() {
            tracing::info!("credential expired");
            self.transition(SupervisorState::Renewing);
            return;
        }

        if !self.session.as_ref().is_some_and(BrokerSession::is_usable) {
            tracing::warn!("broker session unusable, reprovisioning");
            self.teardown().await;
            self.transition(SupervisorState::Provisioning);
            return;
        }

        self.publish_scans().await;
        tracing::debug!(stats = ?self.stats, "tick complete");
    }

    /// Apply every event already queued by the transport.
    pub async fn process_pending_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    // ── State bodies ────────────────────────────────────────────

    async fn await_network(&mut self) {
        match wait_for_network(
            self.network.as_ref(),
            self.settings.network_poll,
            self.settings.network_timeout,
        )
        .await
        {
            Ok(()) => {
                tracing::info!("network connected");
                self.transition(SupervisorState::ClockSyncing);
            }
            Err(e) => {
                tracing::warn!(error = %e, backoff_secs = self.settings.backoff.as_secs(), "network unavailable");
                tokio::time::sleep(self.settings.backoff).await;
            }
        }
    }

    async fn sync_clock(&mut self) {
        match self.clock_gate.synchronize().await {
            Ok(()) => self.transition(SupervisorState::Provisioning),
            Err(e) => {
                tracing::error!(error = %e, "clock sync failed");
                self.transition(SupervisorState::Disconnected);
                tokio::time::sleep(self.settings.backoff).await;
            }
        }
    }

    async fn provision(&mut self) {
        match self.open_session().await {
            Ok(()) => self.transition(SupervisorState::SessionActive),
            Err(e) => {
                self.stats.provisioning_failures += 1;
                tracing::warn!(
                    error = %e,
                    backoff_secs = self.settings.backoff.as_secs(),
                    "provisioning failed"
                );
                if !self.network.is_connected().await {
                    self.transition(SupervisorState::Disconnected);
                }
                tokio::time::sleep(self.settings.backoff).await;
            }
        }
    }

    async fn renew(&mut self) {
        self.stats.renewals += 1;
        tracing::info!(generation = self.generation, "renewing broker session");
        match self.open_session().await {
            Ok(()) => self.transition(SupervisorState::SessionActive),
            Err(e) => {
                self.stats.provisioning_failures += 1;
                tracing::warn!(error = %e, "renewal failed");
                self.transition(SupervisorState::Provisioning);
                tokio::time::sleep(self.settings.backoff).await;
            }
        }
    }

    async fn run_active(&mut self) {
        let mut ticker = match self.ticker.take() {
            Some(ticker) => ticker,
            None => {
                let mut ticker = tokio::time::interval(self.settings.tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            }
        };

        tokio::select! {
            biased;
            Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            _ = ticker.tick() => self.tick().await,
        }

        if self.state == SupervisorState::SessionActive && self.ticker.is_none() {
            self.ticker = Some(ticker);
        }
    }

    // ── Session lifecycle ───────────────────────────────────────

    /// Tear down any old session, issue a fresh credential and connect.
    async fn open_session(&mut self) -> Result<(), ProvisionError> {
        self.teardown().await;

        let credential = self.credentials.issue(&self.identity).await?;
        self.generation += 1;
        let session = BrokerSession::establish(
            self.connector.as_ref(),
            &self.identity,
            &credential,
            self.generation,
            self.events_tx.clone(),
        )
        .await?;

        self.stats.sessions_created += 1;
        tracing::info!(
            generation = self.generation,
            expiry_epoch = ?credential.expiry_epoch(),
            "broker session established"
        );
        self.credential = Some(credential);
        self.session = Some(session);
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.destroy().await {
                self.stats.sessions_destroyed += 1;
                tracing::info!(generation = session.generation(), "broker session destroyed");
            }
        }
        self.credential = None;
    }

    fn credential_expired(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| self.credentials.is_expired(c))
    }

    fn transition(&mut self, next: SupervisorState) {
        if next == self.state {
            return;
        }
        tracing::info!(from = ?self.state, to = ?next, "state transition");
        if next == SupervisorState::SessionActive {
            // Fresh ticker: the first tick of a new session fires immediately.
            self.ticker = None;
        }
        self.state = next;
    }

    // ── Publishing ──────────────────────────────────────────────

    async fn publish_scans(&mut self) {
        loop {
            // Acks and session events keep flowing while a burst drains.
            self.process_pending_events().await;
            if !self.session.as_ref().is_some_and(BrokerSession::is_usable) {
                tracing::warn!("broker session unusable while draining scans");
                return;
            }
            // Checked before taking a record so an expiry leaves it queued.
            if self.credential_expired() {
                tracing::info!("credential expired while draining scans");
                self.transition(SupervisorState::Renewing);
                return;
            }
            let Some(record) = self.scans.try_next() else {
                break;
            };
            self.publish_record(record).await;
        }
    }

    async fn publish_record(&mut self, record: ScanRecord) {
        if !self.encoder.admits(&record) {
            self.stats.below_threshold += 1;
            tracing::trace!(peer = %record.peer_address, rssi = record.rssi, "below RSSI threshold");
            return;
        }

        let hex = self.encoder.encode_payload(&record.payload);

        if let Some(storage) = &self.storage {
            let row = self.encoder.body(&record, &hex).log_row();
            if let Err(e) = storage.append(&row).await {
                self.stats.storage_failures += 1;
                tracing::warn!(error = %e, "failed to append scan log row");
            }
        }

        let message = match self.encoder.build_message(&record, &hex) {
            Ok(message) => message,
            Err(e) => {
                self.stats.encode_failures += 1;
                tracing::warn!(peer = %record.peer_address, error = %e, "dropping telemetry message");
                return;
            }
        };

        let Some(session) = self.session.as_ref() else {
            return;
        };
        // A full request queue only drains while the transport's events are
        // consumed, so keep receiving them until the publish is queued.
        let mut deferred = Vec::new();
        let result = {
            let publish = session.publish(
                message.topic(),
                message.body().as_bytes(),
                QoS::AtLeastOnce,
                false,
            );
            tokio::pin!(publish);
            loop {
                tokio::select! {
                    biased;
                    result = &mut publish => break result,
                    Some(event) = self.events_rx.recv() => deferred.push(event),
                }
            }
        };
        for event in deferred {
            self.handle_event(event).await;
        }

        match result {
            Ok(()) => {
                self.stats.published += 1;
                tracing::debug!(peer = %record.peer_address, rssi = record.rssi, "telemetry published");
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                tracing::warn!(peer = %record.peer_address, error = %e, "telemetry publish failed");
            }
        }
    }

    // ── Event handling ──────────────────────────────────────────

    async fn handle_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(BrokerSession::generation);
        if current != Some(event.generation) {
            tracing::debug!(
                generation = event.generation,
                current = ?current,
                event = ?event.event,
                "ignoring event from stale session"
            );
            return;
        }

        match event.event {
            InboundEvent::BeforeConnect => tracing::debug!("connecting to broker"),
            InboundEvent::Connected => self.on_connected().await,
            InboundEvent::Disconnected => {
                tracing::warn!(generation = event.generation, "broker disconnected");
                self.mark_unusable();
            }
            InboundEvent::Error(reason) => {
                tracing::error!(generation = event.generation, reason = %reason, "broker session error");
                self.mark_unusable();
            }
            InboundEvent::Subscribed => tracing::info!("subscription acknowledged"),
            InboundEvent::Unsubscribed => tracing::info!("unsubscribe acknowledged"),
            InboundEvent::Published => {
                self.stats.acknowledged += 1;
                tracing::trace!("publish acknowledged");
            }
            InboundEvent::DataReceived {
                topic,
                payload,
                truncated,
            } => {
                self.inbox
                    .deliver(topic.as_str(), &payload[..], truncated)
                    .await;
            }
            InboundEvent::Unknown(kind) => {
                self.stats.unknown_events += 1;
                tracing::warn!(kind = %kind, "unhandled broker event");
            }
        }
    }

    async fn on_connected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.mark_connected();
        tracing::info!(generation = session.generation(), "connected to broker");

        if !session.is_connected() || !session.subscribed_topics().is_empty() {
            return;
        }

        let filter = topics::devicebound_subscribe(self.identity.device_id());
        self.stats.subscribe_calls += 1;
        match session.subscribe(&filter, QoS::AtLeastOnce).await {
            Ok(id) => tracing::info!(filter = %filter, id = id.0, "subscribed to cloud-to-device inbox"),
            Err(e) => tracing::warn!(filter = %filter, error = %e, "subscribe failed"),
        }
    }

    fn mark_unusable(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.mark_unusable();
        }
    }
}

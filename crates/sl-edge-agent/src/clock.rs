//! Wall-clock gate.
//!
//! Token expiry is computed from wall-clock time, so no credential may be
//! issued before the clock reads at or after a trusted epoch. The gate
//! asks the time source to sync and then polls, bounded by a timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::ClockConfig;
use crate::error::TimeError;

/// Read-only wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Something that can be asked to bring the clock in line with time servers.
#[async_trait]
pub trait TimeSync: Send + Sync {
    async fn request_sync(&self, servers: &[String]) -> Result<(), TimeError>;
}

/// Host system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Relies on the host's time daemon; only records the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTimeSync;

#[async_trait]
impl TimeSync for HostTimeSync {
    async fn request_sync(&self, servers: &[String]) -> Result<(), TimeError> {
        tracing::info!(servers = ?servers, "time sync delegated to host time daemon");
        Ok(())
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn at_epoch(secs: i64) -> Self {
        Self::new(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Blocks progress until wall-clock time is trustworthy.
pub struct ClockGate {
    clock: Arc<dyn Clock>,
    sync: Arc<dyn TimeSync>,
    config: ClockConfig,
}

impl ClockGate {
    pub fn new(clock: Arc<dyn Clock>, sync: Arc<dyn TimeSync>, config: ClockConfig) -> Self {
        Self {
            clock,
            sync,
            config,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.clock.now().timestamp() >= self.config.trusted_epoch
    }

    /// Request a sync, then wait until the clock passes the trusted epoch.
    pub async fn synchronize(&self) -> Result<(), TimeError> {
        tracing::info!("setting time using SNTP");
        self.sync.request_sync(&self.config.ntp_servers).await?;

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let wait = async {
            while !self.is_trusted() {
                tokio::time::sleep(poll).await;
            }
        };

        tokio::time::timeout(Duration::from_secs(self.config.sync_timeout_secs), wait)
            .await
            .map_err(|_| TimeError::Timeout {
                trusted_epoch: self.config.trusted_epoch,
                timeout_secs: self.config.sync_timeout_secs,
            })?;

        tracing::info!(now = %self.clock.now(), "time initialized");
        Ok(())
    }
}

//! Network link abstraction.
//!
//! `NetworkLink` trait with `is_connected`/`join`. Two impls:
//! - `InterfaceLink`: reads the kernel's operstate for one interface
//! - `MockNetwork`: settable link state for tests

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NetworkError;

const SYSFS_NET: &str = "/sys/class/net";

#[async_trait]
pub trait NetworkLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Ask the link to (re)join its network. Does not wait for it to come up.
    async fn join(&self) -> Result<(), NetworkError>;
}

/// Link state of a Linux network interface.
///
/// Joining is left to the host's network manager; `join` only logs.
#[derive(Debug, Clone)]
pub struct InterfaceLink {
    interface: String,
    sysfs_root: PathBuf,
}

impl InterfaceLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_root(interface, SYSFS_NET)
    }

    pub fn with_root(interface: impl Into<String>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            interface: interface.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn operstate_path(&self) -> PathBuf {
        self.sysfs_root.join(&self.interface).join("operstate")
    }
}

#[async_trait]
impl NetworkLink for InterfaceLink {
    async fn is_connected(&self) -> bool {
        match tokio::fs::read_to_string(self.operstate_path()).await {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                tracing::debug!(interface = %self.interface, error = %e, "operstate unreadable");
                false
            }
        }
    }

    async fn join(&self) -> Result<(), NetworkError> {
        if tokio::fs::metadata(self.sysfs_root.join(&self.interface))
            .await
            .is_err()
        {
            return Err(NetworkError::Join(format!(
                "interface {} not present",
                self.interface
            )));
        }
        tracing::info!(interface = %self.interface, "waiting for host network manager");
        Ok(())
    }
}

/// Read the MAC address of `interface`, lowercase and colon separated.
pub async fn interface_mac(interface: &str) -> Option<String> {
    interface_mac_at(SYSFS_NET, interface).await
}

pub async fn interface_mac_at(sysfs_root: impl Into<PathBuf>, interface: &str) -> Option<String> {
    let path = sysfs_root.into().join(interface).join("address");
    let mac = tokio::fs::read_to_string(path).await.ok()?;
    let mac = mac.trim().to_ascii_lowercase();
    (!mac.is_empty() && mac != "00:00:00:00:00:00").then_some(mac)
}

/// Trigger a join and poll until connected, bounded by `timeout`.
pub async fn wait_for_network(
    link: &dyn NetworkLink,
    poll: Duration,
    timeout: Duration,
) -> Result<(), NetworkError> {
    if link.is_connected().await {
        return Ok(());
    }
    link.join().await?;

    let wait = async {
        while !link.is_connected().await {
            tokio::time::sleep(poll).await;
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| NetworkError::Timeout {
            timeout_secs: timeout.as_secs(),
        })
}

/// Settable link for tests.
#[derive(Debug, Default)]
pub struct MockNetwork {
    connected: AtomicBool,
    joins: AtomicUsize,
    connect_on_join: AtomicBool,
    join_error: Mutex<Option<String>>,
}

impl MockNetwork {
    pub fn new(connected: bool) -> Self {
        let net = Self::default();
        net.set_connected(connected);
        net
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Bring the link up whenever `join` is called.
    pub fn connect_on_join(&self, enabled: bool) {
        self.connect_on_join.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_join(&self, reason: Option<&str>) {
        *self.join_error.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkLink for MockNetwork {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn join(&self) -> Result<(), NetworkError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self
            .join_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(NetworkError::Join(reason));
        }
        if self.connect_on_join.load(Ordering::SeqCst) {
            self.set_connected(true);
        }
        Ok(())
    }
}

//! Network connectivity as seen by the scheduler

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

/// Class of the active network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    #[default]
    None,
    Metered,
    Unmetered,
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Metered => write!(f, "metered"),
            Self::Unmetered => write!(f, "unmetered"),
        }
    }
}

/// Source of connectivity state
#[async_trait]
pub trait Connectivity: Send + Sync {
    fn network(&self) -> NetworkClass;

    /// Whether background sync is allowed at all (global setting)
    fn auto_sync_allowed(&self) -> bool;

    fn is_connected(&self) -> bool {
        self.network() != NetworkClass::None
    }

    /// Resolve once any network is available
    async fn wait_for_connectivity(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetworkState {
    class: NetworkClass,
    auto_sync: bool,
}

/// Connectivity state fed by whoever watches the platform's network
///
/// Cloning yields another handle onto the same state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(class: NetworkClass, auto_sync: bool) -> Self {
        let (tx, _rx) = watch::channel(NetworkState { class, auto_sync });
        Self { tx }
    }

    pub fn set_network(&self, class: NetworkClass) {
        info!(%class, "NetworkMonitor::set_network: called");
        self.tx.send_modify(|state| state.class = class);
    }

    pub fn set_auto_sync(&self, allowed: bool) {
        debug!(allowed, "NetworkMonitor::set_auto_sync: called");
        self.tx.send_modify(|state| state.auto_sync = allowed);
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkClass::Unmetered, true)
    }
}

#[async_trait]
impl Connectivity for NetworkMonitor {
    fn network(&self) -> NetworkClass {
        self.tx.borrow().class
    }

    fn auto_sync_allowed(&self) -> bool {
        self.tx.borrow().auto_sync
    }

    async fn wait_for_connectivity(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|state| state.class != NetworkClass::None).await;
    }
}

//! Network reachability tracking.
//!
//! Display only: nothing in the tracking path depends on connectivity.
//! The platform pushes connectivity changes in through
//! [`NetworkMonitor::on_platform_change`]; subscribers hear about actual
//! transitions only.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};

/// Connectivity as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

type Listener = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

struct MonitorInner {
    status: NetworkStatus,
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Tracks connectivity and fans out status changes.
pub struct NetworkMonitor {
    inner: Mutex<MonitorInner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    /// Starts out Online until the platform says otherwise.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                status: NetworkStatus::Online,
                next_id: 0,
                listeners: BTreeMap::new(),
            }),
        }
    }

    pub fn current_status(&self) -> NetworkStatus {
        match self.inner.lock() {
            Ok(inner) => inner.status,
            Err(_) => {
                warn!("[NetworkMonitor] Lock poisoned, reporting offline");
                NetworkStatus::Offline
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.current_status().is_online()
    }

    /// Register a listener. Returns an id for [`NetworkMonitor::unsubscribe`].
    pub fn subscribe<F>(&self, callback: F) -> u64
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.insert(id, Arc::new(callback));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.remove(&id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().map(|i| i.listeners.len()).unwrap_or(0)
    }

    /// Feed a platform connectivity event. Listeners are notified only when
    /// the status actually changes. Returns whether it did.
    ///
    /// Listeners run after the lock is released and may call back into the
    /// monitor.
    pub fn on_platform_change(&self, connected: bool) -> bool {
        let status = NetworkStatus::from_connected(connected);
        let listeners: Vec<Listener> = {
            let Ok(mut inner) = self.inner.lock() else {
                return false;
            };
            if inner.status == status {
                return false;
            }
            inner.status = status;
            inner.listeners.values().cloned().collect()
        };

        info!("[NetworkMonitor] Network status changed: {:?}", status);
        for listener in listeners {
            listener(status);
        }
        true
    }

    /// Drop all listeners.
    pub fn cleanup(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.clear();
        }
    }
}

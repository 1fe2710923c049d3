//! Update coordinator
//!
//! One coordinator refreshes a device's data and notifies every entity that
//! subscribed. Subscriptions are scoped: the returned [`ListenerHandle`]
//! unregisters its listener when released or dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// Refresh callback; `Err` carries the reason the update failed
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

type Listener = Arc<dyn Fn() + Send + Sync>;
type Listeners = DashMap<u64, Listener>;

/// Shared refresh for all entities of a device
pub struct UpdateCoordinator {
    name: String,
    refresh: RefreshFn,
    listeners: Arc<Listeners>,
    next_listener_id: AtomicU64,
    last_update_success: AtomicBool,
}

impl UpdateCoordinator {
    pub fn new(name: impl Into<String>, refresh: RefreshFn) -> Self {
        Self {
            name: name.into(),
            refresh,
            listeners: Arc::new(DashMap::new()),
            next_listener_id: AtomicU64::new(1),
            last_update_success: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Subscribe to updates. The listener stays registered until the handle
    /// is released or dropped.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, Arc::new(listener));
        debug!(coordinator = %self.name, listener = id, "Listener added");

        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Run the refresh callback and notify listeners of the outcome
    pub async fn async_refresh(&self) {
        match (self.refresh)().await {
            Ok(()) => {
                if !self.last_update_success.swap(true, Ordering::SeqCst) {
                    debug!(coordinator = %self.name, "Fetching data recovered");
                }
            }
            Err(reason) => {
                if self.last_update_success.swap(false, Ordering::SeqCst) {
                    warn!(coordinator = %self.name, %reason, "Error fetching data");
                }
            }
        }
        self.notify_listeners();
    }

    /// Refresh on behalf of an entity
    pub async fn async_request_refresh(&self) {
        self.async_refresh().await
    }

    fn notify_listeners(&self) {
        // Snapshot so callbacks may add or drop listeners
        let listeners: Vec<Listener> = self.listeners.iter().map(|r| r.value().clone()).collect();
        for listener in listeners {
            listener();
        }
    }
}

/// Scoped subscription to an [`UpdateCoordinator`]
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<Listeners>,
}

impl ListenerHandle {
    /// Unregister now
    pub fn release(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.id);
        }
    }
}

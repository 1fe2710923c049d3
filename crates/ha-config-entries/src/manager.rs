//! Config Entries Manager
//!
//! Owns every persisted registration and enforces that at most one entry
//! exists per `(domain, unique_id)`.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::InvalidTransition;
use crate::storage::{Storable, Storage, StorageError, StorageResult};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Persisted shape of the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Integration setup callback, keyed by domain
pub type SetupHandler = Arc<dyn Fn(&ConfigEntry) -> Result<(), String> + Send + Sync + 'static>;

/// Config Entries Manager
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup/unload across entries
    setup_lock: Mutex<()>,

    setup_handlers: DashMap<String, SetupHandler>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            setup_handlers: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                if let Some(ref unique_id) = entry.unique_id {
                    self.by_unique_id.insert(
                        (entry.domain.clone(), unique_id.clone()),
                        entry.entry_id.clone(),
                    );
                }
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.iter().collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry.entry_id.clone());
        self.entries.insert(entry.entry_id.clone(), entry);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Add a new entry.
    ///
    /// The unique_id slot is claimed atomically, so two racing adds for the
    /// same device cannot both succeed.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            match self
                .by_unique_id
                .entry((entry.domain.clone(), unique_id.clone()))
            {
                Entry::Occupied(_) => {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry.entry_id.clone());
                }
            }
        }

        self.index_entry(entry.clone());
        self.save().await?;

        info!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            "Added config entry: {}",
            entry.title
        );
        Ok(entry)
    }

    /// Update an existing entry. Returns `true` if anything changed.
    ///
    /// Storage is only written when the entry changed.
    pub async fn update_entry(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<bool> {
        let (changed, old_unique_id, new_unique_id, domain) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            let old_unique_id = entry.unique_id.clone();
            let changed = entry.apply(update);
            (changed, old_unique_id, entry.unique_id.clone(), entry.domain.clone())
        };

        if !changed {
            return Ok(false);
        }

        if old_unique_id != new_unique_id {
            if let Some(old) = old_unique_id {
                self.by_unique_id.remove(&(domain.clone(), old));
            }
            if let Some(new) = new_unique_id {
                self.by_unique_id.insert((domain, new), entry_id.to_string());
            }
        }

        self.save().await?;
        debug!(entry_id, "Updated config entry");
        Ok(true)
    }

    /// Remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let (_, entry) = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.save().await?;
        info!(entry_id, domain = %entry.domain, "Removed config entry: {}", entry.title);
        Ok(entry)
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!(entry_id, ?state, "Entry state changed");
        Ok(())
    }

    pub fn register_setup_handler(&self, domain: &str, handler: SetupHandler) {
        self.setup_handlers.insert(domain.to_string(), handler);
        debug!("Registered setup handler for domain: {}", domain);
    }

    /// Set up an entry by calling its integration's handler
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(entry_id)
    }

    fn setup_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!(entry_id, "Skipping setup for disabled entry");
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let handler = self
            .setup_handlers
            .get(&entry.domain)
            .map(|r| r.value().clone());
        match handler {
            Some(handler) => match handler(&entry) {
                Ok(()) => {
                    self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                    info!(entry_id, "Setup completed for entry: {}", entry.title);
                }
                Err(reason) => {
                    warn!(entry_id, %reason, "Setup failed");
                    self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                    return Err(ConfigEntriesError::SetupFailed(reason));
                }
            },
            None => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                debug!(domain = %entry.domain, "No setup handler, marking as loaded");
            }
        }

        Ok(())
    }

    /// Unload an entry
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id)
    }

    fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;
        self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!(entry_id, "Unloaded entry");
        Ok(())
    }

    /// Reload an entry (unload + setup) under one lock
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        info!(entry_id, "Reloading entry");
        self.unload_locked(entry_id)?;
        self.setup_locked(entry_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }
}

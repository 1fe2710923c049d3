//! Config Entry types
//!
//! A ConfigEntry is one persisted registration of an integration, e.g. one
//! camera onboarded through a config flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

/// Free-form key/value payload used for entry data, options and flow input
pub type EntryData = HashMap<String, serde_json::Value>;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Not set up yet, or unloaded
    #[default]
    NotLoaded,
    /// Setup handler is running
    SetupInProgress,
    /// Set up successfully
    Loaded,
    /// Setup handler failed
    SetupError,
    /// Unload is running
    UnloadInProgress,
}

/// How a config entry (or the flow that created it) was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Started by the user from the UI
    #[default]
    User,
    /// Started by the platform to repair credentials of an existing entry
    Reauth,
}

impl ConfigEntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEntrySource::User => "user",
            ConfigEntrySource::Reauth => "reauth",
        }
    }
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    User,
}

/// A persisted registration of an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g. "reolink")
    pub domain: String,

    /// Display title
    pub title: String,

    /// Connection data (host, credentials, ...)
    #[serde(default)]
    pub data: EntryData,

    /// User-adjustable options
    #[serde(default)]
    pub options: EntryData,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_version")]
    pub minor_version: u32,

    /// Device-derived key used for deduplication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Why the entry is in a failed state (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: EntryData::new(),
            options: EntryData::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: EntryData) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: EntryData) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = version;
        self.minor_version = minor_version;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Move to `new_state` if the lifecycle allows it.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.try_transition(new_state)?;
        self.reason = reason;
        Ok(())
    }

    /// Apply an update, returning whether anything actually changed.
    ///
    /// `modified_at` is only bumped when the entry changed.
    pub fn apply(&mut self, update: ConfigEntryUpdate) -> bool {
        let mut changed = false;

        if let Some(title) = update.title {
            if self.title != title {
                self.title = title;
                changed = true;
            }
        }
        if let Some(data) = update.data {
            if self.data != data {
                self.data = data;
                changed = true;
            }
        }
        if let Some(options) = update.options {
            if self.options != options {
                self.options = options;
                changed = true;
            }
        }
        if let Some(unique_id) = update.unique_id {
            if self.unique_id != unique_id {
                self.unique_id = unique_id;
                changed = true;
            }
        }

        if changed {
            self.modified_at = Utc::now();
        }
        changed
    }
}

/// Partial update for a config entry; `None` leaves a field untouched
#[derive(Debug, Default, Clone)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<EntryData>,
    pub options: Option<EntryData>,
    pub unique_id: Option<Option<String>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: EntryData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: EntryData) -> Self {
        self.options = Some(options);
        self
    }

    pub fn unique_id(mut self, unique_id: Option<String>) -> Self {
        self.unique_id = Some(unique_id);
        self
    }
}

//! Mock config entry for testing
//!
//! Builds a [`ConfigEntry`] and adds it to a registry, the way an entry
//! created by an earlier flow would exist.

use std::collections::HashMap;

use ha_config_entries::{ConfigEntries, ConfigEntry, ConfigEntryState, EntryData};
use ha_reolink::constants::{
    CONF_HOST, CONF_PASSWORD, CONF_PORT, CONF_PROTOCOL, CONF_USERNAME, CONF_USE_HTTPS,
    DEFAULT_PROTOCOL,
};
use ha_reolink::DOMAIN;
use serde_json::{json, Value};

use super::{TEST_HOST, TEST_NVR_NAME, TEST_PASSWORD, TEST_PORT, TEST_UNIQUE_ID, TEST_USERNAME};

pub struct MockConfigEntry {
    pub title: String,
    pub data: HashMap<String, Value>,
    pub options: HashMap<String, Value>,
    pub unique_id: Option<String>,
}

impl MockConfigEntry {
    /// A Reolink entry matching the mock device
    pub fn reolink() -> Self {
        Self {
            title: TEST_NVR_NAME.to_string(),
            data: HashMap::from([
                (CONF_HOST.to_string(), json!(TEST_HOST)),
                (CONF_USERNAME.to_string(), json!(TEST_USERNAME)),
                (CONF_PASSWORD.to_string(), json!(TEST_PASSWORD)),
                (CONF_PORT.to_string(), json!(TEST_PORT)),
                (CONF_USE_HTTPS.to_string(), json!(true)),
            ]),
            options: HashMap::from([(CONF_PROTOCOL.to_string(), json!(DEFAULT_PROTOCOL))]),
            unique_id: Some(TEST_UNIQUE_ID.to_string()),
        }
    }

    pub fn with_options(mut self, options: EntryData) -> Self {
        self.options = options;
        self
    }

    /// Add to `entries` and set the entry up
    pub async fn add_to(self, entries: &ConfigEntries) -> ConfigEntry {
        let mut entry = ConfigEntry::new(DOMAIN, self.title)
            .with_data(self.data)
            .with_options(self.options);
        if let Some(unique_id) = self.unique_id {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = entries.add(entry).await.unwrap();
        entries.setup(&entry.entry_id).await.unwrap();

        let entry = entries.get(&entry.entry_id).unwrap();
        assert_eq!(entry.state, ConfigEntryState::Loaded);
        entry
    }
}

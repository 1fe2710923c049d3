//! Connection to a Reolink NVR or camera
//!
//! [`ReolinkApi`] is the device client seam: a real implementation speaks the
//! Reolink HTTP API, tests plug in a mock. [`ReolinkHost`] wraps one client
//! for one set of credentials and derives the device identity from it.

use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::EntryData;
use ha_entity::{format_mac, DeviceIdentifier, DeviceInfo};
use tracing::debug;

use crate::constants::{
    CONF_HOST, CONF_PASSWORD, CONF_PORT, CONF_PROTOCOL, CONF_USERNAME, CONF_USE_HTTPS,
    DEFAULT_PROTOCOL, DEFAULT_TIMEOUT, DOMAIN, MANUFACTURER,
};
use crate::error::{ReolinkError, ReolinkResult};

/// Everything a client needs to reach a device
#[derive(Debug, Clone, PartialEq)]
pub struct ReolinkConnectionConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// `None` lets the client probe the default ports
    pub port: Option<u16>,
    /// `None` lets the client try HTTPS, then HTTP
    pub use_https: Option<bool>,
    pub protocol: String,
    pub timeout: Duration,
}

impl ReolinkConnectionConfig {
    /// Build from entry data (host, credentials, overrides) and options
    pub fn from_entry(data: &EntryData, options: &EntryData) -> Self {
        let text = |map: &EntryData, key: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Self {
            host: text(data, CONF_HOST),
            username: text(data, CONF_USERNAME),
            password: text(data, CONF_PASSWORD),
            port: data
                .get(CONF_PORT)
                .and_then(|v| v.as_u64())
                .and_then(|p| u16::try_from(p).ok()),
            use_https: data.get(CONF_USE_HTTPS).and_then(|v| v.as_bool()),
            protocol: options
                .get(CONF_PROTOCOL)
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_PROTOCOL)
                .to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Client for a single Reolink device
#[async_trait]
pub trait ReolinkApi: Send {
    /// Log in and fetch device capabilities and identity
    async fn get_host_data(&mut self) -> ReolinkResult<()>;

    /// End the session
    async fn logout(&mut self) -> ReolinkResult<()>;

    fn username(&self) -> &str;
    fn user_level(&self) -> &str;
    fn is_admin(&self) -> bool;
    fn mac_address(&self) -> Option<&str>;
    fn port(&self) -> u16;
    fn use_https(&self) -> bool;
    fn nvr_name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    fn sw_version(&self) -> Option<&str> {
        None
    }
}

/// Creates clients; lets the flow instantiate one per submitted form
pub trait ReolinkApiFactory: Send + Sync {
    fn create(&self, config: &ReolinkConnectionConfig) -> Box<dyn ReolinkApi>;
}

/// A device handshake in progress or completed
pub struct ReolinkHost {
    api: Box<dyn ReolinkApi>,
    unique_id: Option<String>,
}

impl ReolinkHost {
    pub fn new(factory: &dyn ReolinkApiFactory, data: &EntryData, options: &EntryData) -> Self {
        let config = ReolinkConnectionConfig::from_entry(data, options);
        debug!(host = %config.host, port = ?config.port, "Creating Reolink client");
        Self {
            api: factory.create(&config),
            unique_id: None,
        }
    }

    pub fn api(&self) -> &dyn ReolinkApi {
        self.api.as_ref()
    }

    /// Formatted MAC address, known after a successful [`async_init`](Self::async_init)
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Connect, check the account is an admin, and derive the unique id
    pub async fn async_init(&mut self) -> ReolinkResult<()> {
        self.api.get_host_data().await?;

        let mac = self
            .api
            .mac_address()
            .ok_or_else(|| ReolinkError::Setup("Could not get mac address".to_string()))?;
        let unique_id = format_mac(mac);

        if !self.api.is_admin() {
            return Err(ReolinkError::UserNotAdmin {
                username: self.api.username().to_string(),
                user_level: self.api.user_level().to_string(),
            });
        }

        debug!(%unique_id, nvr = self.api.nvr_name(), "Reolink host initialized");
        self.unique_id = Some(unique_id);
        Ok(())
    }

    /// Log out. Failures are only logged: the session is abandoned either way.
    pub async fn stop(&mut self) {
        if let Err(err) = self.api.logout().await {
            debug!(error = %err, "Error while logging out of Reolink device");
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            identifiers: self
                .unique_id
                .iter()
                .map(|id| DeviceIdentifier::new(DOMAIN, id))
                .collect(),
            name: Some(self.api.nvr_name().to_string()),
            model: self.api.model().map(str::to_string),
            manufacturer: Some(MANUFACTURER.to_string()),
            sw_version: self.api.sw_version().map(str::to_string),
        }
    }
}

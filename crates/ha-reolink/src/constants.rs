//! Reolink integration constants

use std::time::Duration;

use ha_config_entries::EntryData;
use serde_json::json;

pub const DOMAIN: &str = "reolink";
pub const MANUFACTURER: &str = "Reolink";

pub const CONF_HOST: &str = "host";
pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_PORT: &str = "port";
pub const CONF_USE_HTTPS: &str = "use_https";
pub const CONF_PROTOCOL: &str = "protocol";

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PROTOCOL: &str = "rtsp";
/// Streaming protocols a camera can be switched to
pub const PROTOCOLS: [&str; 3] = ["rtsp", "rtmp", "flv"];

/// Network timeout handed to the device client
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options stored on a freshly created entry
pub fn default_options() -> EntryData {
    EntryData::from([(CONF_PROTOCOL.to_string(), json!(DEFAULT_PROTOCOL))])
}

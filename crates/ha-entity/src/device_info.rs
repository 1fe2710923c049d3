//! Device metadata attached to entities

use serde::{Deserialize, Serialize};

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }
}

/// Metadata the platform uses to group entities under a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// Normalize a MAC address to lower-case, colon separated form.
///
/// Accepts colon, dash, dot (Cisco) separated or bare 12-hex-digit input.
/// Anything else is returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let count = |sep: char| mac.chars().filter(|c| *c == sep).count();

    let bare = match mac.len() {
        17 if count(':') == 5 => return mac.to_lowercase(),
        17 if count('-') == 5 => mac.replace('-', ""),
        14 if count('.') == 2 => mac.replace('.', ""),
        12 => mac.to_string(),
        _ => return mac.to_string(),
    };

    if bare.len() != 12 || !bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return mac.to_string();
    }

    let bare = bare.to_lowercase();
    (0..12)
        .step_by(2)
        .map(|i| &bare[i..i + 2])
        .collect::<Vec<_>>()
        .join(":")
}

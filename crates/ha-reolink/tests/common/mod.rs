//! Common test utilities for the Reolink integration
//!
//! A scriptable device client, a config entry builder that registers itself,
//! and a harness wiring a temporary registry to a flow manager.

#![allow(dead_code)]

mod mock_api;
mod mock_config_entry;
mod test_hass;

pub use mock_api::*;
pub use mock_config_entry::*;
pub use test_hass::*;

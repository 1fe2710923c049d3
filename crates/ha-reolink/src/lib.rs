//! Reolink integration
//!
//! Config flow that negotiates credentials with a Reolink camera or NVR and
//! an options flow for the streaming protocol. The device client is
//! pluggable through [`ReolinkApiFactory`].

pub mod config_flow;
pub mod constants;
pub mod error;
pub mod host;

use std::sync::Arc;

use ha_config_entries::FlowManager;
use tracing::debug;

pub use config_flow::{
    ReolinkConfigFlowFactory, ReolinkFlowHandler, ReolinkOptionsFlowHandler,
    ABORT_REAUTH_SUCCESSFUL,
};
pub use constants::DOMAIN;
pub use error::{ReolinkError, ReolinkResult};
pub use host::{ReolinkApi, ReolinkApiFactory, ReolinkConnectionConfig, ReolinkHost};

/// Register the Reolink config and options flows with `flows`
pub fn register_flows(flows: &FlowManager, api_factory: Arc<dyn ReolinkApiFactory>) {
    flows.register_handler(DOMAIN, Arc::new(ReolinkConfigFlowFactory::new(api_factory)));
    debug!(domain = DOMAIN, "Registered Reolink config flow");
}

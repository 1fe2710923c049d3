//! Config flow for Reolink cameras and NVRs
//!
//! The `user` step logs in to the device, checks the account is an admin and
//! derives the unique id from the MAC address. Handshake failures are mapped
//! onto form errors so the user can correct the input and resubmit.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use ha_config_entries::{
    ConfigEntry, ConfigFlow, ConfigFlowFactory, DataSchema, EntryData, FieldType, FlowContext,
    FlowError, FlowInput, FlowStepResult, OptionsFlow,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::constants::{
    default_options, CONF_HOST, CONF_PASSWORD, CONF_PORT, CONF_PROTOCOL, CONF_USERNAME,
    CONF_USE_HTTPS, DEFAULT_PROTOCOL, DEFAULT_USERNAME, PROTOCOLS,
};
use crate::error::{ReolinkError, ReolinkResult};
use crate::host::{ReolinkApiFactory, ReolinkHost};

pub const STEP_USER: &str = "user";
pub const STEP_REAUTH: &str = "reauth";
pub const STEP_REAUTH_CONFIRM: &str = "reauth_confirm";
pub const STEP_INIT: &str = "init";

pub const ABORT_REAUTH_SUCCESSFUL: &str = "reauth_successful";

/// What a successful handshake learned about the device
struct DeviceIdentity {
    unique_id: String,
    nvr_name: String,
    port: u16,
    use_https: bool,
}

/// Errors and message placeholders for a redisplayed form
struct FormErrors {
    errors: HashMap<String, String>,
    placeholders: HashMap<String, String>,
}

impl FormErrors {
    fn none() -> Self {
        Self {
            errors: HashMap::new(),
            placeholders: HashMap::from([("error".to_string(), String::new())]),
        }
    }

    fn from_error(err: &ReolinkError) -> Self {
        let mut form = Self::none();
        let mut set = |field: &str, code: &str| {
            form.errors.insert(field.to_string(), code.to_string());
        };

        match err {
            ReolinkError::UserNotAdmin {
                username,
                user_level,
            } => {
                set(CONF_USERNAME, "not_admin");
                form.placeholders
                    .insert("username".to_string(), username.clone());
                form.placeholders
                    .insert("userlevel".to_string(), user_level.clone());
            }
            ReolinkError::CredentialsInvalid => set(CONF_HOST, "invalid_auth"),
            ReolinkError::Api(message) => {
                set(CONF_HOST, "api_error");
                form.placeholders.insert("error".to_string(), message.clone());
            }
            ReolinkError::Connection(message) | ReolinkError::Setup(message) => {
                set(CONF_HOST, "cannot_connect");
                form.placeholders.insert("error".to_string(), message.clone());
            }
            ReolinkError::Unexpected(message) => {
                set(CONF_HOST, "unknown");
                form.placeholders.insert("error".to_string(), message.clone());
            }
        }
        form
    }

    fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic during device handshake".to_string()
    }
}

fn text(input: &EntryData, key: &str) -> Option<String> {
    input.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Config flow handler for the Reolink domain
pub struct ReolinkFlowHandler {
    api_factory: Arc<dyn ReolinkApiFactory>,
    host: Option<String>,
    username: String,
    password: Option<String>,
    reauth: bool,
}

impl ReolinkFlowHandler {
    pub const VERSION: u32 = 1;

    pub fn new(api_factory: Arc<dyn ReolinkApiFactory>) -> Self {
        Self {
            api_factory,
            host: None,
            username: DEFAULT_USERNAME.to_string(),
            password: None,
            reauth: false,
        }
    }

    /// Log in with `input` and read the device identity.
    ///
    /// The client is logged out on every path, including a panic inside the
    /// handshake, which is reported as [`ReolinkError::Unexpected`].
    async fn connect(&self, input: &EntryData) -> ReolinkResult<DeviceIdentity> {
        let mut host = ReolinkHost::new(self.api_factory.as_ref(), input, &default_options());

        let outcome = match AssertUnwindSafe(host.async_init()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(ReolinkError::Unexpected(panic_message(payload.as_ref()))),
        };
        let identity = outcome.and_then(|()| identity_of(&host));

        host.stop().await;
        identity
    }

    fn user_schema(&self, with_overrides: bool) -> DataSchema {
        let schema = DataSchema::new()
            .required(CONF_USERNAME, FieldType::String, Some(json!(self.username)))
            .required(
                CONF_PASSWORD,
                FieldType::String,
                self.password.as_ref().map(|p| json!(p)),
            )
            .required(
                CONF_HOST,
                FieldType::String,
                self.host.as_ref().map(|h| json!(h)),
            );

        if !with_overrides {
            return schema;
        }
        schema.extend(
            DataSchema::new()
                .optional(CONF_PORT, FieldType::Port)
                .optional(CONF_USE_HTTPS, FieldType::Boolean),
        )
    }

    /// Keep the submitted credentials as defaults for the next attempt
    fn remember(&mut self, input: &EntryData) {
        if let Some(host) = text(input, CONF_HOST) {
            self.host = Some(host);
        }
        if let Some(username) = text(input, CONF_USERNAME) {
            self.username = username;
        }
        if let Some(password) = text(input, CONF_PASSWORD) {
            self.password = Some(password);
        }
    }

    pub async fn async_step_user(
        &mut self,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        let mut form = FormErrors::none();

        if let Some(mut input) = user_input {
            match self.connect(&input).await {
                Ok(device) => {
                    input.insert(CONF_PORT.to_string(), json!(device.port));
                    input.insert(CONF_USE_HTTPS.to_string(), json!(device.use_https));

                    let existing = ctx.set_unique_id(&device.unique_id, false)?;
                    if let (Some(existing), true) = (existing, self.reauth) {
                        info!(
                            entry_id = %existing.entry_id,
                            unique_id = %device.unique_id,
                            "Reauthenticated Reolink device"
                        );
                        return ctx
                            .update_reload_and_abort(&existing, input, ABORT_REAUTH_SUCCESSFUL)
                            .await;
                    }
                    ctx.abort_if_unique_id_configured(None).await?;

                    info!(
                        unique_id = %device.unique_id,
                        nvr = %device.nvr_name,
                        "Creating Reolink entry"
                    );
                    return Ok(ctx.create_entry(device.nvr_name, input, default_options()));
                }
                Err(err) => {
                    match &err {
                        ReolinkError::Unexpected(_) => {
                            error!(error = %err, "Unexpected exception during Reolink setup")
                        }
                        _ => warn!(error = %err, "Reolink handshake failed"),
                    }
                    self.remember(&input);
                    form = FormErrors::from_error(&err);
                }
            }
        }

        Ok(ctx.show_form(
            STEP_USER,
            self.user_schema(!form.is_empty()),
            form.errors,
            form.placeholders,
        ))
    }

    /// Start reauthentication with the credentials stored on the entry
    pub async fn async_step_reauth(
        &mut self,
        entry_data: &EntryData,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        self.host = text(entry_data, CONF_HOST);
        self.username =
            text(entry_data, CONF_USERNAME).unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        self.password = text(entry_data, CONF_PASSWORD);
        self.reauth = true;
        debug!(host = ?self.host, "Reolink reauthentication requested");

        self.async_step_reauth_confirm(None, ctx).await
    }

    pub async fn async_step_reauth_confirm(
        &mut self,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        if user_input.is_some() {
            return self.async_step_user(None, ctx).await;
        }
        Ok(ctx.show_form(
            STEP_REAUTH_CONFIRM,
            DataSchema::new(),
            HashMap::new(),
            HashMap::new(),
        ))
    }
}

fn identity_of(host: &ReolinkHost) -> ReolinkResult<DeviceIdentity> {
    let unique_id = host
        .unique_id()
        .ok_or_else(|| ReolinkError::Setup("Could not get mac address".to_string()))?
        .to_string();
    let api = host.api();

    Ok(DeviceIdentity {
        unique_id,
        nvr_name: api.nvr_name().to_string(),
        port: api.port(),
        use_https: api.use_https(),
    })
}

#[async_trait]
impl ConfigFlow for ReolinkFlowHandler {
    fn version(&self) -> u32 {
        Self::VERSION
    }

    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        match step_id {
            STEP_USER => self.async_step_user(user_input, ctx).await,
            STEP_REAUTH => {
                let entry_data = user_input.unwrap_or_default();
                self.async_step_reauth(&entry_data, ctx).await
            }
            STEP_REAUTH_CONFIRM => self.async_step_reauth_confirm(user_input, ctx).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}

/// Options flow: choose the streaming protocol
pub struct ReolinkOptionsFlowHandler {
    protocol: String,
}

impl ReolinkOptionsFlowHandler {
    pub fn new(entry: &ConfigEntry) -> Self {
        let protocol = entry
            .options
            .get(CONF_PROTOCOL)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL)
            .to_string();
        Self { protocol }
    }

    pub async fn async_step_init(
        &mut self,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        if let Some(input) = user_input {
            return Ok(ctx.create_entry("", input, EntryData::new()));
        }

        let schema = DataSchema::new().required(
            CONF_PROTOCOL,
            FieldType::Select {
                options: PROTOCOLS.iter().map(|p| p.to_string()).collect(),
            },
            Some(json!(self.protocol)),
        );
        Ok(ctx.show_form(STEP_INIT, schema, HashMap::new(), HashMap::new()))
    }
}

#[async_trait]
impl OptionsFlow for ReolinkOptionsFlowHandler {
    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult {
        match step_id {
            STEP_INIT => self.async_step_init(user_input, ctx).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}

/// Builds Reolink flows around a shared device client factory
pub struct ReolinkConfigFlowFactory {
    api_factory: Arc<dyn ReolinkApiFactory>,
}

impl ReolinkConfigFlowFactory {
    pub fn new(api_factory: Arc<dyn ReolinkApiFactory>) -> Self {
        Self { api_factory }
    }
}

impl ConfigFlowFactory for ReolinkConfigFlowFactory {
    fn create_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(ReolinkFlowHandler::new(self.api_factory.clone()))
    }

    fn create_options_flow(&self, entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        Some(Box::new(ReolinkOptionsFlowHandler::new(entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let form = FormErrors::from_error(&ReolinkError::UserNotAdmin {
            username: "viewer".to_string(),
            user_level: "guest".to_string(),
        });
        assert_eq!(form.errors[CONF_USERNAME], "not_admin");
        assert_eq!(form.placeholders["username"], "viewer");
        assert_eq!(form.placeholders["userlevel"], "guest");
        assert_eq!(form.placeholders["error"], "");

        let form = FormErrors::from_error(&ReolinkError::CredentialsInvalid);
        assert_eq!(form.errors[CONF_HOST], "invalid_auth");

        let form = FormErrors::from_error(&ReolinkError::Api("rspCode -6".to_string()));
        assert_eq!(form.errors[CONF_HOST], "api_error");
        assert_eq!(form.placeholders["error"], "rspCode -6");

        let form = FormErrors::from_error(&ReolinkError::Setup("no mac".to_string()));
        assert_eq!(form.errors[CONF_HOST], "cannot_connect");

        let form = FormErrors::from_error(&ReolinkError::Unexpected("boom".to_string()));
        assert_eq!(form.errors[CONF_HOST], "unknown");
        assert_eq!(form.placeholders["error"], "boom");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("bad frame");
        assert_eq!(panic_message(payload.as_ref()), "bad frame");

        let payload: Box<dyn Any + Send> = Box::new(String::from("overflow"));
        assert_eq!(panic_message(payload.as_ref()), "overflow");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert!(panic_message(payload.as_ref()).contains("panic"));
    }
}

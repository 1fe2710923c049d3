//! Data entry flows
//!
//! A flow is a short-lived, multi-step wizard. Each step receives optional
//! user input and returns a [`FlowResult`]: either a form to show, or a
//! terminal `create_entry` / `abort`.
//!
//! Step handlers talk to the registry only through [`FlowContext`], which
//! mirrors the helpers an integration needs: claiming a unique id, aborting
//! on duplicates, and updating + reloading an existing entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate, EntryData};
use crate::manager::{ConfigEntries, ConfigEntriesError};
use crate::schema::DataSchema;

/// User input submitted to a step
pub type FlowInput = EntryData;

/// Abort reason when a unique id is already registered
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
/// Abort reason when another flow holds the same unique id
pub const ABORT_ALREADY_IN_PROGRESS: &str = "already_in_progress";

/// Outcome of a flow step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        flow_id: String,
        handler: String,
        step_id: String,
        data_schema: DataSchema,
        errors: HashMap<String, String>,
        description_placeholders: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_step: Option<bool>,
    },
    CreateEntry {
        flow_id: String,
        handler: String,
        title: String,
        data: EntryData,
        options: EntryData,
        version: u32,
        /// Entry id once the manager has committed the entry
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Abort {
        flow_id: String,
        handler: String,
        reason: String,
        description_placeholders: HashMap<String, String>,
    },
}

impl FlowResult {
    pub fn flow_id(&self) -> &str {
        match self {
            FlowResult::Form { flow_id, .. }
            | FlowResult::CreateEntry { flow_id, .. }
            | FlowResult::Abort { flow_id, .. } => flow_id,
        }
    }

    /// Whether the flow ends with this result
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowResult::Form { .. })
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            FlowResult::Form { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&str> {
        match self {
            FlowResult::Abort { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Errors a step can return; `Abort` ends the flow with an abort result
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow aborted: {0}")]
    Abort(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error(transparent)]
    Registry(#[from] ConfigEntriesError),
}

pub type FlowStepResult = Result<FlowResult, FlowError>;

/// A flow as listed by [`crate::FlowManager::progress`]
#[derive(Debug, Clone, Serialize)]
pub struct FlowProgress {
    pub flow_id: String,
    pub handler: String,
    pub source: ConfigEntrySource,
    pub step_id: Option<String>,
    pub unique_id: Option<String>,
}

/// Per-flow view of the registry and of other in-progress flows
pub struct FlowContext {
    flow_id: String,
    handler: String,
    source: ConfigEntrySource,
    version: u32,
    unique_id: Option<String>,
    entry_id: Option<String>,
    entries: Arc<ConfigEntries>,
    progress: Arc<DashMap<String, FlowProgress>>,
}

impl FlowContext {
    pub(crate) fn new(
        flow_id: String,
        handler: String,
        source: ConfigEntrySource,
        entries: Arc<ConfigEntries>,
        progress: Arc<DashMap<String, FlowProgress>>,
    ) -> Self {
        Self {
            flow_id,
            handler,
            source,
            version: 1,
            unique_id: None,
            entry_id: None,
            entries,
            progress,
        }
    }

    pub(crate) fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub(crate) fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn source(&self) -> ConfigEntrySource {
        self.source
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Entry this flow operates on (reauth target, or the options flow entry)
    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }

    pub fn entries(&self) -> &ConfigEntries {
        &self.entries
    }

    /// Claim `unique_id` for this flow and return the entry already
    /// registered under it, if any.
    ///
    /// With `raise_on_progress`, another in-progress flow of the same handler
    /// holding the same id aborts this one with `already_in_progress`.
    pub fn set_unique_id(
        &mut self,
        unique_id: impl Into<String>,
        raise_on_progress: bool,
    ) -> Result<Option<ConfigEntry>, FlowError> {
        let unique_id = unique_id.into();

        if raise_on_progress {
            let in_progress = self.progress.iter().any(|flow| {
                flow.flow_id != self.flow_id
                    && flow.handler == self.handler
                    && flow.unique_id.as_deref() == Some(unique_id.as_str())
            });
            if in_progress {
                return Err(FlowError::Abort(ABORT_ALREADY_IN_PROGRESS.to_string()));
            }
        }

        if let Some(mut progress) = self.progress.get_mut(&self.flow_id) {
            progress.unique_id = Some(unique_id.clone());
        }
        debug!(flow_id = %self.flow_id, %unique_id, "Flow claimed unique id");

        let existing = self.entries.get_by_unique_id(&self.handler, &unique_id);
        self.unique_id = Some(unique_id);
        Ok(existing)
    }

    /// Abort with `already_configured` if an entry holds this flow's unique id.
    ///
    /// With `updates`, the existing entry's data is merged with them first and
    /// the entry is reloaded if that changed it.
    pub async fn abort_if_unique_id_configured(
        &self,
        updates: Option<EntryData>,
    ) -> Result<(), FlowError> {
        let Some(unique_id) = self.unique_id.as_deref() else {
            return Ok(());
        };
        let Some(entry) = self.entries.get_by_unique_id(&self.handler, unique_id) else {
            return Ok(());
        };

        if let Some(updates) = updates {
            let mut data = entry.data.clone();
            data.extend(updates);
            if self.update_entry(&entry, data).await? {
                self.reload_entry(&entry.entry_id).await?;
            }
        }

        Err(FlowError::Abort(ABORT_ALREADY_CONFIGURED.to_string()))
    }

    /// Replace an entry's data, returning whether it changed
    pub async fn update_entry(
        &self,
        entry: &ConfigEntry,
        data: EntryData,
    ) -> Result<bool, FlowError> {
        let changed = self
            .entries
            .update_entry(&entry.entry_id, ConfigEntryUpdate::new().data(data))
            .await?;
        Ok(changed)
    }

    /// Reload an entry. A failing integration setup leaves the entry in
    /// `SetupError` and is not a flow error.
    pub async fn reload_entry(&self, entry_id: &str) -> Result<(), FlowError> {
        match self.entries.reload(entry_id).await {
            Ok(()) => Ok(()),
            Err(ConfigEntriesError::SetupFailed(reason)) => {
                warn!(entry_id, %reason, "Entry failed to set up after reload");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Update `entry` with `data`, reload it only if that changed anything,
    /// and end the flow with `reason`.
    pub async fn update_reload_and_abort(
        &self,
        entry: &ConfigEntry,
        data: EntryData,
        reason: &str,
    ) -> FlowStepResult {
        if self.update_entry(entry, data).await? {
            info!(entry_id = %entry.entry_id, "Entry data changed, reloading");
            self.reload_entry(&entry.entry_id).await?;
        }
        Ok(self.abort(reason))
    }

    pub fn show_form(
        &self,
        step_id: &str,
        data_schema: DataSchema,
        errors: HashMap<String, String>,
        description_placeholders: HashMap<String, String>,
    ) -> FlowResult {
        FlowResult::Form {
            flow_id: self.flow_id.clone(),
            handler: self.handler.clone(),
            step_id: step_id.to_string(),
            data_schema,
            errors,
            description_placeholders,
            last_step: None,
        }
    }

    pub fn create_entry(
        &self,
        title: impl Into<String>,
        data: EntryData,
        options: EntryData,
    ) -> FlowResult {
        FlowResult::CreateEntry {
            flow_id: self.flow_id.clone(),
            handler: self.handler.clone(),
            title: title.into(),
            data,
            options,
            version: self.version,
            result: None,
        }
    }

    pub fn abort(&self, reason: &str) -> FlowResult {
        FlowResult::Abort {
            flow_id: self.flow_id.clone(),
            handler: self.handler.clone(),
            reason: reason.to_string(),
            description_placeholders: HashMap::new(),
        }
    }
}

/// A config flow for one integration domain
#[async_trait]
pub trait ConfigFlow: Send {
    /// Schema version stamped on created entries
    fn version(&self) -> u32 {
        1
    }

    /// Run `step_id` with optional user input
    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult;
}

/// An options flow for an existing entry; its `create_entry` data becomes
/// the entry's options
#[async_trait]
pub trait OptionsFlow: Send {
    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowStepResult;
}

/// Constructs flows for one integration domain
pub trait ConfigFlowFactory: Send + Sync {
    fn create_flow(&self) -> Box<dyn ConfigFlow>;

    /// `None` when the integration has no options
    fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        None
    }
}

//! Flow Manager
//!
//! Hosts running config and options flows: assigns flow ids, validates
//! submitted input against the current form, routes it to the current step
//! and commits terminal results into [`ConfigEntries`].

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};
use crate::flow::{
    ConfigFlow, ConfigFlowFactory, FlowContext, FlowError, FlowInput, FlowProgress, FlowResult,
    OptionsFlow, ABORT_ALREADY_CONFIGURED,
};
use crate::manager::{ConfigEntries, ConfigEntriesError};
use crate::schema::{DataSchema, SchemaError};

/// Flow manager errors
#[derive(Debug, Error)]
pub enum FlowManagerError {
    #[error("No config flow registered for {0}")]
    UnknownHandler(String),

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Unknown config entry: {0}")]
    UnknownEntry(String),

    #[error("Integration {0} does not support options")]
    OptionsNotSupported(String),

    #[error("Flow has no step {0}")]
    UnknownStep(String),

    #[error("Invalid user input: {0}")]
    InvalidData(#[from] SchemaError),

    #[error(transparent)]
    Registry(#[from] ConfigEntriesError),
}

pub type FlowManagerResult<T> = Result<T, FlowManagerError>;

enum FlowKind {
    Config(Box<dyn ConfigFlow>),
    Options(Box<dyn OptionsFlow>),
}

struct ActiveFlow {
    kind: FlowKind,
    context: FlowContext,
    /// Step and schema of the form currently shown
    step_id: String,
    data_schema: DataSchema,
    finished: bool,
}

/// Manages in-progress config and options flows
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    factories: DashMap<String, Arc<dyn ConfigFlowFactory>>,
    flows: DashMap<String, Arc<Mutex<ActiveFlow>>>,
    progress: Arc<DashMap<String, FlowProgress>>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            factories: DashMap::new(),
            flows: DashMap::new(),
            progress: Arc::new(DashMap::new()),
        }
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    /// Register the flow factory for an integration domain
    pub fn register_handler(&self, domain: &str, factory: Arc<dyn ConfigFlowFactory>) {
        self.factories.insert(domain.to_string(), factory);
        debug!("Registered config flow for domain: {}", domain);
    }

    fn factory(&self, domain: &str) -> FlowManagerResult<Arc<dyn ConfigFlowFactory>> {
        self.factories
            .get(domain)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowManagerError::UnknownHandler(domain.to_string()))
    }

    fn new_context(&self, handler: &str, source: ConfigEntrySource) -> FlowContext {
        let flow_id = Ulid::new().to_string();
        self.progress.insert(
            flow_id.clone(),
            FlowProgress {
                flow_id: flow_id.clone(),
                handler: handler.to_string(),
                source,
                step_id: None,
                unique_id: None,
            },
        );
        FlowContext::new(
            flow_id,
            handler.to_string(),
            source,
            self.entries.clone(),
            self.progress.clone(),
        )
    }

    /// Start a config flow. `data` is handed to the first step.
    pub async fn init_flow(
        &self,
        handler: &str,
        source: ConfigEntrySource,
        data: Option<FlowInput>,
    ) -> FlowManagerResult<FlowResult> {
        let flow = self.factory(handler)?.create_flow();
        let context = self.new_context(handler, source).with_version(flow.version());
        info!(
            handler,
            source = source.as_str(),
            flow_id = %context.flow_id(),
            "Starting config flow"
        );

        self.start(FlowKind::Config(flow), context, source.as_str(), data)
            .await
    }

    /// Start a reauth flow seeded with the data of an existing entry
    pub async fn init_reauth_flow(&self, entry_id: &str) -> FlowManagerResult<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| FlowManagerError::UnknownEntry(entry_id.to_string()))?;
        let flow = self.factory(&entry.domain)?.create_flow();
        let context = self
            .new_context(&entry.domain, ConfigEntrySource::Reauth)
            .with_version(flow.version())
            .with_entry_id(entry_id);
        info!(entry_id, handler = %entry.domain, "Starting reauth flow");

        self.start(
            FlowKind::Config(flow),
            context,
            ConfigEntrySource::Reauth.as_str(),
            Some(entry.data),
        )
        .await
    }

    /// Start the options flow of an entry
    pub async fn init_options_flow(&self, entry_id: &str) -> FlowManagerResult<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| FlowManagerError::UnknownEntry(entry_id.to_string()))?;
        let flow = self
            .factory(&entry.domain)?
            .create_options_flow(&entry)
            .ok_or_else(|| FlowManagerError::OptionsNotSupported(entry.domain.clone()))?;
        let context = self
            .new_context(entry_id, ConfigEntrySource::User)
            .with_entry_id(entry_id);

        self.start(FlowKind::Options(flow), context, "init", None)
            .await
    }

    async fn start(
        &self,
        kind: FlowKind,
        context: FlowContext,
        step_id: &str,
        data: Option<FlowInput>,
    ) -> FlowManagerResult<FlowResult> {
        let flow_id = context.flow_id().to_string();
        let flow = Arc::new(Mutex::new(ActiveFlow {
            kind,
            context,
            step_id: step_id.to_string(),
            data_schema: DataSchema::new(),
            finished: false,
        }));
        self.flows.insert(flow_id.clone(), flow.clone());

        let mut flow = flow.lock().await;
        let result = self.run_step(&mut flow, step_id, data).await;
        if result.is_err() {
            self.forget(&flow_id);
        }
        result
    }

    /// Submit user input to the current step of a flow
    pub async fn configure(
        &self,
        flow_id: &str,
        user_input: FlowInput,
    ) -> FlowManagerResult<FlowResult> {
        let flow = self
            .flows
            .get(flow_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowManagerError::UnknownFlow(flow_id.to_string()))?;

        let mut flow = flow.lock().await;
        if flow.finished {
            return Err(FlowManagerError::UnknownFlow(flow_id.to_string()));
        }

        let input = flow.data_schema.validate(&user_input)?;
        let step_id = flow.step_id.clone();
        self.run_step(&mut flow, &step_id, Some(input)).await
    }

    /// Drop a flow without a result
    pub fn abort_flow(&self, flow_id: &str) -> FlowManagerResult<()> {
        if self.flows.contains_key(flow_id) {
            self.forget(flow_id);
            debug!(flow_id, "Flow aborted by caller");
            Ok(())
        } else {
            Err(FlowManagerError::UnknownFlow(flow_id.to_string()))
        }
    }

    /// All flows currently waiting for input
    pub fn progress(&self) -> Vec<FlowProgress> {
        self.progress.iter().map(|r| r.value().clone()).collect()
    }

    fn forget(&self, flow_id: &str) {
        self.flows.remove(flow_id);
        self.progress.remove(flow_id);
    }

    async fn run_step(
        &self,
        flow: &mut ActiveFlow,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> FlowManagerResult<FlowResult> {
        debug!(flow_id = %flow.context.flow_id(), step_id, "Running flow step");

        let outcome = match &mut flow.kind {
            FlowKind::Config(handler) => {
                handler.async_step(step_id, input, &mut flow.context).await
            }
            FlowKind::Options(handler) => {
                handler.async_step(step_id, input, &mut flow.context).await
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(FlowError::Abort(reason)) => flow.context.abort(&reason),
            Err(FlowError::UnknownStep(step)) => return Err(FlowManagerError::UnknownStep(step)),
            Err(FlowError::Registry(err)) => return Err(err.into()),
        };

        if let FlowResult::Form {
            step_id,
            data_schema,
            ..
        } = &result
        {
            flow.step_id = step_id.clone();
            flow.data_schema = data_schema.clone();
            if let Some(mut progress) = self.progress.get_mut(flow.context.flow_id()) {
                progress.step_id = Some(step_id.clone());
            }
            return Ok(result);
        }

        flow.finished = true;
        self.forget(flow.context.flow_id());

        match flow.kind {
            FlowKind::Config(_) => self.commit_entry(&flow.context, result).await,
            FlowKind::Options(_) => self.commit_options(&flow.context, result).await,
        }
    }

    /// Persist the entry a config flow asked to create
    async fn commit_entry(
        &self,
        context: &FlowContext,
        result: FlowResult,
    ) -> FlowManagerResult<FlowResult> {
        let (flow_id, handler, title, data, options, version) = match result {
            FlowResult::CreateEntry {
                flow_id,
                handler,
                title,
                data,
                options,
                version,
                ..
            } => (flow_id, handler, title, data, options, version),
            other => return Ok(other),
        };

        let mut entry = ConfigEntry::new(handler.clone(), title.clone())
            .with_data(data.clone())
            .with_options(options.clone())
            .with_source(context.source())
            .with_version(version, 1);
        if let Some(unique_id) = context.unique_id() {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = match self.entries.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { unique_id, .. }) => {
                warn!(%flow_id, %unique_id, "Entry was registered while the flow was running");
                return Ok(context.abort(ABORT_ALREADY_CONFIGURED));
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self.entries.setup(&entry.entry_id).await {
            warn!(entry_id = %entry.entry_id, error = %err, "Setup of new entry failed");
        }

        Ok(FlowResult::CreateEntry {
            flow_id,
            handler,
            title,
            data,
            options,
            version,
            result: Some(entry.entry_id),
        })
    }

    /// Store the data of a finished options flow as the entry's options
    async fn commit_options(
        &self,
        context: &FlowContext,
        result: FlowResult,
    ) -> FlowManagerResult<FlowResult> {
        if let (FlowResult::CreateEntry { data, .. }, Some(entry_id)) = (&result, context.entry_id())
        {
            let changed = self
                .entries
                .update_entry(entry_id, ConfigEntryUpdate::new().options(data.clone()))
                .await?;
            debug!(entry_id, changed, "Options flow finished");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryData;
    use crate::flow::FlowStepResult;
    use crate::schema::FieldType;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Asks for a `serial`, which doubles as the unique id
    struct SerialFlow {
        raise_on_progress: bool,
    }

    #[async_trait]
    impl ConfigFlow for SerialFlow {
        async fn async_step(
            &mut self,
            step_id: &str,
            user_input: Option<FlowInput>,
            ctx: &mut FlowContext,
        ) -> FlowStepResult {
            if step_id != "user" {
                return Err(FlowError::UnknownStep(step_id.to_string()));
            }
            let Some(input) = user_input else {
                return Ok(ctx.show_form(
                    "user",
                    DataSchema::new().required("serial", FieldType::String, None),
                    HashMap::new(),
                    HashMap::new(),
                ));
            };

            let serial = input["serial"].as_str().unwrap_or_default().to_string();
            ctx.set_unique_id(serial.clone(), self.raise_on_progress)?;
            ctx.abort_if_unique_id_configured(None).await?;
            Ok(ctx.create_entry(serial, input, EntryData::new()))
        }
    }

    struct ModeOptionsFlow;

    #[async_trait]
    impl OptionsFlow for ModeOptionsFlow {
        async fn async_step(
            &mut self,
            _step_id: &str,
            user_input: Option<FlowInput>,
            ctx: &mut FlowContext,
        ) -> FlowStepResult {
            match user_input {
                Some(input) => Ok(ctx.create_entry("", input, EntryData::new())),
                None => Ok(ctx.show_form(
                    "init",
                    DataSchema::new().required(
                        "mode",
                        FieldType::Select {
                            options: vec!["a".into(), "b".into()],
                        },
                        Some(json!("a")),
                    ),
                    HashMap::new(),
                    HashMap::new(),
                )),
            }
        }
    }

    struct SerialFactory {
        raise_on_progress: bool,
    }

    impl ConfigFlowFactory for SerialFactory {
        fn create_flow(&self) -> Box<dyn ConfigFlow> {
            Box::new(SerialFlow {
                raise_on_progress: self.raise_on_progress,
            })
        }

        fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
            Some(Box::new(ModeOptionsFlow))
        }
    }

    fn setup(raise_on_progress: bool) -> (TempDir, FlowManager) {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let manager = FlowManager::new(entries);
        manager.register_handler("serial", Arc::new(SerialFactory { raise_on_progress }));
        (dir, manager)
    }

    fn serial(value: &str) -> FlowInput {
        let mut input = FlowInput::new();
        input.insert("serial".to_string(), json!(value));
        input
    }

    #[tokio::test]
    async fn test_flow_creates_entry() {
        let (_dir, manager) = setup(false);

        let form = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();
        assert_eq!(form.step_id(), Some("user"));
        assert_eq!(manager.progress().len(), 1);

        let result = manager.configure(form.flow_id(), serial("abc")).await.unwrap();
        let (result, title) = match result {
            FlowResult::CreateEntry { result, title, .. } => (result, title),
            other => panic!("expected create_entry, got {other:?}"),
        };
        assert_eq!(title, "abc");

        let entry = manager.entries().get(&result.unwrap()).unwrap();
        assert_eq!(entry.unique_id.as_deref(), Some("abc"));
        assert!(entry.is_loaded());
        assert!(manager.progress().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handler_and_flow() {
        let (_dir, manager) = setup(false);

        let result = manager.init_flow("nope", ConfigEntrySource::User, None).await;
        assert!(matches!(result, Err(FlowManagerError::UnknownHandler(_))));

        let result = manager.configure("missing", FlowInput::new()).await;
        assert!(matches!(result, Err(FlowManagerError::UnknownFlow(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_keeps_flow() {
        let (_dir, manager) = setup(false);
        let form = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();

        let result = manager.configure(form.flow_id(), FlowInput::new()).await;
        assert!(matches!(result, Err(FlowManagerError::InvalidData(_))));

        let result = manager.configure(form.flow_id(), serial("abc")).await.unwrap();
        assert!(matches!(result, FlowResult::CreateEntry { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_aborts() {
        let (_dir, manager) = setup(false);
        manager
            .entries()
            .add(ConfigEntry::new("serial", "abc").with_unique_id("abc"))
            .await
            .unwrap();

        let form = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();
        let result = manager.configure(form.flow_id(), serial("abc")).await.unwrap();

        assert_eq!(result.abort_reason(), Some(ABORT_ALREADY_CONFIGURED));
        assert_eq!(manager.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registered_mid_flow_aborts() {
        let (_dir, manager) = setup(false);

        let first = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();
        let second = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();

        let created = manager.configure(first.flow_id(), serial("abc")).await.unwrap();
        assert!(matches!(created, FlowResult::CreateEntry { .. }));

        let result = manager.configure(second.flow_id(), serial("abc")).await.unwrap();
        assert_eq!(result.abort_reason(), Some(ABORT_ALREADY_CONFIGURED));
        assert_eq!(manager.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_raise_on_progress() {
        let (_dir, manager) = setup(true);
        let first = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();
        let second = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();

        // Claim the id in the first flow without finishing it
        {
            let flow = manager.flows.get(first.flow_id()).unwrap().value().clone();
            let mut flow = flow.lock().await;
            flow.context.set_unique_id("abc", true).unwrap();
        }

        let result = manager.configure(second.flow_id(), serial("abc")).await.unwrap();
        assert_eq!(result.abort_reason(), Some("already_in_progress"));
    }

    #[tokio::test]
    async fn test_options_flow_updates_options() {
        let (_dir, manager) = setup(false);
        let entry = manager
            .entries()
            .add(ConfigEntry::new("serial", "abc"))
            .await
            .unwrap();

        let form = manager.init_options_flow(&entry.entry_id).await.unwrap();
        assert_eq!(form.step_id(), Some("init"));

        let mut input = FlowInput::new();
        input.insert("mode".to_string(), json!("b"));
        let result = manager.configure(form.flow_id(), input).await.unwrap();
        assert!(matches!(result, FlowResult::CreateEntry { .. }));

        let stored = manager.entries().get(&entry.entry_id).unwrap();
        assert_eq!(stored.options["mode"], json!("b"));
    }

    #[tokio::test]
    async fn test_options_flow_rejects_value_outside_select() {
        let (_dir, manager) = setup(false);
        let entry = manager
            .entries()
            .add(ConfigEntry::new("serial", "abc"))
            .await
            .unwrap();

        let form = manager.init_options_flow(&entry.entry_id).await.unwrap();
        let mut input = FlowInput::new();
        input.insert("mode".to_string(), json!("c"));

        let result = manager.configure(form.flow_id(), input).await;
        assert!(matches!(
            result,
            Err(FlowManagerError::InvalidData(SchemaError::NotInOptions { .. }))
        ));
    }

    #[tokio::test]
    async fn test_abort_flow() {
        let (_dir, manager) = setup(false);
        let form = manager
            .init_flow("serial", ConfigEntrySource::User, None)
            .await
            .unwrap();

        manager.abort_flow(form.flow_id()).unwrap();
        assert!(manager.progress().is_empty());
        assert!(manager.abort_flow(form.flow_id()).is_err());
    }
}

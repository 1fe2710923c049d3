//! Config Entries
//!
//! This crate provides the configuration entry system: the persistent
//! registry of integration instances, their lifecycle (setup, unload,
//! reload), and the data entry flows that create and adjust them.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single persisted registration
//! - [`ConfigEntries`] - Registry of all entries, unique per `(domain, unique_id)`
//! - [`ConfigFlow`] / [`OptionsFlow`] - Integration-provided wizards
//! - [`FlowContext`] - Registry helpers available to a running flow
//! - [`FlowManager`] - Hosts running flows and commits their results
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking.

pub mod entry;
pub mod flow;
pub mod flow_manager;
pub mod manager;
pub mod schema;
pub mod state_machine;
pub mod storage;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
    EntryData,
};

pub use flow::{
    ConfigFlow, ConfigFlowFactory, FlowContext, FlowError, FlowInput, FlowProgress, FlowResult,
    FlowStepResult, OptionsFlow, ABORT_ALREADY_CONFIGURED, ABORT_ALREADY_IN_PROGRESS,
};

pub use flow_manager::{FlowManager, FlowManagerError, FlowManagerResult};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, SetupHandler,
    STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use schema::{DataSchema, FieldType, FormField, SchemaError};
pub use state_machine::InvalidTransition;
pub use storage::{Storable, Storage, StorageError, StorageResult};

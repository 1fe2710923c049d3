//! Entity helpers
//!
//! Capability set an integration implements to expose a device as a
//! platform entity, plus the update coordinator that entities subscribe to.
//!
//! - [`Entity`] - what the platform asks an entity for
//! - [`DeviceInfo`] - device metadata attached to entities
//! - [`UpdateCoordinator`] - shared refresh with scoped [`ListenerHandle`]s
//! - [`CoordinatorEntity`] - entity base backed by a coordinator

pub mod coordinator;
pub mod device_info;
pub mod entity;

pub use coordinator::{ListenerHandle, RefreshFn, UpdateCoordinator};
pub use device_info::{format_mac, DeviceIdentifier, DeviceInfo};
pub use entity::{CoordinatorDevice, CoordinatorEntity, Entity};

//! Entity capability set and a coordinator-backed base

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::coordinator::{ListenerHandle, UpdateCoordinator};
use crate::device_info::{DeviceIdentifier, DeviceInfo};

/// What the platform asks of an entity
#[async_trait]
pub trait Entity: Send + Sync {
    /// Stable id used by the entity registry
    fn unique_id(&self) -> Option<String>;

    fn name(&self) -> Option<String> {
        None
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    /// Whether the platform should poll `async_update` periodically
    fn should_poll(&self) -> bool {
        true
    }

    fn available(&self) -> bool {
        true
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    async fn async_update(&self) {}
}

/// A third-party device wrapped by a [`CoordinatorEntity`]
pub trait CoordinatorDevice: Send + Sync {
    fn unique_id(&self) -> &str;

    /// Device kind, reported as the model and in state attributes
    fn type_name(&self) -> &str;
}

/// Entity whose state comes from an [`UpdateCoordinator`].
///
/// The coordinator pushes updates, so the entity is never polled. Call
/// [`added_to_hass`](Self::added_to_hass) once the entity is registered and
/// [`will_remove_from_hass`](Self::will_remove_from_hass) on teardown.
pub struct CoordinatorEntity<D> {
    domain: String,
    manufacturer: Option<String>,
    sw_version: Option<String>,
    name: Option<String>,
    coordinator: Arc<UpdateCoordinator>,
    device: D,
    listener: Mutex<Option<ListenerHandle>>,
}

impl<D: CoordinatorDevice> CoordinatorEntity<D> {
    pub fn new(domain: impl Into<String>, coordinator: Arc<UpdateCoordinator>, device: D) -> Self {
        Self {
            domain: domain.into(),
            manufacturer: None,
            sw_version: None,
            name: None,
            coordinator,
            device,
            listener: Mutex::new(None),
        }
    }

    pub fn with_manufacturer(
        mut self,
        manufacturer: impl Into<String>,
        sw_version: impl Into<String>,
    ) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.sw_version = Some(sw_version.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn listener(&self) -> MutexGuard<'_, Option<ListenerHandle>> {
        // The slot holds only a handle; recover it from a poisoned lock
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `write_state` to coordinator updates
    pub fn added_to_hass(&self, write_state: impl Fn() + Send + Sync + 'static) {
        let handle = self.coordinator.add_listener(write_state);
        // Replacing an older handle drops its subscription
        *self.listener() = Some(handle);
        debug!(unique_id = self.device.unique_id(), "Entity subscribed to coordinator");
    }

    /// Release the coordinator subscription
    pub fn will_remove_from_hass(&self) {
        if let Some(handle) = self.listener().take() {
            handle.release();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener().is_some()
    }
}

#[async_trait]
impl<D: CoordinatorDevice> Entity for CoordinatorEntity<D> {
    fn unique_id(&self) -> Option<String> {
        Some(self.device.unique_id().to_string())
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            identifiers: vec![DeviceIdentifier::new(&self.domain, self.device.unique_id())],
            name: self.name.clone(),
            model: Some(self.device.type_name().to_string()),
            manufacturer: self.manufacturer.clone(),
            sw_version: self.sw_version.clone(),
        })
    }

    fn should_poll(&self) -> bool {
        false
    }

    fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::from([
            (
                format!("{}_type", self.domain),
                Value::from(self.device.type_name()),
            ),
            (
                format!("{}_id", self.domain),
                Value::from(self.device.unique_id()),
            ),
        ])
    }

    async fn async_update(&self) {
        self.coordinator.async_request_refresh().await;
    }
}

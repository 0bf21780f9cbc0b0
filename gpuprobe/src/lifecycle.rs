//! [`ContextLifecycle`]: owns the driver and every handle created through
//! it, and enforces the order in which they are created and destroyed.
//!
//! ```text
//! Uninitialized ─► ContextCreated ─► DevicesEnumerated ─► DeviceCreated
//!                        │                  │                   │
//!                        └──────────────────┴─► InitFailed      ▼
//!                                                   Draining ─► Destroyed
//! ```
//!
//! Teardown always runs idle-wait, then destroys the logical device, then
//! the context, skipping whatever was never created. It runs from any
//! state, and from `Drop` if the owner never called it.

use std::ffi::CString;

use ash::vk;
use thiserror::Error;

use crate::{
    catalog::{CapabilityCatalog, CatalogOptions},
    driver::{ContextCreateInfo, DeviceCreateRequest, Driver, EnumerationError},
    enumerate::{InstanceLayers, enumerate_instance_layers, enumerate_physical_devices},
    features::DeviceFeatures,
    select::{QueueSelection, SelectError, select},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    ContextCreated,
    DevicesEnumerated,
    DeviceCreated,
    Draining,
    Destroyed,
    /// A step failed. Handles that were created are still released by
    /// teardown, but the lifecycle never leaves this state.
    InitFailed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Could not create the driver context: {0}")]
    ContextCreationFailed(vk::Result),
    #[error("Enumeration failed: {0}")]
    EnumerationFailed(#[from] EnumerationError),
    #[error("No physical device available")]
    NoSuitableDevice,
    #[error("No queue family on the selected device supports {required:?}")]
    NoMatchingQueueFamily { required: vk::QueueFlags },
    #[error("Could not create the logical device: {0}")]
    LogicalDeviceCreationFailed(vk::Result),
    #[error("Waiting for the device to go idle failed: {0}")]
    DrainFailed(vk::Result),
    #[error("Cannot {operation} in state {actual:?}, expected {expected:?}")]
    InvalidState {
        operation: &'static str,
        expected: LifecycleState,
        actual: LifecycleState,
    },
}

impl From<SelectError> for InitError {
    fn from(value: SelectError) -> Self {
        match value {
            SelectError::NoSuitableDevice => InitError::NoSuitableDevice,
            SelectError::NoMatchingQueueFamily { required } => {
                InitError::NoMatchingQueueFamily { required }
            }
        }
    }
}

/// What to enable on the logical device, on top of the queue selection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    pub enabled_features: Option<DeviceFeatures>,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
    /// Priority of the single queue created on the selected family.
    pub queue_priority: f32,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            enabled_features: None,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
            queue_priority: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalDevice {
    pub handle: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    pub selection: QueueSelection,
}

pub struct ContextLifecycle<D: Driver> {
    driver: D,
    state: LifecycleState,
    context: Option<vk::Instance>,
    instance_layers: Option<InstanceLayers>,
    catalog: Option<CapabilityCatalog>,
    device: Option<LogicalDevice>,
}

impl<D: Driver> std::fmt::Debug for ContextLifecycle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLifecycle")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ContextLifecycle<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: LifecycleState::Uninitialized,
            context: None,
            instance_layers: None,
            catalog: None,
            device: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn context(&self) -> Option<vk::Instance> {
        self.context
    }

    pub fn instance_layers(&self) -> Option<&InstanceLayers> {
        self.instance_layers.as_ref()
    }

    pub fn catalog(&self) -> Option<&CapabilityCatalog> {
        self.catalog.as_ref()
    }

    pub fn device(&self) -> Option<&LogicalDevice> {
        self.device.as_ref()
    }

    pub fn create_context(&mut self, info: &ContextCreateInfo) -> Result<vk::Instance, InitError> {
        self.expect_state("create a context", LifecycleState::Uninitialized)?;
        tracing::debug!(
            "Creating context for {:?} (api {})",
            info.application_name,
            info.api_version
        );
        match self.driver.create_context(info) {
            Ok(context) => {
                self.context = Some(context);
                self.transition(LifecycleState::ContextCreated);
                Ok(context)
            }
            Err(result) => self.fail(InitError::ContextCreationFailed(result)),
        }
    }

    /// Lists instance layers and extensions. Does not change state.
    pub fn enumerate_instance_layers(&mut self) -> Result<&InstanceLayers, InitError> {
        self.expect_state("enumerate instance layers", LifecycleState::ContextCreated)?;
        match enumerate_instance_layers(&mut self.driver) {
            Ok(layers) => Ok(&*self.instance_layers.insert(layers)),
            Err(e) => self.fail(e.into()),
        }
    }

    /// Enumerates physical devices and builds the capability catalog.
    pub fn enumerate_devices(
        &mut self,
        options: &CatalogOptions,
    ) -> Result<&CapabilityCatalog, InitError> {
        self.expect_state("enumerate devices", LifecycleState::ContextCreated)?;
        let Some(context) = self.context else {
            return Err(self.invalid_state("enumerate devices", LifecycleState::ContextCreated));
        };
        let catalog = enumerate_physical_devices(&mut self.driver, context)
            .and_then(|handles| CapabilityCatalog::build(&mut self.driver, &handles, options));
        match catalog {
            Ok(catalog) => {
                self.transition(LifecycleState::DevicesEnumerated);
                Ok(&*self.catalog.insert(catalog))
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Picks the first device and its first queue family covering
    /// `required`.
    pub fn select_queue(&mut self, required: vk::QueueFlags) -> Result<QueueSelection, InitError> {
        self.expect_state("select a queue family", LifecycleState::DevicesEnumerated)?;
        let selection = match &self.catalog {
            Some(catalog) => select(catalog, required),
            None => Err(SelectError::NoSuitableDevice),
        };
        match selection {
            Ok(selection) => Ok(selection),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn create_device(
        &mut self,
        selection: QueueSelection,
        options: &DeviceOptions,
    ) -> Result<vk::Device, InitError> {
        self.expect_state("create a logical device", LifecycleState::DevicesEnumerated)?;
        let Some(record) = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.get(selection.physical_device_index()))
        else {
            return self.fail(InitError::NoSuitableDevice);
        };
        let physical_device = record.handle;
        let family_matches = record
            .capabilities
            .queue_families
            .get(selection.queue_family_index() as usize)
            .is_some_and(|family| family.flags.contains(selection.required()));
        if !family_matches {
            return self.fail(InitError::NoMatchingQueueFamily {
                required: selection.required(),
            });
        }

        let request = DeviceCreateRequest {
            queue_family_index: selection.queue_family_index(),
            queue_priorities: vec![options.queue_priority],
            enabled_features: options.enabled_features,
            enabled_layers: options.enabled_layers.clone(),
            enabled_extensions: options.enabled_extensions.clone(),
        };
        tracing::debug!("Creating logical device: {request:?}");
        match self.driver.create_device(physical_device, &request) {
            Ok(handle) => {
                self.device = Some(LogicalDevice {
                    handle,
                    physical_device,
                    selection,
                });
                self.transition(LifecycleState::DeviceCreated);
                Ok(handle)
            }
            Err(result) => self.fail(InitError::LogicalDeviceCreationFailed(result)),
        }
    }

    /// Releases everything that was created, in reverse order.
    ///
    /// A failed idle-wait does not stop destruction; the error is returned
    /// once both handles are gone. Calling this again is a no-op.
    pub fn teardown(&mut self) -> Result<(), InitError> {
        let mut drained = Ok(());

        if let Some(device) = self.device.take() {
            if self.state != LifecycleState::InitFailed {
                self.transition(LifecycleState::Draining);
            }
            let idle = {
                let _span = tracing::debug_span!("device_wait_idle").entered();
                self.driver.device_wait_idle(device.handle)
            };
            if let Err(result) = idle {
                tracing::error!(
                    "Device {:?} did not go idle ({result}), destroying it anyway",
                    device.handle
                );
                drained = Err(InitError::DrainFailed(result));
            }
            tracing::debug!("Dropping logical device {:?}", device.handle);
            self.driver.destroy_device(device.handle);
        }

        if let Some(context) = self.context.take() {
            tracing::debug!("Dropping context {context:?}");
            self.driver.destroy_context(context);
        }

        if !matches!(
            self.state,
            LifecycleState::InitFailed | LifecycleState::Destroyed
        ) {
            self.transition(LifecycleState::Destroyed);
        }
        drained
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: LifecycleState,
    ) -> Result<(), InitError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation, expected))
        }
    }

    fn invalid_state(&self, operation: &'static str, expected: LifecycleState) -> InitError {
        tracing::error!("Cannot {operation} in state {:?}", self.state);
        InitError::InvalidState {
            operation,
            expected,
            actual: self.state,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!("Lifecycle {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn fail<T>(&mut self, error: InitError) -> Result<T, InitError> {
        tracing::error!("Initialization failed in state {:?}: {error}", self.state);
        self.state = LifecycleState::InitFailed;
        Err(error)
    }
}

impl<D: Driver> Drop for ContextLifecycle<D> {
    fn drop(&mut self) {
        tracing::debug!("Dropping context lifecycle in state {:?}", self.state);
        if let Err(e) = self.teardown() {
            tracing::error!("Teardown during drop failed: {e}");
        }
    }
}

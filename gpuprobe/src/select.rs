//! Choosing a physical device and a queue family from a
//! [`CapabilityCatalog`].
//!
//! The policy is deliberately simple: the first enumerated device, and the
//! lowest-indexed queue family whose capabilities are a superset of what
//! was asked for. There is no scoring and no fallback.

use ash::vk;
use thiserror::Error;

use crate::catalog::{CapabilityCatalog, DeviceCapabilities};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    #[error("No physical device available")]
    NoSuitableDevice,
    #[error("No queue family supports {required:?}")]
    NoMatchingQueueFamily { required: vk::QueueFlags },
}

/// How the target device is picked out of the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePolicy {
    /// Index 0, whatever it is.
    #[default]
    FirstEnumerated,
}

impl DevicePolicy {
    pub fn pick(&self, catalog: &CapabilityCatalog) -> Option<usize> {
        match self {
            DevicePolicy::FirstEnumerated => (!catalog.is_empty()).then_some(0),
        }
    }
}

/// A device index into the catalog plus a queue family index on that
/// device, and the capabilities the family was chosen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    physical_device_index: usize,
    queue_family_index: u32,
    required: vk::QueueFlags,
}

impl QueueSelection {
    pub(crate) fn new(
        physical_device_index: usize,
        queue_family_index: u32,
        required: vk::QueueFlags,
    ) -> Self {
        Self {
            physical_device_index,
            queue_family_index,
            required,
        }
    }

    pub fn physical_device_index(&self) -> usize {
        self.physical_device_index
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn required(&self) -> vk::QueueFlags {
        self.required
    }
}

/// Returns the first queue family whose flags contain every bit of
/// `required`. An empty `required` matches family 0 if there is one.
pub fn select_queue_family(
    capabilities: &DeviceCapabilities,
    required: vk::QueueFlags,
) -> Result<u32, SelectError> {
    capabilities
        .queue_families
        .iter()
        .position(|family| family.flags.contains(required))
        .map(|index| index as u32)
        .ok_or(SelectError::NoMatchingQueueFamily { required })
}

/// Applies [`DevicePolicy::FirstEnumerated`] and then
/// [`select_queue_family`] on the chosen device.
pub fn select(
    catalog: &CapabilityCatalog,
    required: vk::QueueFlags,
) -> Result<QueueSelection, SelectError> {
    select_with(catalog, DevicePolicy::default(), required)
}

pub fn select_with(
    catalog: &CapabilityCatalog,
    policy: DevicePolicy,
    required: vk::QueueFlags,
) -> Result<QueueSelection, SelectError> {
    let Some(index) = policy.pick(catalog) else {
        tracing::error!("Catalog is empty, no device to select");
        return Err(SelectError::NoSuitableDevice);
    };
    let record = catalog.get(index).ok_or(SelectError::NoSuitableDevice)?;
    let family = select_queue_family(&record.capabilities, required).inspect_err(|_| {
        tracing::error!(
            "{:?} has no queue family supporting {required:?}",
            record.capabilities.identity.name
        );
    })?;
    tracing::info!(
        "Selected {:?} (device {index}), queue family {family} for {required:?}",
        record.capabilities.identity.name
    );
    Ok(QueueSelection::new(index, family, required))
}

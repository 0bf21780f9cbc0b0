//! The driver boundary.
//!
//! [`Driver`] is the fixed query protocol the rest of the crate talks to.
//! Handles are raw `ash::vk` handles and every variable-length list is
//! fetched with the count-then-fill convention: one call with no output
//! buffer to learn the length, a second call with a buffer of that length.
//! [`query_list`] is the only place that drives that convention.
//!
//! `gpuprobe-vk` provides the implementation backed by a real Vulkan
//! loader.

use std::ffi::{CStr, CString};

use ash::vk;
use thiserror::Error;

use crate::{features::DeviceFeatures, version::VkVersion};

/// The protocol every driver backend implements.
///
/// All calls block until the driver answers. Count-then-fill methods take
/// the in/out element count and an optional output slice, and return the raw
/// status: `SUCCESS`, `INCOMPLETE` when the slice was too small for what the
/// driver now has, or an error code.
pub trait Driver {
    fn create_context(&mut self, info: &ContextCreateInfo) -> Result<vk::Instance, vk::Result>;

    fn enumerate_instance_layers(
        &mut self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result;

    /// Lists instance extensions, either the implementation's own
    /// (`layer == None`) or the ones provided by `layer`.
    fn enumerate_instance_extensions(
        &mut self,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result;

    fn enumerate_physical_devices(
        &mut self,
        context: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result;

    fn enumerate_device_layers(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result;

    fn enumerate_device_extensions(
        &mut self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result;

    fn physical_device_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceProperties, vk::Result>;

    fn physical_device_features(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceFeatures, vk::Result>;

    fn physical_device_memory_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceMemoryProperties, vk::Result>;

    fn queue_family_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> vk::Result;

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<vk::Device, vk::Result>;

    /// Blocks until all work submitted to `device` has completed.
    fn device_wait_idle(&mut self, device: vk::Device) -> Result<(), vk::Result>;

    fn destroy_device(&mut self, device: vk::Device);

    fn destroy_context(&mut self, context: vk::Instance);
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Name {0:?} contains an interior NUL byte")]
pub struct InvalidNameError(pub String);

/// Converts UTF-8 names into the NUL-terminated form the driver expects.
pub fn c_names<I, S>(names: I) -> Result<Vec<CString>, InvalidNameError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| {
            CString::new(name.as_ref())
                .map_err(|_| InvalidNameError(name.as_ref().to_owned()))
        })
        .collect()
}

/// Identity and requirements handed to [`Driver::create_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCreateInfo {
    pub application_name: CString,
    pub application_version: VkVersion,
    pub engine_name: CString,
    pub engine_version: VkVersion,
    /// The minimum driver-interface version the application needs.
    pub api_version: VkVersion,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
}

impl ContextCreateInfo {
    pub fn new(app_name: impl AsRef<str>) -> Result<Self, InvalidNameError> {
        let app_name = app_name.as_ref();
        Ok(Self {
            application_name: CString::new(app_name)
                .map_err(|_| InvalidNameError(app_name.to_owned()))?,
            ..Self::default()
        })
    }
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            application_name: c"gpuprobe".to_owned(),
            application_version: VkVersion::from_raw(1),
            engine_name: c"Engine".to_owned(),
            engine_version: VkVersion::from_raw(1),
            api_version: VkVersion::V1_2,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
        }
    }
}

/// Everything [`Driver::create_device`] needs besides the physical device.
///
/// One queue family, one queue priority per requested queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCreateRequest {
    pub queue_family_index: u32,
    pub queue_priorities: Vec<f32>,
    pub enabled_features: Option<DeviceFeatures>,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnumerationError {
    #[error("Driver returned {result} while querying {what}")]
    Driver {
        what: &'static str,
        result: vk::Result,
    },
    #[error(
        "The number of {what} changed between the count and fill calls \
         twice in a row"
    )]
    Unstable { what: &'static str },
    #[error("Querying physical device {index} failed: {source}")]
    Device {
        index: usize,
        source: Box<EnumerationError>,
    },
}

/// Runs the count-then-fill protocol for one variable-length list.
///
/// `call` is invoked first with no buffer to learn the count, then with a
/// buffer of exactly that many default-initialised slots. If the fill call
/// reports `INCOMPLETE`, or writes a different number of items than the
/// count call announced, the list changed in between and the whole pair is
/// run once more. A second mismatch is [`EnumerationError::Unstable`].
///
/// On success the returned length equals the count reported by the count
/// call issued immediately before the fill.
pub fn query_list<T, F>(
    what: &'static str,
    mut call: F,
) -> Result<Vec<T>, EnumerationError>
where
    T: Clone + Default,
    F: FnMut(&mut u32, Option<&mut [T]>) -> vk::Result,
{
    let mut retried = false;
    loop {
        let mut count = 0u32;
        match call(&mut count, None) {
            vk::Result::SUCCESS => {}
            result => return Err(EnumerationError::Driver { what, result }),
        }

        let mut items = vec![T::default(); count as usize];
        let mut written = count;
        let changed = match call(&mut written, Some(items.as_mut_slice())) {
            vk::Result::SUCCESS => written != count,
            vk::Result::INCOMPLETE => true,
            result => return Err(EnumerationError::Driver { what, result }),
        };

        if !changed {
            tracing::trace!("Fetched {count} {what}");
            return Ok(items);
        }
        if retried {
            tracing::error!("{what} changed again during the retry, giving up");
            return Err(EnumerationError::Unstable { what });
        }
        tracing::warn!(
            "{what} changed between count and fill (announced {count}), \
             retrying once"
        );
        retried = true;
    }
}

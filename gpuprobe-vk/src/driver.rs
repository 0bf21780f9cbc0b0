//! [`AshDriver`]: the [`Driver`] protocol on a real Vulkan loader.
//!
//! Count-then-fill queries go through the raw `fp_v1_0` entry points rather
//! than ash's `Vec`-returning wrappers, so that `VK_INCOMPLETE` reaches
//! [`gpuprobe::driver::query_list`] instead of being retried inside ash.

use std::{
    ffi::{CStr, CString, c_char},
    fmt::Debug,
    ptr,
};

use ash::vk;
use gpuprobe::{
    VkVersion,
    driver::{ContextCreateInfo, DeviceCreateRequest, Driver},
};
use thiserror::Error;

use crate::log::{VulkanLogLevel, messenger_create_info};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
}

/// A loaded Vulkan entry point plus whatever instance and device were
/// created through it.
///
/// Holds at most one instance and one logical device at a time, matching
/// how [`gpuprobe::ContextLifecycle`] drives it.
pub struct AshDriver {
    entry: ash::Entry,
    debug_level: Option<VulkanLogLevel>,
    instance: Option<ash::Instance>,
    debug_messenger: Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    device: Option<ash::Device>,
}

impl Debug for AshDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshDriver")
            .field("instance", &self.instance.as_ref().map(|i| i.handle()))
            .field("device", &self.device.as_ref().map(|d| d.handle()))
            .field("debug_level", &self.debug_level)
            .finish_non_exhaustive()
    }
}

impl AshDriver {
    /// Loads the system Vulkan library.
    ///
    /// With `debug_level` set, context creation also enables the Khronos
    /// validation layer and a debug messenger, if both are installed.
    ///
    /// # Safety
    /// This loads vulkan using libloading, so arbitrary code from the
    /// loader library runs during this call.
    pub unsafe fn load(debug_level: Option<VulkanLogLevel>) -> Result<Self, LoadError> {
        //SAFETY: the burden of loading a shared library is passed to the
        //caller. Every object created from the entry is destroyed before
        //the entry itself (see Drop)
        let entry = unsafe { ash::Entry::load() }?;
        Ok(Self {
            entry,
            debug_level,
            instance: None,
            debug_messenger: None,
            device: None,
        })
    }

    /// The highest instance-level API version the loader supports.
    pub fn loader_version(&self) -> VkVersion {
        // SAFETY: entry is a live Vulkan entry; vkEnumerateInstanceVersion
        // has no other preconditions.
        let raw = unsafe { self.entry.try_enumerate_instance_version() }
            .ok()
            .flatten()
            .unwrap_or(vk::API_VERSION_1_0);
        VkVersion::from_raw(raw)
    }

    fn live_instance(&self, context: Option<vk::Instance>) -> Result<&ash::Instance, vk::Result> {
        match &self.instance {
            Some(instance) if context.is_none_or(|c| c == instance.handle()) => Ok(instance),
            _ => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
        }
    }

    /// Whether the validation layer and debug utils extension are both
    /// installed.
    fn debug_utils_available(&self) -> bool {
        // SAFETY: entry is live; passing None queries the implementation's
        // own extensions.
        let exts = unsafe { self.entry.enumerate_instance_extension_properties(None) };
        // SAFETY: entry is live; no further preconditions.
        let layers = unsafe { self.entry.enumerate_instance_layer_properties() };

        let ext_available = exts.is_ok_and(|exts| {
            exts.iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(ash::ext::debug_utils::NAME))
        });
        let layer_available = layers.is_ok_and(|layers| {
            layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
        });
        ext_available && layer_available
    }

    fn destroy_debug_messenger(&mut self) {
        if let Some((messenger, debug_utils)) = self.debug_messenger.take() {
            tracing::debug!("Dropping debug messenger {messenger:?}");
            //SAFETY: last use of this messenger, which was created from the
            //instance debug_utils was loaded from
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }
}

/// `requested` followed by `extra` unless it is already there.
fn enabled_names<'a>(requested: &'a [CString], extra: Option<&'a CStr>) -> Vec<&'a CStr> {
    let mut names: Vec<&CStr> = requested.iter().map(CString::as_c_str).collect();
    if let Some(extra) = extra
        && !names.contains(&extra)
    {
        names.push(extra);
    }
    names
}

fn name_ptrs(names: &[&CStr]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

/// Output pointer and in/out capacity for one half of a count-then-fill
/// call.
fn fill_target<T>(count: &mut u32, out: Option<&mut [T]>) -> *mut T {
    match out {
        Some(out) => {
            *count = (*count).min(out.len() as u32);
            out.as_mut_ptr()
        }
        None => ptr::null_mut(),
    }
}

impl Driver for AshDriver {
    fn create_context(&mut self, info: &ContextCreateInfo) -> Result<vk::Instance, vk::Result> {
        if self.instance.is_some() {
            tracing::error!("A context already exists on this driver");
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let debug_level = match self.debug_level {
            Some(level) if self.debug_utils_available() => Some(level),
            Some(_) => {
                tracing::warn!(
                    "Validation requested but {VALIDATION_LAYER:?} or debug utils is missing"
                );
                None
            }
            None => None,
        };
        let layers = enabled_names(
            &info.enabled_layers,
            debug_level.map(|_| VALIDATION_LAYER),
        );
        let extensions = enabled_names(
            &info.enabled_extensions,
            debug_level.map(|_| ash::ext::debug_utils::NAME),
        );
        let layer_ptrs = name_ptrs(&layers);
        let extension_ptrs = name_ptrs(&extensions);

        let app_info = vk::ApplicationInfo::default()
            .application_name(&info.application_name)
            .application_version(info.application_version.to_raw())
            .engine_name(&info.engine_name)
            .engine_version(info.engine_version.to_raw())
            .api_version(info.api_version.to_raw());

        let mut debug_create_info = debug_level.map(messenger_create_info);
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);
        if let Some(ref mut debug_info) = debug_create_info {
            create_info = create_info.push_next(debug_info);
        }

        //SAFETY: create_info and everything it points to outlive this call
        let instance = unsafe { self.entry.create_instance(&create_info, None) }?;
        let handle = instance.handle();

        if let Some(mut debug_create_info) = debug_create_info {
            debug_create_info.p_next = ptr::null();
            let debug_utils = ash::ext::debug_utils::Instance::new(&self.entry, &instance);
            //SAFETY: valid create info, instance is live
            match unsafe { debug_utils.create_debug_utils_messenger(&debug_create_info, None) } {
                Ok(messenger) => self.debug_messenger = Some((messenger, debug_utils)),
                Err(e) => {
                    tracing::error!("Could not create a debug messenger, continuing without: {e}")
                }
            }
        }

        self.instance = Some(instance);
        Ok(handle)
    }

    fn enumerate_instance_layers(
        &mut self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        let target = fill_target(count, out);
        //SAFETY: target is null or points to at least *count slots
        unsafe { (self.entry.fp_v1_0().enumerate_instance_layer_properties)(count, target) }
    }

    fn enumerate_instance_extensions(
        &mut self,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        let layer = layer.map_or(ptr::null(), CStr::as_ptr);
        let target = fill_target(count, out);
        //SAFETY: layer is null or NUL-terminated, target is null or points
        //to at least *count slots
        unsafe {
            (self.entry.fp_v1_0().enumerate_instance_extension_properties)(layer, count, target)
        }
    }

    fn enumerate_physical_devices(
        &mut self,
        context: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result {
        let instance = match self.live_instance(Some(context)) {
            Ok(instance) => instance,
            Err(e) => return e,
        };
        let target = fill_target(count, out);
        //SAFETY: context is the live instance, target is null or points to
        //at least *count slots
        unsafe { (instance.fp_v1_0().enumerate_physical_devices)(context, count, target) }
    }

    fn enumerate_device_layers(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        let instance = match self.live_instance(None) {
            Ok(instance) => instance,
            Err(e) => return e,
        };
        let target = fill_target(count, out);
        //SAFETY: physical_device came from this instance, target is null or
        //points to at least *count slots
        unsafe {
            (instance.fp_v1_0().enumerate_device_layer_properties)(physical_device, count, target)
        }
    }

    fn enumerate_device_extensions(
        &mut self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        let instance = match self.live_instance(None) {
            Ok(instance) => instance,
            Err(e) => return e,
        };
        let layer = layer.map_or(ptr::null(), CStr::as_ptr);
        let target = fill_target(count, out);
        //SAFETY: physical_device came from this instance, layer is null or
        //NUL-terminated, target is null or points to at least *count slots
        unsafe {
            (instance.fp_v1_0().enumerate_device_extension_properties)(
                physical_device,
                layer,
                count,
                target,
            )
        }
    }

    fn physical_device_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceProperties, vk::Result> {
        let instance = self.live_instance(None)?;
        //SAFETY: physical_device came from this instance
        Ok(unsafe { instance.get_physical_device_properties(physical_device) })
    }

    fn physical_device_features(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceFeatures, vk::Result> {
        let instance = self.live_instance(None)?;
        //SAFETY: physical_device came from this instance
        Ok(unsafe { instance.get_physical_device_features(physical_device) })
    }

    fn physical_device_memory_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceMemoryProperties, vk::Result> {
        let instance = self.live_instance(None)?;
        //SAFETY: physical_device came from this instance
        Ok(unsafe { instance.get_physical_device_memory_properties(physical_device) })
    }

    fn queue_family_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> vk::Result {
        let instance = match self.live_instance(None) {
            Ok(instance) => instance,
            Err(e) => return e,
        };
        let target = fill_target(count, out);
        // No status code here; a short write shows up as a count mismatch.
        //SAFETY: physical_device came from this instance, target is null or
        //points to at least *count slots
        unsafe {
            (instance.fp_v1_0().get_physical_device_queue_family_properties)(
                physical_device,
                count,
                target,
            )
        };
        vk::Result::SUCCESS
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<vk::Device, vk::Result> {
        if self.device.is_some() {
            tracing::error!("A logical device already exists on this driver");
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let instance = self.live_instance(None)?;

        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(request.queue_family_index)
            .queue_priorities(&request.queue_priorities)];
        let layers = enabled_names(&request.enabled_layers, None);
        let extensions = enabled_names(&request.enabled_extensions, None);
        let layer_ptrs = name_ptrs(&layers);
        let extension_ptrs = name_ptrs(&extensions);
        let features = request
            .enabled_features
            .map(|features| features.to_vk())
            .unwrap_or_default();

        // Device layers are ignored by current loaders but still passed
        // through for older ones.
        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        //SAFETY: physical_device came from this instance and create_info
        //outlives the call
        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        let handle = device.handle();
        self.device = Some(device);
        Ok(handle)
    }

    fn device_wait_idle(&mut self, device: vk::Device) -> Result<(), vk::Result> {
        match &self.device {
            Some(live) if live.handle() == device => {
                //SAFETY: the device is live for the lifetime of self.device
                unsafe { live.device_wait_idle() }
            }
            _ => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn destroy_device(&mut self, device: vk::Device) {
        match self.device.take() {
            Some(live) if live.handle() == device => {
                tracing::debug!("Dropping device {device:?}");
                //SAFETY: last use of the device; nothing else was created
                //from it
                unsafe { live.destroy_device(None) };
            }
            other => {
                tracing::error!("Asked to destroy unknown device {device:?}");
                self.device = other;
            }
        }
    }

    fn destroy_context(&mut self, context: vk::Instance) {
        if !self
            .instance
            .as_ref()
            .is_some_and(|instance| instance.handle() == context)
        {
            tracing::error!("Asked to destroy unknown context {context:?}");
            return;
        }
        self.destroy_debug_messenger();
        if let Some(instance) = self.instance.take() {
            tracing::debug!("Dropping instance {context:?}");
            //SAFETY: the messenger is gone and the caller destroyed the
            //device first
            unsafe { instance.destroy_instance(None) };
        }
    }
}

impl Drop for AshDriver {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::debug!("Dropping leftover device {:?}", device.handle());
            //SAFETY: drop is the last use of the device
            unsafe { device.destroy_device(None) };
        }
        if let Some(context) = self.instance.as_ref().map(|instance| instance.handle()) {
            self.destroy_context(context);
        }
    }
}

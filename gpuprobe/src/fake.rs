//! A scripted [`Driver`] for unit tests.
//!
//! Every call is appended to a shared log so tests can assert ordering even
//! after the driver has been moved into a lifecycle or dropped with it.

use std::{
    cell::RefCell,
    collections::VecDeque,
    ffi::{CStr, CString, c_char},
    rc::Rc,
};

use ash::vk::{self, Handle};

use crate::{
    driver::{ContextCreateInfo, DeviceCreateRequest, Driver},
    features::DeviceFeatures,
};

const FIRST_PHYSICAL_DEVICE: u64 = 0x1000;
pub(crate) const CONTEXT: u64 = 0xC0;
pub(crate) const DEVICE: u64 = 0xD0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateContext(CString),
    EnumerateInstanceLayers,
    EnumerateInstanceExtensions(Option<CString>),
    EnumeratePhysicalDevices,
    EnumerateDeviceLayers(vk::PhysicalDevice),
    EnumerateDeviceExtensions(vk::PhysicalDevice),
    Properties(vk::PhysicalDevice),
    Features(vk::PhysicalDevice),
    MemoryProperties(vk::PhysicalDevice),
    QueueFamilies(vk::PhysicalDevice),
    CreateDevice {
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    },
    WaitIdle(vk::Device),
    DestroyDevice(vk::Device),
    DestroyContext(vk::Instance),
}

#[derive(Debug, Clone)]
pub(crate) struct FakeDevice {
    name: &'static CStr,
    device_type: vk::PhysicalDeviceType,
    queue_families: Vec<vk::QueueFlags>,
    features: vk::PhysicalDeviceFeatures,
    layers: Vec<&'static CStr>,
    extensions: Vec<&'static CStr>,
    fail_properties: Option<vk::Result>,
    fail_features: Option<vk::Result>,
}

impl FakeDevice {
    pub(crate) fn new(name: &'static CStr, queue_families: &[vk::QueueFlags]) -> Self {
        Self {
            name,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: queue_families.to_vec(),
            features: vk::PhysicalDeviceFeatures::default(),
            layers: Vec::new(),
            extensions: Vec::new(),
            fail_properties: None,
            fail_features: None,
        }
    }

    pub(crate) fn with_extensions(mut self, extensions: &[&'static CStr]) -> Self {
        self.extensions = extensions.to_vec();
        self
    }

    pub(crate) fn with_layers(mut self, layers: &[&'static CStr]) -> Self {
        self.layers = layers.to_vec();
        self
    }

    pub(crate) fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    pub(crate) fn failing_properties(mut self, result: vk::Result) -> Self {
        self.fail_properties = Some(result);
        self
    }

    pub(crate) fn failing_features(mut self, result: vk::Result) -> Self {
        self.fail_features = Some(result);
        self
    }

    fn properties(&self, index: usize) -> vk::PhysicalDeviceProperties {
        let mut props = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_3,
            driver_version: vk::make_api_version(0, 535, 1, 0),
            vendor_id: 0x10de,
            device_id: 0x2000 + index as u32,
            device_type: self.device_type,
            ..Default::default()
        };
        write_name(&mut props.device_name, self.name);
        props.limits.max_image_dimension2_d = 16384;
        props.limits.max_bound_descriptor_sets = 32;
        props.limits.non_coherent_atom_size = 64;
        props
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        props
    }

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        self.queue_families
            .iter()
            .enumerate()
            .map(|(i, &queue_flags)| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: i as u32 + 1,
                timestamp_valid_bits: 64,
                min_image_transfer_granularity: vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                },
            })
            .collect()
    }
}

pub(crate) struct FakeDriver {
    devices: Vec<FakeDevice>,
    /// Number of devices visible to successive physical-device enumeration
    /// calls. Once exhausted every device is visible.
    topology: VecDeque<usize>,
    instance_layers: Vec<(&'static CStr, Vec<&'static CStr>)>,
    instance_extensions: Vec<&'static CStr>,
    fail_create_context: Option<vk::Result>,
    fail_enumerate: Option<vk::Result>,
    fail_create_device: Option<vk::Result>,
    fail_wait_idle: Option<vk::Result>,
    last_device_request: Option<DeviceCreateRequest>,
    calls: Rc<RefCell<Vec<Call>>>,
    context: Option<vk::Instance>,
    device: Option<vk::Device>,
}

impl FakeDriver {
    pub(crate) fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            topology: VecDeque::new(),
            instance_layers: Vec::new(),
            instance_extensions: Vec::new(),
            fail_create_context: None,
            fail_enumerate: None,
            fail_create_device: None,
            fail_wait_idle: None,
            last_device_request: None,
            calls: Rc::default(),
            context: None,
            device: None,
        }
    }

    pub(crate) fn with_topology(mut self, visible: &[usize]) -> Self {
        self.topology = visible.iter().copied().collect();
        self
    }

    pub(crate) fn with_instance_layer(
        mut self,
        name: &'static CStr,
        extensions: &[&'static CStr],
    ) -> Self {
        self.instance_layers.push((name, extensions.to_vec()));
        self
    }

    pub(crate) fn with_instance_extensions(mut self, exts: &[&'static CStr]) -> Self {
        self.instance_extensions = exts.to_vec();
        self
    }

    pub(crate) fn failing_create_context(mut self, result: vk::Result) -> Self {
        self.fail_create_context = Some(result);
        self
    }

    pub(crate) fn failing_enumerate(mut self, result: vk::Result) -> Self {
        self.fail_enumerate = Some(result);
        self
    }

    pub(crate) fn failing_create_device(mut self, result: vk::Result) -> Self {
        self.fail_create_device = Some(result);
        self
    }

    pub(crate) fn failing_wait_idle(mut self, result: vk::Result) -> Self {
        self.fail_wait_idle = Some(result);
        self
    }

    pub(crate) fn handles(&self) -> Vec<vk::PhysicalDevice> {
        (0..self.devices.len())
            .map(|i| vk::PhysicalDevice::from_raw(FIRST_PHYSICAL_DEVICE + i as u64))
            .collect()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Shared handle to the call log that outlives the driver.
    pub(crate) fn call_log(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.calls)
    }

    pub(crate) fn last_device_request(&self) -> Option<&DeviceCreateRequest> {
        self.last_device_request.as_ref()
    }

    fn log(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn device_index(&self, handle: vk::PhysicalDevice) -> Option<usize> {
        let index = handle.as_raw().checked_sub(FIRST_PHYSICAL_DEVICE)? as usize;
        (index < self.devices.len()).then_some(index)
    }
}

fn write_name<const N: usize>(dst: &mut [c_char; N], name: &CStr) {
    // Leaves the tail zeroed, which keeps the string NUL-terminated.
    for (dst, &byte) in dst.iter_mut().zip(name.to_bytes()).take(N - 1) {
        *dst = byte as c_char;
    }
}

fn layer(name: &CStr) -> vk::LayerProperties {
    let mut props = vk::LayerProperties {
        spec_version: vk::API_VERSION_1_3,
        implementation_version: 1,
        ..Default::default()
    };
    write_name(&mut props.layer_name, name);
    write_name(&mut props.description, c"fake layer");
    props
}

fn extension(name: &CStr) -> vk::ExtensionProperties {
    let mut props = vk::ExtensionProperties {
        spec_version: 1,
        ..Default::default()
    };
    write_name(&mut props.extension_name, name);
    props
}

/// Answers one half of a count-then-fill pair from `items`.
fn fill<T: Clone>(items: &[T], count: &mut u32, out: Option<&mut [T]>) -> vk::Result {
    match out {
        None => {
            *count = items.len() as u32;
            vk::Result::SUCCESS
        }
        Some(out) => {
            let n = out.len().min(*count as usize).min(items.len());
            out[..n].clone_from_slice(&items[..n]);
            *count = n as u32;
            if n < items.len() {
                vk::Result::INCOMPLETE
            } else {
                vk::Result::SUCCESS
            }
        }
    }
}

impl Driver for FakeDriver {
    fn create_context(&mut self, info: &ContextCreateInfo) -> Result<vk::Instance, vk::Result> {
        self.log(Call::CreateContext(info.application_name.clone()));
        if let Some(result) = self.fail_create_context {
            return Err(result);
        }
        let context = vk::Instance::from_raw(CONTEXT);
        self.context = Some(context);
        Ok(context)
    }

    fn enumerate_instance_layers(
        &mut self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        self.log(Call::EnumerateInstanceLayers);
        let layers: Vec<_> = self.instance_layers.iter().map(|(name, _)| layer(name)).collect();
        fill(&layers, count, out)
    }

    fn enumerate_instance_extensions(
        &mut self,
        layer_name: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        self.log(Call::EnumerateInstanceExtensions(layer_name.map(CStr::to_owned)));
        let names = match layer_name {
            None => self.instance_extensions.clone(),
            Some(layer_name) => match self
                .instance_layers
                .iter()
                .find(|(name, _)| *name == layer_name)
            {
                Some((_, exts)) => exts.clone(),
                None => return vk::Result::ERROR_LAYER_NOT_PRESENT,
            },
        };
        let exts: Vec<_> = names.iter().map(|name| extension(name)).collect();
        fill(&exts, count, out)
    }

    fn enumerate_physical_devices(
        &mut self,
        context: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result {
        self.log(Call::EnumeratePhysicalDevices);
        if let Some(result) = self.fail_enumerate {
            return result;
        }
        if self.context != Some(context) {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }
        let visible = self
            .topology
            .pop_front()
            .unwrap_or(self.devices.len())
            .min(self.devices.len());
        fill(&self.handles()[..visible], count, out)
    }

    fn enumerate_device_layers(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        self.log(Call::EnumerateDeviceLayers(physical_device));
        let Some(index) = self.device_index(physical_device) else {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let layers: Vec<_> = self.devices[index].layers.iter().map(|name| layer(name)).collect();
        fill(&layers, count, out)
    }

    fn enumerate_device_extensions(
        &mut self,
        physical_device: vk::PhysicalDevice,
        _layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        self.log(Call::EnumerateDeviceExtensions(physical_device));
        let Some(index) = self.device_index(physical_device) else {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let exts: Vec<_> = self.devices[index]
            .extensions
            .iter()
            .map(|name| extension(name))
            .collect();
        fill(&exts, count, out)
    }

    fn physical_device_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceProperties, vk::Result> {
        self.log(Call::Properties(physical_device));
        let index = self
            .device_index(physical_device)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let device = &self.devices[index];
        match device.fail_properties {
            Some(result) => Err(result),
            None => Ok(device.properties(index)),
        }
    }

    fn physical_device_features(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceFeatures, vk::Result> {
        self.log(Call::Features(physical_device));
        let index = self
            .device_index(physical_device)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let device = &self.devices[index];
        match device.fail_features {
            Some(result) => Err(result),
            None => Ok(device.features),
        }
    }

    fn physical_device_memory_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::PhysicalDeviceMemoryProperties, vk::Result> {
        self.log(Call::MemoryProperties(physical_device));
        let index = self
            .device_index(physical_device)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        Ok(self.devices[index].memory_properties())
    }

    fn queue_family_properties(
        &mut self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> vk::Result {
        self.log(Call::QueueFamilies(physical_device));
        let Some(index) = self.device_index(physical_device) else {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        fill(&self.devices[index].queue_family_properties(), count, out)
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<vk::Device, vk::Result> {
        self.log(Call::CreateDevice {
            physical_device,
            queue_family_index: request.queue_family_index,
        });
        self.last_device_request = Some(request.clone());
        if let Some(result) = self.fail_create_device {
            return Err(result);
        }
        let index = self
            .device_index(physical_device)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let device = &self.devices[index];
        if request.queue_family_index as usize >= device.queue_families.len() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        if let Some(wanted) = request.enabled_features
            && !DeviceFeatures::from_vk(&device.features).contains(wanted)
        {
            return Err(vk::Result::ERROR_FEATURE_NOT_PRESENT);
        }
        if !request
            .enabled_extensions
            .iter()
            .all(|wanted| device.extensions.iter().any(|ext| *ext == wanted.as_c_str()))
        {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        let handle = vk::Device::from_raw(DEVICE);
        self.device = Some(handle);
        Ok(handle)
    }

    fn device_wait_idle(&mut self, device: vk::Device) -> Result<(), vk::Result> {
        self.log(Call::WaitIdle(device));
        match self.fail_wait_idle {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn destroy_device(&mut self, device: vk::Device) {
        self.log(Call::DestroyDevice(device));
        self.device = None;
    }

    fn destroy_context(&mut self, context: vk::Instance) {
        self.log(Call::DestroyContext(context));
        assert!(
            self.device.is_none(),
            "context destroyed while a logical device is still alive"
        );
        self.context = None;
    }
}

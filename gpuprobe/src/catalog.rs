//! Per-device capability records ([`CapabilityCatalog`]).
//!
//! The catalog is one ordered collection with one [`PhysicalDeviceRecord`]
//! per enumerated device, in the driver's order. Records are only assembled
//! once every query for every device has succeeded, so index `i` always
//! holds a complete description of the `i`th device. Any failing query
//! aborts the whole build; no partial catalog is ever returned.
//!
//! Records are immutable snapshots. A changed device topology means
//! building a new catalog.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::{
    driver::{Driver, EnumerationError, query_list},
    features::DeviceFeatures,
    version::VkVersion,
};

/// Who the device is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub device_type: vk::PhysicalDeviceType,
    /// Vendor-specific encoding; only `VkVersion` by convention.
    pub driver_version: VkVersion,
    pub api_version: VkVersion,
    pub pipeline_cache_uuid: [u8; vk::UUID_SIZE],
}

/// The handful of numeric limits callers commonly look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_image_dimension_2d: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_memory_allocation_count: u32,
    pub max_compute_work_group_invocations: u32,
    pub non_coherent_atom_size: vk::DeviceSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub property_flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: vk::DeviceSize,
    pub flags: vk::MemoryHeapFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLayout {
    pub types: Vec<MemoryType>,
    pub heaps: Vec<MemoryHeap>,
}

impl MemoryLayout {
    /// Total size of the heaps flagged `DEVICE_LOCAL`.
    pub fn device_local_bytes(&self) -> vk::DeviceSize {
        self.heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub timestamp_valid_bits: u32,
    /// Width, height, depth.
    pub min_image_transfer_granularity: (u32, u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
    pub name: CString,
    pub spec_version: VkVersion,
    pub implementation_version: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionProperties {
    pub name: CString,
    pub spec_version: u32,
}

/// Everything known about one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub identity: DeviceIdentity,
    pub limits: DeviceLimits,
    pub features: DeviceFeatures,
    pub memory: MemoryLayout,
    pub queue_families: Vec<QueueFamily>,
    /// `None` when device layers were not enumerated.
    pub layers: Option<Vec<LayerProperties>>,
    /// `None` when device extensions were not enumerated.
    pub extensions: Option<Vec<ExtensionProperties>>,
}

impl DeviceCapabilities {
    /// `None` if extensions were not enumerated for this device.
    pub fn supports_extension(&self, name: &CStr) -> Option<bool> {
        self.extensions
            .as_ref()
            .map(|exts| exts.iter().any(|ext| ext.name.as_c_str() == name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDeviceRecord {
    pub handle: vk::PhysicalDevice,
    pub capabilities: DeviceCapabilities,
}

/// Which optional queries to run while building the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Enumerate per-device layers and extensions.
    pub device_layers_and_extensions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityCatalog {
    devices: Vec<PhysicalDeviceRecord>,
}

impl CapabilityCatalog {
    /// Queries every device in `handles`, one step at a time.
    ///
    /// Each step runs across all devices, in order, before the next begins:
    /// layers and extensions (when enabled), properties, features, memory
    /// properties, queue families. The first failure is returned wrapped in
    /// [`EnumerationError::Device`] with the index of the device that
    /// failed, and nothing is published.
    pub fn build<D: Driver + ?Sized>(
        driver: &mut D,
        handles: &[vk::PhysicalDevice],
        options: &CatalogOptions,
    ) -> Result<Self, EnumerationError> {
        let _span = tracing::debug_span!("build_catalog", devices = handles.len()).entered();

        let layers_and_extensions = if options.device_layers_and_extensions {
            per_device(driver, handles, |driver, handle| {
                let layers = query_list("device layers", |count, out| {
                    driver.enumerate_device_layers(handle, count, out)
                })?;
                let extensions = query_list("device extensions", |count, out| {
                    driver.enumerate_device_extensions(handle, None, count, out)
                })?;
                Ok((
                    layers.iter().map(LayerProperties::from).collect::<Vec<_>>(),
                    extensions.iter().map(ExtensionProperties::from).collect::<Vec<_>>(),
                ))
            })?
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>()
        } else {
            vec![None; handles.len()]
        };
        let properties = per_device(driver, handles, |driver, handle| {
            driver
                .physical_device_properties(handle)
                .map_err(|result| EnumerationError::Driver {
                    what: "physical device properties",
                    result,
                })
        })?;
        let features = per_device(driver, handles, |driver, handle| {
            driver
                .physical_device_features(handle)
                .map_err(|result| EnumerationError::Driver {
                    what: "physical device features",
                    result,
                })
        })?;
        let memory = per_device(driver, handles, |driver, handle| {
            driver
                .physical_device_memory_properties(handle)
                .map_err(|result| EnumerationError::Driver {
                    what: "physical device memory properties",
                    result,
                })
        })?;
        let queue_families = per_device(driver, handles, |driver, handle| {
            query_list("queue families", |count, out| {
                driver.queue_family_properties(handle, count, out)
            })
        })?;

        let devices = handles
            .iter()
            .zip(layers_and_extensions)
            .zip(properties)
            .zip(features)
            .zip(memory)
            .zip(queue_families)
            .map(
                |(((((&handle, layers_and_extensions), properties), features), memory), families)| {
                    let identity = DeviceIdentity::from(&properties);
                    tracing::debug!(
                        "Queried {:?} ({:?}, {} queue families)",
                        identity.name,
                        identity.device_type,
                        families.len()
                    );
                    let (layers, extensions) = layers_and_extensions.unzip();
                    PhysicalDeviceRecord {
                        handle,
                        capabilities: DeviceCapabilities {
                            identity,
                            limits: DeviceLimits::from(&properties.limits),
                            features: DeviceFeatures::from_vk(&features),
                            memory: MemoryLayout::from(&memory),
                            queue_families: families.iter().map(QueueFamily::from).collect(),
                            layers,
                            extensions,
                        },
                    }
                },
            )
            .collect();
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PhysicalDeviceRecord> {
        self.devices.get(index)
    }

    pub fn devices(&self) -> &[PhysicalDeviceRecord] {
        &self.devices
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &PhysicalDeviceRecord> {
        self.devices.iter()
    }
}

/// Runs one query step over every device, stopping at the first failure.
fn per_device<D: Driver + ?Sized, T>(
    driver: &mut D,
    handles: &[vk::PhysicalDevice],
    mut query: impl FnMut(&mut D, vk::PhysicalDevice) -> Result<T, EnumerationError>,
) -> Result<Vec<T>, EnumerationError> {
    let mut results = Vec::with_capacity(handles.len());
    for (index, &handle) in handles.iter().enumerate() {
        let result = query(&mut *driver, handle).map_err(|source| {
            tracing::error!("Capability query for physical device {index} failed: {source}");
            EnumerationError::Device {
                index,
                source: Box::new(source),
            }
        })?;
        results.push(result);
    }
    Ok(results)
}

impl From<&vk::PhysicalDeviceProperties> for DeviceIdentity {
    fn from(props: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            name: props
                .device_name_as_c_str()
                .unwrap_or(c"unknown")
                .to_string_lossy()
                .into_owned(),
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            device_type: props.device_type,
            driver_version: VkVersion::from_raw(props.driver_version),
            api_version: VkVersion::from_raw(props.api_version),
            pipeline_cache_uuid: props.pipeline_cache_uuid,
        }
    }
}

impl From<&vk::PhysicalDeviceLimits> for DeviceLimits {
    fn from(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            max_image_dimension_2d: limits.max_image_dimension2_d,
            max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
            max_memory_allocation_count: limits.max_memory_allocation_count,
            max_compute_work_group_invocations: limits
                .max_compute_work_group_invocations,
            non_coherent_atom_size: limits.non_coherent_atom_size,
        }
    }
}

impl From<&vk::PhysicalDeviceMemoryProperties> for MemoryLayout {
    fn from(props: &vk::PhysicalDeviceMemoryProperties) -> Self {
        // Clamp the counts so a misbehaving driver cannot make us index past
        // the fixed-size arrays.
        let type_count = (props.memory_type_count as usize).min(props.memory_types.len());
        let heap_count = (props.memory_heap_count as usize).min(props.memory_heaps.len());
        Self {
            types: props.memory_types[..type_count]
                .iter()
                .map(|ty| MemoryType {
                    property_flags: ty.property_flags,
                    heap_index: ty.heap_index,
                })
                .collect(),
            heaps: props.memory_heaps[..heap_count]
                .iter()
                .map(|heap| MemoryHeap {
                    size: heap.size,
                    flags: heap.flags,
                })
                .collect(),
        }
    }
}

impl From<&vk::QueueFamilyProperties> for QueueFamily {
    fn from(props: &vk::QueueFamilyProperties) -> Self {
        let granularity = props.min_image_transfer_granularity;
        Self {
            flags: props.queue_flags,
            queue_count: props.queue_count,
            timestamp_valid_bits: props.timestamp_valid_bits,
            min_image_transfer_granularity: (
                granularity.width,
                granularity.height,
                granularity.depth,
            ),
        }
    }
}

impl From<&vk::LayerProperties> for LayerProperties {
    fn from(props: &vk::LayerProperties) -> Self {
        Self {
            name: props
                .layer_name_as_c_str()
                .map(CStr::to_owned)
                .unwrap_or_default(),
            spec_version: VkVersion::from_raw(props.spec_version),
            implementation_version: props.implementation_version,
            description: props
                .description_as_c_str()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl From<&vk::ExtensionProperties> for ExtensionProperties {
    fn from(props: &vk::ExtensionProperties) -> Self {
        Self {
            name: props
                .extension_name_as_c_str()
                .map(CStr::to_owned)
                .unwrap_or_default(),
            spec_version: props.spec_version,
        }
    }
}

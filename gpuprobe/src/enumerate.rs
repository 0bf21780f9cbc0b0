//! Instance-level discovery: physical devices, and optionally the layers
//! and extensions the implementation exposes.

use ash::vk;

use crate::{
    catalog::{ExtensionProperties, LayerProperties},
    driver::{Driver, EnumerationError, query_list},
};

/// Lists the physical devices visible through `context`, in driver order.
///
/// Zero devices is a valid answer and yields an empty vector; deciding that
/// "nothing was found" is a failure is left to device selection.
pub fn enumerate_physical_devices<D: Driver + ?Sized>(
    driver: &mut D,
    context: vk::Instance,
) -> Result<Vec<vk::PhysicalDevice>, EnumerationError> {
    let _span = tracing::debug_span!("enumerate_physical_devices").entered();
    let devices = query_list("physical devices", |count, out| {
        driver.enumerate_physical_devices(context, count, out)
    })?;
    if devices.is_empty() {
        tracing::warn!("Driver reports no physical devices");
    } else {
        tracing::debug!("Found {} physical device(s)", devices.len());
    }
    Ok(devices)
}

/// One instance layer together with the extensions it provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayer {
    pub properties: LayerProperties,
    pub extensions: Vec<ExtensionProperties>,
}

/// What the implementation offers at instance level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceLayers {
    /// Extensions provided by the implementation itself.
    pub extensions: Vec<ExtensionProperties>,
    pub layers: Vec<InstanceLayer>,
}

impl InstanceLayers {
    pub fn has_layer(&self, name: &std::ffi::CStr) -> bool {
        self.layers
            .iter()
            .any(|layer| layer.properties.name.as_c_str() == name)
    }
}

/// Enumerates instance extensions, instance layers, and each layer's own
/// extensions. An implementation with none of them yields empty lists.
pub fn enumerate_instance_layers<D: Driver + ?Sized>(
    driver: &mut D,
) -> Result<InstanceLayers, EnumerationError> {
    let _span = tracing::debug_span!("enumerate_instance_layers").entered();
    let extensions = query_list("instance extensions", |count, out| {
        driver.enumerate_instance_extensions(None, count, out)
    })?;
    let layers = query_list("instance layers", |count, out| {
        driver.enumerate_instance_layers(count, out)
    })?;

    let layers = layers
        .iter()
        .map(LayerProperties::from)
        .map(|properties| {
            let extensions = query_list("instance layer extensions", |count, out| {
                driver.enumerate_instance_extensions(Some(properties.name.as_c_str()), count, out)
            })?;
            Ok(InstanceLayer {
                properties,
                extensions: extensions.iter().map(ExtensionProperties::from).collect(),
            })
        })
        .collect::<Result<Vec<_>, EnumerationError>>()?;

    tracing::debug!(
        "Instance offers {} extension(s) and {} layer(s)",
        extensions.len(),
        layers.len()
    );
    Ok(InstanceLayers {
        extensions: extensions.iter().map(ExtensionProperties::from).collect(),
        layers,
    })
}

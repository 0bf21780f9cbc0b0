//! Human-readable summary of what was discovered.

use std::fmt::{self, Write};

use gpuprobe::{
    ContextLifecycle, InitError,
    catalog::DeviceCapabilities,
    driver::Driver,
    enumerate::InstanceLayers,
    select::QueueSelection,
};

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn write_instance_layers(out: &mut impl Write, layers: &InstanceLayers) -> fmt::Result {
    writeln!(out, "Instance extensions:")?;
    for ext in &layers.extensions {
        writeln!(out, "  {} (rev {})", ext.name.to_string_lossy(), ext.spec_version)?;
    }
    writeln!(out, "Instance layers:")?;
    for layer in &layers.layers {
        writeln!(
            out,
            "  {} ({}): {}",
            layer.properties.name.to_string_lossy(),
            layer.properties.spec_version,
            layer.properties.description
        )?;
        for ext in &layer.extensions {
            writeln!(out, "    {}", ext.name.to_string_lossy())?;
        }
    }
    Ok(())
}

pub fn write_device(out: &mut impl Write, index: usize, caps: &DeviceCapabilities) -> fmt::Result {
    let identity = &caps.identity;
    writeln!(out, "Device {index}: {}", identity.name)?;
    writeln!(out, "  type:           {:?}", identity.device_type)?;
    writeln!(
        out,
        "  vendor/device:  {:#06x}/{:#06x}",
        identity.vendor_id, identity.device_id
    )?;
    writeln!(out, "  api version:    {}", identity.api_version)?;
    writeln!(out, "  driver version: {}", identity.driver_version)?;
    writeln!(out, "  features:       {} supported", caps.features.len())?;
    writeln!(
        out,
        "  device-local:   {}",
        human_bytes(caps.memory.device_local_bytes())
    )?;
    for (i, heap) in caps.memory.heaps.iter().enumerate() {
        writeln!(out, "  heap {i}: {} {:?}", human_bytes(heap.size), heap.flags)?;
    }
    for (i, family) in caps.queue_families.iter().enumerate() {
        writeln!(
            out,
            "  queue family {i}: {} x {:?}",
            family.queue_count, family.flags
        )?;
    }
    if let Some(extensions) = &caps.extensions {
        writeln!(out, "  extensions:     {}", extensions.len())?;
    }
    if let Some(layers) = &caps.layers {
        for layer in layers {
            writeln!(out, "  layer: {}", layer.name.to_string_lossy())?;
        }
    }
    Ok(())
}

pub fn write_result(out: &mut impl Write, init: &Result<QueueSelection, InitError>) -> fmt::Result {
    match init {
        Ok(selection) => writeln!(
            out,
            "Selected device {} queue family {}",
            selection.physical_device_index(),
            selection.queue_family_index()
        ),
        Err(e) => writeln!(out, "Initialization failed: {e}"),
    }
}

/// Everything the lifecycle knows, as text.
pub fn render<D: Driver>(
    lifecycle: &ContextLifecycle<D>,
    init: &Result<QueueSelection, InitError>,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    if let Some(layers) = lifecycle.instance_layers() {
        write_instance_layers(&mut out, layers)?;
    }
    if let Some(catalog) = lifecycle.catalog() {
        for (index, record) in catalog.iter().enumerate() {
            write_device(&mut out, index, &record.capabilities)?;
        }
    }
    write_result(&mut out, init)?;
    Ok(out)
}

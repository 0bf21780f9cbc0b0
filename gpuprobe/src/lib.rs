//! GPU capability discovery and context/device lifecycle on top of a
//! Vulkan-style driver.
//!
//! The crate never talks to a loader directly. Everything goes through the
//! [`driver::Driver`] trait; `gpuprobe-vk` implements it with [`ash`].
//!
//! # Flow
//!
//! ```text
//! ContextLifecycle::create_context
//! ├── enumerate_instance_layers      (optional)
//! ├── enumerate_devices
//! │   ├── enumerate_physical_devices
//! │   └── CapabilityCatalog::build   (per device, in order)
//! ├── select_queue                   (device 0, first superset family)
//! ├── create_device
//! └── teardown                       (wait idle → device → context)
//! ```
//!
//! [`InitializationPipeline`] runs that sequence with fail-fast semantics
//! and reports a single [`pipeline::Outcome`].

#![deny(unsafe_op_in_unsafe_fn)]

pub mod catalog;
pub mod driver;
pub mod enumerate;
pub mod features;
pub mod lifecycle;
pub mod pipeline;
pub mod select;
pub mod version;

#[cfg(test)]
mod fake;

pub use ash;
pub use lifecycle::{ContextLifecycle, InitError};
pub use pipeline::InitializationPipeline;
pub use version::VkVersion;

//! [`ash`]-backed implementation of [`gpuprobe::driver::Driver`].
//!
//! # Object ownership
//!
//! ```text
//! AshDriver
//! ├── ash::Entry
//! └── ash::Instance
//!     ├── debug messenger   (optional, destroyed before the instance)
//!     └── ash::Device
//! ```
//!
//! Handles cross the [`gpuprobe`] boundary as raw `ash::vk` handles; the
//! driver keeps the `ash` wrapper objects they came from.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod driver;
pub mod log;

pub use driver::{AshDriver, LoadError};
pub use log::VulkanLogLevel;

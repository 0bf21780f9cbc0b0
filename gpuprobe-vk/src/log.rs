//! Routing of `VK_EXT_debug_utils` messages into [`tracing`].

use std::ffi::CStr;

use ash::vk;

/// Minimum severity of validation messages to forward.
///
/// Variants are ordered least-to-most severe, so `Verbose < Error`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    /// Every severity at or above `self`.
    pub fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        match self {
            VulkanLogLevel::Verbose => {
                Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR
            }
            VulkanLogLevel::Info => Severity::INFO | Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Warning => Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Error => Severity::ERROR,
        }
    }
}

pub(crate) fn messenger_create_info(
    level: VulkanLogLevel,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(level.severity_flags())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

fn type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback data pointer for the
    // duration of this call, and we checked it is not null.
    let p_message = unsafe { (*p_callback_data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader for
    // the duration of this call.
    let message = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    let kind = type_label(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: "gpuprobe-debug-messenger", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "gpuprobe-debug-messenger", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "gpuprobe-debug-messenger", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "gpuprobe-debug-messenger", "[{kind}] {message}");
        }
        _ => {
            tracing::debug!(target: "gpuprobe-debug-messenger", "[{kind}] {message}");
        }
    }

    vk::FALSE
}

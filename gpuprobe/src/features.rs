//! [`DeviceFeatures`]: the Vulkan 1.0 feature bits as a compact set.
//!
//! Each feature is named after its `VkPhysicalDeviceFeatures` field in
//! snake case (`sampler_anisotropy`, `geometry_shader`, ...). The same type
//! describes what a device supports and what a logical device should enable.

use std::fmt;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown device feature {0:?}")]
pub struct UnknownFeatureError(pub String);

/// A set of Vulkan 1.0 device features, one bit per feature.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceFeatures(u64);

macro_rules! device_features {
    ($($field:ident),+ $(,)?) => {
        /// Feature names in bit order.
        const FEATURE_NAMES: &[&str] = &[$(stringify!($field)),+];

        impl DeviceFeatures {
            pub fn from_vk(features: &vk::PhysicalDeviceFeatures) -> Self {
                let mut bits = 0u64;
                let mut bit = 0u32;
                $(
                    if features.$field != vk::FALSE {
                        bits |= 1 << bit;
                    }
                    bit += 1;
                )+
                debug_assert_eq!(bit as usize, FEATURE_NAMES.len());
                Self(bits)
            }

            pub fn to_vk(&self) -> vk::PhysicalDeviceFeatures {
                let mut out = vk::PhysicalDeviceFeatures::default();
                let mut bit = 0u32;
                $(
                    out.$field = vk::Bool32::from(self.0 & (1 << bit) != 0);
                    bit += 1;
                )+
                debug_assert_eq!(bit as usize, FEATURE_NAMES.len());
                out
            }
        }
    };
}

device_features! {
    robust_buffer_access,
    full_draw_index_uint32,
    image_cube_array,
    independent_blend,
    geometry_shader,
    tessellation_shader,
    sample_rate_shading,
    dual_src_blend,
    logic_op,
    multi_draw_indirect,
    draw_indirect_first_instance,
    depth_clamp,
    depth_bias_clamp,
    fill_mode_non_solid,
    depth_bounds,
    wide_lines,
    large_points,
    alpha_to_one,
    multi_viewport,
    sampler_anisotropy,
    texture_compression_etc2,
    texture_compression_astc_ldr,
    texture_compression_bc,
    occlusion_query_precise,
    pipeline_statistics_query,
    vertex_pipeline_stores_and_atomics,
    fragment_stores_and_atomics,
    shader_tessellation_and_geometry_point_size,
    shader_image_gather_extended,
    shader_storage_image_extended_formats,
    shader_storage_image_multisample,
    shader_storage_image_read_without_format,
    shader_storage_image_write_without_format,
    shader_uniform_buffer_array_dynamic_indexing,
    shader_sampled_image_array_dynamic_indexing,
    shader_storage_buffer_array_dynamic_indexing,
    shader_storage_image_array_dynamic_indexing,
    shader_clip_distance,
    shader_cull_distance,
    shader_float64,
    shader_int64,
    shader_int16,
    shader_resource_residency,
    shader_resource_min_lod,
    sparse_binding,
    sparse_residency_buffer,
    sparse_residency_image2_d,
    sparse_residency_image3_d,
    sparse_residency2_samples,
    sparse_residency4_samples,
    sparse_residency8_samples,
    sparse_residency16_samples,
    sparse_residency_aliased,
    variable_multisample_rate,
    inherited_queries,
}

impl DeviceFeatures {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a set from feature names, rejecting names that are not
    /// Vulkan 1.0 features.
    pub fn from_names<I, S>(names: I) -> Result<Self, UnknownFeatureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut features = Self::empty();
        for name in names {
            features.insert(name.as_ref())?;
        }
        Ok(features)
    }

    pub fn insert(&mut self, name: &str) -> Result<(), UnknownFeatureError> {
        let bit = Self::bit(name)?;
        self.0 |= 1 << bit;
        Ok(())
    }

    pub fn has(&self, name: &str) -> Result<bool, UnknownFeatureError> {
        Ok(self.0 & (1 << Self::bit(name)?) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Features in `wanted` that this set lacks.
    pub fn missing(&self, wanted: Self) -> Self {
        Self(wanted.0 & !self.0)
    }

    /// Names of the features in this set, in `VkPhysicalDeviceFeatures`
    /// field order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        FEATURE_NAMES
            .iter()
            .enumerate()
            .filter(|&(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
    }

    pub fn all_names() -> &'static [&'static str] {
        FEATURE_NAMES
    }

    fn bit(name: &str) -> Result<usize, UnknownFeatureError> {
        FEATURE_NAMES
            .iter()
            .position(|known| *known == name)
            .ok_or_else(|| UnknownFeatureError(name.to_owned()))
    }
}

impl From<&vk::PhysicalDeviceFeatures> for DeviceFeatures {
    fn from(value: &vk::PhysicalDeviceFeatures) -> Self {
        Self::from_vk(value)
    }
}

impl fmt::Debug for DeviceFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

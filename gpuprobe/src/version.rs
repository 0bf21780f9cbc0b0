//! [`VkVersion`], a thin newtype over the packed Vulkan version word.

use std::{fmt, str::FromStr};

use ash::vk;
use thiserror::Error;

/// A packed Vulkan API version number.
///
/// Wraps the 32-bit encoding used by `VkApplicationInfo`,
/// `VkPhysicalDeviceProperties::apiVersion` and friends. Construct from
/// components with [`new`](Self::new), or wrap an already-encoded word with
/// [`from_raw`](Self::from_raw).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VkVersion(u32);

impl VkVersion {
    pub const V1_0: Self = Self(vk::API_VERSION_1_0);
    pub const V1_2: Self = Self(vk::API_VERSION_1_2);
    pub const V1_3: Self = Self(vk::API_VERSION_1_3);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub const fn variant(&self) -> u32 {
        vk::api_version_variant(self.0)
    }

    pub const fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub fn to_tuple(&self) -> (u32, u32, u32, u32) {
        (self.variant(), self.major(), self.minor(), self.patch())
    }

    pub fn from_tuple(tuple: (u32, u32, u32, u32)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2, tuple.3)
    }

    pub const fn to_raw(&self) -> u32 {
        self.0
    }
}

impl Default for VkVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for VkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())?;
        if self.variant() != 0 {
            write!(f, " (variant {})", self.variant())?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid version {0:?}, expected `major.minor` or `major.minor.patch`")]
pub struct ParseVersionError(pub String);

impl FromStr for VkVersion {
    type Err = ParseVersionError;

    /// Parses `major.minor` or `major.minor.patch`. The variant is always 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_owned());
        let parts = s
            .trim()
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;
        // make_api_version packs major into 7 bits, minor into 10 and
        // patch into 12.
        let fits = |major: u32, minor: u32, patch: u32| {
            major < (1 << 7) && minor < (1 << 10) && patch < (1 << 12)
        };
        match parts.as_slice() {
            &[major, minor] if fits(major, minor, 0) => {
                Ok(Self::new(0, major, minor, 0))
            }
            &[major, minor, patch] if fits(major, minor, patch) => {
                Ok(Self::new(0, major, minor, patch))
            }
            _ => Err(err()),
        }
    }
}

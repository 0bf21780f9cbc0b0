use std::{
    ffi::CString,
    fs,
    path::{Path, PathBuf},
};

use gpuprobe::{
    VkVersion,
    ash::vk,
    catalog::CatalogOptions,
    driver::{ContextCreateInfo, InvalidNameError, c_names},
    features::{DeviceFeatures, UnknownFeatureError},
    lifecycle::DeviceOptions,
    pipeline::PipelineConfig,
    version::ParseVersionError,
};
use serde::Deserialize;
use thiserror::Error;

/// A queue capability the selected family must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum QueueCapability {
    Graphics,
    Compute,
    Transfer,
    SparseBinding,
    Protected,
}

impl From<QueueCapability> for vk::QueueFlags {
    fn from(value: QueueCapability) -> Self {
        match value {
            QueueCapability::Graphics => vk::QueueFlags::GRAPHICS,
            QueueCapability::Compute => vk::QueueFlags::COMPUTE,
            QueueCapability::Transfer => vk::QueueFlags::TRANSFER,
            QueueCapability::SparseBinding => vk::QueueFlags::SPARSE_BINDING,
            QueueCapability::Protected => vk::QueueFlags::PROTECTED,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Identity {
    pub name: Option<String>,
    /// `major.minor[.patch]`
    pub version: Option<String>,
}

/// The on-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub application: Identity,
    pub engine: Identity,
    pub api_version: Option<String>,
    pub required_queue_flags: Option<Vec<QueueCapability>>,
    pub enumerate_instance_layers: bool,
    pub enumerate_device_layers: bool,
    pub instance_layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub enabled_features: Vec<String>,
    pub device_extensions: Vec<String>,
    pub device_layers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {field}: {source}")]
    Version {
        field: &'static str,
        source: ParseVersionError,
    },
    #[error(transparent)]
    UnknownFeature(#[from] UnknownFeatureError),
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
}

fn c_name(name: &str) -> Result<CString, InvalidNameError> {
    CString::new(name).map_err(|_| InvalidNameError(name.to_owned()))
}

fn parse_version(
    field: &'static str,
    value: Option<&str>,
    default: VkVersion,
) -> Result<VkVersion, ConfigError> {
    value.map_or(Ok(default), |value| {
        value
            .parse()
            .map_err(|source| ConfigError::Version { field, source })
    })
}

impl ProbeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn required_queue_flags(&self) -> vk::QueueFlags {
        match &self.required_queue_flags {
            Some(caps) => caps
                .iter()
                .fold(vk::QueueFlags::empty(), |flags, &cap| flags | vk::QueueFlags::from(cap)),
            None => vk::QueueFlags::GRAPHICS,
        }
    }

    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let defaults = ContextCreateInfo::default();
        let context = ContextCreateInfo {
            application_name: match &self.application.name {
                Some(name) => c_name(name)?,
                None => defaults.application_name,
            },
            application_version: parse_version(
                "application version",
                self.application.version.as_deref(),
                defaults.application_version,
            )?,
            engine_name: match &self.engine.name {
                Some(name) => c_name(name)?,
                None => defaults.engine_name,
            },
            engine_version: parse_version(
                "engine version",
                self.engine.version.as_deref(),
                defaults.engine_version,
            )?,
            api_version: parse_version(
                "api_version",
                self.api_version.as_deref(),
                defaults.api_version,
            )?,
            enabled_layers: c_names(&self.instance_layers)?,
            enabled_extensions: c_names(&self.instance_extensions)?,
        };

        let enabled_features = if self.enabled_features.is_empty() {
            None
        } else {
            Some(DeviceFeatures::from_names(&self.enabled_features)?)
        };

        Ok(PipelineConfig {
            context,
            enumerate_instance_layers: self.enumerate_instance_layers,
            catalog: CatalogOptions {
                device_layers_and_extensions: self.enumerate_device_layers,
            },
            required_queue_flags: self.required_queue_flags(),
            device: DeviceOptions {
                enabled_features,
                enabled_layers: c_names(&self.device_layers)?,
                enabled_extensions: c_names(&self.device_extensions)?,
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_the_defaults() {
        let config = ProbeConfig::from_toml("").unwrap().to_pipeline_config().unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.context.application_name.as_c_str(), c"gpuprobe");
        assert_eq!(config.context.engine_name.as_c_str(), c"Engine");
        assert_eq!(config.context.api_version, VkVersion::V1_2);
        assert_eq!(config.required_queue_flags, vk::QueueFlags::GRAPHICS);
    }

    #[test]
    fn full_file_is_applied() {
        let config = ProbeConfig::from_toml(
            r#"
            api_version = "1.3"
            required_queue_flags = ["graphics", "compute"]
            enumerate_instance_layers = true
            enumerate_device_layers = true
            enabled_features = ["sampler_anisotropy"]
            device_extensions = ["VK_KHR_swapchain"]

            [application]
            name = "probe"
            version = "2.1.0"

            [engine]
            name = "none"
            "#,
        )
        .unwrap()
        .to_pipeline_config()
        .unwrap();

        assert_eq!(config.context.application_name.as_c_str(), c"probe");
        assert_eq!(config.context.application_version, VkVersion::new(0, 2, 1, 0));
        assert_eq!(config.context.engine_name.as_c_str(), c"none");
        assert_eq!(config.context.api_version, VkVersion::V1_3);
        assert_eq!(
            config.required_queue_flags,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE
        );
        assert!(config.enumerate_instance_layers);
        assert!(config.catalog.device_layers_and_extensions);
        assert_eq!(
            config.device.enabled_features,
            Some(DeviceFeatures::from_names(["sampler_anisotropy"]).unwrap())
        );
        assert_eq!(config.device.enabled_extensions[0].as_c_str(), c"VK_KHR_swapchain");
    }

    #[test]
    fn documented_example_parses() {
        let config = ProbeConfig::from_toml(
            r#"
api_version = "1.2.0"
required_queue_flags = ["graphics"]
enumerate_instance_layers = false
enumerate_device_layers = false
enabled_features = ["sampler_anisotropy"]
device_extensions = []
device_layers = []

[application]
name = "gpuprobe"
version = "0.1.0"

[engine]
name = "Engine"
version = "0.1.0"
"#,
        )
        .unwrap()
        .to_pipeline_config()
        .unwrap();

        assert_eq!(config.context.application_name.as_c_str(), c"gpuprobe");
        assert_eq!(config.context.engine_version, VkVersion::new(0, 0, 1, 0));
        assert_eq!(config.context.api_version, VkVersion::V1_2);
        assert_eq!(config.required_queue_flags, vk::QueueFlags::GRAPHICS);
        assert!(config.device.enabled_extensions.is_empty());
    }

    #[test]
    fn top_level_key_under_a_table_is_rejected() {
        let err = ProbeConfig::from_toml(
            r#"
[engine]
name = "Engine"
api_version = "1.2.0"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn multi_word_capability_has_one_spelling() {
        use clap::ValueEnum;

        let config =
            ProbeConfig::from_toml(r#"required_queue_flags = ["sparse_binding"]"#).unwrap();
        assert_eq!(config.required_queue_flags(), vk::QueueFlags::SPARSE_BINDING);
        assert_eq!(
            QueueCapability::from_str("sparse_binding", false),
            Ok(QueueCapability::SparseBinding)
        );
    }

    #[test]
    fn empty_flag_list_requires_nothing() {
        let config = ProbeConfig::from_toml("required_queue_flags = []").unwrap();
        assert_eq!(config.required_queue_flags(), vk::QueueFlags::empty());
    }

    #[test]
    fn unknown_queue_flag_is_rejected() {
        assert!(matches!(
            ProbeConfig::from_toml(r#"required_queue_flags = ["video"]"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(ProbeConfig::from_toml("enumerate_everything = true").is_err());
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let config = ProbeConfig::from_toml(r#"enabled_features = ["ray_tracing"]"#).unwrap();
        assert!(matches!(
            config.to_pipeline_config(),
            Err(ConfigError::UnknownFeature(_))
        ));
    }

    #[test]
    fn bad_version_names_the_field() {
        let config = ProbeConfig::from_toml(r#"api_version = "one""#).unwrap();
        let err = config.to_pipeline_config().unwrap_err();

        assert!(matches!(err, ConfigError::Version { field: "api_version", .. }));
    }

    #[test]
    fn interior_nul_in_a_name_is_rejected() {
        let config = ProbeConfig::from_toml("device_extensions = [\"bad\\u0000ext\"]").unwrap();
        assert!(matches!(
            config.to_pipeline_config(),
            Err(ConfigError::InvalidName(_))
        ));
    }
}

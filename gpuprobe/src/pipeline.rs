//! The fixed initialization sequence.
//!
//! [`InitializationPipeline::run`] drives a [`ContextLifecycle`] through
//! context creation, discovery, selection and logical-device creation,
//! stopping at the first error. [`InitializationPipeline::execute`] adds
//! teardown and folds both results into one [`Outcome`].

use std::process::ExitCode;

use ash::vk;

use crate::{
    catalog::CatalogOptions,
    driver::{ContextCreateInfo, Driver},
    lifecycle::{ContextLifecycle, DeviceOptions, InitError},
    select::QueueSelection,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub context: ContextCreateInfo,
    /// List instance layers and extensions after creating the context.
    pub enumerate_instance_layers: bool,
    pub catalog: CatalogOptions,
    pub required_queue_flags: vk::QueueFlags,
    pub device: DeviceOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context: ContextCreateInfo::default(),
            enumerate_instance_layers: false,
            catalog: CatalogOptions::default(),
            required_queue_flags: vk::QueueFlags::GRAPHICS,
            device: DeviceOptions::default(),
        }
    }
}

/// Result of a full run plus teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub init: Result<QueueSelection, InitError>,
    pub teardown: Result<(), InitError>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.init.is_ok() && self.teardown.is_ok()
    }

    /// The init error if there was one, otherwise the teardown error.
    pub fn first_error(&self) -> Option<&InitError> {
        self.init
            .as_ref()
            .err()
            .or_else(|| self.teardown.as_ref().err())
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitializationPipeline {
    config: PipelineConfig,
}

impl InitializationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every step in order on `lifecycle`, which must be
    /// uninitialized. Teardown is left to the caller.
    pub fn run<D: Driver>(
        &self,
        lifecycle: &mut ContextLifecycle<D>,
    ) -> Result<QueueSelection, InitError> {
        let _span = tracing::info_span!("initialization_pipeline").entered();
        let config = &self.config;

        lifecycle.create_context(&config.context)?;
        if config.enumerate_instance_layers {
            let layers = lifecycle.enumerate_instance_layers()?;
            tracing::info!(
                "{} instance layer(s), {} instance extension(s)",
                layers.layers.len(),
                layers.extensions.len()
            );
        }
        let catalog = lifecycle.enumerate_devices(&config.catalog)?;
        tracing::info!("{} physical device(s) catalogued", catalog.len());
        let selection = lifecycle.select_queue(config.required_queue_flags)?;
        lifecycle.create_device(selection, &config.device)?;
        Ok(selection)
    }

    /// Runs the pipeline on a fresh lifecycle, then tears it down.
    pub fn execute<D: Driver>(&self, driver: D) -> Outcome {
        self.execute_with(driver, |_, _| {})
    }

    /// Like [`execute`](Self::execute), but hands the initialized (or
    /// failed) lifecycle to `inspect` before teardown.
    pub fn execute_with<D, F>(&self, driver: D, inspect: F) -> Outcome
    where
        D: Driver,
        F: FnOnce(&ContextLifecycle<D>, &Result<QueueSelection, InitError>),
    {
        let mut lifecycle = ContextLifecycle::new(driver);
        let init = self.run(&mut lifecycle);
        inspect(&lifecycle, &init);
        let teardown = lifecycle.teardown();

        match &init {
            Ok(selection) => tracing::info!(
                "Initialized on device {} queue family {}",
                selection.physical_device_index(),
                selection.queue_family_index()
            ),
            Err(e) => tracing::error!("Initialization failed: {e}"),
        }
        Outcome { init, teardown }
    }
}

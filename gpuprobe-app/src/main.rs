#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod config;
mod report;

use std::{
    fs::{self, File},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use gpuprobe::InitializationPipeline;
use gpuprobe_vk::{AshDriver, VulkanLogLevel};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ProbeConfig, QueueCapability};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //We clamp this to the lowest possible level but this shouldn't happen
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

/// Discover GPUs, claim a logical device on the first one, then release it.
#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct CliArgs {
    /// TOML file with application identity and device requirements
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Enable the validation layer and forward its messages at this level
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    /// Queue capability the selected family must have. Repeatable;
    /// replaces the configured list
    #[arg(short, long = "require")]
    require: Vec<QueueCapability>,
    /// Also list instance and device layers and extensions
    #[arg(long)]
    list_layers: bool,
}

impl CliArgs {
    fn apply_to(&self, config: &mut ProbeConfig) {
        if !self.require.is_empty() {
            config.required_queue_flags = Some(self.require.clone());
        }
        if self.list_layers {
            config.enumerate_instance_layers = true;
            config.enumerate_device_layers = true;
        }
    }
}

fn main() -> eyre::Result<ExitCode> {
    let app_dirs = directories::ProjectDirs::from("", "gpuprobe", "gpuprobe");

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
        tracing::debug!("Logging to {}", log_file_path.display());
        tracing::debug!("cli_args: {cli_args:#?}");
    }

    let mut config = match &cli_args.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };
    cli_args.apply_to(&mut config);
    let pipeline = InitializationPipeline::new(config.to_pipeline_config()?);

    //SAFETY: Loads vulkan via libloading which is kinda unsafe but we're fine
    let driver = unsafe { AshDriver::load(cli_args.graphics_debug_level.map(Into::into)) }?;
    tracing::info!("Vulkan loader supports {}", driver.loader_version());

    let outcome = pipeline.execute_with(driver, |lifecycle, init| {
        match report::render(lifecycle, init) {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::error!("Could not format the report: {e}"),
        }
    });

    if let Err(e) = &outcome.teardown {
        eprintln!("Teardown failed: {e}");
    }
    Ok(outcome.exit_code())
}

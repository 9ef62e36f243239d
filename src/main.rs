//! CLI Entry Point for rust-ljm
//!
//! Provides command-line access to:
//! - The LJM startup-configuration manifest (check, list, overrides, set, reset)
//! - A simulated stream acquisition against the mock LJM backend
//!
//! # Usage
//!
//! Check a manifest:
//! ```bash
//! rust-ljm check config/ljm_startup_configs.json
//! ```
//!
//! Override one parameter and write the result:
//! ```bash
//! rust-ljm set LJM_DEBUG_LOG_MODE LJM_DEBUG_LOG_MODE_ON_ERROR --output ljm_startup_configs.json
//! ```
//!
//! Simulate a triggered stream:
//! ```bash
//! rust-ljm simulate --channels AIN0,AIN1 --rate 2000 --duration 0.5 --trigger DIO0
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use rust_ljm::config::{AppConfig, DEFAULT_CONFIG_PATH};
use rust_ljm::manifest::ConfigManifest;
use rust_ljm::stream::{TriggerEdge, TriggerMode, TriggerSettings};
use rust_ljm::{conformance, overrides, tracing_setup, LabJackDevice, MockLjm};

#[derive(Parser)]
#[command(name = "rust-ljm")]
#[command(about = "LJM startup-configuration tooling and LabJack stream simulation", long_about = None)]
struct Cli {
    /// Application configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration (file merged with RUST_LJM_ variables)
    Config,

    /// Check a manifest file against the structural rules
    Check {
        /// Manifest file
        file: PathBuf,
    },

    /// List every declaration of a manifest
    List {
        /// Manifest file (configured or bundled manifest when omitted)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Show effective overrides and any illegal ones
    Overrides {
        /// Manifest file (configured or bundled manifest when omitted)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Override one parameter and write the manifest
    Set {
        /// Parameter name
        name: String,
        /// New value, parsed according to the declared type
        value: String,
        /// Manifest file (configured or bundled manifest when omitted)
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Output file (defaults to the manifest file)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Restore the default marker and write the manifest
    Reset {
        /// Parameter name; omit with --all
        name: Option<String>,
        /// Reset every parameter
        #[arg(long, conflicts_with = "name")]
        all: bool,
        /// Manifest file (configured or bundled manifest when omitted)
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Output file (defaults to the manifest file)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run a stream acquisition against the simulated LJM backend
    Simulate {
        /// Channels in scan order, comma separated
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
        /// Duration in seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Total sampling rate in Hz
        #[arg(long)]
        rate: Option<f64>,
        /// Scans per read
        #[arg(long)]
        scans_per_read: Option<usize>,
        /// Trigger line; enables a triggered stream
        #[arg(long)]
        trigger: Option<String>,
        /// Trigger mode
        #[arg(long, value_enum, default_value_t = TriggerMode::ConditionalReset)]
        trigger_mode: TriggerMode,
        /// Trigger edge
        #[arg(long, value_enum, default_value_t = TriggerEdge::Rising)]
        trigger_edge: TriggerEdge,
        /// Trigger timeout in milliseconds
        #[arg(long)]
        trigger_timeout_ms: Option<u64>,
        /// Make the simulated device skip every k-th sample
        #[arg(long, default_value_t = 0)]
        skip_every: u64,
        /// Uniform noise amplitude added to simulated samples
        #[arg(long, default_value_t = 0.0)]
        noise: f64,
        /// Apply the manifest's overrides before streaming
        #[arg(long)]
        apply_manifest: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = AppConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.application.log_format = format.clone();
    }
    config.validate()?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;
    debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Check { file } => check(&file),
        Commands::List { manifest } => list(&load_manifest(&config, manifest.as_deref())?),
        Commands::Overrides { manifest } => {
            show_overrides(&load_manifest(&config, manifest.as_deref())?)
        }
        Commands::Set {
            name,
            value,
            manifest,
            output,
        } => {
            let mut loaded = load_manifest(&config, manifest.as_deref())?;
            loaded.set_from_str(&name, &value)?;
            write_manifest(&loaded, &config, manifest, output)
        }
        Commands::Reset {
            name,
            all,
            manifest,
            output,
        } => {
            let mut loaded = load_manifest(&config, manifest.as_deref())?;
            match (name, all) {
                (_, true) => loaded.reset_all(),
                (Some(name), false) => loaded.reset(&name)?,
                (None, false) => bail!("Give a parameter name or --all"),
            }
            write_manifest(&loaded, &config, manifest, output)
        }
        Commands::Simulate {
            channels,
            duration,
            rate,
            scans_per_read,
            trigger,
            trigger_mode,
            trigger_edge,
            trigger_timeout_ms,
            skip_every,
            noise,
            apply_manifest,
        } => {
            let mut settings = config.stream_settings();
            if !channels.is_empty() {
                settings.channels = channels;
            }
            if let Some(duration) = duration {
                settings.duration_s = duration;
            }
            if let Some(rate) = rate {
                settings.sampling_rate_hz = rate;
            }
            if scans_per_read.is_some() {
                settings.scans_per_read = scans_per_read;
            }
            if let Some(channel) = trigger {
                let mut trigger = TriggerSettings::new(channel)
                    .with_mode(trigger_mode)
                    .with_edge(trigger_edge);
                trigger.timeout = trigger_timeout_ms.map(Duration::from_millis);
                settings.trigger = Some(trigger);
            }
            let manifest = if apply_manifest {
                Some(load_manifest(&config, None)?)
            } else {
                None
            };

            let backend = Arc::new(
                MockLjm::new()
                    .with_skip_every(skip_every)
                    .with_noise(noise),
            );
            let device_type = config.device_type()?;
            let connection_type = config.connection_type()?;
            let identifier = config.device.identifier.clone();

            let recording = tokio::task::spawn_blocking(move || -> rust_ljm::AppResult<_> {
                let device =
                    LabJackDevice::open(backend, device_type, connection_type, &identifier)?;
                println!("{device}");
                if let Some(manifest) = &manifest {
                    let written = device.apply_manifest(manifest)?;
                    println!("Applied {written} manifest override(s)");
                }
                device.stream_in(settings)
            })
            .await
            .context("Stream task failed")??;

            println!("{recording}");
            Ok(())
        }
    }
}

fn load_manifest(config: &AppConfig, path: Option<&Path>) -> Result<ConfigManifest> {
    let manifest = match path.or(config.manifest.path.as_deref()) {
        Some(path) => ConfigManifest::load(path)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?,
        None => ConfigManifest::builtin()?,
    };
    Ok(manifest)
}

fn write_manifest(
    manifest: &ConfigManifest,
    config: &AppConfig,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let Some(target) = output.or(source).or_else(|| config.manifest.path.clone()) else {
        bail!("The bundled manifest cannot be modified in place; give --output");
    };
    manifest.save(&target)?;
    info!(path = %target.display(), "Manifest written");
    println!("Wrote {}", target.display());
    Ok(())
}

fn check(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let report = conformance::check_str(&text);
    println!("{}: {report}", file.display());
    if !report.is_conformant() {
        bail!(
            "{} violation(s) in {}",
            report.violations().len(),
            file.display()
        );
    }
    Ok(())
}

fn list(manifest: &ConfigManifest) -> Result<()> {
    for decl in manifest.declarations() {
        let allowed = decl
            .values
            .as_ref()
            .map(|values| format!("  [{values}]"))
            .unwrap_or_default();
        println!(
            "{:<44} {:<8} {}{allowed}",
            decl.name, decl.param_type, decl.value
        );
    }
    println!(
        "{} declaration(s), {} override(s)",
        manifest.len(),
        manifest.overrides().count()
    );
    Ok(())
}

fn show_overrides(manifest: &ConfigManifest) -> Result<()> {
    let audit = overrides::audit(manifest);
    if audit.resolved.is_empty() && audit.errors.is_empty() {
        println!("No overrides; every parameter keeps the LJM default");
    }
    for item in &audit.resolved {
        println!("{item}");
    }
    for warning in &audit.warnings {
        println!("warning: {warning}");
    }
    for error in &audit.errors {
        println!("error: {error}");
    }
    if !audit.is_clean() {
        bail!("{} illegal override(s)", audit.errors.len());
    }
    Ok(())
}

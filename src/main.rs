//! Eltako gateway setup
//!
//! ```bash
//! # List serial ports that could host a gateway
//! eltako-gateway detect
//!
//! # Show which speed a gateway selection resolves to
//! eltako-gateway resolve "Board - fgw14usb (Id: 1)"
//!
//! # Check that a gateway answers
//! eltako-gateway validate --path /dev/ttyUSB0 --device fam14
//!
//! # Run setup and store the validated entry
//! eltako-gateway setup --device fam14 --path /dev/ttyUSB0 --store entries.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use eltako_gateway_lib::flow::{EntryStore, FlowStep, JsonEntryStore, MemoryEntryStore};
use eltako_gateway_lib::{
    FlowResult, GatewayResolver, Settings, SetupFlow, SetupInput, SystemSerial,
};

#[derive(Parser)]
#[command(name = "eltako-gateway")]
#[command(version)]
#[command(about = "Detect, validate and configure Eltako serial gateways")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate serial ports
    Detect {
        /// Print USB descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a gateway selection label to its baud rate
    Resolve {
        label: String,
    },

    /// Check that a gateway acknowledges on a port
    Validate {
        #[arg(short, long)]
        path: String,

        /// Gateway selection label; picks speed and framing from the catalog
        #[arg(short, long, conflicts_with = "speed")]
        device: Option<String>,

        /// Explicit baud rate
        #[arg(short, long)]
        speed: Option<u32>,
    },

    /// Run the setup flow and store the resulting entry
    Setup {
        /// Gateway selection label
        #[arg(short, long)]
        device: Option<String>,

        /// Serial path to submit
        #[arg(short, long)]
        path: Option<String>,

        /// Entry file; defaults to the settings' entry_store
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Detect { json } => handle_detect(&settings, json).await,
        Commands::Resolve { label } => handle_resolve(&settings, &label),
        Commands::Validate { path, device, speed } => {
            handle_validate(&settings, path, device, speed).await
        }
        Commands::Setup { device, path, store } => {
            handle_setup(&settings, device, path, store).await
        }
    }
}

fn system_resolver(settings: &Settings) -> Result<GatewayResolver> {
    let resolver =
        GatewayResolver::system(settings.catalog()?).with_settings(settings.probe_settings());
    Ok(resolver)
}

async fn handle_detect(settings: &Settings, json: bool) -> Result<()> {
    let resolver = system_resolver(settings)?;
    let candidates = tokio::task::spawn_blocking(move || resolver.detect_candidates()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No serial ports found");
    }
    for candidate in candidates {
        match (&candidate.manufacturer, &candidate.product) {
            (Some(manufacturer), Some(product)) => {
                println!("{}  ({} {})", candidate.port_name, manufacturer, product)
            }
            _ => println!("{}", candidate.port_name),
        }
    }
    Ok(())
}

fn handle_resolve(settings: &Settings, label: &str) -> Result<()> {
    let catalog = settings.catalog()?;
    match catalog.lookup(label) {
        Some(entry) => {
            println!("{} baud ({}, {})", entry.baud_rate, entry.identifier, entry.protocol);
            Ok(())
        }
        None => bail!("No known device type in {:?}", label),
    }
}

async fn handle_validate(
    settings: &Settings,
    path: String,
    device: Option<String>,
    speed: Option<u32>,
) -> Result<()> {
    if device.is_none() && speed.is_none() {
        bail!("Either --device or --speed is required");
    }

    let resolver = system_resolver(settings)?;
    let valid = tokio::task::spawn_blocking(move || match (device, speed) {
        (Some(label), _) => resolver.validate_selection(&path, &label),
        (None, Some(speed)) => resolver.validate(&path, speed),
        (None, None) => false,
    })
    .await?;

    if valid {
        println!("Gateway acknowledged");
        Ok(())
    } else {
        bail!("Invalid gateway path")
    }
}

async fn handle_setup(
    settings: &Settings,
    device: Option<String>,
    path: Option<String>,
    store_path: Option<PathBuf>,
) -> Result<()> {
    let store: Arc<dyn EntryStore> = match store_path.or_else(|| settings.entry_store.clone()) {
        Some(path) => Arc::new(JsonEntryStore::new(path)),
        None => {
            log::warn!("No entry store configured, the entry will not be persisted");
            Arc::new(MemoryEntryStore::new())
        }
    };

    let flow = SetupFlow::from_settings(settings, Arc::new(SystemSerial::new()), store)
        .context("Failed to prepare setup")?;

    let mut result = flow.step_user().await?;

    if let (Some(device), Some(path)) = (device, path) {
        let input = SetupInput::new(device, path);
        result = match result.step_id() {
            Some(FlowStep::Detect) => flow.step_detect(Some(input)).await?,
            Some(FlowStep::Manual) => flow.step_manual(Some(input)).await?,
            _ => result,
        };
    }

    println!("{}", serde_json::to_string_pretty(&result)?);

    match result {
        FlowResult::Form { errors, .. } if !errors.is_empty() => bail!("Invalid gateway path"),
        FlowResult::Abort { reason } => bail!("Setup aborted: {}", reason),
        _ => Ok(()),
    }
}

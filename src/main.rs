use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cellbot_runtime::config::{ConfigError, Settings};

/// Drive a cellbot from telnet, chat, relay or voice commands
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = "cellbot.toml")]
    config: PathBuf,

    /// robot, remote or self
    #[arg(long)]
    mode: Option<String>,

    /// Operator channel: telnet, chat, relay or voice
    #[arg(long)]
    input: Option<String>,

    /// Wire framing: serial-ascii or serial-binary
    #[arg(long)]
    output: Option<String>,

    /// Serial device of the wire link
    #[arg(long)]
    port: Option<String>,
}

fn load_settings(args: &Args) -> Result<Settings, ConfigError> {
    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(ConfigError::Io { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!("No config file at {}, using defaults", path.display());
            Settings::default()
        }
        Err(e) => return Err(e),
    };

    if let Some(mode) = &args.mode {
        settings.mode = mode.clone();
    }
    if let Some(input) = &args.input {
        settings.input_method = input.clone();
    }
    if let Some(output) = &args.output {
        settings.output_method = output.clone();
    }
    if let Some(port) = &args.port {
        settings.serial.port = port.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging (set RUST_LOG=debug for wire traffic)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;
    info!("Using settings from {}", args.config.display());

    cellbot_runtime::runtime::run(settings)
}

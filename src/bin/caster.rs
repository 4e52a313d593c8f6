//! LAN Audio Caster command line
//!
//! Device-independent commands: list inputs and library files, edit the
//! configuration, serve a file over HTTP and run a live broadcast.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_caster::{
    audio::{list_input_devices, AudioFrameSource, FrameSource, SyntheticSource},
    config::{AppConfig, DeviceConfig},
    network::{advertised_ip, MediaBridgeServer},
    receiver::{Credentials, ProtocolKind},
    session::BroadcastSession,
    Error,
};

#[derive(Parser)]
#[command(name = "caster", version, about = "Stream audio to LAN playback receivers")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input devices
    Inputs,
    /// List playable files in the audio directory
    Files,
    /// Show or edit the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Serve one file over HTTP until Ctrl-C
    Serve {
        /// Path, or a file name inside the audio directory
        file: String,
    },
    /// Broadcast live audio until Ctrl-C
    Live {
        /// Broadcast a sine tone instead of the microphone
        #[arg(long, value_name = "HZ")]
        tone: Option<f32>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Store the receiver record
    SetDevice {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        protocol: ProtocolKind,
        #[arg(long)]
        credentials: Option<String>,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<Error>() {
                Some(inner) => eprintln!("error[{}]: {:#}", inner.kind(), e),
                None => eprintln!("error: {:#}", e),
            }
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path().context("no config directory on this platform")?,
    };
    let mut config = AppConfig::load_or_default(&config_path)?;

    match cli.command {
        Command::Inputs => {
            println!("\n=== Available Input Devices ===");
            for device in list_input_devices() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}{}", device.name, default_marker);
                println!("    Sample rates: {:?}", device.sample_rates);
                println!("    Channels: {:?}", device.channels);
            }
        }
        Command::Files => {
            let files = lan_audio_caster::media::list_audio_files(&config.library.audio_dir)?;
            if files.is_empty() {
                println!("No audio files in {}", config.library.audio_dir.display());
            }
            for (i, file) in files.iter().enumerate() {
                let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                println!("  {:>3}. {}", i + 1, name);
            }
        }
        Command::Config { action: ConfigAction::Show } => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Config {
            action:
                ConfigAction::SetDevice {
                    id,
                    name,
                    address,
                    protocol,
                    credentials,
                },
        } => {
            config.device = Some(DeviceConfig {
                id,
                name,
                address,
                protocol,
                credentials: credentials.map(Credentials::new),
            });
            config.save(&config_path)?;
        }
        Command::Serve { file } => serve(&config, &file).await?,
        Command::Live { tone } => live(&config, tone).await?,
    }
    Ok(())
}

async fn serve(config: &AppConfig, file: &str) -> Result<()> {
    let path = lan_audio_caster::media::resolve_audio_file(file, &config.library.audio_dir)?;
    let advertise = advertised_ip(config.bridge.bind_address, None);
    let bridge = MediaBridgeServer::start(&path, &config.bridge, advertise).await?;

    println!("Serving {} ({})", bridge.file().display(), bridge.content_type());
    println!("  {}", bridge.url());
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    bridge.shutdown().await;
    Ok(())
}

async fn live(config: &AppConfig, tone: Option<f32>) -> Result<()> {
    let source: Box<dyn FrameSource> = match tone {
        Some(hz) => Box::new(SyntheticSource::tone(hz)),
        None => Box::new(AudioFrameSource::new(config.audio.input_device.clone())),
    };

    let session = BroadcastSession::new(config.audio.clone(), config.stream.clone());
    let url = session.start(source, None).await?;
    println!("Live stream: {}", url);
    println!("Press Ctrl-C to stop");

    let mut stats = tokio::time::interval(Duration::from_secs(10));
    stats.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats.tick() => {
                let status = session.status();
                tracing::info!(
                    "Live: {} chunks queued, {} dropped, {} bytes sent, {} capture errors",
                    status.chunks_pushed,
                    status.chunks_dropped,
                    status.bytes_sent,
                    status.capture_errors
                );
            }
        }
    }

    session.stop().await?;
    Ok(())
}

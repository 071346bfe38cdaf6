//! SeatSense Engine CLI
//!
//! Posture aggregation and trigger engine for seat pressure streams.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use seatsense_engine::{
    config::Config,
    dispatch::HttpAssistantClient,
    engine::Engine,
    source::{Transport, TransportError},
    stats::create_shared_stats_with_persistence,
    HeuristicClassifier, VERSION,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seatsense")]
#[command(version = VERSION)]
#[command(about = "Posture aggregation and trigger engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against a sensor stream
    Run {
        /// Read frames from a file instead of stdin (one frame per line)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Explicit config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the assistant host
        #[arg(long)]
        assistant_host: Option<String>,

        /// Override the assistant port
        #[arg(long)]
        assistant_port: Option<u16>,

        /// Override the assistant bearer token
        #[arg(long)]
        assistant_token: Option<String>,

        /// Override the expected channel count
        #[arg(long)]
        channels: Option<usize>,
    },

    /// Show persisted engine counters
    Status,

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            assistant_host,
            assistant_port,
            assistant_token,
            channels,
        } => {
            cmd_run(
                input,
                config,
                assistant_host,
                assistant_port,
                assistant_token,
                channels,
            )
            .await
        }
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

async fn cmd_run(
    input: Option<PathBuf>,
    config_path: Option<PathBuf>,
    assistant_host: Option<String>,
    assistant_port: Option<u16>,
    assistant_token: Option<String>,
    channels: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };

    if let Some(host) = assistant_host {
        config.assistant.host = host;
    }
    if let Some(port) = assistant_port {
        config.assistant.port = port;
    }
    if let Some(token) = assistant_token {
        config.assistant.token = token;
    }
    if let Some(channels) = channels {
        config.channel_count = channels;
    }
    config.validate().context("validating config")?;
    config
        .ensure_directories()
        .context("creating data directories")?;

    println!("SeatSense Engine v{VERSION}");
    println!("  Channels: {}", config.channel_count);
    println!("  Window: {}s", config.window_duration.as_secs());
    println!("  Assistant: {}", config.assistant.url());
    println!();

    let stats =
        create_shared_stats_with_persistence(config.data_path.join("engine_stats.json"));

    let assistant = HttpAssistantClient::new(config.assistant.clone())
        .context("creating assistant client")?;
    match assistant.test_connection().await {
        Ok(true) => tracing::info!("assistant health check OK"),
        Ok(false) => tracing::warn!("assistant health check failed"),
        Err(e) => tracing::warn!(error = %e, "assistant unreachable, will retry on dispatch"),
    }

    let transport = Box::new(LineTransport::new(input));
    let engine = Engine::new(
        config,
        transport,
        Arc::new(HeuristicClassifier::new()),
        Arc::new(assistant),
        stats.clone(),
    );

    // Ctrl+C flips the shutdown flag; the engine drains and exits.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let report = engine.run(shutdown_rx).await;

    if let Err(e) = stats.save() {
        tracing::warn!(error = %e, "could not persist engine counters");
    }

    println!();
    if let Some(window) = &report.final_window {
        println!("Final window:");
        println!("  Readings: {}", window.readings_total);
        println!("  Switches: {}", window.switch_count);
        println!("  Fatigue score: {:.2}", window.fatigue_score);
        for (label, secs) in &window.time_in_posture {
            println!("  Time in {label}: {secs:.1}s");
        }
        println!();
    }
    println!("{}", stats.summary());

    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let stats_path = config.data_path.join("engine_stats.json");

    if !stats_path.exists() {
        println!("No engine counters found at {}", stats_path.display());
        println!("Run `seatsense run` first.");
        return Ok(());
    }

    let content = std::fs::read_to_string(&stats_path)
        .with_context(|| format!("reading {}", stats_path.display()))?;
    let snapshot: seatsense_engine::EngineStatsSnapshot =
        serde_json::from_str(&content).context("parsing engine counters")?;

    println!("SeatSense Engine v{VERSION}");
    println!("Counters from {}:", stats_path.display());
    println!("  Readings ingested: {}", snapshot.readings_ingested);
    println!("  Parse errors (dropped): {}", snapshot.parse_errors);
    println!(
        "  Classification timeouts/errors: {}/{}",
        snapshot.classification_timeouts, snapshot.classification_errors
    );
    println!("  Transport disconnects: {}", snapshot.transport_disconnects);
    println!("  Windows rolled: {}", snapshot.windows_rolled);
    println!(
        "  Triggers emitted/delivered/dropped: {}/{}/{}",
        snapshot.triggers_emitted, snapshot.triggers_delivered, snapshot.triggers_dropped
    );
    println!("  Dispatch failures: {}", snapshot.dispatch_failures);

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let json = serde_json::to_string_pretty(&config).context("serializing config")?;
    println!("Configuration file: {}", Config::config_path().display());
    println!("{json}");
    Ok(())
}

/// Line-oriented transport: one frame per line from a file or stdin.
///
/// The underlying stream cannot be reopened, so the first disconnect is
/// permanent and a second connect reports `Closed`.
struct LineTransport {
    input: Option<PathBuf>,
    connected: bool,
}

impl LineTransport {
    fn new(input: Option<PathBuf>) -> Self {
        Self {
            input,
            connected: false,
        }
    }
}

impl Transport for LineTransport {
    fn connect(&mut self) -> Result<Receiver<String>, TransportError> {
        if self.connected {
            return Err(TransportError::Closed);
        }

        let reader: Box<dyn BufRead + Send> = match &self.input {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|e| TransportError::Connect(e.to_string()))?;
                Box::new(std::io::BufReader::new(file))
            }
            None => Box::new(std::io::BufReader::new(std::io::stdin())),
        };
        self.connected = true;

        let (tx, rx) = crossbeam_channel::bounded(1024);
        std::thread::spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(rx)
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use railsync::{
    ApiClient, ClientConfig, ControlPayload, EndpointResolver, HttpHealthProbe, LiveSync, TrackLayout,
    api::DEFAULT_REQUEST_TIMEOUT,
};

#[derive(Parser)]
#[command(name = "railsync", version, about = "Headless monitor and control client for the rail simulation backend")]
struct Cli {
    /// Backend base address, tried first during discovery
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// YAML client configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream live state and log interpolated positions (default)
    Watch {
        /// YAML track layout; the built-in demo layout otherwise
        #[arg(long)]
        layout: Option<PathBuf>,
        /// Render rate override
        #[arg(long)]
        render_hz: Option<u32>,
    },

    /// Start the simulation
    Start,

    /// Reset the simulation
    Reset,

    /// Print the current snapshot as JSON
    State,

    /// Delay a train
    Delay {
        #[arg(long)]
        train: String,
        #[arg(long)]
        minutes: u32,
    },

    /// Block a track section, or clear it with --clear
    Block {
        #[arg(long)]
        id: String,
        #[arg(long, default_value_t = false)]
        clear: bool,
    },

    /// Update simulation parameters
    Control {
        #[arg(long)]
        headway_sec: Option<u32>,
        #[arg(long)]
        dwell_sec: Option<u32>,
        #[arg(long)]
        energy_stop_penalty: Option<f64>,
        #[arg(long)]
        simulation_speed: Option<f64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_path(path)?,
        None => ClientConfig::default(),
    }
    .with_env_overrides();
    if let Some(base) = cli.api_base {
        config.api_base = Some(base);
    }

    match cli.cmd.unwrap_or(Command::Watch { layout: None, render_hz: None }) {
        Command::Watch { layout, render_hz } => {
            if let Some(hz) = render_hz {
                config.render.target_hz = hz;
            }
            let layout = match layout {
                Some(path) => TrackLayout::from_path(&path)
                    .with_context(|| format!("loading layout {}", path.display()))?,
                None => TrackLayout::demo(),
            };
            watch(config, Arc::new(layout)).await?;
        }
        Command::Start => print_json(&api(&config).await?.start().await?.status)?,
        Command::Reset => print_json(&api(&config).await?.reset().await?.status)?,
        Command::State => print_json(&api(&config).await?.state().await?)?,
        Command::Delay { train, minutes } => {
            let response = api(&config).await?.inject_delay(&train, minutes).await?;
            print_json(&response.event.map(|e| e.note))?;
        }
        Command::Block { id, clear } => {
            let response = api(&config).await?.set_block_issue(&id, !clear).await?;
            print_json(&response.event.map(|e| e.note))?;
        }
        Command::Control { headway_sec, dwell_sec, energy_stop_penalty, simulation_speed } => {
            let payload = ControlPayload { headway_sec, dwell_sec, energy_stop_penalty, simulation_speed };
            let response = api(&config).await?.update_control(&payload).await?;
            print_json(&response.message)?;
        }
    }

    Ok(())
}

async fn api(config: &ClientConfig) -> anyhow::Result<ApiClient> {
    let probe = HttpHealthProbe::new(config.discovery.probe_timeout())?;
    let endpoint = EndpointResolver::from_config(probe, config).resolve().await;
    if endpoint.is_fallback() {
        warn!("No backend answered /health; trying {}", endpoint.base);
    }
    Ok(ApiClient::new(endpoint.base, DEFAULT_REQUEST_TIMEOUT)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn watch(config: ClientConfig, layout: Arc<TrackLayout>) -> anyhow::Result<()> {
    let sync = LiveSync::connect(&config, layout).await?;
    info!("Watching {} ({} Hz render)", sync.endpoint().base, config.render.target_hz);

    let mut statuses = Box::pin(sync.status_updates());
    let status_log = tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            match &status.last_error {
                Some(error) => info!("Channel {} (attempt {}, last error: {})", status.state, status.attempt, error),
                None => info!("Channel {}", status.state),
            }
        }
    });

    let hz = u64::from(config.render.target_hz.max(1));
    let render = sync.spawn_render_loop(move |tick, positions| {
        if tick.frame_index % hz != 0 {
            return;
        }
        for p in positions {
            info!(
                "{} on {} at ({:.1}, {:.1}) heading {:.2} progress {:.2}",
                p.train.id, p.train.at_block, p.x, p.y, p.heading, p.eased
            );
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Interrupted, shutting down");

    render.stop();
    sync.shutdown();
    status_log.abort();
    Ok(())
}

//! Headless recallgraph session
//!
//! Builds a single playback audio with an oscillator → volume → peak chain,
//! starts the configured scopes, and drives it from the null device. Peak
//! levels and render stats are logged once per second.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recallconf::RecallConfig;
use recallgraph::effects::{self, oscillator, peak, volume};
use recallgraph::{
    AudioSpec, ChangeListener, DeviceRole, Direction, EffectRegistry, Engine, GraphEvent, NullDevice, ScopeTarget,
    SoundScope, TaskHandle, TaskOutcome,
};

/// Recallgraph - per-scope recall processing graph on a null device
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./recallgraph.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run for this many seconds; 0 runs until Ctrl-C
    #[arg(long, default_value = "0")]
    seconds: u64,

    /// Channels per pad of the demo audio
    #[arg(long, default_value = "2")]
    channels: usize,
}

struct LogListener;

impl ChangeListener for LogListener {
    fn on_event(&self, event: &GraphEvent) {
        info!(event = ?event, "Graph changed");
    }
}

async fn done(handle: TaskHandle, what: &str) -> Result<TaskOutcome> {
    handle.outcome().await.with_context(|| format!("{} failed", what))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RecallConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("recallgraph {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        sample_rate = config.engine.sample_rate,
        buffer_size = config.engine.buffer_size,
        period_ms = config.engine.period_ms(),
        "Engine configured"
    );

    let mut registry = EffectRegistry::new();
    effects::register_builtin(&mut registry);

    let (engine, scheduler) = Engine::new(config.engine.clone(), registry);
    engine.add_listener(Arc::new(LogListener));
    let scheduler_thread = scheduler.spawn().context("Failed to spawn scheduler")?;

    let (mut device, mut ring) = NullDevice::spawn(engine.clone(), &config.device)?;
    let scopes: Vec<SoundScope> = device.scopes().to_vec();

    let spec = AudioSpec::new("tone")
        .with_role(DeviceRole::Playback)
        .with_channels(cli.channels);
    let audio = done(engine.add_audio(spec), "add audio")
        .await?
        .audio()
        .ok_or_else(|| anyhow!("add audio returned no id"))?;

    let mut previous = Vec::new();
    for type_id in [oscillator::TYPE_ID, volume::TYPE_ID, peak::TYPE_ID] {
        let handle = engine.attach_recall(audio, type_id, Direction::Output, previous.clone());
        let recall = done(handle, type_id)
            .await?
            .recall()
            .ok_or_else(|| anyhow!("attach {} returned no id", type_id))?;
        previous = vec![recall];
    }

    for scope in &scopes {
        let outcome = done(engine.start(ScopeTarget::Audio(audio), *scope), "start").await?;
        if let TaskOutcome::Runs(runs) = outcome {
            info!(%scope, runs, "Scope started");
        }
    }

    let mut drain = tokio::time::interval(Duration::from_millis(20));
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let deadline = async {
        if cli.seconds == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(cli.seconds)).await;
        }
    };
    tokio::pin!(deadline);

    let mut peak_level = 0.0f32;
    loop {
        tokio::select! {
            _ = drain.tick() => {
                peak_level = peak_level.max(ring.drain_peak());
            }
            _ = report.tick() => {
                let stats = engine.stats().snapshot();
                info!(
                    peak = peak_level,
                    windows = stats.windows,
                    underruns = stats.underruns,
                    deadline_misses = stats.deadline_misses,
                    load = stats.load,
                    "Output"
                );
                peak_level = 0.0;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!(seconds = cli.seconds, "Run time elapsed");
                break;
            }
        }
    }

    for scope in &scopes {
        if let Err(e) = done(engine.stop(ScopeTarget::Audio(audio), *scope), "stop").await {
            warn!(%scope, error = %e, "Scope did not stop cleanly");
        }
    }

    engine.shutdown();
    device.stop();
    match tokio::task::spawn_blocking(move || scheduler_thread.join()).await {
        Ok(Ok(())) => {}
        _ => warn!("Scheduler thread did not exit cleanly"),
    }

    info!("recallgraph shutdown complete");
    Ok(())
}

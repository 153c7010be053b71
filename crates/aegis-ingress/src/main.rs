//! aegis-ingress — CLI entrypoint for the Aegis security event pipeline.
//!
//! Four subcommands (§10.6): `run` starts the long-lived Orchestrator
//! consuming the Event Bus; `submit` is a one-shot ingress call useful for
//! scripting and for driving individual scenarios by hand; `health` prints
//! the operational surface; `init-config` writes a starting configuration
//! file.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aegis_bus::{BusMessage, BusMetrics, EventBus};
use aegis_config::{PipelineConfig, SharedConfig};
use aegis_dlq::DeadLetterQueue;
use aegis_ingress::Ingress;
use aegis_metrics::{DecisionLog, PipelineMetrics};
use aegis_notify::DedupWindow;
use aegis_oracle::{
    Effector, HttpEffector, HttpLlmAnalyzer, HttpMlModel, LlmAnalyzer, MlModel, MockEffector,
    MockLlmAnalyzer, MockMlModel, OracleHandle,
};
use aegis_orchestrator::Orchestrator;
use aegis_store::AlertStore;
use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "aegis-ingress")]
#[command(about = "Ingress adapter and pipeline runner for the Aegis security event pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Orchestrator and consume the Event Bus until a shutdown signal arrives.
    Run {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
    /// Submit a single raw finding read from a file (or stdin with `-`).
    Submit {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
        #[arg(long)]
        source: String,
        #[arg(long, default_value = "-")]
        file: String,
    },
    /// Print the operational health surface (§6.5) as JSON.
    Health {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
    /// Write a default configuration file to `--output`.
    InitConfig {
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, state_dir } => run(&config, &state_dir).await,
        Commands::Submit {
            config,
            state_dir,
            source,
            file,
        } => submit(&config, &state_dir, &source, &file).await,
        Commands::Health { config, state_dir } => health(&config, &state_dir).await,
        Commands::InitConfig { output } => init_config(&output),
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}

/// Every long-lived piece of process state, assembled once at startup from
/// `PipelineConfig` and handed to both the Ingress adapter and the
/// Orchestrator.
struct Pipeline {
    config: SharedConfig,
    bus: EventBus,
    receivers: Vec<tokio::sync::mpsc::Receiver<BusMessage>>,
    orchestrator: Arc<Orchestrator>,
}

fn build_pipeline(config_path: &Path, state_dir: &Path) -> Result<Pipeline> {
    let loaded = PipelineConfig::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let snapshot = loaded.clone();
    let config = SharedConfig::new(loaded);

    let (bus, receivers) = EventBus::new(
        snapshot.bus_lane_count,
        snapshot.bus_capacity,
        snapshot.bus_retention_hours,
    );

    let ml = build_ml_handle(snapshot.oracle_concurrency);
    let llm = build_llm_handle(snapshot.oracle_concurrency);
    let effector = build_effector_handle(snapshot.oracle_concurrency);

    let store = Arc::new(AlertStore::open(state_dir, snapshot.store_ttl_seconds));
    let event_dlq = Arc::new(Mutex::new(DeadLetterQueue::open(state_dir, "events")));
    let store_dlq = Arc::new(Mutex::new(DeadLetterQueue::open(state_dir, "store_failures")));
    let dedup = Arc::new(DedupWindow::new(
        Duration::from_millis(snapshot.notify_dedup_window_ms),
        10_000,
    ));
    let metrics = Arc::new(PipelineMetrics::new());
    let decisions = Arc::new(DecisionLog::new(1_000));
    let latencies = Arc::new(aegis_latency::StageLatencies::new(256));
    let concurrency = Arc::new(Semaphore::new(snapshot.max_concurrent_events));

    let orchestrator = Arc::new(Orchestrator {
        config: config.clone(),
        ml,
        llm,
        effector,
        store,
        event_dlq,
        store_dlq,
        dedup,
        metrics,
        decisions,
        latencies,
        concurrency,
    });

    Ok(Pipeline {
        config,
        bus,
        receivers,
        orchestrator,
    })
}

/// Selects a production `Http*` oracle client when its base-URL environment
/// variable is set, falling back to a deterministic `Mock*` client so this
/// binary runs standalone with no network dependencies.
fn build_ml_handle(concurrency: usize) -> OracleHandle<dyn MlModel> {
    match std::env::var("AEGIS_ML_URL") {
        Ok(url) => {
            info!(url, "using HTTP ML scoring oracle");
            OracleHandle::new(Arc::new(HttpMlModel::new(url)), concurrency)
        }
        Err(_) => {
            info!("AEGIS_ML_URL not set, using mock ML scoring oracle");
            OracleHandle::new(Arc::new(MockMlModel::fixed(50.0, 0.5)), concurrency)
        }
    }
}

fn build_llm_handle(concurrency: usize) -> OracleHandle<dyn LlmAnalyzer> {
    match std::env::var("AEGIS_LLM_URL") {
        Ok(url) => {
            info!(url, "using HTTP deep-analysis oracle");
            OracleHandle::new(Arc::new(HttpLlmAnalyzer::new(url)), concurrency)
        }
        Err(_) => {
            info!("AEGIS_LLM_URL not set, using mock deep-analysis oracle");
            let placeholder = r#"{"risk_score": 5, "attack_vector": "unknown", "recommended_actions": [], "business_impact": "undetermined", "confidence": 0.5}"#;
            OracleHandle::new(Arc::new(MockLlmAnalyzer::fixed(placeholder)), concurrency)
        }
    }
}

fn build_effector_handle(concurrency: usize) -> OracleHandle<dyn Effector> {
    match std::env::var("AEGIS_EFFECTOR_URL") {
        Ok(url) => {
            info!(url, "using HTTP remediation effector");
            OracleHandle::new(Arc::new(HttpEffector::new(url)), concurrency)
        }
        Err(_) => {
            info!("AEGIS_EFFECTOR_URL not set, using mock remediation effector");
            OracleHandle::new(Arc::new(MockEffector::always_succeeds()), concurrency)
        }
    }
}

async fn run(config_path: &Path, state_dir: &Path) -> Result<()> {
    install_tracing();
    let pipeline = build_pipeline(config_path, state_dir)?;
    let snapshot = pipeline.config.snapshot();
    let bus_retention = ChronoDuration::hours(snapshot.bus_retention_hours);
    let bus_metrics = Arc::new(BusMetrics::default());

    info!(
        lane_count = snapshot.bus_lane_count,
        action_policy = ?snapshot.action_policy,
        "orchestrator starting"
    );
    let orchestrator = Arc::clone(&pipeline.orchestrator);
    let driver = tokio::spawn(orchestrator.run(bus_retention, bus_metrics, pipeline.receivers));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");
    // Give the driver a beat to finish events already mid-flight before the
    // process exits; there is no separate producer in this binary to stop.
    tokio::time::sleep(Duration::from_millis(500)).await;
    driver.abort();
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn submit(config_path: &Path, state_dir: &Path, source: &str, file: &str) -> Result<()> {
    install_tracing();
    let pipeline = build_pipeline(config_path, state_dir)?;
    let Pipeline {
        bus,
        orchestrator,
        mut receivers,
        ..
    } = pipeline;
    let ingress = Ingress::new(bus, Arc::clone(&orchestrator));

    let raw = read_finding(file)?;
    let outcome = ingress.submit(source, &raw);
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.accepted {
        let event = take_one_message(&mut receivers)
            .context("event was accepted but vanished from the bus before it could be processed")?
            .event;
        let event_id = event.event_id.clone();
        let observed_at = event.observed_at;
        orchestrator.process(event).await;
        if let Some(alert) = orchestrator.store.get(&event_id, observed_at) {
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
    }
    Ok(())
}

fn read_finding(file: &str) -> Result<Value> {
    let content = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading finding from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading finding from {file}"))?
    };
    serde_json::from_str(&content).context("finding is not valid JSON")
}

/// This CLI invocation is the bus's only consumer, so the event just
/// enqueued by `ingress.submit` is always immediately available.
fn take_one_message(
    receivers: &mut [tokio::sync::mpsc::Receiver<BusMessage>],
) -> Option<BusMessage> {
    receivers.iter_mut().find_map(|r| r.try_recv().ok())
}

#[derive(Serialize)]
struct HealthSurface {
    ready: bool,
    in_flight: usize,
    bus_depth: usize,
    dlq_depth: usize,
    stage_latencies_p50_p95_p99: HashMap<String, aegis_latency::Percentiles>,
}

async fn health(config_path: &Path, state_dir: &Path) -> Result<()> {
    let pipeline = build_pipeline(config_path, state_dir)?;
    let snapshot = pipeline.config.snapshot();
    let in_flight = snapshot.max_concurrent_events - pipeline.orchestrator.concurrency.available_permits();

    let surface = HealthSurface {
        ready: true,
        in_flight,
        bus_depth: pipeline.orchestrator.bus_depth(&pipeline.bus),
        dlq_depth: pipeline.orchestrator.dlq_depth(),
        stage_latencies_p50_p95_p99: pipeline.orchestrator.latencies.snapshot_all(),
    };
    println!("{}", serde_json::to_string_pretty(&surface)?);
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    let config = PipelineConfig::default();
    config
        .save(output)
        .with_context(|| format!("writing default config to {}", output.display()))?;
    println!("wrote default configuration to {}", output.display());
    Ok(())
}

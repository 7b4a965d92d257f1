//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the engine monitor daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use engmon_common::config::{AppConfig, Variant};
use engmon_common::logging::init_tracing;
use engmon_common::MonotonicClock;
use engmon_core::{EngineMonitor, HostNetwork, LoopbackNetwork, MonitorMetrics, NetworkAssociation};
use engmon_metrics::{new_registry, spawn_http_server};
use engmon_msg::{BrokerLink, InMemoryBroker, MqttLink, MqttSettings};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Engine telemetry monitor daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the telemetry variant")]
    variant: Option<CliVariant>,

    #[arg(long, value_name = "N", help = "Seed the random source for a reproducible run")]
    seed: Option<u64>,

    #[arg(long, help = "Use the in-process broker and log published payloads")]
    loopback: bool,

    #[arg(long, value_name = "N", help = "Stop after N telemetry cycles")]
    cycles: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliVariant {
    Simulated,
    Sensor,
}

impl From<CliVariant> for Variant {
    fn from(value: CliVariant) -> Self {
        match value {
            CliVariant::Simulated => Variant::Simulated,
            CliVariant::Sensor => Variant::Sensor,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/engmond.toml"));
    candidates.push(PathBuf::from("configs/engmond.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(variant) = cli.variant {
        config.telemetry.variant = variant.into();
    }
    if let Some(seed) = cli.seed {
        config.telemetry.seed = Some(seed);
    }
    config.validate()?;
    let load_duration = load_started.elapsed();

    init_tracing("engmond", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running on defaults"),
    }

    let registry = new_registry();
    let metrics = MonitorMetrics::register(registry.clone())?;
    metrics
        .daemon
        .observe_config_load(load_duration.as_secs_f64());
    metrics.daemon.inc_start();
    metrics.daemon.set_build_info(env!("CARGO_PKG_VERSION"));

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let (link, network): (Box<dyn BrokerLink>, Box<dyn NetworkAssociation>) = if cli.loopback {
        info!("loopback mode; telemetry stays in-process");
        (
            Box::new(InMemoryBroker::new().link().with_echo(true)),
            Box::new(LoopbackNetwork),
        )
    } else {
        info!(host = %config.broker.host, port = config.broker.port, "using MQTT broker");
        (
            Box::new(MqttLink::new(MqttSettings::from(&config.broker))),
            Box::new(
                HostNetwork::new(config.broker.host.clone(), config.broker.port)
                    .with_network(&config.network),
            ),
        )
    };

    let mut monitor = EngineMonitor::from_config(
        &config,
        link,
        network,
        MonotonicClock::shared(),
        Some(metrics),
    )
    .context("failed to assemble engine monitor")?;

    info!(cycles = ?cli.cycles, "daemon running; waiting for termination signal");
    let outcome = monitor.run(cli.cycles, shutdown_signal()).await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    match outcome {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                published = summary.published,
                "engine monitor exited cleanly"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, fatal = err.is_fatal(), "engine monitor aborted");
            Err(err).context("engine monitor aborted; exiting for supervisor restart")
        }
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received; shutting down"),
        Err(err) => {
            warn!(error = %err, "failed to listen for ctrl-c; running until the cycle limit");
            std::future::pending::<()>().await;
        }
    }
}

//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Cooperative control loop driving session, commands, synthesis and publish."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use engmon_common::time::duration_to_millis;
use engmon_common::{AppConfig, CycleScheduler, RetryPolicy, SharedClock, TelemetryConfig, Variant};
use engmon_metrics::{DaemonMetrics, SharedRegistry};
use engmon_msg::{
    BrokerLink, CommandChannel, ConnectionManager, MessagingMetrics, Publisher, SessionSettings,
};
use engmon_sim::{
    format_active_time, EngineTelemetry, FixedSensors, PulseCounter, ReplaySensors, RunState,
    RpmWindow, SeededRandom, SensorFrontEnd, SensorReadings, SensorSource, SynthesizerSettings,
    TelemetrySynthesizer,
};
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::network::{ensure_associated, NetworkAssociation};

/// Readings used by the sensor variant when no replay file is configured.
const NOMINAL_READINGS: SensorReadings = SensorReadings {
    voltage: 220.0,
    current: 15.0,
    oil_pressure: 45.0,
    coolant_temp: 85.0,
};

/// Where a cycle's readings come from.
#[derive(Debug)]
pub enum TelemetrySource {
    /// Every field synthesized.
    Simulated,
    /// Electrical, oil, coolant and RPM measured through the front end.
    Sensor(SensorFrontEnd),
}

impl TelemetrySource {
    /// Build the source for the configured variant.
    pub fn from_config(config: &TelemetryConfig, now_ms: u64) -> Result<Self> {
        match config.variant {
            Variant::Simulated => Ok(TelemetrySource::Simulated),
            Variant::Sensor => {
                let sensor = &config.sensor;
                let counter = PulseCounter::shared();
                let source: Box<dyn SensorSource> = match &sensor.replay_file {
                    Some(path) => Box::new(
                        ReplaySensors::from_path(path, counter.clone()).with_context(|| {
                            format!("failed to load sensor replay {}", path.display())
                        })?,
                    ),
                    None => {
                        warn!("no sensor replay configured; using fixed nominal readings");
                        Box::new(FixedSensors::new(NOMINAL_READINGS))
                    }
                };
                let window =
                    RpmWindow::starting_at(sensor.pulses_per_revolution, sensor.rpm_window, now_ms);
                Ok(TelemetrySource::Sensor(SensorFrontEnd::new(
                    source, counter, window,
                )))
            }
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            TelemetrySource::Simulated => Variant::Simulated,
            TelemetrySource::Sensor(_) => Variant::Sensor,
        }
    }
}

/// Metric families touched by the control loop.
#[derive(Clone)]
pub struct MonitorMetrics {
    pub messaging: MessagingMetrics,
    pub daemon: DaemonMetrics,
}

impl MonitorMetrics {
    pub fn register(registry: SharedRegistry) -> Result<Self> {
        let messaging = MessagingMetrics::register(&registry)
            .context("failed to register messaging metrics")?;
        let daemon = DaemonMetrics::new(registry)?;
        Ok(Self { messaging, daemon })
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No cycle was due.
    Idle,
    /// Snapshot delivered on the data topic.
    Published(EngineTelemetry),
    /// Cycle ran but the data publish failed; the next cycle tries again.
    PublishFailed(EngineTelemetry),
}

/// Counters reported when [`EngineMonitor::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub published: u64,
    pub publish_failures: u64,
}

/// Owns every piece of loop state and drives one strictly sequential cycle per step.
pub struct EngineMonitor {
    clock: SharedClock,
    network: Box<dyn NetworkAssociation>,
    association_policy: RetryPolicy,
    connection: ConnectionManager,
    commands: CommandChannel,
    publisher: Publisher,
    scheduler: CycleScheduler,
    synthesizer: TelemetrySynthesizer,
    source: TelemetrySource,
    rng: SeededRandom,
    loop_delay: Duration,
    metrics: Option<MonitorMetrics>,
    summary: RunSummary,
}

impl EngineMonitor {
    pub fn from_config(
        config: &AppConfig,
        link: Box<dyn BrokerLink>,
        network: Box<dyn NetworkAssociation>,
        clock: SharedClock,
        metrics: Option<MonitorMetrics>,
    ) -> Result<Self> {
        let telemetry = &config.telemetry;
        let mut rng = telemetry
            .seed
            .map(SeededRandom::from_seed)
            .unwrap_or_else(SeededRandom::from_entropy);
        let session_rng = rng.fork();
        let now = clock.now_ms();

        let settings = SynthesizerSettings::default()
            .with_fuel_rate(telemetry.effective_fuel_rate())
            .with_initial_fuel(telemetry.initial_fuel);
        let synthesizer = match telemetry.variant {
            Variant::Simulated => TelemetrySynthesizer::simulated(settings, now),
            Variant::Sensor if telemetry.sensor.start_running => {
                TelemetrySynthesizer::with_run_state(settings, RunState::running_since(now))
            }
            Variant::Sensor => TelemetrySynthesizer::with_run_state(settings, RunState::stopped()),
        };
        let source = TelemetrySource::from_config(telemetry, now)?;

        let mut connection = ConnectionManager::new(
            link,
            clock.clone(),
            config.retry.policy(),
            Box::new(session_rng),
            SessionSettings::from_config(&config.broker, &config.topics),
        );
        let mut commands = CommandChannel::new(config.topics.commands.clone());
        let mut publisher = Publisher::from_topics(&config.topics);
        if let Some(metrics) = &metrics {
            connection = connection.with_metrics(metrics.messaging.clone());
            commands = commands.with_metrics(metrics.messaging.clone());
            publisher = publisher.with_metrics(metrics.messaging.clone());
            metrics.daemon.set_engine_running(synthesizer.is_running());
        }

        let interval = telemetry.effective_interval();
        info!(
            variant = ?telemetry.variant,
            seed = rng.seed(),
            interval_ms = duration_to_millis(interval),
            network = network.name(),
            running = synthesizer.is_running(),
            "engine monitor configured"
        );

        Ok(Self {
            clock,
            network,
            association_policy: config.network.association_policy(),
            connection,
            commands,
            publisher,
            scheduler: CycleScheduler::new(interval),
            synthesizer,
            source,
            rng,
            loop_delay: telemetry.loop_delay,
            metrics,
            summary: RunSummary::default(),
        })
    }

    pub fn synthesizer(&self) -> &TelemetrySynthesizer {
        &self.synthesizer
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Pulse counter of the sensor front end, for whatever feeds it pulses.
    pub fn pulse_counter(&self) -> Option<Arc<PulseCounter>> {
        match &self.source {
            TelemetrySource::Sensor(front_end) => Some(front_end.counter()),
            TelemetrySource::Simulated => None,
        }
    }

    /// One loop iteration: session, commands, then a cycle if one is due.
    ///
    /// Blocks inside session establishment until a session exists. Errors are
    /// returned only for exhausted bounded policies.
    pub async fn step(&mut self) -> Result<StepOutcome, MonitorError> {
        self.ensure_session().await?;

        let inbound = self.connection.poll_inbound(self.loop_delay).await;
        for command in self.commands.drain(inbound) {
            self.synthesizer.apply_command(command, self.clock.now_ms());
        }
        // Polling can observe the peer going away; reconnect before the cycle is stamped.
        self.ensure_session().await?;

        let now = self.clock.now_ms();
        if !self.scheduler.poll(now) {
            return Ok(StepOutcome::Idle);
        }
        self.summary.cycles += 1;
        if let Some(metrics) = &self.metrics {
            metrics.daemon.inc_cycle();
        }

        let snapshot = match &mut self.source {
            TelemetrySource::Simulated => self.synthesizer.produce(now, &mut self.rng),
            TelemetrySource::Sensor(front_end) => {
                let inputs = front_end.acquire(now);
                self.synthesizer
                    .produce_measured(now, &inputs, &mut self.rng)
            }
        }
        .stamped(now);

        let outcome = match self
            .publisher
            .publish(self.connection.link_mut(), &snapshot)
            .await
        {
            Ok(ack) => {
                self.summary.published += 1;
                debug!(bytes = ack.bytes, mirrored = ack.mirrored, "cycle published");
                StepOutcome::Published(snapshot)
            }
            Err(failure) => {
                self.summary.publish_failures += 1;
                warn!(error = %failure, "telemetry publish failed; next cycle will retry");
                StepOutcome::PublishFailed(snapshot)
            }
        };

        if let StepOutcome::Published(snapshot) | StepOutcome::PublishFailed(snapshot) = &outcome {
            log_engine_status(snapshot);
        }
        if let Some(metrics) = &self.metrics {
            metrics.daemon.set_engine_running(self.synthesizer.is_running());
        }
        Ok(outcome)
    }

    async fn ensure_session(&mut self) -> Result<(), MonitorError> {
        if self.connection.is_live() {
            return Ok(());
        }
        ensure_associated(
            self.network.as_mut(),
            &self.association_policy,
            self.clock.as_ref(),
        )
        .await?;
        self.connection.ensure_connected().await?;
        Ok(())
    }

    /// Step until `shutdown` resolves, `max_cycles` cycles have run, or a fatal
    /// error occurs. The session is closed before returning.
    pub async fn run<F>(&mut self, max_cycles: Option<u64>, shutdown: F) -> Result<RunSummary, MonitorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let result = loop {
            if max_cycles.is_some_and(|limit| self.summary.cycles >= limit) {
                info!(cycles = self.summary.cycles, "cycle limit reached");
                break Ok(());
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                step = self.step() => {
                    if let Err(err) = step {
                        break Err(err);
                    }
                }
            }

            let pause = self
                .scheduler
                .until_due(self.clock.now_ms())
                .min(self.loop_delay);
            if !pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("shutdown requested");
                        break Ok(());
                    }
                    _ = self.clock.sleep(pause) => {}
                }
            }
        };

        self.connection.disconnect().await;
        let summary = self.summary;
        info!(
            cycles = summary.cycles,
            published = summary.published,
            publish_failures = summary.publish_failures,
            "engine monitor stopped"
        );
        result.map(|()| summary)
    }
}

impl std::fmt::Debug for EngineMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMonitor")
            .field("variant", &self.source.variant())
            .field("network", &self.network.name())
            .field("scheduler", &self.scheduler)
            .field("running", &self.synthesizer.is_running())
            .field("summary", &self.summary)
            .finish()
    }
}

fn log_engine_status(snapshot: &EngineTelemetry) {
    info!(
        voltage = snapshot.voltage,
        current = snapshot.current,
        power = snapshot.power,
        frequency = snapshot.frequency,
        rpm = snapshot.rpm,
        oil_pressure = snapshot.oil_pressure,
        coolant_temp = snapshot.coolant_temp,
        intake_air_temp = snapshot.intake_air_temp,
        fuel_level = snapshot.fuel_level,
        air_fuel_ratio = snapshot.air_fuel_ratio,
        manifold_pressure = snapshot.manifold_pressure,
        throttle_position = snapshot.throttle_position,
        phase = %snapshot.phase,
        sync = %snapshot.sync,
        active_time = %format_active_time(snapshot.active_time),
        engine_status = ?snapshot.engine_status,
        timestamp_ms = snapshot.timestamp_ms,
        "engine status"
    );
}

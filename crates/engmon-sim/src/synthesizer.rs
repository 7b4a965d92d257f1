//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-cycle engine telemetry synthesis for simulated and sensor-driven deployments."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use engmon_common::time::duration_to_millis;
use tracing::{debug, info};

use crate::model::{EngineStatus, EngineTelemetry, PhaseStatus, SyncStatus};
use crate::random::RandomSource;
use crate::run_state::{EngineCommand, RunState, Transition};
use crate::sensors::MeasuredInputs;

const SYNC_TOGGLE_PERCENT: u32 = 2;
const PHASE_TOGGLE_PERCENT: u32 = 1;
const VOLTAGE_ANOMALY_PERCENT: u32 = 1;
const RPM_SURGE_PERCENT: u32 = 1;
const OVERHEAT_PERCENT: u32 = 1;
const OVERHEAT_THRESHOLD_C: f64 = 70.0;
const ATMOSPHERIC_KPA: f64 = 101.3;

/// Tunables for the synthesis model.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizerSettings {
    /// Fuel percentage consumed per produced running cycle.
    pub fuel_consumption_rate: f64,
    /// Below this the tank is refilled to 100.
    pub low_fuel_floor: f64,
    pub initial_fuel: f64,
    /// Time for coolant to ramp from ambient to target.
    pub warm_up: Duration,
    pub ambient_temp: f64,
    pub target_coolant_temp: f64,
}

impl Default for SynthesizerSettings {
    fn default() -> Self {
        Self {
            fuel_consumption_rate: 0.05,
            low_fuel_floor: 5.0,
            initial_fuel: 75.0,
            warm_up: Duration::from_secs(300),
            ambient_temp: 25.0,
            target_coolant_temp: 85.0,
        }
    }
}

impl SynthesizerSettings {
    pub fn with_fuel_rate(mut self, rate: f64) -> Self {
        self.fuel_consumption_rate = rate;
        self
    }

    pub fn with_initial_fuel(mut self, fuel: f64) -> Self {
        self.initial_fuel = fuel;
        self
    }
}

/// Fuel after one running cycle: decrement, never negative, refill to 100 below the floor.
pub fn next_fuel_level(prior: f64, rate: f64, floor: f64) -> f64 {
    let next = (prior - rate).max(0.0);
    if next < floor {
        100.0
    } else {
        next
    }
}

/// Owns the engine run-state and the previous snapshot; produces one snapshot per cycle.
#[derive(Debug, Clone)]
pub struct TelemetrySynthesizer {
    settings: SynthesizerSettings,
    run_state: RunState,
    last: EngineTelemetry,
}

impl TelemetrySynthesizer {
    /// Simulated deployments start running at `now_ms`.
    pub fn simulated(settings: SynthesizerSettings, now_ms: u64) -> Self {
        Self::with_run_state(settings, RunState::running_since(now_ms))
    }

    pub fn with_run_state(settings: SynthesizerSettings, run_state: RunState) -> Self {
        let last = EngineTelemetry {
            fuel_level: settings.initial_fuel,
            ..EngineTelemetry::default()
        };
        Self {
            settings,
            run_state,
            last,
        }
    }

    pub fn settings(&self) -> &SynthesizerSettings {
        &self.settings
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    pub fn fuel_level(&self) -> f64 {
        self.last.fuel_level
    }

    /// Most recently produced snapshot.
    pub fn last(&self) -> &EngineTelemetry {
        &self.last
    }

    pub fn apply_command(&mut self, command: EngineCommand, now_ms: u64) -> Transition {
        let transition = self.run_state.apply(command, now_ms);
        match transition {
            Transition::Started => info!(now_ms, "engine started"),
            Transition::Restarted => info!(now_ms, "engine run-start reference reset"),
            Transition::Stopped => info!(now_ms, "engine stopped"),
            Transition::Unchanged => debug!(%command, "engine already stopped"),
        }
        transition
    }

    /// Fully simulated snapshot.
    pub fn produce(&mut self, now_ms: u64, rng: &mut dyn RandomSource) -> EngineTelemetry {
        let snapshot = if self.run_state.is_running() {
            self.running_profile(now_ms, rng)
        } else {
            self.stopped_profile(rng)
        };
        self.last = snapshot.clone();
        snapshot
    }

    /// Snapshot shaped by measured readings; unmeasured fields use the simulated jitter model.
    pub fn produce_measured(
        &mut self,
        now_ms: u64,
        inputs: &MeasuredInputs,
        rng: &mut dyn RandomSource,
    ) -> EngineTelemetry {
        let snapshot = if self.run_state.is_running() {
            self.measured_profile(now_ms, inputs, rng)
        } else {
            self.stopped_profile(rng)
        };
        self.last = snapshot.clone();
        snapshot
    }

    fn running_profile(&self, now_ms: u64, rng: &mut dyn RandomSource) -> EngineTelemetry {
        let t = now_ms as f64;
        let load = (t / 10_000.0).sin();

        let mut voltage = 218.0 + rng.scaled(0, 15, 10.0);
        let current = 15.0 + load * 5.0 + rng.scaled(0, 10, 10.0);
        let frequency = 49.9 + rng.scaled(0, 40, 100.0);
        let mut rpm = 1_500.0 + (t / 8_000.0).sin() * 300.0 + rng.int_in(-20, 20) as f64;
        let oil_pressure = 45.0 + rng.int_in(-8, 8) as f64 + (t / 15_000.0).sin() * 3.0;
        let mut coolant_temp = self.coolant_target(now_ms) + rng.int_in(-3, 3) as f64;
        let intake_air_temp = 30.0 + (coolant_temp - 80.0) * 0.1 + rng.int_in(-5, 5) as f64;
        let fuel_level = next_fuel_level(
            self.last.fuel_level,
            self.settings.fuel_consumption_rate,
            self.settings.low_fuel_floor,
        );
        let air_fuel_ratio = 14.5 + rng.scaled(-10, 10, 10.0);
        let manifold_pressure = 95.0 + rng.int_in(-8, 8) as f64 + load * 3.0;
        let throttle_position = 20.0 + rng.int_in(-8, 8) as f64 + (t / 12_000.0).sin() * 5.0;

        let (mut phase, mut sync) = self.resumed_grid_status();
        if rng.chance_percent(SYNC_TOGGLE_PERCENT) {
            sync = sync.toggled();
            debug!(%sync, "sync status toggled");
        }
        if rng.chance_percent(PHASE_TOGGLE_PERCENT) {
            phase = phase.toggled();
            debug!(%phase, "phase status toggled");
        }
        if rng.chance_percent(VOLTAGE_ANOMALY_PERCENT) {
            let delta = if rng.int_in(0, 2) == 0 { 15.0 } else { -20.0 };
            voltage += delta;
            debug!(delta, "voltage anomaly injected");
        }
        if rng.chance_percent(RPM_SURGE_PERCENT) {
            let surge = rng.int_in(200, 500) as f64;
            rpm += surge;
            debug!(surge, "rpm surge injected");
        }
        if rng.chance_percent(OVERHEAT_PERCENT) && coolant_temp > OVERHEAT_THRESHOLD_C {
            coolant_temp += 10.0;
            debug!(coolant_temp, "coolant over-temperature injected");
        }

        EngineTelemetry {
            voltage,
            current,
            power: voltage * current,
            frequency,
            rpm: rpm.max(0.0) as u32,
            oil_pressure,
            coolant_temp,
            intake_air_temp,
            fuel_level,
            air_fuel_ratio,
            manifold_pressure,
            throttle_position,
            phase,
            sync,
            active_time: self.run_state.active_time(now_ms),
            engine_status: EngineStatus::Running,
            timestamp_ms: 0,
        }
    }

    fn measured_profile(
        &self,
        now_ms: u64,
        inputs: &MeasuredInputs,
        rng: &mut dyn RandomSource,
    ) -> EngineTelemetry {
        let t = now_ms as f64;
        let load = (t / 10_000.0).sin();
        let readings = inputs.readings;
        let (phase, sync) = self.resumed_grid_status();

        EngineTelemetry {
            voltage: readings.voltage,
            current: readings.current,
            power: readings.voltage * readings.current,
            frequency: 49.9 + rng.scaled(0, 40, 100.0),
            rpm: inputs.rpm,
            oil_pressure: readings.oil_pressure,
            coolant_temp: readings.coolant_temp,
            intake_air_temp: 30.0 + (readings.coolant_temp - 80.0) * 0.1 + rng.int_in(-5, 5) as f64,
            fuel_level: next_fuel_level(
                self.last.fuel_level,
                self.settings.fuel_consumption_rate,
                self.settings.low_fuel_floor,
            ),
            air_fuel_ratio: 14.5 + rng.scaled(-10, 10, 10.0),
            manifold_pressure: 95.0 + rng.int_in(-8, 8) as f64 + load * 3.0,
            throttle_position: 20.0 + rng.int_in(-8, 8) as f64 + (t / 12_000.0).sin() * 5.0,
            phase,
            sync,
            active_time: self.run_state.active_time(now_ms),
            engine_status: EngineStatus::Running,
            timestamp_ms: 0,
        }
    }

    /// Idle constants; frequency and fuel hold their last running values.
    fn stopped_profile(&self, rng: &mut dyn RandomSource) -> EngineTelemetry {
        EngineTelemetry {
            voltage: 12.5 + rng.scaled(0, 10, 10.0),
            current: 0.5 + rng.scaled(0, 5, 10.0),
            power: 0.0,
            frequency: self.last.frequency,
            rpm: 0,
            oil_pressure: 0.0,
            coolant_temp: self.settings.ambient_temp + rng.int_in(0, 10) as f64,
            intake_air_temp: self.settings.ambient_temp + rng.int_in(0, 10) as f64,
            fuel_level: self.last.fuel_level,
            air_fuel_ratio: 0.0,
            manifold_pressure: ATMOSPHERIC_KPA,
            throttle_position: 0.0,
            phase: PhaseStatus::Stopped,
            sync: SyncStatus::Off,
            active_time: Duration::ZERO,
            engine_status: EngineStatus::Stopped,
            timestamp_ms: 0,
        }
    }

    /// Linear ramp from ambient to target over the warm-up period, clamped afterwards.
    fn coolant_target(&self, now_ms: u64) -> f64 {
        let warm_up_ms = duration_to_millis(self.settings.warm_up);
        let run_ms = duration_to_millis(self.run_state.active_time(now_ms));
        if warm_up_ms == 0 || run_ms >= warm_up_ms {
            return self.settings.target_coolant_temp;
        }
        let span = self.settings.target_coolant_temp - self.settings.ambient_temp;
        self.settings.ambient_temp + (run_ms as f64 / warm_up_ms as f64) * span
    }

    /// Grid status carried over from the previous snapshot; a stopped profile resumes in phase and on grid.
    fn resumed_grid_status(&self) -> (PhaseStatus, SyncStatus) {
        let phase = match self.last.phase {
            PhaseStatus::Stopped => PhaseStatus::InPhase,
            other => other,
        };
        let sync = match self.last.sync {
            SyncStatus::Off => SyncStatus::OnGrid,
            other => other,
        };
        (phase, sync)
    }
}

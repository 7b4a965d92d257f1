//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry synthesis module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Engine telemetry model and synthesis.
//!
//! [`TelemetrySynthesizer`] owns the engine run-state and produces one
//! [`EngineTelemetry`] snapshot per cycle, either fully simulated or shaped by
//! sensor readings acquired through [`SensorFrontEnd`].

pub mod model;
pub mod random;
pub mod replay;
pub mod run_state;
pub mod sensors;
pub mod synthesizer;

pub use model::{
    format_active_time, parse_active_time, EngineStatus, EngineTelemetry, PhaseStatus, SyncStatus,
};
pub use random::{RandomSource, SeededRandom};
pub use replay::{ReplaySensors, SensorSample};
pub use run_state::{EngineCommand, RunState, Transition};
pub use sensors::{
    rpm_from_pulses, FixedSensors, MeasuredInputs, PulseCounter, RpmWindow, SensorFrontEnd,
    SensorReadings, SensorSource,
};
pub use synthesizer::{next_fuel_level, SynthesizerSettings, TelemetrySynthesizer};

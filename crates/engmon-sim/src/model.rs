//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Engine telemetry snapshot and status enumerations."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Generator-to-grid phase relationship. Wire names follow the plant dashboard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
pub enum PhaseStatus {
    #[serde(rename = "SEFASA")]
    #[strum(serialize = "SEFASA")]
    InPhase,
    #[serde(rename = "TIDAK SEFASA")]
    #[strum(serialize = "TIDAK SEFASA")]
    OutOfPhase,
    #[serde(rename = "STOPPED")]
    #[strum(serialize = "STOPPED")]
    Stopped,
}

impl PhaseStatus {
    /// Flip between in-phase and out-of-phase; a stopped engine comes back in phase.
    pub fn toggled(self) -> Self {
        match self {
            PhaseStatus::InPhase => PhaseStatus::OutOfPhase,
            PhaseStatus::OutOfPhase | PhaseStatus::Stopped => PhaseStatus::InPhase,
        }
    }
}

/// Grid synchronisation state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
pub enum SyncStatus {
    #[serde(rename = "ON-GRID")]
    #[strum(serialize = "ON-GRID")]
    OnGrid,
    #[serde(rename = "OFF-GRID")]
    #[strum(serialize = "OFF-GRID")]
    OffGrid,
    #[serde(rename = "OFF")]
    #[strum(serialize = "OFF")]
    Off,
}

impl SyncStatus {
    pub fn toggled(self) -> Self {
        match self {
            SyncStatus::OnGrid => SyncStatus::OffGrid,
            SyncStatus::OffGrid | SyncStatus::Off => SyncStatus::OnGrid,
        }
    }
}

/// Authoritative run-state classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EngineStatus {
    Running,
    Stopped,
}

impl EngineStatus {
    /// Numeric code carried on the wire: 1 running, 0 stopped.
    pub fn code(self) -> u8 {
        match self {
            EngineStatus::Running => 1,
            EngineStatus::Stopped => 0,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EngineStatus::Running),
            0 => Some(EngineStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, EngineStatus::Running)
    }
}

/// One telemetry reading for a single publish cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTelemetry {
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts; `voltage * current` while running.
    pub power: f64,
    /// Hertz.
    pub frequency: f64,
    pub rpm: u32,
    /// PSI.
    pub oil_pressure: f64,
    /// Degrees Celsius.
    pub coolant_temp: f64,
    /// Degrees Celsius.
    pub intake_air_temp: f64,
    /// Percent of tank.
    pub fuel_level: f64,
    pub air_fuel_ratio: f64,
    /// kPa absolute.
    pub manifold_pressure: f64,
    /// Percent open.
    pub throttle_position: f64,
    pub phase: PhaseStatus,
    pub sync: SyncStatus,
    /// Run time since the last start; zero while stopped.
    pub active_time: Duration,
    pub engine_status: EngineStatus,
    /// Milliseconds since process start, stamped when the snapshot is published.
    pub timestamp_ms: u64,
}

impl EngineTelemetry {
    /// Copy of the snapshot carrying the publish timestamp.
    pub fn stamped(&self, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..self.clone()
        }
    }

    pub fn is_running(&self) -> bool {
        self.engine_status.is_running()
    }
}

impl Default for EngineTelemetry {
    fn default() -> Self {
        Self {
            voltage: 220.0,
            current: 15.0,
            power: 3_300.0,
            frequency: 50.0,
            rpm: 1_500,
            oil_pressure: 45.0,
            coolant_temp: 85.0,
            intake_air_temp: 35.0,
            fuel_level: 75.0,
            air_fuel_ratio: 14.7,
            manifold_pressure: 95.0,
            throttle_position: 20.0,
            phase: PhaseStatus::InPhase,
            sync: SyncStatus::OnGrid,
            active_time: Duration::ZERO,
            engine_status: EngineStatus::Running,
            timestamp_ms: 0,
        }
    }
}

/// Render as `"<hours>h <minutes>m"`; seconds are truncated.
pub fn format_active_time(active: Duration) -> String {
    let total_minutes = active.as_secs() / 60;
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

/// Inverse of [`format_active_time`], at minute resolution.
pub fn parse_active_time(text: &str) -> Option<Duration> {
    let (hours, minutes) = text.trim().split_once(' ')?;
    let hours: u64 = hours.strip_suffix('h')?.parse().ok()?;
    let minutes: u64 = minutes.strip_suffix('m')?.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some(Duration::from_secs((hours * 60 + minutes) * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_wire_names() {
        assert_eq!(PhaseStatus::OutOfPhase.to_string(), "TIDAK SEFASA");
        assert_eq!(SyncStatus::OffGrid.to_string(), "OFF-GRID");
        assert_eq!(
            PhaseStatus::from_str("SEFASA").unwrap(),
            PhaseStatus::InPhase
        );
        assert_eq!(SyncStatus::from_str("OFF").unwrap(), SyncStatus::Off);
        assert!(SyncStatus::from_str("on-grid").is_err());
        assert_eq!(
            serde_json::to_string(&PhaseStatus::Stopped).unwrap(),
            "\"STOPPED\""
        );
    }

    #[test]
    fn toggles_recover_from_stopped_profile() {
        assert_eq!(PhaseStatus::Stopped.toggled(), PhaseStatus::InPhase);
        assert_eq!(PhaseStatus::InPhase.toggled(), PhaseStatus::OutOfPhase);
        assert_eq!(SyncStatus::Off.toggled(), SyncStatus::OnGrid);
        assert_eq!(SyncStatus::OnGrid.toggled(), SyncStatus::OffGrid);
    }

    #[test]
    fn engine_status_codes() {
        assert_eq!(EngineStatus::Running.code(), 1);
        assert_eq!(EngineStatus::from_code(0), Some(EngineStatus::Stopped));
        assert_eq!(EngineStatus::from_code(7), None);
        assert_eq!(EngineStatus::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn active_time_formatting() {
        assert_eq!(format_active_time(Duration::ZERO), "0h 0m");
        assert_eq!(format_active_time(Duration::from_secs(59)), "0h 0m");
        assert_eq!(format_active_time(Duration::from_secs(3_725)), "1h 2m");
        assert_eq!(
            parse_active_time("1h 2m"),
            Some(Duration::from_secs(3_720))
        );
        assert_eq!(parse_active_time("1h 75m"), None);
        assert_eq!(parse_active_time("garbage"), None);
    }

    #[test]
    fn stamped_only_changes_timestamp() {
        let snapshot = EngineTelemetry::default();
        let stamped = snapshot.stamped(42);
        assert_eq!(stamped.timestamp_ms, 42);
        assert_eq!(stamped.rpm, snapshot.rpm);
    }
}

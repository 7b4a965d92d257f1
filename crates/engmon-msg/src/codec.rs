//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Canonical key-value telemetry message and JSON codec."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use engmon_sim::{
    format_active_time, parse_active_time, EngineStatus, EngineTelemetry, PhaseStatus, SyncStatus,
};
use serde::{Deserialize, Serialize};

use crate::{MessagingError, Result};

/// Wire form of one telemetry snapshot. Field names and order are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMessage {
    /// Volts, one decimal.
    pub volt: f64,
    /// Amperes, one decimal.
    pub amp: f64,
    /// Watts, whole.
    pub power: i64,
    /// Hertz, two decimals.
    pub freq: f64,
    /// Revolutions per minute.
    pub rpm: u32,
    /// Oil pressure in PSI, whole.
    pub oil: i64,
    /// Coolant temperature in °C, whole.
    pub coolant: i64,
    /// Intake air temperature in °C, whole.
    pub iat: i64,
    /// Fuel level percent, whole.
    pub fuel: i64,
    /// Phase status text.
    pub phase: PhaseStatus,
    /// Air-fuel ratio, one decimal.
    pub afr: f64,
    /// Manifold pressure in kPa, whole.
    pub map: i64,
    /// Throttle position percent, whole.
    pub tps: i64,
    /// Grid sync status text.
    pub sync: SyncStatus,
    /// `"<hours>h <minutes>m"`.
    #[serde(rename = "activeTime")]
    pub active_time: String,
    /// 1 running, 0 stopped.
    #[serde(rename = "engineStatus")]
    pub engine_status: u8,
    /// Milliseconds since process start.
    pub timestamp: u64,
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn whole(value: f64) -> i64 {
    value.round() as i64
}

impl From<&EngineTelemetry> for EngineMessage {
    fn from(snapshot: &EngineTelemetry) -> Self {
        Self {
            volt: round_to(snapshot.voltage, 1),
            amp: round_to(snapshot.current, 1),
            power: whole(snapshot.power),
            freq: round_to(snapshot.frequency, 2),
            rpm: snapshot.rpm,
            oil: whole(snapshot.oil_pressure),
            coolant: whole(snapshot.coolant_temp),
            iat: whole(snapshot.intake_air_temp),
            fuel: whole(snapshot.fuel_level),
            phase: snapshot.phase,
            afr: round_to(snapshot.air_fuel_ratio, 1),
            map: whole(snapshot.manifold_pressure),
            tps: whole(snapshot.throttle_position),
            sync: snapshot.sync,
            active_time: format_active_time(snapshot.active_time),
            engine_status: snapshot.engine_status.code(),
            timestamp: snapshot.timestamp_ms,
        }
    }
}

impl EngineMessage {
    /// Rebuild a snapshot at wire precision.
    pub fn to_telemetry(&self) -> Result<EngineTelemetry> {
        let active_time =
            parse_active_time(&self.active_time).ok_or_else(|| MessagingError::InvalidField {
                field: "activeTime",
                reason: format!("unparseable duration {:?}", self.active_time),
            })?;
        let engine_status =
            EngineStatus::from_code(self.engine_status).ok_or_else(|| MessagingError::InvalidField {
                field: "engineStatus",
                reason: format!("unknown status code {}", self.engine_status),
            })?;
        Ok(EngineTelemetry {
            voltage: self.volt,
            current: self.amp,
            power: self.power as f64,
            frequency: self.freq,
            rpm: self.rpm,
            oil_pressure: self.oil as f64,
            coolant_temp: self.coolant as f64,
            intake_air_temp: self.iat as f64,
            fuel_level: self.fuel as f64,
            air_fuel_ratio: self.afr,
            manifold_pressure: self.map as f64,
            throttle_position: self.tps as f64,
            phase: self.phase,
            sync: self.sync,
            active_time,
            engine_status,
            timestamp_ms: self.timestamp,
        })
    }
}

/// Serialize a snapshot into its wire payload.
pub fn encode(snapshot: &EngineTelemetry) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&EngineMessage::from(snapshot))?)
}

/// Parse a wire payload.
pub fn decode(payload: &[u8]) -> Result<EngineMessage> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn sample() -> EngineTelemetry {
        EngineTelemetry {
            voltage: 219.26,
            current: 17.349,
            power: 219.26 * 17.349,
            frequency: 50.123,
            rpm: 1_623,
            oil_pressure: 47.6,
            coolant_temp: 84.4,
            intake_air_temp: 30.5,
            fuel_level: 74.95,
            air_fuel_ratio: 14.26,
            manifold_pressure: 96.7,
            throttle_position: 22.2,
            phase: PhaseStatus::OutOfPhase,
            sync: SyncStatus::OnGrid,
            active_time: Duration::from_secs(3_725),
            engine_status: EngineStatus::Running,
            timestamp_ms: 123_456,
        }
    }

    #[test]
    fn encodes_stable_keys_with_declared_precision() {
        let payload = encode(&sample()).expect("encode");
        let value: Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(value["volt"], 219.3);
        assert_eq!(value["amp"], 17.3);
        assert_eq!(value["power"], 3804);
        assert_eq!(value["freq"], 50.12);
        assert_eq!(value["rpm"], 1623);
        assert_eq!(value["oil"], 48);
        assert_eq!(value["iat"], 31);
        assert_eq!(value["fuel"], 75);
        assert_eq!(value["afr"], 14.3);
        assert_eq!(value["map"], 97);
        assert_eq!(value["phase"], "TIDAK SEFASA");
        assert_eq!(value["sync"], "ON-GRID");
        assert_eq!(value["activeTime"], "1h 2m");
        assert_eq!(value["engineStatus"], 1);
        assert_eq!(value["timestamp"], 123_456);

        let text = String::from_utf8(payload).expect("utf8");
        let keys = [
            "volt", "amp", "power", "freq", "rpm", "oil", "coolant", "iat", "fuel", "phase", "afr",
            "map", "tps", "sync", "activeTime", "engineStatus", "timestamp",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|key| text.find(&format!("\"{key}\"")).expect("key present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn round_trip_matches_within_precision() {
        let snapshot = sample();
        let decoded = decode(&encode(&snapshot).expect("encode"))
            .expect("decode")
            .to_telemetry()
            .expect("telemetry");
        assert!((decoded.voltage - snapshot.voltage).abs() <= 0.05);
        assert!((decoded.current - snapshot.current).abs() <= 0.05);
        assert!((decoded.frequency - snapshot.frequency).abs() <= 0.005);
        assert!((decoded.power - snapshot.power).abs() <= 0.5);
        assert!((decoded.fuel_level - snapshot.fuel_level).abs() <= 0.5);
        assert_eq!(decoded.rpm, snapshot.rpm);
        assert_eq!(decoded.phase, snapshot.phase);
        assert_eq!(decoded.engine_status, snapshot.engine_status);
        assert_eq!(decoded.active_time, Duration::from_secs(3_720));
        assert_eq!(decoded.timestamp_ms, snapshot.timestamp_ms);
    }

    #[test]
    fn rejects_malformed_fields() {
        let mut message = EngineMessage::from(&sample());
        message.engine_status = 4;
        assert!(matches!(
            message.to_telemetry(),
            Err(MessagingError::InvalidField { field: "engineStatus", .. })
        ));
        assert!(decode(b"{\"volt\":1}").is_err());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_to(2.25, 1), 2.3);
        assert_eq!(round_to(-2.25, 1), -2.3);
        assert_eq!(round_to(49.9, 2), 49.9);
    }
}

//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Recorded sensor traces replayed through the acquisition front end."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;

use crate::sensors::{PulseCounter, SensorReadings, SensorSource};

/// One recorded row of calibrated readings plus the tachometer pulses seen since the previous row.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SensorSample {
    pub voltage: f64,
    pub current: f64,
    pub oil_pressure: f64,
    pub coolant_temp: f64,
    #[serde(default)]
    pub pulses: u64,
}

impl SensorSample {
    pub fn readings(&self) -> SensorReadings {
        SensorReadings {
            voltage: self.voltage,
            current: self.current,
            oil_pressure: self.oil_pressure,
            coolant_temp: self.coolant_temp,
        }
    }
}

/// Cycles through recorded samples, feeding each row's pulses into the shared counter.
#[derive(Debug, Clone)]
pub struct ReplaySensors {
    samples: Vec<SensorSample>,
    cursor: usize,
    counter: Arc<PulseCounter>,
}

impl ReplaySensors {
    pub fn new(samples: Vec<SensorSample>, counter: Arc<PulseCounter>) -> Result<Self> {
        anyhow::ensure!(!samples.is_empty(), "sensor replay requires at least one sample");
        Ok(Self {
            samples,
            cursor: 0,
            counter,
        })
    }

    pub fn from_path(path: &Path, counter: Arc<PulseCounter>) -> Result<Self> {
        let samples = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_json(path)?,
            Some("csv") => Self::load_csv(path)?,
            _ => anyhow::bail!("unsupported sensor replay format: {}", path.display()),
        };
        Self::new(samples, counter)
            .with_context(|| format!("sensor replay {} is empty", path.display()))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn next_sample(&mut self) -> SensorSample {
        let sample = self.samples[self.cursor];
        self.cursor = (self.cursor + 1) % self.samples.len();
        sample
    }

    fn load_json(path: &Path) -> Result<Vec<SensorSample>> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read sensor replay {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid sensor replay JSON {}", path.display()))
    }

    fn load_csv(path: &Path) -> Result<Vec<SensorSample>> {
        let file = fs::File::open(path)
            .with_context(|| format!("unable to open sensor replay csv {}", path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut samples = Vec::new();
        for row in reader.deserialize::<SensorSample>() {
            samples.push(
                row.with_context(|| format!("invalid sensor replay row in {}", path.display()))?,
            );
        }
        Ok(samples)
    }
}

impl SensorSource for ReplaySensors {
    fn read(&mut self) -> SensorReadings {
        let sample = self.next_sample();
        if sample.pulses > 0 {
            self.counter.record_pulses(sample.pulses);
        }
        sample.readings()
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn loads_json_samples_and_feeds_pulses() -> Result<()> {
        let mut file = Builder::new().suffix(".json").tempfile()?;
        writeln!(
            file,
            "{}",
            r#"[{"voltage":229.5,"current":14.2,"oil_pressure":47.0,"coolant_temp":82.0,"pulses":40}]"#
        )?;
        file.flush()?;
        let counter = PulseCounter::shared();
        let mut replay = ReplaySensors::from_path(file.path(), counter.clone())?;
        let readings = replay.read();
        assert_eq!(readings.voltage, 229.5);
        assert_eq!(counter.pending(), 40);
        Ok(())
    }

    #[test]
    fn loads_csv_samples_without_pulse_column() -> Result<()> {
        let mut file = Builder::new().suffix(".csv").tempfile()?;
        writeln!(file, "voltage,current,oil_pressure,coolant_temp")?;
        writeln!(file, "231.0,12.5,44.0,79.0")?;
        writeln!(file, "232.0,12.7,45.0,80.0")?;
        file.flush()?;
        let counter = PulseCounter::shared();
        let mut replay = ReplaySensors::from_path(file.path(), counter.clone())?;
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.read().coolant_temp, 79.0);
        assert_eq!(replay.read().coolant_temp, 80.0);
        assert_eq!(replay.read().coolant_temp, 79.0);
        assert_eq!(counter.pending(), 0);
        Ok(())
    }

    #[test]
    fn rejects_unknown_extension_and_empty_traces() -> Result<()> {
        let file = Builder::new().suffix(".yaml").tempfile()?;
        assert!(ReplaySensors::from_path(file.path(), PulseCounter::shared()).is_err());
        assert!(ReplaySensors::new(Vec::new(), PulseCounter::shared()).is_err());
        Ok(())
    }
}

//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Sensor acquisition front end: calibrated readings and pulse-derived RPM."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engmon_common::time::duration_to_millis;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Pulse counter shared with the tachometer interrupt handler.
///
/// The handler only increments; the main loop reads and resets in one atomic swap.
#[derive(Debug, Default)]
pub struct PulseCounter {
    pulses: AtomicU64,
}

impl PulseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Interrupt-handler entry point.
    pub fn record_pulse(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pulses(&self, count: u64) {
        self.pulses.fetch_add(count, Ordering::Relaxed);
    }

    /// Read-and-reset.
    pub fn take(&self) -> u64 {
        self.pulses.swap(0, Ordering::AcqRel)
    }

    pub fn pending(&self) -> u64 {
        self.pulses.load(Ordering::Acquire)
    }
}

/// `(pulses / pulses_per_revolution) * (60000 / window_ms)`, truncated.
pub fn rpm_from_pulses(pulses: u64, pulses_per_revolution: u32, window_ms: u64) -> u32 {
    if pulses_per_revolution == 0 || window_ms == 0 {
        return 0;
    }
    let revolutions = pulses as f64 / f64::from(pulses_per_revolution);
    let rpm = revolutions * (60_000.0 / window_ms as f64);
    rpm as u32
}

/// Converts accumulated pulses into RPM once per window.
#[derive(Debug, Clone)]
pub struct RpmWindow {
    pulses_per_revolution: u32,
    window: Duration,
    last_window_ms: u64,
    last_rpm: u32,
}

impl RpmWindow {
    pub fn new(pulses_per_revolution: u32, window: Duration) -> Self {
        Self::starting_at(pulses_per_revolution, window, 0)
    }

    pub fn starting_at(pulses_per_revolution: u32, window: Duration, origin_ms: u64) -> Self {
        Self {
            pulses_per_revolution,
            window,
            last_window_ms: origin_ms,
            last_rpm: 0,
        }
    }

    /// Before the window has elapsed the previous RPM is returned and the counter is left alone.
    pub fn sample(&mut self, now_ms: u64, counter: &PulseCounter) -> u32 {
        let elapsed = now_ms.saturating_sub(self.last_window_ms);
        if elapsed < duration_to_millis(self.window) {
            return self.last_rpm;
        }
        let pulses = counter.take();
        self.last_rpm = rpm_from_pulses(pulses, self.pulses_per_revolution, elapsed);
        self.last_window_ms = now_ms;
        trace!(pulses, elapsed_ms = elapsed, rpm = self.last_rpm, "rpm window closed");
        self.last_rpm
    }

    pub fn last_rpm(&self) -> u32 {
        self.last_rpm
    }
}

/// Calibrated scalar readings supplied by the acquisition hardware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub voltage: f64,
    pub current: f64,
    pub oil_pressure: f64,
    pub coolant_temp: f64,
}

/// Source of calibrated readings. Out-of-range values pass through uncorrected.
pub trait SensorSource: Send {
    fn read(&mut self) -> SensorReadings;

    /// Human-readable source name for logging.
    fn name(&self) -> &'static str;
}

/// Constant readings, mainly for tests and bench setups.
#[derive(Debug, Clone, Copy)]
pub struct FixedSensors {
    readings: SensorReadings,
}

impl FixedSensors {
    pub fn new(readings: SensorReadings) -> Self {
        Self { readings }
    }
}

impl SensorSource for FixedSensors {
    fn read(&mut self) -> SensorReadings {
        self.readings
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Everything measured for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredInputs {
    pub readings: SensorReadings,
    pub rpm: u32,
}

/// Pairs a [`SensorSource`] with the pulse counter and RPM window.
pub struct SensorFrontEnd {
    source: Box<dyn SensorSource>,
    counter: Arc<PulseCounter>,
    window: RpmWindow,
}

impl SensorFrontEnd {
    pub fn new(source: Box<dyn SensorSource>, counter: Arc<PulseCounter>, window: RpmWindow) -> Self {
        Self {
            source,
            counter,
            window,
        }
    }

    /// Handle for whatever feeds pulses (interrupt handler, replay, tests).
    pub fn counter(&self) -> Arc<PulseCounter> {
        self.counter.clone()
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn acquire(&mut self, now_ms: u64) -> MeasuredInputs {
        let readings = self.source.read();
        let rpm = self.window.sample(now_ms, &self.counter);
        MeasuredInputs { readings, rpm }
    }
}

impl std::fmt::Debug for SensorFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorFrontEnd")
            .field("source", &self.source.name())
            .field("pending_pulses", &self.counter.pending())
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn twenty_pulses_over_one_second_is_600_rpm() {
        let counter = PulseCounter::new();
        for _ in 0..20 {
            counter.record_pulse();
        }
        let mut window = RpmWindow::new(2, Duration::from_millis(1_000));
        assert_eq!(window.sample(1_000, &counter), 600);
        assert_eq!(counter.pending(), 0);
    }

    #[test]
    fn window_holds_previous_value_until_elapsed() {
        let counter = PulseCounter::new();
        let mut window = RpmWindow::new(2, Duration::from_millis(1_000));
        counter.record_pulses(40);
        assert_eq!(window.sample(1_000, &counter), 1_200);
        counter.record_pulses(10);
        assert_eq!(window.sample(1_500, &counter), 1_200);
        assert_eq!(counter.pending(), 10);
        assert_eq!(window.sample(2_000, &counter), 300);
    }

    #[test]
    fn long_windows_scale_by_elapsed_time() {
        assert_eq!(rpm_from_pulses(100, 2, 5_000), 600);
        assert_eq!(rpm_from_pulses(100, 0, 5_000), 0);
        assert_eq!(rpm_from_pulses(100, 2, 0), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = PulseCounter::shared();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        counter.record_pulse();
                    }
                })
            })
            .collect();
        let mut drained = 0;
        for handle in handles {
            drained += counter.take();
            handle.join().expect("pulse thread");
        }
        drained += counter.take();
        assert_eq!(drained, 40_000);
    }

    #[test]
    fn front_end_reads_source_and_window() {
        let readings = SensorReadings {
            voltage: 231.0,
            current: 12.0,
            oil_pressure: 48.0,
            coolant_temp: 80.0,
        };
        let counter = PulseCounter::shared();
        let mut front_end = SensorFrontEnd::new(
            Box::new(FixedSensors::new(readings)),
            counter.clone(),
            RpmWindow::new(2, Duration::from_millis(1_000)),
        );
        counter.record_pulses(50);
        let measured = front_end.acquire(1_000);
        assert_eq!(measured.readings, readings);
        assert_eq!(measured.rpm, 1_500);
        assert_eq!(front_end.source_name(), "fixed");
    }
}

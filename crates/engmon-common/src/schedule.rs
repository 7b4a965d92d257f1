//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Elapsed-time cycle gating for the telemetry loop."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use crate::time::duration_to_millis;

/// True once at least `interval` has elapsed since `last_cycle_ms`.
pub fn due_for_cycle(now_ms: u64, last_cycle_ms: u64, interval: Duration) -> bool {
    now_ms.saturating_sub(last_cycle_ms) >= duration_to_millis(interval)
}

/// Elapsed-time scheduler. An overrun fires on the next check and re-anchors
/// at that moment, so late cycles never burst to catch up.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    interval: Duration,
    last_cycle_ms: u64,
    fired: u64,
}

impl CycleScheduler {
    /// The first cycle becomes due one interval after time zero.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, 0)
    }

    pub fn starting_at(interval: Duration, origin_ms: u64) -> Self {
        Self {
            interval,
            last_cycle_ms: origin_ms,
            fired: 0,
        }
    }

    /// Returns `true` and records the cycle when one is due at `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !due_for_cycle(now_ms, self.last_cycle_ms, self.interval) {
            return false;
        }
        let late_by = now_ms
            .saturating_sub(self.last_cycle_ms)
            .saturating_sub(duration_to_millis(self.interval));
        if late_by > duration_to_millis(self.interval) {
            tracing::debug!(late_by_ms = late_by, "telemetry cycle overran its interval");
        }
        self.last_cycle_ms = now_ms;
        self.fired += 1;
        true
    }

    /// Time remaining until the next cycle is due.
    pub fn until_due(&self, now_ms: u64) -> Duration {
        let next = self
            .last_cycle_ms
            .saturating_add(duration_to_millis(self.interval));
        Duration::from_millis(next.saturating_sub(now_ms))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_cycle_ms(&self) -> u64 {
        self.last_cycle_ms
    }

    pub fn cycles_fired(&self) -> u64 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_only_after_full_interval() {
        let interval = Duration::from_millis(2_000);
        assert!(!due_for_cycle(1_999, 0, interval));
        assert!(due_for_cycle(2_000, 0, interval));
        assert!(!due_for_cycle(100, 500, interval));
    }

    #[test]
    fn fires_once_per_interval() {
        let mut scheduler = CycleScheduler::new(Duration::from_millis(2_000));
        let fired: Vec<u64> = (0..=6_000)
            .step_by(100)
            .filter(|now| scheduler.poll(*now))
            .collect();
        assert_eq!(fired, vec![2_000, 4_000, 6_000]);
    }

    #[test]
    fn overrun_fires_immediately_without_catch_up_burst() {
        let mut scheduler = CycleScheduler::new(Duration::from_millis(2_000));
        assert!(scheduler.poll(9_000));
        assert!(!scheduler.poll(9_100));
        assert!(!scheduler.poll(10_999));
        assert!(scheduler.poll(11_000));
        assert_eq!(scheduler.cycles_fired(), 2);
    }

    #[test]
    fn cycles_2100ms_apart_fire_twice() {
        let mut scheduler = CycleScheduler::new(Duration::from_millis(2_000));
        assert!(scheduler.poll(2_100));
        assert!(scheduler.poll(4_200));
        assert_eq!(scheduler.cycles_fired(), 2);
        assert_eq!(scheduler.until_due(4_200), Duration::from_millis(2_000));
    }
}

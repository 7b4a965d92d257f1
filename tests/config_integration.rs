//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shipped configuration and demo data stay loadable."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use engmon_common::{AppConfig, Variant};
use engmon_sim::{PulseCounter, ReplaySensors};

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

fn load(relative: &str) -> AppConfig {
    let raw = std::fs::read_to_string(repo_path(relative)).expect("config present");
    raw.parse().expect("config parses and validates")
}

#[test]
fn example_config_matches_simulated_profile() {
    let config = load("configs/engmond.example.toml");
    assert_eq!(config.telemetry.variant, Variant::Simulated);
    assert_eq!(config.telemetry.effective_interval(), Duration::from_secs(2));
    assert_eq!(config.broker.keep_alive, Duration::from_secs(15));
    assert_eq!(config.topics.commands, "engine/commands");
    assert_eq!(config.network.association_attempts, 20);
    assert_eq!(config.retry.backoff, Duration::from_secs(5));
    assert!(!config.metrics.enabled);
}

#[test]
fn sensor_profile_uses_slower_interval_and_replay() {
    let config = load("configs/engmond.sensor.toml");
    assert_eq!(config.telemetry.variant, Variant::Sensor);
    assert_eq!(config.telemetry.effective_interval(), Duration::from_secs(5));
    assert_eq!(config.telemetry.effective_fuel_rate(), 0.1);
    assert!(config.telemetry.sensor.start_running);

    let replay = config
        .telemetry
        .sensor
        .replay_file
        .expect("replay file configured");
    let sensors = ReplaySensors::from_path(&repo_path(&replay.to_string_lossy()), PulseCounter::shared())
        .expect("demo replay loads");
    assert_eq!(sensors.len(), 6);
}

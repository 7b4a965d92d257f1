//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Layered TOML and environment configuration for the engine monitor."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::retry::{Backoff, RetryPolicy};

fn default_broker_host() -> String {
    "localhost".to_owned()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "engine-telemetry-".to_owned()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(15)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_data_topic() -> String {
    "engine/data".to_owned()
}

fn default_debug_topic() -> String {
    "engine/debug".to_owned()
}

fn default_status_topic() -> String {
    "engine/status".to_owned()
}

fn default_commands_topic() -> String {
    "engine/commands".to_owned()
}

fn default_announcement() -> String {
    "Engine telemetry publisher connected".to_owned()
}

fn default_association_attempts() -> u32 {
    20
}

fn default_association_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_loop_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_initial_fuel() -> f64 {
    75.0
}

fn default_pulses_per_revolution() -> u32 {
    2
}

fn default_rpm_window() -> Duration {
    Duration::from_millis(1_000)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Primary configuration object for the engine monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when only built-in defaults and environment overrides applied.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ENGMON_CONFIG";
    pub const ENV_PREFIX: &'static str = "ENGMON";

    /// Load configuration from the first existing candidate, layering `ENGMON_*` overrides.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Like [`AppConfig::load`], also reporting the file that was used.
    ///
    /// `ENGMON_CONFIG` takes precedence over the candidates and must exist when set.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        let source = match std::env::var(Self::ENV_CONFIG_PATH) {
            Ok(env_path) if !env_path.trim().is_empty() => {
                let path = PathBuf::from(env_path);
                if !path.exists() {
                    return Err(anyhow!(
                        "{} points at missing file {}",
                        Self::ENV_CONFIG_PATH,
                        path.display()
                    ));
                }
                Some(path)
            }
            _ => candidates
                .iter()
                .map(|candidate| candidate.as_ref())
                .find(|candidate| candidate.exists())
                .map(Path::to_path_buf),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = &source {
            debug!(config_path = %path.display(), "loading configuration");
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        } else {
            debug!("no configuration file found; using defaults");
        }
        builder = builder.add_source(
            config::Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "failed to assemble configuration sources")?;
        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| match &source {
                Some(path) => format!("failed to parse config file {}", path.display()),
                None => "failed to parse configuration overrides".to_owned(),
            })?;
        config.validate()?;
        Ok(LoadedAppConfig { config, source })
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.topics.validate()?;
        self.telemetry.validate()?;
        if self.network.association_attempts == 0 {
            return Err(anyhow!("network.association_attempts must be at least 1"));
        }
        if let Some(0) = self.retry.max_attempts {
            return Err(anyhow!("retry.max_attempts must be at least 1 when set"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Broker endpoint and session parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// A random hex suffix is appended on every handshake attempt.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive", rename = "keep_alive_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default = "default_publish_timeout", rename = "publish_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub publish_timeout: Duration,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("broker.host must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("broker.port must be non-zero"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            publish_timeout: default_publish_timeout(),
        }
    }
}

/// Channel names used on the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicConfig {
    #[serde(default = "default_data_topic")]
    pub data: String,
    #[serde(default = "default_debug_topic")]
    pub debug: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
    #[serde(default = "default_commands_topic")]
    pub commands: String,
    /// Free-text payload published on `status` after each handshake.
    #[serde(default = "default_announcement")]
    pub announcement: String,
}

impl TopicConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, topic) in [
            ("data", &self.data),
            ("debug", &self.debug),
            ("status", &self.status),
            ("commands", &self.commands),
        ] {
            if topic.trim().is_empty() {
                return Err(anyhow!("topics.{} must not be empty", name));
            }
        }
        Ok(())
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            data: default_data_topic(),
            debug: default_debug_topic(),
            status: default_status_topic(),
            commands: default_commands_topic(),
            announcement: default_announcement(),
        }
    }
}

/// Network association parameters. Association itself is handled by the platform.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_association_attempts")]
    pub association_attempts: u32,
    #[serde(
        default = "default_association_interval",
        rename = "association_interval_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub association_interval: Duration,
}

impl NetworkConfig {
    pub fn association_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.association_attempts,
            Backoff::Fixed(self.association_interval),
        )
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: None,
            passphrase: None,
            association_attempts: default_association_attempts(),
            association_interval: default_association_interval(),
        }
    }
}

/// Telemetry source variant.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Every field is synthesized; the engine starts running.
    #[default]
    Simulated,
    /// Electrical, oil, coolant and RPM readings come from sensors.
    Sensor,
}

impl Variant {
    /// Deployment profile publish interval.
    pub fn default_publish_interval(&self) -> Duration {
        match self {
            Variant::Simulated => Duration::from_secs(2),
            Variant::Sensor => Duration::from_secs(5),
        }
    }

    /// Fuel percentage consumed per running cycle.
    pub fn default_fuel_consumption_rate(&self) -> f64 {
        match self {
            Variant::Simulated => 0.05,
            Variant::Sensor => 0.1,
        }
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" => Ok(Variant::Simulated),
            "sensor" => Ok(Variant::Sensor),
            other => Err(format!("unknown telemetry variant: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub variant: Variant,
    /// Overrides the variant's profile interval.
    #[serde(default, rename = "publish_interval_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub publish_interval: Option<Duration>,
    /// Pause between loop iterations while waiting for the next cycle.
    #[serde(default = "default_loop_delay", rename = "loop_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub loop_delay: Duration,
    /// Fixed seed for reproducible runs. A random seed is drawn when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub fuel_consumption_rate: Option<f64>,
    #[serde(default = "default_initial_fuel")]
    pub initial_fuel: f64,
    #[serde(default)]
    pub sensor: SensorConfig,
}

impl TelemetryConfig {
    pub fn effective_interval(&self) -> Duration {
        self.publish_interval
            .unwrap_or_else(|| self.variant.default_publish_interval())
    }

    pub fn effective_fuel_rate(&self) -> f64 {
        self.fuel_consumption_rate
            .unwrap_or_else(|| self.variant.default_fuel_consumption_rate())
    }

    pub fn validate(&self) -> Result<()> {
        if self.effective_interval().is_zero() {
            return Err(anyhow!("telemetry.publish_interval_ms must be non-zero"));
        }
        let rate = self.effective_fuel_rate();
        if !(rate > 0.0 && rate < 100.0) {
            return Err(anyhow!(
                "telemetry.fuel_consumption_rate must be within (0, 100), got {}",
                rate
            ));
        }
        if !(0.0..=100.0).contains(&self.initial_fuel) {
            return Err(anyhow!(
                "telemetry.initial_fuel must be within [0, 100], got {}",
                self.initial_fuel
            ));
        }
        self.sensor.validate()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            publish_interval: None,
            loop_delay: default_loop_delay(),
            seed: None,
            fuel_consumption_rate: None,
            initial_fuel: default_initial_fuel(),
            sensor: SensorConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// JSON or CSV file of calibrated readings replayed in order.
    #[serde(default)]
    pub replay_file: Option<PathBuf>,
    #[serde(default = "default_pulses_per_revolution")]
    pub pulses_per_revolution: u32,
    #[serde(default = "default_rpm_window", rename = "rpm_window_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rpm_window: Duration,
    #[serde(default)]
    pub start_running: bool,
}

impl SensorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pulses_per_revolution == 0 {
            return Err(anyhow!(
                "telemetry.sensor.pulses_per_revolution must be at least 1"
            ));
        }
        if self.rpm_window.is_zero() {
            return Err(anyhow!("telemetry.sensor.rpm_window_ms must be non-zero"));
        }
        Ok(())
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            replay_file: None,
            pulses_per_revolution: default_pulses_per_revolution(),
            rpm_window: default_rpm_window(),
            start_running: false,
        }
    }
}

/// Session re-establishment strategy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_backoff", rename = "backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff: Duration,
    /// Switches to exponential backoff capped at this value.
    #[serde(default, rename = "max_backoff_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub max_backoff: Option<Duration>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let backoff = match self.max_backoff {
            Some(max) => Backoff::Exponential {
                base: self.backoff,
                max,
            },
            None => Backoff::Fixed(self.backoff),
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: default_retry_backoff(),
            max_backoff: None,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Rolling file output is enabled when set.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

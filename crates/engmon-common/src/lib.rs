//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Common crate exports: configuration, logging, clocks, scheduling, retry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the engine monitor workspace.
//! This crate exposes configuration loading, logging, clocks, cycle scheduling,
//! and retry policies consumed across the workspace.

pub mod config;
pub mod logging;
pub mod retry;
pub mod schedule;
pub mod time;

pub use self::config::{
    AppConfig, BrokerConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, NetworkConfig,
    RetryConfig, SensorConfig, TelemetryConfig, TopicConfig, Variant,
};
pub use logging::{init_tracing, LogFormat};
pub use retry::{Backoff, RetryPolicy};
pub use schedule::{due_for_cycle, CycleScheduler};
pub use time::{Clock, ManualClock, MonotonicClock, SharedClock};

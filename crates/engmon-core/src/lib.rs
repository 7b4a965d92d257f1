//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Engine monitor control loop exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! The cooperative control loop: network association, broker session,
//! command intake, scheduling, synthesis and publishing in strict sequence.

pub mod error;
pub mod monitor;
pub mod network;

pub use error::MonitorError;
pub use monitor::{EngineMonitor, MonitorMetrics, RunSummary, StepOutcome, TelemetrySource};
pub use network::{
    ensure_associated, AssociationError, HostNetwork, LoopbackNetwork, NetworkAssociation,
};

//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Errors that end the engine monitor control loop."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use engmon_msg::ConnectError;
use thiserror::Error;

/// Failures the control loop cannot recover from on its own.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Network association did not succeed within its bounded attempt count.
    #[error("network association failed after {attempts} attempts: {reason}")]
    AssociationFailed { attempts: u32, reason: String },
    /// A bounded session retry policy ran out.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl MonitorError {
    /// Whether the process should exit so its supervisor can restart it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::AssociationFailed { .. })
    }
}

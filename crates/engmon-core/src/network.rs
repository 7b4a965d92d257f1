//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Network association supervision ahead of broker sessions."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use engmon_common::time::duration_to_millis;
use engmon_common::{Clock, NetworkConfig, RetryPolicy};
use tokio::net::lookup_host;
use tracing::{debug, error, info, warn};

use crate::error::MonitorError;

/// Failure reported by a single association attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AssociationError(pub String);

/// Link-layer connectivity that must exist before a broker session can be attempted.
#[async_trait]
pub trait NetworkAssociation: Send {
    /// Whether the network is currently usable.
    async fn is_associated(&mut self) -> bool;

    /// One association attempt.
    async fn associate(&mut self) -> Result<(), AssociationError>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Host networking: associated when the broker host resolves.
#[derive(Debug, Clone)]
pub struct HostNetwork {
    broker_host: String,
    broker_port: u16,
    ssid: Option<String>,
}

impl HostNetwork {
    pub fn new(broker_host: impl Into<String>, broker_port: u16) -> Self {
        Self {
            broker_host: broker_host.into(),
            broker_port,
            ssid: None,
        }
    }

    /// Carry the configured network name for logging.
    pub fn with_network(mut self, network: &NetworkConfig) -> Self {
        self.ssid = network.ssid.clone();
        self
    }

    async fn resolve(&self) -> Result<usize, AssociationError> {
        let addrs = lookup_host((self.broker_host.as_str(), self.broker_port))
            .await
            .map_err(|err| AssociationError(format!("cannot resolve {}: {err}", self.broker_host)))?;
        let count = addrs.count();
        if count == 0 {
            return Err(AssociationError(format!(
                "{} resolved to no addresses",
                self.broker_host
            )));
        }
        Ok(count)
    }
}

#[async_trait]
impl NetworkAssociation for HostNetwork {
    async fn is_associated(&mut self) -> bool {
        self.resolve().await.is_ok()
    }

    async fn associate(&mut self) -> Result<(), AssociationError> {
        let addresses = self.resolve().await?;
        debug!(
            host = %self.broker_host,
            ssid = self.ssid.as_deref().unwrap_or("host"),
            addresses,
            "broker host reachable"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

/// Always associated; used with the loopback broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackNetwork;

#[async_trait]
impl NetworkAssociation for LoopbackNetwork {
    async fn is_associated(&mut self) -> bool {
        true
    }

    async fn associate(&mut self) -> Result<(), AssociationError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Make sure the network is associated, retrying within `policy`.
///
/// Returns the number of association attempts made (0 when already associated).
/// Exhausting a bounded policy is fatal for the process.
pub async fn ensure_associated(
    network: &mut dyn NetworkAssociation,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<u32, MonitorError> {
    if network.is_associated().await {
        return Ok(0);
    }
    info!(network = network.name(), "associating network");

    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match network.associate().await {
            Ok(()) => {
                info!(network = network.name(), attempts = attempt, "network associated");
                return Ok(attempt);
            }
            Err(err) => {
                if !policy.allows(attempt.saturating_add(1)) {
                    error!(attempts = attempt, error = %err, "network association failed");
                    return Err(MonitorError::AssociationFailed {
                        attempts: attempt,
                        reason: err.0,
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = duration_to_millis(delay),
                    "network not associated yet"
                );
                clock.sleep(delay).await;
            }
        }
    }
}

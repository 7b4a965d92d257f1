//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Broker messaging module exports and error types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Broker-facing half of the engine monitor: the wire codec, the
//! [`BrokerLink`] abstraction with in-memory and MQTT implementations, the
//! [`ConnectionManager`] reconnect discipline, command interpretation and
//! telemetry publishing.
#![warn(missing_docs)]

pub mod codec;
pub mod commands;
pub mod link;
pub mod metrics;
pub mod mqtt;
pub mod publisher;
pub mod session;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A decoded field carried a value outside its domain.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Wire name of the field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

pub use codec::{decode, encode, round_to, EngineMessage};
pub use commands::CommandChannel;
pub use link::{BrokerLink, Credentials, InMemoryBroker, InMemoryLink, Inbound, LinkError, PublishedMessage};
pub use metrics::MessagingMetrics;
pub use mqtt::{MqttLink, MqttSettings};
pub use publisher::{PublishAck, PublishFailure, Publisher};
pub use session::{ConnectError, ConnectionManager, Session, SessionSettings};

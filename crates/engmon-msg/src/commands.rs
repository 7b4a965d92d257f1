//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Inbound run-state command interpretation."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;

use engmon_sim::EngineCommand;
use tracing::{debug, info, warn};

use crate::link::Inbound;
use crate::metrics::MessagingMetrics;

const INVALID_LABEL: &str = "invalid";

/// Turns inbound `(topic, payload)` pairs into [`EngineCommand`]s.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    topic: String,
    metrics: Option<MessagingMetrics>,
}

impl CommandChannel {
    /// Accept commands published on `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            metrics: None,
        }
    }

    /// Count every command by outcome.
    pub fn with_metrics(mut self, metrics: MessagingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Topic this channel listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Exact-match `START` / `STOP`; anything else is logged and ignored.
    pub fn interpret(&self, message: &Inbound) -> Option<EngineCommand> {
        if message.topic != self.topic {
            debug!(topic = %message.topic, "ignoring message outside the command topic");
            return None;
        }
        let command = message
            .payload_str()
            .and_then(|text| EngineCommand::from_str(text).ok());
        match command {
            Some(command) => {
                info!(%command, "command received");
                self.observe(&command.to_string());
                Some(command)
            }
            None => {
                warn!(
                    payload = %String::from_utf8_lossy(&message.payload),
                    "ignoring unrecognised command"
                );
                self.observe(INVALID_LABEL);
                None
            }
        }
    }

    /// Interpret a batch in arrival order.
    pub fn drain(&self, messages: Vec<Inbound>) -> Vec<EngineCommand> {
        messages
            .iter()
            .filter_map(|message| self.interpret(message))
            .collect()
    }

    fn observe(&self, label: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_command(label);
        }
    }
}

//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Broker link abstraction and the in-memory loopback broker."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

/// Message delivered from the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Inbound {
    /// Build an inbound message from text.
    pub fn text(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into().into_bytes(),
        }
    }

    /// Payload as UTF-8, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Username/password presented during the broker handshake.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Broker username.
    pub username: Option<String>,
    /// Broker password.
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport-level failures reported by a [`BrokerLink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Operation attempted without a live session.
    #[error("broker link is not connected")]
    NotConnected,
    /// Broker refused the handshake.
    #[error("broker rejected the handshake: {0}")]
    Rejected(String),
    /// Broker did not respond in time.
    #[error("broker did not respond within {0:?}")]
    Timeout(Duration),
    /// Underlying connection failed or was closed.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
    /// Client-side request could not be queued.
    #[error("broker client request failed: {0}")]
    Client(String),
}

/// Publish/subscribe session with a message broker.
///
/// Implementations report failures as values; after any connection error
/// [`BrokerLink::is_connected`] must return `false` so the next
/// `ensure_connected` performs a fresh handshake.
#[async_trait]
pub trait BrokerLink: Send {
    /// Perform a clean-session handshake under `client_id`.
    async fn connect(&mut self, client_id: &str, credentials: &Credentials) -> Result<(), LinkError>;

    /// Whether the last handshake is still believed live.
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;

    /// Subscribe to inbound messages on `topic`.
    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError>;

    /// Service the connection for up to `budget`, returning messages received meanwhile.
    async fn poll(&mut self, budget: Duration) -> Result<Vec<Inbound>, LinkError>;

    /// Close the session, ignoring errors.
    async fn disconnect(&mut self);

    /// Human-readable link name for logging.
    fn name(&self) -> &'static str;
}

/// A message recorded by the [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Session that published the message.
    pub client_id: String,
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

const RETAINED_MESSAGES: usize = 4_096;

#[derive(Debug, Default)]
struct BrokerState {
    published: VecDeque<PublishedMessage>,
    published_total: u64,
    handshakes: u32,
    client_ids: Vec<String>,
    epoch: u64,
    connect_failures: u32,
    publish_failures: HashMap<String, u32>,
    pending: VecDeque<Inbound>,
}

/// Loopback broker hub for tests and dry runs.
///
/// Cloning shares the hub. Failure injection applies to whichever link acts next.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// New link attached to this hub.
    pub fn link(&self) -> InMemoryLink {
        InMemoryLink {
            broker: self.clone(),
            session: None,
            subscriptions: Vec::new(),
            echo: false,
        }
    }

    /// Refuse the next `count` handshakes.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Reject the next `count` publishes on `topic`.
    pub fn fail_next_publishes(&self, topic: &str, count: u32) {
        self.state
            .lock()
            .publish_failures
            .insert(topic.to_string(), count);
    }

    /// Silently invalidate every live session.
    pub fn drop_sessions(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        debug!(epoch = state.epoch, "in-memory broker dropped sessions");
    }

    /// Queue a message for delivery to subscribed links.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state.lock().pending.push_back(Inbound::text(topic, payload));
    }

    /// Recently published messages, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.iter().cloned().collect()
    }

    /// Recently published messages on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Total publishes accepted since creation.
    pub fn published_total(&self) -> u64 {
        self.state.lock().published_total
    }

    /// Handshakes attempted, successful or not.
    pub fn handshakes(&self) -> u32 {
        self.state.lock().handshakes
    }

    /// Client ids presented, in handshake order.
    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().client_ids.clone()
    }
}

/// [`BrokerLink`] attached to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryLink {
    broker: InMemoryBroker,
    session: Option<(String, u64)>,
    subscriptions: Vec<String>,
    echo: bool,
}

impl InMemoryLink {
    /// Log every published payload at `info`.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn live_client_id(&self) -> Result<String, LinkError> {
        match &self.session {
            Some((client_id, epoch)) if *epoch == self.broker.state.lock().epoch => {
                Ok(client_id.clone())
            }
            _ => Err(LinkError::NotConnected),
        }
    }
}

#[async_trait]
impl BrokerLink for InMemoryLink {
    async fn connect(&mut self, client_id: &str, _credentials: &Credentials) -> Result<(), LinkError> {
        let mut state = self.broker.state.lock();
        state.handshakes += 1;
        state.client_ids.push(client_id.to_string());
        self.subscriptions.clear();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            self.session = None;
            return Err(LinkError::Rejected("injected handshake failure".into()));
        }
        self.session = Some((client_id.to_string(), state.epoch));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live_client_id().is_ok()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        let client_id = self.live_client_id()?;
        let mut state = self.broker.state.lock();
        if let Some(remaining) = state.publish_failures.get_mut(topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LinkError::Timeout(Duration::ZERO));
            }
        }
        if self.echo {
            info!(
                topic,
                payload = %String::from_utf8_lossy(payload),
                "loopback publish"
            );
        }
        if state.published.len() == RETAINED_MESSAGES {
            state.published.pop_front();
        }
        state.published.push_back(PublishedMessage {
            client_id,
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        state.published_total += 1;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        self.live_client_id()?;
        if !self.subscriptions.iter().any(|existing| existing == topic) {
            self.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn poll(&mut self, _budget: Duration) -> Result<Vec<Inbound>, LinkError> {
        if self.live_client_id().is_err() {
            return Err(LinkError::ConnectionLost("session dropped by broker".into()));
        }
        let mut state = self.broker.state.lock();
        let mut delivered = Vec::new();
        let mut undelivered = VecDeque::new();
        while let Some(message) = state.pending.pop_front() {
            if self.subscriptions.contains(&message.topic) {
                delivered.push(message);
            } else {
                trace!(topic = %message.topic, "no subscriber for injected message");
                undelivered.push_back(message);
            }
        }
        state.pending = undelivered;
        Ok(delivered)
    }

    async fn disconnect(&mut self) {
        self.session = None;
        self.subscriptions.clear();
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Broker session establishment, validation, and reconnect discipline."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use engmon_common::time::duration_to_millis;
use engmon_common::{BrokerConfig, RetryPolicy, SharedClock, TopicConfig};
use engmon_sim::RandomSource;
use tracing::{debug, info, warn};

use crate::link::{BrokerLink, Credentials, Inbound, LinkError};
use crate::metrics::MessagingMetrics;

/// Identity and topics used when establishing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Prefix for generated client ids.
    pub client_id_prefix: String,
    /// Handshake credentials.
    pub credentials: Credentials,
    /// Topic receiving the connect announcement.
    pub status_topic: String,
    /// Announcement payload.
    pub announcement: String,
    /// Topic carrying inbound commands.
    pub commands_topic: String,
}

impl SessionSettings {
    /// Build settings from the broker and topic configuration sections.
    pub fn from_config(broker: &BrokerConfig, topics: &TopicConfig) -> Self {
        Self {
            client_id_prefix: broker.client_id_prefix.clone(),
            credentials: Credentials {
                username: broker.username.clone(),
                password: broker.password.clone(),
            },
            status_topic: topics.status.clone(),
            announcement: topics.announcement.clone(),
            commands_topic: topics.commands.clone(),
        }
    }
}

/// A live broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Client id presented in the handshake.
    pub client_id: String,
    /// Increments with every established session.
    pub generation: u64,
    /// Clock reading when the handshake completed.
    pub established_at_ms: u64,
}

/// Failure to establish a session under a bounded retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Every permitted attempt failed.
    #[error("broker session not established after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure reported by the final attempt.
        last_error: LinkError,
    },
}

/// Owns the broker link and guarantees a live session before each publish.
pub struct ConnectionManager {
    link: Box<dyn BrokerLink>,
    clock: SharedClock,
    policy: RetryPolicy,
    rng: Box<dyn RandomSource>,
    settings: SessionSettings,
    session: Option<Session>,
    generation: u64,
    metrics: Option<MessagingMetrics>,
}

impl ConnectionManager {
    /// Create a manager; no handshake happens until [`ConnectionManager::ensure_connected`].
    pub fn new(
        link: Box<dyn BrokerLink>,
        clock: SharedClock,
        policy: RetryPolicy,
        rng: Box<dyn RandomSource>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            link,
            clock,
            policy,
            rng,
            settings,
            session: None,
            generation: 0,
            metrics: None,
        }
    }

    /// Record session attempts and establishments.
    pub fn with_metrics(mut self, metrics: MessagingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current session, if it is still live.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|_| self.link.is_connected())
    }

    /// Whether a session exists and the link still reports it live.
    pub fn is_live(&self) -> bool {
        self.session().is_some()
    }

    /// Link for publishing within the current session.
    pub fn link_mut(&mut self) -> &mut dyn BrokerLink {
        self.link.as_mut()
    }

    /// Return the live session, or block retrying until one is established.
    ///
    /// Each attempt uses a fresh client id, announces on the status topic and
    /// subscribes to the commands topic. Returns an error only when the retry
    /// policy is bounded and exhausted.
    pub async fn ensure_connected(&mut self) -> Result<Session, ConnectError> {
        if let Some(session) = self.session() {
            return Ok(session.clone());
        }
        if let Some(stale) = self.session.take() {
            warn!(
                client_id = %stale.client_id,
                generation = stale.generation,
                "broker session lost"
            );
            self.link.disconnect().await;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let client_id = format!(
                "{}{:x}",
                self.settings.client_id_prefix,
                self.rng.session_suffix()
            );
            if let Some(metrics) = &self.metrics {
                metrics.observe_session_attempt();
            }
            info!(attempt, %client_id, link = self.link.name(), "attempting broker session");

            match self.establish(&client_id).await {
                Ok(()) => {
                    self.generation += 1;
                    let session = Session {
                        client_id,
                        generation: self.generation,
                        established_at_ms: self.clock.now_ms(),
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_session_established();
                    }
                    info!(
                        client_id = %session.client_id,
                        generation = session.generation,
                        attempts = attempt,
                        "broker session established"
                    );
                    self.session = Some(session.clone());
                    return Ok(session);
                }
                Err(err) => {
                    self.link.disconnect().await;
                    if !self.policy.allows(attempt.saturating_add(1)) {
                        warn!(attempt, error = %err, "broker session attempts exhausted");
                        return Err(ConnectError::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        %client_id,
                        error = %err,
                        retry_in_ms = duration_to_millis(delay),
                        "broker session attempt failed"
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    /// Service the link and collect inbound messages. A dead link is noted and yields nothing;
    /// the next [`ConnectionManager::ensure_connected`] re-establishes the session.
    pub async fn poll_inbound(&mut self, budget: Duration) -> Vec<Inbound> {
        if self.session.is_none() {
            return Vec::new();
        }
        match self.link.poll(budget).await {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(error = %err, "broker link poll failed");
                Vec::new()
            }
        }
    }

    /// Close the current session, if any.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!(client_id = %session.client_id, "closing broker session");
        }
        self.link.disconnect().await;
    }

    async fn establish(&mut self, client_id: &str) -> Result<(), LinkError> {
        self.link
            .connect(client_id, &self.settings.credentials)
            .await?;
        if let Err(err) = self
            .link
            .publish(
                &self.settings.status_topic,
                self.settings.announcement.as_bytes(),
            )
            .await
        {
            debug!(error = %err, topic = %self.settings.status_topic, "connect announcement not delivered");
        }
        self.link.subscribe(&self.settings.commands_topic).await
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("link", &self.link.name())
            .field("policy", &self.policy)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::InMemoryBroker;
    use engmon_common::{Backoff, ManualClock};
    use engmon_sim::SeededRandom;
    use std::sync::Arc;

    fn manager(broker: &InMemoryBroker, clock: &ManualClock, policy: RetryPolicy) -> ConnectionManager {
        ConnectionManager::new(
            Box::new(broker.link()),
            Arc::new(clock.clone()),
            policy,
            Box::new(SeededRandom::from_seed(9)),
            SessionSettings::from_config(&BrokerConfig::default(), &TopicConfig::default()),
        )
    }

    #[tokio::test]
    async fn connected_manager_is_idempotent() {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new();
        let mut manager = manager(&broker, &clock, RetryPolicy::session_default());

        let first = manager.ensure_connected().await.expect("session");
        let second = manager.ensure_connected().await.expect("session");
        assert_eq!(first, second);
        assert_eq!(broker.handshakes(), 1);
        assert!(first.client_id.starts_with("engine-telemetry-"));
    }

    #[tokio::test]
    async fn announces_and_subscribes_on_connect() {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new();
        let mut manager = manager(&broker, &clock, RetryPolicy::session_default());
        manager.ensure_connected().await.expect("session");

        let status = broker.published_on("engine/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload, b"Engine telemetry publisher connected".to_vec());

        broker.inject("engine/commands", "STOP");
        let inbound = manager.poll_inbound(Duration::ZERO).await;
        assert_eq!(inbound.len(), 1);
    }

    #[tokio::test]
    async fn retries_with_fixed_backoff_and_fresh_identity() {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new();
        let mut manager = manager(&broker, &clock, RetryPolicy::session_default());
        broker.fail_next_connects(3);

        let session = manager.ensure_connected().await.expect("session");
        assert_eq!(broker.handshakes(), 4);
        assert_eq!(clock.total_slept(), Duration::from_secs(15));
        assert_eq!(session.established_at_ms, 15_000);

        let ids = broker.client_ids();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids.last(), Some(&session.client_id));
    }

    #[tokio::test]
    async fn bounded_policy_reports_exhaustion() {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new();
        let policy = RetryPolicy::bounded(2, Backoff::Fixed(Duration::from_secs(1)));
        let mut manager = manager(&broker, &clock, policy);
        broker.fail_next_connects(5);

        let err = manager.ensure_connected().await.expect_err("exhausted");
        assert!(matches!(err, ConnectError::Exhausted { attempts: 2, .. }));
        assert_eq!(clock.total_slept(), Duration::from_secs(1));
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn dropped_session_is_reestablished() {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new();
        let mut manager = manager(&broker, &clock, RetryPolicy::session_default());
        let first = manager.ensure_connected().await.expect("session");

        broker.drop_sessions();
        assert!(!manager.is_live());
        let second = manager.ensure_connected().await.expect("session");
        assert_eq!(second.generation, first.generation + 1);
        assert_eq!(broker.handshakes(), 2);
    }
}

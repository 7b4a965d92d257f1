//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry publishing to the data topic with a best-effort debug mirror."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use engmon_common::TopicConfig;
use engmon_sim::EngineTelemetry;
use tracing::{debug, warn};

use crate::codec::encode;
use crate::link::{BrokerLink, LinkError};
use crate::metrics::MessagingMetrics;
use crate::MessagingError;

/// Delivery report for one telemetry message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Primary topic the message went to.
    pub topic: String,
    /// Encoded payload size.
    pub bytes: usize,
    /// Whether the debug mirror was also accepted.
    pub mirrored: bool,
    /// Snapshot timestamp carried in the message.
    pub timestamp_ms: u64,
}

/// Telemetry could not be delivered on the data topic.
#[derive(Debug, thiserror::Error)]
pub enum PublishFailure {
    /// Snapshot could not be serialized.
    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] MessagingError),
    /// Link rejected or timed out the publish.
    #[error("publish to {topic} failed: {source}")]
    Transport {
        /// Topic that failed.
        topic: String,
        /// Link failure.
        #[source]
        source: LinkError,
    },
}

/// Serializes snapshots and publishes them to the data and debug topics.
#[derive(Debug, Clone)]
pub struct Publisher {
    data_topic: String,
    debug_topic: String,
    metrics: Option<MessagingMetrics>,
}

impl Publisher {
    /// Publish to `data_topic`, mirroring to `debug_topic`.
    pub fn new(data_topic: impl Into<String>, debug_topic: impl Into<String>) -> Self {
        Self {
            data_topic: data_topic.into(),
            debug_topic: debug_topic.into(),
            metrics: None,
        }
    }

    /// Build from the configured topics.
    pub fn from_topics(topics: &TopicConfig) -> Self {
        Self::new(topics.data.clone(), topics.debug.clone())
    }

    /// Count publishes and failures.
    pub fn with_metrics(mut self, metrics: MessagingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publish one snapshot. Failures are returned, never retried here; the
    /// debug mirror is attempted only after the data publish succeeds and its
    /// failure is not escalated.
    pub async fn publish(
        &self,
        link: &mut dyn BrokerLink,
        snapshot: &EngineTelemetry,
    ) -> Result<PublishAck, PublishFailure> {
        let payload = encode(snapshot)?;

        if let Err(source) = link.publish(&self.data_topic, &payload).await {
            if let Some(metrics) = &self.metrics {
                metrics.observe_publish_failure();
            }
            return Err(PublishFailure::Transport {
                topic: self.data_topic.clone(),
                source,
            });
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_publish();
        }

        let mirrored = match link.publish(&self.debug_topic, &payload).await {
            Ok(()) => true,
            Err(err) => {
                warn!(topic = %self.debug_topic, error = %err, "debug mirror publish failed");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_debug_failure();
                }
                false
            }
        };
        debug!(
            topic = %self.data_topic,
            bytes = payload.len(),
            mirrored,
            timestamp_ms = snapshot.timestamp_ms,
            "telemetry published"
        );

        Ok(PublishAck {
            topic: self.data_topic.clone(),
            bytes: payload.len(),
            mirrored,
            timestamp_ms: snapshot.timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Credentials, InMemoryBroker};
    use prometheus::Registry;

    async fn connected(broker: &InMemoryBroker) -> crate::link::InMemoryLink {
        let mut link = broker.link();
        link.connect("publisher-test", &Credentials::default())
            .await
            .expect("connect");
        link
    }

    #[tokio::test]
    async fn mirrors_identical_payload_to_debug() {
        let broker = InMemoryBroker::new();
        let mut link = connected(&broker).await;
        let publisher = Publisher::from_topics(&TopicConfig::default());
        let snapshot = EngineTelemetry::default().stamped(2_000);

        let ack = publisher.publish(&mut link, &snapshot).await.expect("ack");
        assert!(ack.mirrored);
        assert_eq!(ack.timestamp_ms, 2_000);
        let data = broker.published_on("engine/data");
        let debug = broker.published_on("engine/debug");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload, debug[0].payload);
        assert_eq!(ack.bytes, data[0].payload.len());
    }

    #[tokio::test]
    async fn data_failure_is_reported_and_skips_mirror() {
        let broker = InMemoryBroker::new();
        let mut link = connected(&broker).await;
        let registry = Registry::new();
        let metrics = MessagingMetrics::register(&registry).expect("metrics");
        let publisher = Publisher::new("engine/data", "engine/debug").with_metrics(metrics.clone());
        broker.fail_next_publishes("engine/data", 1);

        let failure = publisher
            .publish(&mut link, &EngineTelemetry::default())
            .await
            .expect_err("failure");
        assert!(matches!(failure, PublishFailure::Transport { ref topic, .. } if topic == "engine/data"));
        assert!(broker.published_on("engine/debug").is_empty());
        assert_eq!(metrics.publish_total(), 0);
    }

    #[tokio::test]
    async fn debug_failure_is_not_escalated() {
        let broker = InMemoryBroker::new();
        let mut link = connected(&broker).await;
        let publisher = Publisher::new("engine/data", "engine/debug");
        broker.fail_next_publishes("engine/debug", 1);

        let ack = publisher
            .publish(&mut link, &EngineTelemetry::default())
            .await
            .expect("ack");
        assert!(!ack.mirrored);
        assert_eq!(broker.published_on("engine/data").len(), 1);
    }

    #[tokio::test]
    async fn disconnected_link_fails_without_panicking() {
        let broker = InMemoryBroker::new();
        let mut link = broker.link();
        let publisher = Publisher::new("engine/data", "engine/debug");
        let failure = publisher
            .publish(&mut link, &EngineTelemetry::default())
            .await
            .expect_err("not connected");
        assert!(matches!(
            failure,
            PublishFailure::Transport { source: LinkError::NotConnected, .. }
        ));
    }
}

//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "MQTT broker link built on rumqttc."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use engmon_common::BrokerConfig;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::link::{BrokerLink, Credentials, Inbound, LinkError};

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(250);

/// Connection parameters for [`MqttLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker hostname or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Deadline for receiving CONNACK.
    pub connect_timeout: Duration,
    /// Deadline for a publish or subscribe to leave the client.
    pub publish_timeout: Duration,
}

impl From<&BrokerConfig> for MqttSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            keep_alive: config.keep_alive,
            connect_timeout: config.connect_timeout,
            publish_timeout: config.publish_timeout,
        }
    }
}

/// QoS 0, clean-session MQTT link.
pub struct MqttLink {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
    inbound: VecDeque<Inbound>,
}

impl MqttLink {
    /// Create a disconnected link.
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            eventloop: None,
            connected: false,
            inbound: VecDeque::new(),
        }
    }

    fn options(&self, client_id: &str, credentials: &Credentials) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.settings.host.clone(), self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &credentials.username {
            options.set_credentials(
                username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }
        options
    }

    fn mark_dead(&mut self, reason: &str) -> LinkError {
        warn!(host = %self.settings.host, reason, "mqtt connection marked dead");
        self.connected = false;
        self.client = None;
        self.eventloop = None;
        LinkError::ConnectionLost(reason.to_string())
    }

    fn client(&self) -> Result<&AsyncClient, LinkError> {
        match (&self.client, self.connected) {
            (Some(client), true) => Ok(client),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Drive the event loop until `done` matches an event or `limit` passes.
    ///
    /// Inbound publishes seen along the way are buffered for [`BrokerLink::poll`].
    async fn drive_until<F>(&mut self, limit: Duration, done: F) -> Result<(), LinkError>
    where
        F: Fn(&Event) -> bool + Send,
    {
        let deadline = Instant::now() + limit;
        loop {
            let Some(eventloop) = self.eventloop.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            match timeout_at(deadline, eventloop.poll()).await {
                Err(_) => return Err(LinkError::Timeout(limit)),
                Ok(Err(err)) => return Err(self.mark_dead(&err.to_string())),
                Ok(Ok(event)) => {
                    trace!(?event, "mqtt event");
                    if let Event::Incoming(Packet::Publish(publish)) = &event {
                        self.inbound.push_back(Inbound {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    if done(&event) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttLink")
            .field("settings", &self.settings)
            .field("connected", &self.connected)
            .field("buffered_inbound", &self.inbound.len())
            .finish()
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn connect(&mut self, client_id: &str, credentials: &Credentials) -> Result<(), LinkError> {
        self.connected = false;
        self.inbound.clear();
        let options = self.options(client_id, credentials);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        self.eventloop = Some(eventloop);

        let deadline = Instant::now() + self.settings.connect_timeout;
        loop {
            let Some(eventloop) = self.eventloop.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            match timeout_at(deadline, eventloop.poll()).await {
                Err(_) => {
                    self.client = None;
                    self.eventloop = None;
                    return Err(LinkError::Timeout(self.settings.connect_timeout));
                }
                // rumqttc surfaces a non-success CONNACK as an error, never as an event.
                Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                    self.client = None;
                    self.eventloop = None;
                    warn!(client_id, host = %self.settings.host, ?code, "mqtt handshake refused");
                    return Err(LinkError::Rejected(format!("{code:?}")));
                }
                Ok(Err(err)) => {
                    self.client = None;
                    self.eventloop = None;
                    return Err(LinkError::ConnectionLost(err.to_string()));
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    debug!(client_id, host = %self.settings.host, "mqtt handshake complete");
                    self.connected = true;
                    return Ok(());
                }
                Ok(Ok(event)) => trace!(?event, "mqtt event before connack"),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|err| LinkError::Client(err.to_string()))?;
        let limit = self.settings.publish_timeout;
        self.drive_until(limit, |event| {
            matches!(event, Event::Outgoing(Outgoing::Publish(_)))
        })
        .await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        self.client()?
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|err| LinkError::Client(err.to_string()))?;
        let limit = self.settings.publish_timeout;
        self.drive_until(limit, |event| {
            matches!(event, Event::Incoming(Packet::SubAck(_)))
        })
        .await
    }

    async fn poll(&mut self, budget: Duration) -> Result<Vec<Inbound>, LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        match self.drive_until(budget, |_| false).await {
            Ok(()) | Err(LinkError::Timeout(_)) => Ok(self.inbound.drain(..).collect()),
            Err(err) => Err(err),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.clone().filter(|_| self.connected) {
            match client.disconnect().await {
                Ok(()) => {
                    let _ = self
                        .drive_until(DISCONNECT_FLUSH, |event| {
                            matches!(event, Event::Outgoing(Outgoing::Disconnect))
                        })
                        .await;
                }
                Err(err) => debug!(error = %err, "mqtt disconnect request failed"),
            }
        }
        self.connected = false;
        self.client = None;
        self.eventloop = None;
        self.inbound.clear();
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const CONNECT: u8 = 0x10;
    const PUBLISH: u8 = 0x30;
    const SUBSCRIBE: u8 = 0x82;

    fn settings() -> MqttSettings {
        settings_for(1)
    }

    fn settings_for(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".into(),
            port,
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_millis(500),
            publish_timeout: Duration::from_millis(200),
        }
    }

    /// Read one MQTT 3.1.1 control packet: first header byte and body.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; remaining];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    fn connack(return_code: u8) -> [u8; 4] {
        [0x20, 0x02, 0x00, return_code]
    }

    fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        let topic_len = u16::try_from(topic.len()).expect("topic length");
        let remaining = u8::try_from(2 + topic.len() + payload.len()).expect("short frame");
        let mut frame = vec![PUBLISH, remaining];
        frame.extend_from_slice(&topic_len.to_be_bytes());
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    fn topic_of(body: &[u8]) -> String {
        let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
        String::from_utf8(body[2..2 + len].to_vec()).expect("utf8 topic")
    }

    /// Accept one client, answer its CONNECT with `return_code`, then hand the
    /// stream to `session`.
    async fn fake_broker<F, Fut, T>(return_code: u8, session: F) -> (u16, JoinHandle<T>)
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let (header, _) = read_packet(&mut stream).await.expect("connect packet");
            assert_eq!(header, CONNECT);
            stream.write_all(&connack(return_code)).await.expect("connack");
            session(stream).await
        });
        (port, handle)
    }

    #[tokio::test]
    async fn operations_before_connect_are_rejected() {
        let mut link = MqttLink::new(settings());
        assert!(!link.is_connected());
        assert_eq!(
            link.publish("engine/data", b"{}").await,
            Err(LinkError::NotConnected)
        );
        assert_eq!(
            link.subscribe("engine/commands").await,
            Err(LinkError::NotConnected)
        );
        assert_eq!(link.poll(Duration::ZERO).await, Err(LinkError::NotConnected));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_handshake() {
        let mut link = MqttLink::new(settings());
        let result = link.connect("engine-telemetry-test", &Credentials::default()).await;
        assert!(result.is_err());
        assert!(!link.is_connected());
    }

    #[test]
    fn settings_follow_broker_config() {
        let config = BrokerConfig::default();
        let settings = MqttSettings::from(&config);
        assert_eq!(settings.host, config.host);
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.connect_timeout, config.connect_timeout);
    }

    #[tokio::test]
    async fn session_subscribes_buffers_commands_and_publishes() {
        let (port, broker) = fake_broker(0, |mut stream| async move {
            let (header, body) = read_packet(&mut stream).await.expect("subscribe");
            assert_eq!(header, SUBSCRIBE);
            assert_eq!(topic_of(&body[2..]), "engine/commands");
            stream
                .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                .await
                .expect("suback");
            stream
                .write_all(&publish_frame("engine/commands", b"STOP"))
                .await
                .expect("command");
            let (header, body) = read_packet(&mut stream).await.expect("publish");
            (header, topic_of(&body))
        })
        .await;

        let mut link = MqttLink::new(settings_for(port));
        link.connect("engine-telemetry-test", &Credentials::default())
            .await
            .expect("connect");
        assert!(link.is_connected());
        link.subscribe("engine/commands").await.expect("subscribe");

        let inbound = link.poll(Duration::from_millis(300)).await.expect("poll");
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].topic, "engine/commands");
        assert_eq!(inbound[0].payload, b"STOP");

        link.publish("engine/data", b"{}").await.expect("publish");
        let (header, topic) = broker.await.expect("broker task");
        assert_eq!(header, PUBLISH);
        assert_eq!(topic, "engine/data");
    }

    #[tokio::test]
    async fn refused_connack_is_reported_as_rejected() {
        let (port, broker) = fake_broker(5, |stream| async move { drop(stream) }).await;

        let mut link = MqttLink::new(settings_for(port));
        let result = link.connect("engine-telemetry-test", &Credentials::default()).await;
        assert_eq!(result, Err(LinkError::Rejected("NotAuthorized".into())));
        assert!(!link.is_connected());
        broker.await.expect("broker task");
    }

    #[tokio::test]
    async fn peer_close_marks_the_link_dead() {
        let (port, broker) = fake_broker(0, |stream| async move { drop(stream) }).await;

        let mut link = MqttLink::new(settings_for(port));
        link.connect("engine-telemetry-test", &Credentials::default())
            .await
            .expect("connect");
        broker.await.expect("broker task");

        let result = link.poll(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(LinkError::ConnectionLost(_))));
        assert!(!link.is_connected());
        assert_eq!(
            link.publish("engine/data", b"{}").await,
            Err(LinkError::NotConnected)
        );
    }
}

use core::{
    convert::Infallible,
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};
use std::sync::Arc;

use async_trait::async_trait;
use compact_str::{CompactString, ToCompactString};
use deviot_common::{Envelope, Topic, gateway::Mode};
use mqtt_endpoint_tokio::mqtt_ep::{
    self, Endpoint,
    packet::v5_0,
    result_code::ConnectReasonCode,
    role,
    transport::{TcpTransport, connect_helper},
};
use mqtt_protocol_core::mqtt::packet::{
    Property, Qos, SessionExpiryInterval, SubEntry, SubOpts,
    v5_0::{Connack, Connect, Publish},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Binding, CommandHandler, Connector};
use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Broker keeps the session until it is resumed.
pub const DEFAULT_SESSION_EXPIRY: u32 = u32::MAX;

/// CONNECT resuming the broker-side session, so the action subscription
/// survives reconnects.
fn connect_packet(client_id: &str, session_expiry: u32) -> Result<Connect> {
    let connect = v5_0::Connect::builder()
        .client_id(client_id)?
        .clean_start(false)
        .props(vec![Property::SessionExpiryInterval(SessionExpiryInterval::new(
            session_expiry,
        )?)])
        .build()?;

    Ok(connect)
}

struct Session {
    endpoint: Endpoint<role::Client>,
    next_packet_id: AtomicU16,
}

impl Session {
    async fn connect(client_id: &str, addr: &str, session_expiry: u32) -> Result<Self> {
        let endpoint = mqtt_ep::endpoint::Endpoint::<role::Client>::new(mqtt_ep::Version::V5_0);

        let tcp_stream = connect_helper::connect_tcp(addr, None).await?;
        let transport = TcpTransport::from_stream(tcp_stream);
        endpoint
            .attach(transport, mqtt_ep::endpoint::Mode::Client)
            .await?;

        endpoint.send(connect_packet(client_id, session_expiry)?).await?;

        let packet = endpoint.recv().await?;
        let connack: Connack = packet.try_into().map_err(Error::MqttPacketField)?;
        tracing::debug!("Received CONNACK: {connack:?}");

        let reason = connack.reason_code();
        if reason != ConnectReasonCode::Success {
            return Err(Error::MqttConnack(reason));
        }

        Ok(Session { endpoint, next_packet_id: AtomicU16::new(1) })
    }

    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);

            if id != 0 {
                break id;
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let subscribe = v5_0::Subscribe::builder()
            .packet_id(self.next_packet_id())
            .entries(vec![SubEntry::new(
                topic.to_string(),
                SubOpts::new().set_qos(Qos::AtMostOnce),
            )?])
            .build()?;

        tracing::info!("Subscribing to topic '{topic}'");

        self.endpoint
            .register_packet_id(subscribe.packet_id())
            .await?;

        self.endpoint.send(subscribe).await?;

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        tracing::debug!("Publishing to topic {topic}: {payload}");

        let publish = v5_0::Publish::builder()
            .topic_name(topic.to_string())?
            .payload(payload)
            .qos(Qos::AtMostOnce)
            .retain(false)
            .build()?;

        self.endpoint.send(publish).await?;

        Ok(())
    }

    async fn recv(&self) -> Result<Publish> {
        loop {
            let packet = self.endpoint.recv().await?;

            let publish: Result<Publish, _> = packet.try_into();
            if let Ok(publish) = publish {
                break Ok(publish);
            }
        }
    }

    /// Hands every inbound command to `handler` until the connection fails.
    async fn listen(&self, handler: &CommandHandler) -> Result<Infallible> {
        loop {
            let publish = self.recv().await?;
            let payload = publish.payload().as_slice();

            match decode_envelope(payload) {
                Ok(envelope) => handler(envelope),
                Err(e) => {
                    tracing::warn!(
                        topic = publish.topic_name(),
                        payload = %String::from_utf8_lossy(payload),
                        "Failed to decode message: {e}",
                    );
                }
            }
        }
    }
}

pub(crate) fn decode_envelope(payload: &[u8]) -> serde_json::Result<Envelope> {
    serde_json::from_slice(payload)
}

struct Shared {
    client_id: CompactString,
    addr: String,
    action_topic: CompactString,
    handler: CommandHandler,
    reconnect_delay: Duration,
    session_expiry: u32,
    session: Mutex<Option<Arc<Session>>>,
}

impl Shared {
    /// Connects and subscribes. A failed subscription is logged, not returned;
    /// the next reconnect retries it.
    async fn open(&self) -> Result<Arc<Session>> {
        let session = Session::connect(&self.client_id, &self.addr, self.session_expiry).await?;

        if let Err(e) = session.subscribe(&self.action_topic).await {
            tracing::error!(topic = %self.action_topic, "Failed to subscribe: {e}");
        }

        Ok(Arc::new(session))
    }

    async fn run(self: Arc<Self>, mut session: Arc<Session>, token: CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = session.listen(&self.handler) => result,
            };

            let Err(e) = result;
            *self.session.lock().await = None;
            tracing::warn!(server = %self.addr, "MQTT connection lost: {e}");

            let mut attempts = 0u32;
            session = loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }

                match self.open().await {
                    Ok(session) => break session,
                    // only the first failure after losing the connection is loud
                    Err(e) if attempts == 0 => {
                        tracing::warn!(server = %self.addr, "Reconnect failed: {e}")
                    }
                    Err(e) => tracing::debug!(server = %self.addr, attempts, "Reconnect failed: {e}"),
                }

                attempts = attempts.saturating_add(1);
            };

            *self.session.lock().await = Some(session.clone());
            tracing::info!(server = %self.addr, "MQTT server reconnected");
        }

        *self.session.lock().await = None;
    }
}

/// Pub/sub transport. Commands arrive on `/deviot/{ns}/{gateway}/action`,
/// telemetry leaves on `/deviot/{ns}/{gateway}/data`.
pub struct MqttConnector {
    shared: Arc<Shared>,
    binding: Binding,
    task: parking_lot::Mutex<Option<CancellationToken>>,
}

impl MqttConnector {
    /// `broker` is a URL such as `tcp://192.168.0.106:1883`; the port defaults
    /// to 1883.
    pub fn new(gateway: &str, account: &str, broker: &str, handler: CommandHandler) -> Result<Self> {
        let url = Url::parse(broker)?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::BrokerAddress(broker.to_owned()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let data = Topic::data(account, gateway).to_compact_string();
        let action = Topic::action(account, gateway).to_compact_string();

        Ok(Self {
            shared: Arc::new(Shared {
                client_id: gateway.to_compact_string(),
                addr: format!("{host}:{port}"),
                action_topic: action.clone(),
                handler,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                session_expiry: DEFAULT_SESSION_EXPIRY,
                session: Mutex::new(None),
            }),
            binding: Binding {
                mode: Mode::Mqtt,
                host: host.to_compact_string(),
                port,
                data,
                action,
            },
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Only valid before [`start`](Connector::start).
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.reconnect_delay = delay;
        }
        self
    }

    /// Seconds the broker keeps the session after a disconnect. Only valid
    /// before [`start`](Connector::start).
    pub fn with_session_expiry(mut self, seconds: u32) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.session_expiry = seconds;
        }
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.session.lock().await.is_some()
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn start(&self) -> Result<()> {
        let session = self.shared.open().await?;
        *self.shared.session.lock().await = Some(session.clone());

        tracing::info!(server = %self.shared.addr, "MQTT server connected");

        let token = CancellationToken::new();
        if let Some(previous) = self.task.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(self.shared.clone().run(session, token));

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(token) = self.task.lock().take() {
            token.cancel();
        }

        *self.shared.session.lock().await = None;
        tracing::info!(server = %self.shared.addr, "MQTT server disconnected");

        Ok(())
    }

    async fn publish(&self, data: &Envelope) -> Result<()> {
        let Some(session) = self.shared.session.lock().await.clone() else {
            tracing::trace!("Not connected, dropping telemetry");
            return Ok(());
        };

        let payload = serde_json::to_string(data)?;
        session.publish(&self.binding.data, payload).await
    }

    fn binding(&self) -> Binding {
        self.binding.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::log::capture;

    const CONNACK_ACCEPTED: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];
    const CONNACK_NOT_AUTHORIZED: [u8; 5] = [0x20, 0x03, 0x00, 0x87, 0x00];

    fn ignore() -> CommandHandler {
        Arc::new(|_: Envelope| {})
    }

    async fn broker() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Reads one packet with a single-byte remaining length.
    async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        assert!(header[1] < 0x80);

        let mut body = vec![0u8; header[1] as usize];
        stream.read_exact(&mut body).await.unwrap();
        [header.as_slice(), &body].concat()
    }

    #[test]
    fn connect_resumes_session() {
        let connect = connect_packet("gw", DEFAULT_SESSION_EXPIRY).unwrap();
        assert!(!connect.clean_start());
        assert!(connect.props.iter().any(
            |prop| matches!(prop, Property::SessionExpiryInterval(expiry) if expiry.val() == u32::MAX)
        ));

        let connect = connect_packet("gw", 3600).unwrap();
        assert!(connect.props.iter().any(
            |prop| matches!(prop, Property::SessionExpiryInterval(expiry) if expiry.val() == 3600)
        ));
    }

    #[tokio::test]
    async fn refused_connection_fails_start() {
        let (listener, url) = broker().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let connect = read_packet(&mut stream).await;
            stream.write_all(&CONNACK_NOT_AUTHORIZED).await.unwrap();
            (connect, stream)
        });

        let connector = MqttConnector::new("gw", "", &url, ignore()).unwrap();
        let result = connector.start().await;

        assert!(matches!(
            result,
            Err(Error::MqttConnack(ConnectReasonCode::NotAuthorized))
        ));
        assert!(!connector.is_connected().await);

        // session expiry interval, u32::MAX
        let (connect, _stream) = server.await.unwrap();
        assert_eq!(connect[0], 0x10);
        assert!(connect.windows(5).any(|w| w == [0x11, 0xff, 0xff, 0xff, 0xff]));
    }

    #[tokio::test]
    async fn reconnect_failures_warn_once() {
        let (_guard, logs) = capture::start();

        let (listener, url) = broker().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await;
            stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
            // SUBSCRIBE, then the broker goes away for good
            read_packet(&mut stream).await;
        });

        let connector = MqttConnector::new("gw", "", &url, ignore())
            .unwrap()
            .with_reconnect_delay(Duration::from_millis(10));

        connector.start().await.unwrap();
        server.await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        connector.stop().await.unwrap();

        assert_eq!(logs.count("WARN", "MQTT connection lost"), 1);
        assert_eq!(logs.count("WARN", "Reconnect failed"), 1);
        assert!(logs.count("DEBUG", "Reconnect failed") >= 2);
    }

    #[test]
    fn binding_from_broker_url() {
        let connector =
            MqttConnector::new("pi_gateway", "someone@example.com", "tcp://broker.local:11883", ignore())
                .unwrap();

        assert_eq!(connector.binding(), Binding {
            mode: Mode::Mqtt,
            host: "broker.local".into(),
            port: 11883,
            data: "/deviot/someoneexample.com/pi_gateway/data".into(),
            action: "/deviot/someoneexample.com/pi_gateway/action".into(),
        });
        assert_eq!(connector.shared.addr, "broker.local:11883");
        assert_eq!(connector.shared.client_id, "pi_gateway");
    }

    #[test]
    fn default_port_and_namespace() {
        let connector = MqttConnector::new("gw", "", "tcp://10.0.0.2", ignore()).unwrap();

        assert_eq!(connector.binding().port, DEFAULT_PORT);
        assert_eq!(connector.binding().action, "/deviot/_/gw/action");
        assert_eq!(connector.shared.addr, "10.0.0.2:1883");
    }

    #[test]
    fn bad_broker_urls() {
        assert!(matches!(
            MqttConnector::new("gw", "", "tcp://broker:notaport", ignore()),
            Err(Error::BrokerUrl(_))
        ));
        assert!(matches!(
            MqttConnector::new("gw", "", "broker.local", ignore()),
            Err(Error::BrokerUrl(_))
        ));
        assert!(matches!(
            MqttConnector::new("gw", "", "unix:/run/broker.sock", ignore()),
            Err(Error::BrokerAddress(_))
        ));
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_dropped() {
        let connector = MqttConnector::new("gw", "", "tcp://127.0.0.1:1", ignore())
            .unwrap()
            .with_reconnect_delay(Duration::from_millis(10));

        assert_eq!(connector.shared.reconnect_delay, Duration::from_millis(10));
        assert!(!connector.is_connected().await);

        let data = json!({ "lamp1": { "on": true } });
        connector.publish(data.as_object().unwrap()).await.unwrap();
        connector.stop().await.unwrap();
    }

    #[test]
    fn decode() {
        let envelope = decode_envelope(br#"{"id":"lamp1","action":"setOn","on":true}"#).unwrap();
        assert_eq!(envelope["id"], "lamp1");
        assert_eq!(envelope["on"], true);

        assert!(decode_envelope(b"not json").is_err());
        assert!(decode_envelope(b"[1, 2]").is_err());
    }
}

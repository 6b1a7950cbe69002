use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::sync::Arc;

use compact_str::CompactString;
use deviot_common::{
    Envelope, Thing, ThingId,
    gateway::{GatewayModel, Mode},
    sanitize_gateway_name,
};
use mqtt_endpoint_tokio::mqtt_ep;
use tokio_util::sync::CancellationToken;

use self::{
    config::GatewayConfig,
    connector::{Binding, CommandHandler, Connector, http::HttpConnector, mqtt::MqttConnector},
    instance::Instance,
    registry::Registry,
    supervisor::{Heartbeat, HttpRegistrar, Registrar, RegistrationSupervisor},
};

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod instance;
pub mod log;
pub mod registry;
pub mod supervisor;

pub use deviot_common as common;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bad broker url: {0}")]
    BrokerUrl(#[from] url::ParseError),
    #[error("broker url has no host: {0}")]
    BrokerAddress(String),
    #[error("mqtt transport error: {0}")]
    MqttTransport(#[from] mqtt_ep::TransportError),
    #[error("mqtt connection error: {0}")]
    MqttConnection(#[from] mqtt_ep::ConnectionError),
    #[error("mqtt connection refused: {0}")]
    MqttConnack(mqtt_ep::result_code::ConnectReasonCode),
    #[error("mqtt packet field error: {0}")]
    MqttPacketField(&'static str),
    #[error("mqtt packet error: {0}")]
    MqttPacket(mqtt_ep::result_code::MqttError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl From<mqtt_ep::result_code::MqttError> for Error {
    fn from(e: mqtt_ep::result_code::MqttError) -> Self {
        Error::MqttPacket(e)
    }
}

/// The announced identity of a gateway: everything in the registration
/// document except the things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: CompactString,
    pub kind: CompactString,
    pub owner: CompactString,
    pub binding: Binding,
}

impl Identity {
    pub fn model(&self, sensors: Vec<Thing>) -> GatewayModel {
        GatewayModel {
            name: self.name.clone(),
            kind: self.kind.clone(),
            mode: self.binding.mode,
            owner: self.owner.clone(),
            host: self.binding.host.clone(),
            port: self.binding.port,
            data: self.binding.data.clone(),
            action: self.binding.action.clone(),
            sensors,
        }
    }
}

/// A gateway service: exposes registered things to the management server,
/// routes its commands to them and forwards their telemetry.
pub struct Gateway {
    identity: Identity,
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    registrar: Arc<dyn Registrar>,
    heartbeat_interval: Duration,
    registered: Arc<AtomicBool>,
    supervisor: parking_lot::Mutex<Option<CancellationToken>>,
}

impl Gateway {
    /// Builds a gateway around a connector. `connect` receives the sanitized
    /// gateway name and the handler inbound commands must be passed to.
    pub fn with_connector<C, F>(config: &GatewayConfig, connect: F) -> Result<(Self, Arc<C>)>
    where
        C: Connector + 'static,
        F: FnOnce(&str, CommandHandler) -> Result<C>,
    {
        let name = sanitize_gateway_name(&config.name);
        let registry = Arc::new(Registry::new());

        let handler: CommandHandler = {
            let registry = registry.clone();
            Arc::new(move |envelope: Envelope| call_action(&registry, &envelope))
        };

        let connector = Arc::new(connect(&name, handler)?);

        let gateway = Self {
            identity: Identity {
                name,
                kind: config.kind.clone(),
                owner: config.account.clone(),
                binding: connector.binding(),
            },
            registry,
            connector: connector.clone(),
            registrar: Arc::new(HttpRegistrar::new(&config.server)),
            heartbeat_interval: config.heartbeat_interval,
            registered: Arc::new(AtomicBool::new(false)),
            supervisor: parking_lot::Mutex::new(None),
        };

        Ok((gateway, connector))
    }

    /// Gateway talking to the server through the MQTT broker at `broker`,
    /// e.g. `tcp://192.168.0.106:1883`.
    pub fn mqtt(config: &GatewayConfig, broker: &str) -> Result<Self> {
        let (gateway, _) = Self::with_connector(config, |name, handler| {
            Ok(MqttConnector::new(name, &config.account, broker, handler)?
                .with_reconnect_delay(config.reconnect_delay))
        })?;

        Ok(gateway)
    }

    /// Gateway reachable over HTTP at `host:port`. The returned connector is
    /// where the application's HTTP endpoint delivers received commands.
    pub fn http(
        config: &GatewayConfig,
        mode: Mode,
        host: &str,
        port: u16,
        push_url: Option<String>,
    ) -> Result<(Self, Arc<HttpConnector>)> {
        Self::with_connector(config, |_, handler| {
            HttpConnector::new(mode, host, port, push_url, handler)
        })
    }

    /// Replaces the HTTP registrar. Takes effect on the next [`start`](Self::start).
    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    /// Starts the connector, then the periodic registration.
    pub async fn start(&self) -> Result<()> {
        self.connector.start().await?;

        let supervisor = RegistrationSupervisor::new(
            Heartbeat::new(
                self.identity.name.clone(),
                self.registrar.clone(),
                self.registered.clone(),
            ),
            self.registry.clone(),
            self.identity.clone(),
            self.heartbeat_interval,
        );

        let token = CancellationToken::new();
        if let Some(previous) = self.supervisor.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(supervisor.run(token));

        tracing::info!(gateway = %self.identity.name, "Gateway service started");

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Some(token) = self.supervisor.lock().take() {
            token.cancel();
        }
        self.registered.store(false, Ordering::Release);

        tracing::info!(gateway = %self.identity.name, "Gateway service stopped");

        self.connector.stop().await
    }

    pub fn register<I: Instance>(
        &self,
        id: impl Into<ThingId>,
        name: impl Into<CompactString>,
        instance: I,
    ) {
        self.registry.register(id, name, instance);
    }

    pub fn deregister(&self, id: &str) {
        self.registry.deregister(id);
    }

    /// Publishes telemetry through the connector.
    pub async fn send_data(&self, data: &Envelope) -> Result<()> {
        self.connector.publish(data).await
    }

    /// Dispatches a command envelope, logging it if it cannot be applied.
    pub fn call_action(&self, envelope: &Envelope) {
        call_action(&self.registry, envelope);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// The registration document as it would be sent now.
    pub fn model(&self) -> GatewayModel {
        self.identity.model(self.registry.snapshot())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle for publishing telemetry from code that does not own the
    /// gateway, such as operations running on the connector's task.
    pub fn sender(&self) -> DataSender {
        DataSender { connector: self.connector.clone() }
    }
}

fn call_action(registry: &Registry, envelope: &Envelope) {
    if let Err(e) = registry.dispatch(envelope) {
        tracing::warn!("Illegal message, {e}");
    }
}

#[derive(Clone)]
pub struct DataSender {
    connector: Arc<dyn Connector>,
}

impl DataSender {
    pub async fn send(&self, data: &Envelope) -> Result<()> {
        self.connector.publish(data).await
    }

    /// Publishes on a spawned task; failures are logged. Must be called
    /// within a tokio runtime.
    pub fn send_detached(&self, data: Envelope) {
        let connector = self.connector.clone();
        tokio::spawn(async move {
            if let Err(e) = connector.publish(&data).await {
                tracing::warn!("Failed to send data: {e}");
            }
        });
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use compact_str::CompactString;
use deviot_common::{Envelope, gateway::Mode};

use crate::Result;

pub mod http;
pub mod mqtt;

/// Receives every decoded command envelope, on the connector's own task.
pub type CommandHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Where the management server finds the gateway, as announced in the
/// registration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub mode: Mode,
    pub host: CompactString,
    pub port: u16,
    pub data: CompactString,
    pub action: CompactString,
}

/// Transport carrying telemetry out and commands in.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Publishes telemetry. Data is dropped, successfully, while the transport
    /// is not connected.
    async fn publish(&self, data: &Envelope) -> Result<()>;

    fn binding(&self) -> Binding;
}

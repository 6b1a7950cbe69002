use core::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use compact_str::CompactString;
use deviot_common::{Envelope, gateway::Mode};

use super::{Binding, CommandHandler, Connector};
use crate::{Error, Result};

/// HTTP transport. The embedding application runs the HTTP endpoint the
/// management server talks to and feeds received commands to
/// [`deliver`](Self::deliver).
///
/// In [`Mode::HttpPush`] telemetry is POSTed to the push URL; in
/// [`Mode::HttpPull`] the server collects data itself and `publish` drops it.
pub struct HttpConnector {
    binding: Binding,
    push_url: Option<String>,
    client: reqwest::Client,
    handler: CommandHandler,
    started: AtomicBool,
}

impl HttpConnector {
    /// `host` and `port` are where the gateway's own HTTP endpoint listens.
    pub fn new(
        mode: Mode,
        host: impl Into<CompactString>,
        port: u16,
        push_url: Option<String>,
        handler: CommandHandler,
    ) -> Result<Self> {
        match mode {
            Mode::HttpPush if push_url.is_none() => {
                return Err(Error::Config("http push mode needs a push url".into()));
            }
            Mode::Mqtt => return Err(Error::Config("mqtt is not an http mode".into())),
            _ => {}
        }

        let host = host.into();
        let base = format!("http://{host}:{port}");

        Ok(Self {
            binding: Binding {
                mode,
                host,
                port,
                data: push_url
                    .as_deref()
                    .map(CompactString::from)
                    .unwrap_or_else(|| format!("{base}/data").into()),
                action: format!("{base}/action").into(),
            },
            push_url,
            client: reqwest::Client::new(),
            handler,
            started: AtomicBool::new(false),
        })
    }

    /// Passes a command received by the application's HTTP endpoint to the
    /// dispatcher. Ignored while the connector is stopped.
    pub fn deliver(&self, envelope: Envelope) {
        if self.started.load(Ordering::Acquire) {
            (self.handler)(envelope);
        } else {
            tracing::debug!("Connector stopped, dropping command");
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        tracing::info!(mode = ?self.binding.mode, action = %self.binding.action, "HTTP connector started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        tracing::info!("HTTP connector stopped");
        Ok(())
    }

    async fn publish(&self, data: &Envelope) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let Some(url) = &self.push_url else {
            tracing::trace!("Pull mode, dropping telemetry");
            return Ok(());
        };

        self.client
            .post(url)
            .json(data)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    fn binding(&self) -> Binding {
        self.binding.clone()
    }
}

//! Periodic registration of the gateway with the management server.

use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::sync::Arc;

use async_trait::async_trait;
use compact_str::CompactString;
use deviot_common::gateway::{GatewayModel, REGISTRATION_PATH};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{Identity, Result, registry::Registry};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    Registered,
}

/// Delivers the registration document and reports the response status.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, model: &GatewayModel) -> Result<u16>;
}

pub struct HttpRegistrar {
    client: reqwest::Client,
    url: String,
}

impl HttpRegistrar {
    pub fn new(server: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}{REGISTRATION_PATH}", server.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn register(&self, model: &GatewayModel) -> Result<u16> {
        let response = self.client.post(&self.url).json(model).send().await?;
        Ok(response.status().as_u16())
    }
}

/// A single registration attempt per [`beat`](Self::beat), logging only the
/// first outcome and every change after that.
pub struct Heartbeat {
    registrar: Arc<dyn Registrar>,
    registered: Arc<AtomicBool>,
    first: bool,
    gateway: CompactString,
}

impl Heartbeat {
    pub fn new(gateway: CompactString, registrar: Arc<dyn Registrar>, registered: Arc<AtomicBool>) -> Self {
        Self { registrar, registered, first: true, gateway }
    }

    /// Returns the new state if this beat logged it.
    pub async fn beat(&mut self, model: &GatewayModel) -> Option<Registration> {
        let outcome = match self.registrar.register(model).await {
            Ok(status) if (200..400).contains(&status) => Ok(()),
            Ok(status) => Err(format!("status {status}")),
            Err(e) => Err(e.to_string()),
        };

        let registered = outcome.is_ok();
        let previous = self.registered.swap(registered, Ordering::AcqRel);
        let first = core::mem::replace(&mut self.first, false);

        if !first && previous == registered {
            return None;
        }

        match outcome {
            Ok(()) => {
                tracing::info!(gateway = %self.gateway, "Registered gateway service");
                Some(Registration::Registered)
            }
            Err(reason) => {
                tracing::warn!(gateway = %self.gateway, "Failed to register gateway service: {reason}");
                Some(Registration::Unregistered)
            }
        }
    }
}

/// Announces the gateway and its things on a fixed interval, regardless of
/// how many attempts fail, until cancelled.
pub struct RegistrationSupervisor {
    heartbeat: Heartbeat,
    registry: Arc<Registry>,
    identity: Identity,
    interval: Duration,
}

impl RegistrationSupervisor {
    pub fn new(
        heartbeat: Heartbeat,
        registry: Arc<Registry>,
        identity: Identity,
        interval: Duration,
    ) -> Self {
        Self { heartbeat, registry, identity, interval }
    }

    pub async fn run(mut self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let model = self.identity.model(self.registry.snapshot());

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.heartbeat.beat(&model) => {}
            }
        }

        tracing::debug!(gateway = %self.identity.name, "Registration supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use deviot_common::gateway::Mode;
    use parking_lot::Mutex;

    use super::*;
    use crate::{Error, connector::Binding};

    /// Answers with scripted statuses, `None` standing for a transport failure.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Option<u16>>>,
        seen: Mutex<Vec<GatewayModel>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Option<u16>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Registrar for Scripted {
        async fn register(&self, model: &GatewayModel) -> Result<u16> {
            self.seen.lock().push(model.clone());
            match self.replies.lock().pop_front().flatten() {
                Some(status) => Ok(status),
                None => Err(Error::Config("connection refused".into())),
            }
        }
    }

    fn identity() -> Identity {
        Identity {
            name: "gw".into(),
            kind: "device".into(),
            owner: "someone@example.com".into(),
            binding: Binding {
                mode: Mode::Mqtt,
                host: "broker".into(),
                port: 1883,
                data: "/deviot/someoneexample.com/gw/data".into(),
                action: "/deviot/someoneexample.com/gw/action".into(),
            },
        }
    }

    #[tokio::test]
    async fn logs_only_transitions() {
        let registrar = Scripted::new([None, Some(500), None, Some(204), Some(302), Some(404)]);
        let registered = Arc::new(AtomicBool::new(false));
        let mut heartbeat = Heartbeat::new("gw".into(), registrar.clone(), registered.clone());
        let model = identity().model(Vec::new());

        let mut logged = Vec::new();
        for _ in 0..6 {
            logged.push(heartbeat.beat(&model).await);
            if logged.len() == 3 {
                assert!(!registered.load(Ordering::SeqCst));
            }
        }

        assert_eq!(logged, [
            Some(Registration::Unregistered),
            None,
            None,
            Some(Registration::Registered),
            None,
            Some(Registration::Unregistered),
        ]);
        assert_eq!(registrar.seen.lock().len(), 6);
    }

    #[tokio::test]
    async fn first_success_is_logged() {
        let registrar = Scripted::new([Some(200), Some(200)]);
        let registered = Arc::new(AtomicBool::new(false));
        let mut heartbeat = Heartbeat::new("gw".into(), registrar, registered.clone());
        let model = identity().model(Vec::new());

        assert_eq!(heartbeat.beat(&model).await, Some(Registration::Registered));
        assert_eq!(heartbeat.beat(&model).await, None);
        assert!(registered.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn beats_on_fixed_interval_until_cancelled() {
        let registrar = Scripted::new([None; 8]);
        let registered = Arc::new(AtomicBool::new(false));
        let supervisor = RegistrationSupervisor::new(
            Heartbeat::new("gw".into(), registrar.clone(), registered),
            Arc::new(Registry::new()),
            identity(),
            DEFAULT_INTERVAL,
        );

        let token = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(token.clone()));

        // beats at 0s, 60s and 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        token.cancel();
        task.await.unwrap();

        let seen = registrar.seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].name, "gw");
        assert_eq!(seen[0].mode, Mode::Mqtt);
    }

    #[test]
    fn registrar_url() {
        assert_eq!(
            HttpRegistrar::new("http://deviot.local:9000/").url(),
            "http://deviot.local:9000/api/v1/gateways"
        );
        assert_eq!(
            HttpRegistrar::new("https://deviot.example.com").url(),
            "https://deviot.example.com/api/v1/gateways"
        );
    }
}

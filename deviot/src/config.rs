use core::time::Duration;

use compact_str::CompactString;
use serde::{Deserialize, Deserializer};

use crate::{connector::mqtt::DEFAULT_RECONNECT_DELAY, supervisor::DEFAULT_INTERVAL};

pub const DEFAULT_KIND: &str = "device";

/// Identity of the gateway and where it registers itself.
///
/// Durations are given in whole seconds when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Gateway name; `-` is replaced by `_` before use
    pub name: CompactString,
    /// Management server base URL, e.g. `http://deviot.local:9000`
    pub server: String,
    /// Owner account, also used for the topic namespace
    #[serde(default)]
    pub account: CompactString,
    #[serde(default = "default_kind")]
    pub kind: CompactString,
    #[serde(default = "default_heartbeat", deserialize_with = "seconds")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_reconnect", deserialize_with = "seconds")]
    pub reconnect_delay: Duration,
}

impl GatewayConfig {
    pub fn new(
        name: impl Into<CompactString>,
        server: impl Into<String>,
        account: impl Into<CompactString>,
    ) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            account: account.into(),
            kind: default_kind(),
            heartbeat_interval: DEFAULT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<CompactString>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

fn default_kind() -> CompactString {
    CompactString::const_new(DEFAULT_KIND)
}

fn default_heartbeat() -> Duration {
    DEFAULT_INTERVAL
}

fn default_reconnect() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::Thing;

/// How the management server reaches the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Mode {
    /// Server pulls data from the gateway over HTTP
    HttpPull,
    /// Gateway pushes data to the server over HTTP
    HttpPush,
    /// Both directions go through an MQTT broker
    Mqtt,
}

impl From<Mode> for u8 {
    fn from(value: Mode) -> Self {
        match value {
            Mode::HttpPull => 0,
            Mode::HttpPush => 1,
            Mode::Mqtt => 2,
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::HttpPull),
            1 => Ok(Mode::HttpPush),
            2 => Ok(Mode::Mqtt),
            _ => Err("unknown gateway mode"),
        }
    }
}

/// Registration document posted to `<server>/api/v1/gateways`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayModel {
    pub name: CompactString,
    pub kind: CompactString,
    pub mode: Mode,
    pub owner: CompactString,
    pub host: CompactString,
    pub port: u16,
    /// Topic (or URL) telemetry is published to
    pub data: CompactString,
    /// Topic (or URL) commands are received on
    pub action: CompactString,
    pub sensors: Vec<Thing>,
}

pub const REGISTRATION_PATH: &str = "/api/v1/gateways";

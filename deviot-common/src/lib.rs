use core::{fmt::Display, str::FromStr};

use compact_str::{CompactString, ToCompactString};

pub mod gateway;

mod property;
mod string;
mod thing;
pub use property::*;
pub use string::*;
pub use thing::*;

/// Decoded inbound command, or outbound telemetry.
pub type Envelope = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Telemetry published by the gateway
    Data {
        namespace: CompactString,
        gateway: CompactString,
    },
    /// Commands sent to the gateway
    Action {
        namespace: CompactString,
        gateway: CompactString,
    },
}

impl Topic {
    pub const ROOT: &'static str = "deviot";

    pub fn data(account: &str, gateway: &str) -> Self {
        Topic::Data {
            namespace: account_namespace(account),
            gateway: gateway.to_compact_string(),
        }
    }

    pub fn action(account: &str, gateway: &str) -> Self {
        Topic::Action {
            namespace: account_namespace(account),
            gateway: gateway.to_compact_string(),
        }
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Topic::Data { namespace, gateway } => {
                write!(f, "/{}/{}/{}/data", Self::ROOT, namespace, gateway)
            }
            Topic::Action { namespace, gateway } => {
                write!(f, "/{}/{}/{}/action", Self::ROOT, namespace, gateway)
            }
        }
    }
}

impl FromStr for Topic {
    type Err = &'static str;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let Some(s) = s.strip_prefix('/') else {
            return Err("does not start with /");
        };

        let mut parts = s.split('/');
        if parts.next() != Some(Self::ROOT) {
            return Err("does not start with /deviot/");
        }

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(gateway), Some(kind), None) => {
                let namespace = namespace.to_compact_string();
                let gateway = gateway.to_compact_string();
                match kind {
                    "data" => Ok(Topic::Data { namespace, gateway }),
                    "action" => Ok(Topic::Action { namespace, gateway }),
                    _ => Err("/deviot/{ns}/{name}/{data|action}"),
                }
            }
            (Some(_), Some(_), Some(_), Some(_)) => Err("/deviot/{ns}/{name}/{kind}/..."),
            (Some(_), Some(_), None, _) => Err("/deviot/{ns}/{name}"),
            (Some(_), None, _, _) => Err("/deviot/{ns}"),
            (None, _, _, _) => Err("/deviot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_display() {
        assert_eq!(
            Topic::data("someone@example.com", "pi_gateway").to_string(),
            "/deviot/someoneexample.com/pi_gateway/data"
        );

        assert_eq!(Topic::action("", "pi_gateway").to_string(), "/deviot/_/pi_gateway/action");
    }

    #[test]
    fn topic_from_str() {
        assert_eq!(
            "/deviot/someoneexample.com/pi_gateway/action".parse::<Topic>().unwrap(),
            Topic::Action {
                namespace: "someoneexample.com".into(),
                gateway: "pi_gateway".into(),
            }
        );

        assert_eq!(
            "/deviot/_/pi_gateway/data".parse::<Topic>().unwrap(),
            Topic::data("", "pi_gateway")
        );

        assert_eq!("deviot/_/gw/data".parse::<Topic>(), Err("does not start with /"));
        assert_eq!("/other/_/gw/data".parse::<Topic>(), Err("does not start with /deviot/"));
        assert_eq!(
            "/deviot/_/gw/status".parse::<Topic>(),
            Err("/deviot/{ns}/{name}/{data|action}")
        );
        assert_eq!(
            "/deviot/_/gw/data/extra".parse::<Topic>(),
            Err("/deviot/{ns}/{name}/{kind}/...")
        );
        assert_eq!("/deviot/_/gw".parse::<Topic>(), Err("/deviot/{ns}/{name}"));
        assert_eq!("/deviot/_".parse::<Topic>(), Err("/deviot/{ns}"));
    }
}

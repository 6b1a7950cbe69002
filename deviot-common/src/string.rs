use core::{borrow::Borrow, fmt::Display, ops::Deref};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Registry key of a thing, chosen by whoever registers it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingId(pub CompactString);

impl ThingId {
    pub const fn const_new(s: &'static str) -> Self {
        Self(CompactString::const_new(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl<T: AsRef<str>> From<T> for ThingId {
    fn from(value: T) -> Self {
        ThingId(CompactString::from(value.as_ref()))
    }
}

impl Deref for ThingId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl Borrow<str> for ThingId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl<T: AsRef<str> + ?Sized> PartialEq<T> for ThingId {
    fn eq(&self, other: &T) -> bool {
        self.0.as_str() == other.as_ref()
    }
}

impl Display for ThingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Gateway names travel inside topic segments, where `-` is not accepted by the
/// management server.
pub fn sanitize_gateway_name(name: &str) -> CompactString {
    name.replace('-', "_").into()
}

/// Topic namespace derived from an account identifier.
pub fn account_namespace(account: &str) -> CompactString {
    let ns = account.replace('@', "");
    if ns.is_empty() { CompactString::const_new("_") } else { ns.into() }
}

//! Endpoint descriptors and probe outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Auxiliary field holding the measured latency (milliseconds, as a string).
pub const LATENCY_FIELD: &str = "_latency";

/// A proxy-like endpoint as supplied by the caller.
///
/// The descriptor is an open JSON object of protocol-specific fields
/// (`name`, `type`, `server`, `port`, credentials, ...). relaycheck only
/// ever rewrites `name` and the `_latency` auxiliary field; everything else
/// is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(Map<String, Value>);

impl Endpoint {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Display name, or the empty string when absent.
    pub fn name(&self) -> &str {
        self.get_str("name").unwrap_or_default()
    }

    /// Protocol type (`http`, `socks5`, `ss`, `vmess`, ...).
    pub fn kind(&self) -> &str {
        self.get_str("type").unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.0.insert("name".to_string(), Value::String(name.into()));
    }

    pub fn latency(&self) -> Option<&str> {
        self.get_str(LATENCY_FIELD)
    }

    pub fn set_latency(&mut self, latency: impl Into<String>) {
        self.0
            .insert(LATENCY_FIELD.to_string(), Value::String(latency.into()));
    }

    /// Attach a latency to the endpoint, optionally prefixing the name
    /// with `[latency] `.
    pub fn annotate_latency(&mut self, latency: &str, show_in_name: bool) {
        if show_in_name {
            let name = format!("[{latency}] {}", self.name());
            self.set_name(name);
        }
        self.set_latency(latency);
    }
}

impl From<Map<String, Value>> for Endpoint {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind(), self.name())
    }
}

/// Why a probe ended up in the failed bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The request completed but the status did not match the accepted pattern.
    UnexpectedStatus(u16),
    /// Every attempt failed at the transport level.
    Transport(String),
    /// The descriptor could not be turned into a dialable node.
    Conversion(String),
    /// A failure recorded by a previous run was reused from the cache.
    CachedFailure,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedStatus(status) => write!(f, "unexpected status {status}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Conversion(e) => write!(f, "conversion: {e}"),
            Self::CachedFailure => f.write_str("cached failure"),
        }
    }
}

/// Result of probing a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Reachable; latency in milliseconds as a decimal string.
    Valid { latency: String, cached: bool },
    /// The protocol is not supported by the dialer.
    Incompatible,
    Failed(FailureReason),
}

impl ProbeOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

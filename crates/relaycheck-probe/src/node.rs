//! Conversion of endpoint descriptors into dialable nodes.
//!
//! A [`DialNode`] is the connection-ready form of an endpoint: the proxy
//! the probe request is routed through. Descriptors whose protocol the
//! dialer cannot speak convert to `None` and are classified incompatible.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use relaycheck_core::Endpoint;

use crate::error::{ProbeError, ProbeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// `Basic` authorization value for HTTP proxies.
    pub fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Address and credentials of an upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyServer {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Wrap the connection to the proxy itself in TLS.
    pub tls: bool,
}

/// A protocol-specific, connection-ready node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialNode {
    Http(ProxyServer),
    Socks5(ProxyServer),
}

impl DialNode {
    pub fn server(&self) -> &ProxyServer {
        match self {
            Self::Http(server) | Self::Socks5(server) => server,
        }
    }
}

/// Turns descriptors into dialable nodes.
///
/// `Ok(None)` means the protocol is not supported by this dialer; an error
/// means the descriptor claims a supported protocol but is malformed.
pub trait NodeProducer: Send + Sync {
    fn produce(&self, endpoint: &Endpoint) -> ProbeResult<Option<DialNode>>;
}

/// Producer for the protocols the built-in transport can dial:
/// `http`, `https` and `socks5`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinProducer;

impl NodeProducer for BuiltinProducer {
    fn produce(&self, endpoint: &Endpoint) -> ProbeResult<Option<DialNode>> {
        match endpoint.kind().to_ascii_lowercase().as_str() {
            "http" => {
                let tls = endpoint.get("tls").and_then(Value::as_bool).unwrap_or(false);
                Ok(Some(DialNode::Http(proxy_server(endpoint, tls)?)))
            }
            "https" => Ok(Some(DialNode::Http(proxy_server(endpoint, true)?))),
            "socks5" => Ok(Some(DialNode::Socks5(proxy_server(endpoint, false)?))),
            _ => Ok(None),
        }
    }
}

fn proxy_server(endpoint: &Endpoint, tls: bool) -> ProbeResult<ProxyServer> {
    let host = endpoint
        .get_str("server")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProbeError::Descriptor(format!("{endpoint}: missing server")))?;

    let port = match endpoint.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    }
    .filter(|p| *p != 0)
    .ok_or_else(|| ProbeError::Descriptor(format!("{endpoint}: missing or invalid port")))?;

    let credentials = endpoint
        .get_str("username")
        .filter(|u| !u.is_empty())
        .map(|username| Credentials {
            username: username.to_string(),
            password: endpoint.get_str("password").unwrap_or_default().to_string(),
        });

    Ok(ProxyServer {
        host: host.to_string(),
        port,
        credentials,
        tls,
    })
}

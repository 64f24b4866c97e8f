//! Probe pipeline error types.

use std::time::Duration;

use thiserror::Error;

/// A single attempt failed to produce an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("proxy handshake failed: {0}")]
    Proxy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the probe pipeline.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The descriptor names a supported protocol but cannot be dialed.
    #[error("malformed descriptor: {0}")]
    Descriptor(String),

    #[error("request failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("tls setup failed: {0}")]
    TlsSetup(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

//! HTTP transport used by probes and notifications.
//!
//! [`Transport`] performs exactly one attempt; retries live in the
//! [`Requester`](crate::requester::Requester). [`HyperTransport`] dials
//! directly or through a [`DialNode`], speaking HTTP/1.1 via hyper and TLS
//! via rustls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HOST, HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{ProbeError, TransportError};
use crate::node::{DialNode, ProxyServer};
use crate::tunnel::{authority, http_connect, socks5_connect};

/// One logical HTTP request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Per-attempt deadline covering connect, handshake and response.
    pub timeout: Duration,
    /// Route the request through this node; `None` dials the target directly.
    pub node: Option<DialNode>,
}

impl ProbeRequest {
    pub fn new(method: Method, uri: Uri, timeout: Duration) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout,
            node: None,
        }
    }

    pub fn header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn via(mut self, node: Option<DialNode>) -> Self {
        self.node = node;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Sends a single request attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError>;
}

/// Configuration for TLS connections.
#[derive(Clone)]
pub struct TlsConfig {
    /// Pre-built `rustls` client configuration.
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Create a TLS config using the Mozilla root certificate store.
    pub fn with_webpki_roots() -> Result<Self, ProbeError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::TlsSetup(format!("tls protocol version error: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }
}

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type BoxIo = Box<dyn Io>;

/// Where a request is headed, derived from its URI.
struct Target {
    host: String,
    port: u16,
    tls: bool,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self, TransportError> {
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| TransportError::InvalidRequest(format!("missing host in {uri}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Ok(Self { host, port, tls })
    }
}

/// hyper-based transport that can route through HTTP and SOCKS5 proxies.
#[derive(Clone)]
pub struct HyperTransport {
    tls: TlsConfig,
}

impl HyperTransport {
    pub fn new(tls: TlsConfig) -> Self {
        Self { tls }
    }

    /// Transport trusting the webpki root store.
    pub fn with_webpki_roots() -> Result<Self, ProbeError> {
        Ok(Self::new(TlsConfig::with_webpki_roots()?))
    }

    async fn exchange(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let target = Target::from_uri(&request.uri)?;
        let (io, forward) = self.open(&target, request.node.as_ref()).await?;
        let io = if target.tls {
            self.wrap_tls(io, &target.host).await?
        } else {
            io
        };

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "probe connection closed with error");
            }
        });

        // Plain-HTTP requests through an HTTP proxy use the absolute form.
        let uri = match forward {
            Some(_) => request.uri.clone(),
            None => request
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
                .parse::<Uri>()
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
        };

        let mut req = http::Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Full::new(request.body.clone()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let headers = req.headers_mut();
        headers.extend(request.headers.clone());
        if !headers.contains_key(HOST) {
            let host = match request.uri.port_u16() {
                Some(port) => authority(&target.host, port),
                None => authority_host(&target.host),
            };
            let value = HeaderValue::from_str(&host)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(HOST, value);
        }
        if let Some(credentials) = forward.and_then(|server| server.credentials.as_ref()) {
            let value = HeaderValue::from_str(&credentials.basic_auth())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(PROXY_AUTHORIZATION, value);
        }

        let response = sender.send_request(req).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok(ProbeResponse { status, body })
    }

    /// Establish a byte stream towards the target.
    ///
    /// Returns the HTTP proxy when the request must be forwarded in
    /// absolute form rather than tunnelled.
    async fn open<'a>(
        &self,
        target: &Target,
        node: Option<&'a DialNode>,
    ) -> Result<(BoxIo, Option<&'a ProxyServer>), TransportError> {
        match node {
            None => Ok((connect(&target.host, target.port).await?, None)),
            Some(DialNode::Http(server)) => {
                let mut io = connect(&server.host, server.port).await?;
                if server.tls {
                    io = self.wrap_tls(io, &server.host).await?;
                }
                if target.tls {
                    http_connect(&mut io, &target.host, target.port, server.credentials.as_ref())
                        .await?;
                    Ok((io, None))
                } else {
                    Ok((io, Some(server)))
                }
            }
            Some(DialNode::Socks5(server)) => {
                let mut io = connect(&server.host, server.port).await?;
                socks5_connect(&mut io, &target.host, target.port, server.credentials.as_ref())
                    .await?;
                Ok((io, None))
            }
        }
    }

    async fn wrap_tls(&self, io: BoxIo, host: &str) -> Result<BoxIo, TransportError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name {host}: {e}")))?;
        let connector = TlsConnector::from(self.tls.client_config.clone());
        let stream = connector
            .connect(server_name, io)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}

async fn connect(host: &str, port: u16) -> Result<BoxIo, TransportError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| TransportError::Connect {
            addr: authority(host, port),
            source,
        })?;
    let _ = stream.set_nodelay(true);
    Ok(Box::new(stream))
}

fn authority_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Credentials;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request head, reply with `response`.
    async fn one_shot_server(response: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_head(&mut socket).await;
            socket.write_all(response).await.unwrap();
            socket.flush().await.unwrap();
            head
        });
        (port, handle)
    }

    async fn read_head(socket: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if socket.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        String::from_utf8_lossy(&head).to_string()
    }

    fn transport() -> HyperTransport {
        HyperTransport::with_webpki_roots().unwrap()
    }

    #[tokio::test]
    async fn direct_head_request() {
        let (port, server) = one_shot_server(b"HTTP/1.1 204 No Content\r\n\r\n").await;
        let uri: Uri = format!("http://127.0.0.1:{port}/generate_204").parse().unwrap();
        let request = ProbeRequest::new(Method::HEAD, uri, Duration::from_secs(2)).header(
            http::header::USER_AGENT,
            HeaderValue::from_static("relaycheck-test"),
        );

        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("head /generate_204 http/1.1\r\n"), "{head}");
        assert!(head.contains("user-agent: relaycheck-test"));
        assert!(head.contains(&format!("host: 127.0.0.1:{port}")));
    }

    #[tokio::test]
    async fn http_proxy_uses_absolute_form() {
        let (port, proxy) =
            one_shot_server(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok").await;
        let node = DialNode::Http(ProxyServer {
            host: "127.0.0.1".into(),
            port,
            credentials: Some(Credentials {
                username: "user".into(),
                password: "pass".into(),
            }),
            tls: false,
        });
        let uri: Uri = "http://probe.invalid/ping".parse().unwrap();
        let request = ProbeRequest::new(Method::GET, uri, Duration::from_secs(2)).via(Some(node));

        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"ok");

        let head = proxy.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get http://probe.invalid/ping http/1.1\r\n"), "{head}");
        assert!(head.contains("proxy-authorization: basic dxnlcjpwyxnz"));
        assert!(head.contains("host: probe.invalid"));
    }

    #[tokio::test]
    async fn socks5_proxy_tunnels_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            socket.read_exact(&mut greeting).await.unwrap();
            socket.write_all(&[5, 0]).await.unwrap();
            let mut head = [0u8; 5];
            socket.read_exact(&mut head).await.unwrap();
            let mut rest = vec![0u8; head[4] as usize + 2];
            socket.read_exact(&mut rest).await.unwrap();
            socket
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 80])
                .await
                .unwrap();
            let request = read_head(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
            (String::from_utf8_lossy(&rest[..rest.len() - 2]).to_string(), request)
        });

        let node = DialNode::Socks5(ProxyServer {
            host: "127.0.0.1".into(),
            port,
            credentials: None,
            tls: false,
        });
        let uri: Uri = "http://probe.invalid/generate_204".parse().unwrap();
        let request = ProbeRequest::new(Method::HEAD, uri, Duration::from_secs(2)).via(Some(node));

        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        let (requested_host, head) = proxy.await.unwrap();
        assert_eq!(requested_host, "probe.invalid");
        assert!(head.to_ascii_lowercase().starts_with("head /generate_204 http/1.1\r\n"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let uri: Uri = format!("http://127.0.0.1:{port}/").parse().unwrap();
        let request = ProbeRequest::new(Method::HEAD, uri, Duration::from_millis(100));
        let err = transport().send(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let uri: Uri = format!("http://127.0.0.1:{port}/").parse().unwrap();
        let request = ProbeRequest::new(Method::HEAD, uri, Duration::from_secs(2));
        let err = transport().send(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let uri: Uri = "ftp://example.com/".parse().unwrap();
        assert!(Target::from_uri(&uri).is_err());
    }

    #[test]
    fn target_default_ports() {
        let http = Target::from_uri(&"http://a.example/x".parse().unwrap()).unwrap();
        assert_eq!((http.port, http.tls), (80, false));
        let https = Target::from_uri(&"https://a.example/x".parse().unwrap()).unwrap();
        assert_eq!((https.port, https.tls), (443, true));
    }
}

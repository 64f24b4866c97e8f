//! Proxy handshakes: HTTP `CONNECT` and SOCKS5.
//!
//! Both leave the stream positioned at the start of the tunnelled
//! connection to the target.

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::node::Credentials;

/// Upper bound on a `CONNECT` response head.
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_USER_PASS: u8 = 0x02;
const SOCKS_NO_ACCEPTABLE: u8 = 0xff;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

/// `host:port`, bracketing IPv6 literals.
pub(crate) fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Open a tunnel to `host:port` through an HTTP proxy.
pub(crate) async fn http_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = authority(host, port);
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(credentials) = credentials {
        request.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            credentials.basic_auth()
        ));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Read byte-wise so nothing past the response head is consumed.
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(TransportError::Proxy("CONNECT response too large".into()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(TransportError::Proxy(
                "proxy closed the connection during CONNECT".into(),
            ));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| TransportError::Proxy("malformed CONNECT response".into()))?;

    if !(200..300).contains(&status) {
        return Err(TransportError::Proxy(format!(
            "CONNECT rejected with status {status}"
        )));
    }
    Ok(())
}

/// Open a tunnel to `host:port` through a SOCKS5 proxy (RFC 1928),
/// authenticating with username/password (RFC 1929) when given.
pub(crate) async fn socks5_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = match credentials {
        Some(_) => &[SOCKS_VERSION, 2, SOCKS_NO_AUTH, SOCKS_USER_PASS],
        None => &[SOCKS_VERSION, 1, SOCKS_NO_AUTH],
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(TransportError::Proxy(format!(
            "unexpected SOCKS version {}",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (SOCKS_NO_AUTH, _) => {}
        (SOCKS_USER_PASS, Some(credentials)) => {
            socks5_authenticate(stream, credentials).await?;
        }
        (SOCKS_NO_ACCEPTABLE, _) => {
            return Err(TransportError::Proxy(
                "no acceptable SOCKS authentication method".into(),
            ));
        }
        (method, _) => {
            return Err(TransportError::Proxy(format!(
                "unsupported SOCKS authentication method {method:#04x}"
            )));
        }
    }

    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    match bare_host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len()).map_err(|_| {
                TransportError::Proxy(format!("hostname too long for SOCKS5: {host}"))
            })?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(TransportError::Proxy(format!(
            "SOCKS5 connect failed with reply {:#04x}",
            reply[1]
        )));
    }

    // Discard the bound address.
    let skip = match reply[3] {
        SOCKS_ATYP_IPV4 => 4 + 2,
        SOCKS_ATYP_IPV6 => 16 + 2,
        SOCKS_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => {
            return Err(TransportError::Proxy(format!(
                "unknown SOCKS5 address type {other:#04x}"
            )));
        }
    };
    let mut bound = vec![0u8; skip];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

async fn socks5_authenticate<S>(
    stream: &mut S,
    credentials: &Credentials,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = credentials.username.as_bytes();
    let password = credentials.password.as_bytes();
    let (Ok(ulen), Ok(plen)) = (u8::try_from(username.len()), u8::try_from(password.len())) else {
        return Err(TransportError::Proxy("SOCKS5 credentials too long".into()));
    };

    let mut auth = Vec::with_capacity(3 + username.len() + password.len());
    auth.push(0x01);
    auth.push(ulen);
    auth.extend_from_slice(username);
    auth.push(plen);
    auth.extend_from_slice(password);
    stream.write_all(&auth).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != 0x00 {
        return Err(TransportError::Proxy("SOCKS5 authentication rejected".into()));
    }
    Ok(())
}

// src/tunnel.rs
//! Proxy handshakes
//!
//! Runs on a stream already connected to the proxy. SOCKS4 and SOCKS5 are
//! delegated to `tokio-socks`; HTTP proxies get a plain `CONNECT` exchange.

use crate::provider::handle::TargetAddr;
use crate::provider::proxy::{ProxyConfig, ProxyType};
use crate::utils::errors::{Result, SockyError};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use std::borrow::Cow;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::debug;

/// Upper bound on an HTTP proxy response head
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Perform the handshake for `config.proxy_type`, asking the proxy to
/// connect to `target`
pub(crate) async fn establish(
    stream: TcpStream,
    config: &ProxyConfig,
    target: &TargetAddr,
) -> Result<TcpStream> {
    let target = match target {
        TargetAddr::Domain(..) if !config.remote_dns => TargetAddr::Ip(target.resolve_any().await?),
        _ => target.clone(),
    };

    let stream = match config.proxy_type {
        ProxyType::Socks5 => socks5(stream, config, &target).await?,
        ProxyType::Socks4 => socks4(stream, config, &target).await?,
        ProxyType::Http => http_connect(stream, config, &target).await?,
    };

    debug!("{} tunnel to {} established", config.proxy_type, target);
    Ok(stream)
}

fn socks_target(target: &TargetAddr) -> tokio_socks::TargetAddr<'_> {
    match target {
        TargetAddr::Ip(addr) => tokio_socks::TargetAddr::Ip(*addr),
        TargetAddr::Domain(host, port) => {
            tokio_socks::TargetAddr::Domain(Cow::Borrowed(host.as_str()), *port)
        }
    }
}

async fn socks5(stream: TcpStream, config: &ProxyConfig, target: &TargetAddr) -> Result<TcpStream> {
    let result = match &config.credentials {
        Some(credentials) => {
            Socks5Stream::connect_with_password_and_socket(
                stream,
                socks_target(target),
                credentials.username(),
                credentials.password(),
            )
            .await
        }
        None => Socks5Stream::connect_with_socket(stream, socks_target(target)).await,
    };

    result.map(Socks5Stream::into_inner).map_err(|e| {
        SockyError::backend(
            format!("SOCKS5 handshake with {}:{} failed", config.host, config.port),
            e,
        )
    })
}

async fn socks4(stream: TcpStream, config: &ProxyConfig, target: &TargetAddr) -> Result<TcpStream> {
    // SOCKS4 carries a user id only
    let result = match &config.credentials {
        Some(credentials) => {
            Socks4Stream::connect_with_userid_and_socket(
                stream,
                socks_target(target),
                credentials.username(),
            )
            .await
        }
        None => Socks4Stream::connect_with_socket(stream, socks_target(target)).await,
    };

    result.map(Socks4Stream::into_inner).map_err(|e| {
        SockyError::backend(
            format!("SOCKS4 handshake with {}:{} failed", config.host, config.port),
            e,
        )
    })
}

async fn http_connect(
    mut stream: TcpStream,
    config: &ProxyConfig,
    target: &TargetAddr,
) -> Result<TcpStream> {
    let authority = match target {
        TargetAddr::Ip(addr) => addr.to_string(),
        TargetAddr::Domain(host, port) => format!("{}:{}", host, port),
    };

    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(credentials) = &config.credentials {
        let token = BASE64_STANDARD.encode(format!(
            "{}:{}",
            credentials.username(),
            credentials.password()
        ));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("Proxy-Connection: keep-alive\r\n\r\n");

    let handshake_failed =
        |e: std::io::Error| SockyError::backend(format!("HTTP CONNECT to {} failed", authority), e);

    stream.write_all(request.as_bytes()).await.map_err(handshake_failed)?;
    let head = read_response_head(&mut stream).await.map_err(handshake_failed)?;

    let status = parse_status(&head)?;
    if !(200..300).contains(&status) {
        return Err(SockyError::backend_msg(format!(
            "HTTP proxy CONNECT to {} failed with status {}",
            authority, status
        )));
    }

    Ok(stream)
}

/// Read up to and including the blank line ending the response head.
///
/// Reads byte by byte so no tunneled bytes are consumed.
async fn read_response_head(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "HTTP proxy response head too large",
            ));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        head.push(byte[0]);
    }

    Ok(head)
}

fn parse_status(head: &[u8]) -> Result<u16> {
    let text = String::from_utf8_lossy(head);
    let status_line = text.lines().next().unwrap_or_default();

    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| SockyError::backend_msg(format!("invalid HTTP proxy status line: {}", status_line))),
        _ => Err(SockyError::backend_msg(format!(
            "invalid HTTP proxy status line: {}",
            status_line
        ))),
    }
}

// src/provider/handle.rs
//! Socket handles returned by providers
//!
//! A handle starts as an unconnected native socket. Connecting it either
//! dials the target directly or, for tunneled handles, dials the proxy and
//! runs the proxy handshake before any application bytes flow.

use crate::provider::logger::{LogSink, SocketEvent};
use crate::provider::proxy::ProxyConfig;
use crate::provider::{self, AddressFamily, SocketArgs, SocketKind};
use crate::tunnel;
use crate::utils::errors::{Result, SockyError};
use socket2::Socket;
use std::fmt;
use std::io;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, trace};

/// Destination of a connect call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ip(SocketAddr),
    /// Host name, resolved locally or by the proxy
    Domain(String, u16),
}

impl TargetAddr {
    pub fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }

    pub fn host(&self) -> String {
        match self {
            Self::Ip(addr) => addr.ip().to_string(),
            Self::Domain(host, _) => host.clone(),
        }
    }

    /// Resolve to an address usable by a socket of `family`
    pub async fn resolve(&self, family: AddressFamily) -> Result<SocketAddr> {
        match self {
            Self::Ip(addr) => Ok(*addr),
            Self::Domain(host, port) => {
                let mut addrs = tokio::net::lookup_host((host.as_str(), *port)).await?;
                addrs.find(|addr| family.matches(addr)).ok_or_else(|| {
                    SockyError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no {:?} address found for {}", family, host),
                    ))
                })
            }
        }
    }

    /// Resolve to any address, preferring IPv4
    pub async fn resolve_any(&self) -> Result<SocketAddr> {
        match self.resolve(AddressFamily::Ipv4).await {
            Ok(addr) => Ok(addr),
            Err(_) => self.resolve(AddressFamily::Ipv6).await,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{}", addr),
            Self::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

impl FromStr for TargetAddr {
    type Err = SockyError;

    /// Parse `host:port`, `a.b.c.d:port` or `[v6]:port`
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Ip(addr));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SockyError::Configuration(format!("missing port in address: {}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| SockyError::Configuration(format!("invalid port in address: {}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SockyError::Configuration(format!("missing host in address: {}", s)));
        }

        Ok(Self::from((host, port)))
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl From<(IpAddr, u16)> for TargetAddr {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::Ip(SocketAddr::new(ip, port))
    }
}

impl From<(&str, u16)> for TargetAddr {
    fn from((host, port): (&str, u16)) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(SocketAddr::new(ip, port)),
            Err(_) => Self::Domain(host.to_string(), port),
        }
    }
}

impl From<(String, u16)> for TargetAddr {
    fn from((host, port): (String, u16)) -> Self {
        Self::from((host.as_str(), port))
    }
}

#[derive(Debug)]
enum State {
    Unconnected(Socket),
    Stream(TcpStream),
    Datagram(UdpSocket),
    Closed,
}

/// Socket handle owned by the caller that requested it
#[derive(Debug)]
pub struct SocketHandle {
    args: SocketArgs,
    state: State,
    /// Proxy to tunnel through on connect
    tunnel: Option<Arc<ProxyConfig>>,
    /// Sink notified of connect attempts
    observer: Option<Arc<dyn LogSink>>,
}

impl SocketHandle {
    pub(crate) fn native(args: SocketArgs, socket: Socket) -> Self {
        Self {
            args,
            state: State::Unconnected(socket),
            tunnel: None,
            observer: None,
        }
    }

    pub(crate) fn tunneled(mut self, config: Arc<ProxyConfig>) -> Self {
        self.tunnel = Some(config);
        self
    }

    pub(crate) fn observed(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.observer = Some(sink);
        self
    }

    /// Arguments this socket was constructed with
    pub fn args(&self) -> SocketArgs {
        self.args
    }

    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Proxy this socket tunnels through, if any
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.tunnel.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Stream(_) | State::Datagram(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Connect to `target`, through the proxy when the handle is tunneled.
    ///
    /// A failed connect consumes the underlying socket; the handle is closed
    /// afterwards.
    pub async fn connect(&mut self, target: impl Into<TargetAddr>) -> Result<()> {
        let target = target.into();

        if let Some(observer) = &self.observer {
            observer.record(&SocketEvent::Connect {
                args: self.args,
                target: target.clone(),
            });
        }

        let socket = match mem::replace(&mut self.state, State::Closed) {
            State::Unconnected(socket) => socket,
            other => {
                self.state = other;
                return Err(SockyError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "socket is already connected or closed",
                )));
            }
        };

        self.state = match (self.args.kind, &self.tunnel) {
            (SocketKind::Stream, Some(proxy)) => {
                // The socket dials the proxy, not the target, so it must
                // carry the proxy's family
                let proxy_addr = proxy.endpoint().resolve_any().await?;
                let socket = if self.args.family.matches(&proxy_addr) {
                    socket
                } else {
                    trace!("Rebuilding {} socket for proxy {}", self.args, proxy_addr);
                    provider::raw_socket(self.args.with_family(AddressFamily::of(&proxy_addr)))?
                };
                debug!("Connecting to {} via {} proxy {}", target, proxy.proxy_type, proxy_addr);
                let stream = connect_stream(socket, proxy_addr).await?;
                State::Stream(tunnel::establish(stream, proxy, &target).await?)
            }
            (SocketKind::Stream, None) => {
                let addr = target.resolve(self.args.family).await?;
                trace!("Connecting stream socket to {}", addr);
                State::Stream(connect_stream(socket, addr).await?)
            }
            (SocketKind::Datagram, None) => {
                let addr = target.resolve(self.args.family).await?;
                let udp = UdpSocket::from_std(socket.into())?;
                udp.connect(addr).await?;
                State::Datagram(udp)
            }
            (SocketKind::Datagram, Some(_)) => {
                return Err(SockyError::Unsupported(
                    "datagram sockets cannot be tunneled".to_string(),
                ))
            }
        };

        Ok(())
    }

    /// Send bytes, returning how many were written
    pub async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.state {
            State::Stream(stream) => Ok(stream.write(buf).await?),
            State::Datagram(udp) => Ok(udp.send(buf).await?),
            _ => Err(not_connected()),
        }
    }

    /// Send the whole buffer
    pub async fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.state {
            State::Stream(stream) => Ok(stream.write_all(buf).await?),
            State::Datagram(udp) => {
                let sent = udp.send(buf).await?;
                if sent != buf.len() {
                    return Err(SockyError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "datagram truncated",
                    )));
                }
                Ok(())
            }
            _ => Err(not_connected()),
        }
    }

    /// Receive bytes; 0 means the peer closed a stream
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.state {
            State::Stream(stream) => Ok(stream.read(buf).await?),
            State::Datagram(udp) => Ok(udp.recv(buf).await?),
            _ => Err(not_connected()),
        }
    }

    /// Close the socket. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let State::Stream(mut stream) = mem::replace(&mut self.state, State::Closed) {
            match stream.shutdown().await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.state {
            State::Unconnected(socket) => socket.local_addr()?.as_socket().ok_or_else(|| {
                SockyError::Unsupported("socket has no IP address".to_string())
            }),
            State::Stream(stream) => Ok(stream.local_addr()?),
            State::Datagram(udp) => Ok(udp.local_addr()?),
            State::Closed => Err(not_connected()),
        }
    }

    /// Address of the connected peer; for tunneled sockets this is the proxy
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.state {
            State::Stream(stream) => Ok(stream.peer_addr()?),
            State::Datagram(udp) => Ok(udp.peer_addr()?),
            _ => Err(not_connected()),
        }
    }

    /// Take the connected stream out of the handle
    pub fn into_stream(self) -> Result<TcpStream> {
        match self.state {
            State::Stream(stream) => Ok(stream),
            _ => Err(not_connected()),
        }
    }
}

async fn connect_stream(socket: Socket, addr: SocketAddr) -> Result<TcpStream> {
    let socket = TcpSocket::from_std_stream(socket.into());
    Ok(socket.connect(addr).await?)
}

fn not_connected() -> SockyError {
    SockyError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "socket is not connected",
    ))
}

// src/provider/mod.rs
//! Socket providers
//!
//! A provider decides how a socket is actually constructed. Every provider
//! receives the same arguments the native constructor accepts and returns a
//! [`SocketHandle`] the caller can use exactly like a native socket.
//!
//! - **Native**: the underlying constructor, never substituted
//! - **Proxy**: tunnels through a SOCKS4/SOCKS5/HTTP proxy
//! - **Tor**: discovers the SOCKS listener of a running Tor and wraps a proxy provider
//! - **Logging**: passes through to the native constructor, recording every call
//!
//! # Architecture
//!
//! ```text
//! socky::socket(args)
//!     │
//!     └─ Interceptor → active Provider
//!                          ├─ NativeProvider  → socket2::Socket
//!                          ├─ ProxyProvider   → native socket + tunnel
//!                          ├─ TorProvider     → ProxyProvider (discovered)
//!                          └─ LoggingProvider → LogSink + native socket
//! ```

pub mod handle;
pub mod logger;
pub mod proxy;
pub mod tor;

// Re-export commonly used types
pub use handle::{SocketHandle, TargetAddr};
pub use logger::{LogSink, LoggingProvider, MemorySink, SocketEvent, TracingSink};
pub use proxy::{Credentials, ProxyConfig, ProxyProvider, ProxyProviderBuilder, ProxyType};
pub use tor::{TorDiscovery, TorProvider};

use crate::utils::errors::{Result, SockyError};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::net::SocketAddr;

/// Address family of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn domain(self) -> Domain {
        match self {
            Self::Ipv4 => Domain::IPV4,
            Self::Ipv6 => Domain::IPV6,
        }
    }

    /// Whether `addr` can be reached from a socket of this family
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Ipv4 => addr.is_ipv4(),
            Self::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Family of `addr`
    pub fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv6() {
            Self::Ipv6
        } else {
            Self::Ipv4
        }
    }
}

/// Kind of socket (stream or datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    #[default]
    Stream,
    Datagram,
}

impl SocketKind {
    fn socket_type(self) -> Type {
        match self {
            Self::Stream => Type::STREAM,
            Self::Datagram => Type::DGRAM,
        }
    }
}

/// Arguments for socket construction
///
/// Defaults match the native constructor: IPv4, stream, protocol chosen by
/// the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SocketArgs {
    pub family: AddressFamily,
    pub kind: SocketKind,
    pub protocol: Option<i32>,
}

impl SocketArgs {
    pub fn new(family: AddressFamily, kind: SocketKind) -> Self {
        Self {
            family,
            kind,
            protocol: None,
        }
    }

    /// IPv4 stream socket
    pub fn stream() -> Self {
        Self::new(AddressFamily::Ipv4, SocketKind::Stream)
    }

    /// IPv4 datagram socket
    pub fn datagram() -> Self {
        Self::new(AddressFamily::Ipv4, SocketKind::Datagram)
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_protocol(mut self, protocol: i32) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

impl fmt::Display for SocketArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.family {
            AddressFamily::Ipv4 => "AF_INET",
            AddressFamily::Ipv6 => "AF_INET6",
        };
        let kind = match self.kind {
            SocketKind::Stream => "SOCK_STREAM",
            SocketKind::Datagram => "SOCK_DGRAM",
        };
        write!(f, "({}, {}, {})", family, kind, self.protocol.unwrap_or(0))
    }
}

/// Capability contract for socket construction
///
/// Implementations hold only configuration fixed at construction time and
/// must tolerate concurrent callers.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Provider name (e.g. "tor")
    fn name(&self) -> &str;

    /// Construct a socket from the native constructor's arguments.
    ///
    /// Every concrete provider overrides this; the default refuses.
    fn socket(&self, _args: SocketArgs) -> Result<SocketHandle> {
        Err(SockyError::NotImplemented(self.name().to_string()))
    }
}

/// Signature of the native socket constructor
pub type Constructor = fn(SocketArgs) -> Result<SocketHandle>;

/// The real, never-substituted constructor.
///
/// Providers that fall back to native behaviour call this instead of going
/// through the interception layer, which would recurse into themselves.
pub fn underlying_constructor() -> Constructor {
    native_socket
}

/// Whether the process-wide interception layer is currently substituting
/// socket construction
pub fn is_substitution_active() -> bool {
    crate::interception::is_active()
}

/// Nonblocking OS socket for `args`
pub(crate) fn raw_socket(args: SocketArgs) -> Result<Socket> {
    let socket = Socket::new(
        args.family.domain(),
        args.kind.socket_type(),
        args.protocol.map(Protocol::from),
    )?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn native_socket(args: SocketArgs) -> Result<SocketHandle> {
    Ok(SocketHandle::native(args, raw_socket(args)?))
}

/// Provider backed by the underlying constructor
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProvider;

impl Provider for NativeProvider {
    fn name(&self) -> &str {
        "native"
    }

    fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        underlying_constructor()(args)
    }
}

// src/lib.rs
//! Socky: process-wide socket provider substitution
//!
//! Socket construction goes through a registry that can be rebound at
//! runtime, so every socket made after activation is tunneled, logged or
//! otherwise handled by a pluggable provider.
//!
//! # Architecture
//!
//! - **provider**: the provider contract plus the native, proxy, Tor and
//!   logging providers
//! - **interception**: the substitution registry and socket factories
//! - **tunnel**: SOCKS4, SOCKS5 and HTTP CONNECT handshakes
//! - **control**: minimal Tor control-port client
//! - **observability**: tracing subscriber setup and metric names
//! - **utils**: configuration and errors
//!
//! ```text
//!   caller ──► SocketFactory ──► Interceptor ──► active Provider
//!                                   │                 │
//!                                   └── original ◄────┘ underlying_constructor()
//! ```

pub mod control;
pub mod interception;
pub mod observability;
pub mod provider;
pub mod utils;

mod tunnel;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use interception::{
    disable, enable, factory, global, is_active, socket, InterceptionState, Interceptor, SocketFactory,
};
pub use provider::{
    underlying_constructor, AddressFamily, Credentials, LoggingProvider, NativeProvider, Provider, ProxyProvider,
    ProxyType, SocketArgs, SocketHandle, SocketKind, TargetAddr, TorProvider,
};
pub use utils::config::SockyConfig;
pub use utils::errors::{Result, SockyError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Library build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

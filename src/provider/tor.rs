// src/provider/tor.rs
//! Tor-backed provider
//!
//! Asks a running Tor instance, over its control port, which SOCKS listener
//! to use and then behaves exactly like a SOCKS5 [`ProxyProvider`] bound to it.

use crate::control::{ControlError, TorController};
use crate::provider::handle::SocketHandle;
use crate::provider::proxy::{ProxyProvider, ProxyType};
use crate::provider::{Provider, SocketArgs};
use crate::utils::errors::{Result, SockyError};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default Tor control port
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// What was learned from the control channel at construction time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorDiscovery {
    pub control_addr: SocketAddr,
    pub socks_host: String,
    pub socks_port: u16,
}

/// Provider routing sockets through the SOCKS listener of a local Tor
#[derive(Debug)]
pub struct TorProvider {
    name: String,
    discovery: TorDiscovery,
    /// Kept open for the provider's lifetime; never shared
    controller: Mutex<TorController>,
    socks: ProxyProvider,
}

impl TorProvider {
    /// Discover through the default control port (9051)
    pub async fn connect_default(secret: &str) -> Result<Self> {
        Self::connect(secret, DEFAULT_CONTROL_PORT).await
    }

    /// Discover through the control port on localhost
    pub async fn connect(secret: &str, control_port: u16) -> Result<Self> {
        Self::connect_addr(secret, SocketAddr::from((Ipv4Addr::LOCALHOST, control_port))).await
    }

    pub async fn connect_addr(secret: &str, control_addr: SocketAddr) -> Result<Self> {
        let mut controller = TorController::connect(control_addr).await.map_err(|e| {
            SockyError::backend(format!("Unable to create Tor-backed socket: {}", e), e)
        })?;

        controller.authenticate(secret).await.map_err(|e| {
            let context = if matches!(e, ControlError::Authentication(_)) {
                "Error authenticating to Tor"
            } else {
                "Unable to create Tor-backed socket"
            };
            SockyError::backend(format!("{}: {}", context, e), e)
        })?;

        let listeners = controller.socks_listeners().await.map_err(|e| {
            SockyError::backend(format!("Unable to query Tor SOCKS listeners: {}", e), e)
        })?;
        debug!("Tor reported {} SOCKS listener(s)", listeners.len());

        let (socks_host, socks_port) = listeners.into_iter().next().ok_or_else(|| {
            SockyError::Configuration("proxy backend not configured to allow SOCKS".to_string())
        })?;

        let socks = ProxyProvider::builder(socks_host.clone(), socks_port)
            .name("tor-socks")
            .proxy_type(ProxyType::Socks5)
            .build()?;

        info!(
            "Using Tor SOCKS listener {}:{} (control port {})",
            socks_host, socks_port, control_addr
        );

        Ok(Self {
            name: "tor".to_string(),
            discovery: TorDiscovery {
                control_addr,
                socks_host,
                socks_port,
            },
            controller: Mutex::new(controller),
            socks,
        })
    }

    /// Replace the default "tor" name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn discovery(&self) -> &TorDiscovery {
        &self.discovery
    }

    /// The wrapped SOCKS provider
    pub fn socks_provider(&self) -> &ProxyProvider {
        &self.socks
    }

    pub fn controller(&self) -> &Mutex<TorController> {
        &self.controller
    }
}

impl Provider for TorProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        let handle = self.socks.socket(args)?;
        debug!("Built Tor-backed socket {}", args);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{global_lock, spawn_socks5_stub, spawn_tor_control_stub, TorStub};
    use std::error::Error as _;

    #[tokio::test]
    async fn test_discovers_first_listener() {
        let addr = spawn_tor_control_stub(TorStub::new("pw", &["127.0.0.1:9050", "127.0.0.1:9150"])).await;
        let provider = TorProvider::connect_addr("pw", addr).await.unwrap();

        assert_eq!(provider.name(), "tor");
        assert_eq!(provider.discovery().socks_host, "127.0.0.1");
        assert_eq!(provider.discovery().socks_port, 9050);

        let socks = provider.socks_provider();
        assert_eq!(socks.name(), "tor-socks");
        assert_eq!(socks.proxy_type(), ProxyType::Socks5);
        assert!(socks.credentials().is_none());
        assert!(socks.remote_dns());
        assert!(provider.controller().lock().await.is_authenticated());
    }

    #[tokio::test]
    async fn test_custom_name_keeps_routing() {
        let addr = spawn_tor_control_stub(TorStub::new("pw", &["127.0.0.1:9050"])).await;
        let provider = TorProvider::connect_addr("pw", addr).await.unwrap().with_name("tor-main");

        assert_eq!(provider.name(), "tor-main");
        assert_eq!(provider.socks_provider().name(), "tor-socks");
        assert!(provider.socket(SocketArgs::stream()).unwrap().is_tunneled());
    }

    #[tokio::test]
    async fn test_zero_listeners_is_configuration_error() {
        let _guard = global_lock().lock().await;
        let addr = spawn_tor_control_stub(TorStub::new("pw", &[])).await;

        let err = TorProvider::connect_addr("pw", addr).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("not configured to allow SOCKS"));
        assert!(!crate::is_active());
    }

    #[tokio::test]
    async fn test_bad_password_wraps_auth_error() {
        let addr = spawn_tor_control_stub(TorStub::new("pw", &["127.0.0.1:9050"])).await;

        let err = TorProvider::connect_addr("nope", addr).await.unwrap_err();
        assert!(err.is_proxy_backend());
        let cause = err.source().unwrap();
        assert!(cause.downcast_ref::<ControlError>().is_some_and(|c| matches!(c, ControlError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_unreachable_control_port_wraps_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TorProvider::connect_addr("pw", addr).await.unwrap_err();
        assert!(err.is_proxy_backend());
        let cause = err.source().unwrap();
        assert!(cause.downcast_ref::<ControlError>().is_some_and(|c| matches!(c, ControlError::Transport(_))));
    }

    #[tokio::test]
    async fn test_socket_routes_through_discovered_listener() {
        let (socks_addr, observed) = spawn_socks5_stub(None).await;
        let listener = socks_addr.to_string();
        let control = spawn_tor_control_stub(TorStub::new("pw", &[listener.as_str()])).await;

        let provider = TorProvider::connect_addr("pw", control).await.unwrap();
        let mut handle = provider.socket(SocketArgs::stream()).unwrap();
        assert!(handle.is_tunneled());

        handle.connect(("duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion", 80)).await.unwrap();
        handle.send_all(b"ping").await.unwrap();

        let observation = observed.await.unwrap();
        assert_eq!(observation.target.port(), 80);
        assert!(observation.target.host().ends_with(".onion"));
    }
}

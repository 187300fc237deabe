// src/provider/proxy.rs
//! Proxy-backed provider
//!
//! Hands out native sockets that tunnel through a SOCKS4, SOCKS5 or HTTP
//! proxy once connected.

use crate::provider::handle::{SocketHandle, TargetAddr};
use crate::provider::{underlying_constructor, Provider, SocketArgs, SocketKind};
use crate::utils::errors::{Result, SockyError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Supported proxy protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Socks4,
    #[default]
    Socks5,
    Http,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Socks4 => "SOCKS4",
            Self::Socks5 => "SOCKS5",
            Self::Http => "HTTP",
        };
        f.write_str(name)
    }
}

impl FromStr for ProxyType {
    type Err = SockyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "socks4" | "socks4a" => Ok(Self::Socks4),
            "socks5" | "socks5h" => Ok(Self::Socks5),
            "http" => Ok(Self::Http),
            _ => Err(SockyError::Configuration(format!("Invalid proxy_type provided: {}", s))),
        }
    }
}

/// Username/password pair for proxy authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build from a mapping holding exactly `username` and `password`
    pub fn from_map<K, V, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut username = None;
        let mut password = None;

        for (key, value) in entries {
            match key.as_ref() {
                "username" if username.is_none() => username = Some(value.into()),
                "password" if password.is_none() => password = Some(value.into()),
                other => return Err(invalid_credentials(&format!("unexpected key `{}`", other))),
            }
        }

        match (username, password) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(invalid_credentials("missing `username` or `password`")),
        }
    }

    /// Build from a JSON value: a two-element array of strings, or an object
    /// with exactly the keys `username` and `password`
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Array(items) => match items.as_slice() {
                [Value::String(username), Value::String(password)] => {
                    Ok(Self::new(username.as_str(), password.as_str()))
                }
                _ => Err(invalid_credentials("expected two strings")),
            },
            Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let value = value
                        .as_str()
                        .ok_or_else(|| invalid_credentials(&format!("`{}` must be a string", key)))?;
                    entries.push((key.as_str(), value.to_string()));
                }
                Self::from_map(entries)
            }
            other => Err(invalid_credentials(&format!("unsupported shape {}", other))),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl<U: Into<String>, P: Into<String>> From<(U, P)> for Credentials {
    fn from((username, password): (U, P)) -> Self {
        Self::new(username, password)
    }
}

impl TryFrom<HashMap<String, String>> for Credentials {
    type Error = SockyError;

    fn try_from(map: HashMap<String, String>) -> Result<Self> {
        Self::from_map(map)
    }
}

impl TryFrom<&serde_json::Value> for Credentials {
    type Error = SockyError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn invalid_credentials(reason: &str) -> SockyError {
    SockyError::Configuration(format!(
        "Invalid credentials provided ({}). Must be a pair or a mapping with the keys \"username\" and \"password\"",
        reason
    ))
}

/// Immutable proxy settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub credentials: Option<Credentials>,
    /// Let the proxy resolve host names
    pub remote_dns: bool,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            proxy_type: ProxyType::default(),
            credentials: None,
            remote_dns: true,
        }
    }

    /// Address of the proxy itself
    pub fn endpoint(&self) -> TargetAddr {
        TargetAddr::from((self.host.as_str(), self.port))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SockyError::Configuration("proxy host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SockyError::Configuration("proxy port cannot be 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`ProxyProvider`]
#[derive(Debug, Clone)]
pub struct ProxyProviderBuilder {
    name: String,
    host: String,
    port: u16,
    proxy_type: Option<ProxyType>,
    credentials: Option<Credentials>,
    remote_dns: bool,
}

impl ProxyProviderBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Proxy protocol; SOCKS5 when never set
    pub fn proxy_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = Some(proxy_type);
        self
    }

    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn remote_dns(mut self, remote_dns: bool) -> Self {
        self.remote_dns = remote_dns;
        self
    }

    pub fn build(self) -> Result<ProxyProvider> {
        let config = ProxyConfig {
            host: self.host,
            port: self.port,
            proxy_type: self.proxy_type.unwrap_or_default(),
            credentials: self.credentials,
            remote_dns: self.remote_dns,
        };

        ProxyProvider::with_name(self.name, config)
    }
}

/// Provider that tunnels every stream socket through a proxy
#[derive(Debug, Clone)]
pub struct ProxyProvider {
    name: String,
    config: Arc<ProxyConfig>,
}

impl ProxyProvider {
    pub fn builder(host: impl Into<String>, port: u16) -> ProxyProviderBuilder {
        ProxyProviderBuilder {
            name: "socks".to_string(),
            host: host.into(),
            port,
            proxy_type: None,
            credentials: None,
            remote_dns: true,
        }
    }

    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_name("socks", config)
    }

    pub fn with_name(name: impl Into<String>, config: ProxyConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            name: name.into(),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn proxy_type(&self) -> ProxyType {
        self.config.proxy_type
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.config.credentials.as_ref()
    }

    pub fn remote_dns(&self) -> bool {
        self.config.remote_dns
    }
}

impl Provider for ProxyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        if args.kind != SocketKind::Stream {
            return Err(SockyError::Unsupported(format!(
                "{} proxy cannot carry {} sockets",
                self.config.proxy_type, args
            )));
        }

        let handle = underlying_constructor()(args)?;
        debug!(
            "Setup {}-backed socket (host: {}, port: {})",
            self.config.proxy_type, self.config.host, self.config.port
        );

        Ok(handle.tunneled(Arc::clone(&self.config)))
    }
}

// src/utils/config.rs
//! Configuration loading
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `socky.toml` (or the file named by `SOCKY_CONFIG`)
//! - environment variables, e.g. `SOCKY_PROVIDER__KIND=tor`

use crate::provider::tor::DEFAULT_CONTROL_PORT;
use crate::provider::{Credentials, LoggingProvider, Provider, ProxyProvider, ProxyType, TorProvider};
use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SockyConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Log interception transitions at INFO instead of DEBUG
    #[serde(default)]
    pub verbose: bool,
}

impl SockyConfig {
    /// Load from `SOCKY_CONFIG` (default `socky`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("SOCKY_CONFIG").unwrap_or_else(|_| "socky".to_string());
        Self::load_from(&path)
    }

    /// Load from the given file (extension optional) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SOCKY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        debug!("Loaded configuration: provider {:?}", config.provider.kind);
        Ok(config)
    }
}

/// Which provider to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Proxy,
    Tor,
    #[default]
    Logger,
}

/// Provider selection plus per-provider settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Overrides the provider's default name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub proxy: ProxySection,

    #[serde(default)]
    pub tor: TorSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_proxy_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// "socks4", "socks5" or "http"; SOCKS5 when absent
    #[serde(default)]
    pub proxy_type: Option<String>,

    /// `["user", "pass"]` or `{ username = "user", password = "pass" }`
    #[serde(default)]
    pub credentials: Option<serde_json::Value>,

    #[serde(default = "default_remote_dns")]
    pub remote_dns: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
            proxy_type: None,
            credentials: None,
            remote_dns: default_remote_dns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TorSection {
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for TorSection {
    fn default() -> Self {
        Self {
            password: String::new(),
            control_port: default_control_port(),
        }
    }
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    9050
}

fn default_remote_dns() -> bool {
    true
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

impl ProviderConfig {
    /// Build the configured provider. Tor discovery happens here.
    pub async fn build(&self) -> Result<Arc<dyn Provider>> {
        let name = self.name.clone();
        match self.kind {
            ProviderKind::Proxy => {
                let provider = self.proxy.build()?;
                Ok(Arc::new(match name {
                    Some(name) => ProxyProvider::with_name(name, provider.config().clone())?,
                    None => provider,
                }))
            }
            ProviderKind::Tor => {
                let provider = TorProvider::connect(&self.tor.password, self.tor.control_port).await?;
                Ok(Arc::new(match name {
                    Some(name) => provider.with_name(name),
                    None => provider,
                }))
            }
            ProviderKind::Logger => Ok(Arc::new(match name {
                Some(name) => LoggingProvider::new().with_name(name),
                None => LoggingProvider::new(),
            })),
        }
    }
}

impl ProxySection {
    pub fn build(&self) -> Result<ProxyProvider> {
        let mut builder = ProxyProvider::builder(self.host.clone(), self.port).remote_dns(self.remote_dns);

        if let Some(name) = &self.proxy_type {
            builder = builder.proxy_type(name.parse::<ProxyType>()?);
        }
        if let Some(value) = &self.credentials {
            builder = builder.credentials(Credentials::from_value(value)?);
        }

        builder.build()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "socky=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// src/utils/errors.rs
//! Error types shared across the crate

use thiserror::Error;

/// Boxed cause carried by backend errors
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building providers, tunnelling sockets or
/// installing the interception layer
#[derive(Debug, Error)]
pub enum SockyError {
    /// Invalid provider construction arguments
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure talking to (or authenticating with) a proxy or control backend
    #[error("proxy backend error: {message}")]
    ProxyBackend {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// The socket-construction primitive could not be resolved or substituted
    #[error("interception error: {0}")]
    Interception(String),

    /// Provider did not override socket construction
    #[error("provider `{0}` does not implement socket construction")]
    NotImplemented(String),

    /// Operation the chosen provider cannot perform
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl SockyError {
    /// Backend error with an underlying cause
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedCause>,
    {
        Self::ProxyBackend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Backend error without a cause
    pub fn backend_msg(message: impl Into<String>) -> Self {
        Self::ProxyBackend {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_proxy_backend(&self) -> bool {
        matches!(self, Self::ProxyBackend { .. })
    }

    pub fn is_interception(&self) -> bool {
        matches!(self, Self::Interception(_))
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SockyError>;

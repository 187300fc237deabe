// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{LoggingConfig, ProviderConfig, ProviderKind, SockyConfig};
pub use errors::{Result, SockyError};

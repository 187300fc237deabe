// src/provider/logger.rs
//! Passthrough provider that logs socket construction
//!
//! Useful for finding out which code paths in a process open network
//! connections. The returned sockets are native and behave exactly as if no
//! provider were installed.

use crate::provider::handle::{SocketHandle, TargetAddr};
use crate::provider::{underlying_constructor, Provider, SocketArgs};
use crate::utils::errors::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// Observed socket activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A socket was constructed
    Created { args: SocketArgs },

    /// A connect was attempted on an observed socket
    Connect { args: SocketArgs, target: TargetAddr },
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { args } => write!(f, "In socket: {}", args),
            Self::Connect { args, target } => write!(f, "In connect: {} -> {}", args, target),
        }
    }
}

/// Destination for socket events
pub trait LogSink: Send + Sync + fmt::Debug {
    fn record(&self, event: &SocketEvent);
}

/// Sink that emits events through `tracing` at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    level: Level,
}

impl TracingSink {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

macro_rules! emit {
    ($level:expr, $event:expr) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!(target: "socky::logger", "{}", $event)
        } else if level == Level::WARN {
            tracing::warn!(target: "socky::logger", "{}", $event)
        } else if level == Level::INFO {
            tracing::info!(target: "socky::logger", "{}", $event)
        } else if level == Level::DEBUG {
            tracing::debug!(target: "socky::logger", "{}", $event)
        } else {
            tracing::trace!(target: "socky::logger", "{}", $event)
        }
    }};
}

impl LogSink for TracingSink {
    fn record(&self, event: &SocketEvent) {
        emit!(self.level, event);
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SocketEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first
    pub fn events(&self) -> Vec<SocketEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn record(&self, event: &SocketEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Logs every construction, then hands out a native socket
#[derive(Debug, Clone)]
pub struct LoggingProvider {
    name: String,
    sink: Arc<dyn LogSink>,
}

impl LoggingProvider {
    /// Logging provider with a [`TracingSink`] at DEBUG
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink::default()))
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            name: "logger".to_string(),
            sink,
        }
    }

    /// Replace the default "logger" name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }
}

impl Default for LoggingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for LoggingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        self.sink.record(&SocketEvent::Created { args });
        let handle = underlying_constructor()(args)?;

        Ok(handle.observed(Arc::clone(&self.sink)))
    }
}

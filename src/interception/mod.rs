// src/interception/mod.rs
//! Process-wide socket construction interception
//!
//! All socket construction in a process goes through one registry. Enabling
//! interception swaps the registry's binding from the native constructor to
//! a [`Provider`]; disabling swaps the captured original back.
//!
//! - **Binding**: the constructor currently answering `socket()` calls
//! - **Factory hook**: [`SocketFactory`] handles resolve the binding on every
//!   call, so a factory acquired before `enable` and one acquired after it
//!   behave identically
//!
//! # Architecture
//!
//! ```text
//! Consumer code (unchanged)
//!     │
//!     ├─ socky::socket(args) ──┐
//!     └─ SocketFactory::socket ┴─→ Binding (ArcSwap, lock-free)
//!                                     │
//!                      ┌──────────────┴──────────────┐
//!                  Inactive                        Active
//!               NativeProvider              installed Provider
//! ```
//!
//! Transitions are serialised by a mutex; the hot path never locks.

pub mod factory;

pub use factory::SocketFactory;

use crate::observability::{SOCKETS_CREATED, TRANSITIONS};
use crate::provider::{NativeProvider, Provider, SocketArgs, SocketHandle};
use crate::utils::errors::Result;
use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

macro_rules! verbose {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// The constructor currently bound in the registry
#[derive(Debug)]
struct Binding {
    provider: Arc<dyn Provider>,
    /// Set only while a provider stands in for the original
    substituted: bool,
}

#[derive(Debug, Default)]
struct Transitions {
    original: Option<Arc<dyn Provider>>,
    installed: Option<Arc<dyn Provider>>,
    hook_registered: bool,
}

/// Snapshot of the interception state
#[derive(Debug, Clone)]
pub struct InterceptionState {
    pub active: bool,
    /// Constructor captured by the most recent successful enable
    pub original: Option<Arc<dyn Provider>>,
    pub installed: Option<Arc<dyn Provider>>,
    pub future_hook_registered: bool,
}

/// Socket construction registry
pub struct Interceptor {
    binding: ArcSwap<Binding>,
    transitions: Mutex<Transitions>,
}

impl Interceptor {
    /// New registry bound to the native constructor
    pub fn new() -> Self {
        Self::with_original(Arc::new(NativeProvider))
    }

    /// New registry bound to `original` instead of the native constructor
    pub fn with_original(original: Arc<dyn Provider>) -> Self {
        Self {
            binding: ArcSwap::from_pointee(Binding {
                provider: original,
                substituted: false,
            }),
            transitions: Mutex::new(Transitions::default()),
        }
    }

    /// Substitute socket construction with `provider`.
    ///
    /// While already active this is a no-op: disable first to switch
    /// providers.
    pub fn enable(&self, provider: Arc<dyn Provider>, verbose: bool) -> Result<()> {
        let mut transitions = self.transitions.lock();
        let current = self.binding.load_full();

        if current.substituted {
            if Arc::ptr_eq(&current.provider, &provider) {
                verbose!(verbose, "Socket construction already substituted by {}", provider.name());
            } else {
                warn!(
                    "Interception already active with provider {}; ignoring {} until disabled",
                    current.provider.name(),
                    provider.name()
                );
            }
            return Ok(());
        }

        if !transitions.hook_registered {
            verbose!(verbose, "Registering socket factory hook");
            transitions.hook_registered = true;
        }

        // Stores only happen under `transitions`, so the binding cannot change
        // between this store and the bookkeeping below.
        self.binding.store(Arc::new(Binding {
            provider: Arc::clone(&provider),
            substituted: true,
        }));

        transitions.original = Some(Arc::clone(&current.provider));
        transitions.installed = Some(Arc::clone(&provider));
        metrics::counter!(TRANSITIONS, "transition" => "enable").increment(1);

        verbose!(
            verbose,
            "Successfully hooked socket construction with provider {} (original: {})",
            provider.name(),
            current.provider.name()
        );
        Ok(())
    }

    /// Restore the constructor captured at enable time. No-op while inactive.
    pub fn disable(&self, verbose: bool) {
        let mut transitions = self.transitions.lock();

        if transitions.hook_registered {
            transitions.hook_registered = false;
            verbose!(verbose, "Removed socket factory hook");
        }

        let current = self.binding.load_full();
        if !current.substituted {
            verbose!(verbose, "Socket construction is not substituted; nothing to restore");
            return;
        }

        match transitions.original.take() {
            Some(original) => {
                verbose!(
                    verbose,
                    "Reverting socket construction from {} back to {}",
                    current.provider.name(),
                    original.name()
                );
                self.binding.store(Arc::new(Binding {
                    provider: original,
                    substituted: false,
                }));
                transitions.installed = None;
                metrics::counter!(TRANSITIONS, "transition" => "disable").increment(1);
            }
            None => verbose!(verbose, "No original constructor captured; leaving binding as is"),
        }
    }

    pub fn is_active(&self) -> bool {
        let transitions = self.transitions.lock();
        self.binding.load().substituted && transitions.hook_registered
    }

    pub fn state(&self) -> InterceptionState {
        let transitions = self.transitions.lock();
        let binding = self.binding.load();

        InterceptionState {
            active: binding.substituted && transitions.hook_registered,
            original: transitions.original.clone(),
            installed: transitions.installed.clone(),
            future_hook_registered: transitions.hook_registered,
        }
    }

    /// Provider currently answering socket construction
    pub fn resolve(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.binding.load().provider)
    }

    /// Construct a socket through the current binding
    pub fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        let provider = self.resolve();
        metrics::counter!(SOCKETS_CREATED, "provider" => provider.name().to_string()).increment(1);
        provider.socket(args)
    }

    /// Acquire a factory bound to this registry
    pub fn factory(self: &Arc<Self>) -> SocketFactory {
        SocketFactory::new(Arc::clone(self))
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.binding.load();
        f.debug_struct("Interceptor")
            .field("provider", &binding.provider.name())
            .field("substituted", &binding.substituted)
            .finish()
    }
}

static GLOBAL: OnceCell<Arc<Interceptor>> = OnceCell::new();

/// The process-wide registry, created on first use
pub fn global() -> Arc<Interceptor> {
    Arc::clone(GLOBAL.get_or_init(|| {
        debug!("Initialising process-wide socket registry");
        Arc::new(Interceptor::new())
    }))
}

/// Substitute process-wide socket construction with `provider`
pub fn enable(provider: Arc<dyn Provider>, verbose: bool) -> Result<()> {
    global().enable(provider, verbose)
}

/// Restore native socket construction process-wide
pub fn disable(verbose: bool) {
    match GLOBAL.get() {
        Some(interceptor) => interceptor.disable(verbose),
        None => verbose!(verbose, "Socket registry was never initialised; nothing to disable"),
    }
}

pub fn is_active() -> bool {
    GLOBAL.get().is_some_and(|interceptor| interceptor.is_active())
}

/// Construct a socket through the process-wide registry
pub fn socket(args: SocketArgs) -> Result<SocketHandle> {
    global().socket(args)
}

/// Acquire a factory bound to the process-wide registry
pub fn factory() -> SocketFactory {
    global().factory()
}

// src/interception/factory.rs
//! Socket factory handles
//!
//! Code that wants proxy substitution acquires a [`SocketFactory`] once and
//! constructs every socket through it. The factory never caches a provider;
//! it asks the registry on each call.

use crate::interception::Interceptor;
use crate::provider::{SocketArgs, SocketHandle, TargetAddr};
use crate::utils::errors::Result;
use std::sync::Arc;

/// Handle to a socket construction registry
#[derive(Debug, Clone)]
pub struct SocketFactory {
    interceptor: Arc<Interceptor>,
}

impl SocketFactory {
    pub(crate) fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    pub fn socket(&self, args: SocketArgs) -> Result<SocketHandle> {
        self.interceptor.socket(args)
    }

    /// Construct a stream socket and connect it to `target`
    pub async fn connect(&self, target: impl Into<TargetAddr>) -> Result<SocketHandle> {
        let target = target.into();
        let args = match &target {
            TargetAddr::Ip(addr) if addr.is_ipv6() => {
                SocketArgs::stream().with_family(crate::provider::AddressFamily::Ipv6)
            }
            _ => SocketArgs::stream(),
        };

        let mut handle = self.socket(args)?;
        handle.connect(target).await?;
        Ok(handle)
    }

    /// Name of the provider that would answer the next call
    pub fn provider_name(&self) -> String {
        self.interceptor.resolve().name().to_string()
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}

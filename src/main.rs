// src/main.rs
//! Socky probe
//!
//! Builds the configured provider, activates substitution, and opens one
//! connection through it to show where traffic actually goes.
//!
//! Usage: `socky <host:port> [payload]`

use anyhow::{bail, Context, Result};
use socky::observability::init_tracing;
use socky::{SockyConfig, TargetAddr};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before tracing so the level is honoured
    let config = SockyConfig::load().context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!("Starting socky v{} ({})", socky::VERSION, socky::GIT_HASH);

    let mut args = std::env::args().skip(1);
    let target = match args.next() {
        Some(target) => target
            .parse::<TargetAddr>()
            .with_context(|| format!("invalid target {}", target))?,
        None => bail!("usage: socky <host:port> [payload]"),
    };
    let payload = args.next();

    let provider = config.provider.build().await.context("failed to build provider")?;
    info!("Using provider {}", provider.name());

    socky::enable(provider, config.verbose)?;
    let result = probe(&target, payload.as_deref()).await;
    socky::disable(config.verbose);

    if let Err(e) = &result {
        error!("Probe of {} failed: {}", target, e);
    }
    result
}

async fn probe(target: &TargetAddr, payload: Option<&str>) -> Result<()> {
    let mut handle = socky::factory().connect(target.clone()).await?;
    info!(
        "Connected to {} via {} (tunneled: {})",
        target,
        handle.peer_addr()?,
        handle.is_tunneled()
    );
    info!("Local address {}", handle.local_addr()?);

    if let Some(payload) = payload {
        handle.send_all(payload.as_bytes()).await?;
        let mut buf = vec![0u8; 4096];
        let n = handle.recv(&mut buf).await?;
        info!("Received {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
    }

    handle.close().await?;
    Ok(())
}

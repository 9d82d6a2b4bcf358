//! LB IP Controller
//!
//! Assigns external addresses to `LoadBalancer` Services from a set of
//! configured address pools.
//!
//! Pools come either from a static YAML file (`POOL_CONFIG`) or from
//! cluster-scoped `AddressPool` resources. Each Service carries its
//! assignment in an annotation so the controller can rebuild its state
//! after a restart.

mod config;
mod controller;
mod error;
mod reconciler;
mod record;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // kube's rustls transport needs a process-wide crypto provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed, keeping it");
    }

    info!("Starting LB IP Controller");

    let config = ControllerConfig::from_env()?;
    config.log();

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

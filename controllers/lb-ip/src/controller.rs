//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the allocator,
//! reconciler and watcher together for the LB IP Controller.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::AddressPool;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use kube_runtime::events::Reporter;
use lb_ipam::{Allocator, PoolConfig, PoolRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for LoadBalancer address management.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing LB IP Controller");

        // A static pool file replaces the AddressPool watch entirely.
        let registry = match &config.pool_config {
            Some(path) => {
                let registry = PoolConfig::from_file(path)?.into_registry()?;
                info!("Loaded {} pools from {}", registry.len(), path.display());
                registry
            }
            None => PoolRegistry::default(),
        };
        let allocator = Arc::new(Allocator::new(registry));

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        // Create API clients
        let service_api: Api<Service> = match &config.namespace {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let pool_api: Option<Api<AddressPool>> = config
            .pool_config
            .is_none()
            .then(|| Api::all(kube_client.clone()));

        let reporter = Reporter {
            controller: config.controller_name.clone(),
            instance: config.instance.clone(),
        };
        let reconciler = Arc::new(Reconciler::new(kube_client, allocator, reporter));

        let watcher_instance = Watcher::new(reconciler, service_api, pool_api);
        let watcher = tokio::spawn(async move { watcher_instance.run().await });

        Ok(Self { watcher })
    }

    /// Runs the controller until the watcher exits or a shutdown signal
    /// arrives.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("LB IP Controller running");

        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Watcher panicked: {}", e)))??;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received, stopping LB IP Controller");
                self.watcher.abort();
            }
        }

        Ok(())
    }
}

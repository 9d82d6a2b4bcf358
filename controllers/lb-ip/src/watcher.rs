//! Kubernetes resource watchers.
//!
//! This module watches `Service` and `AddressPool` resources and drives
//! the reconciler from their events. Pools are synced before the first
//! service is looked at; with an empty registry every existing assignment
//! would look out of pool and be cleared.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::AddressPool;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::Api;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type PoolStream = BoxStream<'static, Result<watcher::Event<AddressPool>, watcher::Error>>;

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    service_api: Api<Service>,
    pool_api: Option<Api<AddressPool>>,
}

/// Pools as last seen by the watcher, plus the listing being built while
/// the pool watch (re)initializes.
#[derive(Default)]
struct PoolCache {
    current: BTreeMap<String, AddressPool>,
    staged: BTreeMap<String, AddressPool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    ///
    /// Without a pool api the registry is static and only services are
    /// watched.
    pub fn new(
        reconciler: Arc<Reconciler>,
        service_api: Api<Service>,
        pool_api: Option<Api<AddressPool>>,
    ) -> Self {
        Self {
            reconciler,
            service_api,
            pool_api,
        }
    }

    /// Watches services and pools until a stream ends.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let mut pools = PoolCache::default();
        let mut pool_stream: PoolStream = match &self.pool_api {
            Some(api) => {
                info!("Starting AddressPool watcher");
                watcher(api.clone(), watcher::Config::default())
                    .default_backoff()
                    .boxed()
            }
            None => futures::stream::pending().boxed(),
        };

        if self.pool_api.is_some() {
            self.sync_initial_pools(&mut pool_stream, &mut pools).await?;
        }

        info!("Starting Service watcher");
        let mut service_stream = watcher(self.service_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut initial: Vec<Service> = Vec::new();

        loop {
            tokio::select! {
                event = service_stream.next() => match event {
                    Some(Ok(event)) => {
                        self.handle_service_event(event, &mut initial).await;
                        self.refresh_pool_status(&pools).await;
                    }
                    Some(Err(e)) => warn!("Service watcher error: {}", e),
                    None => {
                        return Err(ControllerError::Watch(
                            "Service watch stream ended".to_string(),
                        ));
                    }
                },
                event = pool_stream.next() => match event {
                    Some(Ok(event)) => {
                        if self.handle_pool_event(event, &mut pools).await {
                            self.resync_services(&pools).await;
                        }
                    }
                    Some(Err(e)) => warn!("AddressPool watcher error: {}", e),
                    None => {
                        return Err(ControllerError::Watch(
                            "AddressPool watch stream ended".to_string(),
                        ));
                    }
                },
            }
        }
    }

    async fn sync_initial_pools(
        &self,
        stream: &mut PoolStream,
        pools: &mut PoolCache,
    ) -> Result<(), ControllerError> {
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::InitDone) => {
                    self.handle_pool_event(watcher::Event::InitDone, pools).await;
                    return Ok(());
                }
                Ok(event) => {
                    self.handle_pool_event(event, pools).await;
                }
                Err(e) => warn!("AddressPool watcher error: {}", e),
            }
        }
        Err(ControllerError::Watch(
            "AddressPool watch stream ended before initial sync".to_string(),
        ))
    }

    async fn handle_service_event(&self, event: watcher::Event<Service>, initial: &mut Vec<Service>) {
        match event {
            watcher::Event::Apply(svc) => {
                let name = svc.metadata.name.as_deref().unwrap_or("<unknown>");
                debug!("Service applied: {}", name);
                self.reconcile(&svc).await;
            }
            watcher::Event::Delete(svc) => {
                let name = svc.metadata.name.as_deref().unwrap_or("<unknown>");
                info!("Service deleted: {}", name);
                self.reconciler.release_service(&svc);
            }
            watcher::Event::Init => {
                info!("Service watcher initialized");
                initial.clear();
            }
            watcher::Event::InitApply(svc) => {
                let name = svc.metadata.name.as_deref().unwrap_or("<unknown>");
                debug!("Service init apply: {}", name);
                initial.push(svc);
            }
            watcher::Event::InitDone => {
                let services = std::mem::take(initial);
                self.reconciler.restore_services(&services);
                for svc in &services {
                    self.reconcile(svc).await;
                }
                info!(
                    "Service watcher initialization complete ({} services)",
                    services.len()
                );
            }
        }
    }

    /// Applies a pool event to the cache. Returns whether the registry was
    /// rebuilt, in which case every service needs another pass.
    async fn handle_pool_event(&self, event: watcher::Event<AddressPool>, pools: &mut PoolCache) -> bool {
        match event {
            watcher::Event::Apply(pool) => {
                let Some(name) = pool.metadata.name.clone() else {
                    return false;
                };
                let changed = pools
                    .current
                    .get(&name)
                    .is_none_or(|old| old.spec != pool.spec);
                pools.current.insert(name.clone(), pool);
                if !changed {
                    // Status-only update, most likely our own.
                    return false;
                }
                info!("AddressPool applied: {}", name);
                self.reconciler.reconcile_pools(&pools.current).await;
                true
            }
            watcher::Event::Delete(pool) => {
                let name = pool.metadata.name.as_deref().unwrap_or("<unknown>");
                info!("AddressPool deleted: {}", name);
                if pools.current.remove(name).is_none() {
                    return false;
                }
                self.reconciler.reconcile_pools(&pools.current).await;
                true
            }
            watcher::Event::Init => {
                debug!("AddressPool watcher initialized");
                pools.staged.clear();
                false
            }
            watcher::Event::InitApply(pool) => {
                if let Some(name) = pool.metadata.name.clone() {
                    debug!("AddressPool init apply: {}", name);
                    pools.staged.insert(name, pool);
                }
                false
            }
            watcher::Event::InitDone => {
                pools.current = std::mem::take(&mut pools.staged);
                info!(
                    "AddressPool watcher initialization complete ({} pools)",
                    pools.current.len()
                );
                self.reconciler.reconcile_pools(&pools.current).await;
                true
            }
        }
    }

    /// Runs a pass over every watched service after the registry changed.
    async fn resync_services(&self, pools: &PoolCache) {
        match self.service_api.list(&ListParams::default()).await {
            Ok(list) => {
                info!("Resyncing {} services after pool change", list.items.len());
                for svc in &list.items {
                    self.reconcile(svc).await;
                }
            }
            Err(e) => error!("Failed to list services for resync: {}", e),
        }
        self.refresh_pool_status(pools).await;
    }

    async fn refresh_pool_status(&self, pools: &PoolCache) {
        if self.pool_api.is_some() {
            self.reconciler.update_pool_status(&pools.current).await;
        }
    }

    async fn reconcile(&self, svc: &Service) {
        let name = svc.metadata.name.as_deref().unwrap_or("<unknown>");
        if let Err(e) = self.reconciler.reconcile_service(svc).await {
            match e {
                ControllerError::Reconciliation(_) => {
                    warn!("Failed to reconcile Service {}: {}", name, e)
                }
                _ => error!("Failed to reconcile Service {}: {}", name, e),
            }
        }
    }
}

//! Reconciliation logic for LoadBalancer Services and AddressPools.
//!
//! This module runs allocation passes for `Service` objects against the
//! shared allocator and writes the outcome back to the cluster: the
//! assigned-ip annotation, the external traffic policy, the status ingress
//! and any events raised during the pass.

use crate::error::ControllerError;
use crate::record::{
    is_load_balancer, registry_from_pools, release_non_load_balancer, replay_listing, service_key,
    service_patch, status_patch, to_record,
};
use crds::{AddressPool, AddressPoolStatus};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use kube_runtime::events::{
    Event as KubeEvent, EventType as KubeEventType, Recorder, Reporter,
};
use lb_ipam::{converge_service, Allocator, EventType, Pool, ServiceEvent, ServiceRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reconciles services against the shared allocator.
pub struct Reconciler {
    client: Client,
    allocator: Arc<Allocator>,
    recorder: Recorder,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: Client, allocator: Arc<Allocator>, reporter: Reporter) -> Self {
        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            allocator,
            recorder,
        }
    }

    /// Replays the assigned-ip annotations of a full service listing into
    /// the allocator and forgets assignments of services that are gone.
    ///
    /// Called once per initial listing, before any pass runs, so that a
    /// fresh service cannot be handed an address another service already
    /// holds.
    pub fn restore_services(&self, services: &[Service]) {
        let replay = replay_listing(&self.allocator, services);
        for key in &replay.released {
            info!("Released IP of Service {}: no longer listed", key);
        }
        for (key, ip) in &replay.restored {
            debug!("Restored IP {} for Service {}", ip, key);
        }
        for (key, ip, e) in &replay.conflicts {
            warn!("Could not restore IP {} for Service {}: {}", ip, key, e);
        }
        info!("Restored {} IP assignments", self.allocator.len());
    }

    /// Reconciles a Service.
    ///
    /// This method:
    /// 1. Releases the address of a service that is no longer a LoadBalancer
    /// 2. Runs an allocation pass for LoadBalancer services
    /// 3. Patches the annotation, traffic policy and status ingress
    /// 4. Publishes the events raised during the pass
    ///
    /// An allocation failure is returned after the service has been written
    /// back in its unassigned state; it is not retried here.
    pub async fn reconcile_service(&self, svc: &Service) -> Result<(), ControllerError> {
        let key = service_key(svc)
            .ok_or_else(|| ControllerError::InvalidConfig("Service missing name".to_string()))?;

        if !is_load_balancer(svc) {
            if let Some(record) = release_non_load_balancer(&self.allocator, svc, key) {
                self.write_back(svc, &record).await?;
                info!("Service {} is no longer a LoadBalancer, released its IP", record.key);
            }
            return Ok(());
        }

        debug!("Reconciling Service {}", key);

        let mut record = to_record(svc, key);
        let mut events: Vec<ServiceEvent> = Vec::new();
        let result = converge_service(&self.allocator, &mut record, &mut events);

        let written = self.write_back(svc, &record).await;
        self.publish_events(svc, &record.key, &events).await;
        written?;

        let ip = result?;
        debug!("Service {} converged on IP {}", record.key, ip);
        Ok(())
    }

    /// Drops the assignment of a deleted service.
    pub fn release_service(&self, svc: &Service) {
        if let Some(key) = service_key(svc) {
            self.allocator.release(&key);
        }
    }

    /// Rebuilds the pool registry from the known `AddressPool` resources.
    ///
    /// Invalid pools are left out of the registry and reported on their
    /// status. Assignments outside the new registry are dropped; the caller
    /// is expected to reconcile services afterwards.
    pub async fn reconcile_pools(&self, pools: &BTreeMap<String, AddressPool>) {
        let (registry, invalid) = registry_from_pools(pools);
        for (name, e) in &invalid {
            error!("AddressPool {} is invalid: {}", name, e);
        }
        info!(
            "Reconciled AddressPools: {} valid, {} invalid",
            registry.len(),
            invalid.len()
        );

        let dropped = self.allocator.set_pools(registry);
        if !dropped.is_empty() {
            info!("{} IP assignments are no longer part of any pool", dropped.len());
        }
        self.update_pool_status(pools).await;
    }

    /// Patches `AddressPool` status counters that differ from the
    /// allocator's view.
    pub async fn update_pool_status(&self, pools: &BTreeMap<String, AddressPool>) {
        let usage: HashMap<String, (u64, u64)> = self
            .allocator
            .pool_usage()
            .into_iter()
            .map(|u| {
                let total = u64::try_from(u.total).unwrap_or(u64::MAX);
                let allocated = u64::try_from(u.allocated).unwrap_or(u64::MAX);
                (u.name, (total, allocated))
            })
            .collect();
        let api: Api<AddressPool> = Api::all(self.client.clone());

        for (name, pool) in pools {
            let (total, allocated) = usage.get(name).copied().unwrap_or_default();
            let error = Pool::parse(name.as_str(), &pool.spec.cidrs)
                .err()
                .map(|e| e.to_string());

            let current = pool.status.clone().unwrap_or_default();
            if current.total_addresses == total
                && current.allocated_addresses == allocated
                && current.error == error
            {
                continue;
            }

            let new_status = AddressPoolStatus {
                total_addresses: total,
                allocated_addresses: allocated,
                error,
                last_reconciled: Some(chrono::Utc::now()),
            };
            let status_patch = serde_json::json!({ "status": new_status });
            let pp = PatchParams::default();
            match api
                .patch_status(name, &pp, &Patch::Merge(&status_patch))
                .await
            {
                Ok(_) => debug!(
                    "Updated AddressPool {} status: {} total, {} allocated",
                    name, total, allocated
                ),
                Err(e) => warn!("Failed to update AddressPool {} status: {}", name, e),
            }
        }
    }

    async fn write_back(&self, svc: &Service, record: &ServiceRecord) -> Result<(), ControllerError> {
        let name = svc
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("Service missing name".to_string()))?;
        let namespace = svc.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let pp = PatchParams::default();

        if let Some(patch) = service_patch(svc, record) {
            api.patch(name, &pp, &Patch::Merge(&patch)).await.map_err(|e| {
                error!("Failed to update Service {}/{}: {}", namespace, name, e);
                ControllerError::Kube(e)
            })?;
        }

        if let Some(patch) = status_patch(svc, record) {
            api.patch_status(name, &pp, &Patch::Merge(&patch))
                .await
                .map_err(|e| {
                    error!("Failed to update Service {}/{} status: {}", namespace, name, e);
                    ControllerError::Kube(e)
                })?;
            info!(
                "Updated Service {}/{} ingress: {:?}",
                namespace, name, record.ingress
            );
        }

        Ok(())
    }

    async fn publish_events(&self, svc: &Service, key: &str, events: &[ServiceEvent]) {
        if events.is_empty() {
            return;
        }
        let reference = svc.object_ref(&());
        for event in events {
            let kube_event = KubeEvent {
                type_: match event.event_type {
                    EventType::Normal => KubeEventType::Normal,
                    EventType::Warning => KubeEventType::Warning,
                },
                reason: event.reason.to_string(),
                note: Some(event.message.clone()),
                action: "AllocateIP".to_string(),
                secondary: None,
            };
            if let Err(e) = self.recorder.publish(&kube_event, &reference).await {
                warn!(
                    "Failed to publish {} event for Service {}: {}",
                    event.reason, key, e
                );
            }
        }
    }
}

//! Conversion between Kubernetes objects and the allocator's view of them.
//!
//! Nothing here talks to the API server, so it can be tested without a
//! cluster.

use crds::AddressPool;
use k8s_openapi::api::core::v1::Service;
use lb_ipam::{
    AllocationError, Allocator, Pool, PoolError, PoolRegistry, ServiceRecord, TrafficPolicy,
    ASSIGNED_IP_ANNOTATION,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

const LOAD_BALANCER: &str = "LoadBalancer";

/// `namespace/name` of a service, if it has a name.
pub fn service_key(svc: &Service) -> Option<String> {
    let name = svc.metadata.name.as_deref()?;
    let namespace = svc.metadata.namespace.as_deref().unwrap_or("default");
    Some(format!("{namespace}/{name}"))
}

/// Whether the service asks for a load balancer.
pub fn is_load_balancer(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some(LOAD_BALANCER)
}

/// Parsed assigned-ip annotation, if present and well formed.
pub fn assigned_ip(svc: &Service) -> Option<IpAddr> {
    svc.metadata
        .annotations
        .as_ref()?
        .get(ASSIGNED_IP_ANNOTATION)?
        .parse()
        .ok()
}

fn ingress_ips(svc: &Service) -> Vec<String> {
    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| ingress.iter().filter_map(|i| i.ip.clone()).collect())
        .unwrap_or_default()
}

/// Builds the record a reconciliation pass works on.
pub fn to_record(svc: &Service, key: String) -> ServiceRecord {
    let spec = svc.spec.as_ref();
    ServiceRecord {
        key,
        load_balancer_ip: spec.and_then(|s| s.load_balancer_ip.clone()),
        annotations: svc.metadata.annotations.clone().unwrap_or_default(),
        external_traffic_policy: spec
            .and_then(|s| s.external_traffic_policy.as_deref())
            .and_then(TrafficPolicy::parse),
        ingress: ingress_ips(svc),
    }
}

/// Merge patch for the service object (annotation and traffic policy), or
/// `None` when the object already matches the record.
pub fn service_patch(svc: &Service, record: &ServiceRecord) -> Option<Value> {
    let mut patch = Map::new();

    let current_ip = svc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ASSIGNED_IP_ANNOTATION))
        .map(String::as_str);
    if current_ip != record.assigned_ip() {
        // A null value removes the annotation.
        patch.insert(
            "metadata".to_string(),
            json!({ "annotations": { ASSIGNED_IP_ANNOTATION: record.assigned_ip() } }),
        );
    }

    let current_policy = svc
        .spec
        .as_ref()
        .and_then(|s| s.external_traffic_policy.as_deref());
    if let Some(policy) = record.external_traffic_policy {
        if current_policy != Some(policy.as_str()) {
            patch.insert(
                "spec".to_string(),
                json!({ "externalTrafficPolicy": policy.as_str() }),
            );
        }
    }

    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Merge patch for the status subresource, or `None` when the ingress list
/// already matches the record.
pub fn status_patch(svc: &Service, record: &ServiceRecord) -> Option<Value> {
    if ingress_ips(svc) == record.ingress {
        return None;
    }
    let ingress: Vec<Value> = record.ingress.iter().map(|ip| json!({ "ip": ip })).collect();
    Some(json!({ "status": { "loadBalancer": { "ingress": ingress } } }))
}

/// Outcome of replaying a full service listing into the allocator.
#[derive(Debug, Default)]
pub struct Replay {
    /// Assignments taken over from annotations
    pub restored: Vec<(String, IpAddr)>,
    /// Keys dropped because their service is no longer listed
    pub released: Vec<String>,
    /// Annotations that could not be taken over, with the reason
    pub conflicts: Vec<(String, IpAddr, AllocationError)>,
}

/// Replays the assigned-ip annotations of a full listing into `allocator`
/// and releases assignments of services missing from it.
///
/// Conflicting annotations are skipped; those services get a new address
/// on their next pass.
pub fn replay_listing(allocator: &Allocator, services: &[Service]) -> Replay {
    let mut replay = Replay::default();

    let listed: HashSet<String> = services.iter().filter_map(service_key).collect();
    for (key, _) in allocator.entries() {
        if !listed.contains(&key) {
            allocator.release(&key);
            replay.released.push(key);
        }
    }

    for svc in services.iter().filter(|svc| is_load_balancer(svc)) {
        let (Some(key), Some(ip)) = (service_key(svc), assigned_ip(svc)) else {
            continue;
        };
        match allocator.restore(&key, ip) {
            Ok(()) => replay.restored.push((key, ip)),
            Err(e) => replay.conflicts.push((key, ip, e)),
        }
    }
    replay
}

/// Clears what the allocator manages for a service that is not a
/// LoadBalancer.
///
/// Returns the record to write back, or `None` when the service holds
/// neither an assignment nor the annotation.
pub fn release_non_load_balancer(
    allocator: &Allocator,
    svc: &Service,
    key: String,
) -> Option<ServiceRecord> {
    let has_marker = svc
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(ASSIGNED_IP_ANNOTATION));
    if !has_marker && allocator.assigned(&key).is_none() {
        return None;
    }
    let mut record = to_record(svc, key);
    allocator.clear(&mut record);
    Some(record)
}

/// Builds a registry from `AddressPool` resources, in name order.
///
/// Invalid pools are left out and returned alongside the registry so the
/// caller can report them.
pub fn registry_from_pools(
    pools: &BTreeMap<String, AddressPool>,
) -> (PoolRegistry, Vec<(String, PoolError)>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for (name, pool) in pools {
        match Pool::parse(name.as_str(), &pool.spec.cidrs) {
            Ok(p) => valid.push(p),
            Err(e) => invalid.push((name.clone(), e)),
        }
    }
    // Names come from map keys, so they are unique.
    let registry = PoolRegistry::new(valid).unwrap_or_default();
    (registry, invalid)
}

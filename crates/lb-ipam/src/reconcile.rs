//! Service convergence.
//!
//! A pass first decides what to do with the address recorded on the
//! service, then applies that decision: keep it, or clear the service and
//! allocate again. Clearing and allocating are two separate critical
//! sections on the allocator; passes for one key must not overlap.

use crate::allocator::Allocator;
use crate::error::ReconcileError;
use crate::events::{EventSink, EventType, Reason};
use crate::pool::PoolRegistry;
use crate::service::{ServiceRecord, TrafficPolicy};
use std::net::IpAddr;
use tracing::{debug, warn};

/// What a pass does with the address recorded on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The recorded address is still good; keep it.
    Retain(IpAddr),
    /// No usable address is recorded. Wipe any stale state, then allocate.
    Clear,
    /// A recorded address is being dropped because it left every pool or the
    /// user asked for a different one. Wipe it, then allocate.
    ClearAndReallocate,
}

impl Decision {
    /// The decision table.
    ///
    /// `recorded` is the parsed assigned-ip annotation, `None` when it is
    /// missing, malformed or held by another service.
    pub fn decide(recorded: Option<IpAddr>, in_any_pool: bool, request_changed: bool) -> Self {
        match recorded {
            None => Self::Clear,
            Some(_) if !in_any_pool || request_changed => Self::ClearAndReallocate,
            Some(ip) => Self::Retain(ip),
        }
    }

    /// Evaluates the table for `svc` against `pools` and the allocator's
    /// current ownership.
    pub fn for_service(svc: &ServiceRecord, pools: &PoolRegistry, allocator: &Allocator) -> Self {
        let recorded = svc
            .assigned_ip()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .filter(|ip| allocator.owner(ip).is_none_or(|owner| owner == svc.key));
        let in_any_pool = recorded.is_some_and(|ip| pools.contains(&ip));
        // Compared as addresses, so "2001:DB8::1" matches a recorded
        // "2001:db8::1". An unparseable request always counts as changed.
        let request_changed = svc
            .requested_ip()
            .is_some_and(|requested| requested.parse::<IpAddr>().ok() != recorded);
        Self::decide(recorded, in_any_pool, request_changed)
    }
}

/// Runs one reconciliation pass for `svc`.
///
/// On success the service carries the assigned-ip annotation, a `Local`
/// external traffic policy and a single ingress entry with the address. On
/// failure an `AllocationFailed` event is recorded and the service is left
/// without an address; nothing is retried here.
pub fn converge_service(
    allocator: &Allocator,
    svc: &mut ServiceRecord,
    events: &mut dyn EventSink,
) -> Result<IpAddr, ReconcileError> {
    let decision = Decision::for_service(svc, &allocator.pools(), allocator);
    debug!("Service {}: {:?}", svc.key, decision);

    let mut lb_ip = match decision {
        Decision::Retain(ip) if allocator.assigned(&svc.key) == Some(ip) => Some(ip),
        // Annotation the allocator has not tracked yet; adopt it.
        Decision::Retain(ip) => match allocator.restore(&svc.key, ip) {
            Ok(()) => Some(ip),
            Err(err) => {
                debug!("Could not adopt IP {} for service {}: {}", ip, svc.key, err);
                allocator.clear(svc);
                None
            }
        },
        Decision::Clear | Decision::ClearAndReallocate => {
            allocator.clear(svc);
            None
        }
    };

    if lb_ip.is_none() {
        match allocator.allocate(svc, events) {
            Ok(ip) => lb_ip = Some(ip),
            Err(err) => {
                warn!("Failed to allocate IP for {}: {}", svc.key, err);
                events.record(
                    EventType::Warning,
                    Reason::AllocationFailed,
                    format!("Failed to allocate IP for {:?}: {}", svc.key, err),
                );
                return Err(err.into());
            }
        }
    }

    let Some(ip) = lb_ip else {
        events.record(
            EventType::Warning,
            Reason::InternalError,
            ReconcileError::Internal.to_string(),
        );
        return Err(ReconcileError::Internal);
    };

    svc.external_traffic_policy = Some(TrafficPolicy::Local);
    svc.ingress = vec![ip.to_string()];
    Ok(ip)
}

//! Address allocation.
//!
//! The `Allocator` owns the allocation state and the current pool registry
//! behind a single lock. Every operation that reads or writes the state
//! (clear, allocate, assign, restore, release, pool swap) holds that lock for
//! its whole duration, so two passes racing for the same free address are
//! resolved by lock acquisition order.
//!
//! Free addresses are found by a linear scan of each CIDR, which is
//! O(pool size) per allocation. That is fine for the pool sizes a cluster
//! hands out to load balancers; a per-pool free list would change none of
//! the observable behaviour.

use crate::error::AllocationError;
use crate::events::{EventSink, EventType, Reason};
use crate::iter::addresses;
use crate::pool::{Pool, PoolRegistry};
use crate::service::{ServiceRecord, ASSIGNED_IP_ANNOTATION};
use crate::state::AllocationState;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Address usage of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUsage {
    /// Pool name
    pub name: String,
    /// Addresses covered by the pool's CIDRs
    pub total: u128,
    /// Addresses currently assigned from the pool
    pub allocated: usize,
}

#[derive(Debug)]
struct Inner {
    pools: Arc<PoolRegistry>,
    state: AllocationState,
}

/// Assigns addresses from the pool registry and tracks who owns what.
#[derive(Debug)]
pub struct Allocator {
    inner: Mutex<Inner>,
}

impl Allocator {
    /// Creates an allocator with no assignments.
    pub fn new(pools: PoolRegistry) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pools: Arc::new(pools),
                state: AllocationState::default(),
            }),
        }
    }

    // State is only written after every check has passed, so a panic while
    // the lock was held cannot have left a half-applied change behind.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current pool registry.
    pub fn pools(&self) -> Arc<PoolRegistry> {
        Arc::clone(&self.lock().pools)
    }

    /// Replaces the pool registry.
    ///
    /// Assignments whose address is no longer in any pool are dropped and
    /// returned; the services holding them get a new address on their next
    /// pass.
    pub fn set_pools(&self, pools: PoolRegistry) -> Vec<(String, IpAddr)> {
        let mut inner = self.lock();
        let dropped = inner.state.retain_addresses(|ip| pools.contains(ip));
        for (key, ip) in &dropped {
            warn!("Released IP {} of service {}: no longer part of any pool", ip, key);
        }
        info!("Pool registry updated: {} pools", pools.len());
        inner.pools = Arc::new(pools);
        dropped
    }

    /// Whether `ip` is part of a configured pool.
    pub fn is_valid(&self, ip: &IpAddr) -> bool {
        self.lock().pools.contains(ip)
    }

    /// Clears everything this allocator manages for a service: its
    /// assignment, the assigned-ip annotation and the ingress status.
    ///
    /// Safe to call when nothing is assigned.
    pub fn clear(&self, svc: &mut ServiceRecord) {
        let mut inner = self.lock();
        if let Some(ip) = inner.state.remove(&svc.key) {
            debug!("Cleared IP {} from service {}", ip, svc.key);
        }
        svc.annotations.remove(ASSIGNED_IP_ANNOTATION);
        svc.ingress.clear();
    }

    /// Drops the assignment of a deleted service.
    pub fn release(&self, key: &str) -> Option<IpAddr> {
        let released = self.lock().state.remove(key);
        if let Some(ip) = released {
            info!("Released IP {} from deleted service {}", ip, key);
        }
        released
    }

    /// Records an assignment that already exists on the cluster, such as an
    /// assigned-ip annotation found at start-up. No event is emitted.
    pub fn restore(&self, key: &str, ip: IpAddr) -> Result<(), AllocationError> {
        let mut inner = self.lock();
        inner.check_assignable(key, ip)?;
        inner.state.insert(key, ip);
        debug!("Restored IP {} for service {}", ip, key);
        Ok(())
    }

    /// Allocates an address for `svc`.
    ///
    /// An explicit `load_balancer_ip` is honoured or fails; otherwise a
    /// requested pool is searched alone; otherwise every pool is searched in
    /// registry order.
    pub fn allocate(
        &self,
        svc: &mut ServiceRecord,
        events: &mut dyn EventSink,
    ) -> Result<IpAddr, AllocationError> {
        let mut inner = self.lock();

        if let Some(requested) = svc.requested_ip().map(str::to_string) {
            let ip = requested
                .parse::<IpAddr>()
                .map_err(|source| AllocationError::InvalidRequestedAddress {
                    address: requested.clone(),
                    source,
                })?;
            inner.assign(svc, ip, events)?;
            return Ok(ip);
        }

        let pools = Arc::clone(&inner.pools);

        if let Some(pool_name) = svc.requested_pool().map(str::to_string) {
            let pool = pools
                .get(&pool_name)
                .ok_or_else(|| AllocationError::UnknownPool(pool_name.clone()))?;
            return inner
                .allocate_from_pool(pool, svc, events)?
                .ok_or_else(|| AllocationError::PoolExhausted(pool.name().to_string()));
        }

        for pool in pools.iter() {
            if let Some(ip) = inner.allocate_from_pool(pool, svc, events)? {
                return Ok(ip);
            }
        }
        Err(AllocationError::NoAddressesAvailable)
    }

    /// Assigns exactly `ip` to `svc`.
    ///
    /// Fails without touching any state if another service owns `ip` or `ip`
    /// is outside every pool. Re-assigning the address a service already
    /// owns succeeds.
    pub fn assign(
        &self,
        svc: &mut ServiceRecord,
        ip: IpAddr,
        events: &mut dyn EventSink,
    ) -> Result<(), AllocationError> {
        self.lock().assign(svc, ip, events)
    }

    /// Address currently assigned to `key`.
    pub fn assigned(&self, key: &str) -> Option<IpAddr> {
        self.lock().state.address_of(key)
    }

    /// Key of the service owning `ip`.
    pub fn owner(&self, ip: &IpAddr) -> Option<String> {
        self.lock().state.owner(ip).map(str::to_string)
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.lock().state.len()
    }

    /// Whether nothing is assigned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All assignments, sorted by key.
    pub fn entries(&self) -> Vec<(String, IpAddr)> {
        let inner = self.lock();
        let mut entries: Vec<_> = inner
            .state
            .iter()
            .map(|(key, ip)| (key.to_string(), ip))
            .collect();
        entries.sort();
        entries
    }

    /// Per-pool address usage, in registry order.
    ///
    /// An address covered by two pools counts towards both.
    pub fn pool_usage(&self) -> Vec<PoolUsage> {
        let inner = self.lock();
        inner
            .pools
            .iter()
            .map(|pool| PoolUsage {
                name: pool.name().to_string(),
                total: pool.size(),
                allocated: inner.state.iter().filter(|(_, ip)| pool.contains(ip)).count(),
            })
            .collect()
    }

    /// Whether the state maps are exact inverses and every assigned address
    /// lies in a configured pool.
    pub fn is_consistent(&self) -> bool {
        let inner = self.lock();
        inner.state.is_consistent() && inner.state.iter().all(|(_, ip)| inner.pools.contains(&ip))
    }
}

impl Inner {
    fn check_assignable(&self, key: &str, ip: IpAddr) -> Result<(), AllocationError> {
        if let Some(owner) = self.state.owner(&ip) {
            if owner != key {
                return Err(AllocationError::AddressInUse {
                    address: ip,
                    owner: owner.to_string(),
                });
            }
        }
        if !self.pools.contains(&ip) {
            return Err(AllocationError::OutsidePools(ip));
        }
        Ok(())
    }

    fn assign(
        &mut self,
        svc: &mut ServiceRecord,
        ip: IpAddr,
        events: &mut dyn EventSink,
    ) -> Result<(), AllocationError> {
        self.check_assignable(&svc.key, ip)?;

        self.state.insert(&svc.key, ip);
        svc.annotations
            .insert(ASSIGNED_IP_ANNOTATION.to_string(), ip.to_string());
        info!("Assigned IP {} to service {}", ip, svc.key);
        events.record(
            EventType::Normal,
            Reason::IPAllocated,
            format!("Assigned IP \"{ip}\""),
        );
        Ok(())
    }

    /// First free address of `pool`, assigned to `svc`. `None` when the pool
    /// is exhausted.
    fn allocate_from_pool(
        &mut self,
        pool: &Pool,
        svc: &mut ServiceRecord,
        events: &mut dyn EventSink,
    ) -> Result<Option<IpAddr>, AllocationError> {
        for cidr in pool.cidrs() {
            for ip in addresses(cidr) {
                if self.state.owner(&ip).is_none_or(|owner| owner == svc.key) {
                    self.assign(svc, ip, events)?;
                    return Ok(Some(ip));
                }
            }
        }
        debug!("Pool {} has no free address for service {}", pool.name(), svc.key);
        Ok(None)
    }
}

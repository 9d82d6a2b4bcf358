//! Address pools and the pool registry.

use crate::error::PoolError;
use crate::iter::cidr_size;
use ipnet::IpNet;
use std::net::IpAddr;

/// A named, ordered list of CIDR ranges to allocate from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    name: String,
    cidrs: Vec<IpNet>,
}

impl Pool {
    /// Creates a pool from already parsed CIDRs.
    pub fn new(name: impl Into<String>, cidrs: Vec<IpNet>) -> Result<Self, PoolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PoolError::EmptyName);
        }
        if cidrs.is_empty() {
            return Err(PoolError::NoCidrs(name));
        }
        Ok(Self { name, cidrs })
    }

    /// Creates a pool from CIDR strings such as `"192.0.2.0/24"`.
    pub fn parse<S: AsRef<str>>(name: impl Into<String>, cidrs: &[S]) -> Result<Self, PoolError> {
        let name = name.into();
        let parsed = cidrs
            .iter()
            .map(|c| {
                c.as_ref()
                    .trim()
                    .parse::<IpNet>()
                    .map_err(|source| PoolError::InvalidCidr {
                        pool: name.clone(),
                        cidr: c.as_ref().to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, parsed)
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CIDRs in allocation order.
    pub fn cidrs(&self) -> &[IpNet] {
        &self.cidrs
    }

    /// Whether any CIDR of this pool contains `ip`.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.cidrs.iter().any(|cidr| cidr.contains(ip))
    }

    /// Number of addresses covered by the pool, saturating at `u128::MAX`.
    ///
    /// Overlapping CIDRs are counted twice.
    pub fn size(&self) -> u128 {
        self.cidrs
            .iter()
            .map(cidr_size)
            .fold(0u128, u128::saturating_add)
    }
}

/// The set of pools allocation draws from.
///
/// Pools keep the order they were supplied in; unconstrained allocation
/// searches them in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRegistry {
    pools: Vec<Pool>,
}

impl PoolRegistry {
    /// Builds a registry, rejecting duplicate pool names.
    pub fn new(pools: Vec<Pool>) -> Result<Self, PoolError> {
        for (i, pool) in pools.iter().enumerate() {
            if pools[..i].iter().any(|p| p.name == pool.name) {
                return Err(PoolError::DuplicatePool(pool.name.clone()));
            }
        }
        Ok(Self { pools })
    }

    /// Looks up a pool by name.
    pub fn get(&self, name: &str) -> Option<&Pool> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// Iterates pools in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter()
    }

    /// Whether `ip` lies in any CIDR of any pool.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.pools.iter().any(|p| p.contains(ip))
    }

    /// Number of pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the registry has no pools.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

//! Error types for the LB IPAM core.

use std::net::{AddrParseError, IpAddr};
use thiserror::Error;

/// Errors returned by the allocator.
///
/// Every variant is returned before any state is mutated, so a failed
/// allocation leaves the allocation state exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The requested load-balancer IP is not a valid address
    #[error("invalid requested address {address:?}")]
    InvalidRequestedAddress {
        /// Requested text, as written on the service
        address: String,
        /// Parse failure
        source: AddrParseError,
    },

    /// The requested pool is not in the registry
    #[error("pool {0:?} does not exist")]
    UnknownPool(String),

    /// The address is already assigned to another service
    #[error("address {address} already belongs to other service {owner:?}")]
    AddressInUse {
        /// Contested address
        address: IpAddr,
        /// Key of the service currently owning the address
        owner: String,
    },

    /// The address is not inside any configured pool
    #[error("address {0} is not part of any known pool")]
    OutsidePools(IpAddr),

    /// The explicitly requested pool has no free address left
    #[error("no addresses available in pool {0:?}")]
    PoolExhausted(String),

    /// No pool has a free address left
    #[error("no addresses available in any pool")]
    NoAddressesAvailable,
}

/// Errors returned by a reconciliation pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Allocation failed; the service is left unassigned
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// The pass ended with neither an address nor an error
    #[error("didn't allocate an IP but also did not fail")]
    Internal,
}

/// Errors building pools and registries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool name is empty
    #[error("pool name must not be empty")]
    EmptyName,

    /// Pool has no CIDRs
    #[error("pool {0:?} has no CIDRs")]
    NoCidrs(String),

    /// A CIDR could not be parsed
    #[error("pool {pool:?} has invalid CIDR {cidr:?}")]
    InvalidCidr {
        /// Pool name
        pool: String,
        /// Offending CIDR text
        cidr: String,
        /// Parse failure
        source: ipnet::AddrParseError,
    },

    /// Two pools share a name
    #[error("duplicate pool {0:?}")]
    DuplicatePool(String),
}

/// Errors loading a pool configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read pool config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid YAML for the pool config format
    #[error("failed to parse pool config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A pool definition is invalid
    #[error("invalid pool config: {0}")]
    Pool(#[from] PoolError),
}

//! LB IPAM
//!
//! Assigns externally reachable addresses to `LoadBalancer` services from a
//! set of configured address pools, and keeps those assignments consistent
//! as services and pools change.
//!
//! The entry point is [`converge_service`], which runs one reconciliation
//! pass for a service against a shared [`Allocator`].

pub mod allocator;
pub mod config;
pub mod error;
pub mod events;
pub mod iter;
pub mod pool;
pub mod reconcile;
pub mod service;
mod state;

mod allocator_test;

pub use allocator::{Allocator, PoolUsage};
pub use config::{PoolConfig, PoolDefinition};
pub use error::{AllocationError, ConfigError, PoolError, ReconcileError};
pub use events::{EventSink, EventType, Reason, ServiceEvent};
pub use iter::{addresses, cidr_size, next_ip};
pub use pool::{Pool, PoolRegistry};
pub use reconcile::{converge_service, Decision};
pub use service::{ServiceRecord, TrafficPolicy, ADDRESS_POOL_ANNOTATION, ASSIGNED_IP_ANNOTATION};

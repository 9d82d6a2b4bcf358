//! LB IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the LB IPAM controller.

pub mod address_pool;

pub use address_pool::*;

//! Controller-specific error types.
//!
//! This module defines error types specific to the LB IP Controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use lb_ipam::{ConfigError, ReconcileError};
use thiserror::Error;

/// Errors that can occur in the LB IP Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Static pool file could not be loaded
    #[error("Pool configuration error: {0}")]
    Pool(#[from] ConfigError),

    /// A reconciliation pass ended without an address
    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[from] ReconcileError),

    /// Shutdown signal could not be installed
    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

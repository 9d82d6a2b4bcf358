//! The slice of a load-balanced service the engine reads and writes.

use std::collections::BTreeMap;
use std::fmt;

/// Annotation stamped with the address assigned to a service.
pub const ASSIGNED_IP_ANNOTATION: &str = "lbipam.microscaler.io/assigned-ip";

/// Annotation naming the pool a service wants its address from.
pub const ADDRESS_POOL_ANNOTATION: &str = "lbipam.microscaler.io/address-pool";

/// External traffic policy of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrafficPolicy {
    /// Traffic may be forwarded to endpoints on any node
    #[default]
    Cluster,
    /// Traffic is only delivered to endpoints on the receiving node
    Local,
}

impl TrafficPolicy {
    /// Kubernetes spelling of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::Local => "Local",
        }
    }

    /// Parses the Kubernetes spelling; unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Cluster" => Some(Self::Cluster),
            "Local" => Some(Self::Local),
            _ => None,
        }
    }
}

impl fmt::Display for TrafficPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service as seen by one reconciliation pass.
///
/// `annotations`, `external_traffic_policy` and `ingress` are written by the
/// engine; the driver copies them back to the cluster afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Stable identity, `namespace/name`
    pub key: String,
    /// `spec.loadBalancerIP` as written by the user
    pub load_balancer_ip: Option<String>,
    /// Object annotations
    pub annotations: BTreeMap<String, String>,
    /// `spec.externalTrafficPolicy`
    pub external_traffic_policy: Option<TrafficPolicy>,
    /// `status.loadBalancer.ingress[*].ip`
    pub ingress: Vec<String>,
}

impl ServiceRecord {
    /// Creates an empty record for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Sets the requested load-balancer IP.
    #[must_use]
    pub fn with_load_balancer_ip(mut self, ip: impl Into<String>) -> Self {
        self.load_balancer_ip = Some(ip.into());
        self
    }

    /// Sets the requested pool annotation.
    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.annotations
            .insert(ADDRESS_POOL_ANNOTATION.to_string(), pool.into());
        self
    }

    /// Sets the assigned-ip annotation, as a previous pass would have.
    #[must_use]
    pub fn with_assigned_ip(mut self, ip: impl Into<String>) -> Self {
        self.annotations
            .insert(ASSIGNED_IP_ANNOTATION.to_string(), ip.into());
        self
    }

    /// The user-requested address, ignoring an empty string.
    pub fn requested_ip(&self) -> Option<&str> {
        self.load_balancer_ip.as_deref().filter(|s| !s.is_empty())
    }

    /// The user-requested pool, ignoring an empty string.
    pub fn requested_pool(&self) -> Option<&str> {
        self.annotations
            .get(ADDRESS_POOL_ANNOTATION)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Raw value of the assigned-ip annotation.
    pub fn assigned_ip(&self) -> Option<&str> {
        self.annotations.get(ASSIGNED_IP_ANNOTATION).map(String::as_str)
    }
}

//! AddressPool CRD
//!
//! Defines a named set of CIDR ranges that load-balancer addresses are
//! allocated from. The pool name is the resource name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lbipam.microscaler.io",
    version = "v1alpha1",
    kind = "AddressPool",
    status = "AddressPoolStatus",
    printcolumn = r#"{"name":"CIDRS", "type":"string", "description":"CIDR ranges of the pool", "jsonPath":".spec.cidrs"}"#,
    printcolumn = r#"{"name":"ALLOCATED", "type":"integer", "description":"assigned addresses", "jsonPath":".status.allocatedAddresses"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AddressPoolSpec {
    /// CIDR ranges (e.g. "192.0.2.0/28"), searched in the order listed
    pub cidrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressPoolStatus {
    /// Addresses covered by the pool's CIDRs (saturates at u64::MAX)
    pub total_addresses: u64,

    /// Addresses currently assigned to services
    pub allocated_addresses: u64,

    /// Error message if the pool definition is invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: AddressPoolSpec =
            serde_json::from_value(serde_json::json!({ "cidrs": ["192.0.2.0/30"] })).unwrap();
        assert_eq!(spec.cidrs, vec!["192.0.2.0/30".to_string()]);
    }

    #[test]
    fn test_status_skips_empty_fields() {
        let status = AddressPoolStatus {
            total_addresses: 4,
            allocated_addresses: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "totalAddresses": 4, "allocatedAddresses": 1 })
        );
    }
}

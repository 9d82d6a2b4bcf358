//! Static pool configuration.
//!
//! Pools can be supplied as a YAML document instead of `AddressPool`
//! resources:
//!
//! ```yaml
//! addressPools:
//!   - name: default
//!     cidrs: ["192.0.2.0/30"]
//! ```

use crate::error::ConfigError;
use crate::pool::{Pool, PoolRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pool configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Pools in allocation order
    #[serde(default)]
    pub address_pools: Vec<PoolDefinition>,
}

/// A single pool entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolDefinition {
    /// Pool name, referenced by the address-pool annotation
    pub name: String,

    /// CIDR ranges, searched in order
    pub cidrs: Vec<String>,
}

impl PoolConfig {
    /// Parses a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Validates the definitions and builds a registry.
    pub fn into_registry(self) -> Result<PoolRegistry, ConfigError> {
        let pools = self
            .address_pools
            .into_iter()
            .map(|def| Pool::parse(def.name, &def.cidrs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PoolRegistry::new(pools)?)
    }
}

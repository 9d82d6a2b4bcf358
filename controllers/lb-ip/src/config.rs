//! Controller configuration, read from the environment.

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Default event reporting component.
pub const DEFAULT_CONTROLLER_NAME: &str = "lb-ip-controller";

/// Runtime settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch services in; all namespaces when `None`
    pub namespace: Option<String>,
    /// Static pool file; pools come from `AddressPool` resources when `None`
    pub pool_config: Option<PathBuf>,
    /// Component name used when publishing events
    pub controller_name: String,
    /// Instance name used when publishing events (usually the pod name)
    pub instance: Option<String>,
}

impl ControllerConfig {
    /// Loads configuration from environment variables:
    /// `WATCH_NAMESPACE`, `POOL_CONFIG`, `CONTROLLER_NAME`, `POD_NAME`.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let controller_name = match lookup("CONTROLLER_NAME") {
            None => DEFAULT_CONTROLLER_NAME.to_string(),
            Some(name) if name.trim().is_empty() => {
                return Err(ControllerError::InvalidConfig(
                    "CONTROLLER_NAME must not be empty".to_string(),
                ));
            }
            Some(name) => name,
        };

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            pool_config: non_empty("POOL_CONFIG").map(PathBuf::from),
            controller_name,
            instance: non_empty("POD_NAME"),
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
        match &self.pool_config {
            Some(path) => info!("  Pools: static file {}", path.display()),
            None => info!("  Pools: AddressPool resources"),
        }
        info!("  Controller name: {}", self.controller_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config,
            ControllerConfig {
                namespace: None,
                pool_config: None,
                controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
                instance: None,
            }
        );
    }

    #[test]
    fn test_all_values() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "shop"),
            ("POOL_CONFIG", "/etc/lb-ipam/pools.yaml"),
            ("CONTROLLER_NAME", "edge-lb"),
            ("POD_NAME", "edge-lb-0"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("shop"));
        assert_eq!(config.pool_config, Some(PathBuf::from("/etc/lb-ipam/pools.yaml")));
        assert_eq!(config.controller_name, "edge-lb");
        assert_eq!(config.instance.as_deref(), Some("edge-lb-0"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config =
            ControllerConfig::from_lookup(lookup(&[("WATCH_NAMESPACE", ""), ("POOL_CONFIG", " ")]))
                .unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.pool_config, None);
    }

    #[test]
    fn test_empty_controller_name_is_rejected() {
        let err = ControllerConfig::from_lookup(lookup(&[("CONTROLLER_NAME", "")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}

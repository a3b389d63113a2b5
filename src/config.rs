//! YAML-backed configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StratumError;

const VALID_MAX_WORKERS: [u32; 3] = [1, 256, 65536];
const DEFAULT_MAX_WORKERS: u32 = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEndpointConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub name: Option<String>,
    pub listen: ListenConfig,
    pub pools: Vec<PoolEndpointConfig>,
    #[serde(default = "default_class")]
    pub worker_class: String,
    #[serde(default = "default_class")]
    pub pool_class: String,
    pub max_workers: Option<u32>,
    pub extranonce_subscribe: Option<bool>,
}

fn default_class() -> String {
    "equihash".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub proxies: Vec<ProxyConfig>,
}

impl AppConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, StratumError> {
        serde_yaml::from_str(content)
            .map_err(|e| StratumError::ConfigurationError(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StratumError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            StratumError::ConfigurationError(format!("failed to read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml_str(&content)
    }
}

/// Validate and normalize `max_workers`, preserving the source's quirk of
/// logging the *pre-default* value (`None`) rather than the value it
/// defaults to, when the setting is absent; retained as-is (benign).
pub fn resolve_max_workers(configured: Option<u32>, log_prefix: &str) -> u32 {
    match configured {
        None => {
            log::info!(
                target: "stratum-proxy",
                "{log_prefix} defaulting to {:?} max workers",
                configured
            );
            DEFAULT_MAX_WORKERS
        }
        Some(value) if VALID_MAX_WORKERS.contains(&value) => value,
        Some(value) => {
            log::warn!(
                target: "stratum-proxy",
                "{log_prefix} invalid 'max_workers' setting ({value}), defaulting to {DEFAULT_MAX_WORKERS} instead"
            );
            DEFAULT_MAX_WORKERS
        }
    }
}

/// A starting YAML template written by `--generate-config`.
pub fn generate_config_template() -> String {
    r#"proxies:
  - name: zcash-proxy
    listen:
      host: 0.0.0.0
      port: 3333
    pools:
      - host: pool.example.com
        port: 3357
        account_name: t1YourZcashAddress
        account_password: x
    worker_class: equihash
    pool_class: equihash
    max_workers: 256
    extranonce_subscribe: true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
proxies:
  - listen: { host: "0.0.0.0", port: 3333 }
    pools:
      - host: pool.example.com
        port: 3357
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].worker_class, "equihash");
        assert_eq!(config.proxies[0].pools[0].port, 3357);
    }

    #[test]
    fn resolve_max_workers_defaults_when_absent() {
        assert_eq!(resolve_max_workers(None, "P:x:"), 256);
    }

    #[test]
    fn resolve_max_workers_rejects_invalid_value() {
        assert_eq!(resolve_max_workers(Some(7), "P:x:"), 256);
    }

    #[test]
    fn resolve_max_workers_accepts_valid_tiers() {
        assert_eq!(resolve_max_workers(Some(1), "P:x:"), 1);
        assert_eq!(resolve_max_workers(Some(65536), "P:x:"), 65536);
    }

    #[test]
    fn generate_config_template_is_valid_yaml() {
        let rendered = generate_config_template();
        let parsed = AppConfig::from_yaml_str(&rendered).unwrap();
        assert_eq!(parsed.proxies.len(), 1);
    }
}

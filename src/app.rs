//! Supervises the configured Proxies: instantiation, startup, and a
//! coordinated shutdown on Ctrl-C.

use std::collections::HashSet;

use futures::future::join_all;

use crate::config::AppConfig;
use crate::error::StratumError;
use crate::proxy::Proxy;
use crate::registry::StrategyRegistry;

pub struct Application {
    proxies: Vec<Proxy>,
}

impl Application {
    pub fn from_config(config: AppConfig) -> Result<Self, StratumError> {
        let registry = StrategyRegistry::new();
        let mut proxies = Vec::with_capacity(config.proxies.len());
        let mut seen_names = HashSet::new();

        for proxy_config in &config.proxies {
            let proxy = Proxy::from_config(proxy_config, &registry)?;
            if !seen_names.insert(proxy.name.clone()) {
                return Err(StratumError::ConfigurationError(format!(
                    "duplicate proxy name: {}",
                    proxy.name
                )));
            }
            proxies.push(proxy);
        }

        Ok(Self { proxies })
    }

    /// Start every configured proxy. The first bind failure is returned;
    /// proxies started before it remain running (the caller should
    /// `shutdown()` on error to avoid leaking listeners).
    pub async fn startup(&self) -> Result<(), StratumError> {
        for proxy in &self.proxies {
            log::info!(target: "stratum-proxy", "starting proxy '{}'", proxy.name);
            proxy.startup().await?;
        }
        Ok(())
    }

    /// Close every proxy concurrently, logging (rather than failing) any
    /// individual shutdown error so the others still get a chance to
    /// close cleanly.
    pub async fn shutdown(&self) {
        let results = join_all(self.proxies.iter().map(|proxy| async move {
            (proxy.name.clone(), proxy.shutdown().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                log::warn!(target: "stratum-proxy", "error shutting down proxy '{name}': {e}");
            }
        }
    }
}

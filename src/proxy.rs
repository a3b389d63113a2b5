//! Binds one Pool client to one Worker server and orchestrates their
//! startup/shutdown.

use std::sync::Arc;

use crate::config::{resolve_max_workers, ProxyConfig};
use crate::error::StratumError;
use crate::pool::{PoolClient, PoolConfig};
use crate::registry::StrategyRegistry;
use crate::worker::WorkerServer;

pub struct Proxy {
    pub name: String,
    pool: Arc<PoolClient>,
    workers: Arc<WorkerServer>,
}

impl Proxy {
    /// Build a Proxy from a config entry, resolving `worker_class`/
    /// `pool_class` through the strategy registry.
    pub fn from_config(config: &ProxyConfig, registry: &StrategyRegistry) -> Result<Self, StratumError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", config.listen.host, config.listen.port));

        if config.pools.is_empty() {
            return Err(StratumError::ConfigurationError(format!(
                "proxy {name}: at least one pool is required"
            )));
        }

        let pool_configs: Vec<PoolConfig> = config
            .pools
            .iter()
            .map(|p| PoolConfig {
                host: p.host.clone(),
                port: p.port,
                account_name: p.account_name.clone(),
                account_password: p.account_password.clone(),
            })
            .collect();

        let pool_strategy = registry.pool_strategy(&config.pool_class)?;
        let worker_strategy = registry.worker_strategy(&config.worker_class)?;

        let extranonce_subscribe = config.extranonce_subscribe.unwrap_or(false);
        let pool = Arc::new(PoolClient::new(&name, pool_configs, pool_strategy, extranonce_subscribe));

        let max_workers = resolve_max_workers(config.max_workers, &format!("W:{name}:"));
        let workers = Arc::new(WorkerServer::new(
            &name,
            config.listen.host.clone(),
            config.listen.port,
            max_workers,
            pool.clone(),
            worker_strategy,
        ));

        Ok(Self { name, pool, workers })
    }

    /// Wire the pool/worker back-reference, bind the listener, and spawn
    /// the accept loop and watchdog. Address-in-use surfaces as a fatal
    /// `ServerAddressInUse` for this proxy.
    pub async fn startup(&self) -> Result<(), StratumError> {
        self.pool.set_workers(self.workers.clone()).await;
        self.workers.start_listening().await?;
        Ok(())
    }

    /// Close workers (disconnecting all miners) then the pool connection.
    pub async fn shutdown(&self) -> Result<(), StratumError> {
        self.workers.close().await?;
        self.pool.close().await?;
        Ok(())
    }
}

pub mod config;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::collections::JobMap;
use crate::error::{JsonRpcError, StratumError};
use crate::ready::ReadyLatch;
use crate::rpc::connection::RpcConnection;
use crate::rpc::dispatch::HandlerTable;
use crate::rpc::message::{
    CLIENT_GET_VERSION, CLIENT_SHOW_MESSAGE, MINING_AUTHORIZE, MINING_EXTRANONCE_SUBSCRIBE,
    MINING_NOTIFY, MINING_SET_DIFFICULTY, MINING_SET_EXTRANONCE, MINING_SET_TARGET,
    MINING_SUBMIT, MINING_SUBSCRIBE,
};
use crate::strategy::PoolStrategy;
use crate::worker::WorkerServer;

pub use config::{PoolConfig, PoolConfigList};

const JOB_HISTORY_CAPACITY: usize = 3;
const EXTRANONCE_SUBSCRIBE_TIMEOUT_SECS: u64 = 5;
const RECONNECT_BACKOFF_SECS: u64 = 10;

/// Builds the pool account name a miner's auth/submit should be forwarded
/// under: if the pool's configured account name has no worker suffix
/// (`.`), the miner's own worker suffix (the part of its name after the
/// last `.`) is appended. Mirrors `get_auth_params` in
/// `protocols/stratum.py`.
fn translate_account_name(pool_account: &str, miner_name: &str) -> String {
    if pool_account.contains('.') {
        return pool_account.to_string();
    }
    let worker_suffix = miner_name.rsplit_once('.').map(|(_, suffix)| suffix).unwrap_or("");
    [pool_account, worker_suffix]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// The pool-side client state machine: maintains exactly one pool
/// session, exposes an authoritative view of nonce state/current
/// job/target, proxies `mining.submit` upstream, and broadcasts downstream
/// on job/target changes.
pub struct PoolClient {
    log_prefix: String,
    strategy: Box<dyn PoolStrategy>,
    extranonce_subscribe_enabled: bool,

    configs: Mutex<PoolConfigList>,
    connection: Mutex<Option<Arc<RpcConnection>>>,
    connected: AtomicBool,
    stopping: AtomicBool,
    ready: ReadyLatch,

    subscriptions: Mutex<HashMap<String, Value>>,
    extra_nonce1: Mutex<Option<String>>,
    extra_nonce2_size: Mutex<Option<usize>>,
    target_difficulty: Mutex<Option<Value>>,
    jobs: Mutex<JobMap>,
    current_job: Mutex<Option<Value>>,
    authorized_workers: Mutex<HashMap<String, String>>,
    unauthorized_workers: Mutex<HashSet<String>>,

    workers: Mutex<Option<Arc<WorkerServer>>>,
}

impl PoolClient {
    pub fn new(
        proxy_name: &str,
        configs: Vec<PoolConfig>,
        strategy: Box<dyn PoolStrategy>,
        extranonce_subscribe_enabled: bool,
    ) -> Self {
        Self {
            log_prefix: format!("P:{proxy_name}:"),
            strategy,
            extranonce_subscribe_enabled,
            configs: Mutex::new(PoolConfigList::new(configs)),
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            ready: ReadyLatch::new(),
            subscriptions: Mutex::new(HashMap::new()),
            extra_nonce1: Mutex::new(None),
            extra_nonce2_size: Mutex::new(None),
            target_difficulty: Mutex::new(None),
            jobs: Mutex::new(JobMap::with_capacity(JOB_HISTORY_CAPACITY)),
            current_job: Mutex::new(None),
            authorized_workers: Mutex::new(HashMap::new()),
            unauthorized_workers: Mutex::new(HashSet::new()),
            workers: Mutex::new(None),
        }
    }

    /// Wire the back-reference to the worker server. Both sides hold a
    /// plain `Arc` to the other; no reference-cycle avoidance is needed
    /// since the Proxy that owns both outlives the process.
    pub async fn set_workers(&self, workers: Arc<WorkerServer>) {
        *self.workers.lock().await = Some(workers);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn set_ready(&self) {
        if !self.ready.is_ready() {
            self.ready.set();
        }
    }

    pub async fn wait_until_ready(&self) {
        self.ready.wait().await
    }

    pub async fn extra_nonce1(&self) -> Option<String> {
        self.extra_nonce1.lock().await.clone()
    }

    pub async fn extra_nonce2_size(&self) -> Option<usize> {
        *self.extra_nonce2_size.lock().await
    }

    pub async fn target_difficulty(&self) -> Option<Value> {
        self.target_difficulty.lock().await.clone()
    }

    pub async fn current_job(&self) -> Option<Value> {
        self.current_job.lock().await.clone()
    }

    pub async fn has_job(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains(job_id)
    }

    /// Snapshot `jobs` for use by a strategy's `validate_share_params`,
    /// which needs to check `job_id` membership without holding the lock
    /// across the whole validation.
    pub async fn jobs_snapshot(&self) -> JobMap {
        self.jobs.lock().await.clone()
    }

    async fn active_config(&self) -> Result<PoolConfig, StratumError> {
        self.configs
            .lock()
            .await
            .active()
            .cloned()
            .ok_or_else(|| StratumError::ConfigurationError("no pool configs configured".into()))
    }

    async fn connection(&self) -> Option<Arc<RpcConnection>> {
        self.connection.lock().await.clone()
    }

    async fn workers(&self) -> Option<Arc<WorkerServer>> {
        self.workers.lock().await.clone()
    }

    async fn broadcast(&self, method: &str, params: Value, is_notification: bool) {
        if let Some(workers) = self.workers().await {
            workers.broadcast(method, params, is_notification).await;
        }
    }

    /// Establish the outbound TCP connection and spawn the task that
    /// drives its read loop. On disconnect (while not stopping), runs the
    /// failover state machine.
    pub async fn connect(self: &Arc<Self>) -> Result<(), StratumError> {
        let cfg = self.active_config().await?;
        log::info!(target: "stratum-proxy", "{} connecting to {}:{}", self.log_prefix, cfg.host, cfg.port);

        let conn = Arc::new(RpcConnection::connect(&cfg.host, cfg.port).await?);
        *self.connection.lock().await = Some(conn.clone());
        self.connected.store(true, Ordering::SeqCst);

        let handlers = self.handler_table();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.run(&handlers).await {
                log::warn!(target: "stratum-proxy", "{} pool connection error: {e}", this.log_prefix);
            }
            this.connected.store(false, Ordering::SeqCst);
            if !this.stopping.load(Ordering::SeqCst) {
                this.handle_disconnect().await;
            }
        });

        Ok(())
    }

    async fn handle_disconnect(&self) {
        log::warn!(target: "stratum-proxy", "{} disconnected from pool", self.log_prefix);
        self.ready.clear();
        self.jobs.lock().await.clear();
        *self.current_job.lock().await = None;
        self.authorized_workers.lock().await.clear();
        self.unauthorized_workers.lock().await.clear();

        // All worker connections must be closed so they reconnect and
        // resubscribe for the (possibly new) nonce once we're back.
        if let Some(workers) = self.workers().await {
            workers.close_all_connections().await;
        }

        self.use_next_pool_config().await;
    }

    /// Rotate to the next pool config, or back off and retry the current
    /// one if there is no fallback.
    pub async fn use_next_pool_config(&self) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        self.ready.clear();

        let rotated = self.configs.lock().await.rotate();
        if !rotated {
            log::warn!(
                target: "stratum-proxy",
                "{} waiting {} seconds before reconnecting to current pool",
                self.log_prefix, RECONNECT_BACKOFF_SECS
            );
            tokio::time::sleep(Duration::from_secs(RECONNECT_BACKOFF_SECS)).await;
        }
    }

    /// Subscribe, negotiate extranonce, and mark ready.
    pub async fn initialize(&self) -> Result<(), StratumError> {
        self.subscribe().await?;
        self.extranonce_subscribe().await;
        self.set_ready();
        Ok(())
    }

    async fn subscribe(&self) -> Result<(), StratumError> {
        let conn = self
            .connection()
            .await
            .ok_or_else(|| StratumError::NetworkError("not connected to pool".into()))?;
        let cfg = self.active_config().await?;
        let notify_id = self.subscriptions.lock().await.get(MINING_NOTIFY).cloned();
        let params = self
            .strategy
            .subscription_request_params(notify_id.as_ref(), &cfg.host, cfg.port);

        let outcome = conn.rpc(MINING_SUBSCRIBE, params, None).await?;
        if !outcome.success {
            return Err(StratumError::SubscriptionFailed(outcome.data.to_string()));
        }

        let data = outcome
            .data
            .as_array()
            .cloned()
            .ok_or_else(|| StratumError::SubscriptionFailed("invalid subscription response shape".into()))?;
        if data.is_empty() {
            return Err(StratumError::SubscriptionFailed("empty subscription response".into()));
        }

        self.apply_subscriptions(&data[0]).await;

        let extra_nonce1 = data.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
        let extra_nonce2_size = data.get(2).and_then(Value::as_u64).map(|v| v as usize);

        *self.extra_nonce1.lock().await = Some(extra_nonce1);
        *self.extra_nonce2_size.lock().await = extra_nonce2_size;

        Ok(())
    }

    /// Parse the heterogeneous `subscriptions` response shape: a list of `[method, id]` pairs, a single `[method, id]` pair,
    /// or a bare scalar treated as the `mining.notify` id.
    async fn apply_subscriptions(&self, value: &Value) {
        let mut subs = self.subscriptions.lock().await;
        match value {
            Value::Array(items) if matches!(items.first(), Some(Value::Array(_))) => {
                for item in items {
                    if let Some(pair) = item.as_array() {
                        if pair.len() >= 2 {
                            if let Some(method) = pair[0].as_str() {
                                subs.insert(method.to_string(), pair[1].clone());
                            }
                        }
                    }
                }
            }
            Value::Array(items) if items.len() >= 2 => {
                if let Some(method) = items[0].as_str() {
                    subs.insert(method.to_string(), items[1].clone());
                }
            }
            Value::Array(_) | Value::Null => {}
            scalar => {
                subs.insert(MINING_NOTIFY.to_string(), scalar.clone());
            }
        }
    }

    async fn extranonce_subscribe(&self) {
        if !self.extranonce_subscribe_enabled {
            return;
        }
        let conn = match self.connection().await {
            Some(c) => c,
            None => return,
        };

        match conn
            .rpc(
                MINING_EXTRANONCE_SUBSCRIBE,
                Value::Array(vec![]),
                Some(EXTRANONCE_SUBSCRIBE_TIMEOUT_SECS),
            )
            .await
        {
            Ok(outcome) if outcome.as_bool() => {
                log::info!(target: "stratum-proxy", "{} pool supports mining.extranonce.subscribe", self.log_prefix);
            }
            Ok(_) => {
                log::info!(target: "stratum-proxy", "{} pool declined mining.extranonce.subscribe", self.log_prefix);
            }
            Err(e) => {
                log::info!(target: "stratum-proxy", "{} pool doesn't support mining.extranonce.subscribe: {e}", self.log_prefix);
            }
        }
    }

    fn translate_auth(&self, cfg: &PoolConfig, miner_name: &str) -> (String, String) {
        (
            translate_account_name(&cfg.account_name, miner_name),
            cfg.account_password.clone(),
        )
    }

    /// Translate the miner's credentials to the pool account to use, and
    /// authorize with the pool if not already known.
    ///
    /// The miner's own password is never forwarded upstream; only the
    /// pool's configured account password is used, matching
    /// `get_auth_params` in the source implementation.
    pub async fn authorize(&self, miner_name: &str, _miner_password: &str) -> Result<bool, StratumError> {
        let cfg = self.active_config().await?;
        let (paccount_name, paccount_password) = self.translate_auth(&cfg, miner_name);

        {
            let authorized = self.authorized_workers.lock().await;
            if authorized.get(&paccount_name) == Some(&paccount_password) {
                return Ok(true);
            }
        }

        if self.unauthorized_workers.lock().await.contains(&paccount_name) {
            return Ok(false);
        }

        if paccount_name.is_empty() {
            return Ok(false);
        }

        let conn = self
            .connection()
            .await
            .ok_or_else(|| StratumError::NetworkError("not connected to pool".into()))?;
        let outcome = conn
            .rpc(MINING_AUTHORIZE, json!([paccount_name, paccount_password]), None)
            .await?;

        let authorized = outcome.as_bool();
        if authorized {
            self.authorized_workers
                .lock()
                .await
                .insert(paccount_name, paccount_password);
        } else {
            log::warn!(target: "stratum-proxy", "{} pool authorization denied for {}", self.log_prefix, paccount_name);
            self.unauthorized_workers.lock().await.insert(paccount_name);
        }

        Ok(authorized)
    }

    /// Rewrite `params[0]` to the translated pool account and forward
    /// `mining.submit` upstream.
    pub async fn submit(&self, mut params: Value) -> Result<bool, StratumError> {
        let cfg = self.active_config().await?;
        let miner_name = params
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .ok_or_else(|| StratumError::Protocol("mining.submit missing account name".into()))?
            .to_string();

        let (paccount_name, paccount_password) = self.translate_auth(&cfg, &miner_name);

        let authorized = {
            let authorized_workers = self.authorized_workers.lock().await;
            authorized_workers.get(&paccount_name) == Some(&paccount_password)
        };
        if !authorized {
            return Err(StratumError::Rpc(JsonRpcError::unauthorized_worker()));
        }

        if let Some(arr) = params.as_array_mut() {
            arr[0] = Value::String(paccount_name);
        }

        let conn = self
            .connection()
            .await
            .ok_or_else(|| StratumError::NetworkError("not connected to pool".into()))?;
        log::debug!(target: "stratum-proxy", "{} mining.submit params sent to pool {:?}", self.log_prefix, params);
        let outcome = conn.rpc(MINING_SUBMIT, params, None).await?;
        Ok(outcome.as_bool())
    }

    pub async fn close(&self) -> Result<(), StratumError> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close().await?;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn handler_table(self: &Arc<Self>) -> HandlerTable {
        let mut table = HandlerTable::new();

        let pool = self.clone();
        table.register(MINING_NOTIFY, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_mining_notify(params).await }
        });

        let pool = self.clone();
        table.register(MINING_SET_TARGET, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_mining_set_target(params).await }
        });

        let pool = self.clone();
        table.register(MINING_SET_DIFFICULTY, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_mining_set_difficulty(params).await }
        });

        let pool = self.clone();
        table.register(MINING_SET_EXTRANONCE, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_mining_set_extranonce(params).await }
        });

        let pool = self.clone();
        table.register(CLIENT_SHOW_MESSAGE, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_client_show_message(params).await }
        });

        let pool = self.clone();
        table.register(CLIENT_GET_VERSION, move |_conn, params| {
            let pool = pool.clone();
            async move { pool.handle_client_get_version(params).await }
        });

        table
    }

    async fn handle_mining_notify(&self, params: Value) -> Result<Value, JsonRpcError> {
        let (job_id, clean_jobs) = self.strategy.validate_job_params(&params)?;

        {
            let mut jobs = self.jobs.lock().await;
            if clean_jobs {
                jobs.clear();
            }
            jobs.insert(job_id, params.clone());
        }
        *self.current_job.lock().await = Some(params.clone());

        self.broadcast(MINING_NOTIFY, params, true).await;
        Ok(Value::Null)
    }

    async fn handle_mining_set_target(&self, params: Value) -> Result<Value, JsonRpcError> {
        let target = params
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.set_target requires a target"))?;
        *self.target_difficulty.lock().await = Some(target);
        self.broadcast(MINING_SET_TARGET, params, true).await;
        Ok(Value::Null)
    }

    async fn handle_mining_set_difficulty(&self, params: Value) -> Result<Value, JsonRpcError> {
        let difficulty = params
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.set_difficulty requires a value"))?;
        *self.target_difficulty.lock().await = Some(difficulty);
        self.broadcast(MINING_SET_DIFFICULTY, params, true).await;
        Ok(Value::Null)
    }

    async fn handle_mining_set_extranonce(&self, params: Value) -> Result<Value, JsonRpcError> {
        let arr = params
            .as_array()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.set_extranonce must be an array"))?;
        if arr.len() != 2 {
            return Err(JsonRpcError::invalid_params(
                "mining.set_extranonce expects [nonce1, nonce2_size]",
            ));
        }

        let new_nonce1 = arr[0]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("invalid extranonce1"))?
            .to_string();
        let new_size = arr[1].as_u64().map(|v| v as usize);

        *self.extra_nonce1.lock().await = Some(new_nonce1.clone());
        *self.extra_nonce2_size.lock().await = new_size;

        if let Some(workers) = self.workers().await {
            workers.handle_set_extranonce(new_nonce1, new_size).await;
        }

        Ok(Value::Null)
    }

    async fn handle_client_show_message(&self, params: Value) -> Result<Value, JsonRpcError> {
        let arr = params
            .as_array()
            .ok_or_else(|| JsonRpcError::invalid_params("client.show_message must be an array"))?;
        if arr.len() != 1 {
            return Err(JsonRpcError::invalid_params(
                "client.show_message expects exactly one element",
            ));
        }
        // Sent as a request (not a notification) to workers, matching
        // `handle_client_show_message` in the source implementation.
        self.broadcast(CLIENT_SHOW_MESSAGE, params, false).await;
        Ok(Value::Null)
    }

    async fn handle_client_get_version(&self, _params: Value) -> Result<Value, JsonRpcError> {
        Ok(Value::String(crate::APP_VERSION.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_account_name_appends_worker_suffix_when_pool_account_bare() {
        assert_eq!(translate_account_name("poolacct", "miner.rigA"), "poolacct.rigA");
    }

    #[test]
    fn translate_account_name_keeps_pool_account_when_already_suffixed() {
        assert_eq!(translate_account_name("poolacct.default", "miner.rigA"), "poolacct.default");
    }

    #[test]
    fn translate_account_name_handles_miner_name_without_dot() {
        assert_eq!(translate_account_name("poolacct", "rigA"), "poolacct");
    }

    #[test]
    fn translate_account_name_handles_empty_pool_account() {
        assert_eq!(translate_account_name("", "miner.rigA"), "rigA");
    }
}

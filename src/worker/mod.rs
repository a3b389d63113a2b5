use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

use crate::collections::RecentShares;
use crate::error::{JsonRpcError, StratumError};
use crate::pool::PoolClient;
use crate::rpc::connection::RpcConnection;
use crate::rpc::dispatch::HandlerTable;
use crate::rpc::message::{MINING_AUTHORIZE, MINING_SUBMIT, MINING_SUBSCRIBE};
use crate::strategy::WorkerStrategy;

const RECENT_SHARES_CAPACITY: usize = 500;
const WATCHDOG_INTERVAL_SECS: u64 = 1;

/// Byte width of the extra-nonce tail for a given `max_workers` ceiling:
/// one shared nonce space, a 1-byte tail, or a 2-byte tail.
fn tail_width_bytes(max_workers: u32) -> usize {
    match max_workers {
        1 => 0,
        256 => 1,
        _ => 2,
    }
}

/// Allocate the lowest unused tail for `width` bytes, or `None` once every
/// value is taken.
fn allocate_tail(width: usize, in_use: &HashSet<String>) -> Option<String> {
    if width == 0 {
        return Some(String::new());
    }
    let limit: u64 = 1u64 << (width * 8);
    for i in 0..limit {
        let bytes = i.to_be_bytes();
        let tail = hex::encode(&bytes[bytes.len() - width..]);
        if !in_use.contains(&tail) {
            return Some(tail);
        }
    }
    None
}

/// The worker-facing server: accepts downstream miner connections,
/// assigns each a unique extra-nonce tail, proxies Stratum methods to the
/// Pool client, and runs the pool-reconnect watchdog.
pub struct WorkerServer {
    log_prefix: String,
    listen_host: String,
    listen_port: u16,
    max_workers: u32,
    pool: Arc<PoolClient>,
    strategy: Box<dyn WorkerStrategy>,

    clients: Mutex<HashMap<SocketAddr, Arc<RpcConnection>>>,
    registered_tails: Mutex<HashSet<String>>,
    recent_shares: Mutex<RecentShares>,
    pool_was_ready: AtomicBool,

    stopping: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl WorkerServer {
    pub fn new(
        proxy_name: &str,
        listen_host: String,
        listen_port: u16,
        max_workers: u32,
        pool: Arc<PoolClient>,
        strategy: Box<dyn WorkerStrategy>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            log_prefix: format!("W:{proxy_name}:"),
            listen_host,
            listen_port,
            max_workers,
            pool,
            strategy,
            clients: Mutex::new(HashMap::new()),
            registered_tails: Mutex::new(HashSet::new()),
            recent_shares: Mutex::new(RecentShares::with_capacity(RECENT_SHARES_CAPACITY)),
            pool_was_ready: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            stop_tx,
            stop_rx,
            bound_addr: Mutex::new(None),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// The address actually bound by `start_listening`, useful when the
    /// configured port is `0` (OS-assigned) such as in tests.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().await
    }

    /// Bind the listener and spawn the accept loop and pool watchdog.
    /// Address-in-use surfaces as `ServerAddressInUse` for the caller to
    /// report as a fatal startup error for this proxy.
    pub async fn start_listening(self: &Arc<Self>) -> Result<(), StratumError> {
        let addr = format!("{}:{}", self.listen_host, self.listen_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            StratumError::ServerAddressInUse(format!("{addr}: {e}"))
        })?;
        let local_addr = listener.local_addr().ok();
        *self.bound_addr.lock().await = local_addr;
        log::info!(target: "stratum-proxy", "{} listening on {addr}", self.log_prefix);

        let accept_server = self.clone();
        let mut accept_stop = self.stop_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => accept_server.spawn_connection(stream, peer_addr),
                            Err(e) => log::warn!(target: "stratum-proxy", "{} accept error: {e}", accept_server.log_prefix),
                        }
                    }
                    _ = accept_stop.changed() => {
                        if *accept_stop.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        let watchdog_server = self.clone();
        tokio::spawn(async move { watchdog_server.run_watchdog().await });

        Ok(())
    }

    /// Once per second, reconnect to the pool if at least one worker is
    /// connected and the pool isn't. Clears `recent_shares` on every
    /// not-ready -> ready transition.
    async fn run_watchdog(self: Arc<Self>) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let ready = self.pool.is_ready();
            if ready && !self.pool_was_ready.swap(true, Ordering::SeqCst) {
                self.recent_shares.lock().await.clear();
            }
            if !ready {
                self.pool_was_ready.store(false, Ordering::SeqCst);
            }

            if self.client_count().await > 0 && !self.pool.is_connected() {
                match self.pool.connect().await {
                    Ok(()) => {
                        if let Err(e) = self.pool.initialize().await {
                            log::warn!(target: "stratum-proxy", "{} pool initialize failed: {e}", self.log_prefix);
                            self.pool.use_next_pool_config().await;
                        }
                    }
                    Err(e) => {
                        log::warn!(target: "stratum-proxy", "{} pool connect failed: {e}", self.log_prefix);
                        self.pool.use_next_pool_config().await;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(WATCHDOG_INTERVAL_SECS)) => {}
                _ = self.wait_for_stop() => return,
            }
        }
    }

    async fn wait_for_stop(&self) {
        let mut rx = self.stop_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_connection(stream, peer_addr).await {
                log::debug!(target: "stratum-proxy", "{} connection {peer_addr} ended: {e}", server.log_prefix);
            }
        });
    }

    /// Registers the accepted connection in `clients` immediately, mirroring
    /// the source's `self.clients` (tracked by the underlying connection
    /// library at accept time, independent of subscribe/ready) — this is
    /// what lets the watchdog see "a worker is connected" and dial the pool
    /// *while* that same worker is still blocked waiting for readiness.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), StratumError> {
        let conn = Arc::new(RpcConnection::from_stream(stream, Some(peer_addr))?);
        self.clients.lock().await.insert(peer_addr, conn.clone());

        let result = self.drive_connection(conn).await;
        self.clients.lock().await.remove(&peer_addr);

        result
    }

    async fn drive_connection(self: &Arc<Self>, conn: Arc<RpcConnection>) -> Result<(), StratumError> {
        // Clear stale duplicate-share history and wait for a usable pool
        // session before admitting the worker into the dispatch loop.
        if !self.pool.is_ready() {
            self.recent_shares.lock().await.clear();
            self.pool.wait_until_ready().await;
        }

        let tail = match self.allocate_nonce_tail().await {
            Ok(tail) => tail,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e);
            }
        };

        {
            let mut extra = conn.extra.lock().await;
            extra.insert("extra_nonce1_tail".to_string(), Value::String(tail.clone()));
            extra.insert("extranonce_subscribed".to_string(), Value::Bool(false));
        }

        let handlers = self.handler_table();
        let result = conn.run(&handlers).await;

        self.release_nonce_tail(&tail).await;
        result
    }

    async fn allocate_nonce_tail(&self) -> Result<String, StratumError> {
        let width = tail_width_bytes(self.max_workers);
        let mut tails = self.registered_tails.lock().await;
        match allocate_tail(width, &tails) {
            Some(tail) => {
                tails.insert(tail.clone());
                Ok(tail)
            }
            None => Err(StratumError::MaxClientsConnected),
        }
    }

    async fn release_nonce_tail(&self, tail: &str) {
        if tail.is_empty() {
            return;
        }
        self.registered_tails.lock().await.remove(tail);
    }

    /// Fan out a pool-originated method to every connected worker.
    /// `is_notification` controls whether it's sent with `id: null` (a
    /// true notification) or as a request (used for `client.show_message`,
    /// matching the source implementation).
    pub async fn broadcast(&self, method: &str, params: Value, is_notification: bool) {
        let clients: Vec<Arc<RpcConnection>> = self.clients.lock().await.values().cloned().collect();
        for conn in clients {
            let result = if is_notification {
                conn.notify(method, params.clone()).await
            } else {
                conn.rpc(method, params.clone(), Some(5)).await.map(|_| ())
            };
            if let Err(e) = result {
                log::debug!(target: "stratum-proxy", "{} broadcast {method} to {:?} failed: {e}", self.log_prefix, conn.peer_addr);
            }
        }
    }

    /// `mining.set_extranonce` fan-out: workers that opted into
    /// extranonce updates get `[new_nonce1 + tail, adjusted_size]`;
    /// everyone else is disconnected to force a clean resubscribe.
    pub async fn handle_set_extranonce(&self, new_nonce1: String, new_size: Option<usize>) {
        let clients: Vec<Arc<RpcConnection>> = self.clients.lock().await.values().cloned().collect();
        for conn in clients {
            let extra = conn.extra.lock().await;
            let subscribed = extra
                .get("extranonce_subscribed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let tail = extra
                .get("extra_nonce1_tail")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            drop(extra);

            if !subscribed {
                let _ = conn.close().await;
                continue;
            }

            let combined = format!("{new_nonce1}{tail}");
            let mut params = vec![Value::String(combined)];
            if let Some(size) = new_size {
                let adjusted = size.saturating_sub(tail.len() / 2);
                params.push(json!(adjusted));
            }
            if let Err(e) = conn.notify("mining.set_extranonce", Value::Array(params)).await {
                log::debug!(target: "stratum-proxy", "{} failed to push set_extranonce: {e}", self.log_prefix);
            }
        }
    }

    /// Close every connected worker, used when the pool drops so workers
    /// reconnect and resubscribe cleanly.
    pub async fn close_all_connections(&self) {
        let clients: Vec<Arc<RpcConnection>> = self.clients.lock().await.values().cloned().collect();
        for conn in clients {
            let _ = conn.close().await;
        }
    }

    pub async fn close(&self) -> Result<(), StratumError> {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        self.close_all_connections().await;
        Ok(())
    }

    fn handler_table(self: &Arc<Self>) -> HandlerTable {
        let mut table = HandlerTable::new();

        let server = self.clone();
        table.register(MINING_SUBSCRIBE, move |conn, params| {
            let server = server.clone();
            async move { server.handle_mining_subscribe(conn, params).await }
        });

        let server = self.clone();
        table.register(MINING_AUTHORIZE, move |_conn, params| {
            let server = server.clone();
            async move { server.handle_mining_authorize(params).await }
        });

        let server = self.clone();
        table.register(MINING_SUBMIT, move |conn, params| {
            let server = server.clone();
            async move { server.handle_mining_submit(conn, params).await }
        });

        table
    }

    async fn connection_tail(&self, conn: &Arc<RpcConnection>) -> String {
        conn.extra
            .lock()
            .await
            .get("extra_nonce1_tail")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    async fn handle_mining_subscribe(
        &self,
        conn: Arc<RpcConnection>,
        _params: Value,
    ) -> Result<Value, JsonRpcError> {
        let tail = self.connection_tail(&conn).await;

        // Scheduled concurrently with the reply so a fast pool broadcast
        // can never race ahead of the subscribe ack being queued.
        let push_conn = conn.clone();
        let target = self.pool.target_difficulty().await;
        let job = self.pool.current_job().await;
        let strategy_push = self.strategy.post_subscribe(&push_conn, target, job);
        tokio::spawn(async move {
            if let Err(e) = strategy_push.await {
                log::debug!(target: "stratum-proxy", "post_subscribe push failed: {e}");
            }
        });

        let extra_nonce1 = self.pool.extra_nonce1().await.unwrap_or_default();
        let mut result = vec![Value::Null, Value::String(format!("{extra_nonce1}{tail}"))];
        if let Some(size) = self.pool.extra_nonce2_size().await {
            let adjusted = size.saturating_sub(tail.len() / 2);
            result.push(json!(adjusted));
        }

        Ok(Value::Array(result))
    }

    async fn handle_mining_authorize(&self, params: Value) -> Result<Value, JsonRpcError> {
        let arr = params
            .as_array()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.authorize must be an array"))?;
        let name = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing worker name"))?;
        let password = arr.get(1).and_then(Value::as_str).unwrap_or("");

        let authorized = self
            .pool
            .authorize(name, password)
            .await
            .map_err(|e| e.as_wire_error())?;
        Ok(Value::Bool(authorized))
    }

    async fn handle_mining_submit(
        &self,
        conn: Arc<RpcConnection>,
        params: Value,
    ) -> Result<Value, JsonRpcError> {
        let tail = self.connection_tail(&conn).await;
        let jobs = self.pool.jobs_snapshot().await;
        let mut recent_shares = self.recent_shares.lock().await;
        let rewritten = self
            .strategy
            .validate_share_params(&tail, params, &jobs, &mut recent_shares)?;
        drop(recent_shares);

        let accepted = self.pool.submit(rewritten).await.map_err(|e| e.as_wire_error())?;
        Ok(Value::Bool(accepted))
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_width_matches_max_workers_tiers() {
        assert_eq!(tail_width_bytes(1), 0);
        assert_eq!(tail_width_bytes(256), 1);
        assert_eq!(tail_width_bytes(65536), 2);
    }

    #[test]
    fn allocate_tail_returns_empty_string_for_single_worker() {
        let in_use = HashSet::new();
        assert_eq!(allocate_tail(0, &in_use), Some(String::new()));
    }

    #[test]
    fn allocate_tail_finds_lowest_free_value() {
        let mut in_use = HashSet::new();
        in_use.insert("00".to_string());
        assert_eq!(allocate_tail(1, &in_use), Some("01".to_string()));
    }

    #[test]
    fn allocate_tail_exhausted_returns_none() {
        let width = 1;
        let mut in_use = HashSet::new();
        for i in 0u32..256 {
            in_use.insert(hex::encode((i as u8).to_be_bytes()));
        }
        assert_eq!(allocate_tail(width, &in_use), None);
    }

    #[test]
    fn allocate_tail_two_byte_width_is_big_endian() {
        let in_use = HashSet::new();
        assert_eq!(allocate_tail(2, &in_use), Some("0000".to_string()));
    }
}

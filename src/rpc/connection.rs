use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::error::{JsonRpcError, StratumError};
use crate::rpc::dispatch::HandlerTable;
use crate::rpc::message::{RpcOutcome, RpcRequest, DEFAULT_TIMEOUT_SECS};

/// What an incoming line turned out to be once parsed.
enum Incoming {
    /// A request (`id` present) or notification (`id` null) sent *to* us.
    Call {
        id: Option<u64>,
        method: String,
        params: Value,
    },
    /// A response to one of our own outstanding requests.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
}

fn parse_incoming(line: &str) -> Result<Incoming, StratumError> {
    let v: Value = serde_json::from_str(line)?;

    if let Some(method) = v.get("method").and_then(Value::as_str) {
        let id = match v.get("id") {
            Some(Value::Null) | None => None,
            Some(other) => other.as_u64(),
        };
        let params = v.get("params").cloned().unwrap_or(Value::Array(vec![]));
        return Ok(Incoming::Call {
            id,
            method: method.to_string(),
            params,
        });
    }

    let id = v
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| StratumError::Protocol("response missing numeric id".into()))?;

    let result = v.get("result").cloned().filter(|r| !r.is_null());
    let error = v
        .get("error")
        .cloned()
        .filter(|e| !e.is_null())
        .map(|e| match (e.get("code").and_then(Value::as_i64), e.get("message")) {
            (Some(code), Some(message)) => JsonRpcError::new(
                code as i32,
                message.as_str().unwrap_or("").to_string(),
            ),
            _ => JsonRpcError::other_unknown(e.to_string()),
        });

    Ok(Incoming::Response { id, result, error })
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<RpcOutcome, JsonRpcError>>>>;

/// Per-connection bag of loosely-typed extras, the Rust analogue of the
/// original implementation's `connection.extra` dict (nonce tail,
/// per-worker subscription flags).
pub type ConnectionExtra = Mutex<HashMap<String, Value>>;

/// Drives one line-delimited JSON-RPC 2.0 connection, acting as both a
/// client (outbound `rpc()` calls awaiting a correlated response) and a
/// server (dispatching inbound requests/notifications to a `HandlerTable`)
/// simultaneously, since both pool and worker connections need both roles.
pub struct RpcConnection {
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    id_counter: AtomicU64,
    pending: Pending,
    pub peer_addr: Option<SocketAddr>,
    pub extra: ConnectionExtra,
}

impl RpcConnection {
    pub fn from_stream(stream: TcpStream, peer_addr: Option<SocketAddr>) -> Result<Self, StratumError> {
        stream
            .set_nodelay(true)
            .map_err(|e| StratumError::Connection(format!("failed to set nodelay - {e}")))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            writer: Mutex::new(write_half),
            reader: Mutex::new(BufReader::new(read_half)),
            id_counter: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            peer_addr,
            extra: Mutex::new(HashMap::new()),
        })
    }

    pub async fn connect(host: &str, port: u16) -> Result<Self, StratumError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| StratumError::Connection(format!("failed to connect to {addr} - {e}")))?;
        Self::from_stream(stream, None)
    }

    async fn write_line(&self, line: String) -> Result<(), StratumError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| StratumError::Protocol(format!("write error: {e}")))
    }

    /// Send a notification: no id, no correlated response expected.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), StratumError> {
        let req = RpcRequest::notification(method, params);
        let line = serde_json::to_string(&req)?;
        self.write_line(line).await
    }

    /// Send a request and await its correlated response, with an optional
    /// per-call timeout overriding `DEFAULT_TIMEOUT_SECS`.
    pub async fn rpc(
        &self,
        method: &str,
        params: Value,
        timeout_secs: Option<u64>,
    ) -> Result<RpcOutcome, StratumError> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = RpcRequest::request(id, method, params);
        let line = match serde_json::to_string(&req) {
            Ok(l) => l,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        };

        if let Err(e) = self.write_line(line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let wait = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        match timeout(wait, rx).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(rpc_err))) => Err(StratumError::Rpc(rpc_err)),
            Ok(Err(_canceled)) => Err(StratumError::Protocol(
                "connection closed while awaiting response".into(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(StratumError::Timeout(wait.as_secs()))
            }
        }
    }

    /// Reply to an inbound request we just dispatched.
    async fn reply(&self, id: u64, result: Result<Value, JsonRpcError>) -> Result<(), StratumError> {
        let line = match result {
            Ok(value) => serde_json::to_string(&serde_json::json!({
                "id": id,
                "result": value,
                "error": Value::Null,
            }))?,
            Err(err) => serde_json::to_string(&serde_json::json!({
                "id": id,
                "result": Value::Null,
                "error": { "code": err.code, "message": err.message },
            }))?,
        };
        self.write_line(line).await
    }

    /// Read and dispatch one incoming line. Returns `Ok(false)` on clean
    /// EOF (peer closed the connection).
    async fn process_one(self: &Arc<Self>, handlers: &HandlerTable) -> Result<bool, StratumError> {
        let mut line = String::new();
        let n = {
            let mut reader = self.reader.lock().await;
            reader.read_line(&mut line).await.map_err(|e| {
                StratumError::Protocol(format!("read error: {e}"))
            })?
        };

        if n == 0 {
            return Ok(false);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(true);
        }

        match parse_incoming(trimmed) {
            Ok(Incoming::Response { id, result, error }) => {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let outcome = match error {
                        Some(e) => Err(e),
                        None => Ok(RpcOutcome::ok(result.unwrap_or(Value::Null))),
                    };
                    let _ = tx.send(outcome);
                }
            }
            Ok(Incoming::Call { id, method, params }) => {
                let result = handlers.dispatch(self.clone(), &method, params).await;
                if let Some(id) = id {
                    self.reply(id, result).await?;
                }
            }
            Err(e) => {
                log::warn!(target: "stratum-proxy", "discarding unparseable line: {e}");
            }
        }

        Ok(true)
    }

    /// Drive the read side until the connection closes or an I/O error
    /// occurs. Each inbound line is either routed to a pending request's
    /// waiter or dispatched through `handlers`.
    pub async fn run(self: &Arc<Self>, handlers: &HandlerTable) -> Result<(), StratumError> {
        loop {
            if !self.process_one(handlers).await? {
                return Ok(());
            }
        }
    }

    pub async fn close(&self) -> Result<(), StratumError> {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (Arc<RpcConnection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client_stream, accepted) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_stream, _) = accepted.unwrap();
        (
            Arc::new(RpcConnection::from_stream(server_stream, None).unwrap()),
            client_stream.unwrap(),
        )
    }

    #[tokio::test]
    async fn rpc_resolves_on_matching_response() {
        let (conn, mut peer) = pair().await;

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = peer.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]);
            assert!(sent.contains("mining.subscribe"));
            peer.write_all(b"{\"id\":1,\"result\":true,\"error\":null}\n")
                .await
                .unwrap();
            peer
        });

        let outcome = conn.rpc("mining.subscribe", json!([]), Some(2)).await.unwrap();
        assert!(outcome.as_bool());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_times_out_without_response() {
        let (conn, _peer) = pair().await;
        let result = conn.rpc("mining.subscribe", json!([]), Some(1)).await;
        assert!(matches!(result, Err(StratumError::Timeout(_))));
    }

    #[tokio::test]
    async fn notify_does_not_await_reply() {
        let (conn, mut peer) = pair().await;
        conn.notify("mining.notify", json!([])).await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = peer.read(&mut buf).await.unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.contains("\"id\":null"));
    }
}

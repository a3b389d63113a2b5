use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::JsonRpcError;
use crate::rpc::connection::RpcConnection;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, JsonRpcError>> + Send>>;

/// A handler bound to a method name, the Rust analogue of the source's
/// `handle_<method_with_dots_to_underscores>` convention: instead of
/// reflecting over method names, handlers are registered directly against
/// the literal Stratum method string.
pub type Handler = Arc<dyn Fn(Arc<RpcConnection>, Value) -> HandlerFuture + Send + Sync>;

/// Registry of inbound method handlers consulted by `RpcConnection::run`.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(Arc<RpcConnection>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        self.handlers.insert(
            method.to_string(),
            Arc::new(move |conn, params| Box::pin(handler(conn, params)) as HandlerFuture),
        );
    }

    pub async fn dispatch(
        &self,
        conn: Arc<RpcConnection>,
        method: &str,
        params: Value,
    ) -> Result<Value, JsonRpcError> {
        match self.handlers.get(method) {
            Some(handler) => handler(conn, params).await,
            None => {
                log::debug!(target: "stratum-proxy", "no handler registered for {method}, ignoring");
                Err(JsonRpcError::method_not_found(method))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_METHOD_NOT_FOUND;
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};

    async fn dummy_connection() -> Arc<RpcConnection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_stream, _) = accepted.unwrap();
        drop(stream.unwrap());
        Arc::new(RpcConnection::from_stream(server_stream, None).unwrap())
    }

    #[tokio::test]
    async fn unregistered_method_yields_method_not_found() {
        let table = HandlerTable::new();
        let conn = dummy_connection().await;
        let result = table.dispatch(conn, "mining.subscribe", json!([])).await;
        assert_eq!(result.unwrap_err().code, CODE_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn registered_method_is_invoked() {
        let mut table = HandlerTable::new();
        table.register("mining.subscribe", |_conn, _params| async move {
            Ok(json!("ok"))
        });
        let conn = dummy_connection().await;
        let result = table.dispatch(conn, "mining.subscribe", json!([])).await;
        assert_eq!(result.unwrap(), json!("ok"));
    }
}

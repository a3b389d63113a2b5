use serde::Serialize;
use serde_json::Value;

/// Default timeout (seconds) for a request that doesn't specify one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const MINING_SUBSCRIBE: &str = "mining.subscribe";
pub const MINING_AUTHORIZE: &str = "mining.authorize";
pub const MINING_NOTIFY: &str = "mining.notify";
pub const MINING_SUBMIT: &str = "mining.submit";
pub const MINING_SET_TARGET: &str = "mining.set_target";
pub const MINING_SET_DIFFICULTY: &str = "mining.set_difficulty";
pub const MINING_SET_EXTRANONCE: &str = "mining.set_extranonce";
pub const MINING_EXTRANONCE_SUBSCRIBE: &str = "mining.extranonce.subscribe";
pub const CLIENT_SHOW_MESSAGE: &str = "client.show_message";
pub const CLIENT_GET_VERSION: &str = "client.get_version";

/// Wire shape of an outbound JSON-RPC request or notification. Requests
/// carry `id: Some(_)`; notifications carry `id: None`, which serializes
/// to `"id": null` matching the line-delimited dialect both sides speak.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// The outcome of an outbound `rpc()` call: a `JsonRpcResponse`-style
/// wrapper with an explicit `success`/`data` split so callers can check
/// the pool's boolean result without re-parsing raw JSON.
#[derive(Debug, Clone)]
pub struct RpcOutcome {
    pub success: bool,
    pub data: Value,
}

impl RpcOutcome {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data }
    }

    pub fn err(data: Value) -> Self {
        Self { success: false, data }
    }

    pub fn as_bool(&self) -> bool {
        self.success && self.data.as_bool().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_serializes_null_id() {
        let req = RpcRequest::notification(MINING_NOTIFY, json!([]));
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"id\":null"));
    }

    #[test]
    fn request_serializes_numeric_id() {
        let req = RpcRequest::request(7, MINING_SUBSCRIBE, json!([]));
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"id\":7"));
    }

    #[test]
    fn outcome_as_bool_requires_success() {
        assert!(RpcOutcome::ok(json!(true)).as_bool());
        assert!(!RpcOutcome::ok(json!(false)).as_bool());
        assert!(!RpcOutcome::err(json!(true)).as_bool());
    }
}

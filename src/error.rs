use thiserror::Error;

/// Stratum wire error codes reported back to workers.
pub const CODE_OTHER_UNKNOWN: i32 = 20;
pub const CODE_JOB_NOT_FOUND: i32 = 21;
pub const CODE_DUPLICATE_SHARE: i32 = 22;
pub const CODE_LOW_DIFFICULTY_SHARE: i32 = 23;
pub const CODE_UNAUTHORIZED_WORKER: i32 = 24;
pub const CODE_NOT_SUBSCRIBED: i32 = 25;

/// Standard JSON-RPC 2.0 error codes used for malformed requests.
pub const CODE_INVALID_PARAMS: i32 = -32602;
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;

/// A JSON-RPC error object, `{code, message}`, carried on the wire.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn other_unknown(msg: impl Into<String>) -> Self {
        Self::new(CODE_OTHER_UNKNOWN, msg)
    }

    pub fn job_not_found() -> Self {
        Self::new(CODE_JOB_NOT_FOUND, "Job not found (=stale)")
    }

    pub fn duplicate_share() -> Self {
        Self::new(CODE_DUPLICATE_SHARE, "Duplicate share")
    }

    pub fn unauthorized_worker() -> Self {
        Self::new(CODE_UNAUTHORIZED_WORKER, "Unauthorized worker")
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(CODE_METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

#[derive(Error, Debug, Clone)]
pub enum StratumError {
    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Hex decode error: {0}")]
    HexDecode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Invalid job received: {0}")]
    InvalidJob(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Rpc(#[from] JsonRpcError),

    /// Raised when a worker's nonce tail cannot be allocated because
    /// `max_workers` distinct tails are already in use.
    #[error("maximum number of workers reached")]
    MaxClientsConnected,

    /// Fatal at startup: unknown `worker_class`/`pool_class`, malformed
    /// config file, or a duplicate proxy name.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Transport-level failure not tied to a single request/response.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Raised when a proxy's listen address is already bound.
    #[error("address already in use: {0}")]
    ServerAddressInUse(String),
}

impl StratumError {
    /// Translate a wire-facing error into the `JsonRpcError` to send back
    /// to a worker, when applicable.
    pub fn as_wire_error(&self) -> JsonRpcError {
        match self {
            StratumError::Rpc(e) => e.clone(),
            StratumError::MaxClientsConnected => {
                JsonRpcError::other_unknown("maximum number of workers reached")
            }
            other => JsonRpcError::other_unknown(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StratumError {
    fn from(err: std::io::Error) -> Self {
        StratumError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::Json(err.to_string())
    }
}

impl From<hex::FromHexError> for StratumError {
    fn from(err: hex::FromHexError) -> Self {
        StratumError::HexDecode(err.to_string())
    }
}

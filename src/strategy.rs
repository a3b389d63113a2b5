//! Per-coin strategy hooks. The source implementation overrides Python
//! methods per coin family; Rust has no open method dispatch, so each
//! side gets a trait with default-method bodies matching the Python base
//! classes, and `Equihash` supplies the concrete overrides from
//! `protocols/equihash.py`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::collections::{JobMap, RecentShares};
use crate::error::{JsonRpcError, StratumError};
use crate::rpc::connection::RpcConnection;
use crate::rpc::message::{MINING_NOTIFY, MINING_SET_TARGET};

/// Coin-specific behavior on the pool-client side: how to ask the pool to
/// subscribe, and how to parse its `mining.notify` job shape.
pub trait PoolStrategy: Send + Sync {
    /// Params for the initial `mining.subscribe` call. The base strategy
    /// sends none; Equihash sends `[app_version, notify_subscription_id,
    /// host, port]`.
    fn subscription_request_params(
        &self,
        notify_subscription_id: Option<&Value>,
        host: &str,
        port: u16,
    ) -> Value {
        let _ = (notify_subscription_id, host, port);
        Value::Array(vec![])
    }

    /// Parse a `mining.notify` params array into `(job_id, clean_jobs)`.
    /// The default assumes job id first, clean_jobs last — true of most
    /// Stratum-derived dialects.
    fn validate_job_params(&self, params: &Value) -> Result<(String, bool), JsonRpcError> {
        let arr = params
            .as_array()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.notify params must be an array"))?;
        let job_id = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing job_id"))?
            .to_string();
        let clean_jobs = arr.last().and_then(Value::as_bool).unwrap_or(false);
        Ok((job_id, clean_jobs))
    }
}

/// Coin-specific behavior on the worker-server side: what to push right
/// after a worker subscribes, and how to validate/rewrite a submitted
/// share's params before forwarding to the pool.
#[async_trait]
pub trait WorkerStrategy: Send + Sync {
    /// Push any already-known target/job to a freshly subscribed worker,
    /// scheduled to run concurrently with the subscribe reply so it can
    /// never be sent ahead of that reply. The base implementation does
    /// nothing — most
    /// Stratum-derived coins need an override here.
    async fn post_subscribe(
        &self,
        conn: &Arc<RpcConnection>,
        target_difficulty: Option<Value>,
        current_job: Option<Value>,
    ) -> Result<(), StratumError> {
        let _ = (conn, target_difficulty, current_job);
        log::warn!(target: "stratum-proxy", "post_subscribe not implemented for this coin strategy");
        Ok(())
    }

    /// Validate and rewrite a `mining.submit` params array from a worker
    /// before it's forwarded to the pool. The base implementation passes
    /// params through unchanged (no stale/duplicate protection) since
    /// share shape differs too much between coins to default safely.
    fn validate_share_params(
        &self,
        tail: &str,
        params: Value,
        jobs: &JobMap,
        recent_shares: &mut RecentShares,
    ) -> Result<Value, JsonRpcError> {
        let _ = (tail, jobs, recent_shares);
        log::warn!(target: "stratum-proxy", "validate_share_params not implemented for this coin strategy");
        Ok(params)
    }
}

/// The Equihash family's Stratum dialect (Zcash, Bitcoin Gold, Zencash):
/// uses `mining.set_target` rather than `mining.set_difficulty`, and omits
/// `extra_nonce2_size` from the subscription response.
#[derive(Debug, Default, Clone, Copy)]
pub struct Equihash;

impl PoolStrategy for Equihash {
    fn subscription_request_params(
        &self,
        notify_subscription_id: Option<&Value>,
        host: &str,
        port: u16,
    ) -> Value {
        Value::Array(vec![
            Value::String(crate::APP_VERSION.to_string()),
            notify_subscription_id.cloned().unwrap_or(Value::Null),
            Value::String(host.to_string()),
            Value::Number(port.into()),
        ])
    }

    fn validate_job_params(&self, params: &Value) -> Result<(String, bool), JsonRpcError> {
        let arr = params
            .as_array()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.notify params must be an array"))?;

        if arr.len() != 8 && arr.len() != 9 {
            return Err(JsonRpcError::invalid_params(
                "mining.notify expects 8 or 9 params",
            ));
        }

        let job_id = arr[0]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("missing job_id"))?
            .to_string();
        let version = arr[1]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("missing version"))?;

        // 04000000: zcash and other equihash derivatives.
        // 00000020: bitcoin gold, zencash.
        if version != "04000000" && version != "00000020" {
            return Err(JsonRpcError::invalid_params(format!(
                "unsupported block version {version}"
            )));
        }

        let clean_jobs = arr[7].as_bool().unwrap_or(false);
        Ok((job_id, clean_jobs))
    }
}

#[async_trait]
impl WorkerStrategy for Equihash {
    async fn post_subscribe(
        &self,
        conn: &Arc<RpcConnection>,
        target_difficulty: Option<Value>,
        current_job: Option<Value>,
    ) -> Result<(), StratumError> {
        // Guarded on `Some` so the first worker to connect (before the
        // pool has sent anything) doesn't get sent sentinel/null values.
        if let Some(target) = target_difficulty {
            conn.notify(MINING_SET_TARGET, Value::Array(vec![target])).await?;
        }
        if let Some(job) = current_job {
            conn.notify(MINING_NOTIFY, job).await?;
        }
        Ok(())
    }

    fn validate_share_params(
        &self,
        tail: &str,
        params: Value,
        jobs: &JobMap,
        recent_shares: &mut RecentShares,
    ) -> Result<Value, JsonRpcError> {
        let mut arr = params
            .as_array()
            .cloned()
            .ok_or_else(|| JsonRpcError::invalid_params("mining.submit params must be an array"))?;

        // account_name, job_id, time, nonce2, equihash_solution
        if arr.len() != 5 {
            return Err(JsonRpcError::invalid_params(
                "equihash mining.submit expects 5 params",
            ));
        }

        let job_id = arr[1]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("missing job_id"))?
            .to_string();

        let nonce2_in = arr[3]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("missing nonce2"))?;
        let nonce2 = format!("{tail}{nonce2_in}");
        arr[3] = Value::String(nonce2.clone());

        if !jobs.contains(&job_id) {
            return Err(JsonRpcError::job_not_found());
        }

        if recent_shares.contains(&job_id, &nonce2) {
            return Err(JsonRpcError::duplicate_share());
        }

        recent_shares.push(job_id, nonce2);

        Ok(Value::Array(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job(clean_jobs: bool) -> Value {
        json!([
            "job1", "04000000", "prevhash", "merkleroot", "reserved", "time", "bits", clean_jobs
        ])
    }

    #[test]
    fn equihash_validate_job_params_accepts_zcash_version() {
        let strat = Equihash;
        let (job_id, clean) = strat.validate_job_params(&sample_job(true)).unwrap();
        assert_eq!(job_id, "job1");
        assert!(clean);
    }

    #[test]
    fn equihash_validate_job_params_rejects_unknown_version() {
        let strat = Equihash;
        let mut bad = sample_job(false);
        bad[1] = json!("deadbeef");
        assert!(strat.validate_job_params(&bad).is_err());
    }

    #[test]
    fn equihash_validate_share_params_rewrites_nonce2_and_detects_duplicates() {
        let strat = Equihash;
        let mut jobs = JobMap::with_capacity(3);
        jobs.insert("JOB_A".into(), sample_job(false));
        let mut shares = RecentShares::with_capacity(500);

        let params = json!(["acct.w1", "JOB_A", "t", "0011", "sol"]);
        let rewritten = strat
            .validate_share_params("ab", params.clone(), &jobs, &mut shares)
            .unwrap();
        assert_eq!(rewritten[3], json!("ab0011"));

        let err = strat
            .validate_share_params("ab", params, &jobs, &mut shares)
            .unwrap_err();
        assert_eq!(err.code, crate::error::CODE_DUPLICATE_SHARE);
    }

    #[test]
    fn equihash_validate_share_params_rejects_unknown_job() {
        let strat = Equihash;
        let jobs = JobMap::with_capacity(3);
        let mut shares = RecentShares::with_capacity(500);
        let params = json!(["acct.w1", "JOB_Z", "t", "0011", "sol"]);
        let err = strat
            .validate_share_params("ab", params, &jobs, &mut shares)
            .unwrap_err();
        assert_eq!(err.code, crate::error::CODE_JOB_NOT_FOUND);
    }
}

//! A Stratum mining proxy: multiplexes many worker (miner) connections
//! onto a small number of pool connections, sharing one pool
//! authentication across workers while giving each a distinct nonce
//! subspace.

pub mod app;
pub mod collections;
pub mod config;
pub mod error;
pub mod pool;
pub mod proxy;
pub mod ready;
pub mod registry;
pub mod rpc;
pub mod strategy;
pub mod worker;

/// Sent upstream during `mining.subscribe` and returned for
/// `client.get_version`.
pub const APP_VERSION: &str = concat!("stratum-proxy/", env!("CARGO_PKG_VERSION"));

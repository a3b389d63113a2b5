//! Redesign of the source's dynamic `worker_class`/`pool_class` import: a
//! registry mapping a config string to a constructor closure, populated
//! at startup for the coin strategies actually compiled in.

use std::collections::HashMap;

use crate::error::StratumError;
use crate::strategy::{Equihash, PoolStrategy, WorkerStrategy};

/// Pass-through strategy using only the trait's default methods; the
/// `"base"` entry in both registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseStrategy;

impl PoolStrategy for BaseStrategy {}
impl WorkerStrategy for BaseStrategy {}

type PoolCtor = fn() -> Box<dyn PoolStrategy>;
type WorkerCtor = fn() -> Box<dyn WorkerStrategy>;

/// Holds the known `pool_class`/`worker_class` constructors. Unknown
/// names resolve to `ConfigurationError`, which is fatal at startup.
pub struct StrategyRegistry {
    pool_ctors: HashMap<&'static str, PoolCtor>,
    worker_ctors: HashMap<&'static str, WorkerCtor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut pool_ctors: HashMap<&'static str, PoolCtor> = HashMap::new();
        pool_ctors.insert("equihash", || Box::new(Equihash));
        pool_ctors.insert("base", || Box::new(BaseStrategy));

        let mut worker_ctors: HashMap<&'static str, WorkerCtor> = HashMap::new();
        worker_ctors.insert("equihash", || Box::new(Equihash));
        worker_ctors.insert("base", || Box::new(BaseStrategy));

        Self {
            pool_ctors,
            worker_ctors,
        }
    }

    pub fn pool_strategy(&self, class_name: &str) -> Result<Box<dyn PoolStrategy>, StratumError> {
        self.pool_ctors
            .get(class_name)
            .map(|ctor| ctor())
            .ok_or_else(|| StratumError::ConfigurationError(format!("unknown pool_class: {class_name}")))
    }

    pub fn worker_strategy(&self, class_name: &str) -> Result<Box<dyn WorkerStrategy>, StratumError> {
        self.worker_ctors
            .get(class_name)
            .map(|ctor| ctor())
            .ok_or_else(|| StratumError::ConfigurationError(format!("unknown worker_class: {class_name}")))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

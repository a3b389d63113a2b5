use std::collections::VecDeque;

/// One pool endpoint: host/port plus the account credentials this proxy
/// authenticates with. `pool_configs` is an ordered rotating list of
/// these; the head is always the active configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_password: String,
}

/// Rotating list of pool configurations with the failover behavior from
/// `BasePoolProtocol.use_next_pool_config`: pop the head on disconnect;
/// if another config remains, the disconnected one goes to the tail and
/// the next becomes active; if none remains, the caller is told to retry
/// the same (only) config after a backoff.
#[derive(Debug, Clone)]
pub struct PoolConfigList {
    configs: VecDeque<PoolConfig>,
}

impl PoolConfigList {
    pub fn new(configs: Vec<PoolConfig>) -> Self {
        Self {
            configs: configs.into(),
        }
    }

    pub fn active(&self) -> Option<&PoolConfig> {
        self.configs.front()
    }

    /// Rotate past the current (disconnected) head. Returns `true` if a
    /// different config is now active, `false` if the list only ever had
    /// one entry and the caller should back off and retry it.
    pub fn rotate(&mut self) -> bool {
        match self.configs.pop_front() {
            Some(disconnected) => {
                if self.configs.is_empty() {
                    self.configs.push_back(disconnected);
                    false
                } else {
                    self.configs.push_back(disconnected);
                    true
                }
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

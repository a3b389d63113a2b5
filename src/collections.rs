//! Bounded, insertion-ordered collections used by the pool/worker state
//! machines: an O(1)-eviction job map capped at 3 entries, and a
//! 500-deep duplicate-share ring buffer with O(1) membership checks.

use std::collections::{HashMap, HashSet, VecDeque};
use serde_json::Value;

/// Insertion-ordered `job_id -> params` map, bounded to `capacity` entries.
/// Inserting past capacity evicts the oldest entry first (FIFO), matching
/// the source's `OrderedDict`-based `jobs` field.
#[derive(Debug, Clone)]
pub struct JobMap {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Value>,
}

impl JobMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Insert or replace `job_id`'s params, evicting the oldest job(s) if
    /// this insertion pushes the map past capacity.
    pub fn insert(&mut self, job_id: String, params: Value) {
        if !self.entries.contains_key(&job_id) {
            self.order.push_back(job_id.clone());
        }
        self.entries.insert(job_id, params);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&Value> {
        self.entries.get(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Keys in pool-arrival (oldest-first) order, for invariant checks.
    pub fn ordered_keys(&self) -> Vec<&String> {
        self.order.iter().collect()
    }
}

/// Bounded FIFO of `(job_id, nonce2)` pairs for duplicate-share detection,
/// backed by a ring buffer plus a companion set for O(1) membership.
#[derive(Debug, Clone)]
pub struct RecentShares {
    capacity: usize,
    order: VecDeque<(String, String)>,
    seen: HashSet<(String, String)>,
}

impl RecentShares {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, job_id: &str, nonce2: &str) -> bool {
        self.seen.contains(&(job_id.to_string(), nonce2.to_string()))
    }

    pub fn push(&mut self, job_id: String, nonce2: String) {
        let key = (job_id, nonce2);
        if self.seen.contains(&key) {
            return;
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_map_evicts_oldest_past_capacity() {
        let mut jobs = JobMap::with_capacity(3);
        jobs.insert("a".into(), json!(1));
        jobs.insert("b".into(), json!(2));
        jobs.insert("c".into(), json!(3));
        jobs.insert("d".into(), json!(4));

        assert_eq!(jobs.len(), 3);
        assert!(!jobs.contains("a"));
        assert_eq!(jobs.ordered_keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn job_map_reinsert_does_not_duplicate_order() {
        let mut jobs = JobMap::with_capacity(3);
        jobs.insert("a".into(), json!(1));
        jobs.insert("b".into(), json!(2));
        jobs.insert("a".into(), json!(99));
        assert_eq!(jobs.ordered_keys(), vec!["a", "b"]);
        assert_eq!(jobs.get("a"), Some(&json!(99)));
    }

    #[test]
    fn recent_shares_detects_duplicates() {
        let mut shares = RecentShares::with_capacity(500);
        shares.push("job1".into(), "ab0011".into());
        assert!(shares.contains("job1", "ab0011"));
        assert!(!shares.contains("job1", "ab0012"));
    }

    #[test]
    fn recent_shares_bounded_at_capacity() {
        let mut shares = RecentShares::with_capacity(2);
        shares.push("j".into(), "1".into());
        shares.push("j".into(), "2".into());
        shares.push("j".into(), "3".into());
        assert_eq!(shares.len(), 2);
        assert!(!shares.contains("j", "1"));
        assert!(shares.contains("j", "2"));
        assert!(shares.contains("j", "3"));
    }
}

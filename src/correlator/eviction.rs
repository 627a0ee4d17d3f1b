//! Eviction policies for the correlation buffer, applied oldest entry first.
//!
//! Each request id is looked up at most once per batch, so an entry older
//! than the longest plausible reply delay can be dropped without changing any
//! verdict.

use crate::config::EvictionConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether the oldest buffered reply may be dropped
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// `age` is how long the oldest entry has been buffered, `buffered` is the
    /// current number of entries
    fn should_evict(&self, age: Duration, buffered: usize) -> bool;
}

/// Never evicts
#[derive(Debug, Clone, Copy, Default)]
pub struct RetainAll;

impl EvictionPolicy for RetainAll {
    fn should_evict(&self, _age: Duration, _buffered: usize) -> bool {
        false
    }
}

/// Evicts entries once they reach the given age
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl EvictionPolicy for MaxAge {
    fn should_evict(&self, age: Duration, _buffered: usize) -> bool {
        age >= self.0
    }
}

/// Keeps at most the given number of entries
#[derive(Debug, Clone, Copy)]
pub struct MaxEntries(pub usize);

impl EvictionPolicy for MaxEntries {
    fn should_evict(&self, _age: Duration, buffered: usize) -> bool {
        buffered > self.0
    }
}

/// Factory function to create eviction policy instances
pub fn create_policy(config: EvictionConfig) -> Arc<dyn EvictionPolicy> {
    match config {
        EvictionConfig::RetainAll => Arc::new(RetainAll),
        EvictionConfig::MaxAge { max_age_ms } => Arc::new(MaxAge(Duration::from_millis(max_age_ms))),
        EvictionConfig::MaxEntries { max_entries } => Arc::new(MaxEntries(max_entries)),
    }
}

//! Correlation Buffer Module
//!
//! Insertion-ordered store of every reply observed since the subscription
//! started, indexed by request id. The ledger sends exactly one reply per
//! request; a second reply for the same id is refused and counted so the
//! first one stays authoritative.

use super::eviction::EvictionPolicy;
use crate::{ReplyEvent, RequestId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// A reply together with the moment it was observed
#[derive(Debug, Clone)]
pub struct BufferedReply {
    pub event: ReplyEvent,
    pub received_at: DateTime<Utc>,
    observed_at: Instant,
}

/// Reply store owned by one correlator
#[derive(Debug, Default)]
pub struct CorrelationBuffer {
    replies: HashMap<RequestId, BufferedReply>,
    /// Request ids in insertion order, oldest first
    order: VecDeque<RequestId>,
    duplicates: u64,
    evicted: u64,
}

impl CorrelationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reply observed at `now`
    ///
    /// # Returns
    /// `false` if a reply for the same request is already buffered; the
    /// buffered reply is kept unchanged
    pub fn insert(&mut self, event: ReplyEvent, now: Instant) -> bool {
        let request_id = event.request_id;
        if self.replies.contains_key(&request_id) {
            self.duplicates += 1;
            return false;
        }

        self.replies.insert(
            request_id,
            BufferedReply {
                event,
                received_at: Utc::now(),
                observed_at: now,
            },
        );
        self.order.push_back(request_id);
        true
    }

    pub fn get(&self, request_id: &RequestId) -> Option<&BufferedReply> {
        self.replies.get(request_id)
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.replies.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Buffered replies, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &BufferedReply> {
        self.order.iter().filter_map(|id| self.replies.get(id))
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Drops the oldest entries for as long as `policy` allows
    ///
    /// Entries younger than `min_age` are never dropped, and neither are
    /// entries for which `is_pinned` holds; pinned entries are skipped and the
    /// walk continues with the next oldest.
    ///
    /// # Returns
    /// The number of entries dropped
    pub fn prune(
        &mut self,
        now: Instant,
        policy: &dyn EvictionPolicy,
        min_age: Duration,
        is_pinned: impl Fn(&RequestId) -> bool,
    ) -> usize {
        let mut dropped = 0;
        let mut skipped = Vec::new();
        while let Some(oldest) = self.order.pop_front() {
            let Some(entry) = self.replies.get(&oldest) else {
                continue;
            };
            let age = now.saturating_duration_since(entry.observed_at);
            // Pinned entries are held for their waiters and do not count
            let buffered = self.order.len() + 1;
            if age < min_age || !policy.should_evict(age, buffered) {
                self.order.push_front(oldest);
                break;
            }
            if is_pinned(&oldest) {
                skipped.push(oldest);
                continue;
            }
            self.replies.remove(&oldest);
            dropped += 1;
        }
        for id in skipped.into_iter().rev() {
            self.order.push_front(id);
        }
        self.evicted += dropped as u64;
        dropped
    }
}

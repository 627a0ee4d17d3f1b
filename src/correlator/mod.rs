//! Reply Correlation Module
//!
//! This module maps asynchronous reply events back to the requests that
//! produced them:
//! - CorrelationBuffer: insertion-ordered reply store indexed by request id
//! - EvictionPolicy: strategy deciding which buffered replies may be dropped
//! - Correlator: owns the reply subscription and serves lookups and waits

mod buffer;
mod correlator;
pub mod eviction;


pub use buffer::{BufferedReply, CorrelationBuffer};
pub use correlator::{Correlator, CorrelatorStats, ListenerStatus};
pub use eviction::{EvictionPolicy, MaxAge, MaxEntries, RetainAll, create_policy};

//! Batch Submission Module
//!
//! This module handles submitting batches of requests and judging them:
//! - BatchExecutor: Submits a batch as one transaction and waits for every reply
//! - BatchVerdict: Per-index outcome of a batch, folded into one aggregate error on failure

mod executor;
mod verdict;

#[cfg(test)]
mod tests;

pub use executor::BatchExecutor;
pub use verdict::{BatchVerdict, classify};

//! Error Types
//!
//! One error enum per concern:
//! - `TransportError`: the ledger connection (submission and reply stream)
//! - `CodecError`: encoding calls and decoding reply payloads
//! - `CorrelationError`: the reply correlator and its waits
//! - `BatchError`: one or more requests of a batch failed
//! - `ExecutorError`: everything `BatchExecutor::submit` can return

use crate::RequestId;
use ethers::types::H256;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// First line of every aggregated batch failure message
pub const BATCH_ERROR_HEADER: &str = "Batch error occurred";

/// Reason recorded for a request whose reply never arrived
pub const TIMEOUT_REASON: &str = "<timeout>";

/// Errors raised by a ledger transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("ledger connection failed: {0}")]
    Connection(String),
    #[error("reply subscription lagged behind by {0} events")]
    Lagged(u64),
    #[error("ledger rpc error: {0}")]
    Rpc(String),
}

/// Errors raised while encoding a call or decoding its reply
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

/// Errors raised by the reply correlator
#[derive(Debug, Clone, Error)]
pub enum CorrelationError {
    #[error("failed to open reply subscription: {0}")]
    Subscription(#[source] TransportError),
    #[error("correlator is already running")]
    AlreadyStarted,
    #[error("correlator is not running")]
    NotRunning,
    #[error("timed out waiting for reply to {0}")]
    Timeout(RequestId),
    #[error("reply transport lost while waiting for {0}")]
    TransportLost(RequestId),
}

/// Aggregate failure of a batch in which at least one request failed
///
/// The message and `failed_txs` are built from the same map, so they always
/// name the same indices with the same reasons. Results of the requests that
/// did succeed stay available through `successes`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BatchError<T> {
    message: String,
    failed_txs: BTreeMap<usize, String>,
    successes: BTreeMap<usize, T>,
}

impl<T> BatchError<T> {
    /// Creates a batch error from per-index failure reasons and the decoded
    /// results of the remaining indices
    pub fn new(failed_txs: BTreeMap<usize, String>, successes: BTreeMap<usize, T>) -> Self {
        let message = format_batch_message(&failed_txs);
        Self {
            message,
            failed_txs,
            successes,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failed request index -> failure reason
    pub fn failed_txs(&self) -> &BTreeMap<usize, String> {
        &self.failed_txs
    }

    /// Succeeded request index -> decoded result
    pub fn successes(&self) -> &BTreeMap<usize, T> {
        &self.successes
    }

    pub fn into_parts(self) -> (BTreeMap<usize, String>, BTreeMap<usize, T>) {
        (self.failed_txs, self.successes)
    }
}

/// Builds the multi-line batch failure message, one line per failed index in
/// ascending order
fn format_batch_message(failed_txs: &BTreeMap<usize, String>) -> String {
    let mut message = String::from(BATCH_ERROR_HEADER);
    for (index, reason) in failed_txs {
        message.push_str(&format!("\nRequest number {} failed: {}", index, reason));
    }
    message
}

/// Errors returned by `BatchExecutor`
#[derive(Debug, Error)]
pub enum ExecutorError<T: fmt::Debug + 'static> {
    /// The transaction was refused before any request was enqueued
    #[error("transaction rejected: {reason}")]
    TransactionRejected { reason: String },
    /// The transaction enqueued a different number of requests than it carried
    #[error("transaction {tx_hash:?} enqueued {found} requests, expected {expected}")]
    EnqueueMismatch {
        tx_hash: H256,
        expected: usize,
        found: usize,
    },
    #[error("transaction was not finalized within {0:?}")]
    FinalizationTimeout(Duration),
    #[error("failed to encode request number {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: CodecError,
    },
    /// The only request of a single-request submission failed
    #[error("request failed: {reason}")]
    RequestFailed { reason: String },
    #[error(transparent)]
    Batch(#[from] BatchError<T>),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("correlator is not running")]
    CorrelatorNotRunning,
    #[error("batch submission cancelled")]
    Cancelled,
}

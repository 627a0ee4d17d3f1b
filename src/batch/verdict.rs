//! Batch Verdict Module
//!
//! Classifies the replies of a batch, index by index, and folds them into a
//! single verdict. The verdict depends only on which reply belongs to which
//! index, never on the order in which replies arrived.

use crate::{BatchError, CorrelationError, MessageCodec, ReplyEvent, ReplyStatus, TIMEOUT_REASON};
use std::collections::BTreeMap;
use tracing::warn;

/// Final outcome of a batch whose transaction was finalized
#[derive(Debug, Clone, PartialEq)]
pub enum BatchVerdict<T> {
    /// Every request succeeded; results are in request order
    AllSucceeded(Vec<T>),
    /// At least one request failed
    PartialFailure {
        failures: BTreeMap<usize, String>,
        successes: BTreeMap<usize, T>,
    },
}

impl<T> BatchVerdict<T> {
    /// Builds the verdict from per-index failures and successes
    pub fn from_parts(failures: BTreeMap<usize, String>, successes: BTreeMap<usize, T>) -> Self {
        if failures.is_empty() {
            BatchVerdict::AllSucceeded(successes.into_values().collect())
        } else {
            BatchVerdict::PartialFailure {
                failures,
                successes,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchVerdict::AllSucceeded(_))
    }

    /// Number of requests the verdict covers
    pub fn len(&self) -> usize {
        match self {
            BatchVerdict::AllSucceeded(results) => results.len(),
            BatchVerdict::PartialFailure {
                failures,
                successes,
            } => failures.len() + successes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Results in request order, or the aggregate error describing every
    /// failed index
    pub fn into_result(self) -> Result<Vec<T>, BatchError<T>> {
        match self {
            BatchVerdict::AllSucceeded(results) => Ok(results),
            BatchVerdict::PartialFailure {
                failures,
                successes,
            } => Err(BatchError::new(failures, successes)),
        }
    }
}

/// Classifies one reply per call
///
/// # Arguments
/// * `codec` - Decodes successful reply payloads into each call's result type
/// * `calls` - The batch's calls, in submission order
/// * `replies` - The wait result for each call, same order as `calls`
///
/// # Classification
/// - `Success`: decoded result recorded under the index (a payload that does
///   not decode counts as a failure)
/// - `Panic(reason)`: reason recorded verbatim
/// - No reply (timeout, lost transport, stopped correlator): `"<timeout>"`
pub fn classify<C: MessageCodec>(
    codec: &C,
    calls: &[C::Call],
    replies: Vec<Result<ReplyEvent, CorrelationError>>,
) -> BatchVerdict<C::Output> {
    let mut failures = BTreeMap::new();
    let mut successes = BTreeMap::new();

    for (index, (call, reply)) in calls.iter().zip(replies).enumerate() {
        match reply {
            Ok(ReplyEvent {
                status: ReplyStatus::Success,
                payload,
                ..
            }) => match codec.decode(call, &payload) {
                Ok(output) => {
                    successes.insert(index, output);
                }
                Err(e) => {
                    warn!("Request number {} replied with an undecodable payload: {}", index, e);
                    failures.insert(index, format!("Failed to decode reply: {}", e));
                }
            },
            Ok(ReplyEvent {
                status: ReplyStatus::Panic { reason },
                ..
            }) => {
                warn!("Request number {} panicked: {}", index, reason);
                failures.insert(index, reason);
            }
            Err(e) => {
                warn!("Request number {} got no reply: {}", index, e);
                failures.insert(index, TIMEOUT_REASON.to_string());
            }
        }
    }

    BatchVerdict::from_parts(failures, successes)
}

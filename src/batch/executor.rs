//! Batch Executor Module
//!
//! This module submits a list of independent calls as one ledger transaction
//! and reports, per call, whether it succeeded.
//!
//! # Submission Flow
//! 1. Encode every call, keeping the caller's order
//! 2. Submit one transaction and wait for it to be finalized or rejected
//! 3. Read the transaction's own enqueue events and pair them 1:1 with the calls
//! 4. Wait for all replies concurrently against one deadline
//! 5. Classify each reply and build the verdict
//!
//! Enqueueing is atomic (all calls or none), processing is not: any subset of
//! the calls may fail once the transaction is in.

use super::verdict::{BatchVerdict, classify};
use crate::{
    ExecutorError, MessageCodec, Signer, TransactionOutcome, config::BatchConfig,
    correlator::Correlator, ledger::LedgerTransport,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Submits batches of calls and computes their per-index verdicts
pub struct BatchExecutor {
    /// Ledger connection transactions are submitted through
    transport: Arc<dyn LedgerTransport>,
    /// Running correlator the replies are read from
    correlator: Arc<Correlator>,
    /// Timeouts for finalization and replies
    config: BatchConfig,
}

impl BatchExecutor {
    /// Creates a new batch executor
    ///
    /// # Arguments
    /// * `transport` - Ledger connection (the same one the correlator subscribes on)
    /// * `correlator` - Correlator that must be started before the first submission;
    ///   its eviction floor is raised so no reply is dropped before this executor reads it
    /// * `config` - Batch timeouts
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        correlator: Arc<Correlator>,
        config: BatchConfig,
    ) -> Self {
        // Replies may be buffered before the transaction is finalized
        correlator.retain_at_least(config.reply_horizon());
        Self {
            transport,
            correlator,
            config,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Submit `calls` as one transaction
    ///
    /// # Returns
    /// * `Ok(results)` with one decoded result per call, in call order
    /// * `Err(ExecutorError::Batch)` if any call failed; it lists every failed
    ///   index and keeps the results of the others
    /// * `Err(ExecutorError::TransactionRejected)` / `EnqueueMismatch` and the
    ///   other fatal variants when no per-call verdict could be computed
    pub async fn submit<C: MessageCodec>(
        &self,
        signer: &Signer,
        codec: &C,
        calls: &[C::Call],
    ) -> Result<Vec<C::Output>, ExecutorError<C::Output>> {
        let verdict = self.execute(signer, codec, calls).await?;
        Ok(verdict.into_result()?)
    }

    /// Like `submit`, but gives up with `ExecutorError::Cancelled` as soon as
    /// `cancel` fires; every in-flight reply wait is dropped with it
    pub async fn submit_until<C: MessageCodec>(
        &self,
        signer: &Signer,
        codec: &C,
        calls: &[C::Call],
        cancel: &CancellationToken,
    ) -> Result<Vec<C::Output>, ExecutorError<C::Output>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Batch of {} requests cancelled by caller", calls.len());
                Err(ExecutorError::Cancelled)
            }
            result = self.submit(signer, codec, calls) => result,
        }
    }

    /// Submit a single call
    ///
    /// A failure of the call is returned as `ExecutorError::RequestFailed`
    /// carrying its reason.
    pub async fn submit_one<C: MessageCodec>(
        &self,
        signer: &Signer,
        codec: &C,
        call: &C::Call,
    ) -> Result<C::Output, ExecutorError<C::Output>> {
        match self.execute(signer, codec, std::slice::from_ref(call)).await? {
            BatchVerdict::AllSucceeded(results) => {
                results.into_iter().next().ok_or_else(|| ExecutorError::RequestFailed {
                    reason: "no result for request".to_string(),
                })
            }
            BatchVerdict::PartialFailure { mut failures, .. } => Err(ExecutorError::RequestFailed {
                reason: failures.pop_first().map(|(_, reason)| reason).unwrap_or_default(),
            }),
        }
    }

    /// Submit `calls` and return the verdict without turning failures into an error
    ///
    /// Only failures that prevent a verdict (rejection, enqueue mismatch,
    /// transport and encoding errors) are returned as `Err`.
    pub async fn execute<C: MessageCodec>(
        &self,
        signer: &Signer,
        codec: &C,
        calls: &[C::Call],
    ) -> Result<BatchVerdict<C::Output>, ExecutorError<C::Output>> {
        if calls.is_empty() {
            return Ok(BatchVerdict::AllSucceeded(Vec::new()));
        }
        if !self.correlator.is_running() {
            return Err(ExecutorError::CorrelatorNotRunning);
        }

        // Step 1: Encode all calls in caller order
        let messages = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                codec
                    .request(call)
                    .map_err(|source| ExecutorError::Encode { index, source })
            })
            .collect::<Result<Vec<_>, ExecutorError<C::Output>>>()?;

        // Step 2: Submit and wait for the transaction's own outcome
        let finalization_timeout = self.config.finalization_timeout();
        let receipt = timeout(
            finalization_timeout,
            self.transport.submit_transaction(signer, messages),
        )
        .await
        .map_err(|_| ExecutorError::<C::Output>::FinalizationTimeout(finalization_timeout))??;

        if let TransactionOutcome::Rejected { reason } = &receipt.outcome {
            warn!("Transaction {:?} rejected: {}", receipt.tx_hash, reason);
            return Err(ExecutorError::TransactionRejected {
                reason: reason.clone(),
            });
        }
        info!(
            "Transaction {:?} finalized in block #{} with {} requests",
            receipt.tx_hash,
            receipt.block_number,
            calls.len()
        );

        // Step 3: Pair the transaction's enqueue events with the calls
        let enqueued = receipt.enqueued();
        if enqueued.len() != calls.len() {
            error!(
                "Transaction {:?} enqueued {} requests but carried {}",
                receipt.tx_hash,
                enqueued.len(),
                calls.len()
            );
            return Err(ExecutorError::EnqueueMismatch {
                tx_hash: receipt.tx_hash,
                expected: calls.len(),
                found: enqueued.len(),
            });
        }

        // Step 4: Wait for every reply concurrently
        let deadline = Instant::now() + self.config.reply_timeout();
        let replies = join_all(
            enqueued
                .iter()
                .map(|event| self.correlator.wait_for(event.request_id, deadline)),
        )
        .await;
        debug!("Collected {} replies for transaction {:?}", replies.len(), receipt.tx_hash);

        // Step 5: Classify
        let verdict = classify(codec, calls, replies);
        match &verdict {
            BatchVerdict::AllSucceeded(results) => {
                info!("Batch of {} requests succeeded", results.len());
            }
            BatchVerdict::PartialFailure { failures, .. } => {
                warn!(
                    "Batch of {} requests finished with {} failures",
                    calls.len(),
                    failures.len()
                );
            }
        }

        Ok(verdict)
    }
}

//! Tests for batch submission
//!
//! End-to-end batches against the sandbox ledger, plus scripted transports for
//! rejected transactions, protocol mismatches, timeouts and arrival order.

#[cfg(test)]
mod tests {
    use crate::{
        ActorId, BatchVerdict, CodecError, ExecutorError, JsonCall, JsonCodec, JsonEnvelope,
        MessageCodec, ReplyEvent, Request, Signer, TIMEOUT_REASON, TransportError,
        batch::BatchExecutor,
        config::{BatchConfig, LedgerConfig, ReplySchedule},
        correlator::{Correlator, MaxEntries, RetainAll},
        ledger::{
            ActorHandler, SandboxLedger,
            sandbox::INSUFFICIENT_FUNDS,
            testing::{ScriptedLedger, actor, finalized_receipt, rejected_receipt, scripted_id},
        },
    };
    use ethers::types::{Address, Bytes, U256};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};
    use tokio_util::sync::CancellationToken;

    const UNDERFLOW: &str = "Panic occurred: Underflow";
    const INVARIANT: &str =
        "Panic occurred: panicked with 'InvariantError: UnrecoverableTransferError'";

    fn batch_config(reply_timeout_ms: u64) -> BatchConfig {
        BatchConfig {
            reply_timeout_ms,
            finalization_timeout_ms: 5_000,
        }
    }

    fn signer() -> Signer {
        Signer::new(Address::repeat_byte(0x5e))
    }

    /// Helper function to create an actor replying with a fixed JSON document
    fn json_actor(reply: Value) -> ActorHandler {
        Arc::new(move |payload: &[u8]| -> Result<Bytes, String> {
            let _envelope: JsonEnvelope =
                serde_json::from_slice(payload).map_err(|e| e.to_string())?;
            Ok(Bytes::from(reply.to_string().into_bytes()))
        })
    }

    fn panicking_actor(reason: &'static str) -> ActorHandler {
        Arc::new(move |_: &[u8]| -> Result<Bytes, String> { Err(reason.to_string()) })
    }

    /// Helper function to create a funded sandbox with a running correlator
    async fn create_sandbox(
        schedule: ReplySchedule,
    ) -> (SandboxLedger, Arc<Correlator>, BatchExecutor) {
        let ledger = SandboxLedger::new(&LedgerConfig {
            reply_delay_ms: 5,
            reply_schedule: schedule,
            transaction_fee: 1,
            ..LedgerConfig::default()
        });
        ledger.fund(signer().account, U256::from(1_000_000u64)).await;

        let correlator = Arc::new(Correlator::new(Arc::new(ledger.clone()), Arc::new(RetainAll)));
        correlator.start().await.unwrap();
        let executor = BatchExecutor::new(
            Arc::new(ledger.clone()),
            correlator.clone(),
            batch_config(5_000),
        );
        (ledger, correlator, executor)
    }

    /// Helper function to create an executor over a scripted transport
    async fn create_scripted(
        reply_timeout_ms: u64,
    ) -> (Arc<ScriptedLedger>, Arc<Correlator>, Arc<BatchExecutor>) {
        let ledger = ScriptedLedger::new();
        let correlator = Arc::new(Correlator::new(ledger.clone(), Arc::new(RetainAll)));
        correlator.start().await.unwrap();
        let executor = Arc::new(BatchExecutor::new(
            ledger.clone(),
            correlator.clone(),
            batch_config(reply_timeout_ms),
        ));
        (ledger, correlator, executor)
    }

    fn query(count: usize) -> Vec<JsonCall> {
        (0..count)
            .map(|index| JsonCall::new(actor(1), "query", json!({ "index": index })))
            .collect()
    }

    #[tokio::test]
    async fn test_two_successful_requests_return_decoded_results() {
        let (ledger, correlator, executor) = create_sandbox(ReplySchedule::InOrder).await;
        ledger.register_actor(actor(1), json_actor(json!(true))).await;
        ledger
            .register_actor(actor(2), json_actor(json!(1_000_000_000_000u64)))
            .await;

        let calls = vec![
            JsonCall::new(actor(1), "approve", json!({ "amount": 10 })),
            JsonCall::new(actor(2), "balanceOf", json!({ "owner": "alice" })),
        ];
        let results = executor.submit(&signer(), &JsonCodec, &calls).await.unwrap();

        assert_eq!(results, vec![json!(true), json!(1_000_000_000_000u64)]);
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_failed_requests_are_aggregated_in_index_order() {
        // Reversed schedule: the last request replies first
        let (ledger, correlator, executor) = create_sandbox(ReplySchedule::Reversed).await;
        ledger.register_actor(actor(1), panicking_actor(UNDERFLOW)).await;
        ledger.register_actor(actor(2), json_actor(json!("ok"))).await;
        ledger.register_actor(actor(3), panicking_actor(INVARIANT)).await;

        let calls: Vec<JsonCall> = [1, 1, 2, 2, 3, 3]
            .into_iter()
            .map(|byte| JsonCall::new(actor(byte), "transfer", json!({ "amount": 1 })))
            .collect();
        let error = executor.submit(&signer(), &JsonCodec, &calls).await.unwrap_err();

        let ExecutorError::Batch(error) = error else {
            panic!("expected a batch error, got {:?}", error);
        };
        assert_eq!(
            error.message(),
            "Batch error occurred\n\
             Request number 0 failed: Panic occurred: Underflow\n\
             Request number 1 failed: Panic occurred: Underflow\n\
             Request number 4 failed: Panic occurred: panicked with 'InvariantError: UnrecoverableTransferError'\n\
             Request number 5 failed: Panic occurred: panicked with 'InvariantError: UnrecoverableTransferError'"
        );

        let expected: BTreeMap<usize, String> = [
            (0, UNDERFLOW.to_string()),
            (1, UNDERFLOW.to_string()),
            (4, INVARIANT.to_string()),
            (5, INVARIANT.to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(error.failed_txs(), &expected);
        assert_eq!(error.successes().keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_verdict_is_independent_of_arrival_order() {
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];
        let mut verdicts = Vec::new();

        for order in orders {
            let (ledger, correlator, executor) = create_scripted(5_000).await;
            ledger.push_receipt(finalized_receipt(4)).await;

            let submission = {
                let executor = executor.clone();
                tokio::spawn(async move { executor.execute(&signer(), &JsonCodec, &query(4)).await })
            };
            sleep(Duration::from_millis(10)).await;

            for index in order {
                let reply = if index % 2 == 0 {
                    ReplyEvent::success(scripted_id(index), actor(9), json!(index).to_string().into_bytes())
                } else {
                    ReplyEvent::panic(scripted_id(index), actor(9), format!("Panic occurred: {}", index))
                };
                ledger.send_reply(reply).await;
            }

            verdicts.push(submission.await.unwrap().unwrap());
            correlator.stop().await;
        }

        let first = &verdicts[0];
        assert!(verdicts.iter().all(|verdict| verdict == first));
        let BatchVerdict::PartialFailure { failures, successes } = first else {
            panic!("expected a partial failure");
        };
        // Every index reported exactly once
        let mut indices: Vec<usize> = failures.keys().chain(successes.keys()).copied().collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(failures[&3], "Panic occurred: 3");
    }

    #[tokio::test]
    async fn test_rejected_transaction_issues_no_waits() {
        let (ledger, correlator, executor) = create_scripted(5_000).await;
        ledger.push_receipt(rejected_receipt("Invalid Transaction: Stale nonce")).await;

        let error = executor.submit(&signer(), &JsonCodec, &query(3)).await.unwrap_err();

        assert!(matches!(
            error,
            ExecutorError::TransactionRejected { ref reason } if reason == "Invalid Transaction: Stale nonce"
        ));
        assert_eq!(correlator.stats().await.waits, 0);
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_underfunded_signer_is_rejected_by_sandbox() {
        let (ledger, correlator, executor) = create_sandbox(ReplySchedule::InOrder).await;
        let poor = Signer::new(Address::repeat_byte(0x01));
        ledger.register_actor(actor(1), json_actor(json!(true))).await;

        let error = executor.submit(&poor, &JsonCodec, &query(2)).await.unwrap_err();

        assert!(matches!(
            error,
            ExecutorError::TransactionRejected { ref reason } if reason == INSUFFICIENT_FUNDS
        ));
        assert_eq!(correlator.stats().await.waits, 0);
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_enqueue_count_mismatch_is_fatal() {
        let (ledger, correlator, executor) = create_scripted(5_000).await;
        ledger.push_receipt(finalized_receipt(2)).await;

        let error = executor.submit(&signer(), &JsonCodec, &query(3)).await.unwrap_err();

        assert!(matches!(
            error,
            ExecutorError::EnqueueMismatch { expected: 3, found: 2, .. }
        ));
        assert_eq!(correlator.stats().await.waits, 0);
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_missing_reply_is_reported_as_timeout() {
        let (ledger, correlator, executor) = create_scripted(100).await;
        ledger.push_receipt(finalized_receipt(2)).await;
        ledger
            .send_reply(ReplyEvent::success(scripted_id(0), actor(9), b"7".to_vec()))
            .await;

        let error = executor.submit(&signer(), &JsonCodec, &query(2)).await.unwrap_err();

        let ExecutorError::Batch(error) = error else {
            panic!("expected a batch error");
        };
        assert_eq!(error.failed_txs().get(&1).map(String::as_str), Some(TIMEOUT_REASON));
        assert_eq!(error.successes().get(&0), Some(&json!(7)));
        assert_eq!(
            error.message(),
            "Batch error occurred\nRequest number 1 failed: <timeout>"
        );
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_lost_transport_fails_pending_indices_only() {
        let (ledger, _correlator, executor) = create_scripted(10_000).await;
        ledger.push_receipt(finalized_receipt(2)).await;
        ledger
            .send_reply(ReplyEvent::panic(scripted_id(0), actor(9), UNDERFLOW))
            .await;

        let submission = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&signer(), &JsonCodec, &query(2)).await })
        };
        sleep(Duration::from_millis(20)).await;
        ledger.drop_subscription().await;

        let verdict = submission.await.unwrap().unwrap();
        let BatchVerdict::PartialFailure { failures, .. } = verdict else {
            panic!("expected a partial failure");
        };
        assert_eq!(failures[&0], UNDERFLOW);
        assert_eq!(failures[&1], TIMEOUT_REASON);
    }

    #[tokio::test]
    async fn test_cancellation_releases_pending_waits() {
        let (ledger, correlator, executor) = create_scripted(60_000).await;
        ledger.push_receipt(finalized_receipt(3)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = executor
            .submit_until(&signer(), &JsonCodec, &query(3), &cancel)
            .await;

        assert!(matches!(result, Err(ExecutorError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_submit_one_surfaces_panic_reason() {
        let (ledger, correlator, executor) = create_sandbox(ReplySchedule::InOrder).await;
        ledger.register_actor(actor(1), panicking_actor(UNDERFLOW)).await;
        ledger.register_actor(actor(2), json_actor(json!(42))).await;

        let failed = executor
            .submit_one(&signer(), &JsonCodec, &JsonCall::new(actor(1), "withdraw", Value::Null))
            .await;
        assert!(matches!(failed, Err(ExecutorError::RequestFailed { ref reason }) if reason == UNDERFLOW));

        let value = executor
            .submit_one(&signer(), &JsonCodec, &JsonCall::new(actor(2), "total", Value::Null))
            .await
            .unwrap();
        assert_eq!(value, json!(42));
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_program_fails_its_index() {
        let (ledger, correlator, executor) = create_sandbox(ReplySchedule::InOrder).await;
        ledger.register_actor(actor(1), json_actor(json!(1))).await;

        let calls = vec![
            JsonCall::new(actor(1), "a", Value::Null),
            JsonCall::new(ActorId::from(Address::repeat_byte(0x77)), "b", Value::Null),
        ];
        let verdict = executor.execute(&signer(), &JsonCodec, &calls).await.unwrap();

        let BatchVerdict::PartialFailure { failures, successes } = verdict else {
            panic!("expected a partial failure");
        };
        assert!(failures[&1].contains("not found"));
        assert_eq!(successes[&0], json!(1));
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_correlator_refuses_submission() {
        let (ledger, correlator, executor) = create_scripted(1_000).await;
        correlator.stop().await;

        let error = executor.submit(&signer(), &JsonCodec, &query(1)).await.unwrap_err();

        assert!(matches!(error, ExecutorError::CorrelatorNotRunning));
        assert!(ledger.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_submits_nothing() {
        let (ledger, correlator, executor) = create_scripted(1_000).await;

        let results = executor.submit(&signer(), &JsonCodec, &[]).await.unwrap();

        assert!(results.is_empty());
        assert!(ledger.submissions().await.is_empty());
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_returned() {
        let (ledger, correlator, executor) = create_scripted(1_000).await;
        ledger
            .push_transport_error(TransportError::Rpc("node unavailable".to_string()))
            .await;

        let error = executor.submit(&signer(), &JsonCodec, &query(1)).await.unwrap_err();

        assert!(matches!(error, ExecutorError::Transport(TransportError::Rpc(_))));
        correlator.stop().await;
    }

    /// Codec refusing to encode the value 13
    struct PickyCodec;

    impl MessageCodec for PickyCodec {
        type Call = u32;
        type Output = u32;

        fn destination(&self, _call: &u32) -> ActorId {
            actor(1)
        }

        fn encode(&self, call: &u32) -> Result<Bytes, CodecError> {
            if *call == 13 {
                return Err(CodecError::Custom("unlucky".to_string()));
            }
            Ok(Bytes::from(call.to_be_bytes().to_vec()))
        }

        fn decode(&self, _call: &u32, payload: &[u8]) -> Result<u32, CodecError> {
            Ok(payload.len() as u32)
        }
    }

    #[tokio::test]
    async fn test_encode_failure_stops_before_submission() {
        let (ledger, correlator, executor) = create_scripted(1_000).await;

        let error = executor.submit(&signer(), &PickyCodec, &[1, 13, 2]).await.unwrap_err();

        assert!(matches!(error, ExecutorError::Encode { index: 1, .. }));
        assert!(ledger.submissions().await.is_empty());
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_requests_are_submitted_in_caller_order() {
        let (ledger, correlator, executor) = create_scripted(100).await;
        ledger.push_receipt(finalized_receipt(3)).await;
        for index in 0..3 {
            ledger
                .send_reply(ReplyEvent::success(scripted_id(index), actor(9), vec![0u8; index]))
                .await;
        }

        let results = executor.submit(&signer(), &PickyCodec, &[7, 8, 9]).await.unwrap();

        assert_eq!(results, vec![0, 1, 2]);
        let submitted = ledger.submissions().await;
        let payloads: Vec<Request> = submitted[0].clone();
        assert_eq!(
            payloads.iter().map(|r| r.payload.to_vec()).collect::<Vec<_>>(),
            vec![7u32.to_be_bytes().to_vec(), 8u32.to_be_bytes().to_vec(), 9u32.to_be_bytes().to_vec()]
        );
        correlator.stop().await;
    }

    #[tokio::test]
    async fn test_replies_buffered_before_finalization_survive_tight_eviction() {
        let ledger = ScriptedLedger::new();
        let correlator = Arc::new(Correlator::new(ledger.clone(), Arc::new(MaxEntries(1))));
        correlator.start().await.unwrap();
        let executor = BatchExecutor::new(ledger.clone(), correlator.clone(), batch_config(1_000));

        // Both replies land before the receipt is read
        ledger.push_receipt(finalized_receipt(2)).await;
        for index in 0..2 {
            ledger
                .send_reply(ReplyEvent::success(scripted_id(index), actor(9), vec![0u8; index + 1]))
                .await;
        }
        while correlator.stats().await.observed < 2 {
            sleep(Duration::from_millis(5)).await;
        }

        let verdict = executor.execute(&signer(), &PickyCodec, &[1, 2]).await.unwrap();

        assert_eq!(verdict, BatchVerdict::AllSucceeded(vec![1, 2]));
        assert_eq!(correlator.stats().await.evicted, 0);
        correlator.stop().await;
    }
}

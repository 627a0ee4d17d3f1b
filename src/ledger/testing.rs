//! Scripted transport for tests: receipts are queued up front and replies are
//! pushed by the test, in whatever order it needs.

use crate::{
    ActorId, EnqueueEvent, LedgerEvent, ReplyEvent, ReplyStream, Request, RequestId, Signer,
    TransactionOutcome, TransactionReceipt, TransportError, ledger::LedgerTransport,
};
use async_trait::async_trait;
use ethers::types::H256;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

pub(crate) const SCRIPTED_POSITION: u32 = 3;

type ReplySender = mpsc::UnboundedSender<Result<ReplyEvent, TransportError>>;

#[derive(Default)]
pub(crate) struct ScriptedLedger {
    receipts: Mutex<VecDeque<Result<TransactionReceipt, TransportError>>>,
    submissions: Mutex<Vec<Vec<Request>>>,
    replies: Mutex<Option<ReplySender>>,
    refuse_subscriptions: AtomicBool,
    subscriptions: AtomicUsize,
}

impl ScriptedLedger {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn push_receipt(&self, receipt: TransactionReceipt) {
        self.receipts.lock().await.push_back(Ok(receipt));
    }

    pub(crate) async fn push_transport_error(&self, error: TransportError) {
        self.receipts.lock().await.push_back(Err(error));
    }

    pub(crate) async fn send_reply(&self, reply: ReplyEvent) {
        self.send(Ok(reply)).await;
    }

    pub(crate) async fn send_error(&self, error: TransportError) {
        self.send(Err(error)).await;
    }

    async fn send(&self, item: Result<ReplyEvent, TransportError>) {
        let replies = self.replies.lock().await;
        let sender = replies.as_ref().expect("no open reply subscription");
        sender.send(item).expect("reply subscription dropped");
    }

    /// Ends the current subscription as a lost connection would
    pub(crate) async fn drop_subscription(&self) {
        self.replies.lock().await.take();
    }

    pub(crate) fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) async fn submissions(&self) -> Vec<Vec<Request>> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl LedgerTransport for ScriptedLedger {
    async fn submit_transaction(
        &self,
        _signer: &Signer,
        messages: Vec<Request>,
    ) -> Result<TransactionReceipt, TransportError> {
        self.submissions.lock().await.push(messages);
        self.receipts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Rpc("no scripted receipt".to_string())))
    }

    async fn subscribe_replies(&self) -> Result<ReplyStream, TransportError> {
        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.replies.lock().await = Some(sender);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });
        Ok(stream.boxed())
    }
}

pub(crate) fn scripted_id(index: usize) -> RequestId {
    RequestId(H256::from_low_u64_be(index as u64 + 1))
}

pub(crate) fn actor(byte: u8) -> ActorId {
    ActorId(H256::repeat_byte(byte))
}

/// Finalized receipt enqueueing `count` requests with ids `scripted_id(0..count)`,
/// preceded by an unrelated extrinsic's enqueue event
pub(crate) fn finalized_receipt(count: usize) -> TransactionReceipt {
    let mut events = vec![LedgerEvent::MessageQueued(EnqueueEvent {
        request_id: RequestId(H256::repeat_byte(0xee)),
        destination: actor(0xee),
        extrinsic_position: SCRIPTED_POSITION - 1,
    })];
    events.extend((0..count).map(|index| {
        LedgerEvent::MessageQueued(EnqueueEvent {
            request_id: scripted_id(index),
            destination: actor(1),
            extrinsic_position: SCRIPTED_POSITION,
        })
    }));
    events.push(LedgerEvent::ExtrinsicSuccess {
        extrinsic_position: SCRIPTED_POSITION,
    });

    TransactionReceipt {
        tx_hash: H256::repeat_byte(0xaa),
        block_number: 42,
        extrinsic_position: SCRIPTED_POSITION,
        outcome: TransactionOutcome::Finalized,
        events,
        finalized_at: chrono::Utc::now(),
    }
}

pub(crate) fn rejected_receipt(reason: &str) -> TransactionReceipt {
    TransactionReceipt {
        tx_hash: H256::repeat_byte(0xbb),
        block_number: 43,
        extrinsic_position: SCRIPTED_POSITION,
        outcome: TransactionOutcome::Rejected {
            reason: reason.to_string(),
        },
        events: vec![LedgerEvent::ExtrinsicFailed {
            extrinsic_position: SCRIPTED_POSITION,
            reason: reason.to_string(),
        }],
        finalized_at: chrono::Utc::now(),
    }
}

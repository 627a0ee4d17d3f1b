use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gas limit attached to a request when the caller does not pick one
pub const DEFAULT_GAS_LIMIT: u64 = 250_000_000_000;

/// Identifier the ledger assigns to a message when it is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub H256);

impl From<H256> for RequestId {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Address of an on-chain actor (a program or a user account)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub H256);

impl From<H256> for ActorId {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

impl From<Address> for ActorId {
    fn from(address: Address) -> Self {
        Self(H256::from(address))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Account on whose behalf a transaction is submitted
///
/// Key management lives with the transport; the executor only needs to say
/// which account pays for and sends the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub account: Address,
}

impl Signer {
    pub fn new(account: Address) -> Self {
        Self { account }
    }
}

/// Wire-encoded message addressed to one actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub destination: ActorId,
    pub payload: Bytes,
    #[serde(default)]
    pub value: U256,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

impl Request {
    pub fn new(destination: ActorId, payload: impl Into<Bytes>) -> Self {
        Self {
            destination,
            payload: payload.into(),
            value: U256::zero(),
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

/// Emitted once per enqueued message, in submission order, by the
/// transaction that enqueued it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueEvent {
    pub request_id: RequestId,
    pub destination: ActorId,
    /// Position of the enqueuing extrinsic inside its block
    pub extrinsic_position: u32,
}

/// Outcome an actor reports for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReplyStatus {
    Success,
    Panic { reason: String },
}

/// Reply an actor emits after processing a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEvent {
    /// Request this reply answers
    pub request_id: RequestId,
    /// Recipient of the reply
    pub destination: ActorId,
    pub payload: Bytes,
    pub status: ReplyStatus,
}

impl ReplyEvent {
    pub fn success(request_id: RequestId, destination: ActorId, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            destination,
            payload: payload.into(),
            status: ReplyStatus::Success,
        }
    }

    pub fn panic(request_id: RequestId, destination: ActorId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            destination,
            payload: Bytes::default(),
            status: ReplyStatus::Panic { reason: reason.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReplyStatus::Success)
    }
}

/// Events a finalized block reports for its extrinsics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LedgerEvent {
    MessageQueued(EnqueueEvent),
    ExtrinsicSuccess { extrinsic_position: u32 },
    ExtrinsicFailed { extrinsic_position: u32, reason: String },
}

impl LedgerEvent {
    pub fn extrinsic_position(&self) -> u32 {
        match self {
            LedgerEvent::MessageQueued(event) => event.extrinsic_position,
            LedgerEvent::ExtrinsicSuccess { extrinsic_position }
            | LedgerEvent::ExtrinsicFailed { extrinsic_position, .. } => *extrinsic_position,
        }
    }
}

/// Whether the ledger accepted the transaction itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TransactionOutcome {
    Finalized,
    /// Rejected before any message was enqueued (fees, nonce, ...)
    Rejected { reason: String },
}

/// Result of submitting one transaction and waiting for its finalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub extrinsic_position: u32,
    pub outcome: TransactionOutcome,
    /// All events of the including block, not only this transaction's
    pub events: Vec<LedgerEvent>,
    pub finalized_at: DateTime<Utc>,
}

impl TransactionReceipt {
    /// Enqueue events emitted by this transaction's own extrinsic, in
    /// emission order
    pub fn enqueued(&self) -> Vec<EnqueueEvent> {
        self.events
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::MessageQueued(queued)
                    if queued.extrinsic_position == self.extrinsic_position =>
                {
                    Some(queued.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, TransactionOutcome::Rejected { .. })
    }
}

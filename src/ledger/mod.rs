//! Ledger Integration Module
//!
//! This module defines the boundary to the actor-model ledger:
//! - Submitting a transaction that enqueues a list of messages
//! - Subscribing to the reply events actors emit for enqueued messages
//!
//! `SandboxLedger` is an in-process implementation used by the binary and
//! the test suites.

pub mod sandbox;

#[cfg(test)]
pub(crate) mod testing;

use crate::{ReplyEvent, Request, Signer, TransactionReceipt, TransportError};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use sandbox::{ActorHandler, SandboxLedger};

/// Stream of reply events; the end of the stream means the connection is gone
pub type ReplyStream = BoxStream<'static, Result<ReplyEvent, TransportError>>;

/// Connection to the ledger
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Submit one transaction enqueueing `messages` in order and wait until it
    /// is finalized or rejected
    async fn submit_transaction(
        &self,
        signer: &Signer,
        messages: Vec<Request>,
    ) -> Result<TransactionReceipt, TransportError>;

    /// Open a subscription to every reply event, addressed to any actor
    async fn subscribe_replies(&self) -> Result<ReplyStream, TransportError>;
}

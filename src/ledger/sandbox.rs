//! Sandbox Ledger Module
//!
//! An in-process ledger that behaves like the real one at the boundary the
//! client depends on:
//! - A transaction is rejected as a whole when the signer cannot pay for it
//! - A finalized transaction emits one `MessageQueued` event per message, in order
//! - Every enqueued message is answered later, on a separate task, by the
//!   handler registered for its destination actor
//!
//! Reply timing is controlled by `reply_delay_ms` and `reply_schedule`, which
//! lets tests and local runs exercise out-of-order replies.

use crate::{
    ActorId, EnqueueEvent, LedgerEvent, ReplyEvent, ReplyStream, Request, RequestId, Signer,
    TransactionOutcome, TransactionReceipt, TransportError,
    config::{ActorBehavior, ActorConfig, LedgerConfig, ReplySchedule},
    ledger::LedgerTransport,
};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rejection reason for a signer that cannot cover fees plus attached value
pub const INSUFFICIENT_FUNDS: &str = "Inability to pay some fees (e.g. account balance too low)";

/// Block position of submitted transactions (position 0 holds the timestamp inherent)
const EXTRINSIC_POSITION: u32 = 1;

/// Actor logic: returns the reply payload, or the panic reason
pub type ActorHandler = Arc<dyn Fn(&[u8]) -> Result<Bytes, String> + Send + Sync>;

/// In-process ledger implementing `LedgerTransport`
#[derive(Clone)]
pub struct SandboxLedger {
    inner: Arc<Inner>,
}

struct Inner {
    reply_delay: Duration,
    reply_schedule: ReplySchedule,
    /// Fee charged per enqueued message
    transaction_fee: U256,
    actors: RwLock<HashMap<ActorId, ActorHandler>>,
    balances: RwLock<HashMap<Address, U256>>,
    chain: Mutex<ChainState>,
    replies: broadcast::Sender<ReplyEvent>,
    /// Cancelled to drop every open subscription
    connection: Mutex<CancellationToken>,
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    nonce: u64,
}

impl SandboxLedger {
    /// Creates an empty sandbox (no funded accounts, no actors)
    pub fn new(config: &LedgerConfig) -> Self {
        let (replies, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                reply_delay: Duration::from_millis(config.reply_delay_ms),
                reply_schedule: config.reply_schedule,
                transaction_fee: U256::from(config.transaction_fee),
                actors: RwLock::new(HashMap::new()),
                balances: RwLock::new(HashMap::new()),
                chain: Mutex::new(ChainState::default()),
                replies,
                connection: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Creates a sandbox with the accounts and actors listed in the config
    pub async fn from_config(config: &LedgerConfig) -> Self {
        let ledger = Self::new(config);
        for account in &config.accounts {
            ledger.fund(account.address, U256::from(account.balance)).await;
        }
        for actor in &config.actors {
            ledger.register_actor(actor.id, handler_for(actor)).await;
        }
        info!(
            "Sandbox ledger ready with {} accounts and {} actors",
            config.accounts.len(),
            config.actors.len()
        );
        ledger
    }

    /// Adds `amount` to the balance of `account`
    pub async fn fund(&self, account: Address, amount: U256) {
        let mut balances = self.inner.balances.write().await;
        let balance = balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub async fn balance(&self, account: &Address) -> U256 {
        let balances = self.inner.balances.read().await;
        balances.get(account).copied().unwrap_or_default()
    }

    /// Installs (or replaces) the handler answering messages sent to `id`
    pub async fn register_actor(&self, id: ActorId, handler: ActorHandler) {
        let mut actors = self.inner.actors.write().await;
        actors.insert(id, handler);
    }

    /// Ends every open reply subscription and refuses new ones
    pub async fn disconnect(&self) {
        let connection = self.inner.connection.lock().await;
        connection.cancel();
        info!("Sandbox ledger disconnected");
    }

    /// Accepts new reply subscriptions again after `disconnect`
    pub async fn reconnect(&self) {
        let mut connection = self.inner.connection.lock().await;
        if connection.is_cancelled() {
            *connection = CancellationToken::new();
            info!("Sandbox ledger reconnected");
        }
    }

    /// Delay before the reply to message `index` of a `total`-message transaction
    fn reply_delay_for(&self, index: usize, total: usize) -> Duration {
        let slot = match self.inner.reply_schedule {
            ReplySchedule::InOrder => index + 1,
            ReplySchedule::Reversed => total - index,
        };
        let slot = u32::try_from(slot).unwrap_or(u32::MAX);
        self.inner.reply_delay.saturating_mul(slot)
    }

    /// Processes one enqueued message on its own task and broadcasts the reply
    fn dispatch(&self, request_id: RequestId, reply_to: ActorId, message: Request, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let handler = inner.actors.read().await.get(&message.destination).cloned();
            let reply = match handler {
                Some(handler) => match handler(message.payload.as_ref()) {
                    Ok(payload) => ReplyEvent::success(request_id, reply_to, payload),
                    Err(reason) => ReplyEvent::panic(request_id, reply_to, reason),
                },
                None => ReplyEvent::panic(
                    request_id,
                    reply_to,
                    format!("Program {} not found", message.destination),
                ),
            };

            debug!("Sandbox replying to {} (success: {})", request_id, reply.is_success());
            // Nobody listening is not an error
            let _ = inner.replies.send(reply);
        });
    }
}

#[async_trait]
impl LedgerTransport for SandboxLedger {
    async fn submit_transaction(
        &self,
        signer: &Signer,
        messages: Vec<Request>,
    ) -> Result<TransactionReceipt, TransportError> {
        let required = messages.iter().fold(U256::zero(), |total, message| {
            total
                .saturating_add(message.value)
                .saturating_add(self.inner.transaction_fee)
        });

        // One transaction per block keeps block numbers and nonces sequential
        let mut chain = self.inner.chain.lock().await;
        chain.block_number += 1;
        let block_number = chain.block_number;
        let tx_hash = transaction_hash(signer, block_number, chain.nonce);

        {
            let mut balances = self.inner.balances.write().await;
            let balance = balances.entry(signer.account).or_default();
            if *balance < required {
                warn!(
                    "Rejecting transaction {:?}: balance {} below required {}",
                    tx_hash, balance, required
                );
                return Ok(TransactionReceipt {
                    tx_hash,
                    block_number,
                    extrinsic_position: EXTRINSIC_POSITION,
                    outcome: TransactionOutcome::Rejected {
                        reason: INSUFFICIENT_FUNDS.to_string(),
                    },
                    events: vec![LedgerEvent::ExtrinsicFailed {
                        extrinsic_position: EXTRINSIC_POSITION,
                        reason: INSUFFICIENT_FUNDS.to_string(),
                    }],
                    finalized_at: chrono::Utc::now(),
                });
            }
            *balance -= required;
        }
        chain.nonce += 1;

        let total = messages.len();
        let reply_to = ActorId::from(signer.account);
        let mut events = Vec::with_capacity(total + 1);
        for (index, message) in messages.into_iter().enumerate() {
            let request_id = request_id(tx_hash, index);
            events.push(LedgerEvent::MessageQueued(EnqueueEvent {
                request_id,
                destination: message.destination,
                extrinsic_position: EXTRINSIC_POSITION,
            }));
            let delay = self.reply_delay_for(index, total);
            self.dispatch(request_id, reply_to, message, delay);
        }
        events.push(LedgerEvent::ExtrinsicSuccess {
            extrinsic_position: EXTRINSIC_POSITION,
        });

        debug!(
            "Sandbox finalized transaction {:?} in block #{} with {} messages",
            tx_hash, block_number, total
        );

        Ok(TransactionReceipt {
            tx_hash,
            block_number,
            extrinsic_position: EXTRINSIC_POSITION,
            outcome: TransactionOutcome::Finalized,
            events,
            finalized_at: chrono::Utc::now(),
        })
    }

    async fn subscribe_replies(&self) -> Result<ReplyStream, TransportError> {
        let connection = self.inner.connection.lock().await.clone();
        if connection.is_cancelled() {
            return Err(TransportError::Connection(
                "sandbox ledger is disconnected".to_string(),
            ));
        }

        let receiver = self.inner.replies.subscribe();
        let stream = futures::stream::unfold(
            (receiver, connection),
            |(mut receiver, connection)| async move {
                let item = tokio::select! {
                    _ = connection.cancelled() => return None,
                    received = receiver.recv() => match received {
                        Ok(reply) => Ok(reply),
                        Err(RecvError::Lagged(skipped)) => Err(TransportError::Lagged(skipped)),
                        Err(RecvError::Closed) => return None,
                    },
                };
                Some((item, (receiver, connection)))
            },
        );

        Ok(stream.boxed())
    }
}

/// Handler implementing a configured actor behavior
fn handler_for(actor: &ActorConfig) -> ActorHandler {
    match actor.behavior {
        ActorBehavior::Echo => Arc::new(|payload: &[u8]| -> Result<Bytes, String> {
            Ok(Bytes::from(payload.to_vec()))
        }),
        ActorBehavior::Panic => {
            let reason = actor
                .reason
                .clone()
                .unwrap_or_else(|| "Panic occurred".to_string());
            Arc::new(move |_: &[u8]| -> Result<Bytes, String> { Err(reason.clone()) })
        }
    }
}

fn transaction_hash(signer: &Signer, block_number: u64, nonce: u64) -> H256 {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(signer.account.as_bytes());
    data.extend_from_slice(&block_number.to_be_bytes());
    data.extend_from_slice(&nonce.to_be_bytes());
    H256::from_slice(&keccak256(data))
}

/// Request ids are derived from the enqueuing transaction and message index
fn request_id(tx_hash: H256, index: usize) -> RequestId {
    let mut data = Vec::with_capacity(40);
    data.extend_from_slice(tx_hash.as_bytes());
    data.extend_from_slice(&(index as u64).to_be_bytes());
    RequestId(H256::from_slice(&keccak256(data)))
}

//! Reply Correlator Module
//!
//! Turns the ledger's push-based reply stream into a store that can be
//! queried by request id, and lets callers wait for a reply that has not
//! arrived yet.
//!
//! # Concurrency
//! A single listener task owns the subscription and is the only writer of the
//! buffer. Readers take the buffer's read lock. Waiters are woken through a
//! `watch` channel carrying the listener status and the number of replies
//! observed so far; a waiter subscribes to it before looking at the buffer, so
//! a reply appended between the lookup and the wait still wakes it.
//!
//! Eviction never drops a reply somebody is waiting for, nor one younger than
//! the retention floor raised by the batch executors sharing the correlator.

use super::buffer::CorrelationBuffer;
use super::eviction::{EvictionPolicy, create_policy};
use crate::{
    CorrelationError, ReplyEvent, ReplyStream, RequestId, TransportError,
    config::CorrelatorConfig, ledger::LedgerTransport,
};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of the reply subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenerStatus {
    /// Never started
    Idle,
    Running,
    /// The transport ended the subscription; `start` may be retried
    Lost,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct ListenerState {
    status: ListenerStatus,
    /// Replies appended since creation
    observed: u64,
}

/// Point-in-time counters of a correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatorStats {
    pub status: ListenerStatus,
    pub buffered: usize,
    pub observed: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub waits: u64,
    /// Replies the transport skipped because the subscription fell behind
    pub lagged: u64,
}

/// State shared between the correlator handle and its listener task
struct Shared {
    buffer: RwLock<CorrelationBuffer>,
    state: watch::Sender<ListenerState>,
    eviction: Arc<dyn EvictionPolicy>,
    waits: AtomicU64,
    lagged: AtomicU64,
    /// Request ids with a `wait_for` in progress, with their waiter count
    pins: StdMutex<HashMap<RequestId, usize>>,
    /// Replies younger than this are never evicted
    min_retention_ms: AtomicU64,
}

impl Shared {
    fn set_status(&self, status: ListenerStatus) {
        self.state.send_modify(|state| state.status = status);
    }

    /// Appends a reply; listener task only
    async fn observe(&self, event: ReplyEvent) {
        let request_id = event.request_id;
        let inserted = {
            let mut buffer = self.buffer.write().await;
            let now = Instant::now();
            let inserted = buffer.insert(event, now);
            self.prune_buffer(&mut buffer, now);
            inserted
        };

        if inserted {
            debug!("Buffered reply to {}", request_id);
            self.state.send_modify(|state| state.observed += 1);
        } else {
            warn!("Ignoring duplicate reply to {}, keeping the first one", request_id);
        }
    }

    async fn prune(&self) {
        let mut buffer = self.buffer.write().await;
        let dropped = self.prune_buffer(&mut buffer, Instant::now());
        if dropped > 0 {
            debug!("Evicted {} buffered replies", dropped);
        }
    }

    fn prune_buffer(&self, buffer: &mut CorrelationBuffer, now: Instant) -> usize {
        let min_age = Duration::from_millis(self.min_retention_ms.load(Ordering::Relaxed));
        let pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.prune(now, self.eviction.as_ref(), min_age, |id| pins.contains_key(id))
    }

    fn pin(&self, request_id: RequestId) -> WaitPin<'_> {
        let mut pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        *pins.entry(request_id).or_default() += 1;
        WaitPin {
            shared: self,
            request_id,
        }
    }
}

/// Keeps one buffered reply safe from eviction while its waiter runs
struct WaitPin<'a> {
    shared: &'a Shared,
    request_id: RequestId,
}

impl Drop for WaitPin<'_> {
    fn drop(&mut self) {
        let mut pins = self.shared.pins.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = pins.get_mut(&self.request_id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.request_id);
            }
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Buffers every reply event and answers lookups by request id
///
/// Created and owned by the caller; `start` must be called before any batch
/// is submitted and `stop` during shutdown.
pub struct Correlator {
    transport: Arc<dyn LedgerTransport>,
    shared: Arc<Shared>,
    prune_interval: Duration,
    listener: Mutex<Option<Listener>>,
}

impl Correlator {
    /// Creates a stopped correlator
    ///
    /// # Arguments
    /// * `transport` - Ledger connection the reply subscription is opened on
    /// * `eviction` - Policy deciding which buffered replies may be dropped
    pub fn new(transport: Arc<dyn LedgerTransport>, eviction: Arc<dyn EvictionPolicy>) -> Self {
        let (state, _) = watch::channel(ListenerState {
            status: ListenerStatus::Idle,
            observed: 0,
        });
        Self {
            transport,
            shared: Arc::new(Shared {
                buffer: RwLock::new(CorrelationBuffer::new()),
                state,
                eviction,
                waits: AtomicU64::new(0),
                lagged: AtomicU64::new(0),
                pins: StdMutex::new(HashMap::new()),
                min_retention_ms: AtomicU64::new(0),
            }),
            prune_interval: CorrelatorConfig::default().prune_interval(),
            listener: Mutex::new(None),
        }
    }

    /// Creates a stopped correlator using the configured eviction policy
    pub fn from_config(transport: Arc<dyn LedgerTransport>, config: &CorrelatorConfig) -> Self {
        let mut correlator = Self::new(transport, create_policy(config.eviction));
        correlator.prune_interval = config.prune_interval();
        correlator
    }

    /// Raises the age below which buffered replies are never evicted
    ///
    /// A reply may be observed before its batch's transaction is finalized,
    /// so callers waiting on it must be able to read it up to `retention`
    /// after it arrived. The floor only ever grows.
    pub fn retain_at_least(&self, retention: Duration) {
        let millis = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        self.shared.min_retention_ms.fetch_max(millis, Ordering::Relaxed);
    }

    /// Opens the reply subscription and spawns the listener task
    ///
    /// Nothing stays open when this fails. May be called again after the
    /// transport was lost or after `stop`.
    ///
    /// # Returns
    /// * `Err(CorrelationError::AlreadyStarted)` if the listener is running
    /// * `Err(CorrelationError::Subscription)` if the transport refused the subscription
    pub async fn start(&self) -> Result<(), CorrelationError> {
        let mut listener = self.listener.lock().await;

        if let Some(previous) = listener.take() {
            if self.is_running() && !previous.handle.is_finished() {
                *listener = Some(previous);
                return Err(CorrelationError::AlreadyStarted);
            }
            // Reap the task of a subscription the transport ended
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                warn!("Previous reply listener task ended abnormally: {:?}", e);
            }
        }

        let stream = self
            .transport
            .subscribe_replies()
            .await
            .map_err(CorrelationError::Subscription)?;

        let cancel = CancellationToken::new();
        self.shared.set_status(ListenerStatus::Running);
        let handle = tokio::spawn(listen(
            Arc::clone(&self.shared),
            stream,
            cancel.clone(),
            self.prune_interval,
        ));
        *listener = Some(Listener { cancel, handle });

        info!("Reply correlator started");
        Ok(())
    }

    /// Releases the subscription and waits for the listener task to exit
    ///
    /// Idempotent, and safe to call after a failed `start`. Callers blocked in
    /// `wait_for` are released with `CorrelationError::NotRunning`.
    pub async fn stop(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };

        listener.cancel.cancel();
        if let Err(e) = listener.handle.await {
            warn!("Reply listener task ended abnormally: {:?}", e);
        }
        self.shared.set_status(ListenerStatus::Stopped);
        info!("Reply correlator stopped");
    }

    pub fn status(&self) -> ListenerStatus {
        self.shared.state.borrow().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == ListenerStatus::Running
    }

    /// Non-blocking lookup of the reply to `request_id`
    pub async fn find(&self, request_id: RequestId) -> Option<ReplyEvent> {
        let buffer = self.shared.buffer.read().await;
        buffer.get(&request_id).map(|reply| reply.event.clone())
    }

    /// Waits until the reply to `request_id` is buffered
    ///
    /// Returns immediately if it already is.
    ///
    /// # Returns
    /// * `Err(CorrelationError::Timeout)` once `deadline` passes
    /// * `Err(CorrelationError::TransportLost)` if the subscription ends first
    /// * `Err(CorrelationError::NotRunning)` if the correlator is not started or gets stopped
    pub async fn wait_for(
        &self,
        request_id: RequestId,
        deadline: Instant,
    ) -> Result<ReplyEvent, CorrelationError> {
        self.shared.waits.fetch_add(1, Ordering::Relaxed);
        let _pin = self.shared.pin(request_id);
        let mut state = self.shared.state.subscribe();

        loop {
            // Mark the current state seen before looking, so an append racing
            // with the lookup still wakes `changed`
            let status = state.borrow_and_update().status;
            if let Some(reply) = self.find(request_id).await {
                return Ok(reply);
            }

            match status {
                ListenerStatus::Running => {}
                ListenerStatus::Lost => return Err(CorrelationError::TransportLost(request_id)),
                ListenerStatus::Idle | ListenerStatus::Stopped => {
                    return Err(CorrelationError::NotRunning);
                }
            }

            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(CorrelationError::TransportLost(request_id));
                    }
                }
                _ = sleep_until(deadline) => {
                    return self
                        .find(request_id)
                        .await
                        .ok_or(CorrelationError::Timeout(request_id));
                }
            }
        }
    }

    pub async fn stats(&self) -> CorrelatorStats {
        let buffer = self.shared.buffer.read().await;
        let state = *self.shared.state.borrow();
        CorrelatorStats {
            status: state.status,
            buffered: buffer.len(),
            observed: state.observed,
            duplicates: buffer.duplicates(),
            evicted: buffer.evicted(),
            waits: self.shared.waits.load(Ordering::Relaxed),
            lagged: self.shared.lagged.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) async fn observe(&self, event: ReplyEvent) {
        self.shared.observe(event).await;
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        // Without an async context the task cannot be joined; cancelling it
        // is enough for it to drop the subscription
        if let Ok(mut listener) = self.listener.try_lock() {
            if let Some(listener) = listener.take() {
                listener.cancel.cancel();
            }
        }
    }
}

/// Listener task: drains the subscription into the buffer until cancelled or
/// until the transport ends the stream
async fn listen(
    shared: Arc<Shared>,
    mut stream: ReplyStream,
    cancel: CancellationToken,
    prune_interval: Duration,
) {
    let mut ticker = interval(prune_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let status = loop {
        tokio::select! {
            _ = cancel.cancelled() => break ListenerStatus::Stopped,
            next = stream.next() => match next {
                Some(Ok(event)) => shared.observe(event).await,
                Some(Err(TransportError::Lagged(skipped))) => {
                    shared.lagged.fetch_add(skipped, Ordering::Relaxed);
                    warn!(
                        "Reply subscription fell behind, {} replies were dropped; waits for them will time out",
                        skipped
                    );
                }
                Some(Err(e)) => warn!("Reply subscription error: {}", e),
                None => {
                    warn!("Reply subscription closed by the transport");
                    break ListenerStatus::Lost;
                }
            },
            _ = ticker.tick() => shared.prune().await,
        }
    };

    drop(stream);
    shared.set_status(status);
    debug!("Reply listener exited with status {:?}", status);
}

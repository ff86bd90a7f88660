//! The `ApprovalGateway`: correlates out-of-band `/api/approve`/`/api/reject`
//! signals with Interceptor stalls waiting on the same `event_id`.
//!
//! Built on the same single-producer/single-consumer `tokio::sync::oneshot`
//! idiom used elsewhere for per-job results, generalized to a registry keyed
//! by `EventId` instead of one channel per in-flight call.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use vex_core::EventId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("event {0} is already registered")]
    DuplicateEvent(String),
    #[error("event {0} is not registered")]
    UnknownEvent(String),
    #[error("event {0} has already been signaled")]
    AlreadySignaled(String),
}

/// Terminal outcome of a stall: either an explicit approve/reject signal, or
/// the deadline (if any) elapsing first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallOutcome {
    Approved,
    Rejected,
    TimedOut,
}

/// A handle returned by `register`, passed to `wait`.
pub struct WaitHandle {
    event_id: EventId,
    rx: oneshot::Receiver<bool>,
}

#[derive(Default)]
pub struct ApprovalGateway {
    pending: Mutex<HashMap<EventId, oneshot::Sender<bool>>>,
}

impl ApprovalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending stall. Fails with `DuplicateEvent` if
    /// `event_id` is already registered — `EventId` is generated fresh per
    /// call by the Interceptor so this should only trip on a caller bug.
    pub async fn register(&self, event_id: EventId) -> Result<WaitHandle, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&event_id) {
            return Err(GatewayError::DuplicateEvent(event_id.to_hex()));
        }
        pending.insert(event_id, tx);
        Ok(WaitHandle { event_id, rx })
    }

    /// Signal a pending stall's outcome. Fails with `UnknownEvent` if
    /// nothing is registered under `event_id`, or `AlreadySignaled` if the
    /// channel's other end was already consumed (the entry is removed on
    /// the first successful signal, so this only trips on a racing double
    /// send, which `signal`'s own removal makes structurally impossible
    /// except for a caller holding a stale `event_id` after a timeout).
    pub async fn signal(&self, event_id: EventId, approved: bool) -> Result<(), GatewayError> {
        let tx = {
            let mut pending = self.pending.lock().await;
            pending.remove(&event_id)
        };
        match tx {
            Some(tx) => tx.send(approved).map_err(|_| GatewayError::AlreadySignaled(event_id.to_hex())),
            None => Err(GatewayError::UnknownEvent(event_id.to_hex())),
        }
    }

    /// Block until a signal arrives or `deadline` elapses. On timeout, the
    /// entry is removed so a late signal comes back as `UnknownEvent` rather
    /// than silently vanishing.
    pub async fn wait(&self, handle: WaitHandle, deadline: Option<Duration>) -> StallOutcome {
        let WaitHandle { event_id, rx } = handle;

        let result = match deadline {
            Some(d) => tokio::time::timeout(d, rx).await,
            None => Ok(rx.await),
        };

        match result {
            Ok(Ok(true)) => StallOutcome::Approved,
            Ok(Ok(false)) => StallOutcome::Rejected,
            Ok(Err(_)) => StallOutcome::Rejected,
            Err(_) => {
                self.pending.lock().await.remove(&event_id);
                StallOutcome::TimedOut
            }
        }
    }

    /// Cancel a pending stall without waiting for a signal, used by the
    /// client-cancellation path. Removes the entry so a stray signal
    /// afterward is reported as `UnknownEvent`.
    pub async fn cancel(&self, event_id: EventId) {
        self.pending.lock().await.remove(&event_id);
    }
}

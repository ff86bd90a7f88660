//! `LedgerWorker`: the single writer in front of the `Store`.
//!
//! A long-lived task owning its backend, with `tracing` spans around each
//! unit of work and backoff-free fast failure on append errors. Unlike a
//! `Semaphore`-gated concurrent job pool, this consumes from a single
//! `tokio::sync::mpsc` channel: the ledger needs one writer assigning a
//! strictly increasing `seq`, not N workers racing over a shared counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use vex_core::event::{EventType, TaskState};
use vex_core::{Event, Hash, Run, Signer};
use vex_persist::Store;

/// Queue capacity before `submit` fails closed with `QueueFull`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("ledger queue is full")]
    QueueFull,
    #[error("ledger worker is unhealthy")]
    Unhealthy,
    #[error("ledger worker has shut down")]
    ShuttingDown,
    #[error("store append failed: {0}")]
    AppendFailed(String),
    #[error("canonicalization failed: {0}")]
    Canon(String),
    #[error("key rotation failed: {0}")]
    Rotate(String),
}

enum WorkItem {
    Submit(Event, oneshot::Sender<Result<Event, WorkerError>>),
    Rotate(oneshot::Sender<Result<(String, String), WorkerError>>),
}

/// Handle held by the Interceptor and Control API. Cloning is cheap — it's
/// just a channel sender plus a shared health flag.
#[derive(Clone)]
pub struct LedgerWorker {
    tx: mpsc::Sender<WorkItem>,
    healthy: Arc<AtomicBool>,
}

impl LedgerWorker {
    /// Run startup (genesis if the store is empty) and spawn the commit
    /// loop. `run_id` identifies this process's run; a fresh one should be
    /// generated by the caller when the store reports no existing run.
    pub async fn start<S>(store: Arc<S>, signer: Arc<Signer>, run_id: String) -> Result<Self, WorkerError>
    where
        S: Store + 'static,
    {
        Self::start_with_capacity(store, signer, run_id, DEFAULT_QUEUE_CAPACITY).await
    }

    pub async fn start_with_capacity<S>(
        store: Arc<S>,
        signer: Arc<Signer>,
        run_id: String,
        capacity: usize,
    ) -> Result<Self, WorkerError>
    where
        S: Store + 'static,
    {
        let healthy = Arc::new(AtomicBool::new(true));

        let (prev_hash, next_seq, key_id) = match store
            .last_event(&run_id)
            .await
            .map_err(|e| WorkerError::AppendFailed(e.to_string()))?
        {
            Some(last) => (last.hash, last.seq + 1, last.key_id),
            None => {
                let pub_hex = signer.public_key_hex();
                let key_id = signer.key_id();
                let mut genesis = Event::draft(
                    run_id.clone(),
                    EventType::Genesis,
                    "",
                    serde_json::json!({ "public_key": pub_hex }),
                    None,
                    None,
                    TaskState::Completed,
                    None,
                    None,
                    None,
                    false,
                );
                genesis.seq = 0;
                genesis.prev_hash = Hash::ZERO;
                genesis.hash = genesis
                    .compute_hash()
                    .map_err(|e| WorkerError::Canon(e.to_string()))?;
                genesis.sig = signer.sign(genesis.hash.as_bytes());
                genesis.key_id = key_id.clone();

                // The run row must exist before the genesis event is inserted:
                // `events` carries a foreign key onto `runs(run_id)`.
                store
                    .put_run(&Run::new(run_id.clone(), genesis.hash, pub_hex))
                    .await
                    .map_err(|e| WorkerError::AppendFailed(e.to_string()))?;
                store
                    .append_event(&genesis)
                    .await
                    .map_err(|e| WorkerError::AppendFailed(e.to_string()))?;

                info!(run_id = %run_id, "genesis event committed");
                (genesis.hash, 1, key_id)
            }
        };

        let (tx, rx) = mpsc::channel(capacity);
        let worker = Self { tx, healthy: healthy.clone() };

        tokio::spawn(commit_loop(rx, store, signer, healthy, run_id, prev_hash, next_seq, key_id));

        Ok(worker)
    }

    /// Submit a draft event for commit. Fills in `seq`/`prev_hash`/`hash`/
    /// `sig`/`key_id` and returns the committed event. Fails immediately
    /// with `QueueFull` on backpressure.
    pub async fn submit(&self, draft: Event) -> Result<Event, WorkerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .try_send(WorkItem::Submit(draft, resp_tx))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => WorkerError::ShuttingDown,
            })?;
        resp_rx.await.map_err(|_| WorkerError::ShuttingDown)?
    }

    /// Request a key rotation. The resulting `rekey` event is signed with
    /// the *old* key; the active signing key changes only after that event
    /// is durably committed.
    pub async fn rotate(&self) -> Result<(String, String), WorkerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .try_send(WorkItem::Rotate(resp_tx))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => WorkerError::ShuttingDown,
            })?;
        resp_rx.await.map_err(|_| WorkerError::ShuttingDown)?
    }

    /// Snapshot of the worker's health. Once `false`, never recovers on its
    /// own — an operator must restart the process.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

#[allow(clippy::too_many_arguments)]
async fn commit_loop<S>(
    mut rx: mpsc::Receiver<WorkItem>,
    store: Arc<S>,
    signer: Arc<Signer>,
    healthy: Arc<AtomicBool>,
    run_id: String,
    mut prev_hash: Hash,
    mut next_seq: u64,
    mut key_id: String,
) where
    S: Store + 'static,
{
    while let Some(item) = rx.recv().await {
        if !healthy.load(Ordering::Acquire) {
            let err = WorkerError::Unhealthy;
            match item {
                WorkItem::Submit(_, tx) => {
                    let _ = tx.send(Err(err));
                }
                WorkItem::Rotate(tx) => {
                    let _ = tx.send(Err(err));
                }
            }
            continue;
        }

        match item {
            WorkItem::Submit(mut event, tx) => {
                event.seq = next_seq;
                event.run_id = run_id.clone();
                event.prev_hash = prev_hash;

                let hash = match event.compute_hash() {
                    Ok(h) => h,
                    Err(e) => {
                        healthy.store(false, Ordering::Release);
                        error!(seq = next_seq, error = %e, "failed to canonicalize event, ledger worker unhealthy");
                        let _ = tx.send(Err(WorkerError::Canon(e.to_string())));
                        continue;
                    }
                };
                event.hash = hash;
                event.sig = signer.sign(hash.as_bytes());
                event.key_id = key_id.clone();

                match store.append_event(&event).await {
                    Ok(()) => {
                        prev_hash = hash;
                        next_seq += 1;
                        let _ = tx.send(Ok(event));
                    }
                    Err(e) => {
                        healthy.store(false, Ordering::Release);
                        error!(seq = next_seq, error = %e, "append_event failed, ledger worker unhealthy");
                        let _ = tx.send(Err(WorkerError::AppendFailed(e.to_string())));
                    }
                }
            }

            WorkItem::Rotate(tx) => {
                let old_pub_hex = signer.public_key_hex();
                let old_key_id = key_id.clone();
                let pending = signer.begin_rotation();
                let new_pub_hex = pending.pub_hex.clone();

                let mut rekey_event = Event::draft(
                    run_id.clone(),
                    EventType::Rekey,
                    "",
                    serde_json::json!({
                        "old_public_key": old_pub_hex,
                        "new_public_key": new_pub_hex,
                    }),
                    None,
                    None,
                    TaskState::Completed,
                    None,
                    None,
                    None,
                    false,
                );
                rekey_event.seq = next_seq;
                rekey_event.run_id = run_id.clone();
                rekey_event.prev_hash = prev_hash;

                let hash = match rekey_event.compute_hash() {
                    Ok(h) => h,
                    Err(e) => {
                        healthy.store(false, Ordering::Release);
                        error!(seq = next_seq, error = %e, "failed to canonicalize rekey event");
                        let _ = tx.send(Err(WorkerError::Canon(e.to_string())));
                        continue;
                    }
                };
                rekey_event.hash = hash;
                rekey_event.sig = signer.sign(hash.as_bytes());
                rekey_event.key_id = old_key_id;

                if let Err(e) = store.append_event(&rekey_event).await {
                    healthy.store(false, Ordering::Release);
                    error!(seq = next_seq, error = %e, "rekey event append failed, ledger worker unhealthy");
                    let _ = tx.send(Err(WorkerError::AppendFailed(e.to_string())));
                    continue;
                }

                if let Err(e) = store.append_key_range(&run_id, next_seq + 1, &new_pub_hex).await {
                    healthy.store(false, Ordering::Release);
                    error!(error = %e, "failed to record new key range after rekey, ledger worker unhealthy");
                    let _ = tx.send(Err(WorkerError::AppendFailed(e.to_string())));
                    continue;
                }

                match signer.commit_rotation(pending) {
                    Ok((old, new)) => {
                        prev_hash = hash;
                        next_seq += 1;
                        key_id = signer.key_id();
                        info!(old_key = %old, new_key = %new, "signing key rotated");
                        let _ = tx.send(Ok((old, new)));
                    }
                    Err(e) => {
                        healthy.store(false, Ordering::Release);
                        error!(error = %e, "failed to activate rotated key on disk, ledger worker unhealthy");
                        let _ = tx.send(Err(WorkerError::Rotate(e.to_string())));
                    }
                }
            }
        }
    }

    warn!("ledger worker commit loop exiting: all senders dropped");
}

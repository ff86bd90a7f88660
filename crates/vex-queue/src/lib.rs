//! # vex-queue
//!
//! The `LedgerWorker`: the single writer in front of the ledger's `Store`,
//! fronted by a bounded FIFO queue.

pub mod ledger_worker;

pub use ledger_worker::{LedgerWorker, WorkerError, DEFAULT_QUEUE_CAPACITY};

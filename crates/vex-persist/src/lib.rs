//! # vex-persist
//!
//! Persistence layer for the VEX Gatekeeper ledger: an abstract append-only
//! `Store` (events, runs, key ranges, task failure counters) with a SQLite
//! implementation and an in-memory twin for tests.

pub mod ledger_store;

pub use ledger_store::{MemoryLedgerStore, SqliteLedgerStore, Store, StoreError};

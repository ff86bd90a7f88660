//! # vex-core
//!
//! Core types for the VEX Gatekeeper: the ledger's data model (`Event`,
//! `Run`, `KeyRange`), deterministic canonicalization (`canon`), the SHA-256
//! hash/Merkle primitives (`merkle`), and Ed25519 key lifecycle (`signer`).
//!
//! Everything here is synchronous and has no opinion about an async runtime
//! or a storage backend — those live in `vex-persist`, `vex-queue`, and
//! `vex-router`. This crate is the one piece every other crate in the
//! workspace depends on.
//!
//! ## Quick start
//!
//! ```rust
//! use vex_core::{canon, Event, EventType, TaskState};
//! use serde_json::json;
//!
//! let draft = Event::draft(
//!     "run-1",
//!     EventType::ToolCall,
//!     "fs.read",
//!     json!({"path": "/etc/hosts"}),
//!     None,
//!     Some("T1".to_string()),
//!     TaskState::Working,
//!     None,
//!     None,
//!     None,
//!     false,
//! );
//! let bytes = canon::to_canonical_bytes(&draft.params).unwrap();
//! assert!(!bytes.is_empty());
//! ```

pub mod canon;
pub mod event;
pub mod merkle;
pub mod signer;

pub use canon::{canonicalize_value, to_canonical_bytes, CanonError};
pub use event::{Event, EventId, EventType, KeyRange, Run, TaskState, MAX_TASK_ID_BYTES};
pub use merkle::{Hash, MerkleNode, MerkleTree};
pub use signer::{key_id_for, PendingRotation, Signer, SignerError};

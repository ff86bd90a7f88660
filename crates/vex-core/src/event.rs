//! The ledger event model: `Event`, `Run`, and the key-range table that
//! records which Ed25519 key signed which span of sequence numbers.
//!
//! Hash-chained, Ed25519-signed, canonical-JSON hashed. `hash`/`prev_hash`/
//! `seq`/`sig` are assigned exclusively by the LedgerWorker at commit time,
//! never by the event's constructor.

use crate::canon::{self, CanonError};
use crate::merkle::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length, in bytes, of a `task_id`.
pub const MAX_TASK_ID_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Genesis,
    ToolCall,
    ToolResponse,
    Blocked,
    Approval,
    Rejection,
    Rekey,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Genesis => "genesis",
            Self::ToolCall => "tool_call",
            Self::ToolResponse => "tool_response",
            Self::Blocked => "blocked",
            Self::Approval => "approval",
            Self::Rejection => "rejection",
            Self::Rekey => "rekey",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Working,
    Stalled,
    Completed,
    Failed,
}

/// An 8-byte opaque identifier, unique within a run. Used both as `Event::id`
/// and as the correlation key the ApprovalGateway matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(#[serde(with = "hex_bytes_8")] pub [u8; 8]);

impl EventId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::Rng::fill(&mut rand::rng(), &mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 8] = bytes.try_into().map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod hex_bytes_8 {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 8], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes.try_into().map_err(|_| D::Error::custom("expected 8 bytes"))
    }
}

/// An immutable ledger record. `seq`, `prev_hash`, `hash`, `sig`, and `key_id`
/// are set only by the LedgerWorker at commit time; everything else is
/// supplied by the submitter (Interceptor, or the worker itself for
/// genesis/rekey).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub id: EventId,
    pub run_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub method: String,
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub task_state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    pub was_blocked: bool,
    pub prev_hash: Hash,
    pub hash: Hash,
    #[serde(with = "hex_sig")]
    pub sig: [u8; 64],
    pub key_id: String,
}

mod hex_sig {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(sig))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes.try_into().map_err(|_| D::Error::custom("expected 64 bytes"))
    }
}

/// The subset of `Event`'s fields that feed the hash, in the exact shape
/// they're canonicalized in — everything except `hash` and `sig` themselves.
/// Kept as a distinct serializable type instead of editing a clone of
/// `Event` in place so the field set hashed can't silently drift from what's
/// actually stored.
#[derive(Serialize)]
struct HashedFields<'a> {
    seq: u64,
    id: EventId,
    run_id: &'a str,
    ts: DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: EventType,
    method: &'a str,
    params: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: &'a Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: &'a Option<String>,
    task_state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_id: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_level: &'a Option<String>,
    was_blocked: bool,
    prev_hash: Hash,
}

impl Event {
    /// A draft event as submitted by a caller before the LedgerWorker fills
    /// in `seq`/`prev_hash`/`hash`/`sig`/`key_id`. Those fields are given
    /// placeholder values here and overwritten by `finalize`.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        run_id: impl Into<String>,
        event_type: EventType,
        method: impl Into<String>,
        params: serde_json::Value,
        response: Option<serde_json::Value>,
        task_id: Option<String>,
        task_state: TaskState,
        parent_id: Option<EventId>,
        policy_id: Option<String>,
        risk_level: Option<String>,
        was_blocked: bool,
    ) -> Self {
        Self {
            seq: 0,
            id: EventId::generate(),
            run_id: run_id.into(),
            ts: Utc::now(),
            event_type,
            method: method.into(),
            params,
            response,
            task_id,
            task_state,
            parent_id,
            policy_id,
            risk_level,
            was_blocked,
            prev_hash: Hash::ZERO,
            hash: Hash::ZERO,
            sig: [0u8; 64],
            key_id: String::new(),
        }
    }

    /// Bytes hashed and signed: canonical JSON of every field except
    /// `hash` and `sig`.
    pub fn hashed_bytes(&self) -> Result<Vec<u8>, CanonError> {
        let fields = HashedFields {
            seq: self.seq,
            id: self.id,
            run_id: &self.run_id,
            ts: self.ts,
            event_type: self.event_type,
            method: &self.method,
            params: &self.params,
            response: &self.response,
            task_id: &self.task_id,
            task_state: self.task_state,
            parent_id: self.parent_id,
            policy_id: &self.policy_id,
            risk_level: &self.risk_level,
            was_blocked: self.was_blocked,
            prev_hash: self.prev_hash,
        };
        canon::to_canonical_bytes(&fields)
    }

    /// Recompute the content hash. Used both when the LedgerWorker commits
    /// a new event and when the Verifier replays the chain.
    pub fn compute_hash(&self) -> Result<Hash, CanonError> {
        Ok(Hash::digest(&self.hashed_bytes()?))
    }
}

/// A `(seq_first, seq_last, public_key)` tuple describing which key signed
/// which span of sequence numbers. `seq_last = None` means "still open" (the
/// currently active key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRange {
    pub seq_first: u64,
    pub seq_last: Option<u64>,
    pub public_key_hex: String,
}

impl KeyRange {
    pub fn covers(&self, seq: u64) -> bool {
        seq >= self.seq_first && self.seq_last.is_none_or(|last| seq <= last)
    }
}

/// One lifecycle of the proxy process, bracketed by a genesis event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub agent_label: Option<String>,
    pub genesis_hash: Hash,
    pub key_ranges: Vec<KeyRange>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, genesis_hash: Hash, initial_public_key_hex: String) -> Self {
        Self {
            run_id: run_id.into(),
            agent_label: None,
            genesis_hash,
            key_ranges: vec![KeyRange {
                seq_first: 0,
                seq_last: None,
                public_key_hex: initial_public_key_hex,
            }],
            created_at: Utc::now(),
        }
    }

    /// Close the currently-open range at `seq_rekey` and open a new one at
    /// `seq_rekey + 1` with `new_public_key_hex`.
    pub fn rotate_at(&mut self, seq_rekey: u64, new_public_key_hex: String) {
        if let Some(current) = self.key_ranges.last_mut() {
            current.seq_last = Some(seq_rekey);
        }
        self.key_ranges.push(KeyRange {
            seq_first: seq_rekey + 1,
            seq_last: None,
            public_key_hex: new_public_key_hex,
        });
    }

    pub fn key_for_seq(&self, seq: u64) -> Option<&KeyRange> {
        self.key_ranges.iter().find(|r| r.covers(seq))
    }
}

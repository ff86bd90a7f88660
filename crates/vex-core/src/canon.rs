//! Deterministic JSON canonicalization (RFC 8785 / JCS) used as the sole input
//! to event hashing and signing.
//!
//! A thin wrapper over `serde_jcs` rather than a hand-rolled encoder — the
//! same crate `vex_core::audit` already relied on for hash stability. The
//! wrapper exists so callers go through one narrow entry point and so
//! non-finite numbers surface as the stable `CanonError::InvalidValue`
//! instead of a crate-specific error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("value contains a non-finite number")]
    InvalidValue,
    #[error("canonicalization failed: {0}")]
    Serialization(String),
}

/// Canonicalize any serializable value to its RFC 8785-style byte string:
/// object keys sorted, no insignificant whitespace, shortest round-trip
/// number formatting.
pub fn to_canonical_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    reject_non_finite(&serde_json::to_value(value).map_err(|e| CanonError::Serialization(e.to_string()))?)?;
    serde_jcs::to_vec(value).map_err(|e| CanonError::Serialization(e.to_string()))
}

/// Canonicalize an already-constructed `serde_json::Value`.
pub fn canonicalize_value(value: &serde_json::Value) -> Result<Vec<u8>, CanonError> {
    reject_non_finite(value)?;
    serde_jcs::to_vec(value).map_err(|e| CanonError::Serialization(e.to_string()))
}

fn reject_non_finite(value: &serde_json::Value) -> Result<(), CanonError> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonError::InvalidValue);
                }
            }
            Ok(())
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

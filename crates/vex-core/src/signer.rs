//! Ed25519 signing key lifecycle: load-or-generate, sign, verify, rotate.
//!
//! Mirrors the atomic-replace idiom already used by the ledger's file-based
//! collaborators elsewhere in the workspace (write to a temp path, flush,
//! then rename into place) and the `Signature::create`/`verify_strict` pair
//! from `vex_core::audit`, generalized into a standalone key-management
//! component instead of a one-off helper on the audit event type.

use ed25519_dalek::{Signature as DalekSignature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("failed to load or generate signing key at {path}: {source}")]
    KeyLoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("signing key at {0} is malformed")]
    KeyCorrupt(PathBuf),
    #[error("failed to rotate signing key at {path}: {source}")]
    KeyRotateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Short, stable identifier for a key, independent of rotation count.
/// Derived as the first 8 hex chars of the SHA-256 of the public key bytes.
pub fn key_id_for(public: &VerifyingKey) -> String {
    let digest = crate::merkle::Hash::digest(public.as_bytes());
    digest.to_hex()[..8].to_string()
}

struct ActiveKey {
    signing: SigningKey,
    key_id: String,
    generation: u64,
}

/// Holds the single active Ed25519 keypair for a process, backed by a file
/// on disk. Rotation is visible to readers via a load-acquire on an internal
/// generation counter, so the LedgerWorker observes a rotated key on its
/// next submission without additional locking on the hot path.
pub struct Signer {
    path: PathBuf,
    active: RwLock<ActiveKey>,
    generation: AtomicU64,
}

impl Signer {
    /// Load the keypair at `path`, generating and persisting a fresh one if
    /// the file does not exist.
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Result<Self, SignerError> {
        let path = path.into();
        let signing = match std::fs::read_to_string(&path) {
            Ok(contents) => parse_signing_key(&path, &contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let signing = generate_signing_key();
                write_key_atomic(&path, &signing)
                    .map_err(|source| SignerError::KeyLoadFailed { path: path.clone(), source })?;
                signing
            }
            Err(source) => return Err(SignerError::KeyLoadFailed { path, source }),
        };

        let key_id = key_id_for(&signing.verifying_key());
        Ok(Self {
            path,
            active: RwLock::new(ActiveKey {
                signing,
                key_id,
                generation: 0,
            }),
            generation: AtomicU64::new(0),
        })
    }

    /// The public key currently active for signing.
    pub fn public_key(&self) -> VerifyingKey {
        self.active.read().expect("signer lock poisoned").signing.verifying_key()
    }

    /// Hex-encoded active public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    /// Short identifier for the active key, stable across the key's lifetime.
    pub fn key_id(&self) -> String {
        self.active.read().expect("signer lock poisoned").key_id.clone()
    }

    /// Monotonic generation counter; bumped on every rotation. Callers that
    /// cache the active key/key_id can cheaply check this to know whether a
    /// reload is needed.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Deterministic Ed25519 signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        let active = self.active.read().expect("signer lock poisoned");
        active.signing.sign(msg).to_bytes()
    }

    /// Verify a 64-byte signature against an arbitrary public key (not
    /// necessarily the currently active one — needed to verify historical
    /// events signed under a rotated-out key).
    pub fn verify(public: &VerifyingKey, msg: &[u8], sig: &[u8; 64]) -> bool {
        let signature = DalekSignature::from_bytes(sig);
        public.verify_strict(msg, &signature).is_ok()
    }

    /// Generate a new keypair, back up the current file to `<path>.old`, and
    /// atomically replace it. Returns `(old_pub_hex, new_pub_hex)`.
    ///
    /// Safe to call while the ledger worker is running: the new key becomes
    /// visible to `sign`/`public_key` only after this function returns, via
    /// the write lock acquired here.
    ///
    /// Equivalent to `begin_rotation` immediately followed by
    /// `commit_rotation`. Callers that need to sign something (e.g. a
    /// `rekey` ledger event) with the *old* key before the swap takes effect
    /// should use the two-phase form instead.
    pub fn rotate(&self) -> Result<(String, String), SignerError> {
        let pending = self.begin_rotation();
        self.commit_rotation(pending)
    }

    /// Generate the next keypair without touching the active key or disk.
    /// Pair with `commit_rotation` once anything that must be signed under
    /// the *current* key has been signed.
    pub fn begin_rotation(&self) -> PendingRotation {
        let signing = generate_signing_key();
        let pub_hex = hex::encode(signing.verifying_key().as_bytes());
        PendingRotation { signing, pub_hex }
    }

    /// Back up the current key file, write `pending`'s key atomically, and
    /// swap it in as the active key. Returns `(old_pub_hex, new_pub_hex)`.
    pub fn commit_rotation(&self, pending: PendingRotation) -> Result<(String, String), SignerError> {
        let new_pub_hex = pending.pub_hex.clone();
        let old_pub_hex;

        {
            let mut active = self.active.write().expect("signer lock poisoned");
            old_pub_hex = hex::encode(active.signing.verifying_key().as_bytes());

            let backup_path = backup_path_for(&self.path);
            std::fs::rename(&self.path, &backup_path).map_err(|source| SignerError::KeyRotateFailed {
                path: self.path.clone(),
                source,
            })?;

            write_key_atomic(&self.path, &pending.signing).map_err(|source| SignerError::KeyRotateFailed {
                path: self.path.clone(),
                source,
            })?;

            let new_key_id = key_id_for(&pending.signing.verifying_key());
            let next_generation = active.generation + 1;
            *active = ActiveKey {
                signing: pending.signing,
                key_id: new_key_id,
                generation: next_generation,
            };
        }

        self.generation.fetch_add(1, Ordering::Release);
        Ok((old_pub_hex, new_pub_hex))
    }
}

/// A freshly generated keypair not yet persisted or made active. See
/// `Signer::begin_rotation`/`commit_rotation`.
pub struct PendingRotation {
    signing: SigningKey,
    pub pub_hex: String,
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".old");
    PathBuf::from(os)
}

fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    rand::Rng::fill(&mut rand::rng(), &mut seed);
    SigningKey::from_bytes(&seed)
}

fn parse_signing_key(path: &Path, contents: &str) -> Result<SigningKey, SignerError> {
    let trimmed = contents.trim();
    let bytes = hex::decode(trimmed).map_err(|_| SignerError::KeyCorrupt(path.to_path_buf()))?;
    let arr: [u8; 32] = bytes
        .get(..32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SignerError::KeyCorrupt(path.to_path_buf()))?;
    Ok(SigningKey::from_bytes(&arr))
}

/// Write the 64-byte keypair (32-byte seed followed by the 32-byte public
/// key, matching the spec's on-disk format) as a hex string to `path`
/// atomically: a temp file in the same directory is written, flushed,
/// fsynced, then renamed over the destination so a crash never leaves a
/// partially-written key on disk. The hex buffer is zeroized once written.
fn write_key_atomic(path: &Path, signing: &SigningKey) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("vouch_key"),
        std::process::id()
    ));

    let mut keypair_bytes = [0u8; 64];
    keypair_bytes[..32].copy_from_slice(&signing.to_bytes());
    keypair_bytes[32..].copy_from_slice(signing.verifying_key().as_bytes());
    let mut hex_key = hex::encode(keypair_bytes);
    keypair_bytes.zeroize();

    let result = (|| -> std::io::Result<()> {
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(hex_key.as_bytes())?;
        f.sync_all()
    })();
    hex_key.zeroize();
    result?;

    set_owner_only_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_on_first_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".vouch_key");
        let signer = Signer::load_or_generate(&path).unwrap();
        assert!(path.exists());
        assert_eq!(signer.public_key_hex().len(), 64);
    }

    #[test]
    fn reloads_same_key_on_second_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".vouch_key");
        let first = Signer::load_or_generate(&path).unwrap();
        let second = Signer::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let dir = tempdir().unwrap();
        let signer = Signer::load_or_generate(dir.path().join(".vouch_key")).unwrap();
        let msg = b"ledger event hash";
        let sig = signer.sign(msg);
        assert!(Signer::verify(&signer.public_key(), msg, &sig));
    }

    #[test]
    fn rotate_backs_up_old_key_and_changes_public_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".vouch_key");
        let signer = Signer::load_or_generate(&path).unwrap();
        let old_pub = signer.public_key();
        let old_pub_hex = signer.public_key_hex();

        let (returned_old, returned_new) = signer.rotate().unwrap();
        assert_eq!(returned_old, old_pub_hex);
        assert_ne!(returned_new, old_pub_hex);
        assert_ne!(signer.public_key_hex(), old_pub_hex);
        assert!(dir.path().join(".vouch_key.old").exists());

        // Old key's signatures must still verify against the old public key.
        let msg = b"pre-rotation event";
        let sig_under_old = ed25519_dalek::Signer::sign(
            &parse_signing_key(&path.with_extension("old"), &std::fs::read_to_string(dir.path().join(".vouch_key.old")).unwrap()).unwrap(),
            msg,
        );
        assert!(Signer::verify(&old_pub, msg, &sig_under_old.to_bytes()));
    }

    #[test]
    fn unix_permissions_are_owner_only() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempdir().unwrap();
            let path = dir.path().join(".vouch_key");
            Signer::load_or_generate(&path).unwrap();
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}

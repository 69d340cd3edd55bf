use roam_types::UserId;
use sha2::{Digest, Sha256};

/// Application-level salt mixed into every per-user key.
pub const KEY_SALT: &str = "roam-local-cache/v1";

/// Derive the AES-256-GCM key for a user's cached messages.
/// SHA-256(user_id || salt); the same id always yields the same key so a
/// cache written before a restart can still be read after it.
pub fn derive_key(user_id: &UserId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_str().as_bytes());
    hasher.update(KEY_SALT.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

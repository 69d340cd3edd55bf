/// Roam Crypto Library
///
/// Obscures message bodies kept in the local cache with AES-256-GCM under a
/// key derived from the owning user's identity. The key is not a negotiated
/// secret: anyone who knows the user id and the app salt can rebuild it, so
/// this protects a single-owner cache on a shared device, nothing more.
///
/// Wire format of an encrypted body: base64(nonce(12) || ciphertext+tag).

pub mod encrypt;
pub mod keys;

pub use encrypt::{DECRYPT_PLACEHOLDER, decrypt, encrypt, looks_encrypted, open_cached};
pub use keys::derive_key;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use roam_types::UserId;
use tracing::debug;

use crate::keys::derive_key;

pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Shortest base64 string that can hold a nonce and an auth tag.
const MIN_ENCODED_LEN: usize = (NONCE_LEN + TAG_LEN).div_ceil(3) * 4;

/// Body shown in place of anything that fails to decrypt.
pub const DECRYPT_PLACEHOLDER: &str = "[Unable to decrypt message]";

/// Encrypt a message body for `user_id`.
/// A fresh random nonce is drawn on every call and prepended to the ciphertext.
pub fn encrypt(plaintext: &str, user_id: &UserId) -> Result<String> {
    let key = derive_key(user_id);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    // Output: [nonce(12)][ciphertext+tag]
    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(output))
}

/// Decrypt a body produced by [`encrypt`].
///
/// Never fails: bad base64, truncated input, a wrong key or tampering all
/// yield [`DECRYPT_PLACEHOLDER`] so a single bad row cannot break a message list.
pub fn decrypt(blob: &str, user_id: &UserId) -> String {
    match try_decrypt(blob, user_id) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            debug!("Substituting placeholder for undecryptable body: {}", e);
            DECRYPT_PLACEHOLDER.to_string()
        }
    }
}

fn try_decrypt(blob: &str, user_id: &UserId) -> Result<String> {
    let data = BASE64.decode(blob.trim())?;
    if data.len() < NONCE_LEN + TAG_LEN {
        bail!("Data too short for nonce and tag");
    }

    let key = derive_key(user_id);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(String::from_utf8(plaintext)?)
}

/// Heuristic: does `text` look like output of [`encrypt`]?
///
/// There is no explicit tag on the ciphertext, so a plaintext message that
/// happens to be long, padded and made only of base64 characters is
/// misclassified. Callers only use this to decide whether to attempt a decrypt,
/// and a wrong guess degrades to the placeholder.
pub fn looks_encrypted(text: &str) -> bool {
    let text = text.trim();
    if text.len() < MIN_ENCODED_LEN || text.len() % 4 != 0 {
        return false;
    }

    let body = text.trim_end_matches('=');
    if text.len() - body.len() > 2 {
        return false;
    }
    body.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Read a stored or cached body: decrypt it when it looks encrypted, otherwise
/// return it untouched (plaintext system messages travel as-is).
pub fn open_cached(text: &str, user_id: &UserId) -> String {
    if looks_encrypted(text) {
        decrypt(text, user_id)
    } else {
        text.to_string()
    }
}

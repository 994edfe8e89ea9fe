//! AES-256-GCM sealing of the credential blob.
//!
//! Layout of the decoded file contents:
//!
//! ```text
//! nonce (12 bytes) || auth tag (16 bytes) || ciphertext
//! ```
//!
//! The whole thing is base64 (standard alphabet) encoded on disk. A fresh
//! random nonce is drawn for every write.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag
const TAG_SIZE: usize = 16;

/// Encrypts plaintext and returns the base64 encoded `nonce || tag || ciphertext`.
///
/// # Security
/// - Uses a cryptographically secure random nonce (never reuse)
/// - Authenticated encryption (tampering detected)
/// - Key must be kept secret and never stored on disk
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // aes-gcm appends the tag to the ciphertext
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);

    Ok(BASE64.encode(out))
}

/// Reverses [`seal`].
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decrypted plaintext
/// * `Err` - Bad base64, truncated input, wrong key, or tampered bytes
pub fn open(encoded: &str, key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let bytes = BASE64
        .decode(encoded.trim())
        .context("Failed to decode sealed blob")?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(anyhow!(
            "Sealed blob too short: expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            bytes.len()
        ));
    }

    let (nonce, rest) = bytes.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let mut sealed = Vec::with_capacity(rest.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [7u8; 32];
        let plaintext = br#"{"rcc":{"token":{"access_token":"abc"}}}"#;

        let sealed = seal(plaintext, &key).expect("Encryption failed");
        assert!(!sealed.contains("access_token"));

        let opened = open(&sealed, &key).expect("Decryption failed");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_layout() {
        let key = [0u8; 32];
        let sealed = seal(b"hello", &key).unwrap();
        let bytes = BASE64.decode(sealed).unwrap();

        assert_eq!(bytes.len(), NONCE_SIZE + TAG_SIZE + 5);
    }

    #[test]
    fn test_different_nonces() {
        let key = [0u8; 32];

        let sealed1 = seal(b"same-plaintext", &key).unwrap();
        let sealed2 = seal(b"same-plaintext", &key).unwrap();

        assert_ne!(sealed1, sealed2);
        assert_eq!(open(&sealed1, &key).unwrap(), b"same-plaintext");
        assert_eq!(open(&sealed2, &key).unwrap(), b"same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(b"secret", &[0u8; 32]).unwrap();
        assert!(open(&sealed, &[1u8; 32]).is_err());
    }

    #[test]
    fn test_every_tampered_byte_fails() {
        let key = [3u8; 32];
        let sealed = seal(b"secret", &key).unwrap();
        let bytes = BASE64.decode(&sealed).unwrap();

        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            assert!(
                open(&BASE64.encode(&tampered), &key).is_err(),
                "flipping byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_truncated_fails() {
        let key = [0u8; 32];
        assert!(open(&BASE64.encode([0u8; 20]), &key).is_err());
        assert!(open("not base64 at all!", &key).is_err());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(seal(b"x", &[0u8; 16]).is_err());
        assert!(open("AAAA", &[0u8; 64]).is_err());
    }
}

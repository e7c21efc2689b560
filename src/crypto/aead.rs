//! AES-256-GCM authenticated encryption.
//!
//! # Wire Format
//!
//! ```text
//! base64( ciphertext || 16-byte auth tag )
//! ```
//!
//! The 12-byte IV and the associated data travel next to the ciphertext in
//! the provider's JSON envelopes (`nonce`, `associated_data`), never inside it.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::{PayError, Result};

/// Required key length in bytes (the merchant's 32-character APIv3 key).
pub const KEY_SIZE: usize = 32;

/// Required IV length in bytes.
pub const IV_SIZE: usize = 12;

/// Size of the trailing authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

fn cipher(key: &[u8], iv: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(PayError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() });
    }
    if iv.len() != IV_SIZE {
        return Err(PayError::CryptoError(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| PayError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

/// Encrypts `plaintext` and returns `base64(ciphertext || tag)`.
///
/// # Errors
///
/// Returns [`PayError::InvalidKeyLength`] unless `key` is 32 bytes, and
/// [`PayError::CryptoError`] unless `iv` is 12 bytes.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::crypto::aead;
///
/// # fn example() -> wechatpay_bridge::error::Result<()> {
/// let key = b"0123456789abcdef0123456789abcdef";
/// let sealed = aead::encrypt(key, b"0123456789ab", b"hello", b"certificate")?;
/// let opened = aead::decrypt(key, b"0123456789ab", &sealed, b"certificate")?;
/// assert_eq!(opened, b"hello");
/// # Ok(())
/// # }
/// ```
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let sealed = cipher(key, iv)?
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| PayError::CryptoError("aes-256-gcm encryption failed".to_owned()))?;
    Ok(STANDARD.encode(sealed))
}

/// Decrypts `base64(ciphertext || tag)`.
///
/// # Errors
///
/// - [`PayError::InvalidKeyLength`] / [`PayError::CryptoError`] for bad key or IV sizes
/// - [`PayError::Format`] when the input is not base64
/// - [`PayError::AuthenticationFailed`] when the tag does not validate, including
///   inputs shorter than the tag itself
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &str, aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key, iv)?;
    let sealed = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| PayError::Format(format!("aead ciphertext is not base64: {e}")))?;
    if sealed.len() < TAG_SIZE {
        return Err(PayError::AuthenticationFailed);
    }
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: &sealed, aad })
        .map_err(|_| PayError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
    const IV: &[u8] = b"0123456789ab";

    #[test]
    fn test_known_answer() {
        let sealed = encrypt(KEY, IV, b"hello wechatpay", b"certificate").unwrap();
        assert_eq!(sealed, "8cyLVizq736WbULJw2UFICyJIrZksUQnnGU0OXXtlA==");
        assert_eq!(decrypt(KEY, IV, &sealed, b"certificate").unwrap(), b"hello wechatpay");
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let sealed = encrypt(KEY, IV, b"", b"").unwrap();
        // tag only
        assert_eq!(STANDARD.decode(&sealed).unwrap().len(), TAG_SIZE);
        assert!(decrypt(KEY, IV, &sealed, b"").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_aad_fails_authentication() {
        let sealed = encrypt(KEY, IV, b"payload", b"transaction").unwrap();
        assert!(matches!(
            decrypt(KEY, IV, &sealed, b"certificate"),
            Err(PayError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_fails_authentication() {
        let sealed = STANDARD.decode(encrypt(KEY, IV, b"payload", b"").unwrap()).unwrap();
        let short = STANDARD.encode(&sealed[..TAG_SIZE - 1]);
        assert!(matches!(decrypt(KEY, IV, &short, b""), Err(PayError::AuthenticationFailed)));

        let chopped = STANDARD.encode(&sealed[1..]);
        assert!(matches!(decrypt(KEY, IV, &chopped, b""), Err(PayError::AuthenticationFailed)));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            encrypt(b"short", IV, b"x", b""),
            Err(PayError::InvalidKeyLength { expected: 32, actual: 5 })
        ));
        assert!(matches!(
            decrypt(&[0u8; 16], IV, "AAAA", b""),
            Err(PayError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_invalid_iv_length() {
        assert!(matches!(encrypt(KEY, b"short", b"x", b""), Err(PayError::CryptoError(_))));
    }

    #[test]
    fn test_non_base64_input() {
        assert!(matches!(decrypt(KEY, IV, "not base64!", b""), Err(PayError::Format(_))));
    }
}

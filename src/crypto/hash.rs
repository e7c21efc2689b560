//! Digests, keyed legacy signing primitives and timing-safe comparison.
//!
//! The legacy protocol signs `"{payload}&key={secret}"`: [`keyed`] hashes that
//! string with MD5, [`hmac`] runs it through HMAC keyed with the same secret.
//! Both return lowercase hex; callers uppercase for the wire.

use ::hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{PayError, Result};

/// Digest algorithms understood by [`digest`] and [`hmac`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// MD5 (legacy signatures only).
    Md5,
    /// SHA-1 (bill download digests).
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashKind {
    /// Parses the provider's algorithm names (`MD5`, `SHA1`, `SHA256`), case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] for any other name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            other => Err(PayError::CryptoError(format!("unsupported hash algorithm: {other}"))),
        }
    }
}

/// Computes an unkeyed digest as lowercase hex.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::crypto::hash::{HashKind, digest};
///
/// assert_eq!(digest(HashKind::Md5, b"abc"), "900150983cd24fb0d6963f7d28e17f72");
/// ```
#[must_use]
pub fn digest(kind: HashKind, data: &[u8]) -> String {
    match kind {
        HashKind::Md5 => format!("{:x}", md5::compute(data)),
        HashKind::Sha1 => hex::encode(Sha1::digest(data)),
        HashKind::Sha256 => hex::encode(Sha256::digest(data)),
    }
}

/// Legacy keyed MD5: `md5("{data}&key={key}")` as lowercase hex.
#[must_use]
pub fn keyed(data: &str, key: &str) -> String {
    digest(HashKind::Md5, format!("{data}&key={key}").as_bytes())
}

/// Legacy HMAC: `HMAC(key, "{data}&key={key}")` as lowercase hex.
///
/// # Errors
///
/// Returns [`PayError::CryptoError`] for [`HashKind::Md5`], which has no HMAC
/// variant in the protocol.
pub fn hmac(data: &str, key: &str, kind: HashKind) -> Result<String> {
    let message = format!("{data}&key={key}");
    match kind {
        HashKind::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                .map_err(|e| PayError::CryptoError(format!("hmac key: {e}")))?;
            mac.update(message.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
        HashKind::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
                .map_err(|e| PayError::CryptoError(format!("hmac key: {e}")))?;
            mac.update(message.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
        HashKind::Md5 => Err(PayError::CryptoError("HMAC-MD5 is not supported".to_owned())),
    }
}

/// Compares two byte strings in time independent of the first mismatch position.
///
/// Inputs of different lengths compare unequal without touching their contents.
/// Anything that is not byte-like is rejected at compile time:
///
/// ```compile_fail
/// use wechatpay_bridge::crypto::constant_time_equals;
///
/// constant_time_equals("known", true);
/// ```
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::crypto::constant_time_equals;
///
/// assert!(constant_time_equals("ABC", "ABC"));
/// assert!(!constant_time_equals("ABC", "ABD"));
/// assert!(!constant_time_equals("ABC", "ABCD"));
/// ```
#[must_use]
pub fn constant_time_equals(known: impl AsRef<[u8]>, user: impl AsRef<[u8]>) -> bool {
    let (known, user) = (known.as_ref(), user.as_ref());
    if known.len() != user.len() {
        return false;
    }
    known.ct_eq(user).into()
}

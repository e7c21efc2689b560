//! Error types for WeChat Pay request signing and response verification.
//!
//! Every failure the pipeline can produce is a variant of [`PayError`].
//! All errors implement the standard [`std::error::Error`] trait via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Caller misuse** ([`PayError::Precondition`], [`PayError::PayloadType`]): raised before
//!   any network activity
//! - **Remote business failures** ([`PayError::BusinessFailure`]): the provider answered, but
//!   reported a logical failure through its status fields
//! - **Integrity failures** ([`PayError::SignatureMismatch`], [`PayError::SignatureRejected`],
//!   [`PayError::UnknownSigner`], [`PayError::HeadersIncomplete`]): the response could not be
//!   proven to come from the provider and must not be trusted
//! - **Cryptographic failures** ([`PayError::AuthenticationFailed`],
//!   [`PayError::InvalidKeyLength`], [`PayError::CryptoError`])
//! - **Ambient failures** ([`PayError::Format`], [`PayError::ConfigError`],
//!   [`PayError::TransportError`], [`PayError::HttpError`])
//!
//! # Examples
//!
//! ```
//! use wechatpay_bridge::error::{PayError, Result};
//!
//! fn require_mchid(mchid: &str) -> Result<&str> {
//!     if mchid.is_empty() {
//!         return Err(PayError::Precondition("merchant id is required".to_owned()));
//!     }
//!     Ok(mchid)
//! }
//!
//! assert!(require_mchid("").is_err());
//! ```

use thiserror::Error;

/// Result type alias for signing and verification operations.
///
/// All fallible functions in this crate return this type.
pub type Result<T> = std::result::Result<T, PayError>;

/// Errors that can occur while signing requests or verifying responses.
///
/// Verification failures never degrade into a boolean: a response that fails
/// any integrity check surfaces as one of the integrity variants and its body
/// is never handed to the caller as trusted data.
///
/// # Error Recovery
///
/// - **Precondition errors**: fix the construction arguments; retrying is pointless
/// - **Business failures**: inspect `code`/`message`; the decoded body rides along in `raw`
/// - **Integrity failures**: refresh the trusted certificate set, then retry once
/// - **Transport errors** ([`HttpError`](Self::HttpError)): retry with backoff
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum PayError {
    /// Malformed construction arguments.
    ///
    /// Raised synchronously while building a signer, verifier or client, or when
    /// the bound identity cannot satisfy a request (for example HMAC-SHA256
    /// requested without a shared secret).
    ///
    /// # Recovery
    ///
    /// Fix the configuration. These errors never depend on remote state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Payload has the wrong shape for the active protocol mode.
    ///
    /// For example a non-object body on a signed legacy POST.
    #[error("unsupported payload: {0}")]
    PayloadType(String),

    /// The provider reported a logical failure through its status fields.
    ///
    /// The decoded response body is preserved in `raw` for inspection.
    #[error("business failure [{code}]: {message}")]
    BusinessFailure {
        /// Remote error code (or the name of the failing status field).
        code: String,
        /// Human readable remote message.
        message: String,
        /// Decoded response body.
        raw: Box<serde_json::Value>,
    },

    /// A legacy response carried a `sign` that does not match the recomputed one.
    #[error("legacy signature mismatch: expected {expected}, got {actual}")]
    SignatureMismatch {
        /// Signature recomputed locally with the shared secret.
        expected: String,
        /// Signature carried by the response.
        actual: String,
    },

    /// A modern response signature did not verify against the trusted public key.
    ///
    /// # Recovery
    ///
    /// Do not use the response. The carried fields identify the exact
    /// response for diagnosis with the provider.
    #[error(
        "response signature rejected (timestamp={timestamp}, nonce={nonce}, serial={serial}, signature={signature})"
    )]
    SignatureRejected {
        /// `Wechatpay-Timestamp` header value.
        timestamp: String,
        /// `Wechatpay-Nonce` header value.
        nonce: String,
        /// `Wechatpay-Signature` header value.
        signature: String,
        /// `Wechatpay-Serial` header value.
        serial: String,
    },

    /// The response was signed by a certificate serial that is not trusted.
    ///
    /// # Recovery
    ///
    /// Download the provider's current certificates, register them, then retry.
    #[error("unknown signer certificate serial: {0}")]
    UnknownSigner(String),

    /// One or more signature headers were missing from the response.
    #[error("response is missing signature headers: {}", .0.join(", "))]
    HeadersIncomplete(Vec<String>),

    /// AEAD authentication tag did not validate.
    ///
    /// Covers wrong key, wrong associated data, tampered or truncated ciphertext.
    #[error("authenticated decryption failed")]
    AuthenticationFailed,

    /// Symmetric key has the wrong length for the algorithm.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length in bytes.
        expected: usize,
        /// Supplied key length in bytes.
        actual: usize,
    },

    /// Low-level cryptographic operation failed (key parsing, RSA padding, ...).
    #[error("cryptographic operation failed: {0}")]
    CryptoError(String),

    /// A wire payload could not be decoded or encoded (XML, JSON, CSV, base64).
    #[error("malformed payload: {0}")]
    Format(String),

    /// Configuration file is invalid.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Request rejected before it reached the network.
    #[error("transport error: {0}")]
    TransportError(String),

    /// HTTP request failed.
    ///
    /// Wraps [`reqwest::Error`]: timeouts, refused connections, TLS failures.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl PayError {
    /// Returns true for failures that mean the response cannot be trusted.
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::SignatureMismatch { .. }
                | Self::SignatureRejected { .. }
                | Self::UnknownSigner(_)
                | Self::HeadersIncomplete(_)
        )
    }

    /// Returns true when the provider reported a logical failure.
    #[must_use]
    pub const fn is_business_failure(&self) -> bool {
        matches!(self, Self::BusinessFailure { .. })
    }

    pub(crate) fn business(
        code: impl Into<String>,
        message: impl Into<String>,
        raw: serde_json::Value,
    ) -> Self {
        Self::BusinessFailure { code: code.into(), message: message.into(), raw: Box::new(raw) }
    }
}

impl From<serde_json::Error> for PayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_precondition_display() {
        let error = PayError::Precondition("merchant id is required".into());
        assert_eq!(error.to_string(), "precondition failed: merchant id is required");
    }

    #[test]
    fn test_headers_incomplete_names_every_header() {
        let error = PayError::HeadersIncomplete(vec![
            "Wechatpay-Nonce".to_owned(),
            "Wechatpay-Serial".to_owned(),
        ]);
        assert_eq!(
            error.to_string(),
            "response is missing signature headers: Wechatpay-Nonce, Wechatpay-Serial"
        );
        assert!(error.is_integrity_failure());
    }

    #[test]
    fn test_business_failure_keeps_raw_body() {
        let error = PayError::business("ORDERNOTEXIST", "order does not exist", json!({"a": "1"}));
        assert!(error.is_business_failure());
        assert!(!error.is_integrity_failure());
        match error {
            PayError::BusinessFailure { raw, .. } => assert_eq!(raw["a"], "1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_key_length_display() {
        let error = PayError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(error.to_string(), "invalid key length: expected 32 bytes, got 16");
    }

    #[test]
    fn test_json_error_maps_to_format() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(PayError::from(err), PayError::Format(_)));
    }
}

//! Stateless cryptographic primitives used by both protocol generations.
//!
//! - [`aead`]: AES-256-GCM with the provider's `ciphertext || tag` base64 layout,
//!   used for certificate bundles and callback resources
//! - [`rsa`]: SHA256-RSA (PKCS#1 v1.5) signatures and OAEP encryption of
//!   sensitive fields
//! - [`hash`]: digests, the legacy keyed MD5 / HMAC-SHA256 signing primitives and
//!   a timing-safe comparator
//!
//! Nothing in this module holds state; keys are passed in on every call.

pub mod aead;
pub mod hash;
pub mod rsa;

pub use hash::{HashKind, constant_time_equals};
pub use rsa::{KeyMaterial, PrivateKey, PublicKey};

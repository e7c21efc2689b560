//! RSA key handling, SHA256-RSA signatures and OAEP encryption.
//!
//! Private keys load from PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1
//! (`BEGIN RSA PRIVATE KEY`) PEM, or from raw DER. Public keys load from SPKI
//! (`BEGIN PUBLIC KEY`), PKCS#1 (`BEGIN RSA PUBLIC KEY`) or an X.509
//! certificate (`BEGIN CERTIFICATE`).

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::{
    Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    traits::PublicKeyParts,
};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use x509_cert::{
    Certificate,
    der::{DecodePem, Encode},
};

use crate::error::{PayError, Result};

/// Private key material as supplied by the caller.
///
/// The merchant key may arrive as PEM text or as DER bytes.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// PEM-encoded text.
    Pem(String),
    /// DER-encoded bytes.
    Der(Vec<u8>),
}

impl KeyMaterial {
    /// Returns true when no key bytes were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Pem(pem) => pem.trim().is_empty(),
            Self::Der(der) => der.is_empty(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem(_) => f.write_str("KeyMaterial::Pem(<redacted>)"),
            Self::Der(_) => f.write_str("KeyMaterial::Der(<redacted>)"),
        }
    }
}

impl From<&str> for KeyMaterial {
    fn from(pem: &str) -> Self {
        Self::Pem(pem.to_owned())
    }
}

impl From<String> for KeyMaterial {
    fn from(pem: String) -> Self {
        Self::Pem(pem)
    }
}

impl From<&[u8]> for KeyMaterial {
    fn from(der: &[u8]) -> Self {
        Self::Der(der.to_vec())
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(der: Vec<u8>) -> Self {
        Self::Der(der)
    }
}

/// RSA private key used for request signing and sensitive-field decryption.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Parses a PKCS#8 or PKCS#1 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if the PEM cannot be decoded.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let inner = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| PayError::CryptoError(format!("invalid PKCS#1 private key: {e}")))?
        } else {
            RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| PayError::CryptoError(format!("invalid PKCS#8 private key: {e}")))?
        };
        Ok(Self { inner })
    }

    /// Parses a PKCS#8 or PKCS#1 DER private key.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if neither encoding matches.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(der))
            .map(|inner| Self { inner })
            .map_err(|e| PayError::CryptoError(format!("invalid DER private key: {e}")))
    }

    /// Parses either form of [`KeyMaterial`].
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] for empty material and
    /// [`PayError::CryptoError`] for undecodable material.
    pub fn from_material(material: &KeyMaterial) -> Result<Self> {
        if material.is_empty() {
            return Err(PayError::Precondition("private key is empty".to_owned()));
        }
        match material {
            KeyMaterial::Pem(pem) => Self::from_pem(pem),
            KeyMaterial::Der(der) => Self::from_der(der),
        }
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey { inner: self.inner.to_public_key() }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").field("bits", &(self.inner.size() * 8)).finish_non_exhaustive()
    }
}

/// RSA public key used for response verification and sensitive-field encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Parses an SPKI or PKCS#1 public key, or the key inside an X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if the PEM cannot be decoded.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if pem.contains("BEGIN CERTIFICATE") {
            return parse_certificate(pem).map(|(key, _)| key);
        }
        let inner = if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem)
                .map_err(|e| PayError::CryptoError(format!("invalid PKCS#1 public key: {e}")))?
        } else {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| PayError::CryptoError(format!("invalid public key: {e}")))?
        };
        Ok(Self { inner })
    }
}

/// Parses an X.509 certificate, returning its RSA key and uppercase hex serial.
///
/// # Errors
///
/// Returns [`PayError::CryptoError`] if the certificate or its key cannot be decoded.
pub fn parse_certificate(pem: &str) -> Result<(PublicKey, String)> {
    let cert = Certificate::from_pem(pem.trim().as_bytes())
        .map_err(|e| PayError::CryptoError(format!("invalid certificate: {e}")))?;
    let tbs = &cert.tbs_certificate;
    let spki = tbs
        .subject_public_key_info
        .to_der()
        .map_err(|e| PayError::CryptoError(format!("invalid certificate key: {e}")))?;
    let inner = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| PayError::CryptoError(format!("certificate key is not RSA: {e}")))?;

    // DER integers carry a leading zero when the high bit is set
    let serial = match tbs.serial_number.as_bytes() {
        [0, rest @ ..] if !rest.is_empty() => rest,
        bytes => bytes,
    };
    Ok((PublicKey { inner }, hex::encode_upper(serial)))
}

/// Signs `message` with SHA256-RSA (PKCS#1 v1.5) and returns base64.
///
/// # Errors
///
/// Returns [`PayError::CryptoError`] if the RSA operation fails.
pub fn sign(message: &[u8], key: &PrivateKey) -> Result<String> {
    let digest = Sha256::digest(message);
    let signature = key
        .inner
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| PayError::CryptoError(format!("rsa signing failed: {e}")))?;
    Ok(STANDARD.encode(signature))
}

/// Verifies a base64 SHA256-RSA signature over `message`.
///
/// A well-formed signature that does not match yields `Ok(false)`.
///
/// # Errors
///
/// Returns [`PayError::Format`] if `signature` is not base64.
pub fn verify(message: &[u8], signature: &str, key: &PublicKey) -> Result<bool> {
    let signature = STANDARD
        .decode(signature.trim())
        .map_err(|e| PayError::Format(format!("signature is not base64: {e}")))?;
    let digest = Sha256::digest(message);
    Ok(key.inner.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature).is_ok())
}

/// Encrypts a small payload with RSA-OAEP (SHA-1) and returns base64.
///
/// # Errors
///
/// Returns [`PayError::CryptoError`] if the payload is too long for the key.
pub fn encrypt(plaintext: &[u8], key: &PublicKey) -> Result<String> {
    let sealed = key
        .inner
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), plaintext)
        .map_err(|e| PayError::CryptoError(format!("rsa encryption failed: {e}")))?;
    Ok(STANDARD.encode(sealed))
}

/// Decrypts a base64 RSA-OAEP (SHA-1) ciphertext.
///
/// # Errors
///
/// Returns [`PayError::Format`] for non-base64 input and
/// [`PayError::CryptoError`] if decryption fails.
pub fn decrypt(ciphertext: &str, key: &PrivateKey) -> Result<Vec<u8>> {
    let sealed = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| PayError::Format(format!("ciphertext is not base64: {e}")))?;
    key.inner
        .decrypt(Oaep::new::<Sha1>(), &sealed)
        .map_err(|e| PayError::CryptoError(format!("rsa decryption failed: {e}")))
}

//! Trusted provider certificates keyed by serial number.
//!
//! The registry is filled from outside (configuration, a certificate download
//! job) and read by [`ModernInterceptor`](super::ModernInterceptor) on every
//! verification. Clones share one store, so a rotation job holding a clone
//! makes new serials visible to every interceptor immediately.
//!
//! Entries are add-or-replace per serial and never removed automatically.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use serde::Deserialize;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::{
    crypto::{
        aead,
        rsa::{self, PublicKey},
    },
    error::{PayError, Result},
};

/// The only AEAD algorithm the provider uses.
pub const AEAD_AES_256_GCM: &str = "AEAD_AES_256_GCM";

/// A provider public key, with the serial it is registered under.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustedCertificate {
    serial: String,
    public_key: PublicKey,
    pem: String,
}

impl TrustedCertificate {
    /// Parses an X.509 certificate and takes the serial from it.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if the certificate cannot be parsed.
    pub fn from_certificate(pem: &str) -> Result<Self> {
        let (public_key, serial) = rsa::parse_certificate(pem)?;
        Ok(Self { serial, public_key, pem: pem.to_owned() })
    }

    /// Parses any supported PEM (SPKI, PKCS#1 or X.509) under an explicit serial.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] for an empty serial and
    /// [`PayError::CryptoError`] if the PEM cannot be parsed.
    pub fn from_pem(serial: &str, pem: &str) -> Result<Self> {
        let serial = normalize(serial)?;
        let public_key = PublicKey::from_pem(pem)?;
        Ok(Self { serial, public_key, pem: pem.to_owned() })
    }

    /// Serial number (uppercase hex).
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Public key used for verification and sensitive-field encryption.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Original PEM text.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }
}

impl fmt::Debug for TrustedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedCertificate").field("serial", &self.serial).finish_non_exhaustive()
    }
}

fn normalize(serial: &str) -> Result<String> {
    let serial = serial.trim();
    if serial.is_empty() {
        return Err(PayError::Precondition("certificate serial is empty".to_owned()));
    }
    Ok(serial.to_ascii_uppercase())
}

/// AEAD-encrypted payload as delivered by the provider.
///
/// Shared by certificate listings and callback notifications.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedResource {
    /// Always [`AEAD_AES_256_GCM`].
    pub algorithm: String,
    /// Base64 `ciphertext || tag`.
    pub ciphertext: String,
    /// 12-character IV.
    pub nonce: String,
    /// Associated data, possibly empty.
    #[serde(default)]
    pub associated_data: String,
    /// Type of the plaintext object, when the provider names it.
    #[serde(default)]
    pub original_type: Option<String>,
}

impl EncryptedResource {
    /// Decrypts the resource with the merchant's APIv3 key.
    ///
    /// # Errors
    ///
    /// - [`PayError::CryptoError`] for an algorithm other than AES-256-GCM
    /// - [`PayError::InvalidKeyLength`] unless the key is 32 bytes
    /// - [`PayError::AuthenticationFailed`] for a wrong key or tampered data
    pub fn decrypt(&self, apiv3_key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if self.algorithm != AEAD_AES_256_GCM {
            return Err(PayError::CryptoError(format!(
                "unsupported resource algorithm: {}",
                self.algorithm
            )));
        }
        aead::decrypt(
            apiv3_key,
            self.nonce.as_bytes(),
            &self.ciphertext,
            self.associated_data.as_bytes(),
        )
        .map(Zeroizing::new)
    }
}

/// One entry of the provider's certificate listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedCertificate {
    /// Serial of the wrapped certificate.
    pub serial_no: String,
    /// Start of validity, as sent by the provider.
    #[serde(default)]
    pub effective_time: String,
    /// End of validity, as sent by the provider.
    #[serde(default)]
    pub expire_time: String,
    /// The encrypted PEM.
    pub encrypt_certificate: EncryptedResource,
}

/// The provider's certificate listing body: `{"data": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateListing {
    /// Listed certificates.
    pub data: Vec<EncryptedCertificate>,
}

type Store = HashMap<String, Arc<TrustedCertificate>>;

/// Shared, add-only mapping from serial number to trusted public key.
///
/// Lookups normalize the serial to uppercase.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::modern::CertificateRegistry;
///
/// let registry = CertificateRegistry::new();
/// let rotation = registry.clone();
/// assert!(registry.is_empty());
/// assert!(rotation.get("5157F09EFDC096DE15EBE81A47057A7232F1B8E1").is_none());
/// ```
#[derive(Clone, Default)]
pub struct CertificateRegistry {
    store: Arc<RwLock<Store>>,
}

impl fmt::Debug for CertificateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRegistry").field("serials", &self.serials()).finish()
    }
}

impl CertificateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&self, certificate: TrustedCertificate) {
        let serial = certificate.serial.clone();
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(serial.clone(), Arc::new(certificate));
        debug!(serial = %serial, "trusted certificate registered");
    }

    /// Parses and registers a public key or certificate PEM under `serial`.
    ///
    /// # Errors
    ///
    /// See [`TrustedCertificate::from_pem`].
    pub fn insert_pem(&self, serial: &str, pem: &str) -> Result<()> {
        self.insert(TrustedCertificate::from_pem(serial, pem)?);
        Ok(())
    }

    /// Parses and registers an X.509 certificate under its own serial.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if the certificate cannot be parsed.
    pub fn insert_certificate(&self, pem: &str) -> Result<String> {
        let certificate = TrustedCertificate::from_certificate(pem)?;
        let serial = certificate.serial.clone();
        self.insert(certificate);
        Ok(serial)
    }

    /// Looks up the entry for `serial`.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<Arc<TrustedCertificate>> {
        let serial = serial.trim().to_ascii_uppercase();
        self.store.read().unwrap_or_else(PoisonError::into_inner).get(&serial).cloned()
    }

    /// Returns true if `serial` is registered.
    #[must_use]
    pub fn contains(&self, serial: &str) -> bool {
        self.get(serial).is_some()
    }

    /// Registered serials, sorted.
    #[must_use]
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<_> =
            self.store.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        serials.sort_unstable();
        serials
    }

    /// Number of registered serials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decrypts one listing entry and registers it.
    ///
    /// Returns the registered serial.
    ///
    /// # Errors
    ///
    /// - [`PayError::AuthenticationFailed`] for a wrong APIv3 key or tampered entry
    /// - [`PayError::CryptoError`] if the decrypted certificate cannot be parsed
    ///   or its serial differs from `serial_no`
    #[instrument(skip(self, entry, apiv3_key), fields(serial = %entry.serial_no))]
    pub fn import_encrypted(&self, entry: &EncryptedCertificate, apiv3_key: &[u8]) -> Result<String> {
        let plaintext = entry.encrypt_certificate.decrypt(apiv3_key)?;
        let pem = std::str::from_utf8(&plaintext)
            .map_err(|e| PayError::CryptoError(format!("certificate is not UTF-8: {e}")))?;
        let certificate = TrustedCertificate::from_certificate(pem)?;
        if !certificate.serial.eq_ignore_ascii_case(entry.serial_no.trim()) {
            return Err(PayError::CryptoError(format!(
                "certificate serial {} does not match listing serial {}",
                certificate.serial, entry.serial_no
            )));
        }
        let serial = certificate.serial.clone();
        self.insert(certificate);
        Ok(serial)
    }

    /// Decrypts and registers every entry of a listing body.
    ///
    /// Entries are imported in order; the first failure stops the import and
    /// leaves earlier entries registered.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Format`] for a malformed listing, otherwise as
    /// [`import_encrypted`](Self::import_encrypted).
    pub fn import_listing(&self, body: &[u8], apiv3_key: &[u8]) -> Result<Vec<String>> {
        let listing: CertificateListing = serde_json::from_slice(body)?;
        listing.data.iter().map(|entry| self.import_encrypted(entry, apiv3_key)).collect()
    }

    /// Encrypts a sensitive field for the holder of `serial`.
    ///
    /// The request carrying the value must name the same serial in its
    /// `Wechatpay-Serial` header.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::UnknownSigner`] for an unregistered serial.
    pub fn encrypt_sensitive(&self, serial: &str, plaintext: &str) -> Result<String> {
        let certificate = self.get(serial).ok_or_else(|| PayError::UnknownSigner(serial.to_owned()))?;
        rsa::encrypt(plaintext.as_bytes(), &certificate.public_key)
    }
}

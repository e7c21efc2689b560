//! Modern (APIv3) protocol: JSON bodies signed with the merchant's RSA key.
//!
//! # Request
//!
//! ```text
//! Authorization: WECHATPAY2-SHA256-RSA2048 mchid="..",nonce_str="..",signature="..",timestamp="..",serial_no=".."
//! signature = base64( SHA256withRSA( METHOD\nPATH?QUERY\nTIMESTAMP\nNONCE\nBODY\n ) )
//! ```
//!
//! # Response
//!
//! The provider signs `TIMESTAMP\nNONCE\nBODY\n` with the key of the
//! certificate named in `Wechatpay-Serial`:
//!
//! ```text
//! AwaitHeaders ─▶ HeadersComplete ─▶ KeyResolved ─▶ SignatureChecked ─▶ Accepted
//!      │                 │                │
//!      ▼                 ▼                ▼
//! HeadersIncomplete  UnknownSigner   SignatureRejected
//! ```
//!
//! Every arrow is a terminal failure point; nothing is retried here.

pub mod certificates;

use std::fmt;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize as _;
use serde_json::Value;
use tracing::{debug, instrument, warn};

pub use self::certificates::{
    CertificateListing, CertificateRegistry, EncryptedCertificate, EncryptedResource,
    TrustedCertificate,
};
use crate::{
    crypto::rsa::{self, KeyMaterial, PrivateKey},
    error::{PayError, Result},
    formatter,
    pipeline::{
        InboundResponse, OutboundRequest, Payload, RequestBody, RequestInterceptor,
        ResponseInterceptor, SignedRequest, VerifiedResponse,
    },
};

/// `Wechatpay-Timestamp` response header.
pub const HEADER_TIMESTAMP: &str = "Wechatpay-Timestamp";
/// `Wechatpay-Nonce` response header.
pub const HEADER_NONCE: &str = "Wechatpay-Nonce";
/// `Wechatpay-Serial` response header.
pub const HEADER_SERIAL: &str = "Wechatpay-Serial";
/// `Wechatpay-Signature` response header.
pub const HEADER_SIGNATURE: &str = "Wechatpay-Signature";

const JSON: &str = "application/json";
const USER_AGENT_VALUE: &str = concat!("wechatpay-bridge/", env!("CARGO_PKG_VERSION"));

/// Signature headers of a provider response or callback.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeaders {
    timestamp: String,
    nonce: String,
    serial: String,
    signature: String,
}

impl SignatureHeaders {
    fn read(headers: &HeaderMap) -> Result<Self> {
        let mut missing = Vec::new();
        let mut take = |name: &str| match headers.get(name).and_then(|v| v.to_str().ok()) {
            Some(value) if !value.is_empty() => value.to_owned(),
            _ => {
                missing.push(name.to_owned());
                String::new()
            }
        };
        let parsed = Self {
            timestamp: take(HEADER_TIMESTAMP),
            nonce: take(HEADER_NONCE),
            serial: take(HEADER_SERIAL),
            signature: take(HEADER_SIGNATURE),
        };
        if missing.is_empty() { Ok(parsed) } else { Err(PayError::HeadersIncomplete(missing)) }
    }

    fn rejected(self) -> PayError {
        PayError::SignatureRejected {
            timestamp: self.timestamp,
            nonce: self.nonce,
            signature: self.signature,
            serial: self.serial,
        }
    }
}

/// Signs modern requests and verifies modern responses.
///
/// Built with [`ModernInterceptor::builder`]; every precondition is checked
/// before the interceptor exists.
#[derive(Clone)]
pub struct ModernInterceptor {
    mchid: String,
    serial: String,
    private_key: PrivateKey,
    certificates: CertificateRegistry,
}

impl fmt::Debug for ModernInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModernInterceptor")
            .field("mchid", &self.mchid)
            .field("serial", &self.serial)
            .field("certificates", &self.certificates)
            .finish_non_exhaustive()
    }
}

impl ModernInterceptor {
    /// Starts building an interceptor.
    #[must_use]
    pub fn builder() -> ModernInterceptorBuilder {
        ModernInterceptorBuilder::default()
    }

    /// Bound merchant id.
    #[must_use]
    pub fn mchid(&self) -> &str {
        &self.mchid
    }

    /// Serial of the merchant certificate.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Trusted provider certificates.
    #[must_use]
    pub const fn certificates(&self) -> &CertificateRegistry {
        &self.certificates
    }

    /// Builds the `Authorization` header value for one call.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if RSA signing fails.
    pub fn authorize(&self, method: &str, path: &str, body: &str) -> Result<String> {
        let nonce = formatter::nonce(formatter::NONCE_LENGTH);
        let timestamp = formatter::timestamp();
        let message = formatter::canonical_request(method, path, timestamp, &nonce, body);
        let signature = rsa::sign(message.as_bytes(), &self.private_key)?;
        Ok(formatter::authorization(&self.mchid, &nonce, &signature, timestamp, &self.serial))
    }

    /// Verifies the signature headers against `body`.
    ///
    /// # Errors
    ///
    /// - [`PayError::HeadersIncomplete`] naming every missing header
    /// - [`PayError::UnknownSigner`] if the serial is not trusted
    /// - [`PayError::SignatureRejected`] if the signature does not verify
    #[instrument(skip_all)]
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        let signed = SignatureHeaders::read(headers)?;
        let certificate = self
            .certificates
            .get(&signed.serial)
            .ok_or_else(|| PayError::UnknownSigner(signed.serial.clone()))?;

        let body = std::str::from_utf8(body)
            .map_err(|e| PayError::Format(format!("signed body is not UTF-8: {e}")))?;
        let message = formatter::canonical_response(&signed.timestamp, &signed.nonce, body);

        match rsa::verify(message.as_bytes(), &signed.signature, certificate.public_key()) {
            Ok(true) => {
                debug!(serial = %signed.serial, "response signature verified");
                Ok(())
            }
            Ok(false) | Err(_) => {
                warn!(serial = %signed.serial, timestamp = %signed.timestamp, "response signature rejected");
                Err(signed.rejected())
            }
        }
    }

    /// Verifies an inbound provider callback and decodes its JSON envelope.
    ///
    /// # Errors
    ///
    /// As [`verify`](Self::verify), plus [`PayError::Format`] for a non-JSON body.
    pub fn verify_notification(&self, headers: &HeaderMap, body: &[u8]) -> Result<Value> {
        self.verify(headers, body)?;
        Ok(serde_json::from_slice(body)?)
    }

    /// Decrypts the `resource` object of a callback and decodes it as JSON.
    ///
    /// # Errors
    ///
    /// [`PayError::AuthenticationFailed`] for a wrong key or tampered resource;
    /// [`PayError::Format`] when the resource or its plaintext is malformed.
    pub fn decrypt_resource(resource: &Value, apiv3_key: &[u8]) -> Result<Value> {
        let resource = EncryptedResource::deserialize(resource)?;
        let plaintext = resource.decrypt(apiv3_key)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Decrypts a sensitive field encrypted to the merchant's public key.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::CryptoError`] if decryption fails.
    pub fn decrypt_sensitive(&self, ciphertext: &str) -> Result<String> {
        let plaintext = rsa::decrypt(ciphertext, &self.private_key)?;
        String::from_utf8(plaintext)
            .map_err(|e| PayError::CryptoError(format!("decrypted field is not UTF-8: {e}")))
    }

    fn business_failure(status: u16, data: Value) -> PayError {
        let code = data
            .get("code")
            .and_then(Value::as_str)
            .map_or_else(|| status.to_string(), ToOwned::to_owned);
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {status}"), ToOwned::to_owned);
        PayError::business(code, message, data)
    }
}

impl RequestInterceptor for ModernInterceptor {
    #[instrument(skip(self, request), fields(method = request.method.as_str(), path = %request.path))]
    fn intercept_request(&self, request: OutboundRequest) -> Result<SignedRequest> {
        let OutboundRequest { method, path, mut headers, payload, .. } = request;

        let (signed_body, body) = match payload {
            Payload::Empty => (String::new(), RequestBody::Empty),
            Payload::Json(value) => {
                let text = serde_json::to_string(&value)?;
                (text.clone(), RequestBody::Bytes(text.into_bytes()))
            }
            Payload::Text(text) => (text.clone(), RequestBody::Bytes(text.into_bytes())),
            Payload::Media(media) => (serde_json::to_string(&media.meta)?, RequestBody::Multipart(media)),
        };

        let authorization = self.authorize(method.as_str(), &path, &signed_body)?;
        let authorization = HeaderValue::from_str(&authorization)
            .map_err(|e| PayError::TransportError(format!("invalid authorization header: {e}")))?;

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(AUTHORIZATION, authorization);
        debug!("modern request signed");

        Ok(SignedRequest { method, path, headers, body })
    }
}

impl ResponseInterceptor for ModernInterceptor {
    #[instrument(skip(self, response), fields(status = response.status))]
    fn intercept_response(&self, path: &str, response: InboundResponse) -> Result<VerifiedResponse> {
        self.verify(&response.headers, &response.body).inspect_err(|e| {
            if !(200..300).contains(&response.status) {
                warn!(status = response.status, error = %e, "unverified error response");
            }
        })?;

        let data = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body)?
        };

        if !(200..300).contains(&response.status) {
            return Err(Self::business_failure(response.status, data));
        }

        Ok(VerifiedResponse { status: response.status, headers: response.headers, body: response.body, data })
    }
}

/// Builder for [`ModernInterceptor`].
///
/// # Examples
///
/// ```no_run
/// use wechatpay_bridge::modern::{CertificateRegistry, ModernInterceptor};
///
/// # fn example() -> wechatpay_bridge::error::Result<()> {
/// let registry = CertificateRegistry::new();
/// registry.insert_certificate(&std::fs::read_to_string("wechatpay_platform.pem").unwrap())?;
///
/// let interceptor = ModernInterceptor::builder()
///     .mchid(1_900_000_109)
///     .serial("3775B6A45ACD588826D15E583A95F5DD********")
///     .private_key(std::fs::read_to_string("apiclient_key.pem").unwrap())
///     .certificates(registry)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ModernInterceptorBuilder {
    mchid: Option<String>,
    serial: Option<String>,
    private_key: Option<KeyMaterial>,
    merchant_certificate: Option<String>,
    require_merchant_certificate: bool,
    certificates: Option<CertificateRegistry>,
}

impl fmt::Debug for ModernInterceptorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModernInterceptorBuilder")
            .field("mchid", &self.mchid)
            .field("serial", &self.serial)
            .field("private_key", &self.private_key)
            .field("require_merchant_certificate", &self.require_merchant_certificate)
            .finish_non_exhaustive()
    }
}

impl ModernInterceptorBuilder {
    /// Merchant id, as a string or a number.
    #[must_use]
    pub fn mchid(mut self, mchid: impl ToString) -> Self {
        self.mchid = Some(mchid.to_string());
        self
    }

    /// Serial of the merchant's own certificate.
    #[must_use]
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Merchant private key, as PEM text or DER bytes.
    #[must_use]
    pub fn private_key(mut self, key: impl Into<KeyMaterial>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Merchant's own X.509 certificate.
    ///
    /// When given, its serial must match [`serial`](Self::serial) and its key
    /// must pair with the private key.
    #[must_use]
    pub fn merchant_certificate(mut self, pem: impl Into<String>) -> Self {
        self.merchant_certificate = Some(pem.into());
        self
    }

    /// Makes [`merchant_certificate`](Self::merchant_certificate) mandatory.
    #[must_use]
    pub fn require_merchant_certificate(mut self, required: bool) -> Self {
        self.require_merchant_certificate = required;
        self
    }

    /// Trusted provider certificates. May be empty, but must be set.
    #[must_use]
    pub fn certificates(mut self, registry: CertificateRegistry) -> Self {
        self.certificates = Some(registry);
        self
    }

    /// Checks every precondition and builds the interceptor.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] for the first missing or
    /// inconsistent argument, and [`PayError::CryptoError`] for an
    /// unparsable key or certificate.
    pub fn build(self) -> Result<ModernInterceptor> {
        let mchid = self
            .mchid
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| PayError::Precondition("merchant id is required".to_owned()))?;
        let serial = self
            .serial
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PayError::Precondition("merchant certificate serial is required".to_owned()))?;
        let private_key = self
            .private_key
            .ok_or_else(|| PayError::Precondition("merchant private key is required".to_owned()))?;
        let private_key = PrivateKey::from_material(&private_key)?;

        match self.merchant_certificate {
            Some(pem) => {
                let (public_key, cert_serial) = rsa::parse_certificate(&pem)?;
                if !cert_serial.eq_ignore_ascii_case(serial.trim()) {
                    return Err(PayError::Precondition(format!(
                        "merchant certificate serial {cert_serial} does not match {serial}"
                    )));
                }
                if public_key != private_key.public_key() {
                    return Err(PayError::Precondition(
                        "merchant certificate does not match the private key".to_owned(),
                    ));
                }
            }
            None if self.require_merchant_certificate => {
                return Err(PayError::Precondition("merchant certificate is required".to_owned()));
            }
            None => {}
        }

        let certificates = self
            .certificates
            .ok_or_else(|| PayError::Precondition("trusted certificate registry is required".to_owned()))?;

        Ok(ModernInterceptor { mchid, serial, private_key, certificates })
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde_json::json;

    use super::*;
    use crate::{crypto::aead, pipeline::MediaUpload};

    const MERCHANT_KEY: &str = include_str!("../../tests/fixtures/merchant_private_key.pem");
    const MERCHANT_PUB: &str = include_str!("../../tests/fixtures/merchant_public_key.pem");
    const PLATFORM_KEY: &str = include_str!("../../tests/fixtures/platform_private_key.pem");
    const PLATFORM_CERT: &str = include_str!("../../tests/fixtures/platform_certificate.pem");
    const PLATFORM_SERIAL: &str = "5157F09EFDC096DE15EBE81A47057A7232F1B8E1";

    fn interceptor() -> ModernInterceptor {
        let registry = CertificateRegistry::new();
        registry.insert_certificate(PLATFORM_CERT).unwrap();
        ModernInterceptor::builder()
            .mchid("1900000109")
            .serial("MERCHANTSERIAL")
            .private_key(MERCHANT_KEY)
            .certificates(registry)
            .build()
            .unwrap()
    }

    fn platform_signed(body: &str) -> HeaderMap {
        let key = PrivateKey::from_pem(PLATFORM_KEY).unwrap();
        let message = formatter::canonical_response(1_700_000_000, "platformnonce", body);
        let signature = rsa::sign(message.as_bytes(), &key).unwrap();
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (HEADER_TIMESTAMP, "1700000000".to_owned()),
            (HEADER_NONCE, "platformnonce".to_owned()),
            (HEADER_SERIAL, PLATFORM_SERIAL.to_owned()),
            (HEADER_SIGNATURE, signature),
        ] {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        headers
    }

    fn response(status: u16, headers: HeaderMap, body: &str) -> InboundResponse {
        InboundResponse { status, headers, body: body.as_bytes().to_vec() }
    }

    /// Splits an Authorization header into its quoted fields.
    fn authorization_fields(value: &str) -> Vec<(String, String)> {
        let params = value.strip_prefix("WECHATPAY2-SHA256-RSA2048 ").unwrap();
        params
            .split(',')
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap();
                (key.to_owned(), value.trim_matches('"').to_owned())
            })
            .collect()
    }

    #[test]
    fn test_builder_preconditions() {
        let registry = CertificateRegistry::new;
        let err = |b: ModernInterceptorBuilder| match b.build() {
            Err(PayError::Precondition(msg)) => msg,
            other => panic!("expected precondition, got {other:?}"),
        };

        assert!(err(ModernInterceptor::builder()).contains("merchant id"));
        assert!(err(ModernInterceptor::builder().mchid("")).contains("merchant id"));
        assert!(err(ModernInterceptor::builder().mchid(1)).contains("serial"));
        assert!(err(ModernInterceptor::builder().mchid(1).serial("S")).contains("private key"));
        assert!(
            err(ModernInterceptor::builder().mchid(1).serial("S").private_key("").certificates(registry()))
                .contains("private key")
        );
        assert!(
            err(ModernInterceptor::builder()
                .mchid(1)
                .serial("S")
                .private_key(MERCHANT_KEY)
                .require_merchant_certificate(true))
            .contains("merchant certificate")
        );
        assert!(err(ModernInterceptor::builder().mchid(1).serial("S").private_key(MERCHANT_KEY)).contains("registry"));
    }

    #[test]
    fn test_builder_accepts_numeric_mchid_and_der_key() {
        let der = STANDARD
            .decode(MERCHANT_KEY.lines().filter(|l| !l.starts_with("-----")).collect::<String>())
            .unwrap();
        let interceptor = ModernInterceptor::builder()
            .mchid(1_900_000_109_u64)
            .serial("S")
            .private_key(der)
            .certificates(CertificateRegistry::new())
            .build()
            .unwrap();
        assert_eq!(interceptor.mchid(), "1900000109");
    }

    #[test]
    fn test_builder_checks_merchant_certificate() {
        // the platform certificate does not pair with the merchant key
        let result = ModernInterceptor::builder()
            .mchid(1)
            .serial(PLATFORM_SERIAL)
            .private_key(MERCHANT_KEY)
            .merchant_certificate(PLATFORM_CERT)
            .certificates(CertificateRegistry::new())
            .build();
        assert!(matches!(result, Err(PayError::Precondition(msg)) if msg.contains("private key")));

        let result = ModernInterceptor::builder()
            .mchid(1)
            .serial("OTHER")
            .private_key(PLATFORM_KEY)
            .merchant_certificate(PLATFORM_CERT)
            .certificates(CertificateRegistry::new())
            .build();
        assert!(matches!(result, Err(PayError::Precondition(msg)) if msg.contains("serial")));

        let result = ModernInterceptor::builder()
            .mchid(1)
            .serial(PLATFORM_SERIAL)
            .private_key(PLATFORM_KEY)
            .merchant_certificate(PLATFORM_CERT)
            .require_merchant_certificate(true)
            .certificates(CertificateRegistry::new())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_request_headers_and_signature() {
        let mut request = OutboundRequest::post("/v3/pay/transactions/native", json!({"amount": {"total": 1}}));
        request = request.with_header("Content-Type", "text/plain").unwrap().with_header("X-Keep", "1").unwrap();
        let signed = interceptor().intercept_request(request).unwrap();

        assert_eq!(signed.headers.get(CONTENT_TYPE).unwrap(), JSON);
        assert_eq!(signed.headers.get(ACCEPT).unwrap(), JSON);
        assert_eq!(signed.headers.get("x-keep").unwrap(), "1");

        let authorization = signed.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        let fields = authorization_fields(authorization);
        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["mchid", "nonce_str", "signature", "timestamp", "serial_no"]);
        assert_eq!(fields[0].1, "1900000109");
        assert_eq!(fields[4].1, "MERCHANTSERIAL");

        let RequestBody::Bytes(body) = &signed.body else { panic!("expected bytes") };
        let message = formatter::canonical_request(
            "POST",
            "/v3/pay/transactions/native",
            &fields[3].1,
            &fields[1].1,
            std::str::from_utf8(body).unwrap(),
        );
        let public = rsa::PublicKey::from_pem(MERCHANT_PUB).unwrap();
        assert!(rsa::verify(message.as_bytes(), &fields[2].1, &public).unwrap());
    }

    #[test]
    fn test_get_signs_empty_body() {
        let signed = interceptor().intercept_request(OutboundRequest::get("/v3/certificates")).unwrap();
        assert_eq!(signed.body, RequestBody::Empty);

        let authorization = signed.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        let fields = authorization_fields(authorization);
        let message = formatter::canonical_request("GET", "/v3/certificates", &fields[3].1, &fields[1].1, "");
        assert!(message.ends_with("\n\n"));
        let public = rsa::PublicKey::from_pem(MERCHANT_PUB).unwrap();
        assert!(rsa::verify(message.as_bytes(), &fields[2].1, &public).unwrap());
    }

    #[test]
    fn test_media_signs_meta_only() {
        let meta = json!({"filename": "a.png", "sha256": "abc"});
        let media = MediaUpload {
            meta: meta.clone(),
            file_name: "a.png".to_owned(),
            content_type: "image/png".to_owned(),
            content: vec![0x89, 0x50, 0x4e, 0x47],
        };
        let request = OutboundRequest::new(crate::pipeline::Method::Post, "/v3/merchant/media/upload")
            .with_payload(Payload::Media(media.clone()));
        let signed = interceptor().intercept_request(request).unwrap();
        assert_eq!(signed.body, RequestBody::Multipart(media));

        let authorization = signed.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        let fields = authorization_fields(authorization);
        let message = formatter::canonical_request(
            "POST",
            "/v3/merchant/media/upload",
            &fields[3].1,
            &fields[1].1,
            &meta.to_string(),
        );
        let public = rsa::PublicKey::from_pem(MERCHANT_PUB).unwrap();
        assert!(rsa::verify(message.as_bytes(), &fields[2].1, &public).unwrap());
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let interceptor = interceptor();
        let a = interceptor.authorize("GET", "/v3/certificates", "").unwrap();
        let b = interceptor.authorize("GET", "/v3/certificates", "").unwrap();
        assert_ne!(authorization_fields(&a)[1], authorization_fields(&b)[1]);
    }

    #[test]
    fn test_verified_response_is_unmodified() {
        let body = r#"{"code_url":"weixin://wxpay/bizpayurl?pr=p4lpSuKzz","b":1}"#;
        let verified = interceptor()
            .intercept_response("/v3/pay/transactions/native", response(200, platform_signed(body), body))
            .unwrap();
        assert_eq!(verified.body, body.as_bytes());
        assert_eq!(verified.data["b"], 1);
    }

    #[test]
    fn test_empty_body_verifies() {
        let verified = interceptor().intercept_response("/v3/x", response(204, platform_signed(""), "")).unwrap();
        assert_eq!(verified.data, Value::Null);
    }

    #[test]
    fn test_missing_headers_named() {
        let mut headers = platform_signed("{}");
        headers.remove(HEADER_NONCE);
        headers.remove(HEADER_SIGNATURE);
        match interceptor().intercept_response("/v3/x", response(200, headers, "{}")) {
            Err(PayError::HeadersIncomplete(missing)) => {
                assert_eq!(missing, vec![HEADER_NONCE.to_owned(), HEADER_SIGNATURE.to_owned()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unsigned_error_reply_is_integrity_failure() {
        let body = r#"{"code":"SYSTEM_ERROR","message":"busy"}"#;
        let error = interceptor().intercept_response("/v3/x", response(502, HeaderMap::new(), body)).unwrap_err();
        assert!(matches!(error, PayError::HeadersIncomplete(ref missing) if missing.len() == 4));
        assert!(!error.is_business_failure());

        let error = interceptor().intercept_response("/v3/x", response(502, platform_signed(body), body)).unwrap_err();
        assert!(matches!(error, PayError::BusinessFailure { ref code, .. } if code == "SYSTEM_ERROR"));
    }

    #[test]
    fn test_unknown_serial() {
        let mut headers = platform_signed("{}");
        headers.insert(HEADER_SERIAL, HeaderValue::from_static("0000"));
        let result = interceptor().intercept_response("/v3/x", response(200, headers, "{}"));
        assert!(matches!(result, Err(PayError::UnknownSigner(serial)) if serial == "0000"));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let headers = platform_signed(r#"{"total":1}"#);
        match interceptor().intercept_response("/v3/x", response(200, headers, r#"{"total":100}"#)) {
            Err(PayError::SignatureRejected { timestamp, nonce, serial, .. }) => {
                assert_eq!(timestamp, "1700000000");
                assert_eq!(nonce, "platformnonce");
                assert_eq!(serial, PLATFORM_SERIAL);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reserialized_body_is_not_accepted() {
        // semantically equal, byte-different
        let headers = platform_signed(r#"{"a":1,"b":2}"#);
        let result = interceptor().intercept_response("/v3/x", response(200, headers, r#"{"b":2,"a":1}"#));
        assert!(matches!(result, Err(PayError::SignatureRejected { .. })));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let mut headers = platform_signed("{}");
        headers.insert(HEADER_SIGNATURE, HeaderValue::from_static("not-base64!"));
        let result = interceptor().intercept_response("/v3/x", response(200, headers, "{}"));
        assert!(matches!(result, Err(PayError::SignatureRejected { .. })));
    }

    #[test]
    fn test_signed_error_response_is_business_failure() {
        let body = r#"{"code":"ORDER_NOT_EXIST","message":"订单不存在"}"#;
        match interceptor().intercept_response("/v3/x", response(404, platform_signed(body), body)) {
            Err(PayError::BusinessFailure { code, message, raw }) => {
                assert_eq!(code, "ORDER_NOT_EXIST");
                assert_eq!(message, "订单不存在");
                assert_eq!(raw["code"], "ORDER_NOT_EXIST");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_verify_notification_and_decrypt_resource() {
        let key = b"0123456789abcdef0123456789abcdef";
        let ciphertext =
            aead::encrypt(key, b"fdasflkja484", br#"{"out_trade_no":"T1"}"#, b"transaction").unwrap();
        let body = json!({
            "id": "EV-2018022511223320873",
            "event_type": "TRANSACTION.SUCCESS",
            "resource": {
                "algorithm": "AEAD_AES_256_GCM",
                "ciphertext": ciphertext,
                "nonce": "fdasflkja484",
                "associated_data": "transaction",
                "original_type": "transaction"
            }
        })
        .to_string();

        let interceptor = interceptor();
        let envelope = interceptor.verify_notification(&platform_signed(&body), body.as_bytes()).unwrap();
        let resource = ModernInterceptor::decrypt_resource(&envelope["resource"], key).unwrap();
        assert_eq!(resource["out_trade_no"], "T1");

        let forged = body.replace("TRANSACTION.SUCCESS", "TRANSACTION.REFUND");
        assert!(interceptor.verify_notification(&platform_signed(&body), forged.as_bytes()).is_err());
    }

    #[test]
    fn test_decrypt_sensitive() {
        let public = rsa::PublicKey::from_pem(MERCHANT_PUB).unwrap();
        let sealed = rsa::encrypt("13800138000".as_bytes(), &public).unwrap();
        assert_eq!(interceptor().decrypt_sensitive(&sealed).unwrap(), "13800138000");
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let debug = format!("{:?}", interceptor());
        assert!(debug.contains("1900000109"));
        assert!(!debug.contains("PRIVATE"));
    }
}

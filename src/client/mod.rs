//! HTTP client driving the signing and verification hooks.
//!
//! [`PaymentClient`] owns the transport and the protocol pipelines. One call
//! runs request hook, HTTP exchange, response hook; the response hook
//! decides whether the caller ever sees the body.
//!
//! # Examples
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wechatpay_bridge::{
//!     client::{PaymentClient, Protocol},
//!     modern::{CertificateRegistry, ModernInterceptor},
//!     pipeline::OutboundRequest,
//! };
//!
//! # async fn example() -> wechatpay_bridge::error::Result<()> {
//! let registry = CertificateRegistry::new();
//! registry.insert_certificate(&std::fs::read_to_string("wechatpay_platform.pem").unwrap())?;
//!
//! let client = PaymentClient::builder()
//!     .modern(
//!         ModernInterceptor::builder()
//!             .mchid("1900000109")
//!             .serial("3775B6A45ACD588826D15E583A95F5DD00000000")
//!             .private_key(std::fs::read_to_string("apiclient_key.pem").unwrap())
//!             .certificates(registry)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let response = client
//!     .execute(
//!         Protocol::Modern,
//!         OutboundRequest::post(
//!             "/v3/pay/transactions/native",
//!             json!({"appid": "wxd678efh567hg6787", "mchid": "1900000109"}),
//!         ),
//!     )
//!     .await?;
//! println!("code_url: {}", response.data["code_url"]);
//! # Ok(())
//! # }
//! ```

mod endpoint;

use std::{path::Path, sync::Arc};

use reqwest::{
    Client,
    header::CONTENT_TYPE,
    multipart::{Form, Part},
};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

pub use self::endpoint::Endpoint;
use crate::{
    config::{ClientConfig, DEFAULT_BASE_URL, HttpConfig, HttpVersion},
    crypto::{
        constant_time_equals,
        hash::{self, HashKind},
    },
    error::{PayError, Result},
    legacy::LegacyTransformer,
    modern::{CertificateRegistry, ModernInterceptor},
    pipeline::{
        InboundResponse, Method, OutboundRequest, RequestBody, RequestInterceptor,
        ResponseInterceptor, SignedRequest, VerifiedResponse,
    },
};

/// Protocol generation used for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// APIv3: JSON, RSA signatures.
    Modern,
    /// APIv2: XML, shared-secret signatures.
    Legacy,
}

/// Rejects paths containing traversal sequences.
fn sanitize_path(path: &str) -> Result<&str> {
    let route = path.split_once('?').map_or(path, |(route, _)| route);
    if route.contains("..") || route.contains("//") {
        return Err(PayError::TransportError(
            "Invalid path: traversal sequences not allowed".to_owned(),
        ));
    }
    if !path.starts_with('/') {
        return Err(PayError::TransportError("Path must start with '/'".to_owned()));
    }
    Ok(path)
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PayError::ConfigError(format!("cannot read {}: {e}", path.display())))
}

/// Payment API client.
///
/// Cloning is cheap; clones share the connection pool and pipelines.
#[derive(Debug, Clone)]
pub struct PaymentClient {
    http: Client,
    base_url: Url,
    modern: Option<Arc<ModernInterceptor>>,
    legacy: Option<Arc<LegacyTransformer>>,
}

impl PaymentClient {
    /// Starts building a client.
    #[must_use]
    pub fn builder() -> PaymentClientBuilder {
        PaymentClientBuilder::default()
    }

    /// Builds a client from a validated configuration.
    ///
    /// Reads the key and certificate files and, when configured, the APIv2
    /// secret from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] for invalid configuration or
    /// unreadable files, and the builder's errors for unusable key material.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let registry = CertificateRegistry::new();
        for path in &config.platform_certificate_paths {
            registry.insert_certificate(&read_pem(path)?)?;
        }

        let mut modern = ModernInterceptor::builder()
            .mchid(&config.mchid)
            .serial(&config.serial)
            .private_key(read_pem(&config.private_key_path)?)
            .certificates(registry);
        if let Some(path) = &config.merchant_certificate_path {
            modern = modern.merchant_certificate(read_pem(path)?).require_merchant_certificate(true);
        }

        let mut builder = Self::builder()
            .base_url(&config.base_url)
            .http_config(config.http.clone())
            .modern(modern.build()?);
        if let Some(secret) = config.apiv2_secret()? {
            builder = builder.legacy(LegacyTransformer::new(&config.mchid, secret));
        }
        builder.build()
    }

    /// Base URL every path is appended to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The modern pipeline, if configured.
    #[must_use]
    pub fn modern(&self) -> Option<&ModernInterceptor> {
        self.modern.as_deref()
    }

    /// The legacy pipeline, if configured.
    #[must_use]
    pub fn legacy(&self) -> Option<&LegacyTransformer> {
        self.legacy.as_deref()
    }

    fn hooks(&self, protocol: Protocol) -> Result<(&dyn RequestInterceptor, &dyn ResponseInterceptor)> {
        match protocol {
            Protocol::Modern => self
                .modern
                .as_deref()
                .map(|m| (m as &dyn RequestInterceptor, m as &dyn ResponseInterceptor))
                .ok_or_else(|| PayError::Precondition("modern protocol is not configured".to_owned())),
            Protocol::Legacy => self
                .legacy
                .as_deref()
                .map(|l| (l as &dyn RequestInterceptor, l as &dyn ResponseInterceptor))
                .ok_or_else(|| PayError::Precondition("legacy protocol is not configured".to_owned())),
        }
    }

    /// Signs, sends and verifies one call.
    ///
    /// # Errors
    ///
    /// - [`PayError::Precondition`] if `protocol` is not configured
    /// - [`PayError::TransportError`] for unsafe paths
    /// - [`PayError::HttpError`] for network failures
    /// - any error of the protocol's request and response hooks
    #[instrument(
        skip(self, request),
        fields(method = request.method.as_str(), path = %request.path)
    )]
    pub async fn execute(&self, protocol: Protocol, mut request: OutboundRequest) -> Result<VerifiedResponse> {
        sanitize_path(&request.path)?;
        let (sign, verify) = self.hooks(protocol)?;
        request.path = self.target(&request.path);

        let path = request.path.clone();
        let signed = sign.intercept_request(request)?;
        let response = self.send(signed).await?;
        debug!(status = response.status, "response received");

        verify.intercept_response(&path, response)
    }

    /// Downloads a file (bill, media) without response verification.
    ///
    /// The request is still signed when the modern pipeline is configured.
    /// `location` is a path, or an absolute URL as returned by the bill
    /// endpoints; only its path and query are used. Check the content with
    /// [`verify_digest`](Self::verify_digest).
    ///
    /// # Errors
    ///
    /// Returns [`PayError::BusinessFailure`] for a non-2xx status, plus
    /// the errors of [`execute`](Self::execute).
    #[instrument(skip(self))]
    pub async fn download(&self, location: &str) -> Result<Vec<u8>> {
        let path = if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location)
                .map_err(|e| PayError::TransportError(format!("invalid download url: {e}")))?;
            match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_owned(),
            }
        } else {
            sanitize_path(location)?;
            self.target(location)
        };
        sanitize_path(&path)?;

        let request = OutboundRequest::new(Method::Get, path);
        let signed = match &self.modern {
            Some(modern) => modern.intercept_request(request)?,
            None => SignedRequest {
                method: request.method,
                path: request.path,
                headers: request.headers,
                body: RequestBody::Empty,
            },
        };

        let response = self.send(signed).await?;
        if !(200..300).contains(&response.status) {
            let data = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
            let code = data
                .get("code")
                .and_then(Value::as_str)
                .map_or_else(|| response.status.to_string(), ToOwned::to_owned);
            let message =
                data.get("message").and_then(Value::as_str).unwrap_or("download failed").to_owned();
            return Err(PayError::business(code, message, data));
        }
        debug!(bytes = response.body.len(), "download complete");
        Ok(response.body)
    }

    /// Checks downloaded bytes against the digest published with them.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::SignatureMismatch`] carrying both digests on mismatch.
    pub fn verify_digest(content: &[u8], kind: HashKind, expected_hex: &str) -> Result<()> {
        let actual = hash::digest(kind, content);
        let expected = expected_hex.trim().to_ascii_lowercase();
        if constant_time_equals(&expected, &actual) {
            Ok(())
        } else {
            Err(PayError::SignatureMismatch { expected, actual })
        }
    }

    /// Path and query as sent on the wire, including the base URL's path.
    fn target(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.path().trim_end_matches('/'))
    }

    async fn send(&self, signed: SignedRequest) -> Result<InboundResponse> {
        let SignedRequest { method, path, mut headers, body } = signed;
        let url = format!("{}{path}", self.base_url.origin().ascii_serialization());

        let mut request = self.http.request(method.into(), url);
        request = match body {
            RequestBody::Empty => request.headers(headers),
            RequestBody::Bytes(bytes) => request.headers(headers).body(bytes),
            RequestBody::Multipart(media) => {
                // reqwest sets the multipart boundary itself
                headers.remove(CONTENT_TYPE);
                let file = Part::bytes(media.content)
                    .file_name(media.file_name)
                    .mime_str(&media.content_type)?;
                let form = Form::new().text("meta", serde_json::to_string(&media.meta)?).part("file", file);
                request.headers(headers).multipart(form)
            }
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(InboundResponse { status, headers, body })
    }
}

/// Builder for [`PaymentClient`].
#[derive(Debug, Default)]
pub struct PaymentClientBuilder {
    base_url: Option<String>,
    http: HttpConfig,
    modern: Option<ModernInterceptor>,
    legacy: Option<LegacyTransformer>,
}

impl PaymentClientBuilder {
    /// Overrides the API base URL (default [`DEFAULT_BASE_URL`]).
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// HTTP client settings.
    #[must_use]
    pub fn http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Enables the modern protocol.
    #[must_use]
    pub fn modern(mut self, interceptor: ModernInterceptor) -> Self {
        self.modern = Some(interceptor);
        self
    }

    /// Enables the legacy protocol.
    #[must_use]
    pub fn legacy(mut self, transformer: LegacyTransformer) -> Self {
        self.legacy = Some(transformer);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] for an invalid base URL or HTTP
    /// settings, and [`PayError::HttpError`] if the HTTP client cannot be built.
    pub fn build(self) -> Result<PaymentClient> {
        self.http.validate()?;

        let base_url = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let base_url = Url::parse(base_url)
            .map_err(|e| PayError::ConfigError(format!("invalid base_url '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "https" | "http") {
            return Err(PayError::ConfigError(format!(
                "base_url must use HTTP(S), got: {}",
                base_url.scheme()
            )));
        }

        let mut builder = Client::builder()
            .pool_max_idle_per_host(self.http.pool_max_idle_per_host)
            .timeout(self.http.timeout())
            .connect_timeout(self.http.connect_timeout());
        builder = match self.http.http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Http2 => builder.http2_prior_knowledge(),
            HttpVersion::Auto => builder,
        };
        let http = builder.build()?;

        Ok(PaymentClient {
            http,
            base_url,
            modern: self.modern.map(Arc::new),
            legacy: self.legacy.map(Arc::new),
        })
    }
}

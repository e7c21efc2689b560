//! Request/response interception contract.
//!
//! Both protocol generations plug into [`PaymentClient`](crate::client::PaymentClient)
//! through the same pair of hooks:
//!
//! ```text
//! OutboundRequest ──RequestInterceptor──▶ SignedRequest ──HTTP──▶ InboundResponse
//!                                                                      │
//!                  VerifiedResponse ◀──ResponseInterceptor─────────────┘
//! ```
//!
//! Hooks are pure functions of their input plus the identity bound at
//! construction. Each call computes its own nonce, timestamp and signing
//! string, so one interceptor may serve any number of in-flight requests.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PayError, Result};

/// HTTP method of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Uppercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
        }
    }
}

/// A file upload with its JSON metadata.
///
/// Modern media endpoints sign `meta` only; the file bytes travel in the
/// multipart body unsigned.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpload {
    /// Metadata object, usually `{"filename": .., "sha256": ..}`.
    pub meta: Value,
    /// File name of the multipart `file` part.
    pub file_name: String,
    /// MIME type of the multipart `file` part.
    pub content_type: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
}

/// Logical payload of an outbound call, before wire encoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,
    /// Structured data; JSON in modern mode, XML in legacy mode.
    Json(Value),
    /// Pre-serialized text sent and signed as-is.
    Text(String),
    /// Multipart file upload.
    Media(MediaUpload),
}

/// An outbound call as described by the caller.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Path plus optional query string, starting with `/`.
    pub path: String,
    /// Extra headers. Signing hooks overwrite the headers they own.
    pub headers: HeaderMap,
    /// Logical payload.
    pub payload: Payload,
    /// Opt out of legacy nonce injection on endpoints that do not require one.
    pub skip_nonce: bool,
}

impl OutboundRequest {
    /// Creates a request with an empty payload.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            payload: Payload::Empty,
            skip_nonce: false,
        }
    }

    /// Shorthand for a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Shorthand for a `POST` request carrying structured data.
    #[must_use]
    pub fn post(path: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Post, path).with_payload(Payload::Json(data))
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::TransportError`] if the name or value contains
    /// control characters (CRLF injection) or is otherwise not a valid header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        validate_header(name, value)?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PayError::TransportError(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PayError::TransportError(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Skips nonce injection on nonce-optional legacy endpoints.
    #[must_use]
    pub fn without_nonce(mut self) -> Self {
        self.skip_nonce = true;
        self
    }
}

/// Rejects header names and values carrying control characters.
pub(crate) fn validate_header(name: &str, value: &str) -> Result<()> {
    if name.contains(['\r', '\n', '\0']) {
        return Err(PayError::TransportError(
            "Invalid header name: control characters not allowed".to_owned(),
        ));
    }
    if value.contains(['\r', '\n', '\0']) {
        return Err(PayError::TransportError(
            "Invalid header value: control characters not allowed".to_owned(),
        ));
    }
    Ok(())
}

/// Wire body of a signed request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Encoded body, byte-identical to what was signed.
    Bytes(Vec<u8>),
    /// Multipart body built by the transport from `meta` and the file part.
    Multipart(MediaUpload),
}

/// A request ready for the transport.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// HTTP method.
    pub method: Method,
    /// Path plus optional query string.
    pub path: String,
    /// Headers including the authentication headers.
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: RequestBody,
}

/// A raw response as returned by the transport.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (case-insensitive lookup).
    pub headers: HeaderMap,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl InboundResponse {
    /// Body decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Format`] if the body is not valid UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| PayError::Format(format!("response body is not UTF-8: {e}")))
    }
}

/// A response that passed every integrity and status check.
#[derive(Debug, Clone)]
pub struct VerifiedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, unmodified.
    pub headers: HeaderMap,
    /// Raw body bytes, unmodified.
    pub body: Vec<u8>,
    /// Decoded body.
    pub data: Value,
}

impl VerifiedResponse {
    /// Deserializes the decoded body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Format`] if the data does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Signs an outbound request.
pub trait RequestInterceptor: Send + Sync {
    /// Turns a logical request into a signed, wire-encoded one.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::PayloadType`] for payloads the protocol cannot
    /// carry and [`PayError::Precondition`] when the bound identity cannot
    /// sign the request.
    fn intercept_request(&self, request: OutboundRequest) -> Result<SignedRequest>;
}

/// Verifies an inbound response.
pub trait ResponseInterceptor: Send + Sync {
    /// Checks a response received for `path` and decodes its body.
    ///
    /// # Errors
    ///
    /// Returns an integrity error when the response cannot be trusted and
    /// [`PayError::BusinessFailure`] when the provider reported a failure.
    fn intercept_response(&self, path: &str, response: InboundResponse)
    -> Result<VerifiedResponse>;
}

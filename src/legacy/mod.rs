//! Legacy (APIv2) protocol: XML bodies signed with a shared secret.
//!
//! # Signing
//!
//! ```text
//! sign = UPPER( MD5( ksort(fields) as k=v&k=v + "&key=" + secret ) )
//!      | UPPER( HMAC-SHA256(secret, ksort(fields) as k=v&k=v + "&key=" + secret) )
//! ```
//!
//! The algorithm is chosen by the request's `sign_type` field; responses are
//! checked with the algorithm implied by the length of their `sign`.
//!
//! # Verification order
//!
//! 1. decode the body (XML, or JSON for the access-token endpoint)
//! 2. check `return_code` / `result_code` (or `retcode`)
//! 3. skip the signature on endpoints that never sign their responses
//! 4. recompute and compare `sign` in constant time

pub mod xml;

use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    crypto::{
        constant_time_equals,
        hash::{self, HashKind},
    },
    error::{PayError, Result},
    formatter,
    pipeline::{
        InboundResponse, Method, OutboundRequest, Payload, RequestBody, RequestInterceptor,
        ResponseInterceptor, SignedRequest, VerifiedResponse,
    },
};

/// Success literal of the status fields.
pub const SUCCESS: &str = "SUCCESS";

/// `sign_type` value selecting HMAC-SHA256.
pub const HMAC_SHA256: &str = "HMAC-SHA256";

/// Endpoint answering with a JSON `{retcode, retmsg}` envelope instead of XML.
pub const JSON_ENVELOPE_PATH: &str = "/appauth/getaccesstoken";

/// Endpoints where a caller may opt out of nonce injection.
const NONCE_OPTIONAL: &[&str] = &[
    "/mchrisk/querymchrisk",
    "/mchrisk/setmchriskcallback",
    "/mchrisk/syncmchriskresult",
    "/mmpaymkttransfers/gethbinfo",
    "/mmpaymkttransfers/gettransferinfo",
    "/mmpaymkttransfers/pay_bank",
    "/mmpaymkttransfers/promotion/paywwsptrans2pocket",
    "/mmpaymkttransfers/promotion/querywwsptrans2pocket",
    "/mmpaymkttransfers/promotion/transfers",
    "/mmpaymkttransfers/query_bank",
    "/mmpaymkttransfers/sendgroupredpack",
    "/mmpaymkttransfers/sendminiprogramhb",
    "/mmpaymkttransfers/sendredpack",
    "/papay/entrustweb",
    "/papay/h5entrustweb",
    "/papay/partner/entrustweb",
    "/papay/partner/h5entrustweb",
    "/pay/downloadbill",
    "/pay/downloadfundflow",
    "/payitil/report",
    "/risk/getpublickey",
    "/risk/getviolation",
    "/secapi/mch/submchmanage",
    "/xdc/apiv2getsignkey/sign/getsignkey",
];

/// Endpoints whose responses carry no `sign`.
const UNSIGNED_RESPONSES: &[&str] = &[
    JSON_ENVELOPE_PATH,
    "/mchrisk/querymchrisk",
    "/mchrisk/setmchriskcallback",
    "/mchrisk/syncmchriskresult",
    "/mmpaymkttransfers/gethbinfo",
    "/mmpaymkttransfers/gettransferinfo",
    "/mmpaymkttransfers/pay_bank",
    "/mmpaymkttransfers/promotion/paywwsptrans2pocket",
    "/mmpaymkttransfers/promotion/querywwsptrans2pocket",
    "/mmpaymkttransfers/promotion/transfers",
    "/mmpaymkttransfers/query_bank",
    "/mmpaymkttransfers/sendgroupredpack",
    "/mmpaymkttransfers/sendminiprogramhb",
    "/mmpaymkttransfers/sendredpack",
    "/papay/entrustweb",
    "/papay/h5entrustweb",
    "/papay/partner/entrustweb",
    "/papay/partner/h5entrustweb",
    "/pay/downloadbill",
    "/pay/downloadfundflow",
    "/payitil/report",
    "/risk/getpublickey",
    "/risk/getviolation",
    "/secapi/mch/submchmanage",
    "/xdc/apiv2getsignkey/sign/getsignkey",
];

/// Endpoints that answer with a CSV bill on success and XML on failure.
const BILL_DOWNLOADS: &[&str] = &["/pay/downloadbill", "/pay/downloadfundflow"];

/// Payload fields that must match the bound merchant id.
const MERCHANT_ID_FIELDS: &[&str] = &["mch_id", "mchid", "combine_mch_id"];

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
const XML_ACCEPT: &str = "text/xml, text/plain, application/xml";

/// Path without its query string.
fn route(path: &str) -> &str {
    path.split_once('?').map_or(path, |(route, _)| route)
}

/// Whether `route` is one of `endpoints`, allowing a base path prefix such as `/sandboxnew`.
fn listed(endpoints: &[&str], route: &str) -> bool {
    endpoints.iter().any(|endpoint| route.ends_with(endpoint))
}

/// Legacy signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignType {
    /// Keyed MD5 (the default).
    Md5,
    /// HMAC-SHA256.
    HmacSha256,
}

impl SignType {
    /// Algorithm requested by a payload's `sign_type` field.
    #[must_use]
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        match fields.get("sign_type").and_then(Value::as_str) {
            Some(HMAC_SHA256) => Self::HmacSha256,
            _ => Self::Md5,
        }
    }

    /// Algorithm implied by a received signature: 64 hex chars mean HMAC-SHA256.
    #[must_use]
    pub fn from_signature(sign: &str) -> Self {
        if sign.len() == 64 { Self::HmacSha256 } else { Self::Md5 }
    }
}

/// Signs legacy requests and verifies legacy responses.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wechatpay_bridge::legacy::LegacyTransformer;
///
/// # fn example() -> wechatpay_bridge::error::Result<()> {
/// let transformer = LegacyTransformer::new("10000100", "192006250b4c09247ec02edce69f6a2d");
/// let fields = json!({
///     "appid": "wxd930ea5d5a258f4f",
///     "mch_id": "10000100",
///     "device_info": "1000",
///     "body": "test",
///     "nonce_str": "ibuaiVcKdpRxkhJA",
/// });
/// let sign = transformer.sign(fields.as_object().unwrap())?;
/// assert_eq!(sign, "9A0A8659F005D6984697E2CA0A9CF3B7");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LegacyTransformer {
    mchid: String,
    secret: Zeroizing<String>,
}

impl fmt::Debug for LegacyTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyTransformer")
            .field("mchid", &self.mchid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl LegacyTransformer {
    /// Binds a merchant id and the APIv2 shared secret.
    #[must_use]
    pub fn new(mchid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { mchid: mchid.into(), secret: Zeroizing::new(secret.into()) }
    }

    /// Bound merchant id.
    #[must_use]
    pub fn mchid(&self) -> &str {
        &self.mchid
    }

    /// Signs `fields` with the algorithm named by their `sign_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] when HMAC-SHA256 is requested
    /// without a secret.
    pub fn sign(&self, fields: &Map<String, Value>) -> Result<String> {
        self.sign_with(SignType::from_fields(fields), fields)
    }

    fn sign_with(&self, kind: SignType, fields: &Map<String, Value>) -> Result<String> {
        let data = formatter::query_string_like(&formatter::ksort(fields));
        let digest = match kind {
            SignType::Md5 => hash::keyed(&data, &self.secret),
            SignType::HmacSha256 => {
                if self.secret.is_empty() {
                    return Err(PayError::Precondition(
                        "HMAC-SHA256 signing requires the APIv2 secret".to_owned(),
                    ));
                }
                hash::hmac(&data, &self.secret, HashKind::Sha256)?
            }
        };
        Ok(digest.to_uppercase())
    }

    /// Adds `nonce_str` (when due) and `sign` to `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] when a merchant id field disagrees
    /// with the bound merchant id, or HMAC-SHA256 is requested without a secret.
    pub fn seal(
        &self,
        path: &str,
        mut fields: Map<String, Value>,
        skip_nonce: bool,
    ) -> Result<Map<String, Value>> {
        let kind = SignType::from_fields(&fields);
        for field in MERCHANT_ID_FIELDS {
            if let Some(value) = fields.get(*field)
                && formatter::field_text(value).as_deref() != Some(self.mchid.as_str())
            {
                return Err(PayError::Precondition(format!(
                    "{field} {value} does not match the bound merchant id {}",
                    self.mchid
                )));
            }
        }

        let nonce_optional = listed(NONCE_OPTIONAL, route(path));
        let has_nonce = fields.get("nonce_str").and_then(formatter::field_text).is_some();
        if !(nonce_optional && skip_nonce) && !has_nonce {
            fields.insert("nonce_str".to_owned(), Value::String(formatter::nonce(formatter::NONCE_LENGTH)));
        }

        let sign = self.sign_with(kind, &fields)?;
        fields.insert("sign".to_owned(), Value::String(sign));
        Ok(fields)
    }

    /// Checks a decoded response's `sign`.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::SignatureMismatch`] when `sign` is absent or differs
    /// from the recomputed signature.
    pub fn verify(&self, fields: &Map<String, Value>) -> Result<()> {
        let actual = fields.get("sign").and_then(Value::as_str).unwrap_or_default();
        let expected = self.sign_with(SignType::from_signature(actual), fields)?;
        if constant_time_equals(&expected, actual) {
            Ok(())
        } else {
            Err(PayError::SignatureMismatch { expected, actual: actual.to_owned() })
        }
    }

    fn check_envelope(status: u16, data: &Value) -> Result<()> {
        let retmsg = data.get("retmsg").and_then(Value::as_str).unwrap_or_default();
        let Some(code) = data.get("retcode") else {
            let message = format!("status={status}, retcode missing, retmsg={retmsg}");
            return Err(PayError::business(status.to_string(), message, data.clone()));
        };
        let retcode = match code {
            Value::Number(n) => n.as_i64().unwrap_or(-1),
            Value::String(s) => s.parse().unwrap_or(-1),
            _ => -1,
        };
        let message = format!("retcode={retcode}, retmsg={retmsg}");
        match retcode {
            0 if (200..300).contains(&status) => Ok(()),
            0 => Err(PayError::business(status.to_string(), format!("status={status}, {message}"), data.clone())),
            _ => Err(PayError::business(retcode.to_string(), message, data.clone())),
        }
    }

    fn check_status(fields: &Map<String, Value>) -> Result<()> {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or_default();

        if text("return_code") != SUCCESS {
            let message = match text("return_msg") {
                "" => format!("return_code={}", text("return_code")),
                msg => msg.to_owned(),
            };
            return Err(PayError::business("return_code", message, Value::Object(fields.clone())));
        }

        if let Some(result_code) = fields.get("result_code").and_then(Value::as_str)
            && result_code != SUCCESS
        {
            let code = match text("err_code") {
                "" => "result_code",
                code => code,
            };
            let message = match text("err_code_des") {
                "" => format!("result_code={result_code}"),
                msg => msg.to_owned(),
            };
            return Err(PayError::business(code, message, Value::Object(fields.clone())));
        }
        Ok(())
    }
}

impl RequestInterceptor for LegacyTransformer {
    #[instrument(skip(self, request), fields(method = request.method.as_str(), path = %request.path))]
    fn intercept_request(&self, request: OutboundRequest) -> Result<SignedRequest> {
        let OutboundRequest { method, path, mut headers, payload, skip_nonce } = request;

        if method == Method::Get {
            let body = match payload {
                Payload::Empty => RequestBody::Empty,
                Payload::Text(text) => RequestBody::Bytes(text.into_bytes()),
                Payload::Json(value) => RequestBody::Bytes(serde_json::to_vec(&value)?),
                Payload::Media(_) => {
                    return Err(PayError::PayloadType("GET cannot carry a file upload".to_owned()));
                }
            };
            return Ok(SignedRequest { method, path, headers, body });
        }

        let Payload::Json(Value::Object(fields)) = payload else {
            return Err(PayError::PayloadType(
                "legacy requests must carry a key-value mapping".to_owned(),
            ));
        };

        let sealed = self.seal(&path, fields, skip_nonce)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(XML_ACCEPT));
        debug!(fields = sealed.len(), "legacy request signed");

        Ok(SignedRequest {
            method,
            path,
            headers,
            body: RequestBody::Bytes(xml::to_xml(&sealed)?.into_bytes()),
        })
    }
}

impl ResponseInterceptor for LegacyTransformer {
    #[instrument(skip(self, response), fields(status = response.status))]
    fn intercept_response(&self, path: &str, response: InboundResponse) -> Result<VerifiedResponse> {
        let route = route(path);
        let text = response.text()?;

        let data = if listed(&[JSON_ENVELOPE_PATH], route) {
            let data = if text.trim().is_empty() { Value::Null } else { serde_json::from_str(text)? };
            Self::check_envelope(response.status, &data)?;
            data
        } else if listed(BILL_DOWNLOADS, route) && !text.trim_start().starts_with('<') {
            Value::String(text.to_owned())
        } else {
            let fields = xml::from_xml(text)?;
            Self::check_status(&fields)?;
            if !listed(UNSIGNED_RESPONSES, route) {
                self.verify(&fields).inspect_err(|e| warn!(error = %e, "legacy response rejected"))?;
            }
            Value::Object(fields)
        };

        debug!("legacy response accepted");
        Ok(VerifiedResponse { status: response.status, headers: response.headers, body: response.body, data })
    }
}

//! String construction shared by both protocol generations.
//!
//! The canonical strings built here are signed byte-for-byte by the provider;
//! field order and the trailing line feed are part of the wire contract.
//!
//! ```text
//! request:  METHOD\nPATH?QUERY\nTIMESTAMP\nNONCE\nBODY\n
//! response: TIMESTAMP\nNONCE\nBODY\n
//! ```

use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{Rng, distributions::Alphanumeric};
use serde_json::{Map, Value};

use crate::error::{PayError, Result};

/// Authorization scheme of the modern protocol.
pub const AUTHORIZATION_SCHEME: &str = "WECHATPAY2-SHA256-RSA2048";

/// Default nonce length.
pub const NONCE_LENGTH: usize = 32;

/// Generates an alphanumeric (`[0-9A-Za-z]`) nonce of exactly `length` characters.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::formatter;
///
/// let nonce = formatter::nonce(16);
/// assert_eq!(nonce.len(), 16);
/// assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
/// ```
#[must_use]
pub fn nonce(length: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Builds the string-to-sign of an outbound request.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::formatter;
///
/// assert_eq!(
///     formatter::canonical_request("POST", "/v3/pay", 111, "abc", "{}"),
///     "POST\n/v3/pay\n111\nabc\n{}\n"
/// );
/// ```
#[must_use]
pub fn canonical_request(
    method: &str,
    path_and_query: &str,
    timestamp: impl Display,
    nonce: &str,
    body: &str,
) -> String {
    format!("{method}\n{path_and_query}\n{timestamp}\n{nonce}\n{body}\n")
}

/// Builds the string-to-sign of an inbound response or callback.
#[must_use]
pub fn canonical_response(timestamp: impl Display, nonce: &str, body: &str) -> String {
    format!("{timestamp}\n{nonce}\n{body}\n")
}

/// Builds the `Authorization` header value of the modern protocol.
///
/// # Examples
///
/// ```
/// use wechatpay_bridge::formatter;
///
/// assert_eq!(
///     formatter::authorization("101", "n1", "sig", "222", "SERIAL"),
///     r#"WECHATPAY2-SHA256-RSA2048 mchid="101",nonce_str="n1",signature="sig",timestamp="222",serial_no="SERIAL""#
/// );
/// ```
#[must_use]
pub fn authorization(
    mchid: &str,
    nonce: &str,
    signature: &str,
    timestamp: impl Display,
    serial: &str,
) -> String {
    format!(
        "{AUTHORIZATION_SCHEME} mchid=\"{mchid}\",nonce_str=\"{nonce}\",signature=\"{signature}\",timestamp=\"{timestamp}\",serial_no=\"{serial}\""
    )
}

/// Returns a copy of `fields` with keys in ascending code point order.
#[must_use]
pub fn ksort(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<_> = fields.iter().collect();
    entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    entries.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Renders a field value the way the legacy protocol signs it.
///
/// `None` means the field is skipped (null or empty string).
pub(crate) fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

/// Joins `key=value` pairs with `&`, in the mapping's iteration order.
///
/// Empty values and the `sign` field are left out. Values are not
/// URL-encoded; this is a signing input, not a query string.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wechatpay_bridge::formatter;
///
/// let fields = json!({"b": "2", "a": "1", "sign": "X", "c": ""});
/// let sorted = formatter::ksort(fields.as_object().unwrap());
/// assert_eq!(formatter::query_string_like(&sorted), "a=1&b=2");
/// ```
#[must_use]
pub fn query_string_like(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != "sign")
        .filter_map(|(key, value)| field_text(value).map(|text| format!("{key}={text}")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decodes one backtick-prefixed line of a provider bill.
///
/// Bill cells look like `` `value``; cells are split on `` {separator}` ``.
/// Missing trailing cells decode as empty strings.
#[must_use]
pub fn cast_csv_line(
    row: &str,
    keys: &[impl AsRef<str>],
    skip_first_char: bool,
    separator: char,
) -> Map<String, Value> {
    let row = if skip_first_char {
        row.char_indices().nth(1).map_or("", |(idx, _)| &row[idx..])
    } else {
        row
    };
    let delimiter = format!("{separator}`");
    let mut cells = row.split(delimiter.as_str());
    keys.iter()
        .map(|key| {
            let cell = cells.next().unwrap_or_default();
            (key.as_ref().to_owned(), Value::String(cell.to_owned()))
        })
        .collect()
}

/// A decoded trade or fund-flow bill.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bill {
    /// One entry per data row, keyed by the header row.
    pub rows: Vec<Map<String, Value>>,
    /// The summary row, keyed by the summary header row.
    pub summary: Map<String, Value>,
}

/// Decodes a provider bill.
///
/// Layout: optional BOM, a plain header row, `N` backtick-prefixed data rows,
/// then a plain summary header row and one backtick-prefixed summary row,
/// followed by the final line terminator.
///
/// # Errors
///
/// Returns [`PayError::Format`] when the header or summary block is missing.
pub fn cast_csv_bill(text: &str) -> Result<Bill> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if lines.len() < 3 {
        return Err(PayError::Format(format!(
            "bill needs a header and a summary block, got {} lines",
            lines.len()
        )));
    }

    let summary_values = lines.pop().unwrap_or_default();
    let summary_keys: Vec<&str> = lines.pop().unwrap_or_default().split(',').collect();
    let header: Vec<&str> = lines.remove(0).split(',').collect();

    Ok(Bill {
        rows: lines.iter().map(|row| cast_csv_line(row, &header, true, ',')).collect(),
        summary: cast_csv_line(summary_values, &summary_keys, true, ','),
    })
}

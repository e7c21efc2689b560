//! Endpoint path construction.
//!
//! An [`Endpoint`] is an ordered list of path segments. Segments written as
//! `{name}` are placeholders filled by [`Endpoint::resolve`]; substituted
//! values are percent-encoded as path segments.

use std::{borrow::Borrow, collections::HashMap, fmt, hash::Hash};

use url::Url;

use crate::error::{PayError, Result};

/// A provider endpoint path with optional `{placeholder}` segments.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
///
/// use wechatpay_bridge::client::Endpoint;
///
/// # fn example() -> wechatpay_bridge::error::Result<()> {
/// let endpoint = Endpoint::new()
///     .join("v3")
///     .join("pay")
///     .join("transactions")
///     .join("out-trade-no")
///     .join("{out_trade_no}");
///
/// let path = endpoint.resolve(&HashMap::from([("out_trade_no", "1217752501201407033233368018")]))?;
/// assert_eq!(path, "/v3/pay/transactions/out-trade-no/1217752501201407033233368018");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Endpoint {
    segments: Vec<String>,
}

impl Endpoint {
    /// Creates the root endpoint `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a template such as `/v3/refund/domestic/refunds/{out_refund_no}`.
    #[must_use]
    pub fn parse(template: &str) -> Self {
        template.split('/').filter(|s| !s.is_empty()).fold(Self::new(), Self::join)
    }

    /// Appends one segment.
    #[must_use]
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Placeholder names, in path order.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments.iter().filter_map(|s| placeholder(s)).collect()
    }

    /// Substitutes every placeholder and renders the path.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::Precondition`] when a placeholder has no value, or
    /// when a literal segment or a value is a `.`/`..` segment.
    pub fn resolve<K, V>(&self, values: &HashMap<K, V>) -> Result<String>
    where
        K: Borrow<str> + Eq + Hash,
        V: AsRef<str>,
    {
        let mut resolved = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match placeholder(segment) {
                Some(name) => {
                    let value = values.get(name).ok_or_else(|| {
                        PayError::Precondition(format!("missing value for placeholder {{{name}}}"))
                    })?;
                    let value = value.as_ref();
                    if value == "." || value == ".." {
                        return Err(PayError::Precondition(format!(
                            "invalid value for placeholder {{{name}}}: {value}"
                        )));
                    }
                    resolved.push(value);
                }
                None if segment == ".." || segment == "." => {
                    return Err(PayError::Precondition(format!("invalid path segment: {segment}")));
                }
                None => resolved.push(segment.as_str()),
            }
        }

        // Url's segment encoder handles '/', '?', '#', '%' and non-ASCII
        let mut url = Url::parse("https://endpoint.invalid/")
            .map_err(|e| PayError::Precondition(format!("endpoint base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| PayError::Precondition("endpoint base cannot hold segments".to_owned()))?
            .pop_if_empty()
            .extend(resolved);
        Ok(url.path().to_owned())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}').filter(|name| !name.is_empty())
}

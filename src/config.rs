//! Client configuration types.
//!
//! This module defines TOML-deserializable configuration for
//! [`PaymentClient`](crate::client::PaymentClient). Secrets never live in the
//! file: key material is referenced by path, the APIv2 secret by the name of
//! the environment variable holding it.
//!
//! # Examples
//!
//! ```toml
//! base_url = "https://api.mch.weixin.qq.com"
//! mchid = "1900000109"
//! serial = "3775B6A45ACD588826D15E583A95F5DD00000000"
//! private_key_path = "/etc/wechatpay/apiclient_key.pem"
//! platform_certificate_paths = ["/etc/wechatpay/platform.pem"]
//! apiv2_secret_env = "WECHATPAY_APIV2_SECRET"
//!
//! [http]
//! timeout_secs = 30
//! http_version = "http1"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use url::Url;

use crate::error::{PayError, Result};

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Root client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the provider API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Merchant id.
    pub mchid: String,

    /// Serial of the merchant certificate.
    pub serial: String,

    /// PEM file holding the merchant private key.
    pub private_key_path: PathBuf,

    /// PEM file holding the merchant certificate, checked against the key.
    #[serde(default)]
    pub merchant_certificate_path: Option<PathBuf>,

    /// Provider certificates trusted from the start.
    #[serde(default)]
    pub platform_certificate_paths: Vec<PathBuf>,

    /// Environment variable holding the APIv2 secret; enables the legacy protocol.
    #[serde(default)]
    pub apiv2_secret_env: Option<String>,

    /// HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] for malformed TOML or any failed check
    /// of [`validate`](Self::validate).
    ///
    /// # Examples
    ///
    /// ```
    /// use wechatpay_bridge::config::ClientConfig;
    ///
    /// let config = ClientConfig::from_toml(
    ///     r#"
    ///     mchid = "1900000109"
    ///     serial = "3775B6A45ACD588826D15E583A95F5DD00000000"
    ///     private_key_path = "apiclient_key.pem"
    ///     "#,
    /// )
    /// .unwrap();
    /// assert_eq!(config.base_url, "https://api.mch.weixin.qq.com");
    /// ```
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml).map_err(|e| PayError::ConfigError(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path)
            .map_err(|e| PayError::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&toml)
    }

    /// Validates the configuration.
    ///
    /// This method checks for:
    /// - Base URL must be HTTPS and not localhost or loopback
    /// - Merchant id and serial must be present
    /// - Key and certificate paths must not contain traversal sequences
    /// - The secret environment variable name must be alphanumeric or underscore
    /// - HTTP timeouts must be in range
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] naming the first failed check.
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;

        if self.mchid.trim().is_empty() {
            return Err(PayError::ConfigError("mchid must not be empty".to_owned()));
        }
        if self.serial.trim().is_empty() {
            return Err(PayError::ConfigError("serial must not be empty".to_owned()));
        }

        validate_file_path("private_key_path", &self.private_key_path)?;
        if let Some(path) = &self.merchant_certificate_path {
            validate_file_path("merchant_certificate_path", path)?;
        }
        for path in &self.platform_certificate_paths {
            validate_file_path("platform_certificate_paths", path)?;
        }

        if let Some(name) = &self.apiv2_secret_env {
            validate_env_name(name)?;
        }

        self.http.validate()
    }

    /// Reads the APIv2 secret from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`PayError::ConfigError`] if the variable is unset or empty.
    pub fn apiv2_secret(&self) -> Result<Option<String>> {
        let Some(name) = &self.apiv2_secret_env else {
            return Ok(None);
        };
        match std::env::var(name) {
            Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
            _ => Err(PayError::ConfigError(format!("environment variable {name} is not set"))),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let url = Url::parse(base_url)
        .map_err(|e| PayError::ConfigError(format!("invalid base_url '{base_url}': {e}")))?;

    if url.scheme() != "https" {
        return Err(PayError::ConfigError(format!(
            "base_url must use HTTPS, got: {}",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        if host == "localhost"
            || host == "::1"
            || host == "[::1]"
            || host == "0.0.0.0"
            || host.starts_with("127.")
        {
            return Err(PayError::ConfigError(format!(
                "base_url must not be localhost or loopback: {host}"
            )));
        }
    }

    Ok(())
}

fn validate_file_path(name: &str, path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(PayError::ConfigError(format!("{name} must not be empty")));
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(PayError::ConfigError(format!(
            "{name} contains path traversal sequence '..': {text}"
        )));
    }
    Ok(())
}

fn validate_env_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PayError::ConfigError(format!(
            "environment variable name must be alphanumeric or underscore: {name}"
        )));
    }
    Ok(())
}

/// HTTP client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Maximum idle connections per host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// HTTP version preference.
    #[serde(default)]
    pub http_version: HttpVersion,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: default_pool_max_idle(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_version: HttpVersion::default(),
        }
    }
}

impl HttpConfig {
    /// Validates configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns error if timeout values are outside valid ranges:
    /// - `timeout_secs`: must be 1-300 seconds
    /// - `connect_timeout_secs`: must be 1-60 seconds
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(PayError::ConfigError(
                "timeout_secs must be between 1 and 300".to_owned(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 60 {
            return Err(PayError::ConfigError(
                "connect_timeout_secs must be between 1 and 60".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns timeout as Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns connect timeout as Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// HTTP version preference.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersion {
    /// HTTP/1.1 only.
    Http1,
    /// HTTP/2 only (prior knowledge).
    Http2,
    /// Let the connection negotiate.
    #[default]
    Auto,
}

const fn default_pool_max_idle() -> usize {
    32
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        mchid = "1900000109"
        serial = "3775B6A45ACD588826D15E583A95F5DD00000000"
        private_key_path = "keys/apiclient_key.pem"
    "#;

    fn with(extra: &str) -> String {
        format!("{MINIMAL}\n{extra}")
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ClientConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.platform_certificate_paths.is_empty());
        assert!(config.apiv2_secret_env.is_none());
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(config.http.http_version, HttpVersion::Auto);
    }

    #[test]
    fn test_full_config() {
        let config = ClientConfig::from_toml(&with(
            r#"
            base_url = "https://api2.mch.weixin.qq.com"
            merchant_certificate_path = "keys/apiclient_cert.pem"
            platform_certificate_paths = ["keys/a.pem", "keys/b.pem"]
            apiv2_secret_env = "WECHATPAY_APIV2_SECRET"

            [http]
            pool_max_idle_per_host = 8
            timeout_secs = 60
            http_version = "http2"
            "#,
        ))
        .unwrap();
        assert_eq!(config.base_url, "https://api2.mch.weixin.qq.com");
        assert_eq!(config.platform_certificate_paths.len(), 2);
        assert_eq!(config.http.pool_max_idle_per_host, 8);
        assert_eq!(config.http.timeout(), Duration::from_secs(60));
        assert_eq!(config.http.http_version, HttpVersion::Http2);
    }

    #[test]
    fn test_missing_required_field() {
        let result = ClientConfig::from_toml(r#"mchid = "1""#);
        assert!(matches!(result, Err(PayError::ConfigError(_))));
    }

    #[test]
    fn test_base_url_must_be_https() {
        let result = ClientConfig::from_toml(&with(r#"base_url = "http://api.mch.weixin.qq.com""#));
        assert!(matches!(result, Err(PayError::ConfigError(msg)) if msg.contains("HTTPS")));
    }

    #[test]
    fn test_base_url_rejects_loopback() {
        for host in ["localhost", "127.0.0.1", "127.1.2.3", "[::1]"] {
            let result = ClientConfig::from_toml(&with(&format!(r#"base_url = "https://{host}""#)));
            assert!(matches!(result, Err(PayError::ConfigError(_))), "{host} accepted");
        }
    }

    #[test]
    fn test_empty_identity_rejected() {
        let toml = r#"
            mchid = " "
            serial = "S"
            private_key_path = "k.pem"
        "#;
        assert!(matches!(ClientConfig::from_toml(toml), Err(PayError::ConfigError(msg)) if msg.contains("mchid")));
    }

    #[test]
    fn test_path_traversal_rejected() {
        let toml = r#"
            mchid = "1"
            serial = "S"
            private_key_path = "../../etc/shadow"
        "#;
        assert!(matches!(ClientConfig::from_toml(toml), Err(PayError::ConfigError(msg)) if msg.contains("traversal")));
    }

    #[test]
    fn test_env_name_validated() {
        let result = ClientConfig::from_toml(&with(r#"apiv2_secret_env = "SECRET; rm -rf /""#));
        assert!(matches!(result, Err(PayError::ConfigError(_))));
    }

    #[test]
    fn test_apiv2_secret_unset_variable() {
        let config = ClientConfig::from_toml(&with(
            r#"apiv2_secret_env = "WECHATPAY_BRIDGE_TEST_UNSET_VARIABLE""#,
        ))
        .unwrap();
        assert!(matches!(config.apiv2_secret(), Err(PayError::ConfigError(_))));

        let config = ClientConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.apiv2_secret().unwrap(), None);
    }

    #[test]
    fn test_http_config_validate_bounds() {
        let ok = HttpConfig { timeout_secs: 300, connect_timeout_secs: 60, ..Default::default() };
        assert!(ok.validate().is_ok());

        let zero = HttpConfig { timeout_secs: 0, ..Default::default() };
        assert!(zero.validate().is_err());

        let long = HttpConfig { connect_timeout_secs: 61, ..Default::default() };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_http_version_invalid_value() {
        let result = ClientConfig::from_toml(&with("[http]\nhttp_version = \"http3\""));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load("/nonexistent/wechatpay.toml");
        assert!(matches!(result, Err(PayError::ConfigError(msg)) if msg.contains("cannot read")));
    }
}

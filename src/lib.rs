//! WeChat Pay Bridge: Request Signing and Response Verification
//!
//! A Rust library that sits between a merchant backend and the WeChat Pay
//! APIs, signing every outgoing request and refusing every response whose
//! integrity cannot be established.
//!
//! # What is WeChat Pay Bridge?
//!
//! WeChat Pay exposes two protocol generations that are still both in use:
//!
//! - **Modern (APIv3)**: JSON bodies, `SHA256withRSA` request signatures in the
//!   `Authorization` header, provider signatures in `Wechatpay-*` headers, and
//!   AES-256-GCM encrypted callback resources
//! - **Legacy (APIv2)**: flat XML documents signed with a shared secret (`MD5` or
//!   `HMAC-SHA256`) carried in the `sign` field
//!
//! This library provides both pipelines behind one client, plus the helpers
//! around them: platform certificate management, sensitive field encryption,
//! notification verification and bill parsing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Merchant System │  order service, refund worker, callback handler
//! └────────┬────────┘
//!          │ OutboundRequest (method, path, payload)
//!          │
//! ┌────────▼─────────────────────────────────────────┐
//! │          WeChat Pay Bridge (this crate)          │
//! │  ┌───────────────────┐  ┌─────────────────────┐  │
//! │  │ ModernInterceptor │  │  LegacyTransformer  │  │
//! │  │ (RSA, JSON,       │  │  (MD5/HMAC, XML,    │  │
//! │  │  certificates)    │  │   sign field)       │  │
//! │  └───────────────────┘  └─────────────────────┘  │
//! │             PaymentClient (reqwest)              │
//! └────────┬─────────────────────────────────────────┘
//!          │ HTTPS
//!          │
//! ┌────────▼────────┐
//! │   WeChat Pay    │  api.mch.weixin.qq.com
//! └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## 1. Modern Call
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wechatpay_bridge::{
//!     CertificateRegistry, ModernInterceptor, PaymentClient, Protocol,
//!     pipeline::OutboundRequest,
//! };
//!
//! # async fn example() -> wechatpay_bridge::Result<()> {
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
//!         OutboundRequest::get("/v3/pay/transactions/id/4200000000000000?mchid=1900000109"),
//!     )
//!     .await?;
//! println!("trade_state: {}", response.data["trade_state"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## 2. Legacy Signing
//!
//! ```rust
//! use serde_json::{Map, Value};
//! use wechatpay_bridge::LegacyTransformer;
//!
//! # fn example() -> wechatpay_bridge::Result<()> {
//! let transformer = LegacyTransformer::new("1900000109", "192006250b4c09247ec02edce69f6a2d");
//!
//! let mut fields = Map::new();
//! fields.insert("appid".into(), Value::from("wxd930ea5d5a258f4f"));
//! fields.insert("mch_id".into(), Value::from("1900000109"));
//! fields.insert("out_trade_no".into(), Value::from("20150806125346"));
//!
//! let sealed = transformer.seal("/pay/orderquery", fields, false)?;
//! assert!(sealed.contains_key("nonce_str"));
//! assert_eq!(sealed["sign"].as_str().map(str::len), Some(32));
//! # Ok(())
//! # }
//! ```
//!
//! ## 3. Callback Verification
//!
//! ```rust,no_run
//! use reqwest::header::HeaderMap;
//! use wechatpay_bridge::ModernInterceptor;
//!
//! # fn example(interceptor: &ModernInterceptor, headers: &HeaderMap, body: &[u8]) -> wechatpay_bridge::Result<()> {
//! let notification = interceptor.verify_notification(headers, body)?;
//! let resource = ModernInterceptor::decrypt_resource(&notification["resource"], b"0123456789abcdef0123456789abcdef")?;
//! println!("paid: {}", resource["transaction_id"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`client`]: HTTP client, protocol selection, downloads, endpoint paths
//! - [`modern`]: APIv3 signing, response verification, platform certificates
//! - [`legacy`]: APIv2 signing, XML codec, status checks
//! - [`pipeline`]: Request and response types shared by both protocols
//! - [`formatter`]: Nonces, timestamps, canonical strings, bill parsing
//! - [`crypto`]: Hashes, RSA, AES-GCM primitives
//! - [`config`]: TOML configuration with validation
//! - [`error`]: Error types with recovery guidance
//!
//! # Security Considerations
//!
//! ## Key Management
//!
//! - **Never hardcode keys**: load the merchant key from a file and the APIv2
//!   secret from an environment variable ([`config::ClientConfig`])
//! - **Rotate platform certificates**: import fresh listings with
//!   [`CertificateRegistry::import_listing`]; readers are never blocked
//!
//! ## Integrity
//!
//! - **Fail closed**: a response that cannot be verified is an error, never data
//! - **Raw bytes**: signatures are checked over the exact bytes received
//! - **Constant time**: signature comparisons use [`crypto::constant_time_equals`]
//!
//! # Error Handling
//!
//! All operations return [`Result<T, PayError>`](error::Result). Integrity
//! failures and business failures are separate variants:
//!
//! ```rust
//! use wechatpay_bridge::{PayError, PaymentClient, Protocol, pipeline::OutboundRequest};
//!
//! # async fn example(client: &PaymentClient) {
//! match client.execute(Protocol::Legacy, OutboundRequest::get("/pay/orderquery")).await {
//!     Ok(response) => println!("Success: {}", response.data),
//!     Err(PayError::BusinessFailure { code, message, .. }) => {
//!         eprintln!("Rejected by provider: {code} {message}");
//!         // Inspect the code; the request was delivered and answered
//!     }
//!     Err(e) if e.is_integrity_failure() => {
//!         eprintln!("Untrusted response: {e}");
//!         // Never act on this response; refresh certificates or alert
//!     }
//!     Err(PayError::HttpError(e)) => {
//!         eprintln!("Network error: {e}");
//!         // Retry if the call is idempotent
//!     }
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and the RustCrypto crates"
)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod formatter;
pub mod legacy;
pub mod modern;
pub mod pipeline;

#[cfg(test)]
mod tests;

pub use client::{PaymentClient, Protocol};
pub use error::{PayError, Result};
pub use legacy::LegacyTransformer;
pub use modern::{CertificateRegistry, ModernInterceptor};
pub use pipeline::{OutboundRequest, Payload, VerifiedResponse};

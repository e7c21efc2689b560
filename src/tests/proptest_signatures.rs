use proptest::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Map, Value};

use crate::{
    crypto::{
        aead,
        rsa::{self, PrivateKey, PublicKey},
    },
    error::PayError,
    formatter,
    legacy::{HMAC_SHA256, LegacyTransformer},
    modern::{CertificateRegistry, HEADER_NONCE, HEADER_SERIAL, HEADER_SIGNATURE, HEADER_TIMESTAMP, ModernInterceptor},
};

const MERCHANT_KEY: &str = include_str!("../../tests/fixtures/merchant_private_key.pem");
const MERCHANT_PUB: &str = include_str!("../../tests/fixtures/merchant_public_key.pem");
const PLATFORM_KEY: &str = include_str!("../../tests/fixtures/platform_private_key.pem");
const PLATFORM_CERT: &str = include_str!("../../tests/fixtures/platform_certificate.pem");
const PLATFORM_SERIAL: &str = "5157F09EFDC096DE15EBE81A47057A7232F1B8E1";

fn legacy_fields() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("k_[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 1..12).prop_map(|entries| {
        entries.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
    })
}

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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_legacy_seal_verify_roundtrip(
        fields in legacy_fields(),
        secret in "[a-zA-Z0-9]{32}",
        hmac in any::<bool>(),
    ) {
        let transformer = LegacyTransformer::new("10000100", secret);
        let mut fields = fields;
        if hmac {
            fields.insert("sign_type".to_owned(), Value::from(HMAC_SHA256));
        }

        let sealed = transformer.seal("/pay/orderquery", fields, false).unwrap();
        let sign = sealed["sign"].as_str().unwrap();
        prop_assert_eq!(sign.len(), if hmac { 64 } else { 32 });
        prop_assert!(transformer.verify(&sealed).is_ok());
    }

    #[test]
    fn test_legacy_tampered_field_rejected(
        fields in legacy_fields(),
        secret in "[a-zA-Z0-9]{32}",
    ) {
        let transformer = LegacyTransformer::new("10000100", secret);
        let mut sealed = transformer.seal("/pay/orderquery", fields, false).unwrap();
        sealed.insert("nonce_str".to_owned(), Value::from("tampered"));
        let result = transformer.verify(&sealed);
        prop_assert!(matches!(result, Err(PayError::SignatureMismatch { .. })), "unexpected: {:?}", result);
    }

    #[test]
    fn test_aead_roundtrip(
        key in any::<[u8; 32]>(),
        iv in any::<[u8; 12]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        aad in "[a-z]{0,16}",
    ) {
        let sealed = aead::encrypt(&key, &iv, &plaintext, aad.as_bytes()).unwrap();
        let opened = aead::decrypt(&key, &iv, &sealed, aad.as_bytes()).unwrap();
        prop_assert_eq!(opened, plaintext);

        let wrong_aad = format!("{aad}x");
        let result = aead::decrypt(&key, &iv, &sealed, wrong_aad.as_bytes());
        prop_assert!(matches!(result, Err(PayError::AuthenticationFailed)));
    }
}

proptest! {
    // 2048-bit RSA is slow; a handful of cases covers the framing
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_authorization_verifies_with_merchant_key(
        method in "GET|POST|PUT|PATCH|DELETE",
        path in "/v3/[a-z0-9/_]{1,32}",
        body in "[ -~]{0,128}",
    ) {
        let authorization = interceptor().authorize(&method, &path, &body).unwrap();
        let params = authorization.strip_prefix("WECHATPAY2-SHA256-RSA2048 ").unwrap();
        let field = |name: &str| {
            params
                .split(',')
                .find_map(|pair| pair.strip_prefix(&format!("{name}=\"")).map(|v| v.trim_end_matches('"').to_owned()))
                .unwrap()
        };

        let message = formatter::canonical_request(&method, &path, field("timestamp"), &field("nonce_str"), &body);
        let public = PublicKey::from_pem(MERCHANT_PUB).unwrap();
        prop_assert!(rsa::verify(message.as_bytes(), &field("signature"), &public).unwrap());
    }

    #[test]
    fn test_response_verification_detects_body_change(
        body in "[ -~]{0,128}",
        nonce in "[a-zA-Z0-9]{32}",
        timestamp in 1_600_000_000u64..1_900_000_000,
    ) {
        let key = PrivateKey::from_pem(PLATFORM_KEY).unwrap();
        let message = formatter::canonical_response(timestamp, &nonce, &body);
        let signature = rsa::sign(message.as_bytes(), &key).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_TIMESTAMP, HeaderValue::from_str(&timestamp.to_string()).unwrap());
        headers.insert(HEADER_NONCE, HeaderValue::from_str(&nonce).unwrap());
        headers.insert(HEADER_SERIAL, HeaderValue::from_static(PLATFORM_SERIAL));
        headers.insert(HEADER_SIGNATURE, HeaderValue::from_str(&signature).unwrap());

        let interceptor = interceptor();
        prop_assert!(interceptor.verify(&headers, body.as_bytes()).is_ok());

        let tampered = format!("{body} ");
        let result = interceptor.verify(&headers, tampered.as_bytes());
        prop_assert!(matches!(result, Err(PayError::SignatureRejected { .. })), "unexpected: {:?}", result);
    }
}

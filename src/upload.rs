//! Signed upload URLs.
//!
//! Clients never write to storage directly. They ask for an upload
//! authorization, receive a time-limited URL whose query string carries an
//! HMAC-SHA256 signature over the upload's parameters, and PUT the document
//! there. The object endpoint recomputes the signature before accepting the
//! body, so tampering with the bucket, key, content type, or expiry
//! invalidates the URL. A URL stays usable until its expiry and may be
//! replayed within that window; uploads are idempotent puts, so a replay only
//! rewrites the same object.

use ring::hmac;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::{StorageConfig, UploadConfig};

/// Shortest accepted upload validity, in seconds.
pub const MIN_EXPIRY_SECONDS: i64 = 1;
/// Longest accepted upload validity, in seconds.
pub const MAX_EXPIRY_SECONDS: i64 = 3600;
/// Validity applied when the request does not specify one.
pub const DEFAULT_EXPIRY_SECONDS: i64 = 900;

/// Errors produced while authorizing or verifying uploads.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The requested key does not fall under the raw prefix.
    #[error("key must start with {0}")]
    KeyOutsideRawPrefix(String),
    /// The requested validity is outside the accepted window.
    #[error("expiresInSeconds must be between {MIN_EXPIRY_SECONDS} and {MAX_EXPIRY_SECONDS}")]
    ExpiryOutOfRange,
    /// The signature does not decode as hex.
    #[error("malformed signature")]
    MalformedSignature,
    /// The signature does not match the upload parameters.
    #[error("signature mismatch")]
    InvalidSignature,
    /// The URL's expiry has passed.
    #[error("upload authorization expired")]
    Expired,
}

/// A signed, time-limited authorization to PUT one object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    /// Full URL to PUT the document body to.
    pub url: String,
    /// HTTP method the URL is valid for. Always `PUT`.
    pub method: String,
    /// Bucket the object will land in.
    pub bucket: String,
    /// Object key the upload was authorized for.
    pub key: String,
    /// Seconds the URL remains valid.
    pub expires_in_seconds: i64,
}

/// Issues and verifies signed upload URLs.
pub struct UploadAuthorizer {
    key: hmac::Key,
    public_base_url: String,
    raw_prefix: String,
}

impl UploadAuthorizer {
    /// Build an authorizer from the upload and storage settings.
    pub fn new(upload: &UploadConfig, storage: &StorageConfig) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, upload.signing_secret.as_bytes()),
            public_base_url: upload.public_base_url.trim_end_matches('/').to_string(),
            raw_prefix: storage.raw_prefix.clone(),
        }
    }

    /// Issue a signed URL for uploading `key` with the given content type.
    ///
    /// Keys outside the raw prefix are rejected: only objects under it are
    /// picked up for ingestion, so authorizing anything else would strand the
    /// upload.
    pub fn authorize(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: i64,
    ) -> Result<SignedUpload, UploadError> {
        if !key.starts_with(&self.raw_prefix) {
            return Err(UploadError::KeyOutsideRawPrefix(self.raw_prefix.clone()));
        }
        if !(MIN_EXPIRY_SECONDS..=MAX_EXPIRY_SECONDS).contains(&expires_in) {
            return Err(UploadError::ExpiryOutOfRange);
        }

        let expires_at = OffsetDateTime::now_utc().unix_timestamp() + expires_in;
        let tag = hmac::sign(
            &self.key,
            canonical_payload(bucket, key, content_type, expires_at).as_bytes(),
        );
        let url = format!(
            "{}/objects/{}/{}?expires={}&signature={}",
            self.public_base_url,
            bucket,
            encode_key(key),
            expires_at,
            hex::encode(tag.as_ref()),
        );
        Ok(SignedUpload {
            url,
            method: "PUT".to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires_in_seconds: expires_in,
        })
    }

    /// Verify an upload against the signature and expiry carried in its URL.
    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_at: i64,
        signature: &str,
    ) -> Result<(), UploadError> {
        self.verify_at(
            OffsetDateTime::now_utc().unix_timestamp(),
            bucket,
            key,
            content_type,
            expires_at,
            signature,
        )
    }

    fn verify_at(
        &self,
        now: i64,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_at: i64,
        signature: &str,
    ) -> Result<(), UploadError> {
        let tag = hex::decode(signature).map_err(|_| UploadError::MalformedSignature)?;
        hmac::verify(
            &self.key,
            canonical_payload(bucket, key, content_type, expires_at).as_bytes(),
            &tag,
        )
        .map_err(|_| UploadError::InvalidSignature)?;
        if now > expires_at {
            return Err(UploadError::Expired);
        }
        Ok(())
    }
}

/// The string signed for an upload. Every parameter that changes where or
/// what the client may write is bound into it.
fn canonical_payload(bucket: &str, key: &str, content_type: &str, expires_at: i64) -> String {
    format!("PUT\n{bucket}\n{key}\n{content_type}\n{expires_at}")
}

/// Percent-encode an object key for use in a URL path, keeping `/` separators.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{byte:02X}"));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn authorizer() -> UploadAuthorizer {
        UploadAuthorizer::new(
            &UploadConfig {
                signing_secret: "test-secret".into(),
                public_base_url: "http://127.0.0.1:8080/".into(),
            },
            &StorageConfig {
                root: PathBuf::from("data"),
                bucket: "documents".into(),
                raw_prefix: "raw/".into(),
                done_prefix: "done/".into(),
            },
        )
    }

    fn parse_query(url: &str) -> (i64, String) {
        let query = url.split_once('?').expect("url has a query").1;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').expect("name=value");
            match name {
                "expires" => expires = Some(value.parse().expect("expires is numeric")),
                "signature" => signature = Some(value.to_string()),
                other => panic!("unexpected query parameter {other}"),
            }
        }
        (expires.expect("expires present"), signature.expect("signature present"))
    }

    #[test]
    fn issued_urls_verify() {
        let authorizer = authorizer();
        let signed = authorizer
            .authorize("documents", "raw/report.pdf", "application/pdf", 900)
            .expect("authorization should succeed");

        assert_eq!(signed.method, "PUT");
        assert_eq!(signed.bucket, "documents");
        assert_eq!(signed.key, "raw/report.pdf");
        assert_eq!(signed.expires_in_seconds, 900);
        assert!(signed.url.starts_with("http://127.0.0.1:8080/objects/documents/raw/report.pdf?"));

        let (expires, signature) = parse_query(&signed.url);
        authorizer
            .verify("documents", "raw/report.pdf", "application/pdf", expires, &signature)
            .expect("signature should verify");
    }

    #[test]
    fn rejects_keys_outside_the_raw_prefix() {
        let error = authorizer()
            .authorize("documents", "done/report.pdf", "application/pdf", 900)
            .expect_err("authorization should fail");
        assert!(matches!(error, UploadError::KeyOutsideRawPrefix(_)));
        assert_eq!(error.to_string(), "key must start with raw/");
    }

    #[test]
    fn rejects_expiry_outside_the_accepted_window() {
        let authorizer = authorizer();
        for expiry in [0, -5, 3601] {
            let error = authorizer
                .authorize("documents", "raw/a.txt", "text/plain", expiry)
                .expect_err("authorization should fail");
            assert!(matches!(error, UploadError::ExpiryOutOfRange), "expiry {expiry}");
        }
        assert!(authorizer.authorize("documents", "raw/a.txt", "text/plain", 1).is_ok());
        assert!(authorizer.authorize("documents", "raw/a.txt", "text/plain", 3600).is_ok());
    }

    #[test]
    fn tampered_parameters_fail_verification() {
        let authorizer = authorizer();
        let signed = authorizer
            .authorize("documents", "raw/a.txt", "text/plain", 900)
            .expect("authorization should succeed");
        let (expires, signature) = parse_query(&signed.url);

        for (bucket, key, content_type, expiry) in [
            ("documents", "raw/b.txt", "text/plain", expires),
            ("other", "raw/a.txt", "text/plain", expires),
            ("documents", "raw/a.txt", "application/pdf", expires),
            ("documents", "raw/a.txt", "text/plain", expires + 1000),
        ] {
            let error = authorizer
                .verify(bucket, key, content_type, expiry, &signature)
                .expect_err("verification should fail");
            assert!(matches!(error, UploadError::InvalidSignature));
        }
    }

    #[test]
    fn expired_urls_are_rejected_even_with_a_valid_signature() {
        let authorizer = authorizer();
        let signed = authorizer
            .authorize("documents", "raw/a.txt", "text/plain", 60)
            .expect("authorization should succeed");
        let (expires, signature) = parse_query(&signed.url);

        let error = authorizer
            .verify_at(expires + 1, "documents", "raw/a.txt", "text/plain", expires, &signature)
            .expect_err("verification should fail");
        assert!(matches!(error, UploadError::Expired));

        authorizer
            .verify_at(expires, "documents", "raw/a.txt", "text/plain", expires, &signature)
            .expect("boundary instant should verify");
    }

    #[test]
    fn malformed_signature_encoding_is_rejected() {
        let error = authorizer()
            .verify("documents", "raw/a.txt", "text/plain", i64::MAX, "zz-not-hex")
            .expect_err("verification should fail");
        assert!(matches!(error, UploadError::MalformedSignature));
    }

    #[test]
    fn keys_with_spaces_are_percent_encoded() {
        let signed = authorizer()
            .authorize("documents", "raw/quarterly report.pdf", "application/pdf", 900)
            .expect("authorization should succeed");
        assert!(signed.url.contains("/objects/documents/raw/quarterly%20report.pdf?"));
        assert_eq!(signed.key, "raw/quarterly report.pdf");
    }
}

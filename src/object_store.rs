//! S3-compatible object store client.
//!
//! Creates buckets and uploads raw report files to MinIO (or any
//! S3-compatible service) using the S3 REST API with AWS Signature V4
//! authentication. Requests use path-style addressing
//! (`{scheme}://{endpoint}/{bucket}/{key}`), which is what MinIO expects and
//! what makes the returned object URL reconstructable.
//!
//! Signing uses only pure-Rust dependencies (`hmac`, `sha2`).
//!
//! # Credentials
//!
//! Read from `[object_store]` (`access_key`, `secret_key`), which
//! `MINIO_ACCESS_KEY` / `MINIO_SECRET_KEY` override. When neither is set the
//! standard `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
//! `AWS_SESSION_TOKEN` variables are tried.
//!
//! No request is retried here. Callers decide whether to try again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::ObjectStoreConfig;
use crate::error::StorageError;

/// Blob storage used by the orchestrator for raw report files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` if it does not exist. Safe to call before every upload.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Store `bytes` under `bucket/key` and return the object's URL.
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>)
        -> Result<String, StorageError>;
}

type HmacSha256 = Hmac<Sha256>;

/// Object store client speaking the S3 REST API.
pub struct S3Client {
    scheme: &'static str,
    /// `host[:port]`, without scheme or trailing slash.
    host: String,
    region: String,
    creds: S3Credentials,
    http: reqwest::Client,
}

impl S3Client {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Fails if no credentials are configured or the HTTP client cannot be built.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let creds = S3Credentials::resolve(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to build object store HTTP client")?;

        Ok(Self {
            scheme: if config.secure { "https" } else { "http" },
            host: endpoint_host(&config.endpoint),
            region: config.region.clone(),
            creds,
            http,
        })
    }

    /// Public URL of an object: `{scheme}://{endpoint}/{bucket}/{key}`.
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}://{}/{}/{}", self.scheme, self.host, bucket, key)
    }

    /// Sign and send a request against `canonical_uri` (already encoded).
    async fn send_signed(
        &self,
        method: Method,
        canonical_uri: &str,
        payload: Vec<u8>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&payload);

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key, credential_scope, signed_headers, signature
        );

        let url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        let mut req = self
            .http
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        req.body(payload).send().await
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let uri = format!("/{}", uri_encode(bucket));

        let resp = self
            .send_signed(Method::HEAD, &uri, Vec::new())
            .await
            .map_err(|e| StorageError::new("HeadBucket", e))?;

        match resp.status() {
            s if s.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            s => {
                return Err(StorageError::new(
                    "HeadBucket",
                    format!("HTTP {} for bucket '{}'", s, bucket),
                ))
            }
        }

        let body = create_bucket_body(&self.region);
        let resp = self
            .send_signed(Method::PUT, &uri, body)
            .await
            .map_err(|e| StorageError::new("CreateBucket", e))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(bucket, "created bucket");
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        // Lost a creation race with another writer; the bucket is there.
        if text.contains("BucketAlreadyOwnedByYou") {
            return Ok(());
        }
        Err(StorageError::new(
            "CreateBucket",
            format!("HTTP {}: {}", status, truncate(&text, 500)),
        ))
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let uri = format!("/{}/{}", uri_encode(bucket), encoded_key);
        let size = bytes.len();

        let resp = self
            .send_signed(Method::PUT, &uri, bytes)
            .await
            .map_err(|e| StorageError::new("PutObject", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StorageError::new(
                "PutObject",
                format!("HTTP {} for {}/{}: {}", status, bucket, key, truncate(&text, 500)),
            ));
        }

        let url = self.object_url(bucket, key);
        tracing::info!(bucket, key, size, url = %url, "uploaded object");
        Ok(url)
    }
}

// ============ Credentials ============

struct S3Credentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

impl S3Credentials {
    fn resolve(config: &ObjectStoreConfig) -> Result<Self> {
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            return Ok(Self {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: None,
            });
        }

        let access_key = std::env::var("AWS_ACCESS_KEY_ID").context(
            "object store credentials not set (MINIO_ACCESS_KEY or AWS_ACCESS_KEY_ID)",
        )?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").context(
            "object store credentials not set (MINIO_SECRET_KEY or AWS_SECRET_ACCESS_KEY)",
        )?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key,
            secret_key,
            session_token,
        })
    }
}

// ============ SigV4 Helpers ============

/// Strip any scheme and trailing slash from the configured endpoint.
fn endpoint_host(endpoint: &str) -> String {
    endpoint
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn create_bucket_body(region: &str) -> Vec<u8> {
    if region == "us-east-1" {
        return Vec::new();
    }
    format!(
        "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
        region
    )
    .into_bytes()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str, secure: bool) -> ObjectStoreConfig {
        ObjectStoreConfig {
            endpoint: endpoint.to_string(),
            bucket: "excel-reports".to_string(),
            secure,
            region: "us-east-1".to_string(),
            access_key: Some("minio".to_string()),
            secret_key: Some("minio-secret".to_string()),
        }
    }

    #[test]
    fn signing_key_matches_aws_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn object_url_is_path_style() {
        let client = S3Client::from_config(&config("localhost:9000", false)).unwrap();
        assert_eq!(
            client.object_url("excel-reports", "sales_w12.xlsx"),
            "http://localhost:9000/excel-reports/sales_w12.xlsx"
        );
    }

    #[test]
    fn secure_flag_selects_https_and_scheme_prefix_is_dropped() {
        let client = S3Client::from_config(&config("http://minio.internal/", true)).unwrap();
        assert_eq!(
            client.object_url("b", "k.xlsx"),
            "https://minio.internal/b/k.xlsx"
        );
    }

    #[test]
    fn uri_encode_escapes_reserved_and_non_ascii() {
        assert_eq!(uri_encode("sales w12.xlsx"), "sales%20w12.xlsx");
        assert_eq!(uri_encode("a+b"), "a%2Bb");
        assert_eq!(uri_encode("周报.xlsx"), "%E5%91%A8%E6%8A%A5.xlsx");
        assert_eq!(uri_encode("plain-name_1.~"), "plain-name_1.~");
    }

    #[test]
    fn bucket_body_only_outside_default_region() {
        assert!(create_bucket_body("us-east-1").is_empty());
        let body = String::from_utf8(create_bucket_body("eu-west-1")).unwrap();
        assert!(body.contains("<LocationConstraint>eu-west-1</LocationConstraint>"));
    }
}

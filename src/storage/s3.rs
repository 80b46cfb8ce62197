use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{
    ByteStream, DynWriter, ObjectMeta, ObjectStorage, PresignMethod, PutBody, PutResult,
    StorageError, StorageResult,
};

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Minimal S3-compatible client (AWS SigV4) covering the object operations
/// the pipeline needs. Works against AWS S3 and MinIO-style endpoints.
pub struct S3Storage {
    bucket: String,
    region: String,
    endpoint: String,
    access_key: String,
    secret_key: String,
    client: reqwest::Client,
    /// Path-style addressing (endpoint/bucket/key) for custom endpoints,
    /// virtual-hosted style for AWS.
    path_style: bool,
}

impl S3Storage {
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        access_key: String,
        secret_key: String,
    ) -> Self {
        let (endpoint, path_style) = match endpoint_url {
            Some(url) => (url.trim_end_matches('/').to_string(), true),
            None => (format!("https://{}.s3.{}.amazonaws.com", bucket, region), false),
        };
        Self {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            client: reqwest::Client::new(),
            path_style,
        }
    }

    fn object_url(&self, key: &str) -> String {
        let encoded = uri_encode(key, false);
        if self.path_style {
            format!("{}/{}/{}", self.endpoint, self.bucket, encoded)
        } else {
            format!("{}/{}", self.endpoint, encoded)
        }
    }

    fn host(&self) -> String {
        self.endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    fn canonical_path(&self, key: &str) -> String {
        if self.path_style {
            format!("/{}/{}", self.bucket, uri_encode(key, false))
        } else {
            format!("/{}", uri_encode(key, false))
        }
    }

    fn signing_key(&self, date: &str) -> Vec<u8> {
        let mut key = hmac_sign(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        for part in [self.region.as_str(), "s3", "aws4_request"] {
            key = hmac_sign(&key, part.as_bytes());
        }
        key
    }

    /// Builds the SigV4 Authorization header for a request with the given
    /// canonical query string and signed headers (host + date + payload).
    fn sign_request(
        &self,
        method: &str,
        canonical_path: &str,
        canonical_query: &str,
        payload_hash: &str,
        amz_date: &str,
    ) -> String {
        let date = &amz_date[..8];
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host(),
            payload_hash,
            amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(hmac_sign(&self.signing_key(date), string_to_sign.as_bytes()));
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        )
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Option<reqwest::Body>,
        payload_hash: &str,
        content_type: Option<&str>,
    ) -> StorageResult<reqwest::Response> {
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let canonical_query = canonical_query_string(query);
        let authorization = self.sign_request(
            method.as_str(),
            &self.canonical_path(key),
            &canonical_query,
            payload_hash,
            &amz_date,
        );

        let mut url = self.object_url(key);
        if !canonical_query.is_empty() {
            url = format!("{}?{}", url, canonical_query);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash);
        if let Some(ct) = content_type {
            request = request.header("Content-Type", ct);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("S3 request failed: {}", e)))
    }

    fn check_status(key: &str, status: reqwest::StatusCode) -> StorageResult<()> {
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(StorageError::NotFound(key.to_string()))
        } else if status == reqwest::StatusCode::FORBIDDEN {
            Err(StorageError::PermissionDenied(format!("S3 denied access to {}", key)))
        } else {
            Err(StorageError::Backend(format!("S3 returned {} for {}", status, key)))
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        content_type: &str,
        _metadata: HashMap<String, String>,
    ) -> StorageResult<PutResult> {
        let size = body.len().await?;
        let request_body = match body {
            PutBody::Bytes(bytes) => reqwest::Body::from(bytes),
            PutBody::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| StorageError::Backend(format!("open {}: {}", path.display(), e)))?;
                reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file))
            }
        };

        let response = self
            .signed_request(
                reqwest::Method::PUT,
                key,
                &[],
                Some(request_body),
                UNSIGNED_PAYLOAD,
                Some(content_type),
            )
            .await?;
        let status = response.status();
        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Self::check_status(key, status)?;

        Ok(PutResult { etag, size })
    }

    async fn get(&self, key: &str, mut writer: DynWriter<'_>) -> StorageResult<u64> {
        let response = self
            .signed_request(reqwest::Method::GET, key, &[], None, UNSIGNED_PAYLOAD, None)
            .await?;
        Self::check_status(key, response.status())?;

        let mut total = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Bytes> {
        let response = self
            .signed_request(reqwest::Method::GET, key, &[], None, UNSIGNED_PAYLOAD, None)
            .await?;
        Self::check_status(key, response.status())?;
        response
            .bytes()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    async fn stream(&self, key: &str, _chunk_bytes: usize) -> StorageResult<ByteStream> {
        let response = self
            .signed_request(reqwest::Method::GET, key, &[], None, UNSIGNED_PAYLOAD, None)
            .await?;
        Self::check_status(key, response.status())?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::ConnectionFailed(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let response = self
            .signed_request(reqwest::Method::DELETE, key, &[], None, UNSIGNED_PAYLOAD, None)
            .await?;
        // S3 DELETE is idempotent and returns 204 even for missing keys.
        Self::check_status(key, response.status())
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<HashMap<String, bool>> {
        let mut results = HashMap::new();
        for key in keys {
            let ok = self.delete(key).await.is_ok();
            results.insert(key.clone(), ok);
        }
        Ok(results)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let response = self
            .signed_request(reqwest::Method::HEAD, key, &[], None, UNSIGNED_PAYLOAD, None)
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(StorageError::Backend(format!("S3 returned {} for {}", s, key))),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        max: usize,
        cursor: Option<String>,
    ) -> StorageResult<(Vec<ObjectMeta>, Option<String>)> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), max.to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = cursor {
            query.push(("continuation-token".to_string(), token));
        }

        let response = self
            .signed_request(reqwest::Method::GET, "", &query, None, UNSIGNED_PAYLOAD, None)
            .await?;
        Self::check_status(prefix, response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let keys = extract_xml_values(&body, "Key");
        let sizes = extract_xml_values(&body, "Size");
        let objects = keys
            .into_iter()
            .zip(sizes.into_iter())
            .map(|(key, size)| ObjectMeta {
                key,
                size: size.parse().unwrap_or(0),
            })
            .collect();
        let next = extract_xml_values(&body, "NextContinuationToken").into_iter().next();
        Ok((objects, next))
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let source_header = format!("/{}/{}", self.bucket, uri_encode(src, false));
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let date = &amz_date[..8];

        // Copy adds one extra signed header, so the canonical request is
        // built inline rather than through signed_request.
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-copy-source:{}\nx-amz-date:{}\n",
            self.host(),
            UNSIGNED_PAYLOAD,
            source_header,
            amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-copy-source;x-amz-date";
        let canonical_request = format!(
            "PUT\n{}\n\n{}\n{}\n{}",
            self.canonical_path(dst),
            canonical_headers,
            signed_headers,
            UNSIGNED_PAYLOAD
        );
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = hex::encode(hmac_sign(&self.signing_key(date), string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );

        let response = self
            .client
            .put(self.object_url(dst))
            .header("Authorization", authorization)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-copy-source", source_header)
            .send()
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("S3 copy failed: {}", e)))?;
        Self::check_status(src, response.status())
    }

    async fn presigned_url(
        &self,
        key: &str,
        ttl: Duration,
        method: PresignMethod,
    ) -> StorageResult<String> {
        let method = match method {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        };
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let date = &amz_date[..8];
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);

        let query = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key, scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), ttl.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        let canonical_query = canonical_query_string(&query);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method,
            self.canonical_path(key),
            canonical_query,
            self.host(),
            UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = hex::encode(hmac_sign(&self.signing_key(date), string_to_sign.as_bytes()));

        Ok(format!(
            "{}?{}&X-Amz-Signature={}",
            self.object_url(key),
            canonical_query,
            signature
        ))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.list("", 1, None).await.map(|_| ())
    }

    fn strategy(&self) -> &'static str {
        "s3"
    }
}

fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// AWS-style URI encoding. Slashes are preserved in object paths and
/// encoded in query values.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn canonical_query_string(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Pulls the text content of every `<tag>...</tag>` occurrence. The S3
/// list response is flat enough that a full XML parser is not needed.
fn extract_xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                values.push(after[..end].to_string());
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode_preserves_object_slashes() {
        assert_eq!(uri_encode("documents/u/j/f.pdf", false), "documents/u/j/f.pdf");
        assert_eq!(uri_encode("a b", false), "a%20b");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
    }

    #[test]
    fn test_canonical_query_is_sorted() {
        let q = vec![
            ("prefix".to_string(), "documents/".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ];
        assert_eq!(canonical_query_string(&q), "list-type=2&prefix=documents%2F");
    }

    #[test]
    fn test_extract_xml_values() {
        let xml = "<R><Contents><Key>a/b</Key><Size>10</Size></Contents>\
                   <Contents><Key>a/c</Key><Size>20</Size></Contents></R>";
        assert_eq!(extract_xml_values(xml, "Key"), vec!["a/b", "a/c"]);
        assert_eq!(extract_xml_values(xml, "Size"), vec!["10", "20"]);
        assert!(extract_xml_values(xml, "NextContinuationToken").is_empty());
    }

    #[test]
    fn test_signing_key_derivation_is_deterministic() {
        let storage = S3Storage::new(
            "bucket".to_string(),
            "us-east-1".to_string(),
            None,
            "AKID".to_string(),
            "secret".to_string(),
        );
        assert_eq!(storage.signing_key("20260801"), storage.signing_key("20260801"));
        assert_ne!(storage.signing_key("20260801"), storage.signing_key("20260802"));
    }
}

//! Azure Blob Storage over the REST API.
//!
//! Requests are authorized with a storage account SharedKey: an HMAC-SHA256
//! over a canonical form of the request, keyed with the base64-decoded
//! account key. The watermark is a block blob (replaced by a single Put Blob)
//! and the order log is an append blob grown with Append Block.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode, Url};
use sha2::Sha256;
use tracing::debug;

use super::{BlobError, BlobStore};

/// REST API version sent with every request
pub const API_VERSION: &str = "2021-08-06";

/// Largest body accepted by a single Append Block call
pub const MAX_APPEND_BLOCK_BYTES: usize = 4 * 1024 * 1024;

/// Connection settings for a storage account
#[derive(Clone)]
pub struct AzureConfig {
    /// Storage account name
    pub account: String,

    /// Base64 account key
    pub key: String,

    /// Blob endpoint; defaults to `https://{account}.blob.core.windows.net`
    pub endpoint: Option<String>,

    pub timeout_secs: u64,
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Azure Blob Storage client for a single account
pub struct AzureBlobStore {
    client: Client,
    account: String,
    key: Vec<u8>,
    endpoint: Url,
}

impl AzureBlobStore {
    pub fn new(config: AzureConfig) -> Result<Self, BlobError> {
        let key = BASE64
            .decode(config.key.trim())
            .map_err(|e| BlobError::Config(format!("account key is not base64: {}", e)))?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", config.account));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| BlobError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(BlobError::Config(format!("invalid endpoint '{}'", endpoint)));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            account: config.account,
            key,
            endpoint,
        })
    }

    /// URL for a container, or a blob inside it when `blob` is given
    fn resource_url(
        &self,
        container: &str,
        blob: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Url, BlobError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BlobError::Config(format!("invalid endpoint '{}'", self.endpoint)))?;
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// `/{account}{path}` followed by the sorted query parameters
    fn canonical_resource(&self, url: &Url) -> String {
        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params
                .entry(name.to_lowercase())
                .or_default()
                .push(value.into_owned());
        }

        let mut resource = format!("/{}{}", self.account, url.path());
        for (name, mut values) in params {
            values.sort();
            resource.push_str(&format!("\n{}:{}", name, values.join(",")));
        }
        resource
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key
    fn sign(&self, string_to_sign: &str) -> Result<String, BlobError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| BlobError::Config(format!("unusable account key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Sign and send one request
    async fn send(
        &self,
        method: Method,
        url: Url,
        extra_headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Result<Response, BlobError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut ms_headers: BTreeMap<String, String> = BTreeMap::new();
        ms_headers.insert("x-ms-date".to_string(), date);
        ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());
        for (name, value) in extra_headers {
            ms_headers.insert(name.to_lowercase(), value.to_string());
        }

        let content_length = body.map(str::len).unwrap_or(0);
        let content_type = body
            .filter(|b| !b.is_empty())
            .map(|_| "text/plain; charset=utf-8");

        let string_to_sign = string_to_sign(
            &method,
            content_length,
            content_type,
            &ms_headers,
            &self.canonical_resource(&url),
        );
        let authorization = format!("SharedKey {}:{}", self.account, self.sign(&string_to_sign)?);

        debug!(%method, path = url.path(), "Azure blob request");

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", authorization);
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }
        if method == Method::PUT {
            request = request.body(body.unwrap_or_default().to_string());
        }

        Ok(request.send().await?)
    }
}

/// Canonical SharedKey string for a request (service version 2015-02-21+)
fn string_to_sign(
    method: &Method,
    content_length: usize,
    content_type: Option<&str>,
    ms_headers: &BTreeMap<String, String>,
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range
    let mut out = format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n",
        method.as_str(),
        length,
        content_type.unwrap_or("")
    );
    for (name, value) in ms_headers {
        out.push_str(&format!("{}:{}\n", name, value));
    }
    out.push_str(canonical_resource);
    out
}

/// Split `text` into pieces of at most `max_bytes`.
///
/// Pieces end after the last complete `\r\n` row that fits, so a failed
/// block never leaves half a row behind. A single row longer than
/// `max_bytes` is cut on a char boundary.
fn split_blocks(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(row_end) = rest[..cut].rfind("\r\n") {
            cut = row_end + 2;
        }
        let (head, tail) = rest.split_at(cut);
        blocks.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        blocks.push(rest);
    }
    blocks
}

/// Map a response to an error unless its status is `expected`
async fn expect_status(
    response: Response,
    expected: StatusCode,
    container: &str,
    blob: &str,
) -> Result<Response, BlobError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BlobError::not_found(container, blob));
    }
    let body = response.text().await.unwrap_or_default();
    Err(BlobError::Http { status, body })
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn name(&self) -> &str {
        "azure"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError> {
        let url = self.resource_url(container, None, &[("restype", "container")])?;
        let response = self.send(Method::PUT, url, &[], None).await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BlobError::Http { status, body })
            }
        }
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self.send(Method::HEAD, url, &[], None).await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(BlobError::Http {
                status,
                body: String::new(),
            }),
        }
    }

    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self.send(Method::HEAD, url, &[], None).await?;

        match response.status() {
            StatusCode::OK => {
                let length = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                match length {
                    Some(length) => Ok(Some(length)),
                    None => Err(BlobError::Http {
                        status: StatusCode::OK,
                        body: "blob properties without Content-Length".to_string(),
                    }),
                }
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(BlobError::Http {
                status,
                body: String::new(),
            }),
        }
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self
            .send(Method::PUT, url, &[("x-ms-blob-type", "AppendBlob")], None)
            .await?;
        expect_status(response, StatusCode::CREATED, container, blob).await?;

        if initial.is_empty() {
            return Ok(());
        }
        self.append_text(container, blob, initial).await
    }

    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        for block in split_blocks(text, MAX_APPEND_BLOCK_BYTES) {
            let url = self.resource_url(container, Some(blob), &[("comp", "appendblock")])?;
            let response = self.send(Method::PUT, url, &[], Some(block)).await?;
            expect_status(response, StatusCode::CREATED, container, blob).await?;
        }
        Ok(())
    }

    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self
            .send(Method::PUT, url, &[("x-ms-blob-type", "BlockBlob")], Some(text))
            .await?;
        expect_status(response, StatusCode::CREATED, container, blob).await?;
        Ok(())
    }

    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self.send(Method::GET, url, &[], None).await?;
        let response = expect_status(response, StatusCode::OK, container, blob).await?;

        let bytes = response.bytes().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

//! Backblaze B2 API Client
//!
//! Provides authenticated access to a single B2 bucket: listing, metadata
//! lookup, download and upload.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::errors::B2Error;
use super::types::{FileInfo, ListFilesResponse};
use crate::cache::Metadata;

/// B2 API base URL for authorization (v3 for nested apiInfo structure)
const B2_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v3/b2_authorize_account";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Page size for b2_list_file_names
const LIST_PAGE_SIZE: u32 = 1000;

/// Prefix of the headers carrying custom file info on upload
const FILE_INFO_HEADER_PREFIX: &str = "X-Bz-Info-";

/// Auth state that can be refreshed (interior mutability)
struct AuthState {
    auth_token: String,
    api_url: String,
    download_url: String,
}

/// B2 API client for making authenticated requests
#[derive(Clone)]
pub struct B2Client {
    /// HTTP client for making requests
    http_client: Client,
    /// B2 account ID
    account_id: String,
    /// Mutable auth state (refreshable on 401)
    auth_state: Arc<RwLock<AuthState>>,
    /// Stored credentials for re-authorization
    key_id: String,
    key: String,
    /// Bucket ID to operate on
    bucket_id: String,
    /// Bucket name (for display purposes)
    bucket_name: String,
}

/// Response from b2_authorize_account API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    account_id: String,
    authorization_token: String,
    api_info: ApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInfo {
    storage_api: StorageApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageApiInfo {
    api_url: String,
    download_url: String,
}

/// Response from b2_list_buckets API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

/// Request body for b2_list_file_names API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesRequest<'a> {
    bucket_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delimiter: Option<&'a str>,
    max_file_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_file_name: Option<&'a str>,
}

/// Upload URL from B2 (for uploading files)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

/// Build the Basic auth header for b2_authorize_account
fn basic_auth_header(key_id: &str, key: &str) -> String {
    let credentials = format!("{}:{}", key_id, key);
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    format!("Basic {}", encoded)
}

/// Turn an unsuccessful response into a typed error
async fn status_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    B2Error::from_status(status, &body).into()
}

/// Whether a failed call is worth another attempt
fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(b2_error) = error.downcast_ref::<B2Error>() {
        return b2_error.is_retryable();
    }
    error
        .downcast_ref::<reqwest::Error>()
        .map(|e| B2Error::from_reqwest(e).is_retryable())
        .unwrap_or(false)
}

impl B2Client {
    /// Get current auth token
    fn auth_token(&self) -> String {
        self.auth_state
            .read()
            .map(|state| state.auth_token.clone())
            .unwrap_or_default()
    }

    /// Get current API URL
    fn api_url(&self) -> String {
        self.auth_state
            .read()
            .map(|state| state.api_url.clone())
            .unwrap_or_default()
    }

    /// Get current download URL
    fn download_url(&self) -> String {
        self.auth_state
            .read()
            .map(|state| state.download_url.clone())
            .unwrap_or_default()
    }

    /// Call b2_authorize_account
    async fn authorize_account(
        http_client: &Client,
        key_id: &str,
        key: &str,
    ) -> Result<AuthorizeAccountResponse> {
        let response = http_client
            .get(B2_AUTH_URL)
            .header("Authorization", basic_auth_header(key_id, key))
            .send()
            .await
            .context("Failed to connect to B2 API")?;

        if !response.status().is_success() {
            return Err(status_error(response).await).context("B2 authorization failed");
        }

        response
            .json()
            .await
            .context("Failed to parse B2 auth response")
    }

    /// Refresh the auth token by re-authorizing with B2
    pub async fn refresh_auth(&self) -> Result<()> {
        info!("Refreshing B2 auth token...");

        let auth_response =
            Self::authorize_account(&self.http_client, &self.key_id, &self.key).await?;

        let mut state = self
            .auth_state
            .write()
            .map_err(|_| anyhow!("B2 auth state lock poisoned"))?;
        state.auth_token = auth_response.authorization_token;
        state.api_url = auth_response.api_info.storage_api.api_url;
        state.download_url = auth_response.api_info.storage_api.download_url;

        info!("B2 auth token refreshed successfully");
        Ok(())
    }

    /// Execute an operation with retry logic and exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, path: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff_ms = [500u64, 1000, 2000];
        let mut attempt = 0u32;

        loop {
            let e = match f().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !is_retryable(&e) || attempt >= MAX_RETRIES {
                debug!(operation = operation, path = path, error = %e, "B2 operation failed");
                return Err(e);
            }

            let auth_expired = matches!(e.downcast_ref::<B2Error>(), Some(B2Error::AuthExpired));
            if auth_expired {
                warn!(operation = operation, "Auth expired, refreshing token...");
                if let Err(refresh_err) = self.refresh_auth().await {
                    error!(error = %refresh_err, "Failed to refresh auth token");
                }
            }

            let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
            warn!(
                operation = operation,
                path = path,
                attempt = attempt + 1,
                max = MAX_RETRIES,
                delay_ms = delay,
                error = %e,
                "Retrying B2 operation"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    /// Authorize with B2 and create a new client for the specified bucket
    ///
    /// # Arguments
    /// * `key_id` - B2 application key ID
    /// * `key` - B2 application key
    /// * `bucket_name` - Name of the bucket to access
    pub async fn authorize(key_id: &str, key: &str, bucket_name: &str) -> Result<Self> {
        info!(bucket = bucket_name, "Authorizing with B2 API...");

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let auth_response = Self::authorize_account(&http_client, key_id, key).await?;

        let api_url = auth_response.api_info.storage_api.api_url;
        let download_url = auth_response.api_info.storage_api.download_url;
        debug!(api_url = %api_url, download_url = %download_url, "B2 authorization successful");

        let mut client = Self {
            http_client,
            account_id: auth_response.account_id,
            auth_state: Arc::new(RwLock::new(AuthState {
                auth_token: auth_response.authorization_token,
                api_url,
                download_url,
            })),
            key_id: key_id.to_string(),
            key: key.to_string(),
            bucket_id: String::new(),
            bucket_name: bucket_name.to_string(),
        };

        client.bucket_id = client.get_bucket_id(bucket_name).await?;

        info!(bucket_name = bucket_name, bucket_id = %client.bucket_id, "B2 client ready");
        Ok(client)
    }

    /// Look up bucket ID from bucket name
    async fn get_bucket_id(&self, bucket_name: &str) -> Result<String> {
        let url = format!("{}/b2api/v2/b2_list_buckets", self.api_url());

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_token())
            .json(&serde_json::json!({
                "accountId": self.account_id,
                "bucketName": bucket_name
            }))
            .send()
            .await
            .context("Failed to list buckets")?;

        if !response.status().is_success() {
            return Err(status_error(response).await).context("Failed to list buckets");
        }

        let list_response: ListBucketsResponse = response
            .json()
            .await
            .context("Failed to parse bucket list")?;

        list_response
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| anyhow!("Bucket '{}' not found", bucket_name))
    }

    /// Fetch one page of b2_list_file_names
    async fn list_page(
        &self,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        start_file_name: Option<&str>,
        max_file_count: u32,
    ) -> Result<ListFilesResponse> {
        let url = format!("{}/b2api/v2/b2_list_file_names", self.api_url());
        let request = ListFileNamesRequest {
            bucket_id: &self.bucket_id,
            prefix,
            delimiter,
            max_file_count,
            start_file_name,
        };

        debug!(prefix = ?prefix, delimiter = ?delimiter, start = ?start_file_name, "Listing files from B2");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_token())
            .json(&request)
            .send()
            .await
            .context("Failed to list files")?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response.json().await.context("Failed to parse file list")
    }

    /// List files in the bucket with optional prefix and delimiter
    ///
    /// # Arguments
    /// * `prefix` - Optional path prefix to filter results
    /// * `delimiter` - Optional delimiter for directory-style listing (usually "/")
    ///
    /// # Returns
    /// Vector of FileInfo for matching files, all pages included
    pub async fn list_file_names(
        &self,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        let mut all_files = Vec::new();
        let mut start_file_name: Option<String> = None;
        let label = prefix.unwrap_or("");

        loop {
            let start = start_file_name.as_deref();
            let page = self
                .with_retry("list_file_names", label, move || {
                    self.list_page(prefix, delimiter, start, LIST_PAGE_SIZE)
                })
                .await?;

            all_files.extend(page.files);

            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => break,
            }
        }

        debug!(count = all_files.len(), "Listed files from B2");
        Ok(all_files)
    }

    /// Get file info by path
    ///
    /// B2 has no "get file by name" call, so this lists a single entry
    /// starting at the name and checks for an exact match.
    pub async fn get_file_info(&self, file_name: &str) -> Result<FileInfo> {
        let page = self
            .with_retry("get_file_info", file_name, move || {
                self.list_page(None, None, Some(file_name), 1)
            })
            .await?;

        page.files
            .into_iter()
            .find(|f| f.file_name == file_name)
            .ok_or_else(|| B2Error::NotFound(file_name.to_string()).into())
    }

    /// Whether any file name starts with `prefix`
    pub async fn prefix_exists(&self, prefix: &str) -> Result<bool> {
        let page = self
            .with_retry("prefix_exists", prefix, move || {
                self.list_page(Some(prefix), None, None, 1)
            })
            .await?;

        Ok(!page.files.is_empty())
    }

    /// Download a whole file from B2
    pub async fn download_file(&self, file_name: &str) -> Result<Vec<u8>> {
        let bytes = self
            .with_retry("download_file", file_name, move || {
                self.download_once(file_name)
            })
            .await?;

        info!(file = file_name, size = bytes.len(), "Downloaded file from B2");
        Ok(bytes)
    }

    async fn download_once(&self, file_name: &str) -> Result<Vec<u8>> {
        let encoded_name = urlencoding::encode(file_name);
        let url = format!(
            "{}/file/{}/{}",
            self.download_url(),
            self.bucket_name,
            encoded_name
        );

        debug!(file = file_name, url = %url, "Downloading file from B2");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.auth_token())
            .send()
            .await
            .context("Failed to download file from B2")?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read file content")?;

        Ok(bytes.to_vec())
    }

    /// Get an upload URL for uploading files to B2
    async fn get_upload_url(&self) -> Result<UploadUrl> {
        let url = format!("{}/b2api/v2/b2_get_upload_url", self.api_url());

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_token())
            .json(&serde_json::json!({ "bucketId": self.bucket_id }))
            .send()
            .await
            .context("Failed to get upload URL")?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let upload_url: UploadUrl = response
            .json()
            .await
            .context("Failed to parse upload URL response")?;

        debug!(url = %upload_url.upload_url, "Got B2 upload URL");
        Ok(upload_url)
    }

    /// Upload a file to B2
    ///
    /// # Arguments
    /// * `file_name` - Full file path within the bucket
    /// * `data` - File content bytes
    /// * `content_type` - MIME type, or "b2/x-auto" to let B2 decide
    /// * `file_info` - Custom metadata, sent as `X-Bz-Info-*` headers
    pub async fn upload_file(
        &self,
        file_name: &str,
        data: &[u8],
        content_type: &str,
        file_info: &Metadata,
    ) -> Result<FileInfo> {
        info!(
            file = file_name,
            size = data.len(),
            content_type = content_type,
            "Uploading file to B2"
        );

        let uploaded = self
            .with_retry("upload_file", file_name, move || {
                self.upload_once(file_name, data, content_type, file_info)
            })
            .await?;

        info!(file = file_name, size = uploaded.content_length, "File uploaded to B2");
        Ok(uploaded)
    }

    async fn upload_once(
        &self,
        file_name: &str,
        data: &[u8],
        content_type: &str,
        file_info: &Metadata,
    ) -> Result<FileInfo> {
        let upload_url = self.get_upload_url().await?;

        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(data);
        let hash = format!("{:x}", hasher.finalize());

        let encoded_name = urlencoding::encode(file_name);

        let mut request = self
            .http_client
            .post(&upload_url.upload_url)
            .header("Authorization", &upload_url.authorization_token)
            .header("X-Bz-File-Name", encoded_name.as_ref())
            .header("Content-Type", content_type)
            .header("Content-Length", data.len())
            .header("X-Bz-Content-Sha1", &hash);

        for (key, value) in file_info {
            request = request.header(
                format!("{}{}", FILE_INFO_HEADER_PREFIX, key),
                urlencoding::encode(value).as_ref(),
            );
        }

        let response = request
            .body(data.to_vec())
            .send()
            .await
            .context("Failed to upload file to B2")?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json()
            .await
            .context("Failed to parse upload response")
    }
}

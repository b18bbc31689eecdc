use anyhow::{Context, Result, anyhow, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::Dispatch;

use crate::auth::generate_jwt;
use crate::config::{Environment, load_config};
use crate::dataset::Dataset;
use crate::error::{ApiErrorResponse, format_api_error};
use crate::util::{extract_http_status, retriable_status, urljoin};

const MAX_PREALLOC: usize = 8 << 20;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key; also the `kid` and subject of every bearer token.
    pub key: String,
    /// Secret used to sign bearer tokens.
    pub secret: String,
    pub environment: Environment,
}

/// A dataset as listed by the API, restricted to the fields the SDK exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub source_dataset_id: Option<String>,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub preview_uri: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub sample: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub n_images: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CreateDatasetReply {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Raw body of a downloaded export.
#[derive(Debug)]
pub(crate) struct Download {
    pub(crate) content_type: Option<String>,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Client {
    key: String,
    secret: String,
    environment: Environment,
    base_url: String,

    timeout: Duration,
    retry_max: usize,
    retry_sleep: Duration,
    progress: bool,

    log: Option<Dispatch>,
    http: HttpClient,
}

impl Client {
    /// Creates a client from environment variables and/or `.visuallayerrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `key`/`secret`/`environment` arguments
    /// - environment variables `VISUAL_LAYER_API_KEY` / `VISUAL_LAYER_API_SECRET` /
    ///   `VISUAL_LAYER_ENVIRONMENT`
    /// - config file from `VISUAL_LAYER_RC` or `.visuallayerrc`
    pub fn new(
        key: Option<String>,
        secret: Option<String>,
        environment: Option<Environment>,
    ) -> Result<Self> {
        let cfg = load_config(key, secret, environment)?;
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        if cfg.key.trim().is_empty() || cfg.secret.trim().is_empty() {
            bail!("API key and secret must both be non-empty");
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("visual-layer-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("visual-layer-rs")),
        );
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            key: cfg.key,
            secret: cfg.secret,
            environment: cfg.environment,
            base_url: cfg.environment.base_url().to_string(),
            timeout: Duration::from_secs(60),
            retry_max: 3,
            retry_sleep: Duration::from_secs(2),
            progress: true,
            log: None,
            http,
        })
    }

    /// Points the client at a different API root, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_retry_sleep(mut self, retry_sleep: Duration) -> Self {
        self.retry_sleep = retry_sleep;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Routes all SDK log events to `dispatch` instead of the global subscriber.
    ///
    /// See [`crate::LogConfig::build`].
    pub fn with_log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.log = Some(dispatch);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub(crate) fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.log {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        urljoin(&self.base_url, path)
    }

    pub fn healthcheck(&self) -> Result<Value> {
        self.in_scope(|| {
            let status: Value = self.get_json(&self.url("/healthcheck"), &[])?;
            tracing::info!(%status, "API health check");
            Ok(status)
        })
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetSummary>> {
        self.in_scope(|| self.get_json(&self.url("/datasets"), &[]))
    }

    pub fn dataset_details(&self, dataset_id: &str) -> Result<DatasetSummary> {
        self.in_scope(|| self.get_json(&self.url(&format!("/dataset/{dataset_id}")), &[]))
    }

    /// Opens a handle on an existing dataset. Fails if the dataset does not exist.
    pub fn dataset(&self, dataset_id: &str) -> Result<Dataset> {
        self.in_scope(|| match self.dataset_details(dataset_id) {
            Ok(_) => Ok(Dataset::new(self.clone(), dataset_id)),
            Err(e) if extract_http_status(&e) == Some(reqwest::StatusCode::NOT_FOUND) => bail!(
                "Dataset '{dataset_id}' does not exist. Please check the dataset ID and try again."
            ),
            Err(e) => Err(e.context(format!("failed to validate dataset '{dataset_id}'"))),
        })
    }

    /// Creates a dataset from files under an S3 bucket path.
    pub fn create_dataset_from_s3(
        &self,
        bucket_path: &str,
        dataset_name: &str,
        pipeline_type: Option<&str>,
    ) -> Result<Dataset> {
        if bucket_path.trim().is_empty() || dataset_name.trim().is_empty() {
            bail!("Both bucket_path and dataset_name are required");
        }
        self.in_scope(|| {
            tracing::info!(dataset_name, "creating dataset from S3 bucket");
            let id = self.create_dataset(dataset_name, bucket_path, "", pipeline_type)?;
            Ok(Dataset::new(self.clone(), &id))
        })
    }

    /// Creates a dataset and uploads a local zip archive of images into it.
    pub fn create_dataset_from_archive(
        &self,
        archive: &Path,
        dataset_name: &str,
        pipeline_type: Option<&str>,
    ) -> Result<Dataset> {
        if dataset_name.trim().is_empty() {
            bail!("dataset_name is required");
        }
        if !archive.is_file() {
            bail!("Zip file not found: {}", archive.display());
        }
        let filename = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("invalid archive path: {}", archive.display()))?;
        let bytes = std::fs::read(archive)
            .with_context(|| format!("failed to read {}", archive.display()))?;

        self.in_scope(|| {
            tracing::info!(dataset_name, "creating dataset");
            let id = self.create_dataset(dataset_name, "", &filename, pipeline_type)?;

            tracing::info!(dataset_name, dataset_id = %id, "uploading archive");
            let url = self.url(&format!("/dataset/{id}/upload"));
            let _: Value = self.api_json(&url, |http| {
                let part = Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str("application/zip")?;
                Ok(http
                    .post(&url)
                    .multipart(Form::new().text("operations", "READ").part("file", part)))
            })?;
            tracing::info!(dataset_name, "archive uploaded");
            Ok(Dataset::new(self.clone(), &id))
        })
    }

    fn create_dataset(
        &self,
        dataset_name: &str,
        bucket_path: &str,
        uploaded_filename: &str,
        pipeline_type: Option<&str>,
    ) -> Result<String> {
        let url = self.url("/dataset");
        let form = [
            ("dataset_name", dataset_name),
            ("vl_dataset_id", ""),
            ("bucket_path", bucket_path),
            ("uploaded_filename", uploaded_filename),
            ("config_url", ""),
            ("pipeline_type", pipeline_type.unwrap_or("")),
        ];
        tracing::debug!(%url, ?form, "POST");

        let reply: CreateDatasetReply = self.api_json(&url, |http| Ok(http.post(&url).form(&form)))?;
        if reply.status.as_deref() == Some("error") {
            bail!(
                "dataset creation failed: {}",
                reply.message.as_deref().unwrap_or("Unknown error")
            );
        }
        let id = reply
            .id
            .ok_or_else(|| anyhow!("No dataset id returned from creation"))?;
        tracing::info!(dataset_id = %id, dataset_name, "dataset created");
        Ok(id)
    }

    pub(crate) fn get_json<TResp: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<TResp> {
        self.api_json(url, |http| Ok(http.get(url).query(query)))
    }

    pub(crate) fn delete_json<TResp: DeserializeOwned>(&self, url: &str) -> Result<TResp> {
        self.api_json(url, |http| Ok(http.delete(url)))
    }

    /// One authenticated GET with no retries, bounded by `timeout`.
    pub(crate) fn get_json_once<TResp: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<TResp> {
        let token = generate_jwt(&self.key, &self.secret)?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .timeout(timeout.min(self.timeout))
            .send()
            .with_context(|| format!("request failed (url={url})"))?;
        Self::decode(url, resp)
    }

    /// Uploads `body` as multipart `file` and returns the decoded reply.
    pub(crate) fn post_file<TResp: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        file_name: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<TResp> {
        self.api_json(url, |http| {
            let part = Part::bytes(body.to_vec())
                .file_name(file_name.to_string())
                .mime_str(content_type)?;
            Ok(http
                .post(url)
                .query(query)
                .multipart(Form::new().part("file", part)))
        })
    }

    fn api_json<TResp, F>(&self, url: &str, build: F) -> Result<TResp>
    where
        TResp: DeserializeOwned,
        F: Fn(&HttpClient) -> reqwest::Result<RequestBuilder>,
    {
        let token = generate_jwt(&self.key, &self.secret)?;
        let resp = self.robust_request(|| {
            build(&self.http)?
                .bearer_auth(&token)
                .timeout(self.timeout)
                .send()
        })?;
        Self::decode(url, resp)
    }

    fn decode<TResp: DeserializeOwned>(url: &str, resp: Response) -> Result<TResp> {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        tracing::debug!(%url, status = status.as_u16(), "response received");
        if !status.is_success() {
            if let Ok(err_json) = serde_json::from_str::<ApiErrorResponse>(&text) {
                return Err(format_api_error(status, url, &err_json));
            }

            bail!(
                "API request failed: HTTP {} for url ({})\n{}",
                status.as_u16(),
                url,
                text
            );
        }

        serde_json::from_str::<TResp>(&text)
            .with_context(|| format!("failed to parse API JSON (url={}, status={})", url, status))
    }

    /// Downloads an export. Download links are pre-signed, so no credentials are sent.
    pub(crate) fn download(&self, uri: &str) -> Result<Download> {
        let location = urljoin(&self.base_url, uri);
        tracing::info!(%location, "downloading export results");

        let resp = self.robust_request(|| self.http.get(&location).timeout(self.timeout).send())?;
        let mut resp = resp.error_for_status().context("export download failed")?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let total = resp.content_length();

        let pb = if self.progress {
            let pb = ProgressBar::new(total.unwrap_or(0));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            Some(pb)
        } else {
            None
        };

        // Content-Length comes from the storage host; only a hint.
        let hint = total.and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
        let mut bytes = Vec::with_capacity(hint.min(MAX_PREALLOC));
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = resp.read(&mut buf).context("export download interrupted")?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..n]);
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        tracing::debug!(
            size_bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or(""),
            "export downloaded"
        );
        Ok(Download {
            content_type,
            bytes,
        })
    }

    fn robust_request<F>(&self, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        loop {
            let result = f();

            match result {
                Ok(resp) => {
                    if retriable_status(resp.status().as_u16()) {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Ok(resp);
                        }
                        tracing::debug!(status = resp.status().as_u16(), tries, "retrying");
                        thread::sleep(self.retry_sleep);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(err).context("could not connect");
                    }
                    // timeouts / transient connection errors
                    tracing::debug!(error = %err, tries, "request failed, retrying");
                    thread::sleep(self.retry_sleep);
                }
            }
        }
    }
}

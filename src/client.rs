//! HTTP access to the skin service: metadata lookups and texture transfers
//!
//! [`SkinApi`] is the seam the worker pool talks to; [`HttpSkinApi`] is the
//! production implementation for Blessing Skin servers such as littleskin.cn.
//! Every HTTP outcome is mapped onto [`TaskError`] here, so the rest of the
//! pipeline only sees "not found", "transient" or "permanent".

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{Error, Result, TaskError};
use crate::types::{AssetType, SkinId, SkinRecord};

/// Abstraction over the remote service, enabling testability
#[async_trait]
pub trait SkinApi: Send + Sync {
    /// Look up the metadata for one ID (one outbound request)
    async fn fetch_record(&self, id: SkinId) -> std::result::Result<SkinRecord, TaskError>;

    /// Transfer the full texture body for a content hash (one outbound request)
    async fn fetch_asset(&self, hash: &str) -> std::result::Result<Bytes, TaskError>;
}

/// Metadata body returned by `GET /texture/{id}`
#[derive(Debug, Deserialize)]
struct TextureResponse {
    #[serde(default)]
    tid: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl TextureResponse {
    fn into_record(self, id: SkinId) -> std::result::Result<SkinRecord, TaskError> {
        if self.kind.is_none() && self.hash.is_none() {
            return Err(TaskError::MalformedResponse {
                id: id.get(),
                reason: "response has neither `type` nor `hash`".to_string(),
            });
        }

        let raw_type = self.kind.unwrap_or_else(|| "unknown".to_string());
        Ok(SkinRecord {
            id,
            tid: self.tid,
            name: self.name.unwrap_or_default(),
            asset_type: AssetType::from_api(&raw_type),
            raw_type,
            content_hash: self.hash.filter(|h| !h.trim().is_empty()),
            size_bytes: self.size,
        })
    }
}

/// Production [`SkinApi`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpSkinApi {
    client: reqwest::Client,
    base_url: Url,
    asset_timeout: Duration,
}

impl HttpSkinApi {
    /// Build a client from the API settings
    ///
    /// The metadata timeout is the client default; texture requests override
    /// it with `asset_timeout`.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::config(
                "api.base_url",
                format!("invalid base URL '{}': {}", config.base_url, e),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(
                "api.base_url",
                format!("'{}' cannot be used as a base URL", config.base_url),
            ));
        }

        let mut headers = HeaderMap::new();
        if let Some(referer) = &config.referer {
            let value = HeaderValue::from_str(referer).map_err(|e| {
                Error::config("api.referer", format!("invalid referer header: {}", e))
            })?;
            headers.insert(REFERER, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            asset_timeout: config.asset_timeout,
        })
    }

    /// `{base}/texture/{id}`
    pub fn record_url(&self, id: SkinId) -> Url {
        self.endpoint("texture", &id.to_string())
    }

    /// `{base}/textures/{hash}`
    pub fn asset_url(&self, hash: &str) -> Url {
        self.endpoint("textures", hash)
    }

    fn endpoint(&self, collection: &str, key: &str) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(collection).push(key);
        }
        url
    }
}

/// Map a transport-level failure (no HTTP status) to a transient error
fn transport_error(err: &reqwest::Error, url: &Url) -> TaskError {
    let reason = if err.is_timeout() {
        format!("request to {} timed out", url)
    } else if err.is_connect() {
        format!("connection to {} failed: {}", url, err)
    } else {
        format!("request to {} failed: {}", url, err)
    };
    TaskError::Transient { reason }
}

/// Statuses worth another attempt: server-side errors, request timeout, rate limiting
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn status_error(status: StatusCode, url: &Url) -> TaskError {
    if is_transient_status(status) {
        TaskError::Transient {
            reason: format!("HTTP {} from {}", status, url),
        }
    } else {
        TaskError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl SkinApi for HttpSkinApi {
    async fn fetch_record(&self, id: SkinId) -> std::result::Result<SkinRecord, TaskError> {
        let url = self.record_url(id);
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e, &url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TaskError::NotFound { id: id.get() });
        }
        if !status.is_success() {
            return Err(status_error(status, &url));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&e, &url))?;

        let parsed: TextureResponse =
            serde_json::from_str(&body).map_err(|e| TaskError::MalformedResponse {
                id: id.get(),
                reason: e.to_string(),
            })?;

        parsed.into_record(id)
    }

    async fn fetch_asset(&self, hash: &str) -> std::result::Result<Bytes, TaskError> {
        let url = self.asset_url(hash);
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "image/png, image/*;q=0.9, */*;q=0.8")
            .timeout(self.asset_timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, &url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TaskError::AssetNotFound {
                hash: hash.to_string(),
            });
        }
        if !status.is_success() {
            return Err(status_error(status, &url));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&e, &url))?;

        if body.is_empty() {
            return Err(TaskError::Transient {
                reason: format!("empty body from {}", url),
            });
        }

        Ok(body)
    }
}

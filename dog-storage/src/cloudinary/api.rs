//! Thin client for the parts of the Cloudinary REST API the service needs.
//!
//! Upload and destroy calls are signed with the API secret; Admin API calls
//! (resource lookup and listing) use HTTP basic auth.

use bytes::Bytes;
use reqwest::{multipart, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::{signing::sign_params, BlobError, BlobKey, BlobPayload, BlobResult, Clock};

use super::CloudinaryConfig;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Resource {
    pub public_id: String,
    #[serde(default)]
    pub secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceList {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

pub(crate) struct CloudinaryApi {
    config: Arc<CloudinaryConfig>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl CloudinaryApi {
    pub fn new(config: Arc<CloudinaryConfig>, clock: Arc<dyn Clock>) -> BlobResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.options.timeout_secs))
            .build()?;
        Ok(Self { config, http, clock })
    }

    pub fn config(&self) -> &CloudinaryConfig {
        &self.config
    }

    /// `<root>/<resource_type>/<action>`
    pub fn action_url(&self, resource_type: &str, action: &str) -> String {
        format!("{}/{}/{}", self.config.api_root(), resource_type, action)
    }

    /// Sign params with a fresh timestamp, the way uploads and destroys expect
    pub fn signed(&self, mut params: BTreeMap<String, String>) -> BlobResult<BTreeMap<String, String>> {
        params.insert("timestamp".to_string(), self.clock.timestamp().to_string());
        sign_params(
            params,
            &self.config.api_key,
            &self.config.api_secret,
            self.config.options.signature_algorithm,
        )
    }

    pub async fn upload(&self, key: &BlobKey, payload: BlobPayload) -> BlobResult<serde_json::Value> {
        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), key.to_string());
        let signed = self.signed(params)?;

        let length = payload.len();
        let mut file = multipart::Part::stream_with_length(payload.bytes, length)
            .file_name(payload.filename.unwrap_or_else(|| key.to_string()));
        if let Some(content_type) = payload.content_type.as_deref() {
            file = file
                .mime_str(content_type)
                .map_err(|e| BlobError::invalid(format!("bad content type {}: {}", content_type, e)))?;
        }

        let form = signed
            .into_iter()
            .fold(multipart::Form::new(), |form, (name, value)| form.text(name, value))
            .part("file", file);

        let url = self.action_url(&self.config.options.resource_type, "upload");
        debug!(url = %url, "uploading");
        let response = self.http.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(BlobError::upload(key.as_str(), status.as_u16(), message));
        }
        Ok(response.json().await?)
    }

    /// Returns `true` when something was deleted, `false` when nothing was there
    pub async fn destroy(&self, public_id: &str) -> BlobResult<bool> {
        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), public_id.to_string());
        params.insert("type".to_string(), self.config.options.delivery_type.clone());
        let signed = self.signed(params)?;

        let url = self.action_url(&self.config.options.resource_type, "destroy");
        let response = self.http.post(&url).form(&signed).send().await?;
        let response = check(response, "delete", public_id).await?;
        let body: DestroyResponse = response.json().await?;

        match body.result.as_str() {
            "ok" => Ok(true),
            "not found" => Ok(false),
            other => Err(BlobError::backend("delete", public_id, None, other)),
        }
    }

    /// Admin API lookup of one resource
    pub async fn resource(&self, public_id: &str) -> BlobResult<Resource> {
        let mut url = self.resources_url()?;
        url.path_segments_mut()
            .map_err(|_| BlobError::config("api_base_url cannot be a base"))?
            .extend(public_id.split('/'));

        let response = self.admin(self.http.get(url)).send().await?;
        let response = check(response, "resource", public_id).await?;
        Ok(response.json().await?)
    }

    /// Admin API lookup by exact id; empty when nothing matches
    pub async fn resources_by_ids(&self, public_id: &str) -> BlobResult<Vec<Resource>> {
        let url = self.resources_url()?;
        let request = self
            .admin(self.http.get(url))
            .query(&[("public_ids[]", public_id)]);

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check(response, "exists", public_id).await?;
        let list: ResourceList = response.json().await?;
        Ok(list.resources)
    }

    /// One page of resources whose id starts with `prefix`
    pub async fn resources_with_prefix(
        &self,
        prefix: &str,
        cursor: Option<&str>,
    ) -> BlobResult<ResourceList> {
        let url = self.resources_url()?;
        let max_results = self.config.options.max_results.to_string();
        let mut query = vec![("prefix", prefix), ("max_results", max_results.as_str())];
        if let Some(cursor) = cursor {
            query.push(("next_cursor", cursor));
        }

        let response = self.admin(self.http.get(url)).query(&query).send().await?;
        let response = check(response, "delete_prefixed", prefix).await?;
        Ok(response.json().await?)
    }

    /// Unauthenticated GET of a delivery URL
    pub async fn fetch(&self, url: &str, key: &BlobKey, range: Option<String>) -> BlobResult<Response> {
        let mut request = self.http.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        let response = request.send().await?;
        check(response, "download", key.as_str()).await
    }

    pub async fn fetch_bytes(&self, url: &str, key: &BlobKey) -> BlobResult<Bytes> {
        Ok(self.fetch(url, key, None).await?.bytes().await?)
    }

    fn resources_url(&self) -> BlobResult<Url> {
        let raw = format!(
            "{}/resources/{}/{}",
            self.config.api_root(),
            self.config.options.resource_type,
            self.config.options.delivery_type
        );
        Url::parse(&raw).map_err(|e| BlobError::config(format!("invalid api url {}: {}", raw, e)))
    }

    fn admin(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.api_key, Some(&self.config.api_secret))
    }
}

/// Map a non-2xx response to `NotFound` or `Backend`
async fn check(response: Response, operation: &str, key: &str) -> BlobResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BlobError::not_found(key));
    }
    let message = error_message(response).await;
    Err(BlobError::backend(operation, key, Some(status.as_u16()), message))
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) => match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.error.message,
            Err(_) if !text.is_empty() => text,
            Err(_) => status.to_string(),
        },
        Err(e) => e.to_string(),
    }
}

//! Cloudinary binding of the storage contract.
//!
//! Deviations from the generic contract:
//!
//! - `url_for_direct_upload` ignores `expires_in`, `content_type`,
//!   `content_length` and `checksum`. The returned endpoint is fixed and the
//!   signed headers are accepted for exactly `direct_upload_window_secs`
//!   (one hour by default) after their timestamp.
//! - An upload checksum is recorded on the receipt and the event but is not
//!   sent to the backend, which has no integrity parameter for it.
//! - Uploads, lookups and deletes use the configured `resource_type`; direct
//!   uploads go to the `auto` endpoint.

mod api;
mod config;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    events::{EventSink, Operation, StorageEvent, TracingEventSink},
    service::record,
    signing::{sign_params, SignedUrlPolicy},
    BlobError, BlobKey, BlobPayload, BlobResult, ByteRange, ByteStream, Clock,
    DirectUploadRequest, SignedUrl, StorageService, SystemClock, UploadReceipt, UrlOptions,
};

use api::CloudinaryApi;
pub use config::{CloudinaryConfig, CloudinaryOptions};

const SERVICE_NAME: &str = "cloudinary";

/// Resource type of the direct upload endpoint
const DIRECT_UPLOAD_RESOURCE_TYPE: &str = "auto";

/// Storage service backed by the Cloudinary media API
pub struct CloudinaryService {
    api: CloudinaryApi,
    policy: SignedUrlPolicy,
    events: Arc<dyn EventSink>,
}

impl CloudinaryService {
    pub fn new(config: CloudinaryConfig) -> BlobResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CloudinaryConfig, clock: Arc<dyn Clock>) -> BlobResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            api: CloudinaryApi::new(config, clock.clone())?,
            policy: SignedUrlPolicy::new(clock),
            events: Arc::new(TracingEventSink),
        })
    }

    pub fn from_env() -> BlobResult<Self> {
        Self::new(CloudinaryConfig::from_env()?)
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &CloudinaryConfig {
        self.api.config()
    }

    async fn delivery_url(&self, key: &BlobKey) -> BlobResult<String> {
        let resource = self.api.resource(key.as_str()).await?;
        resource.secure_url.ok_or_else(|| {
            BlobError::backend("download", key.as_str(), None, "resource has no secure_url")
        })
    }

    fn event(&self, operation: Operation, key: &BlobKey) -> StorageEvent {
        StorageEvent::for_key(SERVICE_NAME, operation, key.as_str())
    }

    fn emit<T>(&self, event: StorageEvent, result: BlobResult<T>) -> BlobResult<T> {
        record(self.events.as_ref(), event, result)
    }
}

impl std::fmt::Debug for CloudinaryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryService")
            .field("config", self.api.config())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageService for CloudinaryService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    #[instrument(skip(self, payload), fields(key = %key, bytes = payload.len()))]
    async fn upload(&self, key: &BlobKey, payload: BlobPayload) -> BlobResult<UploadReceipt> {
        let checksum = payload.checksum.clone();
        let size = payload.len();
        let event = self.event(Operation::Upload, key).with_checksum(checksum.clone());

        let result = self.api.upload(key, payload).await.map(|body| {
            let receipt = UploadReceipt::new(key.clone(), size, body);
            match checksum {
                Some(checksum) => receipt.with_checksum(checksum),
                None => receipt,
            }
        });
        self.emit(event, result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &BlobKey) -> BlobResult<Bytes> {
        let result = async {
            let url = self.delivery_url(key).await?;
            debug!(url = %url, "fetching");
            self.api.fetch_bytes(&url, key).await
        }
        .await;
        self.emit(self.event(Operation::Download, key), result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download_streaming(&self, key: &BlobKey) -> BlobResult<ByteStream> {
        let result = async {
            let url = self.delivery_url(key).await?;
            let response = self.api.fetch(&url, key, None).await?;
            let stream = response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            Ok::<_, BlobError>(Box::pin(stream) as ByteStream)
        }
        .await;
        self.emit(self.event(Operation::StreamingDownload, key), result)
    }

    #[instrument(skip(self), fields(key = %key, range = %range.to_header()))]
    async fn download_chunk(&self, key: &BlobKey, range: ByteRange) -> BlobResult<Bytes> {
        let result = async {
            if !range.is_valid() {
                return Err(BlobError::invalid(format!("invalid range {}", range.to_header())));
            }
            let url = self.delivery_url(key).await?;
            let response = self.api.fetch(&url, key, Some(range.to_header())).await?;
            if response.status() == StatusCode::PARTIAL_CONTENT {
                return Ok(response.bytes().await?);
            }

            // Range was ignored and the whole object came back
            debug!(status = %response.status(), "range not honored, slicing locally");
            let body = response.bytes().await?;
            range.slice_of(&body).ok_or_else(|| {
                BlobError::invalid(format!(
                    "range {} is outside a {} byte object",
                    range.to_header(),
                    body.len()
                ))
            })
        }
        .await;
        self.emit(self.event(Operation::DownloadChunk, key), result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &BlobKey) -> BlobResult<bool> {
        let result = self
            .api
            .resources_by_ids(key.as_str())
            .await
            .map(|resources| !resources.is_empty());
        self.emit(self.event(Operation::Exists, key), result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        let result = match self.api.destroy(key.as_str()).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("nothing stored under key");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        };
        self.emit(self.event(Operation::Delete, key), result)
    }

    #[instrument(skip(self))]
    async fn delete_prefixed(&self, prefix: &str) -> BlobResult<()> {
        let result = async {
            let mut public_ids = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = self
                    .api
                    .resources_with_prefix(prefix, cursor.as_deref())
                    .await?;
                public_ids.extend(page.resources.into_iter().map(|r| r.public_id));
                match page.next_cursor {
                    Some(next) if !next.is_empty() => cursor = Some(next),
                    _ => break,
                }
            }
            debug!("enumerated {} resources", public_ids.len());

            let mut failed = Vec::new();
            for public_id in &public_ids {
                if let Err(e) = self.api.destroy(public_id).await {
                    warn!(key = %public_id, error = %e, "failed to delete resource");
                    failed.push(public_id.as_str());
                }
            }
            if !failed.is_empty() {
                return Err(BlobError::backend(
                    "delete_prefixed",
                    prefix,
                    None,
                    format!(
                        "{} of {} deletes failed: {}",
                        failed.len(),
                        public_ids.len(),
                        failed.join(", ")
                    ),
                ));
            }
            Ok::<_, BlobError>(())
        }
        .await;

        let event = StorageEvent::for_prefix(SERVICE_NAME, Operation::DeletePrefixed, prefix);
        self.emit(event, result)
    }

    #[instrument(skip(self, options), fields(key = %key))]
    async fn url(&self, key: &BlobKey, options: UrlOptions) -> BlobResult<SignedUrl> {
        let result = (|| -> BlobResult<SignedUrl> {
            let config = self.api.config();
            let resolved = self.policy.resolve(key, &options)?;
            let signed = sign_params(
                resolved.to_params(&config.options.delivery_type),
                &config.api_key,
                &config.api_secret,
                config.options.signature_algorithm,
            )?;

            let base = self.api.action_url(&resolved.resource_type, "download");
            let url = Url::parse_with_params(&base, signed.iter())
                .map_err(|e| BlobError::invalid(format!("bad url {}: {}", base, e)))?;

            Ok(SignedUrl {
                url: url.to_string(),
                expires_at: resolved.expires_at,
                disposition: resolved.disposition,
                filename: resolved.filename,
                content_type: resolved.content_type,
            })
        })();
        self.emit(self.event(Operation::Url, key), result)
    }

    /// Fixed upload endpoint; the request parameters are ignored.
    async fn url_for_direct_upload(
        &self,
        key: &BlobKey,
        _request: &DirectUploadRequest,
    ) -> BlobResult<String> {
        let url = self.api.action_url(DIRECT_UPLOAD_RESOURCE_TYPE, "upload");
        self.emit(self.event(Operation::UrlForDirectUpload, key), Ok(url))
    }

    #[instrument(skip(self, request), fields(key = %key))]
    async fn headers_for_direct_upload(
        &self,
        key: &BlobKey,
        request: &DirectUploadRequest,
    ) -> BlobResult<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), key.to_string());
        let result = self.api.signed(params);

        let event = self
            .event(Operation::HeadersForDirectUpload, key)
            .with_checksum(Some(request.checksum.clone()));
        self.emit(event, result)
    }

    /// Always the configured window (one hour by default), whatever
    /// `expires_in` asks for.
    fn direct_upload_expires_at(&self, _request: &DirectUploadRequest, signed_at: i64) -> i64 {
        signed_at + self.api.config().options.direct_upload_window_secs as i64
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    events::{EventSink, Operation, StorageEvent, TracingEventSink},
    service::record,
    signing::{sign_params, verify_signature, SignatureAlgorithm, SignedUrlPolicy},
    BlobError, BlobKey, BlobPayload, BlobResult, ByteRange, ByteStream, Clock,
    DirectUploadRequest, SignedUrl, StorageService, SystemClock, UploadReceipt, UrlOptions,
};

const SERVICE_NAME: &str = "memory";

/// Settings for [`MemoryService`]
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Seconds a direct upload signature stays acceptable
    pub direct_upload_window_secs: u64,
    /// Size of chunks yielded by streaming downloads
    pub chunk_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_url: "memory://dog-storage".to_string(),
            api_key: "memory".to_string(),
            api_secret: "memory-secret".to_string(),
            direct_upload_window_secs: 3600,
            chunk_size: 64 * 1024,
        }
    }
}

impl MemoryConfig {
    pub fn with_credentials<K: Into<String>, S: Into<String>>(mut self, api_key: K, api_secret: S) -> Self {
        self.api_key = api_key.into();
        self.api_secret = api_secret.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> BlobResult<()> {
        if self.chunk_size == 0 {
            return Err(BlobError::config("chunk_size must be greater than zero"));
        }
        Url::parse(&self.base_url)
            .map_err(|e| BlobError::config(format!("invalid base_url {}: {}", self.base_url, e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[redacted]")
            .field("direct_upload_window_secs", &self.direct_upload_window_secs)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: Option<String>,
    checksum: Option<String>,
}

/// In-process storage service for tests and development.
///
/// Signs URLs and direct uploads the same way the remote backends do and can
/// play the backend's role in both handshakes through [`MemoryService::resolve_url`]
/// and [`MemoryService::accept_direct_upload`].
#[derive(Clone)]
pub struct MemoryService {
    objects: Arc<RwLock<BTreeMap<BlobKey, StoredObject>>>,
    config: Arc<MemoryConfig>,
    policy: SignedUrlPolicy,
    events: Arc<dyn EventSink>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            config: Arc::new(config),
            policy: SignedUrlPolicy::new(Arc::new(SystemClock)),
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = SignedUrlPolicy::new(clock);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Keys currently stored, in order
    pub fn keys(&self) -> Vec<BlobKey> {
        self.objects.read().keys().cloned().collect()
    }

    /// Content type recorded at upload
    pub fn content_type(&self, key: &BlobKey) -> Option<String> {
        self.objects.read().get(key).and_then(|o| o.content_type.clone())
    }

    /// Checksum recorded with the object, if the uploader sent one
    pub fn checksum(&self, key: &BlobKey) -> Option<String> {
        self.objects.read().get(key).and_then(|o| o.checksum.clone())
    }

    /// Serve a URL produced by [`StorageService::url`].
    ///
    /// Fails with `Expired` once the embedded expiry has passed and with
    /// `Invalid` when any signed parameter was altered.
    pub fn resolve_url(&self, url: &str) -> BlobResult<Bytes> {
        let parsed = Url::parse(url).map_err(|e| BlobError::invalid(format!("bad url: {}", e)))?;
        let mut params: BTreeMap<String, String> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let signature = params
            .remove("signature")
            .ok_or_else(|| BlobError::invalid("url is not signed"))?;
        self.check_api_key(&params)?;
        if !verify_signature(&params, &signature, &self.config.api_secret, SignatureAlgorithm::Sha256)? {
            return Err(BlobError::invalid("signature mismatch"));
        }

        let expires_at: i64 = params
            .get("expires_at")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BlobError::invalid("url has no expiry"))?;
        if self.policy.clock().timestamp() > expires_at {
            return Err(BlobError::Expired { expires_at });
        }

        let key = params
            .get("public_id")
            .map(|id| BlobKey::from(id.as_str()))
            .ok_or_else(|| BlobError::invalid("url has no public_id"))?;
        self.read(&key).map(|o| o.bytes)
    }

    /// Backend side of a direct upload: check the signed fields and store the file.
    pub fn accept_direct_upload(
        &self,
        fields: &BTreeMap<String, String>,
        file: Bytes,
    ) -> BlobResult<UploadReceipt> {
        let signature = fields
            .get("signature")
            .ok_or_else(|| BlobError::invalid("missing signature"))?;
        self.check_api_key(fields)?;
        if !verify_signature(fields, signature, &self.config.api_secret, SignatureAlgorithm::Sha256)? {
            return Err(BlobError::invalid("signature mismatch"));
        }

        let timestamp: i64 = fields
            .get("timestamp")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BlobError::invalid("missing timestamp"))?;
        let expires_at = timestamp + self.config.direct_upload_window_secs as i64;
        if self.policy.clock().timestamp() > expires_at {
            return Err(BlobError::Expired { expires_at });
        }

        let key = fields
            .get("public_id")
            .map(|id| BlobKey::from(id.as_str()))
            .ok_or_else(|| BlobError::invalid("missing public_id"))?;
        let payload = BlobPayload {
            bytes: file,
            content_type: None,
            filename: None,
            checksum: None,
        };
        Ok(self.write(&key, payload))
    }

    fn check_api_key(&self, params: &BTreeMap<String, String>) -> BlobResult<()> {
        match params.get("api_key") {
            Some(key) if *key == self.config.api_key => Ok(()),
            _ => Err(BlobError::invalid("unknown api_key")),
        }
    }

    fn read(&self, key: &BlobKey) -> BlobResult<StoredObject> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::not_found(key.as_str()))
    }

    fn write(&self, key: &BlobKey, payload: BlobPayload) -> UploadReceipt {
        let size = payload.len();
        let body = serde_json::json!({
            "public_id": key.as_str(),
            "bytes": size,
            "content_type": payload.content_type,
            "original_filename": payload.filename,
        });
        let checksum = payload.checksum.clone();

        self.objects.write().insert(
            key.clone(),
            StoredObject {
                bytes: payload.bytes,
                content_type: payload.content_type,
                checksum: payload.checksum,
            },
        );

        let receipt = UploadReceipt::new(key.clone(), size, body);
        match checksum {
            Some(checksum) => receipt.with_checksum(checksum),
            None => receipt,
        }
    }

    fn event(&self, operation: Operation, key: &BlobKey) -> StorageEvent {
        StorageEvent::for_key(SERVICE_NAME, operation, key.as_str())
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for MemoryService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    #[instrument(skip(self, payload), fields(key = %key, bytes = payload.len()))]
    async fn upload(&self, key: &BlobKey, payload: BlobPayload) -> BlobResult<UploadReceipt> {
        let event = self.event(Operation::Upload, key).with_checksum(payload.checksum.clone());
        let receipt = self.write(key, payload);
        debug!("stored {} bytes", receipt.size_bytes);
        record(self.events.as_ref(), event, Ok(receipt))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &BlobKey) -> BlobResult<Bytes> {
        let result = self.read(key).map(|o| o.bytes);
        record(self.events.as_ref(), self.event(Operation::Download, key), result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download_streaming(&self, key: &BlobKey) -> BlobResult<ByteStream> {
        let chunk_size = self.config.chunk_size.max(1);
        let result = self.read(key).map(|object| {
            let bytes = object.bytes;
            let chunks: Vec<Result<Bytes, std::io::Error>> = (0..bytes.len())
                .step_by(chunk_size)
                .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
                .collect();
            Box::pin(stream::iter(chunks)) as ByteStream
        });
        record(self.events.as_ref(), self.event(Operation::StreamingDownload, key), result)
    }

    #[instrument(skip(self), fields(key = %key, range = %range.to_header()))]
    async fn download_chunk(&self, key: &BlobKey, range: ByteRange) -> BlobResult<Bytes> {
        let result = self.read(key).and_then(|object| {
            range.slice_of(&object.bytes).ok_or_else(|| {
                BlobError::invalid(format!(
                    "range {} is outside a {} byte object",
                    range.to_header(),
                    object.bytes.len()
                ))
            })
        });
        record(self.events.as_ref(), self.event(Operation::DownloadChunk, key), result)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &BlobKey) -> BlobResult<bool> {
        let found = self.objects.read().contains_key(key);
        record(self.events.as_ref(), self.event(Operation::Exists, key), Ok(found))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        if self.objects.write().remove(key).is_none() {
            debug!("nothing stored under key");
        }
        record(self.events.as_ref(), self.event(Operation::Delete, key), Ok(()))
    }

    #[instrument(skip(self))]
    async fn delete_prefixed(&self, prefix: &str) -> BlobResult<()> {
        let matching: Vec<BlobKey> = self
            .objects
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &matching {
            if self.objects.write().remove(key).is_none() {
                warn!(key = %key, "object vanished during prefixed delete");
            }
        }
        debug!("deleted {} objects", matching.len());

        let event = StorageEvent::for_prefix(SERVICE_NAME, Operation::DeletePrefixed, prefix);
        record(self.events.as_ref(), event, Ok(()))
    }

    #[instrument(skip(self, options), fields(key = %key))]
    async fn url(&self, key: &BlobKey, options: UrlOptions) -> BlobResult<SignedUrl> {
        let result = (|| -> BlobResult<SignedUrl> {
            let resolved = self.policy.resolve(key, &options)?;
            let signed = sign_params(
                resolved.to_params("upload"),
                &self.config.api_key,
                &self.config.api_secret,
                SignatureAlgorithm::Sha256,
            )?;

            let base = format!(
                "{}/{}/download",
                self.config.base_url.trim_end_matches('/'),
                resolved.resource_type
            );
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
        record(self.events.as_ref(), self.event(Operation::Url, key), result)
    }

    async fn url_for_direct_upload(
        &self,
        key: &BlobKey,
        _request: &DirectUploadRequest,
    ) -> BlobResult<String> {
        let url = format!("{}/direct_uploads", self.config.base_url.trim_end_matches('/'));
        record(self.events.as_ref(), self.event(Operation::UrlForDirectUpload, key), Ok(url))
    }

    #[instrument(skip(self, request), fields(key = %key))]
    async fn headers_for_direct_upload(
        &self,
        key: &BlobKey,
        request: &DirectUploadRequest,
    ) -> BlobResult<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        params.insert("timestamp".to_string(), self.policy.clock().timestamp().to_string());
        params.insert("public_id".to_string(), key.to_string());
        let result = sign_params(
            params,
            &self.config.api_key,
            &self.config.api_secret,
            SignatureAlgorithm::Sha256,
        );
        let event = self
            .event(Operation::HeadersForDirectUpload, key)
            .with_checksum(Some(request.checksum.clone()));
        record(self.events.as_ref(), event, result)
    }

    fn direct_upload_expires_at(&self, _request: &DirectUploadRequest, signed_at: i64) -> i64 {
        signed_at + self.config.direct_upload_window_secs as i64
    }
}

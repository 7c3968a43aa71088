use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

use crate::{
    events::{EventSink, StorageEvent},
    BlobError, BlobKey, BlobPayload, BlobResult, ByteRange, ByteStream, DirectUploadDescriptor,
    DirectUploadRequest, SignedUrl, UploadReceipt, UrlOptions,
};

/// The operation set every storage backend implements.
///
/// All operations are keyed by a caller-chosen [`BlobKey`]. Implementations hold
/// their credentials read-only after construction, so a single service can be
/// shared behind an `Arc` and called concurrently for different keys.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Short name used on events and log records
    fn name(&self) -> &str;

    /// Store `payload` under `key`.
    ///
    /// A checksum on the payload is forwarded to the backend; it is not
    /// verified here.
    async fn upload(&self, key: &BlobKey, payload: BlobPayload) -> BlobResult<UploadReceipt>;

    /// Whole object content
    async fn download(&self, key: &BlobKey) -> BlobResult<Bytes>;

    /// Object content as a finite stream of chunks.
    ///
    /// Dropping the stream before it ends releases the underlying connection.
    async fn download_streaming(&self, key: &BlobKey) -> BlobResult<ByteStream>;

    /// Bytes within an inclusive range
    async fn download_chunk(&self, key: &BlobKey, range: ByteRange) -> BlobResult<Bytes>;

    /// `Ok(false)` when the backend has nothing under `key`
    async fn exists(&self, key: &BlobKey) -> BlobResult<bool>;

    /// Remove the object. Deleting an absent key succeeds.
    async fn delete(&self, key: &BlobKey) -> BlobResult<()>;

    /// Delete every object whose key starts with `prefix`.
    ///
    /// Best effort: a failed delete is logged and the remaining keys are still
    /// attempted, then the call fails with a `Backend` error naming the keys
    /// left behind. Objects written after enumeration starts may survive.
    async fn delete_prefixed(&self, prefix: &str) -> BlobResult<()>;

    /// Signed, expiring URL for reading the object
    async fn url(&self, key: &BlobKey, options: UrlOptions) -> BlobResult<SignedUrl>;

    /// Endpoint a client POSTs a direct upload to
    async fn url_for_direct_upload(
        &self,
        key: &BlobKey,
        request: &DirectUploadRequest,
    ) -> BlobResult<String>;

    /// Form fields the client must send alongside the file.
    ///
    /// Contains a signature and timestamp; never the secret.
    async fn headers_for_direct_upload(
        &self,
        key: &BlobKey,
        request: &DirectUploadRequest,
    ) -> BlobResult<BTreeMap<String, String>>;

    /// Unix seconds until which headers signed at `signed_at` are honored
    fn direct_upload_expires_at(&self, request: &DirectUploadRequest, signed_at: i64) -> i64;

    /// Issue a complete descriptor for one upload attempt.
    ///
    /// The expiry is derived from the `timestamp` the headers were signed with.
    async fn direct_upload(
        &self,
        key: &BlobKey,
        request: &DirectUploadRequest,
    ) -> BlobResult<DirectUploadDescriptor> {
        let url = self.url_for_direct_upload(key, request).await?;
        let headers = self.headers_for_direct_upload(key, request).await?;
        let signed_at: i64 = headers
            .get("timestamp")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BlobError::signing("direct upload headers carry no timestamp"))?;
        let expires_at = self.direct_upload_expires_at(request, signed_at);
        Ok(DirectUploadDescriptor::new(url, headers, expires_at))
    }
}

/// Emit `event` with the outcome of `result`, then hand the result back
pub(crate) fn record<T>(
    sink: &dyn EventSink,
    event: StorageEvent,
    result: BlobResult<T>,
) -> BlobResult<T> {
    sink.emit(event.with_outcome(result.is_ok()));
    result
}

use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Caller-chosen identifier for a stored blob
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(pub String);

impl BlobKey {
    /// Create from existing string
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlobKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for BlobKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Content to store plus its descriptive metadata
#[derive(Debug, Clone)]
pub struct BlobPayload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub checksum: Option<String>,
}

impl BlobPayload {
    pub fn new<B: Into<Bytes>>(bytes: B) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
            filename: None,
            checksum: None,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Checksum forwarded to the backend; not verified locally
    pub fn with_checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// How a signed URL asks the browser to present the content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::Attachment)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Disposition {
    type Err = crate::BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "attachment" => Ok(Self::Attachment),
            other => Err(crate::BlobError::invalid(format!(
                "Unknown disposition: {}",
                other
            ))),
        }
    }
}

/// Options for `StorageService::url`
#[derive(Debug, Clone)]
pub struct UrlOptions {
    pub expires_in: Duration,
    pub disposition: Disposition,
    pub filename: String,
    pub content_type: String,
    /// Overrides the resource type inferred from `content_type`
    pub resource_type: Option<String>,
}

impl UrlOptions {
    pub fn new<F: Into<String>, C: Into<String>>(
        expires_in: Duration,
        disposition: Disposition,
        filename: F,
        content_type: C,
    ) -> Self {
        Self {
            expires_in,
            disposition,
            filename: filename.into(),
            content_type: content_type.into(),
            resource_type: None,
        }
    }

    pub fn with_resource_type<S: Into<String>>(mut self, resource_type: S) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

/// Declared properties of a file the client is about to upload directly
#[derive(Debug, Clone)]
pub struct DirectUploadRequest {
    pub expires_in: Duration,
    pub filename: String,
    pub content_type: String,
    pub content_length: u64,
    pub checksum: String,
}

impl DirectUploadRequest {
    pub fn new<F, C, S>(filename: F, content_type: C, content_length: u64, checksum: S) -> Self
    where
        F: Into<String>,
        C: Into<String>,
        S: Into<String>,
    {
        Self {
            expires_in: Duration::from_secs(5 * 60),
            filename: filename.into(),
            content_type: content_type.into(),
            content_length,
            checksum: checksum.into(),
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }
}

/// Inclusive byte range for partial reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    pub fn is_valid(&self) -> bool {
        self.end >= self.start
    }

    /// The part of `bytes` this range covers, with `end` clamped to the last byte.
    ///
    /// `None` when the range is inverted or starts past the end.
    pub fn slice_of(&self, bytes: &Bytes) -> Option<Bytes> {
        let len = bytes.len() as u64;
        if !self.is_valid() || self.start >= len {
            return None;
        }
        let end = self.end.min(len - 1);
        Some(bytes.slice(self.start as usize..=end as usize))
    }

    /// Value for an HTTP `Range` header
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_parses_and_prints() {
        assert_eq!("inline".parse::<Disposition>().unwrap(), Disposition::Inline);
        assert_eq!(Disposition::Attachment.to_string(), "attachment");
        assert!("download".parse::<Disposition>().is_err());
    }

    #[test]
    fn byte_range_is_inclusive() {
        let range = ByteRange::new(10, 19);
        assert_eq!(range.length(), 10);
        assert_eq!(range.to_header(), "bytes=10-19");
        assert!(!ByteRange::new(5, 4).is_valid());
    }

    #[test]
    fn byte_range_length_saturates() {
        assert_eq!(ByteRange::new(0, u64::MAX).length(), u64::MAX);
        assert_eq!(ByteRange::new(7, 7).length(), 1);
    }

    #[test]
    fn byte_range_slices_with_clamped_end() {
        let bytes = Bytes::from_static(b"0123456789");
        assert_eq!(ByteRange::new(0, 3).slice_of(&bytes), Some(Bytes::from_static(b"0123")));
        assert_eq!(ByteRange::new(8, 100).slice_of(&bytes), Some(Bytes::from_static(b"89")));
        assert_eq!(ByteRange::new(10, 12).slice_of(&bytes), None);
        assert_eq!(ByteRange::new(4, 2).slice_of(&bytes), None);
    }

    #[test]
    fn blob_key_prefix_match() {
        let key = BlobKey::from("uploads/2024/a.png");
        assert!(key.starts_with("uploads/"));
        assert!(!key.starts_with("avatars/"));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"uploads/2024/a.png\"");
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{BlobKey, Disposition};

/// Receipt returned after a backend accepted an upload.
///
/// `body` is the backend's raw response; the adapter does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub key: BlobKey,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub body: serde_json::Value,
}

impl UploadReceipt {
    pub fn new(key: BlobKey, size_bytes: u64, body: serde_json::Value) -> Self {
        Self {
            key,
            size_bytes,
            checksum: None,
            body,
        }
    }

    pub fn with_checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// A time-limited URL for reading a blob.
///
/// Recomputed on every request and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    /// Unix seconds after which the URL is no longer honored
    pub expires_at: i64,
    pub disposition: Disposition,
    pub filename: String,
    pub content_type: String,
}

impl SignedUrl {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

impl std::fmt::Display for SignedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Everything a client needs to POST a file straight to the backend.
///
/// Single use: request a fresh descriptor for every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectUploadDescriptor {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub expires_at: i64,
}

impl DirectUploadDescriptor {
    pub fn new(url: String, headers: BTreeMap<String, String>, expires_at: i64) -> Self {
        Self {
            url,
            headers,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_for_the_client() {
        let mut headers = BTreeMap::new();
        headers.insert("timestamp".to_string(), "1700000000".to_string());
        let descriptor = DirectUploadDescriptor::new(
            "https://api.example.com/upload".to_string(),
            headers,
            1_700_003_600,
        );

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["headers"]["timestamp"], "1700000000");
        assert_eq!(json["expires_at"], 1_700_003_600);
        assert!(!descriptor.is_expired_at(1_700_003_600));
        assert!(descriptor.is_expired_at(1_700_003_601));
    }
}

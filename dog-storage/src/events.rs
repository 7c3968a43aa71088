//! Instrumentation events.
//!
//! Every service operation emits exactly one [`StorageEvent`] to an
//! [`EventSink`]. Sinks are observers only: they cannot fail an operation and
//! are called after the backend call regardless of its outcome.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Operation names carried on events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Download,
    StreamingDownload,
    DownloadChunk,
    Exists,
    Delete,
    DeletePrefixed,
    Url,
    UrlForDirectUpload,
    HeadersForDirectUpload,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::StreamingDownload => "streaming_download",
            Self::DownloadChunk => "download_chunk",
            Self::Exists => "exists",
            Self::Delete => "delete",
            Self::DeletePrefixed => "delete_prefixed",
            Self::Url => "url",
            Self::UrlForDirectUpload => "url_for_direct_upload",
            Self::HeadersForDirectUpload => "headers_for_direct_upload",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubject {
    Key(String),
    Prefix(String),
}

/// One instrumentation record per service call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEvent {
    pub service: String,
    pub operation: Operation,
    pub subject: EventSubject,
    pub checksum: Option<String>,
    /// Whether the backend call succeeded
    pub ok: bool,
}

impl StorageEvent {
    pub fn for_key<S: Into<String>, K: Into<String>>(service: S, operation: Operation, key: K) -> Self {
        Self {
            service: service.into(),
            operation,
            subject: EventSubject::Key(key.into()),
            checksum: None,
            ok: true,
        }
    }

    pub fn for_prefix<S: Into<String>, P: Into<String>>(service: S, operation: Operation, prefix: P) -> Self {
        Self {
            service: service.into(),
            operation,
            subject: EventSubject::Prefix(prefix.into()),
            checksum: None,
            ok: true,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_outcome(mut self, ok: bool) -> Self {
        self.ok = ok;
        self
    }

    pub fn key(&self) -> Option<&str> {
        match &self.subject {
            EventSubject::Key(key) => Some(key),
            EventSubject::Prefix(_) => None,
        }
    }
}

/// Receives instrumentation events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StorageEvent);
}

/// Writes events as structured tracing records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: StorageEvent) {
        let subject = match &event.subject {
            EventSubject::Key(key) => key.as_str(),
            EventSubject::Prefix(prefix) => prefix.as_str(),
        };
        info!(
            target: "dog_storage::events",
            service = %event.service,
            operation = %event.operation,
            subject = %subject,
            checksum = event.checksum.as_deref().unwrap_or(""),
            ok = event.ok,
            "storage.{}",
            event.operation
        );
    }
}

/// Discards events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: StorageEvent) {}
}

/// Keeps events in memory so tests can inspect them
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<StorageEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StorageEvent> {
        self.events.lock().clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.events.lock().iter().map(|e| e.operation).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: StorageEvent) {
        self.events.lock().push(event);
    }
}

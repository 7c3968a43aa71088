//! # dog-storage: Pluggable remote blob storage services
//!
//! `dog-storage` defines the contract every storage backend implements
//! ([`StorageService`]) and ships two bindings of it: a Cloudinary service and
//! an in-memory service for tests and development.
//!
//! ## Key Features
//!
//! - **One contract, many backends**: upload, download (whole, streamed or
//!   ranged), exists, delete and delete-by-prefix, all keyed by a caller-chosen
//!   [`BlobKey`]
//! - **Signed URLs**: time-limited, disposition-scoped read URLs computed by a
//!   pure, clock-injected [`SignedUrlPolicy`]
//! - **Direct uploads**: signed upload targets a browser or any other client can
//!   POST to without routing bytes through your server (see `dog-direct-upload`)
//! - **Observable**: every operation runs in a `tracing` span and emits a
//!   [`StorageEvent`] to a pluggable [`EventSink`]
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_storage::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let service = MemoryService::new();
//! let key = BlobKey::from("avatars/42.png");
//!
//! service
//!     .upload(&key, BlobPayload::new(&b"\x89PNG"[..]).with_content_type("image/png"))
//!     .await?;
//! assert!(service.exists(&key).await?);
//!
//! let signed = service
//!     .url(&key, UrlOptions::new(Duration::from_secs(300), Disposition::Inline, "42.png", "image/png"))
//!     .await?;
//! assert!(signed.url.contains("/image/download?"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Choosing a backend
//!
//! Backends are selected when configuration is loaded, not per call:
//!
//! ```rust
//! use dog_storage::ServiceRegistry;
//!
//! let registry = ServiceRegistry::from_json(r#"{ "local": { "service": "Memory" } }"#).unwrap();
//! let service = registry.get("local").unwrap();
//! assert_eq!(service.name(), "memory");
//! ```

pub mod cloudinary;
mod clock;
mod config;
mod error;
pub mod events;
pub mod memory;
mod receipt;
mod service;
pub mod signing;
mod types;

// Re-export main types for clean API
pub use clock::{Clock, FixedClock, SystemClock};
pub use cloudinary::{CloudinaryConfig, CloudinaryOptions, CloudinaryService};
pub use config::{ServiceConfig, ServiceRegistry};
pub use error::{BlobError, BlobResult};
pub use events::{EventSink, MemoryEventSink, NoopEventSink, Operation, StorageEvent, TracingEventSink};
pub use memory::{MemoryConfig, MemoryService};
pub use receipt::{DirectUploadDescriptor, SignedUrl, UploadReceipt};
pub use service::StorageService;
pub use signing::{SignatureAlgorithm, SignedUrlParams, SignedUrlPolicy};
pub use types::{
    BlobKey, BlobPayload, ByteRange, ByteStream, DirectUploadRequest, Disposition, UrlOptions,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobError, BlobKey, BlobPayload, BlobResult, ByteStream, DirectUploadDescriptor,
        DirectUploadRequest, Disposition, MemoryService, SignedUrl, StorageService, UrlOptions,
    };
}

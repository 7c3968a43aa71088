//! # dog-direct-upload: send a file straight to a storage backend
//!
//! A server using `dog-storage` hands a client a
//! [`DirectUploadDescriptor`](dog_storage::DirectUploadDescriptor): an upload
//! URL plus signed form fields. This crate is the client half. It POSTs the
//! file as a multipart form made of those fields and a `file` part, then
//! reports the outcome exactly once.
//!
//! ```rust,no_run
//! use dog_direct_upload::{DirectUpload, ReqwestTransport, UploadFile};
//! use dog_storage::DirectUploadDescriptor;
//! use std::sync::Arc;
//!
//! # async fn send(descriptor: DirectUploadDescriptor) {
//! let file = UploadFile::new("cat.png", std::fs::read("cat.png").unwrap())
//!     .with_content_type("image/png");
//! let handle = DirectUpload::new(descriptor, file, Arc::new(ReqwestTransport::new())).create();
//!
//! match handle.outcome().await {
//!     Some(Ok(body)) => println!("stored: {}", body),
//!     Some(Err(e)) => eprintln!("{}", e),
//!     None => eprintln!("aborted"),
//! }
//! # }
//! ```

mod error;
mod transport;
mod upload;

pub use error::{TransferError, TransportError, UploadOutcome};
pub use transport::{ReqwestTransport, TransportResponse, UploadTransport};
pub use upload::{DirectUpload, UploadFile, UploadHandle, UploadState};

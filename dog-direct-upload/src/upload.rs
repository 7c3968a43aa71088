use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use dog_storage::DirectUploadDescriptor;

use crate::{TransferError, UploadOutcome, UploadTransport};

/// The file being sent
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn new<N: Into<String>, B: Into<Bytes>>(name: N, bytes: B) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            content_type: None,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Where a direct upload is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Sending,
    Succeeded,
    Failed { status: u16 },
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// One upload of one file against one descriptor.
///
/// Starting the upload consumes it, so a descriptor is sent at most once.
/// There are no retries: a failed upload needs a fresh descriptor.
pub struct DirectUpload {
    descriptor: DirectUploadDescriptor,
    file: UploadFile,
    transport: Arc<dyn UploadTransport>,
    state: watch::Sender<UploadState>,
}

impl DirectUpload {
    pub fn new(descriptor: DirectUploadDescriptor, file: UploadFile, transport: Arc<dyn UploadTransport>) -> Self {
        let (state, _) = watch::channel(UploadState::Idle);
        Self {
            descriptor,
            file,
            transport,
            state,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    /// Send the file and wait for the outcome
    #[instrument(skip(self), fields(file = %self.file.name, url = %self.descriptor.url))]
    pub async fn run(self) -> UploadOutcome {
        self.state.send_replace(UploadState::Sending);
        debug!(bytes = self.file.len(), "sending direct upload");

        let outcome = match self.transport.send(&self.descriptor, &self.file).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => {
                warn!(status = response.status, "direct upload rejected");
                Err(TransferError::new(&self.file.name, response.status))
            }
            Err(e) => {
                warn!(error = %e, "direct upload failed before a response");
                Err(TransferError::new(&self.file.name, 0))
            }
        };

        let state = match &outcome {
            Ok(_) => UploadState::Succeeded,
            Err(e) => UploadState::Failed { status: e.status },
        };
        self.state.send_replace(state);
        outcome
    }

    /// Start the upload on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(self) -> UploadHandle {
        let state = self.subscribe();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let outcome = self.run().await;
            // The handle may already be gone
            let _ = tx.send(outcome);
        });

        UploadHandle {
            state,
            result: rx,
            task,
        }
    }
}

/// A started upload
pub struct UploadHandle {
    state: watch::Receiver<UploadState>,
    result: oneshot::Receiver<UploadOutcome>,
    task: JoinHandle<()>,
}

impl UploadHandle {
    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.clone()
    }

    /// Cancel the in-flight request.
    ///
    /// Once aborted no outcome is delivered unless one was already produced.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the outcome; `None` if the upload was aborted first
    pub async fn outcome(self) -> Option<UploadOutcome> {
        self.result.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio_test::{assert_err, assert_ok, block_on};

    struct Fixed(u16);

    #[async_trait]
    impl UploadTransport for Fixed {
        async fn send(
            &self,
            _descriptor: &DirectUploadDescriptor,
            _file: &UploadFile,
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse::new(self.0, "body"))
        }
    }

    fn upload(status: u16) -> DirectUpload {
        let descriptor = DirectUploadDescriptor::new("http://upload.test".to_string(), BTreeMap::new(), 0);
        DirectUpload::new(descriptor, UploadFile::new("f.txt", "hi"), Arc::new(Fixed(status)))
    }

    #[test]
    fn run_moves_through_states() {
        let upload = upload(201);
        let states = upload.subscribe();
        assert_eq!(upload.state(), UploadState::Idle);

        let body = assert_ok!(block_on(upload.run()));
        assert_eq!(body, "body");
        assert_eq!(*states.borrow(), UploadState::Succeeded);
    }

    #[test]
    fn non_2xx_is_failure() {
        let upload = upload(302);
        let states = upload.subscribe();

        let err = assert_err!(block_on(upload.run()));
        assert_eq!(err.status, 302);
        assert_eq!(*states.borrow(), UploadState::Failed { status: 302 });
        assert!(states.borrow().is_terminal());
    }
}

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use dog_storage::DirectUploadDescriptor;

use crate::{TransportError, UploadFile};

/// What came back from the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one direct upload request.
///
/// Implementations POST a multipart form to `descriptor.url` whose fields are
/// exactly `descriptor.headers` followed by a `file` part. They report any
/// HTTP status as a response; only failures below HTTP are errors.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        descriptor: &DirectUploadDescriptor,
        file: &UploadFile,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`UploadTransport`] over a `reqwest` client
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn form(descriptor: &DirectUploadDescriptor, file: &UploadFile) -> Result<Form, TransportError> {
        let mut part = Part::stream_with_length(file.bytes.clone(), file.len()).file_name(file.name.clone());
        if let Some(content_type) = file.content_type.as_deref() {
            part = part
                .mime_str(content_type)
                .map_err(|e| TransportError::other(format!("bad content type {}: {}", content_type, e)))?;
        }

        let form = descriptor
            .headers
            .iter()
            .fold(Form::new(), |form, (name, value)| form.text(name.clone(), value.clone()));
        Ok(form.part("file", part))
    }
}

#[async_trait]
impl UploadTransport for ReqwestTransport {
    async fn send(
        &self,
        descriptor: &DirectUploadDescriptor,
        file: &UploadFile,
    ) -> Result<TransportResponse, TransportError> {
        let form = Self::form(descriptor, file)?;
        debug!(url = %descriptor.url, fields = descriptor.headers.len(), "posting direct upload form");

        let response = self.client.post(&descriptor.url).multipart(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use mockito::{Matcher, Server};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dog_direct_upload::{
    DirectUpload, ReqwestTransport, TransferError, TransportError, TransportResponse, UploadFile,
    UploadState, UploadTransport,
};
use dog_storage::{
    BlobKey, DirectUploadDescriptor, DirectUploadRequest, MemoryService, StorageService,
};

/// Answers every request with a fixed status and counts calls
struct StubTransport {
    status: u16,
    body: &'static str,
    calls: AtomicUsize,
}

impl StubTransport {
    fn new(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UploadTransport for StubTransport {
    async fn send(
        &self,
        _descriptor: &DirectUploadDescriptor,
        _file: &UploadFile,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransportResponse::new(self.status, self.body))
    }
}

struct BrokenTransport;

#[async_trait]
impl UploadTransport for BrokenTransport {
    async fn send(
        &self,
        _descriptor: &DirectUploadDescriptor,
        _file: &UploadFile,
    ) -> Result<TransportResponse, TransportError> {
        Err(TransportError::other("connection reset"))
    }
}

/// Never answers
struct HangingTransport;

#[async_trait]
impl UploadTransport for HangingTransport {
    async fn send(
        &self,
        _descriptor: &DirectUploadDescriptor,
        _file: &UploadFile,
    ) -> Result<TransportResponse, TransportError> {
        std::future::pending().await
    }
}

/// Delivers the form straight into a memory service
struct MemoryTransport {
    service: MemoryService,
}

#[async_trait]
impl UploadTransport for MemoryTransport {
    async fn send(
        &self,
        descriptor: &DirectUploadDescriptor,
        file: &UploadFile,
    ) -> Result<TransportResponse, TransportError> {
        match self.service.accept_direct_upload(&descriptor.headers, file.bytes.clone()) {
            Ok(receipt) => Ok(TransportResponse::new(201, receipt.key.to_string())),
            Err(e) => Ok(TransportResponse::new(403, e.to_string())),
        }
    }
}

fn create_test_descriptor(url: &str) -> DirectUploadDescriptor {
    let mut headers = BTreeMap::new();
    headers.insert("api_key".to_string(), "key".to_string());
    headers.insert("public_id".to_string(), "uploads/cat".to_string());
    headers.insert("signature".to_string(), "abc123".to_string());
    headers.insert("timestamp".to_string(), "1700000000".to_string());
    DirectUploadDescriptor::new(url.to_string(), headers, 1_700_003_600)
}

fn create_test_file() -> UploadFile {
    UploadFile::new("cat.png", &b"meow"[..]).with_content_type("image/png")
}

#[tokio::test]
async fn test_success_delivers_body_once() {
    let transport = StubTransport::new(204, "");
    let upload = DirectUpload::new(
        create_test_descriptor("http://upload.test"),
        create_test_file(),
        transport.clone(),
    );
    assert_eq!(upload.state(), UploadState::Idle);

    let handle = upload.create();
    let mut states = handle.subscribe();
    let outcome = handle.outcome().await;

    assert_eq!(outcome, Some(Ok(String::new())));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    states.wait_for(UploadState::is_terminal).await.unwrap();
    assert_eq!(*states.borrow(), UploadState::Succeeded);
}

#[tokio::test]
async fn test_server_error_names_file_and_status() {
    let upload = DirectUpload::new(
        create_test_descriptor("http://upload.test"),
        create_test_file(),
        StubTransport::new(500, "boom"),
    );

    let err = upload.run().await.unwrap_err();
    assert_eq!(err, TransferError::new("cat.png", 500));
    assert_eq!(err.to_string(), "Error storing \"cat.png\". Status: 500");
}

#[tokio::test]
async fn test_transport_failure_reports_status_zero() {
    let upload = DirectUpload::new(
        create_test_descriptor("http://upload.test"),
        create_test_file(),
        Arc::new(BrokenTransport),
    );
    let states = upload.subscribe();

    let err = upload.run().await.unwrap_err();
    assert_eq!(err.status, 0);
    assert!(err.is_network());
    assert_eq!(err.to_string(), "Error storing \"cat.png\". Status: 0");
    assert_eq!(*states.borrow(), UploadState::Failed { status: 0 });
}

#[tokio::test]
async fn test_abort_suppresses_outcome() {
    let upload = DirectUpload::new(
        create_test_descriptor("http://upload.test"),
        create_test_file(),
        Arc::new(HangingTransport),
    );
    let handle = upload.create();
    let mut states = handle.subscribe();
    states.wait_for(|s| *s == UploadState::Sending).await.unwrap();

    handle.abort();
    assert_eq!(handle.outcome().await, None);
}

#[tokio::test]
async fn test_descriptor_from_memory_service_round_trip() {
    let service = MemoryService::new();
    let key = BlobKey::from("uploads/cat");
    let request = DirectUploadRequest::new("cat.png", "image/png", 4, "c2hh");
    let descriptor = service.direct_upload(&key, &request).await.unwrap();

    let transport = Arc::new(MemoryTransport {
        service: service.clone(),
    });
    let body = DirectUpload::new(descriptor.clone(), create_test_file(), transport.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(body, "uploads/cat");
    assert_eq!(service.download(&key).await.unwrap(), Bytes::from_static(b"meow"));

    // Fields tampered in transit are refused by the backend
    let mut forged = descriptor;
    forged.headers.insert("public_id".to_string(), "uploads/dog".to_string());
    let err = DirectUpload::new(forged, create_test_file(), transport)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.status, 403);
    assert!(!service.exists(&BlobKey::from("uploads/dog")).await.unwrap());
}

#[tokio::test]
async fn test_reqwest_transport_posts_fields_and_file() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1_1/demo/auto/upload")
        .match_header("content-type", Matcher::Regex("^multipart/form-data; boundary=".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="api_key"\r\n\r\nkey"#.into()),
            Matcher::Regex(r#"name="public_id"\r\n\r\nuploads/cat"#.into()),
            Matcher::Regex(r#"name="signature"\r\n\r\nabc123"#.into()),
            Matcher::Regex(r#"name="timestamp"\r\n\r\n1700000000"#.into()),
            Matcher::Regex(r#"name="file"; filename="cat.png""#.into()),
            Matcher::Regex("meow".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"public_id":"uploads/cat"}"#)
        .expect(1)
        .create_async()
        .await;

    let url = format!("{}/v1_1/demo/auto/upload", server.url());
    let outcome = DirectUpload::new(
        create_test_descriptor(&url),
        create_test_file(),
        Arc::new(ReqwestTransport::new()),
    )
    .create()
    .outcome()
    .await;

    mock.assert_async().await;
    assert_eq!(outcome, Some(Ok(r#"{"public_id":"uploads/cat"}"#.to_string())));
}

#[tokio::test]
async fn test_reqwest_transport_rejection_and_unreachable_host() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/upload")
        .with_status(401)
        .with_body("Invalid Signature")
        .create_async()
        .await;

    let err = DirectUpload::new(
        create_test_descriptor(&format!("{}/upload", server.url())),
        create_test_file(),
        Arc::new(ReqwestTransport::new()),
    )
    .run()
    .await
    .unwrap_err();
    assert_eq!(err.status, 401);

    // Port 9 (discard) is not listening on the test host
    let err = DirectUpload::new(
        create_test_descriptor("http://127.0.0.1:9/upload"),
        create_test_file(),
        Arc::new(ReqwestTransport::new()),
    )
    .run()
    .await
    .unwrap_err();
    assert_eq!(err.status, 0);
}

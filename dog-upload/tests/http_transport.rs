use mockito::Matcher;
use reqwest::Client;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use dog_upload::{
    FileStatus, FrameTransport, RequestData, RequestTransport, SelectedFile, TransferFailure, Transport, UploadEvent,
    Uploader, UploaderConfig,
};

/// Test factory functions
fn create_uploader(url: String, transport: impl Transport + 'static) -> Uploader {
    let config = UploaderConfig::new()
        .with_url(url)
        .with_data(RequestData::fields([("album", "7")]));
    Uploader::with_transport(config, Arc::new(transport)).unwrap()
}

async fn drive(uploader: &mut Uploader) {
    uploader.start().await;
    tokio::time::timeout(Duration::from_secs(5), uploader.run_until_idle())
        .await
        .expect("Timeout waiting for transfers");
}

fn event_names(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.event_name());
    }
    names
}

/// H1. Streaming Request Uploads A Multipart Body
#[tokio::test]
async fn test_request_transport_uploads_multipart() {
    // Arrange
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/upload")
        .match_header("x-requested-with", "XMLHttpRequest")
        .match_header("x-file-name", "holiday%20photo.txt")
        .match_header("x-file-size", "11")
        .match_header("content-type", Matcher::Regex("^multipart/form-data; boundary=".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="Filedata"; filename="holiday photo.txt""#.to_string()),
            Matcher::Regex(r#"name="album""#.to_string()),
            Matcher::Regex("hello world".to_string()),
        ]))
        .with_status(201)
        .with_body("stored")
        .create_async()
        .await;

    let mut uploader = create_uploader(format!("{}/upload", server.url()), RequestTransport::new(Client::new()));
    let mut events = uploader.event_receiver();
    let id = uploader
        .select(vec![SelectedFile::from_bytes("holiday photo.txt", "hello world")])
        .await
        .unwrap()
        .accepted[0];

    // Act
    drive(&mut uploader).await;

    // Assert
    mock.assert_async().await;
    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Complete);
    assert_eq!(file.response().unwrap().status, Some(201));
    assert_eq!(file.response().unwrap().text, "stored");
    assert_eq!(uploader.stats().bytes_loaded, 11);

    let names = event_names(&mut events);
    assert!(names.contains(&"progress"));
    assert_eq!(names.last(), Some(&"complete"));
}

/// H2. Hand-Built Multipart Encoder Produces The Same Request
#[tokio::test]
async fn test_request_transport_fallback_encoder() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/upload")
        .match_header("cache-control", "no-cache")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="Filedata"; filename="a.txt""#.to_string()),
            Matcher::Regex("(?s)name=\"album\"\r\n\r\n7\r\n".to_string()),
        ]))
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let transport = RequestTransport::new(Client::new()).with_native_multipart(false);
    let mut uploader = create_uploader(format!("{}/upload", server.url()), transport);
    let id = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await
        .unwrap()
        .accepted[0];

    drive(&mut uploader).await;

    mock.assert_async().await;
    assert_eq!(uploader.file(id).unwrap().status(), FileStatus::Complete);
    assert_eq!(uploader.file(id).unwrap().progress().unwrap().bytes_loaded, 3);
}

/// H3. Non-2xx Responses Fail With The Status
#[tokio::test]
async fn test_request_transport_reports_http_errors() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/upload")
        .with_status(500)
        .with_body("disk full")
        .create_async()
        .await;

    let mut uploader = create_uploader(format!("{}/upload", server.url()), RequestTransport::new(Client::new()));
    let id = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await
        .unwrap()
        .accepted[0];

    drive(&mut uploader).await;

    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Error);
    assert_eq!(
        file.failure(),
        Some(&TransferFailure::Status {
            code: 500,
            body: "disk full".to_string()
        })
    );
    assert_eq!(uploader.metrics().files_failed(), 1);
}

/// H4. Files On Disk Are Streamed From Their Path
#[tokio::test]
async fn test_request_transport_streams_from_path() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"contents on disk").unwrap();
    tmp.flush().unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/upload")
        .match_body(Matcher::Regex("contents on disk".to_string()))
        .with_status(200)
        .create_async()
        .await;

    let mut uploader = create_uploader(format!("{}/upload", server.url()), RequestTransport::new(Client::new()));
    let selected = SelectedFile::from_path(tmp.path()).await.unwrap();
    assert_eq!(selected.size, Some(16));
    let id = uploader.select(vec![selected]).await.unwrap().accepted[0];

    drive(&mut uploader).await;

    mock.assert_async().await;
    assert_eq!(uploader.file(id).unwrap().status(), FileStatus::Complete);
}

/// H5. Time Limit Turns A Stalled Server Into A Timeout
#[tokio::test]
async fn test_request_transport_time_limit() {
    // accepts connections at the kernel level but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let transport = RequestTransport::new(Client::new()).with_time_limit(Some(Duration::from_millis(200)));
    let mut uploader = create_uploader(format!("http://{}/upload", addr), transport);
    let id = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await
        .unwrap()
        .accepted[0];

    drive(&mut uploader).await;

    assert_eq!(uploader.file(id).unwrap().failure(), Some(&TransferFailure::Timeout));
    drop(listener);
}

/// H6. Frame Posts Complete Whatever The Status
#[tokio::test]
async fn test_frame_transport_completes_on_any_status() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/upload")
        .match_header("x-requested-with", Matcher::Missing)
        .match_body(Matcher::Regex(r#"name="Filedata"; filename="a.txt""#.to_string()))
        .with_status(500)
        .with_body("<html>oops</html>")
        .create_async()
        .await;

    let mut uploader = create_uploader(format!("{}/upload", server.url()), FrameTransport::new(Client::new()));
    let mut events = uploader.event_receiver();
    let id = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await
        .unwrap()
        .accepted[0];

    drive(&mut uploader).await;

    mock.assert_async().await;
    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Complete);
    assert_eq!(file.response().unwrap().status, None);
    assert_eq!(file.response().unwrap().text, "<html>oops</html>");
    assert!(!event_names(&mut events).contains(&"progress"));
}

/// H7. Unreachable Servers Fail The File
#[tokio::test]
async fn test_unreachable_server_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut uploader = create_uploader(format!("http://{}/upload", addr), RequestTransport::new(Client::new()));
    let id = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await
        .unwrap()
        .accepted[0];

    drive(&mut uploader).await;

    assert!(matches!(
        uploader.file(id).unwrap().failure(),
        Some(TransferFailure::Network(_))
    ));
}

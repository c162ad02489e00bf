use std::sync::Arc;
use std::time::Duration;

use dog_upload::{
    ChannelPluginHost, FileStatus, HostProbe, PluginEndpoint, RemoteCall, SelectedFile, TransferFailure,
    TransportKind, UploadError, Uploader, UploaderConfig,
};

/// Test factory functions
fn create_plugin_uploader(config: UploaderConfig) -> (Uploader, PluginEndpoint) {
    let (host, endpoint) = ChannelPluginHost::new(10);
    let uploader = Uploader::builder(config.with_transport(TransportKind::Plugin))
        .with_host_probe(HostProbe::none())
        .with_plugin_host(Arc::new(host))
        .build()
        .unwrap();
    (uploader, endpoint)
}

fn create_test_config() -> UploaderConfig {
    UploaderConfig::new()
        .with_url("https://uploads.test/upload")
        .with_data("album=7")
        .with_header("Authorization", "Bearer token")
}

async fn receive_next_call(endpoint: &mut PluginEndpoint) -> RemoteCall {
    tokio::time::timeout(Duration::from_secs(1), endpoint.next_call())
        .await
        .expect("Timeout waiting for plugin call")
        .expect("Plugin host dropped")
}

async fn settle(uploader: &mut Uploader) {
    tokio::time::timeout(Duration::from_secs(1), uploader.run_until_idle())
        .await
        .expect("Timeout waiting for plugin events");
}

/// R1. Starting A File Hands Its Options To The Plugin
#[tokio::test]
async fn test_file_start_carries_merged_options() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap();

    // Act
    uploader.start().await;

    // Assert
    match receive_next_call(&mut endpoint).await {
        RemoteCall::FileStart { id, attempt, options } => {
            assert_eq!(id, "p-1");
            assert_eq!(attempt, 1);
            assert_eq!(options.url, "https://uploads.test/upload");
            assert_eq!(options.field_name, "Filedata");
            assert_eq!(options.fields, vec![("album".to_string(), "7".to_string())]);
            assert_eq!(options.headers["Authorization"], "Bearer token");
        }
        other => panic!("Expected FileStart, got {:?}", other),
    }
}

/// R2. Plugin Events Drive The File To Completion
#[tokio::test]
async fn test_plugin_events_are_routed() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    let id = uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap()
        .accepted[0];
    uploader.start().await;
    receive_next_call(&mut endpoint).await;

    // Act
    endpoint.progress("p-1", 1, 4, Some(10));
    endpoint.complete("p-1", 1, Some(200), "saved");
    settle(&mut uploader).await;

    // Assert
    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Complete);
    assert_eq!(file.response().unwrap().text, "saved");
    assert_eq!(uploader.metrics().files_completed(), 1);
}

/// R3. Events For Unknown Plugin Files Are Ignored
#[tokio::test]
async fn test_unknown_plugin_ids_are_ignored() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    let id = uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap()
        .accepted[0];
    uploader.start().await;
    receive_next_call(&mut endpoint).await;

    endpoint.complete("ghost", 1, Some(200), "nobody");
    endpoint.error("p-1", 1, "disk quota exceeded");
    settle(&mut uploader).await;

    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Error);
    assert_eq!(
        file.failure(),
        Some(&TransferFailure::plugin("disk quota exceeded"))
    );
}

/// R4. Stop Reaches The Plugin And Late Completions Are Dropped
#[tokio::test]
async fn test_stop_sends_file_stop() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    let id = uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap()
        .accepted[0];
    uploader.start().await;
    receive_next_call(&mut endpoint).await;

    // Act
    assert!(uploader.stop_file(id).await.unwrap());

    // Assert
    assert_eq!(
        receive_next_call(&mut endpoint).await,
        RemoteCall::FileStop { id: "p-1".to_string() }
    );

    endpoint.complete("p-1", 1, Some(200), "too late");
    tokio::time::sleep(Duration::from_millis(50)).await;
    uploader.pump().await;
    assert_eq!(uploader.file(id).unwrap().status(), FileStatus::Stopped);
}

/// R5. Remove Stops Then Releases The Plugin File
#[tokio::test]
async fn test_remove_sends_file_remove() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    let id = uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap()
        .accepted[0];
    uploader.start().await;
    receive_next_call(&mut endpoint).await;

    assert!(uploader.remove_file(id).await);

    assert_eq!(
        receive_next_call(&mut endpoint).await,
        RemoteCall::FileStop { id: "p-1".to_string() }
    );
    assert_eq!(
        receive_next_call(&mut endpoint).await,
        RemoteCall::FileRemove { id: "p-1".to_string() }
    );
    assert!(endpoint.try_next_call().is_none());
}

/// R6. Enable Toggles Are Forwarded
#[tokio::test]
async fn test_set_enabled_is_forwarded() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());

    uploader.set_enabled(false).await.unwrap();

    assert_eq!(
        receive_next_call(&mut endpoint).await,
        RemoteCall::SetEnabled { enabled: false }
    );
    assert!(!uploader.is_enabled());
}

/// R7. Locally Selected Files Cannot Go Through The Plugin
#[tokio::test]
async fn test_local_files_are_rejected_by_the_plugin() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());

    let result = uploader
        .select(vec![SelectedFile::from_bytes("a.txt", "abc")])
        .await;

    assert!(matches!(
        result,
        Err(UploadError::UnsupportedSource {
            transport: TransportKind::Plugin,
            ..
        })
    ));
    assert!(uploader.files().is_empty());
    assert!(endpoint.try_next_call().is_none());
}

/// R9. A Restarted File Ignores The Previous Attempt's Late Answer
#[tokio::test]
async fn test_restart_ignores_previous_attempt() {
    let (mut uploader, mut endpoint) = create_plugin_uploader(create_test_config());
    let id = uploader
        .select(vec![SelectedFile::remote("p-1", "a.jpg", Some(10))])
        .await
        .unwrap()
        .accepted[0];

    // Arrange: stop, requeue and restart while the plugin still owes attempt 1
    uploader.start().await;
    receive_next_call(&mut endpoint).await;
    uploader.stop_file(id).await.unwrap();
    uploader.requeue_file(id).await.unwrap();
    uploader.start().await;
    assert_eq!(
        receive_next_call(&mut endpoint).await,
        RemoteCall::FileStop { id: "p-1".to_string() }
    );
    match receive_next_call(&mut endpoint).await {
        RemoteCall::FileStart { attempt, .. } => assert_eq!(attempt, 2),
        other => panic!("Expected FileStart, got {:?}", other),
    }

    // Act: the first attempt answers late
    endpoint.complete("p-1", 1, Some(200), "first-attempt");
    tokio::time::sleep(Duration::from_millis(50)).await;
    uploader.pump().await;

    // Assert: still running attempt 2, which then completes normally
    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Running);
    assert_eq!(file.attempt(), 2);
    assert!(file.response().is_none());
    assert_eq!(uploader.metrics().stale_callbacks(), 1);

    endpoint.complete("p-1", 2, Some(201), "second-attempt");
    settle(&mut uploader).await;
    let file = uploader.file(id).unwrap();
    assert_eq!(file.status(), FileStatus::Complete);
    assert_eq!(file.response().unwrap().text, "second-attempt");
}

/// R8. Calls Serialize With A Call Tag
#[test]
fn test_remote_call_wire_format() {
    let call = RemoteCall::FileStop { id: "p-1".to_string() };
    let json = serde_json::to_value(&call).unwrap();
    assert_eq!(json, serde_json::json!({"call": "fileStop", "id": "p-1"}));
}

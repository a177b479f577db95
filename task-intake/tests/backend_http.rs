use std::time::Duration;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use task_intake::backend::BackendClient;
use task_intake::create::HttpTaskCreator;
use task_intake_core::config::IntakeSettings;
use task_intake_core::contract::{
    BucketLister, CreationStatus, ShareBrowser, TaskCreator, TaskFiles, TaskPayload, UrlSigner,
};
use task_intake_core::forms::{AdvancedConfiguration, BasicConfiguration, Label};

fn client(server: &MockServer) -> BackendClient {
    BackendClient::new(
        Url::parse(&format!("{}/api", server.uri())).unwrap(),
        Some("t0k".into()),
        &IntakeSettings::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn share_listing_builds_child_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/server/share"))
        .and(query_param("directory", "/images"))
        .and(header("authorization", "Bearer t0k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "2024", "type": "DIR"},
            {"name": "cat.jpg", "type": "REG"}
        ])))
        .mount(&server)
        .await;

    let entries = client(&server).load_node("/images").await.expect("listing ok");
    let flat: Vec<(&str, bool)> = entries.iter().map(|e| (e.key.as_str(), e.is_leaf)).collect();
    assert_eq!(flat, vec![("/images/2024", false), ("/images/cat.jpg", true)]);
}

#[tokio::test]
async fn share_listing_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/server/share"))
        .respond_with(ResponseTemplate::new(500).set_body_string("share offline"))
        .mount(&server)
        .await;

    let err = client(&server).load_node("/").await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("500") && msg.contains("share offline"), "{msg}");
}

#[tokio::test]
async fn bucket_listing_flattens_tree() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/get_s3_data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"key": "dir", "title": "dir", "children": [
                {"key": "dir/a.png", "title": "a.png", "isLeaf": true}
            ]}
        ])))
        .mount(&server)
        .await;

    let objects = client(&server).list_bucket().await.unwrap();
    assert_eq!(objects.len(), 2);
    assert!(objects[0].is_directory);
    assert_eq!(objects[1].key, "dir/a.png");
    assert!(!objects[1].is_directory);
}

#[tokio::test]
async fn signing_posts_keys_and_decodes_urls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/get_s3_signed_data/"))
        .and(body_json(serde_json::json!({"keys": ["dir/a.png"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "key": "dir/a.png",
                "url": "https://bucket.example/dir/a.png?sig=1",
                "expires_at": "2030-01-01T00:00:00Z"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let signed = client(&server)
        .sign_keys(&["dir/a.png".to_string()])
        .await
        .unwrap();
    assert_eq!(signed.len(), 1);
    assert_eq!(signed[0].url.as_str(), "https://bucket.example/dir/a.png?sig=1");
    assert!(signed[0].expires_at.is_some());
}

fn payload(files: TaskFiles) -> TaskPayload {
    TaskPayload {
        basic: BasicConfiguration {
            name: "street scenes".into(),
        },
        advanced: AdvancedConfiguration::default(),
        labels: vec![Label::named("car")],
        files,
    }
}

async fn wait_terminal(
    rx: &mut tokio::sync::watch::Receiver<CreationStatus>,
) -> CreationStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            rx.changed().await.expect("sender alive");
        }
    })
    .await
    .expect("creation should finish")
}

#[tokio::test]
async fn creator_creates_uploads_and_polls_until_finished() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 5})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/5/data"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/5/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "Finished"})),
        )
        .mount(&server)
        .await;

    let (creator, mut rx) = HttpTaskCreator::new(client(&server));
    let creator = creator.with_poll_interval(Duration::from_millis(10));
    let attempt_id = Uuid::new_v4();
    creator
        .create(attempt_id, payload(TaskFiles {
            share: vec!["/images/cat.jpg".into()],
            ..TaskFiles::default()
        }))
        .await
        .expect("dispatch ok");

    assert_eq!(
        wait_terminal(&mut rx).await,
        CreationStatus::Created {
            attempt_id,
            task_id: Some(5)
        }
    );
}

#[tokio::test]
async fn creator_reports_server_side_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 6})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/6/data"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/6/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "Failed",
            "message": "unsupported video codec"
        })))
        .mount(&server)
        .await;

    let (creator, mut rx) = HttpTaskCreator::new(client(&server));
    let attempt_id = Uuid::new_v4();
    creator
        .create(attempt_id, payload(TaskFiles {
            remote: vec![Url::parse("https://example.com/v.mp4").unwrap()],
            ..TaskFiles::default()
        }))
        .await
        .unwrap();

    assert_eq!(
        wait_terminal(&mut rx).await,
        CreationStatus::Failed {
            attempt_id,
            message: "unsupported video codec".into()
        }
    );
}

async fn mount_never_finishing(server: &MockServer, id: i64) {
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": id})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/tasks/{id}/data")))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/tasks/{id}/status")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "Started"})),
        )
        .mount(server)
        .await;
}

fn share_payload() -> TaskPayload {
    payload(TaskFiles {
        share: vec!["/images/cat.jpg".into()],
        ..TaskFiles::default()
    })
}

#[tokio::test]
async fn creator_gives_up_after_deadline() {
    let server = MockServer::start().await;
    mount_never_finishing(&server, 7).await;

    let (creator, mut rx) = HttpTaskCreator::new(client(&server));
    let creator = creator
        .with_poll_interval(Duration::from_millis(10))
        .with_deadline(Duration::from_millis(150));
    let attempt_id = Uuid::new_v4();
    creator.create(attempt_id, share_payload()).await.unwrap();

    match wait_terminal(&mut rx).await {
        CreationStatus::Failed {
            attempt_id: failed_id,
            message,
        } => {
            assert_eq!(failed_id, attempt_id);
            assert!(message.contains("did not finish within"), "{message}");
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn newer_attempt_takes_over_status_channel() {
    let server = MockServer::start().await;
    mount_never_finishing(&server, 8).await;

    let (creator, mut rx) = HttpTaskCreator::new(client(&server));
    let creator = creator
        .with_poll_interval(Duration::from_millis(10))
        .with_deadline(Duration::from_millis(300));
    let first = Uuid::new_v4();
    creator.create(first, share_payload()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = Uuid::new_v4();
    creator.create(second, share_payload()).await.unwrap();

    let terminal = wait_terminal(&mut rx).await;
    assert_eq!(terminal.attempt_id(), Some(second), "{terminal:?}");
}

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use task_intake_core::config::IntakeSettings;
use task_intake_core::contract::{
    FetchedObject, MockObjectFetcher, ObjectFetcher, ServiceError, SignedDownload,
};
use task_intake_core::materialize::{MaterializationPipeline, OCTET_STREAM};

fn signed(key: &str) -> SignedDownload {
    SignedDownload {
        key: key.to_string(),
        url: Url::parse(&format!("https://bucket.example/{key}?sig=abc")).unwrap(),
        expires_at: None,
    }
}

#[tokio::test]
async fn empty_batch_issues_no_fetches() {
    let mut fetcher = MockObjectFetcher::new();
    fetcher.expect_fetch().never();
    let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &IntakeSettings::default());

    let outcome = pipeline.materialize(Vec::new()).await;
    assert!(outcome.succeeded.is_empty());
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let mut fetcher = MockObjectFetcher::new();
    fetcher.expect_fetch().times(3).returning(|url: &Url| {
        if url.path().ends_with("broken.png") {
            Err("404 Not Found".into())
        } else {
            Ok(FetchedObject {
                bytes: b"pixels".to_vec(),
                content_type: Some("image/png".to_string()),
            })
        }
    });
    let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &IntakeSettings::default());

    let outcome = pipeline
        .materialize(vec![
            signed("dir/img1.png"),
            signed("dir/broken.png"),
            signed("dir/img2.png"),
        ])
        .await;

    assert_eq!(outcome.succeeded.len(), 2);
    assert_eq!(outcome.failed.len(), 1);
    assert!(outcome.is_partial());
    assert_eq!(outcome.failed[0].key, "dir/broken.png");
    assert!(outcome.failed[0].error.contains("404"));

    let first = &outcome.succeeded[0];
    assert_eq!(first.name, "img1.png");
    assert_eq!(first.key, "dir/img1.png");
    assert_eq!(first.mime_type, "image/png");
    assert_eq!(first.content, b"pixels");
}

#[tokio::test]
async fn unknown_content_defaults_to_octet_stream() {
    let mut fetcher = MockObjectFetcher::new();
    fetcher.expect_fetch().returning(|_| {
        Ok(FetchedObject {
            bytes: vec![0x00, 0x01, 0x02],
            content_type: None,
        })
    });
    let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &IntakeSettings::default());

    let outcome = pipeline.materialize(vec![signed("blob.bin")]).await;
    assert_eq!(outcome.succeeded[0].mime_type, OCTET_STREAM);
}

#[tokio::test]
async fn expired_url_fails_without_fetch() {
    let mut fetcher = MockObjectFetcher::new();
    fetcher.expect_fetch().never();
    let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &IntakeSettings::default());

    let mut download = signed("old.png");
    download.expires_at = Some(Utc::now() - ChronoDuration::minutes(5));
    let outcome = pipeline.materialize(vec![download]).await;
    assert!(outcome.succeeded.is_empty());
    assert!(outcome.failed[0].error.contains("expired"));
}

#[tokio::test]
async fn oversize_object_fails_that_item_only() {
    let mut fetcher = MockObjectFetcher::new();
    fetcher.expect_fetch().returning(|url: &Url| {
        let size = if url.path().ends_with("big.png") { 64 } else { 8 };
        Ok(FetchedObject {
            bytes: vec![7; size],
            content_type: Some("image/png".into()),
        })
    });
    let settings = IntakeSettings {
        max_object_bytes: 16,
        ..IntakeSettings::default()
    };
    let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &settings);

    let outcome = pipeline
        .materialize(vec![signed("big.png"), signed("small.png")])
        .await;
    assert_eq!(outcome.succeeded.len(), 1);
    assert_eq!(outcome.failed[0].key, "big.png");
}

/// Answers later for earlier keys and records peak parallelism.
struct StaggeredFetcher {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ObjectFetcher for StaggeredFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedObject, ServiceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let index: u64 = url
            .path()
            .trim_start_matches("/f")
            .trim_end_matches(".bin")
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100 - index * 10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchedObject {
            bytes: index.to_le_bytes().to_vec(),
            content_type: None,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_under_bounded_parallelism() {
    let fetcher = Arc::new(StaggeredFetcher {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let settings = IntakeSettings {
        materialize_concurrency: 2,
        ..IntakeSettings::default()
    };
    let pipeline = MaterializationPipeline::new(fetcher.clone(), &settings);

    let downloads: Vec<SignedDownload> = (0..6).map(|i| signed(&format!("f{i}.bin"))).collect();
    let outcome = pipeline.materialize(downloads).await;

    let names: Vec<&str> = outcome.succeeded.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["f0.bin", "f1.bin", "f2.bin", "f3.bin", "f4.bin", "f5.bin"]);
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
}

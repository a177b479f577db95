//! Turns signed downloads into in-memory files.
//!
//! Raw bytes are the unit of transfer: each object is fetched, named after the
//! last segment of its key, and tagged with a MIME type. Fetches run with a
//! fixed concurrency limit; results come back in input order regardless of
//! completion order, and one failed object never aborts the batch.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IntakeSettings;
use crate::contract::{ObjectFetcher, SignedDownload};

pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    pub key: String,
    pub name: String,
    pub content: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializationOutcome {
    pub succeeded: Vec<MaterializedFile>,
    pub failed: Vec<MaterializationFailure>,
}

impl MaterializationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

pub struct MaterializationPipeline {
    fetcher: Arc<dyn ObjectFetcher>,
    concurrency: usize,
    fetch_timeout: Duration,
    max_bytes: u64,
}

impl MaterializationPipeline {
    pub fn new(fetcher: Arc<dyn ObjectFetcher>, settings: &IntakeSettings) -> Self {
        Self {
            fetcher,
            concurrency: settings.concurrency(),
            fetch_timeout: settings.request_timeout(),
            max_bytes: settings.max_object_bytes,
        }
    }

    pub async fn materialize(&self, downloads: Vec<SignedDownload>) -> MaterializationOutcome {
        if downloads.is_empty() {
            return MaterializationOutcome::default();
        }
        info!(
            count = downloads.len(),
            concurrency = self.concurrency,
            "[MATERIALIZE] Fetching signed downloads"
        );

        // `buffered` keeps input order while running up to `concurrency` fetches.
        let results: Vec<Result<MaterializedFile, MaterializationFailure>> = stream::iter(downloads)
            .map(|download| self.materialize_one(download))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut outcome = MaterializationOutcome::default();
        for result in results {
            match result {
                Ok(file) => outcome.succeeded.push(file),
                Err(failure) => outcome.failed.push(failure),
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "[MATERIALIZE] Batch complete"
        );
        outcome
    }

    async fn materialize_one(
        &self,
        download: SignedDownload,
    ) -> Result<MaterializedFile, MaterializationFailure> {
        let fail = |error: String| {
            warn!(key = %download.key, error = %error, "[MATERIALIZE] Object failed");
            MaterializationFailure {
                key: download.key.clone(),
                error,
            }
        };

        if download.is_expired_at(Utc::now()) {
            return Err(fail("signed URL expired before fetch".to_string()));
        }

        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&download.url)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => return Err(fail(e.to_string())),
            Err(_) => {
                return Err(fail(format!(
                    "timed out after {}s",
                    self.fetch_timeout.as_secs()
                )))
            }
        };

        if fetched.bytes.len() as u64 > self.max_bytes {
            return Err(fail(format!(
                "object is {} bytes, limit is {}",
                fetched.bytes.len(),
                self.max_bytes
            )));
        }

        let mime_type = infer_mime(fetched.content_type.as_deref(), &fetched.bytes);
        let name = base_name(&download.key);
        debug!(key = %download.key, name = %name, mime = %mime_type, size = fetched.bytes.len(), "[MATERIALIZE] Object fetched");
        Ok(MaterializedFile {
            key: download.key,
            name,
            content: fetched.bytes,
            mime_type,
        })
    }
}

/// Last `/`-separated segment of a bucket key.
pub fn base_name(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

/// Declared content type first (parameters stripped, octet-stream ignored),
/// then magic-number sniffing, then octet-stream.
pub fn infer_mime(declared: Option<&str>, bytes: &[u8]) -> String {
    let declared = declared
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != OCTET_STREAM);
    if let Some(ct) = declared {
        return ct;
    }
    infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

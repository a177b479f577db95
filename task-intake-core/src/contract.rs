#![allow(unused)]

//! # contract: collaborator interfaces consumed by the intake pipeline
//!
//! Every external capability (share browsing, bucket listing, URL signing,
//! object fetching, configuration forms, task creation) is a trait here.
//! Components receive these as `Arc<dyn Trait>` handles at construction, so
//! the CLI injects HTTP clients and tests inject mocks or fakes.
//!
//! ## Mocking & Testing
//! - Each trait is annotated for `mockall`; the `test-export-mocks` feature
//!   (on by default) exports the generated `Mock*` types to integration tests.
//!
//! ## Errors
//! - Transport-level collaborators return [`ServiceError`], a boxed error the
//!   pipeline turns into [`crate::IntakeError::RemoteService`].
//! - Forms return [`FormError`], surfaced as
//!   [`crate::IntakeError::FormValidation`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use mockall::{automock, predicate::*};

use crate::error::FormError;
use crate::forms::{AdvancedConfiguration, BasicConfiguration, Label};
use crate::materialize::MaterializedFile;
use crate::sources::LocalFile;

/// Boxed error returned by every network-bound collaborator.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// One child returned when a share directory is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    /// Absolute share path, e.g. `/images/cat.jpg`.
    pub key: String,
    pub is_leaf: bool,
}

/// One object (or directory placeholder) in the cloud bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudObjectRef {
    pub key: String,
    #[serde(default)]
    pub is_directory: bool,
}

/// A time-limited URL granting read access to one bucket object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDownload {
    pub key: String,
    pub url: Url,
    /// Absent when the signing service does not report it; treated as
    /// short-lived and consumed immediately.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SignedDownload {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Raw body of a fetched object plus the server-declared content type.
#[derive(Debug, Clone, Default)]
pub struct FetchedObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Externally owned status of the task-creation request. Every non-idle
/// value names the submission attempt it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CreationStatus {
    #[default]
    Idle,
    InProgress { attempt_id: Uuid, message: String },
    Created { attempt_id: Uuid, task_id: Option<i64> },
    Failed { attempt_id: Uuid, message: String },
}

impl CreationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreationStatus::Created { .. } | CreationStatus::Failed { .. })
    }

    pub fn attempt_id(&self) -> Option<Uuid> {
        match self {
            CreationStatus::Idle => None,
            CreationStatus::InProgress { attempt_id, .. }
            | CreationStatus::Created { attempt_id, .. }
            | CreationStatus::Failed { attempt_id, .. } => Some(*attempt_id),
        }
    }
}

/// Files handed to the task-creation callback. Only the field of the
/// active source is populated; cloud objects arrive already materialized.
#[derive(Debug, Clone, Default)]
pub struct TaskFiles {
    pub local: Vec<LocalFile>,
    pub share: Vec<String>,
    pub remote: Vec<Url>,
    pub cloud: Vec<MaterializedFile>,
}

impl TaskFiles {
    pub fn len(&self) -> usize {
        self.local.len() + self.share.len() + self.remote.len() + self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The assembled creation request.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub basic: BasicConfiguration,
    pub advanced: AdvancedConfiguration,
    pub labels: Vec<Label>,
    pub files: TaskFiles,
}

/// Lazily lists the children of one directory on the mounted share.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ShareBrowser: Send + Sync {
    async fn load_node(&self, path: &str) -> Result<Vec<ShareEntry>, ServiceError>;
}

/// Lists the full contents of the configured cloud bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BucketLister: Send + Sync {
    async fn list_bucket(&self) -> Result<Vec<CloudObjectRef>, ServiceError>;
}

/// Exchanges bucket keys for signed download URLs in one batched call.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_keys(&self, keys: &[String]) -> Result<Vec<SignedDownload>, ServiceError>;
}

/// Fetches the raw bytes behind a (signed) URL.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedObject, ServiceError>;
}

/// The basic configuration sub-form.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BasicConfigForm: Send + Sync {
    /// Validate and return the current values.
    async fn submit(&self) -> Result<BasicConfiguration, FormError>;

    /// Restore the form to its initial values.
    fn reset(&self);
}

/// The optional advanced configuration sub-form.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AdvancedConfigForm: Send + Sync {
    async fn submit(&self) -> Result<AdvancedConfiguration, FormError>;

    fn reset(&self);
}

/// Hands the assembled payload to the backend.
///
/// Returning `Ok` only means the request was dispatched. Completion is
/// reported through the `CreationStatus` watch channel owned by the
/// implementor, tagged with the `attempt_id` passed here.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TaskCreator: Send + Sync {
    async fn create(&self, attempt_id: Uuid, payload: TaskPayload) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signed(expires_at: Option<DateTime<Utc>>) -> SignedDownload {
        SignedDownload {
            key: "dir/a.png".into(),
            url: Url::parse("https://bucket.example/dir/a.png?sig=1").unwrap(),
            expires_at,
        }
    }

    #[test]
    fn unknown_expiry_is_never_expired() {
        assert!(!signed(None).is_expired_at(Utc::now()));
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = Utc::now();
        assert!(signed(Some(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!signed(Some(now + Duration::seconds(60))).is_expired_at(now));
    }

    #[test]
    fn only_created_and_failed_are_terminal() {
        let attempt_id = Uuid::new_v4();
        assert!(!CreationStatus::Idle.is_terminal());
        assert!(!CreationStatus::InProgress {
            attempt_id,
            message: "uploading".into()
        }
        .is_terminal());
        assert!(CreationStatus::Created {
            attempt_id,
            task_id: Some(3)
        }
        .is_terminal());
        assert!(CreationStatus::Failed {
            attempt_id,
            message: "boom".into()
        }
        .is_terminal());
    }

    #[test]
    fn status_reports_its_attempt() {
        let attempt_id = Uuid::new_v4();
        assert_eq!(CreationStatus::Idle.attempt_id(), None);
        assert_eq!(
            CreationStatus::Created {
                attempt_id,
                task_id: None
            }
            .attempt_id(),
            Some(attempt_id)
        );
    }
}

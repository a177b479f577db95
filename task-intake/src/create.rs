//! Task creation against the backend, with status reported on a watch channel.
//!
//! [`HttpTaskCreator::create`] returns as soon as the request is dispatched.
//! The work then runs on a spawned task:
//!
//! 1. `POST tasks` with the name, labels and segment options, returning `{id}`
//! 2. `POST tasks/{id}/data` as multipart: `client_files[i]` (local files and
//!    materialized cloud objects), `server_files[i]`, `remote_files[i]`
//! 3. `GET tasks/{id}/status` until the state is `Finished` or `Failed`
//!
//! Every step is published as [`CreationStatus::InProgress`]; the outcome is
//! published as `Created` or `Failed`. All statuses carry the attempt id they
//! belong to. A dispatch takes over the channel: an older attempt still
//! running stops polling and never overwrites the newer attempt's status.
//! Each attempt gives up after its deadline.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use task_intake_core::contract::{CreationStatus, ServiceError, TaskCreator, TaskPayload};
use task_intake_core::forms::Label;

use crate::backend::BackendClient;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);
const DEFAULT_IMAGE_QUALITY: u8 = 70;

pub struct HttpTaskCreator {
    backend: BackendClient,
    status: Arc<watch::Sender<CreationStatus>>,
    poll_interval: Duration,
    deadline: Duration,
}

#[derive(Debug, Serialize)]
struct TaskSpec<'a> {
    name: &'a str,
    labels: &'a [Label],
    #[serde(skip_serializing_if = "Option::is_none")]
    segment_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bug_tracker: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TaskStatusWire {
    state: String,
    #[serde(default)]
    message: String,
}

impl HttpTaskCreator {
    /// Returns the creator and the receiving end of its status channel.
    pub fn new(backend: BackendClient) -> (Self, watch::Receiver<CreationStatus>) {
        let (tx, rx) = watch::channel(CreationStatus::Idle);
        let creator = Self {
            backend,
            status: Arc::new(tx),
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        };
        (creator, rx)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on one attempt, from dispatch until the server reports a final state.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Publishes `next` only while the channel still belongs to `attempt_id`.
fn publish(status: &watch::Sender<CreationStatus>, attempt_id: Uuid, next: CreationStatus) -> bool {
    status.send_if_modified(|current| {
        if current.attempt_id() != Some(attempt_id) {
            return false;
        }
        *current = next;
        true
    })
}

#[async_trait]
impl TaskCreator for HttpTaskCreator {
    async fn create(&self, attempt_id: Uuid, payload: TaskPayload) -> Result<(), ServiceError> {
        self.status.send_replace(CreationStatus::InProgress {
            attempt_id,
            message: "The task is being created on the server".into(),
        });

        let backend = self.backend.clone();
        let status = self.status.clone();
        let poll_interval = self.poll_interval;
        let deadline = self.deadline;
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                deadline,
                create_task(&backend, attempt_id, payload, &status, poll_interval),
            )
            .await
            .unwrap_or_else(|_| Err(format!("task did not finish within {deadline:?}").into()));
            let next = match outcome {
                Ok(task_id) => {
                    tracing::info!(%attempt_id, task_id, "Task created on backend");
                    CreationStatus::Created {
                        attempt_id,
                        task_id: Some(task_id),
                    }
                }
                Err(e) => {
                    tracing::error!(%attempt_id, error = %e, "Task creation failed");
                    CreationStatus::Failed {
                        attempt_id,
                        message: e.to_string(),
                    }
                }
            };
            if !publish(&status, attempt_id, next) {
                tracing::warn!(%attempt_id, "Creation outcome dropped, a newer attempt owns the status");
            }
        });
        Ok(())
    }
}

async fn create_task(
    backend: &BackendClient,
    attempt_id: Uuid,
    payload: TaskPayload,
    status: &watch::Sender<CreationStatus>,
    poll_interval: Duration,
) -> Result<i64, ServiceError> {
    let advanced = &payload.advanced;
    let spec = TaskSpec {
        name: &payload.basic.name,
        labels: &payload.labels,
        segment_size: advanced.segment_size,
        overlap: advanced.overlap,
        bug_tracker: advanced.bug_tracker.as_deref(),
    };
    let created: CreatedTask = backend
        .send_json("create task", backend.post(backend.endpoint("tasks")?).json(&spec))
        .await?;
    tracing::info!(task_id = created.id, "Task record created, uploading data");

    publish(
        status,
        attempt_id,
        CreationStatus::InProgress {
            attempt_id,
            message: "Uploading data to the server".into(),
        },
    );
    let form = data_form(&payload).await?;
    let upload = backend
        .post(backend.endpoint(&format!("tasks/{}/data", created.id))?)
        .multipart(form)
        .send()
        .await?;
    if !upload.status().is_success() {
        let code = upload.status();
        let body = upload.text().await.unwrap_or_default();
        return Err(format!("upload task data returned {code}: {body}").into());
    }

    let status_url = backend.endpoint(&format!("tasks/{}/status", created.id))?;
    loop {
        let current: TaskStatusWire = backend
            .send_json("task status", backend.get(status_url.clone()))
            .await?;
        match current.state.as_str() {
            "Finished" => return Ok(created.id),
            "Failed" => {
                let message = if current.message.is_empty() {
                    "the server could not process the task data".to_string()
                } else {
                    current.message
                };
                return Err(message.into());
            }
            state => {
                let message = if current.message.is_empty() {
                    state.to_string()
                } else {
                    current.message
                };
                tracing::debug!(state, "Task data still processing");
                let owned = publish(
                    status,
                    attempt_id,
                    CreationStatus::InProgress {
                        attempt_id,
                        message,
                    },
                );
                if !owned {
                    return Err("superseded by a newer attempt".into());
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn data_form(payload: &TaskPayload) -> Result<Form, ServiceError> {
    let advanced = &payload.advanced;
    let mut form = Form::new()
        .text(
            "image_quality",
            advanced.image_quality.unwrap_or(DEFAULT_IMAGE_QUALITY).to_string(),
        )
        .text("use_zip_chunks", advanced.use_zip_chunks.to_string())
        .text("use_cache", advanced.use_cache.to_string());
    if let Some(filter) = &advanced.frame_filter {
        form = form.text("frame_filter", filter.clone());
    }

    let mut client_index = 0;
    for file in &payload.files.local {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| format!("could not read {}: {e}", file.path.display()))?;
        form = form.part(
            format!("client_files[{client_index}]"),
            Part::bytes(bytes).file_name(file.file_name()),
        );
        client_index += 1;
    }
    for file in &payload.files.cloud {
        let part = Part::bytes(file.content.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        form = form.part(format!("client_files[{client_index}]"), part);
        client_index += 1;
    }
    for (i, path) in payload.files.share.iter().enumerate() {
        form = form.text(format!("server_files[{i}]"), path.clone());
    }
    for (i, url) in payload.files.remote.iter().enumerate() {
        form = form.text(format!("remote_files[{i}]"), url.to_string());
    }
    Ok(form)
}

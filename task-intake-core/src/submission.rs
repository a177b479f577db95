//! Top-level submission pipeline: validate -> (materialize) -> forms -> create.
//!
//! [`SubmissionOrchestrator`] owns the file sources and label set and drives
//! one attempt at a time through the [`Phase`] machine:
//!
//! ```text
//! Idle -> Validating -> [Materializing] -> SubmittingBasic -> SubmittingAdvanced
//!      -> Creating -> Succeeded -> Idle
//! any in-progress phase -> Failed -> Idle
//! ```
//!
//! # Responsibilities
//! - Local checks (labels, files) run before any collaborator is contacted
//! - Cloud selections are signed and materialized before the forms are submitted
//! - Completion of task creation is observed on the externally owned
//!   [`CreationStatus`] channel, not on the return of the create call; only
//!   statuses tagged with the current attempt id are accepted
//! - Only a fully successful attempt clears user input; failures keep it so
//!   the user can correct and resubmit
//!
//! # Error Handling
//! Every failure is returned as an [`IntakeError`] whose `Display` is the
//! user-facing description; the same text is kept in [`SubmissionOrchestrator::last_error`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bucket::CloudBucketBrowser;
use crate::contract::{
    AdvancedConfigForm, BasicConfigForm, CloudObjectRef, CreationStatus, TaskCreator, TaskFiles,
    TaskPayload,
};
use crate::error::IntakeError;
use crate::forms::{validate_labels, AdvancedConfiguration, BasicConfiguration, Label};
use crate::materialize::{MaterializationFailure, MaterializationOutcome, MaterializationPipeline};
use crate::share_tree::ShareTreeLoader;
use crate::sources::{FileSelection, FileSourceSet, SourceEntries, SourceKind};

const DEFAULT_CREATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Steps of one submission attempt, declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Idle,
    Validating,
    Materializing,
    SubmittingBasic,
    SubmittingAdvanced,
    Creating,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_in_progress(self) -> bool {
        (Phase::Validating..=Phase::Creating).contains(&self)
    }

    /// Phases only move forward; `Failed` and `Succeeded` both lead back to `Idle`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Idle, Phase::Validating) => true,
            (Phase::Succeeded | Phase::Failed, Phase::Idle) => true,
            (from, Phase::Failed) => from.is_in_progress(),
            (from, Phase::Succeeded) => from == Phase::Creating,
            (from, to) => from.is_in_progress() && to.is_in_progress() && to > from,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub attempt_id: Uuid,
    pub task_id: Option<i64>,
    pub file_count: usize,
    /// Every phase the attempt passed through, ending in `Idle`.
    pub phases: Vec<Phase>,
    /// Cloud objects that could not be fetched; non-fatal because at least
    /// one object was materialized.
    pub materialization_failures: Vec<MaterializationFailure>,
}

struct SubmissionState {
    phase: Phase,
    trail: Vec<Phase>,
    labels: Vec<Label>,
    sources: FileSourceSet,
    basic_config: Option<BasicConfiguration>,
    advanced_config: Option<AdvancedConfiguration>,
    last_error: Option<String>,
}

impl SubmissionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            trail: Vec::new(),
            labels: Vec::new(),
            sources: FileSourceSet::new(),
            basic_config: None,
            advanced_config: None,
            last_error: None,
        }
    }

    fn advance(&mut self, next: Phase) -> Result<(), IntakeError> {
        if !self.phase.can_advance_to(next) {
            return Err(IntakeError::PhaseOrder {
                from: self.phase,
                to: next,
            });
        }
        debug!(from = ?self.phase, to = ?next, "[SUBMIT] Phase transition");
        self.phase = next;
        self.trail.push(next);
        Ok(())
    }
}

pub struct OrchestratorBuilder {
    basic: Arc<dyn BasicConfigForm>,
    advanced: Option<Arc<dyn AdvancedConfigForm>>,
    creator: Arc<dyn TaskCreator>,
    status: watch::Receiver<CreationStatus>,
    bucket: Option<Arc<CloudBucketBrowser>>,
    materializer: Option<MaterializationPipeline>,
    share_tree: Option<Arc<ShareTreeLoader>>,
    creation_timeout: Duration,
}

impl OrchestratorBuilder {
    pub fn advanced(mut self, form: Arc<dyn AdvancedConfigForm>) -> Self {
        self.advanced = Some(form);
        self
    }

    /// Enables the cloud source.
    pub fn cloud(mut self, bucket: Arc<CloudBucketBrowser>, materializer: MaterializationPipeline) -> Self {
        self.bucket = Some(bucket);
        self.materializer = Some(materializer);
        self
    }

    pub fn share_tree(mut self, loader: Arc<ShareTreeLoader>) -> Self {
        self.share_tree = Some(loader);
        self
    }

    pub fn creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    pub fn build(self) -> SubmissionOrchestrator {
        SubmissionOrchestrator {
            basic: self.basic,
            advanced: self.advanced,
            creator: self.creator,
            status: self.status,
            bucket: self.bucket,
            materializer: self.materializer,
            share_tree: self.share_tree,
            creation_timeout: self.creation_timeout,
            state: Mutex::new(SubmissionState::new()),
            in_flight: AtomicBool::new(false),
        }
    }
}

pub struct SubmissionOrchestrator {
    basic: Arc<dyn BasicConfigForm>,
    advanced: Option<Arc<dyn AdvancedConfigForm>>,
    creator: Arc<dyn TaskCreator>,
    status: watch::Receiver<CreationStatus>,
    bucket: Option<Arc<CloudBucketBrowser>>,
    materializer: Option<MaterializationPipeline>,
    share_tree: Option<Arc<ShareTreeLoader>>,
    creation_timeout: Duration,
    state: Mutex<SubmissionState>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when an attempt ends, including when the
/// attempt's future is dropped mid-way.
struct InFlightGuard<'a> {
    orchestrator: &'a SubmissionOrchestrator,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.orchestrator.lock();
        if state.phase != Phase::Idle {
            warn!(phase = ?state.phase, "[SUBMIT] Attempt abandoned, returning to Idle");
            state.phase = Phase::Idle;
            state.trail.push(Phase::Idle);
        }
        drop(state);
        self.orchestrator.in_flight.store(false, Ordering::Release);
    }
}

impl SubmissionOrchestrator {
    pub fn builder(
        basic: Arc<dyn BasicConfigForm>,
        creator: Arc<dyn TaskCreator>,
        status: watch::Receiver<CreationStatus>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            basic,
            advanced: None,
            creator,
            status,
            bucket: None,
            materializer: None,
            share_tree: None,
            creation_timeout: DEFAULT_CREATION_TIMEOUT,
        }
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Phases visited by the most recent attempt.
    pub fn last_trail(&self) -> Vec<Phase> {
        self.lock().trail.clone()
    }

    /// Description of the most recent failure, cleared when a new attempt starts.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn set_active_source(&self, kind: SourceKind) {
        self.lock().sources.set_active(kind);
    }

    pub fn replace_source(&self, entries: SourceEntries) {
        self.lock().sources.replace(entries);
    }

    pub fn active_files(&self) -> FileSelection {
        self.lock().sources.active_files()
    }

    pub fn sources(&self) -> FileSourceSet {
        self.lock().sources.clone()
    }

    pub fn set_labels(&self, labels: Vec<Label>) {
        self.lock().labels = labels;
    }

    pub fn labels(&self) -> Vec<Label> {
        self.lock().labels.clone()
    }

    /// Values accepted from the sub-forms during the last attempt.
    pub fn submitted_configuration(&self) -> (Option<BasicConfiguration>, Option<AdvancedConfiguration>) {
        let state = self.lock();
        (state.basic_config.clone(), state.advanced_config.clone())
    }

    pub fn bucket(&self) -> Option<&Arc<CloudBucketBrowser>> {
        self.bucket.as_ref()
    }

    pub fn share_tree(&self) -> Option<&Arc<ShareTreeLoader>> {
        self.share_tree.as_ref()
    }

    /// Selects bucket objects by key and mirrors the accepted ones into the
    /// cloud source. Returns how many keys were accepted.
    pub fn select_cloud_objects<I, S>(&self, keys: I) -> Result<usize, IntakeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bucket = self
            .bucket
            .as_ref()
            .ok_or(IntakeError::SourceUnavailable(SourceKind::Cloud))?;
        let accepted = bucket.select(keys);
        let count = accepted.len();
        self.lock().sources.replace(SourceEntries::Cloud(accepted));
        Ok(count)
    }

    /// Runs one submission attempt. Rejected with
    /// [`IntakeError::SubmissionInProgress`] while another attempt is running.
    pub async fn submit(&self) -> Result<SubmissionReport, IntakeError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("[SUBMIT] Rejected: another submission is in progress");
            return Err(IntakeError::SubmissionInProgress);
        }
        let _guard = InFlightGuard { orchestrator: self };

        let attempt_id = Uuid::new_v4();
        let span = info_span!("submission", %attempt_id);
        self.run_attempt(attempt_id).instrument(span).await
    }

    async fn run_attempt(&self, attempt_id: Uuid) -> Result<SubmissionReport, IntakeError> {
        {
            let mut state = self.lock();
            state.trail = vec![Phase::Idle];
            state.last_error = None;
        }
        info!("[SUBMIT] Starting submission attempt");

        match self.drive(attempt_id).await {
            Ok(mut report) => {
                report.phases = self.finish_success();
                info!(task_id = ?report.task_id, files = report.file_count, "[SUBMIT] Task created");
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "[SUBMIT] Could not create a task");
                let mut state = self.lock();
                if state.phase.is_in_progress() {
                    state.phase = Phase::Failed;
                    state.trail.push(Phase::Failed);
                }
                state.phase = Phase::Idle;
                state.trail.push(Phase::Idle);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(&self, attempt_id: Uuid) -> Result<SubmissionReport, IntakeError> {
        let (active, selection, labels) = {
            let mut state = self.lock();
            state.advance(Phase::Validating)?;
            (
                state.sources.active(),
                state.sources.active_files(),
                state.labels.clone(),
            )
        };
        info!(
            source = %active,
            files = selection.total_len(),
            labels = labels.len(),
            "[SUBMIT] Validating submission"
        );

        let mut materialization_failures = Vec::new();
        let files = if active == SourceKind::Cloud {
            validate_labels(&labels)?;
            let outcome = self.materialize_cloud(&selection.cloud).await?;
            materialization_failures = outcome.failed;
            TaskFiles {
                cloud: outcome.succeeded,
                ..TaskFiles::default()
            }
        } else {
            if labels.is_empty() {
                return Err(IntakeError::NoLabels);
            }
            if selection.is_empty() {
                return Err(IntakeError::NoFiles);
            }
            validate_labels(&labels)?;
            TaskFiles {
                local: selection.local,
                share: selection.share,
                remote: selection.remote,
                cloud: Vec::new(),
            }
        };

        self.advance(Phase::SubmittingBasic)?;
        let basic = self.basic.submit().await?;
        self.lock().basic_config = Some(basic.clone());

        self.advance(Phase::SubmittingAdvanced)?;
        let advanced = match &self.advanced {
            Some(form) => form.submit().await?,
            None => {
                debug!("[SUBMIT] No advanced form present, using defaults");
                AdvancedConfiguration::default()
            }
        };
        self.lock().advanced_config = Some(advanced.clone());

        self.advance(Phase::Creating)?;
        let file_count = files.len();
        let payload = TaskPayload {
            basic,
            advanced,
            labels,
            files,
        };

        let mut status = self.status.clone();
        // Only transitions after this point, tagged with this attempt, count.
        let _ = status.borrow_and_update();

        info!(file_count, "[SUBMIT] Invoking task creation");
        self.creator
            .create(attempt_id, payload)
            .await
            .map_err(|e| IntakeError::remote("create task", e))?;
        let task_id = self.await_creation(attempt_id, &mut status).await?;

        self.advance(Phase::Succeeded)?;
        Ok(SubmissionReport {
            attempt_id,
            task_id,
            file_count,
            phases: Vec::new(),
            materialization_failures,
        })
    }

    async fn materialize_cloud(
        &self,
        objects: &[CloudObjectRef],
    ) -> Result<MaterializationOutcome, IntakeError> {
        let (Some(bucket), Some(materializer)) = (&self.bucket, &self.materializer) else {
            return Err(IntakeError::SourceUnavailable(SourceKind::Cloud));
        };

        let keys: Vec<String> = objects
            .iter()
            .filter(|o| !o.is_directory)
            .map(|o| o.key.clone())
            .collect();
        if keys.is_empty() {
            return Err(IntakeError::NoFiles);
        }

        self.advance(Phase::Materializing)?;
        let downloads = bucket.request_signed_downloads(&keys).await?;

        let mut unsigned: Vec<MaterializationFailure> = keys
            .iter()
            .filter(|key| !downloads.iter().any(|d| &d.key == *key))
            .map(|key| MaterializationFailure {
                key: key.clone(),
                error: "no signed URL returned".to_string(),
            })
            .collect();

        let mut outcome = materializer.materialize(downloads).await;
        outcome.failed.append(&mut unsigned);

        if outcome.succeeded.is_empty() {
            return Err(IntakeError::PartialMaterialization {
                succeeded: 0,
                failed: outcome.failed.len(),
            });
        }
        if !outcome.failed.is_empty() {
            warn!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "[SUBMIT] Continuing with partially materialized cloud selection"
            );
        }
        Ok(outcome)
    }

    /// Waits for a terminal status tagged with `attempt_id`. Statuses of
    /// earlier attempts that finish late are skipped.
    async fn await_creation(
        &self,
        attempt_id: Uuid,
        status: &mut watch::Receiver<CreationStatus>,
    ) -> Result<Option<i64>, IntakeError> {
        let wait = async {
            loop {
                if status.changed().await.is_err() {
                    return Err(IntakeError::remote(
                        "create task",
                        "status channel closed before completion",
                    ));
                }
                let current = status.borrow_and_update().clone();
                if current.attempt_id() != Some(attempt_id) {
                    if let Some(other) = current.attempt_id() {
                        warn!(%other, "[SUBMIT] Ignoring creation status of another attempt");
                    }
                    continue;
                }
                match current {
                    CreationStatus::Created { task_id, .. } => return Ok(task_id),
                    CreationStatus::Failed { message, .. } => {
                        return Err(IntakeError::remote("create task", message))
                    }
                    CreationStatus::InProgress { message, .. } => {
                        info!(status = %message, "[SUBMIT] Task creation in progress");
                    }
                    CreationStatus::Idle => {}
                }
            }
        };

        match tokio::time::timeout(self.creation_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(IntakeError::remote(
                "create task",
                format!(
                    "no completion status within {}s",
                    self.creation_timeout.as_secs()
                ),
            )),
        }
    }

    /// Resets every child component and returns the completed phase trail.
    fn finish_success(&self) -> Vec<Phase> {
        self.basic.reset();
        if let Some(advanced) = &self.advanced {
            advanced.reset();
        }
        if let Some(bucket) = &self.bucket {
            bucket.clear_selection();
        }
        if let Some(tree) = &self.share_tree {
            tree.collapse_all();
        }

        let mut state = self.lock();
        state.sources.reset();
        state.labels.clear();
        state.basic_config = None;
        state.advanced_config = None;
        if let Err(e) = state.advance(Phase::Idle) {
            error!(error = %e, "[SUBMIT] Unexpected phase after success");
            state.phase = Phase::Idle;
        }
        state.trail.clone()
    }

    fn advance(&self, next: Phase) -> Result<(), IntakeError> {
        self.lock().advance(next)
    }

    fn lock(&self) -> MutexGuard<'_, SubmissionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        assert!(Phase::Idle.can_advance_to(Phase::Validating));
        assert!(Phase::Validating.can_advance_to(Phase::Materializing));
        assert!(Phase::Validating.can_advance_to(Phase::SubmittingBasic));
        assert!(Phase::Materializing.can_advance_to(Phase::SubmittingBasic));
        assert!(!Phase::SubmittingBasic.can_advance_to(Phase::Materializing));
        assert!(!Phase::Creating.can_advance_to(Phase::Validating));
        assert!(!Phase::Idle.can_advance_to(Phase::Creating));
    }

    #[test]
    fn only_creating_reaches_succeeded() {
        assert!(Phase::Creating.can_advance_to(Phase::Succeeded));
        assert!(!Phase::SubmittingBasic.can_advance_to(Phase::Succeeded));
        assert!(Phase::Succeeded.can_advance_to(Phase::Idle));
    }

    #[test]
    fn failed_is_reachable_from_in_progress_only() {
        assert!(Phase::Validating.can_advance_to(Phase::Failed));
        assert!(Phase::Creating.can_advance_to(Phase::Failed));
        assert!(!Phase::Idle.can_advance_to(Phase::Failed));
        assert!(Phase::Failed.can_advance_to(Phase::Idle));
        assert!(!Phase::Failed.can_advance_to(Phase::Validating));
    }

    #[test]
    fn state_rejects_backward_transition() {
        let mut state = SubmissionState::new();
        state.advance(Phase::Validating).unwrap();
        state.advance(Phase::SubmittingBasic).unwrap();
        let err = state.advance(Phase::Materializing).unwrap_err();
        assert!(matches!(
            err,
            IntakeError::PhaseOrder {
                from: Phase::SubmittingBasic,
                to: Phase::Materializing
            }
        ));
        assert_eq!(state.phase, Phase::SubmittingBasic);
    }
}

//! Error taxonomy shared by every stage of the intake pipeline.
//!
//! The `Display` output of [`IntakeError`] is the description shown to the
//! user when a submission attempt fails.

use thiserror::Error;

use crate::sources::SourceKind;
use crate::submission::Phase;

/// Rejection raised by a configuration form or by label validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FormError {
    pub field: String,
    pub message: String,
}

impl FormError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("A task must contain at least one label")]
    NoLabels,

    #[error("A task must contain at least one file")]
    NoFiles,

    #[error("Invalid configuration: {0}")]
    FormValidation(#[from] FormError),

    #[error("{operation} failed: {message}")]
    RemoteService {
        operation: &'static str,
        message: String,
    },

    #[error("{failed} cloud object(s) could not be fetched, {succeeded} succeeded")]
    PartialMaterialization { succeeded: usize, failed: usize },

    #[error("A submission is already in progress")]
    SubmissionInProgress,

    #[error("The {0} source is not available in this session")]
    SourceUnavailable(SourceKind),

    #[error("Line {line} is not a valid http(s) URL: {value}")]
    InvalidRemoteUrl { line: usize, value: String },

    #[error("Unknown share node: {0}")]
    UnknownShareNode(String),

    #[error("Submission phase cannot move from {from:?} to {to:?}")]
    PhaseOrder { from: Phase, to: Phase },
}

impl IntakeError {
    pub fn remote(operation: &'static str, err: impl std::fmt::Display) -> Self {
        IntakeError::RemoteService {
            operation,
            message: err.to_string(),
        }
    }

    /// True for errors detected locally, before any collaborator is contacted.
    pub fn is_local_validation(&self) -> bool {
        matches!(
            self,
            IntakeError::NoLabels | IntakeError::NoFiles | IntakeError::InvalidRemoteUrl { .. }
        )
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MATERIALIZE_CONCURRENCY: usize = 4;
const DEFAULT_CREATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MAX_OBJECT_BYTES: u64 = 256 * 1024 * 1024;

/// Runtime knobs for the intake pipeline. Every field has a default, so an
/// empty YAML mapping (or no mapping at all) yields a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    /// Ceiling for the signed-URL request and for each object fetch.
    pub request_timeout_secs: u64,
    /// Maximum number of object fetches in flight during materialization.
    pub materialize_concurrency: usize,
    /// How long to wait for the task status to become terminal after creation.
    pub creation_timeout_secs: u64,
    /// Objects larger than this are rejected during materialization.
    pub max_object_bytes: u64,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            materialize_concurrency: DEFAULT_MATERIALIZE_CONCURRENCY,
            creation_timeout_secs: DEFAULT_CREATION_TIMEOUT_SECS,
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

impl IntakeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn creation_timeout(&self) -> Duration {
        Duration::from_secs(self.creation_timeout_secs)
    }

    /// Concurrency of zero would stall the fetch stream; clamp to one.
    pub fn concurrency(&self) -> usize {
        self.materialize_concurrency.max(1)
    }

    pub fn trace_loaded(&self) {
        info!(
            request_timeout_secs = self.request_timeout_secs,
            materialize_concurrency = self.materialize_concurrency,
            creation_timeout_secs = self.creation_timeout_secs,
            "Loaded intake settings"
        );
        debug!(?self, "Intake settings (full debug)");
    }
}

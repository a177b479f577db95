/// `load_config` module: reads the YAML submission file and injects secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed into the typed
/// values consumed by `task-intake-core`.
///
/// # Responsibilities
/// - Parse the config file into [`CliConfig`] (backend, settings, task, source)
/// - Read the bearer token from `TASK_INTAKE_TOKEN`; it never lives in the file
/// - Let `TASK_INTAKE_BACKEND_URL` override `backend.base_url`
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
///
/// # Example
/// ```yaml
/// backend:
///   base_url: http://localhost:8080/api/v1
/// settings:
///   materialize_concurrency: 8
/// task:
///   basic:
///     name: street scenes
///   advanced:
///     image_quality: 80
///   labels:
///     - name: car
///     - name: person
///       color: "#ff0000"
/// source:
///   type: cloud
///   keys: [dir/img1.png, dir/img2.png]
/// ```
use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use url::Url;

use task_intake_core::config::IntakeSettings;
use task_intake_core::forms::{AdvancedConfiguration, BasicConfiguration, Label};
use task_intake_core::sources::SourceKind;

pub const TOKEN_ENV: &str = "TASK_INTAKE_TOKEN";
pub const BACKEND_URL_ENV: &str = "TASK_INTAKE_BACKEND_URL";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub backend: BackendSection,
    #[serde(default)]
    pub settings: IntakeSettings,
    #[serde(default)]
    pub task: TaskSection,
    /// Only required by `submit`.
    #[serde(default)]
    pub source: Option<SourceSection>,
}

#[derive(Debug, Deserialize)]
pub struct BackendSection {
    pub base_url: Url,
    /// Injected from `TASK_INTAKE_TOKEN`.
    #[serde(skip)]
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskSection {
    #[serde(default)]
    pub basic: BasicConfiguration,
    #[serde(default)]
    pub advanced: Option<AdvancedConfiguration>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Files for the task, drawn from exactly one source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSection {
    Local { paths: Vec<PathBuf> },
    Share { paths: Vec<String> },
    Remote { urls: Vec<String> },
    Cloud { keys: Vec<String> },
}

impl SourceSection {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSection::Local { .. } => SourceKind::Local,
            SourceSection::Share { .. } => SourceKind::Share,
            SourceSection::Remote { .. } => SourceKind::Remote,
            SourceSection::Cloud { .. } => SourceKind::Cloud,
        }
    }
}

/// Loads the YAML config at `path` and injects the environment secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(raw) = env::var(BACKEND_URL_ENV) {
        let url = Url::parse(&raw).map_err(|e| {
            error!(error = ?e, raw = %raw, "Failed to parse {BACKEND_URL_ENV}");
            anyhow::anyhow!("{BACKEND_URL_ENV} is not a valid URL: {e}")
        })?;
        info!(base_url = %url, "Backend URL overridden from environment");
        config.backend.base_url = url;
    }

    config.backend.token = env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
    if config.backend.token.is_none() {
        warn!("{TOKEN_ENV} is not set; backend requests will be unauthenticated");
    }

    Ok(config)
}

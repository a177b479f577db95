//! Configuration values, labels, and preset implementations of the form
//! contracts.
//!
//! The preset forms hold fixed values (loaded from a config file by the CLI)
//! and validate them on `submit()`, the same checks an interactive form
//! would run before handing its values over.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::contract::{AdvancedConfigForm, BasicConfigForm};
use crate::error::FormError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConfiguration {
    pub name: String,
}

impl BasicConfiguration {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.name.trim().is_empty() {
            return Err(FormError::new("name", "must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfiguration {
    pub lfs: bool,
    pub use_zip_chunks: bool,
    pub use_cache: bool,
    pub image_quality: Option<u8>,
    pub segment_size: Option<u32>,
    pub overlap: Option<u32>,
    pub frame_filter: Option<String>,
    pub repository: Option<String>,
    pub bug_tracker: Option<String>,
}

impl Default for AdvancedConfiguration {
    fn default() -> Self {
        Self {
            lfs: false,
            use_zip_chunks: true,
            use_cache: true,
            image_quality: None,
            segment_size: None,
            overlap: None,
            frame_filter: None,
            repository: None,
            bug_tracker: None,
        }
    }
}

impl AdvancedConfiguration {
    pub fn validate(&self) -> Result<(), FormError> {
        if let Some(quality) = self.image_quality {
            if !(5..=100).contains(&quality) {
                return Err(FormError::new("image_quality", "must be between 5 and 100"));
            }
        }
        if self.segment_size == Some(0) {
            return Err(FormError::new("segment_size", "must be positive"));
        }
        if let (Some(overlap), Some(segment)) = (self.overlap, self.segment_size) {
            if overlap >= segment {
                return Err(FormError::new("overlap", "must be smaller than segment_size"));
            }
        }
        if self.lfs && self.repository.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err(FormError::new("lfs", "requires a repository"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl Label {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            attributes: Vec::new(),
        }
    }
}

/// Label names must be non-blank and unique. Emptiness of the set itself is
/// checked by the orchestrator, since cloud submissions skip that check.
pub fn validate_labels(labels: &[Label]) -> Result<(), FormError> {
    let mut seen = HashSet::new();
    for label in labels {
        let name = label.name.trim();
        if name.is_empty() {
            return Err(FormError::new("labels", "label names must not be blank"));
        }
        if !seen.insert(name) {
            return Err(FormError::new("labels", format!("duplicate label '{name}'")));
        }
    }
    Ok(())
}

/// Basic form backed by a fixed value; `reset()` clears it back to default.
pub struct PresetBasicForm {
    values: Mutex<BasicConfiguration>,
}

impl PresetBasicForm {
    pub fn new(values: BasicConfiguration) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn set(&self, values: BasicConfiguration) {
        *lock(&self.values) = values;
    }

    pub fn current(&self) -> BasicConfiguration {
        lock(&self.values).clone()
    }
}

#[async_trait]
impl BasicConfigForm for PresetBasicForm {
    async fn submit(&self) -> Result<BasicConfiguration, FormError> {
        let values = self.current();
        values.validate().map_err(|e| {
            warn!(error = %e, "Basic configuration rejected");
            e
        })?;
        debug!(name = %values.name, "Basic configuration accepted");
        Ok(values)
    }

    fn reset(&self) {
        self.set(BasicConfiguration::default());
    }
}

pub struct PresetAdvancedForm {
    values: Mutex<AdvancedConfiguration>,
}

impl PresetAdvancedForm {
    pub fn new(values: AdvancedConfiguration) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn current(&self) -> AdvancedConfiguration {
        lock(&self.values).clone()
    }
}

#[async_trait]
impl AdvancedConfigForm for PresetAdvancedForm {
    async fn submit(&self) -> Result<AdvancedConfiguration, FormError> {
        let values = self.current();
        values.validate().map_err(|e| {
            warn!(error = %e, "Advanced configuration rejected");
            e
        })?;
        Ok(values)
    }

    fn reset(&self) {
        *lock(&self.values) = AdvancedConfiguration::default();
    }
}

// Form state is plain data; a poisoned lock still holds a usable value.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_defaults_match_form_defaults() {
        let advanced = AdvancedConfiguration::default();
        assert!(!advanced.lfs);
        assert!(advanced.use_zip_chunks);
        assert!(advanced.use_cache);
        assert!(advanced.validate().is_ok());
    }

    #[test]
    fn advanced_rejects_out_of_range_quality() {
        let advanced = AdvancedConfiguration {
            image_quality: Some(101),
            ..Default::default()
        };
        assert_eq!(advanced.validate().unwrap_err().field, "image_quality");
    }

    #[test]
    fn advanced_rejects_overlap_not_below_segment() {
        let advanced = AdvancedConfiguration {
            segment_size: Some(10),
            overlap: Some(10),
            ..Default::default()
        };
        assert_eq!(advanced.validate().unwrap_err().field, "overlap");
    }

    #[test]
    fn lfs_needs_repository() {
        let mut advanced = AdvancedConfiguration {
            lfs: true,
            ..Default::default()
        };
        assert!(advanced.validate().is_err());
        advanced.repository = Some("https://git.example/repo.git".into());
        assert!(advanced.validate().is_ok());
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let labels = vec![Label::named("cat"), Label::named(" cat ")];
        assert!(validate_labels(&labels).is_err());
        assert!(validate_labels(&[Label::named("cat"), Label::named("dog")]).is_ok());
    }

    #[tokio::test]
    async fn preset_basic_form_validates_and_resets() {
        let form = PresetBasicForm::new(BasicConfiguration { name: "  ".into() });
        assert!(form.submit().await.is_err());

        form.set(BasicConfiguration { name: "street scenes".into() });
        assert_eq!(form.submit().await.unwrap().name, "street scenes");

        form.reset();
        assert_eq!(form.current(), BasicConfiguration::default());
    }
}

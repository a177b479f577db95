//! Files grouped by the source they come from, with exactly one source active.
//!
//! Entries of inactive sources are retained so that switching back and forth
//! does not lose input, but [`FileSourceSet::active_files`] only ever exposes
//! the active one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

use crate::contract::CloudObjectRef;
use crate::error::IntakeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Local,
    Share,
    Remote,
    Cloud,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Local,
        SourceKind::Share,
        SourceKind::Remote,
        SourceKind::Cloud,
    ];
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Local => "local",
            SourceKind::Share => "share",
            SourceKind::Remote => "remote",
            SourceKind::Cloud => "cloud",
        };
        f.write_str(name)
    }
}

/// A file on the machine running the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Replacement content for one source; the variant names the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntries {
    Local(Vec<LocalFile>),
    Share(Vec<String>),
    Remote(Vec<Url>),
    Cloud(Vec<CloudObjectRef>),
}

impl SourceEntries {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceEntries::Local(_) => SourceKind::Local,
            SourceEntries::Share(_) => SourceKind::Share,
            SourceEntries::Remote(_) => SourceKind::Remote,
            SourceEntries::Cloud(_) => SourceKind::Cloud,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SourceEntries::Local(v) => v.len(),
            SourceEntries::Share(v) => v.len(),
            SourceEntries::Remote(v) => v.len(),
            SourceEntries::Cloud(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The view returned by [`FileSourceSet::active_files`]: only the field of
/// the active source is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    pub local: Vec<LocalFile>,
    pub share: Vec<String>,
    pub remote: Vec<Url>,
    pub cloud: Vec<CloudObjectRef>,
}

impl FileSelection {
    pub fn total_len(&self) -> usize {
        self.local.len() + self.share.len() + self.remote.len() + self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSourceSet {
    local: Vec<LocalFile>,
    share: Vec<String>,
    remote: Vec<Url>,
    cloud: Vec<CloudObjectRef>,
    active: SourceKind,
}

impl FileSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> SourceKind {
        self.active
    }

    /// Switches the active source without touching any source's entries.
    pub fn set_active(&mut self, kind: SourceKind) {
        debug!(from = %self.active, to = %kind, "Switching active file source");
        self.active = kind;
    }

    /// Overwrites the entries of the source named by `entries`.
    pub fn replace(&mut self, entries: SourceEntries) {
        debug!(source = %entries.kind(), count = entries.len(), "Replacing source entries");
        match entries {
            SourceEntries::Local(v) => self.local = v,
            SourceEntries::Share(v) => self.share = v,
            SourceEntries::Remote(v) => self.remote = v,
            SourceEntries::Cloud(v) => self.cloud = v,
        }
    }

    /// Number of entries stored for `kind`, whether active or not.
    pub fn count(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Local => self.local.len(),
            SourceKind::Share => self.share.len(),
            SourceKind::Remote => self.remote.len(),
            SourceKind::Cloud => self.cloud.len(),
        }
    }

    pub fn active_files(&self) -> FileSelection {
        let mut selection = FileSelection::default();
        match self.active {
            SourceKind::Local => selection.local = self.local.clone(),
            SourceKind::Share => selection.share = self.share.clone(),
            SourceKind::Remote => selection.remote = self.remote.clone(),
            SourceKind::Cloud => selection.cloud = self.cloud.clone(),
        }
        selection
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Parses the remote-source text area: one URL per line, blank lines skipped.
pub fn parse_remote_list(text: &str) -> Result<Vec<Url>, IntakeError> {
    let mut urls = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let invalid = || IntakeError::InvalidRemoteUrl {
            line: idx + 1,
            value: line.to_string(),
        };
        let url = Url::parse(line).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        urls.push(url);
    }
    Ok(urls)
}

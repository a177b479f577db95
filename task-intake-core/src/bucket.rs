//! Cloud bucket browsing: listing, selection, and signed-URL requests.
//!
//! The browser moves through
//! `Listing -> Listed -> SelectionChanged* -> SignRequested -> SignResolved | SignFailed`.
//! A sign request works on the keys passed at call time, so selection
//! changes made while it is in flight do not affect it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::contract::{BucketLister, CloudObjectRef, SignedDownload, UrlSigner};
use crate::error::IntakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserPhase {
    Idle,
    Listing,
    Listed,
    SelectionChanged,
    SignRequested,
    SignResolved,
    SignFailed,
}

/// Display node built from the flat listing by splitting keys on `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTreeNode {
    pub key: String,
    pub title: String,
    pub is_directory: bool,
    pub children: Vec<BucketTreeNode>,
}

struct BrowserState {
    phase: BrowserPhase,
    listing: Vec<CloudObjectRef>,
    selected: BTreeSet<String>,
}

pub struct CloudBucketBrowser {
    lister: Arc<dyn BucketLister>,
    signer: Arc<dyn UrlSigner>,
    sign_timeout: Duration,
    state: Mutex<BrowserState>,
}

impl CloudBucketBrowser {
    pub fn new(
        lister: Arc<dyn BucketLister>,
        signer: Arc<dyn UrlSigner>,
        sign_timeout: Duration,
    ) -> Self {
        Self {
            lister,
            signer,
            sign_timeout,
            state: Mutex::new(BrowserState {
                phase: BrowserPhase::Idle,
                listing: Vec::new(),
                selected: BTreeSet::new(),
            }),
        }
    }

    pub fn phase(&self) -> BrowserPhase {
        self.lock().phase
    }

    /// Fetches the bucket listing. A failed listing is logged and leaves the
    /// browser with an empty tree; it never fails the caller.
    pub async fn list_objects(&self) -> Vec<CloudObjectRef> {
        self.lock().phase = BrowserPhase::Listing;
        info!("[BUCKET] Listing bucket objects");

        let listing = match self.lister.list_bucket().await {
            Ok(mut objects) => {
                objects.sort_by(|a, b| a.key.cmp(&b.key));
                objects.dedup_by(|a, b| a.key == b.key);
                info!(count = objects.len(), "[BUCKET] Bucket listing received");
                objects
            }
            Err(e) => {
                error!(error = %e, "[BUCKET] Bucket listing failed, showing empty tree");
                Vec::new()
            }
        };

        let mut state = self.lock();
        state.phase = BrowserPhase::Listed;
        // Keys that vanished from the listing can no longer stay selected.
        let known: BTreeSet<&str> = listing.iter().map(|o| o.key.as_str()).collect();
        state.selected.retain(|k| known.contains(k.as_str()));
        state.listing = listing.clone();
        listing
    }

    pub fn listing(&self) -> Vec<CloudObjectRef> {
        self.lock().listing.clone()
    }

    /// Replaces the selection wholesale. Keys absent from the last listing
    /// are dropped; the accepted objects are returned in key order.
    pub fn select<I, S>(&self, keys: I) -> Vec<CloudObjectRef>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        let mut selected = BTreeSet::new();
        for key in keys {
            let key = key.into();
            if state.listing.iter().any(|o| o.key == key) {
                selected.insert(key);
            } else {
                debug!(key = %key, "[BUCKET] Ignoring selection of unlisted key");
            }
        }
        state.selected = selected;
        state.phase = BrowserPhase::SelectionChanged;
        state
            .listing
            .iter()
            .filter(|o| state.selected.contains(&o.key))
            .cloned()
            .collect()
    }

    pub fn selected_keys(&self) -> Vec<String> {
        self.lock().selected.iter().cloned().collect()
    }

    pub fn clear_selection(&self) {
        self.lock().selected.clear();
    }

    /// Requests signed URLs for `keys` in one batch. Directory keys are
    /// skipped. Transport failures and timeouts become
    /// [`IntakeError::RemoteService`].
    pub async fn request_signed_downloads(
        &self,
        keys: &[String],
    ) -> Result<Vec<SignedDownload>, IntakeError> {
        let signable: Vec<String> = {
            let mut state = self.lock();
            state.phase = BrowserPhase::SignRequested;
            keys.iter()
                .filter(|key| {
                    let is_dir = state
                        .listing
                        .iter()
                        .any(|o| &o.key == *key && o.is_directory);
                    if is_dir {
                        debug!(key = %key, "[BUCKET] Skipping directory key in sign request");
                    }
                    !is_dir
                })
                .cloned()
                .collect()
        };

        if signable.is_empty() {
            self.lock().phase = BrowserPhase::SignResolved;
            return Ok(Vec::new());
        }

        info!(count = signable.len(), "[BUCKET] Requesting signed downloads");
        let result = match tokio::time::timeout(self.sign_timeout, self.signer.sign_keys(&signable)).await {
            Ok(Ok(downloads)) => Ok(downloads),
            Ok(Err(e)) => Err(IntakeError::remote("sign download URLs", e)),
            Err(_) => Err(IntakeError::remote(
                "sign download URLs",
                format!("timed out after {}s", self.sign_timeout.as_secs()),
            )),
        };

        match result {
            Ok(downloads) => {
                // Keep the caller's key order and drop anything we did not ask for.
                let mut ordered = Vec::with_capacity(downloads.len());
                for key in &signable {
                    match downloads.iter().find(|d| &d.key == key) {
                        Some(d) => ordered.push(d.clone()),
                        None => warn!(key = %key, "[BUCKET] Signing service returned no URL for key"),
                    }
                }
                self.lock().phase = BrowserPhase::SignResolved;
                info!(count = ordered.len(), "[BUCKET] Signed downloads received");
                Ok(ordered)
            }
            Err(e) => {
                self.lock().phase = BrowserPhase::SignFailed;
                error!(error = %e, "[BUCKET] Sign request failed");
                Err(e)
            }
        }
    }

    /// Signs the selection as it stands now.
    pub async fn sign_selection(&self) -> Result<Vec<SignedDownload>, IntakeError> {
        let keys = self.selected_keys();
        self.request_signed_downloads(&keys).await
    }

    pub fn tree(&self) -> Vec<BucketTreeNode> {
        build_tree(&self.lock().listing)
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Folds a flat, `/`-separated listing into a nested tree. Intermediate
/// prefixes that are not listed themselves become directory nodes.
pub fn build_tree(listing: &[CloudObjectRef]) -> Vec<BucketTreeNode> {
    let mut roots: Vec<BucketTreeNode> = Vec::new();
    for object in listing {
        let trimmed = object.key.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        insert_path(&mut roots, &segments, 0, object.is_directory);
    }
    sort_tree(&mut roots);
    roots
}

fn insert_path(nodes: &mut Vec<BucketTreeNode>, segments: &[&str], depth: usize, leaf_is_dir: bool) {
    let is_last = depth + 1 == segments.len();
    let key = segments[..=depth].join("/");
    let is_directory = !is_last || leaf_is_dir;

    let idx = match nodes.iter().position(|n| n.key == key) {
        Some(idx) => {
            if is_directory {
                nodes[idx].is_directory = true;
            }
            idx
        }
        None => {
            nodes.push(BucketTreeNode {
                key,
                title: segments[depth].to_string(),
                is_directory,
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };

    if !is_last {
        insert_path(&mut nodes[idx].children, segments, depth + 1, leaf_is_dir);
    }
}

fn sort_tree(nodes: &mut [BucketTreeNode]) {
    nodes.sort_by(|a, b| a.key.cmp(&b.key));
    for node in nodes.iter_mut() {
        sort_tree(&mut node.children);
    }
}

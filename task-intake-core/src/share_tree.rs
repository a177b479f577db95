//! Lazy loader for the mounted-share directory tree.
//!
//! Each directory's children are fetched from the [`ShareBrowser`] at most
//! once per session. The per-node cell doubles as the in-flight guard:
//! concurrent `expand` calls on the same node wait for the first load instead
//! of issuing their own request. A failed load leaves the node unloaded so a
//! later expansion may retry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::contract::{ShareBrowser, ShareEntry};
use crate::error::IntakeError;

pub const SHARE_ROOT: &str = "/";

/// Snapshot of one node of the share tree. `children` is `None` until the
/// node has been loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTreeNode {
    pub key: String,
    pub is_leaf: bool,
    pub children: Option<Vec<ShareTreeNode>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// This call issued the load request.
    Loaded,
    /// Children were already present, or another caller loaded them.
    Cached,
    /// Leaves have nothing to load.
    Leaf,
}

struct NodeSlot {
    is_leaf: bool,
    children: Arc<OnceCell<Vec<ShareEntry>>>,
}

impl NodeSlot {
    fn new(is_leaf: bool) -> Self {
        Self {
            is_leaf,
            children: Arc::new(OnceCell::new()),
        }
    }
}

pub struct ShareTreeLoader {
    browser: Arc<dyn ShareBrowser>,
    nodes: Mutex<HashMap<String, NodeSlot>>,
    expanded: Mutex<BTreeSet<String>>,
}

impl ShareTreeLoader {
    pub fn new(browser: Arc<dyn ShareBrowser>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(SHARE_ROOT.to_string(), NodeSlot::new(false));
        Self {
            browser,
            nodes: Mutex::new(nodes),
            expanded: Mutex::new(BTreeSet::new()),
        }
    }

    /// Loads the children of `key` unless they are already loaded or loading.
    ///
    /// Failures are returned as [`IntakeError::RemoteService`] and leave the
    /// node unloaded.
    pub async fn expand(&self, key: &str) -> Result<ExpandOutcome, IntakeError> {
        let cell = {
            let nodes = lock(&self.nodes);
            let slot = nodes
                .get(key)
                .ok_or_else(|| IntakeError::UnknownShareNode(key.to_string()))?;
            if slot.is_leaf {
                return Ok(ExpandOutcome::Leaf);
            }
            slot.children.clone()
        };

        if cell.initialized() {
            debug!(key, "[SHARE] Node already loaded, skipping request");
            lock(&self.expanded).insert(key.to_string());
            return Ok(ExpandOutcome::Cached);
        }

        let mut issued = false;
        let loaded = cell
            .get_or_try_init(|| {
                issued = true;
                info!(key, "[SHARE] Loading share node");
                let browser = self.browser.clone();
                let path = key.to_string();
                async move {
                    let mut children = browser.load_node(&path).await?;
                    children.retain(|child| {
                        let under = is_strictly_under(&path, &child.key);
                        if !under {
                            warn!(parent = %path, child = %child.key, "[SHARE] Dropping entry outside its parent");
                        }
                        under
                    });
                    children.sort_by(|a, b| a.key.cmp(&b.key));
                    Ok::<_, crate::contract::ServiceError>(children)
                }
            })
            .await;

        let children = match loaded {
            Ok(children) => children,
            Err(e) => {
                warn!(key, error = %e, "[SHARE] Failed to load share node");
                return Err(IntakeError::remote("load share node", e));
            }
        };

        {
            let mut nodes = lock(&self.nodes);
            for child in children {
                nodes
                    .entry(child.key.clone())
                    .or_insert_with(|| NodeSlot::new(child.is_leaf));
            }
        }
        lock(&self.expanded).insert(key.to_string());

        if issued {
            info!(key, children = children.len(), "[SHARE] Share node loaded");
            Ok(ExpandOutcome::Loaded)
        } else {
            Ok(ExpandOutcome::Cached)
        }
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        lock(&self.nodes)
            .get(key)
            .is_some_and(|slot| slot.children.initialized())
    }

    pub fn expanded_keys(&self) -> Vec<String> {
        lock(&self.expanded).iter().cloned().collect()
    }

    /// Forgets which nodes are expanded. Loaded children stay cached.
    pub fn collapse_all(&self) {
        lock(&self.expanded).clear();
    }

    /// Snapshot of the tree as currently loaded, starting at the root.
    pub fn tree(&self) -> ShareTreeNode {
        let nodes = lock(&self.nodes);
        build_node(&nodes, SHARE_ROOT, false)
    }
}

fn build_node(nodes: &HashMap<String, NodeSlot>, key: &str, is_leaf: bool) -> ShareTreeNode {
    let Some(slot) = nodes.get(key) else {
        return ShareTreeNode {
            key: key.to_string(),
            is_leaf,
            children: None,
        };
    };
    ShareTreeNode {
        key: key.to_string(),
        is_leaf: slot.is_leaf,
        children: slot.children.get().map(|entries| {
            entries
                .iter()
                .map(|entry| build_node(nodes, &entry.key, entry.is_leaf))
                .collect()
        }),
    }
}

/// Children must extend the parent path, so every tree walk terminates.
fn is_strictly_under(parent: &str, child: &str) -> bool {
    let prefix = if parent.ends_with('/') {
        parent.to_string()
    } else {
        format!("{parent}/")
    };
    child.len() > prefix.len() && child.starts_with(&prefix)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

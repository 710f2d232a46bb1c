//! RemoteStore trait abstraction over a hierarchical file store.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and dry runs
//! - `DriveGateway` (in drive-mirror) - Drive v3 style REST API over reqwest
//!
//! Everything above this trait is local logic. Not-found is never an error:
//! listings come back empty, metadata comes back `None`, deletes succeed.

use crate::error::{Result, SyncError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// A folder or file in the remote store. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub parent_id: Option<String>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Capability interface over the remote store. Performs no retries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List direct children of a folder
    async fn list_children(&self, node_id: &str) -> Result<Vec<Node>>;

    /// Create a folder under a parent
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node>;

    /// Copy a file into a parent folder, optionally renaming it
    async fn copy_file(
        &self,
        file_id: &str,
        dest_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<Node>;

    /// Delete a node (deleting an absent node succeeds)
    async fn delete_node(&self, node_id: &str) -> Result<()>;

    /// Fetch a node's metadata
    async fn get_metadata(&self, node_id: &str) -> Result<Option<Node>>;

    /// Upload new file content into a parent folder
    async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<Node>;

    /// Clickable reference to a node, used by the table of contents.
    fn node_link(&self, node_id: &str, kind: NodeKind) -> String {
        match kind {
            NodeKind::Folder => format!("https://drive.google.com/drive/folders/{}", node_id),
            NodeKind::File => format!("https://drive.google.com/file/d/{}/view", node_id),
        }
    }
}

/// Shared handle used by every component.
pub type SharedStore = Arc<dyn RemoteStore>;

/// Operation counters for `InMemoryStore`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub lists: usize,
    pub folders_created: usize,
    pub files_copied: usize,
    pub deletes: usize,
    pub uploads: usize,
}

struct Entry {
    node: Node,
    content: Vec<u8>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Entry>,
    /// parent id -> child ids in creation order
    children: HashMap<String, Vec<String>>,
    failing_lists: HashSet<String>,
    failing_copies: HashSet<String>,
    failing_creates: HashSet<String>,
}

/// In-memory store for testing.
///
/// Listings return children in creation order. Failures can be injected per
/// node, and the whole store can be switched to `Unavailable`.
pub struct InMemoryStore {
    state: RwLock<State>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
    fail_uploads: AtomicBool,
    yield_on_calls: AtomicBool,
    lists: AtomicUsize,
    folders_created: AtomicUsize,
    files_copied: AtomicUsize,
    deletes: AtomicUsize,
    uploads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_id: AtomicUsize::new(1),
            unavailable: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            yield_on_calls: AtomicBool::new(false),
            lists: AtomicUsize::new(0),
            folders_created: AtomicUsize::new(0),
            files_copied: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> String {
        format!("node-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(SyncError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Entry point of every gateway call.
    async fn enter(&self) -> Result<()> {
        if self.yield_on_calls.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        self.check_available()
    }

    fn insert(
        &self,
        id: String,
        parent_id: Option<&str>,
        name: &str,
        kind: NodeKind,
        content: Vec<u8>,
    ) -> Node {
        let node = Node {
            id: id.clone(),
            name: name.to_string(),
            kind,
            parent_id: parent_id.map(str::to_string),
        };
        let mut state = self.write_state();
        if let Some(parent) = parent_id {
            state.children.entry(parent.to_string()).or_default().push(id.clone());
        }
        state.nodes.insert(
            id,
            Entry {
                node: node.clone(),
                content,
            },
        );
        node
    }

    /// Add a root folder (no parent) and return its id.
    pub fn add_root(&self, name: &str) -> String {
        let id = self.allocate_id();
        self.insert(id, None, name, NodeKind::Folder, Vec::new()).id
    }

    /// Add a root folder with a caller-chosen id.
    pub fn add_root_with_id(&self, id: &str, name: &str) -> String {
        self.insert(id.to_string(), None, name, NodeKind::Folder, Vec::new()).id
    }

    /// Add a folder directly, bypassing counters. Returns its id.
    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        let id = self.allocate_id();
        self.insert(id, Some(parent_id), name, NodeKind::Folder, Vec::new()).id
    }

    /// Add a file directly, bypassing counters. Returns its id.
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> String {
        let id = self.allocate_id();
        self.insert(id, Some(parent_id), name, NodeKind::File, content.to_vec()).id
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Make `list_children(node_id)` fail with a remote error.
    pub fn fail_listing(&self, node_id: &str) {
        self.write_state().failing_lists.insert(node_id.to_string());
    }

    /// Make copies of `file_id` fail with a remote error.
    pub fn fail_copies_of(&self, file_id: &str) {
        self.write_state().failing_copies.insert(file_id.to_string());
    }

    /// Make folder creation under `parent_id` fail with a remote error.
    pub fn fail_creates_under(&self, parent_id: &str) {
        self.write_state().failing_creates.insert(parent_id.to_string());
    }

    /// Make every upload fail with a remote error.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    /// Yield to the scheduler at the start of every gateway call, so
    /// concurrent callers interleave the way they do against a real store.
    pub fn set_yield_on_calls(&self, enabled: bool) {
        self.yield_on_calls.store(enabled, Ordering::Relaxed);
    }

    pub fn counts(&self) -> OpCounts {
        OpCounts {
            lists: self.lists.load(Ordering::Relaxed),
            folders_created: self.folders_created.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
        }
    }

    /// Direct children without going through the gateway (no counters, no failures).
    pub fn children_of(&self, parent_id: &str) -> Vec<Node> {
        let state = self.read_state();
        state
            .children
            .get(parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.nodes.get(id).map(|e| e.node.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Children of `parent_id` with exactly this name.
    pub fn children_named(&self, parent_id: &str, name: &str) -> Vec<Node> {
        self.children_of(parent_id)
            .into_iter()
            .filter(|n| n.name == name)
            .collect()
    }

    /// Follow a path of names from `root_id`, taking the first match at each step.
    pub fn find_path(&self, root_id: &str, names: &[&str]) -> Option<Node> {
        let mut current: Option<Node> = None;
        let mut parent = root_id.to_string();
        for name in names {
            let node = self.children_named(&parent, name).into_iter().next()?;
            parent = node.id.clone();
            current = Some(node);
        }
        current
    }

    /// Every descendant of `root_id` as a slash-joined path of names, sorted.
    pub fn tree_paths(&self, root_id: &str) -> Vec<String> {
        let mut paths = Vec::new();
        let mut stack = vec![(root_id.to_string(), String::new())];
        while let Some((id, prefix)) = stack.pop() {
            for child in self.children_of(&id) {
                let path = if prefix.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", prefix, child.name)
                };
                if child.is_folder() {
                    stack.push((child.id.clone(), path.clone()));
                }
                paths.push(path);
            }
        }
        paths.sort();
        paths
    }

    pub fn content(&self, node_id: &str) -> Option<Vec<u8>> {
        self.read_state().nodes.get(node_id).map(|e| e.content.clone())
    }

    fn remove_recursive(state: &mut State, node_id: &str) {
        if let Some(children) = state.children.remove(node_id) {
            for child in children {
                Self::remove_recursive(state, &child);
            }
        }
        state.nodes.remove(node_id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list_children(&self, node_id: &str) -> Result<Vec<Node>> {
        self.enter().await?;
        self.lists.fetch_add(1, Ordering::Relaxed);
        if self.read_state().failing_lists.contains(node_id) {
            return Err(SyncError::Remote(format!("listing {} failed", node_id)));
        }
        Ok(self.children_of(node_id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node> {
        self.enter().await?;
        {
            let state = self.read_state();
            if state.failing_creates.contains(parent_id) {
                return Err(SyncError::Remote(format!("create under {} failed", parent_id)));
            }
            if !state.nodes.contains_key(parent_id) {
                return Err(SyncError::NotFound(parent_id.to_string()));
            }
        }
        let id = self.allocate_id();
        let node = self.insert(id, Some(parent_id), name, NodeKind::Folder, Vec::new());
        self.folders_created.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    async fn copy_file(
        &self,
        file_id: &str,
        dest_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<Node> {
        self.enter().await?;
        let (name, content) = {
            let state = self.read_state();
            if state.failing_copies.contains(file_id) {
                return Err(SyncError::Remote(format!("copy of {} failed", file_id)));
            }
            if !state.nodes.contains_key(dest_parent_id) {
                return Err(SyncError::NotFound(dest_parent_id.to_string()));
            }
            let source = state
                .nodes
                .get(file_id)
                .ok_or_else(|| SyncError::NotFound(file_id.to_string()))?;
            if source.node.is_folder() {
                return Err(SyncError::Remote(format!("{} is a folder", file_id)));
            }
            (
                new_name.unwrap_or(source.node.name.as_str()).to_string(),
                source.content.clone(),
            )
        };
        let id = self.allocate_id();
        let node = self.insert(id, Some(dest_parent_id), &name, NodeKind::File, content);
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        self.enter().await?;
        let mut state = self.write_state();
        let parent = match state.nodes.get(node_id) {
            Some(entry) => entry.node.parent_id.clone(),
            None => return Ok(()),
        };
        if let Some(parent) = parent {
            if let Some(siblings) = state.children.get_mut(&parent) {
                siblings.retain(|id| id != node_id);
            }
        }
        Self::remove_recursive(&mut state, node_id);
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_metadata(&self, node_id: &str) -> Result<Option<Node>> {
        self.enter().await?;
        Ok(self.read_state().nodes.get(node_id).map(|e| e.node.clone()))
    }

    async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        _mime_type: &str,
    ) -> Result<Node> {
        self.enter().await?;
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(SyncError::Remote(format!("upload of {} failed", name)));
        }
        if !self.read_state().nodes.contains_key(parent_id) {
            return Err(SyncError::NotFound(parent_id.to_string()));
        }
        let id = self.allocate_id();
        let node = self.insert(id, Some(parent_id), name, NodeKind::File, content.to_vec());
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    fn node_link(&self, node_id: &str, _kind: NodeKind) -> String {
        format!("memory://{}", node_id)
    }
}

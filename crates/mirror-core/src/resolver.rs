//! Folder resolution: find a child folder by name, creating it if absent.
//!
//! Exact lookups are the hot path (the same task folder is uploaded to over
//! and over) and go through an add-only `(parent, name) -> id` cache. Prefix
//! lookups match `name` or `name + " ..."` and always re-query, since the
//! folder they should bind to can gain a descriptive suffix later.

use crate::error::{Result, SyncError};
use crate::events::{self, EventBus, MirrorEvent};
use crate::store::{Node, SharedStore};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Add-only lookup cache keyed by `(parent_id, exact_name)`.
///
/// Entries are never mutated or evicted; concurrent writers racing on the
/// same key both store an id for a folder with that exact name.
#[derive(Debug, Default)]
pub struct FolderCache {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, parent_id: &str, name: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(parent_id.to_string(), name.to_string()))
            .cloned()
    }

    pub fn insert(&self, parent_id: &str, name: &str, folder_id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (parent_id.to_string(), name.to_string()),
                folder_id.to_string(),
            );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Name must match exactly; cached.
    Exact,
    /// Name may carry a descriptive suffix after a space; never cached.
    Prefix,
}

pub struct PathResolver {
    store: SharedStore,
    cache: Arc<FolderCache>,
    events: Option<Arc<EventBus>>,
}

impl PathResolver {
    pub fn new(store: SharedStore, cache: Arc<FolderCache>) -> Self {
        Self {
            store,
            cache,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache(&self) -> &Arc<FolderCache> {
        &self.cache
    }

    /// Return the id of the child folder of `parent_id` matching `name`,
    /// creating a folder literally named `name` when nothing matches.
    pub async fn resolve(&self, parent_id: &str, name: &str, mode: MatchMode) -> Result<String> {
        match mode {
            MatchMode::Exact => self.resolve_exact(parent_id, name).await,
            MatchMode::Prefix => self.resolve_prefix(parent_id, name).await,
        }
    }

    async fn resolve_exact(&self, parent_id: &str, name: &str) -> Result<String> {
        if let Some(id) = self.cache.get(parent_id, name) {
            debug!("Using cached folder {} under {}", name, parent_id);
            return Ok(id);
        }

        let folders = self.list_folders(parent_id).await?;
        if let Some(found) = pick_exact(&folders, name) {
            debug!("Found existing folder {} ({})", name, found.id);
            self.cache.insert(parent_id, name, &found.id);
            return Ok(found.id.clone());
        }

        let created = self.create(parent_id, name).await?;
        self.cache.insert(parent_id, name, &created);
        Ok(created)
    }

    async fn resolve_prefix(&self, parent_id: &str, name: &str) -> Result<String> {
        let folders = self.list_folders(parent_id).await?;
        if let Some(found) = pick_prefix(&folders, name) {
            debug!("Prefix {} matched folder {} ({})", name, found.name, found.id);
            return Ok(found.id.clone());
        }

        match self.create(parent_id, name).await {
            Ok(id) => Ok(id),
            Err(SyncError::Unavailable) => Err(SyncError::Unavailable),
            Err(e) => {
                warn!("No folder for prefix {} under {}: {}", name, parent_id, e);
                Err(SyncError::AmbiguousMatch {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Child folders of `parent_id`. Listing failures read as "no children",
    /// except `Unavailable`, which short-circuits.
    async fn list_folders(&self, parent_id: &str) -> Result<Vec<Node>> {
        match self.store.list_children(parent_id).await {
            Ok(children) => Ok(children.into_iter().filter(Node::is_folder).collect()),
            Err(SyncError::Unavailable) => Err(SyncError::Unavailable),
            Err(e) => {
                warn!("Listing {} failed, treating as empty: {}", parent_id, e);
                Ok(Vec::new())
            }
        }
    }

    async fn create(&self, parent_id: &str, name: &str) -> Result<String> {
        let node = self.store.create_folder(parent_id, name).await?;
        info!("Created folder {} ({}) under {}", name, node.id, parent_id);
        events::emit(
            &self.events,
            MirrorEvent::FolderCreated {
                parent_id: parent_id.to_string(),
                folder_id: node.id.clone(),
                name: name.to_string(),
            },
        );
        Ok(node.id)
    }
}

/// Exact-name match. Duplicates resolve to the smallest id so repeated
/// lookups agree on one canonical folder.
fn pick_exact<'a>(folders: &'a [Node], name: &str) -> Option<&'a Node> {
    folders
        .iter()
        .filter(|n| n.name == name)
        .min_by(|a, b| a.id.cmp(&b.id))
}

/// `name` itself, else the lexicographically first `name + " ..."`.
fn pick_prefix<'a>(folders: &'a [Node], name: &str) -> Option<&'a Node> {
    if let Some(exact) = pick_exact(folders, name) {
        return Some(exact);
    }
    let with_suffix = format!("{} ", name);
    folders
        .iter()
        .filter(|n| n.name.starts_with(&with_suffix))
        .min_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)))
}

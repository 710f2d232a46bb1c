//! Table of contents for a project tree.
//!
//! The document is regenerated from scratch on every run: scan, render,
//! delete whatever carries the reserved name, upload. Runs for the same root
//! are serialized through [`RootLocks`], so there is at most one document per
//! root.

use crate::events::{self, EventBus, MirrorEvent};
use crate::scanner::{TreeEntry, TreeScanner};
use crate::store::{NodeKind, SharedStore};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TocOptions {
    /// Reserved file name; anything in the root with this name is replaced
    pub filename: String,
    pub heading: String,
    pub max_depth: usize,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self {
            filename: "DAFTAR ISI.md".to_string(),
            heading: "DAFTAR ISI".to_string(),
            max_depth: 3,
        }
    }
}

fn escape(name: &str) -> String {
    name.replace('[', "\\[").replace(']', "\\]")
}

/// Render scanned entries as Markdown. Level 0 entries are headings, level 1
/// sub-headings, deeper levels an indented list.
pub fn render_toc(
    heading: &str,
    title: &str,
    entries: &[TreeEntry],
    link: impl Fn(&TreeEntry) -> String,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", heading);
    let _ = writeln!(out);
    let _ = writeln!(out, "**{}**", title);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "_Generated {}_",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    fn walk(out: &mut String, entries: &[TreeEntry], depth: usize, link: &dyn Fn(&TreeEntry) -> String) {
        for entry in entries {
            let item = format!("[{}]({})", escape(&entry.name), link(entry));
            match depth {
                0 => {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "## {}", item);
                }
                1 => {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "### {}", item);
                    let _ = writeln!(out);
                }
                _ => {
                    let _ = writeln!(out, "{}- {}", "  ".repeat(depth - 2), item);
                }
            }
            walk(out, &entry.children, depth + 1, link);
        }
    }
    walk(&mut out, entries, 0, &link);

    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = writeln!(out);
    let _ = writeln!(out, "_This file is regenerated automatically. Manual edits are overwritten._");
    out
}

/// One async lock per root id. Share it between every materializer that can
/// write to the same roots.
#[derive(Default)]
pub struct RootLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RootLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn for_root(&self, root_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Nobody else holds or waits on these
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(root_id.to_string()).or_default())
    }

    /// Roots with a run in progress or waiting.
    pub fn active(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.len()
    }
}

pub struct TocMaterializer {
    store: SharedStore,
    options: TocOptions,
    events: Option<Arc<EventBus>>,
    locks: Arc<RootLocks>,
}

impl TocMaterializer {
    pub fn new(store: SharedStore, options: TocOptions) -> Self {
        Self {
            store,
            options,
            events: None,
            locks: Arc::new(RootLocks::new()),
        }
    }

    pub fn with_locks(mut self, locks: Arc<RootLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &TocOptions {
        &self.options
    }

    /// Rebuild the table of contents in `root_id`. True only if the new
    /// document was uploaded.
    pub async fn regenerate(&self, root_id: &str, title: &str) -> bool {
        let lock = self.locks.for_root(root_id);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Table of contents for {} is being regenerated, waiting", root_id);
                lock.lock().await
            }
        };
        info!("Regenerating table of contents for {} ({})", title, root_id);

        let entries = TreeScanner::new(self.store.clone())
            .scan_tree(root_id, self.options.max_depth)
            .await;
        if entries.is_empty() {
            warn!("No folders under {}, nothing to index", root_id);
            return false;
        }

        let store = &self.store;
        let document = render_toc(
            &self.options.heading,
            title,
            &entries,
            |entry| store.node_link(&entry.id, NodeKind::Folder),
            Utc::now(),
        );

        self.delete_existing(root_id).await;

        match self
            .store
            .upload_file(root_id, &self.options.filename, document.as_bytes(), "text/markdown")
            .await
        {
            Ok(node) => {
                let count: usize = entries.iter().map(TreeEntry::count).sum();
                info!("Uploaded {} ({}) with {} entries", self.options.filename, node.id, count);
                events::emit(
                    &self.events,
                    MirrorEvent::TocPublished {
                        root_id: root_id.to_string(),
                        file_id: node.id,
                        entries: count,
                    },
                );
                true
            }
            Err(e) => {
                warn!("Upload of {} to {} failed: {}", self.options.filename, root_id, e);
                false
            }
        }
    }

    /// Best-effort removal of previous documents with the reserved name.
    async fn delete_existing(&self, root_id: &str) {
        let children = match self.store.list_children(root_id).await {
            Ok(children) => children,
            Err(e) => {
                warn!("Could not look for an old {}: {}", self.options.filename, e);
                return;
            }
        };
        for stale in children
            .into_iter()
            .filter(|n| !n.is_folder() && n.name == self.options.filename)
        {
            match self.store.delete_node(&stale.id).await {
                Ok(()) => info!("Deleted old {} ({})", stale.name, stale.id),
                Err(e) => warn!("Could not delete old {} ({}): {}", stale.name, stale.id, e),
            }
        }
    }
}

//! Template tree cloning.
//!
//! `clone_tree` walks source and destination side by side, creating missing
//! folders and copying missing files. Everything is keyed by name, so running
//! it twice is a no-op the second time. File copies go out in fixed-size
//! batches with a pause in between to stay under the store's rate limits.
//!
//! `clone_dispatched` only guarantees the top level and hands each top-level
//! subtree to an external executor via [`CloneSignal`].

use crate::error::SyncError;
use crate::events::{self, EventBus, MirrorEvent};
use crate::signal::{CloneSignal, PopulateRequest};
use crate::store::{Node, SharedStore};

use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Concurrent copies per batch (also concurrent signals per batch)
    pub batch_size: usize,
    /// Pause between batches
    pub batch_pause: Duration,
    /// Recurse into sibling folders concurrently instead of one at a time
    pub concurrent_branches: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_secs(1),
            concurrent_branches: false,
        }
    }
}

/// What a clone run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneReport {
    pub folders_created: usize,
    pub folders_reused: usize,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub copy_failures: usize,
    pub subtrees_dispatched: usize,
}

impl CloneReport {
    pub fn merge(&mut self, other: CloneReport) {
        self.folders_created += other.folders_created;
        self.folders_reused += other.folders_reused;
        self.files_copied += other.files_copied;
        self.files_skipped += other.files_skipped;
        self.copy_failures += other.copy_failures;
        self.subtrees_dispatched += other.subtrees_dispatched;
    }

    /// True when the run changed nothing in the destination.
    pub fn is_noop(&self) -> bool {
        self.folders_created == 0 && self.files_copied == 0 && self.subtrees_dispatched == 0
    }
}

/// Destination children split by kind and keyed by name.
#[derive(Default)]
struct DestIndex {
    folders: HashMap<String, String>,
    files: HashSet<String>,
}

impl DestIndex {
    fn build(children: Vec<Node>) -> Self {
        let mut index = DestIndex::default();
        for child in children {
            if child.is_folder() {
                // Smallest id wins when names collide, same as the resolver
                match index.folders.get(&child.name) {
                    Some(existing) if *existing <= child.id => {}
                    _ => {
                        index.folders.insert(child.name, child.id);
                    }
                }
            } else {
                index.files.insert(child.name);
            }
        }
        index
    }
}

pub struct TreeCloner {
    store: SharedStore,
    options: CloneOptions,
    events: Option<Arc<EventBus>>,
}

impl TreeCloner {
    pub fn new(store: SharedStore, options: CloneOptions) -> Self {
        Self {
            store,
            options,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Make `dest_id` contain everything `source_id` contains.
    pub async fn clone_tree(&self, source_id: &str, dest_id: &str) -> CloneReport {
        info!("Cloning {} into {}", source_id, dest_id);
        let report = self.clone_pair(source_id.to_string(), dest_id.to_string()).await;
        info!(
            created = report.folders_created,
            reused = report.folders_reused,
            copied = report.files_copied,
            skipped = report.files_skipped,
            failed = report.copy_failures,
            "Clone of {} finished",
            source_id
        );
        report
    }

    fn clone_pair(&self, source_id: String, dest_id: String) -> BoxFuture<'_, CloneReport> {
        Box::pin(async move {
            let mut report = CloneReport::default();

            let source_children = match self.store.list_children(&source_id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Could not list source {}: {}", source_id, e);
                    return report;
                }
            };
            if source_children.is_empty() {
                return report;
            }

            // Without a destination listing nothing can be re-checked, so
            // creating here could duplicate what already exists
            let dest_children = match self.store.list_children(&dest_id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Could not list destination {}, skipping subtree: {}", dest_id, e);
                    return report;
                }
            };
            let mut index = DestIndex::build(dest_children);

            let mut branches = Vec::new();
            let mut queued = Vec::new();
            for child in source_children {
                if child.is_folder() {
                    if let Some(existing) = index.folders.get(&child.name) {
                        report.folders_reused += 1;
                        branches.push((child.id, existing.clone()));
                        continue;
                    }
                    match self.create_folder(&dest_id, &child.name).await {
                        Ok(created) => {
                            report.folders_created += 1;
                            index.folders.insert(child.name, created.clone());
                            branches.push((child.id, created));
                        }
                        Err(e) => warn!("Could not create {} in {}: {}", child.name, dest_id, e),
                    }
                } else if index.files.insert(child.name.clone()) {
                    queued.push(child);
                } else {
                    debug!("Skipping existing file {}", child.name);
                    report.files_skipped += 1;
                }
            }

            report.merge(self.copy_batched(&dest_id, queued).await);

            if self.options.concurrent_branches {
                let reports = join_all(
                    branches
                        .into_iter()
                        .map(|(source, dest)| self.clone_pair(source, dest)),
                )
                .await;
                for branch in reports {
                    report.merge(branch);
                }
            } else {
                for (source, dest) in branches {
                    report.merge(self.clone_pair(source, dest).await);
                }
            }

            report
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, SyncError> {
        let node = self.store.create_folder(parent_id, name).await?;
        debug!("Created folder {} ({})", name, node.id);
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

    async fn copy_batched(&self, dest_id: &str, files: Vec<Node>) -> CloneReport {
        let mut report = CloneReport::default();
        let batch_size = self.options.batch_size.max(1);

        for (i, batch) in files.chunks(batch_size).enumerate() {
            if i > 0 {
                self.pause().await;
            }
            let results = join_all(
                batch
                    .iter()
                    .map(|file| self.store.copy_file(&file.id, dest_id, Some(file.name.as_str()))),
            )
            .await;

            for (file, result) in batch.iter().zip(results) {
                match result {
                    Ok(copied) => {
                        report.files_copied += 1;
                        events::emit(
                            &self.events,
                            MirrorEvent::FileCopied {
                                source_id: file.id.clone(),
                                file_id: copied.id,
                                name: file.name.clone(),
                            },
                        );
                    }
                    Err(e) => {
                        warn!("Copy of {} ({}) failed: {}", file.name, file.id, e);
                        report.copy_failures += 1;
                        events::emit(
                            &self.events,
                            MirrorEvent::CopyFailed {
                                source_id: file.id.clone(),
                                name: file.name.clone(),
                                reason: e.to_string(),
                            },
                        );
                    }
                }
            }
        }

        report
    }

    async fn pause(&self) {
        if !self.options.batch_pause.is_zero() {
            tokio::time::sleep(self.options.batch_pause).await;
        }
    }

    /// Large-template mode: ensure top-level folders and files, then ask the
    /// executor to populate each top-level subtree. Does not wait for the
    /// executor to finish.
    pub async fn clone_dispatched(
        &self,
        source_id: &str,
        dest_id: &str,
        label: &str,
        signal: &dyn CloneSignal,
    ) -> CloneReport {
        let mut report = CloneReport::default();

        let source_children = match self.store.list_children(source_id).await {
            Ok(children) => children,
            Err(e) => {
                warn!("Could not list template {}: {}", source_id, e);
                return report;
            }
        };

        let mut requests = Vec::new();
        let mut files = Vec::new();
        for child in source_children {
            if !child.is_folder() {
                files.push(child);
                continue;
            }
            // Re-list for every folder: a concurrent run may have created it
            let existing = match self.store.list_children(dest_id).await {
                Ok(children) => DestIndex::build(children).folders.remove(&child.name),
                Err(e) => {
                    warn!("Could not list destination {}, skipping {}: {}", dest_id, child.name, e);
                    continue;
                }
            };
            let dest_folder = match existing {
                Some(id) => {
                    report.folders_reused += 1;
                    id
                }
                None => match self.create_folder(dest_id, &child.name).await {
                    Ok(id) => {
                        report.folders_created += 1;
                        id
                    }
                    Err(e) => {
                        warn!("Could not create {} in {}: {}", child.name, dest_id, e);
                        continue;
                    }
                },
            };
            requests.push(PopulateRequest {
                source_id: child.id,
                destination_id: dest_folder,
                label: format!("{}/{}", label, child.name),
            });
        }

        if !files.is_empty() {
            let existing_files = match self.store.list_children(dest_id).await {
                Ok(children) => DestIndex::build(children).files,
                Err(e) => {
                    warn!("Could not list destination {}, skipping files: {}", dest_id, e);
                    files.clear();
                    HashSet::new()
                }
            };
            let (present, missing): (Vec<_>, Vec<_>) = files
                .into_iter()
                .partition(|f| existing_files.contains(&f.name));
            report.files_skipped += present.len();
            report.merge(self.copy_batched(dest_id, missing).await);
        }

        let batch_size = self.options.batch_size.max(1);
        for (i, batch) in requests.chunks(batch_size).enumerate() {
            if i > 0 {
                self.pause().await;
            }
            let results = join_all(batch.iter().map(|request| signal.populate(request))).await;
            for (request, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => {
                        info!("Dispatched {} to executor", request.label);
                        report.subtrees_dispatched += 1;
                        events::emit(
                            &self.events,
                            MirrorEvent::SubtreeDispatched {
                                source_id: request.source_id.clone(),
                                destination_id: request.destination_id.clone(),
                                label: request.label.clone(),
                            },
                        );
                    }
                    Err(e) => {
                        warn!("Executor signal for {} failed: {}", request.label, e);
                        events::emit(
                            &self.events,
                            MirrorEvent::BackgroundFailed {
                                task: format!("populate {}", request.label),
                                reason: e.to_string(),
                            },
                        );
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn fast() -> CloneOptions {
        CloneOptions {
            batch_size: 2,
            batch_pause: Duration::ZERO,
            concurrent_branches: false,
        }
    }

    /// Template:
    /// Element 1/1.1 Policy/policy.docx
    /// Element 1/readme.txt
    /// Element 2/
    /// cover.pdf
    fn template(store: &InMemoryStore) -> String {
        let root = store.add_root("Template");
        let e1 = store.add_folder(&root, "Element 1");
        let policy = store.add_folder(&e1, "1.1 Policy");
        store.add_file(&policy, "policy.docx", b"policy");
        store.add_file(&e1, "readme.txt", b"readme");
        store.add_folder(&root, "Element 2");
        store.add_file(&root, "cover.pdf", b"cover");
        root
    }

    #[tokio::test]
    async fn clone_copies_whole_tree() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        let cloner = TreeCloner::new(store.clone(), fast());

        let report = cloner.clone_tree(&source, &dest).await;

        assert_eq!(report.folders_created, 3);
        assert_eq!(report.files_copied, 3);
        assert_eq!(store.tree_paths(&dest), store.tree_paths(&source));
    }

    #[tokio::test]
    async fn second_clone_changes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        let cloner = TreeCloner::new(store.clone(), fast());

        cloner.clone_tree(&source, &dest).await;
        let before = store.counts();
        let report = cloner.clone_tree(&source, &dest).await;
        let after = store.counts();

        assert!(report.is_noop());
        assert_eq!(report.folders_reused, 3);
        assert_eq!(report.files_skipped, 3);
        assert_eq!(after.folders_created, before.folders_created);
        assert_eq!(after.files_copied, before.files_copied);
    }

    #[tokio::test]
    async fn copy_failure_does_not_abort() {
        let store = Arc::new(InMemoryStore::new());
        let source = store.add_root("Template");
        let bad = store.add_file(&source, "a.txt", b"a");
        for name in ["b.txt", "c.txt", "d.txt"] {
            store.add_file(&source, name, b"x");
        }
        store.fail_copies_of(&bad);
        let dest = store.add_root("Project");

        let bus = Arc::new(EventBus::new());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let _sub = bus.subscribe(move |event| {
            if let MirrorEvent::CopyFailed { name, .. } = event {
                sink.lock().unwrap().push(name);
            }
        });

        let report = TreeCloner::new(store.clone(), fast())
            .with_events(bus)
            .clone_tree(&source, &dest)
            .await;

        assert_eq!(report.files_copied, 3);
        assert_eq!(report.copy_failures, 1);
        assert_eq!(failures.lock().unwrap().as_slice(), &["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_branches_produce_same_tree() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        let options = CloneOptions {
            concurrent_branches: true,
            ..fast()
        };

        TreeCloner::new(store.clone(), options).clone_tree(&source, &dest).await;
        assert_eq!(store.tree_paths(&dest), store.tree_paths(&source));
    }

    #[tokio::test]
    async fn unlistable_destination_is_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        store.fail_listing(&dest);

        let report = TreeCloner::new(store.clone(), fast()).clone_tree(&source, &dest).await;

        assert_eq!(report, CloneReport::default());
        assert!(store.children_of(&dest).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_paced() {
        let store = Arc::new(InMemoryStore::new());
        let source = store.add_root("Template");
        for i in 0..5 {
            store.add_file(&source, &format!("f{}.txt", i), b"x");
        }
        let dest = store.add_root("Project");
        let options = CloneOptions {
            batch_size: 2,
            batch_pause: Duration::from_secs(1),
            concurrent_branches: false,
        };

        let started = tokio::time::Instant::now();
        let report = TreeCloner::new(store.clone(), options).clone_tree(&source, &dest).await;

        assert_eq!(report.files_copied, 5);
        // 3 batches, 2 pauses
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[derive(Default)]
    struct RecordingSignal {
        requests: Mutex<Vec<PopulateRequest>>,
        reject: bool,
    }

    #[async_trait]
    impl CloneSignal for RecordingSignal {
        async fn populate(&self, request: &PopulateRequest) -> Result<(), SignalError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.reject {
                Err(SignalError::Rejected(500))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn dispatched_clone_only_builds_top_level() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        let existing = store.add_folder(&dest, "Element 2");
        let signal = RecordingSignal::default();

        let report = TreeCloner::new(store.clone(), fast())
            .clone_dispatched(&source, &dest, "Acme", &signal)
            .await;

        assert_eq!(report.folders_created, 1);
        assert_eq!(report.folders_reused, 1);
        assert_eq!(report.files_copied, 1);
        assert_eq!(report.subtrees_dispatched, 2);
        assert_eq!(
            store.tree_paths(&dest),
            vec!["Element 1", "Element 2", "cover.pdf"]
        );

        let requests = signal.requests.lock().unwrap();
        assert_eq!(requests[0].label, "Acme/Element 1");
        assert_eq!(requests[1].destination_id, existing);
    }

    #[tokio::test]
    async fn rejected_signal_is_reported_not_raised() {
        let store = Arc::new(InMemoryStore::new());
        let source = template(&store);
        let dest = store.add_root("Project");
        let signal = RecordingSignal {
            reject: true,
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new());
        let failed = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&failed);
        let _sub = bus.subscribe(move |event| {
            if matches!(event, MirrorEvent::BackgroundFailed { .. }) {
                *sink.lock().unwrap() += 1;
            }
        });

        let report = TreeCloner::new(store.clone(), fast())
            .with_events(bus)
            .clone_dispatched(&source, &dest, "Acme", &signal)
            .await;

        assert_eq!(report.subtrees_dispatched, 0);
        assert_eq!(*failed.lock().unwrap(), 2);
    }
}

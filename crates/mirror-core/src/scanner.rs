//! Depth-bounded tree scanning.
//!
//! Three views of the same walk: a nested folder tree for the table of
//! contents, a flat list of task codes found in folder names, and a flat
//! list of files. A listing that fails is logged and read as "no children";
//! only `Unavailable` is worth mentioning louder, and even that never aborts.

use crate::code::{Category, compare_names, looks_like_code};
use crate::store::{Node, SharedStore};

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

/// A folder in the nested scan, with its sorted subfolders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub id: String,
    pub name: String,
    pub children: Vec<TreeEntry>,
}

impl TreeEntry {
    /// Number of entries in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeEntry::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEntry {
    pub code: String,
    pub title: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    /// Slash-joined folder names from the scan root to the file's parent
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TaskScanOptions {
    pub max_depth: usize,
    /// Top-level folder whose uncoded children get synthetic `0.N` codes
    pub uncoded_folder: String,
}

impl Default for TaskScanOptions {
    fn default() -> Self {
        Self {
            max_depth: 8,
            uncoded_folder: "Element 0".to_string(),
        }
    }
}

pub struct TreeScanner {
    store: SharedStore,
}

impl TreeScanner {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Nested folder tree under `root_id`. Level 0 is the root's children;
    /// folders below `max_depth` are not listed.
    pub async fn scan_tree(&self, root_id: &str, max_depth: usize) -> Vec<TreeEntry> {
        let walk = Walk::new(&self.store);
        walk.scan_level(root_id.to_string(), 0, max_depth).await
    }

    /// Every task code found in folder names under `root_id`, in walk order.
    pub async fn scan_tasks(&self, root_id: &str, options: &TaskScanOptions) -> Vec<TaskEntry> {
        let walk = Walk::new(&self.store);
        let mut tasks = Vec::new();
        walk.scan_tasks_level(root_id.to_string(), None, 0, options, &mut tasks)
            .await;
        tasks
    }

    /// Every file under `root_id` down to `max_depth` folder levels, skipping
    /// files named `skip_name`.
    pub async fn collect_files(
        &self,
        root_id: &str,
        max_depth: usize,
        skip_name: Option<&str>,
    ) -> Vec<FileRecord> {
        let walk = Walk::new(&self.store);
        let mut files = Vec::new();
        walk.collect_level(root_id.to_string(), String::new(), 0, max_depth, skip_name, &mut files)
            .await;
        files
    }
}

/// State of a single scan. Each node is listed at most once per walk.
struct Walk<'s> {
    store: &'s SharedStore,
    visited: Mutex<HashSet<String>>,
}

impl<'s> Walk<'s> {
    fn new(store: &'s SharedStore) -> Self {
        Self {
            store,
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Children of `node_id`, or nothing if it was already visited or the
    /// listing failed.
    async fn children(&self, node_id: &str) -> Vec<Node> {
        let first_visit = self
            .visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node_id.to_string());
        if !first_visit {
            debug!("Already scanned {}, skipping", node_id);
            return Vec::new();
        }
        match self.store.list_children(node_id).await {
            Ok(children) => children,
            Err(e) if e.is_unavailable() => {
                warn!("Store unavailable while scanning {}", node_id);
                Vec::new()
            }
            Err(e) => {
                warn!("Listing {} failed, treating as childless: {}", node_id, e);
                Vec::new()
            }
        }
    }

    async fn sorted_folders(&self, node_id: &str) -> Vec<Node> {
        let mut folders: Vec<Node> = self
            .children(node_id)
            .await
            .into_iter()
            .filter(Node::is_folder)
            .collect();
        folders.sort_by(|a, b| compare_names(&a.name, &b.name));
        folders
    }

    fn scan_level(
        &self,
        node_id: String,
        depth: usize,
        max_depth: usize,
    ) -> BoxFuture<'_, Vec<TreeEntry>> {
        Box::pin(async move {
            if depth >= max_depth {
                return Vec::new();
            }
            let mut entries = Vec::new();
            for folder in self.sorted_folders(&node_id).await {
                let children = self.scan_level(folder.id.clone(), depth + 1, max_depth).await;
                entries.push(TreeEntry {
                    id: folder.id,
                    name: folder.name,
                    children,
                });
            }
            entries
        })
    }

    fn scan_tasks_level<'a>(
        &'a self,
        node_id: String,
        parent_name: Option<String>,
        depth: usize,
        options: &'a TaskScanOptions,
        tasks: &'a mut Vec<TaskEntry>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if depth >= options.max_depth {
                return;
            }
            // Synthetic codes only for the children of the top-level uncoded folder
            let synthesize = depth == 1
                && parent_name
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(&options.uncoded_folder));
            let mut ordinal = 1;

            for folder in self.sorted_folders(&node_id).await {
                let (candidate, remainder) = match folder.name.split_once(' ') {
                    Some((code, title)) => (code, title),
                    None => (folder.name.as_str(), ""),
                };

                let task = if looks_like_code(candidate) {
                    Some((candidate.to_string(), remainder.trim().to_string()))
                } else if synthesize {
                    let code = format!("0.{}", ordinal);
                    ordinal += 1;
                    Some((code, folder.name.clone()))
                } else {
                    None
                };

                if let Some((code, title)) = task {
                    let title = if title.is_empty() {
                        code.clone()
                    } else {
                        title.to_uppercase()
                    };
                    tasks.push(TaskEntry {
                        category: Category::for_code_str(&code),
                        code,
                        title,
                    });
                }

                self.scan_tasks_level(folder.id, Some(folder.name), depth + 1, options, &mut *tasks)
                    .await;
            }
        })
    }

    fn collect_level<'a>(
        &'a self,
        node_id: String,
        path: String,
        depth: usize,
        max_depth: usize,
        skip_name: Option<&'a str>,
        files: &'a mut Vec<FileRecord>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if depth > max_depth {
                return;
            }
            for child in self.children(&node_id).await {
                if child.is_folder() {
                    let child_path = if path.is_empty() {
                        child.name.clone()
                    } else {
                        format!("{}/{}", path, child.name)
                    };
                    self.collect_level(
                        child.id,
                        child_path,
                        depth + 1,
                        max_depth,
                        skip_name,
                        &mut *files,
                    )
                    .await;
                } else if skip_name != Some(child.name.as_str()) {
                    files.push(FileRecord {
                        id: child.id,
                        name: child.name,
                        path: path.clone(),
                    });
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn names(entries: &[TreeEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn tree_levels_are_sorted_numerically() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Project");
        let e1 = store.add_folder(&root, "Element 1");
        for name in ["1.1 A", "1.10 B", "1.2 C"] {
            store.add_folder(&e1, name);
        }

        let tree = TreeScanner::new(store.clone()).scan_tree(&root, 3).await;

        assert_eq!(names(&tree), vec!["Element 1"]);
        assert_eq!(names(&tree[0].children), vec!["1.1 A", "1.2 C", "1.10 B"]);
    }

    #[tokio::test]
    async fn tree_scan_respects_depth_and_ignores_files() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Project");
        let a = store.add_folder(&root, "Element 1");
        let b = store.add_folder(&a, "1.1");
        let c = store.add_folder(&b, "1.1.1");
        store.add_folder(&c, "1.1.1.1");
        store.add_file(&a, "notes.txt", b"");

        let tree = TreeScanner::new(store.clone()).scan_tree(&root, 3).await;

        assert_eq!(tree[0].count(), 3);
        assert!(tree[0].children[0].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn overlapping_scans_on_one_scanner_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Project");
        let a = store.add_folder(&root, "Element 1");
        store.add_folder(&a, "1.1");
        let b = store.add_folder(&root, "Element 2");
        store.add_folder(&b, "2.1");
        store.set_yield_on_calls(true);

        let scanner = TreeScanner::new(store.clone());
        let (first, second) = futures::join!(scanner.scan_tree(&root, 3), scanner.scan_tree(&root, 3));

        assert_eq!(first, second);
        assert_eq!(first.iter().map(TreeEntry::count).sum::<usize>(), 4);
    }

    #[tokio::test]
    async fn failed_listing_is_childless() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Project");
        let a = store.add_folder(&root, "Element 1");
        store.add_folder(&a, "1.1");
        store.add_folder(&root, "Element 2");
        store.fail_listing(&a);

        let tree = TreeScanner::new(store.clone()).scan_tree(&root, 3).await;

        assert_eq!(names(&tree), vec!["Element 1", "Element 2"]);
        assert!(tree[0].children.is_empty());
    }

    #[tokio::test]
    async fn uncoded_folders_get_synthetic_codes() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Template");
        let e0 = store.add_folder(&root, "ELEMENT 0");
        store.add_folder(&e0, "HSE Manual");
        store.add_folder(&e0, "Bridging Doc");

        let tasks = TreeScanner::new(store.clone())
            .scan_tasks(&root, &TaskScanOptions::default())
            .await;

        assert_eq!(
            tasks,
            vec![
                TaskEntry {
                    code: "0.1".into(),
                    title: "BRIDGING DOC".into(),
                    category: Category::CoreDocuments,
                },
                TaskEntry {
                    code: "0.2".into(),
                    title: "HSE MANUAL".into(),
                    category: Category::CoreDocuments,
                },
            ]
        );
    }

    #[tokio::test]
    async fn coded_folders_are_tasks_at_any_depth() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Template");
        let e4 = store.add_folder(&root, "Element 4");
        let committee = store.add_folder(&e4, "4.1 Committee meeting");
        store.add_folder(&committee, "4.1.1");
        store.add_folder(&committee, "Archive");

        let tasks = TreeScanner::new(store.clone())
            .scan_tasks(&root, &TaskScanOptions::default())
            .await;

        let codes: Vec<_> = tasks.iter().map(|t| (t.code.as_str(), t.title.as_str())).collect();
        assert_eq!(codes, vec![("4.1", "COMMITTEE MEETING"), ("4.1.1", "4.1.1")]);
        assert!(tasks.iter().all(|t| t.category == Category::SafetyCommittee));
    }

    #[tokio::test]
    async fn uncoded_folders_elsewhere_are_not_tasks() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Template");
        let e1 = store.add_folder(&root, "Element 1");
        store.add_folder(&e1, "Misc");

        let tasks = TreeScanner::new(store.clone())
            .scan_tasks(&root, &TaskScanOptions::default())
            .await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn collect_files_records_paths() {
        let store = Arc::new(InMemoryStore::new());
        let root = store.add_root("Project");
        let e1 = store.add_folder(&root, "Element 1");
        let policy = store.add_folder(&e1, "1.1 Policy");
        let doc = store.add_file(&policy, "policy.pdf", b"");
        store.add_file(&root, "DAFTAR ISI.md", b"");

        let files = TreeScanner::new(store.clone())
            .collect_files(&root, 8, Some("DAFTAR ISI.md"))
            .await;

        assert_eq!(
            files,
            vec![FileRecord {
                id: doc,
                name: "policy.pdf".into(),
                path: "Element 1/1.1 Policy".into(),
            }]
        );
    }
}

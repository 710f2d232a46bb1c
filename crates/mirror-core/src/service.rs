//! Entry points used by the surrounding application.
//!
//! `MirrorService` wires the store, resolver cache, event bus and dispatcher
//! together. Upload-path operations return definite results; clone and table
//! of contents runs are handed to the dispatcher and report only through logs
//! and events.

use crate::cloner::{CloneOptions, CloneReport, TreeCloner};
use crate::code::DottedCode;
use crate::dispatch::Dispatch;
use crate::error::Result;
use crate::events::{EventBus, MirrorEvent};
use crate::mapper::{self, display_path, expand};
use crate::resolver::{FolderCache, MatchMode, PathResolver};
use crate::scanner::{FileRecord, TaskEntry, TaskScanOptions, TreeScanner};
use crate::signal::CloneSignal;
use crate::store::SharedStore;
use crate::toc::{RootLocks, TocMaterializer, TocOptions};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneMode {
    /// Walk the whole template in-process.
    #[default]
    Recursive,
    /// Build the top level, then signal the executor per subtree.
    Dispatched,
}

#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Folder that holds one folder per project
    pub drive_root_id: String,
    /// Master template cloned into new projects
    pub template_root_id: String,
    pub clone_mode: CloneMode,
    pub clone: CloneOptions,
    pub toc: TocOptions,
    pub scan: TaskScanOptions,
    /// Label sent to the executor when no project name is known
    pub clone_label: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            drive_root_id: String::new(),
            template_root_id: String::new(),
            clone_mode: CloneMode::default(),
            clone: CloneOptions::default(),
            toc: TocOptions::default(),
            scan: TaskScanOptions::default(),
            clone_label: "New Project".to_string(),
        }
    }
}

/// A file to store under a project's task folder.
#[derive(Debug, Clone, Copy)]
pub struct TaskUpload<'a> {
    pub project_name: &'a str,
    /// Without a code the file goes straight into the project folder
    pub code: Option<&'a DottedCode>,
    pub title: &'a str,
    pub filename: &'a str,
    pub content: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub file_id: String,
    pub folder_id: String,
    pub project_folder_id: String,
    /// `Project/Element 4/4.3/4.3.2 Title`
    pub folder_path: String,
}

pub struct MirrorService {
    store: SharedStore,
    dispatcher: Arc<dyn Dispatch>,
    settings: Arc<MirrorSettings>,
    cache: Arc<FolderCache>,
    events: Arc<EventBus>,
    signal: Option<Arc<dyn CloneSignal>>,
    toc_locks: Arc<RootLocks>,
}

impl MirrorService {
    pub fn new(store: SharedStore, dispatcher: Arc<dyn Dispatch>, settings: MirrorSettings) -> Self {
        Self {
            store,
            dispatcher,
            settings: Arc::new(settings),
            cache: Arc::new(FolderCache::new()),
            events: Arc::new(EventBus::new()),
            signal: None,
            toc_locks: Arc::new(RootLocks::new()),
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn CloneSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Share a resolver cache with other services over the same store.
    pub fn with_cache(mut self, cache: Arc<FolderCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<FolderCache> {
        &self.cache
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    fn resolver(&self) -> PathResolver {
        PathResolver::new(self.store.clone(), self.cache.clone()).with_events(self.events.clone())
    }

    /// Make sure the folder for `code` exists under `project_root`.
    pub async fn materialize_task_folder(
        &self,
        project_root: &str,
        code: &DottedCode,
        title: &str,
    ) -> Result<String> {
        let segments = expand(code, title);
        mapper::materialize(&self.resolver(), project_root, &segments).await
    }

    pub async fn upload_file(&self, folder_id: &str, filename: &str, content: &[u8]) -> Result<String> {
        let node = self
            .store
            .upload_file(folder_id, filename, content, mime_type_for(filename))
            .await?;
        info!("Uploaded {} ({} bytes) as {}", filename, content.len(), node.id);
        Ok(node.id)
    }

    /// Exact-resolve the project folder under the drive root.
    pub async fn project_folder(&self, project_name: &str) -> Result<String> {
        self.resolver()
            .resolve(&self.settings.drive_root_id, project_name, MatchMode::Exact)
            .await
    }

    /// Create (or find) the project folder and start filling it from the template.
    pub async fn setup_project(&self, project_name: &str) -> Result<String> {
        let root = self.project_folder(project_name).await?;
        info!("Project {} lives in {}", project_name, root);
        self.spawn_clone(&root, project_name);
        Ok(root)
    }

    /// Store a file under its task folder, then refresh the project's table
    /// of contents in the background.
    pub async fn upload_task_file(&self, upload: TaskUpload<'_>) -> Result<UploadOutcome> {
        let project_root = self.project_folder(upload.project_name).await?;

        let (folder_id, folder_path) = match upload.code {
            Some(code) => {
                let segments = expand(code, upload.title);
                let folder = mapper::materialize(&self.resolver(), &project_root, &segments).await?;
                (
                    folder,
                    format!("{}/{}", upload.project_name, display_path(&segments)),
                )
            }
            None => (project_root.clone(), upload.project_name.to_string()),
        };

        let file_id = self.upload_file(&folder_id, upload.filename, upload.content).await?;
        self.trigger_toc_regeneration(&project_root, upload.project_name);

        Ok(UploadOutcome {
            file_id,
            folder_id,
            project_folder_id: project_root,
            folder_path,
        })
    }

    /// Fill `dest_root` from the template without waiting for it.
    pub fn trigger_template_clone(&self, dest_root: &str) {
        self.spawn_clone(dest_root, &self.settings.clone_label);
    }

    fn spawn_clone(&self, dest_root: &str, label: &str) {
        let store = self.store.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        let signal = self.signal.clone();
        let dest = dest_root.to_string();
        let label = label.to_string();

        let task_label = format!("clone template into {}", dest);
        self.dispatcher.dispatch(
            &task_label,
            Box::pin(async move {
                let cloner = TreeCloner::new(store, settings.clone.clone()).with_events(events.clone());
                let report = run_clone(&cloner, &settings, signal.as_deref(), &dest, &label).await;
                if report.copy_failures > 0 {
                    events.emit(MirrorEvent::BackgroundFailed {
                        task: format!("clone template into {}", dest),
                        reason: format!("{} file copies failed", report.copy_failures),
                    });
                }
            }),
        );
    }

    /// Rebuild the table of contents of `root` without waiting for it. Runs
    /// for the same root queue behind each other.
    pub fn trigger_toc_regeneration(&self, root: &str, title: &str) {
        let materializer = TocMaterializer::new(self.store.clone(), self.settings.toc.clone())
            .with_events(self.events.clone())
            .with_locks(self.toc_locks.clone());
        let events = self.events.clone();
        let root = root.to_string();
        let title = title.to_string();

        let task_label = format!("table of contents for {}", root);
        self.dispatcher.dispatch(
            &task_label,
            Box::pin(async move {
                if !materializer.regenerate(&root, &title).await {
                    warn!("Table of contents for {} was not published", root);
                    events.emit(MirrorEvent::BackgroundFailed {
                        task: format!("table of contents for {}", root),
                        reason: "not published".to_string(),
                    });
                }
            }),
        );
    }

    /// Tasks defined by the template's folder names.
    pub async fn template_tasks(&self) -> Vec<TaskEntry> {
        TreeScanner::new(self.store.clone())
            .scan_tasks(&self.settings.template_root_id, &self.settings.scan)
            .await
    }

    /// Template tasks whose code is not in `known_codes`.
    pub async fn missing_tasks(&self, known_codes: &HashSet<String>) -> Vec<TaskEntry> {
        let tasks = self.template_tasks().await;
        let total = tasks.len();
        let missing: Vec<_> = tasks
            .into_iter()
            .filter(|t| !known_codes.contains(&t.code))
            .collect();
        info!("{} of {} template tasks are missing", missing.len(), total);
        missing
    }

    /// Every file in a project, without the table of contents itself.
    pub async fn project_files(&self, project_root: &str) -> Vec<FileRecord> {
        TreeScanner::new(self.store.clone())
            .collect_files(
                project_root,
                self.settings.scan.max_depth,
                Some(self.settings.toc.filename.as_str()),
            )
            .await
    }
}

async fn run_clone(
    cloner: &TreeCloner,
    settings: &MirrorSettings,
    signal: Option<&dyn CloneSignal>,
    dest: &str,
    label: &str,
) -> CloneReport {
    match (settings.clone_mode, signal) {
        (CloneMode::Dispatched, Some(signal)) => {
            cloner
                .clone_dispatched(&settings.template_root_id, dest, label, signal)
                .await
        }
        (CloneMode::Dispatched, None) => {
            warn!("No executor configured, cloning {} in-process", dest);
            cloner.clone_tree(&settings.template_root_id, dest).await
        }
        (CloneMode::Recursive, _) => cloner.clone_tree(&settings.template_root_id, dest).await,
    }
}

fn mime_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_type_for("report.PDF"), "application/pdf");
        assert_eq!(mime_type_for("photo.final.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn clone_mode_is_lowercase_in_config() {
        let mode: CloneMode = serde_json::from_str("\"dispatched\"").unwrap();
        assert_eq!(mode, CloneMode::Dispatched);
        assert_eq!(serde_json::to_string(&CloneMode::Recursive).unwrap(), "\"recursive\"");
    }
}

//! mirror-core: Keeps a dotted-code taxonomy mirrored as a folder tree in a
//! remote hierarchical file store.
//!
//! This crate provides:
//! - The `RemoteStore` gateway trait and an in-memory implementation
//! - Folder resolution with an add-only lookup cache
//! - Expansion of dotted codes (`4.3.2.2.1`) into folder paths
//! - Idempotent template cloning with batched, paced file copies
//! - Depth-bounded tree scanning and table-of-contents publishing
//! - A `Dispatch` abstraction for fire-and-forget background work

pub mod cloner;
pub mod code;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod mapper;
pub mod resolver;
pub mod scanner;
pub mod service;
pub mod signal;
pub mod store;
pub mod toc;

pub use cloner::{CloneOptions, CloneReport, TreeCloner};
pub use code::{Category, CodeError, DottedCode};
pub use dispatch::{BackgroundTask, Dispatch, TokioDispatcher};
pub use error::{Result, SyncError};
pub use events::{EventBus, MirrorEvent, Subscription};
pub use mapper::{PathSegment, expand};
pub use resolver::{FolderCache, MatchMode, PathResolver};
pub use scanner::{FileRecord, TaskEntry, TaskScanOptions, TreeEntry, TreeScanner};
pub use service::{CloneMode, MirrorService, MirrorSettings, TaskUpload, UploadOutcome};
pub use signal::{CloneSignal, PopulateRequest, SignalError};
pub use store::{InMemoryStore, Node, NodeKind, RemoteStore, SharedStore};
pub use toc::{RootLocks, TocMaterializer, TocOptions};

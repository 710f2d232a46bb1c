//! Dotted code to folder path expansion.
//!
//! `4.3.2.2.1` + "Foto" becomes
//! `Element 4 / 4.3 / 4.3.2 / 4.3.2.2 / 4.3.2.2.1 Foto`. The element folder is
//! matched exactly; every other segment is prefix-matched so folders that
//! already carry a descriptive suffix are reused.

use crate::code::{DottedCode, sanitize_title};
use crate::error::{Result, SyncError};
use crate::resolver::{MatchMode, PathResolver};

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub mode: MatchMode,
}

impl PathSegment {
    fn exact(name: String) -> Self {
        Self {
            name,
            mode: MatchMode::Exact,
        }
    }

    fn prefix(name: String) -> Self {
        Self {
            name,
            mode: MatchMode::Prefix,
        }
    }
}

/// Folder name for the task itself: the code, plus the sanitized title when
/// anything survives sanitizing.
pub fn final_folder_name(code: &DottedCode, title: &str) -> String {
    let safe = sanitize_title(title);
    if safe.is_empty() {
        code.to_string()
    } else {
        format!("{} {}", code, safe)
    }
}

pub fn expand(code: &DottedCode, title: &str) -> Vec<PathSegment> {
    let mut segments = Vec::with_capacity(code.len() + 1);
    segments.push(PathSegment::exact(format!("Element {}", code.element())));
    segments.extend(
        code.intermediate_prefixes()
            .map(|prefix| PathSegment::prefix(prefix.to_string())),
    );
    segments.push(PathSegment::prefix(final_folder_name(code, title)));
    segments
}

pub fn display_path(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `segments` in order starting at `root_id`, returning the id of the
/// last one. Fails fast with the path up to and including the failing segment.
pub async fn materialize(
    resolver: &PathResolver,
    root_id: &str,
    segments: &[PathSegment],
) -> Result<String> {
    let mut current = root_id.to_string();
    for (i, segment) in segments.iter().enumerate() {
        match resolver.resolve(&current, &segment.name, segment.mode).await {
            Ok(id) => {
                debug!("Resolved {} -> {}", segment.name, id);
                current = id;
            }
            Err(source) => {
                let path = display_path(&segments[..=i]);
                warn!("Could not materialize {} under {}: {}", path, root_id, source);
                return Err(SyncError::Unresolved {
                    path,
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(current)
}

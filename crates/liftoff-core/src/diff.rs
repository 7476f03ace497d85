use std::collections::{HashMap, HashSet};
use std::path::Path;

use liftoff_platform::TargetOs;
use log::{debug, warn};

use crate::checksum::file_matches;
use crate::manifest::{FileEntry, Manifest};

/// Work required to move the cache directory from the cached release to the
/// remote release.
///
/// `to_download`, `to_delete` and `unchanged` partition the union of the
/// applicable paths of both manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    base_uri: String,
    pub to_download: Vec<FileEntry>,
    pub to_delete: Vec<String>,
    pub unchanged: Vec<FileEntry>,
}

/// Compute the plan that turns `cached`'s file set into `remote`'s for
/// `target`.
///
/// Entries tagged for another operating system take no part in the plan.
#[must_use]
pub fn plan(cached: Option<&Manifest>, remote: &Manifest, target: TargetOs) -> SyncPlan {
    let previous: HashMap<&str, &FileEntry> = cached
        .map(|manifest| {
            manifest
                .applicable_files(target)
                .map(|entry| (entry.path.as_str(), entry))
                .collect()
        })
        .unwrap_or_default();

    let mut to_download = Vec::new();
    let mut unchanged = Vec::new();
    let mut remote_paths = HashSet::new();

    for entry in remote.applicable_files(target) {
        remote_paths.insert(entry.path.as_str());
        match previous.get(entry.path.as_str()) {
            Some(old) if old.checksum.eq_ignore_ascii_case(&entry.checksum) => {
                unchanged.push(entry.clone());
            }
            _ => to_download.push(entry.clone()),
        }
    }

    let to_delete = cached
        .map(|manifest| {
            manifest
                .applicable_files(target)
                .filter(|entry| !remote_paths.contains(entry.path.as_str()))
                .map(|entry| entry.path.clone())
                .collect()
        })
        .unwrap_or_default();

    let plan = SyncPlan {
        base_uri: remote.uri().to_string(),
        to_download,
        to_delete,
        unchanged,
    };
    debug!(
        "Sync plan for {target}: {} to download, {} to delete, {} unchanged",
        plan.to_download.len(),
        plan.to_delete.len(),
        plan.unchanged.len()
    );
    plan
}

impl SyncPlan {
    /// Base URI files are downloaded from.
    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }

    /// Sum of the declared sizes of every file to download.
    #[must_use]
    pub fn download_size(&self) -> u64 {
        self.to_download.iter().map(|entry| entry.size).sum()
    }

    /// Move unchanged entries whose file under `cache_dir` is missing or does
    /// not match its checksum into `to_download`.
    ///
    /// Returns how many entries were moved.
    pub fn verify_unchanged(&mut self, cache_dir: &Path) -> usize {
        let (intact, damaged): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.unchanged)
                .into_iter()
                .partition(|entry| {
                    let path = entry.local_path(cache_dir);
                    match file_matches(&path, &entry.checksum) {
                        Ok(matches) => matches,
                        Err(error) => {
                            warn!("Failed to verify {}: {error}", path.display());
                            false
                        }
                    }
                });

        let repaired = damaged.len();
        if repaired > 0 {
            debug!("{repaired} unchanged files are missing or corrupt and will be downloaded");
        }
        self.unchanged = intact;
        self.to_download.extend(damaged);
        repaired
    }
}

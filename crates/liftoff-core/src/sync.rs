use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tempfile::TempPath;
use tokio::sync::mpsc;

use crate::checksum::{checksum_matches, file_matches};
use crate::diff::SyncPlan;
use crate::manifest::{FileEntry, join_uri, relative_path};
use crate::source::CACHED_MANIFEST_FILE_NAME;
use crate::transport::{Transport, TransportError};

/// Prefix of in-flight download files inside the cache directory.
pub const TEMP_FILE_PREFIX: &str = ".liftoff-";
const TEMP_FILE_SUFFIX: &str = ".part";
const DEFAULT_RETRY_DELAYS_SECS: [u64; 3] = [0, 2, 5];
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_concurrent_downloads: usize,
    /// Delay before each download attempt; its length is the attempt count.
    pub retry_delays: Vec<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            retry_delays: DEFAULT_RETRY_DELAYS_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    ChecksumMismatch,
    Transport,
    Io,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("failed to download {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: TransportError,
    },
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::ChecksumMismatch { .. } => SyncErrorKind::ChecksumMismatch,
            Self::Transport { .. } => SyncErrorKind::Transport,
            Self::Io { .. } => SyncErrorKind::Io,
        }
    }

    /// The manifest path or local file the failure concerns.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::ChecksumMismatch { path, .. }
            | Self::Transport { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub bytes: u64,
}

/// Receiver side of sync progress, as a fraction in `[0.0, 1.0]`.
///
/// Intermediate updates never take the last free slot of the queue and are
/// dropped instead, so a slow or absent reader cannot stall a sync and the
/// final `1.0` always fits.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<f64>>,
}

impl ProgressSink {
    #[must_use]
    pub fn new(sender: mpsc::Sender<f64>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    fn report(&self, fraction: f64) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.capacity() <= 1 {
            debug!("Progress queue nearly full; dropping update");
            return;
        }
        match sender.try_send(fraction) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Progress queue full; dropping update");
            }
        }
    }

    async fn complete(&self) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(1.0).await;
        }
    }
}

struct ProgressTracker {
    total_files: usize,
    total_bytes: u64,
    completed_files: usize,
    completed_bytes: u64,
    last: f64,
}

impl ProgressTracker {
    fn new(entries: &[FileEntry]) -> Self {
        Self {
            total_files: entries.len(),
            total_bytes: entries.iter().map(|entry| entry.size).sum(),
            completed_files: 0,
            completed_bytes: 0,
            last: 0.0,
        }
    }

    fn is_complete(&self) -> bool {
        self.completed_files >= self.total_files
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, declared_size: u64) -> f64 {
        self.completed_files += 1;
        self.completed_bytes += declared_size;
        if self.is_complete() {
            self.last = 1.0;
            return self.last;
        }

        let fraction = if self.total_bytes == 0 {
            self.completed_files as f64 / self.total_files as f64
        } else {
            self.completed_bytes as f64 / self.total_bytes as f64
        };
        // 1.0 is reserved for the last completed file.
        self.last = self.last.max(fraction.min(1.0 - f64::EPSILON));
        self.last
    }
}

enum EntryOutcome {
    /// Verified content waiting in the cache root to be moved into place.
    Staged { file: TempPath, bytes: u64 },
    AlreadyCurrent,
}

/// Applies a [`SyncPlan`] to a cache directory.
#[derive(Clone)]
pub struct SyncExecutor {
    transport: Arc<dyn Transport>,
    options: SyncOptions,
}

impl SyncExecutor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: SyncOptions) -> Self {
        Self { transport, options }
    }

    /// Download and verify every file in `plan.to_download`, remove every
    /// path in `plan.to_delete`, then move the downloads into place.
    ///
    /// Files already matching their checksum are left alone, so running the
    /// same plan again after a partial failure converges to the same result.
    /// Nothing in the cache changes until every download has been verified.
    /// Deletions run before installation so a release may turn a file into a
    /// directory of the same name, or the reverse.
    ///
    /// # Errors
    /// Returns the first download failure once all downloads have resolved,
    /// or the first deletion or installation failure.
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        cache_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|error| SyncError::io("failed to create cache directory", cache_dir, error))?;

        let mut report = SyncReport::default();
        let mut tracker = ProgressTracker::new(&plan.to_download);

        let workers = self.options.max_concurrent_downloads.max(1);
        let mut results = futures_util::stream::iter(&plan.to_download)
            .map(|entry| async move {
                let outcome = self.sync_entry(plan.base_uri(), entry, cache_dir).await;
                (entry, outcome)
            })
            .buffer_unordered(workers);

        let mut staged = Vec::new();
        let mut first_error = None;
        while let Some((entry, outcome)) = results.next().await {
            match outcome {
                Ok(EntryOutcome::Staged { file, bytes }) => staged.push((entry, file, bytes)),
                Ok(EntryOutcome::AlreadyCurrent) => report.skipped += 1,
                Err(error) => {
                    warn!("Failed to sync {}: {error}", entry.path);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    continue;
                }
            }

            let fraction = tracker.record(entry.size);
            if !tracker.is_complete() {
                progress.report(fraction);
            }
        }
        drop(results);

        if let Some(error) = first_error {
            return Err(error);
        }

        for path in &plan.to_delete {
            if delete_entry(cache_dir, path).await? {
                report.deleted += 1;
            }
        }

        for (entry, file, bytes) in staged {
            install(cache_dir, entry, file).await?;
            report.downloaded += 1;
            report.bytes += bytes;
        }
        progress.complete().await;

        info!(
            "Sync complete: {} downloaded ({} bytes), {} already current, {} deleted",
            report.downloaded, report.bytes, report.skipped, report.deleted
        );
        Ok(report)
    }

    async fn sync_entry(
        &self,
        base_uri: &str,
        entry: &FileEntry,
        cache_dir: &Path,
    ) -> Result<EntryOutcome, SyncError> {
        let target = entry.local_path(cache_dir);
        if is_current(&target, &entry.checksum).await {
            debug!("{} is already current", entry.path);
            return Ok(EntryOutcome::AlreadyCurrent);
        }

        let url = join_uri(base_uri, &entry.path);
        let delays: &[Duration] = if self.options.retry_delays.is_empty() {
            &[Duration::ZERO]
        } else {
            &self.options.retry_delays
        };

        let mut last_error = None;
        for (attempt, delay) in delays.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match self.download_entry(&url, entry, cache_dir).await {
                Ok((file, bytes)) => return Ok(EntryOutcome::Staged { file, bytes }),
                Err(error) => {
                    debug!(
                        "Download of {} attempt {} failed: {error}",
                        entry.path,
                        attempt + 1
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::io(
                "download was not attempted",
                &target,
                std::io::Error::other("no download attempts configured"),
            )
        }))
    }

    /// Fetch one entry into a temp file in the cache root and verify it.
    async fn download_entry(
        &self,
        url: &str,
        entry: &FileEntry,
        cache_dir: &Path,
    ) -> Result<(TempPath, u64), SyncError> {
        let temp_path = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(cache_dir)
            .map_err(|error| SyncError::io("failed to create temp file", cache_dir, error))?
            .into_temp_path();

        let download = self
            .transport
            .download(url, &temp_path)
            .await
            .map_err(|source| SyncError::Transport {
                path: entry.path.clone(),
                source,
            })?;

        if !checksum_matches(&download.sha256, &entry.checksum) {
            return Err(SyncError::ChecksumMismatch {
                path: entry.path.clone(),
                expected: entry.checksum.clone(),
                actual: download.sha256,
            });
        }

        if entry.executable {
            mark_executable(&temp_path).map_err(|error| {
                SyncError::io("failed to mark file executable", &temp_path, error)
            })?;
        }

        Ok((temp_path, download.bytes))
    }
}

/// Move a verified download over its live path.
async fn install(cache_dir: &Path, entry: &FileEntry, file: TempPath) -> Result<(), SyncError> {
    let target = entry.local_path(cache_dir);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| SyncError::io("failed to create directory", parent, error))?;
    }
    file.persist(&target)
        .map_err(|error| SyncError::io("failed to replace file", &target, error.error))?;
    debug!("Installed {}", entry.path);
    Ok(())
}

async fn is_current(path: &Path, checksum: &str) -> bool {
    let path = path.to_path_buf();
    let checksum = checksum.to_string();
    match tokio::task::spawn_blocking(move || file_matches(&path, &checksum)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(error)) => {
            debug!("Could not verify existing file: {error}");
            false
        }
        Err(error) => {
            warn!("Checksum task failed: {error}");
            false
        }
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Remove a manifest path below `cache_dir`. Returns whether a file was
/// actually removed.
async fn delete_entry(cache_dir: &Path, path: &str) -> Result<bool, SyncError> {
    let target = relative_path(cache_dir, path);
    match tokio::fs::remove_file(&target).await {
        Ok(()) => {
            debug!("Deleted {path}");
            prune_empty_parents(&target, cache_dir).await;
            Ok(true)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(SyncError::io("failed to delete file", &target, error)),
    }
}

async fn prune_empty_parents(file: &Path, cache_dir: &Path) {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == cache_dir || !dir.starts_with(cache_dir) {
            break;
        }
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Remove download leftovers of an interrupted run below `cache_dir`.
///
/// Returns how many files were removed.
pub fn remove_stale_temp_files(cache_dir: &Path) -> usize {
    let manifest_temp_prefix = format!(".{CACHED_MANIFEST_FILE_NAME}.");
    let mut removed = 0;
    let mut pending: Vec<PathBuf> = vec![cache_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = (name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX))
                || (name.starts_with(&manifest_temp_prefix) && name.ends_with(".tmp"));
            if stale && std::fs::remove_file(&path).is_ok() {
                debug!("Removed stale temp file {}", path.display());
                removed += 1;
            }
        }
    }

    removed
}

//! Release synchronization for the Liftoff launcher.
//!
//! This crate holds everything needed to bring a local cache directory in
//! line with a published release, independent of any UI:
//! - The manifest model and its JSON document format.
//! - Fetching remote manifests and persisting the last synchronized one.
//! - Diffing two manifests into a sync plan.
//! - Executing a plan with verified, atomic file replacement.

mod atomic;
mod checksum;
mod diff;
mod manifest;
mod source;
mod sync;
mod transport;
mod version;

/// Crash-safe whole-file replacement.
pub use atomic::write_atomic;
/// SHA-256 helpers used for release file verification.
pub use checksum::{checksum_matches, file_matches, normalize_sha256, sha256_bytes, sha256_file};
/// Manifest diffing.
pub use diff::{SyncPlan, plan};
/// Manifest model, validation and document name.
pub use manifest::{
    FileEntry, MANIFEST_FILE_NAME, Manifest, ManifestBuilder, ManifestError, OsTag,
    RESERVED_PREFIX, relative_path,
};
/// Remote manifest loading and cached manifest persistence.
pub use source::{
    CACHED_MANIFEST_FILE_NAME, CachedManifest, FetchError, cached_manifest_path,
    check_for_update, has_update, load_cached, load_remote, persist,
};
/// Plan execution with bounded concurrency, retries and progress reporting.
pub use sync::{
    ProgressSink, SyncError, SyncErrorKind, SyncExecutor, SyncOptions, SyncReport,
    TEMP_FILE_PREFIX, remove_stale_temp_files,
};
/// Retrieval of manifests and release files over HTTP(S) or `file://`.
pub use transport::{
    Download, ReleaseClient, Transport, TransportError, TransportOptions, file_url, local_path,
};
/// Release version comparison.
pub use version::{compare_versions, is_newer_version, is_older_version};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::manifest::{Manifest, ManifestError};
use crate::transport::{Transport, TransportError};

/// File inside the cache directory holding the last fully synchronized
/// manifest.
pub const CACHED_MANIFEST_FILE_NAME: &str = ".liftoff-manifest.json";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch manifest from {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to parse manifest from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ManifestError,
    },
}

/// Manifest persisted after a complete synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedManifest {
    pub manifest: Manifest,
    pub synced_at: DateTime<Utc>,
}

#[must_use]
pub fn cached_manifest_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(CACHED_MANIFEST_FILE_NAME)
}

/// Fetch and parse the manifest document at `url`.
///
/// Failures are surfaced as-is; there is no retry at this level.
///
/// # Errors
/// Returns an error when the document cannot be retrieved or is not a valid
/// manifest.
pub async fn load_remote(transport: &dyn Transport, url: &str) -> Result<Manifest, FetchError> {
    debug!("Fetching manifest from {url}");
    let data = transport
        .fetch(url)
        .await
        .map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

    Manifest::from_json(&data).map_err(|source| FetchError::Parse {
        url: url.to_string(),
        source,
    })
}

/// Read the previously persisted manifest.
///
/// Returns `None` on first run. A cache file that cannot be read or parsed is
/// logged and treated the same way, so the next sync rebuilds it.
#[must_use]
pub fn load_cached(path: &Path) -> Option<CachedManifest> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!("Ignoring unreadable cached manifest {}: {error}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(cached) => Some(cached),
        Err(error) => {
            warn!("Ignoring corrupt cached manifest {}: {error}", path.display());
            None
        }
    }
}

/// Atomically record `manifest` as the fully synchronized release.
///
/// # Errors
/// Returns an error if the manifest cannot be serialised or written.
pub fn persist(manifest: &Manifest, path: &Path) -> std::io::Result<CachedManifest> {
    let cached = CachedManifest {
        manifest: manifest.clone(),
        synced_at: Utc::now(),
    };
    let data = serde_json::to_vec_pretty(&cached)?;
    write_atomic(path, &data)?;
    info!(
        "Cached manifest updated to version '{}' ({} files)",
        manifest.version(),
        manifest.files().len()
    );
    Ok(cached)
}

/// Whether `remote` differs from what is installed.
#[must_use]
pub fn has_update(cached: Option<&Manifest>, remote: &Manifest) -> bool {
    cached.is_none_or(|cached| cached != remote)
}

/// Check a running release for a newer manifest at its canonical location.
///
/// Returns the new manifest when it differs from `current`.
///
/// # Errors
/// Returns an error when the remote manifest cannot be fetched or parsed.
pub async fn check_for_update(
    transport: &dyn Transport,
    current: &Manifest,
) -> Result<Option<Manifest>, FetchError> {
    let remote = load_remote(transport, &current.document_uri()).await?;
    Ok(has_update(Some(current), &remote).then_some(remote))
}

#[cfg(test)]
mod tests {
    use super::{
        FetchError, cached_manifest_path, check_for_update, has_update, load_cached, load_remote,
        persist,
    };
    use crate::checksum::sha256_bytes;
    use crate::manifest::{FileEntry, MANIFEST_FILE_NAME, Manifest};
    use crate::transport::{ReleaseClient, TransportOptions, file_url};

    fn manifest(uri: &str, version: &str, files: &[(&str, &[u8])]) -> Manifest {
        files
            .iter()
            .fold(
                Manifest::builder(uri, "bin/app").version(version),
                |builder, (path, content)| {
                    builder.file(FileEntry::new(
                        *path,
                        sha256_bytes(content),
                        content.len() as u64,
                    ))
                },
            )
            .build()
            .expect("test manifest should be valid")
    }

    fn client() -> ReleaseClient {
        ReleaseClient::new(&TransportOptions::default()).expect("client should build")
    }

    #[test]
    fn has_update_is_structural_inequality() {
        let a = manifest("https://x/app", "1.0.0", &[("a.jar", b"a")]);
        let same = manifest("https://x/app", "1.0.0", &[("a.jar", b"a")]);
        let changed = manifest("https://x/app", "1.0.0", &[("a.jar", b"A")]);

        assert!(has_update(None, &a));
        assert!(!has_update(Some(&same), &a));
        assert!(has_update(Some(&changed), &a));
    }

    #[test]
    fn persist_then_load_cached_returns_equal_manifest() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = cached_manifest_path(temp.path());
        let manifest = manifest("https://x/app", "2.1.0", &[("a.jar", b"a"), ("b.jar", b"b")]);

        persist(&manifest, &path).expect("manifest should persist");
        let loaded = load_cached(&path).expect("cached manifest should load");

        assert_eq!(loaded.manifest, manifest);
    }

    #[test]
    fn load_cached_treats_missing_and_corrupt_files_as_absent() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = cached_manifest_path(temp.path());
        assert!(load_cached(&path).is_none());

        std::fs::write(&path, "{\"manifest\": 12").expect("corrupt cache should be written");
        assert!(load_cached(&path).is_none());
    }

    #[tokio::test]
    async fn load_remote_reports_parse_failures() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let document = temp.path().join(MANIFEST_FILE_NAME);
        std::fs::write(&document, "{\"uri\": \"\"}").expect("document should be written");

        let result = load_remote(&client(), &file_url(&document)).await;

        assert!(matches!(result, Err(FetchError::Parse { .. })));
    }

    #[tokio::test]
    async fn check_for_update_reads_canonical_document() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let base = file_url(temp.path());
        let current = manifest(&base, "1.0.0", &[("a.jar", b"a")]);
        let newer = manifest(&base, "1.1.0", &[("a.jar", b"a2")]);

        std::fs::write(
            temp.path().join(MANIFEST_FILE_NAME),
            current.to_json_pretty().expect("manifest should serialize"),
        )
        .expect("document should be written");
        let unchanged = check_for_update(&client(), &current)
            .await
            .expect("update check should succeed");
        assert!(unchanged.is_none());

        std::fs::write(
            temp.path().join(MANIFEST_FILE_NAME),
            newer.to_json_pretty().expect("manifest should serialize"),
        )
        .expect("document should be written");
        let update = check_for_update(&client(), &current)
            .await
            .expect("update check should succeed");
        assert_eq!(update, Some(newer));
    }
}

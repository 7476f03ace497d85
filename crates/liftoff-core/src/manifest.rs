use std::collections::HashSet;
use std::path::{Path, PathBuf};

use liftoff_platform::TargetOs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::normalize_sha256;
use crate::version::is_older_version;

/// Document name appended to a manifest's base URI.
pub const MANIFEST_FILE_NAME: &str = "app.json";

/// Prefix reserved for the launcher's own bookkeeping files inside the cache
/// directory. Manifest entries may not use it.
pub const RESERVED_PREFIX: &str = ".liftoff";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest document: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("manifest has no base uri")]
    MissingUri,
    #[error("manifest has no launch class")]
    MissingLaunchClass,
    #[error("duplicate file entry '{0}'")]
    DuplicatePath(String),
    #[error("invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("invalid sha256 checksum for '{path}'")]
    InvalidChecksum { path: String },
}

/// Platform applicability of a manifest entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsTag {
    #[default]
    Any,
    Windows,
    Mac,
    Linux,
}

impl OsTag {
    #[must_use]
    pub fn applies_to(self, target: TargetOs) -> bool {
        match self {
            Self::Any => true,
            Self::Windows => target == TargetOs::Windows,
            Self::Mac => target == TargetOs::Mac,
            Self::Linux => target == TargetOs::Linux,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub checksum: String,
    pub size: u64,
    #[serde(default)]
    pub os: OsTag,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, checksum: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
            size,
            os: OsTag::Any,
            executable: false,
        }
    }

    #[must_use]
    pub fn with_os(mut self, os: OsTag) -> Self {
        self.os = os;
        self
    }

    #[must_use]
    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    /// Location of this entry below `root`.
    #[must_use]
    pub fn local_path(&self, root: &Path) -> PathBuf {
        relative_path(root, &self.path)
    }
}

/// Join a `/`-separated manifest path below `root`.
#[must_use]
pub fn relative_path(root: &Path, path: &str) -> PathBuf {
    path.split('/')
        .fold(root.to_path_buf(), |joined, segment| joined.join(segment))
}

/// Description of one release: where to fetch it, which files it consists of
/// and how the launcher should behave while installing it.
///
/// Manifests are immutable once built. Two manifests are equal iff every field
/// and every file entry, in order, is equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ManifestDocument")]
#[allow(clippy::struct_excessive_bools)]
pub struct Manifest {
    uri: String,
    version: String,
    launch_class: String,
    arguments: Vec<String>,
    files: Vec<FileEntry>,
    accept_downgrade: bool,
    lingering_update_screen: bool,
    ignore_update_errors: bool,
    ignore_ssl_errors: bool,
    whats_new_page: Option<String>,
    update_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
struct ManifestDocument {
    uri: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    launch_class: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    accept_downgrade: bool,
    #[serde(default)]
    lingering_update_screen: bool,
    #[serde(default)]
    ignore_update_errors: bool,
    #[serde(default)]
    ignore_ssl_errors: bool,
    #[serde(default)]
    whats_new_page: Option<String>,
    #[serde(default)]
    update_text: Option<String>,
}

impl TryFrom<ManifestDocument> for Manifest {
    type Error = ManifestError;

    fn try_from(document: ManifestDocument) -> Result<Self, Self::Error> {
        let uri = document.uri.trim().trim_end_matches('/').to_string();
        if uri.is_empty() {
            return Err(ManifestError::MissingUri);
        }
        if document.launch_class.trim().is_empty() {
            return Err(ManifestError::MissingLaunchClass);
        }

        let mut seen = HashSet::with_capacity(document.files.len());
        let mut files = Vec::with_capacity(document.files.len());
        for mut entry in document.files {
            validate_path(&entry.path)?;
            if !seen.insert(entry.path.clone()) {
                return Err(ManifestError::DuplicatePath(entry.path));
            }
            entry.checksum = normalize_sha256(&entry.checksum).ok_or_else(|| {
                ManifestError::InvalidChecksum {
                    path: entry.path.clone(),
                }
            })?;
            files.push(entry);
        }

        Ok(Self {
            uri,
            version: document.version.trim().to_string(),
            launch_class: document.launch_class.trim().to_string(),
            arguments: document.arguments,
            files,
            accept_downgrade: document.accept_downgrade,
            lingering_update_screen: document.lingering_update_screen,
            ignore_update_errors: document.ignore_update_errors,
            ignore_ssl_errors: document.ignore_ssl_errors,
            whats_new_page: document.whats_new_page.filter(|page| !page.trim().is_empty()),
            update_text: document.update_text,
        })
    }
}

fn validate_path(path: &str) -> Result<(), ManifestError> {
    let invalid = |reason| ManifestError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be relative"));
    }
    if path.contains('\\') || path.contains(':') {
        return Err(invalid("path must use '/' separators without a drive"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("path contains an empty segment")),
            "." | ".." => return Err(invalid("path must not contain '.' or '..'")),
            _ if is_reserved_name(segment) => {
                return Err(invalid("path is reserved for launcher bookkeeping"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Names the launcher creates and cleans up at any depth: `.liftoff*` files
/// and the `..liftoff*` staging copies of the cached manifest.
fn is_reserved_name(segment: &str) -> bool {
    let stem = RESERVED_PREFIX.trim_start_matches('.');
    segment.starts_with('.') && segment.trim_start_matches('.').starts_with(stem)
}

impl Manifest {
    /// Parse and validate a manifest document.
    ///
    /// # Errors
    /// Returns an error when the document is not valid JSON or violates a
    /// manifest invariant (duplicate or unsafe paths, bad checksums, missing
    /// uri or launch class).
    pub fn from_json(data: &[u8]) -> Result<Self, ManifestError> {
        let document: ManifestDocument = serde_json::from_slice(data)?;
        Self::try_from(document)
    }

    /// Serialise the manifest as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialisation fails.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    #[must_use]
    pub fn builder(uri: impl Into<String>, launch_class: impl Into<String>) -> ManifestBuilder {
        ManifestBuilder::new(uri.into(), launch_class.into())
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn launch_class(&self) -> &str {
        &self.launch_class
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    #[must_use]
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    #[must_use]
    pub fn accept_downgrade(&self) -> bool {
        self.accept_downgrade
    }

    #[must_use]
    pub fn lingering_update_screen(&self) -> bool {
        self.lingering_update_screen
    }

    #[must_use]
    pub fn ignore_update_errors(&self) -> bool {
        self.ignore_update_errors
    }

    #[must_use]
    pub fn ignore_ssl_errors(&self) -> bool {
        self.ignore_ssl_errors
    }

    #[must_use]
    pub fn whats_new_page(&self) -> Option<&str> {
        self.whats_new_page.as_deref()
    }

    #[must_use]
    pub fn update_text(&self) -> Option<&str> {
        self.update_text.as_deref()
    }

    /// Canonical location of this release's manifest document.
    #[must_use]
    pub fn document_uri(&self) -> String {
        format!("{}/{MANIFEST_FILE_NAME}", self.uri)
    }

    #[must_use]
    pub fn file_uri(&self, entry: &FileEntry) -> String {
        join_uri(&self.uri, &entry.path)
    }

    /// Entries that belong to `target`'s file set, in manifest order.
    pub fn applicable_files(&self, target: TargetOs) -> impl Iterator<Item = &FileEntry> {
        self.files
            .iter()
            .filter(move |entry| entry.os.applies_to(target))
    }

    /// Whether installing `self` over `installed` would move to an older
    /// release.
    #[must_use]
    pub fn is_downgrade_from(&self, installed: &Manifest) -> bool {
        is_older_version(&self.version, &installed.version)
    }
}

pub(crate) fn join_uri(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Programmatic construction of a [`Manifest`], validated on [`build`].
///
/// [`build`]: ManifestBuilder::build
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    document: ManifestDocument,
}

impl ManifestBuilder {
    fn new(uri: String, launch_class: String) -> Self {
        Self {
            document: ManifestDocument {
                uri,
                launch_class,
                ..ManifestDocument::default()
            },
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.document.version = version.into();
        self
    }

    #[must_use]
    pub fn argument(mut self, argument: impl Into<String>) -> Self {
        self.document.arguments.push(argument.into());
        self
    }

    #[must_use]
    pub fn file(mut self, entry: FileEntry) -> Self {
        self.document.files.push(entry);
        self
    }

    #[must_use]
    pub fn accept_downgrade(mut self, value: bool) -> Self {
        self.document.accept_downgrade = value;
        self
    }

    #[must_use]
    pub fn lingering_update_screen(mut self, value: bool) -> Self {
        self.document.lingering_update_screen = value;
        self
    }

    #[must_use]
    pub fn ignore_update_errors(mut self, value: bool) -> Self {
        self.document.ignore_update_errors = value;
        self
    }

    #[must_use]
    pub fn ignore_ssl_errors(mut self, value: bool) -> Self {
        self.document.ignore_ssl_errors = value;
        self
    }

    #[must_use]
    pub fn whats_new_page(mut self, page: impl Into<String>) -> Self {
        self.document.whats_new_page = Some(page.into());
        self
    }

    #[must_use]
    pub fn update_text(mut self, text: impl Into<String>) -> Self {
        self.document.update_text = Some(text.into());
        self
    }

    /// Validate and freeze the manifest.
    ///
    /// # Errors
    /// Returns the same validation errors as [`Manifest::from_json`].
    pub fn build(self) -> Result<Manifest, ManifestError> {
        Manifest::try_from(self.document)
    }
}

#[cfg(test)]
mod tests {
    use liftoff_platform::TargetOs;

    use super::{FileEntry, Manifest, ManifestError, OsTag};
    use crate::checksum::sha256_bytes;

    fn entry(path: &str, content: &[u8]) -> FileEntry {
        FileEntry::new(path, sha256_bytes(content), content.len() as u64)
    }

    fn sample() -> Manifest {
        Manifest::builder("https://releases.example.com/app/", "bin/app")
            .version("1.4.0")
            .file(entry("lib/core.jar", b"core"))
            .file(entry("bin/app.exe", b"exe").with_os(OsTag::Windows))
            .build()
            .expect("sample manifest should be valid")
    }

    #[test]
    fn parses_document_with_defaults() {
        let json = br#"{
            "uri": "https://releases.example.com/app",
            "launch_class": "bin/app",
            "files": [
                { "path": "lib/core.jar", "checksum": "SHA256:BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD", "size": 3 }
            ]
        }"#;

        let manifest = Manifest::from_json(json).expect("document should parse");

        assert_eq!(manifest.uri(), "https://releases.example.com/app");
        assert_eq!(manifest.files().len(), 1);
        assert_eq!(manifest.files()[0].os, OsTag::Any);
        assert_eq!(
            manifest.files()[0].checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(!manifest.ignore_update_errors());
        assert!(manifest.whats_new_page().is_none());
    }

    #[test]
    fn derived_uris_strip_trailing_slash() {
        let manifest = sample();
        assert_eq!(
            manifest.document_uri(),
            "https://releases.example.com/app/app.json"
        );
        assert_eq!(
            manifest.file_uri(&manifest.files()[0]),
            "https://releases.example.com/app/lib/core.jar"
        );
    }

    #[test]
    fn equality_covers_fields_and_entry_order() {
        let a = sample();
        assert_eq!(a, sample());

        let flag_changed = Manifest::builder("https://releases.example.com/app", "bin/app")
            .version("1.4.0")
            .file(entry("lib/core.jar", b"core"))
            .file(entry("bin/app.exe", b"exe").with_os(OsTag::Windows))
            .lingering_update_screen(true)
            .build()
            .expect("manifest should be valid");
        assert_ne!(a, flag_changed);

        let reordered = Manifest::builder("https://releases.example.com/app", "bin/app")
            .version("1.4.0")
            .file(entry("bin/app.exe", b"exe").with_os(OsTag::Windows))
            .file(entry("lib/core.jar", b"core"))
            .build()
            .expect("manifest should be valid");
        assert_ne!(a, reordered);
    }

    #[test]
    fn rejects_duplicate_paths() {
        let result = Manifest::builder("https://x", "app")
            .file(entry("a.jar", b"a"))
            .file(entry("a.jar", b"b"))
            .build();
        assert!(matches!(result, Err(ManifestError::DuplicatePath(path)) if path == "a.jar"));
    }

    #[test]
    fn rejects_unsafe_and_reserved_paths() {
        for path in [
            "../escape.jar",
            "/abs.jar",
            "lib//x.jar",
            "C:/x.jar",
            "lib\\x.jar",
            ".liftoff-manifest.json",
            "lib/.liftoff-x.part",
            "lib/native/..liftoff-manifest.json.1.tmp",
        ] {
            let result = Manifest::builder("https://x", "app")
                .file(entry(path, b"a"))
                .build();
            assert!(
                matches!(result, Err(ManifestError::InvalidPath { .. })),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn similar_but_unreserved_names_are_accepted() {
        for path in ["liftoff.jar", "lib/liftoff-core.jar", "lib/.config", "lib/.lift"] {
            let result = Manifest::builder("https://x", "app")
                .file(entry(path, b"a"))
                .build();
            assert!(result.is_ok(), "{path} should be accepted");
        }
    }

    #[test]
    fn rejects_invalid_checksum_and_missing_fields() {
        let bad_checksum = Manifest::builder("https://x", "app")
            .file(FileEntry::new("a.jar", "abc", 1))
            .build();
        assert!(matches!(
            bad_checksum,
            Err(ManifestError::InvalidChecksum { .. })
        ));

        assert!(matches!(
            Manifest::builder("  ", "app").build(),
            Err(ManifestError::MissingUri)
        ));
        assert!(matches!(
            Manifest::builder("https://x", "").build(),
            Err(ManifestError::MissingLaunchClass)
        ));
        assert!(matches!(
            Manifest::from_json(b"{not json"),
            Err(ManifestError::Syntax(_))
        ));
    }

    #[test]
    fn serialized_manifest_parses_back_to_equal_value() {
        let manifest = sample();
        let json = manifest.to_json_pretty().expect("manifest should serialize");
        let parsed = Manifest::from_json(&json).expect("serialized manifest should parse");
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn applicable_files_filter_by_target() {
        let manifest = sample();
        let linux: Vec<_> = manifest
            .applicable_files(TargetOs::Linux)
            .map(|entry| entry.path.as_str())
            .collect();
        let windows: Vec<_> = manifest
            .applicable_files(TargetOs::Windows)
            .map(|entry| entry.path.as_str())
            .collect();

        assert_eq!(linux, vec!["lib/core.jar"]);
        assert_eq!(windows, vec!["lib/core.jar", "bin/app.exe"]);
    }

    #[test]
    fn downgrade_detection_uses_versions() {
        let installed = sample();
        let older = Manifest::builder("https://releases.example.com/app", "bin/app")
            .version("1.3.9")
            .build()
            .expect("manifest should be valid");
        let unversioned = Manifest::builder("https://releases.example.com/app", "bin/app")
            .build()
            .expect("manifest should be valid");

        assert!(older.is_downgrade_from(&installed));
        assert!(!installed.is_downgrade_from(&older));
        assert!(!unversioned.is_downgrade_from(&installed));
    }

    #[test]
    fn local_path_joins_segments_below_root() {
        let root = std::path::Path::new("/cache");
        let path = entry("lib/native/x.so", b"x").local_path(root);
        assert!(path.ends_with(std::path::Path::new("lib").join("native").join("x.so")));
    }
}

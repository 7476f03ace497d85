use std::path::{Path, PathBuf};
use std::time::Duration;

use liftoff_core::{SyncOptions, TransportOptions};
use liftoff_platform::AppPaths;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Location of the release manifest document. When unset, the canonical
    /// document of the cached release is used.
    #[serde(default)]
    pub manifest_uri: Option<String>,

    #[serde(default)]
    pub ignore_ssl_validation: bool,

    #[serde(default)]
    pub ignore_update_errors: bool,

    #[serde(default)]
    pub lingering_update_screen: bool,

    #[serde(default)]
    pub accept_downgrade: bool,

    #[serde(default)]
    pub cache_directory: Option<PathBuf>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    #[serde(default)]
    pub error_messages: ErrorMessages,
}

/// User-facing texts of the fatal error report. Unset fields fall back to the
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessages {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub header: Option<String>,

    #[serde(default)]
    pub body: Option<String>,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_http_timeout() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_max_concurrent_downloads() -> usize {
    4
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            manifest_uri: None,
            ignore_ssl_validation: false,
            ignore_update_errors: false,
            lingering_update_screen: false,
            accept_downgrade: false,
            cache_directory: None,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            http_timeout_secs: default_http_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            retry_delays_secs: default_retry_delays(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            error_messages: ErrorMessages::default(),
        }
    }
}

impl LauncherSettings {
    /// Load settings from the platform settings file, falling back to
    /// defaults.
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        Self::load_from_path(&paths.settings_file())
    }

    pub fn load_from_path(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(error) => {
                warn!("Failed to read settings {}: {error}", path.display());
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|error| {
            warn!("Ignoring malformed settings {}: {error}", path.display());
            Self::default()
        })
    }

    pub fn cache_dir(&self, paths: &AppPaths) -> PathBuf {
        self.cache_directory
            .clone()
            .unwrap_or_else(|| paths.release_dir())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            ignore_ssl_validation: self.ignore_ssl_validation,
            connect_timeout: Duration::from_secs(self.http_timeout_secs),
            read_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent_downloads: self.max_concurrent_downloads.max(1),
            retry_delays: self
                .retry_delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use serde_json::json;

    use super::LauncherSettings;

    #[test]
    fn defaults_match_expected_values() {
        let settings = LauncherSettings::default();

        assert!(settings.manifest_uri.is_none());
        assert!(!settings.ignore_ssl_validation);
        assert!(!settings.ignore_update_errors);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.http_timeout_secs, 10);
        assert_eq!(settings.fetch_timeout_secs, 30);
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5]);
        assert_eq!(settings.max_concurrent_downloads, 4);
    }

    #[test]
    fn partial_document_fills_missing_fields_with_defaults() {
        let value = json!({
            "manifest_uri": "https://updates.example.com/app/app.json",
            "ignore_update_errors": true,
            "error_messages": { "title": "Oops" }
        });

        let settings: LauncherSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(
            settings.manifest_uri.as_deref(),
            Some("https://updates.example.com/app/app.json")
        );
        assert!(settings.ignore_update_errors);
        assert_eq!(settings.error_messages.title.as_deref(), Some("Oops"));
        assert!(settings.error_messages.body.is_none());
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5]);
    }

    #[test]
    fn load_from_path_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("settings.json");

        let missing = LauncherSettings::load_from_path(&path);
        assert!(missing.manifest_uri.is_none());

        std::fs::write(&path, "{ not json").expect("settings file should be written");
        let malformed = LauncherSettings::load_from_path(&path);
        assert_eq!(malformed.max_concurrent_downloads, 4);

        std::fs::write(&path, r#"{ "cache_directory": "/opt/app" }"#)
            .expect("settings file should be written");
        let loaded = LauncherSettings::load_from_path(&path);
        assert_eq!(loaded.cache_directory, Some(PathBuf::from("/opt/app")));
    }

    #[test]
    fn sync_options_convert_seconds_and_clamp_workers() {
        let settings = LauncherSettings {
            retry_delays_secs: vec![1, 3],
            max_concurrent_downloads: 0,
            ..LauncherSettings::default()
        };

        let options = settings.sync_options();

        assert_eq!(options.max_concurrent_downloads, 1);
        assert_eq!(
            options.retry_delays,
            vec![Duration::from_secs(1), Duration::from_secs(3)]
        );
    }
}

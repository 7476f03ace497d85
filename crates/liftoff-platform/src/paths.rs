use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR_NAME: &str = "liftoff";
const SETTINGS_FILE_NAME: &str = "settings.json";
const LOG_FILE_NAME: &str = "launcher.log";
const RELEASE_DIR_NAME: &str = "release";

/// Which per-user base directory could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine {0} directory")]
    BaseDirUnavailable(&'static str),
}

/// Per-user locations owned by the launcher itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

fn base_dir(kind: &'static str, dir: Option<PathBuf>) -> Result<PathBuf, AppPathsError> {
    dir.map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(AppPathsError::BaseDirUnavailable(kind))
}

impl AppPaths {
    /// Resolve the launcher directories for the current user.
    ///
    /// On macOS configuration and logs share `Application Support`; elsewhere
    /// the platform's config, cache and data directories are used.
    ///
    /// # Errors
    /// Returns an error when one of the base directories is unknown.
    pub fn new() -> Result<Self, AppPathsError> {
        if cfg!(target_os = "macos") {
            let home = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;
            let support = home.join("Library/Application Support").join(APP_DIR_NAME);
            return Ok(Self {
                config_dir: support.clone(),
                cache_dir: home.join("Library/Caches").join(APP_DIR_NAME),
                data_dir: support,
            });
        }

        Ok(Self {
            config_dir: base_dir("config", dirs::config_dir())?,
            cache_dir: base_dir("cache", dirs::cache_dir())?,
            data_dir: base_dir("data", dirs::data_dir())?,
        })
    }

    /// Lay every launcher directory out under a single root.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }

    /// Where the release is synchronized when no cache directory is configured.
    #[must_use]
    pub fn release_dir(&self) -> PathBuf {
        self.cache_dir.join(RELEASE_DIR_NAME)
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }

    /// # Errors
    /// Returns the first directory creation failure.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        [&self.config_dir, &self.cache_dir, &self.data_dir]
            .into_iter()
            .try_for_each(std::fs::create_dir_all)
    }
}

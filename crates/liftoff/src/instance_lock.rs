use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Lock file guarding a cache directory against concurrent launchers.
pub const LOCK_FILE_NAME: &str = ".liftoff.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another launcher is already running from {}", path.display())]
    AlreadyRunning { path: PathBuf },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Exclusive ownership of one cache directory, released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    /// Take the lock for `cache_dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns [`LockError::AlreadyRunning`] when another process holds the
    /// lock, or an I/O error if the lock file cannot be written.
    pub fn acquire(cache_dir: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|error| LockError::io("failed to create cache directory", error))?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(cache_dir.join(LOCK_FILE_NAME))
            .map_err(|error| LockError::io("failed to open instance lock file", error))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if is_contended(&error) => {
                return Err(LockError::AlreadyRunning {
                    path: cache_dir.to_path_buf(),
                });
            }
            Err(error) => return Err(LockError::io("failed to acquire instance lock", error)),
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|error| LockError::io("failed to write instance lock metadata", error))?;

        Ok(Self { _file: file })
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

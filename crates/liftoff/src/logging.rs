#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const LOG_TARGET_PREFIX: &str = "liftoff";

/// Append-only log file that is reopened when it disappears underneath the
/// launcher, for example when a user clears the data directory mid-run.
struct LauncherLogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LauncherLogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn with_file<T>(&self, action: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() || !self.path.exists() {
            *guard = Some(open_append(&self.path)?);
        }
        match guard.as_mut() {
            Some(file) => action(file),
            None => Err(io::Error::other("log file not available")),
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for LauncherLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(File::flush)
    }
}

/// Keep only the newer half of `log_path` once it grows beyond `max_size`,
/// cutting at a line boundary.
fn truncate_to_recent_half(log_path: &Path, max_size: u64) {
    let oversized = std::fs::metadata(log_path).is_ok_and(|metadata| metadata.len() > max_size);
    if !oversized {
        return;
    }
    let Ok(contents) = std::fs::read(log_path) else {
        return;
    };

    let middle = contents.len() / 2;
    let keep_from = contents[middle..]
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(middle, |offset| middle + offset + 1);
    let _ = std::fs::write(log_path, &contents[keep_from..]);
}

/// Install the global logger writing to `log_path`.
///
/// Logging is best-effort: if the file cannot be opened the launcher runs
/// without a file log.
pub fn init_logging(log_path: &Path, debug_enabled: bool, max_log_size: u64) {
    truncate_to_recent_half(log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str(LOG_TARGET_PREFIX)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));

    match LauncherLogFile::open(log_path.to_path_buf()) {
        Ok(writer) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer)),
        Err(error) => eprintln!("liftoff: cannot open log file {}: {error}", log_path.display()),
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }

    set_verbose(debug_enabled);
    log::info!(
        "Liftoff {} starting, log file: {}",
        env!("CARGO_PKG_VERSION"),
        log_path.display()
    );
}

pub fn set_verbose(enabled: bool) {
    log::set_max_level(if enabled {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
}

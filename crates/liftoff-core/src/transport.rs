use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const LOCAL_COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    fn request(url: &str, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    fn read(path: &Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write(path: &Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of streaming a remote resource to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: u64,
    pub sha256: String,
}

/// Retrieval of manifests and release files.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a small document fully into memory.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;

    /// Stream a resource into `dest`, truncating it first, and return the
    /// number of bytes written together with their SHA-256.
    async fn download(&self, url: &str, dest: &Path) -> Result<Download, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub ignore_ssl_validation: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            ignore_ssl_validation: false,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP(S) transport that also serves `file://` URLs from the local
/// filesystem.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: reqwest::Client,
}

impl ReleaseClient {
    /// Build a client from the given options.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(options: &TransportOptions) -> Result<Self, TransportError> {
        if options.ignore_ssl_validation {
            warn!("TLS certificate validation is disabled for release downloads");
        }

        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .user_agent(format!("liftoff/{}", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(options.ignore_ssl_validation)
            .build()
            .map_err(TransportError::ClientBuild)?;

        Ok(Self { http })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| TransportError::request(url, source))?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for ReleaseClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        if let Some(path) = local_path(url) {
            return tokio::fs::read(&path)
                .await
                .map_err(|source| TransportError::read(&path, source));
        }

        let response = self.send(url).await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|source| TransportError::request(url, source))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<Download, TransportError> {
        if let Some(path) = local_path(url) {
            return copy_local(&path, dest).await;
        }

        let response = self.send(url).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| TransportError::write(dest, source))?;
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransportError::request(url, source))?;
            file.write_all(&chunk)
                .await
                .map_err(|source| TransportError::write(dest, source))?;
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
        }

        finish_file(&mut file, dest).await?;
        debug!("Downloaded {bytes} bytes from {url}");
        Ok(Download {
            bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

async fn copy_local(source: &Path, dest: &Path) -> Result<Download, TransportError> {
    let mut input = tokio::fs::File::open(source)
        .await
        .map_err(|error| TransportError::read(source, error))?;
    let mut output = tokio::fs::File::create(dest)
        .await
        .map_err(|error| TransportError::write(dest, error))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; LOCAL_COPY_BUFFER];
    let mut bytes: u64 = 0;

    loop {
        let read = input
            .read(&mut buffer)
            .await
            .map_err(|error| TransportError::read(source, error))?;
        if read == 0 {
            break;
        }
        output
            .write_all(&buffer[..read])
            .await
            .map_err(|error| TransportError::write(dest, error))?;
        hasher.update(&buffer[..read]);
        bytes += read as u64;
    }

    finish_file(&mut output, dest).await?;
    Ok(Download {
        bytes,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

async fn finish_file(file: &mut tokio::fs::File, dest: &Path) -> Result<(), TransportError> {
    file.flush()
        .await
        .map_err(|source| TransportError::write(dest, source))?;
    file.sync_all()
        .await
        .map_err(|source| TransportError::write(dest, source))
}

/// Map a `file://` URL to a local path. Other schemes return `None`.
#[must_use]
pub fn local_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;

    // file:///C:/dir -> C:/dir
    #[cfg(windows)]
    let rest = match rest.strip_prefix('/') {
        Some(stripped) if stripped.as_bytes().get(1) == Some(&b':') => stripped,
        _ => rest,
    };

    Some(PathBuf::from(rest))
}

/// URL of a local directory, suitable as a manifest base URI.
#[must_use]
pub fn file_url(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory buffer.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file on disk, read in fixed-size chunks.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether the file at `path` exists and hashes to `expected`.
///
/// A missing file is reported as `Ok(false)`.
///
/// # Errors
/// Returns an error for I/O failures other than the file not existing.
pub fn file_matches(path: &Path, expected: &str) -> std::io::Result<bool> {
    match sha256_file(path) {
        Ok(actual) => Ok(checksum_matches(&actual, expected)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

#[must_use]
pub fn checksum_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}

/// Normalise a declared SHA-256 digest to lowercase hex.
///
/// Accepts bare hex as well as the `sha256:<hex>` form.
#[must_use]
pub fn normalize_sha256(digest: &str) -> Option<String> {
    let digest = digest.trim();
    let hash = match digest.split_once(':') {
        Some((algorithm, hash)) if algorithm.eq_ignore_ascii_case("sha256") => hash,
        Some(_) => return None,
        None => digest,
    };
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

use std::io::Write;
use std::path::Path;

/// Replace the file at `path` with `data` in one step.
///
/// The bytes land in a hidden `.{name}.*.tmp` sibling first, are flushed to
/// disk, and are then renamed over `path`. A crash leaves either the old file
/// or the new one; the sibling is cleaned up on error.
///
/// # Errors
/// Returns an error if `path` has no parent, or if creating, writing, syncing
/// or renaming the sibling fails.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "target path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |name| name.to_string_lossy());
    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;

    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(())
}

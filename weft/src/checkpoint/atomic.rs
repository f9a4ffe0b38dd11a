//! Atomic, lock-protected file writes and version rotation.
//!
//! Discipline: write to a temp file in the target directory, take an exclusive
//! [`fs2`] lock on it, write, release, then `rename` onto the target — `rename`
//! within one filesystem is atomic, so readers never observe a partial file.
//! Reads take a shared lock so a reader never observes a writer mid-rename on
//! platforms where that matters.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use fs2::FileExt;

use super::CheckpointError;

fn io_err(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Writes `contents` to `target` atomically: temp file in the same directory,
/// exclusive lock, write, unlock, rename.
pub fn atomic_write(target: &Path, contents: &[u8]) -> Result<(), CheckpointError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let temp_path = dir.join(format!(
        ".tmp_{}_{}",
        std::process::id(),
        target.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint")
    ));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| io_err(&temp_path, e))?;

    file.lock_exclusive().map_err(|e| io_err(&temp_path, e))?;
    let write_result = file.write_all(contents).and_then(|_| file.flush());
    let _ = FileExt::unlock(&file);
    drop(file);

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(&temp_path, e));
    }

    std::fs::rename(&temp_path, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        io_err(target, e)
    })
}

/// Reads `path` under a shared lock. Returns `Ok(None)` if the file does not exist.
pub fn locked_read(path: &Path) -> Result<Option<Vec<u8>>, CheckpointError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    file.lock_shared().map_err(|e| io_err(path, e))?;
    let mut buf = Vec::new();
    let result = (&file).read_to_end(&mut buf);
    let _ = FileExt::unlock(&file);
    result.map_err(|e| io_err(path, e))?;
    Ok(Some(buf))
}

/// Rotates `file_path`'s prior-version chain: `.2 -> .3` (dropping old `.3`),
/// `.1 -> .2`, then the live file becomes `.1`. Keeps at most three backups.
/// A no-op if `file_path` does not currently exist.
pub fn rotate_versions(file_path: &Path, max_versions: u32) -> Result<(), CheckpointError> {
    if !file_path.exists() {
        return Ok(());
    }

    for i in (1..max_versions).rev() {
        let old = versioned_path(file_path, i);
        let newer = versioned_path(file_path, i + 1);
        if old.exists() {
            if newer.exists() {
                std::fs::remove_file(&newer).map_err(|e| io_err(&newer, e))?;
            }
            std::fs::rename(&old, &newer).map_err(|e| io_err(&old, e))?;
        }
    }

    let first_backup = versioned_path(file_path, 1);
    std::fs::rename(file_path, &first_backup).map_err(|e| io_err(file_path, e))
}

pub fn versioned_path(file_path: &Path, version: u32) -> std::path::PathBuf {
    let mut os = file_path.as_os_str().to_owned();
    os.push(format!(".{version}"));
    std::path::PathBuf::from(os)
}

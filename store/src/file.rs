use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{KeyValueStore, StoreError};

/// Directory-backed store: each key lives in `<dir>/<key>.json`.
///
/// Has no change feed; processes sharing the directory pick up each other's
/// writes through periodic re-reads. A value file is always replaced whole, so
/// a concurrent reader sees either the previous blob or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    fsync: bool,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync: true,
        }
    }

    /// Skip flushing value files to disk before they replace the old ones.
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    /// Stage `value` next to `path`, then rename it into place.
    fn replace(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Records carry request bodies; keep them owner-only.
            fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o600))?;
        }
        staged.write_all(value.as_bytes())?;
        if self.fsync {
            staged.as_file().sync_all()?;
        }

        let Err(persist) = staged.persist(path) else {
            return Ok(());
        };
        if !path.exists() {
            return Err(persist.error);
        }
        // Rename over an existing file is refused on some platforms.
        replace_via_previous(persist.file, path)
    }
}

/// Moves the current value aside, renames `staged` into place, then drops the
/// old value. The old value is put back if the rename fails.
fn replace_via_previous(staged: NamedTempFile, path: &Path) -> io::Result<()> {
    let previous = path.with_extension("json.prev");
    discard(&previous);
    fs::rename(path, &previous)?;
    if let Err(e) = staged.persist(path) {
        if let Err(restore) = fs::rename(&previous, path) {
            tracing::warn!(
                path = %path.display(),
                previous = %previous.display(),
                "Failed to restore previous value file: {restore}"
            );
        }
        return Err(e.error);
    }
    discard(&previous);
    Ok(())
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove previous value file: {e}"),
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(key);
        self.replace(&path, value).map_err(|e| io_error(&path, e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

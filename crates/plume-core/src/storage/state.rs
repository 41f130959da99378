use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::kernel::constants;
use crate::storage::error::StorageSystemError;

/// Persisted plugin state between host runs: the descriptor cache lines and
/// the ids of plugins that were active at shutdown. Both are plain text
/// files with one entry per line.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(constants::CACHE_FILE_NAME)
    }

    pub fn active_plugins_path(&self) -> PathBuf {
        self.dir.join(constants::ACTIVE_PLUGINS_FILE_NAME)
    }

    /// Cache lines saved by the previous run; empty if there are none
    pub fn load_cache_lines(&self) -> Result<Vec<String>, StorageSystemError> {
        read_lines(&self.cache_path())
    }

    /// Ids of plugins active at the end of the previous run
    pub fn load_active_ids(&self) -> Result<Vec<String>, StorageSystemError> {
        read_lines(&self.active_plugins_path())
    }

    /// Replace both files, each atomically.
    pub fn save(&self, cache_lines: &[String], active_ids: &[String]) -> Result<(), StorageSystemError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageSystemError::io(e, "create_dir_all", self.dir.clone()))?;
        write_atomic(&self.cache_path(), join_lines(cache_lines).as_bytes())?;
        write_atomic(&self.active_plugins_path(), join_lines(active_ids).as_bytes())?;
        debug!(
            "Saved {} cache line(s) and {} active plugin id(s) to {}",
            cache_lines.len(),
            active_ids.len(),
            self.dir.display()
        );
        Ok(())
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn read_lines(path: &Path) -> Result<Vec<String>, StorageSystemError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(data
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageSystemError::io(e, "read_state", path.to_path_buf())),
    }
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageSystemError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => {
            return Err(StorageSystemError::InvalidPath {
                path: path.to_path_buf(),
                reason: "path has no parent directory".to_string(),
            });
        }
    };
    fs::create_dir_all(&parent).map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.clone()))?;

    let mut temp_file =
        NamedTempFile::new_in(&parent).map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.clone()))?;
    temp_file
        .write_all(contents)
        .map_err(|e| StorageSystemError::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
    temp_file
        .persist(path)
        .map_err(|e| StorageSystemError::io(e.error, "persist_temp_file", path.to_path_buf()))?;
    Ok(())
}

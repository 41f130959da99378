//! Descriptor cache: remembers which plugin id lives in which directory,
//! keyed by a fingerprint of the descriptor file, so unchanged plugins can
//! be registered as stubs without parsing their descriptors.
//!
//! The persisted form is one line per entry: `id|fingerprint|directory`.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{debug, warn};

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::{DescriptorParser, PluginId};
use crate::plugin_system::plugin::PluginDescriptor;

/// Whether an entry was seen during the current scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAge {
    /// Not seen yet during this scan
    Unused,
    /// Seen and still matching the descriptor on disk
    Reused,
    /// Created or refreshed during this scan
    New,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub plugin_id: PluginId,
    pub fingerprint: String,
    pub directory: PathBuf,
    pub age: CacheAge,
}

/// What [`DescriptorCache::lookup_or_parse`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Fingerprint matched; the descriptor is a stub
    Reused,
    /// The directory was not cached before
    Added,
    /// The descriptor changed but still declares the same id
    Modified,
    /// The descriptor changed and now declares another id
    Replaced { previous_id: PluginId },
}

#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: BTreeMap<PathBuf, CacheEntry>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, directory: &Path) -> Option<&CacheEntry> {
        self.entries.get(directory)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Fingerprint of a descriptor file: device, inode, size and mtime.
    ///
    /// `None` if the file can't be inspected.
    pub fn fingerprint(path: &Path) -> Option<String> {
        let metadata = fs::metadata(path).ok()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Some(format!("{:x}-{:x}-{:x}-{:x}", metadata.dev(), metadata.ino(), metadata.len(), mtime))
        }
        #[cfg(not(unix))]
        {
            Some(format!("{:x}-{:x}", metadata.len(), mtime))
        }
    }

    /// Whether the cached fingerprint for `directory` still matches the
    /// descriptor on disk.
    pub fn is_fresh(&self, directory: &Path, parser: &DescriptorParser) -> bool {
        let Some(entry) = self.entries.get(directory) else {
            return false;
        };
        parser
            .descriptor_path(directory)
            .and_then(|path| Self::fingerprint(&path))
            .is_some_and(|fp| fp == entry.fingerprint)
    }

    /// Mark an entry as seen during this scan
    pub fn touch(&mut self, directory: &Path) -> bool {
        match self.entries.get_mut(directory) {
            Some(entry) => {
                if entry.age == CacheAge::Unused {
                    entry.age = CacheAge::Reused;
                }
                true
            }
            None => false,
        }
    }

    pub fn forget(&mut self, directory: &Path) -> Option<CacheEntry> {
        self.entries.remove(directory)
    }

    /// Mark every entry unused before a scan
    pub fn reset_ages(&mut self) {
        for entry in self.entries.values_mut() {
            entry.age = CacheAge::Unused;
        }
    }

    /// Produce a descriptor for the plugin in `directory`.
    ///
    /// An entry whose fingerprint still matches yields a stub; otherwise
    /// the descriptor is parsed and the entry created or refreshed.
    /// `Ok(None)` means the directory holds no descriptor.
    pub fn lookup_or_parse(
        &mut self,
        directory: &Path,
        parser: &DescriptorParser,
    ) -> Result<Option<(PluginDescriptor, CacheOutcome)>, PluginSystemError> {
        let Some(path) = parser.descriptor_path(directory) else {
            return Ok(None);
        };
        let fingerprint = Self::fingerprint(&path);

        if let (Some(entry), Some(fp)) = (self.entries.get_mut(directory), fingerprint.as_ref()) {
            if &entry.fingerprint == fp {
                entry.age = CacheAge::Reused;
                debug!("Cache hit for '{}' in {}", entry.plugin_id, directory.display());
                let stub = PluginDescriptor::stub(entry.plugin_id.clone(), directory.to_path_buf());
                return Ok(Some((stub, CacheOutcome::Reused)));
            }
        }

        let full = match parser.parse_dir(directory) {
            Ok(full) => full,
            Err(e) => {
                self.entries.remove(directory);
                return Err(e);
            }
        };
        let previous = self.entries.get(directory).map(|e| e.plugin_id.clone());
        let outcome = match previous {
            None => CacheOutcome::Added,
            Some(previous_id) if previous_id == full.id => CacheOutcome::Modified,
            Some(previous_id) => CacheOutcome::Replaced { previous_id },
        };
        match fingerprint {
            Some(fingerprint) => {
                self.entries.insert(
                    directory.to_path_buf(),
                    CacheEntry {
                        plugin_id: full.id.clone(),
                        fingerprint,
                        directory: directory.to_path_buf(),
                        age: CacheAge::New,
                    },
                );
            }
            None => {
                self.entries.remove(directory);
            }
        }
        Ok(Some((PluginDescriptor::full(directory.to_path_buf(), full), outcome)))
    }

    /// Entries seen during the last scan, one line each
    pub fn serialize(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.age != CacheAge::Unused)
            .map(|e| format!("{}|{}|{}", e.plugin_id, e.fingerprint, e.directory.display()))
            .collect()
    }

    /// Load persisted lines. Malformed lines are skipped.
    ///
    /// Returns the number of entries restored.
    pub fn restore<I, S>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut restored = 0;
        for line in lines {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, '|');
            let (Some(id), Some(fingerprint), Some(directory)) = (parts.next(), parts.next(), parts.next()) else {
                warn!("Ignoring malformed plugin cache line: {}", line);
                continue;
            };
            let Ok(plugin_id) = PluginId::new(id) else {
                warn!("Ignoring plugin cache line with invalid id: {}", line);
                continue;
            };
            if fingerprint.is_empty() || directory.is_empty() {
                warn!("Ignoring malformed plugin cache line: {}", line);
                continue;
            }
            let directory = PathBuf::from(directory);
            self.entries.insert(
                directory.clone(),
                CacheEntry {
                    plugin_id,
                    fingerprint: fingerprint.to_string(),
                    directory,
                    age: CacheAge::Unused,
                },
            );
            restored += 1;
        }
        restored
    }
}

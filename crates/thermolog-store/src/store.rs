//! Partition store implementation.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use thermolog_types::{PartitionKey, Reading};

use crate::error::{Error, Result};

/// File-backed store holding one JSON array of readings per month.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: PathBuf,
}

impl PartitionStore {
    /// Use the given directory as the storage root.
    ///
    /// Nothing is created on disk until a partition is located.
    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Use the default data directory.
    pub fn open_default() -> Self {
        Self::open(crate::default_data_dir())
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a partition file, without touching the filesystem.
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.year.to_string()).join(key.file_name())
    }

    /// Locate a partition, creating its year directory if needed.
    ///
    /// Idempotent: an existing directory is not an error.
    pub fn locate(&self, key: &PartitionKey) -> Result<PathBuf> {
        let path = self.partition_path(key);
        if let Some(dir) = path.parent()
            && !dir.is_dir()
        {
            info!("Creating partition directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| Error::CreateDirectory {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        Ok(path)
    }

    /// Load a partition, creating it empty if it does not exist yet.
    ///
    /// This never fails: a partition that exists but cannot be read or
    /// parsed is logged and treated as empty, as is a failure to create the
    /// empty partition. Creation never replaces a partition written
    /// concurrently by [`save`](Self::save).
    pub fn load_or_create(&self, path: &Path) -> Vec<Reading> {
        match fs::read(path) {
            Ok(bytes) => parse_partition(path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Partition {} not found, creating it", path.display());
                match create_empty(path) {
                    Ok(()) => Vec::new(),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        debug!("Partition {} appeared concurrently", path.display());
                        read_partition(path)
                    }
                    Err(e) => {
                        warn!("Failed to create empty partition {}: {}", path.display(), e);
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!("Failed to read partition {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace the whole contents of a partition.
    ///
    /// The readings are written to a uniquely named temporary file in the
    /// same directory which is then renamed over `path`.
    pub fn save(&self, path: &Path, readings: &[Reading]) -> Result<()> {
        let content = serde_json::to_vec_pretty(readings)?;
        let write_error = |source: io::Error| Error::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(parent_dir(path)).map_err(write_error)?;
        tmp.write_all(&content).map_err(write_error)?;
        tmp.persist(path).map_err(|e| write_error(e.error))?;

        debug!("Saved {} readings to {}", readings.len(), path.display());
        Ok(())
    }

    /// Locate and load a partition.
    pub fn load_partition(&self, key: &PartitionKey) -> Result<Vec<Reading>> {
        let path = self.locate(key)?;
        Ok(self.load_or_create(&path))
    }

    /// Locate and replace a partition.
    pub fn save_partition(&self, key: &PartitionKey, readings: &[Reading]) -> Result<()> {
        let path = self.locate(key)?;
        self.save(&path, readings)
    }

    /// List the partitions present on disk, oldest first.
    ///
    /// Entries that do not look like partitions are skipped. A missing root
    /// directory yields an empty list.
    pub fn list_partitions(&self) -> Result<Vec<PartitionKey>> {
        let years = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for year in years {
            let year = year?;
            if !year.file_type()?.is_dir() {
                continue;
            }
            let year_name = year.file_name();
            let Some(year_name) = year_name.to_str() else {
                continue;
            };

            for file in fs::read_dir(year.path())? {
                let file = file?;
                let file_name = file.file_name();
                if let Some(key) = file_name
                    .to_str()
                    .and_then(|name| PartitionKey::from_parts(year_name, name).ok())
                {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Atomically create `path` holding an empty list; fails with
/// `AlreadyExists` if the partition is already there.
fn create_empty(path: &Path) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(b"[]")?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_partition(path: &Path) -> Vec<Reading> {
    match fs::read(path) {
        Ok(bytes) => parse_partition(path, &bytes),
        Err(e) => {
            warn!("Failed to read partition {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn parse_partition(path: &Path, bytes: &[u8]) -> Vec<Reading> {
    match serde_json::from_slice::<Vec<Reading>>(bytes) {
        Ok(readings) => readings,
        Err(e) => {
            warn!(
                "Partition {} is not a valid reading list, treating as empty: {}",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

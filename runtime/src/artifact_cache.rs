//! On-disk artifact cache keyed by signature.
//!
//! Each signature key owns one directory under the cache root:
//!
//! ```text
//! <root>/<key>/op.cpp     generated glue source
//! <root>/<key>/<key>.so   compiled artifact
//! <root>/<key>/lock       exclusive build lock
//! ```
//!
//! An entry is reusable while its artifact is non-empty and not older than the
//! execution runtime's native library. Populating an entry happens under the
//! entry's [`BuildLock`], and waiters re-check the cache once they hold it, so a
//! key is compiled once no matter how many threads or processes ask for it.
//!
//! Operators already loaded from an artifact are kept in a lock-free map so kernels
//! sharing a signature share one operator.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use papaya::HashMap;
use snafu::ResultExt;
use tessera_device::{ExecutionRuntime, Operator};
use tessera_dtype::Signature;

use crate::error::{CreateDirectorySnafu, EvictSnafu, MetadataSnafu, Result, WriteSourceSnafu};
use crate::lock::BuildLock;
use crate::toolchain::NativeOpBuilder;

/// Glue source file name inside an entry.
pub const SOURCE_FILE: &str = "op.cpp";
/// Build lock file name inside an entry.
pub const LOCK_FILE: &str = "lock";

/// Paths of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub dir: PathBuf,
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub lock: PathBuf,
    /// Artifact modification time, when it was looked at.
    pub modified: Option<SystemTime>,
}

struct LoadedOperator {
    operator: Arc<dyn Operator>,
    modified: SystemTime,
}

pub struct ArtifactCache {
    root: PathBuf,
    runtime: Arc<dyn ExecutionRuntime>,
    loaded: HashMap<String, LoadedOperator>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>, runtime: Arc<dyn ExecutionRuntime>) -> Self {
        Self { root: root.into(), runtime, loaded: HashMap::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry layout for `key`. Touches nothing on disk.
    pub fn entry(&self, key: &str) -> CacheEntry {
        let dir = self.root.join(key);
        CacheEntry {
            key: key.to_string(),
            source: dir.join(SOURCE_FILE),
            artifact: dir.join(format!("{key}.so")),
            lock: dir.join(LOCK_FILE),
            dir,
            modified: None,
        }
    }

    /// The entry for `key` if its artifact exists and is non-empty.
    pub fn locate(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut entry = self.entry(key);
        let meta = match std::fs::metadata(&entry.artifact) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(source).context(MetadataSnafu { path: &entry.artifact }),
        };
        if !meta.is_file() || meta.len() == 0 {
            return Ok(None);
        }

        entry.modified = Some(meta.modified().context(MetadataSnafu { path: &entry.artifact })?);
        Ok(Some(entry))
    }

    /// Whether `entry` must be rebuilt: no artifact, or one older than the runtime library.
    pub fn is_stale(&self, entry: &CacheEntry) -> Result<bool> {
        match entry.modified {
            None => Ok(true),
            Some(modified) => Ok(modified < self.runtime.library().modified()?),
        }
    }

    /// The entry for `key` if it can be used as is.
    pub fn fresh(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.locate(key)? {
            Some(entry) if !self.is_stale(&entry)? => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Create the entry directory for `key` if needed.
    pub fn ensure_directory(&self, key: &str) -> Result<CacheEntry> {
        let entry = self.entry(key);
        std::fs::create_dir_all(&entry.dir).context(CreateDirectorySnafu { path: &entry.dir })?;
        Ok(entry)
    }

    /// Populate the entry for `key` from glue `source` under the build lock.
    ///
    /// A caller that waited for the lock while someone else built the same key gets
    /// the fresh entry back without compiling anything.
    pub fn build(&self, key: &str, source: &str, builder: &NativeOpBuilder) -> Result<CacheEntry> {
        let entry = self.ensure_directory(key)?;
        let lock = BuildLock::acquire(&entry.lock)?;

        if let Some(fresh) = self.fresh(key)? {
            tracing::debug!(cache.key = %key, "artifact built while waiting for lock");
            lock.release()?;
            return Ok(fresh);
        }

        write_atomic(&entry.source, source)?;
        builder.compile(&entry)?;
        lock.release()?;

        let modified = std::fs::metadata(&entry.artifact)
            .and_then(|m| m.modified())
            .context(MetadataSnafu { path: &entry.artifact })?;
        Ok(CacheEntry { modified: Some(modified), ..entry })
    }

    /// Operator for `signature`, building its artifact first if missing or stale.
    pub fn resolve(&self, signature: &Signature, builder: &NativeOpBuilder) -> Result<Arc<dyn Operator>> {
        let key = signature.key();
        match self.fresh(&key)? {
            Some(entry) => {
                tracing::debug!(cache.key = %key, "artifact cache hit");
                self.load(&entry)
            }
            None => builder.build(self, signature),
        }
    }

    /// Load the artifact of `entry`, reusing an operator already loaded from it.
    pub fn load(&self, entry: &CacheEntry) -> Result<Arc<dyn Operator>> {
        let guard = self.loaded.guard();
        if let (Some(loaded), Some(modified)) = (self.loaded.get(&entry.key, &guard), entry.modified)
            && loaded.modified == modified
        {
            return Ok(Arc::clone(&loaded.operator));
        }

        self.runtime.load_library(&entry.artifact)?;
        let operator = self.runtime.operator(&entry.key)?;
        if let Some(modified) = entry.modified {
            self.loaded.insert(entry.key.clone(), LoadedOperator { operator: Arc::clone(&operator), modified }, &guard);
        }
        Ok(operator)
    }

    /// Valid entries on disk, sorted by key.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(source).context(MetadataSnafu { path: &self.root }),
        };

        let mut entries = Vec::new();
        for item in dir {
            let item = item.context(MetadataSnafu { path: &self.root })?;
            let Some(name) = item.file_name().to_str().map(str::to_string) else { continue };
            // Foreign directories are not ours to report.
            if tessera_dtype::decode(&name).is_err() {
                continue;
            }
            if let Some(entry) = self.locate(&name)? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove the entry for `key`. Returns whether anything was on disk.
    pub fn evict(&self, key: &str) -> Result<bool> {
        let entry = self.entry(key);
        self.loaded.pin().remove(key);

        match std::fs::remove_dir_all(&entry.dir) {
            Ok(()) => {
                tracing::debug!(cache.key = %key, "evicted cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(source).context(EvictSnafu { path: entry.dir }),
        }
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache").field("root", &self.root).field("loaded", &self.loaded.len()).finish()
    }
}

/// Write `contents` next to `path` and rename it into place.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir).context(WriteSourceSnafu { path })?;
    file.write_all(contents.as_bytes()).context(WriteSourceSnafu { path })?;
    file.persist(path).map_err(|e| e.error).context(WriteSourceSnafu { path })?;
    Ok(())
}

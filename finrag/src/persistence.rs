//! Durable storage for [`InMemoryVectorIndex`].
//!
//! An index directory holds:
//!
//! - `manifest.json`: model id, dimensionality, layout version, entry count,
//!   and the name of the entries file it describes
//! - `entries-<generation>.json`: every [`IndexEntry`] of one flush
//! - `.lock`: an advisory lock target; its presence means nothing
//!
//! A flush writes a new entries generation first and then renames the
//! manifest into place, so the manifest rename is the only commit point. The
//! previous generation is kept until the next flush.
//!
//! Writers hold an exclusive OS lock on `.lock` and readers a shared one. The
//! kernel drops the lock with the process, so a killed process never leaves
//! the directory locked.

use std::fs::{File, TryLockError};
use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::document::IndexEntry;
use crate::error::{RagError, Result};
use crate::inmemory::InMemoryVectorIndex;
use crate::vectorstore::{INDEX_FORMAT_VERSION, IndexManifest, VectorIndex};

const MANIFEST_FILE: &str = "manifest.json";
const LEGACY_ENTRIES_FILE: &str = "entries.json";
const LOCK_FILE: &str = ".lock";
const BACKEND: &str = "IndexStore";

#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    #[serde(flatten)]
    manifest: IndexManifest,
    entry_count: usize,
    #[serde(default)]
    generation: u64,
    #[serde(default = "legacy_entries_file")]
    entries_file: String,
    updated_at: DateTime<Utc>,
}

fn legacy_entries_file() -> String {
    LEGACY_ENTRIES_FILE.to_string()
}

fn entries_file_name(generation: u64) -> String {
    format!("entries-{generation}.json")
}

fn is_entries_file(name: &str) -> bool {
    name == LEGACY_ENTRIES_FILE || (name.starts_with("entries-") && name.ends_with(".json"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Exclusive,
    Shared,
}

/// Opens index directories.
///
/// # Example
///
/// ```rust,ignore
/// use finrag::{IndexManifest, IndexStore};
///
/// let manifest = IndexManifest::new("finrag-hash-v1", 384);
/// let count = IndexStore::with_shared_index("finrag_index", manifest, |index| async move {
///     Ok(index.len().await)
/// })
/// .await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStore;

impl IndexStore {
    /// Acquire `dir` for writing and load the index stored there, or start an
    /// empty one if the directory holds no index yet.
    ///
    /// # Errors
    ///
    /// - [`RagError::VectorStoreError`] if another handle holds the directory
    /// - [`RagError::IndexCorruption`] if the stored index was built with a
    ///   different model, dimensionality, or layout, or cannot be decoded
    pub async fn open(dir: impl AsRef<Path>, expected: IndexManifest) -> Result<IndexHandle> {
        Self::open_with(dir.as_ref(), expected, Access::Exclusive).await
    }

    /// Acquire `dir` for reading. Any number of shared handles may coexist,
    /// but not alongside a writer.
    ///
    /// A shared handle never writes: flushing one whose index was modified
    /// fails with [`RagError::VectorStoreError`].
    pub async fn open_shared(dir: impl AsRef<Path>, expected: IndexManifest) -> Result<IndexHandle> {
        Self::open_with(dir.as_ref(), expected, Access::Shared).await
    }

    async fn open_with(dir: &Path, expected: IndexManifest, access: Access) -> Result<IndexHandle> {
        let dir = dir.to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let lock = acquire_lock(&dir, access)?;

        // On a load error `lock` is dropped here, releasing the directory.
        let loaded = load_from(&dir, &expected).await?;
        let opened_revision = loaded.index.revision().await;
        info!(path = %dir.display(), model = %expected.model_id, ?access, "opened index");
        Ok(IndexHandle {
            dir,
            access,
            index: Arc::new(loaded.index),
            flushed_revision: loaded.revision,
            opened_revision,
            generation: loaded.generation,
            entries_file: loaded.entries_file,
            closed: false,
            _lock: lock,
        })
    }

    /// Load an index without acquiring the directory, e.g. for inspection.
    pub async fn load(dir: impl AsRef<Path>, expected: IndexManifest) -> Result<InMemoryVectorIndex> {
        load_from(dir.as_ref(), &expected).await.map(|loaded| loaded.index)
    }

    /// Run `f` against the index in `dir`, flushing afterwards even when `f` fails.
    ///
    /// An error from `f` takes precedence over a flush error.
    pub async fn with_index<F, Fut, T>(
        dir: impl AsRef<Path>,
        expected: IndexManifest,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<InMemoryVectorIndex>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = Self::open(dir, expected).await?;
        Self::run_scoped(handle, f).await
    }

    /// Run `f` against the index in `dir` under a shared lock.
    pub async fn with_shared_index<F, Fut, T>(
        dir: impl AsRef<Path>,
        expected: IndexManifest,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<InMemoryVectorIndex>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = Self::open_shared(dir, expected).await?;
        Self::run_scoped(handle, f).await
    }

    async fn run_scoped<F, Fut, T>(handle: IndexHandle, f: F) -> Result<T>
    where
        F: FnOnce(Arc<InMemoryVectorIndex>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = f(handle.index()).await;
        let closed = handle.close().await;
        let value = outcome?;
        closed?;
        Ok(value)
    }
}

/// Locked access to an index directory.
///
/// Call [`close`](IndexHandle::close) to flush and release. Dropping an
/// unclosed writable handle flushes synchronously on a best-effort basis.
#[derive(Debug)]
pub struct IndexHandle {
    dir: PathBuf,
    access: Access,
    index: Arc<InMemoryVectorIndex>,
    /// Revision last written to disk; `None` if nothing was ever written.
    flushed_revision: Option<u64>,
    opened_revision: u64,
    generation: u64,
    entries_file: Option<String>,
    closed: bool,
    _lock: File,
}

impl IndexHandle {
    /// The loaded index.
    pub fn index(&self) -> Arc<InMemoryVectorIndex> {
        Arc::clone(&self.index)
    }

    /// The directory this handle holds.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether this handle was opened with [`IndexStore::open_shared`].
    pub fn is_shared(&self) -> bool {
        self.access == Access::Shared
    }

    /// Write the index to disk if it changed since the last flush.
    pub async fn flush(&mut self) -> Result<()> {
        let (revision, entries) = self.index.snapshot().await;
        if !self.needs_write(revision)? {
            debug!(path = %self.dir.display(), "index unchanged, skipping flush");
            return Ok(());
        }

        let dir = self.dir.clone();
        let manifest = self.index.manifest().clone();
        let generation = self.generation + 1;
        let previous = self.entries_file.clone();
        let entry_count = entries.len();
        let written = tokio::task::spawn_blocking(move || {
            commit(&dir, &manifest, &entries, generation, previous.as_deref())
        })
        .await
        .map_err(|e| store_error(format!("flush task failed: {e}")))??;

        self.record_commit(revision, generation, written);
        info!(path = %self.dir.display(), entry_count, generation, "flushed index");
        Ok(())
    }

    /// Flush and release the directory.
    pub async fn close(mut self) -> Result<()> {
        let flushed = self.flush().await;
        self.closed = true;
        flushed
    }

    fn needs_write(&self, revision: u64) -> Result<bool> {
        if self.flushed_revision == Some(revision) {
            return Ok(false);
        }
        if self.is_shared() {
            if revision == self.opened_revision {
                return Ok(false);
            }
            return Err(store_error(format!(
                "{} was opened for reading; modifications cannot be flushed",
                self.dir.display()
            )));
        }
        Ok(true)
    }

    fn record_commit(&mut self, revision: u64, generation: u64, entries_file: String) {
        self.flushed_revision = Some(revision);
        self.generation = generation;
        self.entries_file = Some(entries_file);
    }

    fn flush_blocking(&mut self) -> Result<()> {
        let Some((revision, entries)) = self.index.try_snapshot() else {
            warn!(path = %self.dir.display(), "index locked during drop, changes not flushed");
            return Ok(());
        };
        if !self.needs_write(revision)? {
            return Ok(());
        }
        let generation = self.generation + 1;
        let written = commit(
            &self.dir,
            self.index.manifest(),
            &entries,
            generation,
            self.entries_file.as_deref(),
        )?;
        self.record_commit(revision, generation, written);
        Ok(())
    }
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush_blocking() {
            error!(path = %self.dir.display(), error = %e, "failed to flush index on drop");
        }
    }
}

fn store_error(message: String) -> RagError {
    RagError::VectorStoreError { backend: BACKEND.to_string(), message }
}

fn acquire_lock(dir: &Path, access: Access) -> Result<File> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))?;
    let locked = match access {
        Access::Exclusive => file.try_lock(),
        Access::Shared => file.try_lock_shared(),
    };
    match locked {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => {
            Err(store_error(format!("{} is locked by another handle", dir.display())))
        }
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

struct LoadedIndex {
    index: InMemoryVectorIndex,
    revision: Option<u64>,
    generation: u64,
    entries_file: Option<String>,
}

async fn load_from(dir: &Path, expected: &IndexManifest) -> Result<LoadedIndex> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest_json = match tokio::fs::read(&manifest_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            debug!(path = %dir.display(), "no stored index, starting empty");
            return Ok(LoadedIndex {
                index: InMemoryVectorIndex::new(expected.clone()),
                revision: None,
                generation: 0,
                entries_file: None,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let stored: StoredManifest = serde_json::from_slice(&manifest_json)
        .map_err(|e| RagError::IndexCorruption(format!("unreadable manifest: {e}")))?;
    check_manifest(&stored.manifest, expected)?;
    if !is_entries_file(&stored.entries_file) {
        return Err(RagError::IndexCorruption(format!(
            "manifest names an invalid entries file '{}'",
            stored.entries_file
        )));
    }

    let entries_json = tokio::fs::read(dir.join(&stored.entries_file)).await.map_err(|e| {
        RagError::IndexCorruption(format!("entries file '{}' unreadable: {e}", stored.entries_file))
    })?;
    let entries: Vec<IndexEntry> = serde_json::from_slice(&entries_json)
        .map_err(|e| RagError::IndexCorruption(format!("unreadable entries: {e}")))?;
    if entries.len() != stored.entry_count {
        return Err(RagError::IndexCorruption(format!(
            "manifest lists {} entries, found {}",
            stored.entry_count,
            entries.len()
        )));
    }

    let index = InMemoryVectorIndex::from_entries(stored.manifest, entries)?;
    let revision = index.revision().await;
    Ok(LoadedIndex {
        index,
        revision: Some(revision),
        generation: stored.generation,
        entries_file: Some(stored.entries_file),
    })
}

fn check_manifest(stored: &IndexManifest, expected: &IndexManifest) -> Result<()> {
    if stored.format_version != INDEX_FORMAT_VERSION {
        return Err(RagError::IndexCorruption(format!(
            "index layout version {} is not supported (expected {INDEX_FORMAT_VERSION})",
            stored.format_version
        )));
    }
    if stored.model_id != expected.model_id {
        return Err(RagError::IndexCorruption(format!(
            "index was built with model '{}', not '{}'",
            stored.model_id, expected.model_id
        )));
    }
    if stored.dimensions != expected.dimensions {
        return Err(RagError::IndexCorruption(format!(
            "index has {} dimensions, embedder produces {}",
            stored.dimensions, expected.dimensions
        )));
    }
    Ok(())
}

/// Write `entries` as `generation`, then publish it through the manifest.
/// Returns the new entries file name.
fn commit(
    dir: &Path,
    manifest: &IndexManifest,
    entries: &[IndexEntry],
    generation: u64,
    previous: Option<&str>,
) -> Result<String> {
    let entries_file = entries_file_name(generation);
    let entries_bytes =
        serde_json::to_vec(entries).map_err(|e| store_error(format!("encoding entries: {e}")))?;
    write_atomic(&dir.join(&entries_file), &entries_bytes)?;

    let stored = StoredManifest {
        manifest: manifest.clone(),
        entry_count: entries.len(),
        generation,
        entries_file: entries_file.clone(),
        updated_at: Utc::now(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&stored)
        .map_err(|e| store_error(format!("encoding manifest: {e}")))?;
    write_atomic(&dir.join(MANIFEST_FILE), &manifest_bytes)?;

    prune_generations(dir, &entries_file, previous);
    Ok(entries_file)
}

/// Remove entries files other than the current and previous generation.
fn prune_generations(dir: &Path, current: &str, previous: Option<&str>) {
    let listing = match std::fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "could not list index directory");
            return;
        }
    };
    for item in listing.flatten() {
        let name = item.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_entries_file(name) || name == current || Some(name) == previous {
            continue;
        }
        if let Err(e) = std::fs::remove_file(item.path()) {
            warn!(file = name, error = %e, "could not remove stale entries file");
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

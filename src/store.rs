use std::fs;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, info};

use crate::domain::Record;
use crate::error::FeedError;

/// Shared, immutable view of one committed cache state.
pub type Snapshot = Arc<CacheState>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    /// Time of the last full write. Appends leave it untouched.
    pub refreshed_at: DateTime<Utc>,
    #[serde(default)]
    pub generation: u64,
    pub records: Vec<Record>,
}

impl CacheState {
    pub fn new(records: Vec<Record>, refreshed_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            refreshed_at,
            generation,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_stale_at(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.refreshed_at).to_std() {
            Ok(age) => age > threshold,
            // refreshed_at in the future counts as fresh
            Err(_) => false,
        }
    }
}

pub trait SnapshotStore: Send + Sync {
    /// Last committed snapshot, or `None` when nothing was ever written.
    fn load(&self) -> Result<Option<Snapshot>, FeedError>;

    /// Replaces the snapshot, resets the freshness clock and starts a new generation.
    fn write_full(&self, records: Vec<Record>) -> Result<Snapshot, FeedError>;

    /// Appends to the current snapshot without touching the freshness clock.
    fn append(&self, records: &[Record]) -> Result<Snapshot, FeedError>;

    /// Like [`SnapshotStore::append`], but only while the snapshot still
    /// belongs to `generation`.
    fn append_to_generation(
        &self,
        generation: u64,
        records: &[Record],
    ) -> Result<Snapshot, FeedError>;

    /// An absent snapshot counts as stale.
    fn is_stale(&self, threshold: Duration) -> Result<bool, FeedError> {
        Ok(match self.load()? {
            Some(snapshot) => snapshot.is_stale_at(threshold, Utc::now()),
            None => true,
        })
    }
}

/// JSON-file backed snapshot store.
///
/// Mutations are serialized through `writer` and land on disk via a temp
/// file rename before the in-memory snapshot is swapped, so readers only
/// ever see fully committed states and never wait on disk I/O.
#[derive(Debug)]
pub struct FileStore {
    path: Utf8PathBuf,
    writer: Mutex<()>,
    current: RwLock<Option<Snapshot>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Persisted {
    Stamped(CacheState),
    Legacy(Vec<Record>),
}

impl FileStore {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, FeedError> {
        let path = path.into();
        let current = read_snapshot(&path)?;
        if let Some(snapshot) = &current {
            debug!(
                path = %path,
                records = snapshot.len(),
                generation = snapshot.generation,
                "loaded cached snapshot"
            );
        }
        Ok(Self {
            path,
            writer: Mutex::new(()),
            current: RwLock::new(current.map(Arc::new)),
        })
    }

    pub fn default_path() -> Result<Utf8PathBuf, FeedError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.cache_dir().join("collection-feed").join("vam_data.json"),
                )
                .ok()
            })
            .ok_or_else(|| FeedError::StoreIo("unable to resolve cache directory".to_string()))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn current(&self) -> Result<Option<Snapshot>, FeedError> {
        let guard = self
            .current
            .read()
            .map_err(|_| FeedError::StoreIo("snapshot lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn commit(&self, state: CacheState) -> Result<Snapshot, FeedError> {
        write_snapshot(&self.path, &state)?;
        let snapshot = Arc::new(state);
        let mut guard = self
            .current
            .write()
            .map_err(|_| FeedError::StoreIo("snapshot lock poisoned".to_string()))?;
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn append_checked(
        &self,
        generation: Option<u64>,
        records: &[Record],
    ) -> Result<Snapshot, FeedError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| FeedError::StoreIo("writer lock poisoned".to_string()))?;
        let current = self.current()?.ok_or(FeedError::SnapshotMissing)?;
        if let Some(expected) = generation {
            if current.generation != expected {
                return Err(FeedError::GenerationMismatch {
                    expected,
                    actual: current.generation,
                });
            }
        }
        let mut merged = Vec::with_capacity(current.len() + records.len());
        merged.extend_from_slice(&current.records);
        merged.extend_from_slice(records);
        let snapshot = self.commit(CacheState::new(
            merged,
            current.refreshed_at,
            current.generation,
        ))?;
        debug!(
            appended = records.len(),
            total = snapshot.len(),
            generation = snapshot.generation,
            "appended to snapshot"
        );
        Ok(snapshot)
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Snapshot>, FeedError> {
        self.current()
    }

    fn write_full(&self, records: Vec<Record>) -> Result<Snapshot, FeedError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| FeedError::StoreIo("writer lock poisoned".to_string()))?;
        let generation = self
            .current()?
            .map(|snapshot| snapshot.generation + 1)
            .unwrap_or(1);
        let snapshot = self.commit(CacheState::new(records, Utc::now(), generation))?;
        info!(
            path = %self.path,
            records = snapshot.len(),
            generation,
            "wrote full snapshot"
        );
        Ok(snapshot)
    }

    fn append(&self, records: &[Record]) -> Result<Snapshot, FeedError> {
        self.append_checked(None, records)
    }

    fn append_to_generation(
        &self,
        generation: u64,
        records: &[Record],
    ) -> Result<Snapshot, FeedError> {
        self.append_checked(Some(generation), records)
    }
}

fn read_snapshot(path: &Utf8Path) -> Result<Option<CacheState>, FeedError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| FeedError::StoreIo(err.to_string()))?;
    let persisted: Persisted =
        serde_json::from_str(&content).map_err(|err| FeedError::StoreCorrupt(err.to_string()))?;
    match persisted {
        Persisted::Stamped(state) => Ok(Some(state)),
        Persisted::Legacy(records) => {
            let modified = fs::metadata(path.as_std_path())
                .and_then(|meta| meta.modified())
                .map_err(|err| FeedError::StoreIo(err.to_string()))?;
            Ok(Some(CacheState::new(records, DateTime::<Utc>::from(modified), 0)))
        }
    }
}

fn write_snapshot(path: &Utf8Path, state: &CacheState) -> Result<(), FeedError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| FeedError::StoreIo(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".collection-feed")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| FeedError::StoreIo(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, state)
            .map_err(|err| FeedError::StoreIo(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| FeedError::StoreIo(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| FeedError::StoreIo(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| FeedError::StoreIo(err.to_string()))?;
    Ok(())
}

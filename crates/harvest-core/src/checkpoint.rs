//! Persisted set of already-attempted candidate IDs (resume support)

use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::sink::write_atomic;

/// Identifier of one record in the candidate range
pub type CandidateId = u64;

/// Older checkpoint files store IDs as JSON strings
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredId {
    Num(CandidateId),
    Text(String),
}

impl StoredId {
    fn into_id(self) -> io::Result<CandidateId> {
        match self {
            Self::Num(n) => Ok(n),
            Self::Text(s) => s.trim().parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid candidate id in checkpoint: {s:?}"),
                )
            }),
        }
    }
}

struct Inner {
    ids: FxHashSet<CandidateId>,
    /// Inserts not yet written to disk
    pending: usize,
}

/// Thread-safe processed-ID set, rewritten in full (tmp + rename) on flush.
///
/// `flush_every = 1` persists after every insert. Larger values trade
/// durability for throughput: after a hard kill up to `flush_every - 1`
/// IDs may be fetched again.
pub struct CheckpointStore {
    path: PathBuf,
    flush_every: usize,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.path)
            .field("flush_every", &self.flush_every)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Open the checkpoint at `path`, loading existing IDs if the file exists
    pub fn open(path: &Path, flush_every: usize) -> io::Result<Self> {
        let ids = if path.exists() {
            let ids = load_ids(path)?;
            log::info!("Loaded {} processed IDs from {}", ids.len(), path.display());
            ids
        } else {
            FxHashSet::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            flush_every: flush_every.max(1),
            inner: Mutex::new(Inner { ids, pending: 0 }),
        })
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.lock().ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of processed IDs that fall inside `range`
    pub fn count_in(&self, range: &Range<CandidateId>) -> u64 {
        self.lock().ids.iter().filter(|id| range.contains(id)).count() as u64
    }

    /// Mark `id` processed, persisting once enough inserts are pending.
    pub fn record(&self, id: CandidateId) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.ids.insert(id) {
            inner.pending += 1;
        }
        if inner.pending >= self.flush_every {
            self.persist(&mut inner)?;
        }
        Ok(())
    }

    /// Write any pending inserts to disk
    pub fn flush(&self) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.pending > 0 {
            self.persist(&mut inner)?;
        }
        Ok(())
    }

    fn persist(&self, inner: &mut Inner) -> io::Result<()> {
        let json = serde_json::to_vec(&inner.ids).map_err(io::Error::other)?;
        write_atomic(&self.path, &json)?;
        inner.pending = 0;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking worker cannot leave the set half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read a checkpoint file (JSON array of numbers or numeric strings)
pub fn load_ids(path: &Path) -> io::Result<FxHashSet<CandidateId>> {
    let bytes = std::fs::read(path)?;
    let stored: Vec<StoredId> = serde_json::from_slice(&bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("corrupt checkpoint {}: {e}", path.display()),
        )
    })?;
    stored.into_iter().map(StoredId::into_id).collect()
}

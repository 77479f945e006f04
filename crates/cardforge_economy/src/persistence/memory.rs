//! In-process record store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{run_hook, AccountHook, PersistError, PersistResult, Persistence, Record, RecordKey, WriteBatch};
use crate::model::Versioned;

/// Latest version of every record, keyed by [`RecordKey`].
///
/// Shared by the memory store and the journal's replayed index.
#[derive(Debug, Default)]
pub(crate) struct RecordTable {
    records: HashMap<RecordKey, Versioned<Record>>,
}

impl RecordTable {
    pub(crate) fn version_of(&self, key: RecordKey) -> u64 {
        self.records.get(&key).map_or(0, |r| r.version)
    }

    /// Fails on the first write whose expected version is stale.
    pub(crate) fn check(&self, batch: &WriteBatch) -> PersistResult<()> {
        for write in batch.writes() {
            let key = write.record.key();
            let found = self.version_of(key);
            if found != write.expected_version {
                return Err(PersistError::Conflict {
                    key,
                    expected: write.expected_version,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Applies a batch that already passed `check`.
    pub(crate) fn apply(&mut self, batch: &WriteBatch) {
        for write in batch.writes() {
            self.records.insert(
                write.record.key(),
                Versioned {
                    version: write.expected_version + 1,
                    value: write.record.clone(),
                },
            );
        }
    }

    pub(crate) fn get(&self, key: RecordKey) -> Option<Versioned<Record>> {
        self.records.get(&key).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Versioned<Record>> {
        let mut all: Vec<_> = self.records.values().cloned().collect();
        all.sort_by_key(|r| r.value.key());
        all
    }
}

/// A failure to inject into the next commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Report a timeout without writing.
    Timeout,
    /// Report a version conflict on the batch's first record without writing.
    Conflict,
    /// Report an I/O failure without writing.
    Io,
}

/// In-memory [`Persistence`].
///
/// Commits are serialized by a table-wide write lock acquired with the
/// request timeout.
#[derive(Default)]
pub struct MemoryStore {
    table: RwLock<RecordTable>,
    sequence: AtomicU64,
    faults: Mutex<VecDeque<Fault>>,
    hook: Option<Box<dyn AccountHook>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the account pipeline step.
    #[must_use]
    pub fn with_hook(mut self, hook: impl AccountHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Makes the next commit fail with `fault`. Faults queue up in order.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

impl Persistence for MemoryStore {
    fn load(&self, key: RecordKey) -> PersistResult<Option<Versioned<Record>>> {
        Ok(self.table.read().get(key))
    }

    fn scan(&self) -> PersistResult<Vec<Versioned<Record>>> {
        Ok(self.table.read().all())
    }

    fn commit(&self, batch: &WriteBatch, timeout: Duration) -> PersistResult<u64> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(match fault {
                Fault::Timeout => PersistError::Timeout,
                Fault::Conflict => {
                    let key = batch
                        .writes()
                        .first()
                        .map_or(RecordKey::SupplyTotal, |w| w.record.key());
                    PersistError::Conflict {
                        key,
                        expected: 0,
                        found: 0,
                    }
                }
                Fault::Io => PersistError::Io("injected failure".to_string()),
            });
        }

        let mut table = self.table.try_write_for(timeout).ok_or(PersistError::Timeout)?;
        table.check(batch)?;
        run_hook(self.hook.as_deref(), batch)?;
        table.apply(batch);
        Ok(self.sequence.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

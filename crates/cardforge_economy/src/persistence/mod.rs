//! # Persistence Collaborator
//!
//! The ledger never talks to a database directly. It hands the
//! [`Persistence`] implementation one [`WriteBatch`] per operation and the
//! batch either lands completely or not at all.
//!
//! ## Versioning
//!
//! Every record carries a version. A write names the version it was planned
//! against; the store rejects the whole batch with [`PersistError::Conflict`]
//! if any record moved in the meantime. A missing record has version 0.
//!
//! ## Timeouts
//!
//! `commit` takes the request timeout. A [`PersistError::Timeout`] guarantees
//! nothing was written, which is what makes it safe to retry.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: in-process tables, with fault injection for tests
//! - [`JournalStore`]: append-only CRC-checked journal, replayed on open

mod codec;
mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::{Fault, MemoryStore};

use std::time::Duration;

use thiserror::Error;

use crate::error::EconomyError;
use crate::model::{Account, AccountId, Card, CardId, DailyMint, Versioned};

/// Identifies one stored record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// The global mint counter.
    SupplyTotal,
    /// One account's daily mint counter.
    DailyMint(AccountId),
    /// An account.
    Account(AccountId),
    /// A card.
    Card(CardId),
}

/// A stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// Cards minted so far.
    SupplyTotal(u64),
    /// Daily mint counter of an account.
    DailyMint {
        /// Owning account.
        account_id: AccountId,
        /// The counter.
        mint: DailyMint,
    },
    /// An account.
    Account(Account),
    /// A card.
    Card(Card),
}

impl Record {
    /// The key this record is stored under.
    #[must_use]
    pub const fn key(&self) -> RecordKey {
        match self {
            Self::SupplyTotal(_) => RecordKey::SupplyTotal,
            Self::DailyMint { account_id, .. } => RecordKey::DailyMint(*account_id),
            Self::Account(account) => RecordKey::Account(account.id),
            Self::Card(card) => RecordKey::Card(card.id),
        }
    }
}

/// One conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    /// Version the record was read at (0 = must not exist yet).
    pub expected_version: u64,
    /// The new record.
    pub record: Record,
}

/// Writes that commit together or not at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Adds a write planned against `expected_version`.
    pub fn put(&mut self, expected_version: u64, record: Record) {
        self.writes.push(Write {
            expected_version,
            record,
        });
    }

    /// The writes in insertion order.
    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Persistence failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// The store could not be acquired within the timeout. Nothing was written.
    #[error("persistence call timed out")]
    Timeout,

    /// A record changed since it was read. Nothing was written.
    #[error("version conflict on {key:?}: expected {expected}, found {found}")]
    Conflict {
        /// The record that moved.
        key: RecordKey,
        /// Version the write was planned against.
        expected: u64,
        /// Version found in the store.
        found: u64,
    },

    /// The account pipeline step rejected the record.
    #[error("account {account_id} rejected: {reason}")]
    Rejected {
        /// The account.
        account_id: AccountId,
        /// Why.
        reason: String,
    },

    /// Underlying I/O failure.
    #[error("persistence I/O failure: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl PersistError {
    /// Returns true if the same batch may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Conflict { .. })
    }
}

impl From<PersistError> for EconomyError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::Timeout => Self::Timeout { attempts: 1 },
            PersistError::Conflict { .. } => Self::Conflict { attempts: 1 },
            PersistError::Rejected { reason, .. } => Self::invalid("account", reason),
            PersistError::Io(msg) | PersistError::Corrupt(msg) => Self::Internal(msg),
        }
    }
}

/// Result type for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Explicit pipeline step run by a store before an account record is written.
///
/// This is where work such as credential provisioning belongs; the ledger
/// core never triggers it implicitly.
pub trait AccountHook: Send + Sync {
    /// Inspects an account about to be stored. `created` is true for the
    /// first write of the account.
    ///
    /// # Errors
    ///
    /// Returning an error aborts the whole batch.
    fn before_store(&self, account: &Account, created: bool) -> PersistResult<()>;
}

/// Storage for ledger records.
pub trait Persistence: Send + Sync {
    /// Loads the latest version of one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load(&self, key: RecordKey) -> PersistResult<Option<Versioned<Record>>>;

    /// Loads every record (startup hydration).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self) -> PersistResult<Vec<Versioned<Record>>>;

    /// Atomically applies a batch if every expected version still matches.
    ///
    /// Returns the commit sequence number.
    ///
    /// # Errors
    ///
    /// `Timeout` and `Conflict` leave the store untouched and may be retried.
    fn commit(&self, batch: &WriteBatch, timeout: Duration) -> PersistResult<u64>;
}

/// Runs the account hook over every account write in a batch.
pub(crate) fn run_hook(hook: Option<&dyn AccountHook>, batch: &WriteBatch) -> PersistResult<()> {
    let Some(hook) = hook else {
        return Ok(());
    };
    for write in batch.writes() {
        if let Record::Account(account) = &write.record {
            hook.before_store(account, write.expected_version == 0)?;
        }
    }
    Ok(())
}

//! # Commit Discipline
//!
//! Every mutating ledger operation runs the same loop:
//!
//! ```text
//! lock units ──> plan on copies ──> commit WriteBatch ──> absorb into memory
//!                     ▲                    │
//!                     │   Timeout/Conflict │ (refresh conflicting record)
//!                     └────────────────────┘  at most `commit_attempts` times
//! ```
//!
//! Planning never touches the locked records, so a rejected plan or a failed
//! commit leaves memory exactly as it was. Only a successful commit is
//! absorbed, with each record's version bumped the way the store bumped it.
//!
//! ## Lock Order
//!
//! supply → account → cards in ascending id. Every operation that holds more
//! than one unit acquires them in this order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::EconomyConfig;
use crate::error::{EconomyError, EconomyResult};
use crate::model::{Account, Card, Versioned};
use crate::persistence::{PersistError, Persistence, Record, WriteBatch};
use crate::random::RandomSource;
use crate::supply::SupplyState;

/// Collaborators shared by every ledger component.
pub(crate) struct Context {
    pub(crate) config: Arc<EconomyConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: Arc<dyn RandomSource>,
    pub(crate) store: Arc<dyn Persistence>,
}

/// Acquires a unit lock, giving up after `timeout`.
pub(crate) fn lock<T>(mutex: &Mutex<T>, timeout: Duration) -> EconomyResult<MutexGuard<'_, T>> {
    mutex
        .try_lock_for(timeout)
        .ok_or(EconomyError::Timeout { attempts: 1 })
}

/// The locked units an operation may rewrite.
#[derive(Default)]
pub(crate) struct Scope<'a> {
    pub(crate) supply: Option<&'a mut SupplyState>,
    pub(crate) account: Option<&'a mut Versioned<Account>>,
    pub(crate) cards: Vec<&'a mut Versioned<Card>>,
}

impl<'a> Scope<'a> {
    pub(crate) fn with_account(account: &'a mut Versioned<Account>) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    pub(crate) fn supply(&self) -> EconomyResult<&SupplyState> {
        self.supply
            .as_deref()
            .ok_or_else(|| EconomyError::Internal("supply not locked".to_string()))
    }

    pub(crate) fn account(&self) -> EconomyResult<&Versioned<Account>> {
        self.account
            .as_deref()
            .ok_or_else(|| EconomyError::Internal("account not locked".to_string()))
    }

    /// Writes one committed record back into the locked unit it belongs to.
    ///
    /// Cards not held by this scope are newly minted; they are handed back
    /// for registration.
    fn absorb(&mut self, version: u64, record: Record) -> Option<Versioned<Card>> {
        match record {
            Record::SupplyTotal(total) => {
                if let Some(supply) = self.supply.as_deref_mut() {
                    supply.total = Versioned { version, value: total };
                }
            }
            Record::DailyMint { account_id, mint } => {
                if let Some(supply) = self.supply.as_deref_mut() {
                    supply.daily.insert(account_id, Versioned { version, value: mint });
                }
            }
            Record::Account(account) => {
                if let Some(slot) = self.account.as_deref_mut() {
                    if slot.value.id == account.id {
                        *slot = Versioned { version, value: account };
                    }
                }
            }
            Record::Card(card) => {
                match self.cards.iter_mut().find(|slot| slot.value.id == card.id) {
                    Some(slot) => **slot = Versioned { version, value: card },
                    None => return Some(Versioned { version, value: card }),
                }
            }
        }
        None
    }
}

/// A planned batch and the result to report if it commits.
pub(crate) struct Staged<T> {
    pub(crate) batch: WriteBatch,
    pub(crate) output: T,
}

impl<T> Staged<T> {
    /// A plan with nothing to write.
    pub(crate) const fn nothing(output: T) -> Self {
        Self {
            batch: WriteBatch::new(),
            output,
        }
    }
}

/// Outcome of a committed plan.
pub(crate) struct Committed<T> {
    pub(crate) output: T,
    /// Cards created by the batch, at their committed version.
    pub(crate) minted: Vec<Versioned<Card>>,
}

/// Plans, commits and absorbs with bounded retry.
///
/// `plan` is re-run from the current in-memory state on every attempt.
/// Definitive rejections from `plan` return immediately.
pub(crate) fn execute<T>(
    ctx: &Context,
    timeout: Duration,
    scope: &mut Scope<'_>,
    mut plan: impl FnMut(&Scope<'_>) -> EconomyResult<Staged<T>>,
) -> EconomyResult<Committed<T>> {
    let max_attempts = ctx.config.ledger.commit_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let Staged { batch, output } = plan(scope)?;
        if batch.is_empty() {
            return Ok(Committed {
                output,
                minted: Vec::new(),
            });
        }

        match ctx.store.commit(&batch, timeout) {
            Ok(sequence) => {
                tracing::trace!(sequence, writes = batch.len(), "batch committed");
                let mut minted = Vec::new();
                for write in batch.writes() {
                    if let Some(card) = scope.absorb(write.expected_version + 1, write.record.clone()) {
                        minted.push(card);
                    }
                }
                return Ok(Committed { output, minted });
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, error = %err, "commit failed, retrying");
                if let PersistError::Conflict { key, .. } = err {
                    if let Some(current) = ctx.store.load(key)? {
                        scope.absorb(current.version, current.value);
                    }
                }
            }
            Err(PersistError::Timeout) => {
                return Err(EconomyError::Timeout { attempts: attempt });
            }
            Err(PersistError::Conflict { .. }) => {
                return Err(EconomyError::Conflict { attempts: attempt });
            }
            Err(err) => return Err(err.into()),
        }
    }
}

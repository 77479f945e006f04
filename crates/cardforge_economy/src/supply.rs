//! # Supply Ledger
//!
//! The global mint counter and the per-account daily counters.
//!
//! A reservation checks both caps and increments both counters under a
//! single hold of the supply lock, and that hold spans the persistence
//! commit. Two requests racing for the last slot therefore serialize: the
//! second one plans against the first one's committed total and fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard};

use crate::config::SupplyConfig;
use crate::error::{EconomyError, EconomyResult, ResourceKind};
use crate::model::{AccountId, DailyMint, Versioned};
use crate::persistence::{Record, WriteBatch};
use crate::txn::{self, Context, Scope, Staged};

/// In-memory supply counters with their persisted versions.
#[derive(Debug, Default)]
pub(crate) struct SupplyState {
    pub(crate) total: Versioned<u64>,
    pub(crate) daily: HashMap<AccountId, Versioned<DailyMint>>,
}

impl SupplyState {
    /// The account's counter rolled forward to `today`, with its version.
    fn daily_at(&self, account_id: AccountId, today: NaiveDate) -> (u64, DailyMint) {
        self.daily.get(&account_id).map_or((0, DailyMint::new(today)), |counter| {
            (counter.version, counter.value.rolled(today))
        })
    }

    /// Checks both caps for `count` more cards and returns the incremented
    /// counters. Nothing is changed here.
    pub(crate) fn plan(
        &self,
        config: &SupplyConfig,
        account_id: AccountId,
        count: u32,
        is_vip: bool,
        today: NaiveDate,
    ) -> EconomyResult<MintReservation> {
        if count == 0 {
            return Err(EconomyError::invalid("count", "must be at least 1"));
        }

        let remaining = config.total_supply.saturating_sub(self.total.value);
        if remaining < u64::from(count) {
            return Err(EconomyError::insufficient(
                ResourceKind::GlobalSupply,
                u64::from(count),
                remaining,
            ));
        }

        let (daily_version, daily) = self.daily_at(account_id, today);
        let limit = config.daily_limit(is_vip);
        let daily_remaining = limit.saturating_sub(daily.count);
        if daily_remaining < count {
            return Err(EconomyError::insufficient(
                ResourceKind::DailyLimit,
                u64::from(count),
                u64::from(daily_remaining),
            ));
        }

        Ok(MintReservation {
            account_id,
            count,
            total_minted: self.total.value + u64::from(count),
            daily_count: daily.count + count,
            reset_date: daily.reset_date,
            total_version: self.total.version,
            daily_version,
        })
    }
}

/// A granted mint reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintReservation {
    /// The account the cards are minted for.
    pub account_id: AccountId,
    /// Cards reserved.
    pub count: u32,
    /// Global total including this reservation.
    pub total_minted: u64,
    /// The account's daily count including this reservation.
    pub daily_count: u32,
    /// The UTC day the daily count belongs to.
    pub reset_date: NaiveDate,
    total_version: u64,
    daily_version: u64,
}

impl MintReservation {
    /// Adds the counter updates to a batch.
    pub(crate) fn stage(&self, batch: &mut WriteBatch) {
        batch.put(self.total_version, Record::SupplyTotal(self.total_minted));
        batch.put(
            self.daily_version,
            Record::DailyMint {
                account_id: self.account_id,
                mint: DailyMint {
                    count: self.daily_count,
                    reset_date: self.reset_date,
                },
            },
        );
    }
}

/// Global supply at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupplySnapshot {
    /// Cards minted so far.
    pub total_minted: u64,
    /// The fixed ceiling.
    pub cap: u64,
    /// Cards that can still be minted.
    pub remaining: u64,
}

/// One account's mint allowance for today.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyStatus {
    /// Cards minted today.
    pub count: u32,
    /// Today's limit for the account's tier.
    pub limit: u32,
    /// Cards that can still be minted today.
    pub remaining: u32,
    /// The UTC day the counter belongs to.
    pub reset_date: NaiveDate,
}

/// Global and per-account mint counters.
pub struct SupplyLedger {
    ctx: Arc<Context>,
    state: Mutex<SupplyState>,
}

impl SupplyLedger {
    pub(crate) fn new(ctx: Arc<Context>, state: SupplyState) -> Self {
        Self {
            ctx,
            state: Mutex::new(state),
        }
    }

    /// Takes the supply lock; first in the lock order.
    pub(crate) fn lock(&self, timeout: Duration) -> EconomyResult<MutexGuard<'_, SupplyState>> {
        txn::lock(&self.state, timeout)
    }

    /// Atomically reserves `count` mints for an account and commits the
    /// incremented counters.
    ///
    /// # Errors
    ///
    /// `InsufficientResource` with kind `GlobalSupply` or `DailyLimit` when
    /// either cap would be exceeded; `Timeout`/`Conflict` when persistence
    /// stays unavailable.
    pub fn reserve_mint(
        &self,
        account_id: AccountId,
        count: u32,
        is_vip: bool,
        timeout: Duration,
    ) -> EconomyResult<MintReservation> {
        let mut state = self.lock(timeout)?;
        let today = self.ctx.clock.today();
        let config = &self.ctx.config.supply;

        let mut scope = Scope {
            supply: Some(&mut *state),
            ..Scope::default()
        };
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let reservation = scope.supply()?.plan(config, account_id, count, is_vip, today)?;
            let mut batch = WriteBatch::new();
            reservation.stage(&mut batch);
            Ok(Staged {
                batch,
                output: reservation,
            })
        })?;

        tracing::debug!(
            account_id,
            count,
            total_minted = done.output.total_minted,
            "mint reserved"
        );
        Ok(done.output)
    }

    /// Current global supply.
    ///
    /// The supply lock is held across every mint commit, so the read waits
    /// at most the configured default timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` if a mint holds the supply past that timeout.
    pub fn snapshot(&self) -> EconomyResult<SupplySnapshot> {
        let total_minted = self.read()?.total.value;
        let cap = self.ctx.config.supply.total_supply;
        Ok(SupplySnapshot {
            total_minted,
            cap,
            remaining: cap.saturating_sub(total_minted),
        })
    }

    /// Today's allowance for an account of the given tier.
    ///
    /// # Errors
    ///
    /// `Timeout` if a mint holds the supply past the default timeout.
    pub fn daily_status(&self, account_id: AccountId, is_vip: bool) -> EconomyResult<DailyStatus> {
        let today = self.ctx.clock.today();
        let (_, daily) = self.read()?.daily_at(account_id, today);
        let limit = self.ctx.config.supply.daily_limit(is_vip);
        Ok(DailyStatus {
            count: daily.count,
            limit,
            remaining: limit.saturating_sub(daily.count),
            reset_date: daily.reset_date,
        })
    }

    fn read(&self) -> EconomyResult<MutexGuard<'_, SupplyState>> {
        self.lock(self.ctx.config.ledger.default_timeout())
    }
}

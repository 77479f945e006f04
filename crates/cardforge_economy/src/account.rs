//! # Account Ledger
//!
//! Balances, points and VIP state, one lock per account.
//!
//! Operations on different accounts never contend: the account map is only
//! write-locked to register a new account, and each account's record sits
//! behind its own mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::{EconomyError, EconomyResult, Entity};
use crate::model::{Account, AccountId, Currency, Period, Versioned};
use crate::persistence::{Record, WriteBatch};
use crate::txn::{self, Context, Scope, Staged};

/// Shared handle to one account's lock.
pub(crate) type AccountHandle = Arc<Mutex<Versioned<Account>>>;

/// Tokens handed to the external settlement tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    /// The account debited.
    pub account_id: AccountId,
    /// Tokens withdrawn by this request.
    pub amount: u64,
    /// Token balance afterwards.
    pub remaining_tokens: u64,
    /// Tokens withdrawn over the account's lifetime.
    pub total_withdrawn: u64,
}

/// Per-account balances and VIP state.
pub struct AccountLedger {
    ctx: Arc<Context>,
    accounts: RwLock<HashMap<AccountId, AccountHandle>>,
}

impl AccountLedger {
    pub(crate) fn new(ctx: Arc<Context>, accounts: impl IntoIterator<Item = Versioned<Account>>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.value.id, Arc::new(Mutex::new(account))))
            .collect();
        Self {
            ctx,
            accounts: RwLock::new(accounts),
        }
    }

    /// Looks up an account's lock.
    pub(crate) fn handle(&self, id: AccountId) -> EconomyResult<AccountHandle> {
        self.accounts.read().get(&id).cloned().ok_or(EconomyError::NotFound {
            entity: Entity::Account,
            id,
        })
    }

    /// Number of registered accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// Returns true if no account is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Registers an account.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the id is already registered.
    pub fn open_account(&self, id: AccountId, timeout: Duration) -> EconomyResult<Account> {
        if self.accounts.read().contains_key(&id) {
            return Err(EconomyError::invalid("account_id", format!("{id} is already registered")));
        }

        let mut created = Versioned::fresh(Account::new(id, self.ctx.clock.now()));
        txn::execute(&self.ctx, timeout, &mut Scope::with_account(&mut created), |scope| {
            let current = scope.account()?;
            // A refreshed record means another writer registered the id first.
            if current.version != 0 {
                return Err(EconomyError::invalid("account_id", format!("{id} is already registered")));
            }
            let mut batch = WriteBatch::new();
            batch.put(0, Record::Account(current.value.clone()));
            Ok(Staged { batch, output: () })
        })?;

        let account = created.value.clone();
        self.accounts
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(created)));
        tracing::info!(account_id = id, "account opened");
        Ok(account)
    }

    /// A copy of the account as last committed.
    ///
    /// Waits at most the configured default timeout for an in-flight write.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `Timeout` if the account stays locked.
    pub fn account(&self, id: AccountId) -> EconomyResult<Account> {
        let handle = self.handle(id)?;
        let current = txn::lock(&handle, self.ctx.config.ledger.default_timeout())?;
        Ok(current.value.clone())
    }

    /// Applies `change` to a copy of the account and commits it.
    ///
    /// `change` receives the request time. A change that leaves the account
    /// untouched writes nothing.
    pub(crate) fn apply<T>(
        &self,
        id: AccountId,
        timeout: Duration,
        mut change: impl FnMut(&mut Account, DateTime<Utc>) -> EconomyResult<T>,
    ) -> EconomyResult<(Account, T)> {
        let handle = self.handle(id)?;
        let mut guard = txn::lock(&handle, timeout)?;
        let now = self.ctx.clock.now();

        let mut scope = Scope::with_account(&mut *guard);
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let current = scope.account()?;
            let mut account = current.value.clone();
            let output = change(&mut account, now)?;
            if account == current.value {
                return Ok(Staged::nothing(output));
            }
            let mut batch = WriteBatch::new();
            batch.put(current.version, Record::Account(account));
            Ok(Staged { batch, output })
        })?;
        Ok((guard.value.clone(), done.output))
    }

    /// Subtracts `amount` of a currency.
    ///
    /// # Errors
    ///
    /// `InsufficientResource` if the balance is short; nothing changes.
    pub fn debit(
        &self,
        id: AccountId,
        currency: Currency,
        amount: u64,
        timeout: Duration,
    ) -> EconomyResult<Account> {
        self.transfer(id, &[(currency, amount)], &[], timeout)
    }

    /// Adds `amount` of a currency.
    ///
    /// # Errors
    ///
    /// `NotFound`, `ArithmeticOverflow`, or a persistence failure.
    pub fn credit(
        &self,
        id: AccountId,
        currency: Currency,
        amount: u64,
        timeout: Duration,
    ) -> EconomyResult<Account> {
        self.transfer(id, &[], &[(currency, amount)], timeout)
    }

    /// Applies every debit and every credit, or none of them.
    ///
    /// # Errors
    ///
    /// The first failing debit's `InsufficientResource`; nothing changes.
    pub fn transfer(
        &self,
        id: AccountId,
        debits: &[(Currency, u64)],
        credits: &[(Currency, u64)],
        timeout: Duration,
    ) -> EconomyResult<Account> {
        let (account, ()) = self.apply(id, timeout, |account, _| {
            for &(currency, amount) in debits {
                account.debit(currency, amount)?;
            }
            for &(currency, amount) in credits {
                account.credit(currency, amount)?;
            }
            Ok(())
        })?;
        tracing::debug!(account_id = id, debits = debits.len(), credits = credits.len(), "transfer committed");
        Ok(account)
    }

    /// Extends VIP by calendar months from the later of now and the
    /// current expiry.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for zero months.
    pub fn activate_vip(&self, id: AccountId, months: u32, timeout: Duration) -> EconomyResult<Account> {
        let (account, expiry) = self.apply(id, timeout, |account, now| account.extend_vip(months, now))?;
        tracing::info!(account_id = id, months, %expiry, "VIP activated");
        Ok(account)
    }

    /// Adds leaderboard points to every period.
    ///
    /// # Errors
    ///
    /// `NotFound`, or a persistence failure.
    pub fn credit_points(&self, id: AccountId, amount: u64, timeout: Duration) -> EconomyResult<Account> {
        let (account, ()) = self.apply(id, timeout, |account, _| {
            account.add_points(amount);
            Ok(())
        })?;
        Ok(account)
    }

    /// Records a battle result and awards its points.
    ///
    /// # Errors
    ///
    /// `NotFound`, or a persistence failure.
    pub fn record_battle(&self, id: AccountId, won: bool, timeout: Duration) -> EconomyResult<Account> {
        let points = &self.ctx.config.points;
        let (account, ()) = self.apply(id, timeout, |account, _| {
            account.stats.battles += 1;
            if won {
                account.stats.wins += 1;
                account.add_points(points.battle_win);
            } else {
                account.stats.losses += 1;
                account.add_points(points.battle_loss);
            }
            Ok(())
        })?;
        Ok(account)
    }

    /// Zeroes one leaderboard period on every account.
    ///
    /// Each account commits on its own; a failure stops the sweep and the
    /// accounts already reset stay reset. Running it again finishes the job.
    ///
    /// # Errors
    ///
    /// The first failing account's error.
    pub fn reset_period_points(&self, period: Period, timeout: Duration) -> EconomyResult<usize> {
        let mut ids: Vec<AccountId> = self.accounts.read().keys().copied().collect();
        ids.sort_unstable();

        let mut reset = 0;
        for id in ids {
            let (_, changed) = self.apply(id, timeout, |account, _| {
                let before = account.points;
                account.reset_points(period);
                Ok(before != account.points)
            })?;
            reset += usize::from(changed);
        }
        tracing::info!(?period, accounts = reset, "period points reset");
        Ok(reset)
    }

    /// Debits tokens bound for the settlement tier.
    ///
    /// # Errors
    ///
    /// `InvalidInput` below the configured minimum, `InsufficientResource`
    /// if the balance is short.
    pub fn withdraw_tokens(
        &self,
        id: AccountId,
        amount: u64,
        timeout: Duration,
    ) -> EconomyResult<WithdrawalReceipt> {
        let minimum = self.ctx.config.ledger.min_withdrawal;
        if amount < minimum {
            return Err(EconomyError::invalid("amount", format!("minimum withdrawal is {minimum}")));
        }

        let (account, ()) = self.apply(id, timeout, |account, _| {
            account.debit(Currency::Tokens, amount)?;
            account.total_tokens_withdrawn = account
                .total_tokens_withdrawn
                .checked_add(amount)
                .ok_or(EconomyError::ArithmeticOverflow)?;
            Ok(())
        })?;
        tracing::info!(account_id = id, amount, "tokens withdrawn");
        Ok(WithdrawalReceipt {
            account_id: id,
            amount,
            remaining_tokens: account.tokens,
            total_withdrawn: account.total_tokens_withdrawn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EconomyConfig;
    use crate::error::ResourceKind;
    use crate::persistence::{MemoryStore, Persistence, RecordKey};
    use crate::random::ScriptedRandom;
    use chrono::TimeZone;

    const T: Duration = Duration::from_secs(1);

    fn ledger() -> (AccountLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(Context {
            config: Arc::new(EconomyConfig::default()),
            clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap())),
            rng: Arc::new(ScriptedRandom::default()),
            store: Arc::clone(&store) as Arc<dyn Persistence>,
        });
        (AccountLedger::new(ctx, Vec::new()), store)
    }

    #[test]
    fn test_open_account_twice_is_rejected() {
        let (ledger, store) = ledger();
        ledger.open_account(1, T).unwrap();
        assert!(matches!(
            ledger.open_account(1, T),
            Err(EconomyError::InvalidInput { field: "account_id", .. })
        ));
        assert_eq!(store.commits(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_transfer_is_all_or_nothing() {
        let (ledger, _) = ledger();
        ledger.open_account(1, T).unwrap();
        ledger.credit(1, Currency::Tokens, 100, T).unwrap();

        let err = ledger
            .transfer(1, &[(Currency::Tokens, 60), (Currency::Gold, 1)], &[(Currency::Tickets, 5)], T)
            .unwrap_err();
        assert_eq!(err, EconomyError::insufficient(ResourceKind::Gold, 1, 0));
        let account = ledger.account(1).unwrap();
        assert_eq!((account.tokens, account.tournament_tickets), (100, 0));

        let account = ledger
            .transfer(1, &[(Currency::Tokens, 60)], &[(Currency::Tickets, 5)], T)
            .unwrap();
        assert_eq!((account.tokens, account.tournament_tickets), (40, 5));
    }

    #[test]
    fn test_committed_version_tracks_store() {
        let (ledger, store) = ledger();
        ledger.open_account(1, T).unwrap();
        ledger.credit(1, Currency::Gold, 5, T).unwrap();
        ledger.debit(1, Currency::Gold, 2, T).unwrap();

        let stored = store.load(RecordKey::Account(1)).unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.value, Record::Account(ledger.account(1).unwrap()));
    }

    #[test]
    fn test_withdraw_enforces_minimum_and_tracks_total() {
        let (ledger, _) = ledger();
        ledger.open_account(1, T).unwrap();
        ledger.credit(1, Currency::Tokens, 500, T).unwrap();

        assert!(matches!(
            ledger.withdraw_tokens(1, 99, T),
            Err(EconomyError::InvalidInput { field: "amount", .. })
        ));
        let receipt = ledger.withdraw_tokens(1, 300, T).unwrap();
        assert_eq!(receipt.remaining_tokens, 200);
        assert_eq!(receipt.total_withdrawn, 300);
        assert!(ledger.withdraw_tokens(1, 300, T).unwrap_err().is_insufficient_funds());
    }

    #[test]
    fn test_reset_weekly_keeps_other_periods() {
        let (ledger, _) = ledger();
        ledger.open_account(1, T).unwrap();
        ledger.open_account(2, T).unwrap();
        ledger.record_battle(1, true, T).unwrap();

        assert_eq!(ledger.reset_period_points(Period::Weekly, T).unwrap(), 1);
        let account = ledger.account(1).unwrap();
        assert_eq!(account.points.weekly, 0);
        assert_eq!(account.points.total, 10);
        assert_eq!(account.stats.wins, 1);
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let (ledger, _) = ledger();
        assert_eq!(
            ledger.credit(9, Currency::Gold, 1, T).unwrap_err(),
            EconomyError::NotFound { entity: Entity::Account, id: 9 }
        );
    }
}

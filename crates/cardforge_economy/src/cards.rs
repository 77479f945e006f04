//! # Card Registry
//!
//! Owns every minted card. Cards only come into existence through
//! [`CardRegistry::mint_batch`], which reserves supply, optionally charges
//! the account, and writes the new cards in one persistence batch.
//!
//! ```text
//! lock supply ──> lock account ──> validate numbers ──> charge copy
//!        ──> reserve count ──> stage cards ──> commit ──> register
//! ```
//!
//! A pack reserves its full count before any card is staged, so it lands
//! whole or not at all.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::account::AccountLedger;
use crate::config::PackDefinition;
use crate::error::{EconomyError, EconomyResult, Entity};
use crate::model::{Account, AccountId, Card, CardId, CardNumber, Versioned};
use crate::persistence::{Record, WriteBatch};
use crate::supply::SupplyLedger;
use crate::txn::{self, Context, Scope, Staged};

/// Shared handle to one card's lock.
pub(crate) type CardHandle = Arc<Mutex<Versioned<Card>>>;

/// Cards created by one mint, with the account as committed alongside them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Minted<C> {
    pub(crate) cards: Vec<Card>,
    pub(crate) account: Account,
    pub(crate) total_minted: u64,
    pub(crate) extra: C,
}

/// All card instances, indexed by id and by owner.
pub struct CardRegistry {
    ctx: Arc<Context>,
    supply: Arc<SupplyLedger>,
    accounts: Arc<AccountLedger>,
    cards: RwLock<HashMap<CardId, CardHandle>>,
    owners: RwLock<HashMap<AccountId, BTreeSet<CardId>>>,
    next_id: AtomicU64,
}

impl CardRegistry {
    pub(crate) fn new(
        ctx: Arc<Context>,
        supply: Arc<SupplyLedger>,
        accounts: Arc<AccountLedger>,
        cards: impl IntoIterator<Item = Versioned<Card>>,
    ) -> Self {
        let registry = Self {
            ctx,
            supply,
            accounts,
            cards: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        };
        for card in cards {
            registry.register(card);
        }
        registry
    }

    fn register(&self, card: Versioned<Card>) {
        let id = card.value.id;
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        self.owners
            .write()
            .entry(card.value.owner_id)
            .or_default()
            .insert(id);
        self.cards.write().insert(id, Arc::new(Mutex::new(card)));
    }

    /// Looks up a card's lock.
    pub(crate) fn handle(&self, id: CardId) -> EconomyResult<CardHandle> {
        self.cards.read().get(&id).cloned().ok_or(EconomyError::NotFound {
            entity: Entity::Card,
            id,
        })
    }

    /// Locks of every card an account owns, in ascending id order.
    pub(crate) fn owned_handles(&self, owner: AccountId) -> Vec<CardHandle> {
        let ids: Vec<CardId> = self
            .owners
            .read()
            .get(&owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        let cards = self.cards.read();
        ids.iter().filter_map(|id| cards.get(id).cloned()).collect()
    }

    /// Number of cards in existence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    /// Returns true if nothing was minted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }

    /// A copy of a card as last committed.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `Timeout` if the card stays locked past
    /// the configured default timeout.
    pub fn card(&self, id: CardId) -> EconomyResult<Card> {
        let handle = self.handle(id)?;
        let current = txn::lock(&handle, self.ctx.config.ledger.default_timeout())?;
        Ok(current.value.clone())
    }

    /// Copies of every card an account owns, by ascending id.
    ///
    /// # Errors
    ///
    /// `Timeout` if a card stays locked past the configured default timeout.
    pub fn cards_of(&self, owner: AccountId) -> EconomyResult<Vec<Card>> {
        let timeout = self.ctx.config.ledger.default_timeout();
        self.owned_handles(owner)
            .iter()
            .map(|handle| Ok(txn::lock(handle, timeout)?.value.clone()))
            .collect()
    }

    /// Mints one card.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for card numbers outside 1..=8, `InsufficientResource`
    /// when global supply or the daily limit is exhausted.
    pub fn mint(&self, account_id: AccountId, card_number: CardNumber, timeout: Duration) -> EconomyResult<Card> {
        let minted = self.mint_batch(account_id, timeout, || Ok(vec![card_number]), |_, _| Ok(()))?;
        minted
            .cards
            .into_iter()
            .next()
            .ok_or_else(|| EconomyError::Internal("mint committed no card".to_string()))
    }

    /// Mints a whole pack free of charge.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown packs, `InsufficientResource` when the
    /// remaining supply or daily allowance is below the pack size.
    pub fn mint_pack(&self, account_id: AccountId, pack_key: &str, timeout: Duration) -> EconomyResult<Vec<Card>> {
        let pack = self.ctx.config.pack(pack_key)?;
        let minted = self.mint_batch(account_id, timeout, || self.draw_pack(pack), |_, _| Ok(()))?;
        Ok(minted.cards)
    }

    /// Draws a pack's card numbers: independent uniform draws with
    /// replacement from its pool.
    pub(crate) fn draw_pack(&self, pack: &PackDefinition) -> EconomyResult<Vec<CardNumber>> {
        let pool = &pack.possible_cards;
        if pool.is_empty() {
            return Err(EconomyError::invalid("pack", "empty card pool"));
        }
        (0..pack.cards)
            .map(|_| {
                pool.get(self.ctx.rng.index(pool.len()))
                    .copied()
                    .ok_or_else(|| EconomyError::Internal("pack draw out of range".to_string()))
            })
            .collect()
    }

    /// Mints the cards `draw` names and applies `charge` to the account in
    /// the same batch.
    ///
    /// `draw` and `charge` run again on every commit attempt.
    pub(crate) fn mint_batch<C>(
        &self,
        account_id: AccountId,
        timeout: Duration,
        mut draw: impl FnMut() -> EconomyResult<Vec<CardNumber>>,
        mut charge: impl FnMut(&mut Account, DateTime<Utc>) -> EconomyResult<C>,
    ) -> EconomyResult<Minted<C>> {
        let handle = self.accounts.handle(account_id)?;
        let mut supply = self.supply.lock(timeout)?;
        let mut account = txn::lock(&handle, timeout)?;

        let config = &self.ctx.config;
        let now = self.ctx.clock.now();
        let today = now.date_naive();

        let mut scope = Scope {
            supply: Some(&mut *supply),
            account: Some(&mut *account),
            cards: Vec::new(),
        };
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let drawn = draw()?
                .into_iter()
                .map(|number| config.base_stats(number).map(|base| (number, base)))
                .collect::<EconomyResult<Vec<_>>>()?;
            let count = u32::try_from(drawn.len()).map_err(|_| EconomyError::invalid("count", "too many cards"))?;

            let current = scope.account()?;
            let is_vip = current.value.is_vip_active(now);
            let mut charged = current.value.clone();
            let extra = charge(&mut charged, now)?;

            let reservation = scope
                .supply()?
                .plan(&config.supply, account_id, count, is_vip, today)?;

            let mut batch = WriteBatch::new();
            reservation.stage(&mut batch);
            if charged != current.value {
                batch.put(current.version, Record::Account(charged));
            }
            for (number, base) in drawn {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let card = Card::new(id, number, account_id, base, config.gold_multiplier, now);
                batch.put(0, Record::Card(card));
            }
            Ok(Staged {
                batch,
                output: (reservation.total_minted, extra),
            })
        })?;

        let (total_minted, extra) = done.output;
        let cards: Vec<Card> = done.minted.iter().map(|card| card.value.clone()).collect();
        for card in done.minted {
            self.register(card);
        }
        tracing::info!(account_id, cards = cards.len(), total_minted, "cards minted");

        Ok(Minted {
            cards,
            account: account.value.clone(),
            total_minted,
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EconomyConfig;
    use crate::model::{CardStats, Currency};
    use crate::persistence::{MemoryStore, Persistence};
    use crate::random::ScriptedRandom;
    use crate::supply::SupplyState;
    use chrono::TimeZone;

    const T: Duration = Duration::from_secs(1);

    fn registry(config: EconomyConfig, indices: Vec<usize>) -> (CardRegistry, Arc<AccountLedger>, Arc<SupplyLedger>) {
        let ctx = Arc::new(Context {
            config: Arc::new(config),
            clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 4, 9, 30, 0).unwrap())),
            rng: Arc::new(ScriptedRandom::new(Vec::new(), indices)),
            store: Arc::new(MemoryStore::new()) as Arc<dyn Persistence>,
        });
        let supply = Arc::new(SupplyLedger::new(Arc::clone(&ctx), SupplyState::default()));
        let accounts = Arc::new(AccountLedger::new(Arc::clone(&ctx), Vec::new()));
        accounts.open_account(1, T).unwrap();
        let registry = CardRegistry::new(ctx, Arc::clone(&supply), Arc::clone(&accounts), Vec::new());
        (registry, accounts, supply)
    }

    #[test]
    fn test_mint_uses_stat_table() {
        let (registry, _, supply) = registry(EconomyConfig::default(), vec![]);
        let card = registry.mint(1, 2, T).unwrap();
        assert_eq!(card.stats, CardStats { atk: 7, def: 4, hp: 60 });
        assert_eq!(card.daily_gold_production, 70);
        assert_eq!(card.owner_id, 1);
        assert_eq!(registry.cards_of(1).unwrap(), vec![card]);
        assert_eq!(supply.snapshot().unwrap().total_minted, 1);
    }

    #[test]
    fn test_reads_give_up_while_a_write_holds_the_lock() {
        let mut config = EconomyConfig::default();
        config.ledger.default_timeout_ms = 20;
        let (registry, accounts, supply) = registry(config, vec![]);
        let card = registry.mint(1, 1, T).unwrap();
        let timed_out = |result: EconomyResult<()>| matches!(result, Err(EconomyError::Timeout { .. }));

        {
            let _held = supply.lock(T).unwrap();
            assert!(timed_out(supply.snapshot().map(drop)));
            assert!(timed_out(supply.daily_status(1, false).map(drop)));
        }
        {
            let handle = registry.handle(card.id).unwrap();
            let _held = handle.lock();
            assert!(timed_out(registry.card(card.id).map(drop)));
            assert!(timed_out(registry.cards_of(1).map(drop)));
        }
        {
            let handle = accounts.handle(1).unwrap();
            let _held = handle.lock();
            assert!(timed_out(accounts.account(1).map(drop)));
        }

        assert_eq!(supply.snapshot().unwrap().total_minted, 1);
        assert_eq!(registry.card(card.id).unwrap(), card);
    }

    #[test]
    fn test_invalid_card_number_reserves_nothing() {
        let (registry, _, supply) = registry(EconomyConfig::default(), vec![]);
        for number in [0, 9] {
            assert!(matches!(
                registry.mint(1, number, T),
                Err(EconomyError::InvalidInput { field: "card_number", .. })
            ));
        }
        assert_eq!(supply.snapshot().unwrap().total_minted, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pack_draws_with_replacement() {
        // Indices wrap into the pool [1, 2, 3, 4].
        let (registry, _, _) = registry(EconomyConfig::default(), vec![0, 0, 3, 5, 2]);
        let cards = registry.mint_pack(1, "basic", T).unwrap();
        let numbers: Vec<CardNumber> = cards.iter().map(|c| c.card_number).collect();
        assert_eq!(numbers, vec![1, 1, 4, 2, 3]);
    }

    #[test]
    fn test_pack_larger_than_supply_mints_nothing() {
        let mut config = EconomyConfig::default();
        config.supply.total_supply = 4;
        let (registry, _, supply) = registry(config, vec![]);

        let err = registry.mint_pack(1, "basic", T).unwrap_err();
        assert!(err.is_insufficient_supply());
        assert!(registry.is_empty());
        assert_eq!(supply.snapshot().unwrap().remaining, 4);
    }

    #[test]
    fn test_failed_charge_mints_nothing() {
        let (registry, accounts, supply) = registry(EconomyConfig::default(), vec![]);
        let err = registry
            .mint_batch(1, T, || Ok(vec![1]), |account, _| account.debit(Currency::Tokens, 10))
            .unwrap_err();
        assert!(err.is_insufficient_funds());
        assert!(registry.is_empty());
        assert_eq!(supply.daily_status(1, false).unwrap().count, 0);
        assert_eq!(accounts.account(1).unwrap().tokens, 0);
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let (registry, _, _) = registry(EconomyConfig::default(), vec![]);
        assert!(matches!(
            registry.mint(5, 1, T),
            Err(EconomyError::NotFound { entity: Entity::Account, id: 5 })
        ));
    }
}

//! # Gold Accrual
//!
//! Cards produce gold per whole elapsed day. A claim pays the whole days
//! only and moves `last_gold_claim` forward by exactly those days, so the
//! fractional remainder keeps accruing toward the next claim.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::account::AccountLedger;
use crate::cards::CardRegistry;
use crate::error::{EconomyError, EconomyResult, Entity};
use crate::model::{Account, AccountId, Card, CardId, Currency};
use crate::persistence::{Record, WriteBatch};
use crate::pricing::{boosted, PricingEngine};
use crate::txn::{self, Context, Scope, Staged};

/// Gold paid out for one card.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GoldClaim {
    /// The card claimed.
    pub card_id: CardId,
    /// Whole days paid.
    pub days: u64,
    /// Gold credited, after boosts.
    pub amount: u64,
    /// The card's new accrual start.
    pub last_gold_claim: DateTime<Utc>,
    /// Owner's gold balance after this claim.
    pub gold_balance: u64,
}

/// Result of claiming every card of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoldClaimSummary {
    /// Per-card claims, including zero-day ones.
    pub claims: Vec<GoldClaim>,
    /// Gold credited in total.
    pub total: u64,
    /// Gold balance afterwards.
    pub gold_balance: u64,
}

/// Pays out accrued gold for one card into `account`.
///
/// Zero elapsed days leave both records untouched.
pub(crate) fn settle(
    account: &mut Account,
    card: &mut Card,
    boosts_bp: &[u32],
    now: DateTime<Utc>,
) -> EconomyResult<GoldClaim> {
    let days = card.elapsed_days(now);
    if days == 0 {
        return Ok(GoldClaim {
            card_id: card.id,
            days,
            amount: 0,
            last_gold_claim: card.last_gold_claim,
            gold_balance: account.gold,
        });
    }

    let base = days
        .checked_mul(card.daily_gold_production)
        .ok_or(EconomyError::ArithmeticOverflow)?;
    let amount = boosted(base, boosts_bp)?;
    account.credit(Currency::Gold, amount)?;
    account.stats.gold_earned = account.stats.gold_earned.saturating_add(amount);

    let advance = i64::try_from(days)
        .ok()
        .and_then(TimeDelta::try_days)
        .ok_or(EconomyError::ArithmeticOverflow)?;
    card.last_gold_claim = card
        .last_gold_claim
        .checked_add_signed(advance)
        .ok_or(EconomyError::ArithmeticOverflow)?;

    Ok(GoldClaim {
        card_id: card.id,
        days,
        amount,
        last_gold_claim: card.last_gold_claim,
        gold_balance: account.gold,
    })
}

/// Claims time-based gold for cards.
pub struct GoldAccrualEngine {
    ctx: Arc<Context>,
    accounts: Arc<AccountLedger>,
    registry: Arc<CardRegistry>,
    pricing: Arc<PricingEngine>,
}

impl GoldAccrualEngine {
    pub(crate) const fn new(
        ctx: Arc<Context>,
        accounts: Arc<AccountLedger>,
        registry: Arc<CardRegistry>,
        pricing: Arc<PricingEngine>,
    ) -> Self {
        Self {
            ctx,
            accounts,
            registry,
            pricing,
        }
    }

    /// Gold a claim on the card would pay right now.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown cards or cards of another account.
    pub fn pending(&self, account_id: AccountId, card_id: CardId) -> EconomyResult<u64> {
        let card = self.registry.card(card_id)?;
        if card.owner_id != account_id {
            return Err(EconomyError::NotFound { entity: Entity::Card, id: card_id });
        }
        let account = self.accounts.account(account_id)?;
        let base = card
            .elapsed_days(self.ctx.clock.now())
            .checked_mul(card.daily_gold_production)
            .ok_or(EconomyError::ArithmeticOverflow)?;
        boosted(base, &self.pricing.gold_boosts(&account))
    }

    /// Claims one card's accrued gold.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown cards or cards of another account.
    pub fn claim(&self, account_id: AccountId, card_id: CardId, timeout: Duration) -> EconomyResult<GoldClaim> {
        let account_handle = self.accounts.handle(account_id)?;
        let card_handle = self.registry.handle(card_id)?;
        let mut account = txn::lock(&account_handle, timeout)?;
        let mut card = txn::lock(&card_handle, timeout)?;
        if card.value.owner_id != account_id {
            return Err(EconomyError::NotFound { entity: Entity::Card, id: card_id });
        }

        let now = self.ctx.clock.now();
        let mut scope = Scope {
            supply: None,
            account: Some(&mut *account),
            cards: vec![&mut *card],
        };
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let current = scope.account()?;
            let mut updated = current.value.clone();
            let slot = scope
                .cards
                .first()
                .ok_or_else(|| EconomyError::Internal("card not locked".to_string()))?;
            let mut claimed = slot.value.clone();

            let boosts = self.pricing.gold_boosts(&updated);
            let claim = settle(&mut updated, &mut claimed, &boosts, now)?;
            if claim.days == 0 {
                return Ok(Staged::nothing(claim));
            }
            let mut batch = WriteBatch::new();
            batch.put(current.version, Record::Account(updated));
            batch.put(slot.version, Record::Card(claimed));
            Ok(Staged { batch, output: claim })
        })?;

        let claim = done.output;
        if claim.days == 0 {
            tracing::debug!(account_id, card_id, "nothing to claim yet");
        } else {
            tracing::info!(account_id, card_id, days = claim.days, amount = claim.amount, "gold claimed");
        }
        Ok(claim)
    }

    /// Claims every card the account owns in one commit.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts, `Timeout` if a card stays locked.
    pub fn claim_all(&self, account_id: AccountId, timeout: Duration) -> EconomyResult<GoldClaimSummary> {
        let account_handle = self.accounts.handle(account_id)?;
        let card_handles = self.registry.owned_handles(account_id);
        let mut account = txn::lock(&account_handle, timeout)?;
        let mut cards = card_handles
            .iter()
            .map(|handle| txn::lock(handle, timeout))
            .collect::<EconomyResult<Vec<_>>>()?;

        let now = self.ctx.clock.now();
        let mut scope = Scope {
            supply: None,
            account: Some(&mut *account),
            cards: cards.iter_mut().map(|guard| &mut **guard).collect(),
        };
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let current = scope.account()?;
            let mut updated = current.value.clone();
            let boosts = self.pricing.gold_boosts(&updated);

            let mut batch = WriteBatch::new();
            let mut claims = Vec::with_capacity(scope.cards.len());
            let mut total = 0u64;
            for slot in &scope.cards {
                let mut claimed = slot.value.clone();
                let claim = settle(&mut updated, &mut claimed, &boosts, now)?;
                if claim.days > 0 {
                    total = total.checked_add(claim.amount).ok_or(EconomyError::ArithmeticOverflow)?;
                    batch.put(slot.version, Record::Card(claimed));
                }
                claims.push(claim);
            }
            if !batch.is_empty() {
                batch.put(current.version, Record::Account(updated.clone()));
            }
            Ok(Staged {
                batch,
                output: GoldClaimSummary {
                    claims,
                    total,
                    gold_balance: updated.gold,
                },
            })
        })?;

        let summary = done.output;
        tracing::info!(account_id, cards = summary.claims.len(), total = summary.total, "gold claimed for all cards");
        Ok(summary)
    }
}

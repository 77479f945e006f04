//! # Upgrade Engine
//!
//! Paid, probabilistic card upgrades.
//!
//! The gold cost is charged and the attempt counted whatever the roll says.
//! A roll below the success chance raises the card one level.

use std::sync::Arc;
use std::time::Duration;

use crate::account::AccountLedger;
use crate::cards::CardRegistry;
use crate::config::{BASIS_POINTS, EconomyConfig};
use crate::error::{EconomyError, EconomyResult, Entity};
use crate::model::{Account, AccountId, Card, CardId, Currency};
use crate::persistence::{Record, WriteBatch};
use crate::pricing::PricingEngine;
use crate::txn::{self, Context, Scope, Staged};

/// Result of one upgrade attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Whether the card levelled up.
    pub success: bool,
    /// The card's level afterwards.
    pub new_level: u32,
    /// Gold charged.
    pub cost_paid: u64,
}

/// Applies a paid attempt with a known roll to copies of the records.
///
/// # Errors
///
/// `InsufficientResource` if the account cannot pay `cost`; the records are
/// left as they were.
pub(crate) fn resolve(
    config: &EconomyConfig,
    account: &mut Account,
    card: &mut Card,
    cost: u64,
    roll: f64,
) -> EconomyResult<UpgradeOutcome> {
    account.debit(Currency::Gold, cost)?;
    account.stats.gold_spent = account.stats.gold_spent.saturating_add(cost);
    account.stats.upgrade_attempts += 1;
    account.add_points(config.points.upgrade_attempt);
    card.upgrade_attempts = card.upgrade_attempts.saturating_add(1);

    let chance = f64::from(config.upgrade.success_chance_bp) / f64::from(BASIS_POINTS);
    let success = roll < chance;
    if success {
        let base = config.base_stats(card.card_number)?;
        card.level_up(base, config.upgrade.stat_growth_bp, config.gold_multiplier);
        account.stats.successful_upgrades += 1;
        account.add_points(config.points.upgrade_success);
    }

    Ok(UpgradeOutcome {
        success,
        new_level: card.upgrade_level,
        cost_paid: cost,
    })
}

/// Runs upgrade attempts.
pub struct UpgradeEngine {
    ctx: Arc<Context>,
    accounts: Arc<AccountLedger>,
    registry: Arc<CardRegistry>,
    pricing: Arc<PricingEngine>,
}

impl UpgradeEngine {
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

    /// Gold the account would pay to upgrade the card now.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown cards or cards of another account.
    pub fn quote(&self, account_id: AccountId, card_id: CardId) -> EconomyResult<u64> {
        let card = self.registry.card(card_id)?;
        if card.owner_id != account_id {
            return Err(EconomyError::NotFound { entity: Entity::Card, id: card_id });
        }
        let account = self.accounts.account(account_id)?;
        Ok(self.pricing.upgrade_price(card.upgrade_level, &account))
    }

    /// Pays for one attempt and rolls it.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown cards or cards of another account,
    /// `InsufficientResource{Gold}` before anything changes.
    pub fn attempt(&self, account_id: AccountId, card_id: CardId, timeout: Duration) -> EconomyResult<UpgradeOutcome> {
        let account_handle = self.accounts.handle(account_id)?;
        let card_handle = self.registry.handle(card_id)?;
        let mut account = txn::lock(&account_handle, timeout)?;
        let mut card = txn::lock(&card_handle, timeout)?;
        if card.value.owner_id != account_id {
            return Err(EconomyError::NotFound { entity: Entity::Card, id: card_id });
        }

        let config = &self.ctx.config;
        let mut scope = Scope {
            supply: None,
            account: Some(&mut *account),
            cards: vec![&mut *card],
        };
        let done = txn::execute(&self.ctx, timeout, &mut scope, |scope| {
            let current = scope.account()?;
            let slot = scope
                .cards
                .first()
                .ok_or_else(|| EconomyError::Internal("card not locked".to_string()))?;
            let mut updated = current.value.clone();
            let mut upgraded = slot.value.clone();

            let cost = self.pricing.upgrade_price(upgraded.upgrade_level, &updated);
            // No roll for an unaffordable attempt.
            if updated.gold < cost {
                return Err(EconomyError::insufficient(Currency::Gold.resource(), cost, updated.gold));
            }
            let roll = self.ctx.rng.unit();
            let outcome = resolve(config, &mut updated, &mut upgraded, cost, roll)?;

            let mut batch = WriteBatch::new();
            batch.put(current.version, Record::Account(updated));
            batch.put(slot.version, Record::Card(upgraded));
            Ok(Staged { batch, output: outcome })
        })?;

        let outcome = done.output;
        tracing::info!(
            account_id,
            card_id,
            success = outcome.success,
            level = outcome.new_level,
            cost = outcome.cost_paid,
            "upgrade attempted"
        );
        Ok(outcome)
    }
}

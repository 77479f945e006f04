//! # Stores
//!
//! Currency-for-resource purchases. Each purchase debits and credits in a
//! single commit: tokens are never spent without the tickets, cards or VIP
//! time they paid for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::account::AccountLedger;
use crate::cards::CardRegistry;
use crate::error::{EconomyError, EconomyResult};
use crate::model::{AccountId, Card, Currency};
use crate::pricing::PricingEngine;
use crate::txn::Context;

/// Result of a ticket purchase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketPurchase {
    /// Tickets credited.
    pub tickets_purchased: u64,
    /// Tokens debited, after any VIP discount.
    pub tokens_spent: u64,
    /// Ticket balance afterwards.
    pub total_tickets: u64,
    /// Token balance afterwards.
    pub remaining_tokens: u64,
}

/// Read-only ticket view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketBalance {
    /// Tournament tickets.
    pub tickets: u64,
    /// Tokens.
    pub tokens: u64,
    /// Whether VIP pricing applies right now.
    pub is_vip: bool,
}

/// Cards from a bought pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackOpening {
    /// The pack key.
    pub pack: String,
    /// The minted cards.
    pub cards: Vec<Card>,
    /// Tokens debited, after any VIP discount.
    pub tokens_spent: u64,
    /// Token balance afterwards.
    pub remaining_tokens: u64,
    /// Global mint count afterwards.
    pub total_minted: u64,
}

/// Result of a VIP subscription purchase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VipPurchase {
    /// Months bought.
    pub months: u32,
    /// Tokens debited.
    pub tokens_spent: u64,
    /// New expiry.
    pub expires_at: DateTime<Utc>,
    /// Token balance afterwards.
    pub remaining_tokens: u64,
}

/// The one-time registration bonus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StarterBonus {
    /// Cards from the starter pack.
    pub cards: Vec<Card>,
    /// Tickets credited.
    pub tickets: u64,
}

// ============================================================================
// Ticket Store
// ============================================================================

/// Sells and consumes tournament tickets.
pub struct TicketStore {
    ctx: Arc<Context>,
    accounts: Arc<AccountLedger>,
    pricing: Arc<PricingEngine>,
}

impl TicketStore {
    pub(crate) const fn new(ctx: Arc<Context>, accounts: Arc<AccountLedger>, pricing: Arc<PricingEngine>) -> Self {
        Self {
            ctx,
            accounts,
            pricing,
        }
    }

    /// Buys a ticket package with tokens.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown packages, `InsufficientResource{Tokens}`
    /// with the discounted price and the balance; nothing changes then.
    pub fn buy(&self, account_id: AccountId, package_key: &str, timeout: Duration) -> EconomyResult<TicketPurchase> {
        let package = self.ctx.config.ticket_package(package_key)?;
        let (account, price) = self.accounts.apply(account_id, timeout, |account, _| {
            let price = self.pricing.price(package.price, account);
            account.debit(Currency::Tokens, price)?;
            account.credit(Currency::Tickets, package.quantity)?;
            Ok(price)
        })?;

        tracing::info!(account_id, package = package_key, price, "tickets purchased");
        Ok(TicketPurchase {
            tickets_purchased: package.quantity,
            tokens_spent: price,
            total_tickets: account.tournament_tickets,
            remaining_tokens: account.tokens,
        })
    }

    /// Current tickets, tokens and VIP state.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn balance(&self, account_id: AccountId) -> EconomyResult<TicketBalance> {
        let account = self.accounts.account(account_id)?;
        Ok(TicketBalance {
            tickets: account.tournament_tickets,
            tokens: account.tokens,
            is_vip: self.pricing.is_vip_active(&account),
        })
    }

    /// Spends tickets on a tournament entry.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for zero, `InsufficientResource{Tickets}` if short.
    pub fn use_tickets(&self, account_id: AccountId, count: u64, timeout: Duration) -> EconomyResult<TicketBalance> {
        if count == 0 {
            return Err(EconomyError::invalid("count", "must be at least 1"));
        }
        let (account, ()) = self
            .accounts
            .apply(account_id, timeout, |account, _| account.debit(Currency::Tickets, count))?;
        tracing::debug!(account_id, count, "tickets used");
        Ok(TicketBalance {
            tickets: account.tournament_tickets,
            tokens: account.tokens,
            is_vip: self.pricing.is_vip_active(&account),
        })
    }
}

// ============================================================================
// Pack Store
// ============================================================================

/// Sells card packs and VIP time; grants the starter bonus.
pub struct PackStore {
    ctx: Arc<Context>,
    accounts: Arc<AccountLedger>,
    registry: Arc<CardRegistry>,
    pricing: Arc<PricingEngine>,
}

impl PackStore {
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

    /// Buys and opens a pack: the token debit and the mint commit together.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown or unsold packs, `InsufficientResource`
    /// for tokens, global supply or the daily limit.
    pub fn buy_pack(&self, account_id: AccountId, pack_key: &str, timeout: Duration) -> EconomyResult<PackOpening> {
        let pack = self.ctx.config.pack(pack_key)?;
        if !pack.purchasable {
            return Err(EconomyError::invalid("pack", format!("{pack_key:?} is not for sale")));
        }

        let minted = self.registry.mint_batch(
            account_id,
            timeout,
            || self.registry.draw_pack(pack),
            |account, _| {
                let price = self.pricing.price(pack.price, account);
                account.debit(Currency::Tokens, price)?;
                Ok(price)
            },
        )?;

        tracing::info!(account_id, pack = pack_key, price = minted.extra, "pack purchased");
        Ok(PackOpening {
            pack: pack_key.to_string(),
            cards: minted.cards,
            tokens_spent: minted.extra,
            remaining_tokens: minted.account.tokens,
            total_minted: minted.total_minted,
        })
    }

    /// Buys whole months of VIP and activates them in the same commit.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for zero months, `InsufficientResource{Tokens}` if short.
    pub fn purchase_vip(&self, account_id: AccountId, months: u32, timeout: Duration) -> EconomyResult<VipPurchase> {
        if months == 0 {
            return Err(EconomyError::invalid("months", "must be at least 1"));
        }
        let cost = u64::from(months)
            .checked_mul(self.ctx.config.vip.monthly_price)
            .ok_or(EconomyError::ArithmeticOverflow)?;

        let (account, expires_at) = self.accounts.apply(account_id, timeout, |account, now| {
            account.debit(Currency::Tokens, cost)?;
            account.extend_vip(months, now)
        })?;

        tracing::info!(account_id, months, cost, %expires_at, "VIP purchased");
        Ok(VipPurchase {
            months,
            tokens_spent: cost,
            expires_at,
            remaining_tokens: account.tokens,
        })
    }

    /// Mints the starter pack and credits the starter tickets, once per account.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if already claimed, `InsufficientResource` when supply
    /// or the daily allowance cannot cover the pack.
    pub fn claim_starter_bonus(&self, account_id: AccountId, timeout: Duration) -> EconomyResult<StarterBonus> {
        let starter = &self.ctx.config.starter;
        let pack = self.ctx.config.pack(&starter.pack)?;

        let minted = self.registry.mint_batch(
            account_id,
            timeout,
            || self.registry.draw_pack(pack),
            |account, _| {
                if account.starter_bonus_claimed {
                    return Err(EconomyError::invalid("account", "starter bonus already claimed"));
                }
                account.starter_bonus_claimed = true;
                account.credit(Currency::Tickets, starter.tickets)
            },
        )?;

        tracing::info!(account_id, cards = minted.cards.len(), tickets = starter.tickets, "starter bonus claimed");
        Ok(StarterBonus {
            cards: minted.cards,
            tickets: starter.tickets,
        })
    }
}

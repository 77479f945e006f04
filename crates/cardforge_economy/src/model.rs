//! # Ledger Records
//!
//! Accounts, cards and daily mint counters as they are stored.
//!
//! Records are plain values. Components mutate *copies* of them while
//! planning an operation and only write them back once the persistence
//! commit succeeded, so every method here is free of locking concerns.

use chrono::{DateTime, Months, NaiveDate, Utc};

use crate::config::BASIS_POINTS;
use crate::error::{EconomyError, EconomyResult, ResourceKind};

/// Account identifier (resolved by the auth layer).
pub type AccountId = u64;

/// Card instance identifier.
pub type CardId = u64;

/// Card number in the stat table (1..=8).
pub type CardNumber = u8;

/// Seconds in one accrual day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// A record together with the persistence version it was read at.
///
/// Version 0 means "not yet persisted".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Persistence version.
    pub version: u64,
    /// The record.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Wraps a record that has never been committed.
    #[must_use]
    pub const fn fresh(value: T) -> Self {
        Self { version: 0, value }
    }
}

/// Balances that can be debited and credited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Currency {
    /// Gold, earned from cards and spent on upgrades.
    Gold,
    /// Tokens, the premium currency.
    Tokens,
    /// Tournament tickets.
    Tickets,
}

impl Currency {
    /// The resource kind reported when this currency runs short.
    #[must_use]
    pub const fn resource(self) -> ResourceKind {
        match self {
            Self::Gold => ResourceKind::Gold,
            Self::Tokens => ResourceKind::Tokens,
            Self::Tickets => ResourceKind::Tickets,
        }
    }
}

/// Leaderboard periods that roll over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Period {
    /// Weekly points.
    Weekly,
    /// Monthly points.
    Monthly,
    /// Yearly points.
    Yearly,
}

/// Attack, defense and hit points of a card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardStats {
    /// Attack.
    pub atk: u32,
    /// Defense.
    pub def: u32,
    /// Hit points.
    pub hp: u32,
}

/// Lifetime counters of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerStats {
    /// Battles fought.
    pub battles: u64,
    /// Battles won.
    pub wins: u64,
    /// Battles lost.
    pub losses: u64,
    /// Upgrade attempts paid for.
    pub upgrade_attempts: u64,
    /// Upgrade attempts that succeeded.
    pub successful_upgrades: u64,
    /// Gold credited from card production.
    pub gold_earned: u64,
    /// Gold spent on upgrades.
    pub gold_spent: u64,
}

/// Leaderboard points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Points {
    /// Points this week.
    pub weekly: u64,
    /// Points this month.
    pub monthly: u64,
    /// Points this year.
    pub yearly: u64,
    /// Points ever.
    pub total: u64,
}

/// A player account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Account id.
    pub id: AccountId,
    /// Gold balance.
    pub gold: u64,
    /// Token balance.
    pub tokens: u64,
    /// Tournament ticket balance.
    pub tournament_tickets: u64,
    /// VIP subscription flag.
    pub is_vip: bool,
    /// VIP expiry, if ever subscribed.
    pub vip_expires_at: Option<DateTime<Utc>>,
    /// Leaderboard points.
    pub points: Points,
    /// Tokens sent to the settlement tier.
    pub total_tokens_withdrawn: u64,
    /// Whether the registration bonus was taken.
    pub starter_bonus_claimed: bool,
    /// Lifetime counters.
    pub stats: PlayerStats,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Creates an empty account.
    #[must_use]
    pub fn new(id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            gold: 0,
            tokens: 0,
            tournament_tickets: 0,
            is_vip: false,
            vip_expires_at: None,
            points: Points::default(),
            total_tokens_withdrawn: 0,
            starter_bonus_claimed: false,
            stats: PlayerStats::default(),
            created_at: now,
        }
    }

    /// VIP effects apply iff the flag is set and the subscription has not expired.
    #[inline]
    #[must_use]
    pub fn is_vip_active(&self, now: DateTime<Utc>) -> bool {
        self.is_vip && self.vip_expires_at.is_some_and(|expiry| now < expiry)
    }

    /// Current balance of a currency.
    #[inline]
    #[must_use]
    pub const fn balance(&self, currency: Currency) -> u64 {
        match currency {
            Currency::Gold => self.gold,
            Currency::Tokens => self.tokens,
            Currency::Tickets => self.tournament_tickets,
        }
    }

    fn balance_mut(&mut self, currency: Currency) -> &mut u64 {
        match currency {
            Currency::Gold => &mut self.gold,
            Currency::Tokens => &mut self.tokens,
            Currency::Tickets => &mut self.tournament_tickets,
        }
    }

    /// Subtracts from a balance.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InsufficientResource` if the balance is short;
    /// the account is unchanged in that case.
    pub fn debit(&mut self, currency: Currency, amount: u64) -> EconomyResult<()> {
        let balance = self.balance_mut(currency);
        if *balance < amount {
            return Err(EconomyError::insufficient(currency.resource(), amount, *balance));
        }
        *balance -= amount;
        Ok(())
    }

    /// Adds to a balance.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the balance would overflow.
    pub fn credit(&mut self, currency: Currency, amount: u64) -> EconomyResult<()> {
        let balance = self.balance_mut(currency);
        *balance = balance
            .checked_add(amount)
            .ok_or(EconomyError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Adds points to every leaderboard period.
    pub fn add_points(&mut self, amount: u64) {
        let points = &mut self.points;
        points.weekly = points.weekly.saturating_add(amount);
        points.monthly = points.monthly.saturating_add(amount);
        points.yearly = points.yearly.saturating_add(amount);
        points.total = points.total.saturating_add(amount);
    }

    /// Zeroes the points of one period.
    pub fn reset_points(&mut self, period: Period) {
        match period {
            Period::Weekly => self.points.weekly = 0,
            Period::Monthly => self.points.monthly = 0,
            Period::Yearly => self.points.yearly = 0,
        }
    }

    /// Extends the VIP subscription by whole calendar months.
    ///
    /// The extension starts from the later of `now` and the current expiry,
    /// so an active subscription is never shortened.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidInput` for zero months and
    /// `EconomyError::ArithmeticOverflow` past the representable date range.
    pub fn extend_vip(&mut self, months: u32, now: DateTime<Utc>) -> EconomyResult<DateTime<Utc>> {
        if months == 0 {
            return Err(EconomyError::invalid("months", "must be at least 1"));
        }
        let start = self.vip_expires_at.map_or(now, |expiry| expiry.max(now));
        let expiry = start
            .checked_add_months(Months::new(months))
            .ok_or(EconomyError::ArithmeticOverflow)?;
        self.is_vip = true;
        self.vip_expires_at = Some(expiry);
        Ok(expiry)
    }
}

/// A minted card.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Card {
    /// Card id.
    pub id: CardId,
    /// Card number in the stat table.
    pub card_number: CardNumber,
    /// Owning account.
    pub owner_id: AccountId,
    /// Current stats.
    pub stats: CardStats,
    /// Gold produced per full day.
    pub daily_gold_production: u64,
    /// Start of the not-yet-claimed accrual window.
    pub last_gold_claim: DateTime<Utc>,
    /// Successful upgrades.
    pub upgrade_level: u32,
    /// Paid upgrade attempts.
    pub upgrade_attempts: u32,
}

impl Card {
    /// Creates a freshly minted card.
    #[must_use]
    pub fn new(
        id: CardId,
        card_number: CardNumber,
        owner_id: AccountId,
        base: CardStats,
        gold_multiplier: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            card_number,
            owner_id,
            stats: base,
            daily_gold_production: u64::from(base.atk) * gold_multiplier,
            last_gold_claim: now,
            upgrade_level: 0,
            upgrade_attempts: 0,
        }
    }

    /// Whole days of unclaimed production.
    #[must_use]
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> u64 {
        let seconds = (now - self.last_gold_claim).num_seconds();
        u64::try_from(seconds / SECONDS_PER_DAY).unwrap_or(0)
    }

    /// Raises the card one level.
    ///
    /// Every stat gains `floor(base × growth_bp / 10000)`, at least 1, and
    /// daily gold production follows the new attack.
    pub fn level_up(&mut self, base: CardStats, stat_growth_bp: u32, gold_multiplier: u64) {
        let gain = |stat: u32| -> u32 {
            let raw = u64::from(stat) * u64::from(stat_growth_bp) / u64::from(BASIS_POINTS);
            u32::try_from(raw).unwrap_or(u32::MAX).max(1)
        };
        self.stats.atk = self.stats.atk.saturating_add(gain(base.atk));
        self.stats.def = self.stats.def.saturating_add(gain(base.def));
        self.stats.hp = self.stats.hp.saturating_add(gain(base.hp));
        self.upgrade_level += 1;
        self.daily_gold_production = u64::from(self.stats.atk) * gold_multiplier;
    }
}

/// Per-account daily mint counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyMint {
    /// Cards minted on `reset_date`.
    pub count: u32,
    /// The UTC day the counter belongs to.
    pub reset_date: NaiveDate,
}

impl DailyMint {
    /// A zero counter for `today`.
    #[must_use]
    pub const fn new(today: NaiveDate) -> Self {
        Self {
            count: 0,
            reset_date: today,
        }
    }

    /// The counter as seen on `today`: zeroed if its day has passed.
    #[must_use]
    pub fn rolled(self, today: NaiveDate) -> Self {
        if self.reset_date < today {
            Self::new(today)
        } else {
            self
        }
    }
}

//! # The Economy
//!
//! **THE LEDGER** - no card, gold piece or ticket exists without a commit.
//!
//! [`Economy`] wires the components together and is the single surface the
//! calling layer (HTTP, CLI, simulator) talks to. Every call carries a
//! [`Request`]: the account id resolved by the auth layer and the timeout
//! propagated into every lock wait and persistence call.
//!
//! ```text
//!                        ┌──────────────┐
//!   Request ───────────> │   Economy    │
//!                        └──────┬───────┘
//!        ┌──────────┬──────────┼───────────┬────────────┐
//!        ▼          ▼          ▼           ▼            ▼
//!   TicketStore  PackStore  Upgrade    GoldAccrual   CardRegistry
//!        │          │          │           │            │
//!        └──────────┴────┬─────┴───────────┴────────────┘
//!                        ▼
//!     PricingEngine · AccountLedger · SupplyLedger
//!                        │
//!                        ▼
//!                 Persistence (one WriteBatch per call)
//! ```
//!
//! ## Startup
//!
//! ```rust,ignore
//! let config = EconomyConfig::load("data/economy.toml")?;
//! let store = Arc::new(JournalStore::open("data/economy.journal")?);
//! let economy = Economy::builder(config).store(store).open()?;
//!
//! let req = economy.request(player_id);
//! economy.register(req)?;
//! let bonus = economy.claim_starter_bonus(req)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::account::{AccountLedger, WithdrawalReceipt};
use crate::accrual::{GoldAccrualEngine, GoldClaim, GoldClaimSummary};
use crate::cards::CardRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::EconomyConfig;
use crate::error::EconomyResult;
use crate::model::{Account, AccountId, Card, CardId, CardNumber, Currency, Period, Versioned};
use crate::persistence::{MemoryStore, Persistence, Record};
use crate::pricing::PricingEngine;
use crate::random::{RandomSource, SeededRandom};
use crate::store::{PackOpening, PackStore, StarterBonus, TicketBalance, TicketPurchase, TicketStore, VipPurchase};
use crate::supply::{DailyStatus, SupplyLedger, SupplySnapshot, SupplyState};
use crate::txn::Context;
use crate::upgrade::{UpgradeEngine, UpgradeOutcome};

// ============================================================================
// Request / Response Types
// ============================================================================

/// Per-call context from the calling layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    /// Authenticated account.
    pub account_id: AccountId,
    /// Bound on every lock wait and persistence call.
    pub timeout: Duration,
}

impl Request {
    /// Creates a request.
    #[must_use]
    pub const fn new(account_id: AccountId, timeout: Duration) -> Self {
        Self { account_id, timeout }
    }

    /// Same request with another timeout.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// An account with its derived state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountView {
    /// The account as last committed.
    pub account: Account,
    /// Whether VIP effects apply right now.
    pub vip_active: bool,
    /// Today's mint allowance.
    pub daily: DailyStatus,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`Economy`] from its collaborators.
pub struct EconomyBuilder {
    config: EconomyConfig,
    store: Option<Arc<dyn Persistence>>,
    clock: Option<Arc<dyn Clock>>,
    rng: Option<Arc<dyn RandomSource>>,
}

impl EconomyBuilder {
    /// Uses `store` instead of a fresh [`MemoryStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `rng` instead of a ChaCha stream seeded from config or entropy.
    #[must_use]
    pub fn rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Validates the configuration and hydrates the ledger from the store.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an inconsistent configuration, `Internal` if the
    /// store cannot be scanned.
    pub fn open(self) -> EconomyResult<Economy> {
        self.config.validate()?;
        let seed = self.config.ledger.rng_seed;
        let ctx = Arc::new(Context {
            config: Arc::new(self.config),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            rng: self
                .rng
                .unwrap_or_else(|| Arc::new(SeededRandom::new(seed)) as Arc<dyn RandomSource>),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Persistence>),
        });

        let mut supply = SupplyState::default();
        let mut accounts = Vec::new();
        let mut cards = Vec::new();
        let mut replayed_until: Option<DateTime<Utc>> = None;
        for stored in ctx.store.scan()? {
            replayed_until = replayed_until.max(activity_time(&stored.value));
            let version = stored.version;
            match stored.value {
                Record::SupplyTotal(total) => supply.total = Versioned { version, value: total },
                Record::DailyMint { account_id, mint } => {
                    supply.daily.insert(account_id, Versioned { version, value: mint });
                }
                Record::Account(account) => accounts.push(Versioned { version, value: account }),
                Record::Card(card) => cards.push(Versioned { version, value: card }),
            }
        }
        tracing::info!(
            accounts = accounts.len(),
            cards = cards.len(),
            total_minted = supply.total.value,
            replayed_until = ?replayed_until,
            "economy hydrated"
        );

        let supply = Arc::new(SupplyLedger::new(Arc::clone(&ctx), supply));
        let accounts = Arc::new(AccountLedger::new(Arc::clone(&ctx), accounts));
        let pricing = Arc::new(PricingEngine::new(Arc::clone(&ctx)));
        let registry = Arc::new(CardRegistry::new(
            Arc::clone(&ctx),
            Arc::clone(&supply),
            Arc::clone(&accounts),
            cards,
        ));

        Ok(Economy {
            accrual: GoldAccrualEngine::new(
                Arc::clone(&ctx),
                Arc::clone(&accounts),
                Arc::clone(&registry),
                Arc::clone(&pricing),
            ),
            upgrades: UpgradeEngine::new(
                Arc::clone(&ctx),
                Arc::clone(&accounts),
                Arc::clone(&registry),
                Arc::clone(&pricing),
            ),
            tickets: TicketStore::new(Arc::clone(&ctx), Arc::clone(&accounts), Arc::clone(&pricing)),
            packs: PackStore::new(
                Arc::clone(&ctx),
                Arc::clone(&accounts),
                Arc::clone(&registry),
                Arc::clone(&pricing),
            ),
            ctx,
            supply,
            accounts,
            pricing,
            registry,
            replayed_until,
        })
    }
}

/// When the stored record was last touched by a ledger operation.
fn activity_time(record: &Record) -> Option<DateTime<Utc>> {
    match record {
        Record::SupplyTotal(_) => None,
        Record::DailyMint { mint, .. } => mint.reset_date.and_hms_opt(0, 0, 0).map(|at| at.and_utc()),
        Record::Account(account) => Some(account.created_at),
        Record::Card(card) => Some(card.last_gold_claim),
    }
}

// ============================================================================
// The Economy
// ============================================================================

/// The economy ledger.
///
/// `Economy` is `Send + Sync`; share it behind an `Arc` and call it from any
/// number of request threads.
pub struct Economy {
    ctx: Arc<Context>,
    supply: Arc<SupplyLedger>,
    accounts: Arc<AccountLedger>,
    pricing: Arc<PricingEngine>,
    registry: Arc<CardRegistry>,
    accrual: GoldAccrualEngine,
    upgrades: UpgradeEngine,
    tickets: TicketStore,
    packs: PackStore,
    replayed_until: Option<DateTime<Utc>>,
}

impl Economy {
    /// Starts assembling an economy around `config`.
    #[must_use]
    pub fn builder(config: EconomyConfig) -> EconomyBuilder {
        EconomyBuilder {
            config,
            store: None,
            clock: None,
            rng: None,
        }
    }

    /// A request for `account_id` with the configured default timeout.
    #[must_use]
    pub fn request(&self, account_id: AccountId) -> Request {
        Request::new(account_id, self.ctx.config.ledger.default_timeout())
    }

    /// The configuration in force.
    #[must_use]
    pub fn config(&self) -> &EconomyConfig {
        &self.ctx.config
    }

    /// Latest activity time found in the store when the ledger was opened.
    ///
    /// A manual clock resuming a stored ledger must not start before this,
    /// or daily counters dated in its future never roll over.
    #[must_use]
    pub const fn replayed_until(&self) -> Option<DateTime<Utc>> {
        self.replayed_until
    }

    /// The supply ledger.
    #[must_use]
    pub fn supply_ledger(&self) -> &SupplyLedger {
        &self.supply
    }

    /// The account ledger.
    #[must_use]
    pub fn accounts(&self) -> &AccountLedger {
        &self.accounts
    }

    /// The pricing engine.
    #[must_use]
    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// The card registry.
    #[must_use]
    pub fn registry(&self) -> &CardRegistry {
        &self.registry
    }

    /// The gold accrual engine.
    #[must_use]
    pub fn accrual(&self) -> &GoldAccrualEngine {
        &self.accrual
    }

    /// The upgrade engine.
    #[must_use]
    pub fn upgrades(&self) -> &UpgradeEngine {
        &self.upgrades
    }

    /// The ticket store.
    #[must_use]
    pub fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    /// The pack store.
    #[must_use]
    pub fn packs(&self) -> &PackStore {
        &self.packs
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    /// Registers the request's account.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if it already exists.
    pub fn register(&self, req: Request) -> EconomyResult<Account> {
        self.accounts.open_account(req.account_id, req.timeout)
    }

    /// The account with VIP state and today's mint allowance.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn account(&self, req: Request) -> EconomyResult<AccountView> {
        let account = self.accounts.account(req.account_id)?;
        let vip_active = self.pricing.is_vip_active(&account);
        Ok(AccountView {
            daily: self.supply.daily_status(req.account_id, vip_active)?,
            vip_active,
            account,
        })
    }

    /// Credits tokens bought through the external payment flow.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn deposit_tokens(&self, req: Request, amount: u64) -> EconomyResult<Account> {
        self.accounts.credit(req.account_id, Currency::Tokens, amount, req.timeout)
    }

    /// Debits tokens toward the settlement tier.
    ///
    /// # Errors
    ///
    /// `InvalidInput` below the minimum, `InsufficientResource` if short.
    pub fn withdraw_tokens(&self, req: Request, amount: u64) -> EconomyResult<WithdrawalReceipt> {
        self.accounts.withdraw_tokens(req.account_id, amount, req.timeout)
    }

    /// Records a battle result.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn record_battle(&self, req: Request, won: bool) -> EconomyResult<Account> {
        self.accounts.record_battle(req.account_id, won, req.timeout)
    }

    /// Leaderboard rollover for one period across all accounts.
    ///
    /// # Errors
    ///
    /// The first account that fails to commit.
    pub fn reset_period_points(&self, period: Period, timeout: Duration) -> EconomyResult<usize> {
        self.accounts.reset_period_points(period, timeout)
    }

    /// Current global supply.
    ///
    /// # Errors
    ///
    /// `Timeout` if a mint holds the supply past the default timeout.
    pub fn supply(&self) -> EconomyResult<SupplySnapshot> {
        self.supply.snapshot()
    }

    // ------------------------------------------------------------------------
    // Cards
    // ------------------------------------------------------------------------

    /// Every card the account owns.
    ///
    /// # Errors
    ///
    /// `Timeout` if one of the cards stays locked past the default timeout.
    pub fn cards(&self, req: Request) -> EconomyResult<Vec<Card>> {
        self.registry.cards_of(req.account_id)
    }

    /// Mints one card by number.
    ///
    /// # Errors
    ///
    /// `InvalidInput` outside 1..=8, `InsufficientResource` when supply or
    /// the daily limit is exhausted.
    pub fn mint_card(&self, req: Request, card_number: CardNumber) -> EconomyResult<Card> {
        self.registry.mint(req.account_id, card_number, req.timeout)
    }

    /// Mints a whole pack without charging for it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown packs, `InsufficientResource` when supply
    /// or the daily limit cannot cover every card.
    pub fn mint_pack(&self, req: Request, pack_key: &str) -> EconomyResult<Vec<Card>> {
        self.registry.mint_pack(req.account_id, pack_key, req.timeout)
    }

    /// Pays for an upgrade attempt and rolls it.
    ///
    /// # Errors
    ///
    /// `NotFound` for foreign cards, `InsufficientResource{Gold}`.
    pub fn upgrade_card(&self, req: Request, card_id: CardId) -> EconomyResult<UpgradeOutcome> {
        self.upgrades.attempt(req.account_id, card_id, req.timeout)
    }

    /// Claims one card's accrued gold.
    ///
    /// # Errors
    ///
    /// `NotFound` for foreign cards.
    pub fn claim_gold(&self, req: Request, card_id: CardId) -> EconomyResult<GoldClaim> {
        self.accrual.claim(req.account_id, card_id, req.timeout)
    }

    /// Claims every card's accrued gold in one commit.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn claim_all_gold(&self, req: Request) -> EconomyResult<GoldClaimSummary> {
        self.accrual.claim_all(req.account_id, req.timeout)
    }

    // ------------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------------

    /// Buys a ticket package.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown packages, `InsufficientResource{Tokens}`.
    pub fn buy_tickets(&self, req: Request, package_key: &str) -> EconomyResult<TicketPurchase> {
        self.tickets.buy(req.account_id, package_key, req.timeout)
    }

    /// Tickets, tokens and VIP state.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown accounts.
    pub fn ticket_balance(&self, req: Request) -> EconomyResult<TicketBalance> {
        self.tickets.balance(req.account_id)
    }

    /// Spends tickets on a tournament entry.
    ///
    /// # Errors
    ///
    /// `InsufficientResource{Tickets}` if short.
    pub fn use_tickets(&self, req: Request, count: u64) -> EconomyResult<TicketBalance> {
        self.tickets.use_tickets(req.account_id, count, req.timeout)
    }

    /// Buys and opens a pack.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown or unsold packs, `InsufficientResource`.
    pub fn buy_pack(&self, req: Request, pack_key: &str) -> EconomyResult<PackOpening> {
        self.packs.buy_pack(req.account_id, pack_key, req.timeout)
    }

    /// Buys VIP months.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for zero months, `InsufficientResource{Tokens}`.
    pub fn purchase_vip(&self, req: Request, months: u32) -> EconomyResult<VipPurchase> {
        self.packs.purchase_vip(req.account_id, months, req.timeout)
    }

    /// Grants the starter pack and tickets once.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if already claimed.
    pub fn claim_starter_bonus(&self, req: Request) -> EconomyResult<StarterBonus> {
        self.packs.claim_starter_bonus(req.account_id, req.timeout)
    }
}

//! # CARDFORGE Economy Ledger
//!
//! The in-game economy of CARDFORGE: scarce cards under a global and daily
//! mint cap, gold that accrues per owned card, VIP discounts and boosts,
//! probabilistic upgrades with escalating cost, and tournament tickets sold
//! for tokens.
//!
//! ## Design Principles
//!
//! 1. **Integers at rest** - balances are `u64`, percentages are basis points
//! 2. **One batch per operation** - debit and credit commit together or not at all
//! 3. **Per-entity locks** - supply, each account and each card lock independently
//! 4. **Bounded waits** - every lock and persistence call carries the request timeout
//! 5. **External configuration** - all balance data in TOML, loaded once
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardforge_economy::{Economy, EconomyConfig};
//!
//! let economy = Economy::builder(EconomyConfig::load("data/economy.toml")?).open()?;
//! let req = economy.request(42);
//! economy.register(req)?;
//! economy.deposit_tokens(req, 5_000)?;
//!
//! let purchase = economy.buy_tickets(req, "large")?;
//! assert_eq!(purchase.tokens_spent, 4_000);
//! ```

pub mod account;
pub mod accrual;
pub mod cards;
pub mod clock;
pub mod config;
pub mod economy;
pub mod error;
pub mod model;
pub mod persistence;
pub mod pricing;
pub mod random;
pub mod store;
pub mod supply;
pub mod upgrade;

mod txn;

pub use account::{AccountLedger, WithdrawalReceipt};
pub use accrual::{GoldAccrualEngine, GoldClaim, GoldClaimSummary};
pub use cards::CardRegistry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EconomyConfig;
pub use economy::{AccountView, Economy, EconomyBuilder, Request};
pub use error::{EconomyError, EconomyResult, Entity, ResourceKind};
pub use model::{Account, AccountId, Card, CardId, CardNumber, CardStats, Currency, DailyMint, Period};
pub use persistence::{AccountHook, Fault, JournalStore, MemoryStore, Persistence};
pub use pricing::PricingEngine;
pub use random::{RandomSource, ScriptedRandom, SeededRandom};
pub use store::{PackOpening, PackStore, StarterBonus, TicketBalance, TicketPurchase, TicketStore, VipPurchase};
pub use supply::{DailyStatus, MintReservation, SupplyLedger, SupplySnapshot};
pub use upgrade::{UpgradeEngine, UpgradeOutcome};

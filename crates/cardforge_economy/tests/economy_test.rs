//! Integration tests for the economy ledger flows.

use std::sync::Arc;
use std::time::Duration;

use cardforge_economy::{
    AccountHook, Economy, EconomyConfig, EconomyError, Entity, Fault, ManualClock, MemoryStore, Period,
    Persistence, ResourceKind, ScriptedRandom,
};
use cardforge_economy::persistence::{PersistError, PersistResult};
use cardforge_economy::Account;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

struct Harness {
    economy: Economy,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 14, 10, 0, 0).unwrap()
}

fn harness_with(config: EconomyConfig, store: MemoryStore, rng: ScriptedRandom) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(store);
    let economy = Economy::builder(config)
        .store(Arc::clone(&store) as Arc<dyn Persistence>)
        .clock(Arc::clone(&clock) as Arc<dyn cardforge_economy::Clock>)
        .rng(Arc::new(rng))
        .open()
        .unwrap();
    Harness { economy, clock, store }
}

fn harness() -> Harness {
    harness_with(EconomyConfig::default(), MemoryStore::new(), ScriptedRandom::default())
}

// ============================================================================
// Tickets
// ============================================================================

#[test]
fn test_ticket_price_depends_on_vip() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 10_000).unwrap();

    let regular = h.economy.buy_tickets(req, "large").unwrap();
    assert_eq!(regular.tokens_spent, 4_000);
    assert_eq!(regular.tickets_purchased, 50);
    assert_eq!(regular.total_tickets, 50);
    assert_eq!(regular.remaining_tokens, 6_000);

    h.economy.purchase_vip(req, 1).unwrap();
    h.economy.deposit_tokens(req, 10_000).unwrap();
    let vip = h.economy.buy_tickets(req, "large").unwrap();
    assert_eq!(vip.tokens_spent, 3_200);
    assert_eq!(vip.total_tickets, 100);
    assert_eq!(vip.remaining_tokens, 11_000 - 3_200);

    let balance = h.economy.ticket_balance(req).unwrap();
    assert_eq!((balance.tickets, balance.tokens, balance.is_vip), (100, 7_800, true));
}

#[test]
fn test_insufficient_tokens_change_nothing() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 3_999).unwrap();
    let commits = h.store.commits();

    let err = h.economy.buy_tickets(req, "large").unwrap_err();
    assert_eq!(
        err,
        EconomyError::InsufficientResource { kind: ResourceKind::Tokens, required: 4_000, available: 3_999 }
    );
    let balance = h.economy.ticket_balance(req).unwrap();
    assert_eq!((balance.tickets, balance.tokens), (0, 3_999));
    assert_eq!(h.store.commits(), commits);
}

#[test]
fn test_unknown_package_is_invalid() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    assert!(matches!(
        h.economy.buy_tickets(req, "huge"),
        Err(EconomyError::InvalidInput { field: "package", .. })
    ));
}

#[test]
fn test_using_tickets() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.claim_starter_bonus(req).unwrap();

    assert_eq!(h.economy.use_tickets(req, 15).unwrap().tickets, 5);
    assert_eq!(
        h.economy.use_tickets(req, 6).unwrap_err(),
        EconomyError::InsufficientResource { kind: ResourceKind::Tickets, required: 6, available: 5 }
    );
}

// ============================================================================
// Minting
// ============================================================================

#[test]
fn test_daily_limit_resets_next_utc_day() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();

    for _ in 0..500 {
        h.economy.mint_card(req, 1).unwrap();
    }
    let err = h.economy.mint_card(req, 1).unwrap_err();
    assert!(err.is_daily_limit());
    assert_eq!(h.economy.account(req).unwrap().daily.remaining, 0);

    // 14:00 the next day is past midnight UTC.
    h.clock.advance(TimeDelta::hours(14));
    h.economy.mint_card(req, 1).unwrap();

    let view = h.economy.account(req).unwrap();
    assert_eq!(view.daily.count, 1);
    assert_eq!(view.daily.reset_date, t0().date_naive().succ_opt().unwrap());
    assert_eq!(h.economy.supply().unwrap().total_minted, 501);
}

#[test]
fn test_vip_accounts_have_the_lower_limit() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 5_000).unwrap();
    h.economy.purchase_vip(req, 1).unwrap();

    assert_eq!(h.economy.account(req).unwrap().daily.limit, 50);
    for _ in 0..50 {
        h.economy.mint_card(req, 3).unwrap();
    }
    assert!(h.economy.mint_card(req, 3).unwrap_err().is_daily_limit());
}

#[test]
fn test_pack_purchase_is_atomic() {
    let mut config = EconomyConfig::default();
    config.supply.total_supply = 7;
    let h = harness_with(config, MemoryStore::new(), ScriptedRandom::default());
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 2_000).unwrap();

    let opening = h.economy.buy_pack(req, "basic").unwrap();
    assert_eq!(opening.cards.len(), 5);
    assert_eq!(opening.tokens_spent, 1_000);
    assert_eq!(opening.remaining_tokens, 1_000);
    assert_eq!(opening.total_minted, 5);

    // Only 2 cards of supply remain: no tokens spent, no cards minted.
    let err = h.economy.buy_pack(req, "basic").unwrap_err();
    assert_eq!(
        err,
        EconomyError::InsufficientResource { kind: ResourceKind::GlobalSupply, required: 5, available: 2 }
    );
    assert_eq!(h.economy.account(req).unwrap().account.tokens, 1_000);
    assert_eq!(h.economy.cards(req).unwrap().len(), 5);
}

#[test]
fn test_free_pack_mint_charges_nothing() {
    let h = harness_with(
        EconomyConfig::default(),
        MemoryStore::new(),
        ScriptedRandom::new(Vec::new(), vec![0, 1, 2, 3, 3]),
    );
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();

    let cards = h.economy.mint_pack(req, "legendary").unwrap();
    let numbers: Vec<_> = cards.iter().map(|c| c.card_number).collect();
    assert_eq!(numbers, vec![6, 7, 8]);
    assert_eq!(h.economy.account(req).unwrap().account.tokens, 0);
    assert_eq!(h.economy.account(req).unwrap().daily.count, 3);
}

#[test]
fn test_starter_pack_is_not_for_sale() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    assert!(matches!(
        h.economy.buy_pack(req, "starter"),
        Err(EconomyError::InvalidInput { field: "pack", .. })
    ));
}

#[test]
fn test_starter_bonus_only_once() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();

    let bonus = h.economy.claim_starter_bonus(req).unwrap();
    assert_eq!(bonus.cards.len(), 5);
    assert_eq!(bonus.tickets, 20);
    assert!(bonus.cards.iter().all(|c| (1..=3).contains(&c.card_number)));

    assert!(matches!(
        h.economy.claim_starter_bonus(req),
        Err(EconomyError::InvalidInput { field: "account", .. })
    ));
    let view = h.economy.account(req).unwrap();
    assert!(view.account.starter_bonus_claimed);
    assert_eq!(view.account.tournament_tickets, 20);
    assert_eq!(h.economy.supply().unwrap().total_minted, 5);
}

// ============================================================================
// Gold And Upgrades
// ============================================================================

#[test]
fn test_gold_claim_keeps_partial_day() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    let card = h.economy.mint_card(req, 2).unwrap();
    assert_eq!(card.daily_gold_production, 70);

    h.clock.advance(TimeDelta::days(2) + TimeDelta::hours(3));
    assert_eq!(h.economy.accrual().pending(1, card.id).unwrap(), 140);
    let claim = h.economy.claim_gold(req, card.id).unwrap();
    assert_eq!(claim.amount, 140);
    assert_eq!(claim.gold_balance, 140);
    assert_eq!(claim.last_gold_claim, t0() + TimeDelta::days(2));

    // 21 more hours complete the third day.
    assert_eq!(h.economy.claim_gold(req, card.id).unwrap().days, 0);
    h.clock.advance(TimeDelta::hours(21));
    assert_eq!(h.economy.claim_gold(req, card.id).unwrap().amount, 70);
    assert_eq!(h.economy.account(req).unwrap().account.stats.gold_earned, 210);
}

#[test]
fn test_vip_gold_boost() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 5_000).unwrap();
    h.economy.purchase_vip(req, 1).unwrap();
    let card = h.economy.mint_card(req, 2).unwrap();

    h.clock.advance(TimeDelta::days(2));
    assert_eq!(h.economy.claim_gold(req, card.id).unwrap().amount, 168);
}

#[test]
fn test_claim_all_commits_every_card() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.mint_card(req, 1).unwrap();
    h.clock.advance(TimeDelta::hours(12));
    h.economy.mint_card(req, 2).unwrap();

    h.clock.advance(TimeDelta::hours(12));
    let summary = h.economy.claim_all_gold(req).unwrap();
    // Only the first card has a whole day.
    assert_eq!(summary.total, 50);
    assert_eq!(summary.claims.len(), 2);
    assert_eq!(summary.claims[1].days, 0);

    h.clock.advance(TimeDelta::hours(12));
    let summary = h.economy.claim_all_gold(req).unwrap();
    assert_eq!(summary.total, 70);
    assert_eq!(summary.gold_balance, 120);
}

#[test]
fn test_upgrade_charges_every_attempt() {
    let h = harness_with(
        EconomyConfig::default(),
        MemoryStore::new(),
        ScriptedRandom::new(vec![0.5, 0.1], Vec::new()),
    );
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    let card = h.economy.mint_card(req, 8).unwrap();
    h.clock.advance(TimeDelta::days(1));
    assert_eq!(h.economy.claim_gold(req, card.id).unwrap().amount, 250);

    let first = h.economy.upgrade_card(req, card.id).unwrap();
    assert!(!first.success);
    assert_eq!((first.new_level, first.cost_paid), (0, 100));

    let second = h.economy.upgrade_card(req, card.id).unwrap();
    assert!(second.success);
    assert_eq!((second.new_level, second.cost_paid), (1, 100));
    assert_eq!(h.economy.upgrades().quote(1, card.id).unwrap(), 120);

    let err = h.economy.upgrade_card(req, card.id).unwrap_err();
    assert_eq!(
        err,
        EconomyError::InsufficientResource { kind: ResourceKind::Gold, required: 120, available: 50 }
    );

    let account = h.economy.account(req).unwrap().account;
    assert_eq!(account.stats.upgrade_attempts, 2);
    assert_eq!(account.stats.successful_upgrades, 1);
    assert_eq!(account.stats.gold_spent, 200);
    assert_eq!(account.points.total, 1 + 1 + 5);
    let card = h.economy.registry().card(card.id).unwrap();
    assert_eq!((card.upgrade_level, card.upgrade_attempts), (1, 2));
    assert_eq!(card.stats.atk, 27);
}

#[test]
fn test_foreign_card_is_not_found() {
    let h = harness();
    let owner = h.economy.request(1);
    let other = h.economy.request(2);
    h.economy.register(owner).unwrap();
    h.economy.register(other).unwrap();
    let card = h.economy.mint_card(owner, 4).unwrap();

    let not_found = EconomyError::NotFound { entity: Entity::Card, id: card.id };
    assert_eq!(h.economy.claim_gold(other, card.id).unwrap_err(), not_found);
    assert_eq!(h.economy.upgrade_card(other, card.id).unwrap_err(), not_found);
}

// ============================================================================
// Accounts
// ============================================================================

#[test]
fn test_battles_and_leaderboard_rollover() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.record_battle(req, true).unwrap();
    h.economy.record_battle(req, false).unwrap();

    let account = h.economy.account(req).unwrap().account;
    assert_eq!((account.stats.battles, account.stats.wins, account.stats.losses), (2, 1, 1));
    assert_eq!(account.points.weekly, 12);

    h.economy.reset_period_points(Period::Monthly, Duration::from_secs(1)).unwrap();
    let account = h.economy.account(req).unwrap().account;
    assert_eq!((account.points.weekly, account.points.monthly, account.points.total), (12, 0, 12));
}

#[test]
fn test_vip_expires() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 10_000).unwrap();

    let purchase = h.economy.purchase_vip(req, 2).unwrap();
    assert_eq!(purchase.tokens_spent, 10_000);
    assert_eq!(purchase.expires_at, Utc.with_ymd_and_hms(2025, 6, 14, 10, 0, 0).unwrap());
    assert!(h.economy.account(req).unwrap().vip_active);

    h.clock.set(purchase.expires_at);
    let view = h.economy.account(req).unwrap();
    assert!(view.account.is_vip);
    assert!(!view.vip_active);
    assert_eq!(view.daily.limit, 500);
}

#[test]
fn test_withdrawal_receipt() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 1_000).unwrap();

    let receipt = h.economy.withdraw_tokens(req, 400).unwrap();
    assert_eq!((receipt.remaining_tokens, receipt.total_withdrawn), (600, 400));
    assert!(h.economy.withdraw_tokens(req, 50).is_err());
}

#[test]
fn test_unregistered_account_is_not_found() {
    let h = harness();
    let req = h.economy.request(77);
    assert_eq!(
        h.economy.buy_tickets(req, "small").unwrap_err(),
        EconomyError::NotFound { entity: Entity::Account, id: 77 }
    );
}

// ============================================================================
// Persistence Failures
// ============================================================================

#[test]
fn test_timeouts_are_retried_a_bounded_number_of_times() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.economy.deposit_tokens(req, 2_000).unwrap();

    h.store.inject(Fault::Timeout);
    h.store.inject(Fault::Timeout);
    assert_eq!(h.economy.buy_tickets(req, "small").unwrap().remaining_tokens, 1_000);

    for _ in 0..3 {
        h.store.inject(Fault::Timeout);
    }
    let err = h.economy.buy_tickets(req, "small").unwrap_err();
    assert_eq!(err, EconomyError::Timeout { attempts: 3 });
    assert!(err.is_retryable());
    let balance = h.economy.ticket_balance(req).unwrap();
    assert_eq!((balance.tokens, balance.tickets), (1_000, 10));
}

#[test]
fn test_persistent_conflict_surfaces() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    for _ in 0..3 {
        h.store.inject(Fault::Conflict);
    }
    assert_eq!(h.economy.mint_card(req, 1).unwrap_err(), EconomyError::Conflict { attempts: 3 });
    assert_eq!(h.economy.supply().unwrap().total_minted, 0);
    assert!(h.economy.cards(req).unwrap().is_empty());
}

#[test]
fn test_io_failure_is_not_retried() {
    let h = harness();
    let req = h.economy.request(1);
    h.economy.register(req).unwrap();
    h.store.inject(Fault::Io);
    assert!(matches!(h.economy.deposit_tokens(req, 5), Err(EconomyError::Internal(_))));
    assert_eq!(h.economy.deposit_tokens(req, 5).unwrap().tokens, 5);
}

struct RejectReserved;

impl AccountHook for RejectReserved {
    fn before_store(&self, account: &Account, created: bool) -> PersistResult<()> {
        if created && account.id == 0 {
            return Err(PersistError::Rejected {
                account_id: account.id,
                reason: "id 0 is reserved".to_string(),
            });
        }
        Ok(())
    }
}

#[test]
fn test_account_hook_runs_before_persisting() {
    let h = harness_with(
        EconomyConfig::default(),
        MemoryStore::new().with_hook(RejectReserved),
        ScriptedRandom::default(),
    );
    assert!(matches!(
        h.economy.register(h.economy.request(0)),
        Err(EconomyError::InvalidInput { field: "account", .. })
    ));
    assert!(h.economy.accounts().is_empty());
    h.economy.register(h.economy.request(1)).unwrap();
}

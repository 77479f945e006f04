//! Integration test for the journal-backed ledger: state survives a restart.

use std::sync::Arc;

use cardforge_economy::{Clock, Economy, EconomyConfig, JournalStore, ManualClock, ScriptedRandom};
use chrono::{TimeDelta, TimeZone, Utc};

fn temp_journal_path() -> std::path::PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("test_ledger_{id}.cfj"))
}

fn open(path: &std::path::Path, clock: &Arc<ManualClock>) -> Economy {
    let store = JournalStore::open(path).unwrap();
    Economy::builder(EconomyConfig::default())
        .store(Arc::new(store))
        .clock(Arc::clone(clock) as Arc<dyn Clock>)
        .rng(Arc::new(ScriptedRandom::new(vec![0.0], Vec::new())))
        .open()
        .unwrap()
}

#[test]
fn test_reopen_restores_ledger() {
    let path = temp_journal_path();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap()));

    let (card_id, starter_ids) = {
        let economy = open(&path, &clock);
        assert_eq!(economy.replayed_until(), None);
        let req = economy.request(11);
        economy.register(req).unwrap();
        economy.deposit_tokens(req, 6_000).unwrap();
        economy.purchase_vip(req, 1).unwrap();
        let bonus = economy.claim_starter_bonus(req).unwrap();
        let card = economy.mint_card(req, 6).unwrap();
        clock.advance(TimeDelta::days(1));
        economy.claim_gold(req, card.id).unwrap();
        // Scripted roll of 0.0 always succeeds.
        assert!(economy.upgrade_card(req, card.id).unwrap().success);
        (card.id, bonus.cards.into_iter().map(|c| c.id).collect::<Vec<_>>())
    };

    let economy = open(&path, &clock);
    // The gold claim moved the card's accrual window up to the current time.
    assert_eq!(economy.replayed_until(), Some(clock.now()));
    let req = economy.request(11);
    let view = economy.account(req).unwrap();
    assert!(view.vip_active);
    assert_eq!(view.account.tokens, 1_000);
    assert_eq!(view.account.tournament_tickets, 20);
    assert!(view.account.starter_bonus_claimed);
    // 170 × 1.2 boosted, minus the VIP-discounted first upgrade.
    assert_eq!(view.account.gold, 204 - 80);
    // A day has passed since the six mints.
    assert_eq!((view.daily.count, view.daily.limit), (0, 50));

    assert_eq!(economy.supply().unwrap().total_minted, 6);
    assert_eq!(economy.cards(req).unwrap().len(), 6);
    let card = economy.registry().card(card_id).unwrap();
    assert_eq!(card.upgrade_level, 1);
    assert_eq!(card.stats.atk, 18);

    // New ids continue after the replayed ones.
    let next = economy.mint_card(req, 1).unwrap();
    assert!(starter_ids.iter().all(|id| *id < next.id));
    assert!(next.id > card_id);

    // The starter bonus stays claimed across the restart.
    assert!(economy.claim_starter_bonus(req).is_err());

    drop(economy);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_daily_counters_roll_over_after_resuming_past_the_replayed_day() {
    let path = temp_journal_path();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap()));
    {
        let economy = open(&path, &clock);
        let req = economy.request(4);
        economy.register(req).unwrap();
        economy.deposit_tokens(req, 1_000).unwrap();
        economy.mint_card(req, 3).unwrap();
    }

    // A restarted process whose clock begins earlier than the stored ledger.
    let resumed = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
    let economy = open(&path, &resumed);
    let latest = economy.replayed_until().unwrap();
    assert_eq!(latest, clock.now());
    resumed.set(latest + TimeDelta::days(1));

    let view = economy.account(economy.request(4)).unwrap();
    assert_eq!(view.daily.count, 0);
    assert_eq!(view.daily.reset_date, resumed.today());

    drop(economy);
    std::fs::remove_file(&path).ok();
}

//! Concurrency tests: caps and balances hold under parallel requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cardforge_economy::{Economy, EconomyConfig, ManualClock, SeededRandom};
use chrono::{TimeZone, Utc};

fn economy(config: EconomyConfig) -> Arc<Economy> {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap());
    Arc::new(
        Economy::builder(config)
            .clock(Arc::new(clock))
            .rng(Arc::new(SeededRandom::from_seed(42)))
            .open()
            .unwrap(),
    )
}

#[test]
fn test_global_cap_holds_under_contention() {
    let mut config = EconomyConfig::default();
    config.supply.total_supply = 100;
    let economy = economy(config);
    let num_threads = 8;
    let mints_per_thread = 20;

    for id in 0..num_threads {
        economy.register(economy.request(id)).unwrap();
    }

    let successes = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..num_threads)
        .map(|id| {
            let economy = Arc::clone(&economy);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                let req = economy.request(id);
                for i in 0..mints_per_thread {
                    let number = u8::try_from(i % 8 + 1).unwrap();
                    match economy.mint_card(req, number) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => assert!(err.is_insufficient_supply(), "unexpected error {err}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let minted = successes.load(Ordering::Relaxed);
    assert_eq!(minted, 100);
    assert_eq!(economy.supply().unwrap().total_minted, 100);
    assert_eq!(economy.supply().unwrap().remaining, 0);
    assert_eq!(economy.registry().len(), 100);

    let owned: usize = (0..num_threads).map(|id| economy.cards(economy.request(id)).unwrap().len()).sum();
    assert_eq!(owned, 100);
}

#[test]
fn test_last_card_goes_to_exactly_one_caller() {
    let mut config = EconomyConfig::default();
    config.supply.total_supply = 1;
    let economy = economy(config);
    economy.register(economy.request(1)).unwrap();
    economy.register(economy.request(2)).unwrap();

    let handles: Vec<_> = [1, 2]
        .into_iter()
        .map(|id| {
            let economy = Arc::clone(&economy);
            thread::spawn(move || economy.mint_card(economy.request(id), 5))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert!(loser.is_insufficient_supply());
    assert_eq!(economy.supply().unwrap().total_minted, 1);
}

#[test]
fn test_parallel_purchases_on_one_account_never_overspend() {
    let economy = economy(EconomyConfig::default());
    let req = economy.request(7);
    economy.register(req).unwrap();
    economy.deposit_tokens(req, 10_000).unwrap();

    // Room for exactly ten small packages.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let economy = Arc::clone(&economy);
            thread::spawn(move || {
                let mut bought = 0u64;
                for _ in 0..5 {
                    if economy.buy_tickets(req, "small").is_ok() {
                        bought += 1;
                    }
                }
                bought
            })
        })
        .collect();
    let bought: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(bought, 10);
    let balance = economy.ticket_balance(req).unwrap();
    assert_eq!(balance.tokens, 0);
    assert_eq!(balance.tickets, 100);
}

#[test]
fn test_independent_accounts_progress_in_parallel() {
    let economy = economy(EconomyConfig::default());
    let handles: Vec<_> = (100..116)
        .map(|id| {
            let economy = Arc::clone(&economy);
            thread::spawn(move || {
                let req = economy.request(id);
                economy.register(req).unwrap();
                economy.deposit_tokens(req, 3_000).unwrap();
                economy.claim_starter_bonus(req).unwrap();
                economy.buy_pack(req, "basic").unwrap();
                economy.buy_tickets(req, "small").unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(economy.accounts().len(), 16);
    assert_eq!(economy.supply().unwrap().total_minted, 16 * 10);
    for id in 100..116 {
        let req = economy.request(id);
        let view = economy.account(req).unwrap();
        assert_eq!(view.account.tokens, 1_000);
        assert_eq!(view.account.tournament_tickets, 30);
        assert_eq!(view.daily.count, 10);
        assert_eq!(economy.cards(req).unwrap().len(), 10);
    }
}

//! # Ledger Simulator
//!
//! Drives the economy ledger with concurrent simulated players against a
//! journal file, fast-forwarding a manual clock one day at a time. A
//! replayed journal resumes the clock on the day after its latest activity.
//!
//! Every player runs on its own thread each day and picks random actions:
//! deposits, ticket and pack purchases, mints, gold claims, upgrades and
//! battles. Rejections (short balances, exhausted supply, daily limits) are
//! part of normal play and only counted. Anything else aborts the run.
//!
//! Run with: cargo run --bin ledger_sim -- --players 32 --days 14 --seed 7

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use cardforge_economy::{
    AccountId, Clock, Economy, EconomyConfig, EconomyError, JournalStore, ManualClock, Period, Persistence, Request,
    SeededRandom,
};
use chrono::{TimeDelta, TimeZone, Utc};
use clap::Parser;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Economy configuration file (built-in defaults when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal file; replayed if it already exists.
    #[arg(short, long, default_value = "data/economy.journal")]
    journal: PathBuf,

    /// Simulated players.
    #[arg(short, long, default_value_t = 16)]
    players: u64,

    /// Simulated days.
    #[arg(short, long, default_value_t = 7)]
    days: u32,

    /// Actions per player per day.
    #[arg(long, default_value_t = 40)]
    actions: u32,

    /// Seed for player behaviour and ledger randomness (optional).
    #[arg(long)]
    seed: Option<u64>,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,
}

/// Outcome counters shared by all player threads.
#[derive(Default)]
struct Tally {
    committed: AtomicU64,
    rejected: AtomicU64,
    retryable: AtomicU64,
    upgrades_won: AtomicU64,
}

impl Tally {
    /// Counts an action result; only unexpected errors are returned.
    fn record<T>(&self, result: Result<T, EconomyError>) -> Result<Option<T>> {
        match result {
            Ok(value) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(err) if err.is_retryable() => {
                self.retryable.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "request gave up");
                Ok(None)
            }
            Err(EconomyError::InsufficientResource { .. } | EconomyError::InvalidInput { .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

const TICKET_PACKAGES: [&str; 3] = ["small", "medium", "large"];
const CARD_PACKS: [&str; 3] = ["basic", "premium", "legendary"];

fn play_day(economy: &Economy, tally: &Tally, req: Request, actions: u32, rng: &mut ChaCha20Rng) -> Result<()> {
    for _ in 0..actions {
        match rng.gen_range(0..100u32) {
            0..=9 => {
                let amount = rng.gen_range(1..=20u64) * 500;
                tally.record(economy.deposit_tokens(req, amount))?;
            }
            10..=19 => {
                let package = TICKET_PACKAGES.choose(rng).copied().unwrap_or("small");
                tally.record(economy.buy_tickets(req, package))?;
            }
            20..=27 => {
                let pack = CARD_PACKS.choose(rng).copied().unwrap_or("basic");
                tally.record(economy.buy_pack(req, pack))?;
            }
            28..=44 => {
                let number = rng.gen_range(1..=8u8);
                tally.record(economy.mint_card(req, number))?;
            }
            45..=59 => {
                tally.record(economy.claim_all_gold(req))?;
            }
            60..=74 => {
                let cards = match economy.cards(req) {
                    Ok(cards) => cards,
                    Err(err) if err.is_retryable() => {
                        tally.retryable.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                if let Some(card) = cards.choose(rng) {
                    if let Some(outcome) = tally.record(economy.upgrade_card(req, card.id))? {
                        if outcome.success {
                            tally.upgrades_won.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            75..=89 => {
                tally.record(economy.record_battle(req, rng.gen_bool(0.5)))?;
            }
            90..=94 => {
                tally.record(economy.use_tickets(req, rng.gen_range(1..=5)))?;
            }
            _ => {
                if rng.gen_bool(0.1) {
                    tally.record(economy.purchase_vip(req, 1))?;
                } else {
                    tally.record(economy.withdraw_tokens(req, rng.gen_range(100..=1_000)))?;
                }
            }
        }
    }
    Ok(())
}

/// Registers a player and grants the starter bonus, tolerating a replayed journal.
fn onboard(economy: &Economy, req: Request) -> Result<()> {
    match economy.register(req) {
        Ok(_) | Err(EconomyError::InvalidInput { .. }) => {}
        Err(err) => return Err(err).context("registration failed"),
    }
    let account = economy.account(req)?.account;
    if !account.starter_bonus_claimed {
        economy.claim_starter_bonus(req).context("starter bonus failed")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.players == 0 {
        bail!("--players must be at least 1");
    }

    let mut config = match &args.config {
        Some(path) => EconomyConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EconomyConfig::default(),
    };
    if args.seed.is_some() {
        config.ledger.rng_seed = args.seed;
    }
    let seed = args.seed.unwrap_or_else(rand::random);

    if let Some(parent) = args.journal.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        JournalStore::open(&args.journal).with_context(|| format!("opening {}", args.journal.display()))?,
    );
    let start = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .context("invalid start date")?;
    let clock = Arc::new(ManualClock::new(start));
    let economy = Economy::builder(config)
        .store(Arc::clone(&store) as Arc<dyn Persistence>)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .rng(Arc::new(SeededRandom::from_seed(seed)))
        .open()?;
    if let Some(latest) = economy.replayed_until() {
        // Resume on the day after the last replayed activity.
        let resume = (latest + TimeDelta::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .context("invalid resume date")?
            .and_utc();
        if resume > start {
            tracing::info!(%latest, %resume, "resuming clock after replayed journal");
            clock.set(resume);
        }
    }
    let timeout = Duration::from_millis(args.timeout_ms);

    tracing::info!(
        players = args.players,
        days = args.days,
        seed,
        journal = %store.path().display(),
        "simulation starting"
    );

    let players: Vec<AccountId> = (1..=args.players).collect();
    for &id in &players {
        onboard(&economy, economy.request(id).with_timeout(timeout))?;
    }

    let tally = Tally::default();
    let started = Instant::now();
    for day in 1..=args.days {
        thread::scope(|scope| -> Result<()> {
            let workers: Vec<_> = players
                .iter()
                .map(|&id| {
                    let economy = &economy;
                    let tally = &tally;
                    let req = economy.request(id).with_timeout(timeout);
                    let mut rng = ChaCha20Rng::seed_from_u64(seed ^ (id << 20) ^ u64::from(day));
                    scope.spawn(move || play_day(economy, tally, req, args.actions, &mut rng))
                })
                .collect();
            for worker in workers {
                match worker.join() {
                    Ok(result) => result?,
                    Err(_) => bail!("player thread panicked"),
                }
            }
            Ok(())
        })?;

        let supply = economy.supply()?;
        tracing::info!(
            day,
            total_minted = supply.total_minted,
            remaining = supply.remaining,
            committed = tally.committed.load(Ordering::Relaxed),
            "day complete"
        );

        clock.advance(TimeDelta::days(1));
        if day % 7 == 0 {
            economy.reset_period_points(Period::Weekly, timeout)?;
        }
        if day % 30 == 0 {
            economy.reset_period_points(Period::Monthly, timeout)?;
        }
    }

    let elapsed = started.elapsed();
    let supply = economy.supply()?;
    let committed = tally.committed.load(Ordering::Relaxed);
    tracing::info!(
        accounts = economy.accounts().len(),
        cards = economy.registry().len(),
        total_minted = supply.total_minted,
        cap = supply.cap,
        committed,
        rejected = tally.rejected.load(Ordering::Relaxed),
        retryable = tally.retryable.load(Ordering::Relaxed),
        upgrades_won = tally.upgrades_won.load(Ordering::Relaxed),
        journal_commits = store.commits(),
        elapsed_ms = elapsed.as_millis(),
        "simulation finished"
    );

    if supply.total_minted > supply.cap {
        bail!("supply cap exceeded: {} > {}", supply.total_minted, supply.cap);
    }
    let cards = economy.registry().len();
    if u64::try_from(cards).ok() != Some(supply.total_minted) {
        bail!("card count {cards} does not match minted supply {}", supply.total_minted);
    }
    Ok(())
}

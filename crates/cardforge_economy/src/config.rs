//! # Economy Configuration
//!
//! Every balance number of the economy lives here: the card stat table,
//! pack definitions, ticket packages, VIP percentages, upgrade curve and
//! point awards.
//!
//! The configuration is loaded **once** at startup (usually from
//! `data/economy.toml`), validated, wrapped in an `Arc` and handed to every
//! component. Nothing mutates it afterwards.
//!
//! All percentages are basis points (10000 = 100%).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EconomyError, EconomyResult};
use crate::model::{CardNumber, CardStats};

/// Basis points in 100%.
pub const BASIS_POINTS: u32 = 10_000;

/// Lowest valid card number.
pub const MIN_CARD_NUMBER: CardNumber = 1;

/// Highest valid card number.
pub const MAX_CARD_NUMBER: CardNumber = 8;

/// Global and daily mint limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyConfig {
    /// Hard ceiling on cards ever minted.
    pub total_supply: u64,
    /// Daily mint allowance for regular accounts.
    pub daily_mint_limit: u32,
    /// Daily mint allowance for VIP-active accounts.
    pub vip_daily_mint_limit: u32,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            total_supply: 1_000_000,
            daily_mint_limit: 500,
            vip_daily_mint_limit: 50,
        }
    }
}

impl SupplyConfig {
    /// Daily allowance for the given tier.
    #[inline]
    #[must_use]
    pub const fn daily_limit(&self, is_vip: bool) -> u32 {
        if is_vip {
            self.vip_daily_mint_limit
        } else {
            self.daily_mint_limit
        }
    }
}

/// One row of the card stat table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTemplate {
    /// Card number this row describes (1..=8).
    pub card_number: CardNumber,
    /// Base attack.
    pub atk: u32,
    /// Base defense.
    pub def: u32,
    /// Base hit points.
    pub hp: u32,
}

/// A pack that draws several cards from a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackDefinition {
    /// Cards drawn per pack.
    pub cards: u32,
    /// Card numbers the draws are taken from (with replacement).
    pub possible_cards: Vec<CardNumber>,
    /// Token price before VIP discount.
    #[serde(default)]
    pub price: u64,
    /// Whether the pack can be bought in the store.
    #[serde(default = "default_true")]
    pub purchasable: bool,
}

/// A bundle of tournament tickets sold for tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPackage {
    /// Tickets granted.
    pub quantity: u64,
    /// Token price before VIP discount.
    pub price: u64,
}

/// VIP subscription effects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VipConfig {
    /// Discount on token prices for VIP-active accounts.
    pub discount_bp: u32,
    /// Gold claim boost for VIP-active accounts.
    pub gold_boost_bp: u32,
    /// Token price of one month of VIP.
    pub monthly_price: u64,
}

impl Default for VipConfig {
    fn default() -> Self {
        Self {
            discount_bp: 2_000,
            gold_boost_bp: 2_000,
            monthly_price: 5_000,
        }
    }
}

/// The upgrade curve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Gold cost of the first attempt (level 0).
    pub base_cost: u64,
    /// Cost growth per level, compounding.
    pub growth_bp: u32,
    /// Success probability of one attempt.
    pub success_chance_bp: u32,
    /// Stat gain per level as a share of the base stat.
    pub stat_growth_bp: u32,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            base_cost: 100,
            growth_bp: 2_000,
            success_chance_bp: 3_000,
            stat_growth_bp: 1_000,
        }
    }
}

/// Leaderboard point awards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Points for any upgrade attempt.
    pub upgrade_attempt: u64,
    /// Extra points for a successful upgrade.
    pub upgrade_success: u64,
    /// Points for a battle win.
    pub battle_win: u64,
    /// Points for a battle loss.
    pub battle_loss: u64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            upgrade_attempt: 1,
            upgrade_success: 5,
            battle_win: 10,
            battle_loss: 2,
        }
    }
}

/// One-time registration bonus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarterConfig {
    /// Pack key the free cards are drawn from.
    pub pack: String,
    /// Free tournament tickets.
    pub tickets: u64,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            pack: "starter".to_string(),
            tickets: 20,
        }
    }
}

/// Ledger mechanics: retries, timeouts, randomness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Commit attempts before a retryable failure is surfaced.
    pub commit_attempts: u32,
    /// Timeout applied to requests that do not carry their own.
    pub default_timeout_ms: u64,
    /// Fixed RNG seed for reproducible runs; OS entropy when absent.
    pub rng_seed: Option<u64>,
    /// Smallest token withdrawal accepted.
    pub min_withdrawal: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commit_attempts: 3,
            default_timeout_ms: 2_000,
            rng_seed: None,
            min_withdrawal: 100,
        }
    }
}

impl LedgerConfig {
    /// The default request timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// The complete, immutable economy configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Supply limits.
    pub supply: SupplyConfig,
    /// Gold produced per day per point of attack.
    pub gold_multiplier: u64,
    /// Card stat table, one row per card number.
    pub cards: Vec<CardTemplate>,
    /// Pack definitions by key.
    pub packs: BTreeMap<String, PackDefinition>,
    /// Ticket packages by key.
    pub ticket_packages: BTreeMap<String, TicketPackage>,
    /// VIP effects.
    pub vip: VipConfig,
    /// Upgrade curve.
    pub upgrade: UpgradeConfig,
    /// Point awards.
    pub points: PointsConfig,
    /// Registration bonus.
    pub starter: StarterConfig,
    /// Ledger mechanics.
    pub ledger: LedgerConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let cards = [
            (1, 5, 5, 50),
            (2, 7, 4, 60),
            (3, 9, 6, 70),
            (4, 11, 8, 80),
            (5, 14, 10, 100),
            (6, 17, 12, 120),
            (7, 21, 15, 150),
            (8, 25, 20, 200),
        ]
        .into_iter()
        .map(|(card_number, atk, def, hp)| CardTemplate {
            card_number,
            atk,
            def,
            hp,
        })
        .collect();

        let mut packs = BTreeMap::new();
        packs.insert("starter".to_string(), pack(5, &[1, 2, 3], 0, false));
        packs.insert("basic".to_string(), pack(5, &[1, 2, 3, 4], 1_000, true));
        packs.insert("premium".to_string(), pack(5, &[3, 4, 5, 6], 2_500, true));
        packs.insert("legendary".to_string(), pack(3, &[6, 7, 8], 6_000, true));

        let mut ticket_packages = BTreeMap::new();
        ticket_packages.insert("small".to_string(), TicketPackage { quantity: 10, price: 1_000 });
        ticket_packages.insert("medium".to_string(), TicketPackage { quantity: 30, price: 2_700 });
        ticket_packages.insert("large".to_string(), TicketPackage { quantity: 50, price: 4_000 });

        Self {
            supply: SupplyConfig::default(),
            gold_multiplier: 10,
            cards,
            packs,
            ticket_packages,
            vip: VipConfig::default(),
            upgrade: UpgradeConfig::default(),
            points: PointsConfig::default(),
            starter: StarterConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

fn pack(cards: u32, possible: &[CardNumber], price: u64, purchasable: bool) -> PackDefinition {
    PackDefinition {
        cards,
        possible_cards: possible.to_vec(),
        price,
        purchasable,
    }
}

const fn default_true() -> bool {
    true
}

impl EconomyConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// Missing sections fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` on parse or validation failure.
    pub fn from_toml_str(source: &str) -> EconomyResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| EconomyError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            EconomyError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the internal consistency of the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> EconomyResult<()> {
        for number in MIN_CARD_NUMBER..=MAX_CARD_NUMBER {
            let rows = self.cards.iter().filter(|c| c.card_number == number).count();
            if rows != 1 {
                return Err(EconomyError::InvalidConfig(format!(
                    "card {number} must appear exactly once in the stat table, found {rows}"
                )));
            }
        }
        if self.cards.len() != usize::from(MAX_CARD_NUMBER) {
            return Err(EconomyError::InvalidConfig(format!(
                "stat table has {} rows, expected {MAX_CARD_NUMBER}",
                self.cards.len()
            )));
        }

        for (key, pack) in &self.packs {
            if pack.cards == 0 {
                return Err(EconomyError::InvalidConfig(format!("pack {key} draws no cards")));
            }
            if pack.possible_cards.is_empty() {
                return Err(EconomyError::InvalidConfig(format!("pack {key} has an empty pool")));
            }
            if let Some(bad) = pack
                .possible_cards
                .iter()
                .find(|n| !(MIN_CARD_NUMBER..=MAX_CARD_NUMBER).contains(*n))
            {
                return Err(EconomyError::InvalidConfig(format!(
                    "pack {key} references card number {bad}"
                )));
            }
        }

        for (key, package) in &self.ticket_packages {
            if package.quantity == 0 {
                return Err(EconomyError::InvalidConfig(format!(
                    "ticket package {key} grants no tickets"
                )));
            }
        }

        if !self.packs.contains_key(&self.starter.pack) {
            return Err(EconomyError::InvalidConfig(format!(
                "starter pack {} is not defined",
                self.starter.pack
            )));
        }
        if self.vip.discount_bp > BASIS_POINTS {
            return Err(EconomyError::InvalidConfig("VIP discount above 100%".to_string()));
        }
        if self.upgrade.success_chance_bp > BASIS_POINTS {
            return Err(EconomyError::InvalidConfig(
                "upgrade success chance above 100%".to_string(),
            ));
        }
        if self.ledger.commit_attempts == 0 {
            return Err(EconomyError::InvalidConfig(
                "commit_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base stats for a card number.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidInput` for card numbers outside 1..=8.
    pub fn base_stats(&self, card_number: CardNumber) -> EconomyResult<CardStats> {
        if !(MIN_CARD_NUMBER..=MAX_CARD_NUMBER).contains(&card_number) {
            return Err(EconomyError::invalid(
                "card_number",
                format!("{card_number} is outside {MIN_CARD_NUMBER}..={MAX_CARD_NUMBER}"),
            ));
        }
        self.cards
            .iter()
            .find(|c| c.card_number == card_number)
            .map(|c| CardStats {
                atk: c.atk,
                def: c.def,
                hp: c.hp,
            })
            .ok_or_else(|| EconomyError::invalid("card_number", format!("{card_number} has no stats")))
    }

    /// Looks up a pack definition.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidInput` for unknown keys.
    pub fn pack(&self, key: &str) -> EconomyResult<&PackDefinition> {
        self.packs
            .get(key)
            .ok_or_else(|| EconomyError::invalid("pack", format!("unknown pack {key:?}")))
    }

    /// Looks up a ticket package.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidInput` for unknown keys.
    pub fn ticket_package(&self, key: &str) -> EconomyResult<&TicketPackage> {
        self.ticket_packages
            .get(key)
            .ok_or_else(|| EconomyError::invalid("package", format!("unknown ticket package {key:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EconomyConfig::default().validate().unwrap();
    }

    #[test]
    fn test_base_stats_lookup() {
        let config = EconomyConfig::default();
        let stats = config.base_stats(2).unwrap();
        assert_eq!(stats.atk, 7);
        assert!(matches!(
            config.base_stats(0),
            Err(EconomyError::InvalidInput { field: "card_number", .. })
        ));
        assert!(config.base_stats(9).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EconomyConfig::from_toml_str(
            r"
            gold_multiplier = 12

            [supply]
            total_supply = 10

            [ticket_packages.huge]
            quantity = 200
            price = 15000
            ",
        )
        .unwrap();

        assert_eq!(config.gold_multiplier, 12);
        assert_eq!(config.supply.total_supply, 10);
        assert_eq!(config.supply.daily_mint_limit, 500);
        assert_eq!(config.ticket_package("huge").unwrap().quantity, 200);
        assert_eq!(config.cards.len(), 8);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = EconomyConfig::from_toml_str(include_str!("../../../data/economy.toml")).unwrap();
        assert_eq!(shipped, EconomyConfig::default());
    }

    #[test]
    fn test_rejects_pack_with_bad_card_number() {
        let result = EconomyConfig::from_toml_str(
            r"
            [packs.broken]
            cards = 3
            possible_cards = [1, 9]
            ",
        );
        assert!(matches!(result, Err(EconomyError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_package_is_invalid_input() {
        let config = EconomyConfig::default();
        assert!(matches!(
            config.ticket_package("mega"),
            Err(EconomyError::InvalidInput { field: "package", .. })
        ));
    }
}

//! # Pricing Engine
//!
//! VIP discounts, sequential boosts and the escalating upgrade cost.
//!
//! ## Rounding
//!
//! Floor is the only rounding rule. Percentages are basis points
//! (10000 = 100%), so every step is integer math:
//!
//! ```text
//! price  = floor(base × (10000 − discount_bp) / 10000)
//! boost  = fold over boosts: floor(x × (10000 + bp) / 10000)
//! cost_L = floor(base_cost × (1 + growth)^L)      (decimal fixed point)
//! ```
//!
//! Boosts floor after every step, so at most one unit is lost per step.
//! The upgrade power starts with 18 fractional digits and sheds one whenever
//! the next multiplication would overflow `u128`, so it only saturates once
//! the cost itself no longer fits in `u64`.

use std::sync::Arc;

use crate::config::BASIS_POINTS;
use crate::error::{EconomyError, EconomyResult};
use crate::model::Account;
use crate::txn::Context;

/// Initial fractional digits of the upgrade growth accumulator.
const FIXED_DIGITS: u32 = 18;

/// Applies a discount in basis points, rounding down.
#[inline]
#[must_use]
pub fn discounted(base: u64, discount_bp: u32) -> u64 {
    let keep = u128::from(BASIS_POINTS.saturating_sub(discount_bp));
    // keep ≤ 10000, so the result never exceeds `base`.
    u64::try_from(u128::from(base) * keep / u128::from(BASIS_POINTS)).unwrap_or(base)
}

/// Applies multiplicative boosts in order, flooring after each one.
///
/// # Errors
///
/// Returns `EconomyError::ArithmeticOverflow` if an intermediate amount
/// leaves the `u64` range.
pub fn boosted(base: u64, boosts_bp: &[u32]) -> EconomyResult<u64> {
    boosts_bp.iter().try_fold(base, |amount, &bp| {
        let factor = u128::from(BASIS_POINTS) + u128::from(bp);
        u64::try_from(u128::from(amount) * factor / u128::from(BASIS_POINTS))
            .map_err(|_| EconomyError::ArithmeticOverflow)
    })
}

/// `floor(base_cost × (1 + growth_bp/10000)^level)`, saturating at `u64::MAX`.
#[must_use]
pub fn escalated_cost(base_cost: u64, growth_bp: u32, level: u32) -> u64 {
    if growth_bp == 0 {
        return base_cost;
    }
    let factor = u128::from(BASIS_POINTS) + u128::from(growth_bp);
    let mut digits = FIXED_DIGITS;
    let mut acc = u128::from(base_cost) * 10u128.pow(digits);
    for _ in 0..level {
        let scaled = loop {
            if let Some(scaled) = acc.checked_mul(factor) {
                break scaled;
            }
            if digits == 0 {
                return u64::MAX;
            }
            acc /= 10;
            digits -= 1;
        };
        acc = scaled / u128::from(BASIS_POINTS);
        if acc / 10u128.pow(digits) > u128::from(u64::MAX) {
            return u64::MAX;
        }
    }
    u64::try_from(acc / 10u128.pow(digits)).unwrap_or(u64::MAX)
}

/// Effective prices and boosts for an account.
pub struct PricingEngine {
    ctx: Arc<Context>,
}

impl PricingEngine {
    pub(crate) const fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Whether VIP effects apply to the account right now.
    #[must_use]
    pub fn is_vip_active(&self, account: &Account) -> bool {
        account.is_vip_active(self.ctx.clock.now())
    }

    /// `base` for regular accounts, VIP-discounted for VIP-active ones.
    #[must_use]
    pub fn price(&self, base: u64, account: &Account) -> u64 {
        if self.is_vip_active(account) {
            discounted(base, self.ctx.config.vip.discount_bp)
        } else {
            base
        }
    }

    /// Applies `boosts_bp` sequentially to `base`.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` on overflow.
    pub fn boost(&self, base: u64, boosts_bp: &[u32]) -> EconomyResult<u64> {
        boosted(base, boosts_bp)
    }

    /// The gold boosts the account is entitled to, in application order.
    #[must_use]
    pub fn gold_boosts(&self, account: &Account) -> Vec<u32> {
        if self.is_vip_active(account) {
            vec![self.ctx.config.vip.gold_boost_bp]
        } else {
            Vec::new()
        }
    }

    /// Undiscounted cost of upgrading a card at `level`.
    #[must_use]
    pub fn upgrade_cost(&self, level: u32) -> u64 {
        let upgrade = &self.ctx.config.upgrade;
        escalated_cost(upgrade.base_cost, upgrade.growth_bp, level)
    }

    /// Upgrade cost at `level` after the account's discount.
    #[must_use]
    pub fn upgrade_price(&self, level: u32, account: &Account) -> u64 {
        self.price(self.upgrade_cost(level), account)
    }
}

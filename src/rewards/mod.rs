pub mod distributor;
pub mod replenish;

use rust_decimal::{Decimal, RoundingStrategy};

pub use distributor::RewardDistributor;
pub use replenish::Replenisher;

/// Whole reward tokens earned for an order total, rounded down.
/// `None` when the product does not fit in a `Decimal`.
pub fn reward_quantity(total_due: Decimal, rate: Decimal) -> Option<Decimal> {
    if total_due <= Decimal::ZERO || rate <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    total_due
        .checked_mul(rate)
        .map(|q| q.round_dp_with_strategy(0, RoundingStrategy::ToZero))
}

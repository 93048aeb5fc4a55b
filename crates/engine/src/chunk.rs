//! Trade-size chunking.
//!
//! A rebalance's total notional rarely fits one call: each exchange caps
//! the notional per step, and the lending market bounds how far a single
//! lever/delever leg may go. The allocator reduces a total to the bounded
//! chunk for this call and reports whether the step completes the
//! rebalance or leaves a TWAP remainder.

use rust_decimal::Decimal;

/// One call's slice of a rebalance, in whole collateral tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Notional to trade in this call.
    pub chunk: Decimal,
    /// Full notional the rebalance still requires.
    pub total: Decimal,
}

impl ChunkPlan {
    /// Bounds `total` by the exchange cap and any number of additional
    /// hard bounds (lending-market headroom, outstanding debt).
    #[must_use]
    pub fn bounded(total: Decimal, cap: Decimal, extra_bounds: &[Decimal]) -> Self {
        let mut chunk = total.min(cap);
        for bound in extra_bounds {
            chunk = chunk.min(*bound);
        }
        Self { chunk, total }
    }

    /// Whether this step finishes the rebalance. A capped chunk leaves a
    /// remainder that the TWAP loop must keep working down.
    #[must_use]
    pub fn completes_rebalance(&self) -> bool {
        self.chunk >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn uncapped_total_completes_in_one_call() {
        let plan = ChunkPlan::bounded(dec!(8), dec!(100), &[]);
        assert_eq!(plan.chunk, dec!(8));
        assert!(plan.completes_rebalance());
    }

    #[test]
    fn cap_binds_and_leaves_remainder() {
        let plan = ChunkPlan::bounded(dec!(80), dec!(25), &[]);
        assert_eq!(plan.chunk, dec!(25));
        assert!(!plan.completes_rebalance());
    }

    #[test]
    fn tightest_extra_bound_wins() {
        let plan = ChunkPlan::bounded(dec!(80), dec!(25), &[dec!(10), dec!(40)]);
        assert_eq!(plan.chunk, dec!(10));
        assert!(!plan.completes_rebalance());
    }

    #[test]
    fn zero_total_is_trivially_complete() {
        let plan = ChunkPlan::bounded(Decimal::ZERO, dec!(25), &[]);
        assert_eq!(plan.chunk, Decimal::ZERO);
        assert!(plan.completes_rebalance());
    }
}

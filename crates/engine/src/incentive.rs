//! Ripcord reward funding.
//!
//! The vault holds the engine's ether balance. Anyone may top it up; the
//! ripcord path pays callers out of it, bounded by what is actually there,
//! and the operator can drain it when no rebalance is in flight.

use rust_decimal::Decimal;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardVault {
    balance: Decimal,
}

impl RewardVault {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Accepts a top-up from any source. Non-positive deposits are
    /// ignored rather than rejected; there is nothing to roll back.
    pub fn deposit(&mut self, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.balance += amount;
        }
    }

    /// Pays out up to `reward`, bounded by the balance. Returns what was
    /// actually paid; an empty vault pays zero without failing.
    pub fn pay(&mut self, reward: Decimal) -> Decimal {
        let paid = reward.min(self.balance).max(Decimal::ZERO);
        self.balance -= paid;
        paid
    }

    /// Empties the vault, returning the drained amount.
    pub fn drain(&mut self) -> Decimal {
        std::mem::take(&mut self.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pay_is_bounded_by_balance() {
        let mut vault = RewardVault::new();
        vault.deposit(dec!(0.4));
        assert_eq!(vault.pay(dec!(1)), dec!(0.4));
        assert_eq!(vault.balance(), Decimal::ZERO);
    }

    #[test]
    fn pay_full_reward_when_funded() {
        let mut vault = RewardVault::new();
        vault.deposit(dec!(5));
        assert_eq!(vault.pay(dec!(1)), dec!(1));
        assert_eq!(vault.balance(), dec!(4));
    }

    #[test]
    fn empty_vault_pays_zero() {
        let mut vault = RewardVault::new();
        assert_eq!(vault.pay(dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn non_positive_deposits_ignored() {
        let mut vault = RewardVault::new();
        vault.deposit(dec!(-3));
        vault.deposit(Decimal::ZERO);
        assert_eq!(vault.balance(), Decimal::ZERO);
    }

    #[test]
    fn drain_empties_vault() {
        let mut vault = RewardVault::new();
        vault.deposit(dec!(2.5));
        assert_eq!(vault.drain(), dec!(2.5));
        assert_eq!(vault.balance(), Decimal::ZERO);
    }
}

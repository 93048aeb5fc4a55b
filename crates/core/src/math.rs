//! Leverage-ratio arithmetic.
//!
//! Pure functions over `Decimal`, overflow-checked throughout. Balances
//! arrive as raw base units and are reconciled to whole-token decimals via
//! each asset's native precision before any value math happens.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::MathError;
use crate::types::Asset;

/// Highest decimal precision representable by the fixed-point type.
const MAX_ASSET_DECIMALS: u32 = 28;

/// Converts a raw base-unit balance into whole tokens.
pub fn units_to_decimal(amount: u128, asset: &Asset) -> Result<Decimal, MathError> {
    if asset.decimals > MAX_ASSET_DECIMALS {
        return Err(MathError::Overflow);
    }
    let mantissa = i128::try_from(amount).map_err(|_| MathError::Overflow)?;
    Decimal::try_from_i128_with_scale(mantissa, asset.decimals).map_err(|_| MathError::Overflow)
}

/// Converts a whole-token amount into raw base units, truncating dust
/// below one base unit.
pub fn decimal_to_units(amount: Decimal, asset: &Asset) -> Result<u128, MathError> {
    if amount.is_sign_negative() {
        return Err(MathError::AmountOutOfRange(amount));
    }
    if asset.decimals > MAX_ASSET_DECIMALS {
        return Err(MathError::Overflow);
    }
    let factor = Decimal::from_i128_with_scale(10i128.pow(asset.decimals), 0);
    let scaled = amount.checked_mul(factor).ok_or(MathError::Overflow)?;
    scaled
        .trunc()
        .to_u128()
        .ok_or(MathError::AmountOutOfRange(amount))
}

/// Prices a whole-token balance in the common quote currency.
pub fn value_of(balance: Decimal, price: Decimal) -> Result<Decimal, MathError> {
    balance.checked_mul(price).ok_or(MathError::Overflow)
}

/// Re-denominates an amount from one asset into another through their
/// oracle prices.
pub fn convert_amount(
    amount: Decimal,
    from_price: Decimal,
    to_price: Decimal,
) -> Result<Decimal, MathError> {
    if to_price.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    amount
        .checked_mul(from_price)
        .ok_or(MathError::Overflow)?
        .checked_div(to_price)
        .ok_or(MathError::Overflow)
}

/// Least acceptable proceeds for a trade of `amount`, after shaving the
/// slippage tolerance off.
pub fn slippage_floor(amount: Decimal, slippage_tolerance: Decimal) -> Result<Decimal, MathError> {
    let keep = Decimal::ONE
        .checked_sub(slippage_tolerance)
        .ok_or(MathError::Overflow)?;
    amount.checked_mul(keep).ok_or(MathError::Overflow)
}

/// Current leverage ratio: `collateral / (collateral - borrow)`.
///
/// Errors with [`MathError::NonPositiveEquity`] when the borrow value has
/// caught up with the collateral value. That is a fatal precondition
/// violation for every engine operation, never retried.
pub fn leverage_ratio(
    collateral_value: Decimal,
    borrow_value: Decimal,
) -> Result<Decimal, MathError> {
    if collateral_value <= borrow_value {
        return Err(MathError::NonPositiveEquity {
            collateral: collateral_value,
            borrow: borrow_value,
        });
    }
    let equity = collateral_value - borrow_value;
    collateral_value
        .checked_div(equity)
        .ok_or(MathError::Overflow)
}

/// Moves `current` toward `target` by the `recentering_speed` fraction of
/// the gap, clamped into `[min, max]`.
///
/// This is the damped per-call policy: a price shock is absorbed over
/// several rebalances rather than snapped back in one trade.
pub fn recentered_leverage_ratio(
    current: Decimal,
    target: Decimal,
    min: Decimal,
    max: Decimal,
    recentering_speed: Decimal,
) -> Result<Decimal, MathError> {
    let gap = target.checked_sub(current).ok_or(MathError::Overflow)?;
    let step = recentering_speed
        .checked_mul(gap)
        .ok_or(MathError::Overflow)?;
    let moved = current.checked_add(step).ok_or(MathError::Overflow)?;
    Ok(moved.clamp(min, max))
}

/// Total collateral notional that must trade to move the position from
/// `current` to `new` leverage: `|new - current| / current * collateral`.
pub fn total_rebalance_notional(
    current: Decimal,
    new: Decimal,
    collateral_balance: Decimal,
) -> Result<Decimal, MathError> {
    if current.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let delta = new.checked_sub(current).ok_or(MathError::Overflow)?.abs();
    delta
        .checked_div(current)
        .ok_or(MathError::Overflow)?
        .checked_mul(collateral_balance)
        .ok_or(MathError::Overflow)
}

/// A rebalance trade size expressed both as an absolute collateral
/// notional and per leveraged-token share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceUnits {
    pub total_notional: Decimal,
    pub per_share: Decimal,
}

/// Converts a leverage-ratio delta into the collateral notional to trade,
/// plus the per-share position delta given the token supply.
pub fn collateral_rebalance_units(
    current: Decimal,
    new: Decimal,
    collateral_balance: Decimal,
    total_supply: Decimal,
) -> Result<RebalanceUnits, MathError> {
    if total_supply.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let total_notional = total_rebalance_notional(current, new, collateral_balance)?;
    let per_share = total_notional
        .checked_div(total_supply)
        .ok_or(MathError::Overflow)?;
    Ok(RebalanceUnits {
        total_notional,
        per_share,
    })
}

/// Upper bound, in collateral tokens, on a lever trade: how much more the
/// lending market allows borrowing against current collateral, after
/// holding back the unutilized-leverage safety margin.
pub fn max_borrow_for_lever(
    collateral_value: Decimal,
    borrow_value: Decimal,
    collateral_price: Decimal,
    max_ltv: Decimal,
    unutilized_leverage_pct: Decimal,
) -> Result<Decimal, MathError> {
    let usable = Decimal::ONE
        .checked_sub(unutilized_leverage_pct)
        .ok_or(MathError::Overflow)?;
    let net_borrow_limit = collateral_value
        .checked_mul(max_ltv)
        .ok_or(MathError::Overflow)?
        .checked_mul(usable)
        .ok_or(MathError::Overflow)?;
    if net_borrow_limit <= borrow_value {
        return Ok(Decimal::ZERO);
    }
    if collateral_price.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    net_borrow_limit
        .checked_sub(borrow_value)
        .ok_or(MathError::Overflow)?
        .checked_div(collateral_price)
        .ok_or(MathError::Overflow)
}

/// Upper bound, in collateral tokens, on a delever trade: the most
/// collateral that can be withdrawn without breaching the liquidation
/// threshold, after the unutilized-leverage safety margin.
pub fn max_delever_collateral(
    collateral_balance: Decimal,
    collateral_value: Decimal,
    borrow_value: Decimal,
    liquidation_threshold: Decimal,
    unutilized_leverage_pct: Decimal,
) -> Result<Decimal, MathError> {
    let usable = Decimal::ONE
        .checked_sub(unutilized_leverage_pct)
        .ok_or(MathError::Overflow)?;
    let net_repay_limit = collateral_value
        .checked_mul(liquidation_threshold)
        .ok_or(MathError::Overflow)?
        .checked_mul(usable)
        .ok_or(MathError::Overflow)?;
    if net_repay_limit <= borrow_value {
        return Ok(Decimal::ZERO);
    }
    collateral_balance
        .checked_mul(
            net_repay_limit
                .checked_sub(borrow_value)
                .ok_or(MathError::Overflow)?,
        )
        .ok_or(MathError::Overflow)?
        .checked_div(net_repay_limit)
        .ok_or(MathError::Overflow)
}

/// Collateral notional required to repay the entire debt balance during a
/// full unwind, padded by the slippage allowance.
pub fn delever_to_zero_notional(
    borrow_value: Decimal,
    collateral_price: Decimal,
    slippage_tolerance: Decimal,
) -> Result<Decimal, MathError> {
    if collateral_price.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let padded = borrow_value
        .checked_mul(
            Decimal::ONE
                .checked_add(slippage_tolerance)
                .ok_or(MathError::Overflow)?,
        )
        .ok_or(MathError::Overflow)?;
    padded
        .checked_div(collateral_price)
        .ok_or(MathError::Overflow)
}

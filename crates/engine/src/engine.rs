//! The rebalance state machine.
//!
//! One engine instance owns the settings, the exchange registry, the
//! reward vault, and the two pieces of engine state that drive the
//! protocol: the global last-trade timestamp and the in-flight TWAP
//! target. `twap_leverage_ratio` is the single source of truth for which
//! state the machine is in: `None` is Idle, `Some(ratio)` is
//! TWAP-in-progress.
//!
//! Every operation is an atomic unit of work: all position and price
//! reads happen up front, every precondition is checked before the first
//! collaborator action, and engine state is only mutated after the trade
//! legs succeed. Any error aborts the call with the engine unchanged.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use flexlev_core::math;
use flexlev_core::settings::validate_cross_settings;
use flexlev_core::traits::{Clock, LendingMarket, PositionAccounting, PriceOracle, TradeAdapter};
use flexlev_core::types::{
    CallerId, ChunkRebalanceQuote, PositionSnapshot, RebalanceAction, TradeDirection,
};
use flexlev_core::{
    ExchangeSettings, ExecutionSettings, IncentiveSettings, MethodologySettings, StrategySettings,
};

use crate::chunk::ChunkPlan;
use crate::error::EngineError;
use crate::governance::{Authority, GovernanceAction, MutualConfirmation, Principal};
use crate::incentive::RewardVault;
use crate::registry::ExchangeRegistry;

/// How long a pending governance confirmation stays actionable.
const GOVERNANCE_CONFIRMATION_EXPIRY_HOURS: i64 = 72;

/// The engine's external collaborators, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub lending: Arc<dyn LendingMarket>,
    pub oracle: Arc<dyn PriceOracle>,
    pub trader: Arc<dyn TradeAdapter>,
    pub accounting: Arc<dyn PositionAccounting>,
    pub clock: Arc<dyn Clock>,
}

pub struct LeverageEngine {
    strategy: StrategySettings,
    methodology: MethodologySettings,
    execution: ExecutionSettings,
    incentive: IncentiveSettings,
    registry: ExchangeRegistry,
    authority: Authority,
    confirmations: MutualConfirmation,
    vault: RewardVault,
    collaborators: Collaborators,

    twap_leverage_ratio: Option<Decimal>,
    global_last_trade_timestamp: Option<DateTime<Utc>>,
    override_no_rebalance_in_progress: bool,
}

impl LeverageEngine {
    /// Builds an engine after validating every settings invariant.
    pub fn new(
        strategy: StrategySettings,
        methodology: MethodologySettings,
        execution: ExecutionSettings,
        incentive: IncentiveSettings,
        operator: CallerId,
        methodologist: CallerId,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        validate_cross_settings(&methodology, &execution, &incentive)?;
        Ok(Self {
            strategy,
            methodology,
            execution,
            incentive,
            registry: ExchangeRegistry::new(),
            authority: Authority::new(operator, methodologist),
            confirmations: MutualConfirmation::new(Duration::hours(
                GOVERNANCE_CONFIRMATION_EXPIRY_HOURS,
            )),
            vault: RewardVault::new(),
            collaborators,
            twap_leverage_ratio: None,
            global_last_trade_timestamp: None,
            override_no_rebalance_in_progress: false,
        })
    }

    // ------------------------------------------------------------------
    // State-changing operations
    // ------------------------------------------------------------------

    /// Opens the leveraged position from a clean slate: zero debt, some
    /// collateral, live token supply. Trades from 1.0x toward the target
    /// ratio, entering TWAP state when the exchange cap binds.
    pub async fn engage(&mut self, caller: &CallerId, exchange_name: &str) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        let settings = self.exchange(exchange_name)?.clone();
        let snapshot = self.snapshot().await?;

        if snapshot.borrow_balance_raw != 0 {
            return Err(EngineError::DebtMustBeZero);
        }
        if snapshot.collateral_balance_raw == 0 {
            return Err(EngineError::ZeroCollateral);
        }
        if snapshot.total_supply <= Decimal::ZERO {
            return Err(EngineError::ZeroSupply);
        }

        let target = self.methodology.target_leverage_ratio;
        let units = math::collateral_rebalance_units(
            Decimal::ONE,
            target,
            snapshot.collateral_balance,
            snapshot.total_supply,
        )?;
        let plan = self
            .rebalance_toward(
                exchange_name,
                &settings,
                &snapshot,
                Decimal::ONE,
                target,
                self.execution.slippage_tolerance,
                settings.twap_max_trade_size,
            )
            .await?;

        self.twap_leverage_ratio = (!plan.completes_rebalance()).then_some(target);
        self.finalize_trade(exchange_name).await?;

        info!(
            exchange = exchange_name,
            chunk = %plan.chunk,
            total = %units.total_notional,
            per_share = %units.per_share,
            twap = self.twap_leverage_ratio.is_some(),
            "engaged leveraged position"
        );
        Ok(())
    }

    /// One normal rebalance step. Only valid from Idle, below the
    /// incentivized threshold, and either outside the leverage band or
    /// past the rebalance interval.
    pub async fn rebalance(
        &mut self,
        caller: &CallerId,
        exchange_name: &str,
    ) -> Result<(), EngineError> {
        self.authority.ensure_allowed_caller(caller)?;
        if self.twap_leverage_ratio.is_some() {
            return Err(EngineError::TwapInProgress);
        }
        let settings = self.exchange(exchange_name)?.clone();
        let snapshot = self.snapshot().await?;
        let current = math::leverage_ratio(snapshot.collateral_value, snapshot.borrow_value)?;

        if current >= self.incentive.incentivized_leverage_ratio {
            return Err(EngineError::AboveIncentivizedRatio);
        }
        let now = self.collaborators.clock.now();
        let outside_bounds = current < self.methodology.min_leverage_ratio
            || current > self.methodology.max_leverage_ratio;
        if !outside_bounds && !self.rebalance_interval_elapsed(now) {
            return Err(EngineError::RebalanceNotDue);
        }

        let new_ratio = self.recentered(current)?;
        let plan = self
            .rebalance_toward(
                exchange_name,
                &settings,
                &snapshot,
                current,
                new_ratio,
                self.execution.slippage_tolerance,
                settings.twap_max_trade_size,
            )
            .await?;

        self.twap_leverage_ratio = (!plan.completes_rebalance()).then_some(new_ratio);
        self.finalize_trade(exchange_name).await?;

        info!(
            exchange = exchange_name,
            current = %current,
            new = %new_ratio,
            chunk = %plan.chunk,
            total = %plan.total,
            twap = self.twap_leverage_ratio.is_some(),
            "rebalanced"
        );
        Ok(())
    }

    /// Continues an in-flight TWAP once the exchange's cooldown elapses.
    /// If price drift already carried the position past the stored target,
    /// the TWAP is cleared without trading.
    pub async fn iterate_rebalance(
        &mut self,
        caller: &CallerId,
        exchange_name: &str,
    ) -> Result<(), EngineError> {
        self.authority.ensure_allowed_caller(caller)?;
        let stored = self.twap_leverage_ratio.ok_or(EngineError::NotInTwap)?;
        let settings = self.exchange(exchange_name)?.clone();
        let now = self.collaborators.clock.now();
        if !cooldown_elapsed(&settings, self.execution.twap_cooldown(), now) {
            return Err(EngineError::CooldownNotElapsed {
                exchange: exchange_name.to_string(),
            });
        }
        let snapshot = self.snapshot().await?;
        let current = math::leverage_ratio(snapshot.collateral_value, snapshot.borrow_value)?;
        if current >= self.incentive.incentivized_leverage_ratio {
            return Err(EngineError::AboveIncentivizedRatio);
        }

        if is_advantageous_twap(current, stored, self.methodology.target_leverage_ratio) {
            self.twap_leverage_ratio = None;
            self.stamp_trade_clocks(exchange_name)?;
            info!(
                exchange = exchange_name,
                current = %current,
                stored = %stored,
                "price drift completed the TWAP; cleared without trading"
            );
            return Ok(());
        }

        let plan = self
            .rebalance_toward(
                exchange_name,
                &settings,
                &snapshot,
                current,
                stored,
                self.execution.slippage_tolerance,
                settings.twap_max_trade_size,
            )
            .await?;

        if plan.completes_rebalance() {
            self.twap_leverage_ratio = None;
        }
        self.finalize_trade(exchange_name).await?;

        info!(
            exchange = exchange_name,
            current = %current,
            stored = %stored,
            chunk = %plan.chunk,
            total = %plan.total,
            twap = self.twap_leverage_ratio.is_some(),
            "iterated TWAP rebalance"
        );
        Ok(())
    }

    /// Emergency delever. Callable by anyone once the position is at or
    /// above the incentivized threshold and the shortened cooldown has
    /// elapsed; pays the caller out of the reward vault. Returns the
    /// ether actually paid.
    pub async fn ripcord(
        &mut self,
        caller: &CallerId,
        exchange_name: &str,
    ) -> Result<Decimal, EngineError> {
        let settings = self.exchange(exchange_name)?.clone();
        let now = self.collaborators.clock.now();
        if !cooldown_elapsed(&settings, self.incentive.incentivized_twap_cooldown(), now) {
            return Err(EngineError::CooldownNotElapsed {
                exchange: exchange_name.to_string(),
            });
        }
        let snapshot = self.snapshot().await?;
        let current = math::leverage_ratio(snapshot.collateral_value, snapshot.borrow_value)?;
        if current < self.incentive.incentivized_leverage_ratio {
            return Err(EngineError::BelowIncentivizedRatio);
        }
        if snapshot.borrow_balance_raw == 0 {
            return Err(EngineError::BorrowBalanceMustExist);
        }

        // Emergency path delevers straight toward the max ratio, bounded
        // by the incentivized cap and the lending market's headroom.
        let plan = self
            .rebalance_toward(
                exchange_name,
                &settings,
                &snapshot,
                current,
                self.methodology.max_leverage_ratio,
                self.incentive.incentivized_slippage_tolerance,
                settings.incentivized_twap_max_trade_size,
            )
            .await?;

        self.twap_leverage_ratio = None;
        self.finalize_trade(exchange_name).await?;
        let paid = self.vault.pay(self.incentive.ether_reward);

        warn!(
            caller = %caller,
            exchange = exchange_name,
            ratio = %current,
            chunk = %plan.chunk,
            paid = %paid,
            "ripcord pulled"
        );
        Ok(paid)
    }

    /// Operator-driven full unwind toward 1.0x (zero debt), chunked by the
    /// normal trade cap. Never enters TWAP state; repeated calls walk the
    /// debt down to zero.
    pub async fn disengage(
        &mut self,
        caller: &CallerId,
        exchange_name: &str,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        let settings = self.exchange(exchange_name)?.clone();
        let snapshot = self.snapshot().await?;
        if snapshot.collateral_balance_raw == 0 {
            return Err(EngineError::ZeroCollateral);
        }
        if snapshot.borrow_balance_raw == 0 {
            return Err(EngineError::BorrowBalanceMustExist);
        }

        let full_unwind = math::delever_to_zero_notional(
            snapshot.borrow_value,
            snapshot.collateral_price,
            self.execution.slippage_tolerance,
        )?
        .min(snapshot.collateral_balance);
        let cap = math::units_to_decimal(settings.twap_max_trade_size, &self.strategy.collateral_asset)?;
        let plan = ChunkPlan::bounded(full_unwind, cap, &[]);

        self.execute_delever(
            exchange_name,
            &settings,
            plan.chunk,
            self.execution.slippage_tolerance,
            &snapshot,
        )
        .await?;

        // A manual wind-down overrides any in-flight TWAP.
        self.twap_leverage_ratio = None;
        self.finalize_trade(exchange_name).await?;

        info!(
            exchange = exchange_name,
            chunk = %plan.chunk,
            total = %plan.total,
            complete = plan.completes_rebalance(),
            "disengage step executed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-only surface
    // ------------------------------------------------------------------

    /// Leverage ratio of the position as priced right now.
    pub async fn current_leverage_ratio(&self) -> Result<Decimal, EngineError> {
        let snapshot = self.snapshot().await?;
        Ok(math::leverage_ratio(
            snapshot.collateral_value,
            snapshot.borrow_value,
        )?)
    }

    /// Per-exchange keeper advice using the methodology band.
    pub async fn should_rebalance(
        &self,
    ) -> Result<Vec<(String, RebalanceAction)>, EngineError> {
        self.should_rebalance_with_bounds(
            self.methodology.min_leverage_ratio,
            self.methodology.max_leverage_ratio,
        )
        .await
    }

    /// Per-exchange keeper advice with an override band. Overrides may
    /// only widen the methodology band — the advisory view must never
    /// promise a rebalance the engine itself would reject.
    pub async fn should_rebalance_with_bounds(
        &self,
        min_override: Decimal,
        max_override: Decimal,
    ) -> Result<Vec<(String, RebalanceAction)>, EngineError> {
        if min_override > self.methodology.min_leverage_ratio
            || max_override < self.methodology.max_leverage_ratio
            || min_override > max_override
        {
            return Err(EngineError::InvalidBoundsOverride);
        }
        let snapshot = self.snapshot().await?;
        let current = math::leverage_ratio(snapshot.collateral_value, snapshot.borrow_value)?;
        let now = self.collaborators.clock.now();

        let mut actions = Vec::with_capacity(self.registry.len());
        for (name, settings) in self.registry.iter() {
            let action = if current >= self.incentive.incentivized_leverage_ratio {
                if cooldown_elapsed(settings, self.incentive.incentivized_twap_cooldown(), now) {
                    RebalanceAction::Ripcord
                } else {
                    RebalanceAction::None
                }
            } else if self.twap_leverage_ratio.is_some() {
                if cooldown_elapsed(settings, self.execution.twap_cooldown(), now) {
                    RebalanceAction::Iterate
                } else {
                    RebalanceAction::None
                }
            } else if current < min_override
                || current > max_override
                || self.rebalance_interval_elapsed(now)
            {
                RebalanceAction::Rebalance
            } else {
                RebalanceAction::None
            };
            actions.push((name.to_string(), action));
        }
        Ok(actions)
    }

    /// The bounded notional each named exchange would trade right now,
    /// with the assets on each side. Pure query for off-chain automation.
    pub async fn chunk_rebalance_notional(
        &self,
        exchange_names: &[String],
    ) -> Result<Vec<ChunkRebalanceQuote>, EngineError> {
        let snapshot = self.snapshot().await?;
        let current = math::leverage_ratio(snapshot.collateral_value, snapshot.borrow_value)?;
        let ripcord_mode = current >= self.incentive.incentivized_leverage_ratio;

        let target = if ripcord_mode {
            self.methodology.max_leverage_ratio
        } else if let Some(stored) = self.twap_leverage_ratio {
            stored
        } else {
            self.recentered(current)?
        };
        let total = math::total_rebalance_notional(current, target, snapshot.collateral_balance)?;
        let (direction, lending_bound) = if target < current {
            (
                TradeDirection::Delever,
                self.max_delever_bound(&snapshot).await?,
            )
        } else {
            (
                TradeDirection::Lever,
                self.max_lever_bound(&snapshot).await?,
            )
        };

        let collateral = &self.strategy.collateral_asset;
        let borrow = &self.strategy.borrow_asset;
        let mut quotes = Vec::with_capacity(exchange_names.len());
        for name in exchange_names {
            let settings = self.exchange(name)?;
            let cap_raw = if ripcord_mode {
                settings.incentivized_twap_max_trade_size
            } else {
                settings.twap_max_trade_size
            };
            let cap = math::units_to_decimal(cap_raw, collateral)?;
            let plan = ChunkPlan::bounded(total, cap, &[lending_bound]);

            let (sell_asset, buy_asset, sell_amount) = match direction {
                TradeDirection::Delever => (
                    collateral.clone(),
                    borrow.clone(),
                    math::decimal_to_units(plan.chunk, collateral)?,
                ),
                TradeDirection::Lever => {
                    let borrow_amount = math::convert_amount(
                        plan.chunk,
                        snapshot.collateral_price,
                        snapshot.borrow_price,
                    )?;
                    (
                        borrow.clone(),
                        collateral.clone(),
                        math::decimal_to_units(borrow_amount, borrow)?,
                    )
                }
            };
            quotes.push(ChunkRebalanceQuote {
                exchange_name: name.clone(),
                direction,
                sell_asset,
                buy_asset,
                sell_amount,
            });
        }
        Ok(quotes)
    }

    /// What a ripcord caller would be paid right now.
    pub async fn current_ether_incentive(&self) -> Result<Decimal, EngineError> {
        let current = self.current_leverage_ratio().await?;
        if current >= self.incentive.incentivized_leverage_ratio {
            Ok(self.incentive.ether_reward.min(self.vault.balance()))
        } else {
            Ok(Decimal::ZERO)
        }
    }

    #[must_use]
    pub fn strategy_settings(&self) -> &StrategySettings {
        &self.strategy
    }

    #[must_use]
    pub fn methodology_settings(&self) -> &MethodologySettings {
        &self.methodology
    }

    #[must_use]
    pub fn execution_settings(&self) -> &ExecutionSettings {
        &self.execution
    }

    #[must_use]
    pub fn incentive_settings(&self) -> &IncentiveSettings {
        &self.incentive
    }

    /// Enabled exchange names in the order they were enabled.
    #[must_use]
    pub fn enabled_exchanges(&self) -> Vec<String> {
        self.registry.names().to_vec()
    }

    pub fn exchange_settings(&self, name: &str) -> Result<&ExchangeSettings, EngineError> {
        self.exchange(name)
    }

    /// `Some(target)` while a multi-step rebalance is converging.
    #[must_use]
    pub fn twap_leverage_ratio(&self) -> Option<Decimal> {
        self.twap_leverage_ratio
    }

    #[must_use]
    pub fn global_last_trade_timestamp(&self) -> Option<DateTime<Utc>> {
        self.global_last_trade_timestamp
    }

    #[must_use]
    pub fn ether_balance(&self) -> Decimal {
        self.vault.balance()
    }

    #[must_use]
    pub fn operator(&self) -> &CallerId {
        self.authority.operator()
    }

    #[must_use]
    pub fn methodologist(&self) -> &CallerId {
        self.authority.methodologist()
    }

    // ------------------------------------------------------------------
    // Settings mutators
    // ------------------------------------------------------------------

    pub fn set_methodology_settings(
        &mut self,
        caller: &CallerId,
        settings: MethodologySettings,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.ensure_no_rebalance_in_progress()?;
        validate_cross_settings(&settings, &self.execution, &self.incentive)?;
        self.methodology = settings;
        info!(settings = ?self.methodology, "methodology settings updated");
        Ok(())
    }

    pub fn set_execution_settings(
        &mut self,
        caller: &CallerId,
        settings: ExecutionSettings,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.ensure_no_rebalance_in_progress()?;
        validate_cross_settings(&self.methodology, &settings, &self.incentive)?;
        self.execution = settings;
        info!(settings = ?self.execution, "execution settings updated");
        Ok(())
    }

    pub fn set_incentive_settings(
        &mut self,
        caller: &CallerId,
        settings: IncentiveSettings,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.ensure_no_rebalance_in_progress()?;
        validate_cross_settings(&self.methodology, &self.execution, &settings)?;
        self.incentive = settings;
        info!(settings = ?self.incentive, "incentive settings updated");
        Ok(())
    }

    /// Enables an exchange. Allowed mid-TWAP: adding venues is how an
    /// operator speeds a struggling TWAP up, never a way to loosen risk.
    pub fn add_enabled_exchange(
        &mut self,
        caller: &CallerId,
        name: &str,
        settings: ExchangeSettings,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.registry.add(name, settings)?;
        info!(exchange = name, "exchange enabled");
        Ok(())
    }

    pub fn update_enabled_exchange(
        &mut self,
        caller: &CallerId,
        name: &str,
        settings: ExchangeSettings,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.registry.update(name, settings)?;
        info!(exchange = name, "exchange settings updated");
        Ok(())
    }

    pub fn remove_enabled_exchange(
        &mut self,
        caller: &CallerId,
        name: &str,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.registry.remove(name)?;
        info!(exchange = name, "exchange removed");
        Ok(())
    }

    /// Selects the lending market's efficiency-mode category.
    pub async fn set_emode_category(
        &mut self,
        caller: &CallerId,
        category_id: u8,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.collaborators
            .lending
            .set_emode_category(category_id)
            .await?;
        info!(category_id, "e-mode category set");
        Ok(())
    }

    /// Escape hatch allowing settings changes mid-TWAP.
    pub fn set_override_no_rebalance_in_progress(
        &mut self,
        caller: &CallerId,
        overridden: bool,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.override_no_rebalance_in_progress = overridden;
        info!(overridden, "rebalance-in-progress override toggled");
        Ok(())
    }

    pub fn update_caller_status(
        &mut self,
        caller: &CallerId,
        target: CallerId,
        allowed: bool,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.authority.update_caller_status(target.clone(), allowed);
        info!(caller = %target, allowed, "caller status updated");
        Ok(())
    }

    pub fn update_anyone_callable(
        &mut self,
        caller: &CallerId,
        anyone_callable: bool,
    ) -> Result<(), EngineError> {
        self.authority.ensure_operator(caller)?;
        self.authority.update_anyone_callable(anyone_callable);
        info!(anyone_callable, "anyone-callable flag updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Incentive funding
    // ------------------------------------------------------------------

    /// Accepts an ether top-up from any source.
    pub fn deposit_ether_balance(&mut self, amount: Decimal) {
        self.vault.deposit(amount);
    }

    /// Drains the reward vault to the operator. Blocked while a rebalance
    /// is in progress so an emergency's incentive cannot vanish mid-TWAP.
    pub fn withdraw_ether_balance(&mut self, caller: &CallerId) -> Result<Decimal, EngineError> {
        self.authority.ensure_operator(caller)?;
        self.ensure_no_rebalance_in_progress()?;
        let drained = self.vault.drain();
        info!(amount = %drained, "ether balance withdrawn");
        Ok(drained)
    }

    // ------------------------------------------------------------------
    // Governance
    // ------------------------------------------------------------------

    /// Records one principal's confirmation of a governance action and
    /// applies the action once both principals have confirmed identical
    /// arguments. Returns whether the action was applied by this call.
    pub fn confirm_governance(
        &mut self,
        caller: &CallerId,
        action: GovernanceAction,
    ) -> Result<bool, EngineError> {
        let principal = if caller == self.authority.operator() {
            Principal::Operator
        } else if caller == self.authority.methodologist() {
            Principal::Methodologist
        } else {
            return Err(EngineError::Unauthorized(caller.clone()));
        };

        let now = self.collaborators.clock.now();
        match self.confirmations.confirm(principal, action, now) {
            Some(GovernanceAction::SetOperator(new_operator)) => {
                info!(operator = %new_operator, "operator replaced by mutual confirmation");
                self.authority.set_operator(new_operator);
                Ok(true)
            }
            Some(GovernanceAction::SetMethodologist(new_methodologist)) => {
                info!(
                    methodologist = %new_methodologist,
                    "methodologist replaced by mutual confirmation"
                );
                self.authority.set_methodologist(new_methodologist);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn exchange(&self, name: &str) -> Result<&ExchangeSettings, EngineError> {
        self.registry
            .get(name)
            .ok_or_else(|| EngineError::InvalidExchange(name.to_string()))
    }

    fn recentered(&self, current: Decimal) -> Result<Decimal, EngineError> {
        Ok(math::recentered_leverage_ratio(
            current,
            self.methodology.target_leverage_ratio,
            self.methodology.min_leverage_ratio,
            self.methodology.max_leverage_ratio,
            self.methodology.recentering_speed,
        )?)
    }

    fn ensure_no_rebalance_in_progress(&self) -> Result<(), EngineError> {
        if self.twap_leverage_ratio.is_some() && !self.override_no_rebalance_in_progress {
            return Err(EngineError::RebalanceInProgress);
        }
        Ok(())
    }

    fn rebalance_interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.global_last_trade_timestamp {
            None => true,
            Some(last) => last + self.methodology.rebalance_interval() <= now,
        }
    }

    async fn snapshot(&self) -> Result<PositionSnapshot, EngineError> {
        let collateral = &self.strategy.collateral_asset;
        let borrow = &self.strategy.borrow_asset;

        let collateral_balance_raw = self.collaborators.lending.supply_balance(collateral).await?;
        let borrow_balance_raw = self.collaborators.lending.borrow_balance(borrow).await?;
        let collateral_price = self.collaborators.oracle.price(collateral).await?;
        let borrow_price = self.collaborators.oracle.price(borrow).await?;
        let total_supply = self.collaborators.accounting.total_supply().await?;

        let collateral_balance = math::units_to_decimal(collateral_balance_raw, collateral)?;
        let borrow_balance = math::units_to_decimal(borrow_balance_raw, borrow)?;
        let collateral_value = math::value_of(collateral_balance, collateral_price)?;
        let borrow_value = math::value_of(borrow_balance, borrow_price)?;

        Ok(PositionSnapshot {
            collateral_balance,
            borrow_balance,
            collateral_balance_raw,
            borrow_balance_raw,
            collateral_price,
            borrow_price,
            collateral_value,
            borrow_value,
            total_supply,
        })
    }

    async fn max_lever_bound(&self, snapshot: &PositionSnapshot) -> Result<Decimal, EngineError> {
        let max_ltv = self
            .collaborators
            .lending
            .max_ltv(&self.strategy.collateral_asset)
            .await?;
        Ok(math::max_borrow_for_lever(
            snapshot.collateral_value,
            snapshot.borrow_value,
            snapshot.collateral_price,
            max_ltv,
            self.execution.unutilized_leverage_percentage,
        )?)
    }

    async fn max_delever_bound(&self, snapshot: &PositionSnapshot) -> Result<Decimal, EngineError> {
        let threshold = self
            .collaborators
            .lending
            .liquidation_threshold(&self.strategy.collateral_asset)
            .await?;
        Ok(math::max_delever_collateral(
            snapshot.collateral_balance,
            snapshot.collateral_value,
            snapshot.borrow_value,
            threshold,
            self.execution.unutilized_leverage_percentage,
        )?)
    }

    /// Shared trade core: sizes the bounded chunk from `current` toward
    /// `new_ratio` and executes the lever or delever leg. A zero chunk
    /// executes nothing and reports itself through the returned plan.
    async fn rebalance_toward(
        &self,
        exchange_name: &str,
        settings: &ExchangeSettings,
        snapshot: &PositionSnapshot,
        current: Decimal,
        new_ratio: Decimal,
        slippage: Decimal,
        cap_raw: u128,
    ) -> Result<ChunkPlan, EngineError> {
        let total = math::total_rebalance_notional(current, new_ratio, snapshot.collateral_balance)?;
        let cap = math::units_to_decimal(cap_raw, &self.strategy.collateral_asset)?;

        if new_ratio < current {
            if snapshot.borrow_balance_raw == 0 {
                return Err(EngineError::BorrowBalanceMustExist);
            }
            let bound = self.max_delever_bound(snapshot).await?;
            let plan = ChunkPlan::bounded(total, cap, &[bound]);
            if plan.chunk > Decimal::ZERO {
                self.execute_delever(exchange_name, settings, plan.chunk, slippage, snapshot)
                    .await?;
            }
            Ok(plan)
        } else if new_ratio > current {
            let bound = self.max_lever_bound(snapshot).await?;
            let plan = ChunkPlan::bounded(total, cap, &[bound]);
            if plan.chunk > Decimal::ZERO {
                self.execute_lever(exchange_name, settings, plan.chunk, slippage, snapshot)
                    .await?;
            }
            Ok(plan)
        } else {
            Ok(ChunkPlan {
                chunk: Decimal::ZERO,
                total: Decimal::ZERO,
            })
        }
    }

    /// Lever leg: borrow the debt asset worth `chunk` collateral, sell it
    /// for collateral, supply the proceeds.
    async fn execute_lever(
        &self,
        exchange_name: &str,
        settings: &ExchangeSettings,
        chunk: Decimal,
        slippage: Decimal,
        snapshot: &PositionSnapshot,
    ) -> Result<(), EngineError> {
        let collateral = &self.strategy.collateral_asset;
        let borrow = &self.strategy.borrow_asset;

        let borrow_amount =
            math::convert_amount(chunk, snapshot.collateral_price, snapshot.borrow_price)?;
        let borrow_raw = math::decimal_to_units(borrow_amount, borrow)?;
        let min_receive_raw =
            math::decimal_to_units(math::slippage_floor(chunk, slippage)?, collateral)?;

        self.collaborators.lending.borrow(borrow, borrow_raw).await?;
        let received = self
            .collaborators
            .trader
            .trade(
                exchange_name,
                borrow,
                collateral,
                borrow_raw,
                min_receive_raw,
                &settings.lever_payload,
            )
            .await?;
        self.collaborators.lending.supply(collateral, received).await?;

        tracing::debug!(
            exchange = exchange_name,
            sold = borrow_raw,
            received,
            "lever leg filled"
        );
        Ok(())
    }

    /// Delever leg: withdraw `chunk` collateral, sell it for the debt
    /// asset, repay. Repayment is capped at the outstanding borrow so the
    /// final chunk of a wind-down lands exactly on zero debt.
    async fn execute_delever(
        &self,
        exchange_name: &str,
        settings: &ExchangeSettings,
        chunk: Decimal,
        slippage: Decimal,
        snapshot: &PositionSnapshot,
    ) -> Result<(), EngineError> {
        let collateral = &self.strategy.collateral_asset;
        let borrow = &self.strategy.borrow_asset;

        let withdraw_raw = math::decimal_to_units(chunk, collateral)?;
        let expected_proceeds =
            math::convert_amount(chunk, snapshot.collateral_price, snapshot.borrow_price)?;
        let min_receive_raw =
            math::decimal_to_units(math::slippage_floor(expected_proceeds, slippage)?, borrow)?;

        self.collaborators
            .lending
            .withdraw(collateral, withdraw_raw)
            .await?;
        let received = self
            .collaborators
            .trader
            .trade(
                exchange_name,
                collateral,
                borrow,
                withdraw_raw,
                min_receive_raw,
                &settings.delever_payload,
            )
            .await?;
        let repay_raw = received.min(snapshot.borrow_balance_raw);
        self.collaborators.lending.repay(borrow, repay_raw).await?;

        tracing::debug!(
            exchange = exchange_name,
            sold = withdraw_raw,
            received,
            repaid = repay_raw,
            "delever leg filled"
        );
        Ok(())
    }

    /// Advances the acting exchange's cooldown clock and the global
    /// clock. Used both after trades and after a no-trade TWAP clear.
    fn stamp_trade_clocks(&mut self, exchange_name: &str) -> Result<(), EngineError> {
        let now = self.collaborators.clock.now();
        self.registry.record_trade(exchange_name, now)?;
        self.global_last_trade_timestamp = Some(now);
        Ok(())
    }

    /// Post-trade bookkeeping: stamp both cooldown clocks, then re-read
    /// the borrow balance and sync the per-share debt position with the
    /// accounting collaborator.
    async fn finalize_trade(&mut self, exchange_name: &str) -> Result<(), EngineError> {
        self.stamp_trade_clocks(exchange_name)?;

        let borrow = &self.strategy.borrow_asset;
        let borrow_raw = self.collaborators.lending.borrow_balance(borrow).await?;
        let total_supply = self.collaborators.accounting.total_supply().await?;
        if total_supply <= Decimal::ZERO {
            return Ok(());
        }
        let borrow_balance = math::units_to_decimal(borrow_raw, borrow)?;
        let per_share = borrow_balance
            .checked_div(total_supply)
            .ok_or(flexlev_core::MathError::Overflow)?;
        self.collaborators
            .accounting
            .record_debt_position_units(borrow, -per_share)
            .await?;
        Ok(())
    }
}

/// Whether the exchange has rested long enough for another chunk. An
/// exchange that has never traded is trivially rested.
fn cooldown_elapsed(
    settings: &ExchangeSettings,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    match settings.exchange_last_trade_timestamp {
        None => true,
        Some(last) => last + cooldown <= now,
    }
}

/// Whether price drift already carried the position past the stored TWAP
/// target. The methodology target fixes which side of the stored target
/// the TWAP is converging from; the stored in-flight target is the
/// crossing threshold. A TWAP stored at the methodology target itself
/// (an engage) is never advantageous and always runs to completion.
fn is_advantageous_twap(current: Decimal, stored: Decimal, methodology_target: Decimal) -> bool {
    (stored < methodology_target && current >= stored)
        || (stored > methodology_target && current <= stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn advantageous_when_delever_target_crossed() {
        // Delevering toward a stored 2.3 (methodology target 2.0) and a
        // price recovery pulled the ratio to 2.28: nothing left to do.
        assert!(is_advantageous_twap(dec!(2.28), dec!(2.3), dec!(2.0)));
    }

    #[test]
    fn not_advantageous_while_delever_continues() {
        assert!(!is_advantageous_twap(dec!(2.45), dec!(2.3), dec!(2.0)));
    }

    #[test]
    fn advantageous_when_lever_target_crossed() {
        assert!(is_advantageous_twap(dec!(1.72), dec!(1.7), dec!(2.0)));
    }

    #[test]
    fn not_advantageous_while_lever_continues() {
        assert!(!is_advantageous_twap(dec!(1.4), dec!(1.7), dec!(2.0)));
    }

    #[test]
    fn engage_twap_never_advantageous() {
        // An engage stores the methodology target itself; the TWAP must
        // run to completion however the price drifts.
        assert!(!is_advantageous_twap(dec!(1.1), dec!(2.0), dec!(2.0)));
        assert!(!is_advantageous_twap(dec!(2.4), dec!(2.0), dec!(2.0)));
    }

    #[test]
    fn cooldown_trivially_elapsed_without_history() {
        let settings = ExchangeSettings {
            twap_max_trade_size: 1,
            incentivized_twap_max_trade_size: 1,
            exchange_last_trade_timestamp: None,
            lever_payload: serde_json::Value::Null,
            delever_payload: serde_json::Value::Null,
        };
        assert!(cooldown_elapsed(
            &settings,
            Duration::seconds(300),
            Utc::now()
        ));
    }
}

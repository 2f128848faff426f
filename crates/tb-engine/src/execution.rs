// Leg pricing and settlement for the day loop.
// European legs price under Black-Scholes, American legs on the CRR lattice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use tb_options::{
    binomial_exercise_decision, binomial_tree_price, black_scholes_price, to_decimal,
    ExerciseDecision, PricingInput,
};
use tb_types::{
    BacktestConfig, ExerciseStyle, OptionContract, Portfolio, StrategyLeg, TbResult, Trade,
    TradeKind,
};

/// Decimal places kept on model prices booked into the portfolio.
pub const PRICE_SCALE: u32 = 8;

/// Rates and lattice size shared by every leg of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegPricer {
    pub risk_free_rate: f64,
    pub dividend_yield: f64,
    pub binomial_steps: usize,
}

impl LegPricer {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            risk_free_rate: config.risk_free_rate,
            dividend_yield: config.dividend_yield,
            binomial_steps: config.pricing.binomial_steps,
        }
    }

    pub fn input(
        &self,
        contract: &OptionContract,
        spot: Decimal,
        now: DateTime<Utc>,
        volatility: f64,
    ) -> TbResult<PricingInput> {
        Ok(
            PricingInput::from_contract(contract, spot, now, self.risk_free_rate, volatility)?
                .with_dividend_yield(self.dividend_yield),
        )
    }

    /// Per-unit model value of `contract` at `now`.
    pub fn price(
        &self,
        contract: &OptionContract,
        spot: Decimal,
        now: DateTime<Utc>,
        volatility: f64,
    ) -> TbResult<Decimal> {
        let input = self.input(contract, spot, now, volatility)?;
        let value = match contract.exercise_style {
            ExerciseStyle::European => black_scholes_price(&input)?,
            ExerciseStyle::American => binomial_tree_price(&input, self.binomial_steps, true)?,
        };
        Ok(to_decimal("price", value)?.round_dp(PRICE_SCALE))
    }

    pub fn exercise_decision(
        &self,
        contract: &OptionContract,
        spot: Decimal,
        now: DateTime<Utc>,
        volatility: f64,
    ) -> TbResult<ExerciseDecision> {
        let input = self.input(contract, spot, now, volatility)?;
        Ok(binomial_exercise_decision(&input, self.binomial_steps)?)
    }
}

/// Commission charged for trading every contract of a leg.
pub fn leg_commission(leg: &StrategyLeg, per_contract: Decimal) -> Decimal {
    per_contract * leg.quantity
}

/// Close position `index` at the contract's intrinsic value, with no
/// commission. `kind` is `Expire` or `Exercise`.
pub fn settle_at_intrinsic(
    portfolio: &mut Portfolio,
    index: usize,
    spot: Decimal,
    kind: TradeKind,
    at: DateTime<Utc>,
) -> TbResult<&Trade> {
    let value = portfolio
        .positions
        .get(index)
        .map(|p| p.contract().intrinsic_value(spot))
        .ok_or_else(|| tb_types::internal_error!("no position at index {}", index))?;
    let trade = portfolio.close_position(index, value, kind, Decimal::ZERO, at)?;
    debug!(
        "Settled leg {} ({}) at intrinsic {} with spot {}",
        trade.leg_index, kind, value, spot
    );
    Ok(trade)
}

/// Premium paid (positive) or received (negative) to open every position.
pub fn net_entry_premium(portfolio: &Portfolio) -> Decimal {
    portfolio
        .positions
        .iter()
        .map(|p| p.value_at(p.entry_price))
        .sum()
}

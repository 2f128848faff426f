//! Risk measures over a set of option legs.
//!
//! [`RiskCalculator`] evaluates legs against a [`MarketContext`] and produces
//! a [`PortfolioRiskReport`] with aggregated Greeks, parametric VaR, stress
//! scenario P&L and margin.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tb_options::{
    binomial_tree_price, black_scholes_price, inv_norm_cdf, to_decimal, Greeks, GreeksCalculator,
    PricingInput, VolatilityAnalyzer,
};
use tb_types::{ExerciseStyle, OptionKind, Portfolio, PricingError, StrategyLeg, TbResult};

use crate::context::MarketContext;
use crate::scenarios::{MarketScenario, ScenarioResult};

/// Trading days used to scale annual volatility to the VaR horizon.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Lowest volatility a stress shock can push a leg to.
pub const MIN_STRESS_VOLATILITY: f64 = 1e-4;

/// Delta-gamma-normal value-at-risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueAtRisk {
    pub confidence: f64,
    pub horizon_days: u32,
    /// Underlying volatility over the horizon.
    pub horizon_volatility: f64,
    pub delta: f64,
    pub gamma: f64,
    /// Loss not exceeded at `confidence`, as a positive amount.
    pub value: f64,
    /// Legs whose Greeks came from the fallback volatility.
    #[serde(default)]
    pub fallback_legs: Vec<usize>,
}

/// Everything [`RiskCalculator::portfolio_risk`] reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskReport {
    pub id: Uuid,
    pub valuation_time: DateTime<Utc>,
    pub num_legs: usize,
    pub greeks: Greeks,
    pub value_at_risk: ValueAtRisk,
    pub stress: Vec<ScenarioResult>,
    pub margin: Decimal,
    /// Legs that had no usable quoted volatility and were priced at the
    /// context's fallback. Every figure above includes them.
    #[serde(default)]
    pub fallback_legs: Vec<usize>,
}

/// Open legs of a simulated portfolio.
pub fn open_legs(portfolio: &Portfolio) -> Vec<StrategyLeg> {
    portfolio.open_positions().map(|p| p.leg.clone()).collect()
}

fn signed_units(leg: &StrategyLeg) -> Result<f64, PricingError> {
    let units = leg.signed_notional_units();
    units
        .to_f64()
        .ok_or_else(|| PricingError::invalid("quantity", f64::NAN, format!("cannot convert {units} to f64")))
}

/// Risk measures evaluated against one market context.
#[derive(Debug, Clone)]
pub struct RiskCalculator {
    context: MarketContext,
    var_window: usize,
    binomial_steps: usize,
    greeks: GreeksCalculator,
    analyzer: VolatilityAnalyzer,
}

impl RiskCalculator {
    pub fn new(context: MarketContext) -> Self {
        Self {
            context,
            var_window: 30,
            binomial_steps: 200,
            greeks: GreeksCalculator::new(),
            analyzer: VolatilityAnalyzer::new(),
        }
    }

    /// Trailing returns used for the VaR volatility.
    pub fn with_var_window(mut self, window: usize) -> Self {
        self.var_window = window;
        self
    }

    pub fn with_binomial_steps(mut self, steps: usize) -> Self {
        self.binomial_steps = steps;
        self
    }

    pub fn context(&self) -> &MarketContext {
        &self.context
    }

    fn flag_fallback(&self, measure: &str, legs: &[StrategyLeg]) -> Vec<usize> {
        let flagged = self.context.fallback_legs(legs);
        if !flagged.is_empty() {
            warn!(
                measure,
                legs = ?flagged,
                volatility = self.context.fallback_volatility,
                "legs priced at fallback volatility"
            );
        }
        flagged
    }

    fn unit_price(&self, style: ExerciseStyle, input: &PricingInput) -> Result<f64, PricingError> {
        match style {
            ExerciseStyle::European => black_scholes_price(input),
            ExerciseStyle::American => binomial_tree_price(input, self.binomial_steps, true),
        }
    }

    /// Signed value of every leg under current inputs.
    pub fn portfolio_value(&self, legs: &[StrategyLeg]) -> TbResult<f64> {
        let mut total = 0.0;
        for leg in legs {
            let input = self.context.pricing_input(&leg.contract)?;
            total += signed_units(leg)? * self.unit_price(leg.contract.exercise_style, &input)?;
        }
        Ok(total)
    }

    /// Σ per-leg Greeks × signed quantity × multiplier.
    pub fn portfolio_greeks(&self, legs: &[StrategyLeg]) -> TbResult<Greeks> {
        let mut total = Greeks::zero();
        for leg in legs {
            let input = self.context.pricing_input(&leg.contract)?;
            let greeks = self.greeks.calculate(&input)?;
            total = total.add(&greeks.scaled(signed_units(leg)?));
        }
        Ok(total)
    }

    pub fn value_at_risk(
        &self,
        legs: &[StrategyLeg],
        confidence: f64,
        horizon_days: u32,
    ) -> TbResult<ValueAtRisk> {
        if confidence.is_nan() || confidence <= 0.0 || confidence >= 1.0 {
            return Err(PricingError::invalid("confidence", confidence, "must be in (0, 1)").into());
        }
        if horizon_days == 0 {
            return Err(PricingError::invalid("horizon", 0.0, "must be at least 1 day").into());
        }

        let annual = self
            .analyzer
            .historical_volatility(&self.context.price_history, self.var_window)?;
        let horizon_volatility = annual * (horizon_days as f64 / TRADING_DAYS_PER_YEAR).sqrt();
        let greeks = self.portfolio_greeks(legs)?;

        let spot_sd = self.context.spot_f64()? * horizon_volatility;
        let dispersion = spot_sd * spot_sd;
        // P&L ~ delta dS + gamma dS^2 / 2 with dS normal
        let variance = greeks.delta.powi(2) * dispersion + 0.5 * (greeks.gamma * dispersion).powi(2);
        let mean = 0.5 * greeks.gamma * dispersion;
        let z = inv_norm_cdf(confidence);
        let value = (z * variance.sqrt() - mean).max(0.0);

        debug!(
            confidence,
            horizon_days,
            horizon_volatility,
            delta = greeks.delta,
            gamma = greeks.gamma,
            value,
            "value at risk"
        );
        Ok(ValueAtRisk {
            confidence,
            horizon_days,
            horizon_volatility,
            delta: greeks.delta,
            gamma: greeks.gamma,
            value,
            fallback_legs: self.flag_fallback("value_at_risk", legs),
        })
    }

    fn shocked_value(&self, legs: &[StrategyLeg], scenario: &MarketScenario) -> TbResult<f64> {
        if scenario.underlying_change.is_nan() || scenario.underlying_change <= -1.0 {
            return Err(PricingError::invalid(
                "underlying_change",
                scenario.underlying_change,
                "must be greater than -1",
            )
            .into());
        }
        let spot = self.context.spot_f64()? * (1.0 + scenario.underlying_change);
        let at = self.context.valuation_time + Duration::days(scenario.days_elapsed);

        let mut total = 0.0;
        for leg in legs {
            let base = self.context.pricing_input(&leg.contract)?;
            let input = base
                .with_spot(spot)
                .with_volatility((base.volatility + scenario.volatility_change).max(MIN_STRESS_VOLATILITY))
                .with_time_to_expiry(leg.contract.time_to_expiry(at));
            total += signed_units(leg)? * self.unit_price(leg.contract.exercise_style, &input)?;
        }
        Ok(total)
    }

    /// P&L of each scenario against the value under current inputs, in
    /// scenario order.
    pub fn stress_test(
        &self,
        legs: &[StrategyLeg],
        scenarios: &[MarketScenario],
    ) -> TbResult<Vec<ScenarioResult>> {
        let base_value = self.portfolio_value(legs)?;
        let fallback_legs = self.flag_fallback("stress_test", legs);
        scenarios
            .par_iter()
            .map(|scenario| -> TbResult<ScenarioResult> {
                let shocked_value = self.shocked_value(legs, scenario)?;
                Ok(ScenarioResult {
                    scenario: scenario.clone(),
                    base_value,
                    shocked_value,
                    pnl: shocked_value - base_value,
                    fallback_legs: fallback_legs.clone(),
                })
            })
            .collect()
    }

    /// Short legs post premium plus the larger of 20 % of spot less the
    /// out-of-the-money amount and a floor of 10 % (of spot for calls, of
    /// strike for puts). Long legs post nothing.
    pub fn margin_requirement(&self, legs: &[StrategyLeg]) -> TbResult<Decimal> {
        let spot = self.context.spot;
        let twenty = Decimal::new(2, 1);
        let ten = Decimal::new(1, 1);

        let mut total = Decimal::ZERO;
        for leg in legs.iter().filter(|l| l.is_short()) {
            let contract = &leg.contract;
            let premium = match leg.premium() {
                Some(p) => p,
                None => {
                    if self.context.uses_fallback_volatility(contract) {
                        warn!(
                            contract = %contract,
                            volatility = self.context.fallback_volatility,
                            "unquoted short leg margined at fallback volatility"
                        );
                    }
                    let input = self.context.pricing_input(contract)?;
                    to_decimal("premium", self.unit_price(contract.exercise_style, &input)?)?
                }
            };
            let (otm, floor) = match contract.kind {
                OptionKind::Call => ((contract.strike - spot).max(Decimal::ZERO), ten * spot),
                OptionKind::Put => ((spot - contract.strike).max(Decimal::ZERO), ten * contract.strike),
            };
            let per_unit = premium + (twenty * spot - otm).max(floor);
            total += per_unit * leg.quantity * contract.multiplier;
        }
        Ok(total.max(Decimal::ZERO))
    }

    pub fn portfolio_risk(
        &self,
        legs: &[StrategyLeg],
        confidence: f64,
        horizon_days: u32,
        scenarios: &[MarketScenario],
    ) -> TbResult<PortfolioRiskReport> {
        let report = PortfolioRiskReport {
            id: Uuid::new_v4(),
            valuation_time: self.context.valuation_time,
            num_legs: legs.len(),
            greeks: self.portfolio_greeks(legs)?,
            value_at_risk: self.value_at_risk(legs, confidence, horizon_days)?,
            stress: self.stress_test(legs, scenarios)?,
            margin: self.margin_requirement(legs)?,
            fallback_legs: self.context.fallback_legs(legs),
        };
        info!(
            "Risk for {} legs: delta {:.2}, VaR({}, {}d) {:.2}, margin {}",
            report.num_legs,
            report.greeks.delta,
            confidence,
            horizon_days,
            report.value_at_risk.value,
            report.margin
        );
        Ok(report)
    }
}

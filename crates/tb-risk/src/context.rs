use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tb_options::{decimal_to_f64, PricingInput};
use tb_types::{OptionContract, PricingError, StrategyLeg};

/// Market state every risk measure is evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub spot: Decimal,
    pub risk_free_rate: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    pub valuation_time: DateTime<Utc>,
    /// Used for legs whose quote carries no implied volatility.
    pub fallback_volatility: f64,
    /// Underlying closes, oldest first.
    #[serde(default)]
    pub price_history: Vec<f64>,
}

impl MarketContext {
    pub fn new(spot: Decimal, valuation_time: DateTime<Utc>) -> Self {
        Self {
            spot,
            risk_free_rate: 0.05,
            dividend_yield: 0.0,
            valuation_time,
            fallback_volatility: 0.2,
            price_history: Vec::new(),
        }
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_dividend_yield(mut self, yield_: f64) -> Self {
        self.dividend_yield = yield_;
        self
    }

    pub fn with_fallback_volatility(mut self, volatility: f64) -> Self {
        self.fallback_volatility = volatility;
        self
    }

    pub fn with_price_history(mut self, closes: Vec<f64>) -> Self {
        self.price_history = closes;
        self
    }

    fn usable_quoted_volatility(contract: &OptionContract) -> Option<f64> {
        contract.quoted_volatility().filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Quoted implied volatility of the contract, else the fallback.
    pub fn volatility_for(&self, contract: &OptionContract) -> f64 {
        Self::usable_quoted_volatility(contract).unwrap_or(self.fallback_volatility)
    }

    /// True when pricing the contract falls back to `fallback_volatility`.
    pub fn uses_fallback_volatility(&self, contract: &OptionContract) -> bool {
        Self::usable_quoted_volatility(contract).is_none()
    }

    /// Indices of the legs priced at the fallback volatility.
    pub fn fallback_legs(&self, legs: &[StrategyLeg]) -> Vec<usize> {
        legs.iter()
            .enumerate()
            .filter(|(_, leg)| self.uses_fallback_volatility(&leg.contract))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn spot_f64(&self) -> Result<f64, PricingError> {
        decimal_to_f64("spot", self.spot)
    }

    pub fn pricing_input(&self, contract: &OptionContract) -> Result<PricingInput, PricingError> {
        Ok(PricingInput::from_contract(
            contract,
            self.spot,
            self.valuation_time,
            self.risk_free_rate,
            self.volatility_for(contract),
        )?
        .with_dividend_yield(self.dividend_yield))
    }
}

//! Options chain snapshots: every quoted contract of one underlying at one
//! instant, plus a synthetic chain builder priced off Black-Scholes.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tb_types::{ExerciseStyle, OptionContract, OptionKind, OptionQuote, PricingError, Symbol};

use crate::pricing::{black_scholes_price, to_decimal, PricingInput};

/// Quoted contracts of a single underlying observed at `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub underlying: Symbol,
    pub underlying_price: Decimal,
    pub risk_free_rate: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    pub as_of: DateTime<Utc>,
    pub contracts: Vec<OptionContract>,
}

impl ChainSnapshot {
    pub fn new(
        underlying: Symbol,
        underlying_price: Decimal,
        risk_free_rate: f64,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            underlying,
            underlying_price,
            risk_free_rate,
            dividend_yield: 0.0,
            as_of,
            contracts: Vec::new(),
        }
    }

    pub fn with_contracts(mut self, contracts: Vec<OptionContract>) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn with_dividend_yield(mut self, dividend_yield: f64) -> Self {
        self.dividend_yield = dividend_yield;
        self
    }

    pub fn push(&mut self, contract: OptionContract) {
        self.contracts.push(contract);
    }

    /// Distinct expirations, ascending.
    pub fn expirations(&self) -> Vec<DateTime<Utc>> {
        let mut expirations: Vec<_> = self.contracts.iter().map(|c| c.expiration).collect();
        expirations.sort();
        expirations.dedup();
        expirations
    }

    /// Distinct strikes, ascending.
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut strikes: Vec<_> = self.contracts.iter().map(|c| c.strike).collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    pub fn contracts_for(&self, expiration: DateTime<Utc>) -> impl Iterator<Item = &OptionContract> {
        self.contracts
            .iter()
            .filter(move |c| c.expiration == expiration)
    }

    pub fn find(
        &self,
        kind: OptionKind,
        strike: Decimal,
        expiration: DateTime<Utc>,
    ) -> Option<&OptionContract> {
        self.contracts
            .iter()
            .find(|c| c.kind == kind && c.strike == strike && c.expiration == expiration)
    }

    /// Find the ATM strike (closest to the underlying price).
    pub fn atm_strike(&self) -> Option<Decimal> {
        self.strikes()
            .into_iter()
            .min_by_key(|strike| (*strike - self.underlying_price).abs())
    }

    pub fn underlying_price_f64(&self) -> Option<f64> {
        self.underlying_price.to_f64()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// Parameters of a synthetic chain with strikes spaced evenly around spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticChain {
    pub underlying: Symbol,
    pub expirations: Vec<DateTime<Utc>>,
    pub spot: f64,
    pub risk_free_rate: f64,
    pub volatility: f64,
    /// Total number of strikes, centered around ATM.
    pub num_strikes: usize,
    /// Spacing between consecutive strikes.
    pub strike_step: f64,
    pub exercise_style: ExerciseStyle,
    pub multiplier: Decimal,
    /// Half bid/ask spread as a fraction of the model price.
    pub half_spread: f64,
    /// Publish the model volatility on each quote.
    pub quote_volatility: bool,
}

impl SyntheticChain {
    pub fn new(underlying: Symbol, expirations: Vec<DateTime<Utc>>, spot: f64, volatility: f64) -> Self {
        Self {
            underlying,
            expirations,
            spot,
            risk_free_rate: 0.05,
            volatility,
            num_strikes: 11,
            strike_step: (spot * 0.05).max(1.0),
            exercise_style: ExerciseStyle::European,
            multiplier: Decimal::ONE,
            half_spread: 0.01,
            quote_volatility: true,
        }
    }

    pub fn with_strikes(mut self, num_strikes: usize, strike_step: f64) -> Self {
        self.num_strikes = num_strikes;
        self.strike_step = strike_step;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn without_quoted_volatility(mut self) -> Self {
        self.quote_volatility = false;
        self
    }

    /// Price every (strike, expiry, kind) at `as_of` and quote it.
    pub fn build(&self, as_of: DateTime<Utc>) -> Result<ChainSnapshot, PricingError> {
        let half = self.num_strikes / 2;
        let atm_strike = (self.spot / self.strike_step).round() * self.strike_step;
        let mut snapshot = ChainSnapshot::new(
            self.underlying.clone(),
            to_decimal("spot", self.spot)?,
            self.risk_free_rate,
            as_of,
        );

        for &expiration in &self.expirations {
            for i in 0..self.num_strikes {
                let strike_f = atm_strike + (i as f64 - half as f64) * self.strike_step;
                if strike_f <= 0.0 {
                    continue;
                }
                let strike = to_decimal("strike", strike_f)?.round_dp(8);
                for kind in [OptionKind::Call, OptionKind::Put] {
                    let contract = OptionContract::new(
                        self.underlying.clone(),
                        kind,
                        strike,
                        expiration,
                        self.exercise_style,
                        self.multiplier,
                    );
                    let input = PricingInput::new(
                        self.spot,
                        strike_f,
                        contract.time_to_expiry(as_of),
                        self.risk_free_rate,
                        self.volatility,
                        kind,
                    );
                    let price = black_scholes_price(&input)?;
                    let mut quote = OptionQuote::new(as_of).with_bid_ask(
                        to_decimal("bid", price * (1.0 - self.half_spread))?.round_dp(8),
                        to_decimal("ask", price * (1.0 + self.half_spread))?.round_dp(8),
                    );
                    if self.quote_volatility {
                        quote = quote.with_implied_volatility(self.volatility);
                    }
                    snapshot.push(contract.with_quote(quote));
                }
            }
        }
        Ok(snapshot)
    }
}

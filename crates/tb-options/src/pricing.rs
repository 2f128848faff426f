//! Black-Scholes pricing for European options, the shared normal
//! distribution helpers, and the model-dispatching `price_option` entry point.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tb_types::{OptionContract, OptionKind, PricingError};

use crate::greeks::{Greeks, GreeksCalculator};
use crate::lattice::binomial_tree_price;
use crate::monte_carlo::{monte_carlo_price_with, MonteCarloConfig};

/// Time to expiry (years) at or below which an option is treated as expired.
pub const EXPIRY_THRESHOLD: f64 = 1e-10;

/// Inputs shared by all pricing models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingInput {
    /// Current underlying spot price.
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry in years.
    pub time_to_expiry: f64,
    /// Annualised risk-free rate (e.g. 0.05 = 5 %).
    pub risk_free_rate: f64,
    /// Annualised volatility (e.g. 0.20 = 20 %).
    pub volatility: f64,
    pub kind: OptionKind,
    /// Continuous dividend yield (e.g. 0.02 = 2 %).
    #[serde(default)]
    pub dividend_yield: f64,
}

impl PricingInput {
    pub fn new(
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        risk_free_rate: f64,
        volatility: f64,
        kind: OptionKind,
    ) -> Self {
        Self {
            spot,
            strike,
            time_to_expiry,
            risk_free_rate,
            volatility,
            kind,
            dividend_yield: 0.0,
        }
    }

    /// Inputs for `contract` valued at `now`.
    pub fn from_contract(
        contract: &OptionContract,
        spot: Decimal,
        now: DateTime<Utc>,
        risk_free_rate: f64,
        volatility: f64,
    ) -> Result<Self, PricingError> {
        Ok(Self::new(
            decimal_to_f64("spot", spot)?,
            decimal_to_f64("strike", contract.strike)?,
            contract.time_to_expiry(now),
            risk_free_rate,
            volatility,
            contract.kind,
        ))
    }

    pub fn with_dividend_yield(mut self, dividend_yield: f64) -> Self {
        self.dividend_yield = dividend_yield;
        self
    }

    pub fn with_spot(mut self, spot: f64) -> Self {
        self.spot = spot;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    pub fn with_time_to_expiry(mut self, time_to_expiry: f64) -> Self {
        self.time_to_expiry = time_to_expiry;
        self
    }

    pub fn with_risk_free_rate(mut self, risk_free_rate: f64) -> Self {
        self.risk_free_rate = risk_free_rate;
        self
    }

    pub fn with_kind(mut self, kind: OptionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.time_to_expiry <= EXPIRY_THRESHOLD
    }

    pub fn intrinsic(&self) -> f64 {
        intrinsic(self.kind, self.spot, self.strike)
    }

    pub fn validate(&self) -> Result<(), PricingError> {
        let fields = [
            ("spot", self.spot),
            ("strike", self.strike),
            ("time_to_expiry", self.time_to_expiry),
            ("risk_free_rate", self.risk_free_rate),
            ("volatility", self.volatility),
            ("dividend_yield", self.dividend_yield),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(PricingError::invalid(name, value, "must be finite"));
            }
        }
        if self.spot <= 0.0 {
            return Err(PricingError::invalid("spot", self.spot, "must be positive"));
        }
        if self.strike <= 0.0 {
            return Err(PricingError::invalid("strike", self.strike, "must be positive"));
        }
        if self.volatility <= 0.0 {
            return Err(PricingError::invalid(
                "volatility",
                self.volatility,
                "must be positive",
            ));
        }
        if self.time_to_expiry < 0.0 {
            return Err(PricingError::invalid(
                "time_to_expiry",
                self.time_to_expiry,
                "must be non-negative",
            ));
        }
        Ok(())
    }

    /// Compact rendering of the inputs for error and log context.
    pub fn describe(&self) -> String {
        format!(
            "kind={} S={} K={} T={} r={} q={} sigma={}",
            self.kind,
            self.spot,
            self.strike,
            self.time_to_expiry,
            self.risk_free_rate,
            self.dividend_yield,
            self.volatility
        )
    }
}

#[inline]
pub(crate) fn intrinsic(kind: OptionKind, spot: f64, strike: f64) -> f64 {
    match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    }
}

// ---------- normal distribution helpers ----------

/// Standard normal probability density function.
#[inline]
pub fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF, Hart's double-precision algorithm as given by West
/// (2005). Exactly symmetric: `norm_cdf(x) + norm_cdf(-x) == 1`.
pub fn norm_cdf(x: f64) -> f64 {
    let z = x.abs();
    let tail = if z > 37.0 {
        0.0
    } else {
        let e = (-0.5 * z * z).exp();
        if z < 7.071_067_811_865_47 {
            let num = [
                3.526_249_659_989_11e-2,
                0.700_383_064_443_688,
                6.373_962_203_531_65,
                33.912_866_078_383,
                112.079_291_497_871,
                221.213_596_169_931,
                220.206_867_912_376,
            ]
            .iter()
            .fold(0.0, |acc, c| acc * z + c);
            let den = [
                8.838_834_764_831_84e-2,
                1.755_667_163_182_64,
                16.064_177_579_207,
                86.780_732_202_946_1,
                296.564_248_779_674,
                637.333_633_378_831,
                793.826_512_519_948,
                440.413_735_824_752,
            ]
            .iter()
            .fold(0.0, |acc, c| acc * z + c);
            e * num / den
        } else {
            let mut cf = z + 0.65;
            for k in [4.0, 3.0, 2.0, 1.0] {
                cf = z + k / cf;
            }
            e / cf / 2.506_628_274_631
        }
    };
    if x > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn inv_norm_cdf(p: f64) -> f64 {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let horner = |coeffs: &[f64], x: f64| coeffs.iter().fold(0.0, |acc, c| acc * x + c);
    let tail = |q: f64| horner(&C, q) / (horner(&D, q) * q + 1.0);

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        horner(&A, r) * q / (horner(&B, r) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

// ---------- Black-Scholes core ----------

/// d1 and d2 for a non-expired input.
pub(crate) fn d1_d2(input: &PricingInput) -> (f64, f64) {
    let sqrt_t = input.time_to_expiry.sqrt();
    let vol_sqrt_t = input.volatility * sqrt_t;
    let d1 = ((input.spot / input.strike).ln()
        + (input.risk_free_rate - input.dividend_yield + 0.5 * input.volatility * input.volatility)
            * input.time_to_expiry)
        / vol_sqrt_t;
    (d1, d1 - vol_sqrt_t)
}

/// Price a European option using the Black-Scholes(-Merton) model.
///
/// Returns the intrinsic value exactly when the input is at expiry.
pub fn black_scholes_price(input: &PricingInput) -> Result<f64, PricingError> {
    input.validate()?;
    if input.is_expired() {
        return Ok(input.intrinsic());
    }

    let (d1, d2) = d1_d2(input);
    let t = input.time_to_expiry;
    let disc = (-input.risk_free_rate * t).exp();
    let div_disc = (-input.dividend_yield * t).exp();
    let s = input.spot;
    let k = input.strike;

    let price = match input.kind {
        OptionKind::Call => s * div_disc * norm_cdf(d1) - k * disc * norm_cdf(d2),
        OptionKind::Put => k * disc * norm_cdf(-d2) - s * div_disc * norm_cdf(-d1),
    };
    Ok(price.max(0.0))
}

// ---------- model selection ----------

/// Pricing model selector for [`price_option`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PricingModel {
    BlackScholes,
    Binomial {
        steps: usize,
        american: bool,
    },
    MonteCarlo {
        simulations: usize,
        seed: u64,
        antithetic: bool,
    },
}

impl PricingModel {
    pub fn name(&self) -> &'static str {
        match self {
            PricingModel::BlackScholes => "black_scholes",
            PricingModel::Binomial { .. } => "binomial",
            PricingModel::MonteCarlo { .. } => "monte_carlo",
        }
    }
}

/// A pricing request: inputs plus the model to use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub input: PricingInput,
    pub model: PricingModel,
}

/// Price, sampling error (Monte Carlo only) and closed-form Greeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValuation {
    pub price: f64,
    pub standard_error: Option<f64>,
    pub greeks: Greeks,
    pub model: PricingModel,
}

/// Price an option under the requested model.
pub fn price_option(request: &PricingRequest) -> Result<OptionValuation, PricingError> {
    let input = &request.input;
    let (price, standard_error) = match request.model {
        PricingModel::BlackScholes => (black_scholes_price(input)?, None),
        PricingModel::Binomial { steps, american } => {
            (binomial_tree_price(input, steps, american)?, None)
        }
        PricingModel::MonteCarlo {
            simulations,
            seed,
            antithetic,
        } => {
            let config = MonteCarloConfig {
                simulations,
                seed,
                antithetic,
            };
            let result = monte_carlo_price_with(input, &config)?;
            (result.price, Some(result.standard_error))
        }
    };
    let greeks = GreeksCalculator::new().calculate(input)?;

    Ok(OptionValuation {
        price,
        standard_error,
        greeks,
        model: request.model,
    })
}

// ---------- Decimal bridging ----------

/// Convert a model output into a money amount.
pub fn to_decimal(name: &'static str, value: f64) -> Result<Decimal, PricingError> {
    Decimal::from_f64(value)
        .ok_or_else(|| PricingError::invalid(name, value, "not representable as a decimal"))
}

/// Convert a money amount into a model input.
pub fn decimal_to_f64(name: &'static str, value: Decimal) -> Result<f64, PricingError> {
    value
        .to_f64()
        .ok_or_else(|| PricingError::invalid(name, f64::NAN, format!("cannot convert {value} to f64")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: OptionKind) -> PricingInput {
        PricingInput::new(100.0, 100.0, 1.0, 0.05, 0.2, kind)
    }

    #[test]
    fn test_reference_call_price() {
        let price = black_scholes_price(&input(OptionKind::Call)).unwrap();
        assert!((price - 10.4506).abs() < 1e-3, "price = {price}");
    }

    #[test]
    fn test_put_call_parity_grid() {
        for &spot in &[60.0, 90.0, 100.0, 115.0, 180.0] {
            for &t in &[0.01, 0.25, 1.0, 3.0] {
                for &sigma in &[0.05, 0.2, 0.8] {
                    let call = PricingInput::new(spot, 100.0, t, 0.03, sigma, OptionKind::Call);
                    let put = call.with_kind(OptionKind::Put);
                    let c = black_scholes_price(&call).unwrap();
                    let p = black_scholes_price(&put).unwrap();
                    let rhs = spot - 100.0 * (-0.03 * t).exp();
                    assert!(
                        (c - p - rhs).abs() < 1e-10,
                        "parity violated S={spot} T={t} sigma={sigma}: {}",
                        c - p - rhs
                    );
                }
            }
        }
    }

    #[test]
    fn test_put_call_parity_with_dividend() {
        let call = input(OptionKind::Call).with_dividend_yield(0.02);
        let put = call.with_kind(OptionKind::Put);
        let c = black_scholes_price(&call).unwrap();
        let p = black_scholes_price(&put).unwrap();
        let rhs = 100.0 * (-0.02f64).exp() - 100.0 * (-0.05f64).exp();
        assert!((c - p - rhs).abs() < 1e-10);
    }

    #[test]
    fn test_expired_returns_intrinsic() {
        let call = PricingInput::new(110.0, 100.0, 0.0, 0.05, 0.2, OptionKind::Call);
        assert_eq!(black_scholes_price(&call).unwrap(), 10.0);
        let put = call.with_kind(OptionKind::Put).with_time_to_expiry(1e-11);
        assert_eq!(black_scholes_price(&put).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let bad = [
            input(OptionKind::Call).with_spot(0.0),
            input(OptionKind::Call).with_volatility(-0.1),
            input(OptionKind::Call).with_time_to_expiry(-1.0),
            input(OptionKind::Call).with_spot(f64::NAN),
            PricingInput::new(100.0, 0.0, 1.0, 0.05, 0.2, OptionKind::Put),
        ];
        for b in bad {
            assert!(
                matches!(black_scholes_price(&b), Err(PricingError::InvalidParameter { .. })),
                "accepted {}",
                b.describe()
            );
        }
    }

    #[test]
    fn test_norm_cdf_reference_and_symmetry() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-15);
        assert!((norm_cdf(1.0) - 0.841_344_746_068_543).abs() < 1e-13);
        assert!((norm_cdf(-3.0) - 0.001_349_898_031_630_094_6).abs() < 1e-14);
        for i in 0..=100 {
            let x = i as f64 / 10.0;
            assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-15);
        }
        assert_eq!(norm_cdf(40.0), 1.0);
        assert_eq!(norm_cdf(-40.0), 0.0);
    }

    #[test]
    fn test_inv_norm_cdf_inverts_cdf() {
        assert!(inv_norm_cdf(0.5).abs() < 1e-12);
        for i in 1..100 {
            let p = i as f64 / 100.0;
            assert!((norm_cdf(inv_norm_cdf(p)) - p).abs() < 1e-8, "p = {p}");
        }
        assert!(inv_norm_cdf(1.5).is_nan());
    }

    #[test]
    fn test_price_option_dispatch() {
        let base = input(OptionKind::Call);
        let bs = price_option(&PricingRequest {
            input: base,
            model: PricingModel::BlackScholes,
        })
        .unwrap();
        let tree = price_option(&PricingRequest {
            input: base,
            model: PricingModel::Binomial {
                steps: 400,
                american: false,
            },
        })
        .unwrap();
        assert!(bs.standard_error.is_none());
        assert!((bs.price - tree.price).abs() < 2e-2);
        assert_eq!(bs.greeks, tree.greeks);
        assert_eq!(tree.model.name(), "binomial");
    }

    #[test]
    fn test_pricing_model_serde_tag() {
        let json = serde_json::to_string(&PricingModel::Binomial {
            steps: 100,
            american: true,
        })
        .unwrap();
        assert!(json.contains("\"model\":\"binomial\""));
        let back: PricingModel = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back,
            PricingModel::Binomial {
                steps: 100,
                american: true
            }
        );
    }
}

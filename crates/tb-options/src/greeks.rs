use serde::{Deserialize, Serialize};
use tracing::error;

use tb_types::{OptionKind, PricingError};

use crate::pricing::{black_scholes_price, d1_d2, norm_cdf, norm_pdf, PricingInput};

/// Option greeks computed from a pricing model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    /// Rate of change of option price w.r.t. underlying price.
    pub delta: f64,
    /// Rate of change of delta w.r.t. underlying price.
    pub gamma: f64,
    /// Rate of change of option price w.r.t. time (per calendar day).
    pub theta: f64,
    /// Rate of change of option price w.r.t. volatility (per 1% move).
    pub vega: f64,
    /// Rate of change of option price w.r.t. risk-free rate (per 1% move).
    pub rho: f64,
}

impl Greeks {
    pub fn zero() -> Self {
        Self {
            delta: 0.0,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
            rho: 0.0,
        }
    }

    /// Every greek multiplied by `factor` (signed position size).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            theta: self.theta * factor,
            vega: self.vega * factor,
            rho: self.rho * factor,
        }
    }

    pub fn add(&self, other: &Greeks) -> Self {
        Self {
            delta: self.delta + other.delta,
            gamma: self.gamma + other.gamma,
            theta: self.theta + other.theta,
            vega: self.vega + other.vega,
            rho: self.rho + other.rho,
        }
    }

    fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("delta", self.delta),
            ("gamma", self.gamma),
            ("theta", self.theta),
            ("vega", self.vega),
            ("rho", self.rho),
        ]
    }
}

impl std::iter::Sum for Greeks {
    fn sum<I: Iterator<Item = Greeks>>(iter: I) -> Self {
        iter.fold(Greeks::zero(), |acc, g| acc.add(&g))
    }
}

/// Closed-form Black-Scholes greeks with range validation.
#[derive(Debug, Clone, Default)]
pub struct GreeksCalculator;

impl GreeksCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Analytic greeks, validated before they are returned.
    pub fn calculate(&self, input: &PricingInput) -> Result<Greeks, PricingError> {
        input.validate()?;
        let greeks = analytic_greeks(input);
        self.validate(&greeks, input)?;
        Ok(greeks)
    }

    /// Reject greeks outside their mathematical range. Never clamps.
    pub fn validate(&self, greeks: &Greeks, input: &PricingInput) -> Result<(), PricingError> {
        let violation = |greek: &'static str, value: f64| {
            let context = input.describe();
            error!(greek, value, inputs = %context, "greeks range violation");
            Err(PricingError::GreeksRangeViolation {
                greek,
                value,
                context,
            })
        };

        for (greek, value) in greeks.fields() {
            if !value.is_finite() {
                return violation(greek, value);
            }
        }
        let delta_ok = match input.kind {
            OptionKind::Call => (0.0..=1.0).contains(&greeks.delta),
            OptionKind::Put => (-1.0..=0.0).contains(&greeks.delta),
        };
        if !delta_ok {
            return violation("delta", greeks.delta);
        }
        if greeks.gamma < 0.0 {
            return violation("gamma", greeks.gamma);
        }
        if greeks.vega < 0.0 {
            return violation("vega", greeks.vega);
        }
        Ok(())
    }
}

fn analytic_greeks(input: &PricingInput) -> Greeks {
    if input.is_expired() {
        let delta = match (input.kind, input.intrinsic() > 0.0) {
            (OptionKind::Call, true) => 1.0,
            (OptionKind::Put, true) => -1.0,
            _ => 0.0,
        };
        return Greeks {
            delta,
            ..Greeks::zero()
        };
    }

    let s = input.spot;
    let k = input.strike;
    let r = input.risk_free_rate;
    let q = input.dividend_yield;
    let sigma = input.volatility;
    let t = input.time_to_expiry;
    let sqrt_t = t.sqrt();

    let (d1, d2) = d1_d2(input);
    let disc = (-r * t).exp();
    let div_disc = (-q * t).exp();
    let pdf_d1 = norm_pdf(d1);

    let delta = match input.kind {
        OptionKind::Call => div_disc * norm_cdf(d1),
        OptionKind::Put => div_disc * (norm_cdf(d1) - 1.0),
    };

    let gamma = div_disc * pdf_d1 / (s * sigma * sqrt_t);

    let theta_common = -(s * div_disc * pdf_d1 * sigma) / (2.0 * sqrt_t);
    let theta = match input.kind {
        OptionKind::Call => {
            theta_common - r * k * disc * norm_cdf(d2) + q * s * div_disc * norm_cdf(d1)
        }
        OptionKind::Put => {
            theta_common + r * k * disc * norm_cdf(-d2) - q * s * div_disc * norm_cdf(-d1)
        }
    };

    let vega = s * div_disc * pdf_d1 * sqrt_t;

    let rho = match input.kind {
        OptionKind::Call => k * t * disc * norm_cdf(d2),
        OptionKind::Put => -k * t * disc * norm_cdf(-d2),
    };

    Greeks {
        delta,
        gamma,
        // per calendar day
        theta: theta / 365.0,
        // per 1 % vol move
        vega: vega / 100.0,
        rho: rho / 100.0,
    }
}

/// Central finite differences of [`black_scholes_price`], in the same units
/// as the analytic greeks.
pub fn numerical_greeks(input: &PricingInput) -> Result<Greeks, PricingError> {
    input.validate()?;
    if input.is_expired() {
        return Ok(analytic_greeks(input));
    }
    let price = |i: PricingInput| black_scholes_price(&i);
    let base = price(*input)?;

    let ds = input.spot * 1e-4;
    let up = price(input.with_spot(input.spot + ds))?;
    let down = price(input.with_spot(input.spot - ds))?;
    let delta = (up - down) / (2.0 * ds);
    let gamma = (up - 2.0 * base + down) / (ds * ds);

    let dv = 1e-4_f64.min(0.5 * input.volatility);
    let vega = (price(input.with_volatility(input.volatility + dv))?
        - price(input.with_volatility(input.volatility - dv))?)
        / (2.0 * dv);

    let dr = 1e-4;
    let rho = (price(input.with_risk_free_rate(input.risk_free_rate + dr))?
        - price(input.with_risk_free_rate(input.risk_free_rate - dr))?)
        / (2.0 * dr);

    // calendar theta is minus the sensitivity to time to expiry
    let t = input.time_to_expiry;
    let dt = 1e-5_f64.min(0.5 * t);
    let theta = -(price(input.with_time_to_expiry(t + dt))?
        - price(input.with_time_to_expiry(t - dt))?)
        / (2.0 * dt);

    Ok(Greeks {
        delta,
        gamma,
        theta: theta / 365.0,
        vega: vega / 100.0,
        rho: rho / 100.0,
    })
}

/// Analytic versus numerical comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksConsistency {
    pub analytic: Greeks,
    pub numerical: Greeks,
    /// Greek with the largest relative discrepancy.
    pub worst_greek: String,
    pub max_relative_error: f64,
    pub consistent: bool,
}

/// Compare analytic and numerical greeks; a greek matches when
/// `|a - n| <= tolerance * max(1, |a|)`.
pub fn cross_check(input: &PricingInput, tolerance: f64) -> Result<GreeksConsistency, PricingError> {
    let analytic = GreeksCalculator::new().calculate(input)?;
    let numerical = numerical_greeks(input)?;

    let mut worst_greek = "delta";
    let mut max_relative_error = 0.0;
    for ((name, a), (_, n)) in analytic.fields().into_iter().zip(numerical.fields()) {
        let err = (a - n).abs() / a.abs().max(1.0);
        if err > max_relative_error {
            max_relative_error = err;
            worst_greek = name;
        }
    }

    Ok(GreeksConsistency {
        analytic,
        numerical,
        worst_greek: worst_greek.to_string(),
        max_relative_error,
        consistent: max_relative_error <= tolerance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(input: &PricingInput) -> Greeks {
        GreeksCalculator::new().calculate(input).unwrap()
    }

    #[test]
    fn test_reference_delta() {
        let input = PricingInput::new(100.0, 100.0, 1.0, 0.05, 0.2, OptionKind::Call);
        let g = calc(&input);
        assert!((g.delta - 0.6368).abs() < 1e-4, "delta = {}", g.delta);
        assert!(g.theta < 0.0);
        assert!(g.rho > 0.0);
    }

    #[test]
    fn test_bounds_hold_on_grid() {
        for kind in [OptionKind::Call, OptionKind::Put] {
            for &spot in &[20.0, 80.0, 100.0, 125.0, 400.0] {
                for &t in &[1e-4, 0.1, 1.0, 5.0] {
                    for &sigma in &[0.01, 0.25, 2.0] {
                        let input = PricingInput::new(spot, 100.0, t, 0.05, sigma, kind)
                            .with_dividend_yield(0.01);
                        let g = calc(&input);
                        assert!((-1.0..=1.0).contains(&g.delta));
                        assert!(g.gamma >= 0.0);
                        assert!(g.vega >= 0.0);
                        match kind {
                            OptionKind::Call => assert!(g.delta >= 0.0),
                            OptionKind::Put => assert!(g.delta <= 0.0),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_call_put_delta_gap_is_dividend_discount() {
        // call delta - put delta = e^{-qT}, which is 1 without dividends
        for q in [0.0, 0.03] {
            let call = PricingInput::new(105.0, 100.0, 0.5, 0.03, 0.3, OptionKind::Call).with_dividend_yield(q);
            let put = call.with_kind(OptionKind::Put);
            let gap = calc(&call).delta - calc(&put).delta;
            assert!((gap - (-q * 0.5_f64).exp()).abs() < 1e-12, "q = {q}, gap = {gap}");
        }
    }

    #[test]
    fn test_expiry_greeks() {
        let itm_call = PricingInput::new(110.0, 100.0, 0.0, 0.05, 0.2, OptionKind::Call);
        assert_eq!(calc(&itm_call).delta, 1.0);
        assert_eq!(calc(&itm_call).gamma, 0.0);
        let itm_put = itm_call.with_spot(90.0).with_kind(OptionKind::Put);
        assert_eq!(calc(&itm_put).delta, -1.0);
        let otm_put = itm_call.with_kind(OptionKind::Put);
        assert_eq!(calc(&otm_put), Greeks::zero());
    }

    #[test]
    fn test_validation_rejects_without_clamping() {
        let input = PricingInput::new(100.0, 100.0, 1.0, 0.05, 0.2, OptionKind::Call);
        let mut bad = calc(&input);
        bad.delta = 1.2;
        match GreeksCalculator::new().validate(&bad, &input) {
            Err(PricingError::GreeksRangeViolation { greek, value, context }) => {
                assert_eq!(greek, "delta");
                assert_eq!(value, 1.2);
                assert!(context.contains("S=100"));
            }
            other => panic!("expected violation, got {other:?}"),
        }
        bad = calc(&input);
        bad.gamma = -0.01;
        assert!(GreeksCalculator::new().validate(&bad, &input).is_err());
        bad = calc(&input);
        bad.vega = f64::NAN;
        assert!(GreeksCalculator::new().validate(&bad, &input).is_err());
    }

    #[test]
    fn test_cross_check_agrees() {
        for kind in [OptionKind::Call, OptionKind::Put] {
            let input = PricingInput::new(95.0, 100.0, 0.75, 0.04, 0.3, kind).with_dividend_yield(0.02);
            let report = cross_check(&input, 1e-4).unwrap();
            assert!(
                report.consistent,
                "{kind}: worst {} error {}",
                report.worst_greek, report.max_relative_error
            );
        }
    }

    #[test]
    fn test_scaled_sum() {
        let input = PricingInput::new(100.0, 100.0, 1.0, 0.05, 0.2, OptionKind::Call);
        let g = calc(&input);
        let total: Greeks = vec![g.scaled(2.0), g.scaled(-1.0)].into_iter().sum();
        assert!((total.delta - g.delta).abs() < 1e-15);
        assert!((total.vega - g.vega).abs() < 1e-15);
    }
}

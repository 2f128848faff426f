//! Implied volatility: Newton-Raphson on Black-Scholes vega with a bisection
//! fallback.

use tracing::debug;

use tb_types::{OptionKind, PricingError};

use crate::pricing::{black_scholes_price, d1_d2, norm_pdf, PricingInput};

const NEWTON_START: f64 = 0.5;
const NEWTON_MAX_ITER: usize = 100;
const PRICE_TOLERANCE: f64 = 1e-10;
const MIN_VEGA: f64 = 1e-12;
const VOL_LOWER: f64 = 1e-4;
const VOL_UPPER: f64 = 5.0;
const BISECTION_MAX_ITER: usize = 200;

/// Raw vega (per unit of volatility).
fn raw_vega(input: &PricingInput) -> f64 {
    let (d1, _) = d1_d2(input);
    input.spot * (-input.dividend_yield * input.time_to_expiry).exp()
        * norm_pdf(d1)
        * input.time_to_expiry.sqrt()
}

/// Volatility that reproduces `market_price` under Black-Scholes.
pub fn implied_volatility(
    market_price: f64,
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    risk_free_rate: f64,
    kind: OptionKind,
) -> Result<f64, PricingError> {
    implied_volatility_with_dividend(
        market_price,
        &PricingInput::new(spot, strike, time_to_expiry, risk_free_rate, NEWTON_START, kind),
    )
}

/// Same as [`implied_volatility`], taking every input but the volatility
/// (and any dividend yield) from `input`.
pub fn implied_volatility_with_dividend(
    market_price: f64,
    input: &PricingInput,
) -> Result<f64, PricingError> {
    if !market_price.is_finite() || market_price <= 0.0 {
        return Err(PricingError::invalid(
            "market_price",
            market_price,
            "must be positive and finite",
        ));
    }
    if input.time_to_expiry <= 0.0 {
        return Err(PricingError::invalid(
            "time_to_expiry",
            input.time_to_expiry,
            "implied volatility needs time to expiry",
        ));
    }
    let start = input.with_volatility(NEWTON_START);
    start.validate()?;

    let context = || format!("market_price={} {}", market_price, start.describe());

    // Newton-Raphson
    let mut sigma = NEWTON_START;
    for iteration in 0..NEWTON_MAX_ITER {
        let trial = start.with_volatility(sigma);
        let diff = black_scholes_price(&trial)? - market_price;
        if diff.abs() < PRICE_TOLERANCE {
            return Ok(sigma);
        }
        let vega = raw_vega(&trial);
        if vega < MIN_VEGA {
            debug!(iteration, sigma, vega, "newton stalled on vega, bisecting");
            break;
        }
        let next = sigma - diff / vega;
        if !next.is_finite() || !(VOL_LOWER..=VOL_UPPER).contains(&next) {
            debug!(iteration, next, "newton left the bracket, bisecting");
            break;
        }
        sigma = next;
    }

    // Bisection
    let price_at = |vol: f64| black_scholes_price(&start.with_volatility(vol)).map(|p| p - market_price);
    let mut lo = VOL_LOWER;
    let mut hi = VOL_UPPER;
    let f_lo = price_at(lo)?;
    let f_hi = price_at(hi)?;
    if f_lo.abs() < PRICE_TOLERANCE {
        return Ok(lo);
    }
    if f_hi.abs() < PRICE_TOLERANCE {
        return Ok(hi);
    }
    if f_lo > 0.0 || f_hi < 0.0 {
        return Err(PricingError::Convergence {
            method: "bisection",
            last_estimate: sigma,
            iterations: 0,
            context: format!(
                "price not bracketed by [{VOL_LOWER}, {VOL_UPPER}] (model range {} to {}): {}",
                f_lo + market_price,
                f_hi + market_price,
                context()
            ),
        });
    }

    let mut mid = 0.5 * (lo + hi);
    for _ in 0..BISECTION_MAX_ITER {
        mid = 0.5 * (lo + hi);
        let f_mid = price_at(mid)?;
        if f_mid.abs() < PRICE_TOLERANCE || 0.5 * (hi - lo) < 1e-14 {
            return Ok(mid);
        }
        if f_mid > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    Err(PricingError::Convergence {
        method: "bisection",
        last_estimate: mid,
        iterations: BISECTION_MAX_ITER,
        context: context(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_grid() {
        for kind in [OptionKind::Call, OptionKind::Put] {
            for &strike in &[70.0, 95.0, 100.0, 110.0, 140.0] {
                for &t in &[0.1, 0.5, 2.0] {
                    for &sigma in &[0.1, 0.3, 0.9] {
                        let input = PricingInput::new(100.0, strike, t, 0.04, sigma, kind);
                        let price = black_scholes_price(&input).unwrap();
                        if price < 1e-4 || raw_vega(&input) < 1e-2 {
                            continue;
                        }
                        let iv = implied_volatility(price, 100.0, strike, t, 0.04, kind).unwrap();
                        assert!(
                            (iv - sigma).abs() < 1e-4,
                            "{kind} K={strike} T={t}: sigma={sigma} iv={iv}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_deep_otm_round_trip() {
        let input = PricingInput::new(100.0, 300.0, 0.25, 0.01, 0.6, OptionKind::Call);
        let price = black_scholes_price(&input).unwrap();
        let iv = implied_volatility(price, 100.0, 300.0, 0.25, 0.01, OptionKind::Call).unwrap();
        assert!(iv > 0.0);
        let repriced = black_scholes_price(&input.with_volatility(iv)).unwrap();
        assert!((repriced - price).abs() < 1e-8);
    }

    #[test]
    fn test_price_above_upper_bound_fails_to_converge() {
        let err = implied_volatility(150.0, 100.0, 100.0, 1.0, 0.05, OptionKind::Call).unwrap_err();
        match err {
            PricingError::Convergence {
                method, context, ..
            } => {
                assert_eq!(method, "bisection");
                assert!(context.contains("market_price=150"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_price_below_intrinsic_fails() {
        let result = implied_volatility(1.0, 120.0, 100.0, 1.0, 0.05, OptionKind::Call);
        assert!(matches!(result, Err(PricingError::Convergence { .. })));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            implied_volatility(0.0, 100.0, 100.0, 1.0, 0.05, OptionKind::Call),
            Err(PricingError::InvalidParameter { name: "market_price", .. })
        ));
        assert!(matches!(
            implied_volatility(5.0, 100.0, 100.0, 0.0, 0.05, OptionKind::Call),
            Err(PricingError::InvalidParameter { name: "time_to_expiry", .. })
        ));
    }

    #[test]
    fn test_dividend_variant() {
        let input = PricingInput::new(100.0, 100.0, 1.0, 0.05, 0.35, OptionKind::Put).with_dividend_yield(0.03);
        let price = black_scholes_price(&input).unwrap();
        let iv = implied_volatility_with_dividend(price, &input).unwrap();
        assert!((iv - 0.35).abs() < 1e-6);
    }
}

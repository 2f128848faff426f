//! Implied volatility surface over (strike, expiry) built from a chain
//! snapshot, with bilinear interpolation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tb_types::{OptionContract, VolatilityError, SECONDS_PER_YEAR};

use crate::chain::ChainSnapshot;
use crate::implied::implied_volatility_with_dividend;
use crate::pricing::PricingInput;

/// Interpolated volatility and whether the request fell outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub volatility: f64,
    pub extrapolated: bool,
}

/// IV grid: rows are expiries, columns are strikes, both ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySurface {
    pub as_of: DateTime<Utc>,
    pub underlying_price: f64,
    pub strikes: Vec<f64>,
    pub expiries: Vec<DateTime<Utc>>,
    /// Year fractions of `expiries` measured from `as_of`.
    pub times: Vec<f64>,
    pub values: Vec<Vec<Option<f64>>>,
}

/// Implied volatility for a quoted contract: the venue's IV when present,
/// otherwise solved from the quote mid.
pub fn quote_volatility(contract: &OptionContract, chain: &ChainSnapshot) -> Option<f64> {
    if let Some(iv) = contract.quoted_volatility() {
        if iv.is_finite() && iv > 0.0 {
            return Some(iv);
        }
    }
    let mid = contract.mid_price()?.to_f64()?;
    let input = PricingInput::new(
        chain.underlying_price_f64()?,
        contract.strike.to_f64()?,
        contract.time_to_expiry(chain.as_of),
        chain.risk_free_rate,
        0.5,
        contract.kind,
    )
    .with_dividend_yield(chain.dividend_yield);
    match implied_volatility_with_dividend(mid, &input) {
        Ok(iv) => Some(iv),
        Err(err) => {
            debug!(contract = %contract, error = %err, "skipping quote without solvable IV");
            None
        }
    }
}

impl VolatilitySurface {
    /// Group quotes by (strike, expiry); quotes sharing a cell are averaged.
    pub fn from_chain(chain: &ChainSnapshot) -> Result<Self, VolatilityError> {
        let underlying_price = chain
            .underlying_price_f64()
            .filter(|s| *s > 0.0)
            .ok_or_else(|| VolatilityError::InvalidParameter {
                name: "underlying_price",
                value: chain.underlying_price_f64().unwrap_or(f64::NAN),
                reason: "must be positive".to_string(),
            })?;

        let mut cells: BTreeMap<(DateTime<Utc>, Decimal), (f64, usize)> = BTreeMap::new();
        for contract in &chain.contracts {
            if contract.expiration <= chain.as_of {
                continue;
            }
            if let Some(iv) = quote_volatility(contract, chain) {
                let cell = cells
                    .entry((contract.expiration, contract.strike))
                    .or_insert((0.0, 0));
                cell.0 += iv;
                cell.1 += 1;
            }
        }
        if cells.is_empty() {
            return Err(VolatilityError::InsufficientData {
                message: format!(
                    "no usable quotes among {} contracts of {}",
                    chain.contracts.len(),
                    chain.underlying
                ),
            });
        }

        let mut expiries: Vec<DateTime<Utc>> = cells.keys().map(|(e, _)| *e).collect();
        expiries.dedup();
        let mut strike_keys: Vec<Decimal> = cells.keys().map(|(_, k)| *k).collect();
        strike_keys.sort();
        strike_keys.dedup();

        let mut values = vec![vec![None; strike_keys.len()]; expiries.len()];
        for ((expiry, strike), (sum, count)) in &cells {
            // both keys were collected from `cells`
            if let (Ok(row), Ok(col)) = (
                expiries.binary_search(expiry),
                strike_keys.binary_search(strike),
            ) {
                values[row][col] = Some(sum / *count as f64);
            }
        }

        let strikes = strike_keys
            .iter()
            .map(|k| k.to_f64().unwrap_or(f64::NAN))
            .collect();
        let times = expiries
            .iter()
            .map(|e| (*e - chain.as_of).num_seconds() as f64 / SECONDS_PER_YEAR)
            .collect();

        Ok(Self {
            as_of: chain.as_of,
            underlying_price,
            strikes,
            expiries,
            times,
            values,
        })
    }

    pub fn cell(&self, expiry_index: usize, strike_index: usize) -> Option<f64> {
        self.values
            .get(expiry_index)
            .and_then(|row| row.get(strike_index))
            .copied()
            .flatten()
    }

    pub fn populated_cells(&self) -> usize {
        self.values.iter().flatten().filter(|v| v.is_some()).count()
    }

    /// Interpolate at `strike` and the year fraction of `expiry`.
    pub fn interpolate(&self, strike: f64, expiry: DateTime<Utc>) -> Result<SurfacePoint, VolatilityError> {
        let t = (expiry - self.as_of).num_seconds() as f64 / SECONDS_PER_YEAR;
        self.interpolate_years(strike, t)
    }

    /// Bilinear in strike and year fraction. Requests outside the grid are
    /// clamped to the nearest edge and flagged; unset corners are dropped
    /// and the remaining weights renormalised.
    pub fn interpolate_years(&self, strike: f64, t: f64) -> Result<SurfacePoint, VolatilityError> {
        if !strike.is_finite() || !t.is_finite() {
            return Err(VolatilityError::InvalidParameter {
                name: if strike.is_finite() { "time_to_expiry" } else { "strike" },
                value: if strike.is_finite() { t } else { strike },
                reason: "must be finite".to_string(),
            });
        }

        let (s0, s1, ws, strike_clamped) = bracket(&self.strikes, strike);
        let (e0, e1, we, time_clamped) = bracket(&self.times, t);

        let corners = [
            (e0, s0, (1.0 - we) * (1.0 - ws)),
            (e0, s1, (1.0 - we) * ws),
            (e1, s0, we * (1.0 - ws)),
            (e1, s1, we * ws),
        ];

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut set = Vec::with_capacity(4);
        for (e, s, w) in corners {
            if let Some(v) = self.cell(e, s) {
                weighted += w * v;
                total_weight += w;
                set.push(v);
            }
        }
        if set.is_empty() {
            return Err(VolatilityError::InsufficientData {
                message: format!("all surface corners unset around strike={strike} t={t}"),
            });
        }

        // set corners that all carry zero weight: plain average
        let volatility = if total_weight > 1e-12 {
            weighted / total_weight
        } else {
            set.iter().sum::<f64>() / set.len() as f64
        };

        let extrapolated = strike_clamped || time_clamped;
        if extrapolated {
            warn!(strike, t, volatility, "surface request clamped to grid edge");
        }
        Ok(SurfacePoint {
            volatility,
            extrapolated,
        })
    }
}

/// Neighbouring indices of `x` on an ascending axis, the weight of the upper
/// one, and whether `x` had to be clamped.
fn bracket(axis: &[f64], x: f64) -> (usize, usize, f64, bool) {
    let last = axis.len().saturating_sub(1);
    if axis.is_empty() || x <= axis[0] {
        let clamped = axis.first().map(|a| x < *a).unwrap_or(true);
        return (0, 0, 0.0, clamped);
    }
    if x >= axis[last] {
        return (last, last, 0.0, x > axis[last]);
    }
    let upper = axis.partition_point(|a| *a <= x);
    let lower = upper - 1;
    let span = axis[upper] - axis[lower];
    let w = if span > 0.0 { (x - axis[lower]) / span } else { 0.0 };
    (lower, upper, w, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tb_types::{OptionKind, OptionQuote, Symbol};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn quoted(kind: OptionKind, strike: Decimal, days: i64, iv: Option<f64>) -> OptionContract {
        let contract = OptionContract::european(
            Symbol::crypto("BTC"),
            kind,
            strike,
            as_of() + Duration::days(days),
        );
        let mut quote = OptionQuote::new(as_of());
        if let Some(iv) = iv {
            quote = quote.with_implied_volatility(iv);
        }
        contract.with_quote(quote)
    }

    fn chain(contracts: Vec<OptionContract>) -> ChainSnapshot {
        ChainSnapshot::new(Symbol::crypto("BTC"), dec!(100), 0.0, as_of()).with_contracts(contracts)
    }

    fn grid() -> VolatilitySurface {
        VolatilitySurface::from_chain(&chain(vec![
            quoted(OptionKind::Call, dec!(90), 30, Some(0.30)),
            quoted(OptionKind::Call, dec!(110), 30, Some(0.50)),
            quoted(OptionKind::Call, dec!(90), 60, Some(0.40)),
            quoted(OptionKind::Call, dec!(110), 60, Some(0.60)),
        ]))
        .unwrap()
    }

    #[test]
    fn test_grid_shape() {
        let surface = grid();
        assert_eq!(surface.strikes, vec![90.0, 110.0]);
        assert_eq!(surface.expiries.len(), 2);
        assert_eq!(surface.populated_cells(), 4);
    }

    #[test]
    fn test_bilinear_center() {
        let surface = grid();
        let t_mid = 0.5 * (surface.times[0] + surface.times[1]);
        let point = surface.interpolate_years(100.0, t_mid).unwrap();
        assert!((point.volatility - 0.45).abs() < 1e-12);
        assert!(!point.extrapolated);
    }

    #[test]
    fn test_node_values_are_exact() {
        let surface = grid();
        let point = surface.interpolate(110.0, as_of() + Duration::days(60)).unwrap();
        assert!((point.volatility - 0.60).abs() < 1e-12);
        assert!(!point.extrapolated);
    }

    #[test]
    fn test_clamps_outside_hull() {
        let surface = grid();
        let point = surface.interpolate(200.0, as_of() + Duration::days(400)).unwrap();
        assert!((point.volatility - 0.60).abs() < 1e-12);
        assert!(point.extrapolated);
    }

    #[test]
    fn test_missing_corner_renormalises() {
        let surface = VolatilitySurface::from_chain(&chain(vec![
            quoted(OptionKind::Call, dec!(90), 30, Some(0.30)),
            quoted(OptionKind::Call, dec!(110), 30, Some(0.50)),
            quoted(OptionKind::Call, dec!(90), 60, Some(0.40)),
        ]))
        .unwrap();
        let t_mid = 0.5 * (surface.times[0] + surface.times[1]);
        let point = surface.interpolate_years(100.0, t_mid).unwrap();
        assert!((point.volatility - 0.40).abs() < 1e-12, "{}", point.volatility);
    }

    #[test]
    fn test_call_and_put_average_on_one_cell() {
        let surface = VolatilitySurface::from_chain(&chain(vec![
            quoted(OptionKind::Call, dec!(100), 30, Some(0.30)),
            quoted(OptionKind::Put, dec!(100), 30, Some(0.34)),
        ]))
        .unwrap();
        assert!((surface.cell(0, 0).unwrap() - 0.32).abs() < 1e-12);
    }

    #[test]
    fn test_iv_solved_from_mid() {
        let synthetic = crate::chain::SyntheticChain::new(
            Symbol::crypto("BTC"),
            vec![as_of() + Duration::days(45)],
            100.0,
            0.7,
        )
        .with_strikes(5, 10.0)
        .without_quoted_volatility()
        .build(as_of())
        .unwrap();
        let surface = VolatilitySurface::from_chain(&synthetic).unwrap();
        let point = surface.interpolate(100.0, as_of() + Duration::days(45)).unwrap();
        assert!((point.volatility - 0.7).abs() < 1e-4, "{}", point.volatility);
    }

    #[test]
    fn test_all_corners_unset() {
        let surface = VolatilitySurface {
            as_of: as_of(),
            underlying_price: 100.0,
            strikes: vec![90.0, 110.0],
            expiries: vec![as_of() + Duration::days(30)],
            times: vec![30.0 / 365.25],
            values: vec![vec![None, None]],
        };
        assert!(matches!(
            surface.interpolate_years(100.0, 0.08),
            Err(VolatilityError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_no_usable_quotes() {
        let unquoted = OptionContract::european(
            Symbol::crypto("BTC"),
            OptionKind::Call,
            dec!(100),
            as_of() + Duration::days(30),
        );
        assert!(matches!(
            VolatilitySurface::from_chain(&chain(vec![unquoted])),
            Err(VolatilityError::InsufficientData { .. })
        ));
    }
}

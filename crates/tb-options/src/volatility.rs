//! Historical volatility estimators, term structure, and the
//! `VolatilityAnalyzer` facade over surfaces and GARCH forecasts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tb_types::VolatilityError;

use crate::chain::ChainSnapshot;
use crate::garch::{fit_and_forecast, GarchForecast};
use crate::surface::VolatilitySurface;

/// Trading days per year used to annualise daily return volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Log returns of consecutive prices. Every price must be positive.
pub fn log_returns(prices: &[f64]) -> Result<Vec<f64>, VolatilityError> {
    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(VolatilityError::InvalidParameter {
            name: "price",
            value: *bad,
            reason: "prices must be positive and finite".to_string(),
        });
    }
    Ok(prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// One point of the ATM term structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStructurePoint {
    pub expiry: DateTime<Utc>,
    pub time_to_expiry: f64,
    pub atm_volatility: f64,
    /// The underlying price lay outside the quoted strikes of this expiry.
    pub extrapolated: bool,
}

/// Volatility estimation entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAnalyzer {
    pub annualization_factor: f64,
}

impl Default for VolatilityAnalyzer {
    fn default() -> Self {
        Self {
            annualization_factor: TRADING_DAYS_PER_YEAR,
        }
    }
}

impl VolatilityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annualization_factor(mut self, factor: f64) -> Self {
        self.annualization_factor = factor;
        self
    }

    fn check_window(&self, prices: &[f64], window: usize) -> Result<(), VolatilityError> {
        if window < 2 || prices.len() <= window {
            return Err(VolatilityError::InsufficientData {
                message: format!(
                    "historical volatility needs window >= 2 and more than window prices, got window={} prices={}",
                    window,
                    prices.len()
                ),
            });
        }
        Ok(())
    }

    /// Annualised sample standard deviation of the trailing `window` log
    /// returns.
    pub fn historical_volatility(&self, prices: &[f64], window: usize) -> Result<f64, VolatilityError> {
        self.check_window(prices, window)?;
        let returns = log_returns(prices)?;
        let trailing = &returns[returns.len() - window..];
        Ok(sample_std(trailing) * self.annualization_factor.sqrt())
    }

    /// One estimate per trailing window, oldest first. Element `i` covers
    /// returns `i..i + window`.
    pub fn rolling_historical_volatility(
        &self,
        prices: &[f64],
        window: usize,
    ) -> Result<Vec<f64>, VolatilityError> {
        self.check_window(prices, window)?;
        let returns = log_returns(prices)?;
        let scale = self.annualization_factor.sqrt();
        Ok(returns
            .windows(window)
            .map(|w| sample_std(w) * scale)
            .collect())
    }

    pub fn build_volatility_surface(
        &self,
        chain: &ChainSnapshot,
    ) -> Result<VolatilitySurface, VolatilityError> {
        VolatilitySurface::from_chain(chain)
    }

    /// ATM implied volatility per expiry, ascending by expiry.
    pub fn term_structure(
        &self,
        chain: &ChainSnapshot,
    ) -> Result<Vec<TermStructurePoint>, VolatilityError> {
        let surface = self.build_volatility_surface(chain)?;
        let spot = surface.underlying_price;

        let mut points = Vec::with_capacity(surface.expiries.len());
        for (row, expiry) in surface.expiries.iter().enumerate() {
            let quoted: Vec<(f64, f64)> = surface
                .strikes
                .iter()
                .enumerate()
                .filter_map(|(col, strike)| surface.cell(row, col).map(|iv| (*strike, iv)))
                .collect();
            let Some((atm_volatility, extrapolated)) = interpolate_linear(&quoted, spot) else {
                continue;
            };
            points.push(TermStructurePoint {
                expiry: *expiry,
                time_to_expiry: surface.times[row],
                atm_volatility,
                extrapolated,
            });
        }
        Ok(points)
    }

    /// GARCH(1,1) forecast of `horizon` forward daily volatilities.
    pub fn garch_forecast(&self, returns: &[f64], horizon: usize) -> Result<GarchForecast, VolatilityError> {
        fit_and_forecast(returns, horizon)
    }
}

/// Linear interpolation over ascending `(x, y)` pairs, clamped at the ends.
fn interpolate_linear(points: &[(f64, f64)], x: f64) -> Option<(f64, bool)> {
    let first = points.first()?;
    let last = points.last()?;
    if x <= first.0 {
        return Some((first.1, x < first.0));
    }
    if x >= last.0 {
        return Some((last.1, x > last.0));
    }
    let upper = points.partition_point(|(px, _)| *px <= x);
    let (x0, y0) = points[upper - 1];
    let (x1, y1) = points[upper];
    Some((y0 + (y1 - y0) * (x - x0) / (x1 - x0), false))
}

//! Everything a run reads, fetched up front so the day loop never awaits.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included, Unbounded};

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use tb_data::{contract_instrument, HistoricalDataProvider};
use tb_options::VolatilitySurface;
use tb_types::{
    BacktestConfig, DataError, OptionContract, SeriesPoint, Strategy, StrategyError, Symbol,
    TbResult,
};

/// Read-only market inputs of one underlying, shared between runs.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub underlying: Symbol,
    closes: BTreeMap<NaiveDate, Decimal>,
    underlying_iv: BTreeMap<NaiveDate, f64>,
    contract_iv: HashMap<String, BTreeMap<NaiveDate, f64>>,
    surfaces: BTreeMap<NaiveDate, VolatilitySurface>,
}

fn usable_vol(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl MarketData {
    pub fn new(underlying: Symbol) -> Self {
        Self {
            underlying,
            closes: BTreeMap::new(),
            underlying_iv: BTreeMap::new(),
            contract_iv: HashMap::new(),
            surfaces: BTreeMap::new(),
        }
    }

    /// Closes and, where present, implied volatilities of the underlying.
    pub fn with_underlying_series(mut self, points: &[SeriesPoint]) -> Self {
        for point in points {
            self.closes.insert(point.date, point.close);
            if let Some(iv) = point.implied_volatility.filter(|v| usable_vol(*v)) {
                self.underlying_iv.insert(point.date, iv);
            }
        }
        self
    }

    pub fn with_contract_series(mut self, contract: &OptionContract, points: &[SeriesPoint]) -> Self {
        let series: BTreeMap<NaiveDate, f64> = points
            .iter()
            .filter_map(|p| p.implied_volatility.filter(|v| usable_vol(*v)).map(|iv| (p.date, iv)))
            .collect();
        if !series.is_empty() {
            self.contract_iv.insert(contract_instrument(contract), series);
        }
        self
    }

    pub fn with_surface(mut self, date: NaiveDate, surface: VolatilitySurface) -> Self {
        self.surfaces.insert(date, surface);
        self
    }

    /// Fetch the underlying (with enough lookback for historical
    /// volatility), each leg's own series, and the chain history.
    pub async fn load(
        provider: &dyn HistoricalDataProvider,
        strategy: &Strategy,
        config: &BacktestConfig,
    ) -> TbResult<Self> {
        let underlying = strategy
            .underlying()
            .cloned()
            .ok_or_else(|| StrategyError::invalid(strategy.kind.to_string(), "strategy has no legs"))?;
        let lookback = config.volatility.historical_window as i64 * 2 + 10;
        let history_start = config.start_date - Duration::days(lookback);

        info!(
            "Loading market data for {} from {} ({} source)",
            underlying.symbol,
            history_start,
            provider.name()
        );
        let points = provider
            .get_series(&underlying.symbol, history_start, config.end_date)
            .await?;
        let mut data = Self::new(underlying.clone()).with_underlying_series(&points);

        for leg in &strategy.legs {
            let instrument = contract_instrument(&leg.contract);
            match provider
                .get_series(&instrument, config.start_date, config.end_date)
                .await
            {
                Ok(points) => {
                    debug!(instrument = %instrument, points = points.len(), "loaded contract series");
                    data = data.with_contract_series(&leg.contract, &points);
                }
                Err(e) => debug!(instrument = %instrument, "no contract series: {}", e),
            }
        }

        let chains = provider
            .get_chain_history(&underlying, config.start_date, config.end_date)
            .await?;
        for chain in &chains {
            let date = chain.as_of.date_naive();
            match VolatilitySurface::from_chain(chain) {
                Ok(surface) => data = data.with_surface(date, surface),
                Err(e) => warn!("Skipping volatility surface for {}: {}", date, e),
            }
        }

        info!(
            "Loaded {} closes, {} contract series, {} surfaces for {}",
            data.closes.len(),
            data.contract_iv.len(),
            data.surfaces.len(),
            underlying.symbol
        );
        Ok(data)
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.closes.get(&date).copied()
    }

    pub fn last_close_before(&self, date: NaiveDate) -> Option<(NaiveDate, Decimal)> {
        self.closes
            .range(..date)
            .next_back()
            .map(|(d, c)| (*d, *c))
    }

    pub fn first_close_after(&self, date: NaiveDate) -> Option<(NaiveDate, Decimal)> {
        self.closes
            .range((Excluded(date), Unbounded))
            .next()
            .map(|(d, c)| (*d, *c))
    }

    /// Closes on or before `date`, oldest first.
    pub fn closes_through(&self, date: NaiveDate) -> Vec<f64> {
        self.closes
            .range(..=date)
            .filter_map(|(_, c)| c.to_f64())
            .collect()
    }

    pub fn has_closes_between(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.closes.range(start..=end).next().is_some()
    }

    pub fn underlying_iv_on(&self, date: NaiveDate) -> Option<f64> {
        self.underlying_iv.get(&date).copied()
    }

    pub fn contract_iv_on(&self, contract: &OptionContract, date: NaiveDate) -> Option<f64> {
        self.contract_iv
            .get(&contract_instrument(contract))
            .and_then(|series| series.get(&date).copied())
    }

    pub fn surface_on(&self, date: NaiveDate) -> Option<&VolatilitySurface> {
        self.surfaces.get(&date)
    }

    /// First implied volatility observed after `date` for the contract,
    /// else for the underlying.
    pub fn first_iv_after(&self, contract: &OptionContract, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        let later = |series: &BTreeMap<NaiveDate, f64>| {
            series
                .range((Excluded(date), Unbounded))
                .next()
                .map(|(d, v)| (*d, *v))
        };
        self.contract_iv
            .get(&contract_instrument(contract))
            .and_then(later)
            .or_else(|| later(&self.underlying_iv))
    }

    /// Whether any volatility source could price `contract` in
    /// `[start, end]`.
    pub fn has_volatility_source(
        &self,
        contract: &OptionContract,
        start: NaiveDate,
        end: NaiveDate,
        historical_window: Option<usize>,
    ) -> bool {
        let range = (Included(start), Included(end));
        let contract_series = self
            .contract_iv
            .get(&contract_instrument(contract))
            .is_some_and(|s| s.range(range).next().is_some());
        let surfaces = self.surfaces.range(range).next().is_some();
        let series = self.underlying_iv.range(range).next().is_some();
        let historical = historical_window.is_some_and(|w| self.closes.range(..=start).count() > w);
        contract_series || surfaces || series || historical
    }

    /// Fails when no close falls inside `[start, end]`.
    pub fn require_prices(&self, start: NaiveDate, end: NaiveDate) -> TbResult<()> {
        if self.has_closes_between(start, end) {
            return Ok(());
        }
        Err(DataError::NoDataInRange {
            instrument: self.underlying.symbol.clone(),
            start: start.to_string(),
            end: end.to_string(),
        }
        .into())
    }
}

// Day-by-day replay of an options strategy.
// All market inputs come from a pre-loaded MarketData; nothing here awaits.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use tb_options::{validate_strategy, VolatilityAnalyzer};
use tb_types::{
    BacktestConfig, BacktestError, BacktestId, BacktestResult, DataError, DataQualityReport,
    ExerciseStyle, GapKind, OptionContract, Portfolio, Strategy, TbError, TbResult, TradeKind,
};

use crate::batch::CancellationToken;
use crate::execution::{leg_commission, net_entry_premium, settle_at_intrinsic, LegPricer};
use crate::market_data::MarketData;

/// Valuation instant of a simulated day.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Mutable state owned by a single run.
#[derive(Debug)]
struct RunState {
    portfolio: Portfolio,
    quality: DataQualityReport,
    /// Last volatility used per leg, for carry-forward.
    last_volatility: Vec<Option<f64>>,
    entry_premium: Decimal,
}

/// Replays one strategy over `[start_date, end_date]`.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    market_data: Arc<MarketData>,
    cancellation: CancellationToken,
    pricer: LegPricer,
    analyzer: VolatilityAnalyzer,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig, market_data: Arc<MarketData>) -> Self {
        let pricer = LegPricer::from_config(&config);
        Self {
            config,
            market_data,
            cancellation: CancellationToken::new(),
            pricer,
            analyzer: VolatilityAnalyzer::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run to a terminal status. Failures are reported on the result.
    pub fn run(&self, strategy: &Strategy) -> BacktestResult {
        let mut result = BacktestResult::new(self.config.clone(), strategy.name.clone());

        if let Err(e) = self.preflight(strategy) {
            error!("Backtest {} failed before start: {}", strategy.name, e);
            result.mark_failed(e.to_string());
            return result;
        }

        result.mark_started();
        info!(
            "Starting backtest {} for {} from {} to {}",
            result.id, strategy.name, self.config.start_date, self.config.end_date
        );

        let mut state = RunState {
            portfolio: Portfolio::new(result.id.to_string(), self.config.initial_capital),
            quality: DataQualityReport::default(),
            last_volatility: vec![None; strategy.legs.len()],
            entry_premium: Decimal::ZERO,
        };

        match self.simulate(result.id, strategy, &mut state) {
            Ok(()) => {
                info!(
                    "Backtest {} completed: final value {}, {} trades, {} data gaps",
                    result.id,
                    state.portfolio.total_value(),
                    state.portfolio.trades.len(),
                    state.quality.gaps.len()
                );
                result.mark_completed(state.portfolio, state.quality);
            }
            Err(TbError::Backtest(BacktestError::Canceled { date, .. })) => {
                info!("Backtest {} cancelled on {}", result.id, date);
                result.mark_cancelled(state.portfolio, state.quality);
            }
            Err(e) => {
                error!("Backtest {} failed: {}", result.id, e);
                result.mark_failed(e.to_string());
            }
        }
        result
    }

    fn preflight(&self, strategy: &Strategy) -> TbResult<()> {
        self.config.validate()?;
        let start = self.config.start_date;
        let end = self.config.end_date;
        validate_strategy(strategy, day_start(start))?;

        if strategy.underlying() != Some(&self.market_data.underlying) {
            return Err(BacktestError::InvalidConfig {
                message: format!(
                    "strategy underlying {} does not match market data for {}",
                    strategy.underlying().map(|s| s.symbol.as_str()).unwrap_or("<none>"),
                    self.market_data.underlying.symbol
                ),
            }
            .into());
        }
        self.market_data.require_prices(start, end)?;

        let window = self
            .config
            .volatility
            .use_historical_fallback
            .then_some(self.config.volatility.historical_window);
        for (index, leg) in strategy.legs.iter().enumerate() {
            if !self
                .market_data
                .has_volatility_source(&leg.contract, start, end, window)
            {
                return Err(BacktestError::NoData {
                    leg: index,
                    what: "volatility",
                    start: start.to_string(),
                    end: end.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn simulate(&self, id: BacktestId, strategy: &Strategy, state: &mut RunState) -> TbResult<()> {
        let mut date = self.config.start_date;
        while date <= self.config.end_date {
            if self.cancellation.is_cancelled() {
                return Err(BacktestError::Canceled {
                    backtest_id: id.to_string(),
                    date: date.to_string(),
                }
                .into());
            }

            let now = day_start(date);
            let spot = self.resolve_spot(date, &mut state.quality)?;

            if date == self.config.start_date {
                self.open_legs(strategy, spot, date, state)?;
            } else {
                self.reprice(spot, date, state)?;
            }
            self.settle(spot, now, state)?;
            self.apply_exit_rules(date, now, state)?;

            let stale = state.quality.is_stale_on(date);
            if stale {
                state.quality.stale_days += 1;
            }
            let row = state.portfolio.record_day(date, stale)?;
            debug!(
                %date, spot = %spot, value = %row.portfolio_value, pnl = %row.daily_pnl, stale,
                "day recorded"
            );

            date = date
                .succ_opt()
                .ok_or_else(|| tb_types::internal_error!("no calendar day after {}", date))?;
        }
        Ok(())
    }

    fn resolve_spot(&self, date: NaiveDate, quality: &mut DataQualityReport) -> TbResult<Decimal> {
        if let Some(close) = self.market_data.close_on(date) {
            return Ok(close);
        }
        if let Some((from, close)) = self.market_data.last_close_before(date) {
            warn!("No close on {}; carrying forward {} from {}", date, close, from);
            quality.record(
                date,
                None,
                GapKind::UnderlyingCarriedForward,
                format!("close {} from {}", close, from),
            );
            return Ok(close);
        }
        if let Some((from, close)) = self.market_data.first_close_after(date) {
            warn!("No close on or before {}; back-filling {} from {}", date, close, from);
            quality.record(
                date,
                None,
                GapKind::UnderlyingBackfilled,
                format!("close {} from {}", close, from),
            );
            return Ok(close);
        }
        Err(DataError::NoDataInRange {
            instrument: self.market_data.underlying.symbol.clone(),
            start: self.config.start_date.to_string(),
            end: self.config.end_date.to_string(),
        }
        .into())
    }

    /// Volatility for a leg on `date`, walking the sources in priority
    /// order and recording every substitution.
    fn resolve_volatility(
        &self,
        leg: usize,
        contract: &OptionContract,
        date: NaiveDate,
        quality: &mut DataQualityReport,
        last: &mut Option<f64>,
    ) -> TbResult<f64> {
        let (volatility, substitution) = match self.volatility_source(contract, date, *last) {
            Some(found) => found,
            None => {
                return Err(BacktestError::NoData {
                    leg,
                    what: "volatility",
                    start: date.to_string(),
                    end: date.to_string(),
                }
                .into())
            }
        };

        if let Some((kind, detail)) = substitution {
            if kind.is_stale() {
                warn!("Leg {} on {}: {:?} ({})", leg, date, kind, detail);
            } else {
                debug!("Leg {} on {}: {:?} ({})", leg, date, kind, detail);
            }
            quality.record(date, Some(leg), kind, detail);
        }
        *last = Some(volatility);
        Ok(volatility)
    }

    fn volatility_source(
        &self,
        contract: &OptionContract,
        date: NaiveDate,
        last: Option<f64>,
    ) -> Option<(f64, Option<(GapKind, String)>)> {
        let data = &self.market_data;

        if let Some(iv) = data.contract_iv_on(contract, date) {
            return Some((iv, None));
        }

        if let (Some(surface), Some(strike)) = (data.surface_on(date), contract.strike.to_f64()) {
            match surface.interpolate(strike, contract.expiration) {
                Ok(point) if point.extrapolated && self.config.volatility.reject_extrapolated => {
                    debug!("Rejected extrapolated surface value {:.4} for {}", point.volatility, contract);
                }
                Ok(point) => {
                    let kind = if point.extrapolated {
                        GapKind::VolatilityExtrapolated
                    } else {
                        GapKind::VolatilityFromSurface
                    };
                    return Some((
                        point.volatility,
                        Some((kind, format!("surface value {:.6}", point.volatility))),
                    ));
                }
                Err(e) => debug!("Surface lookup failed for {}: {}", contract, e),
            }
        }

        if let Some(iv) = data.underlying_iv_on(date) {
            return Some((
                iv,
                Some((
                    GapKind::VolatilityFromUnderlyingSeries,
                    format!("underlying implied volatility {:.6}", iv),
                )),
            ));
        }

        if let Some(previous) = last {
            return Some((
                previous,
                Some((
                    GapKind::VolatilityCarriedForward,
                    format!("previous volatility {:.6}", previous),
                )),
            ));
        }

        if self.config.volatility.use_historical_fallback {
            let closes = data.closes_through(date);
            let window = self.config.volatility.historical_window;
            if let Ok(hv) = self.analyzer.historical_volatility(&closes, window) {
                if hv.is_finite() && hv > 0.0 {
                    return Some((
                        hv,
                        Some((
                            GapKind::VolatilityHistorical,
                            format!("{}-day historical volatility {:.6}", window, hv),
                        )),
                    ));
                }
            }
        }

        data.first_iv_after(contract, date).map(|(from, iv)| {
            (
                iv,
                Some((
                    GapKind::VolatilityBackfilled,
                    format!("implied volatility {:.6} from {}", iv, from),
                )),
            )
        })
    }

    fn open_legs(
        &self,
        strategy: &Strategy,
        spot: Decimal,
        date: NaiveDate,
        state: &mut RunState,
    ) -> TbResult<()> {
        let now = day_start(date);
        for (index, leg) in strategy.legs.iter().enumerate() {
            let volatility = self.resolve_volatility(
                index,
                &leg.contract,
                date,
                &mut state.quality,
                &mut state.last_volatility[index],
            )?;
            let price = self.pricer.price(&leg.contract, spot, now, volatility)?;
            let commission = leg_commission(leg, self.config.commission_per_contract);
            let trade = state.portfolio.open_position(index, leg, price, commission, now);
            info!(
                "Opened leg {}: {} {} {} at {} (vol {:.4})",
                index, trade.action, trade.quantity, trade.contract, price, volatility
            );
        }
        state.entry_premium = net_entry_premium(&state.portfolio);
        Ok(())
    }

    fn reprice(&self, spot: Decimal, date: NaiveDate, state: &mut RunState) -> TbResult<()> {
        let now = day_start(date);
        for index in 0..state.portfolio.positions.len() {
            let position = &state.portfolio.positions[index];
            if !position.is_open {
                continue;
            }
            let leg_index = position.leg_index;
            let contract = position.contract().clone();
            let volatility = self.resolve_volatility(
                leg_index,
                &contract,
                date,
                &mut state.quality,
                &mut state.last_volatility[leg_index],
            )?;
            let price = self.pricer.price(&contract, spot, now, volatility)?;
            state.portfolio.positions[index].update_market_price(price, now);
        }
        Ok(())
    }

    /// Expire legs due today; exercise American legs when optimal.
    fn settle(&self, spot: Decimal, now: DateTime<Utc>, state: &mut RunState) -> TbResult<()> {
        let date = now.date_naive();
        for index in 0..state.portfolio.positions.len() {
            let position = &state.portfolio.positions[index];
            if !position.is_open {
                continue;
            }
            let contract = position.contract().clone();
            let leg_index = position.leg_index;

            if contract.expiration.date_naive() <= date {
                let trade = settle_at_intrinsic(&mut state.portfolio, index, spot, TradeKind::Expire, now)?;
                info!(
                    "Leg {} expired on {} at {} (realized {})",
                    leg_index, date, trade.price, trade.realized_pnl
                );
                continue;
            }

            if contract.exercise_style == ExerciseStyle::American {
                let Some(volatility) = state.last_volatility[leg_index] else {
                    continue;
                };
                let decision = self.pricer.exercise_decision(&contract, spot, now, volatility)?;
                if decision.exercise_now {
                    let trade =
                        settle_at_intrinsic(&mut state.portfolio, index, spot, TradeKind::Exercise, now)?;
                    info!(
                        "Leg {} exercised on {}: intrinsic {:.4} over continuation {:.4} (realized {})",
                        leg_index,
                        date,
                        decision.intrinsic_value,
                        decision.continuation_value,
                        trade.realized_pnl
                    );
                }
            }
        }
        Ok(())
    }

    fn exit_trigger(&self, date: NaiveDate, state: &RunState) -> Option<String> {
        let rules = &self.config.exit_rules;
        if rules.is_empty() || !state.portfolio.has_open_positions() {
            return None;
        }

        if let Some(days) = rules.close_days_before_expiry {
            let earliest = state
                .portfolio
                .open_positions()
                .map(|p| p.contract().expiration.date_naive())
                .min()?;
            let remaining = (earliest - date).num_days();
            if remaining <= days {
                return Some(format!("{} days before expiry {}", remaining, earliest));
            }
        }

        let basis = state.entry_premium.abs();
        if basis.is_zero() {
            return None;
        }
        let pnl = state.portfolio.total_value() - state.portfolio.initial_capital;
        let fraction = pnl / basis;
        if let Some(target) = rules.profit_target {
            if fraction >= target {
                return Some(format!("profit target {} reached ({})", target, fraction.round_dp(4)));
            }
        }
        if let Some(stop) = rules.stop_loss {
            if fraction <= -stop {
                return Some(format!("stop loss {} hit ({})", stop, fraction.round_dp(4)));
            }
        }
        None
    }

    fn apply_exit_rules(&self, date: NaiveDate, now: DateTime<Utc>, state: &mut RunState) -> TbResult<()> {
        let Some(reason) = self.exit_trigger(date, state) else {
            return Ok(());
        };
        info!("Closing all legs on {}: {}", date, reason);
        for index in 0..state.portfolio.positions.len() {
            let position = &state.portfolio.positions[index];
            if !position.is_open {
                continue;
            }
            let price = position.current_price;
            let commission = leg_commission(&position.leg, self.config.commission_per_contract);
            state
                .portfolio
                .close_position(index, price, TradeKind::Close, commission, now)?;
        }
        Ok(())
    }
}

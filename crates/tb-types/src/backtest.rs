use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{BacktestError, TbResult};
use crate::portfolio::{DailyPnL, Portfolio, Trade};

/// Unique backtest identifier
pub type BacktestId = Uuid;

/// Calendar days per year used to annualise daily portfolio statistics.
pub const CALENDAR_DAYS_PER_YEAR: f64 = 365.0;

/// Backtest configuration and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub risk_free_rate: f64,
    pub dividend_yield: f64,
    /// Commission charged per contract on opens and early closes. Expiry and
    /// exercise settle without commission.
    pub commission_per_contract: Decimal,
    #[serde(default)]
    pub pricing: EnginePricing,
    #[serde(default)]
    pub volatility: VolatilitySettings,
    #[serde(default)]
    pub exit_rules: ExitRules,
}

impl BacktestConfig {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start_date,
            end_date,
            ..Self::default()
        }
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_capital(mut self, capital: Decimal) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_dividend_yield(mut self, yield_: f64) -> Self {
        self.dividend_yield = yield_;
        self
    }

    pub fn with_commission(mut self, per_contract: Decimal) -> Self {
        self.commission_per_contract = per_contract;
        self
    }

    pub fn with_pricing(mut self, pricing: EnginePricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_volatility(mut self, volatility: VolatilitySettings) -> Self {
        self.volatility = volatility;
        self
    }

    pub fn with_exit_rules(mut self, exit_rules: ExitRules) -> Self {
        self.exit_rules = exit_rules;
        self
    }

    /// Number of simulated calendar days, both ends included.
    pub fn num_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn validate(&self) -> TbResult<()> {
        if self.start_date > self.end_date {
            return Err(BacktestError::InvalidDateRange {
                start: self.start_date.to_string(),
                end: self.end_date.to_string(),
            }
            .into());
        }
        let invalid = |message: String| -> TbResult<()> {
            Err(BacktestError::InvalidConfig { message }.into())
        };
        if self.initial_capital <= Decimal::ZERO {
            return invalid(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            ));
        }
        if !self.risk_free_rate.is_finite() || !self.dividend_yield.is_finite() {
            return invalid(format!(
                "rates must be finite, got risk_free_rate={} dividend_yield={}",
                self.risk_free_rate, self.dividend_yield
            ));
        }
        if self.commission_per_contract < Decimal::ZERO {
            return invalid(format!(
                "commission_per_contract must be non-negative, got {}",
                self.commission_per_contract
            ));
        }
        if self.pricing.binomial_steps == 0 {
            return invalid("pricing.binomial_steps must be at least 1".to_string());
        }
        if self.volatility.historical_window < 2 {
            return invalid(format!(
                "volatility.historical_window must be at least 2, got {}",
                self.volatility.historical_window
            ));
        }
        self.exit_rules.validate()
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        Self {
            name: "backtest".to_string(),
            start_date: today - chrono::Duration::days(30),
            end_date: today,
            initial_capital: Decimal::from(100000),
            risk_free_rate: 0.05,
            dividend_yield: 0.0,
            commission_per_contract: Decimal::ZERO,
            pricing: EnginePricing::default(),
            volatility: VolatilitySettings::default(),
            exit_rules: ExitRules::default(),
        }
    }
}

/// Model settings used when repricing legs day by day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePricing {
    /// Lattice depth for American legs.
    pub binomial_steps: usize,
}

impl Default for EnginePricing {
    fn default() -> Self {
        Self { binomial_steps: 200 }
    }
}

/// Volatility sourcing policy for the day loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySettings {
    /// Trailing window of log returns for the historical fallback.
    pub historical_window: usize,
    pub use_historical_fallback: bool,
    /// Skip extrapolated surface values and fall through to the next source.
    pub reject_extrapolated: bool,
}

impl Default for VolatilitySettings {
    fn default() -> Self {
        Self {
            historical_window: 20,
            use_historical_fallback: true,
            reject_extrapolated: false,
        }
    }
}

/// Optional early-exit rules. Thresholds are fractions of the absolute net
/// entry premium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    pub profit_target: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    /// Close everything this many calendar days before the earliest expiry.
    pub close_days_before_expiry: Option<i64>,
}

impl ExitRules {
    pub fn with_profit_target(mut self, fraction: Decimal) -> Self {
        self.profit_target = Some(fraction);
        self
    }

    pub fn with_stop_loss(mut self, fraction: Decimal) -> Self {
        self.stop_loss = Some(fraction);
        self
    }

    pub fn with_close_days_before_expiry(mut self, days: i64) -> Self {
        self.close_days_before_expiry = Some(days);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.profit_target.is_none()
            && self.stop_loss.is_none()
            && self.close_days_before_expiry.is_none()
    }

    fn validate(&self) -> TbResult<()> {
        for (name, value) in [("profit_target", self.profit_target), ("stop_loss", self.stop_loss)] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(BacktestError::InvalidConfig {
                        message: format!("exit_rules.{name} must be positive, got {v}"),
                    }
                    .into());
                }
            }
        }
        if let Some(days) = self.close_days_before_expiry {
            if days < 0 {
                return Err(BacktestError::InvalidConfig {
                    message: format!(
                        "exit_rules.close_days_before_expiry must be non-negative, got {days}"
                    ),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Backtest execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktestStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BacktestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BacktestStatus::Completed | BacktestStatus::Failed | BacktestStatus::Cancelled
        )
    }
}

impl fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BacktestStatus::NotStarted => "not_started",
            BacktestStatus::Running => "running",
            BacktestStatus::Completed => "completed",
            BacktestStatus::Failed => "failed",
            BacktestStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Where a substituted input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapKind {
    UnderlyingCarriedForward,
    UnderlyingBackfilled,
    VolatilityFromSurface,
    VolatilityExtrapolated,
    VolatilityFromUnderlyingSeries,
    VolatilityCarriedForward,
    VolatilityHistorical,
    /// First later implied volatility observation used before any exists.
    VolatilityBackfilled,
}

impl GapKind {
    /// Substitutions that make the day's row stale.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            GapKind::UnderlyingCarriedForward
                | GapKind::UnderlyingBackfilled
                | GapKind::VolatilityExtrapolated
                | GapKind::VolatilityCarriedForward
                | GapKind::VolatilityBackfilled
        )
    }
}

/// One recorded substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    pub date: NaiveDate,
    /// Leg the gap applies to; `None` for the underlying.
    pub leg: Option<usize>,
    pub kind: GapKind,
    pub detail: String,
}

/// Every non-primary input used during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub gaps: Vec<DataGap>,
    pub stale_days: usize,
}

impl DataQualityReport {
    pub fn record(&mut self, date: NaiveDate, leg: Option<usize>, kind: GapKind, detail: impl Into<String>) {
        self.gaps.push(DataGap {
            date,
            leg,
            kind,
            detail: detail.into(),
        });
    }

    pub fn count(&self, kind: GapKind) -> usize {
        self.gaps.iter().filter(|g| g.kind == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty()
    }

    /// True when any stale substitution was recorded for `date`.
    pub fn is_stale_on(&self, date: NaiveDate) -> bool {
        self.gaps.iter().any(|g| g.date == date && g.kind.is_stale())
    }
}

/// Outcome of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: BacktestId,
    pub config: BacktestConfig,
    pub strategy_name: String,
    pub status: BacktestStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub trades: Vec<Trade>,
    pub daily_pnl: Vec<DailyPnL>,
    pub metrics: Option<PerformanceMetrics>,
    pub data_quality: DataQualityReport,
    pub final_capital: Decimal,
    pub error_message: Option<String>,
}

impl BacktestResult {
    pub fn new(config: BacktestConfig, strategy_name: impl Into<String>) -> Self {
        let final_capital = config.initial_capital;
        Self {
            id: Uuid::new_v4(),
            config,
            strategy_name: strategy_name.into(),
            status: BacktestStatus::NotStarted,
            start_time: Utc::now(),
            end_time: None,
            trades: Vec::new(),
            daily_pnl: Vec::new(),
            metrics: None,
            data_quality: DataQualityReport::default(),
            final_capital,
            error_message: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = BacktestStatus::Running;
        self.start_time = Utc::now();
    }

    pub fn mark_completed(&mut self, portfolio: Portfolio, data_quality: DataQualityReport) {
        self.metrics = Some(PerformanceMetrics::calculate(
            &portfolio,
            self.config.risk_free_rate,
        ));
        self.absorb(portfolio, data_quality);
        self.status = BacktestStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Keeps whatever was simulated before the token fired.
    pub fn mark_cancelled(&mut self, portfolio: Portfolio, data_quality: DataQualityReport) {
        self.absorb(portfolio, data_quality);
        self.status = BacktestStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = BacktestStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error_message = Some(error);
    }

    fn absorb(&mut self, portfolio: Portfolio, data_quality: DataQualityReport) {
        self.final_capital = portfolio.total_value();
        self.trades = portfolio.trades;
        self.daily_pnl = portfolio.daily_pnl;
        self.data_quality = data_quality;
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }
}

/// Summary statistics of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// (final − initial) / initial, exact.
    pub total_return: Decimal,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    /// Peak-to-trough fraction of portfolio value.
    pub max_drawdown: Decimal,
    pub max_drawdown_duration_days: u32,
    /// Fraction of closing trades with positive realized P&L.
    pub win_rate: Decimal,
    pub profit_factor: Option<Decimal>,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub total_trades: u64,
    pub closing_trades: u64,
    pub total_commissions: Decimal,
}

impl PerformanceMetrics {
    pub fn calculate(portfolio: &Portfolio, risk_free_rate: f64) -> Self {
        let returns = Self::daily_returns(portfolio.initial_capital, &portfolio.daily_pnl);
        let (max_drawdown, max_drawdown_duration_days) =
            Self::calculate_max_drawdown(portfolio.initial_capital, &portfolio.daily_pnl);
        let closing: Vec<&Trade> = portfolio
            .trades
            .iter()
            .filter(|t| t.kind.is_closing())
            .collect();

        Self {
            total_return: portfolio.get_total_return(),
            annualized_return: Self::calculate_annualized_return(portfolio, returns.len()),
            volatility: Self::calculate_volatility(&returns),
            sharpe_ratio: Self::calculate_sharpe_ratio(&returns, risk_free_rate),
            sortino_ratio: Self::calculate_sortino_ratio(&returns, risk_free_rate),
            max_drawdown,
            max_drawdown_duration_days,
            win_rate: Self::calculate_win_rate(&closing),
            profit_factor: Self::calculate_profit_factor(&closing),
            largest_win: closing
                .iter()
                .map(|t| t.realized_pnl)
                .filter(|p| *p > Decimal::ZERO)
                .max()
                .unwrap_or(Decimal::ZERO),
            largest_loss: closing
                .iter()
                .map(|t| t.realized_pnl)
                .filter(|p| *p < Decimal::ZERO)
                .min()
                .unwrap_or(Decimal::ZERO),
            total_trades: portfolio.trades.len() as u64,
            closing_trades: closing.len() as u64,
            total_commissions: portfolio.total_commissions,
        }
    }

    /// Simple daily returns; the first day is measured against initial capital.
    pub fn daily_returns(initial_capital: Decimal, daily_pnl: &[DailyPnL]) -> Vec<f64> {
        let mut previous = initial_capital;
        daily_pnl
            .iter()
            .filter_map(|row| {
                let base = previous;
                previous = row.portfolio_value;
                if base.is_zero() {
                    None
                } else {
                    (row.daily_pnl / base).to_f64()
                }
            })
            .collect()
    }

    fn calculate_annualized_return(portfolio: &Portfolio, days: usize) -> f64 {
        if days == 0 || portfolio.initial_capital <= Decimal::ZERO {
            return 0.0;
        }
        let growth = (portfolio.total_value() / portfolio.initial_capital)
            .to_f64()
            .unwrap_or(1.0);
        if growth <= 0.0 {
            return -1.0;
        }
        growth.powf(CALENDAR_DAYS_PER_YEAR / days as f64) - 1.0
    }

    fn sample_std(values: &[f64]) -> Option<f64> {
        if values.len() < 2 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        Some(variance.sqrt())
    }

    fn calculate_volatility(returns: &[f64]) -> f64 {
        Self::sample_std(returns)
            .map(|std| std * CALENDAR_DAYS_PER_YEAR.sqrt())
            .unwrap_or(0.0)
    }

    fn calculate_sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
        let std = Self::sample_std(returns)?;
        if std <= f64::EPSILON {
            return None;
        }
        let daily_rf = risk_free_rate / CALENDAR_DAYS_PER_YEAR;
        let mean_excess = returns.iter().map(|r| r - daily_rf).sum::<f64>() / returns.len() as f64;
        Some(mean_excess / std * CALENDAR_DAYS_PER_YEAR.sqrt())
    }

    /// Like Sharpe but only penalises downside deviation.
    fn calculate_sortino_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
        if returns.len() < 2 {
            return None;
        }
        let daily_rf = risk_free_rate / CALENDAR_DAYS_PER_YEAR;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let downside = (excess
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .sum::<f64>()
            / excess.len() as f64)
            .sqrt();
        if downside <= f64::EPSILON {
            return None;
        }
        let mean = excess.iter().sum::<f64>() / excess.len() as f64;
        Some(mean / downside * CALENDAR_DAYS_PER_YEAR.sqrt())
    }

    /// Max drawdown fraction and its longest duration in days.
    fn calculate_max_drawdown(initial_capital: Decimal, daily_pnl: &[DailyPnL]) -> (Decimal, u32) {
        let mut peak = initial_capital;
        let mut max_drawdown = Decimal::ZERO;
        let mut duration = 0u32;
        let mut max_duration = 0u32;

        for row in daily_pnl {
            if row.portfolio_value >= peak {
                peak = row.portfolio_value;
                duration = 0;
                continue;
            }
            duration += 1;
            max_duration = max_duration.max(duration);
            if peak > Decimal::ZERO {
                max_drawdown = max_drawdown.max((peak - row.portfolio_value) / peak);
            }
        }
        (max_drawdown, max_duration)
    }

    fn calculate_win_rate(closing: &[&Trade]) -> Decimal {
        if closing.is_empty() {
            return Decimal::ZERO;
        }
        let winners = closing
            .iter()
            .filter(|t| t.realized_pnl > Decimal::ZERO)
            .count();
        Decimal::from(winners) / Decimal::from(closing.len())
    }

    fn calculate_profit_factor(closing: &[&Trade]) -> Option<Decimal> {
        let gross_profit: Decimal = closing
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p > Decimal::ZERO)
            .sum();
        let gross_loss: Decimal = closing
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p < Decimal::ZERO)
            .sum::<Decimal>()
            .abs();
        if gross_loss.is_zero() {
            None
        } else {
            Some(gross_profit / gross_loss)
        }
    }
}

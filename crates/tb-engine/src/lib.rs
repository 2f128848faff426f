// ThetaBack backtesting engine
// Loads market data once, then replays strategies day by day.

pub mod batch;
pub mod engine;
pub mod execution;
pub mod market_data;

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{error, info};

use tb_data::HistoricalDataProvider;
use tb_types::{BacktestConfig, BacktestResult, Strategy};

pub use batch::{BacktestJob, BatchRunner, CancellationToken};
pub use engine::{day_start, BacktestEngine};
pub use execution::{LegPricer, PRICE_SCALE};
pub use market_data::MarketData;

/// Backtest `strategy` over `[start_date, end_date]` with default settings.
pub async fn run_backtest(
    provider: &dyn HistoricalDataProvider,
    strategy: &Strategy,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: Decimal,
) -> BacktestResult {
    let config = BacktestConfig::new(strategy.name.clone(), start_date, end_date)
        .with_capital(initial_capital);
    run_backtest_with_config(provider, strategy, config).await
}

/// Load everything the run needs from `provider`, then simulate. Load
/// failures come back as a `Failed` result.
pub async fn run_backtest_with_config(
    provider: &dyn HistoricalDataProvider,
    strategy: &Strategy,
    config: BacktestConfig,
) -> BacktestResult {
    info!(
        "Running backtest {} ({}) with {} legs",
        config.name,
        strategy.kind,
        strategy.legs.len()
    );
    if let Err(e) = config.validate() {
        error!("Invalid configuration for {}: {}", config.name, e);
        let mut result = BacktestResult::new(config, strategy.name.clone());
        result.mark_failed(e.to_string());
        return result;
    }

    match MarketData::load(provider, strategy, &config).await {
        Ok(data) => BacktestEngine::new(config, Arc::new(data)).run(strategy),
        Err(e) => {
            error!("Failed to load market data for {}: {}", strategy.name, e);
            let mut result = BacktestResult::new(config, strategy.name.clone());
            result.mark_failed(e.to_string());
            result
        }
    }
}

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tb_data::CsvSeriesProvider;
use tb_engine::{day_start, run_backtest_with_config};
use tb_options::{StrategyComposer, StrategySpec};
use tb_types::BacktestConfig;

/// Run file: one backtest over CSV series in `data_dir`.
#[derive(Debug, Deserialize)]
struct RunFile {
    backtest: BacktestConfig,
    strategy: StrategySpec,
    data_dir: PathBuf,
    #[serde(default)]
    file_pattern: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("THETABACK_CONFIG").ok())
        .context("usage: thetaback <run.json> (or set THETABACK_CONFIG)")?;

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let run: RunFile = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let strategy = StrategyComposer::new(day_start(run.backtest.start_date))
        .build_strategy(&run.strategy)
        .with_context(|| format!("building {} strategy", run.strategy.kind()))?;

    let mut provider = CsvSeriesProvider::new(&run.data_dir);
    if let Some(pattern) = &run.file_pattern {
        provider = provider.with_pattern(pattern);
    }
    info!("Loaded run file {} for strategy {}", path, strategy.name);

    let result = run_backtest_with_config(&provider, &strategy, run.backtest).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(message) = &result.error_message {
        anyhow::bail!("backtest {} failed: {}", result.id, message);
    }
    Ok(())
}

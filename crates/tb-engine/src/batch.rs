// Parallel execution of independent backtests over shared market data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use tb_types::{BacktestConfig, BacktestResult, Strategy};

use crate::engine::BacktestEngine;
use crate::market_data::MarketData;

/// Cooperative cancellation flag, checked by the engine once per simulated
/// day. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One strategy under one configuration.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub strategy: Strategy,
    pub config: BacktestConfig,
}

impl BacktestJob {
    pub fn new(strategy: Strategy, config: BacktestConfig) -> Self {
        Self { strategy, config }
    }
}

/// Runs jobs on the rayon pool. Each run owns its portfolio; the market
/// data is shared read-only.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    market_data: Arc<MarketData>,
    cancellation: CancellationToken,
}

impl BatchRunner {
    pub fn new(market_data: Arc<MarketData>) -> Self {
        Self {
            market_data,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Results in job order.
    pub fn run(&self, jobs: &[BacktestJob]) -> Vec<BacktestResult> {
        info!("Running {} backtests in parallel", jobs.len());
        jobs.par_iter()
            .map(|job| {
                BacktestEngine::new(job.config.clone(), Arc::clone(&self.market_data))
                    .with_cancellation(self.cancellation.clone())
                    .run(&job.strategy)
            })
            .collect()
    }

    /// Every strategy under the same configuration.
    pub fn sweep(&self, strategies: &[Strategy], config: &BacktestConfig) -> Vec<BacktestResult> {
        let jobs: Vec<BacktestJob> = strategies
            .iter()
            .map(|s| BacktestJob::new(s.clone(), config.clone()))
            .collect();
        self.run(&jobs)
    }
}

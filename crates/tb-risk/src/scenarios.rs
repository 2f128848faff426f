//! Market shocks for stress testing.

use serde::{Deserialize, Serialize};

/// A joint move in the underlying, its volatility and the calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketScenario {
    pub name: String,
    /// Relative spot move, e.g. -0.10 for a 10 % drop.
    pub underlying_change: f64,
    /// Absolute volatility move, e.g. 0.05 for +5 vol points.
    pub volatility_change: f64,
    #[serde(default)]
    pub days_elapsed: i64,
}

impl MarketScenario {
    pub fn new(name: impl Into<String>, underlying_change: f64, volatility_change: f64) -> Self {
        Self {
            name: name.into(),
            underlying_change,
            volatility_change,
            days_elapsed: 0,
        }
    }

    pub fn with_days_elapsed(mut self, days: i64) -> Self {
        self.days_elapsed = days;
        self
    }

    /// Crash, rally, volatility and decay shocks.
    pub fn standard_set() -> Vec<MarketScenario> {
        vec![
            MarketScenario::new("crash -20% / vol +15", -0.20, 0.15),
            MarketScenario::new("selloff -10% / vol +5", -0.10, 0.05),
            MarketScenario::new("dip -5%", -0.05, 0.0),
            MarketScenario::new("rally +5%", 0.05, 0.0),
            MarketScenario::new("rally +10% / vol -5", 0.10, -0.05),
            MarketScenario::new("vol spike +10", 0.0, 0.10),
            MarketScenario::new("vol crush -10", 0.0, -0.10),
            MarketScenario::new("one week decay", 0.0, 0.0).with_days_elapsed(7),
        ]
    }
}

/// Repriced value of the position set under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: MarketScenario,
    pub base_value: f64,
    pub shocked_value: f64,
    pub pnl: f64,
    /// Legs repriced from the context's fallback volatility.
    #[serde(default)]
    pub fallback_legs: Vec<usize>,
}

//! Portfolio-level risk for option positions.
//!
//! Provides:
//! - Aggregated Greeks across legs
//! - Delta-gamma parametric value-at-risk
//! - Scenario repricing under spot, volatility and time shocks
//! - A simplified short-option margin estimate

pub mod context;
pub mod metrics;
pub mod scenarios;

pub use context::MarketContext;
pub use metrics::{open_legs, PortfolioRiskReport, RiskCalculator, ValueAtRisk};
pub use scenarios::{MarketScenario, ScenarioResult};

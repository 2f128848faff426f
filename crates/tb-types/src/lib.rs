//! Core value types shared by every ThetaBack crate: symbols and series
//! points, option contracts, strategies, positions and trades, backtest
//! configuration and results, and the error taxonomy.

pub mod market;
pub mod contract;
pub mod strategy;
pub mod portfolio;
pub mod backtest;
pub mod errors;

pub use market::*;
pub use contract::*;
pub use strategy::*;
pub use portfolio::*;
pub use backtest::*;
pub use errors::*;

//! Option pricing models, Greeks, volatility modelling and strategy
//! composition.

pub mod chain;
pub mod composer;
pub mod garch;
pub mod greeks;
pub mod implied;
pub mod lattice;
pub mod monte_carlo;
pub mod payoff;
pub mod pricing;
pub mod surface;
pub mod volatility;

pub use chain::*;
pub use composer::*;
pub use garch::*;
pub use greeks::*;
pub use implied::*;
pub use lattice::*;
pub use monte_carlo::*;
pub use payoff::*;
pub use pricing::*;
pub use surface::*;
pub use volatility::*;

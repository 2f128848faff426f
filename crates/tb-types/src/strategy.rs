use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::{OptionContract, OptionKind};
use crate::market::Symbol;

/// Direction of a leg. Economic sign lives here, never in the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// +1 for long exposure, -1 for short exposure.
    pub fn sign(&self) -> Decimal {
        match self {
            Action::Buy => Decimal::ONE,
            Action::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "Buy"),
            Action::Sell => write!(f, "Sell"),
        }
    }
}

/// One option position inside a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLeg {
    pub contract: OptionContract,
    pub action: Action,
    /// Always positive; see [`StrategyLeg::signed_quantity`].
    pub quantity: Decimal,
}

impl StrategyLeg {
    pub fn new(contract: OptionContract, action: Action, quantity: Decimal) -> Self {
        Self {
            contract,
            action,
            quantity,
        }
    }

    pub fn buy(contract: OptionContract, quantity: Decimal) -> Self {
        Self::new(contract, Action::Buy, quantity)
    }

    pub fn sell(contract: OptionContract, quantity: Decimal) -> Self {
        Self::new(contract, Action::Sell, quantity)
    }

    /// Quantity carrying the sign of the action.
    pub fn signed_quantity(&self) -> Decimal {
        self.action.sign() * self.quantity
    }

    /// Signed number of underlying units controlled (quantity × multiplier).
    pub fn signed_notional_units(&self) -> Decimal {
        self.signed_quantity() * self.contract.multiplier
    }

    /// Per-unit premium observed on the contract quote, if any.
    pub fn premium(&self) -> Option<Decimal> {
        self.contract.mid_price()
    }

    pub fn is_long(&self) -> bool {
        self.action == Action::Buy
    }

    pub fn is_short(&self) -> bool {
        self.action == Action::Sell
    }
}

/// Strategy family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    SingleLeg,
    Straddle,
    Strangle,
    VerticalSpread,
    IronCondor,
    Butterfly,
    Custom,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::SingleLeg => "single_leg",
            StrategyKind::Straddle => "straddle",
            StrategyKind::Strangle => "strangle",
            StrategyKind::VerticalSpread => "vertical_spread",
            StrategyKind::IronCondor => "iron_condor",
            StrategyKind::Butterfly => "butterfly",
            StrategyKind::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// A named, ordered, non-empty list of legs.
///
/// Strategies are value objects: derived analytics are recomputed from the
/// legs on demand and edits produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub kind: StrategyKind,
    pub legs: Vec<StrategyLeg>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, kind: StrategyKind, legs: Vec<StrategyLeg>) -> Self {
        Self {
            name: name.into(),
            kind,
            legs,
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_legs(&self, legs: Vec<StrategyLeg>) -> Self {
        Self {
            legs,
            ..self.clone()
        }
    }

    /// Underlying of the first leg.
    pub fn underlying(&self) -> Option<&Symbol> {
        self.legs.first().map(|leg| &leg.contract.underlying)
    }

    /// Net signed units of calls and puts across legs: (calls, puts).
    pub fn net_direction(&self) -> (Decimal, Decimal) {
        self.legs
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(calls, puts), leg| {
                match leg.contract.kind {
                    OptionKind::Call => (calls + leg.signed_notional_units(), puts),
                    OptionKind::Put => (calls, puts + leg.signed_notional_units()),
                }
            })
    }

    /// Earliest leg expiration.
    pub fn earliest_expiration(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.legs.iter().map(|leg| leg.contract.expiration).min()
    }

    /// Strikes of all legs, ascending and deduplicated.
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut strikes: Vec<Decimal> = self.legs.iter().map(|l| l.contract.strike).collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn contract(kind: OptionKind, strike: Decimal) -> OptionContract {
        OptionContract::european(
            Symbol::crypto("ETH"),
            kind,
            strike,
            Utc.with_ymd_and_hms(2026, 3, 27, 8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_signed_quantity_comes_from_action() {
        let buy = StrategyLeg::buy(contract(OptionKind::Call, dec!(2000)), dec!(3));
        let sell = StrategyLeg::sell(contract(OptionKind::Call, dec!(2000)), dec!(3));
        assert_eq!(buy.signed_quantity(), dec!(3));
        assert_eq!(sell.signed_quantity(), dec!(-3));
        assert_eq!(Action::Sell.opposite(), Action::Buy);
    }

    #[test]
    fn test_net_direction_of_straddle() {
        let strategy = Strategy::new(
            "long straddle",
            StrategyKind::Straddle,
            vec![
                StrategyLeg::buy(contract(OptionKind::Call, dec!(2000)), dec!(1)),
                StrategyLeg::buy(contract(OptionKind::Put, dec!(2000)), dec!(1)),
            ],
        );
        assert_eq!(strategy.net_direction(), (dec!(1), dec!(1)));
        assert_eq!(strategy.strikes(), vec![dec!(2000)]);
    }

    #[test]
    fn test_with_name_leaves_original_untouched() {
        let strategy = Strategy::new(
            "a",
            StrategyKind::SingleLeg,
            vec![StrategyLeg::buy(contract(OptionKind::Put, dec!(1800)), dec!(1))],
        );
        let renamed = strategy.with_name("b");
        assert_eq!(strategy.name, "a");
        assert_eq!(renamed.name, "b");
        assert_eq!(renamed.legs, strategy.legs);
    }
}

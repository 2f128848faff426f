//! Expiry payoff analytics for a strategy, evaluated exactly in `Decimal`.
//!
//! The aggregate payoff is piecewise linear in the underlying price with
//! kinks only at strikes, so evaluating it at zero, at every strike, and
//! following the slope past the highest strike is exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tb_types::{OptionKind, Strategy, StrategyLeg};

/// A profit or loss extreme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bound", content = "value", rename_all = "snake_case")]
pub enum Bound {
    Limited(Decimal),
    Unlimited,
}

impl Bound {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Bound::Unlimited)
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            Bound::Limited(v) => Some(*v),
            Bound::Unlimited => None,
        }
    }
}

/// Derived from the legs on demand; never stored on the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffAnalysis {
    /// Best payoff at expiry.
    pub max_profit: Bound,
    /// Worst payoff at expiry, as a positive loss amount.
    pub max_loss: Bound,
    /// Underlying prices where the payoff is zero, ascending. A zero-payoff
    /// interval contributes only the edges that border a non-zero payoff.
    pub breakevens: Vec<Decimal>,
    /// Premium paid (positive) or received (negative) to open.
    pub net_premium: Decimal,
    /// d(payoff)/dS beyond the highest strike.
    pub terminal_slope: Decimal,
    /// Indices of legs without a quoted mid. Those legs enter every figure
    /// above at zero premium.
    #[serde(default)]
    pub unpriced_legs: Vec<usize>,
}

fn leg_premium(leg: &StrategyLeg) -> Decimal {
    leg.premium().unwrap_or(Decimal::ZERO)
}

/// Legs that have no quoted mid to use as premium.
pub fn unpriced_legs(strategy: &Strategy) -> Vec<usize> {
    strategy
        .legs
        .iter()
        .enumerate()
        .filter(|(_, leg)| leg.premium().is_none())
        .map(|(i, _)| i)
        .collect()
}

/// Expiry payoff of one leg net of its premium. Unpriced legs count at zero premium.
pub fn leg_payoff(leg: &StrategyLeg, spot: Decimal) -> Decimal {
    leg.signed_notional_units() * (leg.contract.intrinsic_value(spot) - leg_premium(leg))
}

pub fn payoff_at(strategy: &Strategy, spot: Decimal) -> Decimal {
    strategy.legs.iter().map(|leg| leg_payoff(leg, spot)).sum()
}

pub fn net_premium(strategy: &Strategy) -> Decimal {
    strategy
        .legs
        .iter()
        .map(|leg| leg.signed_notional_units() * leg_premium(leg))
        .sum()
}

impl PayoffAnalysis {
    pub fn analyze(strategy: &Strategy) -> Self {
        let mut prices = vec![Decimal::ZERO];
        prices.extend(strategy.strikes());
        prices.dedup();
        let values: Vec<Decimal> = prices.iter().map(|s| payoff_at(strategy, *s)).collect();

        let terminal_slope: Decimal = strategy
            .legs
            .iter()
            .filter(|leg| leg.contract.kind == OptionKind::Call)
            .map(StrategyLeg::signed_notional_units)
            .sum();

        let best = values.iter().copied().max().unwrap_or(Decimal::ZERO);
        let worst = values.iter().copied().min().unwrap_or(Decimal::ZERO);
        let max_profit = if terminal_slope > Decimal::ZERO {
            Bound::Unlimited
        } else {
            Bound::Limited(best)
        };
        let max_loss = if terminal_slope < Decimal::ZERO {
            Bound::Unlimited
        } else {
            Bound::Limited(-worst)
        };

        let unpriced = unpriced_legs(strategy);
        if !unpriced.is_empty() {
            warn!(
                strategy = %strategy.name,
                legs = ?unpriced,
                "payoff analysed with unquoted legs at zero premium"
            );
        }

        Self {
            max_profit,
            max_loss,
            breakevens: breakevens(&prices, &values, terminal_slope),
            net_premium: net_premium(strategy),
            terminal_slope,
            unpriced_legs: unpriced,
        }
    }

    /// True when every leg had a quoted premium.
    pub fn is_fully_priced(&self) -> bool {
        self.unpriced_legs.is_empty()
    }
}

fn breakevens(prices: &[Decimal], values: &[Decimal], terminal_slope: Decimal) -> Vec<Decimal> {
    let mut found = Vec::new();
    for (i, (&price, &value)) in prices.iter().zip(values).enumerate() {
        if value.is_zero() {
            let left_nonzero = i > 0 && !values[i - 1].is_zero();
            let right_nonzero = match values.get(i + 1) {
                Some(next) => !next.is_zero(),
                None => !terminal_slope.is_zero(),
            };
            if left_nonzero || right_nonzero {
                found.push(price);
            }
            continue;
        }
        if i == 0 {
            continue;
        }
        let (prev_price, prev_value) = (prices[i - 1], values[i - 1]);
        if !prev_value.is_zero() && prev_value.is_sign_positive() != value.is_sign_positive() {
            let t = -prev_value / (value - prev_value);
            found.push(prev_price + t * (price - prev_price));
        }
    }

    if let (Some(&last_price), Some(&last_value)) = (prices.last(), values.last()) {
        if !terminal_slope.is_zero() && !last_value.is_zero() {
            let crossing = last_price - last_value / terminal_slope;
            if crossing > last_price {
                found.push(crossing);
            }
        }
    }

    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tb_types::{OptionContract, OptionQuote, StrategyKind, Symbol};

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 19, 20, 0, 0).unwrap()
    }

    fn leg(kind: OptionKind, strike: Decimal, premium: Decimal, buy: bool, qty: Decimal) -> StrategyLeg {
        let contract = OptionContract::european(Symbol::equity("SPY"), kind, strike, expiry())
            .with_quote(OptionQuote::new(expiry()).with_last(premium));
        if buy {
            StrategyLeg::buy(contract, qty)
        } else {
            StrategyLeg::sell(contract, qty)
        }
    }

    fn strategy(legs: Vec<StrategyLeg>) -> Strategy {
        Strategy::new("test", StrategyKind::Custom, legs)
    }

    #[test]
    fn test_long_call() {
        let s = strategy(vec![leg(OptionKind::Call, dec!(100), dec!(5), true, dec!(1))]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.max_profit, Bound::Unlimited);
        assert_eq!(analysis.max_loss, Bound::Limited(dec!(5)));
        assert_eq!(analysis.breakevens, vec![dec!(105)]);
        assert_eq!(analysis.net_premium, dec!(5));
    }

    #[test]
    fn test_short_call_has_unlimited_loss() {
        let s = strategy(vec![leg(OptionKind::Call, dec!(100), dec!(5), false, dec!(2))]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(10)));
        assert!(analysis.max_loss.is_unlimited());
        assert_eq!(analysis.breakevens, vec![dec!(105)]);
        assert_eq!(analysis.net_premium, dec!(-10));
    }

    #[test]
    fn test_short_put_loss_bounded_at_zero() {
        let s = strategy(vec![leg(OptionKind::Put, dec!(100), dec!(4), false, dec!(1))]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(4)));
        assert_eq!(analysis.max_loss, Bound::Limited(dec!(96)));
        assert_eq!(analysis.breakevens, vec![dec!(96)]);
    }

    #[test]
    fn test_iron_condor() {
        let s = strategy(vec![
            leg(OptionKind::Put, dec!(90), dec!(1), true, dec!(1)),
            leg(OptionKind::Put, dec!(95), dec!(2.5), false, dec!(1)),
            leg(OptionKind::Call, dec!(105), dec!(2.5), false, dec!(1)),
            leg(OptionKind::Call, dec!(110), dec!(1), true, dec!(1)),
        ]);
        let analysis = PayoffAnalysis::analyze(&s);
        // credit 3, wings 5 wide
        assert_eq!(analysis.net_premium, dec!(-3));
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(3)));
        assert_eq!(analysis.max_loss, Bound::Limited(dec!(2)));
        assert_eq!(analysis.breakevens, vec![dec!(92), dec!(108)]);
        assert!(analysis.terminal_slope.is_zero());
    }

    #[test]
    fn test_long_butterfly() {
        let s = strategy(vec![
            leg(OptionKind::Call, dec!(90), dec!(12), true, dec!(1)),
            leg(OptionKind::Call, dec!(100), dec!(5), false, dec!(2)),
            leg(OptionKind::Call, dec!(110), dec!(1), true, dec!(1)),
        ]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.net_premium, dec!(3));
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(7)));
        assert_eq!(analysis.max_loss, Bound::Limited(dec!(3)));
        assert_eq!(analysis.breakevens, vec![dec!(93), dec!(107)]);
    }

    #[test]
    fn test_unpriced_straddle_touches_zero_once() {
        let contract = OptionContract::european(Symbol::equity("SPY"), OptionKind::Call, dec!(100), expiry());
        let s = strategy(vec![
            StrategyLeg::buy(contract.clone(), dec!(1)),
            StrategyLeg::buy(contract.with_kind(OptionKind::Put), dec!(1)),
        ]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.breakevens, vec![dec!(100)]);
        assert_eq!(analysis.max_loss, Bound::Limited(dec!(0)));
        assert_eq!(analysis.unpriced_legs, vec![0, 1]);
        assert_eq!(payoff_at(&s, dec!(130)), dec!(30));
    }

    #[test]
    fn test_unquoted_leg_is_flagged() {
        let quoted = leg(OptionKind::Put, dec!(90), dec!(1), false, dec!(1));
        let bare = OptionContract::european(Symbol::equity("SPY"), OptionKind::Call, dec!(100), expiry());
        let s = strategy(vec![quoted, StrategyLeg::buy(bare.clone(), dec!(1))]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert!(!analysis.is_fully_priced());
        assert_eq!(analysis.unpriced_legs, vec![1]);

        let lone = PayoffAnalysis::analyze(&strategy(vec![StrategyLeg::buy(bare, dec!(1))]));
        assert_eq!(lone.unpriced_legs, vec![0]);
        assert_eq!(lone.max_profit, Bound::Unlimited);
        // flat at zero up to the strike: only the edge where payoff turns positive
        assert_eq!(lone.breakevens, vec![dec!(100)]);

        let priced = PayoffAnalysis::analyze(&strategy(vec![leg(OptionKind::Call, dec!(100), dec!(5), true, dec!(1))]));
        assert!(priced.is_fully_priced());
    }

    #[test]
    fn test_zero_payoff_plateau_reports_its_edges() {
        // debit 5; payoff rises to zero at 105, stays flat to 110, then falls
        let s = strategy(vec![
            leg(OptionKind::Call, dec!(100), dec!(6), true, dec!(1)),
            leg(OptionKind::Call, dec!(105), dec!(0.5), false, dec!(1)),
            leg(OptionKind::Call, dec!(110), dec!(0.5), false, dec!(1)),
        ]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(payoff_at(&s, dec!(107)), dec!(0));
        assert_eq!(analysis.breakevens, vec![dec!(105), dec!(110)]);
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(0)));
        assert!(analysis.max_loss.is_unlimited());

        // plateau running off to infinity keeps only its left edge
        let capped = strategy(vec![
            leg(OptionKind::Call, dec!(100), dec!(2), true, dec!(1)),
            leg(OptionKind::Call, dec!(102), dec!(0), false, dec!(1)),
        ]);
        assert_eq!(PayoffAnalysis::analyze(&capped).breakevens, vec![dec!(102)]);
    }

    #[test]
    fn test_multiplier_scales_payoff() {
        let contract = OptionContract::equity(Symbol::equity("SPY"), OptionKind::Put, dec!(50), expiry())
            .with_quote(OptionQuote::new(expiry()).with_bid_ask(dec!(1.9), dec!(2.1)));
        let s = strategy(vec![StrategyLeg::buy(contract, dec!(3))]);
        let analysis = PayoffAnalysis::analyze(&s);
        assert_eq!(analysis.net_premium, dec!(600));
        assert_eq!(analysis.max_profit, Bound::Limited(dec!(14400)));
        assert_eq!(analysis.breakevens, vec![dec!(48)]);
    }
}

//! Strategy builders. Every builder validates its shape and then the legs
//! common checks before handing back an immutable [`Strategy`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tb_types::{
    Action, ExerciseStyle, OptionContract, OptionKind, Strategy, StrategyError, StrategyKind,
    StrategyLeg, Symbol,
};

use crate::chain::ChainSnapshot;

/// Contract terms shared by every leg of a built-in strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub underlying: Symbol,
    pub expiration: DateTime<Utc>,
    #[serde(default = "default_exercise_style")]
    pub exercise_style: ExerciseStyle,
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
}

fn default_exercise_style() -> ExerciseStyle {
    ExerciseStyle::European
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

impl ContractTemplate {
    pub fn new(underlying: Symbol, expiration: DateTime<Utc>) -> Self {
        Self {
            underlying,
            expiration,
            exercise_style: default_exercise_style(),
            multiplier: default_multiplier(),
        }
    }

    pub fn with_exercise_style(mut self, style: ExerciseStyle) -> Self {
        self.exercise_style = style;
        self
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.multiplier = multiplier;
        self
    }

    fn contract(&self, kind: OptionKind, strike: Decimal) -> OptionContract {
        OptionContract::new(
            self.underlying.clone(),
            kind,
            strike,
            self.expiration,
            self.exercise_style,
            self.multiplier,
        )
    }
}

/// Serializable description of a strategy, dispatched by
/// [`StrategyComposer::build_strategy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    SingleLeg {
        contract: ContractTemplate,
        option_kind: OptionKind,
        strike: Decimal,
        action: Action,
        quantity: Decimal,
    },
    Straddle {
        contract: ContractTemplate,
        strike: Decimal,
        action: Action,
        quantity: Decimal,
    },
    Strangle {
        contract: ContractTemplate,
        put_strike: Decimal,
        call_strike: Decimal,
        action: Action,
        quantity: Decimal,
    },
    VerticalSpread {
        contract: ContractTemplate,
        option_kind: OptionKind,
        long_strike: Decimal,
        short_strike: Decimal,
        quantity: Decimal,
    },
    IronCondor {
        contract: ContractTemplate,
        strikes: [Decimal; 4],
        quantity: Decimal,
    },
    Butterfly {
        contract: ContractTemplate,
        option_kind: OptionKind,
        lower_strike: Decimal,
        center_strike: Decimal,
        upper_strike: Decimal,
        quantity: Decimal,
    },
    Custom {
        name: String,
        legs: Vec<StrategyLeg>,
    },
}

impl StrategySpec {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategySpec::SingleLeg { .. } => StrategyKind::SingleLeg,
            StrategySpec::Straddle { .. } => StrategyKind::Straddle,
            StrategySpec::Strangle { .. } => StrategyKind::Strangle,
            StrategySpec::VerticalSpread { .. } => StrategyKind::VerticalSpread,
            StrategySpec::IronCondor { .. } => StrategyKind::IronCondor,
            StrategySpec::Butterfly { .. } => StrategyKind::Butterfly,
            StrategySpec::Custom { .. } => StrategyKind::Custom,
        }
    }
}

/// Builds strategies valid as of a point in time. When a chain is attached,
/// legs pick up the matching contract's quote so premiums are known.
#[derive(Debug, Clone)]
pub struct StrategyComposer {
    as_of: DateTime<Utc>,
    chain: Option<ChainSnapshot>,
}

impl StrategyComposer {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self { as_of, chain: None }
    }

    pub fn with_chain(mut self, chain: ChainSnapshot) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    fn leg(
        &self,
        template: &ContractTemplate,
        kind: OptionKind,
        strike: Decimal,
        action: Action,
        quantity: Decimal,
    ) -> StrategyLeg {
        let mut contract = template.contract(kind, strike);
        if let Some(quote) = self
            .chain
            .as_ref()
            .filter(|chain| chain.underlying == template.underlying)
            .and_then(|chain| chain.find(kind, strike, template.expiration))
            .and_then(|listed| listed.quote.clone())
        {
            contract = contract.with_quote(quote);
        }
        StrategyLeg::new(contract, action, quantity)
    }

    fn finish(&self, name: String, kind: StrategyKind, legs: Vec<StrategyLeg>) -> Result<Strategy, StrategyError> {
        let strategy = Strategy::new(name, kind, legs);
        validate_strategy(&strategy, self.as_of)?;
        debug!(name = %strategy.name, kind = %kind, legs = strategy.legs.len(), "strategy built");
        Ok(strategy)
    }

    pub fn single_leg(
        &self,
        template: &ContractTemplate,
        kind: OptionKind,
        strike: Decimal,
        action: Action,
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        let name = format!("{} {} {} {}", action, template.underlying.symbol, strike, kind);
        let legs = vec![self.leg(template, kind, strike, action, quantity)];
        self.finish(name, StrategyKind::SingleLeg, legs)
    }

    /// Call and put at one strike, both bought or both sold.
    pub fn straddle(
        &self,
        template: &ContractTemplate,
        strike: Decimal,
        action: Action,
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        let name = format!("{} {} {} straddle", action, template.underlying.symbol, strike);
        let legs = vec![
            self.leg(template, OptionKind::Call, strike, action, quantity),
            self.leg(template, OptionKind::Put, strike, action, quantity),
        ];
        self.finish(name, StrategyKind::Straddle, legs)
    }

    /// OTM put and OTM call; the call strike must be above the put strike.
    pub fn strangle(
        &self,
        template: &ContractTemplate,
        put_strike: Decimal,
        call_strike: Decimal,
        action: Action,
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        if call_strike <= put_strike {
            return Err(StrategyError::invalid(
                StrategyKind::Strangle.to_string(),
                format!(
                    "call strike {} must exceed put strike {}",
                    call_strike, put_strike
                ),
            ));
        }
        let name = format!(
            "{} {} {}/{} strangle",
            action, template.underlying.symbol, put_strike, call_strike
        );
        let legs = vec![
            self.leg(template, OptionKind::Put, put_strike, action, quantity),
            self.leg(template, OptionKind::Call, call_strike, action, quantity),
        ];
        self.finish(name, StrategyKind::Strangle, legs)
    }

    /// Buy one strike, sell another of the same kind and expiry.
    pub fn vertical_spread(
        &self,
        template: &ContractTemplate,
        kind: OptionKind,
        long_strike: Decimal,
        short_strike: Decimal,
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        if long_strike == short_strike {
            return Err(StrategyError::invalid(
                StrategyKind::VerticalSpread.to_string(),
                format!("long and short strikes are both {}", long_strike),
            ));
        }
        let name = format!(
            "{} {}/{} {} vertical",
            template.underlying.symbol, long_strike, short_strike, kind
        );
        let legs = vec![
            self.leg(template, kind, long_strike, Action::Buy, quantity),
            self.leg(template, kind, short_strike, Action::Sell, quantity),
        ];
        self.finish(name, StrategyKind::VerticalSpread, legs)
    }

    /// Buy put K1, sell put K2, sell call K3, buy call K4 with K1 < K2 < K3 < K4.
    pub fn iron_condor(
        &self,
        template: &ContractTemplate,
        strikes: [Decimal; 4],
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        if strikes.windows(2).any(|w| w[1] <= w[0]) {
            return Err(StrategyError::invalid(
                StrategyKind::IronCondor.to_string(),
                format!(
                    "strikes must be strictly ascending, got {} {} {} {}",
                    strikes[0], strikes[1], strikes[2], strikes[3]
                ),
            ));
        }
        let [k1, k2, k3, k4] = strikes;
        let name = format!(
            "{} {}/{}/{}/{} iron condor",
            template.underlying.symbol, k1, k2, k3, k4
        );
        let legs = vec![
            self.leg(template, OptionKind::Put, k1, Action::Buy, quantity),
            self.leg(template, OptionKind::Put, k2, Action::Sell, quantity),
            self.leg(template, OptionKind::Call, k3, Action::Sell, quantity),
            self.leg(template, OptionKind::Call, k4, Action::Buy, quantity),
        ];
        self.finish(name, StrategyKind::IronCondor, legs)
    }

    /// Buy lower, sell two of the center, buy upper; wings must be equal and
    /// non-zero.
    pub fn butterfly(
        &self,
        template: &ContractTemplate,
        kind: OptionKind,
        lower_strike: Decimal,
        center_strike: Decimal,
        upper_strike: Decimal,
        quantity: Decimal,
    ) -> Result<Strategy, StrategyError> {
        let lower_wing = center_strike - lower_strike;
        let upper_wing = upper_strike - center_strike;
        if lower_wing <= Decimal::ZERO || upper_wing <= Decimal::ZERO {
            return Err(StrategyError::invalid(
                StrategyKind::Butterfly.to_string(),
                format!(
                    "wing width must be positive, got strikes {} {} {}",
                    lower_strike, center_strike, upper_strike
                ),
            ));
        }
        if lower_wing != upper_wing {
            return Err(StrategyError::invalid(
                StrategyKind::Butterfly.to_string(),
                format!(
                    "wings must be symmetric around {}: lower width {} upper width {}",
                    center_strike, lower_wing, upper_wing
                ),
            ));
        }
        let name = format!(
            "{} {}/{}/{} {} butterfly",
            template.underlying.symbol, lower_strike, center_strike, upper_strike, kind
        );
        let legs = vec![
            self.leg(template, kind, lower_strike, Action::Buy, quantity),
            self.leg(template, kind, center_strike, Action::Sell, quantity * Decimal::TWO),
            self.leg(template, kind, upper_strike, Action::Buy, quantity),
        ];
        self.finish(name, StrategyKind::Butterfly, legs)
    }

    pub fn custom(&self, name: impl Into<String>, legs: Vec<StrategyLeg>) -> Result<Strategy, StrategyError> {
        self.finish(name.into(), StrategyKind::Custom, legs)
    }

    pub fn build_strategy(&self, spec: &StrategySpec) -> Result<Strategy, StrategyError> {
        match spec {
            StrategySpec::SingleLeg {
                contract,
                option_kind,
                strike,
                action,
                quantity,
            } => self.single_leg(contract, *option_kind, *strike, *action, *quantity),
            StrategySpec::Straddle {
                contract,
                strike,
                action,
                quantity,
            } => self.straddle(contract, *strike, *action, *quantity),
            StrategySpec::Strangle {
                contract,
                put_strike,
                call_strike,
                action,
                quantity,
            } => self.strangle(contract, *put_strike, *call_strike, *action, *quantity),
            StrategySpec::VerticalSpread {
                contract,
                option_kind,
                long_strike,
                short_strike,
                quantity,
            } => self.vertical_spread(contract, *option_kind, *long_strike, *short_strike, *quantity),
            StrategySpec::IronCondor {
                contract,
                strikes,
                quantity,
            } => self.iron_condor(contract, *strikes, *quantity),
            StrategySpec::Butterfly {
                contract,
                option_kind,
                lower_strike,
                center_strike,
                upper_strike,
                quantity,
            } => self.butterfly(
                contract,
                *option_kind,
                *lower_strike,
                *center_strike,
                *upper_strike,
                *quantity,
            ),
            StrategySpec::Custom { name, legs } => self.custom(name.clone(), legs.clone()),
        }
    }
}

/// Checks every strategy must pass regardless of kind: at least one leg,
/// positive quantities, strikes and multipliers, expiries after `as_of`, one
/// underlying.
pub fn validate_strategy(strategy: &Strategy, as_of: DateTime<Utc>) -> Result<(), StrategyError> {
    let kind = strategy.kind.to_string();
    let Some(first) = strategy.legs.first() else {
        return Err(StrategyError::invalid(kind, "strategy has no legs"));
    };
    let underlying = &first.contract.underlying;

    for (index, leg) in strategy.legs.iter().enumerate() {
        let contract = &leg.contract;
        if leg.quantity <= Decimal::ZERO {
            return Err(StrategyError::invalid(
                kind,
                format!("leg {} quantity {} must be positive", index, leg.quantity),
            ));
        }
        if contract.strike <= Decimal::ZERO {
            return Err(StrategyError::invalid(
                kind,
                format!("leg {} strike {} must be positive", index, contract.strike),
            ));
        }
        if contract.multiplier <= Decimal::ZERO {
            return Err(StrategyError::invalid(
                kind,
                format!("leg {} multiplier {} must be positive", index, contract.multiplier),
            ));
        }
        if contract.expiration <= as_of {
            return Err(StrategyError::invalid(
                kind,
                format!(
                    "leg {} expiry {} is not after {}",
                    index, contract.expiration, as_of
                ),
            ));
        }
        if &contract.underlying != underlying {
            return Err(StrategyError::invalid(
                kind,
                format!(
                    "leg {} underlying {} differs from {}",
                    index, contract.underlying.symbol, underlying.symbol
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SyntheticChain;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap()
    }

    fn template() -> ContractTemplate {
        ContractTemplate::new(Symbol::equity("SPY"), as_of() + Duration::days(45))
    }

    fn assert_rejected(result: Result<Strategy, StrategyError>, needle: &str) {
        match result {
            Err(StrategyError::InvalidConfiguration { message, .. }) => {
                assert!(message.contains(needle), "message {:?} lacks {:?}", message, needle)
            }
            Ok(strategy) => panic!("expected rejection, built {}", strategy.name),
        }
    }

    #[test]
    fn test_straddle_shares_strike_and_expiry() {
        let strategy = StrategyComposer::new(as_of())
            .straddle(&template(), dec!(450), Action::Buy, dec!(2))
            .unwrap();
        assert_eq!(strategy.kind, StrategyKind::Straddle);
        assert_eq!(strategy.legs.len(), 2);
        assert_eq!(strategy.strikes(), vec![dec!(450)]);
        assert!(strategy.legs.iter().all(|l| l.is_long() && l.quantity == dec!(2)));
    }

    #[test]
    fn test_strangle_rejects_inverted_strikes() {
        let composer = StrategyComposer::new(as_of());
        assert_rejected(
            composer.strangle(&template(), dec!(460), dec!(440), Action::Sell, dec!(1)),
            "440",
        );
        assert_rejected(
            composer.strangle(&template(), dec!(450), dec!(450), Action::Sell, dec!(1)),
            "450",
        );
        let ok = composer
            .strangle(&template(), dec!(440), dec!(460), Action::Sell, dec!(1))
            .unwrap();
        assert_eq!(ok.legs[0].contract.kind, OptionKind::Put);
        assert_eq!(ok.legs[1].contract.strike, dec!(460));
    }

    #[test]
    fn test_iron_condor_leg_layout() {
        let strategy = StrategyComposer::new(as_of())
            .iron_condor(&template(), [dec!(420), dec!(430), dec!(470), dec!(480)], dec!(1))
            .unwrap();
        let layout: Vec<_> = strategy
            .legs
            .iter()
            .map(|l| (l.contract.kind, l.contract.strike, l.action))
            .collect();
        assert_eq!(
            layout,
            vec![
                (OptionKind::Put, dec!(420), Action::Buy),
                (OptionKind::Put, dec!(430), Action::Sell),
                (OptionKind::Call, dec!(470), Action::Sell),
                (OptionKind::Call, dec!(480), Action::Buy),
            ]
        );
    }

    #[test]
    fn test_iron_condor_rejects_non_ascending() {
        let composer = StrategyComposer::new(as_of());
        assert_rejected(
            composer.iron_condor(&template(), [dec!(420), dec!(470), dec!(430), dec!(480)], dec!(1)),
            "strictly ascending",
        );
        assert_rejected(
            composer.iron_condor(&template(), [dec!(420), dec!(430), dec!(430), dec!(480)], dec!(1)),
            "strictly ascending",
        );
    }

    #[test]
    fn test_butterfly_wings() {
        let composer = StrategyComposer::new(as_of());
        let fly = composer
            .butterfly(&template(), OptionKind::Call, dec!(440), dec!(450), dec!(460), dec!(1))
            .unwrap();
        assert_eq!(fly.legs[1].quantity, dec!(2));
        assert!(fly.legs[1].is_short());

        assert_rejected(
            composer.butterfly(&template(), OptionKind::Call, dec!(440), dec!(450), dec!(470), dec!(1)),
            "symmetric",
        );
        assert_rejected(
            composer.butterfly(&template(), OptionKind::Put, dec!(450), dec!(450), dec!(450), dec!(1)),
            "positive",
        );
    }

    #[test]
    fn test_vertical_requires_distinct_strikes() {
        let composer = StrategyComposer::new(as_of());
        assert_rejected(
            composer.vertical_spread(&template(), OptionKind::Call, dec!(450), dec!(450), dec!(1)),
            "450",
        );
        let bull = composer
            .vertical_spread(&template(), OptionKind::Call, dec!(450), dec!(460), dec!(3))
            .unwrap();
        assert!(bull.legs[0].is_long());
        assert!(bull.legs[1].is_short());
    }

    #[test]
    fn test_common_leg_checks() {
        let composer = StrategyComposer::new(as_of());
        assert_rejected(
            composer.single_leg(&template(), OptionKind::Call, dec!(450), Action::Buy, dec!(0)),
            "quantity 0",
        );
        assert_rejected(
            composer.single_leg(&template(), OptionKind::Call, dec!(-5), Action::Buy, dec!(1)),
            "strike -5",
        );
        let expired = ContractTemplate::new(Symbol::equity("SPY"), as_of());
        assert_rejected(
            composer.single_leg(&expired, OptionKind::Put, dec!(450), Action::Sell, dec!(1)),
            "not after",
        );
    }

    #[test]
    fn test_custom_rejects_mixed_underlyings_and_empty() {
        let composer = StrategyComposer::new(as_of());
        let expiry = as_of() + Duration::days(10);
        let spy = OptionContract::european(Symbol::equity("SPY"), OptionKind::Call, dec!(450), expiry);
        let qqq = OptionContract::european(Symbol::equity("QQQ"), OptionKind::Call, dec!(380), expiry);
        assert_rejected(
            composer.custom(
                "pair",
                vec![StrategyLeg::buy(spy.clone(), dec!(1)), StrategyLeg::sell(qqq, dec!(1))],
            ),
            "QQQ",
        );
        assert_rejected(composer.custom("nothing", vec![]), "no legs");
        assert!(composer
            .custom("calendar-free", vec![StrategyLeg::buy(spy, dec!(1))])
            .is_ok());
    }

    #[test]
    fn test_chain_quotes_attach_to_legs() {
        let chain = SyntheticChain::new(Symbol::equity("SPY"), vec![template().expiration], 450.0, 0.2)
            .with_strikes(11, 10.0)
            .build(as_of())
            .unwrap();
        let strategy = StrategyComposer::new(as_of())
            .with_chain(chain)
            .straddle(&template(), dec!(450), Action::Buy, dec!(1))
            .unwrap();
        assert!(strategy.legs.iter().all(|l| l.premium().is_some()));

        let unlisted = StrategyComposer::new(as_of())
            .straddle(&template(), dec!(455), Action::Buy, dec!(1))
            .unwrap();
        assert!(unlisted.legs.iter().all(|l| l.premium().is_none()));
    }

    #[test]
    fn test_build_strategy_from_json() {
        let json = format!(
            r#"{{
                "kind": "iron_condor",
                "contract": {{
                    "underlying": {{"symbol": "SPY", "exchange": "NYSE", "asset_class": "Equity"}},
                    "expiration": "{}"
                }},
                "strikes": ["420", "430", "470", "480"],
                "quantity": "1"
            }}"#,
            template().expiration.to_rfc3339()
        );
        let spec: StrategySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec.kind(), StrategyKind::IronCondor);
        let strategy = StrategyComposer::new(as_of()).build_strategy(&spec).unwrap();
        assert_eq!(strategy.legs.len(), 4);
        assert_eq!(strategy.legs[0].contract.multiplier, Decimal::ONE);
        assert_eq!(strategy.legs[0].contract.exercise_style, ExerciseStyle::European);
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Symbol;

/// Seconds in the 365.25-day year used for every year fraction in the system.
pub const SECONDS_PER_YEAR: f64 = 365.25 * 86400.0;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "Call"),
            OptionKind::Put => write!(f, "Put"),
        }
    }
}

/// Exercise style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExerciseStyle {
    /// Can only be exercised at expiration.
    European,
    /// Can be exercised any time before expiration.
    American,
}

impl fmt::Display for ExerciseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExerciseStyle::European => write!(f, "European"),
            ExerciseStyle::American => write!(f, "American"),
        }
    }
}

/// Market fields observed for a contract at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    /// Annualised implied volatility quoted by the venue (0.55 = 55 %).
    pub implied_volatility: Option<f64>,
    pub open_interest: Decimal,
    pub volume: Decimal,
    pub as_of: DateTime<Utc>,
}

impl OptionQuote {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            bid: None,
            ask: None,
            last: None,
            implied_volatility: None,
            open_interest: Decimal::ZERO,
            volume: Decimal::ZERO,
            as_of,
        }
    }

    pub fn with_bid_ask(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    pub fn with_last(mut self, last: Decimal) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_implied_volatility(mut self, iv: f64) -> Self {
        self.implied_volatility = Some(iv);
        self
    }

    /// Mid of a two-sided market, falling back to the last trade.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask >= bid => {
                Some((bid + ask) / Decimal::TWO)
            }
            _ => self.last,
        }
    }
}

/// A single options contract, optionally carrying the quote snapshot it was
/// observed with. A new snapshot is a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol.
    pub underlying: Symbol,
    /// Call or put.
    pub kind: OptionKind,
    /// Strike price.
    pub strike: Decimal,
    /// Expiration timestamp (UTC).
    pub expiration: DateTime<Utc>,
    /// Exercise style.
    pub exercise_style: ExerciseStyle,
    /// Contract multiplier (1 for coin-settled crypto options, 100 for equity options).
    pub multiplier: Decimal,
    /// Market snapshot, if any.
    pub quote: Option<OptionQuote>,
}

impl OptionContract {
    pub fn new(
        underlying: Symbol,
        kind: OptionKind,
        strike: Decimal,
        expiration: DateTime<Utc>,
        exercise_style: ExerciseStyle,
        multiplier: Decimal,
    ) -> Self {
        Self {
            underlying,
            kind,
            strike,
            expiration,
            exercise_style,
            multiplier,
            quote: None,
        }
    }

    /// European contract with multiplier 1.
    pub fn european(
        underlying: Symbol,
        kind: OptionKind,
        strike: Decimal,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self::new(
            underlying,
            kind,
            strike,
            expiration,
            ExerciseStyle::European,
            Decimal::ONE,
        )
    }

    /// Convenience constructor for a standard equity option (multiplier = 100, American).
    pub fn equity(
        underlying: Symbol,
        kind: OptionKind,
        strike: Decimal,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self::new(
            underlying,
            kind,
            strike,
            expiration,
            ExerciseStyle::American,
            Decimal::from(100),
        )
    }

    /// Same contract with a fresh quote snapshot.
    pub fn with_quote(&self, quote: OptionQuote) -> Self {
        Self {
            quote: Some(quote),
            ..self.clone()
        }
    }

    /// Same contract at another strike, without a quote.
    pub fn with_strike(&self, strike: Decimal) -> Self {
        Self {
            strike,
            quote: None,
            ..self.clone()
        }
    }

    /// Same contract as the opposite kind, without a quote.
    pub fn with_kind(&self, kind: OptionKind) -> Self {
        Self {
            kind,
            quote: None,
            ..self.clone()
        }
    }

    /// Years remaining until expiration from `now`.
    /// Returns 0 if already expired.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> f64 {
        let secs = (self.expiration - now).num_seconds();
        if secs <= 0 {
            0.0
        } else {
            secs as f64 / SECONDS_PER_YEAR
        }
    }

    /// True if the option has expired relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }

    /// Intrinsic value given the current underlying price.
    pub fn intrinsic_value(&self, spot: Decimal) -> Decimal {
        let iv = match self.kind {
            OptionKind::Call => spot - self.strike,
            OptionKind::Put => self.strike - spot,
        };
        if iv > Decimal::ZERO {
            iv
        } else {
            Decimal::ZERO
        }
    }

    /// True when the option is in-the-money.
    pub fn is_itm(&self, spot: Decimal) -> bool {
        self.intrinsic_value(spot) > Decimal::ZERO
    }

    /// True when at-the-money (strike == spot, within tolerance).
    pub fn is_atm(&self, spot: Decimal, tolerance: Decimal) -> bool {
        (self.strike - spot).abs() <= tolerance
    }

    /// Observed mid price from the attached quote, if any.
    pub fn mid_price(&self) -> Option<Decimal> {
        self.quote.as_ref().and_then(OptionQuote::mid)
    }

    /// Implied volatility from the attached quote, if any.
    pub fn quoted_volatility(&self) -> Option<f64> {
        self.quote.as_ref().and_then(|q| q.implied_volatility)
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} ({})",
            self.underlying.symbol,
            self.expiration.format("%Y-%m-%d"),
            self.strike,
            self.kind,
            self.exercise_style,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_contract(kind: OptionKind, strike: Decimal) -> OptionContract {
        let underlying = Symbol::crypto("BTC");
        let expiration = Utc.with_ymd_and_hms(2026, 6, 26, 8, 0, 0).unwrap();
        OptionContract::european(underlying, kind, strike, expiration)
    }

    #[test]
    fn test_intrinsic_value_call() {
        let c = sample_contract(OptionKind::Call, dec!(150));
        assert_eq!(c.intrinsic_value(dec!(160)), dec!(10));
        assert_eq!(c.intrinsic_value(dec!(140)), dec!(0));
    }

    #[test]
    fn test_intrinsic_value_put() {
        let c = sample_contract(OptionKind::Put, dec!(150));
        assert_eq!(c.intrinsic_value(dec!(140)), dec!(10));
        assert_eq!(c.intrinsic_value(dec!(160)), dec!(0));
    }

    #[test]
    fn test_is_itm_and_atm() {
        let call = sample_contract(OptionKind::Call, dec!(150));
        assert!(call.is_itm(dec!(160)));
        assert!(!call.is_itm(dec!(140)));
        assert!(call.is_atm(dec!(150.5), dec!(1)));
        assert!(!call.is_atm(dec!(155), dec!(1)));
    }

    #[test]
    fn test_time_to_expiry() {
        let c = sample_contract(OptionKind::Call, dec!(150));
        let now = Utc.with_ymd_and_hms(2026, 3, 26, 8, 0, 0).unwrap();
        let tte = c.time_to_expiry(now);
        // 92 days ≈ 0.252 years
        assert!(tte > 0.24 && tte < 0.26, "tte = {tte}");
        let after = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(c.time_to_expiry(after), 0.0);
        assert!(c.is_expired(after));
    }

    #[test]
    fn test_with_quote_is_a_new_value() {
        let c = sample_contract(OptionKind::Call, dec!(150));
        let as_of = Utc.with_ymd_and_hms(2026, 3, 26, 8, 0, 0).unwrap();
        let quoted = c.with_quote(OptionQuote::new(as_of).with_bid_ask(dec!(4), dec!(5)));
        assert!(c.quote.is_none());
        assert_eq!(quoted.mid_price(), Some(dec!(4.5)));
        assert_eq!(quoted.strike, c.strike);
    }

    #[test]
    fn test_mid_falls_back_to_last() {
        let as_of = Utc.with_ymd_and_hms(2026, 3, 26, 8, 0, 0).unwrap();
        let quote = OptionQuote::new(as_of).with_last(dec!(3.2));
        assert_eq!(quote.mid(), Some(dec!(3.2)));
        let crossed = OptionQuote::new(as_of).with_bid_ask(dec!(5), dec!(4));
        assert_eq!(crossed.mid(), None);
    }

    #[test]
    fn test_display() {
        let c = sample_contract(OptionKind::Call, dec!(150));
        let s = format!("{c}");
        assert!(s.contains("BTC"));
        assert!(s.contains("150"));
        assert!(s.contains("Call"));
    }
}

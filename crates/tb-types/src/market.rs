use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a financial symbol with exchange information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub exchange: String,
    pub asset_class: AssetClass,
}

impl Symbol {
    pub fn new(symbol: &str, exchange: &str, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            asset_class,
        }
    }

    pub fn equity(symbol: &str) -> Self {
        Self::new(symbol, AssetClass::Equity.default_exchange(), AssetClass::Equity)
    }

    pub fn crypto(symbol: &str) -> Self {
        Self::new(symbol, AssetClass::Crypto.default_exchange(), AssetClass::Crypto)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Asset classes an option underlying can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Crypto,
    Forex,
    Commodity,
    Index,
}

impl AssetClass {
    /// Returns true if this asset class trades 24/7 (no market close/weekends).
    pub fn is_24_7(&self) -> bool {
        matches!(self, AssetClass::Crypto)
    }

    /// Default exchange identifier for this asset class.
    pub fn default_exchange(&self) -> &'static str {
        match self {
            AssetClass::Equity => "NASDAQ",
            AssetClass::Crypto => "DERIBIT",
            AssetClass::Forex => "FOREX",
            AssetClass::Commodity => "CME",
            AssetClass::Index => "CBOE",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Equity => "Equity",
            AssetClass::Crypto => "Crypto",
            AssetClass::Forex => "Forex",
            AssetClass::Commodity => "Commodity",
            AssetClass::Index => "Index",
        };
        write!(f, "{}", s)
    }
}

/// One daily observation of an instrument as delivered by the historical
/// data provider: OHLCV plus an optional implied volatility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub implied_volatility: Option<f64>,
}

impl SeriesPoint {
    pub fn new(
        date: NaiveDate,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            implied_volatility: None,
        }
    }

    /// A point where only the close is known (open/high/low set to close).
    pub fn from_close(date: NaiveDate, close: Decimal) -> Self {
        Self::new(date, close, close, close, close, Decimal::ZERO)
    }

    pub fn with_implied_volatility(mut self, iv: f64) -> Self {
        self.implied_volatility = Some(iv);
        self
    }

    /// Calculate typical price (HLC/3)
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// Calculate true range
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let high_low = self.high - self.low;
        match prev_close {
            Some(prev) => {
                let high_prev = (self.high - prev).abs();
                let low_prev = (self.low - prev).abs();
                high_low.max(high_prev).max(low_prev)
            }
            None => high_low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_creation() {
        let symbol = Symbol::equity("AAPL");
        assert_eq!(symbol.symbol, "AAPL");
        assert_eq!(symbol.exchange, "NASDAQ");
        assert_eq!(symbol.asset_class, AssetClass::Equity);
        assert_eq!(symbol.to_string(), "NASDAQ:AAPL");
    }

    #[test]
    fn test_crypto_is_24_7() {
        let btc = Symbol::crypto("BTC");
        assert!(btc.asset_class.is_24_7());
        assert!(!AssetClass::Equity.is_24_7());
    }

    #[test]
    fn test_series_point_calculations() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let point = SeriesPoint::new(date, dec!(100), dec!(105), dec!(95), dec!(102), dec!(1000));

        assert_eq!(point.typical_price(), dec!(302) / dec!(3));
        assert_eq!(point.true_range(None), dec!(10));
        assert_eq!(point.true_range(Some(dec!(110))), dec!(15));
    }

    #[test]
    fn test_from_close_has_no_iv() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let point = SeriesPoint::from_close(date, dec!(50));
        assert_eq!(point.high, dec!(50));
        assert!(point.implied_volatility.is_none());
        assert_eq!(point.with_implied_volatility(0.3).implied_volatility, Some(0.3));
    }
}

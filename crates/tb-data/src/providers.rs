use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use tb_options::ChainSnapshot;
use tb_types::{DataError, OptionContract, OptionKind, SeriesPoint, Symbol, TbResult};

use crate::loaders::CsvSeriesLoader;

/// Source of daily historical series, keyed by instrument name.
///
/// Underlyings are keyed by their ticker; option contracts by
/// [`contract_instrument`].
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync + std::fmt::Debug {
    /// Points with `start <= date <= end`, ascending by date.
    async fn get_series(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TbResult<Vec<SeriesPoint>>;

    /// Chain snapshots observed between `start` and `end`, one per day at
    /// most. Providers without chain history return none.
    async fn get_chain_history(
        &self,
        _underlying: &Symbol,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> TbResult<Vec<ChainSnapshot>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str;
}

/// Live venue connection.
#[async_trait]
pub trait MarketDataConnector: Send + Sync + std::fmt::Debug {
    async fn get_options_chain(&self, currency: &str) -> TbResult<ChainSnapshot>;

    async fn get_underlying_price(&self, symbol: &Symbol) -> TbResult<Decimal>;
}

/// Series key of an option contract, e.g. `SPY-20260619-450-C`.
pub fn contract_instrument(contract: &OptionContract) -> String {
    let kind = match contract.kind {
        OptionKind::Call => "C",
        OptionKind::Put => "P",
    };
    format!(
        "{}-{}-{}-{}",
        contract.underlying.symbol,
        contract.expiration.format("%Y%m%d"),
        contract.strike.normalize(),
        kind
    )
}

fn in_range(points: &[SeriesPoint], start: NaiveDate, end: NaiveDate) -> Vec<SeriesPoint> {
    points
        .iter()
        .filter(|p| p.date >= start && p.date <= end)
        .cloned()
        .collect()
}

/// Provider over series held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    series: HashMap<String, Vec<SeriesPoint>>,
    chains: HashMap<String, Vec<ChainSnapshot>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, instrument: impl Into<String>, mut points: Vec<SeriesPoint>) -> Self {
        points.sort_by_key(|p| p.date);
        self.series.insert(instrument.into(), points);
        self
    }

    pub fn with_chain(mut self, chain: ChainSnapshot) -> Self {
        let history = self.chains.entry(chain.underlying.symbol.clone()).or_default();
        history.push(chain);
        history.sort_by_key(|c| c.as_of);
        self
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

#[async_trait]
impl HistoricalDataProvider for InMemoryProvider {
    async fn get_series(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TbResult<Vec<SeriesPoint>> {
        let points = self
            .series
            .get(instrument)
            .ok_or_else(|| DataError::SourceNotFound(instrument.to_string()))?;
        Ok(in_range(points, start, end))
    }

    async fn get_chain_history(
        &self,
        underlying: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TbResult<Vec<ChainSnapshot>> {
        Ok(self
            .chains
            .get(&underlying.symbol)
            .map(|history| {
                history
                    .iter()
                    .filter(|c| {
                        let day = c.as_of.date_naive();
                        day >= start && day <= end
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Reads `{directory}/{instrument}.csv` per request.
#[derive(Debug, Clone)]
pub struct CsvSeriesProvider {
    pub data_directory: PathBuf,
    pub file_pattern: String,
    loader: CsvSeriesLoader,
}

impl CsvSeriesProvider {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            data_directory: data_directory.as_ref().to_path_buf(),
            file_pattern: "{instrument}.csv".to_string(),
            loader: CsvSeriesLoader::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.file_pattern = pattern.to_string();
        self
    }

    pub fn file_path(&self, instrument: &str) -> PathBuf {
        self.data_directory
            .join(self.file_pattern.replace("{instrument}", instrument))
    }
}

#[async_trait]
impl HistoricalDataProvider for CsvSeriesProvider {
    async fn get_series(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TbResult<Vec<SeriesPoint>> {
        let path = self.file_path(instrument);
        if !path.exists() {
            return Err(DataError::SourceNotFound(path.to_string_lossy().to_string()).into());
        }
        let loader = self.loader.clone();
        let points = tokio::task::spawn_blocking(move || loader.load_file(&path))
            .await
            .map_err(|e| tb_types::internal_error!("CSV load task failed: {}", e))??;
        tracing::debug!(instrument, rows = points.len(), "loaded CSV series");
        Ok(in_range(&points, start, end))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Connector answering from fixed snapshots.
#[derive(Debug, Default, Clone)]
pub struct StaticConnector {
    chains: HashMap<String, ChainSnapshot>,
    prices: HashMap<Symbol, Decimal>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, currency: impl Into<String>, chain: ChainSnapshot) -> Self {
        self.prices
            .insert(chain.underlying.clone(), chain.underlying_price);
        self.chains.insert(currency.into(), chain);
        self
    }

    pub fn with_price(mut self, symbol: Symbol, price: Decimal) -> Self {
        self.prices.insert(symbol, price);
        self
    }
}

#[async_trait]
impl MarketDataConnector for StaticConnector {
    async fn get_options_chain(&self, currency: &str) -> TbResult<ChainSnapshot> {
        self.chains
            .get(currency)
            .cloned()
            .ok_or_else(|| DataError::SourceNotFound(format!("options chain {}", currency)).into())
    }

    async fn get_underlying_price(&self, symbol: &Symbol) -> TbResult<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| DataError::SourceNotFound(format!("price {}", symbol)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tb_types::TbError;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[test]
    fn test_contract_instrument_name() {
        let contract = OptionContract::european(
            Symbol::equity("SPY"),
            OptionKind::Put,
            dec!(450.50),
            Utc.with_ymd_and_hms(2026, 6, 19, 20, 0, 0).unwrap(),
        );
        assert_eq!(contract_instrument(&contract), "SPY-20260619-450.5-P");
        let whole = contract.with_strike(dec!(450.00));
        assert_eq!(contract_instrument(&whole), "SPY-20260619-450-P");
    }

    #[tokio::test]
    async fn test_in_memory_range_filter() {
        let provider = InMemoryProvider::new().with_series(
            "SPY",
            vec![
                SeriesPoint::from_close(day(5), dec!(102)),
                SeriesPoint::from_close(day(2), dec!(100)),
                SeriesPoint::from_close(day(3), dec!(101)),
            ],
        );
        let points = provider.get_series("SPY", day(3), day(10)).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, day(3));
        assert_eq!(points[1].close, dec!(102));

        let missing = provider.get_series("QQQ", day(1), day(10)).await;
        assert!(matches!(missing, Err(TbError::Data(DataError::SourceNotFound(_)))));
    }

    #[tokio::test]
    async fn test_chain_history_window() {
        let chain = |d: u32| {
            ChainSnapshot::new(
                Symbol::equity("SPY"),
                dec!(450),
                0.05,
                Utc.with_ymd_and_hms(2026, 1, d, 0, 0, 0).unwrap(),
            )
        };
        let provider = InMemoryProvider::new().with_chain(chain(4)).with_chain(chain(2));
        let history = provider
            .get_chain_history(&Symbol::equity("SPY"), day(1), day(3))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(provider
            .get_chain_history(&Symbol::equity("QQQ"), day(1), day(31))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_csv_provider_reads_instrument_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("SPY.csv")).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2026-01-02,100,101,99,100.5,1000").unwrap();
        writeln!(file, "2026-01-05,100.5,102,100,101.5,1200").unwrap();
        drop(file);

        let provider = CsvSeriesProvider::new(dir.path());
        let points = provider.get_series("SPY", day(1), day(31)).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, dec!(101.5));
        assert!(provider.get_series("QQQ", day(1), day(31)).await.is_err());
    }

    #[tokio::test]
    async fn test_static_connector() {
        let chain = ChainSnapshot::new(
            Symbol::crypto("BTC"),
            dec!(60000),
            0.0,
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
        );
        let connector = StaticConnector::new().with_chain("BTC", chain);
        assert_eq!(connector.get_options_chain("BTC").await.unwrap().underlying_price, dec!(60000));
        assert_eq!(
            connector.get_underlying_price(&Symbol::crypto("BTC")).await.unwrap(),
            dec!(60000)
        );
        assert!(connector.get_options_chain("ETH").await.is_err());
    }
}

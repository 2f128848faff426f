use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;

use tb_types::{DataError, SeriesPoint, TbResult};

#[derive(Debug, Deserialize)]
struct SeriesRecord {
    #[serde(alias = "Date", alias = "timestamp")]
    date: String,
    #[serde(alias = "Open")]
    open: String,
    #[serde(alias = "High")]
    high: String,
    #[serde(alias = "Low")]
    low: String,
    #[serde(alias = "Close")]
    close: String,
    #[serde(alias = "Volume", default)]
    volume: Option<String>,
    #[serde(alias = "iv", alias = "IV", default)]
    implied_volatility: Option<f64>,
}

/// Loads `date,open,high,low,close,volume[,implied_volatility]` files.
#[derive(Debug, Clone)]
pub struct CsvSeriesLoader {
    delimiter: u8,
    validate: bool,
}

impl Default for CsvSeriesLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvSeriesLoader {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            validate: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Skip [`validate_series`] after parsing.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> TbResult<Vec<SeriesPoint>> {
        let path = path.as_ref();
        tracing::info!("Loading CSV series from: {}", path.display());
        let file = std::fs::File::open(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("series")
            .to_string();
        self.load_reader(&name, file)
    }

    pub fn load_reader<R: Read>(&self, instrument: &str, reader: R) -> TbResult<Vec<SeriesPoint>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut points = Vec::new();
        for (row, result) in reader.deserialize::<SeriesRecord>().enumerate() {
            let record = result.map_err(|e| DataError::ParseError {
                message: format!("CSV parsing error at row {}: {}", row + 1, e),
            })?;
            points.push(parse_record(&record, row + 1)?);
        }

        if self.validate {
            validate_series(instrument, &points)?;
        }
        Ok(points)
    }
}

fn parse_record(record: &SeriesRecord, row: usize) -> Result<SeriesPoint, DataError> {
    let volume = match record.volume.as_deref() {
        None | Some("") => Decimal::ZERO,
        Some(v) => parse_decimal(v, "volume", row)?,
    };
    let mut point = SeriesPoint::new(
        parse_date(&record.date, row)?,
        parse_decimal(&record.open, "open", row)?,
        parse_decimal(&record.high, "high", row)?,
        parse_decimal(&record.low, "low", row)?,
        parse_decimal(&record.close, "close", row)?,
        volume,
    );
    point.implied_volatility = record.implied_volatility;
    Ok(point)
}

fn parse_date(value: &str, row: usize) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|e| DataError::ParseError {
            message: format!("Date parsing error at row {} for '{}': {}", row, value, e),
        })
}

fn parse_decimal(value: &str, field: &str, row: usize) -> Result<Decimal, DataError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|e| DataError::ParseError {
            message: format!("Failed to parse {} value '{}' at row {}: {}", field, value, row, e),
        })
}

/// Every consistency problem in a series, in row order.
pub fn series_issues(points: &[SeriesPoint]) -> Vec<String> {
    let mut issues = Vec::new();

    for (i, point) in points.iter().enumerate() {
        if point.open <= Decimal::ZERO
            || point.high <= Decimal::ZERO
            || point.low <= Decimal::ZERO
            || point.close <= Decimal::ZERO
        {
            issues.push(format!("Non-positive price on {} (row {})", point.date, i));
        }
        if point.volume < Decimal::ZERO {
            issues.push(format!("Negative volume on {} (row {})", point.date, i));
        }
        if point.high < point.low {
            issues.push(format!("High < Low on {} (row {})", point.date, i));
        }
        if let Some(iv) = point.implied_volatility {
            if !iv.is_finite() || iv <= 0.0 {
                issues.push(format!("Implied volatility {} on {} (row {})", iv, point.date, i));
            }
        }
    }

    for (i, pair) in points.windows(2).enumerate() {
        if pair[1].date == pair[0].date {
            issues.push(format!("Duplicate date {} (row {})", pair[1].date, i + 1));
        } else if pair[1].date < pair[0].date {
            issues.push(format!("Date {} out of order (row {})", pair[1].date, i + 1));
        }
    }

    issues
}

/// Rejects a series with any [`series_issues`].
pub fn validate_series(instrument: &str, points: &[SeriesPoint]) -> Result<(), DataError> {
    let issues = series_issues(points);
    if issues.is_empty() {
        return Ok(());
    }
    Err(DataError::InvalidSeries {
        instrument: instrument.to_string(),
        message: issues.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tb_types::TbError;
    use tempfile::NamedTempFile;

    #[test]
    fn test_csv_loading() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "date,open,high,low,close,volume,implied_volatility").unwrap();
        writeln!(temp_file, "2026-01-02,100.0,105.0,98.0,102.0,10000,0.21").unwrap();
        writeln!(temp_file, "2026-01-05,102.0,107.0,101.0,105.0,15000,").unwrap();
        temp_file.flush().unwrap();

        let points = CsvSeriesLoader::new().load_file(temp_file.path()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        assert_eq!(points[0].close, dec!(102));
        assert_eq!(points[0].implied_volatility, Some(0.21));
        assert_eq!(points[1].volume, dec!(15000));
        assert_eq!(points[1].implied_volatility, None);
    }

    #[test]
    fn test_optional_columns_may_be_absent() {
        let data = "Date,Open,High,Low,Close\n2026-01-02T16:00:00Z,10,11,9,10.5\n";
        let points = CsvSeriesLoader::new().load_reader("X", data.as_bytes()).unwrap();
        assert_eq!(points[0].volume, Decimal::ZERO);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
    }

    #[test]
    fn test_bad_number_reports_row() {
        let data = "date,open,high,low,close,volume\n2026-01-02,10,11,9,abc,5\n";
        let err = CsvSeriesLoader::new().load_reader("X", data.as_bytes()).unwrap_err();
        match err {
            TbError::Data(DataError::ParseError { message }) => {
                assert!(message.contains("close"));
                assert!(message.contains("row 1"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_disorder_and_duplicates() {
        let data = "date,open,high,low,close,volume\n\
                    2026-01-05,10,11,9,10,1\n\
                    2026-01-02,10,11,9,10,1\n\
                    2026-01-02,10,11,9,10,1\n";
        let err = CsvSeriesLoader::new().load_reader("SPY", data.as_bytes()).unwrap_err();
        let TbError::Data(DataError::InvalidSeries { instrument, message }) = err else {
            panic!("expected invalid series");
        };
        assert_eq!(instrument, "SPY");
        assert!(message.contains("out of order"));
        assert!(message.contains("Duplicate"));

        let lenient = CsvSeriesLoader::new()
            .without_validation()
            .load_reader("SPY", data.as_bytes())
            .unwrap();
        assert_eq!(lenient.len(), 3);
    }

    #[test]
    fn test_series_issues_flags_non_positive_prices() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let points = vec![
            SeriesPoint::from_close(day, dec!(0)),
            SeriesPoint::from_close(day.succ_opt().unwrap(), dec!(5)).with_implied_volatility(-0.1),
        ];
        let issues = series_issues(&points);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("Non-positive"));
        assert!(issues[1].contains("Implied volatility"));
    }
}

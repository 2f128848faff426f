use thiserror::Error;

/// Main error type for the ThetaBack system
#[derive(Error, Debug)]
pub enum TbError {
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Volatility error: {0}")]
    Volatility(#[from] VolatilityError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] BacktestError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pricing model and Greeks failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: String,
    },

    #[error(
        "{method} did not converge after {iterations} iterations (last estimate {last_estimate}): {context}"
    )]
    Convergence {
        method: &'static str,
        last_estimate: f64,
        iterations: usize,
        context: String,
    },

    #[error("Greeks range violation: {greek}={value} outside allowed range ({context})")]
    GreeksRangeViolation {
        greek: &'static str,
        value: f64,
        context: String,
    },
}

impl PricingError {
    pub fn invalid(name: &'static str, value: f64, reason: impl Into<String>) -> Self {
        PricingError::InvalidParameter {
            name,
            value,
            reason: reason.into(),
        }
    }
}

/// Volatility estimation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VolatilityError {
    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: String,
    },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Model fit failed after {iterations} iterations (last estimate {last_estimate:?}): {message}")]
    ModelFit {
        message: String,
        last_estimate: Vec<f64>,
        iterations: usize,
    },
}

/// Strategy construction failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Invalid {kind} configuration: {message}")]
    InvalidConfiguration { kind: String, message: String },
}

impl StrategyError {
    pub fn invalid(kind: impl Into<String>, message: impl Into<String>) -> Self {
        StrategyError::InvalidConfiguration {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("No data available for {instrument} in date range {start} to {end}")]
    NoDataInRange {
        instrument: String,
        start: String,
        end: String,
    },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Invalid series for {instrument}: {message}")]
    InvalidSeries { instrument: String, message: String },
}

/// Backtest-related errors
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid backtest configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("No {what} data for leg {leg} between {start} and {end}")]
    NoData {
        leg: usize,
        what: &'static str,
        start: String,
        end: String,
    },

    #[error("Backtest canceled: {backtest_id} at {date}")]
    Canceled { backtest_id: String, date: String },
}

/// Result type alias for ThetaBack operations
pub type TbResult<T> = Result<T, TbError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TbError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TbError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_keeps_inputs() {
        let error = PricingError::invalid("spot", -5.0, "must be positive");
        let text = error.to_string();
        assert!(text.contains("spot"));
        assert!(text.contains("-5"));
    }

    #[test]
    fn test_convergence_display() {
        let error = PricingError::Convergence {
            method: "bisection",
            last_estimate: 0.42,
            iterations: 200,
            context: "market_price=1.5 spot=100".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("bisection"));
        assert!(text.contains("200"));
        assert!(text.contains("0.42"));
        assert!(text.contains("market_price=1.5"));
    }

    #[test]
    fn test_error_conversion() {
        let strategy_error = StrategyError::invalid("strangle", "call strike 90 <= put strike 100");
        let tb_error: TbError = strategy_error.into();

        match tb_error {
            TbError::Strategy(_) => (),
            _ => panic!("Expected Strategy error"),
        }
    }

    #[test]
    fn test_macros() {
        let internal = internal_error!("Something went wrong: {}", 42);
        assert!(internal.to_string().contains("42"));
        let config = config_error!("Missing required field: {}", "start_date");
        assert!(matches!(config, TbError::Config(_)));
    }
}

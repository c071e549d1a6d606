use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevenueError {
    #[error("Validation error in sheet '{sheet}': {details}")]
    ValidationError { sheet: String, details: String },

    #[error("No project sheet found; available sheets: {available:?}")]
    NoProjectSheet { available: Vec<String> },

    #[error("Invalid month {0}: must be between 1 and 12")]
    InvalidMonth(u32),

    #[error("Invalid quarter {0}: must be between 1 and 4")]
    InvalidQuarter(u32),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Aggregation overflowed while summing {year}-{month:02}")]
    AggregationOverflow { year: i32, month: u32 },

    #[error("Rollup mismatch for {year}: monthly total {monthly_total} != quarterly cumulative {quarterly_total}")]
    ConsistencyViolation {
        year: i32,
        monthly_total: Decimal,
        quarterly_total: Decimal,
    },

    #[error("Upload ticket {ticket} is stale; newest ticket is {latest}")]
    StaleUpload { ticket: u64, latest: u64 },

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RevenueError {
    pub(crate) fn validation(sheet: &str, details: impl Into<String>) -> Self {
        Self::ValidationError {
            sheet: sheet.to_string(),
            details: details.into(),
        }
    }
}

#[cfg(feature = "webhook")]
impl From<reqwest::Error> for RevenueError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalServiceError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RevenueError>;

/// A problem with a single cell or row. Collected into the normalization
/// report; the offending row is excluded (or the cell ignored) and the batch
/// carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldParseError {
    #[error("{sheet} row {row}: not a column mapping")]
    MalformedRow { sheet: String, row: usize },

    #[error("{sheet} row {row}: unparsable amount '{raw}' in {field}")]
    InvalidAmount {
        sheet: String,
        row: usize,
        field: String,
        raw: String,
    },

    #[error("{sheet} row {row}: amount {amount} is not positive")]
    NonPositiveAmount {
        sheet: String,
        row: usize,
        amount: String,
    },

    #[error("{sheet} row {row}: unparsable date '{raw}'")]
    InvalidDate { sheet: String, row: usize, raw: String },

    #[error("{sheet} row {row}: no invoice period could be resolved")]
    UnresolvedPeriod { sheet: String, row: usize },

    #[error("{sheet} row {row}: invoice_date {date} disagrees with resolved period {year}-{month:02}")]
    PeriodConflict {
        sheet: String,
        row: usize,
        date: String,
        year: i32,
        month: u32,
    },
}

impl FieldParseError {
    pub fn row(&self) -> usize {
        match self {
            Self::MalformedRow { row, .. }
            | Self::InvalidAmount { row, .. }
            | Self::NonPositiveAmount { row, .. }
            | Self::InvalidDate { row, .. }
            | Self::UnresolvedPeriod { row, .. }
            | Self::PeriodConflict { row, .. } => *row,
        }
    }
}

use crate::config::ColumnAliases;
use crate::error::{Result, RevenueError};
use crate::utils::{month_abbrev, month_field_name, validate_month};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::gen::SchemaGenerator;
use schemars::schema::{RootSchema, Schema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One spreadsheet row as delivered by the sheet parser: column header to cell.
pub type RawRow = Map<String, Value>;

/// Project counts keyed by status; absent statuses are counted under "Unknown".
pub type StatusDistribution = BTreeMap<String, usize>;

pub const UNKNOWN_STATUS: &str = "Unknown";

/// A calendar month. Serialized as `"YYYY-MM"` so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        validate_month(month)?;
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The spreadsheet column header for this month, e.g. `"2025 Jan"`.
    pub fn field_name(&self) -> String {
        month_field_name(self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = RevenueError;

    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s.trim().split_once('-').ok_or_else(|| {
            RevenueError::InvalidQuery(format!("Invalid month key '{}'. Expected YYYY-MM", s))
        })?;
        let year: i32 = year.parse().map_err(|_| {
            RevenueError::InvalidQuery(format!("Invalid year in month key '{}'", s))
        })?;
        let month: u32 = month.parse().map_err(|_| {
            RevenueError::InvalidQuery(format!("Invalid month in month key '{}'", s))
        })?;
        Self::new(year, month)
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for YearMonth {
    type Error = RevenueError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl JsonSchema for YearMonth {
    fn schema_name() -> String {
        "YearMonth".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// A normalized row of the project sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectRecord {
    #[schemars(description = "Project code; unique among records that carry one")]
    pub project_code: Option<String>,

    #[schemars(description = "Project status as written in the sheet")]
    pub status: Option<String>,

    #[schemars(description = "The project's nominal year column")]
    pub year: Option<i32>,

    #[schemars(description = "Planned revenue per calendar month, from '<YYYY> <Mon>' columns")]
    pub monthly_revenue: BTreeMap<YearMonth, Decimal>,

    #[schemars(description = "Every other column of the row, passed through untouched")]
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ProjectRecord {
    pub fn expected_for(&self, year: i32, month: u32) -> Decimal {
        self.monthly_revenue
            .get(&YearMonth { year, month })
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn status_label(&self) -> &str {
        self.status.as_deref().unwrap_or(UNKNOWN_STATUS)
    }

    pub fn revenue_years(&self) -> impl Iterator<Item = i32> + '_ {
        self.monthly_revenue.keys().map(YearMonth::year)
    }

    /// Renders the record back into the default column vocabulary.
    pub fn to_row(&self) -> RawRow {
        self.to_row_with(&ColumnAliases::default())
    }

    /// Renders the record back into a row under `columns`, so a normalizer
    /// configured with the same aliases can be run over its own output.
    pub fn to_row_with(&self, columns: &ColumnAliases) -> RawRow {
        let mut row: RawRow = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        row.insert(
            ColumnAliases::primary(&columns.project_code).to_string(),
            self.project_code.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert(
            ColumnAliases::primary(&columns.project_status).to_string(),
            self.status.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert(
            ColumnAliases::primary(&columns.project_year).to_string(),
            self.year.map(Value::from).unwrap_or(Value::Null),
        );
        for (key, amount) in &self.monthly_revenue {
            row.insert(key.field_name(), Value::String(amount.to_string()));
        }
        row
    }
}

/// Which rule of the invoice date-resolution order assigned the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSource {
    #[schemars(description = "Explicit invoice_month + invoice_year columns")]
    MonthYearFields,
    #[schemars(description = "The parsed invoice_date")]
    InvoiceDate,
    #[schemars(description = "invoice_month_name matched against month abbreviations")]
    MonthName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedPeriod {
    pub year: i32,
    pub month: u32,
    pub source: PeriodSource,
}

/// Why an invoice is kept for diagnostics but skipped by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Exclusion {
    InvalidAmount { raw: String },
    NonPositiveAmount { raw: String },
    UnresolvedPeriod,
}

fn header(aliases: &[String]) -> String {
    ColumnAliases::primary(aliases).to_string()
}

/// A normalized row of the invoice sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceRecord {
    pub invoice_id: Option<String>,
    pub project_code: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub invoice_year: Option<i32>,
    pub invoice_month: Option<u32>,
    pub invoice_month_name: Option<String>,

    #[schemars(description = "Payment in USD; never negative, zero when excluded")]
    pub payment_amount: Decimal,

    pub period: Option<ResolvedPeriod>,

    #[schemars(description = "Set when the invoice is skipped during reconciliation")]
    pub exclusion: Option<Exclusion>,
}

impl InvoiceRecord {
    pub fn is_valid(&self) -> bool {
        self.exclusion.is_none()
            && self
                .period
                .is_some_and(|p| validate_month(p.month).is_ok())
            && self.payment_amount > Decimal::ZERO
    }

    /// The (month, amount) this invoice adds to `year`, if any.
    pub fn contribution(&self, year: i32) -> Option<(u32, Decimal)> {
        if !self.is_valid() {
            return None;
        }
        self.period
            .filter(|p| p.year == year)
            .map(|p| (p.month, self.payment_amount))
    }

    pub fn to_row(&self) -> RawRow {
        self.to_row_with(&ColumnAliases::default())
    }

    pub fn to_row_with(&self, columns: &ColumnAliases) -> RawRow {
        let mut row = RawRow::new();
        let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);

        row.insert(header(&columns.invoice_id), text(&self.invoice_id));
        row.insert(header(&columns.invoice_project_code), text(&self.project_code));
        row.insert(
            header(&columns.invoice_date),
            self.invoice_date
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
        );
        row.insert(
            header(&columns.invoice_year),
            self.invoice_year.map(Value::from).unwrap_or(Value::Null),
        );
        row.insert(
            header(&columns.invoice_month),
            self.invoice_month.map(Value::from).unwrap_or(Value::Null),
        );
        row.insert(header(&columns.invoice_month_name), text(&self.invoice_month_name));

        let amount = match &self.exclusion {
            Some(Exclusion::InvalidAmount { raw }) | Some(Exclusion::NonPositiveAmount { raw }) => {
                Value::String(raw.clone())
            }
            _ => Value::String(self.payment_amount.to_string()),
        };
        row.insert(header(&columns.payment_amount), amount);
        row
    }
}

/// The normalized contents of one upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Dataset {
    pub projects: Vec<ProjectRecord>,
    pub invoices: Vec<InvoiceRecord>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.invoices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub expected_revenue: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub actualized_revenue: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub cumulative_expected: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub cumulative_actualized: Decimal,
}

impl MonthlyAggregate {
    pub fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            expected_revenue: Decimal::ZERO,
            actualized_revenue: Decimal::ZERO,
            cumulative_expected: Decimal::ZERO,
            cumulative_actualized: Decimal::ZERO,
        }
    }

    /// Chart label, e.g. `"Jan"`.
    pub fn label(&self) -> &'static str {
        month_abbrev(self.month).unwrap_or("")
    }

    /// Actualized minus expected; negative when collections lag the plan.
    pub fn variance(&self) -> Decimal {
        self.actualized_revenue - self.expected_revenue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuarterlyAggregate {
    pub year: i32,
    pub quarter: u32,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub expected_revenue: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub actualized_revenue: Decimal,

    #[schemars(description = "Running sum of expected revenue through this quarter")]
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub cumulative_revenue: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub cumulative_actualized: Decimal,
}

impl QuarterlyAggregate {
    pub fn empty(year: i32, quarter: u32) -> Self {
        Self {
            year,
            quarter,
            expected_revenue: Decimal::ZERO,
            actualized_revenue: Decimal::ZERO,
            cumulative_revenue: Decimal::ZERO,
            cumulative_actualized: Decimal::ZERO,
        }
    }

    pub fn label(&self) -> String {
        format!("Q{}", self.quarter)
    }
}

/// JSON Schema of the dataset forwarded to the chat layer.
pub fn dataset_schema() -> RootSchema {
    schemars::schema_for!(Dataset)
}

pub fn aggregate_schema() -> RootSchema {
    schemars::schema_for!(MonthlyAggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_year_month_round_trips_through_json_key() {
        let mut map = BTreeMap::new();
        map.insert(YearMonth::new(2025, 3).unwrap(), dec!(10));
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2025-03":"10"}"#);

        let back: BTreeMap<YearMonth, Decimal> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_year_month_rejects_bad_month() {
        assert!(YearMonth::new(2025, 13).is_err());
        assert!("2025-00".parse::<YearMonth>().is_err());
        assert!("2025".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_invalid_invoice_never_contributes() {
        let invoice = InvoiceRecord {
            invoice_id: Some("INV-1".to_string()),
            project_code: None,
            invoice_date: None,
            invoice_year: Some(2025),
            invoice_month: Some(3),
            invoice_month_name: None,
            payment_amount: Decimal::ZERO,
            period: Some(ResolvedPeriod {
                year: 2025,
                month: 3,
                source: PeriodSource::MonthYearFields,
            }),
            exclusion: Some(Exclusion::InvalidAmount {
                raw: "N/A".to_string(),
            }),
        };
        assert!(!invoice.is_valid());
        assert_eq!(invoice.contribution(2025), None);
        assert_eq!(
            invoice.to_row().get("payment_amount_usd"),
            Some(&Value::String("N/A".to_string()))
        );
    }

    #[test]
    fn test_aggregates_serialize_amounts_as_numbers() {
        let mut agg = MonthlyAggregate::empty(2025, 1);
        agg.expected_revenue = dec!(1200.5);
        let json = serde_json::to_value(agg).unwrap();
        assert_eq!(json["expected_revenue"], serde_json::json!(1200.5));
        assert_eq!(agg.label(), "Jan");
    }

    #[test]
    fn test_schema_generation() {
        let schema = serde_json::to_value(dataset_schema()).unwrap();
        let definitions = schema["definitions"].as_object().unwrap();
        assert!(definitions.contains_key("ProjectRecord"));
        assert!(definitions.contains_key("InvoiceRecord"));
    }
}

use crate::error::{Result, RevenueError};
use crate::schema::YearMonth;
use chrono::{DateTime, Datelike, Days, Month, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%d-%b-%Y", "%b %d, %Y", "%B %d, %Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Largest serial Excel can represent (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(RevenueError::InvalidMonth(month));
    }
    Ok(())
}

pub fn month_abbrev(month: u32) -> Result<&'static str> {
    validate_month(month)?;
    Ok(MONTH_ABBREVIATIONS[(month - 1) as usize])
}

/// Matches a month name against the fixed month set. Accepts three-letter
/// abbreviations and full English names, case-insensitively.
pub fn month_from_name(name: &str) -> Option<u32> {
    name.trim()
        .parse::<Month>()
        .ok()
        .map(|m| m.number_from_month())
}

/// `"2025 Jan"`
pub fn month_field_name(year: i32, month: u32) -> String {
    let abbrev = month_abbrev(month).unwrap_or("???");
    format!("{} {}", year, abbrev)
}

/// Recognizes a monthly revenue column header of the form `"<YYYY> <Mon>"`.
/// Yearly total columns such as `"2024 Total"` are not months.
pub fn parse_month_field(header: &str) -> Option<YearMonth> {
    let mut parts = header.split_whitespace();
    let year = parts.next()?;
    let month = parts.next()?;
    if parts.next().is_some() || year.len() != 4 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    YearMonth::new(year, month_from_name(month)?).ok()
}

pub fn quarter_of_month(month: u32) -> Result<u32> {
    validate_month(month)?;
    Ok((month - 1) / 3 + 1)
}

/// Months `3q-2..=3q` of quarter `q`.
pub fn months_in_quarter(quarter: u32) -> Result<RangeInclusive<u32>> {
    if !(1..=4).contains(&quarter) {
        return Err(RevenueError::InvalidQuarter(quarter));
    }
    Ok((3 * quarter - 2)..=(3 * quarter))
}

/// Lowercases and drops everything but letters and digits, so that
/// `"Project Code"`, `"project_code"` and `"PROJECT-CODE"` compare equal.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Non-empty trimmed text of a cell. Numbers are rendered as written.
pub fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text)
    }
}

fn decimal_from_str(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn decimal_from_number(n: &serde_json::Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    decimal_from_str(&n.to_string())
}

/// A strictly numeric cell: a JSON number, or a string that is a number once
/// thousands separators and spaces are removed. Anything else is `None`.
pub fn cell_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal_from_number(n),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| *c != ',' && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            decimal_from_str(&cleaned)
        }
        _ => None,
    }
}

/// An integral cell: `3`, `3.0` and `"3"` all give 3.
pub fn cell_integer(value: &Value) -> Option<i64> {
    let number = cell_decimal(value)?;
    if number.fract().is_zero() {
        number.to_i64()
    } else {
        None
    }
}

/// Parses a payment amount written by hand. Strips every character except
/// digits, `.` and `-`; a value wrapped in parentheses is negative.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s.trim();

    let (is_negative, s) = if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let mut amount: Decimal = cleaned.parse().ok()?;

    if is_negative && amount > Decimal::ZERO {
        amount = -amount;
    }

    Some(amount)
}

pub fn amount_from_cell(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal_from_number(n),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in &DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    for fmt in &DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// A date cell: a date string in one of the accepted layouts, or an Excel
/// serial day number.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n.as_f64().and_then(excel_serial_to_date),
        _ => None,
    }
}

pub fn year_month_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_month_from_name() {
        assert_eq!(month_from_name("Jan"), Some(1));
        assert_eq!(month_from_name(" sep "), Some(9));
        assert_eq!(month_from_name("December"), Some(12));
        assert_eq!(month_from_name("Total"), None);
        assert_eq!(month_from_name(""), None);
    }

    #[test]
    fn test_parse_month_field() {
        assert_eq!(
            parse_month_field("2025 Jan"),
            Some(YearMonth::new(2025, 1).unwrap())
        );
        assert_eq!(
            parse_month_field("2031  Dec"),
            Some(YearMonth::new(2031, 12).unwrap())
        );
        assert_eq!(parse_month_field("2024 Total"), None);
        assert_eq!(parse_month_field("2024 Total2"), None);
        assert_eq!(parse_month_field("Expected Revenue"), None);
        assert_eq!(parse_month_field("25 Jan"), None);
        assert_eq!(parse_month_field("2025 Jan extra"), None);
    }

    #[test]
    fn test_quarters() {
        assert_eq!(quarter_of_month(1).unwrap(), 1);
        assert_eq!(quarter_of_month(6).unwrap(), 2);
        assert_eq!(quarter_of_month(12).unwrap(), 4);
        assert!(quarter_of_month(0).is_err());
        assert_eq!(months_in_quarter(3).unwrap(), 7..=9);
        assert!(months_in_quarter(5).is_err());
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Project Code"), "projectcode");
        assert_eq!(normalize_header("project_code"), "projectcode");
        assert_eq!(normalize_header("Payment Amount (USD)"), "paymentamountusd");
    }

    #[test]
    fn test_cell_decimal_is_numeric_only() {
        assert_eq!(cell_decimal(&json!(100)), Some(dec!(100)));
        assert_eq!(cell_decimal(&json!(12.5)), Some(dec!(12.5)));
        assert_eq!(cell_decimal(&json!("1,250.75")), Some(dec!(1250.75)));
        assert_eq!(cell_decimal(&json!("TBD")), None);
        assert_eq!(cell_decimal(&json!("$100")), None);
        assert_eq!(cell_decimal(&json!("")), None);
        assert_eq!(cell_decimal(&json!(null)), None);
        assert_eq!(cell_decimal(&json!(true)), None);
    }

    #[test]
    fn test_cell_integer() {
        assert_eq!(cell_integer(&json!(3)), Some(3));
        assert_eq!(cell_integer(&json!(3.0)), Some(3));
        assert_eq!(cell_integer(&json!("2025")), Some(2025));
        assert_eq!(cell_integer(&json!(3.5)), None);
        assert_eq!(cell_integer(&json!("March")), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,200.50"), Some(dec!(1200.50)));
        assert_eq!(parse_amount("€ 99"), Some(dec!(99)));
        assert_eq!(parse_amount("-$50.00"), Some(dec!(-50.00)));
        assert_eq!(parse_amount("(100.00)"), Some(dec!(-100.00)));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_amount_from_cell() {
        assert_eq!(amount_from_cell(&json!(500)), Some(dec!(500)));
        assert_eq!(amount_from_cell(&json!("£300")), Some(dec!(300)));
        assert_eq!(amount_from_cell(&json!(null)), None);
    }

    #[test]
    fn test_parse_date_layouts() {
        let march_15 = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        assert_eq!(parse_date(&json!("2025-03-15")), Some(march_15));
        assert_eq!(parse_date(&json!("2025-03-15 00:00:00")), Some(march_15));
        assert_eq!(parse_date(&json!("2025-03-15T10:30:00")), Some(march_15));
        assert_eq!(parse_date(&json!("2025-03-15T10:30:00Z")), Some(march_15));
        assert_eq!(parse_date(&json!("03/15/2025")), Some(march_15));
        assert_eq!(parse_date(&json!("15.03.2025")), Some(march_15));
        assert_eq!(parse_date(&json!("15-Mar-2025")), Some(march_15));
        assert_eq!(parse_date(&json!("Mar 15, 2025")), Some(march_15));
        assert_eq!(parse_date(&json!("not a date")), None);
    }

    #[test]
    fn test_excel_serial_dates() {
        assert_eq!(
            parse_date(&json!(45731)),
            Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap())
        );
        assert_eq!(
            excel_serial_to_date(1.0),
            Some(NaiveDate::from_ymd_opt(1899, 12, 31).unwrap())
        );
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(f64::NAN), None);
    }
}

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "webhook")]
pub use webhook::*;

use crate::error::Result;
use crate::query::YearSummary;
use crate::schema::{RawRow, StatusDistribution};
use crate::session::SessionSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What the chat layer forwards to the external analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub request: String,
    pub session_id: Option<Uuid>,
    pub project_data: Vec<RawRow>,
    pub invoice_data: Vec<RawRow>,
}

impl AnalysisRequest {
    pub fn from_snapshot(question: &str, snapshot: &SessionSnapshot) -> Self {
        Self {
            request: question.to_string(),
            session_id: snapshot.session_id,
            project_data: snapshot.dataset.projects.iter().map(|p| p.to_row()).collect(),
            invoice_data: snapshot.dataset.invoices.iter().map(|i| i.to_row()).collect(),
        }
    }
}

/// Anything that can answer a question about the dataset.
pub trait AnalysisBackend {
    fn analyze(&self, request: &AnalysisRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Ready(String),
    Unavailable { reason: String, fallback: String },
}

impl AnalysisOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The text to show, whichever way the call went.
    pub fn text(&self) -> &str {
        match self {
            Self::Ready(text) => text,
            Self::Unavailable { fallback, .. } => fallback,
        }
    }
}

fn reply_field(value: &Value) -> Option<String> {
    let field = value.get("output").or_else(|| value.get("response"))?;
    match field {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Pulls the answer out of a webhook body: `{"output": ..}`, `{"response": ..}`,
/// a list whose first element carries either, or else the raw text. `None`
/// for an empty body.
pub fn extract_reply(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let parsed = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => return Some(body.to_string()),
    };
    let reply = match &parsed {
        Value::Array(items) => items.first().and_then(reply_field),
        Value::Object(_) => reply_field(&parsed),
        Value::String(s) => Some(s.clone()),
        _ => None,
    };
    reply
        .filter(|r| !r.trim().is_empty())
        .or_else(|| Some(body.to_string()))
}

/// `$1,234,567.80`
fn format_money(amount: Decimal) -> String {
    let rendered = format!("{:.2}", amount.round_dp(2).abs());
    let (int_part, frac_part) = rendered.split_once('.').unwrap_or((rendered.as_str(), "00"));

    let mut grouped = String::new();
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount.is_sign_negative() && !amount.is_zero() { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, frac_part)
}

/// The portfolio summary shown when the analysis service cannot be reached.
pub fn fallback_analysis(summary: &YearSummary, distribution: &StatusDistribution) -> String {
    let total: usize = distribution.values().sum();
    let mut out = String::new();

    out.push_str(&format!("# Portfolio summary ({})\n\n", summary.year));
    out.push_str(&format!("- Total projects: {}\n", total));
    out.push_str(&format!(
        "- Projects in {}: {}\n",
        summary.year, summary.project_count
    ));
    out.push_str(&format!(
        "- Expected revenue {}: {}\n",
        summary.year,
        format_money(summary.expected_total)
    ));
    out.push_str(&format!(
        "- Invoiced revenue {}: {}\n",
        summary.year,
        format_money(summary.actualized_total)
    ));
    out.push_str(&format!(
        "- Average expected revenue per project: {}\n",
        format_money(summary.average_expected_per_project)
    ));

    if !distribution.is_empty() {
        out.push_str("\n## Status distribution\n\n");
        for (status, count) in distribution {
            let share = Decimal::from(*count * 100) / Decimal::from(total.max(1));
            out.push_str(&format!("- {}: {} ({}%)\n", status, count, share.round_dp(1)));
        }
    }

    out.push_str("\n_Detailed analysis is currently unavailable._\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_extract_reply_shapes() {
        assert_eq!(extract_reply(r#"{"output": "hi"}"#), Some("hi".to_string()));
        assert_eq!(extract_reply(r#"{"response": "yo"}"#), Some("yo".to_string()));
        assert_eq!(
            extract_reply(r#"[{"output": "first"}, {"output": "second"}]"#),
            Some("first".to_string())
        );
        assert_eq!(extract_reply("plain text"), Some("plain text".to_string()));
        assert_eq!(
            extract_reply(r#"{"other": 1}"#),
            Some(r#"{"other": 1}"#.to_string())
        );
        assert_eq!(extract_reply("   "), None);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(dec!(1234567.8)), "$1,234,567.80");
        assert_eq!(format_money(dec!(12)), "$12.00");
        assert_eq!(format_money(dec!(-999.999)), "-$1,000.00");
    }

    #[test]
    fn test_request_wire_names() {
        let request = AnalysisRequest {
            request: "q".to_string(),
            session_id: None,
            project_data: vec![],
            invoice_data: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({"request": "q", "sessionId": null, "projectData": [], "invoiceData": []})
        );
    }

    #[test]
    fn test_fallback_lists_statuses_with_shares() {
        let summary = YearSummary {
            year: 2025,
            project_count: 3,
            expected_total: dec!(1500),
            actualized_total: dec!(700),
            average_expected_per_project: dec!(500),
            collection_rate: Some(dec!(0.4667)),
        };
        let distribution: StatusDistribution =
            [("Active".to_string(), 2), ("Unknown".to_string(), 1)]
                .into_iter()
                .collect();

        let text = fallback_analysis(&summary, &distribution);
        assert!(text.contains("Total projects: 3"));
        assert!(text.contains("Expected revenue 2025: $1,500.00"));
        assert!(text.contains("- Active: 2 (66.7%)"));
        assert!(text.contains("- Unknown: 1 (33.3%)"));
    }
}

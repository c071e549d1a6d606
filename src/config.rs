use crate::error::{Result, RevenueError};
use crate::utils::normalize_header;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Header spellings accepted for each canonical column. Matching ignores case
/// and punctuation (see [`normalize_header`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ColumnAliases {
    pub project_code: Vec<String>,
    pub project_status: Vec<String>,
    pub project_year: Vec<String>,
    pub invoice_id: Vec<String>,
    pub invoice_project_code: Vec<String>,
    pub invoice_date: Vec<String>,
    pub invoice_year: Vec<String>,
    pub invoice_month: Vec<String>,
    pub invoice_month_name: Vec<String>,
    pub payment_amount: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            project_code: strings(&["Project Code", "project_code", "Code"]),
            project_status: strings(&["Project Status", "status"]),
            project_year: strings(&["Year"]),
            invoice_id: strings(&["invoice_id", "Invoice ID", "Invoice Number", "Invoice #"]),
            invoice_project_code: strings(&["project_code", "Project Code", "Project"]),
            invoice_date: strings(&["invoice_date", "Invoice Date", "Payment Date", "Date"]),
            invoice_year: strings(&["invoice_year", "Invoice Year"]),
            invoice_month: strings(&["invoice_month", "Invoice Month"]),
            invoice_month_name: strings(&["invoice_month_name", "Invoice Month Name"]),
            payment_amount: strings(&[
                "payment_amount_usd",
                "Payment Amount (USD)",
                "Payment Amount",
                "Amount",
            ]),
        }
    }
}

impl ColumnAliases {
    /// The header written when a record is rendered back into a row: the
    /// first alias that survives header normalization.
    pub fn primary(aliases: &[String]) -> &str {
        aliases
            .iter()
            .find(|a| !normalize_header(a).is_empty())
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn lists(&self) -> [(&'static str, &Vec<String>); 10] {
        [
            ("project_code", &self.project_code),
            ("project_status", &self.project_status),
            ("project_year", &self.project_year),
            ("invoice_id", &self.invoice_id),
            ("invoice_project_code", &self.invoice_project_code),
            ("invoice_date", &self.invoice_date),
            ("invoice_year", &self.invoice_year),
            ("invoice_month", &self.invoice_month),
            ("invoice_month_name", &self.invoice_month_name),
            ("payment_amount", &self.payment_amount),
        ]
    }
}

/// Settings for the optional chat/analysis pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    #[schemars(description = "Endpoint the chat layer forwards requests to; unset disables forwarding")]
    pub webhook_url: Option<String>,

    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    #[schemars(description = "Exact sheet name tried first for project rows")]
    pub project_sheet: String,

    #[schemars(description = "Fallback: first sheet whose name contains this keyword")]
    pub project_sheet_keyword: String,

    #[schemars(description = "Exact sheet name tried first for invoice rows")]
    pub invoice_sheet: String,

    #[schemars(description = "Fallback: first sheet whose name contains any of these keywords")]
    pub invoice_sheet_keywords: Vec<String>,

    #[schemars(description = "Project codes that mark a table totals row rather than a project")]
    pub summary_row_labels: Vec<String>,

    pub columns: ColumnAliases,

    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_sheet: "Project Table".to_string(),
            project_sheet_keyword: "project".to_string(),
            invoice_sheet: "Invoice Data Imported".to_string(),
            invoice_sheet_keywords: strings(&["invoice", "payment"]),
            summary_row_labels: strings(&["Total", "Totals", "Grand Total"]),
            columns: ColumnAliases::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_sheet.trim().is_empty() && self.project_sheet_keyword.trim().is_empty() {
            return Err(RevenueError::ConfigError(
                "project_sheet and project_sheet_keyword cannot both be empty".to_string(),
            ));
        }

        for (name, aliases) in self.columns.lists() {
            if aliases.iter().all(|a| normalize_header(a).is_empty()) {
                return Err(RevenueError::ConfigError(format!(
                    "column alias list '{}' has no usable header",
                    name
                )));
            }
        }

        if self.analysis.timeout_secs == 0 {
            return Err(RevenueError::ConfigError(
                "analysis.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_summary_label(&self, code: &str) -> bool {
        let code = code.trim();
        self.summary_row_labels
            .iter()
            .any(|label| label.trim().eq_ignore_ascii_case(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "invoice_sheet": "Payments 2025", "analysis": { "timeout_secs": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.invoice_sheet, "Payments 2025");
        assert_eq!(config.project_sheet, "Project Table");
        assert_eq!(config.analysis.timeout_secs, 5);
        assert!(config.analysis.webhook_url.is_none());
        assert!(!config.columns.payment_amount.is_empty());
    }

    #[test]
    fn test_rejects_empty_alias_list() {
        let result = PipelineConfig::from_json_str(r#"{ "columns": { "payment_amount": [] } }"#);
        assert!(matches!(result, Err(RevenueError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = PipelineConfig::from_json_str(r#"{ "analysis": { "timeout_secs": 0 } }"#);
        assert!(matches!(result, Err(RevenueError::ConfigError(_))));
    }

    #[test]
    fn test_summary_labels_ignore_case() {
        let config = PipelineConfig::default();
        assert!(config.is_summary_label(" grand total "));
        assert!(!config.is_summary_label("P-100"));
    }
}

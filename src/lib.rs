//! # Revenue Rollup
//!
//! A library for turning an uploaded project spreadsheet into consistent
//! monthly, quarterly and cumulative revenue views, with planned revenue
//! reconciled against actual invoice payments.
//!
//! ## Core Concepts
//!
//! - **Records**: project rows carry planned revenue in `"<YYYY> <Mon>"` columns; invoice rows carry payments
//! - **Normalization**: first-wins deduplication by project code, numeric-only extraction, and flagged (not dropped) bad invoices
//! - **Aggregation**: monthly totals are computed fresh from the records; quarters are always derived from the monthly array
//! - **Session**: one immutable snapshot of dataset plus aggregates, replaced wholesale by the next upload
//! - **Query Facade**: the single read path used by charts and the chat layer alike
//!
//! ## Example
//!
//! ```rust,ignore
//! use revenue_rollup::*;
//! use serde_json::json;
//!
//! let config = PipelineConfig::default();
//! let workbook = Workbook::from_json(json!({
//!     "Project Table": [
//!         { "Project Code": "P1", "Project Status": "Active", "Year": 2025, "2025 Jan": 100 },
//!         { "Project Code": "P1", "2025 Jan": 900 },
//!     ],
//!     "Invoice Data Imported": [
//!         { "project_code": "P1", "invoice_date": "2025-01-20", "payment_amount_usd": "$80.00" },
//!     ],
//! }))
//! .unwrap();
//!
//! let store = SessionStore::new();
//! store.upload(&workbook, &config).unwrap();
//!
//! let facade = QueryFacade::new(&store);
//! let months = facade.get_monthly_aggregate(2025).unwrap();
//! assert_eq!(months[0].expected_revenue, rust_decimal::Decimal::from(100));
//! ```

pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod normalizer;
pub mod query;
pub mod reconciler;
pub mod schema;
pub mod session;
pub mod utils;

pub use aggregator::{
    aggregate_all_years, aggregate_year, discover_years, AggregateBook, RevenueAggregator,
    YearAggregates,
};
pub use analysis::*;
pub use config::{AnalysisConfig, ColumnAliases, PipelineConfig};
pub use error::{FieldParseError, Result, RevenueError};
pub use ingestion::*;
pub use normalizer::{resolve_period, NormalizationReport, RecordNormalizer};
pub use query::*;
pub use reconciler::{InvoiceReconciler, ProjectReconciliation, ReconciliationLine};
pub use schema::*;
pub use session::{SessionSnapshot, SessionStore, UploadTicket};

use log::{debug, info};
use serde::Serialize;

/// Everything a single upload produces, without a session around it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub aggregates: AggregateBook,
    pub report: NormalizationReport,
    pub file_info: FileInfo,
}

pub struct RevenuePipeline;

impl RevenuePipeline {
    pub fn process(workbook: &Workbook, config: &PipelineConfig) -> Result<PipelineOutput> {
        config.validate()?;

        info!(
            "Processing workbook with {} sheets: {:?}",
            workbook.sheets.len(),
            workbook.sheet_names()
        );

        let upload = Ingestor::new(config).ingest(workbook)?;
        let file_info = upload.file_info.clone();
        let (dataset, report) = upload.into_parts();

        if report.field_error_count() > 0 {
            for error in &report.field_errors {
                debug!("Row diagnostic: {}", error);
            }
        }

        let aggregates = aggregate_all_years(&dataset)?;
        debug!("Aggregated years {:?}", aggregates.keys().collect::<Vec<_>>());

        Ok(PipelineOutput {
            dataset,
            aggregates,
            report,
            file_info,
        })
    }

    /// Like [`RevenuePipeline::process`], then re-checks that every year's
    /// monthly and quarterly views tie out.
    pub fn process_with_verification(
        workbook: &Workbook,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput> {
        let output = Self::process(workbook, config)?;

        for aggregates in output.aggregates.values() {
            RevenueAggregator::verify_rollup(aggregates)?;
        }

        Ok(output)
    }
}

pub fn process_workbook(workbook: &Workbook, config: &PipelineConfig) -> Result<PipelineOutput> {
    RevenuePipeline::process(workbook, config)
}

pub fn process_with_verification(
    workbook: &Workbook,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    RevenuePipeline::process_with_verification(workbook, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn workbook() -> Workbook {
        Workbook::from_json(json!({
            "Project Table": [
                { "Project Code": "P1", "Project Status": "Active", "Year": 2025, "2025 Jan": 100, "2025 Apr": 40 },
                { "Project Code": "P1", "Project Status": "Active", "Year": 2025, "2025 Jan": 900 },
                { "Project Code": "P2", "Project Status": "Closed", "Year": 2024, "2024 Dec": "1,000" },
                { "Project Code": "Total", "2025 Jan": 1040 }
            ],
            "Invoice Data Imported": [
                { "project_code": "P1", "invoice_year": 2025, "invoice_month": 1, "payment_amount_usd": 60 },
                { "project_code": "P1", "invoice_date": "2025-04-02", "payment_amount_usd": "$40.00" },
                { "project_code": "P2", "invoice_date": "2024-12-30", "payment_amount_usd": "N/A" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_end_to_end_processing() {
        let output = process_workbook(&workbook(), &PipelineConfig::default()).unwrap();

        assert_eq!(output.dataset.projects.len(), 2);
        assert_eq!(output.report.duplicates_dropped(), 1);
        assert_eq!(output.report.summary_rows_skipped, 1);
        assert_eq!(output.report.invoices_excluded, 1);
        assert_eq!(output.file_info.project_sheet, "Project Table");

        let years: Vec<i32> = output.aggregates.keys().copied().collect();
        assert_eq!(years, vec![2024, 2025]);

        let y2025 = &output.aggregates[&2025];
        assert_eq!(y2025.monthly[0].expected_revenue, dec!(100));
        assert_eq!(y2025.monthly[0].actualized_revenue, dec!(60));
        assert_eq!(y2025.quarterly[1].actualized_revenue, dec!(40));
        assert_eq!(y2025.expected_total(), dec!(140));

        assert_eq!(output.aggregates[&2024].monthly[11].expected_revenue, dec!(1000));
        assert!(output.aggregates[&2024].actualized_total().is_zero());
    }

    #[test]
    fn test_process_with_verification() {
        assert!(process_with_verification(&workbook(), &PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.analysis.timeout_secs = 0;
        assert!(matches!(
            process_workbook(&workbook(), &config),
            Err(RevenueError::ConfigError(_))
        ));
    }
}

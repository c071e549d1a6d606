use crate::config::PipelineConfig;
use crate::error::{Result, RevenueError};
use crate::normalizer::{NormalizationReport, RecordNormalizer};
use crate::schema::{Dataset, InvoiceRecord, ProjectRecord, RawRow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Value,
}

/// The sheet parser's output: every sheet of the uploaded file, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>, rows: Value) -> Self {
        self.sheets.push(Sheet {
            name: name.into(),
            rows,
        });
        self
    }

    pub fn with_rows(self, name: impl Into<String>, rows: Vec<RawRow>) -> Self {
        let rows = Value::Array(rows.into_iter().map(Value::Object).collect());
        self.with_sheet(name, rows)
    }

    /// Reads `{ "<sheet name>": [ {..row..}, .. ], .. }`. Sheets keep their
    /// document order, which keyword detection depends on.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(sheets) => Ok(Self {
                sheets: sheets
                    .into_iter()
                    .map(|(name, rows)| Sheet { name, rows })
                    .collect(),
            }),
            _ => Err(RevenueError::validation(
                "<workbook>",
                "expected an object mapping sheet names to rows",
            )),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(json)?)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn find(&self, exact: &str, keywords: &[String], skip: Option<&str>) -> Option<&Sheet> {
        let candidates = || self.sheets.iter().filter(move |s| Some(s.name.as_str()) != skip);

        candidates()
            .find(|s| s.name == exact)
            .or_else(|| candidates().find(|s| s.name.trim().eq_ignore_ascii_case(exact.trim())))
            .or_else(|| {
                candidates().find(|s| {
                    let name = s.name.to_lowercase();
                    keywords
                        .iter()
                        .filter(|k| !k.trim().is_empty())
                        .any(|k| name.contains(&k.to_lowercase()))
                })
            })
    }

    pub fn project_sheet(&self, config: &PipelineConfig) -> Option<&Sheet> {
        let keyword = [config.project_sheet_keyword.clone()];
        self.find(&config.project_sheet, &keyword, None)
    }

    pub fn invoice_sheet(&self, config: &PipelineConfig) -> Option<&Sheet> {
        let project = self.project_sheet(config).map(|s| s.name.as_str());
        self.find(&config.invoice_sheet, &config.invoice_sheet_keywords, project)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub sheet_names: Vec<String>,
    pub project_sheet: String,
    pub invoice_sheet: Option<String>,
    pub project_count: usize,
    pub invoice_count: usize,
}

/// What the upload endpoint hands back: `{projects, invoices, fileInfo}`
/// plus the normalization diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub projects: Vec<ProjectRecord>,
    pub invoices: Vec<InvoiceRecord>,
    pub file_info: FileInfo,
    pub report: NormalizationReport,
}

impl UploadResult {
    pub fn into_parts(self) -> (Dataset, NormalizationReport) {
        (
            Dataset {
                projects: self.projects,
                invoices: self.invoices,
            },
            self.report,
        )
    }
}

/// Picks the project and invoice sheets out of a workbook and normalizes them.
pub struct Ingestor<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn ingest(&self, workbook: &Workbook) -> Result<UploadResult> {
        let normalizer = RecordNormalizer::new(self.config);
        let mut report = NormalizationReport::default();

        let project_sheet =
            workbook
                .project_sheet(self.config)
                .ok_or_else(|| RevenueError::NoProjectSheet {
                    available: workbook.sheet_names(),
                })?;
        let projects =
            normalizer.normalize_projects(&project_sheet.name, &project_sheet.rows, &mut report)?;

        let invoice_sheet = workbook.invoice_sheet(self.config);
        let invoices = match invoice_sheet {
            Some(sheet) => normalizer.normalize_invoices(&sheet.name, &sheet.rows, &mut report)?,
            None => {
                warn!(
                    "No invoice sheet found among {:?}; continuing with projects only",
                    workbook.sheet_names()
                );
                Vec::new()
            }
        };

        info!(
            "Ingested {} projects ({} duplicates dropped) and {} invoices ({} excluded) from '{}'",
            projects.len(),
            report.duplicates_dropped(),
            invoices.len(),
            report.invoices_excluded,
            project_sheet.name
        );

        Ok(UploadResult {
            file_info: FileInfo {
                sheet_names: workbook.sheet_names(),
                project_sheet: project_sheet.name.clone(),
                invoice_sheet: invoice_sheet.map(|s| s.name.clone()),
                project_count: projects.len(),
                invoice_count: invoices.len(),
            },
            projects,
            invoices,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sheet_detection() {
        let config = PipelineConfig::default();
        let workbook = Workbook::new()
            .with_sheet("Summary", json!([]))
            .with_sheet("Active Projects", json!([]))
            .with_sheet("Payments Received", json!([]));

        assert_eq!(workbook.project_sheet(&config).unwrap().name, "Active Projects");
        assert_eq!(workbook.invoice_sheet(&config).unwrap().name, "Payments Received");
    }

    #[test]
    fn test_exact_names_win_over_keywords() {
        let config = PipelineConfig::default();
        let workbook = Workbook::new()
            .with_sheet("Project Notes", json!([]))
            .with_sheet("Project Table", json!([]))
            .with_sheet("Invoice Drafts", json!([]))
            .with_sheet("Invoice Data Imported", json!([]));

        assert_eq!(workbook.project_sheet(&config).unwrap().name, "Project Table");
        assert_eq!(
            workbook.invoice_sheet(&config).unwrap().name,
            "Invoice Data Imported"
        );
    }

    #[test]
    fn test_missing_project_sheet() {
        let config = PipelineConfig::default();
        let workbook = Workbook::new().with_sheet("Invoices", json!([]));
        let err = Ingestor::new(&config).ingest(&workbook).unwrap_err();
        match err {
            RevenueError::NoProjectSheet { available } => {
                assert_eq!(available, vec!["Invoices".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ingest_without_invoice_sheet() {
        let config = PipelineConfig::default();
        let workbook = Workbook::from_json(json!({
            "Project Table": [ { "Project Code": "P1", "2025 Jan": 100 } ]
        }))
        .unwrap();

        let result = Ingestor::new(&config).ingest(&workbook).unwrap();
        assert_eq!(result.file_info.project_count, 1);
        assert_eq!(result.file_info.invoice_sheet, None);
        assert!(result.invoices.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("fileInfo").is_some());
        assert_eq!(json["fileInfo"]["projectCount"], json!(1));
    }

    #[test]
    fn test_keyword_detection_follows_document_order() {
        let config = PipelineConfig::default();
        let workbook =
            Workbook::from_json_str(r#"{ "Zeta Projects": [], "Alpha Projects": [], "Payments": [] }"#)
                .unwrap();

        assert_eq!(
            workbook.sheet_names(),
            vec!["Zeta Projects", "Alpha Projects", "Payments"]
        );
        assert_eq!(workbook.project_sheet(&config).unwrap().name, "Zeta Projects");
        assert_eq!(workbook.invoice_sheet(&config).unwrap().name, "Payments");
    }

    #[test]
    fn test_workbook_must_be_an_object() {
        assert!(matches!(
            Workbook::from_json(json!([1, 2])),
            Err(RevenueError::ValidationError { .. })
        ));
    }
}

use crate::config::PipelineConfig;
use crate::error::{FieldParseError, Result, RevenueError};
use crate::schema::{
    Dataset, Exclusion, InvoiceRecord, PeriodSource, ProjectRecord, RawRow, ResolvedPeriod,
};
use crate::utils::{
    amount_from_cell, cell_decimal, cell_integer, cell_text, month_from_name, normalize_header,
    parse_date, parse_month_field, year_month_of,
};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Diagnostics gathered while normalizing one upload. Nothing in here aborts
/// the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizationReport {
    pub project_rows: usize,
    pub projects_kept: usize,
    /// One entry per dropped row, in input order.
    pub duplicate_codes: Vec<String>,
    pub summary_rows_skipped: usize,
    pub ignored_monthly_cells: usize,
    pub invoice_rows: usize,
    pub invoices_valid: usize,
    pub invoices_excluded: usize,
    pub malformed_rows: usize,
    pub field_errors: Vec<FieldParseError>,
}

impl NormalizationReport {
    pub fn duplicates_dropped(&self) -> usize {
        self.duplicate_codes.len()
    }

    pub fn field_error_count(&self) -> usize {
        self.field_errors.len()
    }

    fn record(&mut self, error: FieldParseError) {
        debug!("{}", error);
        self.field_errors.push(error);
    }
}

/// Case- and punctuation-insensitive view over one raw row.
struct RowView<'r> {
    cells: BTreeMap<String, &'r Value>,
}

impl<'r> RowView<'r> {
    fn new(row: &'r RawRow) -> Self {
        let mut cells = BTreeMap::new();
        for (key, value) in row {
            cells.entry(normalize_header(key)).or_insert(value);
        }
        Self { cells }
    }

    fn get(&self, aliases: &[String]) -> Option<&'r Value> {
        aliases
            .iter()
            .find_map(|alias| self.cells.get(&normalize_header(alias)).copied())
            .filter(|v| !v.is_null())
    }
}

fn raw_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub struct RecordNormalizer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Checks that `rows` is a list of row mappings. Non-mapping entries are
    /// recorded and skipped; a list with no mapping at all is not tabular.
    /// Each row keeps its 1-based position in the sheet.
    pub fn tabular_rows<'v>(
        &self,
        sheet: &str,
        rows: &'v Value,
        report: &mut NormalizationReport,
    ) -> Result<Vec<(usize, &'v RawRow)>> {
        let items = rows.as_array().ok_or_else(|| {
            RevenueError::validation(sheet, "expected a list of rows")
        })?;

        let mut tabular = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            match item.as_object() {
                Some(row) => tabular.push((idx + 1, row)),
                None => {
                    report.malformed_rows += 1;
                    report.record(FieldParseError::MalformedRow {
                        sheet: sheet.to_string(),
                        row: idx + 1,
                    });
                }
            }
        }

        if !items.is_empty() && tabular.is_empty() {
            return Err(RevenueError::validation(
                sheet,
                format!("none of the {} rows is a column mapping", items.len()),
            ));
        }

        Ok(tabular)
    }

    pub fn normalize_projects(
        &self,
        sheet: &str,
        rows: &Value,
        report: &mut NormalizationReport,
    ) -> Result<Vec<ProjectRecord>> {
        let rows = self.tabular_rows(sheet, rows, report)?;
        Ok(self.normalize_project_rows(rows.into_iter().map(|(_, row)| row), report))
    }

    pub fn normalize_invoices(
        &self,
        sheet: &str,
        rows: &Value,
        report: &mut NormalizationReport,
    ) -> Result<Vec<InvoiceRecord>> {
        let rows = self.tabular_rows(sheet, rows, report)?;
        Ok(self.normalize_invoice_rows(sheet, rows, report))
    }

    /// First occurrence of a project code wins; rows without a code are
    /// always kept.
    pub fn normalize_project_rows<'r>(
        &self,
        rows: impl IntoIterator<Item = &'r RawRow>,
        report: &mut NormalizationReport,
    ) -> Vec<ProjectRecord> {
        let columns = &self.config.columns;
        let recognized: HashSet<String> = columns
            .project_code
            .iter()
            .chain(&columns.project_status)
            .chain(&columns.project_year)
            .map(|alias| normalize_header(alias))
            .collect();

        let mut seen_codes: HashSet<String> = HashSet::new();
        let mut projects = Vec::new();

        for row in rows {
            report.project_rows += 1;
            let view = RowView::new(row);

            let project_code = view.get(&columns.project_code).and_then(cell_text);

            if let Some(code) = &project_code {
                if self.config.is_summary_label(code) {
                    debug!("Skipping summary row '{}'", code);
                    report.summary_rows_skipped += 1;
                    continue;
                }
                if !seen_codes.insert(code.clone()) {
                    report.duplicate_codes.push(code.clone());
                    continue;
                }
            }

            let status = view.get(&columns.project_status).and_then(cell_text);
            let year = view
                .get(&columns.project_year)
                .and_then(cell_integer)
                .and_then(|y| i32::try_from(y).ok());

            let mut monthly_revenue = BTreeMap::new();
            let mut attributes = BTreeMap::new();

            for (key, value) in row {
                if let Some(month) = parse_month_field(key) {
                    match cell_decimal(value) {
                        Some(amount) => {
                            monthly_revenue.entry(month).or_insert(amount);
                        }
                        None if !is_blank(value) => report.ignored_monthly_cells += 1,
                        None => {}
                    }
                } else if !recognized.contains(&normalize_header(key)) {
                    attributes.insert(key.clone(), value.clone());
                }
            }
            monthly_revenue.retain(|_, amount| !amount.is_zero());

            projects.push(ProjectRecord {
                project_code,
                status,
                year,
                monthly_revenue,
                attributes,
            });
        }

        if !report.duplicate_codes.is_empty() {
            warn!(
                "Dropped {} duplicate project rows: {:?}",
                report.duplicate_codes.len(),
                report.duplicate_codes
            );
        }

        report.projects_kept = projects.len();
        projects
    }

    pub fn normalize_invoice_rows<'r>(
        &self,
        sheet: &str,
        rows: impl IntoIterator<Item = (usize, &'r RawRow)>,
        report: &mut NormalizationReport,
    ) -> Vec<InvoiceRecord> {
        let mut invoices = Vec::new();

        for (row_number, row) in rows {
            report.invoice_rows += 1;
            let invoice = self.normalize_invoice(sheet, row_number, &RowView::new(row), report);
            if invoice.is_valid() {
                report.invoices_valid += 1;
            } else {
                report.invoices_excluded += 1;
            }
            invoices.push(invoice);
        }

        invoices
    }

    fn normalize_invoice(
        &self,
        sheet: &str,
        row: usize,
        view: &RowView<'_>,
        report: &mut NormalizationReport,
    ) -> InvoiceRecord {
        let columns = &self.config.columns;

        let invoice_id = view.get(&columns.invoice_id).and_then(cell_text);
        let project_code = view.get(&columns.invoice_project_code).and_then(cell_text);
        let invoice_year = view
            .get(&columns.invoice_year)
            .and_then(cell_integer)
            .and_then(|y| i32::try_from(y).ok());
        let invoice_month = view
            .get(&columns.invoice_month)
            .and_then(cell_integer)
            .and_then(|m| u32::try_from(m).ok());
        let invoice_month_name = view.get(&columns.invoice_month_name).and_then(cell_text);

        let date_cell = view.get(&columns.invoice_date).filter(|v| !is_blank(v));
        let invoice_date = date_cell.and_then(parse_date);
        if let (Some(cell), None) = (date_cell, invoice_date) {
            report.record(FieldParseError::InvalidDate {
                sheet: sheet.to_string(),
                row,
                raw: raw_text(Some(cell)),
            });
        }

        let amount_cell = view.get(&columns.payment_amount);
        let (payment_amount, amount_exclusion) = match amount_cell.and_then(amount_from_cell) {
            Some(amount) if amount > Decimal::ZERO => (amount, None),
            Some(amount) => {
                report.record(FieldParseError::NonPositiveAmount {
                    sheet: sheet.to_string(),
                    row,
                    amount: amount.to_string(),
                });
                let raw = match amount_cell {
                    Some(Value::String(s)) => s.clone(),
                    _ => amount.to_string(),
                };
                (Decimal::ZERO, Some(Exclusion::NonPositiveAmount { raw }))
            }
            None => {
                let raw = raw_text(amount_cell);
                report.record(FieldParseError::InvalidAmount {
                    sheet: sheet.to_string(),
                    row,
                    field: "payment_amount".to_string(),
                    raw: raw.clone(),
                });
                (Decimal::ZERO, Some(Exclusion::InvalidAmount { raw }))
            }
        };

        let period = resolve_period(
            invoice_year,
            invoice_month,
            invoice_date.map(year_month_of),
            invoice_month_name.as_deref(),
        );

        if let (Some(period), Some(date)) = (period, invoice_date) {
            if period.source != PeriodSource::InvoiceDate
                && year_month_of(date) != (period.year, period.month)
            {
                report.record(FieldParseError::PeriodConflict {
                    sheet: sheet.to_string(),
                    row,
                    date: date.to_string(),
                    year: period.year,
                    month: period.month,
                });
            }
        }

        let exclusion = amount_exclusion.or_else(|| {
            if period.is_none() {
                report.record(FieldParseError::UnresolvedPeriod {
                    sheet: sheet.to_string(),
                    row,
                });
                Some(Exclusion::UnresolvedPeriod)
            } else {
                None
            }
        });

        InvoiceRecord {
            invoice_id,
            project_code,
            invoice_date,
            invoice_year,
            invoice_month,
            invoice_month_name,
            payment_amount,
            period,
            exclusion,
        }
    }

    /// Runs the normalizer over records it produced earlier. The output equals
    /// the input for any dataset this normalizer emitted.
    pub fn renormalize(&self, dataset: &Dataset) -> (Dataset, NormalizationReport) {
        let columns = &self.config.columns;
        let mut report = NormalizationReport::default();
        let project_rows: Vec<RawRow> = dataset
            .projects
            .iter()
            .map(|p| p.to_row_with(columns))
            .collect();
        let invoice_rows: Vec<RawRow> = dataset
            .invoices
            .iter()
            .map(|i| i.to_row_with(columns))
            .collect();

        let projects = self.normalize_project_rows(&project_rows, &mut report);
        let invoices = self.normalize_invoice_rows(
            "invoices",
            invoice_rows.iter().enumerate().map(|(idx, row)| (idx + 1, row)),
            &mut report,
        );

        info!(
            "Re-normalized {} projects and {} invoices",
            projects.len(),
            invoices.len()
        );
        (Dataset { projects, invoices }, report)
    }
}

/// Invoice date resolution: explicit month + year fields, then the parsed
/// invoice date, then the month name (which borrows the year field). The
/// first rule that yields a month decides.
pub fn resolve_period(
    invoice_year: Option<i32>,
    invoice_month: Option<u32>,
    date: Option<(i32, u32)>,
    month_name: Option<&str>,
) -> Option<ResolvedPeriod> {
    if let (Some(year), Some(month)) = (invoice_year, invoice_month) {
        if (1..=12).contains(&month) {
            return Some(ResolvedPeriod {
                year,
                month,
                source: PeriodSource::MonthYearFields,
            });
        }
    }

    if let Some((year, month)) = date {
        return Some(ResolvedPeriod {
            year,
            month,
            source: PeriodSource::InvoiceDate,
        });
    }

    let month = month_name.and_then(month_from_name)?;
    invoice_year.map(|year| ResolvedPeriod {
        year,
        month,
        source: PeriodSource::MonthName,
    })
}

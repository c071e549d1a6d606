use crate::error::{Result, RevenueError};
use crate::schema::{Dataset, InvoiceRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub struct InvoiceReconciler;

impl InvoiceReconciler {
    /// Payments per month of `year`, Jan..Dec. Only valid invoices whose
    /// resolved period falls in `year` count; empty months are zero.
    pub fn actualized_by_month(invoices: &[InvoiceRecord], year: i32) -> Result<[Decimal; 12]> {
        let mut totals = [Decimal::ZERO; 12];
        for (month, amount) in invoices.iter().filter_map(|i| i.contribution(year)) {
            let slot = &mut totals[(month - 1) as usize];
            *slot = slot
                .checked_add(amount)
                .ok_or(RevenueError::AggregationOverflow { year, month })?;
        }
        Ok(totals)
    }

    /// Expected vs. invoiced totals per project code for `year`. Invoices
    /// whose code matches no project are reported under `unmatched`.
    pub fn by_project(dataset: &Dataset, year: i32) -> Result<ProjectReconciliation> {
        let mut lines: BTreeMap<String, ReconciliationLine> = BTreeMap::new();

        for project in &dataset.projects {
            let Some(code) = &project.project_code else {
                continue;
            };
            let mut expected = Decimal::ZERO;
            for month in 1..=12 {
                expected = expected
                    .checked_add(project.expected_for(year, month))
                    .ok_or(RevenueError::AggregationOverflow { year, month })?;
            }
            lines.insert(
                code.clone(),
                ReconciliationLine {
                    project_code: code.clone(),
                    expected,
                    actualized: Decimal::ZERO,
                },
            );
        }

        let mut unmatched: BTreeMap<String, Decimal> = BTreeMap::new();
        for invoice in &dataset.invoices {
            let Some((month, amount)) = invoice.contribution(year) else {
                continue;
            };
            let code = invoice.project_code.clone().unwrap_or_default();
            let target = match lines.get_mut(&code) {
                Some(line) => &mut line.actualized,
                None => unmatched.entry(code).or_insert(Decimal::ZERO),
            };
            *target = target
                .checked_add(amount)
                .ok_or(RevenueError::AggregationOverflow { year, month })?;
        }

        Ok(ProjectReconciliation {
            year,
            lines: lines.into_values().collect(),
            unmatched,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationLine {
    pub project_code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub actualized: Decimal,
}

impl ReconciliationLine {
    pub fn variance(&self) -> Decimal {
        self.actualized - self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReconciliation {
    pub year: i32,
    pub lines: Vec<ReconciliationLine>,
    /// Invoiced amounts keyed by a project code that no project carries
    /// (empty string for invoices without a code).
    pub unmatched: BTreeMap<String, Decimal>,
}

use crate::aggregator::{aggregate_year, YearAggregates};
use crate::analysis::{fallback_analysis, AnalysisBackend, AnalysisOutcome, AnalysisRequest};
use crate::error::{Result, RevenueError};
use crate::reconciler::{InvoiceReconciler, ProjectReconciliation};
use crate::schema::{
    Dataset, MonthlyAggregate, ProjectRecord, QuarterlyAggregate, StatusDistribution,
};
use crate::session::{SessionSnapshot, SessionStore};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Monthly,
    Quarterly,
    StatusDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Exact status match; "Unknown" selects projects without a status.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub project_codes: Option<Vec<String>>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.project_codes.is_none()
    }

    fn matches(&self, project: &ProjectRecord) -> bool {
        if let Some(status) = &self.status {
            if project.status_label() != status {
                return false;
            }
        }
        match (&self.project_codes, &project.project_code) {
            (None, _) => true,
            (Some(codes), Some(code)) => codes.contains(code),
            (Some(_), None) => false,
        }
    }

    /// The projects that pass, plus the invoices billed against them.
    fn apply(&self, dataset: &Dataset) -> Dataset {
        let projects: Vec<ProjectRecord> = dataset
            .projects
            .iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect();
        let codes: BTreeSet<&str> = projects
            .iter()
            .filter_map(|p| p.project_code.as_deref())
            .collect();
        let invoices = dataset
            .invoices
            .iter()
            .filter(|i| i.project_code.as_deref().is_some_and(|c| codes.contains(c)))
            .cloned()
            .collect();
        Dataset { projects, invoices }
    }
}

/// A chart or chat request. `year: None` means every year, which only the
/// status distribution accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub kind: QueryKind,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub filters: QueryFilters,
}

impl AggregateQuery {
    pub fn monthly(year: i32) -> Self {
        Self {
            kind: QueryKind::Monthly,
            year: Some(year),
            filters: QueryFilters::default(),
        }
    }

    pub fn quarterly(year: i32) -> Self {
        Self {
            kind: QueryKind::Quarterly,
            year: Some(year),
            filters: QueryFilters::default(),
        }
    }

    pub fn status_distribution(year: Option<i32>) -> Self {
        Self {
            kind: QueryKind::StatusDistribution,
            year,
            filters: QueryFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Monthly {
        year: i32,
        months: [MonthlyAggregate; 12],
    },
    Quarterly {
        year: i32,
        quarters: [QuarterlyAggregate; 4],
    },
    StatusDistribution {
        year: Option<i32>,
        counts: StatusDistribution,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub project_count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub actualized_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_expected_per_project: Decimal,
    /// Actualized over expected; absent when nothing was expected.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub collection_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthVariance {
    pub month: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub actualized: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub variance: Decimal,
}

impl From<&MonthlyAggregate> for MonthVariance {
    fn from(m: &MonthlyAggregate) -> Self {
        Self {
            month: m.month,
            expected: m.expected_revenue,
            actualized: m.actualized_revenue,
            variance: m.variance(),
        }
    }
}

/// A project belongs to a year through its year column; projects without
/// one belong to every year they carry planned revenue in.
fn in_year(project: &ProjectRecord, year: i32) -> bool {
    match project.year {
        Some(y) => y == year,
        None => project.revenue_years().any(|y| y == year),
    }
}

pub fn status_distribution<'p>(
    projects: impl IntoIterator<Item = &'p ProjectRecord>,
    year: Option<i32>,
) -> StatusDistribution {
    let mut counts = StatusDistribution::new();
    for project in projects {
        if year.is_some_and(|y| !in_year(project, y)) {
            continue;
        }
        *counts.entry(project.status_label().to_string()).or_insert(0) += 1;
    }
    counts
}

/// The read API shared by chart rendering and the chat layer. Every call
/// works off a single snapshot, so identical parameters give identical
/// numbers.
pub struct QueryFacade<'a> {
    store: &'a SessionStore,
}

impl<'a> QueryFacade<'a> {
    pub fn new(store: &'a SessionStore) -> Self {
        Self { store }
    }

    pub fn get_monthly_aggregate(&self, year: i32) -> Result<[MonthlyAggregate; 12]> {
        Ok(self.store.snapshot().year(year)?.monthly)
    }

    pub fn get_quarterly_aggregate(&self, year: i32) -> Result<[QuarterlyAggregate; 4]> {
        Ok(self.store.snapshot().year(year)?.quarterly)
    }

    pub fn get_status_distribution(&self, year: Option<i32>) -> StatusDistribution {
        status_distribution(&self.store.snapshot().dataset.projects, year)
    }

    pub fn reset_session(&self) {
        self.store.reset();
    }

    pub fn query(&self, query: &AggregateQuery) -> Result<QueryResponse> {
        let snapshot = self.store.snapshot();
        debug!("Query {:?} against generation {}", query, snapshot.generation);

        match query.kind {
            QueryKind::StatusDistribution => {
                let dataset = query.filters.apply(&snapshot.dataset);
                Ok(QueryResponse::StatusDistribution {
                    year: query.year,
                    counts: status_distribution(&dataset.projects, query.year),
                })
            }
            QueryKind::Monthly | QueryKind::Quarterly => {
                let year = query.year.ok_or_else(|| {
                    RevenueError::InvalidQuery(format!(
                        "{:?} aggregates need a year",
                        query.kind
                    ))
                })?;
                let aggregates = Self::filtered_year(&snapshot, year, &query.filters)?;
                Ok(match query.kind {
                    QueryKind::Monthly => QueryResponse::Monthly {
                        year,
                        months: aggregates.monthly,
                    },
                    _ => QueryResponse::Quarterly {
                        year,
                        quarters: aggregates.quarterly,
                    },
                })
            }
        }
    }

    /// Unfiltered queries read the cache; filtered ones rerun the full
    /// aggregation over the filtered records.
    fn filtered_year(
        snapshot: &SessionSnapshot,
        year: i32,
        filters: &QueryFilters,
    ) -> Result<YearAggregates> {
        if filters.is_empty() {
            snapshot.year(year)
        } else {
            aggregate_year(&filters.apply(&snapshot.dataset), year)
        }
    }

    pub fn available_years(&self) -> Vec<i32> {
        self.store.snapshot().years()
    }

    pub fn year_summary(&self, year: i32) -> Result<YearSummary> {
        Self::summarize(&self.store.snapshot(), year)
    }

    fn summarize(snapshot: &SessionSnapshot, year: i32) -> Result<YearSummary> {
        let aggregates = snapshot.year(year)?;
        let project_count = snapshot
            .dataset
            .projects
            .iter()
            .filter(|p| in_year(p, year))
            .count();
        let expected_total = aggregates.expected_total();
        let actualized_total = aggregates.actualized_total();

        let average_expected_per_project = if project_count > 0 {
            (expected_total / Decimal::from(project_count)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let collection_rate = if expected_total.is_zero() {
            None
        } else {
            Some((actualized_total / expected_total).round_dp(4))
        };

        Ok(YearSummary {
            year,
            project_count,
            expected_total,
            actualized_total,
            average_expected_per_project,
            collection_rate,
        })
    }

    pub fn expected_vs_actual(&self, year: i32) -> Result<Vec<MonthVariance>> {
        let aggregates = self.store.snapshot().year(year)?;
        Ok(aggregates.monthly.iter().map(MonthVariance::from).collect())
    }

    pub fn project_reconciliation(&self, year: i32) -> Result<ProjectReconciliation> {
        InvoiceReconciler::by_project(&self.store.snapshot().dataset, year)
    }

    /// The payload the chat layer forwards: the question, the session id
    /// and the full normalized dataset.
    pub fn analysis_request(&self, question: &str) -> AnalysisRequest {
        AnalysisRequest::from_snapshot(question, &self.store.snapshot())
    }

    /// Asks the analysis backend and degrades to a locally computed summary
    /// when it fails. Never returns an error.
    pub fn ask(&self, backend: &dyn AnalysisBackend, question: &str, year: i32) -> AnalysisOutcome {
        let snapshot = self.store.snapshot();
        let request = AnalysisRequest::from_snapshot(question, &snapshot);
        Self::settle_with(&snapshot, year, backend.analyze(&request))
    }

    /// Turns the result of an analysis call made elsewhere (for instance an
    /// async webhook) into an outcome.
    pub fn settle(&self, year: i32, reply: Result<String>) -> AnalysisOutcome {
        Self::settle_with(&self.store.snapshot(), year, reply)
    }

    fn settle_with(snapshot: &SessionSnapshot, year: i32, reply: Result<String>) -> AnalysisOutcome {
        match reply {
            Ok(text) => AnalysisOutcome::Ready(text),
            Err(err) => {
                warn!("Analysis unavailable: {}", err);
                let distribution = status_distribution(&snapshot.dataset.projects, None);
                let fallback = match Self::summarize(snapshot, year) {
                    Ok(summary) => fallback_analysis(&summary, &distribution),
                    Err(summary_err) => format!("Summary unavailable: {}", summary_err),
                };
                AnalysisOutcome::Unavailable {
                    reason: err.to_string(),
                    fallback,
                }
            }
        }
    }
}

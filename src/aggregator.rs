use crate::error::{Result, RevenueError};
use crate::reconciler::InvoiceReconciler;
use crate::schema::{Dataset, MonthlyAggregate, ProjectRecord, QuarterlyAggregate};
use crate::utils::months_in_quarter;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Every view of one calendar year. The quarterly array is always derived
/// from the monthly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearAggregates {
    pub year: i32,
    pub monthly: [MonthlyAggregate; 12],
    pub quarterly: [QuarterlyAggregate; 4],
}

impl YearAggregates {
    pub fn expected_total(&self) -> Decimal {
        self.monthly[11].cumulative_expected
    }

    pub fn actualized_total(&self) -> Decimal {
        self.monthly[11].cumulative_actualized
    }
}

pub type AggregateBook = BTreeMap<i32, YearAggregates>;

fn add(acc: Decimal, amount: Decimal, year: i32, month: u32) -> Result<Decimal> {
    acc.checked_add(amount)
        .ok_or(RevenueError::AggregationOverflow { year, month })
}

pub struct RevenueAggregator;

impl RevenueAggregator {
    /// Sums the `"<year> <Mon>"` fields of every record, Jan..Dec. Absent
    /// months contribute zero.
    pub fn expected_by_month(projects: &[ProjectRecord], year: i32) -> Result<[Decimal; 12]> {
        let mut totals = [Decimal::ZERO; 12];
        for project in projects {
            for (idx, total) in totals.iter_mut().enumerate() {
                let month = idx as u32 + 1;
                *total = add(*total, project.expected_for(year, month), year, month)?;
            }
        }
        Ok(totals)
    }

    /// Combines the two monthly sources and fills in the running sums.
    pub fn monthly(
        year: i32,
        expected: [Decimal; 12],
        actualized: [Decimal; 12],
    ) -> Result<[MonthlyAggregate; 12]> {
        let mut months: [MonthlyAggregate; 12] =
            std::array::from_fn(|i| MonthlyAggregate::empty(year, i as u32 + 1));

        let mut cumulative_expected = Decimal::ZERO;
        let mut cumulative_actualized = Decimal::ZERO;

        for (idx, slot) in months.iter_mut().enumerate() {
            let month = idx as u32 + 1;
            cumulative_expected = add(cumulative_expected, expected[idx], year, month)?;
            cumulative_actualized = add(cumulative_actualized, actualized[idx], year, month)?;

            slot.expected_revenue = expected[idx];
            slot.actualized_revenue = actualized[idx];
            slot.cumulative_expected = cumulative_expected;
            slot.cumulative_actualized = cumulative_actualized;
        }

        Ok(months)
    }

    /// Q_k is the sum of months 3k-2..=3k of the given monthly array; it never
    /// looks at records.
    pub fn quarterly(monthly: &[MonthlyAggregate; 12]) -> Result<[QuarterlyAggregate; 4]> {
        let year = monthly[0].year;
        let mut quarters: [QuarterlyAggregate; 4] =
            std::array::from_fn(|i| QuarterlyAggregate::empty(year, i as u32 + 1));
        let mut cumulative_revenue = Decimal::ZERO;
        let mut cumulative_actualized = Decimal::ZERO;

        for slot in quarters.iter_mut() {
            let mut expected = Decimal::ZERO;
            let mut actualized = Decimal::ZERO;
            for month in months_in_quarter(slot.quarter)? {
                let m = &monthly[(month - 1) as usize];
                expected = add(expected, m.expected_revenue, year, month)?;
                actualized = add(actualized, m.actualized_revenue, year, month)?;
            }

            let last_month = slot.quarter * 3;
            cumulative_revenue = add(cumulative_revenue, expected, year, last_month)?;
            cumulative_actualized = add(cumulative_actualized, actualized, year, last_month)?;

            slot.expected_revenue = expected;
            slot.actualized_revenue = actualized;
            slot.cumulative_revenue = cumulative_revenue;
            slot.cumulative_actualized = cumulative_actualized;
        }

        Ok(quarters)
    }

    /// Checks that the monthly and quarterly views of a year tie out.
    pub fn verify_rollup(aggregates: &YearAggregates) -> Result<()> {
        let monthly_total: Decimal = aggregates.monthly.iter().map(|m| m.expected_revenue).sum();
        let quarterly_total = aggregates.quarterly[3].cumulative_revenue;
        if monthly_total != quarterly_total {
            return Err(RevenueError::ConsistencyViolation {
                year: aggregates.year,
                monthly_total,
                quarterly_total,
            });
        }

        let monthly_actual: Decimal = aggregates
            .monthly
            .iter()
            .map(|m| m.actualized_revenue)
            .sum();
        let quarterly_actual = aggregates.quarterly[3].cumulative_actualized;
        if monthly_actual != quarterly_actual {
            return Err(RevenueError::ConsistencyViolation {
                year: aggregates.year,
                monthly_total: monthly_actual,
                quarterly_total: quarterly_actual,
            });
        }

        Ok(())
    }
}

/// Computes all views of `year` from scratch.
pub fn aggregate_year(dataset: &Dataset, year: i32) -> Result<YearAggregates> {
    let expected = RevenueAggregator::expected_by_month(&dataset.projects, year)?;
    let actualized = InvoiceReconciler::actualized_by_month(&dataset.invoices, year)?;
    let monthly = RevenueAggregator::monthly(year, expected, actualized)?;
    let quarterly = RevenueAggregator::quarterly(&monthly)?;

    let aggregates = YearAggregates {
        year,
        monthly,
        quarterly,
    };
    RevenueAggregator::verify_rollup(&aggregates)?;
    Ok(aggregates)
}

/// Every year the dataset mentions: monthly revenue columns, the project year
/// column and the resolved periods of valid invoices.
pub fn discover_years(dataset: &Dataset) -> BTreeSet<i32> {
    let mut years: BTreeSet<i32> = BTreeSet::new();
    for project in &dataset.projects {
        years.extend(project.revenue_years());
        years.extend(project.year);
    }
    years.extend(
        dataset
            .invoices
            .iter()
            .filter(|i| i.is_valid())
            .filter_map(|i| i.period.map(|p| p.year)),
    );
    years
}

/// Aggregates for every discovered year. Either all years succeed or the
/// whole book is rejected.
pub fn aggregate_all_years(dataset: &Dataset) -> Result<AggregateBook> {
    let mut book = AggregateBook::new();
    for year in discover_years(dataset) {
        debug!("Aggregating {}", year);
        book.insert(year, aggregate_year(dataset, year)?);
    }
    Ok(book)
}

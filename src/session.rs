use crate::aggregator::{aggregate_all_years, aggregate_year, AggregateBook, YearAggregates};
use crate::config::PipelineConfig;
use crate::error::{Result, RevenueError};
use crate::ingestion::{FileInfo, Ingestor, UploadResult, Workbook};
use crate::normalizer::NormalizationReport;
use crate::schema::Dataset;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// An immutable view of one uploaded dataset and everything derived from it.
/// Readers hold an `Arc` to it; a new upload publishes a new snapshot rather
/// than touching this one.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub generation: u64,
    pub dataset: Dataset,
    pub aggregates: AggregateBook,
    pub report: NormalizationReport,
    pub file_info: Option<FileInfo>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
    }

    /// Cached aggregates for `year`, or a fresh (all zero) computation for a
    /// year the dataset never mentions.
    pub fn year(&self, year: i32) -> Result<YearAggregates> {
        match self.aggregates.get(&year) {
            Some(cached) => Ok(*cached),
            None => aggregate_year(&self.dataset, year),
        }
    }

    pub fn years(&self) -> Vec<i32> {
        self.aggregates.keys().copied().collect()
    }
}

/// Issued by [`SessionStore::begin_upload`]. Only the newest ticket may
/// commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket(u64);

impl UploadTicket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Holds the single active session. Replacement swaps the `Arc` under a
/// write lock, so a reader sees either the whole old snapshot or the whole
/// new one.
pub struct SessionStore {
    current: RwLock<Arc<SessionSnapshot>>,
    latest_ticket: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(SessionSnapshot::empty(0))),
            latest_ticket: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn begin_upload(&self) -> UploadTicket {
        UploadTicket(self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_ticket(&self, ticket: UploadTicket) -> Result<()> {
        let latest = self.latest_ticket.load(Ordering::SeqCst);
        if ticket.0 != latest {
            return Err(RevenueError::StaleUpload {
                ticket: ticket.0,
                latest,
            });
        }
        Ok(())
    }

    /// Aggregates the upload and publishes it as the new session. Fails with
    /// `StaleUpload` when a newer upload has started (or the session was
    /// reset) since `ticket` was issued; on any failure the current snapshot
    /// stays in place.
    pub fn commit(&self, ticket: UploadTicket, upload: UploadResult) -> Result<Arc<SessionSnapshot>> {
        let result = self.try_commit(ticket, upload);
        match &result {
            Ok(snapshot) => {
                self.set_last_error(None);
                info!(
                    "Published session {:?} (generation {}, {} years)",
                    snapshot.session_id,
                    snapshot.generation,
                    snapshot.aggregates.len()
                );
            }
            Err(err) => {
                warn!("Upload {} not published: {}", ticket.0, err);
                self.set_last_error(Some(err.to_string()));
            }
        }
        result
    }

    fn try_commit(&self, ticket: UploadTicket, upload: UploadResult) -> Result<Arc<SessionSnapshot>> {
        self.check_ticket(ticket)?;

        let file_info = upload.file_info.clone();
        let (dataset, report) = upload.into_parts();
        let aggregates = aggregate_all_years(&dataset)?;

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Re-checked under the lock so an older upload can never land after a
        // newer one.
        self.check_ticket(ticket)?;

        let snapshot = Arc::new(SessionSnapshot {
            session_id: Some(Uuid::new_v4()),
            generation: current.generation + 1,
            dataset,
            aggregates,
            report,
            file_info: Some(file_info),
            loaded_at: Some(Utc::now()),
        });
        *current = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// Ingests a workbook and publishes it in one step. Ingestion failures
    /// are recorded like commit failures and leave the prior session intact.
    pub fn upload(&self, workbook: &Workbook, config: &PipelineConfig) -> Result<Arc<SessionSnapshot>> {
        let ticket = self.begin_upload();
        match Ingestor::new(config).ingest(workbook) {
            Ok(upload) => self.commit(ticket, upload),
            Err(err) => {
                warn!("Upload rejected: {}", err);
                self.set_last_error(Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Clears records and aggregates together and invalidates any upload
    /// still in flight.
    pub fn reset(&self) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.latest_ticket.fetch_add(1, Ordering::SeqCst);
        *current = Arc::new(SessionSnapshot::empty(current.generation + 1));
        drop(current);

        self.set_last_error(None);
        info!("Session reset");
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ProjectRecord, YearMonth};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::thread;

    fn upload_with(code: &str, jan_2025: Decimal) -> UploadResult {
        let project = ProjectRecord {
            project_code: Some(code.to_string()),
            status: Some("Active".to_string()),
            year: Some(2025),
            monthly_revenue: [(YearMonth::new(2025, 1).unwrap(), jan_2025)]
                .into_iter()
                .collect(),
            attributes: BTreeMap::new(),
        };
        UploadResult {
            projects: vec![project],
            invoices: vec![],
            file_info: FileInfo::default(),
            report: NormalizationReport::default(),
        }
    }

    #[test]
    fn test_commit_publishes_snapshot() {
        let store = SessionStore::new();
        assert!(store.snapshot().is_empty());

        let ticket = store.begin_upload();
        let snapshot = store.commit(ticket, upload_with("P1", dec!(100))).unwrap();

        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.years(), vec![2025]);
        assert_eq!(store.snapshot().year(2025).unwrap().expected_total(), dec!(100));
    }

    #[test]
    fn test_later_upload_wins() {
        let store = SessionStore::new();
        let first = store.begin_upload();
        let second = store.begin_upload();

        store.commit(second, upload_with("NEW", dec!(2))).unwrap();
        let err = store.commit(first, upload_with("OLD", dec!(1))).unwrap_err();

        assert!(matches!(err, RevenueError::StaleUpload { ticket: 1, latest: 2 }));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.dataset.projects[0].project_code.as_deref(), Some("NEW"));
        assert!(store.last_error().is_some());
    }

    #[test]
    fn test_failed_commit_keeps_prior_snapshot() {
        let store = SessionStore::new();
        let ticket = store.begin_upload();
        let good = store.commit(ticket, upload_with("P1", dec!(100))).unwrap();

        let mut bad = upload_with("A", Decimal::MAX);
        bad.projects.extend(upload_with("B", Decimal::MAX).projects);
        let ticket = store.begin_upload();
        let err = store.commit(ticket, bad).unwrap_err();

        assert!(matches!(err, RevenueError::AggregationOverflow { .. }));
        assert_eq!(store.snapshot().session_id, good.session_id);
        assert!(store.last_error().unwrap().contains("overflow"));

        let ticket = store.begin_upload();
        store.commit(ticket, upload_with("P2", dec!(5))).unwrap();
        assert_eq!(store.last_error(), None);
    }

    #[test]
    fn test_reset_clears_and_invalidates_tickets() {
        let store = SessionStore::new();
        let ticket = store.begin_upload();
        store.commit(ticket, upload_with("P1", dec!(100))).unwrap();

        let in_flight = store.begin_upload();
        store.reset();

        let snapshot = store.snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot.dataset.is_empty());
        assert!(snapshot.aggregates.is_empty());
        assert_eq!(snapshot.generation, 2);

        assert!(store.commit(in_flight, upload_with("P2", dec!(1))).is_err());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_unknown_year_is_computed_as_zeros() {
        let store = SessionStore::new();
        let ticket = store.begin_upload();
        store.commit(ticket, upload_with("P1", dec!(100))).unwrap();

        let year = store.snapshot().year(1999).unwrap();
        assert_eq!(year.year, 1999);
        assert!(year.monthly.iter().all(|m| m.expected_revenue.is_zero()));
    }

    #[test]
    fn test_readers_never_see_a_mixed_snapshot() {
        let store = Arc::new(SessionStore::new());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 1..=200 {
                    let ticket = store.begin_upload();
                    let upload = upload_with(&format!("P{n}"), Decimal::from(n));
                    store.commit(ticket, upload).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        let Some(project) = snapshot.dataset.projects.first() else {
                            continue;
                        };
                        let code = project.project_code.clone().unwrap();
                        let n: i64 = code.trim_start_matches('P').parse().unwrap();
                        let jan = snapshot.aggregates[&2025].monthly[0].expected_revenue;
                        assert_eq!(jan, Decimal::from(n));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.snapshot().generation, 200);
    }
}

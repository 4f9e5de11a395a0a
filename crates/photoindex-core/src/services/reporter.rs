//! 扫描结果与状态汇报
//!
//! [`ScanReport`] accumulates counts and per-item failures while a scan runs.
//! [`StatusReporter`] keeps the finished results: the latest one per root in
//! memory, a bounded history in the database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::db::{ApplySummary, Database};
use crate::models::{now_rfc3339, LastScan, ScanCounts, ScanFailure, ScanOutcome, ScanResult};
use crate::utils::error::AppError;

#[derive(Debug, Default)]
struct Counters {
    albums_created: AtomicUsize,
    albums_updated: AtomicUsize,
    albums_deleted: AtomicUsize,
    media_created: AtomicUsize,
    media_updated: AtomicUsize,
    media_deleted: AtomicUsize,
    media_unchanged: AtomicUsize,
    derivatives_generated: AtomicUsize,
    derivatives_reused: AtomicUsize,
    derivatives_evicted: AtomicUsize,
    transaction_retries: AtomicUsize,
}

/// Live accumulator for one scan.
#[derive(Debug)]
pub struct ScanReport {
    scan_id: String,
    root_id: i64,
    root_path: String,
    started_at: String,
    counters: Counters,
    failures: Mutex<Vec<ScanFailure>>,
}

fn new_scan_id() -> String {
    format!(
        "scan-{}-{:08x}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        rand::random::<u32>()
    )
}

impl ScanReport {
    pub fn new(root_id: i64, root_path: impl Into<String>) -> Self {
        Self {
            scan_id: new_scan_id(),
            root_id,
            root_path: root_path.into(),
            started_at: now_rfc3339(),
            counters: Counters::default(),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn root_id(&self) -> i64 {
        self.root_id
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Add the row counts of a committed album transaction.
    pub fn add_applied(&self, summary: &ApplySummary) {
        let c = &self.counters;
        c.albums_created.fetch_add(summary.albums_created, Ordering::Relaxed);
        c.albums_updated.fetch_add(summary.albums_updated, Ordering::Relaxed);
        c.albums_deleted.fetch_add(summary.albums_deleted, Ordering::Relaxed);
        c.media_created.fetch_add(summary.media_created, Ordering::Relaxed);
        c.media_updated.fetch_add(summary.media_updated, Ordering::Relaxed);
        c.media_deleted.fetch_add(summary.media_deleted, Ordering::Relaxed);
    }

    /// Albums and media removed through a cascade rather than one by one.
    pub fn add_cascaded(&self, albums: usize, media: usize) {
        self.counters.albums_deleted.fetch_add(albums, Ordering::Relaxed);
        self.counters.media_deleted.fetch_add(media, Ordering::Relaxed);
    }

    pub fn add_unchanged(&self, n: usize) {
        self.counters.media_unchanged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_derivative(&self, reused: bool) {
        let counter = if reused {
            &self.counters.derivatives_reused
        } else {
            &self.counters.derivatives_generated
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evicted(&self, n: usize) {
        self.counters.derivatives_evicted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_retry(&self) {
        self.counters.transaction_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, path: &Path, error: &AppError) {
        tracing::warn!("Scan item failed {}: {}", path.display(), error);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(ScanFailure {
                path: path.display().to_string(),
                kind: error.kind(),
                reason: error.to_string(),
            });
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn counts(&self) -> ScanCounts {
        let c = &self.counters;
        ScanCounts {
            albums_created: c.albums_created.load(Ordering::Relaxed),
            albums_updated: c.albums_updated.load(Ordering::Relaxed),
            albums_deleted: c.albums_deleted.load(Ordering::Relaxed),
            media_created: c.media_created.load(Ordering::Relaxed),
            media_updated: c.media_updated.load(Ordering::Relaxed),
            media_deleted: c.media_deleted.load(Ordering::Relaxed),
            media_unchanged: c.media_unchanged.load(Ordering::Relaxed),
            derivatives_generated: c.derivatives_generated.load(Ordering::Relaxed),
            derivatives_reused: c.derivatives_reused.load(Ordering::Relaxed),
            derivatives_evicted: c.derivatives_evicted.load(Ordering::Relaxed),
            transaction_retries: c.transaction_retries.load(Ordering::Relaxed),
            errors: self.failure_count(),
        }
    }

    pub fn finish(self, outcome: ScanOutcome, abort_reason: Option<String>) -> ScanResult {
        let counts = self.counts();
        let failures = self.failures.into_inner().unwrap_or_default();
        ScanResult {
            scan_id: self.scan_id,
            root_id: self.root_id,
            root_path: self.root_path,
            started_at: self.started_at,
            finished_at: now_rfc3339(),
            outcome,
            abort_reason,
            counts,
            failures,
        }
    }
}

/// Read side of scan results. Reads never fail; storage errors are logged
/// and reported as "nothing known".
pub struct StatusReporter {
    db: Arc<Database>,
    history_limit: usize,
    latest: RwLock<HashMap<i64, ScanResult>>,
}

impl StatusReporter {
    pub fn new(db: Arc<Database>, history_limit: usize) -> Self {
        Self {
            db,
            history_limit: history_limit.max(1),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Keep `result` as the latest for its root and persist it.
    pub fn record(&self, result: &ScanResult) {
        if let Ok(mut latest) = self.latest.write() {
            latest.insert(result.root_id, result.clone());
        }
        if let Err(e) = self.db.record_scan_result(result, self.history_limit) {
            tracing::error!("Failed to persist scan result {}: {}", result.scan_id, e);
        }
    }

    pub fn latest(&self, root_id: i64) -> LastScan {
        if let Some(result) = self
            .latest
            .read()
            .ok()
            .and_then(|latest| latest.get(&root_id).cloned())
        {
            return LastScan::Finished(result);
        }

        match self.db.latest_scan_result(root_id) {
            Ok(Some(result)) => LastScan::Finished(result),
            Ok(None) => LastScan::NeverRun,
            Err(e) => {
                tracing::warn!("Failed to load scan history for root {}: {}", root_id, e);
                LastScan::NeverRun
            }
        }
    }

    pub fn history(&self, root_id: i64, limit: usize) -> Vec<ScanResult> {
        self.db
            .scan_history(root_id, limit.min(self.history_limit))
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load scan history for root {}: {}", root_id, e);
                Vec::new()
            })
    }

    pub fn forget(&self, root_id: i64) {
        if let Ok(mut latest) = self.latest.write() {
            latest.remove(&root_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ErrorKind;

    #[test]
    fn test_report_accumulates() {
        let report = ScanReport::new(1, "/photos");
        report.add_applied(&ApplySummary {
            albums_created: 2,
            media_created: 3,
            ..Default::default()
        });
        report.add_derivative(false);
        report.add_derivative(true);
        report.record_failure(Path::new("/photos/bad.jpg"), &AppError::extraction("/photos/bad.jpg", "truncated"));

        let result = report.finish(ScanOutcome::Completed, None);
        assert_eq!(result.counts.albums_created, 2);
        assert_eq!(result.counts.media_created, 3);
        assert_eq!(result.counts.derivatives_generated, 1);
        assert_eq!(result.counts.derivatives_reused, 1);
        assert_eq!(result.counts.errors, 1);
        assert_eq!(result.failures[0].kind, ErrorKind::Extraction);
        assert!(result.scan_id.starts_with("scan-"));
    }

    #[test]
    fn test_unknown_root_never_run() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let reporter = StatusReporter::new(Arc::new(db), 5);
        assert_eq!(reporter.latest(42), LastScan::NeverRun);
        assert!(reporter.history(42, 10).is_empty());
    }

    #[test]
    fn test_latest_survives_restart() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let root = db.create_root("alice", "/photos").unwrap();
        let db = Arc::new(db);

        let result = ScanReport::new(root.root_id, "/photos").finish(ScanOutcome::Completed, None);
        StatusReporter::new(Arc::clone(&db), 5).record(&result);

        let fresh = StatusReporter::new(db, 5);
        assert_eq!(fresh.latest(root.root_id), LastScan::Finished(result));
    }
}

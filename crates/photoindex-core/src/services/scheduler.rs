//! 扫描调度服务
//!
//! Owns the per-root scan lock. At most one scan runs per root; a request
//! that arrives meanwhile is answered with `AlreadyRunning` and, when
//! enabled, folded into a single follow-up run. A semaphore caps how many
//! roots are scanned at once, and an interval timer rescans every root.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::db::Database;
use crate::events::{
    EventSinkExt, ScanCompletedPayload, ScanStartedPayload, SharedEventSink, EVENT_SCAN_COMPLETED,
    EVENT_SCAN_STARTED,
};
use crate::jobs::{CancelToken, JobManager};
use crate::models::{Root, ScanOutcome, ScanResult, ScanSettings, ScanState, ScanStatus, TriggerOutcome};
use crate::utils::error::{AppError, AppResult};

use super::reconciler::Reconciler;
use super::reporter::{ScanReport, StatusReporter};
use super::walker::{WalkOptions, Walker};

const REMOVE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct RootSlot {
    state: ScanState,
    follow_up: bool,
    /// Set once removal starts. Root ids are never reused, so a removed
    /// root keeps its slot and every later claim is refused.
    removing: bool,
}

enum Claim {
    Claimed,
    Busy { follow_up_queued: bool },
    Removing,
}

struct SchedulerInner {
    db: Arc<Database>,
    reconciler: Arc<Reconciler>,
    reporter: Arc<StatusReporter>,
    jobs: Arc<JobManager>,
    events: SharedEventSink,
    walk_options: WalkOptions,
    queue_follow_up: bool,
    permits: Arc<Semaphore>,
    slots: Mutex<HashMap<i64, RootSlot>>,
}

/// 扫描调度器
pub struct ScanScheduler {
    inner: Arc<SchedulerInner>,
    interval: Option<Duration>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanScheduler {
    pub fn new(
        db: Arc<Database>,
        reconciler: Arc<Reconciler>,
        reporter: Arc<StatusReporter>,
        jobs: Arc<JobManager>,
        events: SharedEventSink,
        settings: &ScanSettings,
    ) -> Self {
        let interval = match settings.periodic_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            inner: Arc::new(SchedulerInner {
                db,
                reconciler,
                reporter,
                jobs,
                events,
                walk_options: WalkOptions::from_settings(settings),
                queue_follow_up: settings.queue_follow_up,
                permits: Arc::new(Semaphore::new(settings.max_concurrent_scans.max(1))),
                slots: Mutex::new(HashMap::new()),
            }),
            interval,
            stop_tx: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    /// 启动定时扫描
    pub fn start(&self) {
        let Some(period) = self.interval else {
            tracing::info!("定时扫描已关闭");
            return;
        };
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if ticker.is_some() {
            tracing::warn!("定时扫描已在运行");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            tracing::info!("定时扫描已启动，间隔 {:?}", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; startup scans are the host's call.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        match inner.db.list_roots() {
                            Ok(roots) => {
                                for root in roots.into_iter().filter(|r| !inner.is_removing(r.root_id)) {
                                    let inner = Arc::clone(&inner);
                                    tokio::spawn(async move {
                                        if let Err(e) = inner.trigger(root.root_id, false).await {
                                            tracing::error!("定时扫描失败 root {}: {}", root.root_id, e);
                                        }
                                    });
                                }
                            }
                            Err(e) => tracing::error!("获取根目录列表失败: {}", e),
                        }
                    }
                }
            }
            tracing::info!("定时扫描已退出");
        }));

        if let Ok(mut tx) = self.stop_tx.lock() {
            *tx = Some(stop_tx);
        }
    }

    /// Stop the timer and cancel running scans.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().ok().and_then(|mut tx| tx.take()) {
            let _ = tx.send(true);
        }
        self.inner.jobs.cancel_all();

        let handle = self.ticker.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Scheduler task ended abnormally: {}", e);
            }
        }
    }

    /// Scan a root now and wait for the result.
    pub async fn trigger_scan(&self, root_id: i64) -> AppResult<TriggerOutcome> {
        Arc::clone(&self.inner)
            .trigger(root_id, self.inner.queue_follow_up)
            .await
    }

    /// Trigger every registered root; concurrency is bounded by the
    /// scheduler's permits.
    pub async fn scan_all(&self) -> AppResult<Vec<(i64, AppResult<TriggerOutcome>)>> {
        let mut set = JoinSet::new();
        for root in self.inner.db.list_roots()? {
            let inner = Arc::clone(&self.inner);
            let queue = inner.queue_follow_up;
            set.spawn(async move { (root.root_id, inner.trigger(root.root_id, queue).await) });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Scan task failed: {}", e),
            }
        }
        outcomes.sort_by_key(|(root_id, _)| *root_id);
        Ok(outcomes)
    }

    pub fn status(&self, root_id: i64) -> ScanStatus {
        let (state, follow_up_pending) = self
            .inner
            .slots
            .lock()
            .ok()
            .and_then(|slots| {
                slots
                    .get(&root_id)
                    .map(|slot| (slot.state.clone(), slot.follow_up))
            })
            .unwrap_or_default();

        ScanStatus {
            root_id,
            state,
            last_scan: self.inner.reporter.latest(root_id),
            follow_up_pending,
        }
    }

    /// Request cancellation of the root's running scan, if any.
    pub fn cancel(&self, root_id: i64) -> bool {
        if let Ok(mut slots) = self.inner.slots.lock() {
            if let Some(slot) = slots.get_mut(&root_id) {
                slot.follow_up = false;
            }
        }
        self.inner.jobs.cancel_root(root_id)
    }

    /// Unregister a root: stop its scan, wait for it to wind down, then drop
    /// its albums, media and derivatives from the index.
    ///
    /// Triggers and periodic ticks that arrive once removal has started are
    /// refused.
    pub async fn remove_root(&self, root_id: i64) -> AppResult<bool> {
        self.inner.mark_removing(root_id, true)?;
        self.cancel(root_id);
        while self.status(root_id).state.is_scanning() {
            tokio::time::sleep(REMOVE_POLL).await;
        }

        let removed = match self.inner.db.delete_root(root_id) {
            Ok(removed) => removed,
            Err(e) => {
                self.inner.mark_removing(root_id, false)?;
                return Err(e);
            }
        };
        if let Ok(mut slots) = self.inner.slots.lock() {
            if let Some(slot) = slots.get_mut(&root_id) {
                slot.state = ScanState::Idle;
                slot.follow_up = false;
            }
        }
        self.inner.reporter.forget(root_id);

        let reconciler = Arc::clone(&self.inner.reconciler);
        let evicted = tokio::task::spawn_blocking(move || reconciler.evict_unreferenced())
            .await
            .map_err(|e| AppError::General(format!("eviction task failed: {}", e)))??;
        tracing::info!("已移除根目录 {}，清理衍生图 {} 个", root_id, evicted);

        Ok(removed)
    }
}

impl SchedulerInner {
    fn mark_removing(&self, root_id: i64, removing: bool) -> AppResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| AppError::General("scheduler slots poisoned".to_string()))?;
        let slot = slots.entry(root_id).or_default();
        slot.removing = removing;
        if removing {
            slot.follow_up = false;
        }
        Ok(())
    }

    fn is_removing(&self, root_id: i64) -> bool {
        self.slots
            .lock()
            .ok()
            .and_then(|slots| slots.get(&root_id).map(|slot| slot.removing))
            .unwrap_or(false)
    }

    fn claim(&self, root_id: i64, queue: bool) -> Claim {
        let Ok(mut slots) = self.slots.lock() else {
            return Claim::Busy {
                follow_up_queued: false,
            };
        };
        let slot = slots.entry(root_id).or_default();
        if slot.removing {
            return Claim::Removing;
        }
        if slot.state.is_scanning() {
            if queue {
                slot.follow_up = true;
            }
            return Claim::Busy {
                follow_up_queued: slot.follow_up,
            };
        }
        slot.state = ScanState::Scanning;
        Claim::Claimed
    }

    /// Release the root after a run. Returns true when a follow-up was
    /// pending, in which case the root stays claimed.
    fn release(&self, root_id: i64, result: &ScanResult) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        let slot = slots.entry(root_id).or_default();
        if slot.follow_up && !slot.removing && result.outcome != ScanOutcome::Cancelled {
            slot.follow_up = false;
            return true;
        }
        slot.follow_up = false;
        slot.state = match (&result.outcome, &result.abort_reason) {
            (ScanOutcome::Aborted, reason) => ScanState::Aborted {
                reason: reason.clone().unwrap_or_default(),
            },
            _ => ScanState::Idle,
        };
        false
    }

    async fn trigger(self: Arc<Self>, root_id: i64, queue: bool) -> AppResult<TriggerOutcome> {
        let root = self
            .db
            .get_root(root_id)?
            .ok_or_else(|| AppError::Config(format!("root {} is not registered", root_id)))?;

        match self.claim(root_id, queue) {
            Claim::Claimed => {}
            Claim::Busy { follow_up_queued } => {
                tracing::debug!("Root {} already scanning, follow-up queued: {}", root_id, follow_up_queued);
                return Ok(TriggerOutcome::AlreadyRunning { follow_up_queued });
            }
            Claim::Removing => {
                tracing::debug!("Root {} is being removed, scan refused", root_id);
                return Err(AppError::Config(format!("root {} is being removed", root_id)));
            }
        }

        let result = self.run_once(&root).await;
        if self.release(root_id, &result) {
            self.spawn_follow_up(root);
        }
        Ok(TriggerOutcome::Completed { result })
    }

    fn spawn_follow_up(self: &Arc<Self>, root: Root) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tracing::info!("执行排队的后续扫描 root {}", root.root_id);
                let result = inner.run_once(&root).await;
                if !inner.release(root.root_id, &result) {
                    break;
                }
            }
        });
    }

    async fn run_once(self: &Arc<Self>, root: &Root) -> ScanResult {
        let _permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        let cancel = self.jobs.start_job(root.root_id);
        let report = ScanReport::new(root.root_id, root.path.clone());
        let scan_id = report.scan_id().to_string();

        tracing::info!("开始扫描 root {} ({})", root.root_id, root.path);
        self.events.emit_typed(
            EVENT_SCAN_STARTED,
            &ScanStartedPayload {
                scan_id: scan_id.clone(),
                root_id: root.root_id,
                root_path: root.path.clone(),
            },
        );

        let inner = Arc::clone(self);
        let scan_root = root.clone();
        let token = cancel.clone();
        let result = match tokio::task::spawn_blocking(move || inner.scan_blocking(&scan_root, &token, report)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Scan task for root {} failed: {}", root.root_id, e);
                ScanReport::new(root.root_id, root.path.clone())
                    .finish(ScanOutcome::Aborted, Some(format!("scan task failed: {}", e)))
            }
        };

        self.jobs.complete_job(root.root_id, cancel.job_id());
        self.reporter.record(&result);

        tracing::info!(
            "扫描结束 root {}: {:?}, 新增 {} 更新 {} 删除 {} 失败 {}",
            root.root_id,
            result.outcome,
            result.counts.media_created,
            result.counts.media_updated,
            result.counts.media_deleted,
            result.failures.len()
        );
        self.events.emit_typed(
            EVENT_SCAN_COMPLETED,
            &ScanCompletedPayload {
                scan_id: result.scan_id.clone(),
                root_id: root.root_id,
                outcome: result.outcome,
                counts: result.counts.clone(),
                failure_count: result.failures.len(),
            },
        );

        result
    }

    fn scan_blocking(&self, root: &Root, cancel: &CancelToken, report: ScanReport) -> ScanResult {
        if let Err(e) = self.db.ping() {
            tracing::error!("Storage unavailable, aborting scan of root {}: {}", root.root_id, e);
            return report.finish(ScanOutcome::Aborted, Some(e.to_string()));
        }

        let walker = match Walker::new(Path::new(&root.path), self.walk_options.clone()) {
            Ok(walker) => walker,
            Err(e) => {
                tracing::error!("Root {} is not scannable: {}", root.path, e);
                return report.finish(ScanOutcome::Aborted, Some(e.to_string()));
            }
        };

        let baseline = match self.reconciler.load_baseline(root.root_id) {
            Ok(baseline) => baseline,
            Err(e) => return report.finish(ScanOutcome::Aborted, Some(e.to_string())),
        };
        tracing::debug!(
            "Baseline for root {}: {} albums, {} media",
            root.root_id,
            baseline.album_count(),
            baseline.media_count()
        );

        match self
            .reconciler
            .reconcile(root, walker, baseline, cancel, &report)
        {
            Ok(outcome) => report.finish(outcome, None),
            Err(e) => {
                tracing::error!("Scan of root {} aborted: {}", root.root_id, e);
                report.finish(ScanOutcome::Aborted, Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingEventSink;
    use crate::models::{DerivativeSettings, FaceRegion, LastScan, VariantFormat, VariantSpec};
    use crate::services::capabilities::{Capabilities, FaceDetector};
    use crate::services::derivative::{DerivativeCache, DerivativeService};
    use crate::services::reconciler::ReconcileOptions;
    use image::{DynamicImage, RgbImage};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct SlowFaces(Duration);

    impl FaceDetector for SlowFaces {
        fn detect_faces(&self, _image: &DynamicImage) -> AppResult<Vec<FaceRegion>> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    struct Fixture {
        _temp: TempDir,
        photos: PathBuf,
        db: Arc<Database>,
        events: Arc<RecordingEventSink>,
        scheduler: ScanScheduler,
        root: Root,
    }

    fn fixture(capabilities: Capabilities) -> Fixture {
        let temp = TempDir::new().unwrap();
        let photos = temp.path().join("photos");
        fs::create_dir_all(&photos).unwrap();

        let db = Arc::new(Database::open_in_memory().unwrap());
        db.init().unwrap();
        let root = db
            .create_root("alice", &photos.to_string_lossy())
            .unwrap();

        let settings = DerivativeSettings {
            variants: vec![VariantSpec::new("thumbnail", 32, VariantFormat::Jpeg)],
            workers: 2,
            ..DerivativeSettings::default()
        };
        let cache = Arc::new(DerivativeCache::new(temp.path().join("cache")).unwrap());
        let derivatives = Arc::new(DerivativeService::new(cache, &settings, 2).unwrap());
        let events = Arc::new(RecordingEventSink::default());
        let reconciler = Arc::new(
            Reconciler::new(
                Arc::clone(&db),
                derivatives,
                capabilities,
                events.clone(),
                ReconcileOptions::default(),
            )
            .unwrap(),
        );
        let reporter = Arc::new(StatusReporter::new(Arc::clone(&db), 10));
        let scheduler = ScanScheduler::new(
            Arc::clone(&db),
            reconciler,
            reporter,
            Arc::new(JobManager::new()),
            events.clone(),
            &ScanSettings::default(),
        );

        Fixture {
            _temp: temp,
            photos,
            db,
            events,
            scheduler,
            root,
        }
    }

    fn write_jpeg(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        DynamicImage::ImageRgb8(RgbImage::new(40, 30)).save(path).unwrap();
    }

    fn completed(outcome: TriggerOutcome) -> ScanResult {
        match outcome {
            TriggerOutcome::Completed { result } => result,
            other => panic!("expected a completed scan, got {:?}", other),
        }
    }

    async fn wait_idle(scheduler: &ScanScheduler, root_id: i64) {
        for _ in 0..400 {
            if !scheduler.status(root_id).state.is_scanning() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("root {} never went idle", root_id);
    }

    #[tokio::test]
    async fn test_fresh_root_has_never_run() {
        let fx = fixture(Capabilities::default());
        let status = fx.scheduler.status(fx.root.root_id);
        assert_eq!(status.state, ScanState::Idle);
        assert_eq!(status.last_scan, LastScan::NeverRun);
        assert!(fx.scheduler.trigger_scan(9999).await.is_err());
    }

    #[tokio::test]
    async fn test_trigger_records_result_and_events() {
        let fx = fixture(Capabilities::default());
        write_jpeg(&fx.photos.join("a.jpg"));

        let result = completed(fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap());

        assert_eq!(result.outcome, ScanOutcome::Completed);
        assert_eq!(result.counts.media_created, 1);
        let status = fx.scheduler.status(fx.root.root_id);
        assert_eq!(status.state, ScanState::Idle);
        assert_eq!(status.last_scan, LastScan::Finished(result));
        let names = fx.events.names();
        assert_eq!(names.first().map(String::as_str), Some(EVENT_SCAN_STARTED));
        assert_eq!(names.last().map(String::as_str), Some(EVENT_SCAN_COMPLETED));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_trigger_is_rejected_and_queued() {
        let fx = fixture(Capabilities::default().with_face_detector(Arc::new(SlowFaces(
            Duration::from_millis(400),
        ))));
        write_jpeg(&fx.photos.join("a.jpg"));
        let fx = Arc::new(fx);

        let first = {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move { fx.scheduler.trigger_scan(fx.root.root_id).await })
        };
        while !fx.scheduler.status(fx.root.root_id).state.is_scanning() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap();
        assert_eq!(
            second,
            TriggerOutcome::AlreadyRunning {
                follow_up_queued: true
            }
        );
        assert!(fx.scheduler.status(fx.root.root_id).follow_up_pending);

        let result = completed(first.await.unwrap().unwrap());
        assert_eq!(result.counts.media_created, 1);

        wait_idle(&fx.scheduler, fx.root.root_id).await;
        let history = fx.db.scan_history(fx.root.root_id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.outcome == ScanOutcome::Completed));
        assert_eq!(fx.db.count_media_for_root(fx.root.root_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_aborts_without_deleting() {
        let fx = fixture(Capabilities::default());
        write_jpeg(&fx.photos.join("2020/a.jpg"));
        completed(fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap());

        fs::remove_dir_all(&fx.photos).unwrap();
        let result = completed(fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap());

        assert_eq!(result.outcome, ScanOutcome::Aborted);
        assert!(result.abort_reason.is_some());
        assert_eq!(fx.db.count_media_for_root(fx.root.root_id).unwrap(), 1);
        assert!(matches!(
            fx.scheduler.status(fx.root.root_id).state,
            ScanState::Aborted { .. }
        ));
    }

    #[tokio::test]
    async fn test_remove_root_drops_index() {
        let fx = fixture(Capabilities::default());
        write_jpeg(&fx.photos.join("a.jpg"));
        completed(fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap());

        assert!(fx.scheduler.remove_root(fx.root.root_id).await.unwrap());

        assert!(fx.db.get_root(fx.root.root_id).unwrap().is_none());
        assert!(fx.db.unreferenced_fingerprints().unwrap().is_empty());
        assert_eq!(fx.scheduler.status(fx.root.root_id).last_scan, LastScan::NeverRun);
    }

    #[tokio::test]
    async fn test_removing_root_refuses_new_scans() {
        let fx = fixture(Capabilities::default());
        write_jpeg(&fx.photos.join("a.jpg"));
        completed(fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap());

        // A trigger that looked the root up before removal started still
        // reaches the claim afterwards.
        fx.scheduler.inner.mark_removing(fx.root.root_id, true).unwrap();
        let refused = fx.scheduler.trigger_scan(fx.root.root_id).await;
        assert!(matches!(refused, Err(AppError::Config(_))));
        assert_eq!(fx.db.scan_history(fx.root.root_id, 10).unwrap().len(), 1);

        assert!(fx.scheduler.remove_root(fx.root.root_id).await.unwrap());
        assert!(matches!(
            fx.scheduler.inner.claim(fx.root.root_id, true),
            Claim::Removing
        ));
        assert!(!fx.scheduler.status(fx.root.root_id).state.is_scanning());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remove_during_scan_drops_queued_follow_up() {
        let fx = fixture(Capabilities::default().with_face_detector(Arc::new(SlowFaces(
            Duration::from_millis(300),
        ))));
        write_jpeg(&fx.photos.join("a.jpg"));
        write_jpeg(&fx.photos.join("b.jpg"));
        let fx = Arc::new(fx);

        let first = {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move { fx.scheduler.trigger_scan(fx.root.root_id).await })
        };
        while !fx.scheduler.status(fx.root.root_id).state.is_scanning() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let queued = fx.scheduler.trigger_scan(fx.root.root_id).await.unwrap();
        assert!(matches!(queued, TriggerOutcome::AlreadyRunning { .. }));

        assert!(fx.scheduler.remove_root(fx.root.root_id).await.unwrap());
        first.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fx.db.get_root(fx.root.root_id).unwrap().is_none());
        assert!(!fx.scheduler.status(fx.root.root_id).follow_up_pending);
        assert!(fx.db.scan_history(fx.root.root_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_all_covers_every_root() {
        let fx = fixture(Capabilities::default());
        let other = fx._temp.path().join("other");
        write_jpeg(&other.join("b.jpg"));
        fx.db.create_root("bob", &other.to_string_lossy()).unwrap();

        let outcomes = fx.scheduler.scan_all().await.unwrap();

        assert_eq!(outcomes.len(), 2);
        for (_, outcome) in outcomes {
            assert!(matches!(outcome, Ok(TriggerOutcome::Completed { .. })));
        }
    }
}

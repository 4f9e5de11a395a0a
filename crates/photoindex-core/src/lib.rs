//! Photoindex Core Library
//!
//! Scans directory trees of photos and videos into an album/media index,
//! extracts metadata, renders content-addressed derivatives and keeps the
//! index in step with the filesystem across repeated scans.
//!
//! # Features
//!
//! - `tokio-runtime`: Enable the scan scheduler (per-root lock, periodic
//!   rescans, `trigger_scan`).
//!
//! # Architecture
//!
//! - `models`: Data structures (Root, Album, Media, Derivative, ShareToken, settings)
//! - `db`: SQLite store, DAOs and the per-album mutation transaction
//! - `services`: Walker, metadata extractor, derivative generator, reconciler,
//!   reporter and scheduler
//! - `events`: Event emission abstraction (EventSink trait)
//! - `paths`: Path provider abstraction (PathProvider trait)
//! - `jobs`: Per-root cancellation
//! - `utils`: Error handling and sanitizers
//!
//! # Example
//!
//! ```no_run
//! use photoindex_core::{
//!     events::NoOpEventSink, paths::DataDirPathProvider, services::Capabilities, AppSettings,
//!     PhotoindexCore,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> photoindex_core::AppResult<()> {
//! let core = PhotoindexCore::new(
//!     Arc::new(DataDirPathProvider::new()),
//!     Arc::new(NoOpEventSink),
//!     AppSettings::default(),
//!     Capabilities::default(),
//! )?;
//! let root = core.register_root("alice", "/photos")?;
//! let outcome = core.trigger_scan(root.root_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod events;
pub mod jobs;
pub mod models;
pub mod paths;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use db::{Database, DatabaseStats};
pub use events::{EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink};
pub use jobs::{CancelToken, JobId, JobManager};
pub use models::{
    Album, AppSettings, Derivative, Media, Root, ScanResult, ScanState, ScanStatus, ShareTarget,
    ShareToken, TriggerOutcome,
};
pub use paths::{DataDirPathProvider, PathProvider, SharedPathProvider};
#[cfg(feature = "tokio-runtime")]
pub use services::ScanScheduler;
pub use services::{
    Capabilities, DerivativeCache, DerivativeService, Reconciler, SettingsManager, StatusReporter,
};
pub use utils::{ApiError, AppError, AppResult};

use std::path::Path;
use std::sync::Arc;

use services::{CacheStats, CleanupStats, ReconcileOptions};

/// Photoindex core application context.
///
/// Holds the shared store, the derivative pipeline and the scheduler. A host
/// process creates one and calls into it from any thread.
pub struct PhotoindexCore {
    /// Database connection
    pub db: Arc<Database>,
    /// Path provider for resolving application paths
    pub path_provider: SharedPathProvider,
    /// Event sink for scan progress
    pub event_sink: SharedEventSink,
    /// Per-root cancellation
    pub job_manager: Arc<JobManager>,
    derivatives: Arc<DerivativeService>,
    reconciler: Arc<Reconciler>,
    reporter: Arc<StatusReporter>,
    #[cfg(feature = "tokio-runtime")]
    scheduler: ScanScheduler,
    settings: AppSettings,
}

impl PhotoindexCore {
    /// Open the store, build the pipeline and register the roots declared
    /// in `settings`.
    pub fn new(
        path_provider: SharedPathProvider,
        event_sink: SharedEventSink,
        settings: AppSettings,
        capabilities: Capabilities,
    ) -> AppResult<Self> {
        let db = Database::open_with_provider(path_provider.as_ref())?;
        db.init()?;
        let db = Arc::new(db);

        let cache = Arc::new(DerivativeCache::new(path_provider.derivative_cache_dir())?);
        let derivatives = Arc::new(DerivativeService::new(
            cache,
            &settings.derivatives,
            settings.derivative_workers(),
        )?);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&db),
            Arc::clone(&derivatives),
            capabilities,
            event_sink.clone(),
            ReconcileOptions::from_settings(&settings),
        )?);
        let reporter = Arc::new(StatusReporter::new(
            Arc::clone(&db),
            settings.scan.history_limit,
        ));
        let job_manager = Arc::new(JobManager::new());

        #[cfg(feature = "tokio-runtime")]
        let scheduler = ScanScheduler::new(
            Arc::clone(&db),
            Arc::clone(&reconciler),
            Arc::clone(&reporter),
            Arc::clone(&job_manager),
            event_sink.clone(),
            &settings.scan,
        );

        let core = Self {
            db,
            path_provider,
            event_sink,
            job_manager,
            derivatives,
            reconciler,
            reporter,
            #[cfg(feature = "tokio-runtime")]
            scheduler,
            settings,
        };
        core.sync_configured_roots()?;
        Ok(core)
    }

    fn sync_configured_roots(&self) -> AppResult<()> {
        for config in &self.settings.roots {
            let root = self.register_root(&config.owner_id, &config.path)?;
            tracing::debug!("Root {} registered for {}", root.path, root.owner_id);
        }
        Ok(())
    }

    /// Register a root, or return the existing registration for the same
    /// owner and path. The path is stored cleaned and, when it exists,
    /// canonicalized, so `/photos/` and `/photos` name the same root.
    pub fn register_root(&self, owner_id: &str, path: &str) -> AppResult<Root> {
        if !Path::new(path).is_absolute() {
            return Err(AppError::InvalidPath(format!("root must be absolute: {}", path)));
        }
        let cleaned = utils::normalize_root_path(Path::new(path));
        let cleaned = std::fs::canonicalize(&cleaned).unwrap_or(cleaned);
        let path = cleaned
            .to_str()
            .ok_or_else(|| AppError::InvalidPath(format!("root is not valid UTF-8: {}", path)))?;

        if let Some(root) = self.db.find_root(owner_id, path)? {
            return Ok(root);
        }
        let root = self.db.create_root(owner_id, path)?;
        tracing::info!("Registered root {} ({}) for {}", root.root_id, root.path, owner_id);
        Ok(root)
    }

    pub fn roots(&self) -> AppResult<Vec<Root>> {
        self.db.list_roots()
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Get the database reference.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Get the path provider reference.
    pub fn paths(&self) -> &SharedPathProvider {
        &self.path_provider
    }

    /// Get the event sink reference.
    pub fn events(&self) -> &SharedEventSink {
        &self.event_sink
    }

    /// Get the job manager reference.
    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.job_manager
    }

    pub fn derivatives(&self) -> &Arc<DerivativeService> {
        &self.derivatives
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    #[cfg(feature = "tokio-runtime")]
    pub fn scheduler(&self) -> &ScanScheduler {
        &self.scheduler
    }

    /// Start periodic rescans.
    #[cfg(feature = "tokio-runtime")]
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stop the timer and cancel running scans.
    #[cfg(feature = "tokio-runtime")]
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
    }

    /// Scan a root now. Returns `AlreadyRunning` instead of waiting when
    /// another scan of the same root is in progress.
    #[cfg(feature = "tokio-runtime")]
    pub async fn trigger_scan(&self, root_id: i64) -> AppResult<TriggerOutcome> {
        self.scheduler.trigger_scan(root_id).await
    }

    #[cfg(feature = "tokio-runtime")]
    pub fn scan_status(&self, root_id: i64) -> ScanStatus {
        self.scheduler.status(root_id)
    }

    #[cfg(feature = "tokio-runtime")]
    pub fn cancel_scan(&self, root_id: i64) -> bool {
        self.scheduler.cancel(root_id)
    }

    #[cfg(feature = "tokio-runtime")]
    pub async fn remove_root(&self, root_id: i64) -> AppResult<bool> {
        self.scheduler.remove_root(root_id).await
    }

    /// Most recent scans of a root, newest first.
    pub fn scan_history(&self, root_id: i64, limit: usize) -> Vec<ScanResult> {
        self.reporter.history(root_id, limit)
    }

    /// Top album of a root.
    pub fn root_album(&self, root_id: i64) -> AppResult<Option<Album>> {
        self.db.top_album(root_id)
    }

    pub fn child_albums(&self, album_id: i64) -> AppResult<Vec<Album>> {
        self.db.child_albums(album_id)
    }

    pub fn album_media(&self, album_id: i64) -> AppResult<Vec<Media>> {
        self.db.media_in_album(album_id)
    }

    pub fn media_derivatives(&self, media_id: i64) -> AppResult<Vec<Derivative>> {
        self.db.derivatives_for_media(media_id)
    }

    /// Create a share token. `password_hash` is stored as given; hashing
    /// is the caller's concern.
    pub fn share(
        &self,
        owner_id: &str,
        target: ShareTarget,
        password_hash: Option<&str>,
        expires_at: Option<&str>,
    ) -> AppResult<ShareToken> {
        self.db.create_share_token(owner_id, target, password_hash, expires_at)
    }

    /// Resolve a share token. Tokens whose album or media was removed by a
    /// scan no longer resolve.
    pub fn resolve_share(&self, token: &str) -> AppResult<Option<ShareToken>> {
        self.db.resolve_share_token(token)
    }

    pub fn cache_stats(&self) -> AppResult<CacheStats> {
        self.derivatives.cache().stats()
    }

    /// Remove cache files that no derivative row points at.
    pub fn sweep_cache(&self) -> AppResult<CleanupStats> {
        let known = self.db.derivative_locations()?;
        self.derivatives.cache().sweep_orphans(&known)
    }

    pub fn stats(&self) -> AppResult<DatabaseStats> {
        self.db.stats()
    }
}

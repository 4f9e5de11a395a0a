//! 索引协调器
//!
//! Compares what the walker reports against the persisted index of one root
//! and commits the difference album by album. Each album's changes go to the
//! store in a single transaction. Deletions are decided only after the walk
//! has finished, so nothing is removed on the strength of a partial listing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use rayon::prelude::*;

use crate::db::{ApplySummary, Database, MediaSnapshot, Mutation};
use crate::events::{AlbumProcessedPayload, EventSinkExt, SharedEventSink, EVENT_ALBUM_PROCESSED};
use crate::jobs::CancelToken;
use crate::models::{AppSettings, FaceRegion, MediaKind, NewMedia, Root, ScanOutcome, VariantSpec};
use crate::utils::error::{AppError, AppResult};
use crate::utils::sanitize::album_title_for;

use super::album_tree::{AlbumForest, AlbumNode};
use super::capabilities::{Capabilities, VideoInfo};
use super::derivative::{DerivativeService, GeneratedDerivative, MediaSource, PinSet};
use super::hasher::FileHasher;
use super::metadata::MetadataExtractor;
use super::reporter::ScanReport;
use super::walker::{DirectoryBatch, FileEntry, WalkItem};

/// Key under which paths are stored in the index. The walker only yields
/// UTF-8 paths, so the conversion is lossless for everything indexed.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Hash every file even when size and mtime match the index.
    pub content_hash_change_detection: bool,
    pub transaction_retries: u32,
    pub io_threads: usize,
}

impl ReconcileOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            content_hash_change_detection: settings.scan.content_hash_change_detection,
            transaction_retries: settings.performance.transaction_retries,
            io_threads: settings.performance.io_threads,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// The persisted state of a root, loaded once at the start of a scan.
#[derive(Debug, Default)]
pub struct Baseline {
    albums: AlbumForest,
    media: HashMap<String, MediaSnapshot>,
    variants: HashMap<String, HashSet<String>>,
}

impl Baseline {
    pub fn album_count(&self) -> usize {
        self.albums.len()
    }

    pub fn media_count(&self) -> usize {
        self.media.len()
    }

    fn missing_variants<'v>(
        &self,
        kind: MediaKind,
        fingerprint: &str,
        specs: &'v [VariantSpec],
        render_videos: bool,
    ) -> Vec<&'v VariantSpec> {
        if kind == MediaKind::Video && !render_videos {
            return Vec::new();
        }
        let stored = self.variants.get(fingerprint);
        specs
            .iter()
            .filter(|spec| !stored.is_some_and(|names| names.contains(&spec.name)))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Seen {
    albums: HashSet<i64>,
    media: HashSet<String>,
    /// Paths the walker could not read. Indexed content under them is kept.
    protected: Vec<PathBuf>,
}

impl Seen {
    fn is_protected(&self, path: &str) -> bool {
        let path = Path::new(path);
        self.protected
            .iter()
            .any(|p| path.starts_with(p) || p.starts_with(path))
    }
}

enum Work<'a> {
    New(&'a FileEntry),
    /// Size or mtime differ from the index, or content hashing is forced.
    Changed {
        file: &'a FileEntry,
        snapshot: &'a MediaSnapshot,
        missing: Vec<&'a VariantSpec>,
    },
    /// Unchanged file whose derivative set is incomplete.
    Heal {
        file: &'a FileEntry,
        snapshot: &'a MediaSnapshot,
        missing: Vec<&'a VariantSpec>,
    },
}

impl Work<'_> {
    fn file(&self) -> &FileEntry {
        match self {
            Work::New(file) | Work::Changed { file, .. } | Work::Heal { file, .. } => file,
        }
    }
}

#[derive(Default)]
struct FileOutcome {
    path: PathBuf,
    mutations: Vec<Mutation>,
    derivatives: Vec<GeneratedDerivative>,
    failures: Vec<(PathBuf, AppError)>,
    unchanged: bool,
    /// Keeps the fingerprint's cache entries alive until the album commits.
    pin: Option<PinSet>,
}

/// 索引协调器
pub struct Reconciler {
    db: Arc<Database>,
    derivatives: Arc<DerivativeService>,
    capabilities: Capabilities,
    events: SharedEventSink,
    options: ReconcileOptions,
    io_pool: rayon::ThreadPool,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        derivatives: Arc<DerivativeService>,
        capabilities: Capabilities,
        events: SharedEventSink,
        options: ReconcileOptions,
    ) -> AppResult<Self> {
        let io_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.io_threads.max(1))
            .thread_name(|i| format!("scan-io-{}", i))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build scan I/O pool: {}", e)))?;

        Ok(Self {
            db,
            derivatives,
            capabilities,
            events,
            options,
            io_pool,
        })
    }

    pub fn derivatives(&self) -> &Arc<DerivativeService> {
        &self.derivatives
    }

    /// Load the albums, media and stored derivative variants of a root.
    pub fn load_baseline(&self, root_id: i64) -> AppResult<Baseline> {
        let albums = AlbumForest::from_albums(self.db.albums_for_root(root_id)?);
        let media = self
            .db
            .load_media_snapshot(root_id)?
            .into_iter()
            .map(|m| (m.file_path.clone(), m))
            .collect();
        let variants = self.db.load_derivative_variants(root_id)?;

        Ok(Baseline {
            albums,
            media,
            variants,
        })
    }

    /// Bring the index of `root` in line with the walked tree.
    ///
    /// Per-item failures are recorded in `report` and never fail the call.
    /// `Err` means the store itself went away and the scan must abort.
    pub fn reconcile<I>(
        &self,
        root: &Root,
        items: I,
        mut baseline: Baseline,
        cancel: &CancelToken,
        report: &ScanReport,
    ) -> AppResult<ScanOutcome>
    where
        I: IntoIterator<Item = WalkItem>,
    {
        let mut seen = Seen::default();

        for item in items {
            if cancel.is_cancelled() {
                tracing::info!("Scan of root {} cancelled during walk", root.root_id);
                return Ok(ScanOutcome::Cancelled);
            }
            match item {
                WalkItem::Error { path, error } => {
                    report.record_failure(&path, &error);
                    seen.protected.push(path);
                }
                WalkItem::Directory(batch) => {
                    self.reconcile_album(root, &batch, &mut baseline, &mut seen, cancel, report)?;
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("Scan of root {} cancelled before deletion", root.root_id);
            return Ok(ScanOutcome::Cancelled);
        }

        self.remove_unseen(&mut baseline, &seen, report)?;
        report.add_evicted(self.evict_unreferenced()?);

        Ok(ScanOutcome::Completed)
    }

    fn reconcile_album(
        &self,
        root: &Root,
        batch: &DirectoryBatch,
        baseline: &mut Baseline,
        seen: &mut Seen,
        cancel: &CancelToken,
        report: &ScanReport,
    ) -> AppResult<()> {
        let album_path = path_key(&batch.path);
        let title = album_title_for(&batch.path);
        let parent_path = batch.parent.as_deref().map(path_key);
        let existing = baseline.albums.by_path(&album_path).cloned();

        let mut album_mutations = Vec::new();
        match &existing {
            Some(node) => {
                seen.albums.insert(node.album_id);
                if node.title != title {
                    album_mutations.push(Mutation::UpdateAlbumTitle {
                        album_id: node.album_id,
                        title: title.clone(),
                    });
                }
            }
            None => album_mutations.push(Mutation::CreateAlbum {
                root_id: root.root_id,
                path: album_path.clone(),
                title: title.clone(),
                parent_path: parent_path.clone(),
            }),
        }

        let specs = self.derivatives.variants();
        let render_videos = self.capabilities.video.is_enabled();
        let mut unchanged = 0;
        let mut work = Vec::new();
        for file in &batch.files {
            let key = path_key(&file.path);
            match baseline.media.get(&key) {
                None => work.push(Work::New(file)),
                Some(snapshot) => {
                    let missing = baseline.missing_variants(
                        file.kind,
                        &snapshot.fingerprint,
                        specs,
                        render_videos,
                    );
                    let same_state = snapshot.file_size == file.size as i64
                        && snapshot.file_mtime == file.modified_ns;
                    if !same_state || self.options.content_hash_change_detection {
                        work.push(Work::Changed {
                            file,
                            snapshot,
                            missing,
                        });
                    } else if !missing.is_empty() {
                        work.push(Work::Heal {
                            file,
                            snapshot,
                            missing,
                        });
                    } else {
                        unchanged += 1;
                    }
                }
            }
            seen.media.insert(key);
        }

        let outcomes: Vec<FileOutcome> = self.io_pool.install(|| {
            work.par_iter()
                .map(|w| self.process(root.root_id, &album_path, w, cancel))
                .collect()
        });
        drop(work);

        let mut files = Vec::new();
        for outcome in outcomes {
            for (path, error) in &outcome.failures {
                report.record_failure(path, error);
            }
            if outcome.unchanged {
                unchanged += 1;
            }
            if !outcome.mutations.is_empty() {
                files.push(outcome);
            }
        }
        report.add_unchanged(unchanged);

        if album_mutations.is_empty() && files.is_empty() {
            return Ok(());
        }

        let committed = self.commit_album(&batch.path, &album_mutations, &files, report)?;
        // Pins held by `files` last until the album is committed.
        drop(files);
        let Some(summary) = committed else {
            return Ok(());
        };
        report.add_applied(&summary);

        let album_id = match (&existing, summary.created_album_id) {
            (Some(node), _) => Some(node.album_id),
            (None, Some(id)) => {
                let parent = parent_path
                    .as_deref()
                    .and_then(|p| baseline.albums.by_path(p))
                    .map(|n| n.album_id);
                baseline.albums.insert(AlbumNode {
                    album_id: id,
                    parent,
                    path: album_path.clone(),
                    title,
                });
                seen.albums.insert(id);
                Some(id)
            }
            (None, None) => None,
        };

        if let Some(album_id) = album_id {
            self.events.emit_typed(
                EVENT_ALBUM_PROCESSED,
                &AlbumProcessedPayload {
                    scan_id: report.scan_id().to_string(),
                    root_id: root.root_id,
                    album_id,
                    album_path,
                    media_created: summary.media_created,
                    media_updated: summary.media_updated,
                },
            );
        }

        Ok(())
    }

    fn process(
        &self,
        root_id: i64,
        album_path: &str,
        work: &Work<'_>,
        cancel: &CancelToken,
    ) -> FileOutcome {
        let mut out = FileOutcome {
            path: work.file().path.clone(),
            ..Default::default()
        };
        if cancel.is_cancelled() {
            return out;
        }

        match work {
            Work::Heal {
                file,
                snapshot,
                missing,
            } => {
                out.unchanged = true;
                self.heal(file, &snapshot.fingerprint, missing, &mut out);
            }
            Work::New(file) => {
                let fingerprint = match FileHasher::content_hash(&file.path) {
                    Ok(fp) => fp,
                    Err(e) => {
                        out.failures.push((file.path.clone(), e));
                        return out;
                    }
                };
                self.index_file(root_id, album_path, file, None, fingerprint, &mut out);
            }
            Work::Changed {
                file,
                snapshot,
                missing,
            } => {
                let fingerprint = match FileHasher::content_hash(&file.path) {
                    Ok(fp) => fp,
                    Err(e) => {
                        out.failures.push((file.path.clone(), e));
                        return out;
                    }
                };
                if fingerprint != snapshot.fingerprint {
                    self.index_file(
                        root_id,
                        album_path,
                        file,
                        Some(snapshot.media_id),
                        fingerprint,
                        &mut out,
                    );
                    return out;
                }

                if snapshot.file_size == file.size as i64 && snapshot.file_mtime == file.modified_ns {
                    out.unchanged = true;
                } else {
                    out.mutations.push(Mutation::UpdateMediaFileState {
                        media_id: snapshot.media_id,
                        file_size: file.size as i64,
                        file_mtime: file.modified_ns,
                    });
                }
                if !missing.is_empty() {
                    self.heal(file, &fingerprint, missing, &mut out);
                }
            }
        }

        out
    }

    /// Extract metadata, render derivatives and build the media mutation.
    fn index_file(
        &self,
        root_id: i64,
        album_path: &str,
        file: &FileEntry,
        media_id: Option<i64>,
        fingerprint: String,
        out: &mut FileOutcome,
    ) {
        let mut meta = match MetadataExtractor::extract(&file.path, file.kind, file.modified_ns) {
            Ok(meta) => meta,
            Err(e) => {
                out.failures.push((file.path.clone(), e));
                return;
            }
        };

        let mut faces = None;
        let mut puts = Vec::new();
        let mut video_info = None;
        let wanted: Vec<&VariantSpec> = self.derivatives.variants().iter().collect();
        match file.kind {
            MediaKind::Photo => {
                out.pin = Some(self.derivatives.cache().pin([fingerprint.clone()]));
                let (results, detected) = self.render(
                    file,
                    &fingerprint,
                    meta.exif.orientation,
                    &wanted,
                    self.capabilities.faces.is_enabled(),
                    None,
                );
                puts = self.collect_derivatives(file, results, out);
                faces = detected;
            }
            MediaKind::Video => {
                video_info = self.probe_video(file);
                if let Some(info) = &video_info {
                    meta.width = info.width.or(meta.width);
                    meta.height = info.height.or(meta.height);
                }
                if let Some(frame) = self.video_frame(file, video_info.as_ref(), out) {
                    out.pin = Some(self.derivatives.cache().pin([fingerprint.clone()]));
                    let (results, _) = self.render(file, &fingerprint, None, &wanted, false, Some(frame));
                    puts = self.collect_derivatives(file, results, out);
                }
            }
        }

        let place_name = meta.exif.coordinates().and_then(|(lat, lon)| {
            match self.capabilities.geocoder.reverse_geocode(lat, lon) {
                Ok(place) => place,
                Err(e) => {
                    tracing::warn!("Reverse geocoding failed for {}: {}", file.path.display(), e);
                    None
                }
            }
        });

        let media = NewMedia {
            file_path: path_key(&file.path),
            file_name: file.name.clone(),
            kind: file.kind,
            file_size: file.size as i64,
            file_mtime: file.modified_ns,
            fingerprint,
            width: meta.width.map(|w| w as i32),
            height: meta.height.map(|h| h as i32),
            date_shot: meta.date_shot,
            exif: meta.exif,
            place_name,
            duration_secs: video_info.as_ref().and_then(|i| i.duration_secs),
            video_codec: video_info.and_then(|i| i.codec),
        };

        out.mutations.push(match media_id {
            Some(media_id) => Mutation::UpdateMedia {
                media_id,
                media,
                faces,
            },
            None => Mutation::CreateMedia {
                root_id,
                album_path: album_path.to_string(),
                media,
                faces,
            },
        });
        out.mutations.extend(puts);
    }

    /// Fill in variants missing for content that is otherwise indexed.
    fn heal(&self, file: &FileEntry, fingerprint: &str, missing: &[&VariantSpec], out: &mut FileOutcome) {
        let frame = match file.kind {
            MediaKind::Photo => None,
            MediaKind::Video => match self.video_frame(file, None, out) {
                Some(frame) => Some(frame),
                None => return,
            },
        };
        out.pin = Some(self.derivatives.cache().pin([fingerprint.to_string()]));
        let (results, _) = self.render(file, fingerprint, None, missing, false, frame);
        let puts = self.collect_derivatives(file, results, out);
        out.mutations.extend(puts);
    }

    /// Stream properties from the video capability. Probe failures are
    /// logged and leave the fields empty.
    fn probe_video(&self, file: &FileEntry) -> Option<VideoInfo> {
        match self.capabilities.video.probe(&file.path) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Video probe failed for {}: {}", file.path.display(), e);
                None
            }
        }
    }

    /// Still frame to render a video's derivatives from. A failed extraction
    /// is a derivative failure of the file.
    fn video_frame(
        &self,
        file: &FileEntry,
        info: Option<&VideoInfo>,
        out: &mut FileOutcome,
    ) -> Option<DynamicImage> {
        if !self.capabilities.video.is_enabled() {
            return None;
        }
        match self.capabilities.video.frame(&file.path, info) {
            Ok(frame) => frame,
            Err(e) => {
                out.failures.push((file.path.clone(), e));
                None
            }
        }
    }

    fn render(
        &self,
        file: &FileEntry,
        fingerprint: &str,
        orientation: Option<i32>,
        wanted: &[&VariantSpec],
        detect_faces: bool,
        frame: Option<DynamicImage>,
    ) -> (Vec<AppResult<GeneratedDerivative>>, Option<Vec<FaceRegion>>) {
        self.derivatives.install(|| {
            let limits = self.derivatives.limits();
            let source = match frame {
                Some(frame) => MediaSource::from_frame(file.path.clone(), frame, limits),
                None => MediaSource::new(
                    file.path.clone(),
                    file.counterpart.clone(),
                    orientation,
                    limits,
                ),
            };
            let results = self.derivatives.generate_all(&source, fingerprint, wanted);

            let faces = if detect_faces {
                match source.image() {
                    Ok(img) => match self.capabilities.faces.detect_faces(&img) {
                        Ok(regions) => Some(regions),
                        Err(e) => {
                            tracing::warn!("Face detection failed for {}: {}", file.path.display(), e);
                            None
                        }
                    },
                    Err(_) => None,
                }
            } else {
                None
            };

            (results, faces)
        })
    }

    fn collect_derivatives(
        &self,
        file: &FileEntry,
        results: Vec<AppResult<GeneratedDerivative>>,
        out: &mut FileOutcome,
    ) -> Vec<Mutation> {
        let mut puts = Vec::new();
        for result in results {
            match result {
                Ok(generated) => {
                    puts.push(Mutation::PutDerivative(generated.derivative.clone()));
                    out.derivatives.push(generated);
                }
                Err(e) => out.failures.push((file.path.clone(), e)),
            }
        }
        puts
    }

    /// Commit one album's changes in a single transaction. When that keeps
    /// failing, the album row and each file are committed on their own, so a
    /// bad file costs only itself and never the album or its subtree.
    fn commit_album(
        &self,
        path: &Path,
        album: &[Mutation],
        files: &[FileOutcome],
        report: &ScanReport,
    ) -> AppResult<Option<ApplySummary>> {
        let all: Vec<Mutation> = album
            .iter()
            .chain(files.iter().flat_map(|f| f.mutations.iter()))
            .cloned()
            .collect();

        let error = match self.try_apply(path, &all, report)? {
            Ok(summary) => {
                for file in files {
                    Self::count_derivatives(file, report);
                }
                return Ok(Some(summary));
            }
            Err(e) => e,
        };

        let units = usize::from(!album.is_empty()) + files.len();
        if units <= 1 {
            report.record_failure(files.first().map_or(path, |f| f.path.as_path()), &error);
            return Ok(None);
        }
        tracing::warn!(
            "Album {} failed as a whole ({}), committing items one by one",
            path.display(),
            error
        );

        let mut summary = ApplySummary::default();
        if !album.is_empty() {
            match self.try_apply(path, album, report)? {
                Ok(applied) => summary = applied,
                Err(e) => {
                    report.record_failure(path, &e);
                    return Ok(None);
                }
            }
        }
        for file in files {
            match self.try_apply(&file.path, &file.mutations, report)? {
                Ok(applied) => {
                    summary.merge(&applied);
                    Self::count_derivatives(file, report);
                }
                Err(e) => report.record_failure(&file.path, &e),
            }
        }
        Ok(Some(summary))
    }

    fn count_derivatives(file: &FileOutcome, report: &ScanReport) {
        for generated in &file.derivatives {
            report.add_derivative(generated.reused);
        }
    }

    /// Apply a batch, retrying non-fatal failures. The outer `Err` is fatal;
    /// the inner one is the failure left after the last retry.
    fn try_apply(
        &self,
        path: &Path,
        mutations: &[Mutation],
        report: &ScanReport,
    ) -> AppResult<Result<ApplySummary, AppError>> {
        let mut attempt = 0;
        loop {
            match self.db.apply(mutations) {
                Ok(summary) => return Ok(Ok(summary)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempt < self.options.transaction_retries => {
                    attempt += 1;
                    report.add_retry();
                    tracing::warn!(
                        "Transaction for {} failed (attempt {}): {}",
                        path.display(),
                        attempt,
                        e
                    );
                }
                Err(e @ AppError::Transaction(_)) => return Ok(Err(e)),
                Err(e) => return Ok(Err(AppError::Transaction(e.to_string()))),
            }
        }
    }

    /// [`Self::try_apply`] that records a final failure against `path`.
    fn apply_with_retry(
        &self,
        path: &Path,
        mutations: &[Mutation],
        report: &ScanReport,
    ) -> AppResult<Option<ApplySummary>> {
        match self.try_apply(path, mutations, report)? {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                report.record_failure(path, &e);
                Ok(None)
            }
        }
    }

    /// Delete albums and media the walk did not reach.
    fn remove_unseen(&self, baseline: &mut Baseline, seen: &Seen, report: &ScanReport) -> AppResult<()> {
        for album_id in baseline.albums.topmost_unseen(&seen.albums) {
            let Some(node) = baseline.albums.get(album_id).cloned() else {
                continue;
            };
            if seen.is_protected(&node.path) {
                tracing::debug!("Keeping unreadable album {}", node.path);
                continue;
            }

            let mut subtree: HashSet<i64> = baseline.albums.descendants(album_id).into_iter().collect();
            subtree.insert(album_id);
            let media_count = baseline
                .media
                .values()
                .filter(|m| subtree.contains(&m.album_id))
                .count();

            let deleted = self.apply_with_retry(
                Path::new(&node.path),
                &[Mutation::DeleteAlbum { album_id }],
                report,
            )?;
            if deleted.is_some() {
                tracing::info!(
                    "Removed album {} ({} albums, {} media)",
                    node.path,
                    subtree.len(),
                    media_count
                );
                report.add_cascaded(subtree.len(), media_count);
                baseline.albums.remove_subtree(album_id);
            }
        }

        let mut by_album: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for snapshot in baseline.media.values() {
            if seen.media.contains(&snapshot.file_path) || seen.is_protected(&snapshot.file_path) {
                continue;
            }
            if baseline.albums.get(snapshot.album_id).is_none() {
                continue;
            }
            by_album
                .entry(snapshot.album_id)
                .or_default()
                .push(snapshot.media_id);
        }

        for (album_id, media_ids) in by_album {
            let path = baseline
                .albums
                .get(album_id)
                .map(|n| PathBuf::from(&n.path))
                .unwrap_or_default();
            let mutations: Vec<Mutation> = media_ids
                .into_iter()
                .map(|media_id| Mutation::DeleteMedia { media_id })
                .collect();
            if let Some(summary) = self.apply_with_retry(&path, &mutations, report)? {
                report.add_applied(&summary);
            }
        }

        Ok(())
    }

    /// Drop derivatives whose fingerprint no media references any more and
    /// return how many were removed. Fingerprints pinned by a running scan
    /// are left for a later pass.
    pub fn evict_unreferenced(&self) -> AppResult<usize> {
        let fingerprints = match self.db.unreferenced_fingerprints() {
            Ok(fps) => fps,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Could not list unreferenced derivatives: {}", e);
                return Ok(0);
            }
        };

        let cache = self.derivatives.cache();
        let mut total = 0;
        for fingerprint in fingerprints {
            let evicted = cache.with_unpinned(&fingerprint, || {
                self.db
                    .evict_fingerprint(&fingerprint, |derivative| cache.remove(derivative))
            });
            match evicted {
                Some(Ok(n)) => total += n,
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => tracing::warn!("Eviction of {} failed: {}", fingerprint, e),
                None => tracing::debug!("Fingerprint {} is pinned, eviction deferred", fingerprint),
            }
        }
        Ok(total)
    }
}

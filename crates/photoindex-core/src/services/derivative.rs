//! 衍生图服务
//!
//! Renders the configured variants of a photo into a content-addressed cache
//! laid out as `{fingerprint}/{variant}.{ext}`. Writes go through a temp file
//! and an atomic no-clobber rename: when two workers race on the same key
//! the first rename wins and the loser discards its bytes.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::models::{Derivative, DerivativeSettings, VariantFormat, VariantSpec};
use crate::utils::error::{AppError, AppResult};
use crate::utils::{sanitize_fingerprint, sanitize_variant_name};

use super::walker::is_raw_file;

/// Embedded previews smaller than this are EXIF thumbnails, not previews.
const MIN_EMBEDDED_PREVIEW: usize = 10 * 1024;

/// 解码资源限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_source_pixels: u64,
    pub max_alloc_bytes: u64,
}

impl DecodeLimits {
    pub fn from_settings(settings: &DerivativeSettings) -> Self {
        Self {
            max_source_pixels: settings.max_source_pixels,
            max_alloc_bytes: settings.max_decode_alloc_mb.saturating_mul(1024 * 1024),
        }
    }

    fn check(&self, path: &Path, width: u32, height: u32) -> AppResult<()> {
        let pixels = width as u64 * height as u64;
        if pixels > self.max_source_pixels {
            return Err(AppError::ResourceLimit(format!(
                "{} is {}x{}, above the {} pixel decode limit",
                path.display(),
                width,
                height,
                self.max_source_pixels
            )));
        }
        Ok(())
    }
}

/// 缓存统计
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_files: usize,
    pub total_bytes: u64,
}

/// 清理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted_files: usize,
    pub freed_bytes: u64,
}

/// On-disk derivative cache.
pub struct DerivativeCache {
    root: PathBuf,
    /// Fingerprints with derivative work in flight; eviction leaves them alone.
    pins: Mutex<HashMap<String, usize>>,
}

impl DerivativeCache {
    pub fn new(root: PathBuf) -> AppResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            pins: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a variant, computable without any lookup.
    pub fn path_for(&self, fingerprint: &str, variant: &VariantSpec) -> PathBuf {
        self.root.join(sanitize_fingerprint(fingerprint)).join(format!(
            "{}.{}",
            sanitize_variant_name(&variant.name),
            variant.format.extension()
        ))
    }

    /// Existing cache entry for `(fingerprint, variant)`.
    pub fn lookup(&self, fingerprint: &str, variant: &VariantSpec) -> Option<Derivative> {
        let path = self.path_for(fingerprint, variant);
        let byte_size = fs::metadata(&path).ok().filter(|m| m.is_file())?.len();
        let (width, height) = image::image_dimensions(&path).ok()?;
        Some(Self::describe(fingerprint, variant, &path, width, height, byte_size))
    }

    fn describe(
        fingerprint: &str,
        variant: &VariantSpec,
        path: &Path,
        width: u32,
        height: u32,
        byte_size: u64,
    ) -> Derivative {
        Derivative {
            fingerprint: fingerprint.to_string(),
            variant: variant.name.clone(),
            width,
            height,
            byte_size,
            location: path.display().to_string(),
            content_type: variant.format.content_type().to_string(),
        }
    }

    /// Create-if-absent write. Returns the stored entry and whether this call
    /// created it.
    pub fn store(
        &self,
        fingerprint: &str,
        variant: &VariantSpec,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> AppResult<(Derivative, bool)> {
        let path = self.path_for(fingerprint, variant);
        let dir = path
            .parent()
            .ok_or_else(|| AppError::InvalidPath(path.display().to_string()))?;
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;

        match temp.persist_noclobber(&path) {
            Ok(_) => Ok((
                Self::describe(fingerprint, variant, &path, width, height, bytes.len() as u64),
                true,
            )),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!("Derivative {} written concurrently, keeping first", path.display());
                drop(e);
                let existing = self.lookup(fingerprint, variant).ok_or_else(|| {
                    AppError::derivative(&path, "cache entry vanished after concurrent write")
                })?;
                Ok((existing, false))
            }
            Err(e) => Err(AppError::Io(e.error)),
        }
    }

    /// Delete a cache file and its fingerprint directory once empty.
    pub fn remove(&self, derivative: &Derivative) {
        let path = PathBuf::from(&derivative.location);
        if !path.starts_with(&self.root) {
            tracing::warn!("Refusing to remove {} outside the cache", path.display());
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir(dir);
        }
    }

    pub fn pin(self: &Arc<Self>, fingerprints: impl IntoIterator<Item = String>) -> PinSet {
        let fingerprints: Vec<String> = fingerprints.into_iter().collect();
        if let Ok(mut pins) = self.pins.lock() {
            for fp in &fingerprints {
                *pins.entry(fp.clone()).or_insert(0) += 1;
            }
        }
        PinSet {
            cache: Arc::clone(self),
            fingerprints,
        }
    }

    fn unpin(&self, fingerprints: &[String]) {
        if let Ok(mut pins) = self.pins.lock() {
            for fp in fingerprints {
                if let Some(count) = pins.get_mut(fp) {
                    *count -= 1;
                    if *count == 0 {
                        pins.remove(fp);
                    }
                }
            }
        }
    }

    /// Run `f` unless `fingerprint` is pinned, holding the pin table so no
    /// worker can pin it meanwhile.
    pub fn with_unpinned<T>(&self, fingerprint: &str, f: impl FnOnce() -> T) -> Option<T> {
        let pins = self.pins.lock().ok()?;
        if pins.contains_key(fingerprint) {
            return None;
        }
        let result = f();
        drop(pins);
        Some(result)
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> AppResult<CacheStats> {
        let mut stats = CacheStats::default();
        for dir in fs::read_dir(&self.root)? {
            let dir = dir?.path();
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_file() {
                        stats.total_files += 1;
                        stats.total_bytes += metadata.len();
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Delete files no derivative row points at. Pinned fingerprints are
    /// skipped since their rows may not be committed yet.
    pub fn sweep_orphans(&self, known_locations: &HashSet<String>) -> AppResult<CleanupStats> {
        let mut stats = CleanupStats::default();
        let pins = self
            .pins
            .lock()
            .map_err(|e| AppError::General(format!("pin table poisoned: {}", e)))?;

        for dir in fs::read_dir(&self.root)? {
            let dir = dir?.path();
            if !dir.is_dir() {
                continue;
            }
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if pins.keys().any(|fp| sanitize_fingerprint(fp) == name) {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if known_locations.contains(&path.display().to_string()) {
                    continue;
                }
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if fs::remove_file(&path).is_ok() {
                    stats.deleted_files += 1;
                    stats.freed_bytes += size;
                }
            }
            let _ = fs::remove_dir(&dir);
        }

        if stats.deleted_files > 0 {
            tracing::info!(
                "Cache sweep removed {} files, {} bytes",
                stats.deleted_files,
                stats.freed_bytes
            );
        }
        Ok(stats)
    }
}

/// Pins released on drop.
pub struct PinSet {
    cache: Arc<DerivativeCache>,
    fingerprints: Vec<String>,
}

impl Drop for PinSet {
    fn drop(&mut self) {
        self.cache.unpin(&self.fingerprints);
    }
}

enum DecodeFailure {
    Limit(String),
    Codec(String),
}

/// A photo's source file, decoded at most once and shared by every variant
/// and the face detector.
pub struct MediaSource {
    path: PathBuf,
    counterpart: Option<PathBuf>,
    orientation: Option<i32>,
    limits: DecodeLimits,
    decoded: OnceCell<Result<Arc<DynamicImage>, DecodeFailure>>,
}

impl MediaSource {
    pub fn new(
        path: PathBuf,
        counterpart: Option<PathBuf>,
        orientation: Option<i32>,
        limits: DecodeLimits,
    ) -> Self {
        Self {
            path,
            counterpart,
            orientation,
            limits,
            decoded: OnceCell::new(),
        }
    }

    /// Source backed by an already decoded still, such as a video frame.
    /// The frame is subject to the same pixel limit as a decoded file.
    pub fn from_frame(path: PathBuf, frame: DynamicImage, limits: DecodeLimits) -> Self {
        let decoded = OnceCell::new();
        let state = match limits.check(&path, frame.width(), frame.height()) {
            Ok(()) => Ok(Arc::new(frame)),
            Err(e) => Err(DecodeFailure::Limit(e.to_string())),
        };
        let _ = decoded.set(state);
        Self {
            path,
            counterpart: None,
            orientation: None,
            limits,
            decoded,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded and orientation-corrected image. Without a known orientation
    /// the source's own EXIF is consulted.
    pub fn image(&self) -> AppResult<Arc<DynamicImage>> {
        match self.decoded.get_or_init(|| self.decode()) {
            Ok(img) => Ok(Arc::clone(img)),
            Err(DecodeFailure::Limit(msg)) => Err(AppError::ResourceLimit(msg.clone())),
            Err(DecodeFailure::Codec(msg)) => Err(AppError::derivative(&self.path, msg)),
        }
    }

    fn decode(&self) -> Result<Arc<DynamicImage>, DecodeFailure> {
        let (img, orientation) = if is_raw_file(&self.path) {
            self.decode_raw()?
        } else {
            let img = decode_bounded(&self.path, self.limits)?;
            (img, self.orientation.or_else(|| read_exif_orientation(&self.path)))
        };
        Ok(Arc::new(apply_orientation(img, orientation.unwrap_or(1))))
    }

    /// RAW sources: the paired JPEG, then the EXIF thumbnail, then the
    /// largest embedded JPEG preview.
    fn decode_raw(&self) -> Result<(DynamicImage, Option<i32>), DecodeFailure> {
        if let Some(jpeg) = &self.counterpart {
            match decode_bounded(jpeg, self.limits) {
                Ok(img) => return Ok((img, read_exif_orientation(jpeg))),
                Err(DecodeFailure::Codec(msg)) => {
                    tracing::debug!("RAW counterpart {} unusable: {}", jpeg.display(), msg)
                }
                Err(limit) => return Err(limit),
            }
        }

        let preview = extract_raw_embedded_jpeg(&self.path)
            .or_else(|| scan_embedded_jpeg(&self.path))
            .ok_or_else(|| DecodeFailure::Codec("no decodable preview in RAW file".to_string()))?;

        self.limits
            .check(&self.path, preview.width(), preview.height())
            .map_err(|e| DecodeFailure::Limit(e.to_string()))?;
        Ok((preview, self.orientation.or_else(|| read_exif_orientation(&self.path))))
    }
}

fn decode_bounded(path: &Path, limits: DecodeLimits) -> Result<DynamicImage, DecodeFailure> {
    let codec = |e: std::io::Error| DecodeFailure::Codec(e.to_string());

    let (width, height) = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(codec)?
        .into_dimensions()
        .map_err(|e| DecodeFailure::Codec(e.to_string()))?;
    limits
        .check(path, width, height)
        .map_err(|e| DecodeFailure::Limit(e.to_string()))?;

    let mut reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(codec)?;
    let mut decode_limits = image::Limits::default();
    decode_limits.max_alloc = Some(limits.max_alloc_bytes);
    reader.limits(decode_limits);

    reader.decode().map_err(|e| match e {
        image::ImageError::Limits(l) => DecodeFailure::Limit(format!("{}: {}", path.display(), l)),
        other => DecodeFailure::Codec(other.to_string()),
    })
}

fn read_exif_orientation(path: &Path) -> Option<i32> {
    let file = fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(|v| v as i32)
}

/// 应用 EXIF 方向校正
pub fn apply_orientation(img: DynamicImage, orientation: i32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn extract_raw_embedded_jpeg(path: &Path) -> Option<DynamicImage> {
    let file = fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let offset = exif
        .get_field(exif::Tag::JPEGInterchangeFormat, exif::In::THUMBNAIL)?
        .value
        .get_uint(0)? as u64;
    let len = exif
        .get_field(exif::Tag::JPEGInterchangeFormatLength, exif::In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    if len < MIN_EMBEDDED_PREVIEW {
        return None;
    }

    let mut file = fs::File::open(path).ok()?;
    file.seek(SeekFrom::Start(offset)).ok()?;
    let mut data = vec![0u8; len];
    file.read_exact(&mut data).ok()?;

    image::load_from_memory(&data).ok()
}

/// Largest SOI..EOI run in the file.
fn scan_embedded_jpeg(path: &Path) -> Option<DynamicImage> {
    let data = fs::read(path).ok()?;
    let mut largest: Option<&[u8]> = None;
    let mut i = 0;

    while i + 1 < data.len() {
        if data[i] == 0xFF && data[i + 1] == 0xD8 {
            let start = i;
            let mut j = i + 2;
            while j + 1 < data.len() && !(data[j] == 0xFF && data[j + 1] == 0xD9) {
                j += 1;
            }
            if j + 1 >= data.len() {
                break;
            }
            let jpeg = &data[start..j + 2];
            if jpeg.len() >= MIN_EMBEDDED_PREVIEW && largest.map_or(true, |l| jpeg.len() > l.len()) {
                largest = Some(jpeg);
            }
            i = j + 2;
        } else {
            i += 1;
        }
    }

    image::load_from_memory(largest?).ok()
}

/// Encoded bytes of `img` fitted into `spec`.
pub fn render_variant(img: &DynamicImage, spec: &VariantSpec, quality: u8) -> AppResult<(Vec<u8>, u32, u32)> {
    let max = spec.max_dimension.max(1);
    let resized;
    let target = if img.width() > max || img.height() > max {
        resized = img.resize(max, max, FilterType::Lanczos3);
        &resized
    } else {
        img
    };

    let mut bytes = Vec::new();
    match spec.format {
        VariantFormat::Jpeg => {
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            DynamicImage::ImageRgb8(target.to_rgb8()).write_with_encoder(encoder)?;
        }
        VariantFormat::Webp => {
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut bytes);
            DynamicImage::ImageRgba8(target.to_rgba8()).write_with_encoder(encoder)?;
        }
        VariantFormat::Png => {
            let encoder = image::codecs::png::PngEncoder::new(&mut bytes);
            DynamicImage::ImageRgba8(target.to_rgba8()).write_with_encoder(encoder)?;
        }
    }

    Ok((bytes, target.width(), target.height()))
}

/// A variant that is now available in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDerivative {
    pub derivative: Derivative,
    /// Served from an existing cache entry rather than rendered.
    pub reused: bool,
}

/// 衍生图生成服务
pub struct DerivativeService {
    cache: Arc<DerivativeCache>,
    variants: Vec<VariantSpec>,
    limits: DecodeLimits,
    quality: u8,
    pool: rayon::ThreadPool,
}

impl DerivativeService {
    pub fn new(cache: Arc<DerivativeCache>, settings: &DerivativeSettings, workers: usize) -> AppResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("derivative-{}", i))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build derivative pool: {}", e)))?;

        Ok(Self {
            cache,
            variants: settings.variants.clone(),
            limits: DecodeLimits::from_settings(settings),
            quality: settings.quality,
            pool,
        })
    }

    pub fn cache(&self) -> &Arc<DerivativeCache> {
        &self.cache
    }

    pub fn variants(&self) -> &[VariantSpec] {
        &self.variants
    }

    pub fn limits(&self) -> DecodeLimits {
        self.limits
    }

    /// Run CPU heavy work on the bounded derivative pool.
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    /// Produce one variant, reusing the cache entry when it exists.
    pub fn generate(
        &self,
        source: &MediaSource,
        fingerprint: &str,
        spec: &VariantSpec,
    ) -> AppResult<GeneratedDerivative> {
        if let Some(derivative) = self.cache.lookup(fingerprint, spec) {
            return Ok(GeneratedDerivative {
                derivative,
                reused: true,
            });
        }

        let img = source.image()?;
        let (bytes, width, height) = render_variant(&img, spec, self.quality)
            .map_err(|e| AppError::derivative(source.path(), e))?;
        let (derivative, created) = self.cache.store(fingerprint, spec, &bytes, width, height)?;

        if created {
            tracing::debug!(
                "Rendered {} for {} ({}x{}, {} bytes)",
                spec.name,
                source.path().display(),
                width,
                height,
                derivative.byte_size
            );
        }

        Ok(GeneratedDerivative {
            derivative,
            reused: !created,
        })
    }

    /// Generate every variant in `wanted`. Failures do not undo the variants
    /// that succeeded.
    pub fn generate_all(
        &self,
        source: &MediaSource,
        fingerprint: &str,
        wanted: &[&VariantSpec],
    ) -> Vec<AppResult<GeneratedDerivative>> {
        wanted
            .iter()
            .map(|spec| self.generate(source, fingerprint, spec))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> DerivativeSettings {
        DerivativeSettings {
            variants: vec![
                VariantSpec::new("thumbnail", 50, VariantFormat::Webp),
                VariantSpec::new("large", 120, VariantFormat::Jpeg),
            ],
            max_source_pixels: 1_000_000,
            max_decode_alloc_mb: 64,
            quality: 80,
            workers: 2,
        }
    }

    fn setup(temp: &TempDir) -> DerivativeService {
        let cache = Arc::new(DerivativeCache::new(temp.path().join("cache")).unwrap());
        DerivativeService::new(cache, &settings(), 2).unwrap()
    }

    fn source(service: &DerivativeService, path: &Path) -> MediaSource {
        MediaSource::new(path.to_path_buf(), None, None, service.limits())
    }

    fn write_image(path: &Path, w: u32, h: u32) {
        image::RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 255) as u8, (y % 255) as u8, 90]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_cache_path_layout() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);
        let path = service
            .cache()
            .path_for("abc123", &VariantSpec::new("thumbnail", 10, VariantFormat::Webp));
        assert_eq!(path, temp.path().join("cache").join("abc123").join("thumbnail.webp"));
    }

    #[test]
    fn test_generate_then_hit_cache() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);
        let img = temp.path().join("a.png");
        write_image(&img, 300, 200);
        let src = source(&service, &img);

        let variants = settings().variants;
        let first = service.generate(&src, "fp1", &variants[0]).unwrap();
        assert!(!first.reused);
        assert_eq!((first.derivative.width, first.derivative.height), (50, 33));
        assert!(Path::new(&first.derivative.location).exists());

        let large = service.generate(&src, "fp1", &variants[1]).unwrap();
        assert_eq!((large.derivative.width, large.derivative.height), (120, 80));
        assert_eq!(large.derivative.content_type, "image/jpeg");

        let again = service.generate(&source(&service, &img), "fp1", &variants[0]).unwrap();
        assert!(again.reused);
        assert_eq!(again.derivative, first.derivative);
    }

    #[test]
    fn test_small_source_is_not_upscaled() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);
        let img = temp.path().join("tiny.png");
        write_image(&img, 20, 10);

        let out = service
            .generate(&source(&service, &img), "tiny", &settings().variants[1])
            .unwrap();
        assert_eq!((out.derivative.width, out.derivative.height), (20, 10));
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        let img = DynamicImage::new_rgb8(40, 10);
        let rotated = apply_orientation(img, 6);
        assert_eq!((rotated.width(), rotated.height()), (10, 40));
    }

    #[test]
    fn test_store_first_writer_wins() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(temp.path().to_path_buf()).unwrap();
        let spec = VariantSpec::new("thumbnail", 10, VariantFormat::Png);

        let mut first = Vec::new();
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut std::io::Cursor::new(&mut first), image::ImageFormat::Png)
            .unwrap();
        let mut second = Vec::new();
        DynamicImage::new_rgb8(2, 2)
            .write_to(&mut std::io::Cursor::new(&mut second), image::ImageFormat::Png)
            .unwrap();

        let (a, created_a) = cache.store("fp", &spec, &first, 4, 4).unwrap();
        let (b, created_b) = cache.store("fp", &spec, &second, 2, 2).unwrap();
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(b.width, 4);
        assert_eq!(fs::read(&a.location).unwrap(), first);

        // no temp files left next to the entry
        let entries = fs::read_dir(temp.path().join("fp")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_concurrent_writers_share_one_entry() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(setup(&temp));
        let img = temp.path().join("a.png");
        write_image(&img, 200, 200);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let img = img.clone();
                std::thread::spawn(move || {
                    let src = MediaSource::new(img, None, None, service.limits());
                    service.generate(&src, "race", &settings().variants[0]).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|r| r.derivative.location == results[0].derivative.location));
        let entries = fs::read_dir(temp.path().join("cache").join("race")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_oversized_source_hits_resource_limit() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);
        let img = temp.path().join("huge.png");
        write_image(&img, 1100, 1000);

        let err = service
            .generate(&source(&service, &img), "huge", &settings().variants[0])
            .unwrap_err();
        assert!(matches!(err, AppError::ResourceLimit(_)));
    }

    #[test]
    fn test_frame_source_renders_and_respects_limit() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);

        let frame = DynamicImage::new_rgb8(320, 180);
        let src = MediaSource::from_frame(temp.path().join("clip.mp4"), frame, service.limits());
        let out = service.generate(&src, "clip", &settings().variants[0]).unwrap();
        assert_eq!((out.derivative.width, out.derivative.height), (50, 28));

        let huge = DynamicImage::new_rgb8(1100, 1000);
        let src = MediaSource::from_frame(temp.path().join("big.mp4"), huge, service.limits());
        let err = service.generate(&src, "big", &settings().variants[0]).unwrap_err();
        assert!(matches!(err, AppError::ResourceLimit(_)));
    }

    #[test]
    fn test_corrupt_source_is_derivative_error() {
        let temp = TempDir::new().unwrap();
        let service = setup(&temp);
        let img = temp.path().join("bad.png");
        fs::write(&img, b"\x89PNG\r\n\x1a\nnot really").unwrap();

        let err = service
            .generate(&source(&service, &img), "bad", &settings().variants[0])
            .unwrap_err();
        assert_eq!(err.kind(), crate::utils::ErrorKind::Derivative);
    }

    #[test]
    fn test_pins_block_eviction_until_dropped() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(DerivativeCache::new(temp.path().to_path_buf()).unwrap());

        let pins = cache.pin(vec!["fp".to_string()]);
        assert!(cache.with_unpinned("fp", || ()).is_none());
        assert!(cache.with_unpinned("other", || ()).is_some());
        drop(pins);
        assert!(cache.with_unpinned("fp", || ()).is_some());
    }

    #[test]
    fn test_sweep_orphans_keeps_known_files() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(temp.path().to_path_buf()).unwrap();
        let spec = VariantSpec::new("thumbnail", 10, VariantFormat::Png);
        let mut png = Vec::new();
        DynamicImage::new_rgb8(2, 2)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let (kept, _) = cache.store("keep", &spec, &png, 2, 2).unwrap();
        cache.store("orphan", &spec, &png, 2, 2).unwrap();

        let known: HashSet<String> = [kept.location.clone()].into_iter().collect();
        let stats = cache.sweep_orphans(&known).unwrap();
        assert_eq!(stats.deleted_files, 1);
        assert!(Path::new(&kept.location).exists());
        assert!(!temp.path().join("orphan").exists());
        assert_eq!(cache.stats().unwrap().total_files, 1);
    }
}

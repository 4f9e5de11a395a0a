//! 目录遍历服务
//!
//! Walks a root depth-first and yields one [`DirectoryBatch`] per directory,
//! holding that directory's media files. Parents are always yielded before
//! their children. The walk is lazy: only the batch being assembled is held
//! in memory.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::models::MediaKind;
use crate::utils::error::{AppError, AppResult};
use crate::utils::normalize_root_path;

use super::ignore::{glob_to_regex, IgnoreRules, IgnoreStack, IGNORE_FILE_NAME};

/// 支持的图片格式
pub const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "heic", "heif",
];

/// RAW 格式
pub const RAW_EXTENSIONS: &[&str] = &[
    "raw", "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "pef", "srw", "raf",
];

/// 支持的视频格式
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "webm", "mts", "m2ts", "3gp", "wmv", "mpg", "mpeg",
    "flv",
];

fn lower_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Media kind implied by the file extension, `None` for non-media files.
pub fn media_kind_for(path: &Path) -> Option<MediaKind> {
    let ext = lower_extension(path)?;
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) || RAW_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

pub fn is_raw_file(path: &Path) -> bool {
    lower_extension(path)
        .map(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_jpeg_file(path: &Path) -> bool {
    matches!(lower_extension(path).as_deref(), Some("jpg") | Some("jpeg"))
}

/// 遍历选项
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// 排除的目录或文件名（支持通配符）
    pub exclude_patterns: Vec<String>,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    /// Drop a JPEG whose stem matches a RAW file in the same directory and
    /// use it as the RAW's decode source instead.
    pub skip_raw_counterparts: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        let scan = crate::models::ScanSettings::default();
        Self::from_settings(&scan)
    }
}

impl WalkOptions {
    pub fn from_settings(scan: &crate::models::ScanSettings) -> Self {
        Self {
            exclude_patterns: scan.excluded_patterns.clone(),
            include_hidden: scan.include_hidden,
            follow_symlinks: scan.follow_symlinks,
            skip_raw_counterparts: scan.skip_raw_counterparts,
        }
    }
}

/// 单个媒体文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: MediaKind,
    pub size: u64,
    /// Modification time in nanoseconds since the epoch.
    pub modified_ns: i64,
    /// JPEG sibling of a RAW file, used as its decode source.
    pub counterpart: Option<PathBuf>,
}

/// One directory and the media files directly inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBatch {
    pub path: PathBuf,
    /// `None` only for the root directory.
    pub parent: Option<PathBuf>,
    pub depth: usize,
    pub files: Vec<FileEntry>,
}

#[derive(Debug)]
pub enum WalkItem {
    Directory(DirectoryBatch),
    /// A subtree or file that could not be read. Previously indexed content
    /// under `path` must be kept.
    Error { path: PathBuf, error: AppError },
}

/// Lazy walker over one root. Not reusable: build a new one per scan.
pub struct Walker {
    root: PathBuf,
    options: WalkOptions,
    excludes: Vec<Regex>,
    entries: walkdir::IntoIter,
    ignore: IgnoreStack,
    visited: HashSet<PathBuf>,
    current: Option<DirectoryBatch>,
    ready: VecDeque<WalkItem>,
    finished: bool,
}

impl Walker {
    pub fn new(root: &Path, options: WalkOptions) -> AppResult<Self> {
        // Child paths are joined onto the root, so their parents must match
        // the root batch path exactly.
        let root = normalize_root_path(root);
        let root = root.as_path();
        if root.to_str().is_none() {
            return Err(AppError::InvalidPath(format!(
                "root is not valid UTF-8: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(AppError::InvalidPath(format!(
                "root is not a directory: {}",
                root.display()
            )));
        }
        std::fs::read_dir(root).map_err(|e| AppError::filesystem(root, e))?;

        let excludes = options
            .exclude_patterns
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();

        // Files sort before subdirectories so a directory's files arrive
        // contiguously right after the directory itself.
        let entries = WalkDir::new(root)
            .follow_links(options.follow_symlinks)
            .sort_by(|a, b| {
                let a_dir = a.file_type().is_dir();
                let b_dir = b.file_type().is_dir();
                a_dir.cmp(&b_dir).then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter();

        Ok(Self {
            root: root.to_path_buf(),
            options,
            excludes,
            entries,
            ignore: IgnoreStack::default(),
            visited: HashSet::new(),
            current: None,
            ready: VecDeque::new(),
            finished: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded_name(&self, name: &str) -> bool {
        if !self.options.include_hidden && name.starts_with('.') {
            return true;
        }
        name == IGNORE_FILE_NAME || self.excludes.iter().any(|re| re.is_match(name))
    }

    fn flush_current(&mut self) {
        if let Some(mut batch) = self.current.take() {
            if self.options.skip_raw_counterparts {
                pair_raw_counterparts(&mut batch.files);
            }
            self.ready.push_back(WalkItem::Directory(batch));
        }
    }

    fn handle_entry(&mut self, entry: DirEntry) {
        let depth = entry.depth();
        let path = entry.path().to_path_buf();
        let is_dir = entry.file_type().is_dir();
        self.ignore.truncate_to(depth);

        if depth > 0 {
            let name = entry.file_name().to_string_lossy();
            if self.is_excluded_name(&name) || self.ignore.is_ignored(&path, is_dir) {
                if is_dir {
                    self.entries.skip_current_dir();
                }
                return;
            }

            // Index keys are strings; a lossy conversion could merge two names.
            if path.to_str().is_none() && (is_dir || media_kind_for(&path).is_some()) {
                if is_dir {
                    self.entries.skip_current_dir();
                }
                self.ready.push_back(WalkItem::Error {
                    error: AppError::filesystem(&path, "file name is not valid UTF-8"),
                    path,
                });
                return;
            }
        }

        if is_dir {
            self.enter_directory(entry, depth, path);
        } else {
            self.add_file(&entry, path);
        }
    }

    fn enter_directory(&mut self, entry: DirEntry, depth: usize, path: PathBuf) {
        // Linked directories already seen through another path are walked once.
        let real = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !self.visited.insert(real) {
            self.entries.skip_current_dir();
            self.ready.push_back(WalkItem::Error {
                path: path.clone(),
                error: AppError::filesystem(&path, "directory already visited through a symlink"),
            });
            return;
        }

        self.flush_current();

        if let Some(rules) = IgnoreRules::load(&path) {
            self.ignore.push(depth, rules);
        }

        let parent = if depth == 0 {
            None
        } else {
            entry.path().parent().map(Path::to_path_buf)
        };
        self.current = Some(DirectoryBatch {
            path,
            parent,
            depth,
            files: Vec::new(),
        });
    }

    fn add_file(&mut self, entry: &DirEntry, path: PathBuf) {
        let Some(kind) = media_kind_for(&path) else {
            return;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                self.ready.push_back(WalkItem::Error {
                    path: path.clone(),
                    error: AppError::filesystem(&path, e),
                });
                return;
            }
        };

        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let file = FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path,
            kind,
            size: metadata.len(),
            modified_ns,
            counterpart: None,
        };

        match self.current.as_mut() {
            Some(batch) if file.path.parent() == Some(batch.path.as_path()) => batch.files.push(file),
            _ => tracing::debug!("File outside current directory: {}", file.path.display()),
        }
    }

    fn handle_error(&mut self, err: walkdir::Error) {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        let reason = if let Some(ancestor) = err.loop_ancestor() {
            format!("symlink cycle back to {}", ancestor.display())
        } else {
            err.to_string()
        };

        // An unreadable directory produces no batch, so nothing under it is
        // treated as removed.
        if self.current.as_ref().map(|b| b.path == path).unwrap_or(false)
            && err.loop_ancestor().is_none()
        {
            self.current = None;
        }

        tracing::warn!("Walk error at {}: {}", path.display(), reason);
        self.ready.push_back(WalkItem::Error {
            error: AppError::filesystem(&path, reason),
            path,
        });
    }
}

impl Iterator for Walker {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }
            match self.entries.next() {
                Some(Ok(entry)) => self.handle_entry(entry),
                Some(Err(err)) => self.handle_error(err),
                None => {
                    self.flush_current();
                    self.finished = true;
                }
            }
        }
    }
}

/// Pair each RAW file with a same-stem JPEG and drop the JPEG from the batch.
fn pair_raw_counterparts(files: &mut Vec<FileEntry>) {
    let stem_of = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };

    let raw_stems: HashSet<String> = files
        .iter()
        .filter(|f| is_raw_file(&f.path))
        .map(|f| stem_of(&f.path))
        .collect();
    if raw_stems.is_empty() {
        return;
    }

    let mut jpegs: Vec<FileEntry> = Vec::new();
    files.retain(|f| {
        if is_jpeg_file(&f.path) && raw_stems.contains(&stem_of(&f.path)) {
            jpegs.push(f.clone());
            false
        } else {
            true
        }
    });

    for file in files.iter_mut().filter(|f| is_raw_file(&f.path)) {
        let stem = stem_of(&file.path);
        if let Some(jpeg) = jpegs.iter().find(|j| stem_of(&j.path) == stem) {
            file.counterpart = Some(jpeg.path.clone());
        }
    }
}

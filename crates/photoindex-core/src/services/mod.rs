//! Photoindex 服务模块
//!
//! 扫描、提取、衍生图生成与索引协调

pub mod album_tree;
pub mod capabilities;
pub mod derivative;
pub mod hasher;
pub mod ignore;
pub mod metadata;
pub mod reconciler;
pub mod reporter;
#[cfg(feature = "tokio-runtime")]
pub mod scheduler;
pub mod settings;
pub mod video;
pub mod walker;

// 重新导出常用类型
pub use album_tree::{AlbumForest, AlbumNode};
pub use capabilities::{
    Capabilities, FaceDetector, Geocoder, NoFaceDetector, NoGeocoder, NoVideoProber, VideoInfo,
    VideoProber,
};
pub use derivative::{
    CacheStats, CleanupStats, DecodeLimits, DerivativeCache, DerivativeService, GeneratedDerivative,
    MediaSource,
};
pub use hasher::{FileHasher, FileState};
pub use ignore::{IgnoreRules, IGNORE_FILE_NAME};
pub use metadata::{ExtractedMetadata, MetadataExtractor};
pub use reconciler::{Baseline, ReconcileOptions, Reconciler};
pub use reporter::{ScanReport, StatusReporter};
#[cfg(feature = "tokio-runtime")]
pub use scheduler::ScanScheduler;
pub use settings::SettingsManager;
pub use video::FfmpegVideoProber;
pub use walker::{media_kind_for, DirectoryBatch, FileEntry, WalkItem, WalkOptions, Walker};

//! 应用程序设置数据模型

use serde::{Deserialize, Serialize};

use super::{RootConfig, VariantSpec};

/// 扫描设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSettings {
    /// 周期扫描间隔（秒），0 表示关闭
    pub periodic_interval_secs: u64,
    /// 排除的目录/文件模式
    pub excluded_patterns: Vec<String>,
    /// 是否包含隐藏文件
    pub include_hidden: bool,
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// Hash file contents even when size and mtime are unchanged.
    pub content_hash_change_detection: bool,
    /// Skip a JPEG that sits next to a RAW file with the same stem.
    pub skip_raw_counterparts: bool,
    /// 每个根目录保留的扫描记录数
    pub history_limit: usize,
    /// 同时扫描的根目录上限
    pub max_concurrent_scans: usize,
    /// Fold a request made during a running scan into one follow-up run.
    pub queue_follow_up: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            periodic_interval_secs: 4 * 60 * 60,
            excluded_patterns: vec![
                String::from(".git"),
                String::from("node_modules"),
                String::from("@eaDir"),
                String::from("$RECYCLE.BIN"),
                String::from("System Volume Information"),
            ],
            include_hidden: false,
            follow_symlinks: true,
            content_hash_change_detection: false,
            skip_raw_counterparts: true,
            history_limit: 10,
            max_concurrent_scans: 2,
            queue_follow_up: true,
        }
    }
}

/// 衍生图设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivativeSettings {
    pub variants: Vec<VariantSpec>,
    /// 解码前允许的最大源像素数
    pub max_source_pixels: u64,
    /// 解码内存上限（MB）
    pub max_decode_alloc_mb: u64,
    /// JPEG 质量 (0-100)
    pub quality: u8,
    /// CPU 工作线程数，0 表示按核心数
    pub workers: usize,
}

impl Default for DerivativeSettings {
    fn default() -> Self {
        Self {
            variants: VariantSpec::defaults(),
            max_source_pixels: 100_000_000,
            max_decode_alloc_mb: 1024,
            quality: 85,
            workers: 0,
        }
    }
}

/// 性能设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceSettings {
    /// I/O 线程数（目录遍历、哈希）
    pub io_threads: usize,
    /// 相册事务失败后的重试次数
    pub transaction_retries: u32,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            io_threads: 8,
            transaction_retries: 1,
        }
    }
}

/// 应用程序设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub roots: Vec<RootConfig>,
    pub scan: ScanSettings,
    pub derivatives: DerivativeSettings,
    pub performance: PerformanceSettings,
}

impl AppSettings {
    /// Number of CPU workers for derivative generation.
    pub fn derivative_workers(&self) -> usize {
        if self.derivatives.workers > 0 {
            self.derivatives.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"roots":[{"ownerId":"alice","path":"/photos"}],"scan":{"includeHidden":true}}"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.roots.len(), 1);
        assert!(settings.scan.include_hidden);
        assert_eq!(settings.scan.history_limit, 10);
        assert_eq!(settings.derivatives.variants.len(), 2);
    }
}

//! 扫描状态与结果数据模型

use serde::{Deserialize, Serialize};

use crate::utils::ErrorKind;

/// Per-root scheduler state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    /// Idle again after the last run ended on a fatal error.
    Aborted { reason: String },
}

impl ScanState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanState::Scanning)
    }
}

/// 扫描计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCounts {
    pub albums_created: usize,
    pub albums_updated: usize,
    pub albums_deleted: usize,
    pub media_created: usize,
    pub media_updated: usize,
    pub media_deleted: usize,
    /// 跳过的未变更文件
    pub media_unchanged: usize,
    pub derivatives_generated: usize,
    pub derivatives_reused: usize,
    pub derivatives_evicted: usize,
    /// Album transactions that failed and were attempted again.
    #[serde(default)]
    pub transaction_retries: usize,
    pub errors: usize,
}

impl ScanCounts {
    /// True when the run changed nothing in the index.
    pub fn is_noop(&self) -> bool {
        self.albums_created == 0
            && self.albums_updated == 0
            && self.albums_deleted == 0
            && self.media_created == 0
            && self.media_updated == 0
            && self.media_deleted == 0
            && self.derivatives_generated == 0
            && self.derivatives_evicted == 0
    }
}

/// 单项失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
    Aborted,
}

/// Summary of one scan execution on one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scan_id: String,
    pub root_id: i64,
    pub root_path: String,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: ScanOutcome,
    /// 中止原因（仅 Aborted）
    pub abort_reason: Option<String>,
    pub counts: ScanCounts,
    pub failures: Vec<ScanFailure>,
}

impl ScanResult {
    pub fn is_noop(&self) -> bool {
        self.counts.is_noop()
    }
}

/// Latest finished scan for a root, or an explicit marker that none ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "camelCase")]
pub enum LastScan {
    NeverRun,
    Finished(ScanResult),
}

/// Snapshot returned by `scan_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub root_id: i64,
    pub state: ScanState,
    pub last_scan: LastScan,
    pub follow_up_pending: bool,
}

/// Result of an on-demand scan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerOutcome {
    Completed { result: ScanResult },
    /// Another scan owns the root. `follow_up_queued` tells whether this
    /// request was folded into the single pending follow-up run.
    AlreadyRunning { follow_up_queued: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_state_serialization() {
        let json = serde_json::to_string(&ScanState::Aborted {
            reason: "storage unavailable".into(),
        })
        .unwrap();
        assert!(json.contains("\"state\":\"aborted\""));
        assert!(json.contains("storage unavailable"));
    }

    #[test]
    fn test_unchanged_counts_are_noop() {
        let mut counts = ScanCounts {
            media_unchanged: 12,
            derivatives_reused: 3,
            ..Default::default()
        };
        assert!(counts.is_noop());
        counts.media_updated = 1;
        assert!(!counts.is_noop());
    }
}

//! Error types for the scanning and indexing core.
//!
//! Per-item failures (filesystem, extraction, derivative, transaction) are
//! recorded in the scan result and never abort a scan. Only a storage outage
//! is fatal for a whole run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 数据库错误
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO 错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 图像处理错误
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// 路径无效
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// 文件未找到
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Permission denied, unreadable directory, symlink cycle.
    #[error("filesystem error at {path}: {reason}")]
    Filesystem { path: String, reason: String },

    /// The file is not decodable as the media kind its extension claims.
    #[error("unreadable media {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Decode or encode failure while rendering a variant.
    #[error("derivative failed for {path}: {reason}")]
    Derivative { path: String, reason: String },

    /// Source image exceeds the configured decode bounds.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// A storage write failed after the retry budget was spent.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The store cannot be reached at all.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// The owning scan was cancelled.
    #[error("scan cancelled")]
    Cancelled,

    /// 通用错误
    #[error("{0}")]
    General(String),
}

/// Coarse classification used when recording per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Filesystem,
    Extraction,
    Derivative,
    Transaction,
    Cancelled,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Io(_)
            | AppError::InvalidPath(_)
            | AppError::FileNotFound(_)
            | AppError::Filesystem { .. } => ErrorKind::Filesystem,
            AppError::Extraction { .. } => ErrorKind::Extraction,
            AppError::Image(_) | AppError::Derivative { .. } | AppError::ResourceLimit(_) => {
                ErrorKind::Derivative
            }
            AppError::Database(_) | AppError::Transaction(_) | AppError::StorageUnavailable(_) => {
                ErrorKind::Transaction
            }
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Config(_) | AppError::General(_) => ErrorKind::Other,
        }
    }

    /// Errors that end the whole scan instead of a single item.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::StorageUnavailable(_) => true,
            AppError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DatabaseCorrupt
                    | rusqlite::ErrorCode::NotADatabase
                    | rusqlite::ErrorCode::DiskFull
            ),
            _ => false,
        }
    }

    pub fn filesystem(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        AppError::Filesystem {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        AppError::Extraction {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn derivative(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        AppError::Derivative {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error shape handed to the API layer. Internal error values never cross
/// that boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::Database(_) => "E_DB_ERROR",
            AppError::Io(_) => "E_IO_ERROR",
            AppError::Image(_) => "E_IMAGE_ERROR",
            AppError::InvalidPath(_) => "E_PATH_INVALID",
            AppError::FileNotFound(_) => "E_FILE_NOT_FOUND",
            AppError::Filesystem { .. } => "E_FILESYSTEM",
            AppError::Extraction { .. } => "E_UNREADABLE_MEDIA",
            AppError::Derivative { .. } => "E_DERIVATIVE",
            AppError::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            AppError::Transaction(_) => "E_TRANSACTION",
            AppError::StorageUnavailable(_) => "E_STORAGE_UNAVAILABLE",
            AppError::Config(_) => "E_CONFIG",
            AppError::Cancelled => "E_CANCELLED",
            AppError::General(_) => "E_GENERAL",
        };

        // Database messages may quote SQL; keep them out of API responses.
        let message = match &err {
            AppError::Database(_) => "storage operation failed".to_string(),
            _ => err.to_string(),
        };

        ApiError {
            code: code.to_string(),
            message,
        }
    }
}

/// 应用程序结果类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::FileNotFound("test.jpg".to_string());
        assert_eq!(err.to_string(), "file not found: test.jpg");
    }

    #[test]
    fn test_api_error_conversion() {
        let err = AppError::InvalidPath("/invalid/path".to_string());
        let api_err: ApiError = err.into();
        assert_eq!(api_err.code, "E_PATH_INVALID");
    }

    #[test]
    fn test_database_error_is_not_leaked() {
        let err = AppError::Database(rusqlite::Error::QueryReturnedNoRows);
        let api_err: ApiError = err.into();
        assert_eq!(api_err.code, "E_DB_ERROR");
        assert_eq!(api_err.message, "storage operation failed");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AppError::extraction("/a.jpg", "truncated").kind(),
            ErrorKind::Extraction
        );
        assert_eq!(
            AppError::ResourceLimit("too big".into()).kind(),
            ErrorKind::Derivative
        );
        assert_eq!(
            AppError::filesystem("/locked", "permission denied").kind(),
            ErrorKind::Filesystem
        );
        assert!(AppError::StorageUnavailable("gone".into()).is_fatal());
        assert!(!AppError::Transaction("busy".into()).is_fatal());
    }
}

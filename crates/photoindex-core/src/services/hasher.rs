//! 文件指纹服务
//!
//! Change detection is two-tiered. Size plus modification time is compared
//! first and costs nothing beyond the directory walk. Only when that cheap
//! state moved (or content hashing is forced) are the bytes read and hashed.
//! The stored fingerprint is the content hash, so byte-identical files at
//! different paths share it.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use xxhash_rust::xxh3::Xxh3;

use crate::utils::error::{AppError, AppResult};

const READ_BUFFER: usize = 64 * 1024;

/// Cheap on-disk state of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub size: i64,
    pub modified_ns: i64,
}

/// 文件哈希计算器
pub struct FileHasher;

impl FileHasher {
    pub fn file_state(path: &Path) -> AppResult<FileState> {
        let metadata = std::fs::metadata(path).map_err(|e| AppError::filesystem(path, e))?;
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(FileState {
            size: metadata.len() as i64,
            modified_ns,
        })
    }

    /// 128-bit xxh3 of the full file contents, streamed.
    pub fn content_hash(path: &Path) -> AppResult<String> {
        let file = File::open(path).map_err(|e| AppError::filesystem(path, e))?;
        Self::hash_reader(BufReader::with_capacity(READ_BUFFER, file))
            .map_err(|e| AppError::filesystem(path, e))
    }

    fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
        let mut hasher = Xxh3::new();
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:032x}", hasher.digest128()))
    }

    /// Whether the cheap state still matches what was indexed.
    pub fn state_unchanged(stored: FileState, current: FileState) -> bool {
        stored == current
    }
}

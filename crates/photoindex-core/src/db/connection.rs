//! 数据库连接管理
//!
//! 提供 SQLite 数据库连接和初始化功能

use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::models::now_rfc3339;
use crate::paths::PathProvider;
use crate::utils::error::{AppError, AppResult};

use super::schema::{INIT_SCHEMA, MIGRATIONS, SCHEMA_VERSION};

/// 数据库连接管理器
#[derive(Clone)]
pub struct Database {
    /// 数据库连接（使用 Arc<Mutex> 实现线程安全）
    conn: Arc<Mutex<Connection>>,
    /// 数据库文件路径
    path: PathBuf,
}

impl Database {
    /// 打开或创建数据库
    pub fn open(path: PathBuf) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        db.configure()?;

        Ok(db)
    }

    /// 使用 PathProvider 打开数据库
    pub fn open_with_provider(provider: &dyn PathProvider) -> AppResult<Self> {
        Self::open(provider.database_path())
    }

    /// 打开内存数据库（用于测试）
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };

        db.configure()?;

        Ok(db)
    }

    /// 配置数据库连接
    fn configure(&self) -> AppResult<()> {
        let conn = self.connection()?;

        // WAL 模式；外键必须开启，级联删除依赖它
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        Ok(())
    }

    /// 初始化数据库 Schema
    pub fn init(&self) -> AppResult<()> {
        let conn = self.connection()?;

        let table_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !table_exists {
            tracing::info!("Initializing database schema");

            conn.execute_batch(INIT_SCHEMA)?;
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![SCHEMA_VERSION, now_rfc3339()],
            )?;

            tracing::info!("Database schema ready, version {}", SCHEMA_VERSION);
        } else {
            Self::migrate(&conn)?;
        }

        Ok(())
    }

    /// 执行数据库迁移
    fn migrate(conn: &Connection) -> AppResult<()> {
        let current_version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        tracing::debug!("Current database version: {}", current_version);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                tracing::info!(
                    "Applying migration v{}: {}",
                    migration.version,
                    migration.description
                );

                conn.execute_batch(migration.sql)?;
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, now_rfc3339()],
                )?;
            }
        }

        Ok(())
    }

    /// 获取数据库连接（用于执行查询）
    pub fn connection(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AppError::StorageUnavailable(format!("connection lock poisoned: {}", e)))
    }

    /// 执行事务
    ///
    /// The closure's error rolls the transaction back.
    pub fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Cheap liveness probe run before each scan; a failure aborts the scan.
    pub fn ping(&self) -> AppResult<()> {
        let conn = self.connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// 获取数据库文件路径
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// 获取数据库统计信息
    pub fn stats(&self) -> AppResult<DatabaseStats> {
        let conn = self.connection()?;
        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap_or(0) };

        let root_count = count("SELECT COUNT(*) FROM roots");
        let album_count = count("SELECT COUNT(*) FROM albums");
        let media_count = count("SELECT COUNT(*) FROM media");
        let derivative_count = count("SELECT COUNT(*) FROM derivatives");
        let share_token_count = count("SELECT COUNT(*) FROM share_tokens");

        let db_size = if self.path.to_string_lossy() != ":memory:" {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(DatabaseStats {
            root_count,
            album_count,
            media_count,
            derivative_count,
            share_token_count,
            db_size_bytes: db_size,
        })
    }
}

/// 数据库统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub root_count: i64,
    pub album_count: i64,
    pub media_count: i64,
    pub derivative_count: i64,
    pub share_token_count: i64,
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.ping().unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.media_count, 0);
        assert_eq!(stats.album_count, 0);
    }

    #[test]
    fn test_init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let db = Database::open(path.clone()).unwrap();
        db.init().unwrap();
        drop(db);

        let db = Database::open(path).unwrap();
        db.init().unwrap();
        let version: i32 = db
            .connection()
            .unwrap()
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();

        let result: AppResult<()> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO roots (owner_id, root_path, date_added) VALUES ('u', '/p', 'now')",
                [],
            )?;
            Err(AppError::General("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().root_count, 0);
    }
}

//! 根目录数据访问层

use rusqlite::{params, Row};

use crate::models::{now_rfc3339, Root};
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

fn row_to_root(row: &Row<'_>) -> rusqlite::Result<Root> {
    Ok(Root {
        root_id: row.get("root_id")?,
        owner_id: row.get("owner_id")?,
        path: row.get("root_path")?,
        date_added: row.get("date_added")?,
    })
}

impl Database {
    /// 注册根目录
    ///
    /// The same owner may not register a path twice.
    pub fn create_root(&self, owner_id: &str, path: &str) -> AppResult<Root> {
        let conn = self.connection()?;
        let now = now_rfc3339();

        let result = conn.execute(
            "INSERT INTO roots (owner_id, root_path, date_added) VALUES (?1, ?2, ?3)",
            params![owner_id, path, now],
        );

        match result {
            Ok(_) => Ok(Root {
                root_id: conn.last_insert_rowid(),
                owner_id: owner_id.to_string(),
                path: path.to_string(),
                date_added: now,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AppError::Config(format!(
                    "root {} is already registered for {}",
                    path, owner_id
                )))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub fn get_root(&self, root_id: i64) -> AppResult<Option<Root>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM roots WHERE root_id = ?1",
            params![root_id],
            row_to_root,
        );

        match result {
            Ok(root) => Ok(Some(root)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub fn find_root(&self, owner_id: &str, path: &str) -> AppResult<Option<Root>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM roots WHERE owner_id = ?1 AND root_path = ?2",
            params![owner_id, path],
            row_to_root,
        );

        match result {
            Ok(root) => Ok(Some(root)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// 获取所有根目录（按注册顺序）
    pub fn list_roots(&self) -> AppResult<Vec<Root>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT * FROM roots ORDER BY root_id")?;
        let roots = stmt
            .query_map([], row_to_root)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roots)
    }

    /// 删除根目录，相册、媒体、分享令牌随之级联删除
    pub fn delete_root(&self, root_id: i64) -> AppResult<bool> {
        let conn = self.connection()?;
        let rows = conn.execute("DELETE FROM roots WHERE root_id = ?1", params![root_id])?;
        Ok(rows > 0)
    }
}

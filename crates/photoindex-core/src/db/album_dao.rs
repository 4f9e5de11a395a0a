//! 相册数据访问层

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::Album;
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

/// 从数据库行映射到 Album 结构
pub(crate) fn row_to_album(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        album_id: row.get("album_id")?,
        root_id: row.get("root_id")?,
        parent_album_id: row.get("parent_album_id")?,
        title: row.get("title")?,
        path: row.get("path")?,
        date_created: row.get("date_created")?,
    })
}

/// Resolve an album id by its directory path inside an open transaction.
pub(crate) fn album_id_for_path(
    conn: &Connection,
    root_id: i64,
    path: &str,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT album_id FROM albums WHERE root_id = ?1 AND path = ?2",
        params![root_id, path],
        |row| row.get(0),
    )
    .optional()
}

impl Database {
    /// 根据 ID 获取相册
    pub fn get_album(&self, album_id: i64) -> AppResult<Option<Album>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM albums WHERE album_id = ?1",
            params![album_id],
            row_to_album,
        );

        match result {
            Ok(album) => Ok(Some(album)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// 根据目录路径获取相册
    pub fn get_album_by_path(&self, root_id: i64, path: &str) -> AppResult<Option<Album>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM albums WHERE root_id = ?1 AND path = ?2",
            params![root_id, path],
            row_to_album,
        );

        match result {
            Ok(album) => Ok(Some(album)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// 获取根目录下的全部相册（路径排序，父目录在前）
    pub fn albums_for_root(&self, root_id: i64) -> AppResult<Vec<Album>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT * FROM albums WHERE root_id = ?1 ORDER BY path")?;
        let albums = stmt
            .query_map(params![root_id], row_to_album)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(albums)
    }

    /// 获取子相册
    pub fn child_albums(&self, album_id: i64) -> AppResult<Vec<Album>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT * FROM albums WHERE parent_album_id = ?1 ORDER BY title")?;
        let albums = stmt
            .query_map(params![album_id], row_to_album)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(albums)
    }

    /// The album that represents the root directory itself.
    pub fn top_album(&self, root_id: i64) -> AppResult<Option<Album>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM albums WHERE root_id = ?1 AND parent_album_id IS NULL",
            params![root_id],
            row_to_album,
        );

        match result {
            Ok(album) => Ok(Some(album)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }
}

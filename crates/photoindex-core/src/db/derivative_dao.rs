//! 衍生图数据访问层

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, Row};

use crate::models::Derivative;
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

fn row_to_derivative(row: &Row<'_>) -> rusqlite::Result<Derivative> {
    let byte_size: i64 = row.get("byte_size")?;
    Ok(Derivative {
        fingerprint: row.get("fingerprint")?,
        variant: row.get("variant")?,
        width: row.get("width")?,
        height: row.get("height")?,
        byte_size: byte_size.max(0) as u64,
        location: row.get("location")?,
        content_type: row.get("content_type")?,
    })
}

/// Drop the rows of `fingerprint` when no media references it any more.
/// Returns the removed rows so their cache files can be deleted.
pub(crate) fn evict_unreferenced(
    conn: &Connection,
    fingerprint: &str,
) -> rusqlite::Result<Vec<Derivative>> {
    let referenced: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM media WHERE fingerprint = ?1)",
        params![fingerprint],
        |row| row.get(0),
    )?;
    if referenced {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT * FROM derivatives WHERE fingerprint = ?1")?;
    let rows = stmt
        .query_map(params![fingerprint], row_to_derivative)?
        .collect::<Result<Vec<_>, _>>()?;

    conn.execute(
        "DELETE FROM derivatives WHERE fingerprint = ?1",
        params![fingerprint],
    )?;

    Ok(rows)
}

impl Database {
    /// 获取指定指纹与变体的衍生图
    pub fn get_derivative(&self, fingerprint: &str, variant: &str) -> AppResult<Option<Derivative>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM derivatives WHERE fingerprint = ?1 AND variant = ?2",
            params![fingerprint, variant],
            row_to_derivative,
        );

        match result {
            Ok(derivative) => Ok(Some(derivative)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub fn derivatives_for_fingerprint(&self, fingerprint: &str) -> AppResult<Vec<Derivative>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT * FROM derivatives WHERE fingerprint = ?1 ORDER BY variant")?;
        let rows = stmt
            .query_map(params![fingerprint], row_to_derivative)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 获取媒体的全部衍生图
    pub fn derivatives_for_media(&self, media_id: i64) -> AppResult<Vec<Derivative>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT d.* FROM derivatives d JOIN media m ON m.fingerprint = d.fingerprint
             WHERE m.media_id = ?1 ORDER BY d.variant",
        )?;
        let rows = stmt
            .query_map(params![media_id], row_to_derivative)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Variant names already stored for each fingerprint referenced by a root.
    pub fn load_derivative_variants(
        &self,
        root_id: i64,
    ) -> AppResult<HashMap<String, HashSet<String>>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT d.fingerprint, d.variant FROM derivatives d
             JOIN media m ON m.fingerprint = d.fingerprint
             JOIN albums a ON a.album_id = m.album_id
             WHERE a.root_id = ?1",
        )?;
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        let rows = stmt.query_map(params![root_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (fingerprint, variant) = row?;
            map.entry(fingerprint).or_default().insert(variant);
        }
        Ok(map)
    }

    /// Fingerprints that have derivative rows but no referencing media.
    pub fn unreferenced_fingerprints(&self) -> AppResult<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT d.fingerprint FROM derivatives d
             WHERE NOT EXISTS (SELECT 1 FROM media m WHERE m.fingerprint = d.fingerprint)",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// 所有已登记的缓存文件路径
    pub fn derivative_locations(&self) -> AppResult<HashSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT location FROM derivatives")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(rows)
    }
}

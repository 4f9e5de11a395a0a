//! 媒体数据访问层

use rusqlite::{params, Row};

use crate::models::{FaceRegion, Media, MediaExif, MediaKind};
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

/// 从数据库行映射到 Media 结构
pub(crate) fn row_to_media(row: &Row<'_>) -> rusqlite::Result<Media> {
    let kind: String = row.get("kind")?;
    Ok(Media {
        media_id: row.get("media_id")?,
        album_id: row.get("album_id")?,
        file_path: row.get("file_path")?,
        file_name: row.get("file_name")?,
        kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Photo),
        file_size: row.get("file_size")?,
        file_mtime: row.get("file_mtime")?,
        fingerprint: row.get("fingerprint")?,
        width: row.get("width")?,
        height: row.get("height")?,
        date_shot: row.get("date_shot")?,
        exif: MediaExif {
            camera_make: row.get("camera_make")?,
            camera_model: row.get("camera_model")?,
            lens_model: row.get("lens_model")?,
            exposure_time: row.get("exposure_time")?,
            aperture: row.get("aperture")?,
            iso: row.get("iso")?,
            focal_length: row.get("focal_length")?,
            flash: row.get("flash")?,
            orientation: row.get("orientation")?,
            gps_latitude: row.get("gps_latitude")?,
            gps_longitude: row.get("gps_longitude")?,
        },
        place_name: row.get("place_name")?,
        duration_secs: row.get("duration_secs")?,
        video_codec: row.get("video_codec")?,
        date_imported: row.get("date_imported")?,
    })
}

/// The persisted state of one media file the reconciler compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSnapshot {
    pub media_id: i64,
    pub album_id: i64,
    pub file_path: String,
    pub kind: MediaKind,
    pub file_size: i64,
    pub file_mtime: i64,
    pub fingerprint: String,
}

impl Database {
    /// 根据 ID 获取媒体
    pub fn get_media(&self, media_id: i64) -> AppResult<Option<Media>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM media WHERE media_id = ?1",
            params![media_id],
            row_to_media,
        );

        match result {
            Ok(media) => Ok(Some(media)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// 根据文件路径获取媒体
    pub fn get_media_by_path(&self, root_id: i64, file_path: &str) -> AppResult<Option<Media>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT m.* FROM media m JOIN albums a ON a.album_id = m.album_id
             WHERE a.root_id = ?1 AND m.file_path = ?2",
            params![root_id, file_path],
            row_to_media,
        );

        match result {
            Ok(media) => Ok(Some(media)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// 获取相册内的媒体（按拍摄时间排序）
    pub fn media_in_album(&self, album_id: i64) -> AppResult<Vec<Media>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM media WHERE album_id = ?1 ORDER BY date_shot, file_name",
        )?;
        let media = stmt
            .query_map(params![album_id], row_to_media)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(media)
    }

    /// 共享同一指纹的媒体
    pub fn media_with_fingerprint(&self, fingerprint: &str) -> AppResult<Vec<Media>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT * FROM media WHERE fingerprint = ?1 ORDER BY media_id")?;
        let media = stmt
            .query_map(params![fingerprint], row_to_media)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(media)
    }

    /// 根目录下媒体总数
    pub fn count_media_for_root(&self, root_id: i64) -> AppResult<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM media m JOIN albums a ON a.album_id = m.album_id WHERE a.root_id = ?1",
            params![root_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Load every media row of a root in one query.
    pub fn load_media_snapshot(&self, root_id: i64) -> AppResult<Vec<MediaSnapshot>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT m.media_id, m.album_id, m.file_path, m.kind, m.file_size, m.file_mtime, m.fingerprint
             FROM media m JOIN albums a ON a.album_id = m.album_id
             WHERE a.root_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![root_id], |row| {
                let kind: String = row.get(3)?;
                Ok(MediaSnapshot {
                    media_id: row.get(0)?,
                    album_id: row.get(1)?,
                    file_path: row.get(2)?,
                    kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Photo),
                    file_size: row.get(4)?,
                    file_mtime: row.get(5)?,
                    fingerprint: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 获取媒体的人脸区域
    pub fn faces_for_media(&self, media_id: i64) -> AppResult<Vec<FaceRegion>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT x, y, width, height, confidence FROM media_faces WHERE media_id = ?1 ORDER BY face_id",
        )?;
        let faces = stmt
            .query_map(params![media_id], |row| {
                Ok(FaceRegion {
                    x: row.get(0)?,
                    y: row.get(1)?,
                    width: row.get(2)?,
                    height: row.get(3)?,
                    confidence: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(faces)
    }
}

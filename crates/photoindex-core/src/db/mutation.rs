//! 索引变更与事务提交
//!
//! The reconciler never writes through the DAOs directly. It builds a list of
//! [`Mutation`]s for one album and hands them to [`Database::apply`], which
//! runs them in a single transaction: either the whole album lands or none
//! of it does.

use rusqlite::{params, Connection};

use crate::models::{now_rfc3339, Derivative, FaceRegion, NewMedia};
use crate::utils::error::{AppError, AppResult};

use super::album_dao::album_id_for_path;
use super::connection::Database;

/// One graph change. Albums are addressed by `(root_id, path)` so a batch can
/// create an album and its media before any id is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateAlbum {
        root_id: i64,
        path: String,
        title: String,
        parent_path: Option<String>,
    },
    UpdateAlbumTitle {
        album_id: i64,
        title: String,
    },
    /// Child albums, media, faces and share tokens go with it.
    DeleteAlbum {
        album_id: i64,
    },
    CreateMedia {
        root_id: i64,
        album_path: String,
        media: NewMedia,
        faces: Option<Vec<FaceRegion>>,
    },
    UpdateMedia {
        media_id: i64,
        media: NewMedia,
        faces: Option<Vec<FaceRegion>>,
    },
    /// Size or mtime moved but the content hash did not.
    UpdateMediaFileState {
        media_id: i64,
        file_size: i64,
        file_mtime: i64,
    },
    DeleteMedia {
        media_id: i64,
    },
    /// Insert-if-absent; a concurrent writer's row wins.
    PutDerivative(Derivative),
}

/// Row counts of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub albums_created: usize,
    pub albums_updated: usize,
    pub albums_deleted: usize,
    pub media_created: usize,
    pub media_updated: usize,
    pub media_deleted: usize,
    pub derivatives_recorded: usize,
    /// Id of the first album created in this batch.
    pub created_album_id: Option<i64>,
}

impl ApplySummary {
    /// Fold the counts of another committed batch into this one.
    pub fn merge(&mut self, other: &ApplySummary) {
        self.albums_created += other.albums_created;
        self.albums_updated += other.albums_updated;
        self.albums_deleted += other.albums_deleted;
        self.media_created += other.media_created;
        self.media_updated += other.media_updated;
        self.media_deleted += other.media_deleted;
        self.derivatives_recorded += other.derivatives_recorded;
        self.created_album_id = self.created_album_id.or(other.created_album_id);
    }
}

impl Database {
    /// 在单个事务中提交一组变更
    pub fn apply(&self, mutations: &[Mutation]) -> AppResult<ApplySummary> {
        if mutations.is_empty() {
            return Ok(ApplySummary::default());
        }

        self.transaction(|conn| {
            let mut summary = ApplySummary::default();
            for mutation in mutations {
                apply_one(conn, mutation, &mut summary)?;
            }
            Ok(summary)
        })
    }

    /// Evict the derivative rows of a fingerprint no media references, and
    /// remove their files while the connection is still held.
    pub fn evict_fingerprint<F>(&self, fingerprint: &str, remove_file: F) -> AppResult<usize>
    where
        F: Fn(&Derivative),
    {
        self.transaction(|conn| {
            let evicted = super::derivative_dao::evict_unreferenced(conn, fingerprint)?;
            for derivative in &evicted {
                remove_file(derivative);
            }
            Ok(evicted.len())
        })
    }
}

fn apply_one(conn: &Connection, mutation: &Mutation, summary: &mut ApplySummary) -> AppResult<()> {
    match mutation {
        Mutation::CreateAlbum {
            root_id,
            path,
            title,
            parent_path,
        } => {
            let parent_id = match parent_path {
                Some(parent) => Some(album_id_for_path(conn, *root_id, parent)?.ok_or_else(
                    || AppError::Transaction(format!("parent album {} is not indexed", parent)),
                )?),
                None => None,
            };
            conn.execute(
                "INSERT INTO albums (root_id, parent_album_id, title, path, date_created)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![root_id, parent_id, title, path, now_rfc3339()],
            )?;
            summary.albums_created += 1;
            summary
                .created_album_id
                .get_or_insert(conn.last_insert_rowid());
        }
        Mutation::UpdateAlbumTitle { album_id, title } => {
            let rows = conn.execute(
                "UPDATE albums SET title = ?1 WHERE album_id = ?2",
                params![title, album_id],
            )?;
            summary.albums_updated += rows;
        }
        Mutation::DeleteAlbum { album_id } => {
            let rows = conn.execute("DELETE FROM albums WHERE album_id = ?1", params![album_id])?;
            summary.albums_deleted += rows;
        }
        Mutation::CreateMedia {
            root_id,
            album_path,
            media,
            faces,
        } => {
            let album_id = album_id_for_path(conn, *root_id, album_path)?.ok_or_else(|| {
                AppError::Transaction(format!("album {} is not indexed", album_path))
            })?;
            conn.execute(
                "INSERT INTO media (
                    album_id, file_path, file_name, kind, file_size, file_mtime, fingerprint,
                    width, height, date_shot, camera_make, camera_model, lens_model,
                    exposure_time, aperture, iso, focal_length, flash, orientation,
                    gps_latitude, gps_longitude, place_name, duration_secs, video_codec,
                    date_imported
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                params![
                    album_id,
                    media.file_path,
                    media.file_name,
                    media.kind.as_str(),
                    media.file_size,
                    media.file_mtime,
                    media.fingerprint,
                    media.width,
                    media.height,
                    media.date_shot,
                    media.exif.camera_make,
                    media.exif.camera_model,
                    media.exif.lens_model,
                    media.exif.exposure_time,
                    media.exif.aperture,
                    media.exif.iso,
                    media.exif.focal_length,
                    media.exif.flash,
                    media.exif.orientation,
                    media.exif.gps_latitude,
                    media.exif.gps_longitude,
                    media.place_name,
                    media.duration_secs,
                    media.video_codec,
                    now_rfc3339(),
                ],
            )?;
            let media_id = conn.last_insert_rowid();
            if let Some(faces) = faces {
                replace_faces(conn, media_id, faces)?;
            }
            summary.media_created += 1;
        }
        Mutation::UpdateMedia {
            media_id,
            media,
            faces,
        } => {
            let rows = conn.execute(
                "UPDATE media SET
                    file_name = ?1, kind = ?2, file_size = ?3, file_mtime = ?4, fingerprint = ?5,
                    width = ?6, height = ?7, date_shot = ?8, camera_make = ?9, camera_model = ?10,
                    lens_model = ?11, exposure_time = ?12, aperture = ?13, iso = ?14,
                    focal_length = ?15, flash = ?16, orientation = ?17, gps_latitude = ?18,
                    gps_longitude = ?19, place_name = ?20, duration_secs = ?21, video_codec = ?22
                 WHERE media_id = ?23",
                params![
                    media.file_name,
                    media.kind.as_str(),
                    media.file_size,
                    media.file_mtime,
                    media.fingerprint,
                    media.width,
                    media.height,
                    media.date_shot,
                    media.exif.camera_make,
                    media.exif.camera_model,
                    media.exif.lens_model,
                    media.exif.exposure_time,
                    media.exif.aperture,
                    media.exif.iso,
                    media.exif.focal_length,
                    media.exif.flash,
                    media.exif.orientation,
                    media.exif.gps_latitude,
                    media.exif.gps_longitude,
                    media.place_name,
                    media.duration_secs,
                    media.video_codec,
                    media_id,
                ],
            )?;
            if rows > 0 {
                if let Some(faces) = faces {
                    replace_faces(conn, *media_id, faces)?;
                }
            }
            summary.media_updated += rows;
        }
        Mutation::UpdateMediaFileState {
            media_id,
            file_size,
            file_mtime,
        } => {
            let rows = conn.execute(
                "UPDATE media SET file_size = ?1, file_mtime = ?2 WHERE media_id = ?3",
                params![file_size, file_mtime, media_id],
            )?;
            summary.media_updated += rows;
        }
        Mutation::DeleteMedia { media_id } => {
            let rows = conn.execute("DELETE FROM media WHERE media_id = ?1", params![media_id])?;
            summary.media_deleted += rows;
        }
        Mutation::PutDerivative(derivative) => {
            let rows = conn.execute(
                "INSERT OR IGNORE INTO derivatives
                    (fingerprint, variant, width, height, byte_size, location, content_type, date_created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    derivative.fingerprint,
                    derivative.variant,
                    derivative.width,
                    derivative.height,
                    derivative.byte_size as i64,
                    derivative.location,
                    derivative.content_type,
                    now_rfc3339(),
                ],
            )?;
            summary.derivatives_recorded += rows;
        }
    }
    Ok(())
}

fn replace_faces(conn: &Connection, media_id: i64, faces: &[FaceRegion]) -> AppResult<()> {
    conn.execute("DELETE FROM media_faces WHERE media_id = ?1", params![media_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO media_faces (media_id, x, y, width, height, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for face in faces {
        stmt.execute(params![
            media_id,
            face.x,
            face.y,
            face.width,
            face.height,
            face.confidence
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaExif, MediaKind, ShareTarget};

    fn setup_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let root = db.create_root("alice", "/photos").unwrap();
        (db, root.root_id)
    }

    fn new_media(path: &str, fingerprint: &str) -> NewMedia {
        NewMedia {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            kind: MediaKind::Photo,
            file_size: 10,
            file_mtime: 1,
            fingerprint: fingerprint.to_string(),
            width: Some(4),
            height: Some(3),
            date_shot: "2020-01-01T00:00:00Z".to_string(),
            exif: MediaExif::default(),
            place_name: None,
            duration_secs: None,
            video_codec: None,
        }
    }

    fn create_album(root_id: i64, path: &str, parent: Option<&str>) -> Mutation {
        Mutation::CreateAlbum {
            root_id,
            path: path.to_string(),
            title: path.rsplit('/').next().unwrap_or(path).to_string(),
            parent_path: parent.map(String::from),
        }
    }

    #[test]
    fn test_album_and_media_in_one_batch() {
        let (db, root_id) = setup_db();

        let summary = db
            .apply(&[
                create_album(root_id, "/photos", None),
                create_album(root_id, "/photos/2020", Some("/photos")),
                Mutation::CreateMedia {
                    root_id,
                    album_path: "/photos/2020".into(),
                    media: new_media("/photos/2020/a.jpg", "fp-a"),
                    faces: Some(vec![FaceRegion {
                        x: 1,
                        y: 1,
                        width: 2,
                        height: 2,
                        confidence: 0.9,
                    }]),
                },
            ])
            .unwrap();

        assert_eq!(summary.albums_created, 2);
        assert_eq!(summary.media_created, 1);

        let album = db.get_album_by_path(root_id, "/photos/2020").unwrap().unwrap();
        let top = db.top_album(root_id).unwrap().unwrap();
        assert_eq!(album.parent_album_id, Some(top.album_id));

        let media = db.media_in_album(album.album_id).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(db.faces_for_media(media[0].media_id).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_batch_leaves_nothing_behind() {
        let (db, root_id) = setup_db();

        let result = db.apply(&[
            create_album(root_id, "/photos", None),
            Mutation::CreateMedia {
                root_id,
                album_path: "/photos/missing".into(),
                media: new_media("/photos/missing/a.jpg", "fp-a"),
                faces: None,
            },
        ]);

        assert!(matches!(result, Err(AppError::Transaction(_))));
        assert!(db.top_album(root_id).unwrap().is_none());
    }

    #[test]
    fn test_delete_album_cascades_to_descendants_and_tokens() {
        let (db, root_id) = setup_db();
        db.apply(&[
            create_album(root_id, "/photos", None),
            create_album(root_id, "/photos/a", Some("/photos")),
            create_album(root_id, "/photos/a/b", Some("/photos/a")),
            Mutation::CreateMedia {
                root_id,
                album_path: "/photos/a/b".into(),
                media: new_media("/photos/a/b/x.jpg", "fp-x"),
                faces: None,
            },
        ])
        .unwrap();

        let a = db.get_album_by_path(root_id, "/photos/a").unwrap().unwrap();
        let x = db
            .get_media_by_path(root_id, "/photos/a/b/x.jpg")
            .unwrap()
            .unwrap();
        let token = db
            .create_share_token("alice", ShareTarget::Media(x.media_id), None, None)
            .unwrap();

        let summary = db
            .apply(&[Mutation::DeleteAlbum {
                album_id: a.album_id,
            }])
            .unwrap();
        assert_eq!(summary.albums_deleted, 1);

        assert!(db.get_album_by_path(root_id, "/photos/a/b").unwrap().is_none());
        assert!(db.get_media(x.media_id).unwrap().is_none());
        assert!(db.resolve_share_token(&token.token).unwrap().is_none());
        assert!(db.top_album(root_id).unwrap().is_some());
    }

    #[test]
    fn test_put_derivative_first_writer_wins() {
        let (db, _) = setup_db();
        let first = Derivative {
            fingerprint: "fp".into(),
            variant: "thumbnail".into(),
            width: 10,
            height: 5,
            byte_size: 100,
            location: "/cache/fp/thumbnail.webp".into(),
            content_type: "image/webp".into(),
        };
        let second = Derivative {
            byte_size: 999,
            ..first.clone()
        };

        let s1 = db.apply(&[Mutation::PutDerivative(first.clone())]).unwrap();
        let s2 = db.apply(&[Mutation::PutDerivative(second)]).unwrap();
        assert_eq!(s1.derivatives_recorded, 1);
        assert_eq!(s2.derivatives_recorded, 0);
        assert_eq!(db.get_derivative("fp", "thumbnail").unwrap(), Some(first));
    }

    #[test]
    fn test_evict_only_unreferenced_fingerprints() {
        let (db, root_id) = setup_db();
        db.apply(&[
            create_album(root_id, "/photos", None),
            Mutation::CreateMedia {
                root_id,
                album_path: "/photos".into(),
                media: new_media("/photos/a.jpg", "shared"),
                faces: None,
            },
            Mutation::PutDerivative(Derivative {
                fingerprint: "shared".into(),
                variant: "thumbnail".into(),
                width: 1,
                height: 1,
                byte_size: 1,
                location: "x".into(),
                content_type: "image/webp".into(),
            }),
        ])
        .unwrap();

        let removed = std::sync::Mutex::new(Vec::new());
        let evicted = db
            .evict_fingerprint("shared", |d| removed.lock().unwrap().push(d.location.clone()))
            .unwrap();
        assert_eq!(evicted, 0);

        let media = db.get_media_by_path(root_id, "/photos/a.jpg").unwrap().unwrap();
        db.apply(&[Mutation::DeleteMedia {
            media_id: media.media_id,
        }])
        .unwrap();
        assert_eq!(db.unreferenced_fingerprints().unwrap(), vec!["shared".to_string()]);

        let evicted = db
            .evict_fingerprint("shared", |d| removed.lock().unwrap().push(d.location.clone()))
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(removed.lock().unwrap().as_slice(), &["x".to_string()]);
        assert!(db.get_derivative("shared", "thumbnail").unwrap().is_none());
    }
}

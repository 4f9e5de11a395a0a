//! 数据库 Schema 定义
//!
//! 包含所有表的 CREATE 语句和迁移脚本

/// 数据库版本
pub const SCHEMA_VERSION: i32 = 3;

/// 初始化 Schema SQL
pub const INIT_SCHEMA: &str = r#"
-- 扫描根目录
CREATE TABLE IF NOT EXISTS roots (
    root_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        TEXT NOT NULL,
    root_path       TEXT NOT NULL,
    date_added      TEXT NOT NULL,
    UNIQUE(owner_id, root_path)
);

-- 相册表（目录）
CREATE TABLE IF NOT EXISTS albums (
    album_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    root_id         INTEGER NOT NULL REFERENCES roots(root_id) ON DELETE CASCADE,
    parent_album_id INTEGER REFERENCES albums(album_id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    path            TEXT NOT NULL,
    date_created    TEXT NOT NULL,
    UNIQUE(root_id, path)
);

-- 媒体表
CREATE TABLE IF NOT EXISTS media (
    media_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id        INTEGER NOT NULL REFERENCES albums(album_id) ON DELETE CASCADE,
    file_path       TEXT NOT NULL,
    file_name       TEXT NOT NULL,
    kind            TEXT NOT NULL CHECK(kind IN ('photo', 'video')),
    file_size       INTEGER NOT NULL,
    file_mtime      INTEGER NOT NULL,
    fingerprint     TEXT NOT NULL,
    width           INTEGER,
    height          INTEGER,
    date_shot       TEXT NOT NULL,
    camera_make     TEXT,
    camera_model    TEXT,
    lens_model      TEXT,
    exposure_time   REAL,
    aperture        REAL,
    iso             INTEGER,
    focal_length    REAL,
    flash           INTEGER,
    orientation     INTEGER,
    gps_latitude    REAL,
    gps_longitude   REAL,
    place_name      TEXT,
    duration_secs   REAL,
    video_codec     TEXT,
    date_imported   TEXT NOT NULL,
    UNIQUE(album_id, file_path)
);

-- 衍生图表（按内容指纹寻址，不引用 media）
CREATE TABLE IF NOT EXISTS derivatives (
    fingerprint     TEXT NOT NULL,
    variant         TEXT NOT NULL,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    byte_size       INTEGER NOT NULL,
    location        TEXT NOT NULL,
    content_type    TEXT NOT NULL,
    date_created    TEXT NOT NULL,
    PRIMARY KEY (fingerprint, variant)
);

-- 人脸区域
CREATE TABLE IF NOT EXISTS media_faces (
    face_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id        INTEGER NOT NULL REFERENCES media(media_id) ON DELETE CASCADE,
    x               INTEGER NOT NULL,
    y               INTEGER NOT NULL,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    confidence      REAL NOT NULL
);

-- 分享令牌（目标删除时级联删除）
CREATE TABLE IF NOT EXISTS share_tokens (
    token_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    token           TEXT NOT NULL UNIQUE,
    owner_id        TEXT NOT NULL,
    album_id        INTEGER REFERENCES albums(album_id) ON DELETE CASCADE,
    media_id        INTEGER REFERENCES media(media_id) ON DELETE CASCADE,
    password_hash   TEXT,
    expires_at      TEXT,
    date_created    TEXT NOT NULL,
    CHECK ((album_id IS NULL) != (media_id IS NULL))
);

-- 扫描历史
CREATE TABLE IF NOT EXISTS scan_history (
    scan_id         TEXT PRIMARY KEY,
    root_id         INTEGER NOT NULL REFERENCES roots(root_id) ON DELETE CASCADE,
    root_path       TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    finished_at     TEXT NOT NULL,
    outcome         TEXT NOT NULL,
    abort_reason    TEXT,
    counts_json     TEXT NOT NULL,
    failures_json   TEXT NOT NULL
);

-- 版本表
CREATE TABLE IF NOT EXISTS schema_version (
    version         INTEGER PRIMARY KEY,
    applied_at      TEXT NOT NULL
);

-- 索引
CREATE INDEX IF NOT EXISTS idx_albums_root ON albums(root_id);
CREATE INDEX IF NOT EXISTS idx_albums_parent ON albums(parent_album_id);
CREATE INDEX IF NOT EXISTS idx_media_album ON media(album_id);
CREATE INDEX IF NOT EXISTS idx_media_fingerprint ON media(fingerprint);
CREATE INDEX IF NOT EXISTS idx_media_date_shot ON media(date_shot);
CREATE INDEX IF NOT EXISTS idx_faces_media ON media_faces(media_id);
CREATE INDEX IF NOT EXISTS idx_share_album ON share_tokens(album_id);
CREATE INDEX IF NOT EXISTS idx_share_media ON share_tokens(media_id);
CREATE INDEX IF NOT EXISTS idx_scan_history_root ON scan_history(root_id, finished_at);
"#;

/// 迁移脚本
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// 所有迁移脚本列表
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "Add date_shot index for timeline queries",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_media_date_shot ON media(date_shot);
        "#,
    },
    Migration {
        version: 3,
        description: "Add video stream columns",
        sql: r#"
            ALTER TABLE media ADD COLUMN duration_secs REAL;
            ALTER TABLE media ADD COLUMN video_codec TEXT;
        "#,
    },
];

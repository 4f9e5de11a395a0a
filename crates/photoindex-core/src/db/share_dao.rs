//! 分享令牌数据访问层
//!
//! Tokens reference their album or media row with `ON DELETE CASCADE`, so a
//! token whose target was removed by a scan disappears with it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use rusqlite::{params, Row};

use crate::models::{now_rfc3339, ShareTarget, ShareToken};
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

const TOKEN_BYTES: usize = 24;

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn row_to_share_token(row: &Row<'_>) -> rusqlite::Result<ShareToken> {
    let album_id: Option<i64> = row.get("album_id")?;
    let media_id: Option<i64> = row.get("media_id")?;
    let target = match (album_id, media_id) {
        (Some(id), _) => ShareTarget::Album(id),
        (None, Some(id)) => ShareTarget::Media(id),
        (None, None) => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                "album_id".to_string(),
                rusqlite::types::Type::Null,
            ))
        }
    };
    Ok(ShareToken {
        token_id: row.get("token_id")?,
        token: row.get("token")?,
        owner_id: row.get("owner_id")?,
        target,
        password_hash: row.get("password_hash")?,
        expires_at: row.get("expires_at")?,
        date_created: row.get("date_created")?,
    })
}

impl Database {
    /// 创建分享令牌
    ///
    /// `password_hash` is stored as given; hashing belongs to the caller.
    pub fn create_share_token(
        &self,
        owner_id: &str,
        target: ShareTarget,
        password_hash: Option<&str>,
        expires_at: Option<&str>,
    ) -> AppResult<ShareToken> {
        if let Some(expires) = expires_at {
            chrono::DateTime::parse_from_rfc3339(expires)
                .map_err(|e| AppError::Config(format!("invalid expiry {}: {}", expires, e)))?;
        }

        let conn = self.connection()?;
        let (album_id, media_id) = match target {
            ShareTarget::Album(id) => (Some(id), None),
            ShareTarget::Media(id) => (None, Some(id)),
        };
        let token = generate_token();
        let now = now_rfc3339();

        conn.execute(
            "INSERT INTO share_tokens (token, owner_id, album_id, media_id, password_hash, expires_at, date_created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![token, owner_id, album_id, media_id, password_hash, expires_at, now],
        )?;

        Ok(ShareToken {
            token_id: conn.last_insert_rowid(),
            token,
            owner_id: owner_id.to_string(),
            target,
            password_hash: password_hash.map(String::from),
            expires_at: expires_at.map(String::from),
            date_created: now,
        })
    }

    /// 解析分享令牌
    ///
    /// `None` for unknown, expired, or orphaned tokens.
    pub fn resolve_share_token(&self, token: &str) -> AppResult<Option<ShareToken>> {
        let conn = self.connection()?;

        let result = conn.query_row(
            "SELECT * FROM share_tokens WHERE token = ?1",
            params![token],
            row_to_share_token,
        );

        match result {
            Ok(share) if share.is_expired_at(chrono::Utc::now()) => Ok(None),
            Ok(share) => Ok(Some(share)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub fn share_tokens_for_owner(&self, owner_id: &str) -> AppResult<Vec<ShareToken>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT * FROM share_tokens WHERE owner_id = ?1 ORDER BY token_id")?;
        let tokens = stmt
            .query_map(params![owner_id], row_to_share_token)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    pub fn delete_share_token(&self, token: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let rows = conn.execute("DELETE FROM share_tokens WHERE token = ?1", params![token])?;
        Ok(rows > 0)
    }
}

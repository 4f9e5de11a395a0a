//! 分享令牌数据模型

use serde::{Deserialize, Serialize};

/// What a share token points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum ShareTarget {
    Album(i64),
    Media(i64),
}

/// 分享令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareToken {
    pub token_id: i64,
    /// URL 安全的随机值
    pub token: String,
    pub owner_id: String,
    pub target: ShareTarget,
    /// 密码哈希（可选）
    pub password_hash: Option<String>,
    /// 过期时间（可选，RFC 3339）
    pub expires_at: Option<String>,
    pub date_created: String,
}

impl ShareToken {
    pub fn is_expired_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match &self.expires_at {
            Some(expires) => chrono::DateTime::parse_from_rfc3339(expires)
                .map(|t| t.with_timezone(&chrono::Utc) <= now)
                .unwrap_or(true),
            None => false,
        }
    }
}

//! 相册数据模型

use serde::{Deserialize, Serialize};

/// One directory of a root that was reached by the walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    /// 相册ID
    pub album_id: i64,
    /// 所属根目录
    pub root_id: i64,
    /// 父相册（根相册为 None）
    pub parent_album_id: Option<i64>,
    /// 标题（目录名）
    pub title: String,
    /// 目录绝对路径
    pub path: String,
    /// 创建时间
    pub date_created: String,
}

//! 扫描根目录数据模型

use serde::{Deserialize, Serialize};

/// A registered directory tree belonging to one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// 根目录ID
    pub root_id: i64,
    /// 所有者
    pub owner_id: String,
    /// 绝对路径
    pub path: String,
    /// 添加时间
    pub date_added: String,
}

/// Root declared in settings; registered at startup if not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    pub owner_id: String,
    pub path: String,
}

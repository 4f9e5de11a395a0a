//! 数据模型

pub mod album;
pub mod derivative;
pub mod media;
pub mod root;
pub mod scan;
pub mod settings;
pub mod share;

pub use album::*;
pub use derivative::*;
pub use media::*;
pub use root::*;
pub use scan::*;
pub use settings::*;
pub use share::*;

/// 当前 UTC 时间（RFC 3339）
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

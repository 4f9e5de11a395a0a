//! 媒体数据模型

use serde::{Deserialize, Serialize};

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Camera metadata read from EXIF. Every field is optional; a file without
/// EXIF simply yields the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaExif {
    /// 相机厂商
    pub camera_make: Option<String>,
    /// 相机型号
    pub camera_model: Option<String>,
    /// 镜头型号
    pub lens_model: Option<String>,
    /// 曝光时间（秒）
    pub exposure_time: Option<f64>,
    /// 光圈
    pub aperture: Option<f64>,
    /// ISO
    pub iso: Option<i32>,
    /// 焦距
    pub focal_length: Option<f64>,
    /// 闪光灯
    pub flash: Option<i32>,
    /// 方向 (1-8)
    pub orientation: Option<i32>,
    /// GPS 纬度
    pub gps_latitude: Option<f64>,
    /// GPS 经度
    pub gps_longitude: Option<f64>,
}

impl MediaExif {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.gps_latitude, self.gps_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// An indexed file inside an album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    /// 媒体ID
    pub media_id: i64,
    /// 所属相册
    pub album_id: i64,
    /// 文件绝对路径
    pub file_path: String,
    /// 文件名
    pub file_name: String,
    pub kind: MediaKind,
    /// 文件大小（字节）
    pub file_size: i64,
    /// 修改时间（纳秒）
    pub file_mtime: i64,
    /// 内容指纹
    pub fingerprint: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// 拍摄时间
    pub date_shot: String,
    pub exif: MediaExif,
    /// 反向地理编码地名
    pub place_name: Option<String>,
    /// 视频时长（秒）
    pub duration_secs: Option<f64>,
    /// 视频编码
    pub video_codec: Option<String>,
    /// 入库时间
    pub date_imported: String,
}

/// Values written when a media record is created or refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedia {
    pub file_path: String,
    pub file_name: String,
    pub kind: MediaKind,
    pub file_size: i64,
    pub file_mtime: i64,
    pub fingerprint: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub date_shot: String,
    pub exif: MediaExif,
    pub place_name: Option<String>,
    pub duration_secs: Option<f64>,
    pub video_codec: Option<String>,
}

/// A face region reported by the face detection capability, in pixel
/// coordinates of the oriented image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

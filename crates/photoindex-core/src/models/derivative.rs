//! 衍生图数据模型

use serde::{Deserialize, Serialize};

/// 衍生图编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantFormat {
    Jpeg,
    Webp,
    Png,
}

impl VariantFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "jpg",
            VariantFormat::Webp => "webp",
            VariantFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "image/jpeg",
            VariantFormat::Webp => "image/webp",
            VariantFormat::Png => "image/png",
        }
    }
}

/// A named rendition the pipeline produces for every photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpec {
    /// 变体名（thumbnail / large ...）
    pub name: String,
    /// 最长边上限（像素）
    pub max_dimension: u32,
    pub format: VariantFormat,
}

impl VariantSpec {
    pub fn new(name: impl Into<String>, max_dimension: u32, format: VariantFormat) -> Self {
        Self {
            name: name.into(),
            max_dimension,
            format,
        }
    }

    /// Grid thumbnail plus a high resolution viewer image.
    pub fn defaults() -> Vec<VariantSpec> {
        vec![
            VariantSpec::new("thumbnail", 400, VariantFormat::Webp),
            VariantSpec::new("large", 1920, VariantFormat::Jpeg),
        ]
    }
}

/// A stored rendition. Keyed by content fingerprint, never by media id, so
/// byte-identical files share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivative {
    pub fingerprint: String,
    pub variant: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// 缓存文件路径
    pub location: String,
    pub content_type: String,
}

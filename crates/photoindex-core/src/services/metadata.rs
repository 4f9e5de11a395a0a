//! 元数据提取服务
//!
//! Reads dimensions, capture time and camera fields. Missing or malformed
//! EXIF never fails extraction; only a file that is not the media it claims
//! to be does.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use regex::Regex;

use crate::models::{MediaExif, MediaKind};
use crate::utils::error::{AppError, AppResult};

use super::walker::is_raw_file;

const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// MPEG transport stream packet length.
const TS_PACKET: usize = 188;

/// 提取结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Capture time; falls back to the filename, then the file mtime.
    pub date_shot: String,
    pub exif: MediaExif,
}

/// 元数据提取器
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn extract(path: &Path, kind: MediaKind, modified_ns: i64) -> AppResult<ExtractedMetadata> {
        match kind {
            MediaKind::Photo => Self::extract_photo(path, modified_ns),
            MediaKind::Video => Self::extract_video(path, modified_ns),
        }
    }

    fn extract_photo(path: &Path, modified_ns: i64) -> AppResult<ExtractedMetadata> {
        let exif = Self::read_exif(path);
        let mut metadata = ExtractedMetadata::default();
        let mut exif_date = None;

        if let Some(exif) = &exif {
            let (fields, width, height, date) = Self::parse_exif(exif);
            metadata.exif = fields;
            metadata.width = width;
            metadata.height = height;
            exif_date = date;
        }

        // RAW containers are TIFF-like and only trusted through their EXIF.
        if is_raw_file(path) {
            if exif.is_none() {
                return Err(AppError::extraction(path, "RAW file without readable metadata"));
            }
        } else {
            match image::ImageReader::open(path)
                .and_then(|r| r.with_guessed_format())
                .map_err(image::ImageError::IoError)
                .and_then(|r| r.into_dimensions())
            {
                Ok((w, h)) => {
                    metadata.width = Some(w);
                    metadata.height = Some(h);
                }
                // HEIF and other formats the decoder lacks pass on EXIF or magic.
                Err(image::ImageError::Unsupported(_))
                    if exif.is_some() || Self::has_heif_magic(path) => {}
                Err(e) => return Err(AppError::extraction(path, e)),
            }
        }

        metadata.date_shot = exif_date
            .or_else(|| Self::date_from_path(path))
            .unwrap_or_else(|| Self::date_from_mtime(modified_ns));

        Ok(metadata)
    }

    fn extract_video(path: &Path, modified_ns: i64) -> AppResult<ExtractedMetadata> {
        let mut header = Vec::with_capacity(TS_PACKET + 4);
        File::open(path)
            .and_then(|f| f.take((TS_PACKET + 4) as u64).read_to_end(&mut header))
            .map_err(|e| AppError::filesystem(path, e))?;

        if !Self::is_video_container(&header) {
            return Err(AppError::extraction(path, "unrecognized video container"));
        }

        Ok(ExtractedMetadata {
            date_shot: Self::date_from_path(path)
                .unwrap_or_else(|| Self::date_from_mtime(modified_ns)),
            ..Default::default()
        })
    }

    fn read_exif(path: &Path) -> Option<exif::Exif> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        Reader::new().read_from_container(&mut reader).ok()
    }

    /// Known container signatures: ISO BMFF, Matroska/WebM, AVI, MPEG-TS,
    /// MPEG-PS, ASF and FLV.
    pub fn is_video_container(header: &[u8]) -> bool {
        if header.len() >= 8 && &header[4..8] == b"ftyp" {
            return true;
        }
        if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"AVI " {
            return true;
        }
        header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
            || header.starts_with(&[0x00, 0x00, 0x01, 0xBA])
            || header.starts_with(&[0x30, 0x26, 0xB2, 0x75])
            || header.starts_with(b"FLV")
            || (header.len() > TS_PACKET && header[0] == 0x47 && header[TS_PACKET] == 0x47)
    }

    fn has_heif_magic(path: &Path) -> bool {
        let mut header = [0u8; 12];
        match File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
            Ok(()) => &header[4..8] == b"ftyp",
            Err(_) => false,
        }
    }

    /// 从 EXIF 数据解析元数据
    fn parse_exif(exif: &exif::Exif) -> (MediaExif, Option<u32>, Option<u32>, Option<String>) {
        let field = |tag: Tag| exif.get_field(tag, In::PRIMARY).map(|f| &f.value);

        let mut fields = MediaExif {
            camera_make: field(Tag::Make).and_then(Self::get_ascii_value),
            camera_model: field(Tag::Model).and_then(Self::get_ascii_value),
            lens_model: field(Tag::LensModel).and_then(Self::get_ascii_value),
            exposure_time: field(Tag::ExposureTime).and_then(Self::get_rational_value),
            aperture: field(Tag::FNumber).and_then(Self::get_rational_value),
            iso: field(Tag::PhotographicSensitivity)
                .and_then(Self::get_u32_value)
                .map(|v| v as i32),
            focal_length: field(Tag::FocalLength).and_then(Self::get_rational_value),
            flash: field(Tag::Flash).and_then(Self::get_u32_value).map(|v| v as i32),
            orientation: field(Tag::Orientation)
                .and_then(Self::get_u32_value)
                .map(|v| v as i32)
                .filter(|o| (1..=8).contains(o)),
            gps_latitude: Self::get_gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
            gps_longitude: Self::get_gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
        };

        // (0, 0) is what many cameras write when there was no fix
        if let (Some(lat), Some(lon)) = (fields.gps_latitude, fields.gps_longitude) {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) || (lat == 0.0 && lon == 0.0) {
                fields.gps_latitude = None;
                fields.gps_longitude = None;
            }
        }

        let width = field(Tag::PixelXDimension)
            .or_else(|| field(Tag::ImageWidth))
            .and_then(Self::get_u32_value);
        let height = field(Tag::PixelYDimension)
            .or_else(|| field(Tag::ImageLength))
            .and_then(Self::get_u32_value);

        let date = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
            .into_iter()
            .filter_map(|tag| field(tag).and_then(Self::get_ascii_value))
            .find_map(|s| Self::parse_exif_datetime(&s));

        (fields, width, height, date)
    }

    fn get_u32_value(value: &Value) -> Option<u32> {
        match value {
            Value::Short(v) if !v.is_empty() => Some(v[0] as u32),
            Value::Long(v) if !v.is_empty() => Some(v[0]),
            _ => None,
        }
    }

    fn get_rational_value(value: &Value) -> Option<f64> {
        match value {
            Value::Rational(v) if !v.is_empty() && v[0].denom != 0 => {
                Some(v[0].num as f64 / v[0].denom as f64)
            }
            _ => None,
        }
    }

    fn get_ascii_value(value: &Value) -> Option<String> {
        match value {
            Value::Ascii(parts) => parts
                .first()
                .map(|bytes| String::from_utf8_lossy(bytes).trim_matches(char::from(0)).trim().to_string())
                .filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    fn get_gps_coordinate(exif: &exif::Exif, coord_tag: Tag, ref_tag: Tag) -> Option<f64> {
        let coord_field = exif.get_field(coord_tag, In::PRIMARY)?;
        let ref_field = exif.get_field(ref_tag, In::PRIMARY)?;

        let degrees = match &coord_field.value {
            Value::Rational(v) if v.len() >= 3 && v.iter().take(3).all(|r| r.denom != 0) => {
                let d = v[0].num as f64 / v[0].denom as f64;
                let m = v[1].num as f64 / v[1].denom as f64;
                let s = v[2].num as f64 / v[2].denom as f64;
                d + m / 60.0 + s / 3600.0
            }
            _ => return None,
        };

        let reference = Self::get_ascii_value(&ref_field.value)?;
        let sign = if reference == "S" || reference == "W" { -1.0 } else { 1.0 };

        Some(degrees * sign)
    }

    /// `"2024:01:15 10:30:45"` → `"2024-01-15T10:30:45Z"`
    fn parse_exif_datetime(value: &str) -> Option<String> {
        let value = value.trim().trim_matches('"');
        NaiveDateTime::parse_from_str(value, "%Y:%m:%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .map(|dt| dt.format(OUTPUT_DATE_FORMAT).to_string())
    }

    /// 从文件名解析日期
    ///
    /// Recognizes `2025-12-03 17.00.03`, `2025-12-03 170003`,
    /// `IMG_20251203_170003` and a bare `2025-12-03`.
    pub fn date_from_path(path: &Path) -> Option<String> {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                r"(\d{4})-(\d{2})-(\d{2})[\s_](\d{2})[.:](\d{2})[.:](\d{2})",
                r"(\d{4})-(\d{2})-(\d{2})[\s_](\d{2})(\d{2})(\d{2})",
                r"(\d{4})(\d{2})(\d{2})[_\-](\d{2})(\d{2})(\d{2})",
                r"(\d{4})-(\d{2})-(\d{2})",
            ]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
        });

        let name = path.file_name()?.to_string_lossy();
        for re in patterns {
            if let Some(caps) = re.captures(&name) {
                let part = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("00");
                let candidate = format!(
                    "{}-{}-{} {}:{}:{}",
                    part(1),
                    part(2),
                    part(3),
                    part(4),
                    part(5),
                    part(6)
                );
                if let Ok(dt) = NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%d %H:%M:%S") {
                    return Some(dt.format(OUTPUT_DATE_FORMAT).to_string());
                }
            }
        }
        None
    }

    fn date_from_mtime(modified_ns: i64) -> String {
        DateTime::<Utc>::from_timestamp(modified_ns.div_euclid(1_000_000_000), 0)
            .unwrap_or_default()
            .format(OUTPUT_DATE_FORMAT)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path, w: u32, h: u32) {
        image::RgbImage::from_pixel(w, h, image::Rgb([10, 20, 30]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(
            MetadataExtractor::parse_exif_datetime("2024:01:15 10:30:45"),
            Some("2024-01-15T10:30:45Z".to_string())
        );
        assert_eq!(MetadataExtractor::parse_exif_datetime("0000:00:00 00:00:00"), None);
    }

    #[test]
    fn test_date_from_path() {
        assert_eq!(
            MetadataExtractor::date_from_path(Path::new("/a/IMG_20251203_170003.jpg")),
            Some("2025-12-03T17:00:03Z".to_string())
        );
        assert_eq!(
            MetadataExtractor::date_from_path(Path::new("Screenshot 2025-12-03 17.00.03.png")),
            Some("2025-12-03T17:00:03Z".to_string())
        );
        assert_eq!(
            MetadataExtractor::date_from_path(Path::new("trip 2021-07-04.jpg")),
            Some("2021-07-04T00:00:00Z".to_string())
        );
        assert_eq!(MetadataExtractor::date_from_path(Path::new("a.jpg")), None);
    }

    #[test]
    fn test_photo_without_exif_uses_decoder_and_mtime() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.png");
        write_png(&path, 32, 16);

        let meta = MetadataExtractor::extract(&path, MediaKind::Photo, 1_600_000_000_000_000_000).unwrap();
        assert_eq!(meta.width, Some(32));
        assert_eq!(meta.height, Some(16));
        assert_eq!(meta.exif, MediaExif::default());
        assert_eq!(meta.date_shot, "2020-09-13T12:26:40Z");
    }

    #[test]
    fn test_corrupt_photo_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = MetadataExtractor::extract(&path, MediaKind::Photo, 0).unwrap_err();
        assert_eq!(err.kind(), crate::utils::ErrorKind::Extraction);
    }

    #[test]
    fn test_video_container_sniffing() {
        let temp = TempDir::new().unwrap();
        let mp4 = temp.path().join("clip.mp4");
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(&mp4, &bytes).unwrap();
        let meta = MetadataExtractor::extract(&mp4, MediaKind::Video, 0).unwrap();
        assert_eq!(meta.width, None);

        let fake = temp.path().join("fake.mov");
        fs::write(&fake, b"hello world, plain text").unwrap();
        assert!(MetadataExtractor::extract(&fake, MediaKind::Video, 0).is_err());
    }
}

//! ffprobe / ffmpeg backed video probing
//!
//! Both tools are run as external processes. A host without them keeps the
//! default [`NoVideoProber`](super::capabilities::NoVideoProber).

use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;

use crate::utils::error::{AppError, AppResult};

use super::capabilities::{VideoInfo, VideoProber};

/// Videos shorter than this are sampled at their first frame.
const MIN_SEEK_DURATION: f64 = 2.0;

pub struct FfmpegVideoProber {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegVideoProber {
    pub fn new(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Use `ffprobe` and `ffmpeg` from `PATH` when both answer `-version`.
    pub fn detect() -> Option<Self> {
        let prober = Self::new("ffprobe", "ffmpeg");
        let available = |tool: &Path| {
            Command::new(tool)
                .arg("-version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        };
        if available(&prober.ffprobe) && available(&prober.ffmpeg) {
            Some(prober)
        } else {
            tracing::info!("ffprobe/ffmpeg not found, videos are indexed without derivatives");
            None
        }
    }

    fn path_arg(path: &Path) -> AppResult<&str> {
        path.to_str()
            .ok_or_else(|| AppError::extraction(path, "path is not valid UTF-8"))
    }
}

impl VideoProber for FfmpegVideoProber {
    fn probe(&self, path: &Path) -> AppResult<Option<VideoInfo>> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
                Self::path_arg(path)?,
            ])
            .output()
            .map_err(|e| AppError::extraction(path, format!("ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::extraction(path, "ffprobe failed"));
        }
        Ok(parse_probe_output(&output.stdout))
    }

    fn frame(&self, path: &Path, info: Option<&VideoInfo>) -> AppResult<Option<DynamicImage>> {
        let seek = info
            .and_then(|i| i.duration_secs)
            .filter(|d| *d >= MIN_SEEK_DURATION)
            .map(|d| d / 4.0)
            .unwrap_or(0.0);

        let output = Command::new(&self.ffmpeg)
            .args(["-v", "quiet", "-ss", &format!("{:.3}", seek), "-i"])
            .arg(Self::path_arg(path)?)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()
            .map_err(|e| AppError::derivative(path, format!("ffmpeg: {}", e)))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(AppError::derivative(path, "ffmpeg could not extract a frame"));
        }
        image::load_from_memory(&output.stdout)
            .map(Some)
            .map_err(|e| AppError::derivative(path, e))
    }
}

/// Parse `ffprobe -print_format json` output for the first video stream.
/// Width and height are swapped for streams rotated by a quarter turn.
pub fn parse_probe_output(stdout: &[u8]) -> Option<VideoInfo> {
    let json: serde_json::Value = serde_json::from_slice(stdout).ok()?;
    let stream = json["streams"]
        .as_array()?
        .iter()
        .find(|s| s["codec_type"].as_str().map_or(true, |t| t == "video"))?;

    let dimension = |key: &str| stream[key].as_u64().and_then(|v| u32::try_from(v).ok());
    let mut width = dimension("width");
    let mut height = dimension("height");

    let rotation = stream["tags"]["rotate"]
        .as_str()
        .and_then(|r| r.parse::<i64>().ok())
        .or_else(|| {
            stream["side_data_list"]
                .as_array()?
                .iter()
                .find_map(|d| d["rotation"].as_i64())
        })
        .unwrap_or(0);
    if rotation.rem_euclid(180) == 90 {
        std::mem::swap(&mut width, &mut height);
    }

    let duration_secs = stream["duration"]
        .as_str()
        .or_else(|| json["format"]["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Some(VideoInfo {
        width,
        height,
        duration_secs,
        codec: stream["codec_name"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "duration": "12.480000"
            }],
            "format": { "duration": "12.500000" }
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.duration_secs, Some(12.48));
    }

    #[test]
    fn test_rotated_stream_swaps_dimensions() {
        let json = br#"{
            "streams": [{
                "codec_name": "hevc",
                "width": 1920,
                "height": 1080,
                "side_data_list": [{ "side_data_type": "Display Matrix", "rotation": -90 }]
            }],
            "format": { "duration": "3.0" }
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (Some(1080), Some(1920)));
        assert_eq!(info.duration_secs, Some(3.0));
    }

    #[test]
    fn test_garbage_output_is_none() {
        assert!(parse_probe_output(b"not json").is_none());
        assert!(parse_probe_output(br#"{"streams": []}"#).is_none());
    }
}

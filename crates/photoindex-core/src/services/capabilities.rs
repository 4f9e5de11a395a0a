//! Optional external capabilities.
//!
//! Face detection, reverse geocoding and video probing are provided by
//! outside services or tools. Each is injected as a trait object; the
//! defaults report "nothing found" so the pipeline never has to ask whether
//! a feature is configured.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;

use crate::models::FaceRegion;
use crate::utils::error::AppResult;

pub trait FaceDetector: Send + Sync {
    /// Face regions in pixel coordinates of the oriented image.
    fn detect_faces(&self, image: &DynamicImage) -> AppResult<Vec<FaceRegion>>;

    /// False for the no-op detector, so stored faces are left untouched.
    fn is_enabled(&self) -> bool {
        true
    }
}

pub trait Geocoder: Send + Sync {
    /// Human readable place name for a coordinate, if one is known.
    fn reverse_geocode(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>>;
}

/// Stream properties of a video file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub codec: Option<String>,
}

pub trait VideoProber: Send + Sync {
    /// Stream properties of the first video stream, `None` when unknown.
    fn probe(&self, path: &Path) -> AppResult<Option<VideoInfo>>;

    /// A representative still used to render the video's derivatives.
    fn frame(&self, path: &Path, info: Option<&VideoInfo>) -> AppResult<Option<DynamicImage>>;

    /// False for the no-op prober, so videos get no derivatives.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect_faces(&self, _image: &DynamicImage) -> AppResult<Vec<FaceRegion>> {
        Ok(Vec::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeocoder;

impl Geocoder for NoGeocoder {
    fn reverse_geocode(&self, _latitude: f64, _longitude: f64) -> AppResult<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoVideoProber;

impl VideoProber for NoVideoProber {
    fn probe(&self, _path: &Path) -> AppResult<Option<VideoInfo>> {
        Ok(None)
    }

    fn frame(&self, _path: &Path, _info: Option<&VideoInfo>) -> AppResult<Option<DynamicImage>> {
        Ok(None)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Capability set handed to the reconciler at construction.
#[derive(Clone)]
pub struct Capabilities {
    pub faces: Arc<dyn FaceDetector>,
    pub geocoder: Arc<dyn Geocoder>,
    pub video: Arc<dyn VideoProber>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            faces: Arc::new(NoFaceDetector),
            geocoder: Arc::new(NoGeocoder),
            video: Arc::new(NoVideoProber),
        }
    }
}

impl Capabilities {
    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.faces = detector;
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = geocoder;
        self
    }

    pub fn with_video_prober(mut self, prober: Arc<dyn VideoProber>) -> Self {
        self.video = prober;
        self
    }
}

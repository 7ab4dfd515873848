//! Configuration of camera, model and pipeline.
//!
use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};

use crate::{labels::LabelMap, preproc::IMAGE_SIZE};

/// Default location of the hand/face model.
pub const DEFAULT_MODEL_PATH: &str = "hand_face_tm/model.onnx";

/// Number of ranked classes reported per prediction.
pub const TOPK_PREDICTIONS: usize = 2;

/// Video device settings. Unset resolution and frame rate are picked as the highest the device
/// supports for `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub device: String,
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// What feeds the video surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    Device(CameraConfig),
    /// Generated still image, for machines without a webcam.
    TestPattern,
}

/// Where the model artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl FromStr for ModelSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(anyhow!("empty model location")),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(ModelSource::Url(url.to_owned()))
            }
            path => Ok(ModelSource::Path(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Url(url) => f.write_str(url),
        }
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Path(PathBuf::from(DEFAULT_MODEL_PATH))
    }
}

/// Settings of the inference pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub labels: LabelMap,
    pub top_k: usize,
    pub image_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            labels: LabelMap::default(),
            top_k: TOPK_PREDICTIONS,
            image_size: IMAGE_SIZE,
        }
    }
}

/// Parse a resolution given as `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_resolution(s: &str) -> Result<(u32, u32)> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width = width.trim().parse().context("invalid width")?;
    let height = height.trim().parse().context("invalid height")?;

    Ok((width, height))
}

/// Parse frames per second into a capture interval, e.g. `30` becomes `(1, 30)`.
pub fn parse_frame_rate(s: &str) -> Result<(u32, u32)> {
    let fps: u32 = s.trim().parse().context("invalid frame rate")?;
    if fps == 0 {
        return Err(anyhow!("frame rate must be positive"));
    }

    Ok((1, fps))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_resolutions() -> Result<()> {
        assert_eq!(parse_resolution("1280x720")?, (1280, 720));
        assert_eq!(parse_resolution("640X480")?, (640, 480));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("axb").is_err());

        Ok(())
    }

    #[test]
    fn parse_frame_rates() -> Result<()> {
        assert_eq!(parse_frame_rate("30")?, (1, 30));
        assert!(parse_frame_rate("0").is_err());

        Ok(())
    }

    #[test]
    fn model_source_from_location() -> Result<()> {
        assert_eq!(
            "https://example.com/model.onnx".parse::<ModelSource>()?,
            ModelSource::Url("https://example.com/model.onnx".into())
        );
        assert_eq!(
            "hand_face_tm/model.onnx".parse::<ModelSource>()?,
            ModelSource::default()
        );
        assert!("".parse::<ModelSource>().is_err());

        Ok(())
    }
}

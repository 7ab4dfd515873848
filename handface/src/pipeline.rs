//! Inference pipeline from a single frame to ranked classes.
//!
use std::{
    cmp::Ordering,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;
use tract_onnx::prelude::Tensor;

use crate::{
    config::PipelineConfig,
    labels::{Label, LabelMap},
    meter::METER,
    nn::Classifier,
    preproc::preprocess,
};

/// A label with the score the classifier assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassProbability {
    pub label: Label,
    pub probability: f32,
}

/// Ranked classes of one frame with the time it took to get them.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub classes: Vec<ClassProbability>,
    /// Decode, preprocessing, inference and ranking.
    pub total: Duration,
    /// Inference and ranking only.
    pub model_only: Duration,
}

impl Prediction {
    pub fn status_text(&self) -> String {
        format!(
            "Done in {} ms (not including preprocessing: {} ms)",
            self.total.as_millis(),
            self.model_only.as_millis()
        )
    }
}

/// Rank class scores in descending order and label the first `top_k`.
///
/// The sort is stable, so on equal scores the lower class index comes first.
pub fn top_k_classes(
    scores: &[f32],
    top_k: usize,
    labels: &LabelMap,
) -> Result<Vec<ClassProbability>> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    ranked
        .into_iter()
        .take(top_k)
        .map(|(index, probability)| {
            let label = labels
                .get(index)
                .ok_or_else(|| anyhow!("no label for class index {index}"))?;
            Ok(ClassProbability { label, probability })
        })
        .collect()
}

/// Preprocessing, classifier and ranking for single frames.
pub struct Pipeline {
    classifier: Box<dyn Classifier>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(classifier: Box<dyn Classifier>, config: PipelineConfig) -> Self {
        Self { classifier, config }
    }

    /// Classify an MJPG camera frame. The total time includes decoding.
    pub fn classify_jpeg(&self, jpeg: &[u8]) -> Result<Prediction> {
        let start = Instant::now();
        let frame: RgbImage = turbojpeg::decompress_image(jpeg).context("failed to decode frame")?;
        self.classify_since(&frame, start)
    }

    pub fn classify(&self, frame: &RgbImage) -> Result<Prediction> {
        self.classify_since(frame, Instant::now())
    }

    fn classify_since(&self, frame: &RgbImage, start: Instant) -> Result<Prediction> {
        let input: Tensor = preprocess(frame, self.config.image_size)?.into();

        let model_start = Instant::now();
        let scores = self.classifier.predict(input)?;
        self.config.labels.check_output_len(scores.len())?;
        let classes = top_k_classes(&scores, self.config.top_k, &self.config.labels)?;

        METER.tick_predicted();

        Ok(Prediction {
            classes,
            total: start.elapsed(),
            model_only: model_start.elapsed(),
        })
    }
}

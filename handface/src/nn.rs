use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::{config::ModelSource, utils::resolve_model_path};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Image classifier producing one raw score per class.
pub trait Classifier: Send + Sync {
    /// Run the model on a `(1, height, width, 3)` input.
    fn predict(&self, input: Tensor) -> Result<Vec<f32>>;
}

/// Hand/face classifier exported to ONNX, taking NHWC input in `[0, 1]`.
pub struct OnnxClassifier {
    model: NnModel,
}

impl OnnxClassifier {
    pub fn load(path: impl AsRef<Path>, image_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, image_size, image_size, 3),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("Loaded model {}", path.display());

        Ok(Self { model })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: Tensor) -> Result<Vec<f32>> {
        let outputs = self.model.run(tvec!(input.into()))?;
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no output"))?
            .to_array_view::<f32>()?
            .iter()
            .copied()
            .collect();

        Ok(scores)
    }
}

/// Fetch the model if needed and load it off the async runtime.
pub async fn load_onnx(source: &ModelSource, image_size: usize) -> Result<Box<dyn Classifier>> {
    let path = resolve_model_path(source).await?;
    let classifier =
        tokio::task::spawn_blocking(move || OnnxClassifier::load(path, image_size)).await??;

    Ok(Box::new(classifier))
}

/// Run one throwaway inference on an all-zero input and return the number of class scores.
///
/// The first run of a freshly loaded model pays for lazy allocations, so this keeps that cost
/// out of the first user-facing prediction.
pub fn warmup(classifier: &dyn Classifier, image_size: usize) -> Result<usize> {
    let zeros = Tensor::zero::<f32>(&[1, image_size, image_size, 3])?;
    let scores = classifier.predict(zeros)?;
    log::debug!("Warmup produced {} class scores", scores.len());

    Ok(scores.len())
}

/// Classifier returning the same scores for every input.
pub struct FixedScoresClassifier {
    scores: Vec<f32>,
}

impl FixedScoresClassifier {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }
}

impl Classifier for FixedScoresClassifier {
    fn predict(&self, input: Tensor) -> Result<Vec<f32>> {
        match input.shape() {
            [1, _, _, 3] => Ok(self.scores.clone()),
            shape => bail!("unexpected input shape {:?}", shape),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::preproc::IMAGE_SIZE;

    #[test]
    fn warmup_reports_output_len() -> Result<()> {
        let classifier = FixedScoresClassifier::new(vec![0.5, 0.5]);
        assert_eq!(warmup(&classifier, IMAGE_SIZE)?, 2);

        Ok(())
    }

    #[test]
    fn fixed_scores_reject_unbatched_input() -> Result<()> {
        let classifier = FixedScoresClassifier::new(vec![1.0, 0.0]);
        let input = Tensor::zero::<f32>(&[IMAGE_SIZE, IMAGE_SIZE, 3])?;
        assert!(classifier.predict(input).is_err());

        Ok(())
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        let result = OnnxClassifier::load("does/not/exist.onnx", IMAGE_SIZE);
        assert!(result.is_err());
    }
}

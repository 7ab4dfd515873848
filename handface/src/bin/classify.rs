//! Classify still images, or a single camera frame, from the command line.
//!
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use handface::{
    config::{CameraConfig, ModelSource, PipelineConfig, DEFAULT_MODEL_PATH, TOPK_PREDICTIONS},
    display::EmojiDisplay,
    labels::LabelMap,
    nn::{load_onnx, warmup},
    pipeline::{Pipeline, Prediction},
    preproc::IMAGE_SIZE,
    sensors::open_camera,
};

/// Attempts to get a first frame out of a freshly started camera.
const CAPTURE_ATTEMPTS: usize = 10;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Images to classify
    images: Vec<PathBuf>,

    /// Classify one frame of this video device instead of images
    #[clap(long, conflicts_with = "images")]
    device: Option<String>,

    /// Path or http(s) URL of the ONNX model
    #[clap(long, default_value = DEFAULT_MODEL_PATH)]
    model: ModelSource,

    /// Labels in class index order of the model output
    #[clap(long, value_delimiter = ',', default_value = "hand,face")]
    labels: Vec<String>,

    /// Number of ranked classes per prediction
    #[clap(long, default_value_t = TOPK_PREDICTIONS)]
    top_k: usize,
}

fn report(name: &str, prediction: &Prediction) {
    println!("{name}:");
    for class in &prediction.classes {
        println!("  {:<6} {:.4}", class.label, class.probability);
    }
    println!("  {}", prediction.status_text());

    let mut display = EmojiDisplay::default();
    match display.apply(&prediction.classes) {
        Some(label) => println!("  {} {}", display.glyph, label),
        None => println!("  no clear winner"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    if args.images.is_empty() && args.device.is_none() {
        return Err(anyhow!("nothing to classify, pass image paths or --device"));
    }

    let config = PipelineConfig {
        labels: LabelMap::from_names(&args.labels)?,
        top_k: args.top_k,
        image_size: IMAGE_SIZE,
    };

    let classifier = load_onnx(&args.model, config.image_size).await?;
    let output_len = warmup(classifier.as_ref(), config.image_size)?;
    config.labels.check_output_len(output_len)?;
    let pipeline = Pipeline::new(classifier, config);

    if let Some(device) = args.device {
        let mut capture = open_camera(&CameraConfig {
            device: device.clone(),
            ..Default::default()
        })?;
        let frame = (0..CAPTURE_ATTEMPTS)
            .find_map(|_| capture())
            .ok_or_else(|| anyhow!("no frame captured from {device}"))?;

        report(&device, &pipeline.classify_jpeg(&frame)?);
        return Ok(());
    }

    for path in &args.images {
        let image = image::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .to_rgb8();

        report(&path.display().to_string(), &pipeline.classify(&image)?);
    }

    Ok(())
}

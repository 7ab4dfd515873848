//! Hand/face demo server binary.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use handface::{
    config::{
        parse_frame_rate, parse_resolution, CameraConfig, CameraSource, ModelSource,
        PipelineConfig, DEFAULT_MODEL_PATH, TOPK_PREDICTIONS,
    },
    endpoints::{router, AppState},
    labels::LabelMap,
    meter::spawn_meter_logger,
    nn::load_onnx,
    preproc::IMAGE_SIZE,
    sensors::VideoSurface,
    session::Session,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the demo page on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// FourCC of the capture format
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture resolution as WIDTHxHEIGHT, highest supported if not set
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Frames per second, highest supported if not set
    #[clap(long, value_parser = parse_frame_rate)]
    frame_rate: Option<(u32, u32)>,

    /// Stream a generated picture instead of a camera
    #[clap(long)]
    test_pattern: bool,

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

impl Args {
    fn camera_source(&self) -> CameraSource {
        match self.test_pattern {
            true => CameraSource::TestPattern,
            false => CameraSource::Device(CameraConfig {
                device: self.device.clone(),
                format: self.format.clone(),
                resolution: self.resolution,
                frame_rate: self.frame_rate,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = PipelineConfig {
        labels: LabelMap::from_names(&args.labels)?,
        top_k: args.top_k,
        image_size: IMAGE_SIZE,
    };
    let camera = args.camera_source();

    let surface = Arc::new(VideoSurface::new());
    if !surface.init_source(&camera) {
        log::warn!("No video available, start the camera from the page once it is connected");
    }

    let state = Arc::new(AppState::new(Session::new(surface, config), camera));

    {
        let state = Arc::clone(&state);
        let source = args.model;
        tokio::spawn(async move {
            let mut session = state.session.lock().await;
            if let Err(err) = session
                .load_model(load_onnx(&source, IMAGE_SIZE))
                .await
            {
                log::error!("Failed to load model {}: {:#}", source, err);
            }
        });
    }

    spawn_meter_logger();

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(router(Arc::clone(&state)).into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    state.surface.stop_cam();

    Ok(())
}

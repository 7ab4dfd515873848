//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;

use crate::{
    config::CameraSource,
    display::EmojiDisplay,
    meter::METER,
    pipeline::ClassProbability,
    sensors::{is_video_playing, PlaybackState, VideoSurface},
    session::{RunRejected, Session, SessionSnapshot},
};

/// State shared by all endpoints.
pub struct AppState {
    pub session: Mutex<Session>,
    pub snapshots: watch::Receiver<SessionSnapshot>,
    pub surface: Arc<VideoSurface>,
    pub camera: CameraSource,
}

impl AppState {
    pub fn new(session: Session, camera: CameraSource) -> Self {
        let snapshots = session.subscribe();
        let surface = Arc::clone(session.surface());
        Self {
            session: Mutex::new(session),
            snapshots,
            surface,
            camera,
        }
    }
}

/// Build the router with all endpoints of the demo.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/video", get(video_stream))
        .route("/status", get(status))
        .route("/predict", post(predict))
        .route("/camera/start", post(start_camera))
        .route("/camera/stop", post(stop_camera))
        .route("/camera/pause", post(pause_camera))
        .route("/camera/play", post(play_camera))
        .layer(Extension(state))
}

/// Wrap an encoded frame as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

/// Demo page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Live camera picture.
pub async fn video_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    log::info!("Video stream requested");

    let stream = WatchStream::new(state.surface.subscribe()).filter_map(|frame| async move {
        frame.map(|frame| {
            METER.tick_streamed();
            Ok::<_, std::io::Error>(as_jpeg_stream_item(&frame))
        })
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub playback: PlaybackState,
    pub video_playing: bool,
}

pub async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<StatusResponse> {
    let session = state.snapshots.borrow().clone();
    let playback = state.surface.playback();

    Json(StatusResponse {
        session,
        video_playing: is_video_playing(&playback),
        playback,
    })
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub classes: Vec<ClassProbability>,
    pub status: String,
    pub total_ms: u128,
    pub model_only_ms: u128,
    pub display: EmojiDisplay,
}

/// Classify the current frame, like a click on the trigger button.
pub async fn predict(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<PredictResponse>, (StatusCode, String)> {
    // Refuse while loading or predicting instead of queueing on the session lock
    if !state.snapshots.borrow().trigger_enabled {
        return Err((
            StatusCode::CONFLICT,
            RunRejected::ModelNotLoaded.to_string(),
        ));
    }
    let mut session = state.session.lock().await;

    let prediction = tokio::task::block_in_place(|| session.run()).map_err(|err| {
        let code = match err.downcast_ref::<RunRejected>() {
            Some(_) => StatusCode::CONFLICT,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, format!("{err:#}"))
    })?;

    let snapshot = session.snapshot();
    Ok(Json(PredictResponse {
        classes: prediction.classes,
        status: snapshot.status.clone(),
        total_ms: prediction.total.as_millis(),
        model_only_ms: prediction.model_only.as_millis(),
        display: snapshot.display.clone(),
    }))
}

pub async fn start_camera(Extension(state): Extension<Arc<AppState>>) -> StatusCode {
    let bound = tokio::task::spawn_blocking(move || state.surface.init_source(&state.camera))
        .await
        .unwrap_or(false);

    match bound {
        true => StatusCode::NO_CONTENT,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn stop_camera(Extension(state): Extension<Arc<AppState>>) -> StatusCode {
    let stopped = tokio::task::spawn_blocking(move || state.surface.stop_cam())
        .await
        .unwrap_or(false);

    match stopped {
        true => StatusCode::NO_CONTENT,
        false => StatusCode::CONFLICT,
    }
}

pub async fn pause_camera(Extension(state): Extension<Arc<AppState>>) -> StatusCode {
    state.surface.pause();
    StatusCode::NO_CONTENT
}

pub async fn play_camera(Extension(state): Extension<Arc<AppState>>) -> StatusCode {
    state.surface.play();
    StatusCode::NO_CONTENT
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Hand or face?</title>
  <style>
    body { font-family: sans-serif; text-align: center; }
    .hide { display: none; }
    #emoji { font-size: 8em; width: 640px; margin: 0 auto; }
    #emoji.left { text-align: left; }
    #emoji.right { text-align: right; }
  </style>
</head>
<body>
  <img src="/video" width="640">
  <canvas class="hide"></canvas>
  <p id="status"></p>
  <button class="hide">Hand or face?</button>
  <div id="emoji"></div>
  <script>
    const button = document.getElementsByTagName('button')[0];
    const emoji = document.getElementById('emoji');

    function show(snapshot) {
      document.getElementById('status').innerText = snapshot.status;
      button.classList.toggle('hide', !snapshot.trigger_enabled);
      emoji.innerText = snapshot.display.glyph;
      emoji.classList.toggle('left', snapshot.display.left);
      emoji.classList.toggle('right', snapshot.display.right);
    }

    async function refresh() {
      const resp = await fetch('/status');
      show(await resp.json());
    }

    button.onclick = async () => {
      const resp = await fetch('/predict', { method: 'POST' });
      if (!resp.ok) {
        console.log(await resp.text());
      }
      await refresh();
    };

    setInterval(refresh, 500);
    refresh();
  </script>
</body>
</html>
"#;

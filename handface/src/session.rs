//! Demo session tying together video surface, classifier, emoji display and status text.
//!
//! The session is a small state machine:
//!
//! ```text
//! Idle -> Loading -> Ready -> Predicting -> Done
//!            |                    |  ^        |
//!            v                    v  +--------+
//!          Error                Error
//! ```
//!
//! Every transition is published as a [`SessionSnapshot`] so readers never have to lock the
//! session itself.
use std::{fmt, future::Future, sync::Arc};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    config::PipelineConfig,
    display::EmojiDisplay,
    nn::{warmup, Classifier},
    pipeline::{Pipeline, Prediction},
    sensors::VideoSurface,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Predicting,
    Done,
    Error(String),
}

/// What the user sees: state, status line, trigger button and emoji overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: String,
    pub trigger_enabled: bool,
    pub display: EmojiDisplay,
}

/// Reasons a trigger is refused before any inference happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRejected {
    ModelNotLoaded,
    NoFrame,
}

impl fmt::Display for RunRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunRejected::ModelNotLoaded => f.write_str("model is not loaded yet"),
            RunRejected::NoFrame => f.write_str("no video frame available"),
        }
    }
}

impl std::error::Error for RunRejected {}

pub struct Session {
    surface: Arc<VideoSurface>,
    config: PipelineConfig,
    pipeline: Option<Pipeline>,
    snapshot: SessionSnapshot,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub fn new(surface: Arc<VideoSurface>, config: PipelineConfig) -> Self {
        let snapshot = SessionSnapshot {
            state: SessionState::Idle,
            status: String::new(),
            trigger_enabled: false,
            display: EmojiDisplay::default(),
        };
        let (snapshots, _) = watch::channel(snapshot.clone());

        Self {
            surface,
            config,
            pipeline: None,
            snapshot,
            snapshots,
        }
    }

    pub fn surface(&self) -> &Arc<VideoSurface> {
        &self.surface
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Receive a snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn can_trigger(&self) -> bool {
        self.pipeline.is_some() && self.snapshot.state != SessionState::Predicting
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.snapshot.status = text.into();
        log::debug!("Status: {:?}", self.snapshot.status);
    }

    fn transition(&mut self, state: SessionState) {
        log::debug!("Session {:?} -> {:?}", self.snapshot.state, state);
        self.snapshot.state = state;
        self.snapshot.trigger_enabled = self.can_trigger();
        self.snapshots.send_replace(self.snapshot.clone());
    }

    /// Load and warm up a classifier, then enable the trigger.
    ///
    /// The label mapping must have one entry per class score of the model. Errors move the
    /// session to `Error` and are returned to the caller.
    pub async fn load_model<F>(&mut self, loader: F) -> Result<()>
    where
        F: Future<Output = Result<Box<dyn Classifier>>>,
    {
        self.pipeline = None;
        self.set_status("Loading model...");
        self.transition(SessionState::Loading);

        let image_size = self.config.image_size;
        let labels = self.config.labels.clone();
        let loaded = async move {
            let classifier = loader.await?;
            let (classifier, output_len) = tokio::task::spawn_blocking(move || {
                let output_len = warmup(classifier.as_ref(), image_size)?;
                Ok::<_, anyhow::Error>((classifier, output_len))
            })
            .await??;
            labels.check_output_len(output_len)?;

            Ok::<_, anyhow::Error>(classifier)
        }
        .await;

        match loaded {
            Ok(classifier) => {
                self.pipeline = Some(Pipeline::new(classifier, self.config.clone()));
                self.set_status("");
                self.transition(SessionState::Ready);
                log::info!("Model ready");
                Ok(())
            }
            Err(err) => {
                self.transition(SessionState::Error(format!("{err:#}")));
                Err(err)
            }
        }
    }

    /// Release the classifier and go back to `Idle`.
    pub fn dispose(&mut self) {
        self.pipeline = None;
        self.set_status("");
        self.transition(SessionState::Idle);
    }

    /// Classify the current frame of the video surface and update the display.
    pub fn run(&mut self) -> Result<Prediction> {
        if self.pipeline.is_none() {
            return Err(RunRejected::ModelNotLoaded.into());
        }
        let frame = self.surface.current_frame().ok_or(RunRejected::NoFrame)?;
        let pipeline = self.pipeline.take().ok_or(RunRejected::ModelNotLoaded)?;

        self.set_status("Predicting...");
        self.transition(SessionState::Predicting);

        let result = pipeline.classify_jpeg(&frame);
        self.pipeline = Some(pipeline);

        match result {
            Ok(prediction) => {
                self.set_status(prediction.status_text());
                self.snapshot.display.apply(&prediction.classes);
                self.transition(SessionState::Done);
                Ok(prediction)
            }
            Err(err) => {
                log::error!("Prediction failed: {:#}", err);
                self.transition(SessionState::Error(format!("{err:#}")));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use anyhow::anyhow;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{nn::FixedScoresClassifier, sensors::still_capture_fn};

    fn fixed(scores: Vec<f32>) -> impl Future<Output = Result<Box<dyn Classifier>>> {
        async move { Ok(Box::new(FixedScoresClassifier::new(scores)) as Box<dyn Classifier>) }
    }

    fn session_with_frame(frame: Bytes) -> Session {
        let surface = Arc::new(VideoSurface::new());
        surface.bind(still_capture_fn(frame, 100));

        let deadline = Instant::now() + Duration::from_secs(5);
        while surface.current_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        Session::new(surface, PipelineConfig::default())
    }

    fn jpeg_frame() -> Bytes {
        let frame = RgbImage::from_pixel(64, 48, Rgb([30, 60, 90]));
        let jpeg = turbojpeg::compress_image(&frame, 95, turbojpeg::Subsamp::Sub2x2)
            .expect("compress test frame");
        Bytes::copy_from_slice(&jpeg)
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::new(Arc::new(VideoSurface::new()), PipelineConfig::default());
        let snapshot = session.snapshot();

        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.status, "");
        assert!(!snapshot.trigger_enabled);
        assert_eq!(snapshot.display, EmojiDisplay::default());
    }

    #[tokio::test]
    async fn load_model_enables_trigger() -> Result<()> {
        let mut session = Session::new(Arc::new(VideoSurface::new()), PipelineConfig::default());
        let rx = session.subscribe();

        session.load_model(fixed(vec![0.5, 0.5])).await?;

        assert_eq!(session.snapshot().state, SessionState::Ready);
        assert_eq!(session.snapshot().status, "");
        assert!(session.snapshot().trigger_enabled);
        assert_eq!(rx.borrow().state, SessionState::Ready);

        Ok(())
    }

    #[tokio::test]
    async fn label_mismatch_fails_loading() {
        let mut session = Session::new(Arc::new(VideoSurface::new()), PipelineConfig::default());

        let result = session.load_model(fixed(vec![0.2, 0.3, 0.5])).await;
        assert!(result.is_err());
        assert!(matches!(session.snapshot().state, SessionState::Error(_)));
        assert!(!session.snapshot().trigger_enabled);
        assert_eq!(session.snapshot().status, "Loading model...");
    }

    #[tokio::test]
    async fn loader_error_propagates() {
        let mut session = Session::new(Arc::new(VideoSurface::new()), PipelineConfig::default());

        let result = session
            .load_model(async { Err::<Box<dyn Classifier>, _>(anyhow!("model file not found")) })
            .await;
        assert!(result.is_err());
        assert_eq!(
            session.snapshot().state,
            SessionState::Error("model file not found".into())
        );
    }

    #[test]
    fn run_requires_model() {
        let mut session = session_with_frame(jpeg_frame());

        let err = session.run().unwrap_err();
        assert_eq!(
            err.downcast_ref::<RunRejected>(),
            Some(&RunRejected::ModelNotLoaded)
        );
        assert_eq!(session.snapshot().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn run_requires_frame() -> Result<()> {
        let mut session = Session::new(Arc::new(VideoSurface::new()), PipelineConfig::default());
        session.load_model(fixed(vec![0.9, 0.1])).await?;

        let err = session.run().unwrap_err();
        assert_eq!(err.downcast_ref::<RunRejected>(), Some(&RunRejected::NoFrame));
        assert_eq!(session.snapshot().state, SessionState::Ready);

        Ok(())
    }

    #[tokio::test]
    async fn tie_leaves_display_unchanged() -> Result<()> {
        let mut session = session_with_frame(jpeg_frame());
        session.load_model(fixed(vec![0.3, 0.3])).await?;

        let prediction = session.run()?;
        assert_eq!(prediction.classes[0].probability, 0.3);
        assert_eq!(session.snapshot().state, SessionState::Done);
        assert!(session.snapshot().status.starts_with("Done in "));
        assert_eq!(session.snapshot().display, EmojiDisplay::default());
        assert!(session.snapshot().trigger_enabled);

        Ok(())
    }

    #[tokio::test]
    async fn undecodable_frame_is_an_error_state() -> Result<()> {
        let mut session = session_with_frame(Bytes::from_static(b"not a jpeg"));
        session.load_model(fixed(vec![0.9, 0.1])).await?;

        assert!(session.run().is_err());
        assert!(matches!(session.snapshot().state, SessionState::Error(_)));
        assert!(session.can_trigger());

        Ok(())
    }

    #[tokio::test]
    async fn dispose_releases_model() -> Result<()> {
        let mut session = session_with_frame(jpeg_frame());
        session.load_model(fixed(vec![0.9, 0.1])).await?;
        session.dispose();

        assert_eq!(session.snapshot().state, SessionState::Idle);
        assert!(!session.snapshot().trigger_enabled);
        assert!(session.run().is_err());

        Ok(())
    }
}

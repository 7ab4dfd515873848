//! Sensors module.
//!
//! Camera capture and the video surface the live stream is bound to. The surface keeps the
//! latest frame and a playback state modelled on an HTML video element, so callers can tell
//! whether there is a live picture to classify.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use image::{Rgb, RgbImage};
use rscam::{Camera, Config};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    config::{CameraConfig, CameraSource},
    meter::METER,
};

/// Blocking capture of the next encoded frame. `None` signals a failed capture.
pub type CaptureFn = Box<dyn FnMut() -> Option<Bytes> + Send>;

/// Consecutive failed captures after which a stream counts as ended.
const MAX_CAPTURE_FAILURES: u32 = 30;

/// Open a video device on a Linux machine and return a capture function for it.
pub fn open_camera(config: &CameraConfig) -> Result<CaptureFn> {
    let mut cam = Camera::new(&config.device)
        .with_context(|| format!("failed to open camera {}", config.device))?;
    log_supported_formats(&cam, &config.format);
    let format = config.format.as_bytes();

    log::info!("Using camera {}", config.device);

    let resolution = config
        .resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = config
        .frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    log::info!(
        "Capturing {}x{} {} frames every {}/{} s",
        resolution.0,
        resolution.1,
        config.format,
        frame_rate.0,
        frame_rate.1
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || match cam.capture() {
        Ok(frame) => Some(Bytes::copy_from_slice(&frame[..])),
        Err(err) => {
            log::debug!("Capture failed: {}", err);
            None
        }
    };
    Ok(Box::new(callback))
}

/// Capture function repeating one encoded frame at `fps` frames per second.
pub fn still_capture_fn(frame: Bytes, fps: u32) -> CaptureFn {
    let interval = Duration::from_secs(1) / fps.max(1);
    Box::new(move || {
        std::thread::sleep(interval);
        Some(frame.clone())
    })
}

/// Encoded 640x480 color gradient standing in for a camera picture.
pub fn test_pattern_jpeg() -> Result<Bytes> {
    let image = RgbImage::from_fn(640, 480, |x, y| {
        Rgb([(x * 255 / 639) as u8, (y * 255 / 479) as u8, 128])
    });
    let jpeg = turbojpeg::compress_image(&image, 90, turbojpeg::Subsamp::Sub2x2)?;

    Ok(Bytes::copy_from_slice(&jpeg))
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| anyhow!("No resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Frame rates are given as capture intervals `(numerator, denominator)` in seconds.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .into_iter()
            .filter(|(numerator, _)| *numerator > 0)
            // Shortest interval is the highest frame rate
            .max_by(|a, b| {
                let fps_a = a.1 as f32 / a.0 as f32;
                let fps_b = b.1 as f32 / b.0 as f32;
                fps_a.total_cmp(&fps_b)
            }),
        // `min` is the shortest interval
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| anyhow!("No frame rate found"))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

/// How much data a video surface holds, ordered like `HTMLMediaElement.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

/// Snapshot of the playback of a video surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    /// Seconds between the first and the latest shown frame.
    pub current_time: f64,
    pub paused: bool,
    pub ended: bool,
    pub ready_state: ReadyState,
}

/// Whether a video shows a live picture which can be read.
pub fn is_video_playing(state: &PlaybackState) -> bool {
    state.current_time > 0.0
        && !state.paused
        && !state.ended
        && state.ready_state > ReadyState::HaveCurrentData
}

#[derive(Debug, Default)]
struct Playback {
    bound: bool,
    paused: bool,
    ended: bool,
    frames: u64,
    first_frame: Option<Instant>,
    last_frame: Option<Instant>,
}

impl Playback {
    fn record_frame(&mut self) {
        let now = Instant::now();
        self.first_frame.get_or_insert(now);
        self.last_frame = Some(now);
        self.frames += 1;
    }

    fn state(&self) -> PlaybackState {
        let ready_state = match (self.bound, self.frames) {
            (false, _) => ReadyState::HaveNothing,
            (true, 0) => ReadyState::HaveMetadata,
            (true, 1) => ReadyState::HaveCurrentData,
            (true, 2) => ReadyState::HaveFutureData,
            (true, _) => ReadyState::HaveEnoughData,
        };
        let current_time = match (self.first_frame, self.last_frame) {
            (Some(first), Some(last)) => last.duration_since(first).as_secs_f64(),
            _ => 0.0,
        };

        PlaybackState {
            current_time,
            paused: self.paused,
            ended: self.ended,
            ready_state,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BoundStream {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Sink of a camera stream, exposing the current frame.
pub struct VideoSurface {
    frames: Arc<watch::Sender<Option<Bytes>>>,
    playback: Arc<Mutex<Playback>>,
    stream: Mutex<Option<BoundStream>>,
}

impl VideoSurface {
    pub fn new() -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            frames: Arc::new(frames),
            playback: Arc::new(Mutex::new(Playback::default())),
            stream: Mutex::new(None),
        }
    }

    /// Open the configured camera and bind its stream.
    ///
    /// Failures are logged and leave the surface unbound.
    pub fn init_cam(&self, config: &CameraConfig) -> bool {
        match open_camera(config) {
            Ok(capture) => {
                self.bind(capture);
                true
            }
            Err(err) => {
                log::error!("Something went wrong with the webcam: {:#}", err);
                false
            }
        }
    }

    /// Bind the stream of a camera source. Failures are logged and leave the surface unbound.
    pub fn init_source(&self, source: &CameraSource) -> bool {
        match source {
            CameraSource::Device(config) => self.init_cam(config),
            CameraSource::TestPattern => match test_pattern_jpeg() {
                Ok(frame) => {
                    self.bind(still_capture_fn(frame, 30));
                    true
                }
                Err(err) => {
                    log::error!("Failed to render test pattern: {:#}", err);
                    false
                }
            },
        }
    }

    /// Bind a stream to the surface, replacing a bound one.
    pub fn bind(&self, capture: CaptureFn) {
        // Slot stays locked until the new stream is stored
        let mut slot = lock(&self.stream);
        if let Some(previous) = slot.take() {
            self.release(previous);
        }
        *lock(&self.playback) = Playback {
            bound: true,
            ..Default::default()
        };

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let frames = Arc::clone(&self.frames);
            let playback = Arc::clone(&self.playback);
            std::thread::spawn(move || capture_loop(capture, stop, frames, playback))
        };

        *slot = Some(BoundStream { stop, handle });
        log::info!("Camera stream bound");
    }

    /// Stop the bound stream and release the camera.
    ///
    /// Returns `false` if there was no stream to stop.
    pub fn stop_cam(&self) -> bool {
        let stopped = self.unbind();
        match stopped {
            true => log::info!("Camera stream stopped"),
            false => log::warn!("No camera stream bound, nothing to stop"),
        }
        stopped
    }

    fn unbind(&self) -> bool {
        let stream = lock(&self.stream).take();
        match stream {
            Some(stream) => {
                self.release(stream);
                true
            }
            None => false,
        }
    }

    /// Stop and join a capture thread, then reset playback and the frame binding.
    fn release(&self, stream: BoundStream) {
        let BoundStream { stop, handle } = stream;
        stop.store(true, Ordering::Relaxed);
        if handle.join().is_err() {
            log::error!("Capture thread panicked");
        }

        *lock(&self.playback) = Playback {
            ended: true,
            ..Default::default()
        };
        self.frames.send_replace(None);
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.stream).is_some()
    }

    /// Stop showing new frames. The current frame stays readable.
    pub fn pause(&self) {
        lock(&self.playback).paused = true;
    }

    pub fn play(&self) {
        lock(&self.playback).paused = false;
    }

    pub fn playback(&self) -> PlaybackState {
        lock(&self.playback).state()
    }

    pub fn is_playing(&self) -> bool {
        is_video_playing(&self.playback())
    }

    /// The latest frame shown, encoded as captured.
    pub fn current_frame(&self) -> Option<Bytes> {
        self.frames.borrow().clone()
    }

    /// Receive every new frame shown on the surface.
    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.frames.subscribe()
    }
}

impl Default for VideoSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoSurface {
    fn drop(&mut self) {
        self.unbind();
    }
}

fn capture_loop(
    mut capture: CaptureFn,
    stop: Arc<AtomicBool>,
    frames: Arc<watch::Sender<Option<Bytes>>>,
    playback: Arc<Mutex<Playback>>,
) {
    let mut failures = 0;
    while !stop.load(Ordering::Relaxed) {
        match capture() {
            Some(frame) => {
                failures = 0;
                METER.tick_captured();

                let mut playback = lock(&playback);
                if !playback.paused {
                    playback.record_frame();
                    frames.send_replace(Some(frame));
                }
            }
            None => {
                failures += 1;
                if failures >= MAX_CAPTURE_FAILURES {
                    log::error!("Camera stopped delivering frames, ending stream");
                    frames.send_replace(None);
                    lock(&playback).ended = true;
                    break;
                }
                log::warn!("Unable to capture frame, trying again...");
            }
        }
    }
}

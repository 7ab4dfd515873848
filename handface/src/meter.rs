//! Throughput counters.
//!
//! The capture thread, the video endpoint and the pipeline tick [`METER`]; the logger spawned by
//! [`spawn_meter_logger`] reads and resets the counters every two seconds.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters of frames moving through the demo.
#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    streamed_frames: AtomicU64,
    predictions: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            streamed_frames: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_streamed(&self) {
        self.streamed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_predicted(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_streamed(&self) -> u64 {
        self.streamed_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_predicted(&self) -> u64 {
        self.predictions.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured = METER.get_reset_captured();
            let streamed = METER.get_reset_streamed();
            let predicted = METER.get_reset_predicted();
            let elapsed = start.elapsed().as_secs_f32();

            if captured > 0 {
                log::info!("Captured frames per second: {:.2}", captured as f32 / elapsed);
            }
            if streamed > 0 {
                log::info!("Streamed frames per second: {:.2}", streamed as f32 / elapsed);
            }
            if predicted > 0 {
                log::info!("Predictions in the last {elapsed:.1} s: {predicted}");
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_reset_on_read() {
        let meter = Meter::new();
        meter.tick_captured();
        meter.tick_captured();
        meter.tick_predicted();

        assert_eq!(meter.get_reset_captured(), 2);
        assert_eq!(meter.get_reset_captured(), 0);
        assert_eq!(meter.get_reset_streamed(), 0);
        assert_eq!(meter.get_reset_predicted(), 1);
    }
}

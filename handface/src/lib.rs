//! Classify webcam frames as hand or face and show the result as an emoji.
pub mod config;
pub mod display;
pub mod endpoints;
pub mod labels;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod preproc;
pub mod sensors;
pub mod session;
pub mod utils;

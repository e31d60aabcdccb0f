//! Continuous encoding of a capture stream
//!
//! This module implements the encoder/segmenter pair:
//! - `MediaEncoder` trait for container writers
//! - `WebmEncoder`, the live WebM muxer for already-compressed tracks
//! - `FfmpegEncoder`, which compresses raw camera and microphone frames to VP9/Opus
//! - `Segmenter`, which flushes the encoder into ordered segments at a fixed cadence

pub mod ffmpeg;
pub mod segmenter;
pub mod webm;

use crate::artifact::ContainerFormat;
use crate::capture::{CaptureHandle, TrackInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use ffmpeg::{ffmpeg_available, FfmpegEncoder};
pub use segmenter::{Segmenter, SegmenterReport};
pub use webm::WebmEncoder;

/// Encoder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("Capture handle is not live")]
    DeadHandle,

    #[error("Capture stream exposes no tracks")]
    NoTracks,

    #[error("Encoder has not been started")]
    NotStarted,

    #[error("Encoder task ended abnormally: {0}")]
    Aborted(String),

    #[error("Unsupported track: {0}")]
    Unsupported(String),

    #[error("FFmpeg error: {0}")]
    Process(String),
}

/// Fixed encoder configuration, never renegotiated mid-session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub container: ContainerFormat,

    /// Flush cadence in milliseconds
    pub timeslice_ms: u64,

    pub video_bits_per_second: u32,

    pub audio_bits_per_second: u32,

    /// FFmpeg binary used for raw sources
    pub ffmpeg_path: String,
}

impl EncoderSettings {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms.max(1))
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            container: ContainerFormat::Webm,
            timeslice_ms: 1000,
            video_bits_per_second: 3_500_000,
            audio_bits_per_second: 128_000,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Writes captured frames into a container stream
pub trait MediaEncoder: Send {
    fn container(&self) -> ContainerFormat;

    /// Bind to the handle's tracks; fails if the handle is not live
    fn start(&mut self, handle: &CaptureHandle) -> Result<(), EncoderError>;

    /// Bytes produced since the previous call; empty when nothing was captured
    fn encode(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError>;

    /// Flush whatever is left; may be empty
    fn finish(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError>;
}

/// Build the encoder for `settings` that can take frames from `tracks`
///
/// Compressed tracks are muxed directly; anything raw is handed to ffmpeg.
pub fn for_tracks(settings: &EncoderSettings, tracks: &[TrackInfo]) -> Box<dyn MediaEncoder> {
    let compressed = tracks.iter().all(|t| t.encoding.is_compressed());
    match settings.container {
        ContainerFormat::Webm if compressed => Box::new(WebmEncoder::new(settings.clone())),
        ContainerFormat::Webm => Box::new(FfmpegEncoder::new(settings.clone())),
    }
}

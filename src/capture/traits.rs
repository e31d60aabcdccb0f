//! Capture trait definitions
//!
//! Platform-agnostic traits for capture sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Device acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Constraints cannot be satisfied: {0}")]
    Overconstrained(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Device acquisition timed out after {0:?}")]
    Timeout(Duration),
}

/// Which way the camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Constraints requested from the capture device
///
/// These are a fixed configuration for the whole application, never tuned per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    /// Ideal width in pixels
    pub width: u32,

    /// Ideal height in pixels
    pub height: u32,

    pub aspect_ratio: f64,

    pub frame_rate: u32,

    pub facing_mode: FacingMode,

    pub echo_cancellation: bool,

    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            aspect_ratio: 16.0 / 9.0,
            frame_rate: 30,
            facing_mode: FacingMode::User,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Byte layout of the frames a track hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameEncoding {
    /// Compressed VP9 frames, muxable as-is
    Vp9,
    /// Compressed Opus packets, muxable as-is
    Opus,
    /// Packed YUV 4:2:2, as most UVC webcams deliver it
    Yuyv422,
    Nv12,
    /// Packed 8-bit RGB
    Rgb24,
    /// One JPEG image per frame
    Mjpeg,
    /// Interleaved signed 16-bit little-endian samples
    PcmS16le,
}

impl FrameEncoding {
    /// Whether frames are already compressed for the container
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameEncoding::Vp9 | FrameEncoding::Opus)
    }

    /// Matroska codec id for compressed encodings
    pub fn codec_id(&self) -> Option<&'static str> {
        match self {
            FrameEncoding::Vp9 => Some("V_VP9"),
            FrameEncoding::Opus => Some("A_OPUS"),
            _ => None,
        }
    }
}

/// A readable media track exposed by a live capture stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    pub encoding: FrameEncoding,

    /// Video only
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,

    /// Audio only
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

/// One frame read from a track, laid out per the track's [`FrameEncoding`]
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub kind: TrackKind,

    /// Presentation time relative to the start of capture
    pub timestamp_ms: u64,

    pub keyframe: bool,

    pub data: Vec<u8>,
}

/// A live capture stream holding the device
pub trait CaptureStream: Send {
    fn tracks(&self) -> Vec<TrackInfo>;

    fn is_live(&self) -> bool;

    /// Frames captured since the previous call
    fn read_frames(&mut self) -> Vec<MediaFrame>;

    /// Stop every track and give the device back to the OS
    fn stop_tracks(&mut self);
}

/// A capture device that can be acquired with a set of constraints
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Open the device and start its tracks
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError>;
}

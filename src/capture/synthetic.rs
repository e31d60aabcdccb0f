//! Synthetic test-pattern camera
//!
//! Produces one video and one audio track of deterministic frames paced by the
//! tokio clock, so it behaves the same under real and paused time. By default
//! the frames stand in for VP9/Opus packets; [`SyntheticCamera::raw`] hands out
//! uncompressed RGB24 and PCM instead, the way a real webcam and microphone do.

use super::traits::{
    CaptureConstraints, CaptureDevice, CaptureStream, DeviceError, FrameEncoding, MediaFrame,
    TrackInfo, TrackKind,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const VIDEO_FRAME_BYTES: usize = 64;
const AUDIO_FRAME_BYTES: usize = 16;
/// Opus-style 20ms audio packets
const AUDIO_FRAME_MS: u64 = 20;
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const MAX_WIDTH: u32 = 3840;
const MAX_FRAME_RATE: u32 = 60;

/// Counts acquisitions and releases so callers can check nothing leaked
#[derive(Debug, Default)]
pub struct DeviceUsage {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl DeviceUsage {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles currently held
    pub fn held(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

/// A camera + microphone pair that generates a test pattern
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    name: String,
    failure: Option<DeviceError>,
    dead_on_arrival: bool,
    silent: bool,
    raw: bool,
    open_delay: Option<Duration>,
    lost_after: Option<Duration>,
    usage: Arc<DeviceUsage>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            name: "Synthetic Camera".to_string(),
            failure: None,
            dead_on_arrival: false,
            silent: false,
            raw: false,
            open_delay: None,
            lost_after: None,
            usage: Arc::new(DeviceUsage::default()),
        }
    }

    /// Fail every acquisition with `error`
    pub fn denying(mut self, error: DeviceError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Hand out streams whose tracks have already ended
    pub fn dead_on_arrival(mut self) -> Self {
        self.dead_on_arrival = true;
        self
    }

    /// Keep the tracks live but never produce a frame
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Hand out uncompressed RGB24 video and 16-bit PCM audio
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// End every track `after` the stream opened, as an unplugged camera would
    pub fn failing_after(mut self, after: Duration) -> Self {
        self.lost_after = Some(after);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn usage(&self) -> Arc<DeviceUsage> {
        self.usage.clone()
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = &self.failure {
            tracing::warn!(device = %self.name, "Synthetic camera refused acquisition: {}", error);
            return Err(error.clone());
        }

        if constraints.width > MAX_WIDTH || constraints.frame_rate > MAX_FRAME_RATE {
            return Err(DeviceError::Overconstrained(format!(
                "{}x{} @ {}fps exceeds {}px @ {}fps",
                constraints.width, constraints.height, constraints.frame_rate, MAX_WIDTH, MAX_FRAME_RATE
            )));
        }

        self.usage.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticStream {
            started: Instant::now(),
            frame_rate: constraints.frame_rate.max(1) as u64,
            width: constraints.width,
            height: constraints.height,
            next_video: 0,
            next_audio: 0,
            live: !self.dead_on_arrival,
            silent: self.silent,
            raw: self.raw,
            lost_after: self.lost_after,
            usage: self.usage.clone(),
        }))
    }
}

struct SyntheticStream {
    started: Instant,
    frame_rate: u64,
    width: u32,
    height: u32,
    next_video: u64,
    next_audio: u64,
    live: bool,
    silent: bool,
    raw: bool,
    lost_after: Option<Duration>,
    usage: Arc<DeviceUsage>,
}

impl SyntheticStream {
    fn video_frame(&self, index: u64) -> MediaFrame {
        let data = if self.raw {
            // A flat gray that brightens every frame
            vec![(index % 256) as u8; self.width as usize * self.height as usize * 3]
        } else {
            let mut data = vec![(index % 251) as u8; VIDEO_FRAME_BYTES];
            data[0] = b'V';
            data
        };
        MediaFrame {
            kind: TrackKind::Video,
            timestamp_ms: index * 1000 / self.frame_rate,
            keyframe: index % self.frame_rate == 0,
            data,
        }
    }

    fn audio_frame(&self, index: u64) -> MediaFrame {
        let data = if self.raw {
            let samples = (AUDIO_SAMPLE_RATE as u64 * AUDIO_FRAME_MS / 1000) as usize;
            (0..samples)
                .flat_map(|i| {
                    // Square wave, 480 samples per period
                    let level: i16 = if (i / 240) % 2 == 0 { 4096 } else { -4096 };
                    level.to_le_bytes()
                })
                .collect()
        } else {
            let mut data = vec![(index % 241) as u8; AUDIO_FRAME_BYTES];
            data[0] = b'A';
            data
        };
        MediaFrame {
            kind: TrackKind::Audio,
            timestamp_ms: index * AUDIO_FRAME_MS,
            keyframe: true,
            data,
        }
    }
}

impl CaptureStream for SyntheticStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        vec![
            TrackInfo {
                id: "synthetic-video".to_string(),
                kind: TrackKind::Video,
                label: "Test pattern".to_string(),
                encoding: if self.raw { FrameEncoding::Rgb24 } else { FrameEncoding::Vp9 },
                width: Some(self.width),
                height: Some(self.height),
                frame_rate: Some(self.frame_rate as u32),
                sample_rate: None,
                channels: None,
            },
            TrackInfo {
                id: "synthetic-audio".to_string(),
                kind: TrackKind::Audio,
                label: "Test tone".to_string(),
                encoding: if self.raw { FrameEncoding::PcmS16le } else { FrameEncoding::Opus },
                width: None,
                height: None,
                frame_rate: None,
                sample_rate: Some(AUDIO_SAMPLE_RATE),
                channels: Some(1),
            },
        ]
    }

    fn is_live(&self) -> bool {
        self.live && self.lost_after.map_or(true, |after| self.started.elapsed() < after)
    }

    fn read_frames(&mut self) -> Vec<MediaFrame> {
        if !self.is_live() || self.silent {
            return Vec::new();
        }

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let video_due = elapsed_ms * self.frame_rate / 1000;
        let audio_due = elapsed_ms / AUDIO_FRAME_MS;

        let mut frames: Vec<MediaFrame> = (self.next_video..video_due)
            .map(|i| self.video_frame(i))
            .chain((self.next_audio..audio_due).map(|i| self.audio_frame(i)))
            .collect();
        frames.sort_by_key(|f| f.timestamp_ms);

        self.next_video = self.next_video.max(video_due);
        self.next_audio = self.next_audio.max(audio_due);
        frames
    }

    fn stop_tracks(&mut self) {
        self.live = false;
        self.usage.released.fetch_add(1, Ordering::SeqCst);
    }
}

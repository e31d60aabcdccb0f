//! Webcam and microphone capture using nokhwa and cpal
//!
//! The camera and the input stream are opened on a dedicated capture thread
//! that owns both for their whole life; neither is `Send` on every platform.
//! Frames are handed over untouched in the camera's native pixel format, and
//! microphone samples are converted to 16-bit PCM.

use super::traits::{
    CaptureConstraints, CaptureDevice, CaptureStream, DeviceError, FrameEncoding, MediaFrame,
    TrackInfo, TrackKind,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Instant;

/// List the cameras the OS exposes as `(index, name)`
pub fn list_cameras() -> Vec<(u32, String)> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .filter_map(|info| match info.index() {
                CameraIndex::Index(i) => Some((*i, info.human_name())),
                CameraIndex::String(s) => s.parse().ok().map(|i| (i, info.human_name())),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// The camera at `index` paired with the default microphone
#[derive(Debug, Clone)]
pub struct NativeCamera {
    name: String,
    index: u32,
}

impl NativeCamera {
    pub fn new(index: u32) -> Self {
        let name = list_cameras()
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| name)
            .unwrap_or_else(|| format!("Camera {index}"));
        Self { name, index }
    }
}

#[async_trait]
impl CaptureDevice for NativeCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let index = self.index;
        let constraints = constraints.clone();
        // A stream opened after the caller gave up is dropped here, which stops it
        let stream = tokio::task::spawn_blocking(move || NativeStream::start(index, constraints))
            .await
            .map_err(|e| DeviceError::Unavailable(format!("capture thread panicked: {e}")))??;
        Ok(Box::new(stream))
    }
}

fn device_error(err: NokhwaError) -> DeviceError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("authoriz") {
        DeviceError::PermissionDenied(message)
    } else {
        DeviceError::Unavailable(message)
    }
}

fn frame_encoding(format: FrameFormat) -> FrameEncoding {
    match format {
        FrameFormat::YUYV => FrameEncoding::Yuyv422,
        FrameFormat::NV12 => FrameEncoding::Nv12,
        FrameFormat::RAWRGB => FrameEncoding::Rgb24,
        FrameFormat::MJPEG => FrameEncoding::Mjpeg,
        other => {
            tracing::warn!("Unknown camera format {:?}, falling back to yuyv422", other);
            FrameEncoding::Yuyv422
        }
    }
}

/// State shared between the capture thread and the stream
#[derive(Default)]
struct Shared {
    frames: Mutex<Vec<MediaFrame>>,
    /// Cleared to ask the capture thread to stop
    running: AtomicBool,
    /// Cleared by the capture thread when the camera stops delivering
    healthy: AtomicBool,
}

impl Shared {
    fn push(&self, frame: MediaFrame) {
        if self.running.load(Ordering::Relaxed) {
            self.frames.lock().push(frame);
        }
    }
}

struct NativeStream {
    tracks: Vec<TrackInfo>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl NativeStream {
    /// Open camera and microphone on a new capture thread and wait until both run
    fn start(index: u32, constraints: CaptureConstraints) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::SeqCst);
        shared.healthy.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let thread = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || capture_loop(index, constraints, shared, ready_tx))
                .map_err(|e| DeviceError::Unavailable(format!("failed to spawn capture thread: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(tracks)) => Ok(Self {
                tracks,
                shared,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Unavailable("capture thread exited".to_string()))
            }
        }
    }
}

impl CaptureStream for NativeStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn is_live(&self) -> bool {
        self.thread.is_some()
            && self.shared.running.load(Ordering::SeqCst)
            && self.shared.healthy.load(Ordering::SeqCst)
    }

    fn read_frames(&mut self) -> Vec<MediaFrame> {
        let mut frames = std::mem::take(&mut *self.shared.frames.lock());
        frames.sort_by_key(|f| f.timestamp_ms);
        frames
    }

    fn stop_tracks(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Camera capture thread panicked");
            }
        }
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

fn open_camera(index: u32, constraints: &CaptureConstraints) -> Result<Camera, DeviceError> {
    let known = list_cameras();
    if known.is_empty() {
        return Err(DeviceError::NotFound("No cameras found".to_string()));
    }
    if !known.iter().any(|(i, _)| *i == index) {
        return Err(DeviceError::NotFound(format!(
            "no camera at index {index} ({} available)",
            known.len()
        )));
    }

    let closest = CameraFormat::new(
        Resolution::new(constraints.width, constraints.height),
        FrameFormat::MJPEG,
        constraints.frame_rate,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(closest));
    let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(device_error)?;
    camera.open_stream().map_err(device_error)?;
    Ok(camera)
}

fn stream_error(err: cpal::StreamError) {
    tracing::error!("Microphone stream error: {}", err);
}

fn push_samples(shared: &Shared, started: Instant, samples: impl Iterator<Item = i16>) {
    let data: Vec<u8> = samples.flat_map(i16::to_le_bytes).collect();
    shared.push(MediaFrame {
        kind: TrackKind::Audio,
        timestamp_ms: started.elapsed().as_millis() as u64,
        keyframe: true,
        data,
    });
}

/// Start the default input device; the returned stream must stay on this thread
fn open_microphone(
    shared: Arc<Shared>,
    started: Instant,
) -> Result<(cpal::Stream, TrackInfo), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DeviceError::NotFound("No microphone found".to_string()))?;
    let label = device.name().unwrap_or_else(|_| "Microphone".to_string());
    let supported = device
        .default_input_config()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                push_samples(&shared, started, samples);
            },
            stream_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_samples(&shared, started, data.iter().copied());
            },
            stream_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|s| (*s as i32 - 32_768) as i16);
                push_samples(&shared, started, samples);
            },
            stream_error,
            None,
        ),
        other => {
            return Err(DeviceError::Overconstrained(format!(
                "microphone sample format {other:?} is not supported"
            )))
        }
    }
    .map_err(|e| match e {
        BuildStreamError::DeviceNotAvailable => DeviceError::NotFound(label.clone()),
        other => DeviceError::Unavailable(other.to_string()),
    })?;
    stream
        .play()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

    let track = TrackInfo {
        id: "microphone".to_string(),
        kind: TrackKind::Audio,
        label,
        encoding: FrameEncoding::PcmS16le,
        width: None,
        height: None,
        frame_rate: None,
        sample_rate: Some(config.sample_rate.0),
        channels: Some(config.channels.min(u8::MAX as u16) as u8),
    };
    Ok((stream, track))
}

fn capture_loop(
    index: u32,
    constraints: CaptureConstraints,
    shared: Arc<Shared>,
    ready: mpsc::SyncSender<Result<Vec<TrackInfo>, DeviceError>>,
) {
    let mut camera = match open_camera(index, &constraints) {
        Ok(camera) => camera,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let format = camera.camera_format();
    let video = TrackInfo {
        id: format!("camera-{index}"),
        kind: TrackKind::Video,
        label: camera.info().human_name(),
        encoding: frame_encoding(format.format()),
        width: Some(format.resolution().width()),
        height: Some(format.resolution().height()),
        frame_rate: Some(format.frame_rate()),
        sample_rate: None,
        channels: None,
    };
    tracing::info!(
        "Webcam opened: {}x{} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
        format.resolution().width(),
        format.resolution().height(),
        format.frame_rate(),
        format.format(),
        constraints.width,
        constraints.height,
        constraints.frame_rate
    );
    if constraints.echo_cancellation || constraints.noise_suppression {
        tracing::debug!("Echo cancellation and noise suppression are not applied to native input");
    }

    let started = Instant::now();
    let (microphone, audio) = match open_microphone(shared.clone(), started) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = camera.stop_stream();
            let _ = ready.send(Err(err));
            return;
        }
    };

    if ready.send(Ok(vec![video, audio])).is_err() {
        drop(microphone);
        let _ = camera.stop_stream();
        return;
    }

    let mut frame_count: u64 = 0;
    while shared.running.load(Ordering::SeqCst) {
        // Blocks until the camera delivers the next frame
        match camera.frame() {
            Ok(frame) => {
                shared.push(MediaFrame {
                    kind: TrackKind::Video,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                    keyframe: true,
                    data: frame.buffer().to_vec(),
                });
                frame_count += 1;
            }
            Err(e) => {
                tracing::error!("Camera stopped delivering frames: {}", e);
                shared.healthy.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    drop(microphone);
    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {}", e);
    }
    tracing::info!("Webcam capture stopped after {} frames", frame_count);
}

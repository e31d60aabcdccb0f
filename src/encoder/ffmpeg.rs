//! FFmpeg-backed WebM encoder for raw capture sources
//!
//! Raw frames are piped into an `ffmpeg` child process as they are read: video
//! on stdin, audio over a loopback TCP connection that ffmpeg opens as its
//! second input. ffmpeg compresses to VP9/Opus and writes a live WebM stream to
//! stdout, which a reader thread buffers until the next flush. Each input is fed
//! by its own thread so a slow ffmpeg never blocks the segmenter.

use super::{EncoderError, EncoderSettings, MediaEncoder};
use crate::artifact::ContainerFormat;
use crate::capture::{CaptureHandle, FrameEncoding, MediaFrame, TrackInfo, TrackKind};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 64 * 1024;

/// How long ffmpeg gets to connect to the audio socket
const AUDIO_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that `program` runs and reports a version
pub fn ffmpeg_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Bytes in one raw video frame, when the layout has a fixed size
fn video_frame_len(encoding: FrameEncoding, width: u32, height: u32) -> Option<usize> {
    let pixels = width as usize * height as usize;
    match encoding {
        FrameEncoding::Yuyv422 => Some(pixels * 2),
        FrameEncoding::Nv12 => Some(pixels * 3 / 2),
        FrameEncoding::Rgb24 => Some(pixels * 3),
        _ => None,
    }
}

fn video_input(track: &TrackInfo) -> Result<Vec<String>, EncoderError> {
    let (Some(width), Some(height)) = (track.width, track.height) else {
        return Err(EncoderError::Unsupported(format!(
            "video track {:?} has no dimensions",
            track.label
        )));
    };
    let frame_rate = track.frame_rate.unwrap_or(30).to_string();

    let args = match track.encoding {
        FrameEncoding::Mjpeg => vec!["-f", "mjpeg", "-framerate", frame_rate.as_str()],
        FrameEncoding::Yuyv422 | FrameEncoding::Nv12 | FrameEncoding::Rgb24 => {
            let pixel_format = match track.encoding {
                FrameEncoding::Yuyv422 => "yuyv422",
                FrameEncoding::Nv12 => "nv12",
                _ => "rgb24",
            };
            vec!["-f", "rawvideo", "-pixel_format", pixel_format, "-framerate", frame_rate.as_str()]
        }
        other => {
            return Err(EncoderError::Unsupported(format!(
                "video track {:?} carries {:?} frames",
                track.label, other
            )))
        }
    };
    let mut args: Vec<String> = args.into_iter().map(str::to_string).collect();
    if track.encoding != FrameEncoding::Mjpeg {
        args.extend(["-video_size".to_string(), format!("{width}x{height}")]);
    }
    Ok(args)
}

fn audio_input(track: &TrackInfo) -> Result<Vec<String>, EncoderError> {
    if track.encoding != FrameEncoding::PcmS16le {
        return Err(EncoderError::Unsupported(format!(
            "audio track {:?} carries {:?} frames",
            track.label, track.encoding
        )));
    }
    Ok(vec![
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        track.sample_rate.unwrap_or(48_000).to_string(),
        "-ac".to_string(),
        track.channels.unwrap_or(1).to_string(),
    ])
}

/// Command line for one ffmpeg run
///
/// Video reads stdin. Audio reads `tcp://127.0.0.1:<audio_port>` when there is
/// also video, and stdin otherwise.
pub(crate) fn ffmpeg_args(
    settings: &EncoderSettings,
    video: Option<&TrackInfo>,
    audio: Option<&TrackInfo>,
    audio_port: Option<u16>,
) -> Result<Vec<String>, EncoderError> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut maps = Vec::new();
    let mut codecs = Vec::new();

    if let Some(track) = video {
        args.extend(video_input(track)?);
        args.extend(["-i".to_string(), "pipe:0".to_string()]);
        maps.push(format!("{}:v", maps.len()));

        let gop = (track.frame_rate.unwrap_or(30) * 2).to_string();
        codecs.extend(
            [
                "-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1",
                "-pix_fmt", "yuv420p", "-g", gop.as_str(), "-b:v",
            ]
            .into_iter()
            .map(str::to_string),
        );
        codecs.push(settings.video_bits_per_second.to_string());
    }

    if let Some(track) = audio {
        args.extend(audio_input(track)?);
        let source = match (video, audio_port) {
            (None, _) => "pipe:0".to_string(),
            (Some(_), Some(port)) => format!("tcp://127.0.0.1:{port}"),
            (Some(_), None) => {
                return Err(EncoderError::Unsupported(
                    "audio alongside video needs a socket".to_string(),
                ))
            }
        };
        args.extend(["-i".to_string(), source]);
        maps.push(format!("{}:a", maps.len()));

        codecs.extend(["-c:a", "libopus", "-b:a"].into_iter().map(str::to_string));
        codecs.push(settings.audio_bits_per_second.to_string());
    }

    if maps.is_empty() {
        return Err(EncoderError::NoTracks);
    }
    for map in maps {
        args.extend(["-map".to_string(), map]);
    }
    args.extend(codecs);
    args.extend(
        ["-f", "webm", "-live", "1", "-cluster_time_limit"]
            .into_iter()
            .map(str::to_string),
    );
    args.push(settings.timeslice_ms.to_string());
    args.push("pipe:1".to_string());
    Ok(args)
}

/// Copy queued frames into `sink` until the queue closes
fn feed(mut sink: impl Write, frames: mpsc::Receiver<Vec<u8>>, track: &'static str) {
    for data in frames {
        if let Err(e) = sink.write_all(&data) {
            tracing::warn!("FFmpeg stopped accepting {} frames: {}", track, e);
            return;
        }
    }
    let _ = sink.flush();
}

/// Wait for ffmpeg to connect, then feed it audio
fn feed_socket(listener: TcpListener, frames: mpsc::Receiver<Vec<u8>>) {
    let deadline = Instant::now() + AUDIO_CONNECT_TIMEOUT;
    if let Err(e) = listener.set_nonblocking(true) {
        tracing::error!("Failed to configure audio socket: {}", e);
        return;
    }
    let stream = loop {
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == ErrorKind::WouldBlock && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                tracing::error!("FFmpeg never connected for audio: {}", e);
                return;
            }
        }
    };
    if let Err(e) = stream.set_nonblocking(false) {
        tracing::error!("Failed to configure audio socket: {}", e);
        return;
    }
    feed(stream, frames, "audio");
}

/// A running ffmpeg and the threads around it
struct Process {
    child: Child,
    video_tx: Option<mpsc::Sender<Vec<u8>>>,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    video_frame_len: Option<usize>,
    writers: Vec<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
    output: Arc<Mutex<Vec<u8>>>,
    frames_written: u64,
    done: bool,
}

impl Process {
    fn spawn(
        settings: &EncoderSettings,
        video: Option<&TrackInfo>,
        audio: Option<&TrackInfo>,
    ) -> Result<Self, EncoderError> {
        let listener = match (video, audio) {
            (Some(_), Some(_)) => Some(
                TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                    .map_err(|e| EncoderError::Process(format!("Failed to open audio socket: {e}")))?,
            ),
            _ => None,
        };
        let audio_port = listener
            .as_ref()
            .map(|l| l.local_addr().map(|addr| addr.port()))
            .transpose()
            .map_err(|e| EncoderError::Process(format!("Failed to open audio socket: {e}")))?;

        let args = ffmpeg_args(settings, video, audio, audio_port)?;
        tracing::debug!("Spawning {} {}", settings.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EncoderError::Process(format!("Failed to start {}: {}", settings.ffmpeg_path, e))
            })?;

        let (Some(stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncoderError::Process("Failed to capture FFmpeg pipes".to_string()));
        };

        let output = Arc::new(Mutex::new(Vec::new()));
        let reader = {
            let output = output.clone();
            std::thread::spawn(move || {
                let mut chunk = vec![0u8; READ_CHUNK];
                loop {
                    match stdout.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => output.lock().extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::warn!("Failed to read FFmpeg output: {}", e);
                            break;
                        }
                    }
                }
            })
        };
        let stderr = std::thread::spawn(move || {
            let mut message = String::new();
            let _ = stderr.read_to_string(&mut message);
            message
        });

        let mut writers = Vec::new();
        let mut stdin = Some(stdin);
        let video_tx = video.and_then(|_| stdin.take()).map(|sink| {
            let (tx, rx) = mpsc::channel();
            writers.push(std::thread::spawn(move || feed(sink, rx, "video")));
            tx
        });
        let audio_tx = audio.map(|_| {
            let (tx, rx) = mpsc::channel();
            match (listener, stdin.take()) {
                (Some(listener), _) => writers.push(std::thread::spawn(move || feed_socket(listener, rx))),
                (None, Some(sink)) => writers.push(std::thread::spawn(move || feed(sink, rx, "audio"))),
                (None, None) => {}
            }
            tx
        });

        Ok(Self {
            child,
            video_tx,
            audio_tx,
            video_frame_len: video.and_then(|t| {
                video_frame_len(t.encoding, t.width.unwrap_or(0), t.height.unwrap_or(0))
            }),
            writers,
            reader: Some(reader),
            stderr: Some(stderr),
            output,
            frames_written: 0,
            done: false,
        })
    }

    fn push(&mut self, frame: MediaFrame) -> Result<(), EncoderError> {
        let tx = match frame.kind {
            TrackKind::Video => {
                if let Some(expected) = self.video_frame_len {
                    if frame.data.len() != expected {
                        tracing::warn!(
                            "Dropping video frame of {} bytes, expected {}",
                            frame.data.len(),
                            expected
                        );
                        return Ok(());
                    }
                }
                &self.video_tx
            }
            TrackKind::Audio => &self.audio_tx,
        };
        let Some(tx) = tx else {
            return Ok(());
        };
        if tx.send(frame.data).is_err() {
            return Err(self.exited());
        }
        self.frames_written += 1;
        Ok(())
    }

    fn exited(&mut self) -> EncoderError {
        match self.child.try_wait() {
            Ok(Some(status)) => EncoderError::Process(format!("FFmpeg exited early with {status}")),
            _ => EncoderError::Process("FFmpeg stopped reading input".to_string()),
        }
    }

    fn check_running(&mut self) -> Result<(), EncoderError> {
        match self.child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(_)) => Err(self.exited()),
            Err(e) => Err(EncoderError::Process(e.to_string())),
        }
    }

    fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }

    /// Close the inputs and wait for ffmpeg to flush everything it buffered
    fn close(&mut self) -> Result<Vec<u8>, EncoderError> {
        self.done = true;
        self.video_tx = None;
        self.audio_tx = None;
        for writer in self.writers.drain(..) {
            let _ = writer.join();
        }

        let status = self
            .child
            .wait()
            .map_err(|e| EncoderError::Process(format!("Failed to wait for FFmpeg: {e}")))?;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            tracing::warn!("FFmpeg exited with status {}: {}", status, stderr.trim());
            return Err(EncoderError::Process(format!(
                "FFmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }
        tracing::info!("FFmpeg finished: {} frames written", self.frames_written);
        Ok(self.drain())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if !self.done {
            self.video_tx = None;
            self.audio_tx = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// WebM encoder that hands raw frames to ffmpeg
pub struct FfmpegEncoder {
    settings: EncoderSettings,
    process: Option<Process>,
}

impl FfmpegEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            process: None,
        }
    }
}

impl MediaEncoder for FfmpegEncoder {
    fn container(&self) -> ContainerFormat {
        self.settings.container
    }

    fn start(&mut self, handle: &CaptureHandle) -> Result<(), EncoderError> {
        if !handle.is_live() {
            return Err(EncoderError::DeadHandle);
        }
        let tracks = handle.tracks();
        if tracks.is_empty() {
            return Err(EncoderError::NoTracks);
        }
        let video = tracks.iter().find(|t| t.kind == TrackKind::Video);
        let audio = tracks.iter().find(|t| t.kind == TrackKind::Audio);

        self.process = Some(Process::spawn(&self.settings, video, audio)?);

        tracing::info!(
            "FFmpeg encoder started: {} @ {} bps video, {} bps audio, flushing every {}ms",
            self.settings.container.mime_type(),
            self.settings.video_bits_per_second,
            self.settings.audio_bits_per_second,
            self.settings.timeslice_ms
        );
        Ok(())
    }

    fn encode(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError> {
        let process = self.process.as_mut().ok_or(EncoderError::NotStarted)?;
        if !handle.is_live() {
            return Err(EncoderError::DeadHandle);
        }
        for frame in handle.read_frames() {
            process.push(frame)?;
        }
        process.check_running()?;
        Ok(process.drain())
    }

    /// Blocks until ffmpeg has written its last cluster
    fn finish(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError> {
        let mut process = self.process.take().ok_or(EncoderError::NotStarted)?;
        for frame in handle.read_frames() {
            process.push(frame)?;
        }
        process.close()
    }
}

//! Live WebM muxer
//!
//! Writes the stream the way a live recorder does: EBML header, a Segment of
//! unknown size, Info without Duration, Tracks, then one Cluster per flush.
//! Nothing is written until the first frame arrives.
//!
//! Frames are copied into SimpleBlocks untouched, so every track must already
//! be compressed; raw sources go through [`super::FfmpegEncoder`] instead.

use super::{EncoderError, EncoderSettings, MediaEncoder};
use crate::artifact::ebml;
use crate::artifact::webm::*;
use crate::artifact::ContainerFormat;
use crate::capture::{CaptureHandle, MediaFrame, TrackInfo, TrackKind};

const VIDEO_TRACK: u8 = 1;
const AUDIO_TRACK: u8 = 2;
const APP_NAME: &str = concat!("consult-recorder/", env!("CARGO_PKG_VERSION"));

pub struct WebmEncoder {
    settings: EncoderSettings,
    video: Option<TrackInfo>,
    audio: Option<TrackInfo>,
    started: bool,
    header_written: bool,
}

impl WebmEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            video: None,
            audio: None,
            started: false,
            header_written: false,
        }
    }

    fn track_number(&self, kind: TrackKind) -> Option<u8> {
        match kind {
            TrackKind::Video => self.video.as_ref().map(|_| VIDEO_TRACK),
            TrackKind::Audio => self.audio.as_ref().map(|_| AUDIO_TRACK),
        }
    }

    fn header(&self) -> Vec<u8> {
        let ebml_header = ebml::element(
            EBML,
            &[
                ebml::uint_element(EBML_VERSION, 1),
                ebml::uint_element(EBML_READ_VERSION, 1),
                ebml::uint_element(EBML_MAX_ID_LENGTH, 4),
                ebml::uint_element(EBML_MAX_SIZE_LENGTH, 8),
                ebml::string_element(DOC_TYPE, "webm"),
                ebml::uint_element(DOC_TYPE_VERSION, 4),
                ebml::uint_element(DOC_TYPE_READ_VERSION, 2),
            ]
            .concat(),
        );

        let info = ebml::element(
            INFO,
            &[
                ebml::uint_element(TIMECODE_SCALE, DEFAULT_TIMECODE_SCALE),
                ebml::string_element(MUXING_APP, APP_NAME),
                ebml::string_element(WRITING_APP, APP_NAME),
            ]
            .concat(),
        );

        let mut entries = Vec::new();
        if let Some(video) = &self.video {
            let mut settings = Vec::new();
            if let Some(width) = video.width {
                settings.extend(ebml::uint_element(PIXEL_WIDTH, width as u64));
            }
            if let Some(height) = video.height {
                settings.extend(ebml::uint_element(PIXEL_HEIGHT, height as u64));
            }
            entries.extend(ebml::element(
                TRACK_ENTRY,
                &[
                    ebml::uint_element(TRACK_NUMBER, VIDEO_TRACK as u64),
                    ebml::uint_element(TRACK_UID, VIDEO_TRACK as u64),
                    ebml::uint_element(TRACK_TYPE, 1),
                    ebml::string_element(CODEC_ID, video.encoding.codec_id().unwrap_or("V_VP9")),
                    ebml::element(VIDEO, &settings),
                ]
                .concat(),
            ));
        }
        if let Some(audio) = &self.audio {
            let settings = [
                ebml::float_element(SAMPLING_FREQUENCY, audio.sample_rate.unwrap_or(48_000) as f64),
                ebml::uint_element(CHANNELS, audio.channels.unwrap_or(1) as u64),
            ]
            .concat();
            entries.extend(ebml::element(
                TRACK_ENTRY,
                &[
                    ebml::uint_element(TRACK_NUMBER, AUDIO_TRACK as u64),
                    ebml::uint_element(TRACK_UID, AUDIO_TRACK as u64),
                    ebml::uint_element(TRACK_TYPE, 2),
                    ebml::string_element(CODEC_ID, audio.encoding.codec_id().unwrap_or("A_OPUS")),
                    ebml::element(AUDIO, &settings),
                ]
                .concat(),
            ));
        }

        let mut out = ebml_header;
        out.extend(ebml::encode_id(SEGMENT));
        out.extend(ebml::unknown_size());
        out.extend(info);
        out.extend(ebml::element(TRACKS, &entries));
        out
    }

    fn cluster(&self, frames: &[(u8, &MediaFrame)]) -> Vec<u8> {
        let base = frames.first().map_or(0, |(_, f)| f.timestamp_ms);
        let mut body = ebml::uint_element(TIMECODE, base);
        for (track, frame) in frames {
            let relative = frame.timestamp_ms.saturating_sub(base) as i16;
            let mut block = Vec::with_capacity(frame.data.len() + 4);
            block.push(0x80 | track);
            block.extend_from_slice(&relative.to_be_bytes());
            block.push(if frame.keyframe { 0x80 } else { 0x00 });
            block.extend_from_slice(&frame.data);
            body.extend(ebml::element(SIMPLE_BLOCK, &block));
        }
        ebml::element(CLUSTER, &body)
    }

    fn mux(&mut self, frames: Vec<MediaFrame>) -> Vec<u8> {
        let routed: Vec<(u8, &MediaFrame)> = frames
            .iter()
            .filter_map(|f| self.track_number(f.kind).map(|n| (n, f)))
            .collect();
        if routed.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        if !self.header_written {
            out.extend(self.header());
            self.header_written = true;
        }

        // Block timecodes are signed 16-bit offsets from the cluster timecode
        let mut start = 0;
        while start < routed.len() {
            let base = routed[start].1.timestamp_ms;
            let end = routed[start..]
                .iter()
                .position(|(_, f)| f.timestamp_ms.saturating_sub(base) > i16::MAX as u64)
                .map_or(routed.len(), |offset| start + offset);
            out.extend(self.cluster(&routed[start..end]));
            start = end;
        }
        out
    }
}

impl MediaEncoder for WebmEncoder {
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
        if let Some(track) = tracks.iter().find(|t| !t.encoding.is_compressed()) {
            return Err(EncoderError::Unsupported(format!(
                "{} track {:?} carries {:?} frames",
                self.settings.container.mime_type(),
                track.label,
                track.encoding
            )));
        }

        self.video = tracks.iter().find(|t| t.kind == TrackKind::Video).cloned();
        self.audio = tracks.iter().find(|t| t.kind == TrackKind::Audio).cloned();
        self.started = true;

        tracing::info!(
            "Encoder started: {} @ {} bps, flushing every {}ms",
            self.settings.container.mime_type(),
            self.settings.video_bits_per_second,
            self.settings.timeslice_ms
        );
        Ok(())
    }

    fn encode(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError> {
        if !self.started {
            return Err(EncoderError::NotStarted);
        }
        if !handle.is_live() {
            return Err(EncoderError::DeadHandle);
        }
        let frames = handle.read_frames();
        Ok(self.mux(frames))
    }

    fn finish(&mut self, handle: &mut CaptureHandle) -> Result<Vec<u8>, EncoderError> {
        let tail = self.encode(handle)?;
        self.started = false;
        Ok(tail)
    }
}

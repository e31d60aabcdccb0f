//! WebM duration correction
//!
//! Live recorders write the Segment with an unknown size and leave
//! `Info/Duration` out, since the length is not known until the end. Once the
//! whole artifact is assembled, [`fix_duration`] writes the real duration into
//! the Info element, adding it if absent.
//!
//! Inserting the element shifts every byte after Info. SeekHead/Cues offsets
//! are not rewritten; live recordings carry neither.

use super::ebml::{self, EbmlError, ElementHeader};
use thiserror::Error;

pub const EBML: u32 = 0x1A45_DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;
pub const SEGMENT: u32 = 0x1853_8067;
pub const INFO: u32 = 0x1549_A966;
pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const AUDIO: u32 = 0xE1;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;
pub const CLUSTER: u32 = 0x1F43_B675;
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Nanoseconds per tick when the Info element does not say otherwise
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Duration correction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationFixError {
    #[error("Malformed EBML: {0}")]
    Ebml(#[from] EbmlError),

    #[error("Artifact is not a WebM file")]
    NotWebm,

    #[error("WebM file has no Segment element")]
    MissingSegment,

    #[error("WebM segment has no Info element before its first cluster")]
    MissingInfo,
}

struct InfoLocation {
    segment: ElementHeader,
    info: ElementHeader,
    info_end: usize,
    timecode_scale: u64,
    /// Offset and length of an existing Duration payload
    duration: Option<(usize, usize)>,
}

fn locate_info(data: &[u8]) -> Result<InfoLocation, DurationFixError> {
    let header = ebml::read_header(data, 0)?;
    if header.id != EBML {
        return Err(DurationFixError::NotWebm);
    }
    let mut pos = header.end().ok_or(DurationFixError::NotWebm)?;

    let segment = loop {
        if pos >= data.len() {
            return Err(DurationFixError::MissingSegment);
        }
        let element = ebml::read_header(data, pos)?;
        if element.id == SEGMENT {
            break element;
        }
        pos = element.end().ok_or(DurationFixError::MissingSegment)?;
    };

    let segment_end = segment
        .end()
        .map_or(data.len(), |end| end.min(data.len()));
    let mut pos = segment.data_start();
    let info = loop {
        if pos >= segment_end {
            return Err(DurationFixError::MissingInfo);
        }
        let child = ebml::read_header(data, pos)?;
        if child.id == INFO {
            break child;
        }
        // An unknown-size child is a live cluster: Info would have come before it
        pos = child.end().ok_or(DurationFixError::MissingInfo)?;
    };

    let info_end = info.end().ok_or(DurationFixError::MissingInfo)?;
    if info_end > data.len() {
        return Err(EbmlError::UnexpectedEof(data.len()).into());
    }

    let mut timecode_scale = DEFAULT_TIMECODE_SCALE;
    let mut duration = None;
    let mut pos = info.data_start();
    while pos < info_end {
        let child = ebml::read_header(data, pos)?;
        let end = child.end().ok_or(DurationFixError::MissingInfo)?;
        if end > info_end {
            return Err(EbmlError::UnexpectedEof(info_end).into());
        }
        match child.id {
            TIMECODE_SCALE => timecode_scale = ebml::read_uint(&data[child.data_start()..end]),
            DURATION => duration = Some((child.data_start(), end - child.data_start())),
            _ => {}
        }
        pos = end;
    }

    Ok(InfoLocation {
        segment,
        info,
        info_end,
        timecode_scale: if timecode_scale == 0 {
            DEFAULT_TIMECODE_SCALE
        } else {
            timecode_scale
        },
        duration,
    })
}

/// Duration recorded in the Info element, in seconds
pub fn read_duration(data: &[u8]) -> Result<Option<f64>, DurationFixError> {
    let location = locate_info(data)?;
    match location.duration {
        Some((start, len)) => {
            let ticks = ebml::read_float(&data[start..start + len])?;
            Ok(Some(ticks * location.timecode_scale as f64 / 1e9))
        }
        None => Ok(None),
    }
}

/// Write `duration_secs` into the artifact's Info element
pub fn fix_duration(data: &[u8], duration_secs: f64) -> Result<Vec<u8>, DurationFixError> {
    let location = locate_info(data)?;
    let ticks = duration_secs * 1e9 / location.timecode_scale as f64;

    // Rewrite in place when an 8-byte Duration already exists
    if let Some((start, 8)) = location.duration {
        let mut out = data.to_vec();
        out[start..start + 8].copy_from_slice(&ticks.to_be_bytes());
        return Ok(out);
    }

    let mut body = Vec::new();
    let mut pos = location.info.data_start();
    while pos < location.info_end {
        let child = ebml::read_header(data, pos)?;
        let end = child.end().ok_or(DurationFixError::MissingInfo)?;
        if child.id != DURATION {
            body.extend_from_slice(&data[pos..end]);
        }
        pos = end;
    }
    body.extend(ebml::float_element(DURATION, ticks));
    let new_info = ebml::element(INFO, &body);

    let old_info_len = location.info_end - location.info.offset;
    let segment = location.segment;

    let mut out = Vec::with_capacity(data.len() + new_info.len());
    out.extend_from_slice(&data[..segment.offset]);
    out.extend(ebml::encode_id(SEGMENT));
    match segment.size {
        Some(size) => {
            let resized = (size as i64 + new_info.len() as i64 - old_info_len as i64) as u64;
            out.extend(ebml::encode_size_fixed(resized, 8));
        }
        None => out.extend(ebml::unknown_size()),
    }
    out.extend_from_slice(&data[segment.data_start()..location.info.offset]);
    out.extend(new_info);
    out.extend_from_slice(&data[location.info_end..]);

    tracing::debug!(
        "Wrote WebM duration {:.3}s ({} ticks of {}ns)",
        duration_secs,
        ticks,
        location.timecode_scale
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let body = [
            ebml::uint_element(EBML_VERSION, 1),
            ebml::string_element(DOC_TYPE, "webm"),
        ]
        .concat();
        ebml::element(EBML, &body)
    }

    fn live_recording(info_body: &[u8]) -> Vec<u8> {
        let cluster = ebml::element(
            CLUSTER,
            &[ebml::uint_element(TIMECODE, 0), ebml::element(SIMPLE_BLOCK, &[0x81, 0, 0, 0x80, 7])].concat(),
        );
        let mut data = header();
        data.extend(ebml::encode_id(SEGMENT));
        data.extend(ebml::unknown_size());
        data.extend(ebml::element(INFO, info_body));
        data.extend(cluster);
        data
    }

    #[test]
    fn test_inserts_missing_duration() {
        let data = live_recording(&ebml::uint_element(TIMECODE_SCALE, 1_000_000));
        assert_eq!(read_duration(&data).unwrap(), None);

        let fixed = fix_duration(&data, 3.0).unwrap();
        assert_eq!(read_duration(&fixed).unwrap(), Some(3.0));
        // Clusters are carried over untouched
        assert!(fixed.ends_with(&data[data.len() - 12..]));
    }

    #[test]
    fn test_replaces_existing_duration_in_place() {
        let info = [
            ebml::uint_element(TIMECODE_SCALE, 1_000_000),
            ebml::float_element(DURATION, 0.0),
        ]
        .concat();
        let data = live_recording(&info);

        let fixed = fix_duration(&data, 42.0).unwrap();
        assert_eq!(fixed.len(), data.len());
        assert_eq!(read_duration(&fixed).unwrap(), Some(42.0));
    }

    #[test]
    fn test_honours_custom_timecode_scale() {
        let data = live_recording(&ebml::uint_element(TIMECODE_SCALE, 1_000));
        let fixed = fix_duration(&data, 2.0).unwrap();
        assert_eq!(read_duration(&fixed).unwrap(), Some(2.0));
    }

    #[test]
    fn test_known_segment_size_is_adjusted() {
        let info = ebml::element(INFO, &ebml::uint_element(TIMECODE_SCALE, 1_000_000));
        let mut data = header();
        data.extend(ebml::element(SEGMENT, &info));

        let fixed = fix_duration(&data, 5.0).unwrap();
        let segment = ebml::read_header(&fixed, header().len()).unwrap();
        assert_eq!(segment.end(), Some(fixed.len()));
        assert_eq!(read_duration(&fixed).unwrap(), Some(5.0));
    }

    #[test]
    fn test_rejects_non_webm() {
        let data = ebml::element(SEGMENT, &[]);
        assert_eq!(fix_duration(&data, 1.0), Err(DurationFixError::NotWebm));
    }

    #[test]
    fn test_rejects_cluster_before_info() {
        let mut data = header();
        data.extend(ebml::encode_id(SEGMENT));
        data.extend(ebml::unknown_size());
        data.extend(ebml::encode_id(CLUSTER));
        data.extend(ebml::unknown_size());
        assert_eq!(fix_duration(&data, 1.0), Err(DurationFixError::MissingInfo));
    }
}

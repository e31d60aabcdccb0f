//! Capture device acquisition
//!
//! This module provides the capture traits, the scoped device handle, the
//! native webcam + microphone pair (behind the `native` feature), and the
//! synthetic test-pattern camera.

pub mod handle;
#[cfg(feature = "native")]
pub mod native;
pub mod synthetic;
pub mod traits;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use handle::{acquire, CaptureHandle};
#[cfg(feature = "native")]
pub use native::{list_cameras, NativeCamera};
pub use synthetic::{DeviceUsage, SyntheticCamera};
pub use traits::{
    CaptureConstraints, CaptureDevice, CaptureStream, DeviceError, FacingMode, FrameEncoding,
    MediaFrame, TrackInfo, TrackKind,
};

/// Which capture device backs a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Webcam and default microphone
    Native,
    /// Generated test pattern, no hardware involved
    Synthetic,
}

impl Default for CaptureSource {
    fn default() -> Self {
        if cfg!(feature = "native") {
            CaptureSource::Native
        } else {
            CaptureSource::Synthetic
        }
    }
}

impl FromStr for CaptureSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(CaptureSource::Native),
            "synthetic" => Ok(CaptureSource::Synthetic),
            other => Err(format!(
                "unknown capture source {other:?}, expected \"native\" or \"synthetic\""
            )),
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Native => f.write_str("native"),
            CaptureSource::Synthetic => f.write_str("synthetic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names() {
        assert_eq!("native".parse::<CaptureSource>(), Ok(CaptureSource::Native));
        assert_eq!("Synthetic".parse::<CaptureSource>(), Ok(CaptureSource::Synthetic));
        assert!("screen".parse::<CaptureSource>().is_err());
        assert_eq!(CaptureSource::Native.to_string(), "native");
    }

    #[test]
    fn test_default_source_follows_build() {
        let expected = if cfg!(feature = "native") {
            CaptureSource::Native
        } else {
            CaptureSource::Synthetic
        };
        assert_eq!(CaptureSource::default(), expected);
    }
}

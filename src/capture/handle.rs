//! Scoped ownership of an acquired capture device
//!
//! A [`CaptureHandle`] holds the device for as long as it lives. Dropping it, or
//! calling [`CaptureHandle::release`], stops every track exactly once, whichever
//! exit path got there first.

use super::traits::{CaptureConstraints, CaptureDevice, CaptureStream, DeviceError, MediaFrame, TrackInfo};
use std::time::Duration;

/// Live handle to an acquired capture device
pub struct CaptureHandle {
    device: String,
    stream: Option<Box<dyn CaptureStream>>,
}

impl CaptureHandle {
    pub fn new(device: impl Into<String>, stream: Box<dyn CaptureStream>) -> Self {
        Self {
            device: device.into(),
            stream: Some(stream),
        }
    }

    /// Name of the device this handle holds
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_live(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_live())
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.stream.as_ref().map(|s| s.tracks()).unwrap_or_default()
    }

    /// Frames captured since the previous read; empty once released
    pub fn read_frames(&mut self) -> Vec<MediaFrame> {
        self.stream
            .as_mut()
            .map(|s| s.read_frames())
            .unwrap_or_default()
    }

    /// Stop all tracks and release the device
    pub fn release(mut self) {
        self.release_tracks();
    }

    fn release_tracks(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            tracing::info!(device = %self.device, "Capture device released");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release_tracks();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("device", &self.device)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Acquire a capture device, optionally bounded by a timeout
///
/// If the timeout fires, the pending open is dropped and nothing is held.
pub async fn acquire(
    device: &dyn CaptureDevice,
    constraints: &CaptureConstraints,
    timeout: Option<Duration>,
) -> Result<CaptureHandle, DeviceError> {
    tracing::debug!(
        device = device.name(),
        "Requesting capture device: {}x{} @ {}fps",
        constraints.width,
        constraints.height,
        constraints.frame_rate
    );

    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, device.open(constraints))
            .await
            .map_err(|_| DeviceError::Timeout(limit))??,
        None => device.open(constraints).await?,
    };

    let handle = CaptureHandle::new(device.name(), stream);
    tracing::info!(
        device = device.name(),
        "Capture device acquired with {} track(s)",
        handle.tracks().len()
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCamera;

    #[tokio::test]
    async fn test_release_happens_once() {
        let camera = SyntheticCamera::new();
        let usage = camera.usage();

        let handle = acquire(&camera, &CaptureConstraints::default(), None)
            .await
            .unwrap();
        assert!(handle.is_live());
        assert_eq!(usage.held(), 1);

        handle.release();
        assert_eq!(usage.released(), 1);
        assert_eq!(usage.held(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let camera = SyntheticCamera::new();
        let usage = camera.usage();

        {
            let _handle = acquire(&camera, &CaptureConstraints::default(), None)
                .await
                .unwrap();
            assert_eq!(usage.held(), 1);
        }

        assert_eq!(usage.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let camera = SyntheticCamera::new().with_open_delay(Duration::from_secs(30));
        let usage = camera.usage();

        let err = acquire(
            &camera,
            &CaptureConstraints::default(),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

        assert_eq!(err, DeviceError::Timeout(Duration::from_secs(5)));
        assert_eq!(usage.acquired(), 0);
    }
}

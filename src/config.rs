use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{CaptureConstraints, CaptureDevice, CaptureSource, DeviceError, SyntheticCamera};
use crate::encoder::EncoderSettings;

/// Looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "consult-recorder.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub encoder: EncoderSettings,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Unset means requests never time out
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub source: CaptureSource,
    /// Index of the webcam to open, as the OS enumerates them
    #[serde(default)]
    pub camera_index: u32,
    #[serde(flatten)]
    pub constraints: CaptureConstraints,
    /// Unset means wait for the device as long as it takes
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_url() -> String {
    env::var("CONSULT_API_URL").unwrap_or_else(|_| "http://localhost:5000/api".to_string())
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl CaptureConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }

    /// The capture device this section selects
    pub fn device(&self) -> Result<Arc<dyn CaptureDevice>, DeviceError> {
        match self.source {
            CaptureSource::Synthetic => Ok(Arc::new(SyntheticCamera::new())),
            #[cfg(feature = "native")]
            CaptureSource::Native => Ok(Arc::new(crate::capture::NativeCamera::new(self.camera_index))),
            #[cfg(not(feature = "native"))]
            CaptureSource::Native => Err(DeviceError::Unavailable(
                "built without native capture; rebuild with `--features native` or set capture.source = \"synthetic\"".to_string(),
            )),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if present, or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Config::default());
                }
                fallback
            }
        };
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend.base_url.trim().is_empty() {
            anyhow::bail!("backend.base_url must not be empty");
        }
        if self.encoder.timeslice_ms == 0 {
            anyhow::bail!("encoder.timeslice_ms must be greater than zero");
        }
        if self.capture.constraints.width == 0 || self.capture.constraints.height == 0 {
            anyhow::bail!("capture width and height must be greater than zero");
        }
        if self.capture.source == CaptureSource::Native && !cfg!(feature = "native") {
            anyhow::bail!("capture.source = \"native\" needs a build with the `native` feature");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FacingMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.encoder.timeslice_ms, 1000);
        assert_eq!(config.encoder.video_bits_per_second, 3_500_000);
        assert_eq!(config.capture.constraints, CaptureConstraints::default());
        assert_eq!(config.capture.acquire_timeout(), None);
        assert_eq!(config.backend.request_timeout(), None);
        assert_eq!(config.delivery.download_dir, PathBuf::from("./recordings"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::parse(
            r#"
            [backend]
            base_url = "https://consult.example.org/api"
            request_timeout_secs = 30

            [capture]
            source = "synthetic"
            camera_index = 2
            width = 1280
            height = 720
            facing_mode = "environment"
            acquire_timeout_secs = 10

            [encoder]
            timeslice_ms = 500

            [delivery]
            download_dir = "/tmp/consults"

            [log]
            level = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.base_url, "https://consult.example.org/api");
        assert_eq!(config.backend.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.capture.source, CaptureSource::Synthetic);
        assert_eq!(config.capture.camera_index, 2);
        assert_eq!(config.capture.constraints.width, 1280);
        assert_eq!(config.capture.constraints.facing_mode, FacingMode::Environment);
        assert!(config.capture.constraints.echo_cancellation);
        assert_eq!(config.capture.acquire_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.encoder.timeslice_ms, 500);
        assert_eq!(config.delivery.download_dir, PathBuf::from("/tmp/consults"));
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_capture_source_selects_device() {
        let config = Config::parse("[capture]\nsource = \"synthetic\"\n").unwrap();
        assert_eq!(config.capture.device().unwrap().name(), "Synthetic Camera");
        assert!(config.validate().is_ok());

        let config = Config::parse("[capture]\nsource = \"native\"\n").unwrap();
        assert_eq!(config.capture.source, CaptureSource::Native);
        if !cfg!(feature = "native") {
            assert!(matches!(config.capture.device(), Err(DeviceError::Unavailable(_))));
            assert!(config.validate().is_err());
        }

        assert!(Config::parse("[capture]\nsource = \"screen\"\n").is_err());
    }

    #[test]
    fn test_zero_timeslice_is_rejected() {
        let config = Config::parse("[encoder]\ntimeslice_ms = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

//! Pipeline configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClipweaveError, ClipweaveResult};

/// Process-wide configuration for the composition pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Format every clip is normalized to before joining.
    pub canonical: CanonicalFormat,

    /// Fixed encoder settings for the final output.
    pub encoding: EncodingConfig,

    /// Silence-strip thresholds.
    pub silence: SilenceConfig,

    /// Per-step time budgets.
    pub timeouts: TimeoutConfig,

    /// Progress windows for each export phase.
    pub progress: ProgressWindows,

    /// Thumbnail extraction settings.
    pub frame: FrameConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Canonical resolution, frame rate, and sample format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: String,
    pub audio_sample_rate: u32,
    pub audio_channel_layout: String,
}

/// Encoder settings. These are not negotiated per export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
}

/// Silence detection parameters for `remove_silence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// Level below which audio counts as silence (dBFS).
    pub threshold_db: f64,
    /// Minimum run of silence that gets removed (seconds).
    pub min_duration_secs: f64,
}

/// Time budgets in milliseconds for each asynchronous step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fetch_ms: u64,
    pub engine_load_ms: u64,
    pub stage_ms: u64,
    pub exec_ms: u64,
    pub read_ms: u64,
    pub frame_metadata_ms: u64,
    pub frame_seek_ms: u64,
    pub frame_engine_ms: u64,
}

/// Overall progress window (start, end) for the staged phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressWindows {
    pub preparing: (f64, f64),
    pub concatenating: (f64, f64),
    pub finalizing: (f64, f64),
}

/// Thumbnail extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Distance from the end of the video to seek to (seconds).
    pub seek_epsilon_secs: f64,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipweave=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CanonicalFormat {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            pixel_format: "yuv420p".to_string(),
            audio_sample_rate: 44_100,
            audio_channel_layout: "stereo".to_string(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
        }
    }
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            min_duration_secs: 0.5,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_ms: 60_000,
            engine_load_ms: 30_000,
            stage_ms: 30_000,
            exec_ms: 600_000,
            read_ms: 30_000,
            frame_metadata_ms: 10_000,
            frame_seek_ms: 10_000,
            frame_engine_ms: 20_000,
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }

    pub fn engine_load(&self) -> Duration {
        Duration::from_millis(self.engine_load_ms)
    }

    pub fn stage(&self) -> Duration {
        Duration::from_millis(self.stage_ms)
    }

    pub fn exec(&self) -> Duration {
        Duration::from_millis(self.exec_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn frame_metadata(&self) -> Duration {
        Duration::from_millis(self.frame_metadata_ms)
    }

    pub fn frame_seek(&self) -> Duration {
        Duration::from_millis(self.frame_seek_ms)
    }

    pub fn frame_engine(&self) -> Duration {
        Duration::from_millis(self.frame_engine_ms)
    }
}

impl Default for ProgressWindows {
    fn default() -> Self {
        Self {
            preparing: (0.0, 45.0),
            concatenating: (45.0, 90.0),
            finalizing: (90.0, 100.0),
        }
    }
}

impl ProgressWindows {
    /// Map a fraction in `[0, 1]` into a window.
    pub fn scale(window: (f64, f64), fraction: f64) -> f64 {
        let (start, end) = window;
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            seek_epsilon_secs: 0.1,
            jpeg_quality: 85,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl PipelineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::from_file(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn from_file(path: &Path) -> ClipweaveResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> ClipweaveResult<()> {
        let canonical = &self.canonical;
        if canonical.width == 0 || canonical.height == 0 {
            return Err(ClipweaveError::config("canonical resolution must be non-zero"));
        }
        // yuv420p needs even dimensions
        if canonical.width % 2 != 0 || canonical.height % 2 != 0 {
            return Err(ClipweaveError::config(format!(
                "canonical resolution must be even, got {}x{}",
                canonical.width, canonical.height
            )));
        }
        if canonical.fps == 0 {
            return Err(ClipweaveError::config("canonical fps must be non-zero"));
        }
        if canonical.audio_sample_rate == 0 {
            return Err(ClipweaveError::config("audio sample rate must be non-zero"));
        }
        if self.encoding.crf > 51 {
            return Err(ClipweaveError::config(format!(
                "crf must be within 0..=51, got {}",
                self.encoding.crf
            )));
        }
        if !(1..=100).contains(&self.frame.jpeg_quality) {
            return Err(ClipweaveError::config("jpeg quality must be within 1..=100"));
        }
        for (name, (start, end)) in [
            ("preparing", self.progress.preparing),
            ("concatenating", self.progress.concatenating),
            ("finalizing", self.progress.finalizing),
        ] {
            if !(0.0..=100.0).contains(&start) || !(0.0..=100.0).contains(&end) || start > end {
                return Err(ClipweaveError::config(format!(
                    "progress window {name} ({start}, {end}) is not within 0..=100"
                )));
            }
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipweave").join("config.json")
}

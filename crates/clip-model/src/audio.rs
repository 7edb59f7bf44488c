//! Auxiliary audio overlay.

use serde::{Deserialize, Serialize};

use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use crate::source::MediaSource;

/// An audio track mixed on top of the composed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: MediaSource,

    /// Positive values delay the track; negative values skip into it.
    #[serde(default)]
    pub offset_ms: i64,

    /// Linear gain applied before mixing (1.0 = unchanged).
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    1.0
}

impl AudioTrack {
    pub fn new(source: MediaSource) -> Self {
        Self {
            source,
            offset_ms: 0,
            volume: 1.0,
        }
    }

    pub fn with_offset_ms(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Seconds cut from the head of the track before mixing.
    pub fn skip_secs(&self) -> f64 {
        if self.offset_ms < 0 {
            self.offset_ms.unsigned_abs() as f64 / 1000.0
        } else {
            0.0
        }
    }

    /// Milliseconds of silence inserted before the track starts.
    pub fn delay_ms(&self) -> u64 {
        self.offset_ms.max(0) as u64
    }

    pub fn validate(&self) -> ClipweaveResult<()> {
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(ClipweaveError::validation(format!(
                "audio track volume must be a non-negative number, got {}",
                self.volume
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> AudioTrack {
        AudioTrack::new(MediaSource::file("/music/bed.mp3"))
    }

    #[test]
    fn test_negative_offset_skips_into_track() {
        let t = track().with_offset_ms(-2000);
        assert_eq!(t.skip_secs(), 2.0);
        assert_eq!(t.delay_ms(), 0);
    }

    #[test]
    fn test_positive_offset_delays_track() {
        let t = track().with_offset_ms(1500);
        assert_eq!(t.skip_secs(), 0.0);
        assert_eq!(t.delay_ms(), 1500);
    }

    #[test]
    fn test_volume_validation() {
        assert!(track().with_volume(0.4).validate().is_ok());
        assert!(track().with_volume(-1.0).validate().is_err());
        assert!(track().with_volume(f64::NAN).validate().is_err());
    }
}

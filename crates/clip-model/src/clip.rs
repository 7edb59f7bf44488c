//! Clip descriptors and transitions.

use serde::{Deserialize, Serialize};

use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use crate::source::MediaSource;

/// Tolerance used when deciding whether a trim window differs from the
/// full clip. A window within this distance of both ends is treated as the
/// whole clip: `start`, `end` and `effective_duration` snap to it.
pub const TIME_EPSILON_SECS: f64 = 1e-3;

/// One input video segment of a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInput {
    /// Where the clip bytes come from.
    pub source: MediaSource,

    /// Ordering key. Clips are sorted by this, not by array position.
    pub scene_number: u32,

    /// Clip length in seconds. Trusted as given, never re-measured.
    pub duration: f64,

    /// Start of the kept window (seconds, default 0).
    #[serde(default)]
    pub trim_start: Option<f64>,

    /// End of the kept window (seconds, default `duration`).
    #[serde(default)]
    pub trim_end: Option<f64>,

    /// Replace the clip audio with silence.
    #[serde(default)]
    pub mute: bool,

    /// Transition into the next clip in scene order.
    #[serde(default)]
    pub transition_out: Option<Transition>,

    /// Whether the source carries an audio stream.
    #[serde(default = "default_has_audio")]
    pub has_audio: bool,
}

fn default_has_audio() -> bool {
    true
}

/// A requested transition at a junction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    /// Requested overlap in seconds. The applied value may be shorter.
    pub duration: f64,
}

/// Supported video blend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Fade,
    Dissolve,
    FadeBlack,
    FadeWhite,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    CircleOpen,
    CircleClose,
    Radial,
    Pixelize,
    SmoothLeft,
    SmoothRight,
}

impl Transition {
    pub fn new(kind: TransitionKind, duration: f64) -> Self {
        Self { kind, duration }
    }
}

impl VideoInput {
    /// A clip covering its whole source with audio untouched.
    pub fn new(source: MediaSource, scene_number: u32, duration: f64) -> Self {
        Self {
            source,
            scene_number,
            duration,
            trim_start: None,
            trim_end: None,
            mute: false,
            transition_out: None,
            has_audio: true,
        }
    }

    pub fn with_trim(mut self, start: f64, end: f64) -> Self {
        self.trim_start = Some(start);
        self.trim_end = Some(end);
        self
    }

    pub fn with_transition(mut self, kind: TransitionKind, duration: f64) -> Self {
        self.transition_out = Some(Transition::new(kind, duration));
        self
    }

    pub fn muted(mut self) -> Self {
        self.mute = true;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Trim window as requested, before snapping.
    fn window(&self) -> (f64, f64) {
        (
            self.trim_start.unwrap_or(0.0),
            self.trim_end.unwrap_or(self.duration),
        )
    }

    /// Resolved trim start.
    pub fn start(&self) -> f64 {
        if self.is_trimmed() {
            self.window().0
        } else {
            0.0
        }
    }

    /// Resolved trim end.
    pub fn end(&self) -> f64 {
        if self.is_trimmed() {
            self.window().1
        } else {
            self.duration
        }
    }

    /// Length of the kept window.
    pub fn effective_duration(&self) -> f64 {
        self.end() - self.start()
    }

    /// Whether the kept window differs from the whole clip.
    pub fn is_trimmed(&self) -> bool {
        let (start, end) = self.window();
        start > TIME_EPSILON_SECS || end < self.duration - TIME_EPSILON_SECS
    }

    /// Check the descriptor. `position` is only used in messages.
    pub fn validate(&self, position: usize) -> ClipweaveResult<()> {
        let label = format!("clip {position} (scene {})", self.scene_number);

        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ClipweaveError::validation(format!(
                "{label}: duration must be a positive number of seconds, got {}",
                self.duration
            )));
        }

        let (start, end) = self.window();
        if !start.is_finite() || !end.is_finite() {
            return Err(ClipweaveError::validation(format!(
                "{label}: trim window must be finite"
            )));
        }
        if start < 0.0 {
            return Err(ClipweaveError::validation(format!(
                "{label}: trim start {start} is negative"
            )));
        }
        if end > self.duration {
            return Err(ClipweaveError::validation(format!(
                "{label}: trim end {end} exceeds duration {}",
                self.duration
            )));
        }
        if start >= end {
            return Err(ClipweaveError::validation(format!(
                "{label}: trim window [{start}, {end}] is empty"
            )));
        }

        if let Some(transition) = &self.transition_out {
            if !transition.duration.is_finite() || transition.duration < 0.0 {
                return Err(ClipweaveError::validation(format!(
                    "{label}: transition duration must be a non-negative number, got {}",
                    transition.duration
                )));
            }
        }

        Ok(())
    }
}

/// Validate every clip and return them stably sorted by scene number.
pub fn sorted_clips(clips: &[VideoInput]) -> ClipweaveResult<Vec<VideoInput>> {
    if clips.is_empty() {
        return Err(ClipweaveError::validation("at least one clip is required"));
    }
    for (i, clip) in clips.iter().enumerate() {
        clip.validate(i)?;
    }
    let mut sorted = clips.to_vec();
    sorted.sort_by_key(|clip| clip.scene_number);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clip(scene: u32, duration: f64) -> VideoInput {
        VideoInput::new(MediaSource::file(format!("/clips/{scene}.mp4")), scene, duration)
    }

    #[test]
    fn test_defaults_cover_whole_clip() {
        let c = clip(1, 5.0);
        assert_eq!(c.start(), 0.0);
        assert_eq!(c.end(), 5.0);
        assert_eq!(c.effective_duration(), 5.0);
        assert!(!c.is_trimmed());
        c.validate(0).unwrap();
    }

    #[test]
    fn test_explicit_full_window_is_not_trimmed() {
        let c = clip(1, 5.0).with_trim(0.0, 5.0);
        assert!(!c.is_trimmed());
        assert!(clip(1, 5.0).with_trim(0.5, 5.0).is_trimmed());
    }

    #[test]
    fn test_sub_millisecond_trim_snaps_to_whole_clip() {
        let c = clip(1, 5.0).with_trim(0.0004, 4.9995);
        assert!(!c.is_trimmed());
        assert_eq!((c.start(), c.end()), (0.0, 5.0));
        assert_eq!(c.effective_duration(), 5.0);
        c.validate(0).unwrap();
    }

    #[test]
    fn test_empty_window_rejected() {
        let err = clip(1, 5.0).with_trim(3.0, 3.0).validate(0).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = clip(1, 5.0).with_trim(4.0, 2.0).validate(0).unwrap_err();
        assert!(matches!(err, ClipweaveError::Validation { .. }));
    }

    #[test]
    fn test_window_past_duration_rejected() {
        let err = clip(2, 5.0).with_trim(1.0, 6.0).validate(3).unwrap_err();
        assert!(err.to_string().contains("clip 3 (scene 2)"));
    }

    #[test]
    fn test_negative_transition_rejected() {
        let c = clip(1, 5.0).with_transition(TransitionKind::Fade, -1.0);
        assert!(c.validate(0).is_err());
    }

    #[test]
    fn test_sorted_by_scene_number_not_position() {
        let clips = vec![clip(3, 1.0), clip(1, 2.0), clip(2, 3.0)];
        let sorted = sorted_clips(&clips).unwrap();
        let order: Vec<u32> = sorted.iter().map(|c| c.scene_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_clip_list_rejected() {
        assert!(sorted_clips(&[]).is_err());
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "source": {"kind": "url", "url": "https://cdn.example.com/a.mp4"},
            "scene_number": 4,
            "duration": 6.5,
            "transition_out": {"kind": "dissolve", "duration": 0.8}
        }"#;
        let c: VideoInput = serde_json::from_str(json).unwrap();
        assert!(c.has_audio);
        assert!(!c.mute);
        assert_eq!(c.transition_out.unwrap().kind, TransitionKind::Dissolve);
    }

    proptest! {
        #[test]
        fn prop_valid_windows_have_positive_length(
            duration in 0.1f64..120.0,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
        ) {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let c = clip(1, duration).with_trim(lo * duration, hi * duration);
            match c.validate(0) {
                Ok(()) => prop_assert!(c.effective_duration() > 0.0),
                Err(_) => prop_assert!(lo * duration >= hi * duration),
            }
        }
    }
}

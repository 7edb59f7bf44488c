//! Export options and progress reporting.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use clipweave_common::deadline::CancellationFlag;

use crate::audio::AudioTrack;

/// Output container. The codec set is fixed (H.264 + AAC) for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Mov => "video/quicktime",
        }
    }
}

/// Progress observer invoked synchronously for every progress event.
pub type ProgressObserver = Arc<dyn Fn(ExportProgress) + Send + Sync>;

/// Build an observer that forwards events into a channel.
///
/// Events sent after the receiver is dropped are discarded.
pub fn progress_channel() -> (ProgressObserver, mpsc::UnboundedReceiver<ExportProgress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer: ProgressObserver = Arc::new(move |progress| {
        let _ = tx.send(progress);
    });
    (observer, rx)
}

/// Caller-supplied options for one export call.
#[derive(Clone, Default)]
pub struct ExportOptions {
    pub container: ContainerFormat,

    /// Strip silent stretches from every clip's audio.
    pub remove_silence: bool,

    /// Optional overlay mixed onto the composed video.
    pub audio_track: Option<AudioTrack>,

    pub progress: Option<ProgressObserver>,

    pub cancellation: Option<CancellationFlag>,
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("container", &self.container)
            .field("remove_silence", &self.remove_silence)
            .field("audio_track", &self.audio_track)
            .field("progress", &self.progress.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl ExportOptions {
    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn with_audio_track(mut self, track: AudioTrack) -> Self {
        self.audio_track = Some(track);
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    pub fn with_silence_removal(mut self) -> Self {
        self.remove_silence = true;
        self
    }

    /// Deliver a progress event to the observer, if any.
    pub fn report(&self, progress: ExportProgress) {
        tracing::trace!(
            phase = ?progress.phase,
            progress = progress.progress,
            message = %progress.message,
            "Export progress"
        );
        if let Some(observer) = &self.progress {
            observer(progress);
        }
    }
}

/// Phases of an export, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Loading,
    Preparing,
    Concatenating,
    Finalizing,
    Complete,
    Error,
}

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,

    /// Percentage in `[0, 100]`.
    pub progress: f64,

    /// Human-readable status line.
    pub message: String,

    /// 1-based index of the file being handled, when relevant.
    pub current_file: Option<usize>,

    pub total_files: Option<usize>,
}

impl ExportProgress {
    pub fn new(phase: ExportPhase, progress: f64, message: impl Into<String>) -> Self {
        Self {
            phase,
            progress: progress.clamp(0.0, 100.0),
            message: message.into(),
            current_file: None,
            total_files: None,
        }
    }

    pub fn with_file(mut self, current: usize, total: usize) -> Self {
        self.current_file = Some(current);
        self.total_files = Some(total);
        self
    }
}

/// Non-fatal degradations recorded on a successful export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportWarning {
    /// The filter graph failed and the transition-free fallback was used.
    TransitionsDropped { primary_error: String },
    /// The audio overlay could not be mixed and was left out.
    AudioOverlayOmitted { reason: String },
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransitionsDropped { primary_error } => write!(
                f,
                "rendered without transitions after the primary render failed: {primary_error}"
            ),
            Self::AudioOverlayOmitted { reason } => {
                write!(f, "audio overlay omitted: {reason}")
            }
        }
    }
}

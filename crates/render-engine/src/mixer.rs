//! Auxiliary audio overlay.

use clipweave_clip_model::AudioTrack;
use clipweave_common::config::EncodingConfig;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use crate::command::overlay_args;
use crate::engine::{ExecRequest, FractionSink};
use crate::fetch::SourceFetcher;
use crate::session::Session;

/// Mixes one track onto a composed video.
#[derive(Debug, Clone)]
pub struct AudioMixer {
    encoding: EncodingConfig,
}

impl AudioMixer {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self { encoding }
    }

    /// Overlay `track` onto the staged video `composed` and return the new
    /// container bytes.
    ///
    /// The video stream is copied; only audio is re-encoded. Any failure
    /// other than cancellation is reported as [`ClipweaveError::Mix`].
    pub async fn overlay(
        &self,
        session: &mut Session,
        fetcher: &dyn SourceFetcher,
        composed: &str,
        expected_duration_secs: f64,
        track: &AudioTrack,
        progress: FractionSink<'_>,
    ) -> ClipweaveResult<Vec<u8>> {
        self.run(session, fetcher, composed, expected_duration_secs, track, progress)
            .await
            .map_err(|err| match err {
                ClipweaveError::Cancelled | ClipweaveError::Mix { .. } => err,
                other => ClipweaveError::mix(other.to_string()),
            })
    }

    async fn run(
        &self,
        session: &mut Session,
        fetcher: &dyn SourceFetcher,
        composed: &str,
        expected_duration_secs: f64,
        track: &AudioTrack,
        progress: FractionSink<'_>,
    ) -> ClipweaveResult<Vec<u8>> {
        track.validate()?;
        let bytes = session.fetch(fetcher, &track.source).await?;

        let namespace = session.namespace().clone();
        let extension = track.source.extension_hint().unwrap_or_else(|| "m4a".to_string());
        let track_name = session.stage(&namespace, "track", &extension, &bytes).await?;

        let container = composed.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("mp4");
        let output = session.scratch(&namespace, "mixed", container);
        let args = overlay_args(composed, &track_name, track, &output, &self.encoding)?;

        tracing::info!(
            offset_ms = track.offset_ms,
            volume = track.volume,
            source = %track.source.short_identifier(),
            "Mixing audio overlay"
        );
        let request = ExecRequest::new("audio overlay", args)
            .with_expected_duration(expected_duration_secs);
        session.exec(&request, progress).await?;
        session.read(&output).await
    }
}

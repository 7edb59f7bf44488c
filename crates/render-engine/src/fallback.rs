//! Transition-free recovery render.
//!
//! Used once when the primary graph fails: each staged clip is re-encoded
//! on its own to the canonical format, then the results are joined with the
//! concat demuxer. No filter graph spans more than one clip, so whatever
//! broke the combined graph usually does not recur here.

use clipweave_clip_model::ContainerFormat;
use clipweave_common::config::{CanonicalFormat, EncodingConfig};
use clipweave_common::error::ClipweaveResult;

use crate::command::{concat_demuxer_args, concat_list, normalize_args};
use crate::engine::{ExecRequest, FractionSink};
use crate::graph::GraphPlan;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct FallbackRenderer {
    encoding: EncodingConfig,
    canonical: CanonicalFormat,
}

impl FallbackRenderer {
    pub fn new(encoding: EncodingConfig, canonical: CanonicalFormat) -> Self {
        Self {
            encoding,
            canonical,
        }
    }

    /// Render `plan` without transitions. Returns the scratch name of the
    /// joined output.
    ///
    /// `inputs[i]` must be the staged file of `plan.clips[i]`. All files
    /// are created in the session's `fb` child namespace.
    pub async fn render(
        &self,
        session: &mut Session,
        plan: &GraphPlan,
        inputs: &[String],
        container: ContainerFormat,
        progress: FractionSink<'_>,
    ) -> ClipweaveResult<String> {
        let namespace = session.namespace().child("fb");
        let steps = (plan.clips.len() + 1) as f64;
        tracing::info!(
            namespace = namespace.as_str(),
            clips = plan.clips.len(),
            "Running fallback render"
        );

        let mut normalized = Vec::with_capacity(plan.clips.len());
        for (i, (clip, input)) in plan.clips.iter().zip(inputs).enumerate() {
            session.check_cancelled()?;
            let output = session.scratch(&namespace, &format!("norm{i}"), "mp4");
            let request = ExecRequest::new(
                format!("normalize clip {}", i + 1),
                normalize_args(clip, input, &output, &self.encoding, &self.canonical),
            )
            .with_expected_duration(clip.effective_duration());
            let done = i as f64;
            session
                .exec(&request, &|f: f64| progress((done + f) / steps))
                .await?;
            normalized.push(output);
        }

        let list = session
            .stage(&namespace, "list", "txt", concat_list(&normalized).as_bytes())
            .await?;

        let output = session.scratch(&namespace, "joined", container.extension());
        let request = ExecRequest::new("fallback concat", concat_demuxer_args(&list, &output))
            .with_expected_duration(plan.total_duration());
        let done = steps - 1.0;
        session
            .exec(&request, &|f: f64| progress((done + f) / steps))
            .await?;
        Ok(output)
    }
}

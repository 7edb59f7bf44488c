//! Composition planning: strategy selection and graph construction.
//!
//! The builder is a pure function of the clip set and settings. It never
//! touches the engine, so every offset and clamp it computes can be checked
//! in isolation.

use clipweave_clip_model::{sorted_clips, TransitionKind, VideoInput};
use clipweave_common::config::{CanonicalFormat, SilenceConfig};
use clipweave_common::error::ClipweaveResult;

use super::{Filter, FilterChain, FilterGraph, Pad};

/// How the clips are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStrategy {
    /// One untouched clip: container-level copy, no re-encode.
    StreamCopy,
    /// Streams concatenated directly by input index.
    SimpleConcat,
    /// Every clip normalized, then concatenated.
    TrimConcat,
    /// Every clip normalized, then blended pairwise left to right.
    CrossfadeConcat,
}

impl CompositionStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::StreamCopy => "stream copy",
            Self::SimpleConcat => "simple concat",
            Self::TrimConcat => "trim concat",
            Self::CrossfadeConcat => "crossfade concat",
        }
    }
}

/// A boundary between two timeline-adjacent clips.
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    /// Index of the left clip in sorted order.
    pub index: usize,
    /// Blend type, if the left clip declared one.
    pub kind: Option<TransitionKind>,
    /// Requested overlap.
    pub requested: f64,
    /// Overlap actually applied after clamping.
    pub applied: f64,
    /// Timeline position where the blend starts.
    pub offset: f64,
}

/// Everything needed to execute one composition.
#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub strategy: CompositionStrategy,
    /// Clips in scene order. Input `i` of the graph is `clips[i]`.
    pub clips: Vec<VideoInput>,
    /// `None` for [`CompositionStrategy::StreamCopy`].
    pub graph: Option<FilterGraph>,
    pub video_out: Pad,
    pub audio_out: Pad,
    pub junctions: Vec<Junction>,
}

impl GraphPlan {
    /// Planned output length in seconds.
    pub fn total_duration(&self) -> f64 {
        let kept: f64 = self.clips.iter().map(VideoInput::effective_duration).sum();
        let overlap: f64 = self.junctions.iter().map(|j| j.applied).sum();
        kept - overlap
    }

    pub fn input_count(&self) -> usize {
        self.clips.len()
    }

    /// Serialized graph, as passed to `-filter_complex`.
    pub fn filter_complex(&self) -> Option<String> {
        self.graph.as_ref().map(ToString::to_string)
    }
}

/// Clamp a requested transition so it never exceeds half of either
/// neighbouring clip.
pub fn clamp_transition(requested: f64, left_secs: f64, right_secs: f64) -> f64 {
    requested.min(left_secs / 2.0).min(right_secs / 2.0).max(0.0)
}

/// Builds [`GraphPlan`]s against a fixed canonical format.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    canonical: CanonicalFormat,
    silence: SilenceConfig,
}

impl GraphBuilder {
    pub fn new(canonical: CanonicalFormat, silence: SilenceConfig) -> Self {
        Self { canonical, silence }
    }

    pub fn canonical(&self) -> &CanonicalFormat {
        &self.canonical
    }

    /// Validate, order, and plan a composition.
    pub fn build(&self, clips: &[VideoInput], remove_silence: bool) -> ClipweaveResult<GraphPlan> {
        let clips = sorted_clips(clips)?;
        let strategy = select_strategy(&clips, remove_silence);

        let plan = match strategy {
            CompositionStrategy::StreamCopy => GraphPlan {
                strategy,
                clips,
                graph: None,
                video_out: Pad::video(0),
                audio_out: Pad::audio(0),
                junctions: Vec::new(),
            },
            CompositionStrategy::SimpleConcat => self.simple_concat(clips),
            CompositionStrategy::TrimConcat => self.trim_concat(clips, remove_silence),
            CompositionStrategy::CrossfadeConcat => self.crossfade_concat(clips, remove_silence),
        };

        if let Some(graph) = &plan.graph {
            graph.validate(plan.input_count(), &[&plan.video_out, &plan.audio_out])?;
        }

        tracing::debug!(
            strategy = ?plan.strategy,
            clips = plan.clips.len(),
            junctions = plan.junctions.len(),
            total_secs = plan.total_duration(),
            "Composition planned"
        );
        Ok(plan)
    }

    fn simple_concat(&self, clips: Vec<VideoInput>) -> GraphPlan {
        let mut inputs = Vec::with_capacity(clips.len() * 2);
        for i in 0..clips.len() {
            inputs.push(Pad::video(i));
            inputs.push(Pad::audio(i));
        }
        let (video_out, audio_out) = (Pad::label("vout"), Pad::label("aout"));
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            inputs,
            vec![Filter::Concat {
                segments: clips.len(),
                video: 1,
                audio: 1,
            }],
            vec![video_out.clone(), audio_out.clone()],
        ));

        GraphPlan {
            strategy: CompositionStrategy::SimpleConcat,
            clips,
            graph: Some(graph),
            video_out,
            audio_out,
            junctions: Vec::new(),
        }
    }

    fn trim_concat(&self, clips: Vec<VideoInput>, remove_silence: bool) -> GraphPlan {
        let mut graph = FilterGraph::new();
        let mut concat_inputs = Vec::with_capacity(clips.len() * 2);
        for (i, clip) in clips.iter().enumerate() {
            let (v, a) = self.normalize_clip(&mut graph, i, clip, remove_silence);
            concat_inputs.push(v);
            concat_inputs.push(a);
        }

        let (video_out, audio_out) = (Pad::label("vout"), Pad::label("aout"));
        graph.push(FilterChain::new(
            concat_inputs,
            vec![Filter::Concat {
                segments: clips.len(),
                video: 1,
                audio: 1,
            }],
            vec![video_out.clone(), audio_out.clone()],
        ));

        GraphPlan {
            strategy: CompositionStrategy::TrimConcat,
            clips,
            graph: Some(graph),
            video_out,
            audio_out,
            junctions: Vec::new(),
        }
    }

    fn crossfade_concat(&self, clips: Vec<VideoInput>, remove_silence: bool) -> GraphPlan {
        let mut graph = FilterGraph::new();
        let mut normalized = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            normalized.push(self.normalize_clip(&mut graph, i, clip, remove_silence));
        }

        let last_junction = clips.len() - 1;
        let mut junctions = Vec::with_capacity(last_junction);
        let (mut video, mut audio) = normalized[0].clone();
        // Start of the current left clip on the output timeline. Overlaps are
        // shared by both neighbours, so this follows the blend offsets rather
        // than the plain sum of durations.
        let mut running = 0.0;

        for i in 0..last_junction {
            let left = clips[i].effective_duration();
            let right = clips[i + 1].effective_duration();
            let transition = clips[i].transition_out;
            let requested = transition.map(|t| t.duration).unwrap_or(0.0);
            let applied = clamp_transition(requested, left, right);
            let offset = running + left - applied;

            let (video_next, audio_next) = if i + 1 == last_junction {
                (Pad::label("vout"), Pad::label("aout"))
            } else {
                (Pad::label(format!("vx{i}")), Pad::label(format!("ax{i}")))
            };
            let (right_video, right_audio) = normalized[i + 1].clone();

            let (video_filter, audio_filter) = match transition {
                Some(t) if applied > 0.0 => (
                    Filter::VideoBlend {
                        kind: t.kind,
                        duration: applied,
                        offset,
                    },
                    Filter::AudioCrossfade { duration: applied },
                ),
                _ => (
                    Filter::Concat {
                        segments: 2,
                        video: 1,
                        audio: 0,
                    },
                    Filter::Concat {
                        segments: 2,
                        video: 0,
                        audio: 1,
                    },
                ),
            };

            graph.push(FilterChain::new(
                vec![video, right_video],
                vec![video_filter],
                vec![video_next.clone()],
            ));
            graph.push(FilterChain::new(
                vec![audio, right_audio],
                vec![audio_filter],
                vec![audio_next.clone()],
            ));

            if requested > applied {
                tracing::debug!(
                    junction = i,
                    requested,
                    applied,
                    "Transition clamped to half of the shorter neighbour"
                );
            }

            junctions.push(Junction {
                index: i,
                kind: transition.map(|t| t.kind),
                requested,
                applied,
                offset,
            });
            running = offset;
            video = video_next;
            audio = audio_next;
        }

        GraphPlan {
            strategy: CompositionStrategy::CrossfadeConcat,
            clips,
            graph: Some(graph),
            video_out: video,
            audio_out: audio,
            junctions,
        }
    }

    /// Add the per-clip normalization chains and return the (video, audio)
    /// labels they produce.
    fn normalize_clip(
        &self,
        graph: &mut FilterGraph,
        index: usize,
        clip: &VideoInput,
        remove_silence: bool,
    ) -> (Pad, Pad) {
        let canonical = &self.canonical;
        let video_label = Pad::label(format!("v{index}"));
        let audio_label = Pad::label(format!("a{index}"));

        graph.push(FilterChain::new(
            vec![Pad::video(index)],
            vec![
                Filter::Trim {
                    start: clip.start(),
                    end: clip.end(),
                },
                Filter::ResetVideoTimestamps,
                Filter::ScaleToFit {
                    width: canonical.width,
                    height: canonical.height,
                },
                Filter::PadToCanvas {
                    width: canonical.width,
                    height: canonical.height,
                },
                Filter::SquarePixels,
                Filter::Fps(canonical.fps),
                Filter::PixelFormat(canonical.pixel_format.clone()),
            ],
            vec![video_label.clone()],
        ));

        let audio_format = Filter::AudioFormat {
            sample_rate: canonical.audio_sample_rate,
            channel_layout: canonical.audio_channel_layout.clone(),
        };

        if clip.has_audio {
            let mut filters = vec![
                Filter::ATrim {
                    start: clip.start(),
                    end: Some(clip.end()),
                },
                Filter::ResetAudioTimestamps,
            ];
            if clip.mute {
                filters.push(Filter::Volume(0.0));
            } else if remove_silence {
                filters.push(Filter::SilenceRemove {
                    threshold_db: self.silence.threshold_db,
                    min_duration_secs: self.silence.min_duration_secs,
                });
            }
            filters.push(Filter::Resample(canonical.audio_sample_rate));
            filters.push(audio_format);
            graph.push(FilterChain::new(
                vec![Pad::audio(index)],
                filters,
                vec![audio_label.clone()],
            ));
        } else {
            graph.push(FilterChain::new(
                vec![],
                vec![
                    Filter::SilentSource {
                        sample_rate: canonical.audio_sample_rate,
                        channel_layout: canonical.audio_channel_layout.clone(),
                    },
                    Filter::ATrim {
                        start: 0.0,
                        end: Some(clip.effective_duration()),
                    },
                    Filter::ResetAudioTimestamps,
                    audio_format,
                ],
                vec![audio_label.clone()],
            ));
        }

        (video_label, audio_label)
    }
}

/// Pick a strategy by looking at the whole clip set.
///
/// Only transitions that sit on a junction count; a transition declared on
/// the last clip has nothing to blend into.
pub fn select_strategy(clips: &[VideoInput], remove_silence: bool) -> CompositionStrategy {
    let junction_count = clips.len().saturating_sub(1);
    let has_transition = clips[..junction_count]
        .iter()
        .any(|clip| clip.transition_out.is_some());
    if has_transition {
        return CompositionStrategy::CrossfadeConcat;
    }

    let needs_normalization = remove_silence
        || clips
            .iter()
            .any(|clip| clip.is_trimmed() || clip.mute || !clip.has_audio);
    if needs_normalization {
        CompositionStrategy::TrimConcat
    } else if clips.len() == 1 {
        CompositionStrategy::StreamCopy
    } else {
        CompositionStrategy::SimpleConcat
    }
}

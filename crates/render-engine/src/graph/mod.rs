//! Typed filter graph model.
//!
//! Graphs are assembled from [`Filter`] values with numeric parameters and
//! only turned into the engine's textual `-filter_complex` syntax by the
//! `Display` impls, at the moment a command line is built.

pub mod builder;

use std::collections::HashSet;
use std::fmt;

use clipweave_clip_model::TransitionKind;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};

pub use builder::*;

/// Stream type carried by a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// A connection point between chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pad {
    /// A stream of the `index`-th `-i` input.
    Input { index: usize, stream: StreamKind },
    /// A named intermediate or output stream.
    Label(String),
}

impl Pad {
    pub fn video(index: usize) -> Self {
        Self::Input {
            index,
            stream: StreamKind::Video,
        }
    }

    pub fn audio(index: usize) -> Self {
        Self::Input {
            index,
            stream: StreamKind::Audio,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::Label(name.into())
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input {
                index,
                stream: StreamKind::Video,
            } => write!(f, "[{index}:v]"),
            Self::Input {
                index,
                stream: StreamKind::Audio,
            } => write!(f, "[{index}:a]"),
            Self::Label(name) => write!(f, "[{name}]"),
        }
    }
}

/// A single processing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Trim { start: f64, end: f64 },
    ATrim { start: f64, end: Option<f64> },
    ResetVideoTimestamps,
    ResetAudioTimestamps,
    /// Aspect-preserving downscale to fit inside the box.
    ScaleToFit { width: u32, height: u32 },
    /// Center the frame on a canvas of the given size.
    PadToCanvas { width: u32, height: u32 },
    SquarePixels,
    Fps(u32),
    PixelFormat(String),
    Volume(f64),
    SilenceRemove { threshold_db: f64, min_duration_secs: f64 },
    Resample(u32),
    AudioFormat { sample_rate: u32, channel_layout: String },
    /// Silent audio source; takes no inputs.
    SilentSource { sample_rate: u32, channel_layout: String },
    Concat { segments: usize, video: usize, audio: usize },
    VideoBlend { kind: TransitionKind, duration: f64, offset: f64 },
    /// Equal-power audio crossfade.
    AudioCrossfade { duration: f64 },
    Delay { millis: u64 },
    /// Additive mix whose length follows the first input.
    MixFirst { inputs: usize },
}

impl Filter {
    /// Number of input and output pads the filter has.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::SilentSource { .. } => (0, 1),
            Self::Concat {
                segments,
                video,
                audio,
            } => (segments * (video + audio), video + audio),
            Self::VideoBlend { .. } | Self::AudioCrossfade { .. } => (2, 1),
            Self::MixFirst { inputs } => (*inputs, 1),
            _ => (1, 1),
        }
    }

    /// Join filters into a simple `-vf`/`-af` chain.
    pub fn join(filters: &[Filter]) -> String {
        filters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trim { start, end } => {
                write!(f, "trim=start={}:end={}", num(*start), num(*end))
            }
            Self::ATrim { start, end: Some(end) } => {
                write!(f, "atrim=start={}:end={}", num(*start), num(*end))
            }
            Self::ATrim { start, end: None } => write!(f, "atrim=start={}", num(*start)),
            Self::ResetVideoTimestamps => write!(f, "setpts=PTS-STARTPTS"),
            Self::ResetAudioTimestamps => write!(f, "asetpts=PTS-STARTPTS"),
            Self::ScaleToFit { width, height } => write!(
                f,
                "scale={width}:{height}:force_original_aspect_ratio=decrease"
            ),
            Self::PadToCanvas { width, height } => {
                write!(f, "pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black")
            }
            Self::SquarePixels => write!(f, "setsar=1"),
            Self::Fps(fps) => write!(f, "fps={fps}"),
            Self::PixelFormat(format) => write!(f, "format={format}"),
            Self::Volume(gain) => write!(f, "volume={}", num(*gain)),
            Self::SilenceRemove {
                threshold_db,
                min_duration_secs,
            } => write!(
                f,
                "silenceremove=start_periods=1:start_duration={d}:start_threshold={t}dB:\
                 stop_periods=-1:stop_duration={d}:stop_threshold={t}dB",
                d = num(*min_duration_secs),
                t = num(*threshold_db),
            ),
            Self::Resample(rate) => write!(f, "aresample={rate}"),
            Self::AudioFormat {
                sample_rate,
                channel_layout,
            } => write!(
                f,
                "aformat=sample_fmts=fltp:sample_rates={sample_rate}:channel_layouts={channel_layout}"
            ),
            Self::SilentSource {
                sample_rate,
                channel_layout,
            } => write!(
                f,
                "anullsrc=channel_layout={channel_layout}:sample_rate={sample_rate}"
            ),
            Self::Concat {
                segments,
                video,
                audio,
            } => write!(f, "concat=n={segments}:v={video}:a={audio}"),
            Self::VideoBlend {
                kind,
                duration,
                offset,
            } => write!(
                f,
                "xfade=transition={}:duration={}:offset={}",
                blend_name(*kind),
                num(*duration),
                num(*offset)
            ),
            Self::AudioCrossfade { duration } => {
                write!(f, "acrossfade=d={}:c1=qsin:c2=qsin", num(*duration))
            }
            Self::Delay { millis } => write!(f, "adelay=delays={millis}:all=1"),
            Self::MixFirst { inputs } => write!(
                f,
                "amix=inputs={inputs}:duration=first:dropout_transition=0:normalize=0"
            ),
        }
    }
}

/// Engine name of a video blend.
pub fn blend_name(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Fade => "fade",
        TransitionKind::Dissolve => "dissolve",
        TransitionKind::FadeBlack => "fadeblack",
        TransitionKind::FadeWhite => "fadewhite",
        TransitionKind::WipeLeft => "wipeleft",
        TransitionKind::WipeRight => "wiperight",
        TransitionKind::WipeUp => "wipeup",
        TransitionKind::WipeDown => "wipedown",
        TransitionKind::SlideLeft => "slideleft",
        TransitionKind::SlideRight => "slideright",
        TransitionKind::SlideUp => "slideup",
        TransitionKind::SlideDown => "slidedown",
        TransitionKind::CircleOpen => "circleopen",
        TransitionKind::CircleClose => "circleclose",
        TransitionKind::Radial => "radial",
        TransitionKind::Pixelize => "pixelize",
        TransitionKind::SmoothLeft => "smoothleft",
        TransitionKind::SmoothRight => "smoothright",
    }
}

/// Format a number without trailing zeros (`7.2`, `4`, `0.125`).
fn num(value: f64) -> String {
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Linear sequence of filters between input and output pads.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<Pad>,
    pub filters: Vec<Filter>,
    pub outputs: Vec<Pad>,
}

impl FilterChain {
    pub fn new(inputs: Vec<Pad>, filters: Vec<Filter>, outputs: Vec<Pad>) -> Self {
        Self {
            inputs,
            filters,
            outputs,
        }
    }

    fn check_arity(&self, position: usize) -> ClipweaveResult<()> {
        let (first, last) = match (self.filters.first(), self.filters.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(ClipweaveError::engine(format!(
                    "filter chain {position} has no filters"
                )))
            }
        };
        if first.arity().0 != self.inputs.len() {
            return Err(ClipweaveError::engine(format!(
                "filter chain {position}: {first} expects {} inputs, got {}",
                first.arity().0,
                self.inputs.len()
            )));
        }
        for pair in self.filters.windows(2) {
            if pair[0].arity().1 != 1 || pair[1].arity().0 != 1 {
                return Err(ClipweaveError::engine(format!(
                    "filter chain {position}: cannot link {} into {}",
                    pair[0], pair[1]
                )));
            }
        }
        if last.arity().1 != self.outputs.len() {
            return Err(ClipweaveError::engine(format!(
                "filter chain {position}: {last} produces {} outputs, got {}",
                last.arity().1,
                self.outputs.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            write!(f, "{pad}")?;
        }
        write!(f, "{}", Filter::join(&self.filters))?;
        for pad in &self.outputs {
            write!(f, "{pad}")?;
        }
        Ok(())
    }
}

/// An ordered set of chains forming one `-filter_complex` graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    pub chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    /// Check pad wiring.
    ///
    /// Every label is produced exactly once before it is consumed, consumed
    /// at most once, input pads reference existing inputs, and each of
    /// `outputs` is produced and left unconsumed.
    pub fn validate(&self, input_count: usize, outputs: &[&Pad]) -> ClipweaveResult<()> {
        let mut produced: HashSet<&str> = HashSet::new();
        let mut consumed: HashSet<&str> = HashSet::new();
        let mut used_inputs: HashSet<(usize, StreamKind)> = HashSet::new();

        for (position, chain) in self.chains.iter().enumerate() {
            chain.check_arity(position)?;

            for pad in &chain.inputs {
                match pad {
                    Pad::Input { index, stream } => {
                        if *index >= input_count {
                            return Err(ClipweaveError::engine(format!(
                                "filter chain {position} references missing input {index}"
                            )));
                        }
                        if !used_inputs.insert((*index, *stream)) {
                            return Err(ClipweaveError::engine(format!(
                                "input stream {pad} is consumed twice"
                            )));
                        }
                    }
                    Pad::Label(name) => {
                        if !produced.contains(name.as_str()) {
                            return Err(ClipweaveError::engine(format!(
                                "label [{name}] is consumed before it is produced"
                            )));
                        }
                        if !consumed.insert(name.as_str()) {
                            return Err(ClipweaveError::engine(format!(
                                "label [{name}] is consumed twice"
                            )));
                        }
                    }
                }
            }

            for pad in &chain.outputs {
                match pad {
                    Pad::Label(name) => {
                        if !produced.insert(name.as_str()) {
                            return Err(ClipweaveError::engine(format!(
                                "label [{name}] is produced twice"
                            )));
                        }
                    }
                    Pad::Input { .. } => {
                        return Err(ClipweaveError::engine(format!(
                            "filter chain {position} writes to input pad {pad}"
                        )))
                    }
                }
            }
        }

        for pad in outputs {
            let Pad::Label(name) = *pad else {
                return Err(ClipweaveError::engine(format!(
                    "graph output {pad} must be a label"
                )));
            };
            if !produced.contains(name.as_str()) {
                return Err(ClipweaveError::engine(format!(
                    "graph output [{name}] is never produced"
                )));
            }
            if consumed.contains(name.as_str()) {
                return Err(ClipweaveError::engine(format!(
                    "graph output [{name}] is consumed inside the graph"
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{chain}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_trims_zeros() {
        assert_eq!(num(7.2), "7.2");
        assert_eq!(num(4.0), "4");
        assert_eq!(num(0.125), "0.125");
        assert_eq!(num(-0.0), "0");
        assert_eq!(num(-50.0), "-50");
    }

    #[test]
    fn test_chain_serialization() {
        let chain = FilterChain::new(
            vec![Pad::video(0)],
            vec![
                Filter::Trim { start: 1.5, end: 4.0 },
                Filter::ResetVideoTimestamps,
                Filter::Fps(30),
            ],
            vec![Pad::label("v0")],
        );
        assert_eq!(
            chain.to_string(),
            "[0:v]trim=start=1.5:end=4,setpts=PTS-STARTPTS,fps=30[v0]"
        );
    }

    #[test]
    fn test_blend_serialization() {
        let blend = Filter::VideoBlend {
            kind: TransitionKind::Dissolve,
            duration: 0.8,
            offset: 7.2,
        };
        assert_eq!(
            blend.to_string(),
            "xfade=transition=dissolve:duration=0.8:offset=7.2"
        );
    }

    #[test]
    fn test_validate_rejects_unproduced_label() {
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            vec![Pad::label("missing")],
            vec![Filter::Fps(30)],
            vec![Pad::label("out")],
        ));
        let out = Pad::label("out");
        let err = graph.validate(1, &[&out]).unwrap_err();
        assert!(err.to_string().contains("consumed before it is produced"));
    }

    #[test]
    fn test_validate_rejects_double_consumption() {
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            vec![Pad::video(0)],
            vec![Filter::Fps(30)],
            vec![Pad::label("a")],
        ));
        graph.push(FilterChain::new(
            vec![Pad::label("a")],
            vec![Filter::SquarePixels],
            vec![Pad::label("b")],
        ));
        graph.push(FilterChain::new(
            vec![Pad::label("a")],
            vec![Filter::SquarePixels],
            vec![Pad::label("c")],
        ));
        let err = graph.validate(1, &[]).unwrap_err();
        assert!(err.to_string().contains("consumed twice"));
    }

    #[test]
    fn test_validate_checks_arity() {
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            vec![Pad::video(0)],
            vec![Filter::Concat {
                segments: 2,
                video: 1,
                audio: 0,
            }],
            vec![Pad::label("out")],
        ));
        assert!(graph.validate(1, &[]).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_input() {
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            vec![Pad::audio(3)],
            vec![Filter::Volume(0.0)],
            vec![Pad::label("out")],
        ));
        let out = Pad::label("out");
        assert!(graph.validate(2, &[&out]).is_err());
        assert!(graph.validate(4, &[&out]).is_ok());
    }

    #[test]
    fn test_silent_source_has_no_inputs() {
        let mut graph = FilterGraph::new();
        graph.push(FilterChain::new(
            vec![],
            vec![
                Filter::SilentSource {
                    sample_rate: 44_100,
                    channel_layout: "stereo".into(),
                },
                Filter::ATrim {
                    start: 0.0,
                    end: Some(2.0),
                },
            ],
            vec![Pad::label("a0")],
        ));
        let out = Pad::label("a0");
        graph.validate(0, &[&out]).unwrap();
        assert_eq!(
            graph.to_string(),
            "anullsrc=channel_layout=stereo:sample_rate=44100,atrim=start=0:end=2[a0]"
        );
    }
}

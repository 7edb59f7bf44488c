//! Engine argument lists.
//!
//! Each builder returns the arguments that follow the engine's fixed flags.
//! Inputs and outputs are scratch file names inside the engine.

use clipweave_clip_model::{AudioTrack, VideoInput};
use clipweave_common::config::{CanonicalFormat, EncodingConfig};
use clipweave_common::error::ClipweaveResult;

use crate::graph::{CompositionStrategy, Filter, FilterChain, FilterGraph, GraphPlan, Pad};

/// Fixed H.264/AAC encode settings with a progressive-playback layout.
pub fn codec_args(encoding: &EncodingConfig, canonical: &CanonicalFormat) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        encoding.video_codec.clone(),
        "-preset".to_string(),
        encoding.preset.clone(),
        "-crf".to_string(),
        encoding.crf.to_string(),
        "-pix_fmt".to_string(),
        canonical.pixel_format.clone(),
        "-c:a".to_string(),
        encoding.audio_codec.clone(),
        "-b:a".to_string(),
        format!("{}k", encoding.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]
}

/// Composition of staged clips according to a plan.
///
/// `inputs[i]` must hold `plan.clips[i]`.
pub fn composition_args(
    plan: &GraphPlan,
    inputs: &[String],
    output: &str,
    encoding: &EncodingConfig,
    canonical: &CanonicalFormat,
) -> Vec<String> {
    let mut args = Vec::new();
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.clone());
    }

    match (&plan.strategy, plan.filter_complex()) {
        (CompositionStrategy::StreamCopy, _) | (_, None) => {
            args.extend(
                ["-map", "0:v:0", "-map", "0:a:0?", "-c", "copy", "-movflags", "+faststart"]
                    .map(String::from),
            );
        }
        (_, Some(graph)) => {
            args.push("-filter_complex".to_string());
            args.push(graph);
            args.push("-map".to_string());
            args.push(plan.video_out.to_string());
            args.push("-map".to_string());
            args.push(plan.audio_out.to_string());
            args.extend(codec_args(encoding, canonical));
        }
    }

    args.push(output.to_string());
    args
}

/// Re-encode one staged clip to the canonical format on its own.
///
/// The trim window is applied as input seeking and mute replaces the audio
/// with silence. A clip without audio gets a generated silent track so
/// every normalized file has the same stream layout.
pub fn normalize_args(
    clip: &VideoInput,
    input: &str,
    output: &str,
    encoding: &EncodingConfig,
    canonical: &CanonicalFormat,
) -> Vec<String> {
    let seconds = |v: f64| format!("{v:.3}");
    let length = clip.effective_duration();

    let mut args = vec![
        "-ss".to_string(),
        seconds(clip.start()),
        "-t".to_string(),
        seconds(length),
        "-i".to_string(),
        input.to_string(),
    ];

    let silent_source = Filter::SilentSource {
        sample_rate: canonical.audio_sample_rate,
        channel_layout: canonical.audio_channel_layout.clone(),
    };
    let audio_map = if clip.has_audio {
        "0:a:0"
    } else {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-t".to_string(),
            seconds(length),
            "-i".to_string(),
            silent_source.to_string(),
        ]);
        "1:a:0"
    };

    let video_filters = [
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
    ];
    let mut audio_filters = Vec::new();
    if clip.mute {
        audio_filters.push(Filter::Volume(0.0));
    }
    audio_filters.push(Filter::Resample(canonical.audio_sample_rate));
    audio_filters.push(Filter::AudioFormat {
        sample_rate: canonical.audio_sample_rate,
        channel_layout: canonical.audio_channel_layout.clone(),
    });

    args.extend([
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        audio_map.to_string(),
        "-vf".to_string(),
        Filter::join(&video_filters),
        "-af".to_string(),
        Filter::join(&audio_filters),
    ]);
    args.extend(codec_args(encoding, canonical));
    args.push(output.to_string());
    args
}

/// Concat demuxer list for already-normalized files.
pub fn concat_list(files: &[String]) -> String {
    files
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', "'\\''")))
        .collect()
}

/// Sequential join of normalized files without re-encoding.
pub fn concat_demuxer_args(list: &str, output: &str) -> Vec<String> {
    [
        "-f", "concat", "-safe", "0", "-i", list, "-c", "copy", "-movflags", "+faststart", output,
    ]
    .map(String::from)
    .to_vec()
}

/// Overlay graph: the track is skipped into or delayed, scaled, then mixed
/// additively with the video's own audio. Output length follows the video.
pub fn overlay_graph(track: &AudioTrack) -> ClipweaveResult<(FilterGraph, Pad)> {
    let mut filters = Vec::new();
    let skip = track.skip_secs();
    if skip > 0.0 {
        filters.push(Filter::ATrim {
            start: skip,
            end: None,
        });
    }
    filters.push(Filter::ResetAudioTimestamps);
    filters.push(Filter::Volume(track.volume));
    let delay = track.delay_ms();
    if delay > 0 {
        filters.push(Filter::Delay { millis: delay });
    }

    let shaped = Pad::label("trk");
    let mixed = Pad::label("aout");
    let mut graph = FilterGraph::new();
    graph.push(FilterChain::new(vec![Pad::audio(1)], filters, vec![shaped.clone()]));
    graph.push(FilterChain::new(
        vec![Pad::audio(0), shaped],
        vec![Filter::MixFirst { inputs: 2 }],
        vec![mixed.clone()],
    ));
    graph.validate(2, &[&mixed])?;
    Ok((graph, mixed))
}

/// Mix a track onto a composed video, copying the video stream.
pub fn overlay_args(
    video: &str,
    track_input: &str,
    track: &AudioTrack,
    output: &str,
    encoding: &EncodingConfig,
) -> ClipweaveResult<Vec<String>> {
    let (graph, mixed) = overlay_graph(track)?;
    let mut args: Vec<String> = ["-i", video, "-i", track_input, "-filter_complex"]
        .map(String::from)
        .to_vec();
    args.push(graph.to_string());
    args.extend([
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        mixed.to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        encoding.audio_codec.clone(),
        "-b:a".to_string(),
        format!("{}k", encoding.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string(),
    ]);
    Ok(args)
}

/// One frame taken `offset_secs` before the end of the stream.
pub fn last_frame_args(input: &str, offset_secs: f64, output: &str) -> Vec<String> {
    vec![
        "-sseof".to_string(),
        format!("-{offset_secs:.3}"),
        "-i".to_string(),
        input.to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        output.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipweave_clip_model::MediaSource;

    fn encoding() -> EncodingConfig {
        EncodingConfig::default()
    }

    fn canonical() -> CanonicalFormat {
        CanonicalFormat::default()
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_codec_args_fixed_target() {
        let args = codec_args(&encoding(), &canonical());
        assert_eq!(args[position(&args, "-c:v") + 1], "libx264");
        assert_eq!(args[position(&args, "-crf") + 1], "23");
        assert_eq!(args[position(&args, "-c:a") + 1], "aac");
        assert_eq!(args[position(&args, "-b:a") + 1], "128k");
        assert_eq!(args[position(&args, "-movflags") + 1], "+faststart");
    }

    #[test]
    fn test_normalize_honours_trim_and_mute() {
        let clip = VideoInput::new(MediaSource::file("a.mp4"), 1, 10.0)
            .with_trim(2.5, 6.0)
            .muted();
        let args = normalize_args(&clip, "in.mp4", "out.mp4", &encoding(), &canonical());
        assert_eq!(args[position(&args, "-ss") + 1], "2.500");
        assert_eq!(args[position(&args, "-t") + 1], "3.500");
        assert!(args[position(&args, "-af") + 1].starts_with("volume=0,"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_normalize_generates_silence_without_audio() {
        let clip = VideoInput::new(MediaSource::file("a.mp4"), 1, 4.0).without_audio();
        let args = normalize_args(&clip, "in.mp4", "out.mp4", &encoding(), &canonical());
        assert!(args.contains(&"lavfi".to_string()));
        assert!(args.contains(&"1:a:0".to_string()));
    }

    #[test]
    fn test_concat_list_quotes_names() {
        let list = concat_list(&["a.mp4".to_string(), "it's.mp4".to_string()]);
        assert_eq!(list, "file 'a.mp4'\nfile 'it'\\''s.mp4'\n");
    }

    #[test]
    fn test_overlay_negative_offset_skips_into_track() {
        let track = AudioTrack::new(MediaSource::file("bed.mp3"))
            .with_offset_ms(-2000)
            .with_volume(0.5);
        let (graph, _) = overlay_graph(&track).unwrap();
        assert_eq!(
            graph.to_string(),
            "[1:a]atrim=start=2,asetpts=PTS-STARTPTS,volume=0.5[trk];\
             [0:a][trk]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"
        );
    }

    #[test]
    fn test_overlay_positive_offset_delays_track() {
        let track = AudioTrack::new(MediaSource::file("bed.mp3")).with_offset_ms(1500);
        let (graph, _) = overlay_graph(&track).unwrap();
        let text = graph.to_string();
        assert!(text.starts_with("[1:a]asetpts=PTS-STARTPTS,volume=1,adelay=delays=1500:all=1[trk]"));
        assert!(!text.contains("atrim"));
    }

    #[test]
    fn test_overlay_args_copy_video() {
        let track = AudioTrack::new(MediaSource::file("bed.mp3"));
        let args = overlay_args("v.mp4", "t.mp3", &track, "o.mp4", &encoding()).unwrap();
        assert_eq!(args[position(&args, "-c:v") + 1], "copy");
        assert_eq!(args[position(&args, "-map") + 1], "0:v:0");
    }

    #[test]
    fn test_last_frame_args() {
        let args = last_frame_args("in.mp4", 0.1, "out.jpg");
        assert_eq!(args[..2], ["-sseof".to_string(), "-0.100".to_string()]);
        assert_eq!(args[position(&args, "-frames:v") + 1], "1");
    }
}

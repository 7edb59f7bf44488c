//! Thumbnail extraction.
//!
//! The primary path decodes the source directly and paints the frame just
//! before the end into an RGB raster. If any step of it fails or runs out
//! of time, the shared engine is asked to seek from the end of the stream
//! instead. A failure there is terminal and carries both causes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use tokio::process::Command;

use clipweave_clip_model::{ExtractedFrame, MediaSource};
use clipweave_common::config::{FrameConfig, TimeoutConfig};
use clipweave_common::deadline::{within, CancellationFlag};
use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use crate::command::last_frame_args;
use crate::engine::{EngineManager, ExecRequest};
use crate::fetch::SourceFetcher;
use crate::session::Session;

/// Basic stream facts needed to pick a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Opens media for direct decoding.
#[async_trait::async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn open(&self, data: Arc<[u8]>, extension: &str) -> ClipweaveResult<Box<dyn DecodedMedia>>;
}

/// An opened media handle. Must be released when done.
#[async_trait::async_trait]
pub trait DecodedMedia: Send {
    async fn metadata(&mut self) -> ClipweaveResult<MediaMetadata>;

    /// Decode the frame shown at `at_secs`.
    async fn decode_frame(&mut self, at_secs: f64) -> ClipweaveResult<RgbImage>;

    /// Free the handle. Never fails.
    async fn release(&mut self);
}

/// Direct decoder built on ffprobe and an ffmpeg pipe.
#[derive(Debug, Clone)]
pub struct FfmpegFrameDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegFrameDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegFrameDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait::async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn open(&self, data: Arc<[u8]>, extension: &str) -> ClipweaveResult<Box<dyn DecodedMedia>> {
        let file = tempfile::Builder::new()
            .prefix("clipweave-frame-")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        tokio::fs::write(file.path(), &data).await?;
        Ok(Box::new(FfmpegMedia {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            file: Some(file),
        }))
    }
}

struct FfmpegMedia {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    file: Option<tempfile::NamedTempFile>,
}

impl FfmpegMedia {
    fn path(&self) -> ClipweaveResult<PathBuf> {
        self.file
            .as_ref()
            .map(|f| f.path().to_path_buf())
            .ok_or_else(|| ClipweaveError::engine("media handle already released"))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(json: &[u8]) -> ClipweaveResult<MediaMetadata> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| ClipweaveError::engine("no video stream found"))?;

    let parse = |value: &Option<String>| value.as_deref().and_then(|s| s.parse::<f64>().ok());
    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| parse(&f.duration))
        .or_else(|| parse(&stream.duration))
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| ClipweaveError::engine("media has no usable duration"))?;

    Ok(MediaMetadata {
        duration_secs,
        width: stream.width.unwrap_or_default(),
        height: stream.height.unwrap_or_default(),
    })
}

#[async_trait::async_trait]
impl DecodedMedia for FfmpegMedia {
    async fn metadata(&mut self) -> ClipweaveResult<MediaMetadata> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(self.path()?)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClipweaveError::engine(format!("failed to start ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(ClipweaveError::engine(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe_output(&output.stdout)
    }

    async fn decode_frame(&mut self, at_secs: f64) -> ClipweaveResult<RgbImage> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss", &format!("{at_secs:.3}"), "-i"])
            .arg(self.path()?)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClipweaveError::engine(format!("failed to start ffmpeg: {e}")))?;
        if !output.status.success() {
            return Err(ClipweaveError::engine(format!(
                "frame decode failed: {}",
                String::from_utf8_lossy(&output.stderr).lines().last().unwrap_or("unknown error")
            )));
        }
        if output.stdout.is_empty() {
            return Err(ClipweaveError::engine(format!(
                "no frame decoded at {at_secs:.3}s"
            )));
        }
        let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .map_err(|e| ClipweaveError::engine(format!("failed to decode frame: {e}")))?;
        Ok(image.to_rgb8())
    }

    async fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.close() {
                tracing::debug!(error = %err, "Temporary media file not removed");
            }
        }
    }
}

/// Produces a still JPEG from a video source.
pub struct FrameExtractor {
    decoder: Arc<dyn FrameDecoder>,
    engines: Arc<EngineManager>,
    fetcher: Arc<dyn SourceFetcher>,
    frame: FrameConfig,
    timeouts: TimeoutConfig,
}

impl FrameExtractor {
    pub fn new(
        decoder: Arc<dyn FrameDecoder>,
        engines: Arc<EngineManager>,
        fetcher: Arc<dyn SourceFetcher>,
        frame: FrameConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            decoder,
            engines,
            fetcher,
            frame,
            timeouts,
        }
    }

    /// Extract the last frame of `source`.
    pub async fn extract(&self, source: &MediaSource) -> ClipweaveResult<ExtractedFrame> {
        self.extract_with(source, CancellationFlag::new()).await
    }

    /// Like [`extract`](Self::extract), abandoning work once `cancel` trips.
    pub async fn extract_with(
        &self,
        source: &MediaSource,
        cancel: CancellationFlag,
    ) -> ClipweaveResult<ExtractedFrame> {
        let mut fetched = None;
        let primary = match self.primary(source, &cancel, &mut fetched).await {
            Ok(frame) => return Ok(frame),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => err,
        };
        tracing::warn!(
            source = %source.short_identifier(),
            error = %primary,
            "Direct frame decode failed, using engine"
        );

        match self.fallback(source, &cancel, fetched).await {
            Ok(frame) => Ok(frame),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => Err(ClipweaveError::frame_extraction(
                format!("fallback failed after primary error: {primary}"),
                err,
            )),
        }
    }

    async fn fetch(
        &self,
        source: &MediaSource,
        cancel: &CancellationFlag,
    ) -> ClipweaveResult<Arc<[u8]>> {
        cancel
            .guard(within("frame fetch", self.timeouts.fetch(), self.fetcher.fetch(source)))
            .await
    }

    async fn primary(
        &self,
        source: &MediaSource,
        cancel: &CancellationFlag,
        fetched: &mut Option<Arc<[u8]>>,
    ) -> ClipweaveResult<ExtractedFrame> {
        let bytes = self.fetch(source, cancel).await?;
        *fetched = Some(bytes.clone());

        let extension = source.extension_hint().unwrap_or_else(|| "mp4".to_string());
        let mut media = cancel
            .guard(within(
                "frame open",
                self.timeouts.frame_metadata(),
                self.decoder.open(bytes, &extension),
            ))
            .await?;
        let result = self.decode_last(media.as_mut(), cancel).await;
        media.release().await;
        result
    }

    async fn decode_last(
        &self,
        media: &mut dyn DecodedMedia,
        cancel: &CancellationFlag,
    ) -> ClipweaveResult<ExtractedFrame> {
        let metadata = cancel
            .guard(within("frame metadata", self.timeouts.frame_metadata(), media.metadata()))
            .await?;
        let at = (metadata.duration_secs - self.frame.seek_epsilon_secs).max(0.0);
        let raster = cancel
            .guard(within("frame seek", self.timeouts.frame_seek(), media.decode_frame(at)))
            .await?;

        let bytes = encode_jpeg(&raster, self.frame.jpeg_quality)?;
        tracing::debug!(
            at_secs = at,
            width = raster.width(),
            height = raster.height(),
            bytes = bytes.len(),
            "Frame decoded directly"
        );
        Ok(ExtractedFrame::jpeg(
            bytes,
            Some(raster.width()),
            Some(raster.height()),
        ))
    }

    async fn fallback(
        &self,
        source: &MediaSource,
        cancel: &CancellationFlag,
        fetched: Option<Arc<[u8]>>,
    ) -> ClipweaveResult<ExtractedFrame> {
        let bytes = match fetched {
            Some(bytes) => bytes,
            None => self.fetch(source, cancel).await?,
        };
        let engine = cancel
            .guard(within(
                "frame engine load",
                self.timeouts.frame_engine(),
                self.engines.acquire(&|_| {}),
            ))
            .await?;

        let mut budgets = self.timeouts.clone();
        budgets.stage_ms = budgets.frame_engine_ms;
        budgets.exec_ms = budgets.frame_engine_ms;
        budgets.read_ms = budgets.frame_engine_ms;

        let mut session = Session::new(engine, cancel.clone(), budgets);
        let result = self.extract_in_engine(&mut session, source, &bytes).await;
        session.release().await;
        result
    }

    async fn extract_in_engine(
        &self,
        session: &mut Session,
        source: &MediaSource,
        bytes: &[u8],
    ) -> ClipweaveResult<ExtractedFrame> {
        let namespace = session.namespace().clone();
        let extension = source.extension_hint().unwrap_or_else(|| "mp4".to_string());
        let input = session.stage(&namespace, "frame-src", &extension, bytes).await?;

        let output = session.scratch(&namespace, "frame", "jpg");
        let request = ExecRequest::new(
            "last frame",
            last_frame_args(&input, self.frame.seek_epsilon_secs, &output),
        );
        session.exec(&request, &|_| {}).await?;
        let jpeg = session.read(&output).await?;
        if jpeg.is_empty() {
            return Err(ClipweaveError::engine("engine produced an empty frame"));
        }

        let dimensions = image::load_from_memory(&jpeg)
            .map(|img| (img.width(), img.height()))
            .ok();
        Ok(ExtractedFrame::jpeg(
            jpeg,
            dimensions.map(|d| d.0),
            dimensions.map(|d| d.1),
        ))
    }
}

fn encode_jpeg(raster: &RgbImage, quality: u8) -> ClipweaveResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(raster)
        .map_err(|e| ClipweaveError::engine(format!("failed to encode JPEG: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_prefers_container_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 1080, "height": 1920, "duration": "4.9"}],
            "format": {"duration": "5.000000"}
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.duration_secs, 5.0);
        assert_eq!((meta.width, meta.height), (1080, 1920));
    }

    #[test]
    fn test_parse_probe_falls_back_to_stream_duration() {
        let json = br#"{"streams": [{"width": 640, "height": 360, "duration": "2.5"}], "format": {}}"#;
        assert_eq!(parse_probe_output(json).unwrap().duration_secs, 2.5);
    }

    #[test]
    fn test_parse_probe_requires_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn test_encode_jpeg() {
        let raster = RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&raster, 85).unwrap();
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[tokio::test]
    async fn test_release_removes_temp_file() {
        let decoder = FfmpegFrameDecoder::default();
        let mut media = decoder.open(Arc::from(&b"data"[..]), "mp4").await.unwrap();
        media.release().await;
        assert!(media.metadata().await.is_err());
    }
}

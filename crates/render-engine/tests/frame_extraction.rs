//! Last-frame extraction through the direct decoder and the engine fallback.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use clipweave_clip_model::MediaSource;
use clipweave_common::config::PipelineConfig;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};
use clipweave_render_engine::frame::{DecodedMedia, MediaMetadata};
use clipweave_render_engine::{DefaultFetcher, FrameDecoder, FrameExtractor};

use support::{manager, FakeEngine, FakeLoader};

#[derive(Clone, Copy)]
enum Behavior {
    Works,
    BadMetadata,
    Hangs,
}

/// Decoder double recording the seek position and releases.
struct FakeDecoder {
    behavior: Behavior,
    seeks: Arc<Mutex<Vec<f64>>>,
    releases: Arc<AtomicUsize>,
}

impl FakeDecoder {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            seeks: Arc::new(Mutex::new(Vec::new())),
            releases: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct FakeMedia {
    behavior: Behavior,
    seeks: Arc<Mutex<Vec<f64>>>,
    releases: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl FrameDecoder for FakeDecoder {
    async fn open(&self, data: Arc<[u8]>, _extension: &str) -> ClipweaveResult<Box<dyn DecodedMedia>> {
        assert!(!data.is_empty());
        Ok(Box::new(FakeMedia {
            behavior: self.behavior,
            seeks: self.seeks.clone(),
            releases: self.releases.clone(),
        }))
    }
}

#[async_trait::async_trait]
impl DecodedMedia for FakeMedia {
    async fn metadata(&mut self) -> ClipweaveResult<MediaMetadata> {
        match self.behavior {
            Behavior::BadMetadata => Err(ClipweaveError::engine("moov atom not found")),
            _ => Ok(MediaMetadata {
                duration_secs: 4.0,
                width: 32,
                height: 18,
            }),
        }
    }

    async fn decode_frame(&mut self, at_secs: f64) -> ClipweaveResult<RgbImage> {
        self.seeks.lock().unwrap().push(at_secs);
        if let Behavior::Hangs = self.behavior {
            std::future::pending::<()>().await;
        }
        Ok(RgbImage::from_pixel(32, 18, Rgb([200, 40, 40])))
    }

    async fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn extractor(decoder: Arc<FakeDecoder>, engine: Arc<FakeEngine>, config: PipelineConfig) -> FrameExtractor {
    FrameExtractor::new(
        decoder,
        manager(FakeLoader::new(engine)),
        Arc::new(DefaultFetcher::new()),
        config.frame,
        config.timeouts,
    )
}

fn source() -> MediaSource {
    MediaSource::memory("take.mp4", b"video-bytes".to_vec())
}

#[tokio::test]
async fn direct_decode_returns_jpeg_of_the_last_frame() {
    let decoder = FakeDecoder::new(Behavior::Works);
    let engine = FakeEngine::new();

    let frame = extractor(decoder.clone(), engine.clone(), PipelineConfig::default())
        .extract(&source())
        .await
        .expect("direct path succeeds");

    assert_eq!(frame.mime_type, "image/jpeg");
    assert_eq!((frame.width, frame.height), (Some(32), Some(18)));
    assert_eq!(image::guess_format(&frame.bytes).unwrap(), ImageFormat::Jpeg);
    assert!(frame.data_url().starts_with("data:image/jpeg;base64,"));

    let seeks = decoder.seeks.lock().unwrap().clone();
    assert_eq!(seeks.len(), 1);
    assert!((seeks[0] - 3.9).abs() < 1e-9);
    assert_eq!(decoder.releases.load(Ordering::SeqCst), 1);
    assert!(engine.execs().is_empty(), "engine must not be used");
}

#[tokio::test]
async fn decoder_failure_falls_back_to_the_engine() {
    let decoder = FakeDecoder::new(Behavior::BadMetadata);
    let engine = FakeEngine::new();

    let frame = extractor(decoder.clone(), engine.clone(), PipelineConfig::default())
        .extract(&source())
        .await
        .expect("engine fallback succeeds");

    assert_eq!(frame.bytes, b"rendered:last frame".to_vec());
    assert_eq!(decoder.releases.load(Ordering::SeqCst), 1);

    let args = engine.execs()[0].args.join(" ");
    assert!(args.contains("-sseof"));
    assert!(engine.files().is_empty());
}

#[tokio::test]
async fn stalled_seek_times_out_and_still_releases() {
    let decoder = FakeDecoder::new(Behavior::Hangs);
    let engine = FakeEngine::new();
    let mut config = PipelineConfig::default();
    config.timeouts.frame_seek_ms = 50;

    let started = std::time::Instant::now();
    let frame = extractor(decoder.clone(), engine.clone(), config)
        .extract(&source())
        .await
        .expect("engine fallback succeeds");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(frame.bytes, b"rendered:last frame".to_vec());
    assert_eq!(decoder.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn both_paths_failing_reports_the_chain() {
    let decoder = FakeDecoder::new(Behavior::BadMetadata);
    let engine = FakeEngine::new();
    engine.fail_when("-sseof");

    let err = extractor(decoder, engine.clone(), PipelineConfig::default())
        .extract(&source())
        .await
        .expect_err("both paths fail");

    assert!(matches!(err, ClipweaveError::FrameExtraction { .. }));
    let message = err.to_string();
    assert!(message.contains("fallback failed after primary error"));
    assert!(message.contains("moov atom not found"));

    let cause = std::error::Error::source(&err).expect("fallback cause is chained");
    assert!(cause.to_string().contains("last frame failed"));
    assert!(engine.files().is_empty());
}

#[tokio::test]
async fn missing_source_fails_both_paths() {
    let decoder = FakeDecoder::new(Behavior::Works);
    let engine = FakeEngine::new();

    let err = extractor(decoder.clone(), engine.clone(), PipelineConfig::default())
        .extract(&MediaSource::file("/definitely/not/here.mp4"))
        .await
        .expect_err("source cannot be read");

    assert!(matches!(err, ClipweaveError::FrameExtraction { .. }));
    assert_eq!(decoder.releases.load(Ordering::SeqCst), 0);
    assert!(engine.written().is_empty());
}

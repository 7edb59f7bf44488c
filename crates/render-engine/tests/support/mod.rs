//! In-memory engine double shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipweave_clip_model::{ExportOptions, ExportProgress, MediaSource, VideoInput};
use clipweave_common::config::PipelineConfig;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};
use clipweave_render_engine::engine::FractionSink;
use clipweave_render_engine::{
    DefaultFetcher, Engine, EngineLoader, EngineManager, ExecRequest, Exporter,
};

/// Engine that keeps files in a map and fakes command output.
///
/// Output is written to the last argument: a copy of the input for a
/// single-input stream copy, fixed markers for concat-demuxer joins and
/// audio mixes, and `rendered:<label>` for everything else.
#[derive(Default)]
pub struct FakeEngine {
    files: Mutex<HashMap<String, Vec<u8>>>,
    written: Mutex<Vec<String>>,
    execs: Mutex<Vec<ExecRequest>>,
    fail_rules: Mutex<Vec<String>>,
    hang_rules: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail any invocation whose joined arguments contain `needle`.
    pub fn fail_when(&self, needle: &str) {
        self.fail_rules.lock().unwrap().push(needle.to_string());
    }

    /// Never finish any invocation whose joined arguments contain `needle`.
    pub fn hang_when(&self, needle: &str) {
        self.hang_rules.lock().unwrap().push(needle.to_string());
    }

    pub fn execs(&self) -> Vec<ExecRequest> {
        self.execs.lock().unwrap().clone()
    }

    pub fn exec_labels(&self) -> Vec<String> {
        self.execs().into_iter().map(|r| r.label).collect()
    }

    /// Files currently present.
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every name ever written, in order.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    fn matches(rules: &Mutex<Vec<String>>, joined: &str) -> bool {
        rules.lock().unwrap().iter().any(|needle| joined.contains(needle.as_str()))
    }

    fn store(&self, name: &str, data: Vec<u8>) {
        self.written.lock().unwrap().push(name.to_string());
        self.files.lock().unwrap().insert(name.to_string(), data);
    }
}

#[async_trait::async_trait]
impl Engine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> ClipweaveResult<()> {
        self.store(name, data.to_vec());
        Ok(())
    }

    async fn read_file(&self, name: &str) -> ClipweaveResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClipweaveError::engine(format!("no such file: {name}")))
    }

    async fn delete_file(&self, name: &str) -> ClipweaveResult<()> {
        self.files
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClipweaveError::engine(format!("no such file: {name}")))
    }

    async fn exec(&self, request: &ExecRequest, progress: FractionSink<'_>) -> ClipweaveResult<()> {
        self.execs.lock().unwrap().push(request.clone());
        let joined = request.args.join(" ");

        if Self::matches(&self.hang_rules, &joined) {
            std::future::pending::<()>().await;
        }
        if Self::matches(&self.fail_rules, &joined) {
            return Err(ClipweaveError::engine(format!(
                "{} failed: simulated failure",
                request.label
            )));
        }

        progress(0.5);
        let inputs: Vec<&String> = request
            .args
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| &w[1])
            .collect();
        let data = if joined.contains("-f concat") {
            b"fallback-joined".to_vec()
        } else if joined.contains("amix") {
            b"mixed".to_vec()
        } else if joined.contains("-c copy") && inputs.len() == 1 {
            self.read_file(inputs[0]).await?
        } else {
            format!("rendered:{}", request.label).into_bytes()
        };
        let output = request
            .args
            .last()
            .ok_or_else(|| ClipweaveError::engine("no output argument"))?;
        self.store(output, data);
        progress(1.0);
        Ok(())
    }
}

/// Loader handing out one shared [`FakeEngine`].
pub struct FakeLoader {
    engine: Arc<FakeEngine>,
    pub loads: AtomicUsize,
}

impl FakeLoader {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            loads: AtomicUsize::new(0),
        })
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EngineLoader for FakeLoader {
    async fn load(&self, progress: FractionSink<'_>) -> ClipweaveResult<Arc<dyn Engine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        progress(0.25);
        tokio::time::sleep(Duration::from_millis(5)).await;
        progress(1.0);
        Ok(self.engine.clone())
    }
}

pub fn manager(loader: Arc<FakeLoader>) -> Arc<EngineManager> {
    Arc::new(EngineManager::new(loader, Duration::from_secs(5)))
}

pub fn exporter_with(loader: Arc<FakeLoader>, config: PipelineConfig) -> Exporter {
    Exporter::new(manager(loader), Arc::new(DefaultFetcher::new()), config)
}

pub fn exporter(engine: Arc<FakeEngine>) -> Exporter {
    exporter_with(FakeLoader::new(engine), PipelineConfig::default())
}

pub fn clip_bytes(scene: u32) -> Vec<u8> {
    format!("source-bytes-of-scene-{scene}").into_bytes()
}

/// A clip whose bytes are held in memory.
pub fn clip(scene: u32, duration: f64) -> VideoInput {
    VideoInput::new(
        MediaSource::memory(format!("scene{scene}.mp4"), clip_bytes(scene)),
        scene,
        duration,
    )
}

/// Options recording every progress event.
pub fn recording_options() -> (ExportOptions, Arc<Mutex<Vec<ExportProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let options = ExportOptions::default().with_progress(Arc::new(move |p| {
        sink.lock().unwrap().push(p);
    }));
    (options, events)
}

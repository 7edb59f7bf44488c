//! Per-call view of the shared engine.
//!
//! A [`Session`] names scratch files inside a namespace, remembers every
//! name it hands out, and runs each engine call under its time budget and
//! the caller's cancellation flag.

use std::sync::Arc;

use clipweave_clip_model::MediaSource;
use clipweave_common::config::TimeoutConfig;
use clipweave_common::deadline::{within, CancellationFlag};
use clipweave_common::error::ClipweaveResult;

use crate::engine::{stage, Engine, ExecRequest, FractionSink, Namespace, StagedFiles};
use crate::fetch::SourceFetcher;

pub struct Session {
    engine: Arc<dyn Engine>,
    namespace: Namespace,
    staged: StagedFiles,
    cancel: CancellationFlag,
    timeouts: TimeoutConfig,
}

impl Session {
    pub fn new(engine: Arc<dyn Engine>, cancel: CancellationFlag, timeouts: TimeoutConfig) -> Self {
        Self {
            engine,
            namespace: Namespace::fresh(),
            staged: StagedFiles::new(),
            cancel,
            timeouts,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn staged(&self) -> &[String] {
        self.staged.names()
    }

    pub fn check_cancelled(&self) -> ClipweaveResult<()> {
        self.cancel.check()
    }

    /// Reserve a tracked scratch name in `namespace`.
    pub fn scratch(&mut self, namespace: &Namespace, stem: &str, extension: &str) -> String {
        self.staged.track(namespace.file(stem, extension))
    }

    pub async fn fetch(
        &self,
        fetcher: &dyn SourceFetcher,
        source: &MediaSource,
    ) -> ClipweaveResult<Arc<[u8]>> {
        let step = format!("fetch {}", source.short_identifier());
        self.cancel
            .guard(within(&step, self.timeouts.fetch(), fetcher.fetch(source)))
            .await
    }

    /// Write `data` to a new scratch file in `namespace` and return its
    /// name. The name is tracked even if the write fails.
    pub async fn stage(
        &mut self,
        namespace: &Namespace,
        stem: &str,
        extension: &str,
        data: &[u8],
    ) -> ClipweaveResult<String> {
        let name = namespace.file(stem, extension);
        let step = format!("stage {name}");
        let write = stage(self.engine.as_ref(), &mut self.staged, name, data);
        self.cancel
            .guard(within(&step, self.timeouts.stage(), write))
            .await
    }

    pub async fn read(&self, name: &str) -> ClipweaveResult<Vec<u8>> {
        let step = format!("read {name}");
        self.cancel
            .guard(within(&step, self.timeouts.read(), self.engine.read_file(name)))
            .await
    }

    pub async fn exec(&self, request: &ExecRequest, progress: FractionSink<'_>) -> ClipweaveResult<()> {
        let step = format!("exec {}", request.label);
        self.cancel
            .guard(within(&step, self.timeouts.exec(), self.engine.exec(request, progress)))
            .await
    }

    /// Delete every scratch file handed out so far. Never fails.
    pub async fn release(&mut self) {
        self.staged.release(self.engine.as_ref()).await;
    }
}

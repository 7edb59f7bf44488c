//! Media engine abstraction.
//!
//! An [`Engine`] owns a private scratch filesystem and runs argument lists
//! against files staged in it. Every file a job creates is named inside a
//! per-job [`Namespace`] and tracked in [`StagedFiles`], so concurrent jobs
//! sharing one engine never collide and cleanup can be done by name.

pub mod ffmpeg;
pub mod lifecycle;

use clipweave_common::error::ClipweaveResult;

pub use ffmpeg::{FfmpegEngine, FfmpegLoader};
pub use lifecycle::{EngineLoader, EngineManager, EngineState};

/// Progress sink for engine operations. Receives fractions in `[0, 1]`.
pub type FractionSink<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Short name used in logs and errors.
    pub label: String,

    /// Arguments after the engine's own fixed flags.
    pub args: Vec<String>,

    /// Expected output length, used to turn native progress into a fraction.
    pub expected_duration_secs: Option<f64>,
}

impl ExecRequest {
    pub fn new(label: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            args,
            expected_duration_secs: None,
        }
    }

    pub fn with_expected_duration(mut self, secs: f64) -> Self {
        self.expected_duration_secs = Some(secs);
        self
    }
}

/// A media processing engine with its own scratch filesystem.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Write (or overwrite) a scratch file.
    async fn write_file(&self, name: &str, data: &[u8]) -> ClipweaveResult<()>;

    /// Read a scratch file back.
    async fn read_file(&self, name: &str) -> ClipweaveResult<Vec<u8>>;

    /// Remove a scratch file.
    async fn delete_file(&self, name: &str) -> ClipweaveResult<()>;

    /// Run one invocation to completion, reporting progress as it goes.
    async fn exec(&self, request: &ExecRequest, progress: FractionSink<'_>) -> ClipweaveResult<()>;
}

/// Per-job prefix for scratch file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    /// A new random namespace (`cw-1a2b3c4d`).
    pub fn fresh() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("cw-{}", &id[..8]))
    }

    /// A namespace nested under this one (`cw-1a2b3c4d-fb`).
    pub fn child(&self, tag: &str) -> Self {
        Self(format!("{}-{tag}", self.0))
    }

    /// Scratch file name inside the namespace.
    pub fn file(&self, stem: &str, extension: &str) -> String {
        format!("{}-{stem}.{extension}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Names of scratch files a job has created or is about to create.
///
/// Names are recorded before the write is attempted, so a write that
/// fails half way is still cleaned up.
#[derive(Debug, Default)]
pub struct StagedFiles {
    names: Vec<String>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name and hand it back.
    pub fn track(&mut self, name: String) -> String {
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Delete every tracked file, ignoring failures.
    pub async fn release(&mut self, engine: &dyn Engine) {
        let names = std::mem::take(&mut self.names);
        best_effort_release(engine, &names).await;
    }
}

/// Delete scratch files, logging and swallowing individual failures.
///
/// Never fails: a missing file or a broken engine must not turn a finished
/// job into an error.
pub async fn best_effort_release(engine: &dyn Engine, names: &[String]) {
    let mut failed = 0usize;
    for name in names {
        if let Err(err) = engine.delete_file(name).await {
            failed += 1;
            tracing::debug!(file = %name, error = %err, "Scratch file not released");
        }
    }
    tracing::debug!(
        engine = engine.name(),
        released = names.len() - failed,
        failed,
        "Scratch files released"
    );
}

/// Write `data` to a scratch file that is tracked before the write starts.
pub async fn stage(
    engine: &dyn Engine,
    staged: &mut StagedFiles,
    name: String,
    data: &[u8],
) -> ClipweaveResult<String> {
    let name = staged.track(name);
    engine.write_file(&name, data).await?;
    Ok(name)
}

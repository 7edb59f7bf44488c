//! ffmpeg-backed engine.
//!
//! Scratch files live in a private temporary directory that is removed when
//! the engine is dropped. Each [`Engine::exec`] spawns one ffmpeg process in
//! that directory with machine-readable progress on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use super::{Engine, EngineLoader, ExecRequest, FractionSink};

/// Lines of ffmpeg stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 12;

/// Flags prepended to every invocation.
const FIXED_ARGS: [&str; 8] = [
    "-y",
    "-hide_banner",
    "-loglevel",
    "error",
    "-nostats",
    "-progress",
    "pipe:1",
    "-nostdin",
];

/// Engine that shells out to an ffmpeg binary.
#[derive(Debug)]
pub struct FfmpegEngine {
    binary: PathBuf,
    scratch: tempfile::TempDir,
}

impl FfmpegEngine {
    /// Create an engine with a fresh scratch directory.
    pub fn new(binary: impl Into<PathBuf>) -> ClipweaveResult<Self> {
        let scratch = tempfile::Builder::new().prefix("clipweave-").tempdir()?;
        Ok(Self {
            binary: binary.into(),
            scratch,
        })
    }

    /// Directory holding the scratch files.
    pub fn scratch_dir(&self) -> &std::path::Path {
        self.scratch.path()
    }

    fn resolve(&self, name: &str) -> ClipweaveResult<PathBuf> {
        let plain = !name.is_empty()
            && !name.contains('/')
            && !name.contains('\\')
            && name != "."
            && name != "..";
        if !plain {
            return Err(ClipweaveError::engine(format!(
                "scratch file name must be a plain file name, got {name:?}"
            )));
        }
        Ok(self.scratch.path().join(name))
    }
}

#[async_trait::async_trait]
impl Engine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> ClipweaveResult<()> {
        let path = self.resolve(name)?;
        tokio::fs::write(&path, data).await.map_err(|e| {
            ClipweaveError::engine(format!("failed to write scratch file {name}: {e}"))
        })
    }

    async fn read_file(&self, name: &str) -> ClipweaveResult<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ClipweaveError::engine(format!("failed to read scratch file {name}: {e}")))
    }

    async fn delete_file(&self, name: &str) -> ClipweaveResult<()> {
        let path = self.resolve(name)?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            ClipweaveError::engine(format!("failed to delete scratch file {name}: {e}"))
        })
    }

    async fn exec(&self, request: &ExecRequest, progress: FractionSink<'_>) -> ClipweaveResult<()> {
        tracing::debug!(label = %request.label, args = ?request.args, "Running ffmpeg");

        let mut cmd = Command::new(&self.binary);
        cmd.args(FIXED_ARGS)
            .args(&request.args)
            .current_dir(self.scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            ClipweaveError::engine(format!("failed to start ffmpeg for {}: {e}", request.label))
        })?;

        tracing::info!(
            pid = child.id(),
            label = %request.label,
            args_len = request.args.len(),
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClipweaveError::engine("failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClipweaveError::engine("failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ClipweaveError::engine(format!("failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key == "progress" {
                progress(state.fraction(request.expected_duration_secs));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ClipweaveError::engine(format!("failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(ClipweaveError::engine(format!(
                "{} failed ({status}): {}",
                request.label,
                stderr_tail(&stderr_output)
            )));
        }

        tracing::info!(
            label = %request.label,
            elapsed_secs = started.elapsed().as_secs_f64(),
            out_time_secs = state.out_time_secs,
            "ffmpeg finished"
        );
        Ok(())
    }
}

/// Loader that checks for an ffmpeg binary and gives it a scratch directory.
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    binary: PathBuf,
}

impl Default for FfmpegLoader {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegLoader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl EngineLoader for FfmpegLoader {
    async fn load(&self, progress: FractionSink<'_>) -> ClipweaveResult<Arc<dyn Engine>> {
        progress(0.0);
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ClipweaveError::engine_load(format!(
                    "ffmpeg not runnable at {}: {e}",
                    self.binary.display()
                ))
            })?;
        if !output.status.success() {
            return Err(ClipweaveError::engine_load(format!(
                "ffmpeg -version exited with {}",
                output.status
            )));
        }
        progress(0.5);

        let version = String::from_utf8_lossy(&output.stdout);
        let engine = FfmpegEngine::new(self.binary.clone())
            .map_err(|e| ClipweaveError::engine_load(format!("failed to create scratch dir: {e}")))?;
        tracing::info!(
            version = version.lines().next().unwrap_or("unknown"),
            scratch = %engine.scratch_dir().display(),
            "ffmpeg engine ready"
        );
        progress(1.0);
        Ok(Arc::new(engine))
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value.trim() == "end";
            }
            _ => {}
        }
    }

    fn fraction(&self, expected_duration_secs: Option<f64>) -> f64 {
        if self.complete {
            return 1.0;
        }
        match expected_duration_secs {
            Some(total) if total > 0.0 => (self.out_time_secs / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}

/// Whether a binary can be found on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

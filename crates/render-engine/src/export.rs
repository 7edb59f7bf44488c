//! Export driver.
//!
//! Runs one composition through the phases
//! `loading → preparing → concatenating → finalizing → complete`, with an
//! `error` event emitted before any failure is returned.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};

use clipweave_clip_model::{
    ContainerFormat, ExportOptions, ExportPhase, ExportProgress, ExportWarning, VideoInput,
};
use clipweave_common::config::{PipelineConfig, ProgressWindows};
use clipweave_common::error::ClipweaveResult;

use crate::command::composition_args;
use crate::engine::{EngineManager, ExecRequest};
use crate::fallback::FallbackRenderer;
use crate::fetch::{DefaultFetcher, SourceFetcher};
use crate::graph::{CompositionStrategy, GraphBuilder, GraphPlan};
use crate::mixer::AudioMixer;
use crate::session::Session;

/// A finished export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Encoded container bytes.
    pub data: Vec<u8>,

    pub container: ContainerFormat,

    /// Strategy the plan selected. A fallback render still reports the
    /// planned strategy; see `warnings`.
    pub strategy: CompositionStrategy,

    /// Planned timeline length in seconds.
    pub duration_secs: f64,

    pub warnings: Vec<ExportWarning>,

    pub completed_at: DateTime<Utc>,
}

impl ExportResult {
    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type()
    }

    /// Whether the output differs from what was requested.
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Composes clip sets into single files using a shared engine.
pub struct Exporter {
    engines: Arc<EngineManager>,
    fetcher: Arc<dyn SourceFetcher>,
    config: PipelineConfig,
    builder: GraphBuilder,
    mixer: AudioMixer,
    fallback: FallbackRenderer,
}

impl Exporter {
    pub fn new(
        engines: Arc<EngineManager>,
        fetcher: Arc<dyn SourceFetcher>,
        config: PipelineConfig,
    ) -> Self {
        let builder = GraphBuilder::new(config.canonical.clone(), config.silence.clone());
        let mixer = AudioMixer::new(config.encoding.clone());
        let fallback = FallbackRenderer::new(config.encoding.clone(), config.canonical.clone());
        Self {
            engines,
            fetcher,
            config,
            builder,
            mixer,
            fallback,
        }
    }

    /// Exporter on the process-wide engine, the default fetcher and the
    /// user's config file.
    pub fn with_defaults() -> Self {
        Self::new(
            EngineManager::global(),
            Arc::new(DefaultFetcher::new()),
            PipelineConfig::load(),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate and plan without touching the engine.
    pub fn plan(&self, clips: &[VideoInput], options: &ExportOptions) -> ClipweaveResult<GraphPlan> {
        let plan = self.builder.build(clips, options.remove_silence)?;
        if let Some(track) = &options.audio_track {
            track.validate()?;
        }
        Ok(plan)
    }

    /// Compose `clips` into one file.
    pub async fn export(
        &self,
        clips: &[VideoInput],
        options: &ExportOptions,
    ) -> ClipweaveResult<ExportResult> {
        let started = Instant::now();
        let reporter = PhaseReporter::new(options);
        tracing::info!(
            clips = clips.len(),
            container = ?options.container,
            remove_silence = options.remove_silence,
            audio_track = options.audio_track.is_some(),
            "Starting export"
        );

        match self.run(clips, options, &reporter).await {
            Ok(result) => {
                reporter.report(ExportPhase::Complete, 100.0, "Export complete");
                tracing::info!(
                    strategy = ?result.strategy,
                    bytes = result.data.len(),
                    duration_secs = result.duration_secs,
                    warnings = result.warnings.len(),
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Export finished"
                );
                Ok(result)
            }
            Err(err) => {
                let (phase, progress) = reporter.last();
                reporter.report(ExportPhase::Error, progress, err.to_string());
                tracing::error!(
                    error = %err,
                    failed_phase = ?phase,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Export failed"
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        clips: &[VideoInput],
        options: &ExportOptions,
        reporter: &PhaseReporter<'_>,
    ) -> ClipweaveResult<ExportResult> {
        let plan = self.plan(clips, options)?;
        let cancel = options.cancellation.clone().unwrap_or_default();
        cancel.check()?;

        reporter.report(ExportPhase::Loading, 0.0, "Loading engine");
        let engine = cancel
            .guard(self.engines.acquire(&|f: f64| {
                reporter.report(ExportPhase::Loading, f * 100.0, "Loading engine")
            }))
            .await?;
        reporter.report(ExportPhase::Loading, 100.0, "Engine ready");

        let mut session = Session::new(engine, cancel, self.config.timeouts.clone());
        let outcome = self.compose(&mut session, &plan, options, reporter).await;
        session.release().await;
        outcome
    }

    async fn compose(
        &self,
        session: &mut Session,
        plan: &GraphPlan,
        options: &ExportOptions,
        reporter: &PhaseReporter<'_>,
    ) -> ClipweaveResult<ExportResult> {
        let windows = &self.config.progress;
        let namespace = session.namespace().clone();
        let total = plan.clips.len();

        reporter.report(ExportPhase::Preparing, windows.preparing.0, "Preparing clips");
        let mut inputs = Vec::with_capacity(total);
        for (i, clip) in plan.clips.iter().enumerate() {
            let bytes = session.fetch(self.fetcher.as_ref(), &clip.source).await?;
            let extension = clip.source.extension_hint().unwrap_or_else(|| "mp4".to_string());
            let name = session
                .stage(&namespace, &format!("in{i}"), &extension, &bytes)
                .await?;
            inputs.push(name);

            reporter.emit(
                ExportProgress::new(
                    ExportPhase::Preparing,
                    ProgressWindows::scale(windows.preparing, (i + 1) as f64 / total as f64),
                    format!("Staged {}", clip.source.short_identifier()),
                )
                .with_file(i + 1, total),
            );
        }

        let mut warnings = Vec::new();
        let composed = self
            .concatenate(session, plan, &inputs, options.container, reporter, &mut warnings)
            .await?;

        reporter.report(ExportPhase::Finalizing, windows.finalizing.0, "Finalizing");
        let mut data = None;
        if let Some(track) = &options.audio_track {
            let mixing = |f: f64| {
                reporter.report(
                    ExportPhase::Finalizing,
                    ProgressWindows::scale(windows.finalizing, f * 0.9),
                    "Mixing audio track",
                )
            };
            match self
                .mixer
                .overlay(
                    session,
                    self.fetcher.as_ref(),
                    &composed,
                    plan.total_duration(),
                    track,
                    &mixing,
                )
                .await
            {
                Ok(bytes) => data = Some(bytes),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "Audio overlay failed, keeping composed audio");
                    warnings.push(ExportWarning::AudioOverlayOmitted {
                        reason: err.to_string(),
                    });
                }
            }
        }
        let data = match data {
            Some(bytes) => bytes,
            None => session.read(&composed).await?,
        };
        reporter.report(ExportPhase::Finalizing, windows.finalizing.1, "Cleaning up");

        Ok(ExportResult {
            data,
            container: options.container,
            strategy: plan.strategy,
            duration_secs: plan.total_duration(),
            warnings,
            completed_at: Utc::now(),
        })
    }

    /// Run the planned graph, falling back once to the transition-free
    /// render. Returns the scratch name of the composed file.
    async fn concatenate(
        &self,
        session: &mut Session,
        plan: &GraphPlan,
        inputs: &[String],
        container: ContainerFormat,
        reporter: &PhaseReporter<'_>,
        warnings: &mut Vec<ExportWarning>,
    ) -> ClipweaveResult<String> {
        let window = self.config.progress.concatenating;
        let namespace = session.namespace().clone();
        let composing = |f: f64| {
            reporter.report(
                ExportPhase::Concatenating,
                ProgressWindows::scale(window, f),
                "Composing clips",
            )
        };
        composing(0.0);

        let output = session.scratch(&namespace, "out", container.extension());
        let request = ExecRequest::new(
            plan.strategy.label(),
            composition_args(
                plan,
                inputs,
                &output,
                &self.config.encoding,
                &self.config.canonical,
            ),
        )
        .with_expected_duration(plan.total_duration());

        let primary = match session.exec(&request, &composing).await {
            Ok(()) => return Ok(output),
            Err(err) if !err.is_recoverable() => return Err(err),
            Err(err) => err,
        };
        tracing::warn!(
            error = %primary,
            strategy = ?plan.strategy,
            "Primary render failed, retrying without transitions"
        );

        match self
            .fallback
            .render(session, plan, inputs, container, &composing)
            .await
        {
            Ok(joined) => {
                tracing::warn!(
                    junctions = plan.junctions.len(),
                    "Export rendered by the fallback path; transitions were dropped"
                );
                warnings.push(ExportWarning::TransitionsDropped {
                    primary_error: primary.to_string(),
                });
                Ok(joined)
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "Fallback render failed");
                Err(primary)
            }
        }
    }
}

/// Delivers progress events, keeping each phase's value non-decreasing.
struct PhaseReporter<'a> {
    options: &'a ExportOptions,
    last: Mutex<(ExportPhase, f64)>,
}

impl<'a> PhaseReporter<'a> {
    fn new(options: &'a ExportOptions) -> Self {
        Self {
            options,
            last: Mutex::new((ExportPhase::Loading, 0.0)),
        }
    }

    fn report(&self, phase: ExportPhase, progress: f64, message: impl Into<String>) {
        self.emit(ExportProgress::new(phase, progress, message));
    }

    fn emit(&self, mut event: ExportProgress) {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.0 == event.phase {
                event.progress = event.progress.max(last.1);
            }
            *last = (event.phase, event.progress);
        }
        self.options.report(event);
    }

    fn last(&self) -> (ExportPhase, f64) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

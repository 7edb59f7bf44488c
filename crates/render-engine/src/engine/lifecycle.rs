//! Shared engine lifecycle.
//!
//! Loading an engine is slow, so one instance is shared by every job. The
//! first caller starts the load in a background task; concurrent callers
//! wait on the same load and see the same progress. A failed load leaves
//! the manager in a retryable state.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use clipweave_common::config::PipelineConfig;
use clipweave_common::deadline::within;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};

use super::{Engine, FfmpegLoader, FractionSink};

/// Produces a ready engine.
#[async_trait::async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, progress: FractionSink<'_>) -> ClipweaveResult<Arc<dyn Engine>>;
}

/// Observable lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Loaded,
    /// The last load failed; the next acquire starts a new one.
    Failed(String),
}

#[derive(Clone)]
enum LoadStatus {
    Progress(f64),
    Done(Result<Arc<dyn Engine>, String>),
}

enum Slot {
    Uninitialized,
    Loading(watch::Receiver<LoadStatus>),
    Loaded(Arc<dyn Engine>),
    Failed(String),
}

/// Owns the single shared engine instance.
pub struct EngineManager {
    loader: Arc<dyn EngineLoader>,
    load_budget: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("state", &self.state())
            .field("load_budget", &self.load_budget)
            .finish()
    }
}

impl EngineManager {
    pub fn new(loader: Arc<dyn EngineLoader>, load_budget: Duration) -> Self {
        Self {
            loader,
            load_budget,
            slot: Arc::new(Mutex::new(Slot::Uninitialized)),
        }
    }

    /// Process-wide manager backed by the `ffmpeg` on `PATH`.
    pub fn global() -> Arc<EngineManager> {
        static GLOBAL: OnceLock<Arc<EngineManager>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let budget = PipelineConfig::load().timeouts.engine_load();
                Arc::new(EngineManager::new(Arc::new(FfmpegLoader::default()), budget))
            })
            .clone()
    }

    pub fn state(&self) -> EngineState {
        match &*lock(&self.slot) {
            Slot::Uninitialized => EngineState::Uninitialized,
            Slot::Loading(_) => EngineState::Loading,
            Slot::Loaded(_) => EngineState::Loaded,
            Slot::Failed(reason) => EngineState::Failed(reason.clone()),
        }
    }

    /// Return the shared engine, loading it if needed.
    ///
    /// At most one load is in flight at a time. `progress` receives load
    /// fractions while this caller waits.
    pub async fn acquire(&self, progress: FractionSink<'_>) -> ClipweaveResult<Arc<dyn Engine>> {
        let mut status = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Loaded(engine) => return Ok(engine.clone()),
                Slot::Loading(rx) => rx.clone(),
                Slot::Uninitialized | Slot::Failed(_) => {
                    let (tx, rx) = watch::channel(LoadStatus::Progress(0.0));
                    *slot = Slot::Loading(rx.clone());
                    self.spawn_load(tx);
                    rx
                }
            }
        };

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                LoadStatus::Progress(fraction) => progress(fraction),
                LoadStatus::Done(Ok(engine)) => return Ok(engine),
                LoadStatus::Done(Err(reason)) => return Err(ClipweaveError::engine_load(reason)),
            }
            if status.changed().await.is_err() {
                // The loader task went away without reporting.
                let mut slot = lock(&self.slot);
                if matches!(&*slot, Slot::Loading(_)) {
                    *slot = Slot::Uninitialized;
                }
                return Err(ClipweaveError::engine_load("engine load was abandoned"));
            }
        }
    }

    fn spawn_load(&self, tx: watch::Sender<LoadStatus>) {
        let loader = self.loader.clone();
        let slot = self.slot.clone();
        let budget = self.load_budget;

        tokio::spawn(async move {
            tracing::info!(budget_ms = budget.as_millis() as u64, "Loading engine");
            let report = |fraction: f64| {
                tx.send_replace(LoadStatus::Progress(fraction.clamp(0.0, 1.0)));
            };
            let result = within("engine load", budget, loader.load(&report)).await;

            // The slot is settled before waiters wake, so a waiter that
            // retries immediately sees the final state.
            let done = {
                let mut slot = lock(&slot);
                match result {
                    Ok(engine) => {
                        tracing::info!(engine = engine.name(), "Engine loaded");
                        *slot = Slot::Loaded(engine.clone());
                        LoadStatus::Done(Ok(engine))
                    }
                    Err(err) => {
                        let reason = match err {
                            ClipweaveError::EngineLoad { message } => message,
                            other => other.to_string(),
                        };
                        tracing::error!(error = %reason, "Engine load failed");
                        *slot = Slot::Failed(reason.clone());
                        LoadStatus::Done(Err(reason))
                    }
                }
            };
            tx.send_replace(done);
        });
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

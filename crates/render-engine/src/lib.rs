//! Clipweave Render Engine
//!
//! Composes ordered clip sets into a single exported file and extracts
//! still frames, on top of a shared ffmpeg engine.
//!
//! # Pipeline Architecture
//!
//! ```text
//! clips ──── validate + sort ──── GraphBuilder ──── GraphPlan
//!                                                      │
//! EngineManager::acquire ─────────────────────────────┤  loading
//!                                                      │
//! SourceFetcher ──── stage into engine (cw-xxxxxxxx-*) ┤  preparing
//!                                                      │
//!                    primary graph ──(fails)── fallback ┤  concatenating
//!                                                      │
//! AudioTrack ─────── AudioMixer (optional) ────────────┤  finalizing
//!                                                      ▼
//!                                         release scratch files
//!                                                      │
//!                                                      ▼
//!                                                ExportResult
//! ```

pub mod command;
pub mod engine;
pub mod export;
pub mod fallback;
pub mod fetch;
pub mod frame;
pub mod graph;
pub mod mixer;
pub mod session;

pub use engine::{Engine, EngineLoader, EngineManager, EngineState, ExecRequest, FfmpegLoader};
pub use export::*;
pub use fetch::{DefaultFetcher, SourceFetcher};
pub use frame::{FfmpegFrameDecoder, FrameDecoder, FrameExtractor};
pub use graph::{CompositionStrategy, GraphBuilder, GraphPlan};

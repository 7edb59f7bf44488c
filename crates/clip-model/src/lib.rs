//! Clipweave Clip Model
//!
//! Defines the data contracts for a composition:
//! - **Sources:** where clip and track bytes come from
//! - **Clips:** ordered segments with trim windows, mute flags, and transitions
//! - **Audio:** the optional overlay track
//! - **Export:** options, progress events, and warnings
//! - **Frames:** encoded thumbnails
//!
//! All times are in seconds unless a field name says otherwise.

pub mod audio;
pub mod clip;
pub mod export;
pub mod frame;
pub mod source;

pub use audio::*;
pub use clip::*;
pub use export::*;
pub use frame::*;
pub use source::*;

//! Score Editor WASM API
//!
//! # Module Structure
//!
//! - `helpers`: serialization across the JS boundary and error conversion
//! - `editor`: `ScoreEditor`, the handle JavaScript holds for one document

pub mod editor;
pub mod helpers;

pub use editor::{HistoryState, ScoreEditor};

//! Models module for the score document
//!
//! The document is a strict ownership tree: Document → Sheet → Context →
//! Voice → MusicElement. Cross-links (slurs, lyrics associations) are
//! stable ids resolved through the owning document.

pub mod contexts;
pub mod core;
pub mod duration;
pub mod elements;
pub mod index;
pub mod pitch;

// Re-export commonly used types
pub use contexts::*;
pub use core::*;
pub use duration::{BaseLength, Duration, Time};
pub use elements::*;
pub use pitch::{Pitch, PitchClass};

//! Score editor core
//!
//! The document model of a notation editor, its undo/redo command engine,
//! the CanorusML file format and LilyPond import/export. Compiled to WASM
//! for the browser front end; the same crate is used natively in tests.

pub mod api;
pub mod canorusml;
pub mod error;
pub mod lilypond;
pub mod models;
pub mod undo;

// Re-export commonly used types
pub use error::{EditorError, ParseError, Result};
pub use models::{Context, Document, MusicElement, Sheet, Staff, Voice};
pub use undo::{Command, EditSession, UndoStack};

use wasm_bindgen::prelude::*;

// This is like the `main` function, but for WASM modules.
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "console_log")]
    {
        if console_log::init_with_level(log::Level::Debug).is_err() {
            // Reloaded module; the first logger stays
            log::debug!("logger already initialized");
        }
    }

    log::info!("Score editor WASM module initialized");
}

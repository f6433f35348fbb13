//! LilyPond import and export
//!
//! The importer reads the subset of LilyPond a notation editor can represent:
//! staves, voices, lyrics, `\relative`/`\fixed` music, repeats with
//! alternatives and the common marks. The exporter writes documents back in
//! a form the importer reads to the same tree.

mod export;
mod lexer;
mod parser;
mod pitch_names;
mod state;
mod templates;

pub use pitch_names::PitchLanguage;

use crate::error::{EditorError, ParseError, Result};
use crate::models::Document;
use crate::undo::{Command, EditSession};
use parser::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// LilyPond version written to exported files
pub const DEFAULT_LILYPOND_VERSION: &str = "2.24.0";

/// Options of the importer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportSettings {
    /// Note-name language before any `\language` command
    pub language: PitchLanguage,

    /// Bare note names take the accidental of the current key (`f` in
    /// G major is read as f sharp). LilyPond itself reads names absolutely,
    /// so this is off by default.
    pub key_accidentals: bool,
}

/// Options of the exporter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportSettings {
    pub lilypond_version: String,
    pub language: PitchLanguage,
    /// Spaces per nesting level
    pub indent: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            lilypond_version: DEFAULT_LILYPOND_VERSION.to_string(),
            language: PitchLanguage::Nederlands,
            indent: 2,
        }
    }
}

/// Parses LilyPond text into a new document
pub fn import(text: &str) -> std::result::Result<Document, ParseError> {
    import_with_settings(text, &ImportSettings::default())
}

pub fn import_with_settings(
    text: &str,
    settings: &ImportSettings,
) -> std::result::Result<Document, ParseError> {
    Parser::new(text, settings, None).parse().map_err(|e| match e {
        EditorError::Parse(parse) => parse,
        other => ParseError::new(1, 1, other.to_string()),
    })
}

/// Import that stops with [`EditorError::Cancelled`] once `cancel` is set.
/// The flag is checked between tokens, so another thread can abort a long
/// import; a cancelled import leaves nothing behind.
pub fn import_cancellable(text: &str, settings: &ImportSettings, cancel: &AtomicBool) -> Result<Document> {
    Parser::new(text, settings, Some(cancel)).parse()
}

pub fn import_file(path: impl AsRef<Path>) -> Result<Document> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(import(&text)?)
}

/// Imports into an open session. Every imported sheet is appended to the
/// session's document as one undoable step; returns the number of sheets added.
pub fn import_into_session(session: &mut EditSession, text: &str) -> Result<usize> {
    let imported = import(text)?;
    if imported.sheets.is_empty() {
        return Ok(0);
    }

    // Fresh ids and names are taken from a scratch copy so the whole import
    // lands as a single batch
    let mut scratch = session.document().clone();
    let mut commands = Vec::with_capacity(imported.sheets.len());
    for sheet in imported.sheets {
        let mut sheet = scratch.adopt_sheet(sheet);
        sheet.name = scratch.unique_sheet_name(&sheet.name);
        scratch.sheets.push(sheet.clone());
        commands.push(Command::add_sheet(sheet));
    }
    let count = commands.len();
    session.execute(Command::batch("Import LilyPond", commands))?;
    log::info!("imported {} sheet(s) of LilyPond", count);
    Ok(count)
}

/// Writes a document as LilyPond
pub fn export(doc: &Document) -> Result<String> {
    export_with_settings(doc, &ExportSettings::default())
}

pub fn export_with_settings(doc: &Document, settings: &ExportSettings) -> Result<String> {
    export::export_document(doc, settings)
}

pub fn export_file(path: impl AsRef<Path>, doc: &Document) -> Result<()> {
    let text = export(doc)?;
    std::fs::write(path.as_ref(), text)?;
    log::info!("exported {}", path.as_ref().display());
    Ok(())
}

//! `ScoreEditor`: one document and its history, owned by the WASM module
//!
//! JavaScript never holds the document itself. It sends commands and file
//! text in, and reads the document back as JSON when it redraws.

use super::helpers::{deserialize, js_error, serialize};
use crate::canorusml;
use crate::error::{EditorError, Result as EditorResult};
use crate::lilypond::{self, ExportSettings};
use crate::models::Document;
use crate::undo::{Command, EditSession};
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Undo/redo state for the toolbar
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_text: Option<String>,
    pub redo_text: Option<String>,
    pub modified: bool,
}

impl HistoryState {
    pub fn of(session: &EditSession) -> Self {
        Self {
            can_undo: session.can_undo(),
            can_redo: session.can_redo(),
            undo_text: session.undo_text(),
            redo_text: session.redo_text(),
            modified: session.is_modified(),
        }
    }
}

#[wasm_bindgen]
#[derive(Debug, Default)]
pub struct ScoreEditor {
    session: EditSession,
}

#[wasm_bindgen]
impl ScoreEditor {
    /// Create an editor with an empty document
    #[wasm_bindgen(constructor)]
    pub fn new() -> ScoreEditor {
        ScoreEditor {
            session: EditSession::new(Document::new()),
        }
    }

    /// Replace the document with a CanorusML file
    #[wasm_bindgen(js_name = loadCanorusMl)]
    pub fn load_canorus_ml(&mut self, text: &str) -> Result<(), JsValue> {
        self.open_canorus_ml(text).map_err(js_error)
    }

    #[wasm_bindgen(js_name = saveCanorusMl)]
    pub fn save_canorus_ml(&mut self) -> Result<String, JsValue> {
        self.save().map_err(js_error)
    }

    /// Add the sheets of a LilyPond file to the document as one undo step
    #[wasm_bindgen(js_name = importLilyPond)]
    pub fn import_lilypond(&mut self, text: &str) -> Result<usize, JsValue> {
        lilypond::import_into_session(&mut self.session, text).map_err(js_error)
    }

    /// `settings` may be `undefined` for the defaults
    #[wasm_bindgen(js_name = exportLilyPond)]
    pub fn export_lilypond(&self, settings: JsValue) -> Result<String, JsValue> {
        let settings: ExportSettings = if settings.is_undefined() || settings.is_null() {
            ExportSettings::default()
        } else {
            deserialize(settings, "export settings")?
        };
        lilypond::export_with_settings(self.session.document(), &settings).map_err(js_error)
    }

    #[wasm_bindgen(js_name = documentJson)]
    pub fn document_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.session.document()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = executeCommand)]
    pub fn execute_command(&mut self, command: JsValue) -> Result<(), JsValue> {
        let command: Command = deserialize(command, "command")?;
        self.session.execute(command).map_err(js_error)
    }

    #[wasm_bindgen(js_name = executeCommandJson)]
    pub fn execute_command_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.execute_json(json).map_err(js_error)
    }

    #[wasm_bindgen(js_name = beginMacro)]
    pub fn begin_macro(&mut self, label: &str) -> Result<(), JsValue> {
        self.session.begin_macro(label).map_err(js_error)
    }

    #[wasm_bindgen(js_name = endMacro)]
    pub fn end_macro(&mut self) {
        self.session.end_macro();
    }

    /// Returns false when there was nothing to undo
    pub fn undo(&mut self) -> Result<bool, JsValue> {
        self.session.undo().map_err(js_error)
    }

    pub fn redo(&mut self) -> Result<bool, JsValue> {
        self.session.redo().map_err(js_error)
    }

    #[wasm_bindgen(js_name = canUndo)]
    pub fn can_undo(&self) -> bool {
        self.session.can_undo()
    }

    #[wasm_bindgen(js_name = canRedo)]
    pub fn can_redo(&self) -> bool {
        self.session.can_redo()
    }

    #[wasm_bindgen(js_name = isModified)]
    pub fn is_modified(&self) -> bool {
        self.session.is_modified()
    }

    #[wasm_bindgen(js_name = historyState)]
    pub fn history_state(&self) -> Result<JsValue, JsValue> {
        serialize(&HistoryState::of(&self.session), "history state")
    }
}

impl ScoreEditor {
    pub fn session(&self) -> &EditSession {
        &self.session
    }

    /// Applies a command given as JSON
    pub fn execute_json(&mut self, json: &str) -> EditorResult<()> {
        let command: Command =
            serde_json::from_str(json).map_err(|e| EditorError::InvalidValue(format!("command: {}", e)))?;
        log::debug!("execute {}", command.label());
        self.session.execute(command)
    }

    /// Replaces the document and forgets the history
    pub fn open(&mut self, document: Document) {
        self.session.replace_document(document);
        self.session.mark_clean();
    }

    pub fn open_canorus_ml(&mut self, text: &str) -> EditorResult<()> {
        let document = canorusml::read(text)?;
        self.open(document);
        log::info!("opened CanorusML document with {} sheet(s)", self.session.document().sheets.len());
        Ok(())
    }

    /// Serializes the document as CanorusML and marks the session saved
    pub fn save(&mut self) -> EditorResult<String> {
        let text = canorusml::write(self.session.document())?;
        self.session.mark_clean();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_json() {
        let mut editor = ScoreEditor::new();
        editor
            .execute_json(r#"{"command": "set-metadata", "field": "title", "value": "Etude"}"#)
            .unwrap();
        assert_eq!(editor.session().document().metadata.title, "Etude");

        let state = HistoryState::of(editor.session());
        assert!(state.can_undo);
        assert!(state.modified);
        assert_eq!(state.undo_text.as_deref(), Some("Set title"));
    }

    #[test]
    fn test_malformed_command_json() {
        let mut editor = ScoreEditor::new();
        let err = editor.execute_json(r#"{"command": "fly"}"#).unwrap_err();
        assert!(matches!(err, EditorError::InvalidValue(_)));
        assert!(!editor.can_undo());
    }

    #[test]
    fn test_save_marks_clean_and_open_forgets_history() {
        let mut editor = ScoreEditor::new();
        editor
            .execute_json(r#"{"command": "set-metadata", "field": "composer", "value": "Anon"}"#)
            .unwrap();
        assert!(editor.is_modified());

        let text = editor.save().unwrap();
        assert!(!editor.is_modified());
        assert!(editor.can_undo());

        let mut other = ScoreEditor::new();
        other.open_canorus_ml(&text).unwrap();
        assert_eq!(other.session().document().metadata.composer, "Anon");
        assert!(!other.can_undo());
        assert!(!other.is_modified());
    }

    #[test]
    fn test_host_methods_on_success() {
        let mut editor = ScoreEditor::new();
        let added = editor
            .import_lilypond("\\score { \\new Staff { c'4 d' } \\header { piece = \"Intro\" } }")
            .unwrap();
        assert_eq!(added, 1);
        assert!(editor.execute_command_json(r#"{"command": "rename-sheet", "index": 0, "name": "Opening"}"#).is_ok());

        let json = editor.document_json().unwrap();
        assert!(json.contains("\"Opening\""));
        let text = editor.save_canorus_ml().unwrap();
        assert!(!editor.is_modified());

        assert!(editor.undo().unwrap());
        assert_eq!(editor.session().document().sheets[0].name, "Intro");
        assert!(editor.redo().unwrap());
        assert!(!editor.is_modified());

        let mut other = ScoreEditor::new();
        other.load_canorus_ml(&text).unwrap();
        assert_eq!(other.session().document().sheets[0].name, "Opening");
    }

    #[test]
    fn test_bad_file_keeps_document() {
        let mut editor = ScoreEditor::new();
        editor
            .execute_json(r#"{"command": "set-metadata", "field": "title", "value": "Kept"}"#)
            .unwrap();
        assert!(editor.open_canorus_ml("<canorus").is_err());
        assert_eq!(editor.session().document().metadata.title, "Kept");
        assert!(editor.can_undo());
    }
}

//! Undo/redo history for score documents
//!
//! `UndoStack` holds applied commands; `EditSession` pairs one document with
//! its history and is the only way a live document should be mutated.

pub mod commands;

pub use commands::{Command, DetachedAssociation, RemovedElement, VoiceProperties};

use crate::error::{violation, Result};
use crate::models::core::Document;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Manages undo/redo command history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoStack {
    /// Applied commands, oldest first
    pub commands: VecDeque<Command>,
    /// Current position in the stack (for redo support)
    pub current_index: usize,
    /// Maximum number of commands to keep in history
    max_size: usize,
    /// History position of the last save; `None` once it fell off the stack
    clean_index: Option<usize>,
    /// Open macro: label and the commands applied since `begin_macro`
    #[serde(skip)]
    current_batch: Option<(String, Vec<Command>)>,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PartialEq for UndoStack {
    fn eq(&self, other: &Self) -> bool {
        // Only compare serialized fields (skip transient fields)
        self.commands == other.commands
            && self.current_index == other.current_index
            && self.max_size == other.max_size
            && self.clean_index == other.clean_index
    }
}

impl UndoStack {
    /// Create a new undo stack with specified maximum size
    pub fn new(max_size: usize) -> Self {
        Self {
            commands: VecDeque::new(),
            current_index: 0,
            max_size: max_size.max(1),
            clean_index: Some(0),
            current_batch: None,
        }
    }

    /// Apply a command and record it. A rejected command leaves both the
    /// document and the history untouched, except that inside a macro the
    /// whole macro is rolled back and closed.
    pub fn execute(&mut self, mut command: Command, doc: &mut Document) -> Result<()> {
        if let Err(e) = command.apply(doc) {
            if let Some((label, mut applied)) = self.current_batch.take() {
                log::debug!("'{}' failed inside macro '{}', rolling back", command.label(), label);
                commands::rollback(&mut applied, doc);
            }
            return Err(e);
        }

        match self.current_batch.as_mut() {
            Some((_, batch)) => batch.push(command),
            None => self.push(command),
        }
        Ok(())
    }

    /// Record an already applied command
    fn push(&mut self, command: Command) {
        log::debug!("recorded '{}'", command.label());

        // Truncate any redo history when new command is added
        self.commands.truncate(self.current_index);
        if matches!(self.clean_index, Some(clean) if clean > self.current_index) {
            self.clean_index = None;
        }
        self.commands.push_back(command);
        self.current_index = self.commands.len();

        // Enforce max size
        if self.commands.len() > self.max_size {
            self.commands.pop_front();
            self.current_index = self.current_index.saturating_sub(1);
            self.clean_index = match self.clean_index {
                Some(0) | None => None,
                Some(clean) => Some(clean - 1),
            };
        }
    }

    /// Start grouping the following commands into one undo step
    pub fn begin_macro(&mut self, label: impl Into<String>) -> Result<()> {
        if let Some((open, _)) = &self.current_batch {
            return Err(violation(format!("macro '{}' is still open", open)));
        }
        self.current_batch = Some((label.into(), Vec::new()));
        Ok(())
    }

    /// Close the open macro and record it as one command
    pub fn end_macro(&mut self) {
        if let Some((label, batch)) = self.current_batch.take() {
            if !batch.is_empty() {
                self.push(Command::Batch {
                    label,
                    commands: batch,
                });
            }
        }
    }

    pub fn in_macro(&self) -> bool {
        self.current_batch.is_some()
    }

    /// Undo the last command. Returns `Ok(false)` when there is nothing to undo.
    pub fn undo(&mut self, doc: &mut Document) -> Result<bool> {
        // Finalize any pending macro first
        self.end_macro();

        if !self.can_undo() {
            log::debug!("nothing to undo");
            return Ok(false);
        }

        let index = self.current_index - 1;
        self.commands[index].undo(doc)?;
        self.current_index = index;
        Ok(true)
    }

    /// Redo the last undone command. Returns `Ok(false)` when there is nothing to redo.
    pub fn redo(&mut self, doc: &mut Document) -> Result<bool> {
        self.end_macro();

        if !self.can_redo() {
            log::debug!("nothing to redo");
            return Ok(false);
        }

        self.commands[self.current_index].apply(doc)?;
        self.current_index += 1;
        Ok(true)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        self.current_index > 0
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.current_index < self.commands.len()
    }

    pub fn undo_text(&self) -> Option<String> {
        self.current_index
            .checked_sub(1)
            .and_then(|i| self.commands.get(i))
            .map(Command::label)
    }

    pub fn redo_text(&self) -> Option<String> {
        self.commands.get(self.current_index).map(Command::label)
    }

    /// True when the document differs from the last saved state
    pub fn is_modified(&self) -> bool {
        self.clean_index != Some(self.current_index)
    }

    /// Remember the current position as saved
    pub fn mark_clean(&mut self) {
        self.clean_index = Some(self.current_index);
    }

    /// Clear all undo history
    pub fn clear(&mut self) {
        self.commands.clear();
        self.current_index = 0;
        self.clean_index = Some(0);
        self.current_batch = None;
    }

    /// Get the number of available undo steps
    pub fn undo_count(&self) -> usize {
        self.current_index
    }

    /// Get the number of available redo steps
    pub fn redo_count(&self) -> usize {
        self.commands.len() - self.current_index
    }
}

/// One document together with its history
#[derive(Clone, Debug, Default)]
pub struct EditSession {
    document: Document,
    history: UndoStack,
}

impl EditSession {
    pub fn new(document: Document) -> Self {
        Self::with_history_size(document, 100)
    }

    pub fn with_history_size(document: Document, max_size: usize) -> Self {
        Self {
            document,
            history: UndoStack::new(max_size),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// Swap in another document (e.g. after opening a file) and forget the history
    pub fn replace_document(&mut self, document: Document) -> Document {
        self.history.clear();
        std::mem::replace(&mut self.document, document)
    }

    pub fn execute(&mut self, command: Command) -> Result<()> {
        self.history.execute(command, &mut self.document)
    }

    pub fn undo(&mut self) -> Result<bool> {
        self.history.undo(&mut self.document)
    }

    pub fn redo(&mut self) -> Result<bool> {
        self.history.redo(&mut self.document)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_text(&self) -> Option<String> {
        self.history.undo_text()
    }

    pub fn redo_text(&self) -> Option<String> {
        self.history.redo_text()
    }

    pub fn is_modified(&self) -> bool {
        self.history.is_modified()
    }

    pub fn mark_clean(&mut self) {
        self.history.mark_clean()
    }

    pub fn begin_macro(&mut self, label: impl Into<String>) -> Result<()> {
        self.history.begin_macro(label)
    }

    pub fn end_macro(&mut self) {
        self.history.end_macro()
    }
}

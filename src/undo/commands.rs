//! Reversible document mutations
//!
//! A command validates against the document before touching it, so a
//! rejected command leaves the document unchanged. On apply it records
//! whatever it needs to undo (insert positions, detached subtrees). The
//! recorded state travels with the command so redo replays the same ids
//! and positions.

use crate::error::{bad_location, violation, EditorError, Result};
use crate::models::contexts::check_chords;
use crate::models::core::sheet_ids;
use crate::models::{
    Context, ContextLocation, Document, ElementId, ElementLocation, FunctionMarking, LyricsContext,
    MusicElement, Sheet, Spanner, StemDirection, Syllable, Voice, VoiceId, VoiceLocation,
};
use crate::models::contexts::FunctionMarkingContext;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::iter;

/// The editable scalar properties of a voice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProperties {
    pub number: u32,
    pub name: String,
    pub stem_direction: StemDirection,
    pub instrument: String,
    pub midi_channel: u8,
}

impl VoiceProperties {
    pub fn of(voice: &Voice) -> Self {
        Self {
            number: voice.number,
            name: voice.name.clone(),
            stem_direction: voice.stem_direction,
            instrument: voice.instrument.clone(),
            midi_channel: voice.midi_channel,
        }
    }

    fn write_to(&self, voice: &mut Voice) {
        voice.number = self.number;
        voice.name = self.name.clone();
        voice.stem_direction = self.stem_direction;
        voice.instrument = self.instrument.clone();
        voice.midi_channel = self.midi_channel;
    }
}

/// What `RemoveElement` took out of a voice
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedElement {
    pub element: MusicElement,
    /// Spanners that ended on the element, with their index in the voice
    pub spanners: Vec<(usize, Spanner)>,
    /// Index of the chord member that became the chord head
    pub promoted_chord: Option<usize>,
}

/// A lyrics or function-marking context that lost its voice when the voice was removed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedAssociation {
    pub context: String,
    pub voice: VoiceId,
}

/// Represents a reversible edit command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Insert a sheet; `index: None` appends
    AddSheet {
        index: Option<usize>,
        sheet: Sheet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inserted_at: Option<usize>,
    },
    RemoveSheet {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Sheet>,
    },
    RenameSheet {
        index: usize,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    /// Insert a context; `index: None` appends
    AddContext {
        sheet: usize,
        index: Option<usize>,
        context: Context,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inserted_at: Option<usize>,
    },
    /// Remove a context. Removing a staff detaches the lyrics and function
    /// markings that followed its voices.
    RemoveContext {
        location: ContextLocation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Context>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        detached: Vec<DetachedAssociation>,
    },
    RenameContext {
        location: ContextLocation,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    /// Append a voice to a staff. Voice number 0 picks the first free number.
    AddVoice {
        staff: ContextLocation,
        voice: Voice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inserted_at: Option<usize>,
    },
    RemoveVoice {
        location: VoiceLocation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Voice>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        detached: Vec<DetachedAssociation>,
    },
    SetVoiceProperties {
        location: VoiceLocation,
        properties: VoiceProperties,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<VoiceProperties>,
    },
    InsertElement {
        voice: VoiceLocation,
        index: usize,
        element: MusicElement,
    },
    RemoveElement {
        location: ElementLocation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<RemovedElement>,
    },
    /// Swap an element for another; a playable replacing a playable keeps its id
    ReplaceElement {
        location: ElementLocation,
        element: MusicElement,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<MusicElement>,
    },
    AddSpanner {
        voice: VoiceLocation,
        spanner: Spanner,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inserted_at: Option<usize>,
    },
    RemoveSpanner {
        voice: VoiceLocation,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Spanner>,
    },
    InsertSyllable {
        lyrics: ContextLocation,
        index: usize,
        syllable: Syllable,
    },
    RemoveSyllable {
        lyrics: ContextLocation,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Syllable>,
    },
    InsertFunctionMarking {
        context: ContextLocation,
        index: usize,
        marking: FunctionMarking,
    },
    RemoveFunctionMarking {
        context: ContextLocation,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<FunctionMarking>,
    },
    /// Point a lyrics or function-marking context at a voice of its sheet
    SetAssociatedVoice {
        context: ContextLocation,
        voice: Option<VoiceId>,
        #[serde(default)]
        applied: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<VoiceId>,
    },
    SetMetadata {
        field: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    /// Commands applied and undone as one unit
    Batch {
        label: String,
        commands: Vec<Command>,
    },
}

fn not_applied(command: &Command) -> EditorError {
    violation(format!("'{}' has not been applied", command.label()))
}

/// Rejects ids already present in the document, then keeps the allocator past them
fn check_new_ids(doc: &mut Document, ids: impl IntoIterator<Item = u64>) -> Result<()> {
    let in_use = doc.ids_in_use();
    let mut fresh = HashSet::new();
    for id in ids {
        if in_use.contains(&id) || !fresh.insert(id) {
            return Err(violation(format!("id {} is already in use", id)));
        }
    }
    if let Some(max) = fresh.into_iter().max() {
        doc.reserve_ids(max);
    }
    Ok(())
}

fn voice_ids_of(context: &Context) -> HashSet<VoiceId> {
    context
        .as_staff()
        .map(|staff| staff.voices.iter().map(|v| v.id).collect())
        .unwrap_or_default()
}

/// Clears associations to any of `voices` in the sheet and returns what was cleared
fn detach_associations(sheet: &mut Sheet, voices: &HashSet<VoiceId>) -> Vec<DetachedAssociation> {
    let mut detached = Vec::new();
    for context in sheet.contexts.iter_mut() {
        if let Some(voice) = context.associated_voice() {
            if voices.contains(&voice) {
                detached.push(DetachedAssociation {
                    context: context.name().to_string(),
                    voice,
                });
                context.set_associated_voice(None);
            }
        }
    }
    detached
}

fn restore_associations(sheet: &mut Sheet, detached: &[DetachedAssociation]) {
    for association in detached {
        match sheet.context_index(&association.context) {
            Some(index) => sheet.contexts[index].set_associated_voice(Some(association.voice)),
            None => log::warn!(
                "context '{}' vanished before its voice came back",
                association.context
            ),
        }
    }
}

fn lyrics_at_mut(doc: &mut Document, location: ContextLocation) -> Result<&mut LyricsContext> {
    match doc.context_at_mut(location)? {
        Context::Lyrics(lyrics) => Ok(lyrics),
        _ => Err(bad_location(format!("context at {:?} is not a lyrics context", location))),
    }
}

fn function_markings_at_mut(
    doc: &mut Document,
    location: ContextLocation,
) -> Result<&mut FunctionMarkingContext> {
    match doc.context_at_mut(location)? {
        Context::FunctionMarking(fm) => Ok(fm),
        _ => Err(bad_location(format!(
            "context at {:?} is not a function-marking context",
            location
        ))),
    }
}

fn check_index(index: usize, len: usize, what: &str) -> Result<()> {
    if index > len {
        return Err(bad_location(format!(
            "{} index {} past the end ({})",
            what, index, len
        )));
    }
    Ok(())
}

fn check_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(violation(format!("{} name must not be empty", what)));
    }
    Ok(())
}

impl Command {
    pub fn add_sheet(sheet: Sheet) -> Self {
        Command::AddSheet {
            index: None,
            sheet,
            inserted_at: None,
        }
    }

    pub fn remove_sheet(index: usize) -> Self {
        Command::RemoveSheet {
            index,
            removed: None,
        }
    }

    pub fn rename_sheet(index: usize, name: impl Into<String>) -> Self {
        Command::RenameSheet {
            index,
            name: name.into(),
            previous: None,
        }
    }

    pub fn add_context(sheet: usize, context: Context) -> Self {
        Command::AddContext {
            sheet,
            index: None,
            context,
            inserted_at: None,
        }
    }

    pub fn remove_context(location: ContextLocation) -> Self {
        Command::RemoveContext {
            location,
            removed: None,
            detached: Vec::new(),
        }
    }

    pub fn rename_context(location: ContextLocation, name: impl Into<String>) -> Self {
        Command::RenameContext {
            location,
            name: name.into(),
            previous: None,
        }
    }

    pub fn add_voice(staff: ContextLocation, voice: Voice) -> Self {
        Command::AddVoice {
            staff,
            voice,
            inserted_at: None,
        }
    }

    pub fn remove_voice(location: VoiceLocation) -> Self {
        Command::RemoveVoice {
            location,
            removed: None,
            detached: Vec::new(),
        }
    }

    pub fn set_voice_properties(location: VoiceLocation, properties: VoiceProperties) -> Self {
        Command::SetVoiceProperties {
            location,
            properties,
            previous: None,
        }
    }

    pub fn insert_element(voice: VoiceLocation, index: usize, element: MusicElement) -> Self {
        Command::InsertElement {
            voice,
            index,
            element,
        }
    }

    pub fn remove_element(location: ElementLocation) -> Self {
        Command::RemoveElement {
            location,
            removed: None,
        }
    }

    pub fn replace_element(location: ElementLocation, element: MusicElement) -> Self {
        Command::ReplaceElement {
            location,
            element,
            previous: None,
        }
    }

    pub fn add_spanner(voice: VoiceLocation, spanner: Spanner) -> Self {
        Command::AddSpanner {
            voice,
            spanner,
            inserted_at: None,
        }
    }

    pub fn remove_spanner(voice: VoiceLocation, index: usize) -> Self {
        Command::RemoveSpanner {
            voice,
            index,
            removed: None,
        }
    }

    pub fn insert_syllable(lyrics: ContextLocation, index: usize, syllable: Syllable) -> Self {
        Command::InsertSyllable {
            lyrics,
            index,
            syllable,
        }
    }

    pub fn remove_syllable(lyrics: ContextLocation, index: usize) -> Self {
        Command::RemoveSyllable {
            lyrics,
            index,
            removed: None,
        }
    }

    pub fn insert_function_marking(
        context: ContextLocation,
        index: usize,
        marking: FunctionMarking,
    ) -> Self {
        Command::InsertFunctionMarking {
            context,
            index,
            marking,
        }
    }

    pub fn remove_function_marking(context: ContextLocation, index: usize) -> Self {
        Command::RemoveFunctionMarking {
            context,
            index,
            removed: None,
        }
    }

    pub fn set_associated_voice(context: ContextLocation, voice: Option<VoiceId>) -> Self {
        Command::SetAssociatedVoice {
            context,
            voice,
            applied: false,
            previous: None,
        }
    }

    pub fn set_metadata(field: impl Into<String>, value: impl Into<String>) -> Self {
        Command::SetMetadata {
            field: field.into(),
            value: value.into(),
            previous: None,
        }
    }

    pub fn batch(label: impl Into<String>, commands: Vec<Command>) -> Self {
        Command::Batch {
            label: label.into(),
            commands,
        }
    }

    /// Deletes several elements of one voice as a single undoable step.
    /// Indices refer to the voice before the deletion; the highest goes first.
    pub fn remove_elements(voice: VoiceLocation, indices: &[usize]) -> Self {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let commands = sorted
            .into_iter()
            .rev()
            .map(|index| Command::remove_element(voice.element(index)))
            .collect::<Vec<_>>();
        Command::batch(format!("Delete {} elements", commands.len()), commands)
    }

    /// Inserts a run of elements starting at `index` (paste). The copies get
    /// fresh ids when applied.
    pub fn insert_elements(voice: VoiceLocation, index: usize, elements: Vec<MusicElement>) -> Self {
        let commands = elements
            .into_iter()
            .enumerate()
            .map(|(offset, mut element)| {
                element.set_id(ElementId::UNASSIGNED);
                Command::insert_element(voice, index + offset, element)
            })
            .collect();
        Command::batch("Paste", commands)
    }

    /// Menu text for undo/redo
    pub fn label(&self) -> String {
        match self {
            Command::AddSheet { .. } => "Add sheet".to_string(),
            Command::RemoveSheet { .. } => "Remove sheet".to_string(),
            Command::RenameSheet { .. } => "Rename sheet".to_string(),
            Command::AddContext { context, .. } => format!("Add {}", context.kind_name()),
            Command::RemoveContext { .. } => "Remove context".to_string(),
            Command::RenameContext { .. } => "Rename context".to_string(),
            Command::AddVoice { .. } => "Add voice".to_string(),
            Command::RemoveVoice { .. } => "Remove voice".to_string(),
            Command::SetVoiceProperties { .. } => "Voice properties".to_string(),
            Command::InsertElement { element, .. } => format!("Insert {}", element.kind_name()),
            Command::RemoveElement { .. } => "Delete element".to_string(),
            Command::ReplaceElement { element, .. } => format!("Change {}", element.kind_name()),
            Command::AddSpanner { spanner, .. } => format!("Add {}", spanner.kind.name()),
            Command::RemoveSpanner { .. } => "Remove slur".to_string(),
            Command::InsertSyllable { .. } => "Insert syllable".to_string(),
            Command::RemoveSyllable { .. } => "Delete syllable".to_string(),
            Command::InsertFunctionMarking { .. } => "Insert function".to_string(),
            Command::RemoveFunctionMarking { .. } => "Delete function".to_string(),
            Command::SetAssociatedVoice { .. } => "Associate voice".to_string(),
            Command::SetMetadata { field, .. } => format!("Set {}", field),
            Command::Batch { label, .. } => label.clone(),
        }
    }

    /// Apply this command to the document
    pub fn apply(&mut self, doc: &mut Document) -> Result<()> {
        match self {
            Command::AddSheet {
                index,
                sheet,
                inserted_at,
            } => {
                let at = index.unwrap_or(doc.sheets.len());
                check_index(at, doc.sheets.len(), "sheet")?;
                check_name(&sheet.name, "sheet")?;
                if doc.sheets.iter().any(|s| s.name == sheet.name) {
                    return Err(violation(format!("sheet '{}' already exists", sheet.name)));
                }
                for context in sheet.contexts.iter_mut() {
                    if let Some(staff) = context.as_staff_mut() {
                        for voice in staff.voices.iter_mut() {
                            doc.assign_voice_ids(voice);
                        }
                    }
                }
                sheet.validate()?;
                check_new_ids(doc, sheet_ids(sheet))?;

                doc.sheets.insert(at, sheet.clone());
                *inserted_at = Some(at);
                log::debug!("added sheet '{}' at {}", sheet.name, at);
                Ok(())
            }
            Command::RemoveSheet { index, removed } => {
                doc.sheet_at(*index)?;
                *removed = Some(doc.sheets.remove(*index));
                Ok(())
            }
            Command::RenameSheet {
                index,
                name,
                previous,
            } => {
                check_name(name, "sheet")?;
                doc.sheet_at(*index)?;
                if doc
                    .sheets
                    .iter()
                    .enumerate()
                    .any(|(i, s)| i != *index && s.name == *name)
                {
                    return Err(violation(format!("sheet '{}' already exists", name)));
                }
                let sheet = doc.sheet_at_mut(*index)?;
                *previous = Some(std::mem::replace(&mut sheet.name, name.clone()));
                Ok(())
            }
            Command::AddContext {
                sheet,
                index,
                context,
                inserted_at,
            } => {
                let target = doc.sheet_at(*sheet)?;
                let at = index.unwrap_or(target.contexts.len());
                check_index(at, target.contexts.len(), "context")?;
                check_name(context.name(), "context")?;
                if target.context_index(context.name()).is_some() {
                    return Err(violation(format!(
                        "context '{}' already exists in sheet '{}'",
                        context.name(),
                        target.name
                    )));
                }
                if let Some(voice) = context.associated_voice() {
                    if !target.voices().any(|(_, _, v)| v.id == voice) {
                        return Err(violation(format!(
                            "voice {} is not in sheet '{}'",
                            voice, target.name
                        )));
                    }
                }
                if let Some(staff) = context.as_staff_mut() {
                    for voice in staff.voices.iter_mut() {
                        doc.assign_voice_ids(voice);
                    }
                    staff.validate()?;
                    let ids = staff.voices.iter().flat_map(|v| {
                        iter::once(v.id.0).chain(v.elements.iter().filter_map(|e| e.id().map(|id| id.0)))
                    });
                    check_new_ids(doc, ids)?;
                }

                doc.sheet_at_mut(*sheet)?.contexts.insert(at, context.clone());
                *inserted_at = Some(at);
                Ok(())
            }
            Command::RemoveContext {
                location,
                removed,
                detached,
            } => {
                let voices = voice_ids_of(doc.context_at(*location)?);
                let sheet = doc.sheet_at_mut(location.sheet)?;
                let context = sheet.contexts.remove(location.context);
                *detached = detach_associations(sheet, &voices);
                *removed = Some(context);
                Ok(())
            }
            Command::RenameContext {
                location,
                name,
                previous,
            } => {
                check_name(name, "context")?;
                let sheet = doc.sheet_at(location.sheet)?;
                doc.context_at(*location)?;
                if let Some(existing) = sheet.context_index(name) {
                    if existing != location.context {
                        return Err(violation(format!("context '{}' already exists", name)));
                    }
                }
                let context = doc.context_at_mut(*location)?;
                *previous = Some(context.name().to_string());
                context.set_name(name.clone());
                Ok(())
            }
            Command::AddVoice {
                staff,
                voice,
                inserted_at,
            } => {
                let target = doc.staff_at(*staff)?;
                if voice.number == 0 {
                    voice.number = target.next_voice_number();
                }
                if target.voice_by_number(voice.number).is_some() {
                    return Err(violation(format!(
                        "voice number {} already used in staff '{}'",
                        voice.number, target.name
                    )));
                }
                doc.assign_voice_ids(voice);
                voice.validate()?;
                let ids = iter::once(voice.id.0)
                    .chain(voice.elements.iter().filter_map(|e| e.id().map(|id| id.0)));
                check_new_ids(doc, ids)?;

                let target = doc.staff_at_mut(*staff)?;
                target.voices.push(voice.clone());
                *inserted_at = Some(target.voices.len() - 1);
                Ok(())
            }
            Command::RemoveVoice {
                location,
                removed,
                detached,
            } => {
                let id = doc.voice_at(*location)?.id;
                let voice = doc
                    .staff_at_mut(location.context_location())?
                    .voices
                    .remove(location.voice);
                let voices: HashSet<VoiceId> = iter::once(id).collect();
                *detached = detach_associations(doc.sheet_at_mut(location.sheet)?, &voices);
                *removed = Some(voice);
                Ok(())
            }
            Command::SetVoiceProperties {
                location,
                properties,
                previous,
            } => {
                if properties.number == 0 {
                    return Err(violation("voice numbers start at 1"));
                }
                if properties.midi_channel > 15 {
                    return Err(EditorError::InvalidValue(format!(
                        "MIDI channel {} out of range 0-15",
                        properties.midi_channel
                    )));
                }
                doc.voice_at(*location)?;
                let staff = doc.staff_at(location.context_location())?;
                if staff
                    .voices
                    .iter()
                    .enumerate()
                    .any(|(i, v)| i != location.voice && v.number == properties.number)
                {
                    return Err(violation(format!(
                        "voice number {} already used in staff '{}'",
                        properties.number, staff.name
                    )));
                }
                let voice = doc.voice_at_mut(*location)?;
                *previous = Some(VoiceProperties::of(voice));
                properties.write_to(voice);
                Ok(())
            }
            Command::InsertElement {
                voice,
                index,
                element,
            } => {
                check_index(*index, doc.voice_at(*voice)?.elements.len(), "element")?;
                if element.id() == Some(ElementId::UNASSIGNED) {
                    element.set_id(doc.allocate_element_id());
                }
                if let Some(id) = element.id() {
                    check_new_ids(doc, iter::once(id.0))?;
                }
                let target = doc.voice_at(*voice)?;
                check_chords(
                    target.elements[..*index]
                        .iter()
                        .chain(iter::once(&*element))
                        .chain(target.elements[*index..].iter()),
                )?;

                doc.voice_at_mut(*voice)?
                    .elements
                    .insert(*index, element.clone());
                Ok(())
            }
            Command::RemoveElement { location, removed } => {
                doc.element_at(*location)?;
                let voice = doc.voice_at_mut(location.voice)?;
                let at = location.index;
                let element = voice.elements.remove(at);

                let mut promoted_chord = None;
                if matches!(&element, MusicElement::Note(n) if !n.chorded) {
                    if let Some(offset) = voice.elements[at..].iter().position(|e| e.is_playable()) {
                        if let MusicElement::Note(next) = &mut voice.elements[at + offset] {
                            if next.chorded {
                                next.chorded = false;
                                promoted_chord = Some(at + offset);
                            }
                        }
                    }
                }

                let mut spanners = Vec::new();
                if let Some(id) = element.id() {
                    let mut kept = Vec::with_capacity(voice.spanners.len());
                    for (i, spanner) in voice.spanners.drain(..).enumerate() {
                        if spanner.touches(id) {
                            spanners.push((i, spanner));
                        } else {
                            kept.push(spanner);
                        }
                    }
                    voice.spanners = kept;
                }

                *removed = Some(RemovedElement {
                    element,
                    spanners,
                    promoted_chord,
                });
                Ok(())
            }
            Command::ReplaceElement {
                location,
                element,
                previous,
            } => {
                let old = doc.element_at(*location)?.clone();
                let voice = doc.voice_at(location.voice)?;
                match (old.id(), element.is_playable()) {
                    (Some(id), true) => element.set_id(id),
                    (Some(id), false) => {
                        if voice.spanners.iter().any(|s| s.touches(id)) {
                            return Err(violation(format!(
                                "{} has slurs or ties; remove them first",
                                old.kind_name()
                            )));
                        }
                    }
                    (None, true) => {
                        if element.id() == Some(ElementId::UNASSIGNED) {
                            element.set_id(doc.allocate_element_id());
                        }
                        if let Some(id) = element.id() {
                            check_new_ids(doc, iter::once(id.0))?;
                        }
                    }
                    (None, false) => {}
                }
                let voice = doc.voice_at(location.voice)?;
                check_chords(
                    voice.elements[..location.index]
                        .iter()
                        .chain(iter::once(&*element))
                        .chain(voice.elements[location.index + 1..].iter()),
                )?;

                let voice = doc.voice_at_mut(location.voice)?;
                *previous = Some(std::mem::replace(
                    &mut voice.elements[location.index],
                    element.clone(),
                ));
                Ok(())
            }
            Command::AddSpanner {
                voice,
                spanner,
                inserted_at,
            } => {
                let target = doc.voice_at(*voice)?;
                target.check_spanner(spanner)?;
                if target.spanners.contains(spanner) {
                    return Err(violation(format!("{} already exists", spanner.kind.name())));
                }
                let target = doc.voice_at_mut(*voice)?;
                target.spanners.push(*spanner);
                *inserted_at = Some(target.spanners.len() - 1);
                Ok(())
            }
            Command::RemoveSpanner {
                voice,
                index,
                removed,
            } => {
                let target = doc.voice_at_mut(*voice)?;
                if *index >= target.spanners.len() {
                    return Err(bad_location(format!("no spanner at index {}", index)));
                }
                *removed = Some(target.spanners.remove(*index));
                Ok(())
            }
            Command::InsertSyllable {
                lyrics,
                index,
                syllable,
            } => {
                let context = lyrics_at_mut(doc, *lyrics)?;
                check_index(*index, context.syllables.len(), "syllable")?;
                context.syllables.insert(*index, syllable.clone());
                Ok(())
            }
            Command::RemoveSyllable {
                lyrics,
                index,
                removed,
            } => {
                let context = lyrics_at_mut(doc, *lyrics)?;
                if *index >= context.syllables.len() {
                    return Err(bad_location(format!("no syllable at index {}", index)));
                }
                *removed = Some(context.syllables.remove(*index));
                Ok(())
            }
            Command::InsertFunctionMarking {
                context,
                index,
                marking,
            } => {
                let fm = function_markings_at_mut(doc, *context)?;
                check_index(*index, fm.markings.len(), "function marking")?;
                fm.markings.insert(*index, marking.clone());
                Ok(())
            }
            Command::RemoveFunctionMarking {
                context,
                index,
                removed,
            } => {
                let fm = function_markings_at_mut(doc, *context)?;
                if *index >= fm.markings.len() {
                    return Err(bad_location(format!("no function marking at index {}", index)));
                }
                *removed = Some(fm.markings.remove(*index));
                Ok(())
            }
            Command::SetAssociatedVoice {
                context,
                voice,
                applied,
                previous,
            } => {
                let target = doc.context_at(*context)?;
                if matches!(target, Context::Staff(_)) {
                    return Err(bad_location(format!(
                        "context at {:?} cannot follow a voice",
                        context
                    )));
                }
                if let Some(id) = voice {
                    let sheet = doc.sheet_at(context.sheet)?;
                    if !sheet.voices().any(|(_, _, v)| v.id == *id) {
                        return Err(violation(format!(
                            "voice {} is not in sheet '{}'",
                            id, sheet.name
                        )));
                    }
                }
                let target = doc.context_at_mut(*context)?;
                *previous = target.associated_voice();
                target.set_associated_voice(*voice);
                *applied = true;
                Ok(())
            }
            Command::SetMetadata {
                field,
                value,
                previous,
            } => {
                let old = doc
                    .metadata
                    .field(field)
                    .map(str::to_string)
                    .ok_or_else(|| EditorError::InvalidValue(format!("unknown header field '{}'", field)))?;
                doc.metadata.set_field(field, value.clone());
                *previous = Some(old);
                Ok(())
            }
            Command::Batch { label, commands } => {
                for i in 0..commands.len() {
                    if let Err(e) = commands[i].apply(doc) {
                        log::debug!("'{}' failed at step {}, rolling back", label, i);
                        rollback(&mut commands[..i], doc);
                        return Err(e);
                    }
                }
                Ok(())
            }
        }
    }

    /// Undo this command (reverse the operation)
    pub fn undo(&mut self, doc: &mut Document) -> Result<()> {
        let err = not_applied(self);
        match self {
            Command::AddSheet { inserted_at, .. } => {
                let at = inserted_at.ok_or(err)?;
                doc.sheet_at(at)?;
                doc.sheets.remove(at);
                *inserted_at = None;
                Ok(())
            }
            Command::RemoveSheet { index, removed } => {
                check_index(*index, doc.sheets.len(), "sheet")?;
                let sheet = removed.take().ok_or(err)?;
                doc.sheets.insert(*index, sheet);
                Ok(())
            }
            Command::RenameSheet {
                index, previous, ..
            } => {
                let name = previous.take().ok_or(err)?;
                doc.sheet_at_mut(*index)?.name = name;
                Ok(())
            }
            Command::AddContext {
                sheet, inserted_at, ..
            } => {
                let at = inserted_at.ok_or(err)?;
                doc.context_at(ContextLocation {
                    sheet: *sheet,
                    context: at,
                })?;
                doc.sheet_at_mut(*sheet)?.contexts.remove(at);
                *inserted_at = None;
                Ok(())
            }
            Command::RemoveContext {
                location,
                removed,
                detached,
            } => {
                let sheet = doc.sheet_at_mut(location.sheet)?;
                check_index(location.context, sheet.contexts.len(), "context")?;
                let context = removed.take().ok_or(err)?;
                sheet.contexts.insert(location.context, context);
                restore_associations(sheet, detached);
                detached.clear();
                Ok(())
            }
            Command::RenameContext {
                location, previous, ..
            } => {
                let name = previous.take().ok_or(err)?;
                doc.context_at_mut(*location)?.set_name(name);
                Ok(())
            }
            Command::AddVoice {
                staff, inserted_at, ..
            } => {
                let at = inserted_at.ok_or(err)?;
                let target = doc.staff_at_mut(*staff)?;
                if at >= target.voices.len() {
                    return Err(bad_location(format!("no voice at index {}", at)));
                }
                target.voices.remove(at);
                *inserted_at = None;
                Ok(())
            }
            Command::RemoveVoice {
                location,
                removed,
                detached,
            } => {
                let staff = doc.staff_at_mut(location.context_location())?;
                check_index(location.voice, staff.voices.len(), "voice")?;
                let voice = removed.take().ok_or(err)?;
                staff.voices.insert(location.voice, voice);
                restore_associations(doc.sheet_at_mut(location.sheet)?, detached);
                detached.clear();
                Ok(())
            }
            Command::SetVoiceProperties {
                location, previous, ..
            } => {
                let voice = doc.voice_at_mut(*location)?;
                let properties = previous.take().ok_or(err)?;
                properties.write_to(voice);
                Ok(())
            }
            Command::InsertElement { voice, index, .. } => {
                doc.element_at(voice.element(*index))?;
                doc.voice_at_mut(*voice)?.elements.remove(*index);
                Ok(())
            }
            Command::RemoveElement { location, removed } => {
                let voice = doc.voice_at_mut(location.voice)?;
                check_index(location.index, voice.elements.len(), "element")?;
                let record = removed.take().ok_or(err)?;
                if let Some(j) = record.promoted_chord {
                    if let Some(MusicElement::Note(note)) = voice.elements.get_mut(j) {
                        note.chorded = true;
                    }
                }
                voice.elements.insert(location.index, record.element);
                for (i, spanner) in record.spanners {
                    let at = i.min(voice.spanners.len());
                    voice.spanners.insert(at, spanner);
                }
                Ok(())
            }
            Command::ReplaceElement {
                location, previous, ..
            } => {
                doc.element_at(*location)?;
                let old = previous.take().ok_or(err)?;
                doc.voice_at_mut(location.voice)?.elements[location.index] = old;
                Ok(())
            }
            Command::AddSpanner {
                voice, inserted_at, ..
            } => {
                let at = inserted_at.ok_or(err)?;
                let target = doc.voice_at_mut(*voice)?;
                if at >= target.spanners.len() {
                    return Err(bad_location(format!("no spanner at index {}", at)));
                }
                target.spanners.remove(at);
                *inserted_at = None;
                Ok(())
            }
            Command::RemoveSpanner {
                voice,
                index,
                removed,
            } => {
                let target = doc.voice_at_mut(*voice)?;
                check_index(*index, target.spanners.len(), "spanner")?;
                let spanner = removed.take().ok_or(err)?;
                target.spanners.insert(*index, spanner);
                Ok(())
            }
            Command::InsertSyllable { lyrics, index, .. } => {
                let context = lyrics_at_mut(doc, *lyrics)?;
                if *index >= context.syllables.len() {
                    return Err(bad_location(format!("no syllable at index {}", index)));
                }
                context.syllables.remove(*index);
                Ok(())
            }
            Command::RemoveSyllable {
                lyrics,
                index,
                removed,
            } => {
                let context = lyrics_at_mut(doc, *lyrics)?;
                check_index(*index, context.syllables.len(), "syllable")?;
                let syllable = removed.take().ok_or(err)?;
                context.syllables.insert(*index, syllable);
                Ok(())
            }
            Command::InsertFunctionMarking { context, index, .. } => {
                let fm = function_markings_at_mut(doc, *context)?;
                if *index >= fm.markings.len() {
                    return Err(bad_location(format!("no function marking at index {}", index)));
                }
                fm.markings.remove(*index);
                Ok(())
            }
            Command::RemoveFunctionMarking {
                context,
                index,
                removed,
            } => {
                let fm = function_markings_at_mut(doc, *context)?;
                check_index(*index, fm.markings.len(), "function marking")?;
                let marking = removed.take().ok_or(err)?;
                fm.markings.insert(*index, marking);
                Ok(())
            }
            Command::SetAssociatedVoice {
                context,
                applied,
                previous,
                ..
            } => {
                if !*applied {
                    return Err(err);
                }
                doc.context_at_mut(*context)?
                    .set_associated_voice(previous.take());
                *applied = false;
                Ok(())
            }
            Command::SetMetadata {
                field, previous, ..
            } => {
                let old = previous.take().ok_or(err)?;
                doc.metadata.set_field(field, old);
                Ok(())
            }
            Command::Batch { label, commands } => {
                for i in (0..commands.len()).rev() {
                    if let Err(e) = commands[i].undo(doc) {
                        log::debug!("undoing '{}' failed at step {}, reapplying", label, i);
                        for command in commands[i + 1..].iter_mut() {
                            if let Err(again) = command.apply(doc) {
                                log::warn!("could not reapply '{}': {}", command.label(), again);
                            }
                        }
                        return Err(e);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Undoes already applied commands, last first
pub(crate) fn rollback(commands: &mut [Command], doc: &mut Document) {
    for command in commands.iter_mut().rev() {
        if let Err(e) = command.undo(doc) {
            log::warn!("rollback of '{}' failed: {}", command.label(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaseLength, Duration, Note, Pitch, Rest, SpannerKind, Staff};

    fn note(step: u8) -> MusicElement {
        MusicElement::Note(Note::new(Pitch::new(step, 0, 4).unwrap(), Duration::QUARTER))
    }

    fn doc_with_staff() -> Document {
        let mut doc = Document::new();
        let mut staff = Staff::new("Staff 1");
        staff.voices.push(Voice::new(1));
        let mut sheet = Sheet::new("Sheet 1");
        sheet.contexts.push(Context::Staff(staff));
        let mut lyrics = LyricsContext::new("Lyrics 1");
        lyrics.syllables.push(Syllable::new("la"));
        sheet.contexts.push(Context::Lyrics(lyrics));
        Command::add_sheet(sheet).apply(&mut doc).unwrap();
        doc
    }

    fn voice0() -> VoiceLocation {
        VoiceLocation::new(0, 0, 0)
    }

    /// Applies, undoes and redoes a command, checking both directions
    fn check_inverse(doc: &mut Document, mut command: Command) {
        let before = doc.clone();
        command.apply(doc).unwrap();
        let after = doc.clone();
        command.undo(doc).unwrap();
        assert_eq!(*doc, before);
        command.apply(doc).unwrap();
        assert_eq!(*doc, after);
    }

    #[test]
    fn test_insert_assigns_ids_and_redo_keeps_them() {
        let mut doc = doc_with_staff();
        let mut cmd = Command::insert_element(voice0(), 0, note(0));
        cmd.apply(&mut doc).unwrap();
        let id = doc.voice_at(voice0()).unwrap().elements[0].id().unwrap();
        assert!(id.is_assigned());

        cmd.undo(&mut doc).unwrap();
        cmd.apply(&mut doc).unwrap();
        assert_eq!(doc.voice_at(voice0()).unwrap().elements[0].id(), Some(id));
    }

    #[test]
    fn test_insert_rejects_an_id_in_use() {
        let mut doc = doc_with_staff();
        Command::insert_element(voice0(), 0, note(0)).apply(&mut doc).unwrap();
        let copy = doc.voice_at(voice0()).unwrap().elements[0].clone();

        let before = doc.clone();
        let err = Command::insert_element(voice0(), 1, copy).apply(&mut doc).unwrap_err();
        assert!(matches!(err, EditorError::StructuralViolation(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_remove_element_detaches_spanners() {
        let mut doc = doc_with_staff();
        Command::insert_elements(voice0(), 0, vec![note(0), note(1), note(2)])
            .apply(&mut doc)
            .unwrap();
        let ids: Vec<ElementId> = doc.voice_at(voice0()).unwrap().elements.iter().filter_map(|e| e.id()).collect();
        Command::add_spanner(voice0(), Spanner::new(SpannerKind::Slur, ids[0], ids[2]))
            .apply(&mut doc)
            .unwrap();
        Command::add_spanner(voice0(), Spanner::new(SpannerKind::Tie, ids[0], ids[1]))
            .apply(&mut doc)
            .unwrap();

        let before = doc.clone();
        let mut cmd = Command::remove_element(voice0().element(2));
        cmd.apply(&mut doc).unwrap();
        let voice = doc.voice_at(voice0()).unwrap();
        assert_eq!(voice.spanners.len(), 1);
        assert_eq!(voice.spanners[0].kind, SpannerKind::Tie);

        cmd.undo(&mut doc).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_removing_chord_head_promotes_next_member() {
        let mut doc = doc_with_staff();
        let chord = vec![
            note(0),
            MusicElement::Note(Note::chorded(Pitch::new(2, 0, 4).unwrap(), Duration::QUARTER)),
            MusicElement::Note(Note::chorded(Pitch::new(4, 0, 4).unwrap(), Duration::QUARTER)),
        ];
        Command::insert_elements(voice0(), 0, chord).apply(&mut doc).unwrap();
        let before = doc.clone();

        let mut cmd = Command::remove_element(voice0().element(0));
        cmd.apply(&mut doc).unwrap();
        let voice = doc.voice_at(voice0()).unwrap();
        assert!(!voice.elements[0].is_chorded_note());
        assert!(voice.elements[1].is_chorded_note());
        assert!(voice.validate().is_ok());

        cmd.undo(&mut doc).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_rest_before_chord_member_is_rejected() {
        let mut doc = doc_with_staff();
        Command::insert_elements(
            voice0(),
            0,
            vec![
                note(0),
                MusicElement::Note(Note::chorded(Pitch::new(2, 0, 4).unwrap(), Duration::QUARTER)),
            ],
        )
        .apply(&mut doc)
        .unwrap();
        let before = doc.clone();

        let rest = MusicElement::Rest(Rest::new(Duration::plain(BaseLength::Half)));
        let result = Command::insert_element(voice0(), 1, rest).apply(&mut doc);
        assert!(matches!(result, Err(EditorError::StructuralViolation(_))));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_duplicate_voice_number_rejected() {
        let mut doc = doc_with_staff();
        let before = doc.clone();
        let staff = ContextLocation { sheet: 0, context: 0 };
        let result = Command::add_voice(staff, Voice::new(1)).apply(&mut doc);
        assert!(matches!(result, Err(EditorError::StructuralViolation(_))));
        assert_eq!(doc, before);

        let mut auto = Command::add_voice(staff, Voice::new(0));
        auto.apply(&mut doc).unwrap();
        assert_eq!(doc.staff_at(staff).unwrap().voices[1].number, 2);
    }

    #[test]
    fn test_remove_staff_detaches_and_restores_lyrics() {
        let mut doc = doc_with_staff();
        let voice_id = doc.voice_at(voice0()).unwrap().id;
        let lyrics = ContextLocation { sheet: 0, context: 1 };
        Command::set_associated_voice(lyrics, Some(voice_id))
            .apply(&mut doc)
            .unwrap();
        let before = doc.clone();

        let mut cmd = Command::remove_context(ContextLocation { sheet: 0, context: 0 });
        cmd.apply(&mut doc).unwrap();
        assert_eq!(doc.sheets[0].contexts.len(), 1);
        assert_eq!(doc.sheets[0].contexts[0].associated_voice(), None);
        assert!(doc.validate().is_ok());

        cmd.undo(&mut doc).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_batch_rolls_back_on_failure() {
        let mut doc = doc_with_staff();
        let before = doc.clone();
        let mut batch = Command::batch(
            "broken",
            vec![
                Command::insert_element(voice0(), 0, note(0)),
                Command::rename_sheet(0, "Renamed"),
                Command::remove_element(voice0().element(7)),
            ],
        );
        assert!(batch.apply(&mut doc).is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_inverse_law_for_each_command() {
        let mut doc = doc_with_staff();
        let staff = ContextLocation { sheet: 0, context: 0 };
        let lyrics = ContextLocation { sheet: 0, context: 1 };
        Command::insert_elements(voice0(), 0, vec![note(0), note(1), note(2)])
            .apply(&mut doc)
            .unwrap();
        let ids: Vec<ElementId> = doc.voice_at(voice0()).unwrap().elements.iter().filter_map(|e| e.id()).collect();
        let voice_id = doc.voice_at(voice0()).unwrap().id;

        check_inverse(&mut doc, Command::add_sheet(Sheet::new("Sheet 2")));
        check_inverse(&mut doc, Command::rename_sheet(0, "Allegro"));
        check_inverse(&mut doc, Command::add_context(0, Context::Staff(Staff::new("Staff 2"))));
        check_inverse(&mut doc, Command::rename_context(staff, "Violin"));
        check_inverse(&mut doc, Command::add_voice(staff, Voice::new(2)));
        check_inverse(
            &mut doc,
            Command::set_voice_properties(
                voice0(),
                VoiceProperties {
                    number: 3,
                    name: "melody".to_string(),
                    stem_direction: StemDirection::Up,
                    instrument: "violin".to_string(),
                    midi_channel: 2,
                },
            ),
        );
        check_inverse(&mut doc, Command::insert_element(voice0(), 1, note(5)));
        check_inverse(&mut doc, Command::replace_element(voice0().element(1), note(6)));
        check_inverse(
            &mut doc,
            Command::add_spanner(voice0(), Spanner::new(SpannerKind::Slur, ids[0], ids[2])),
        );
        check_inverse(&mut doc, Command::insert_syllable(lyrics, 1, Syllable::new("di")));
        check_inverse(&mut doc, Command::remove_syllable(lyrics, 0));
        check_inverse(&mut doc, Command::set_associated_voice(lyrics, Some(voice_id)));
        check_inverse(&mut doc, Command::set_metadata("composer", "Anon."));
        check_inverse(&mut doc, Command::remove_elements(voice0(), &[0, 2]));
        check_inverse(&mut doc, Command::remove_voice(voice0()));
        check_inverse(&mut doc, Command::remove_context(lyrics));
        check_inverse(&mut doc, Command::remove_sheet(0));
    }

    #[test]
    fn test_command_json_round_trip() {
        let cmd = Command::insert_element(voice0(), 0, note(3));
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"insert-element\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}

//! Document, sheets and the index paths used to navigate them

use super::contexts::{Context, Staff, Voice, VoiceId};
use super::duration::Time;
use super::elements::{ElementId, ExtraAttributes, MusicElement};
use crate::error::{bad_location, violation, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Position of a context inside a document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextLocation {
    pub sheet: usize,
    pub context: usize,
}

/// Position of a voice inside a document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceLocation {
    pub sheet: usize,
    pub context: usize,
    pub voice: usize,
}

impl VoiceLocation {
    pub fn new(sheet: usize, context: usize, voice: usize) -> Self {
        Self {
            sheet,
            context,
            voice,
        }
    }

    pub fn context_location(&self) -> ContextLocation {
        ContextLocation {
            sheet: self.sheet,
            context: self.context,
        }
    }

    pub fn element(&self, index: usize) -> ElementLocation {
        ElementLocation { voice: *self, index }
    }
}

/// Position of an element inside a voice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementLocation {
    pub voice: VoiceLocation,
    pub index: usize,
}

/// Header fields of a document
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub arranger: String,
    #[serde(default)]
    pub poet: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub dedication: String,
    /// Free-form notes, not exported to LilyPond
    #[serde(default)]
    pub comments: String,
}

impl DocumentMetadata {
    /// Field names in the order they are written
    pub const FIELDS: [&'static str; 8] = [
        "title",
        "subtitle",
        "composer",
        "arranger",
        "poet",
        "copyright",
        "dedication",
        "comments",
    ];

    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => &self.title,
            "subtitle" => &self.subtitle,
            "composer" => &self.composer,
            "arranger" => &self.arranger,
            "poet" => &self.poet,
            "copyright" => &self.copyright,
            "dedication" => &self.dedication,
            "comments" => &self.comments,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Sets a field by name. Returns false for an unknown field.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = match name {
            "title" => &mut self.title,
            "subtitle" => &mut self.subtitle,
            "composer" => &mut self.composer,
            "arranger" => &mut self.arranger,
            "poet" => &mut self.poet,
            "copyright" => &mut self.copyright,
            "dedication" => &mut self.dedication,
            "comments" => &mut self.comments,
            _ => return false,
        };
        *slot = value.into();
        true
    }

    pub fn is_empty(&self) -> bool {
        Self::FIELDS
            .iter()
            .all(|f| self.field(f).map_or(true, str::is_empty))
    }
}

/// One score or movement
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub contexts: Vec<Context>,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: Vec::new(),
            extra: ExtraAttributes::new(),
        }
    }

    pub fn context_index(&self, name: &str) -> Option<usize> {
        self.contexts.iter().position(|c| c.name() == name)
    }

    /// All voices of all staves with their context and voice indices
    pub fn voices(&self) -> impl Iterator<Item = (usize, usize, &Voice)> {
        self.contexts
            .iter()
            .enumerate()
            .filter_map(|(ci, c)| c.as_staff().map(|s| (ci, s)))
            .flat_map(|(ci, staff)| {
                staff
                    .voices
                    .iter()
                    .enumerate()
                    .map(move |(vi, v)| (ci, vi, v))
            })
    }

    pub fn time_end(&self) -> Time {
        self.contexts
            .iter()
            .map(Context::time_end)
            .max()
            .unwrap_or_else(|| Time::from_integer(0))
    }

    /// `base`, or `base N` for the smallest N that is free in this sheet
    pub fn unique_context_name(&self, base: &str) -> String {
        unique_name(base, |n| self.context_index(n).is_some())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for context in &self.contexts {
            if context.name().is_empty() {
                return Err(violation(format!(
                    "unnamed {} in sheet '{}'",
                    context.kind_name(),
                    self.name
                )));
            }
            if !names.insert(context.name()) {
                return Err(violation(format!(
                    "context name '{}' used twice in sheet '{}'",
                    context.name(),
                    self.name
                )));
            }
            if let Context::Staff(staff) = context {
                staff.validate()?;
            }
        }

        let voice_ids: HashSet<VoiceId> = self.voices().map(|(_, _, v)| v.id).collect();
        for context in &self.contexts {
            if let Some(voice) = context.associated_voice() {
                if !voice_ids.contains(&voice) {
                    return Err(violation(format!(
                        "'{}' follows voice {} which is not in sheet '{}'",
                        context.name(),
                        voice,
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Root of the score tree
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Document {
    #[serde(default)]
    pub metadata: DocumentMetadata,

    pub sheets: Vec<Sheet>,

    /// Unknown attributes read from a native file
    #[serde(default)]
    pub extra: ExtraAttributes,

    /// Next free element/voice id; 0 until first needed
    #[serde(skip)]
    next_id: u64,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        // The id allocator is bookkeeping, not content
        self.metadata == other.metadata && self.sheets == other.sheets && self.extra == other.extra
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn sheet_at(&self, index: usize) -> Result<&Sheet> {
        self.sheets
            .get(index)
            .ok_or_else(|| bad_location(format!("no sheet at index {}", index)))
    }

    pub fn sheet_at_mut(&mut self, index: usize) -> Result<&mut Sheet> {
        self.sheets
            .get_mut(index)
            .ok_or_else(|| bad_location(format!("no sheet at index {}", index)))
    }

    pub fn context_at(&self, location: ContextLocation) -> Result<&Context> {
        self.sheet_at(location.sheet)?
            .contexts
            .get(location.context)
            .ok_or_else(|| bad_location(format!("no context at {:?}", location)))
    }

    pub fn context_at_mut(&mut self, location: ContextLocation) -> Result<&mut Context> {
        self.sheet_at_mut(location.sheet)?
            .contexts
            .get_mut(location.context)
            .ok_or_else(|| bad_location(format!("no context at {:?}", location)))
    }

    pub fn staff_at(&self, location: ContextLocation) -> Result<&Staff> {
        self.context_at(location)?
            .as_staff()
            .ok_or_else(|| bad_location(format!("context at {:?} is not a staff", location)))
    }

    pub fn staff_at_mut(&mut self, location: ContextLocation) -> Result<&mut Staff> {
        self.context_at_mut(location)?
            .as_staff_mut()
            .ok_or_else(|| bad_location(format!("context at {:?} is not a staff", location)))
    }

    pub fn voice_at(&self, location: VoiceLocation) -> Result<&Voice> {
        self.staff_at(location.context_location())?
            .voices
            .get(location.voice)
            .ok_or_else(|| bad_location(format!("no voice at {:?}", location)))
    }

    pub fn voice_at_mut(&mut self, location: VoiceLocation) -> Result<&mut Voice> {
        self.staff_at_mut(location.context_location())?
            .voices
            .get_mut(location.voice)
            .ok_or_else(|| bad_location(format!("no voice at {:?}", location)))
    }

    pub fn element_at(&self, location: ElementLocation) -> Result<&MusicElement> {
        self.voice_at(location.voice)?
            .elements
            .get(location.index)
            .ok_or_else(|| bad_location(format!("no element at {:?}", location)))
    }

    /// `base`, or `base N` for the smallest N not used by another sheet
    pub fn unique_sheet_name(&self, base: &str) -> String {
        unique_name(base, |n| self.sheets.iter().any(|s| s.name == n))
    }

    /// Largest element or voice id in use
    fn max_id(&self) -> u64 {
        self.sheets
            .iter()
            .flat_map(|s| s.voices().map(|(_, _, v)| v))
            .flat_map(|v| {
                std::iter::once(v.id.0).chain(v.elements.iter().filter_map(|e| e.id().map(|id| id.0)))
            })
            .max()
            .unwrap_or(0)
    }

    fn allocate(&mut self) -> u64 {
        if self.next_id == 0 {
            self.next_id = self.max_id() + 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn allocate_element_id(&mut self) -> ElementId {
        ElementId(self.allocate())
    }

    pub fn allocate_voice_id(&mut self) -> VoiceId {
        VoiceId(self.allocate())
    }

    /// Gives fresh ids to the voice and to its playables that lack one
    pub fn assign_voice_ids(&mut self, voice: &mut Voice) {
        if !voice.id.is_assigned() {
            voice.id = self.allocate_voice_id();
        }
        for element in voice.elements.iter_mut() {
            if element.id() == Some(ElementId::UNASSIGNED) {
                element.set_id(self.allocate_element_id());
            }
        }
    }

    /// Gives fresh ids to every voice and playable of the document that lacks one
    pub fn assign_missing_ids(&mut self) {
        let mut sheets = std::mem::take(&mut self.sheets);
        // The allocator cannot scan the sheets while they are taken out
        if self.next_id == 0 {
            self.next_id = sheets
                .iter()
                .flat_map(sheet_ids)
                .max()
                .unwrap_or(0)
                + 1;
        }
        for sheet in sheets.iter_mut() {
            for context in sheet.contexts.iter_mut() {
                if let Some(staff) = context.as_staff_mut() {
                    for voice in staff.voices.iter_mut() {
                        self.assign_voice_ids(voice);
                    }
                }
            }
        }
        self.sheets = sheets;
    }

    /// Makes sure ids up to `max` are never handed out again
    pub(crate) fn reserve_ids(&mut self, max: u64) {
        if self.next_id != 0 && self.next_id <= max {
            self.next_id = max + 1;
        }
    }

    /// Every id currently in use
    pub(crate) fn ids_in_use(&self) -> HashSet<u64> {
        self.sheets.iter().flat_map(sheet_ids).collect()
    }

    /// Returns a copy of a sheet from another document with every voice and
    /// element id replaced by a fresh id of this document. Spanners and
    /// lyrics associations follow the renumbering.
    pub fn adopt_sheet(&mut self, mut sheet: Sheet) -> Sheet {
        let mut voice_map: HashMap<VoiceId, VoiceId> = HashMap::new();

        for context in sheet.contexts.iter_mut() {
            let Some(staff) = context.as_staff_mut() else {
                continue;
            };
            for voice in staff.voices.iter_mut() {
                let new_voice = self.allocate_voice_id();
                voice_map.insert(voice.id, new_voice);
                voice.id = new_voice;

                let mut element_map: HashMap<ElementId, ElementId> = HashMap::new();
                for element in voice.elements.iter_mut() {
                    if let Some(old) = element.id() {
                        let new = self.allocate_element_id();
                        element_map.insert(old, new);
                        element.set_id(new);
                    }
                }
                for spanner in voice.spanners.iter_mut() {
                    if let Some(start) = element_map.get(&spanner.start) {
                        spanner.start = *start;
                    }
                    if let Some(end) = element_map.get(&spanner.end) {
                        spanner.end = *end;
                    }
                }
            }
        }

        for context in sheet.contexts.iter_mut() {
            let remapped = context
                .associated_voice()
                .and_then(|old| voice_map.get(&old).copied());
            if context.associated_voice().is_some() {
                context.set_associated_voice(remapped);
            }
        }
        sheet
    }

    /// Checks every structural invariant of the tree
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for sheet in &self.sheets {
            if !names.insert(sheet.name.as_str()) {
                return Err(violation(format!("sheet name '{}' used twice", sheet.name)));
            }
            sheet.validate()?;
            for id in sheet_ids(sheet) {
                if !ids.insert(id) {
                    return Err(violation(format!("id {} used twice in document", id)));
                }
            }
        }
        Ok(())
    }
}

/// Voice and element ids used in a sheet
pub(crate) fn sheet_ids(sheet: &Sheet) -> Vec<u64> {
    let mut ids = Vec::new();
    for (_, _, voice) in sheet.voices() {
        if voice.id.is_assigned() {
            ids.push(voice.id.0);
        }
        ids.extend(
            voice
                .elements
                .iter()
                .filter_map(MusicElement::id)
                .filter(ElementId::is_assigned)
                .map(|id| id.0),
        );
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contexts::{LyricsContext, Spanner, SpannerKind};
    use crate::models::duration::Duration;
    use crate::models::elements::Note;
    use crate::models::pitch::Pitch;

    fn sheet_with_voice(name: &str) -> Sheet {
        let mut voice = Voice::new(1);
        voice.id = VoiceId(7);
        let mut first = Note::new(Pitch::middle_c(), Duration::QUARTER);
        first.id = ElementId(8);
        let mut second = Note::new(Pitch::middle_c(), Duration::QUARTER);
        second.id = ElementId(9);
        voice.elements.push(MusicElement::Note(first));
        voice.elements.push(MusicElement::Note(second));
        voice
            .spanners
            .push(Spanner::new(SpannerKind::Tie, ElementId(8), ElementId(9)));

        let mut staff = Staff::new("Staff 1");
        staff.voices.push(voice);
        let mut lyrics = LyricsContext::new("Lyrics 1");
        lyrics.associated_voice = Some(VoiceId(7));

        let mut sheet = Sheet::new(name);
        sheet.contexts.push(Context::Staff(staff));
        sheet.contexts.push(Context::Lyrics(lyrics));
        sheet
    }

    #[test]
    fn test_accessors_report_bad_locations() {
        let mut doc = Document::new();
        doc.sheets.push(sheet_with_voice("Sheet 1"));

        assert!(doc.voice_at(VoiceLocation::new(0, 0, 0)).is_ok());
        assert!(doc.voice_at(VoiceLocation::new(0, 1, 0)).is_err()); // lyrics, not a staff
        assert!(doc.voice_at(VoiceLocation::new(3, 0, 0)).is_err());
        assert!(doc
            .element_at(VoiceLocation::new(0, 0, 0).element(5))
            .is_err());
    }

    #[test]
    fn test_allocator_starts_after_existing_ids() {
        let mut doc = Document::new();
        doc.sheets.push(sheet_with_voice("Sheet 1"));
        assert_eq!(doc.allocate_element_id(), ElementId(10));
        assert_eq!(doc.allocate_voice_id(), VoiceId(11));
    }

    #[test]
    fn test_adopt_sheet_remaps_ids() {
        let mut doc = Document::new();
        doc.sheets.push(sheet_with_voice("Sheet 1"));

        let adopted = doc.adopt_sheet(sheet_with_voice("Sheet 2"));
        doc.sheets.push(adopted);
        assert!(doc.validate().is_ok());

        let sheet = &doc.sheets[1];
        let voice = &sheet.contexts[0].as_staff().unwrap().voices[0];
        assert_ne!(voice.id, VoiceId(7));
        assert_eq!(sheet.contexts[1].associated_voice(), Some(voice.id));
        assert!(voice.check_spanner(&voice.spanners[0]).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut doc = Document::new();
        doc.sheets.push(sheet_with_voice("Sheet 1"));
        doc.sheets.push(Sheet::new("Sheet 1"));
        assert!(doc.validate().is_err());
        assert_eq!(doc.unique_sheet_name("Sheet 1"), "Sheet 1 2");
    }

    #[test]
    fn test_equality_ignores_allocator() {
        let mut a = Document::new();
        a.sheets.push(sheet_with_voice("Sheet 1"));
        let b = a.clone();
        a.allocate_element_id();
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_fields() {
        let mut meta = DocumentMetadata::default();
        assert!(meta.is_empty());
        assert!(meta.set_field("poet", "Goethe"));
        assert!(!meta.set_field("tempo", "fast"));
        assert_eq!(meta.field("poet"), Some("Goethe"));
        assert!(!meta.is_empty());
    }
}

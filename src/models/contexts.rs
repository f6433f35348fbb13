//! Contexts (staff-like lanes of a sheet) and voices

use super::duration::{Duration, Time};
use super::elements::{ElementId, ExtraAttributes, MusicElement};
use crate::error::{violation, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identifier of a voice, unique within a document.
/// Lyrics and function-marking contexts refer to voices by this id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub u64);

impl VoiceId {
    pub const UNASSIGNED: VoiceId = VoiceId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Stem preference of a whole voice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StemDirection {
    /// Engraver decides per note
    #[default]
    Neutral,
    Up,
    Down,
    /// Up for odd voice numbers, down for even ones
    Preferred,
}

impl StemDirection {
    pub fn name(self) -> &'static str {
        match self {
            StemDirection::Neutral => "neutral",
            StemDirection::Up => "up",
            StemDirection::Down => "down",
            StemDirection::Preferred => "preferred",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "neutral" => Some(StemDirection::Neutral),
            "up" => Some(StemDirection::Up),
            "down" => Some(StemDirection::Down),
            "preferred" => Some(StemDirection::Preferred),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpannerKind {
    Slur,
    PhrasingSlur,
    Tie,
}

impl SpannerKind {
    pub fn name(self) -> &'static str {
        match self {
            SpannerKind::Slur => "slur",
            SpannerKind::PhrasingSlur => "phrasing-slur",
            SpannerKind::Tie => "tie",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "slur" => Some(SpannerKind::Slur),
            "phrasing-slur" => Some(SpannerKind::PhrasingSlur),
            "tie" => Some(SpannerKind::Tie),
            _ => None,
        }
    }
}

/// Slur, phrasing slur or tie between two playables of the same voice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spanner {
    pub kind: SpannerKind,
    pub start: ElementId,
    pub end: ElementId,
}

impl Spanner {
    pub fn new(kind: SpannerKind, start: ElementId, end: ElementId) -> Self {
        Self { kind, start, end }
    }

    pub fn touches(&self, id: ElementId) -> bool {
        self.start == id || self.end == id
    }
}

/// Ordered timeline of events inside a staff
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: VoiceId,

    /// 1-based, unique within the staff
    pub number: u32,

    /// LilyPond voice name; may be empty
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub stem_direction: StemDirection,

    /// LilyPond MIDI instrument name; empty means the default piano
    #[serde(default)]
    pub instrument: String,

    #[serde(default)]
    pub midi_channel: u8,

    #[serde(default)]
    pub elements: Vec<MusicElement>,

    #[serde(default)]
    pub spanners: Vec<Spanner>,

    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl Voice {
    pub fn new(number: u32) -> Self {
        Self {
            id: VoiceId::UNASSIGNED,
            number,
            name: String::new(),
            stem_direction: StemDirection::Neutral,
            instrument: String::new(),
            midi_channel: 0,
            elements: Vec::new(),
            spanners: Vec::new(),
            extra: ExtraAttributes::new(),
        }
    }

    /// Start time of every element, in element order.
    ///
    /// Playables advance the cursor by their duration. A chorded note starts
    /// with the note it joins and leaves the cursor alone. Markers sit at the
    /// current cursor.
    pub fn time_positions(&self) -> Vec<Time> {
        let mut cursor = Time::from_integer(0);
        let mut last_start = cursor;
        let mut positions = Vec::with_capacity(self.elements.len());

        for element in &self.elements {
            if element.is_chorded_note() {
                positions.push(last_start);
            } else if element.is_playable() {
                positions.push(cursor);
                last_start = cursor;
                cursor += element.time_length();
            } else {
                positions.push(cursor);
            }
        }
        positions
    }

    /// Start time of a single element
    pub fn time_of(&self, index: usize) -> Option<Time> {
        self.time_positions().get(index).copied()
    }

    /// Total duration of the voice
    pub fn length(&self) -> Time {
        self.elements
            .iter()
            .fold(Time::from_integer(0), |acc, e| acc + e.time_length())
    }

    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        if !id.is_assigned() {
            return None;
        }
        self.elements.iter().position(|e| e.id() == Some(id))
    }

    /// Notes that start a new time position (chord heads and single notes)
    pub fn lyric_anchor_indices(&self) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, MusicElement::Note(n) if !n.chorded))
            .map(|(i, _)| i)
            .collect()
    }

    /// Checks the invariants of the element list and the spanners
    pub fn validate(&self) -> Result<()> {
        if self.number == 0 {
            return Err(violation("voice numbers start at 1"));
        }
        if self.midi_channel > 15 {
            return Err(violation(format!(
                "MIDI channel {} out of range 0-15",
                self.midi_channel
            )));
        }

        let mut seen = HashSet::new();
        for id in self.elements.iter().filter_map(MusicElement::id) {
            if id.is_assigned() && !seen.insert(id) {
                return Err(violation(format!("element id {} used twice in voice", id)));
            }
        }
        check_chords(&self.elements)?;

        for spanner in &self.spanners {
            self.check_spanner(spanner)?;
        }
        Ok(())
    }

    /// A spanner must join two playables of this voice, start before end
    pub fn check_spanner(&self, spanner: &Spanner) -> Result<()> {
        let start = self.index_of(spanner.start);
        let end = self.index_of(spanner.end);
        match (start, end) {
            (Some(s), Some(e)) if s < e => Ok(()),
            (Some(_), Some(_)) => Err(violation(format!(
                "{} from {} to {} does not run forward",
                spanner.kind.name(),
                spanner.start,
                spanner.end
            ))),
            _ => Err(violation(format!(
                "{} endpoint is not an element of voice {}",
                spanner.kind.name(),
                self.number
            ))),
        }
    }
}

/// Every chorded note must have a note as its preceding playable
pub(crate) fn check_chords<'a>(elements: impl IntoIterator<Item = &'a MusicElement>) -> Result<()> {
    let mut previous_playable: Option<&MusicElement> = None;
    for (index, element) in elements.into_iter().enumerate() {
        if element.is_chorded_note() && !matches!(previous_playable, Some(MusicElement::Note(_))) {
            return Err(violation(format!(
                "chorded note at index {} does not follow a note",
                index
            )));
        }
        if element.is_playable() {
            previous_playable = Some(element);
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub name: String,
    pub number_of_lines: u8,
    pub voices: Vec<Voice>,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl Staff {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number_of_lines: 5,
            voices: Vec::new(),
            extra: ExtraAttributes::new(),
        }
    }

    pub fn voice_by_number(&self, number: u32) -> Option<&Voice> {
        self.voices.iter().find(|v| v.number == number)
    }

    /// Smallest voice number not yet taken
    pub fn next_voice_number(&self) -> u32 {
        (1..)
            .find(|n| self.voice_by_number(*n).is_none())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        let mut numbers = HashSet::new();
        for voice in &self.voices {
            if !numbers.insert(voice.number) {
                return Err(violation(format!(
                    "voice number {} used twice in staff '{}'",
                    voice.number, self.name
                )));
            }
            voice.validate()?;
        }
        Ok(())
    }
}

/// One lyric syllable
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Syllable {
    pub text: String,
    /// Followed by `--`
    #[serde(default)]
    pub hyphen: bool,
    /// Followed by `__`
    #[serde(default)]
    pub extender: bool,
}

impl Syllable {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hyphen: false,
            extender: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LyricsContext {
    pub name: String,
    pub associated_voice: Option<VoiceId>,
    /// Stanza number; 0 when unnumbered
    #[serde(default)]
    pub stanza: u32,
    pub syllables: Vec<Syllable>,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl LyricsContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            associated_voice: None,
            stanza: 0,
            syllables: Vec::new(),
            extra: ExtraAttributes::new(),
        }
    }
}

/// Harmonic function of a function marking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionName {
    /// Tonic
    T,
    /// Subdominant
    S,
    /// Dominant
    D,
    II,
    III,
    VI,
    VII,
    /// Neapolitan
    N,
    /// Lydian
    L,
    /// Phrygian
    F,
    /// Cadential six-four
    K,
}

impl FunctionName {
    pub const ALL: [FunctionName; 11] = [
        FunctionName::T,
        FunctionName::S,
        FunctionName::D,
        FunctionName::II,
        FunctionName::III,
        FunctionName::VI,
        FunctionName::VII,
        FunctionName::N,
        FunctionName::L,
        FunctionName::F,
        FunctionName::K,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FunctionName::T => "T",
            FunctionName::S => "S",
            FunctionName::D => "D",
            FunctionName::II => "II",
            FunctionName::III => "III",
            FunctionName::VI => "VI",
            FunctionName::VII => "VII",
            FunctionName::N => "N",
            FunctionName::L => "L",
            FunctionName::F => "F",
            FunctionName::K => "K",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FunctionName::ALL.iter().copied().find(|f| f.name() == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionMarking {
    pub function: FunctionName,
    /// Tonic of a tonicized key, e.g. "d" in D/d
    pub key: Option<String>,
    #[serde(default)]
    pub minor: bool,
    pub duration: Duration,
}

impl FunctionMarking {
    pub fn new(function: FunctionName, duration: Duration) -> Self {
        Self {
            function,
            key: None,
            minor: false,
            duration,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionMarkingContext {
    pub name: String,
    pub associated_voice: Option<VoiceId>,
    pub markings: Vec<FunctionMarking>,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl FunctionMarkingContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            associated_voice: None,
            markings: Vec::new(),
            extra: ExtraAttributes::new(),
        }
    }

    /// Start time of every marking
    pub fn time_positions(&self) -> Vec<Time> {
        let mut cursor = Time::from_integer(0);
        self.markings
            .iter()
            .map(|m| {
                let start = cursor;
                cursor += m.duration.time_value();
                start
            })
            .collect()
    }
}

/// Staff-like lane of a sheet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Context {
    Staff(Staff),
    Lyrics(LyricsContext),
    FunctionMarking(FunctionMarkingContext),
}

impl Context {
    pub fn name(&self) -> &str {
        match self {
            Context::Staff(staff) => &staff.name,
            Context::Lyrics(lyrics) => &lyrics.name,
            Context::FunctionMarking(fm) => &fm.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        match self {
            Context::Staff(staff) => staff.name = name,
            Context::Lyrics(lyrics) => lyrics.name = name,
            Context::FunctionMarking(fm) => fm.name = name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Context::Staff(_) => "staff",
            Context::Lyrics(_) => "lyrics",
            Context::FunctionMarking(_) => "function-marking",
        }
    }

    pub fn as_staff(&self) -> Option<&Staff> {
        match self {
            Context::Staff(staff) => Some(staff),
            _ => None,
        }
    }

    pub fn as_staff_mut(&mut self) -> Option<&mut Staff> {
        match self {
            Context::Staff(staff) => Some(staff),
            _ => None,
        }
    }

    /// Voice this context follows, for lyrics and function markings
    pub fn associated_voice(&self) -> Option<VoiceId> {
        match self {
            Context::Staff(_) => None,
            Context::Lyrics(lyrics) => lyrics.associated_voice,
            Context::FunctionMarking(fm) => fm.associated_voice,
        }
    }

    pub(crate) fn set_associated_voice(&mut self, voice: Option<VoiceId>) {
        match self {
            Context::Staff(_) => {}
            Context::Lyrics(lyrics) => lyrics.associated_voice = voice,
            Context::FunctionMarking(fm) => fm.associated_voice = voice,
        }
    }

    /// End of the latest event in this context. Lyrics have no durations
    /// of their own and report zero.
    pub fn time_end(&self) -> Time {
        match self {
            Context::Staff(staff) => staff
                .voices
                .iter()
                .map(Voice::length)
                .max()
                .unwrap_or_else(|| Time::from_integer(0)),
            Context::Lyrics(_) => Time::from_integer(0),
            Context::FunctionMarking(fm) => fm
                .markings
                .iter()
                .fold(Time::from_integer(0), |acc, m| acc + m.duration.time_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::duration::BaseLength;
    use crate::models::elements::{Clef, ClefKind, Note, Rest};
    use crate::models::pitch::Pitch;

    fn note(id: u64, step: u8, chorded: bool) -> MusicElement {
        let pitch = Pitch::new(step, 0, 4).unwrap();
        let mut note = if chorded {
            Note::chorded(pitch, Duration::QUARTER)
        } else {
            Note::new(pitch, Duration::QUARTER)
        };
        note.id = ElementId(id);
        MusicElement::Note(note)
    }

    #[test]
    fn test_time_positions_with_chord_and_marker() {
        let mut voice = Voice::new(1);
        voice.elements = vec![
            MusicElement::Clef(Clef::new(ClefKind::Treble)),
            note(1, 0, false),
            note(2, 2, true),
            note(3, 4, true),
            MusicElement::Rest(Rest::new(Duration::plain(BaseLength::Half))),
            note(4, 1, false),
        ];

        let positions = voice.time_positions();
        let quarter = Time::new(1, 4);
        assert_eq!(positions[0], Time::from_integer(0));
        assert_eq!(positions[1], Time::from_integer(0));
        assert_eq!(positions[2], Time::from_integer(0));
        assert_eq!(positions[3], Time::from_integer(0));
        assert_eq!(positions[4], quarter);
        assert_eq!(positions[5], Time::new(3, 4));
        assert_eq!(voice.length(), Time::from_integer(1));
        assert_eq!(voice.lyric_anchor_indices(), vec![1, 5]);
    }

    #[test]
    fn test_validate_rejects_leading_chorded_note() {
        let mut voice = Voice::new(1);
        voice.elements = vec![note(1, 0, true)];
        assert!(voice.validate().is_err());
    }

    #[test]
    fn test_spanner_direction() {
        let mut voice = Voice::new(1);
        voice.elements = vec![note(1, 0, false), note(2, 1, false)];
        assert!(voice
            .check_spanner(&Spanner::new(SpannerKind::Slur, ElementId(1), ElementId(2)))
            .is_ok());
        assert!(voice
            .check_spanner(&Spanner::new(SpannerKind::Tie, ElementId(2), ElementId(1)))
            .is_err());
        assert!(voice
            .check_spanner(&Spanner::new(SpannerKind::Tie, ElementId(1), ElementId(9)))
            .is_err());
    }

    #[test]
    fn test_staff_rejects_duplicate_voice_numbers() {
        let mut staff = Staff::new("Staff 1");
        staff.voices.push(Voice::new(1));
        assert_eq!(staff.next_voice_number(), 2);
        staff.voices.push(Voice::new(1));
        assert!(staff.validate().is_err());
    }

    #[test]
    fn test_function_marking_time_end() {
        let mut fm = FunctionMarkingContext::new("Functions");
        fm.markings.push(FunctionMarking::new(FunctionName::T, Duration::plain(BaseLength::Half)));
        fm.markings.push(FunctionMarking::new(FunctionName::D, Duration::QUARTER));
        let context = Context::FunctionMarking(fm.clone());
        assert_eq!(context.time_end(), Time::new(3, 4));
        assert_eq!(fm.time_positions()[1], Time::new(1, 2));
    }
}

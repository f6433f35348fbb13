//! Music elements stored in a voice
//!
//! Every element variant is a closed enum member so that the serializer,
//! the exporters and the command validators match them exhaustively.
//! No element stores its own time position; see `Voice::time_positions`.

use super::duration::{Duration, Time};
use super::pitch::{Pitch, PitchClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attributes read from a native file that this version does not know about.
/// They are written back unchanged.
pub type ExtraAttributes = BTreeMap<String, String>;

/// Stable identifier of a playable element, unique within a document.
/// `ElementId::UNASSIGNED` is replaced by a fresh id when the element is
/// inserted into a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl ElementId {
    pub const UNASSIGNED: ElementId = ElementId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A single event or marker in a voice
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MusicElement {
    Note(Note),
    Rest(Rest),
    Clef(Clef),
    KeySignature(KeySignature),
    TimeSignature(TimeSignature),
    Barline(Barline),
    Mark(Mark),
}

impl MusicElement {
    /// Notes and rests carry duration; everything else is a zero-length marker
    pub fn is_playable(&self) -> bool {
        matches!(self, MusicElement::Note(_) | MusicElement::Rest(_))
    }

    /// Id of a playable element
    pub fn id(&self) -> Option<ElementId> {
        match self {
            MusicElement::Note(note) => Some(note.id),
            MusicElement::Rest(rest) => Some(rest.id),
            _ => None,
        }
    }

    pub(crate) fn set_id(&mut self, id: ElementId) {
        match self {
            MusicElement::Note(note) => note.id = id,
            MusicElement::Rest(rest) => rest.id = id,
            _ => {}
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            MusicElement::Note(note) => Some(note.duration),
            MusicElement::Rest(rest) => Some(rest.duration),
            _ => None,
        }
    }

    /// How far this element moves the voice's time cursor
    pub fn time_length(&self) -> Time {
        match self {
            MusicElement::Note(note) if note.chorded => Time::from_integer(0),
            MusicElement::Note(note) => note.duration.time_value(),
            MusicElement::Rest(rest) => rest.duration.time_value(),
            _ => Time::from_integer(0),
        }
    }

    /// True for a note that sounds together with the preceding note
    pub fn is_chorded_note(&self) -> bool {
        matches!(self, MusicElement::Note(note) if note.chorded)
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            MusicElement::Note(note) => Some(note),
            _ => None,
        }
    }

    /// Short type name for log and error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            MusicElement::Note(_) => "note",
            MusicElement::Rest(_) => "rest",
            MusicElement::Clef(_) => "clef",
            MusicElement::KeySignature(_) => "key signature",
            MusicElement::TimeSignature(_) => "time signature",
            MusicElement::Barline(_) => "barline",
            MusicElement::Mark(_) => "mark",
        }
    }
}

/// Stem direction override of a single note
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteStem {
    /// Follow the voice preference
    #[default]
    Preferred,
    Up,
    Down,
}

/// How the accidental of a note is displayed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccidentalDisplay {
    #[default]
    Auto,
    /// Always printed (LilyPond `!`)
    Forced,
    /// Printed in parentheses (LilyPond `?`)
    Cautionary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: ElementId,
    pub pitch: Pitch,
    pub duration: Duration,
    #[serde(default)]
    pub stem: NoteStem,
    /// Sounds together with the preceding note (chord member); does not advance time
    #[serde(default)]
    pub chorded: bool,
    #[serde(default)]
    pub accidental_display: AccidentalDisplay,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl Note {
    pub fn new(pitch: Pitch, duration: Duration) -> Self {
        Self {
            id: ElementId::UNASSIGNED,
            pitch,
            duration,
            stem: NoteStem::Preferred,
            chorded: false,
            accidental_display: AccidentalDisplay::Auto,
            extra: ExtraAttributes::new(),
        }
    }

    /// A chord member following another note
    pub fn chorded(pitch: Pitch, duration: Duration) -> Self {
        Self {
            chorded: true,
            ..Self::new(pitch, duration)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestKind {
    #[default]
    Normal,
    /// Invisible rest (LilyPond `s`)
    Spacer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub id: ElementId,
    pub duration: Duration,
    #[serde(default)]
    pub kind: RestKind,
    #[serde(default)]
    pub extra: ExtraAttributes,
}

impl Rest {
    pub fn new(duration: Duration) -> Self {
        Self {
            id: ElementId::UNASSIGNED,
            duration,
            kind: RestKind::Normal,
            extra: ExtraAttributes::new(),
        }
    }

    pub fn spacer(duration: Duration) -> Self {
        Self {
            kind: RestKind::Spacer,
            ..Self::new(duration)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClefKind {
    Treble,
    Bass,
    Alto,
    Tenor,
    Soprano,
    MezzoSoprano,
    Baritone,
    VarBaritone,
    SubBass,
    French,
    Percussion,
    Tab,
}

impl ClefKind {
    pub const ALL: [ClefKind; 12] = [
        ClefKind::Treble,
        ClefKind::Bass,
        ClefKind::Alto,
        ClefKind::Tenor,
        ClefKind::Soprano,
        ClefKind::MezzoSoprano,
        ClefKind::Baritone,
        ClefKind::VarBaritone,
        ClefKind::SubBass,
        ClefKind::French,
        ClefKind::Percussion,
        ClefKind::Tab,
    ];

    /// LilyPond clef name; also used by the native format
    pub fn name(self) -> &'static str {
        match self {
            ClefKind::Treble => "treble",
            ClefKind::Bass => "bass",
            ClefKind::Alto => "alto",
            ClefKind::Tenor => "tenor",
            ClefKind::Soprano => "soprano",
            ClefKind::MezzoSoprano => "mezzosoprano",
            ClefKind::Baritone => "baritone",
            ClefKind::VarBaritone => "varbaritone",
            ClefKind::SubBass => "subbass",
            ClefKind::French => "french",
            ClefKind::Percussion => "percussion",
            ClefKind::Tab => "tab",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "G" | "G2" | "violin" => Some(ClefKind::Treble),
            "F" => Some(ClefKind::Bass),
            "C" => Some(ClefKind::Alto),
            _ => ClefKind::ALL.iter().copied().find(|k| k.name() == name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clef {
    pub kind: ClefKind,
    /// Octave transposition as written in LilyPond: 0, ±8 or ±15
    #[serde(default)]
    pub offset: i8,
}

impl Clef {
    pub fn new(kind: ClefKind) -> Self {
        Self { kind, offset: 0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl KeyMode {
    pub const ALL: [KeyMode; 7] = [
        KeyMode::Major,
        KeyMode::Minor,
        KeyMode::Dorian,
        KeyMode::Phrygian,
        KeyMode::Lydian,
        KeyMode::Mixolydian,
        KeyMode::Locrian,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
            KeyMode::Dorian => "dorian",
            KeyMode::Phrygian => "phrygian",
            KeyMode::Lydian => "lydian",
            KeyMode::Mixolydian => "mixolydian",
            KeyMode::Locrian => "locrian",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ionian" => Some(KeyMode::Major),
            "aeolian" => Some(KeyMode::Minor),
            _ => KeyMode::ALL.iter().copied().find(|m| m.name() == name),
        }
    }

    /// Position of the mode's key relative to the major key on the same tonic
    fn fifths_offset(self) -> i32 {
        match self {
            KeyMode::Major => 0,
            KeyMode::Minor => -3,
            KeyMode::Dorian => -2,
            KeyMode::Phrygian => -4,
            KeyMode::Lydian => 1,
            KeyMode::Mixolydian => -1,
            KeyMode::Locrian => -5,
        }
    }
}

/// Steps in the order sharps are added (F C G D A E B)
const SHARP_ORDER: [u8; 7] = [3, 0, 4, 1, 5, 2, 6];

/// Circle-of-fifths position of the major key on each natural step
const MAJOR_FIFTHS: [i32; 7] = [0, 2, 4, -1, 1, 3, 5];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySignature {
    pub tonic: PitchClass,
    pub mode: KeyMode,
}

impl KeySignature {
    pub fn new(tonic: PitchClass, mode: KeyMode) -> Self {
        Self { tonic, mode }
    }

    pub fn c_major() -> Self {
        Self {
            tonic: PitchClass {
                step: 0,
                accidental: 0,
            },
            mode: KeyMode::Major,
        }
    }

    /// Number of sharps (positive) or flats (negative)
    pub fn fifths(&self) -> i32 {
        MAJOR_FIFTHS[self.tonic.step as usize % 7]
            + 7 * self.tonic.accidental as i32
            + self.mode.fifths_offset()
    }

    /// Accidental the key applies to a bare step
    pub fn accidental_for_step(&self, step: u8) -> i8 {
        let fifths = self.fifths();
        let mut accidental = 0i8;
        if fifths > 0 {
            for k in 0..fifths as usize {
                if SHARP_ORDER[k % 7] == step {
                    accidental += 1;
                }
            }
        } else {
            for k in 0..(-fifths) as usize {
                if SHARP_ORDER[6 - k % 7] == step {
                    accidental -= 1;
                }
            }
        }
        accidental
    }

    /// A pitch spelled with the key's accidental for its step
    pub fn apply(&self, step: u8, octave: i8) -> Pitch {
        Pitch {
            step,
            accidental: self.accidental_for_step(step),
            octave,
        }
    }
}

impl Default for KeySignature {
    fn default() -> Self {
        Self::c_major()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u8,
    pub beat: u8,
}

impl TimeSignature {
    pub fn new(beats: u8, beat: u8) -> Self {
        Self { beats, beat }
    }

    /// Length of one measure in whole notes
    pub fn measure_length(&self) -> Time {
        Time::new(self.beats as i32, self.beat.max(1) as i32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BarlineKind {
    Single,
    Double,
    End,
    RepeatOpen { times: u8 },
    RepeatClose,
    RepeatCloseOpen,
    Dotted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Barline {
    pub kind: BarlineKind,
}

impl Barline {
    pub fn new(kind: BarlineKind) -> Self {
        Self { kind }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DynamicKind {
    PPP,
    PP,
    P,
    MP,
    MF,
    F,
    FF,
    FFF,
    FP,
    SF,
    SFZ,
    RFZ,
}

impl DynamicKind {
    pub const ALL: [DynamicKind; 12] = [
        DynamicKind::PPP,
        DynamicKind::PP,
        DynamicKind::P,
        DynamicKind::MP,
        DynamicKind::MF,
        DynamicKind::F,
        DynamicKind::FF,
        DynamicKind::FFF,
        DynamicKind::FP,
        DynamicKind::SF,
        DynamicKind::SFZ,
        DynamicKind::RFZ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DynamicKind::PPP => "ppp",
            DynamicKind::PP => "pp",
            DynamicKind::P => "p",
            DynamicKind::MP => "mp",
            DynamicKind::MF => "mf",
            DynamicKind::F => "f",
            DynamicKind::FF => "ff",
            DynamicKind::FFF => "fff",
            DynamicKind::FP => "fp",
            DynamicKind::SF => "sf",
            DynamicKind::SFZ => "sfz",
            DynamicKind::RFZ => "rfz",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DynamicKind::ALL.iter().copied().find(|d| d.name() == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticulationKind {
    Staccato,
    Staccatissimo,
    Accent,
    Marcato,
    Tenuto,
    Portato,
    Stopped,
}

impl ArticulationKind {
    pub const ALL: [ArticulationKind; 7] = [
        ArticulationKind::Staccato,
        ArticulationKind::Staccatissimo,
        ArticulationKind::Accent,
        ArticulationKind::Marcato,
        ArticulationKind::Tenuto,
        ArticulationKind::Portato,
        ArticulationKind::Stopped,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArticulationKind::Staccato => "staccato",
            ArticulationKind::Staccatissimo => "staccatissimo",
            ArticulationKind::Accent => "accent",
            ArticulationKind::Marcato => "marcato",
            ArticulationKind::Tenuto => "tenuto",
            ArticulationKind::Portato => "portato",
            ArticulationKind::Stopped => "stopped",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ArticulationKind::ALL.iter().copied().find(|a| a.name() == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HairpinKind {
    Crescendo,
    Decrescendo,
    End,
}

impl HairpinKind {
    pub fn name(self) -> &'static str {
        match self {
            HairpinKind::Crescendo => "crescendo",
            HairpinKind::Decrescendo => "decrescendo",
            HairpinKind::End => "end",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "crescendo" => Some(HairpinKind::Crescendo),
            "decrescendo" => Some(HairpinKind::Decrescendo),
            "end" => Some(HairpinKind::End),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RepeatMark {
    /// Start of the n-th volta bracket
    Volta { number: u8 },
    /// End of the last volta bracket
    VoltaEnd,
    Segno,
    Coda,
    VarCoda,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    #[default]
    Neutral,
    Above,
    Below,
}

impl Placement {
    pub fn name(self) -> &'static str {
        match self {
            Placement::Neutral => "neutral",
            Placement::Above => "above",
            Placement::Below => "below",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "neutral" => Some(Placement::Neutral),
            "above" => Some(Placement::Above),
            "below" => Some(Placement::Below),
            _ => None,
        }
    }
}

/// Metronome part of a tempo mark: `beat = bpm`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metronome {
    pub beat: Duration,
    pub bpm: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tempo {
    pub text: Option<String>,
    pub metronome: Option<Metronome>,
}

/// Zero-length marking. Except for tempo and volta marks, a mark decorates
/// the playable element directly before it in the voice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mark", rename_all = "kebab-case")]
pub enum Mark {
    Tempo(Tempo),
    Fermata,
    Dynamic { dynamic: DynamicKind },
    Hairpin { hairpin: HairpinKind },
    Repeat(RepeatMark),
    Fingering { finger: u8 },
    Articulation { articulation: ArticulationKind },
    Text { text: String, placement: Placement },
}

impl Mark {
    /// Postfix marks attach to the preceding playable
    pub fn is_postfix(&self) -> bool {
        !matches!(
            self,
            Mark::Tempo(_) | Mark::Repeat(RepeatMark::Volta { .. }) | Mark::Repeat(RepeatMark::VoltaEnd)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::duration::BaseLength;

    #[test]
    fn test_key_fifths() {
        let d_major = KeySignature::new(PitchClass::new(1, 0).unwrap(), KeyMode::Major);
        assert_eq!(d_major.fifths(), 2);
        assert_eq!(d_major.accidental_for_step(3), 1); // F#
        assert_eq!(d_major.accidental_for_step(0), 1); // C#
        assert_eq!(d_major.accidental_for_step(4), 0);

        let c_minor = KeySignature::new(PitchClass::new(0, 0).unwrap(), KeyMode::Minor);
        assert_eq!(c_minor.fifths(), -3);
        assert_eq!(c_minor.accidental_for_step(6), -1); // Bb
        assert_eq!(c_minor.accidental_for_step(2), -1); // Eb
        assert_eq!(c_minor.accidental_for_step(5), -1); // Ab
        assert_eq!(c_minor.accidental_for_step(1), 0);

        let bes_major = KeySignature::new(PitchClass::new(6, -1).unwrap(), KeyMode::Major);
        assert_eq!(bes_major.fifths(), -2);
        assert_eq!(bes_major.apply(2, 4).accidental, -1);
    }

    #[test]
    fn test_chorded_note_does_not_advance_time() {
        let head = MusicElement::Note(Note::new(Pitch::middle_c(), Duration::QUARTER));
        let member = MusicElement::Note(Note::chorded(Pitch::middle_c(), Duration::QUARTER));
        let clef = MusicElement::Clef(Clef::new(ClefKind::Bass));

        assert_eq!(head.time_length(), Time::new(1, 4));
        assert_eq!(member.time_length(), Time::from_integer(0));
        assert_eq!(clef.time_length(), Time::from_integer(0));
        assert!(member.is_chorded_note());
        assert!(!clef.is_playable());
    }

    #[test]
    fn test_mark_postfix() {
        assert!(Mark::Fermata.is_postfix());
        assert!(Mark::Dynamic { dynamic: DynamicKind::MF }.is_postfix());
        assert!(!Mark::Repeat(RepeatMark::Volta { number: 1 }).is_postfix());
        assert!(!Mark::Tempo(Tempo {
            text: None,
            metronome: Some(Metronome {
                beat: Duration::plain(BaseLength::Quarter),
                bpm: 96
            })
        })
        .is_postfix());
    }

    #[test]
    fn test_clef_aliases() {
        assert_eq!(ClefKind::from_name("violin"), Some(ClefKind::Treble));
        assert_eq!(ClefKind::from_name("mezzosoprano"), Some(ClefKind::MezzoSoprano));
        assert_eq!(ClefKind::from_name("nonsense"), None);
    }
}

//! CanorusML parsing layer
//!
//! Wraps roxmltree and turns each known node into its model counterpart.
//! Errors carry the line and column of the offending node.

use crate::error::ParseError;
use crate::models::{
    AccidentalDisplay, ArticulationKind, BaseLength, Barline, BarlineKind, Clef, ClefKind,
    Context, Document, Duration, DynamicKind, ElementId, ExtraAttributes, FunctionMarking,
    FunctionMarkingContext, FunctionName, HairpinKind, KeyMode, KeySignature, LyricsContext, Mark,
    Metronome, MusicElement, Note, NoteStem, Pitch, PitchClass, Placement, RepeatMark, Rest,
    RestKind, Sheet, Spanner, SpannerKind, Staff, StemDirection, Syllable, Tempo, TimeSignature,
    Voice, VoiceId,
};
use roxmltree::Node;
use std::str::FromStr;

type Result<T> = std::result::Result<T, ParseError>;

const DOCUMENT_ATTRIBUTES: [&str; 8] = [
    "title",
    "subtitle",
    "composer",
    "arranger",
    "poet",
    "copyright",
    "dedication",
    "comments",
];
const SHEET_ATTRIBUTES: [&str; 1] = ["name"];
const STAFF_ATTRIBUTES: [&str; 2] = ["name", "number-of-lines"];
const LYRICS_ATTRIBUTES: [&str; 3] = ["name", "voice", "stanza"];
const FUNCTION_MARKING_ATTRIBUTES: [&str; 2] = ["name", "voice"];
const VOICE_ATTRIBUTES: [&str; 6] = [
    "id",
    "number",
    "name",
    "stem-direction",
    "instrument",
    "midi-channel",
];
const NOTE_ATTRIBUTES: [&str; 9] = [
    "id",
    "step",
    "accidental",
    "octave",
    "length",
    "dots",
    "stem",
    "chorded",
    "accidental-display",
];
const REST_ATTRIBUTES: [&str; 4] = ["id", "length", "dots", "kind"];

pub(crate) struct CanorusMlReader<'a, 'input> {
    xml: &'a roxmltree::Document<'input>,
}

impl<'a, 'input> CanorusMlReader<'a, 'input> {
    pub fn new(xml: &'a roxmltree::Document<'input>) -> Self {
        Self { xml }
    }

    fn error(&self, node: Node, message: impl Into<String>) -> ParseError {
        let pos = self.xml.text_pos_at(node.range().start);
        ParseError::new(pos.row as usize, pos.col as usize, message)
    }

    fn required(&self, node: Node<'a, 'input>, name: &str) -> Result<&'a str> {
        node.attribute(name).ok_or_else(|| {
            self.error(
                node,
                format!("<{}> lacks attribute '{}'", node.tag_name().name(), name),
            )
        })
    }

    fn parse<T: FromStr>(&self, node: Node<'a, 'input>, name: &str) -> Result<T> {
        let raw = self.required(node, name)?;
        raw.parse()
            .map_err(|_| self.error(node, format!("bad value '{}' for '{}'", raw, name)))
    }

    fn parse_or<T: FromStr>(&self, node: Node<'a, 'input>, name: &str, default: T) -> Result<T> {
        match node.attribute(name) {
            Some(_) => self.parse(node, name),
            None => Ok(default),
        }
    }

    fn flag(&self, node: Node<'a, 'input>, name: &str) -> Result<bool> {
        match node.attribute(name) {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(self.error(node, format!("bad boolean '{}' for '{}'", other, name))),
        }
    }

    fn text(&self, node: Node<'a, 'input>, name: &str) -> String {
        node.attribute(name).unwrap_or_default().to_string()
    }

    /// Looks a name up with one of the model's `from_name` functions
    fn named<T>(&self, node: Node<'a, 'input>, name: &str, lookup: impl Fn(&str) -> Option<T>) -> Result<T> {
        let raw = self.required(node, name)?;
        lookup(raw).ok_or_else(|| self.error(node, format!("unknown {} '{}'", name, raw)))
    }

    /// Attributes this version does not understand
    fn extra(&self, node: Node<'a, 'input>, known: &[&str]) -> ExtraAttributes {
        node.attributes()
            .filter(|a| !known.contains(&a.name()))
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect()
    }

    fn children(&self, node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
        node.children().filter(|n| n.is_element())
    }

    fn skip(&self, node: Node<'a, 'input>, parent: &str) {
        let pos = self.xml.text_pos_at(node.range().start);
        log::warn!(
            "{}:{}: unknown element <{}> in <{}> dropped",
            pos.row,
            pos.col,
            node.tag_name().name(),
            parent
        );
    }

    pub fn read_document(&self) -> Result<Document> {
        let root = self.xml.root_element();
        if root.tag_name().name() != "canorus" {
            return Err(self.error(
                root,
                format!("expected <canorus>, found <{}>", root.tag_name().name()),
            ));
        }

        let mut doc = Document::new();
        let Some(node) = self.children(root).find(|n| n.has_tag_name("document")) else {
            return Err(self.error(root, "missing <document>"));
        };

        for field in DOCUMENT_ATTRIBUTES {
            doc.metadata.set_field(field, self.text(node, field));
        }
        doc.extra = self.extra(node, &DOCUMENT_ATTRIBUTES);

        for child in self.children(node) {
            match child.tag_name().name() {
                "sheet" => doc.sheets.push(self.read_sheet(child)?),
                _ => self.skip(child, "document"),
            }
        }

        doc.assign_missing_ids();
        doc.validate().map_err(|e| self.error(root, e.to_string()))?;
        Ok(doc)
    }

    fn read_sheet(&self, node: Node<'a, 'input>) -> Result<Sheet> {
        let mut sheet = Sheet::new(self.required(node, "name")?);
        sheet.extra = self.extra(node, &SHEET_ATTRIBUTES);

        for child in self.children(node) {
            let context = match child.tag_name().name() {
                "staff" => Context::Staff(self.read_staff(child)?),
                "lyrics" => Context::Lyrics(self.read_lyrics(child)?),
                "function-marking" => Context::FunctionMarking(self.read_function_markings(child)?),
                _ => {
                    self.skip(child, "sheet");
                    continue;
                }
            };
            sheet.contexts.push(context);
        }
        Ok(sheet)
    }

    fn read_staff(&self, node: Node<'a, 'input>) -> Result<Staff> {
        let mut staff = Staff::new(self.required(node, "name")?);
        staff.number_of_lines = self.parse_or(node, "number-of-lines", 5)?;
        staff.extra = self.extra(node, &STAFF_ATTRIBUTES);

        for child in self.children(node) {
            match child.tag_name().name() {
                "voice" => staff.voices.push(self.read_voice(child)?),
                _ => self.skip(child, "staff"),
            }
        }
        Ok(staff)
    }

    fn read_voice(&self, node: Node<'a, 'input>) -> Result<Voice> {
        let mut voice = Voice::new(self.parse(node, "number")?);
        voice.id = VoiceId(self.parse_or(node, "id", 0)?);
        voice.name = self.text(node, "name");
        voice.stem_direction = match node.attribute("stem-direction") {
            Some(_) => self.named(node, "stem-direction", StemDirection::from_name)?,
            None => StemDirection::Neutral,
        };
        voice.instrument = self.text(node, "instrument");
        voice.midi_channel = self.parse_or(node, "midi-channel", 0)?;
        voice.extra = self.extra(node, &VOICE_ATTRIBUTES);

        for child in self.children(node) {
            match child.tag_name().name() {
                "spanner" => voice.spanners.push(Spanner::new(
                    self.named(child, "kind", SpannerKind::from_name)?,
                    ElementId(self.parse(child, "start")?),
                    ElementId(self.parse(child, "end")?),
                )),
                _ => match self.read_element(child)? {
                    Some(element) => voice.elements.push(element),
                    None => self.skip(child, "voice"),
                },
            }
        }
        Ok(voice)
    }

    fn read_duration(&self, node: Node<'a, 'input>, length: &str, dots: &str) -> Result<Duration> {
        let base = self.named(node, length, BaseLength::from_name)?;
        Duration::new(base, self.parse_or(node, dots, 0)?)
            .map_err(|e| self.error(node, e.to_string()))
    }

    fn read_element(&self, node: Node<'a, 'input>) -> Result<Option<MusicElement>> {
        let element = match node.tag_name().name() {
            "note" => {
                let pitch = Pitch::new(
                    self.parse(node, "step")?,
                    self.parse_or(node, "accidental", 0)?,
                    self.parse(node, "octave")?,
                )
                .map_err(|e| self.error(node, e.to_string()))?;
                let mut note = Note::new(pitch, self.read_duration(node, "length", "dots")?);
                note.id = ElementId(self.parse_or(node, "id", 0)?);
                note.stem = match node.attribute("stem") {
                    None | Some("preferred") => NoteStem::Preferred,
                    Some("up") => NoteStem::Up,
                    Some("down") => NoteStem::Down,
                    Some(other) => return Err(self.error(node, format!("unknown stem '{}'", other))),
                };
                note.chorded = self.flag(node, "chorded")?;
                note.accidental_display = match node.attribute("accidental-display") {
                    None | Some("auto") => AccidentalDisplay::Auto,
                    Some("forced") => AccidentalDisplay::Forced,
                    Some("cautionary") => AccidentalDisplay::Cautionary,
                    Some(other) => {
                        return Err(self.error(node, format!("unknown accidental display '{}'", other)))
                    }
                };
                note.extra = self.extra(node, &NOTE_ATTRIBUTES);
                MusicElement::Note(note)
            }
            "rest" => {
                let mut rest = Rest::new(self.read_duration(node, "length", "dots")?);
                rest.id = ElementId(self.parse_or(node, "id", 0)?);
                rest.kind = match node.attribute("kind") {
                    None | Some("normal") => RestKind::Normal,
                    Some("spacer") => RestKind::Spacer,
                    Some(other) => return Err(self.error(node, format!("unknown rest kind '{}'", other))),
                };
                rest.extra = self.extra(node, &REST_ATTRIBUTES);
                MusicElement::Rest(rest)
            }
            "clef" => MusicElement::Clef(Clef {
                kind: self.named(node, "kind", ClefKind::from_name)?,
                offset: self.parse_or(node, "offset", 0)?,
            }),
            "key-signature" => {
                let tonic = PitchClass::new(
                    self.parse(node, "tonic-step")?,
                    self.parse_or(node, "tonic-accidental", 0)?,
                )
                .map_err(|e| self.error(node, e.to_string()))?;
                MusicElement::KeySignature(KeySignature::new(
                    tonic,
                    self.named(node, "mode", KeyMode::from_name)?,
                ))
            }
            "time-signature" => MusicElement::TimeSignature(TimeSignature::new(
                self.parse(node, "beats")?,
                self.parse(node, "beat")?,
            )),
            "barline" => {
                let kind = match self.required(node, "kind")? {
                    "single" => BarlineKind::Single,
                    "double" => BarlineKind::Double,
                    "end" => BarlineKind::End,
                    "repeat-open" => BarlineKind::RepeatOpen {
                        times: self.parse_or(node, "times", 2)?,
                    },
                    "repeat-close" => BarlineKind::RepeatClose,
                    "repeat-close-open" => BarlineKind::RepeatCloseOpen,
                    "dotted" => BarlineKind::Dotted,
                    other => return Err(self.error(node, format!("unknown barline '{}'", other))),
                };
                MusicElement::Barline(Barline::new(kind))
            }
            "mark" => MusicElement::Mark(self.read_mark(node)?),
            _ => return Ok(None),
        };
        Ok(Some(element))
    }

    fn read_mark(&self, node: Node<'a, 'input>) -> Result<Mark> {
        let mark = match self.required(node, "type")? {
            "tempo" => {
                let metronome = match node.attribute("bpm") {
                    Some(_) => Some(Metronome {
                        beat: self.read_duration(node, "beat-length", "beat-dots")?,
                        bpm: self.parse(node, "bpm")?,
                    }),
                    None => None,
                };
                Mark::Tempo(Tempo {
                    text: node.attribute("text").map(str::to_string),
                    metronome,
                })
            }
            "fermata" => Mark::Fermata,
            "dynamic" => Mark::Dynamic {
                dynamic: self.named(node, "dynamic", DynamicKind::from_name)?,
            },
            "hairpin" => Mark::Hairpin {
                hairpin: self.named(node, "hairpin", HairpinKind::from_name)?,
            },
            "repeat" => Mark::Repeat(match self.required(node, "repeat")? {
                "volta" => RepeatMark::Volta {
                    number: self.parse(node, "number")?,
                },
                "volta-end" => RepeatMark::VoltaEnd,
                "segno" => RepeatMark::Segno,
                "coda" => RepeatMark::Coda,
                "varcoda" => RepeatMark::VarCoda,
                other => return Err(self.error(node, format!("unknown repeat mark '{}'", other))),
            }),
            "fingering" => Mark::Fingering {
                finger: self.parse(node, "finger")?,
            },
            "articulation" => Mark::Articulation {
                articulation: self.named(node, "articulation", ArticulationKind::from_name)?,
            },
            "text" => Mark::Text {
                text: self.text(node, "text"),
                placement: match node.attribute("placement") {
                    Some(_) => self.named(node, "placement", Placement::from_name)?,
                    None => Placement::Neutral,
                },
            },
            other => return Err(self.error(node, format!("unknown mark type '{}'", other))),
        };
        Ok(mark)
    }

    fn read_lyrics(&self, node: Node<'a, 'input>) -> Result<LyricsContext> {
        let mut lyrics = LyricsContext::new(self.required(node, "name")?);
        lyrics.associated_voice = self.associated_voice(node)?;
        lyrics.stanza = self.parse_or(node, "stanza", 0)?;
        lyrics.extra = self.extra(node, &LYRICS_ATTRIBUTES);

        for child in self.children(node) {
            match child.tag_name().name() {
                "syllable" => lyrics.syllables.push(Syllable {
                    text: self.text(child, "text"),
                    hyphen: self.flag(child, "hyphen")?,
                    extender: self.flag(child, "extender")?,
                }),
                _ => self.skip(child, "lyrics"),
            }
        }
        Ok(lyrics)
    }

    fn read_function_markings(&self, node: Node<'a, 'input>) -> Result<FunctionMarkingContext> {
        let mut fm = FunctionMarkingContext::new(self.required(node, "name")?);
        fm.associated_voice = self.associated_voice(node)?;
        fm.extra = self.extra(node, &FUNCTION_MARKING_ATTRIBUTES);

        for child in self.children(node) {
            match child.tag_name().name() {
                "function" => fm.markings.push(FunctionMarking {
                    function: self.named(child, "function", FunctionName::from_name)?,
                    key: child.attribute("key").map(str::to_string),
                    minor: self.flag(child, "minor")?,
                    duration: self.read_duration(child, "length", "dots")?,
                }),
                _ => self.skip(child, "function-marking"),
            }
        }
        Ok(fm)
    }

    fn associated_voice(&self, node: Node<'a, 'input>) -> Result<Option<VoiceId>> {
        match node.attribute("voice") {
            Some(_) => Ok(Some(VoiceId(self.parse(node, "voice")?))),
            None => Ok(None),
        }
    }
}

/// Converts a roxmltree syntax error into a positioned parse error
pub(crate) fn syntax_error(e: roxmltree::Error) -> ParseError {
    let pos = e.pos();
    ParseError::new(pos.row as usize, pos.col as usize, e.to_string())
}

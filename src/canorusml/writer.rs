// CanorusML builder

use super::FORMAT_VERSION;
use crate::models::{
    BarlineKind, Context, Document, Duration, ExtraAttributes, FunctionMarkingContext,
    LyricsContext, Mark, MusicElement, RepeatMark, Sheet, Staff, Voice,
};
use std::borrow::Cow;

/// Escapes an attribute value. Whitespace control characters become
/// character references so that they survive attribute normalization.
fn escape_attribute(value: &str) -> String {
    quick_xml::escape::escape(value)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

/// Plain XML attribute name. Namespaced and `xml`-prefixed names are
/// rejected since the reader would not hand them back as plain attributes.
fn is_plain_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars.next().map_or(false, |c| c.is_alphabetic() || c == '_');
    starts_well
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.to_ascii_lowercase().starts_with("xml")
}

type Attributes<'a> = Vec<(&'a str, Cow<'a, str>)>;

/// Indenting string builder for CanorusML documents
pub(crate) struct CanorusMlBuilder {
    buffer: String,
    depth: usize,
}

impl CanorusMlBuilder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            depth: 0,
        }
    }

    fn start_tag(&mut self, tag: &str, attributes: &[(&str, Cow<str>)], extra: Option<&ExtraAttributes>) {
        self.buffer.push_str(&"  ".repeat(self.depth));
        self.buffer.push('<');
        self.buffer.push_str(tag);
        for (name, value) in attributes {
            self.buffer
                .push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
        }
        if let Some(extra) = extra {
            for (name, value) in extra {
                if attributes.iter().any(|(known, _)| *known == name.as_str()) {
                    log::warn!("<{}>: extra attribute '{}' shadows a known one, skipped", tag, name);
                    continue;
                }
                if !is_plain_attribute_name(name) {
                    log::warn!("<{}>: extra attribute '{}' is not a valid XML name, skipped", tag, name);
                    continue;
                }
                self.buffer
                    .push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
            }
        }
    }

    fn open(&mut self, tag: &str, attributes: &[(&str, Cow<str>)], extra: Option<&ExtraAttributes>) {
        self.start_tag(tag, attributes, extra);
        self.buffer.push_str(">\n");
        self.depth += 1;
    }

    fn empty(&mut self, tag: &str, attributes: &[(&str, Cow<str>)], extra: Option<&ExtraAttributes>) {
        self.start_tag(tag, attributes, extra);
        self.buffer.push_str("/>\n");
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.buffer.push_str(&"  ".repeat(self.depth));
        self.buffer.push_str(&format!("</{}>\n", tag));
    }

    pub fn write_document(&mut self, doc: &Document) {
        self.buffer
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.open("canorus", &[("version", Cow::Borrowed(FORMAT_VERSION))], None);

        let metadata: Attributes = crate::models::DocumentMetadata::FIELDS
            .iter()
            .map(|field| (*field, Cow::Borrowed(doc.metadata.field(field).unwrap_or(""))))
            .collect();
        self.open("document", &metadata, Some(&doc.extra));
        for sheet in &doc.sheets {
            self.write_sheet(sheet);
        }
        self.close("document");
        self.close("canorus");
    }

    fn write_sheet(&mut self, sheet: &Sheet) {
        self.open("sheet", &[("name", Cow::Borrowed(sheet.name.as_str()))], Some(&sheet.extra));
        for context in &sheet.contexts {
            match context {
                Context::Staff(staff) => self.write_staff(staff),
                Context::Lyrics(lyrics) => self.write_lyrics(lyrics),
                Context::FunctionMarking(fm) => self.write_function_markings(fm),
            }
        }
        self.close("sheet");
    }

    fn write_staff(&mut self, staff: &Staff) {
        self.open(
            "staff",
            &[
                ("name", Cow::Borrowed(staff.name.as_str())),
                ("number-of-lines", Cow::Owned(staff.number_of_lines.to_string())),
            ],
            Some(&staff.extra),
        );
        for voice in &staff.voices {
            self.write_voice(voice);
        }
        self.close("staff");
    }

    fn write_voice(&mut self, voice: &Voice) {
        self.open(
            "voice",
            &[
                ("id", Cow::Owned(voice.id.0.to_string())),
                ("number", Cow::Owned(voice.number.to_string())),
                ("name", Cow::Borrowed(voice.name.as_str())),
                ("stem-direction", Cow::Borrowed(voice.stem_direction.name())),
                ("instrument", Cow::Borrowed(voice.instrument.as_str())),
                ("midi-channel", Cow::Owned(voice.midi_channel.to_string())),
            ],
            Some(&voice.extra),
        );
        for element in &voice.elements {
            self.write_element(element);
        }
        for spanner in &voice.spanners {
            self.empty(
                "spanner",
                &[
                    ("kind", Cow::Borrowed(spanner.kind.name())),
                    ("start", Cow::Owned(spanner.start.0.to_string())),
                    ("end", Cow::Owned(spanner.end.0.to_string())),
                ],
                None,
            );
        }
        self.close("voice");
    }

    fn write_element(&mut self, element: &MusicElement) {
        match element {
            MusicElement::Note(note) => {
                let mut attributes = vec![
                    ("id", Cow::Owned(note.id.0.to_string())),
                    ("step", Cow::Owned(note.pitch.step.to_string())),
                    ("accidental", Cow::Owned(note.pitch.accidental.to_string())),
                    ("octave", Cow::Owned(note.pitch.octave.to_string())),
                ];
                attributes.extend(duration_attributes(false, &note.duration));
                attributes.push(("stem", Cow::Borrowed(note_stem_name(note.stem))));
                attributes.push(("chorded", Cow::Borrowed(bool_name(note.chorded))));
                attributes.push((
                    "accidental-display",
                    Cow::Borrowed(accidental_display_name(note.accidental_display)),
                ));
                self.empty("note", &attributes, Some(&note.extra));
            }
            MusicElement::Rest(rest) => {
                let mut attributes = vec![("id", Cow::Owned(rest.id.0.to_string()))];
                attributes.extend(duration_attributes(false, &rest.duration));
                attributes.push((
                    "kind",
                    Cow::Borrowed(match rest.kind {
                        crate::models::RestKind::Normal => "normal",
                        crate::models::RestKind::Spacer => "spacer",
                    }),
                ));
                self.empty("rest", &attributes, Some(&rest.extra));
            }
            MusicElement::Clef(clef) => self.empty(
                "clef",
                &[
                    ("kind", Cow::Borrowed(clef.kind.name())),
                    ("offset", Cow::Owned(clef.offset.to_string())),
                ],
                None,
            ),
            MusicElement::KeySignature(key) => self.empty(
                "key-signature",
                &[
                    ("tonic-step", Cow::Owned(key.tonic.step.to_string())),
                    ("tonic-accidental", Cow::Owned(key.tonic.accidental.to_string())),
                    ("mode", Cow::Borrowed(key.mode.name())),
                ],
                None,
            ),
            MusicElement::TimeSignature(ts) => self.empty(
                "time-signature",
                &[
                    ("beats", Cow::Owned(ts.beats.to_string())),
                    ("beat", Cow::Owned(ts.beat.to_string())),
                ],
                None,
            ),
            MusicElement::Barline(barline) => {
                let mut attributes: Attributes =
                    vec![("kind", Cow::Borrowed(barline_kind_name(barline.kind)))];
                if let BarlineKind::RepeatOpen { times } = barline.kind {
                    attributes.push(("times", Cow::Owned(times.to_string())));
                }
                self.empty("barline", &attributes, None);
            }
            MusicElement::Mark(mark) => self.write_mark(mark),
        }
    }

    fn write_mark(&mut self, mark: &Mark) {
        let attributes: Attributes = match mark {
            Mark::Tempo(tempo) => {
                let mut attributes = vec![("type", Cow::Borrowed("tempo"))];
                if let Some(text) = &tempo.text {
                    attributes.push(("text", Cow::Borrowed(text.as_str())));
                }
                if let Some(metronome) = &tempo.metronome {
                    attributes.extend(duration_attributes(true, &metronome.beat));
                    attributes.push(("bpm", Cow::Owned(metronome.bpm.to_string())));
                }
                attributes
            }
            Mark::Fermata => vec![("type", Cow::Borrowed("fermata"))],
            Mark::Dynamic { dynamic } => vec![
                ("type", Cow::Borrowed("dynamic")),
                ("dynamic", Cow::Borrowed(dynamic.name())),
            ],
            Mark::Hairpin { hairpin } => vec![
                ("type", Cow::Borrowed("hairpin")),
                ("hairpin", Cow::Borrowed(hairpin.name())),
            ],
            Mark::Repeat(repeat) => {
                let mut attributes = vec![
                    ("type", Cow::Borrowed("repeat")),
                    ("repeat", Cow::Borrowed(repeat_mark_name(repeat))),
                ];
                if let RepeatMark::Volta { number } = repeat {
                    attributes.push(("number", Cow::Owned(number.to_string())));
                }
                attributes
            }
            Mark::Fingering { finger } => vec![
                ("type", Cow::Borrowed("fingering")),
                ("finger", Cow::Owned(finger.to_string())),
            ],
            Mark::Articulation { articulation } => vec![
                ("type", Cow::Borrowed("articulation")),
                ("articulation", Cow::Borrowed(articulation.name())),
            ],
            Mark::Text { text, placement } => vec![
                ("type", Cow::Borrowed("text")),
                ("text", Cow::Borrowed(text.as_str())),
                ("placement", Cow::Borrowed(placement.name())),
            ],
        };
        self.empty("mark", &attributes, None);
    }

    fn write_lyrics(&mut self, lyrics: &LyricsContext) {
        let mut attributes: Attributes = vec![("name", Cow::Borrowed(lyrics.name.as_str()))];
        if let Some(voice) = lyrics.associated_voice {
            attributes.push(("voice", Cow::Owned(voice.0.to_string())));
        }
        attributes.push(("stanza", Cow::Owned(lyrics.stanza.to_string())));
        self.open("lyrics", &attributes, Some(&lyrics.extra));
        for syllable in &lyrics.syllables {
            self.empty(
                "syllable",
                &[
                    ("text", Cow::Borrowed(syllable.text.as_str())),
                    ("hyphen", Cow::Borrowed(bool_name(syllable.hyphen))),
                    ("extender", Cow::Borrowed(bool_name(syllable.extender))),
                ],
                None,
            );
        }
        self.close("lyrics");
    }

    fn write_function_markings(&mut self, fm: &FunctionMarkingContext) {
        let mut attributes: Attributes = vec![("name", Cow::Borrowed(fm.name.as_str()))];
        if let Some(voice) = fm.associated_voice {
            attributes.push(("voice", Cow::Owned(voice.0.to_string())));
        }
        self.open("function-marking", &attributes, Some(&fm.extra));
        for marking in &fm.markings {
            let mut attributes: Attributes =
                vec![("function", Cow::Borrowed(marking.function.name()))];
            if let Some(key) = &marking.key {
                attributes.push(("key", Cow::Borrowed(key.as_str())));
            }
            attributes.push(("minor", Cow::Borrowed(bool_name(marking.minor))));
            attributes.extend(duration_attributes(false, &marking.duration));
            self.empty("function", &attributes, None);
        }
        self.close("function-marking");
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

fn duration_attributes(metronome_beat: bool, duration: &Duration) -> Attributes<'static> {
    let (length, dots) = if metronome_beat {
        ("beat-length", "beat-dots")
    } else {
        ("length", "dots")
    };
    vec![
        (length, Cow::Borrowed(duration.length.name())),
        (dots, Cow::Owned(duration.dots.to_string())),
    ]
}

pub(crate) fn bool_name(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub(crate) fn note_stem_name(stem: crate::models::NoteStem) -> &'static str {
    match stem {
        crate::models::NoteStem::Preferred => "preferred",
        crate::models::NoteStem::Up => "up",
        crate::models::NoteStem::Down => "down",
    }
}

pub(crate) fn accidental_display_name(display: crate::models::AccidentalDisplay) -> &'static str {
    match display {
        crate::models::AccidentalDisplay::Auto => "auto",
        crate::models::AccidentalDisplay::Forced => "forced",
        crate::models::AccidentalDisplay::Cautionary => "cautionary",
    }
}

pub(crate) fn barline_kind_name(kind: BarlineKind) -> &'static str {
    match kind {
        BarlineKind::Single => "single",
        BarlineKind::Double => "double",
        BarlineKind::End => "end",
        BarlineKind::RepeatOpen { .. } => "repeat-open",
        BarlineKind::RepeatClose => "repeat-close",
        BarlineKind::RepeatCloseOpen => "repeat-close-open",
        BarlineKind::Dotted => "dotted",
    }
}

pub(crate) fn repeat_mark_name(mark: &RepeatMark) -> &'static str {
    match mark {
        RepeatMark::Volta { .. } => "volta",
        RepeatMark::VoltaEnd => "volta-end",
        RepeatMark::Segno => "segno",
        RepeatMark::Coda => "coda",
        RepeatMark::VarCoda => "varcoda",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_attribute() {
        assert_eq!(
            escape_attribute("a \"b\" <c> & d\ne\tf"),
            "a &quot;b&quot; &lt;c&gt; &amp; d&#10;e&#9;f"
        );
    }

    #[test]
    fn test_extra_attributes_follow_known_ones() {
        let mut extra = ExtraAttributes::new();
        extra.insert("color".to_string(), "red".to_string());
        extra.insert("name".to_string(), "shadow".to_string());

        let mut builder = CanorusMlBuilder::new();
        builder.empty("sheet", &[("name", Cow::Borrowed("S"))], Some(&extra));
        assert_eq!(builder.finish(), "<sheet name=\"S\" color=\"red\"/>\n");
    }
}

//! LilyPond exporter
//!
//! Each sheet becomes one `\score`. Voices are written in `\relative c'` mode
//! with sticky durations, so the output mirrors what a person would type and
//! reads back through the importer to the same document.

use super::pitch_names::PitchLanguage;
use super::state::{RelativeOctave, StickyDuration};
use super::templates::{render_lilypond, TemplateContext};
use super::ExportSettings;
use crate::error::Result;
use crate::models::core::unique_name;
use crate::models::*;
use std::collections::{HashMap, HashSet};

const LINE_WIDTH: usize = 78;

/// Header fields LilyPond knows; `comments` stays in the editor
const HEADER_FIELDS: [&str; 7] = [
    "title",
    "subtitle",
    "composer",
    "arranger",
    "poet",
    "copyright",
    "dedication",
];

pub(crate) fn export_document(doc: &Document, settings: &ExportSettings) -> Result<String> {
    doc.validate()?;
    let language = (settings.language != PitchLanguage::default()).then(|| settings.language.name());
    let mut context = TemplateContext::new(settings.lilypond_version.as_str()).language(language);
    for key in HEADER_FIELDS {
        if let Some(value) = doc.metadata.field(key).filter(|v| !v.is_empty()) {
            context = context.header_field(key, quote(value));
        }
    }
    for sheet in &doc.sheets {
        context = context.score(SheetWriter::new(sheet, settings).write());
    }
    let text = render_lilypond(&context)?;
    log::debug!("exported {} sheet(s), {} bytes of LilyPond", doc.sheets.len(), text.len());
    Ok(text)
}

/// LilyPond string literal
pub(crate) fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Indented output with token wrapping
struct Lines {
    text: String,
    indent: String,
}

impl Lines {
    fn line(&mut self, depth: usize, content: &str) {
        for _ in 0..depth {
            self.text.push_str(&self.indent);
        }
        self.text.push_str(content);
        self.text.push('\n');
    }

    /// Tokens joined by spaces, broken before a token that would pass the line width
    fn wrapped(&mut self, depth: usize, tokens: &[String]) {
        let width = LINE_WIDTH.saturating_sub(depth * self.indent.len()).max(20);
        let mut current = String::new();
        for token in tokens {
            if !current.is_empty() && current.len() + 1 + token.len() > width {
                self.line(depth, &current);
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(token);
        }
        if !current.is_empty() {
            self.line(depth, &current);
        }
    }
}

struct SheetWriter<'a> {
    sheet: &'a Sheet,
    language: PitchLanguage,
    /// Names usable by `\lyricsto`
    voice_names: HashMap<VoiceId, String>,
    out: Lines,
}

impl<'a> SheetWriter<'a> {
    fn new(sheet: &'a Sheet, settings: &ExportSettings) -> Self {
        Self {
            sheet,
            language: settings.language,
            voice_names: voice_names(sheet),
            out: Lines {
                text: String::new(),
                indent: " ".repeat(settings.indent),
            },
        }
    }

    fn write(mut self) -> String {
        let sheet = self.sheet;
        self.out.line(0, "\\score {");
        self.out
            .line(1, &format!("\\header {{ piece = {} }}", quote(&sheet.name)));
        self.out.line(1, "<<");
        for context in &sheet.contexts {
            match context {
                Context::Staff(staff) => self.write_staff(staff),
                Context::Lyrics(lyrics) => self.write_lyrics(lyrics),
                Context::FunctionMarking(functions) => log::warn!(
                    "function marking context '{}' has no LilyPond form, skipped",
                    functions.name
                ),
            }
        }
        self.out.line(1, ">>");
        self.out.line(1, "\\layout { }");
        self.out.line(0, "}");
        self.out.text.trim_end().to_string()
    }

    fn write_staff(&mut self, staff: &Staff) {
        let mut opening = format!("\\new Staff = {}", quote(&staff.name));
        if staff.number_of_lines != 5 {
            opening.push_str(&format!(
                " \\with {{ \\override StaffSymbol.line-count = #{} }}",
                staff.number_of_lines
            ));
        }
        opening.push_str(" <<");
        self.out.line(2, &opening);
        for voice in &staff.voices {
            let name = self
                .voice_names
                .get(&voice.id)
                .map(String::as_str)
                .unwrap_or(voice.name.as_str());
            let mut opening = "\\new Voice".to_string();
            if !name.is_empty() {
                opening.push_str(&format!(" = {}", quote(name)));
            }
            opening.push_str(" \\relative c' {");
            self.out.line(3, &opening);
            let tokens = VoiceWriter::new(voice, self.language).write();
            self.out.wrapped(4, &tokens);
            self.out.line(3, "}");
        }
        self.out.line(2, ">>");
    }

    fn write_lyrics(&mut self, lyrics: &LyricsContext) {
        let mut opening = format!("\\new Lyrics = {}", quote(&lyrics.name));
        match lyrics.associated_voice.and_then(|id| self.voice_names.get(&id)) {
            Some(voice) => opening.push_str(&format!(" \\lyricsto {} {{", quote(voice))),
            None => opening.push_str(" \\lyricmode {"),
        }
        self.out.line(2, &opening);
        let mut tokens = Vec::new();
        if lyrics.stanza > 0 {
            tokens.push(format!("\\set stanza = \"{}.\"", lyrics.stanza));
        }
        tokens.extend(lyrics.syllables.iter().map(syllable_token));
        self.out.wrapped(3, &tokens);
        self.out.line(2, "}");
    }
}

/// Export names of the voices: their own name where it is unique, a
/// generated one for unnamed voices that lyrics point at
fn voice_names(sheet: &Sheet) -> HashMap<VoiceId, String> {
    let referenced: HashSet<VoiceId> = sheet.contexts.iter().filter_map(Context::associated_voice).collect();
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = HashMap::new();
    for (_, _, voice) in sheet.voices() {
        let name = if !voice.name.is_empty() && !taken.contains(&voice.name) {
            voice.name.clone()
        } else if referenced.contains(&voice.id) {
            let base = if voice.name.is_empty() {
                format!("voice{}", voice.id.0)
            } else {
                voice.name.clone()
            };
            unique_name(&base, |candidate| taken.contains(candidate))
        } else {
            continue;
        };
        taken.insert(name.clone());
        names.insert(voice.id, name);
    }
    names
}

fn syllable_token(syllable: &Syllable) -> String {
    let mut token = if syllable.text.is_empty() {
        "_".to_string()
    } else if needs_quotes(&syllable.text) {
        quote(&syllable.text)
    } else {
        syllable.text.clone()
    };
    if syllable.hyphen {
        token.push_str(" --");
    }
    if syllable.extender {
        token.push_str(" __");
    }
    token
}

/// Syllables the lyric lexer would split, shorten or mistake for something else
fn needs_quotes(text: &str) -> bool {
    matches!(text, "--" | "__" | "_" | "=")
        || text.chars().any(|c| c.is_whitespace() || "{}\"\\#%~".contains(c))
        || text.starts_with(|c: char| c.is_ascii_digit())
        || text.ends_with(|c: char| c.is_ascii_digit() || c == '.')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FramePhase {
    Body,
    Alternative,
    /// A repeat barline closed an alternative; another may follow
    BetweenAlternatives,
}

/// A `\repeat volta` being collected
struct RepeatFrame {
    times: u8,
    phase: FramePhase,
    body: Vec<String>,
    alternatives: Vec<Vec<String>>,
}

impl RepeatFrame {
    fn new(times: u8) -> Self {
        Self {
            times,
            phase: FramePhase::Body,
            body: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    fn push(&mut self, token: String) {
        match (self.phase, self.alternatives.last_mut()) {
            (FramePhase::Body, _) | (_, None) => self.body.push(token),
            (_, Some(alternative)) => alternative.push(token),
        }
    }
}

struct VoiceWriter<'a> {
    voice: &'a Voice,
    language: PitchLanguage,
    octave: RelativeOctave,
    duration: StickyDuration,
    stem: NoteStem,
    starts: HashMap<ElementId, Vec<SpannerKind>>,
    ends: HashMap<ElementId, Vec<SpannerKind>>,
    root: Vec<String>,
    frames: Vec<RepeatFrame>,
    /// Whether the last token can carry postfix marks
    after_event: bool,
}

impl<'a> VoiceWriter<'a> {
    fn new(voice: &'a Voice, language: PitchLanguage) -> Self {
        let mut starts: HashMap<ElementId, Vec<SpannerKind>> = HashMap::new();
        let mut ends: HashMap<ElementId, Vec<SpannerKind>> = HashMap::new();
        for spanner in &voice.spanners {
            starts.entry(spanner.start).or_default().push(spanner.kind);
            ends.entry(spanner.end).or_default().push(spanner.kind);
        }
        Self {
            voice,
            language,
            octave: RelativeOctave::new(Pitch::middle_c()),
            duration: StickyDuration::new(),
            stem: NoteStem::Preferred,
            starts,
            ends,
            root: Vec::new(),
            frames: Vec::new(),
            after_event: false,
        }
    }

    fn write(mut self) -> Vec<String> {
        let voice = self.voice;
        match voice.stem_direction {
            StemDirection::Up => self.emit("\\voiceOne"),
            StemDirection::Down => self.emit("\\voiceTwo"),
            StemDirection::Preferred if voice.number % 2 == 1 => self.emit("\\voiceOne"),
            StemDirection::Preferred => self.emit("\\voiceTwo"),
            StemDirection::Neutral => {}
        }
        if !voice.instrument.is_empty() {
            self.emit(format!("\\set Staff.midiInstrument = #{}", quote(&voice.instrument)));
        }

        let elements = &voice.elements;
        let mut index = 0;
        while index < elements.len() {
            let element = &elements[index];
            if !matches!(
                element,
                MusicElement::Mark(Mark::Repeat(RepeatMark::Volta { .. } | RepeatMark::VoltaEnd))
            ) {
                self.close_finished_frame();
            }
            let MusicElement::Note(head) = element else {
                self.write_element(element);
                index += 1;
                continue;
            };

            // Chord members may be separated from the head by marks
            let mut end = index + 1;
            for (offset, next) in elements[index + 1..].iter().enumerate() {
                if next.is_chorded_note() {
                    end = index + 2 + offset;
                } else if next.is_playable() {
                    break;
                }
            }
            let mut chord = vec![head];
            chord.extend(
                elements[index + 1..end]
                    .iter()
                    .filter_map(MusicElement::as_note),
            );
            self.write_chord(&chord);
            for element in &elements[index + 1..end] {
                if !matches!(element, MusicElement::Note(_)) {
                    self.write_element(element);
                }
            }
            index = end;
        }

        self.unwind();
        self.root
    }

    fn emit(&mut self, token: impl Into<String>) {
        let token = token.into();
        match self.frames.last_mut() {
            Some(frame) => frame.push(token),
            None => self.root.push(token),
        }
    }

    fn write_element(&mut self, element: &MusicElement) {
        match element {
            MusicElement::Note(note) => self.write_chord(&[note]),
            MusicElement::Rest(rest) => {
                let mut token = match rest.kind {
                    RestKind::Normal => "r".to_string(),
                    RestKind::Spacer => "s".to_string(),
                };
                if let Some(duration) = self.duration.token(rest.duration) {
                    token.push_str(&duration);
                }
                self.emit(token);
                self.after_event = true;
            }
            MusicElement::Clef(clef) => {
                let token = match clef.offset {
                    0 => format!("\\clef {}", clef.kind.name()),
                    offset if offset < 0 => format!("\\clef \"{}_{}\"", clef.kind.name(), -offset),
                    offset => format!("\\clef \"{}^{}\"", clef.kind.name(), offset),
                };
                self.emit(token);
                self.after_event = false;
            }
            MusicElement::KeySignature(key) => {
                let tonic = self.language.spell(key.tonic.step, key.tonic.accidental);
                self.emit(format!("\\key {} \\{}", tonic, key.mode.name()));
                self.after_event = false;
            }
            MusicElement::TimeSignature(time) => {
                self.emit(format!("\\time {}/{}", time.beats, time.beat));
                self.after_event = false;
            }
            MusicElement::Barline(barline) => self.write_barline(barline.kind),
            MusicElement::Mark(mark) => self.write_mark(mark),
        }
    }

    fn pitch_token(&mut self, note: &Note) -> String {
        let marks = self.octave.marks_for(note.pitch);
        let mut token = self.language.spell(note.pitch.step, note.pitch.accidental);
        let mark = if marks > 0 { "'" } else { "," };
        token.push_str(&mark.repeat(marks.unsigned_abs() as usize));
        match note.accidental_display {
            AccidentalDisplay::Forced => token.push('!'),
            AccidentalDisplay::Cautionary => token.push('?'),
            AccidentalDisplay::Auto => {}
        }
        token
    }

    /// A note, or a chord written `<…>` when it has chorded members
    fn write_chord(&mut self, chord: &[&Note]) {
        let Some(head) = chord.first() else {
            return;
        };
        if head.stem != self.stem {
            self.stem = head.stem;
            self.emit(match head.stem {
                NoteStem::Up => "\\stemUp",
                NoteStem::Down => "\\stemDown",
                NoteStem::Preferred => "\\stemNeutral",
            });
        }

        let mut token = if chord.len() > 1 {
            let members: Vec<String> = chord.iter().map(|note| self.pitch_token(note)).collect();
            self.octave.set_last(head.pitch);
            format!("<{}>", members.join(" "))
        } else {
            self.pitch_token(head)
        };
        if let Some(duration) = self.duration.token(head.duration) {
            token.push_str(&duration);
        }

        let ids: Vec<ElementId> = chord.iter().map(|note| note.id).collect();
        let kinds = |map: &HashMap<ElementId, Vec<SpannerKind>>| -> Vec<SpannerKind> {
            ids.iter().filter_map(|id| map.get(id)).flatten().copied().collect()
        };
        let (starts, ends) = (kinds(&self.starts), kinds(&self.ends));
        if starts.contains(&SpannerKind::Tie) {
            token.push('~');
        }
        for kind in ends {
            match kind {
                SpannerKind::Slur => token.push(')'),
                SpannerKind::PhrasingSlur => token.push_str("\\)"),
                SpannerKind::Tie => {}
            }
        }
        for kind in starts {
            match kind {
                SpannerKind::Slur => token.push('('),
                SpannerKind::PhrasingSlur => token.push_str("\\("),
                SpannerKind::Tie => {}
            }
        }
        self.emit(token);
        self.after_event = true;
    }

    fn write_barline(&mut self, kind: BarlineKind) {
        let phase = self.frames.last().map(|frame| frame.phase);
        match (kind, phase) {
            (BarlineKind::RepeatOpen { times }, _) => {
                self.frames.push(RepeatFrame::new(times));
                self.after_event = false;
            }
            (BarlineKind::RepeatClose, Some(FramePhase::Body)) => self.close_frame(),
            (BarlineKind::RepeatClose, Some(FramePhase::Alternative)) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.phase = FramePhase::BetweenAlternatives;
                }
            }
            (kind, _) => {
                self.emit(format!("\\bar \"{}\"", bar_text(kind)));
                self.after_event = false;
            }
        }
    }

    fn write_mark(&mut self, mark: &Mark) {
        match mark {
            Mark::Tempo(tempo) => {
                let mut token = "\\tempo".to_string();
                if let Some(text) = &tempo.text {
                    token.push(' ');
                    token.push_str(&quote(text));
                }
                if let Some(metronome) = &tempo.metronome {
                    token.push_str(&format!(
                        " {} = {}",
                        metronome.beat.to_lilypond_string(),
                        metronome.bpm
                    ));
                }
                self.emit(token);
                self.after_event = false;
            }
            Mark::Repeat(RepeatMark::Volta { .. }) => match self.frames.last_mut() {
                Some(frame) => {
                    frame.phase = FramePhase::Alternative;
                    frame.alternatives.push(Vec::new());
                    self.after_event = false;
                }
                None => log::warn!("volta mark outside a repeat, dropped"),
            },
            Mark::Repeat(RepeatMark::VoltaEnd) => match self.frames.last().map(|frame| frame.phase) {
                Some(FramePhase::Alternative) | Some(FramePhase::BetweenAlternatives) => {
                    self.close_frame()
                }
                _ => log::warn!("volta end outside an alternative, dropped"),
            },
            other => {
                let Some(token) = postfix_token(other) else {
                    return;
                };
                if !self.after_event {
                    self.emit("<>");
                    self.after_event = true;
                }
                self.emit(token);
            }
        }
    }

    /// A repeat whose last alternative was closed by a barline ends at the
    /// next element that is not a volta mark
    fn close_finished_frame(&mut self) {
        if self.frames.last().map(|frame| frame.phase) == Some(FramePhase::BetweenAlternatives) {
            self.close_frame();
        }
    }

    fn close_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let mut tokens = vec![format!("\\repeat volta {} {{", frame.times)];
        tokens.extend(frame.body);
        tokens.push("}".to_string());
        if !frame.alternatives.is_empty() {
            tokens.push("\\alternative {".to_string());
            for alternative in frame.alternatives {
                tokens.push("{".to_string());
                tokens.extend(alternative);
                tokens.push("}".to_string());
            }
            tokens.push("}".to_string());
        }
        for token in tokens {
            self.emit(token);
        }
        self.after_event = false;
    }

    /// Repeats still open at the end of the voice
    fn unwind(&mut self) {
        while let Some(phase) = self.frames.last().map(|frame| frame.phase) {
            if phase != FramePhase::Body {
                self.close_frame();
                continue;
            }
            let Some(frame) = self.frames.pop() else {
                break;
            };
            if frame.times != 2 {
                log::warn!(
                    "unclosed repeat of {} voice {} written as a plain repeat bar",
                    frame.times,
                    self.voice.number
                );
            }
            self.emit(format!("\\bar \"{}\"", bar_text(BarlineKind::RepeatOpen { times: frame.times })));
            for token in frame.body {
                self.emit(token);
            }
        }
    }
}

fn bar_text(kind: BarlineKind) -> &'static str {
    match kind {
        BarlineKind::Single => "|",
        BarlineKind::Double => "||",
        BarlineKind::End => "|.",
        BarlineKind::RepeatOpen { .. } => ".|:",
        BarlineKind::RepeatClose => ":|.",
        BarlineKind::RepeatCloseOpen => ":..:",
        BarlineKind::Dotted => ";",
    }
}

fn postfix_token(mark: &Mark) -> Option<String> {
    let token = match mark {
        Mark::Fermata => "\\fermata".to_string(),
        Mark::Dynamic { dynamic } => format!("\\{}", dynamic.name()),
        Mark::Hairpin { hairpin } => match hairpin {
            HairpinKind::Crescendo => "\\<",
            HairpinKind::Decrescendo => "\\>",
            HairpinKind::End => "\\!",
        }
        .to_string(),
        Mark::Repeat(RepeatMark::Segno) => "\\segno".to_string(),
        Mark::Repeat(RepeatMark::Coda) => "\\coda".to_string(),
        Mark::Repeat(RepeatMark::VarCoda) => "\\varcoda".to_string(),
        Mark::Fingering { finger } => format!("-{}", finger),
        Mark::Articulation { articulation } => {
            let shorthand = match articulation {
                ArticulationKind::Staccato => ".",
                ArticulationKind::Tenuto => "-",
                ArticulationKind::Accent => ">",
                ArticulationKind::Marcato => "^",
                ArticulationKind::Stopped => "+",
                ArticulationKind::Portato => "_",
                ArticulationKind::Staccatissimo => "!",
            };
            format!("-{}", shorthand)
        }
        Mark::Text { text, placement } => {
            let direction = match placement {
                Placement::Neutral => '-',
                Placement::Above => '^',
                Placement::Below => '_',
            };
            format!("{}{}", direction, quote(text))
        }
        Mark::Tempo(_) | Mark::Repeat(RepeatMark::Volta { .. }) | Mark::Repeat(RepeatMark::VoltaEnd) => {
            return None
        }
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(step: u8, accidental: i8, octave: i8) -> Pitch {
        Pitch::new(step, accidental, octave).unwrap()
    }

    fn note(step: u8, octave: i8, length: BaseLength) -> MusicElement {
        MusicElement::Note(Note::new(pitch(step, 0, octave), Duration::plain(length)))
    }

    fn voice_tokens(elements: Vec<MusicElement>) -> String {
        let mut voice = Voice::new(1);
        voice.elements = elements;
        VoiceWriter::new(&voice, PitchLanguage::Nederlands).write().join(" ")
    }

    #[test]
    fn test_sticky_durations_and_relative_octaves() {
        let text = voice_tokens(vec![
            note(0, 4, BaseLength::Quarter),
            note(4, 4, BaseLength::Quarter),
            note(0, 5, BaseLength::Half),
            note(4, 3, BaseLength::Half),
        ]);
        assert_eq!(text, "c4 g' c2 g,");
    }

    #[test]
    fn test_chord_and_marks() {
        let mut chord_member = Note::chorded(pitch(2, -1, 4), Duration::QUARTER);
        chord_member.accidental_display = AccidentalDisplay::Forced;
        let text = voice_tokens(vec![
            MusicElement::Mark(Mark::Dynamic {
                dynamic: DynamicKind::P,
            }),
            note(0, 4, BaseLength::Quarter),
            MusicElement::Note(chord_member),
            MusicElement::Mark(Mark::Articulation {
                articulation: ArticulationKind::Staccato,
            }),
            MusicElement::Mark(Mark::Text {
                text: "dolce".to_string(),
                placement: Placement::Below,
            }),
            MusicElement::Rest(Rest::new(Duration::QUARTER)),
        ]);
        assert_eq!(text, "<> \\p <c es!>4 -. _\"dolce\" r");
    }

    #[test]
    fn test_repeat_with_alternatives() {
        let repeat_close = MusicElement::Barline(Barline::new(BarlineKind::RepeatClose));
        let text = voice_tokens(vec![
            MusicElement::Barline(Barline::new(BarlineKind::RepeatOpen { times: 2 })),
            note(0, 4, BaseLength::Quarter),
            MusicElement::Mark(Mark::Repeat(RepeatMark::Volta { number: 1 })),
            note(1, 4, BaseLength::Quarter),
            repeat_close,
            MusicElement::Mark(Mark::Repeat(RepeatMark::Volta { number: 2 })),
            note(2, 4, BaseLength::Quarter),
            MusicElement::Mark(Mark::Repeat(RepeatMark::VoltaEnd)),
            note(3, 4, BaseLength::Quarter),
        ]);
        assert_eq!(
            text,
            "\\repeat volta 2 { c4 } \\alternative { { d } { e } } f"
        );
    }

    #[test]
    fn test_unmatched_repeat_bars() {
        let text = voice_tokens(vec![
            note(0, 4, BaseLength::Quarter),
            MusicElement::Barline(Barline::new(BarlineKind::RepeatClose)),
            MusicElement::Barline(Barline::new(BarlineKind::RepeatOpen { times: 2 })),
            note(0, 4, BaseLength::Quarter),
        ]);
        assert_eq!(text, "c4 \\bar \":|.\" \\bar \".|:\" c");
    }

    #[test]
    fn test_spanners() {
        let mut voice = Voice::new(1);
        let ids: Vec<ElementId> = (1..=4).map(ElementId).collect();
        for (step, id) in ids.iter().enumerate() {
            let mut note = Note::new(pitch(step as u8, 0, 4), Duration::QUARTER);
            note.id = *id;
            voice.elements.push(MusicElement::Note(note));
        }
        voice.spanners = vec![
            Spanner::new(SpannerKind::Tie, ids[0], ids[1]),
            Spanner::new(SpannerKind::Slur, ids[1], ids[3]),
            Spanner::new(SpannerKind::PhrasingSlur, ids[0], ids[2]),
        ];
        let text = VoiceWriter::new(&voice, PitchLanguage::Nederlands).write().join(" ");
        assert_eq!(text, "c4~\\( d( e\\) f)");
    }

    #[test]
    fn test_lyric_syllables() {
        let mut hal = Syllable::new("Hal");
        hal.hyphen = true;
        assert_eq!(syllable_token(&hal), "Hal --");
        assert_eq!(syllable_token(&Syllable::new("")), "_");
        assert_eq!(syllable_token(&Syllable::new("two words")), "\"two words\"");
        assert_eq!(syllable_token(&Syllable::new("op4")), "\"op4\"");
    }

    #[test]
    fn test_generated_voice_names() {
        let mut staff = Staff::new("Staff");
        let mut voice = Voice::new(1);
        voice.id = VoiceId(7);
        staff.voices.push(voice);
        let mut lyrics = LyricsContext::new("Lyrics");
        lyrics.associated_voice = Some(VoiceId(7));
        let mut sheet = Sheet::new("S");
        sheet.contexts = vec![Context::Staff(staff), Context::Lyrics(lyrics)];

        let names = voice_names(&sheet);
        assert_eq!(names.get(&VoiceId(7)).map(String::as_str), Some("voice7"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("a \"b\" \\ c"), "\"a \\\"b\\\" \\\\ c\"");
    }
}

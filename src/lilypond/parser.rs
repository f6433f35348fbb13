//! LilyPond importer
//!
//! Recursive descent over the token stream, building model sheets directly.
//! Every `\score` (or bare top-level music expression) becomes a sheet;
//! staves and lyrics inside it become contexts. Sticky durations, octave
//! modes and the current key live in [`MusicState`].

use super::lexer::{LexMode, Lexer, Span, Token, TokenKind};
use super::pitch_names::PitchLanguage;
use super::state::{
    default_relative_reference, MusicState, OctaveMode, RelativeOctave, UNMARKED_OCTAVE,
};
use super::ImportSettings;
use crate::error::{EditorError, ParseError, Result};
use crate::models::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Nested variable references followed before giving up
const MAX_EXPANSION_DEPTH: usize = 64;

/// Upper bound for `\repeat unfold n` and `R1*n`
const MAX_MULTIPLIER: u32 = 1000;

/// Argument-less commands with no model counterpart
const IGNORED_COMMANDS: &[&str] = &[
    "break",
    "noBreak",
    "pageBreak",
    "noPageBreak",
    "pageTurn",
    "autoBeamOn",
    "autoBeamOff",
    "cadenzaOn",
    "cadenzaOff",
    "numericTimeSignature",
    "defaultTimeSignature",
    "hideNotes",
    "unHideNotes",
    "slurUp",
    "slurDown",
    "slurNeutral",
    "slurDashed",
    "slurDotted",
    "slurSolid",
    "phrasingSlurUp",
    "phrasingSlurDown",
    "phrasingSlurNeutral",
    "tieUp",
    "tieDown",
    "tieNeutral",
    "dynamicUp",
    "dynamicDown",
    "dynamicNeutral",
    "shiftOn",
    "shiftOnn",
    "shiftOff",
    "textLengthOn",
    "textLengthOff",
    "compressEmptyMeasures",
    "expandEmptyMeasures",
    "once",
];

/// Music the model has no way to hold
const UNSUPPORTED_COMMANDS: &[&str] = &[
    "tuplet",
    "times",
    "grace",
    "acciaccatura",
    "appoggiatura",
    "afterGrace",
    "slashedGrace",
    "transpose",
    "chordmode",
    "chords",
    "drummode",
    "drums",
    "figuremode",
    "figures",
    "partCombine",
    "partcombine",
    "autoChange",
    "autochange",
    "longa",
    "maxima",
];

const POLYPHONY: &str = "'\\\\' polyphony is not supported; use \\new Voice";

/// Notes of one voice plus the spanners still waiting for their end
struct VoiceBuilder {
    voice: Voice,
    open_slurs: Vec<(SpannerKind, ElementId, Token)>,
    pending_tie: Option<(ElementId, Token)>,
    /// Last note or rest; the first note for a chord
    last_head: Option<ElementId>,
    /// Repeated by `q`
    last_chord: Vec<(Pitch, AccidentalDisplay)>,
}

impl VoiceBuilder {
    fn new(id: VoiceId, number: u32, name: Option<String>) -> Self {
        let mut voice = Voice::new(number);
        voice.id = id;
        voice.name = name.unwrap_or_default();
        Self {
            voice,
            open_slurs: Vec::new(),
            pending_tie: None,
            last_head: None,
            last_chord: Vec::new(),
        }
    }

    fn push(&mut self, element: MusicElement) {
        self.voice.elements.push(element);
    }

    fn push_mark(&mut self, mark: Mark) {
        self.push(MusicElement::Mark(mark));
    }

    /// Appends a note or rest and closes a pending tie on it
    fn push_playable(&mut self, element: MusicElement) {
        let id = element.id();
        if let Some((start, token)) = self.pending_tie.take() {
            match (&element, id) {
                (MusicElement::Note(_), Some(end)) => {
                    self.voice.spanners.push(Spanner::new(SpannerKind::Tie, start, end))
                }
                _ => log::warn!(
                    "{}:{}: tie is not followed by a note, dropped",
                    token.line,
                    token.column
                ),
            }
        }
        self.last_head = id;
        self.push(element);
    }

    fn finish(self) -> Voice {
        for (kind, _, token) in &self.open_slurs {
            log::warn!(
                "{}:{}: {} is never closed, dropped",
                token.line,
                token.column,
                kind.name()
            );
        }
        if let Some((_, token)) = &self.pending_tie {
            log::warn!("{}:{}: tie at the end of a voice, dropped", token.line, token.column);
        }
        self.voice
    }
}

/// Settings read from a `\with { }` block
#[derive(Default)]
struct WithBlock {
    lines: Option<u8>,
    instrument: Option<String>,
}

/// Lyrics waiting for a context name and their voice link
struct PendingLyrics {
    lyrics: LyricsContext,
    base_name: String,
    /// `\lyricsto` target, resolved when the sheet is complete
    link: Option<(String, Token)>,
}

struct StaffBuilder {
    name: Option<String>,
    lines: u8,
    instrument: Option<String>,
    voices: Vec<VoiceBuilder>,
    /// Receives music not wrapped in `\new Voice`
    implicit_voice: Option<usize>,
    /// Placed after the staff
    lyrics: Vec<PendingLyrics>,
}

impl StaffBuilder {
    fn new(name: Option<String>, with: WithBlock) -> Self {
        Self {
            name,
            lines: with.lines.unwrap_or(5),
            instrument: with.instrument,
            voices: Vec::new(),
            implicit_voice: None,
            lyrics: Vec::new(),
        }
    }
}

struct SheetBuilder {
    sheet: Sheet,
    lyrics_links: Vec<(usize, String, Token)>,
    /// Target of `\addlyrics`
    last_voice: Option<VoiceId>,
}

impl SheetBuilder {
    fn new() -> Self {
        Self {
            sheet: Sheet::new(String::new()),
            lyrics_links: Vec::new(),
            last_voice: None,
        }
    }

    fn add_lyrics(&mut self, pending: PendingLyrics) {
        let PendingLyrics {
            mut lyrics,
            base_name,
            link,
        } = pending;
        lyrics.name = self.sheet.unique_context_name(&base_name);
        if let Some((voice, token)) = link {
            self.lyrics_links.push((self.sheet.contexts.len(), voice, token));
        }
        self.sheet.contexts.push(Context::Lyrics(lyrics));
    }

    fn add_staff(&mut self, staff: StaffBuilder) {
        let base = staff.name.clone().unwrap_or_else(|| "Staff".to_string());
        let name = self.sheet.unique_context_name(&base);
        if staff.name.is_some() && name != base {
            log::warn!("staff name '{}' is taken, renamed to '{}'", base, name);
        }
        let mut model = Staff::new(name);
        model.number_of_lines = staff.lines;
        for builder in staff.voices {
            let mut voice = builder.finish();
            if voice.instrument.is_empty() {
                if let Some(instrument) = &staff.instrument {
                    voice.instrument = instrument.clone();
                }
            }
            model.voices.push(voice);
        }
        self.sheet.contexts.push(Context::Staff(model));
        for pending in staff.lyrics {
            self.add_lyrics(pending);
        }
    }
}

pub(crate) struct Parser<'a> {
    src: &'a str,
    /// The source lexer at the bottom, variable expansions above it
    lexers: Vec<Lexer<'a>>,
    variables: HashMap<String, Span>,
    state: MusicState,
    key_accidentals: bool,
    cancel: Option<&'a AtomicBool>,
    doc: Document,
    last_id: u64,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, settings: &ImportSettings, cancel: Option<&'a AtomicBool>) -> Self {
        Self {
            src,
            lexers: vec![Lexer::new(src)],
            variables: HashMap::new(),
            state: MusicState::new(settings.language),
            key_accidentals: settings.key_accidentals,
            cancel,
            doc: Document::new(),
            last_id: 0,
        }
    }

    pub fn parse(mut self) -> Result<Document> {
        loop {
            let token = self.peek(LexMode::Note)?;
            if token.kind == TokenKind::Eof {
                break;
            }
            self.parse_toplevel(token)?;
        }
        self.doc.validate()?;
        log::info!("imported {} sheet(s) from LilyPond", self.doc.sheets.len());
        Ok(self.doc)
    }

    // ---- token plumbing ----

    fn error(&self, token: &Token, message: impl Into<String>) -> EditorError {
        ParseError::new(token.line, token.column, message).into()
    }

    fn unexpected(&self, token: &Token) -> EditorError {
        self.error(token, format!("unexpected {}", token.kind.describe()))
    }

    /// Next token without consuming it. Finished expansions are dropped and
    /// variable references are expanded on the way.
    fn peek(&mut self, mode: LexMode) -> Result<Token> {
        loop {
            let token = match self.lexers.last() {
                Some(lexer) => lexer.clone().next_token(mode)?,
                None => return Ok(Token {
                    kind: TokenKind::Eof,
                    line: 1,
                    column: 1,
                }),
            };
            match &token.kind {
                TokenKind::Eof if self.lexers.len() > 1 => {
                    self.lexers.pop();
                }
                TokenKind::Command(name) if self.variables.contains_key(name) => {
                    if self.lexers.len() > MAX_EXPANSION_DEPTH {
                        return Err(self.error(&token, format!("\\{} expands too deeply", name)));
                    }
                    let span = self.variables[name];
                    if let Some(lexer) = self.lexers.last_mut() {
                        lexer.next_token(mode)?;
                    }
                    self.lexers.push(Lexer::over(self.src, span));
                }
                _ => return Ok(token),
            }
        }
    }

    fn next(&mut self, mode: LexMode) -> Result<Token> {
        if let Some(flag) = self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(EditorError::Cancelled);
            }
        }
        let token = self.peek(mode)?;
        if let Some(lexer) = self.lexers.last_mut() {
            lexer.next_token(mode)?;
        }
        Ok(token)
    }

    fn advance(&mut self) -> Result<()> {
        self.next(LexMode::Note).map(|_| ())
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token> {
        let token = self.next(LexMode::Note)?;
        if token.kind != kind {
            return Err(self.error(
                &token,
                format!("expected {} {}, found {}", kind.describe(), context, token.kind.describe()),
            ));
        }
        Ok(token)
    }

    fn expect_string(&mut self, context: &str) -> Result<(String, Token)> {
        let token = self.next(LexMode::Note)?;
        match &token.kind {
            TokenKind::Str(text) => Ok((text.clone(), token.clone())),
            _ => Err(self.error(
                &token,
                format!("expected a string {}, found {}", context, token.kind.describe()),
            )),
        }
    }

    /// Source range of the next expression, left uninterpreted
    fn capture_expression(&mut self) -> Result<Span> {
        self.peek(LexMode::Note)?;
        match self.lexers.last_mut() {
            Some(lexer) => Ok(lexer.skip_expression()?),
            None => Err(ParseError::new(1, 1, "expected a value").into()),
        }
    }

    /// Type name after `\new`/`\context`, read without consuming anything
    fn context_type(&mut self) -> Result<String> {
        self.peek(LexMode::Note)?;
        let Some(lexer) = self.lexers.last() else {
            return Err(ParseError::new(1, 1, "expected a context type").into());
        };
        let mut lexer = lexer.clone();
        lexer.next_token(LexMode::Note)?;
        let token = lexer.next_token(LexMode::Note)?;
        match token.kind {
            TokenKind::Word(name) => Ok(name),
            _ => Err(self.error(&token, "expected a context type after \\new")),
        }
    }

    fn is_assignment(&self) -> Result<bool> {
        let Some(lexer) = self.lexers.last() else {
            return Ok(false);
        };
        let mut lexer = lexer.clone();
        lexer.next_token(LexMode::Note)?;
        Ok(lexer.next_token(LexMode::Note)?.kind == TokenKind::Equals)
    }

    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    // ---- top level ----

    fn parse_toplevel(&mut self, token: Token) -> Result<()> {
        match &token.kind {
            TokenKind::Command(name) => match name.as_str() {
                "version" => {
                    self.advance()?;
                    let (version, _) = self.expect_string("after \\version")?;
                    log::debug!("LilyPond version {}", version);
                }
                "language" => {
                    self.advance()?;
                    let (name, at) = self.expect_string("after \\language")?;
                    self.state.language = PitchLanguage::from_name(&name)
                        .ok_or_else(|| self.error(&at, format!("unknown note language '{}'", name)))?;
                }
                "include" => {
                    self.advance()?;
                    let (file, at) = self.expect_string("after \\include")?;
                    log::warn!("{}:{}: \\include \"{}\" ignored", at.line, at.column, file);
                }
                "header" => {
                    self.advance()?;
                    for (field, value) in self.parse_header()? {
                        if !self.doc.metadata.set_field(&field, value) {
                            log::debug!("header field '{}' ignored", field);
                        }
                    }
                }
                "paper" | "layout" | "midi" => {
                    self.advance()?;
                    self.capture_expression()?;
                }
                "score" => {
                    self.advance()?;
                    self.parse_score(&token)?;
                }
                "book" | "bookpart" => {
                    self.advance()?;
                    self.expect(TokenKind::LBrace, "after \\book")?;
                    loop {
                        let next = self.peek(LexMode::Note)?;
                        match next.kind {
                            TokenKind::RBrace => {
                                self.advance()?;
                                break;
                            }
                            TokenKind::Eof => return Err(self.error(&token, "unterminated \\book")),
                            _ => self.parse_toplevel(next)?,
                        }
                    }
                }
                _ => self.parse_implicit_score()?,
            },
            TokenKind::Word(_) if self.is_assignment()? => self.parse_assignment()?,
            _ => self.parse_implicit_score()?,
        }
        Ok(())
    }

    fn parse_assignment(&mut self) -> Result<()> {
        let token = self.next(LexMode::Note)?;
        let TokenKind::Word(name) = token.kind.clone() else {
            return Err(self.unexpected(&token));
        };
        self.expect(TokenKind::Equals, "after a variable name")?;
        let span = self.capture_expression()?;
        log::debug!("{}:{}: variable {}", token.line, token.column, name);
        self.variables.insert(name, span);
        Ok(())
    }

    fn parse_header(&mut self) -> Result<Vec<(String, String)>> {
        let open = self.expect(TokenKind::LBrace, "after \\header")?;
        let mut fields = Vec::new();
        loop {
            let token = self.next(LexMode::Note)?;
            match token.kind.clone() {
                TokenKind::RBrace => break,
                TokenKind::Word(key) => {
                    self.expect(TokenKind::Equals, "after a header field")?;
                    let value = self.parse_value()?;
                    fields.push((key, value));
                }
                TokenKind::Eof => return Err(self.error(&open, "unterminated \\header")),
                _ => return Err(self.unexpected(&token)),
            }
        }
        Ok(fields)
    }

    /// A string, word, number, scheme value or markup as plain text
    fn parse_value(&mut self) -> Result<String> {
        let token = self.next(LexMode::Note)?;
        match token.kind.clone() {
            TokenKind::Str(text) | TokenKind::Word(text) => Ok(text),
            TokenKind::Number(n) => Ok(n.to_string()),
            TokenKind::Scheme(raw) => Ok(scheme_text(&raw)),
            TokenKind::Command(name) if name == "markup" => self.parse_markup(),
            _ => Err(self.error(
                &token,
                format!("expected a value, found {}", token.kind.describe()),
            )),
        }
    }

    /// Words and strings of a markup joined by spaces; markup commands are dropped
    fn parse_markup(&mut self) -> Result<String> {
        let mut words = Vec::new();
        self.markup_words(&mut words)?;
        Ok(words.join(" "))
    }

    fn markup_words(&mut self, words: &mut Vec<String>) -> Result<()> {
        let token = self.next(LexMode::Lyric)?;
        match token.kind.clone() {
            TokenKind::Str(text) | TokenKind::Syllable(text) => words.push(text),
            TokenKind::Number(n) => words.push(n.to_string()),
            TokenKind::Scheme(_) => {}
            TokenKind::Command(_) => self.markup_words(words)?,
            TokenKind::LBrace => loop {
                let next = self.peek(LexMode::Lyric)?;
                match next.kind {
                    TokenKind::RBrace => {
                        self.next(LexMode::Lyric)?;
                        break;
                    }
                    TokenKind::Eof => return Err(self.error(&token, "unterminated markup")),
                    _ => self.markup_words(words)?,
                }
            },
            _ => return Err(self.unexpected(&token)),
        }
        Ok(())
    }

    fn parse_score(&mut self, score: &Token) -> Result<()> {
        self.expect(TokenKind::LBrace, "after \\score")?;
        let mut sheet = SheetBuilder::new();
        let mut piece = None;
        loop {
            let token = self.peek(LexMode::Note)?;
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance()?;
                    break;
                }
                TokenKind::Eof => return Err(self.error(score, "unterminated \\score")),
                TokenKind::Command(name) if name == "header" => {
                    self.advance()?;
                    for (field, value) in self.parse_header()? {
                        if field == "piece" {
                            piece = Some(value);
                        }
                    }
                }
                TokenKind::Command(name) if matches!(name.as_str(), "layout" | "midi" | "paper") => {
                    self.advance()?;
                    self.capture_expression()?;
                }
                _ => self.parse_sheet_music(&mut sheet)?,
            }
        }
        self.finish_sheet(sheet, piece)
    }

    fn parse_implicit_score(&mut self) -> Result<()> {
        let mut sheet = SheetBuilder::new();
        self.parse_sheet_music(&mut sheet)?;
        self.finish_sheet(sheet, None)
    }

    fn finish_sheet(&mut self, builder: SheetBuilder, piece: Option<String>) -> Result<()> {
        let SheetBuilder {
            mut sheet,
            lyrics_links,
            ..
        } = builder;
        for (index, name, token) in lyrics_links {
            let voice = sheet
                .voices()
                .find(|(_, _, voice)| voice.name == name)
                .map(|(_, _, voice)| voice.id)
                .ok_or_else(|| self.error(&token, format!("no voice named '{}'", name)))?;
            if let Some(Context::Lyrics(lyrics)) = sheet.contexts.get_mut(index) {
                lyrics.associated_voice = Some(voice);
            }
        }
        let base = match piece {
            Some(piece) if !piece.is_empty() => piece,
            _ => format!("Sheet {}", self.doc.sheets.len() + 1),
        };
        sheet.name = self.doc.unique_sheet_name(&base);
        log::debug!("sheet '{}' with {} context(s)", sheet.name, sheet.contexts.len());
        self.doc.sheets.push(sheet);
        Ok(())
    }

    // ---- sheet and staff level ----

    /// Optional `= "name"` and `\with { }` after a context type
    fn context_header(&mut self) -> Result<(Option<String>, WithBlock)> {
        let mut name = None;
        if self.peek(LexMode::Note)?.kind == TokenKind::Equals {
            self.advance()?;
            let token = self.next(LexMode::Note)?;
            match token.kind.clone() {
                TokenKind::Str(text) | TokenKind::Word(text) => name = Some(text),
                _ => return Err(self.error(&token, "expected a context name")),
            }
        }
        let with = if self.peek(LexMode::Note)?.is_command("with") {
            self.advance()?;
            self.parse_with()?
        } else {
            WithBlock::default()
        };
        Ok((name, with))
    }

    fn parse_with(&mut self) -> Result<WithBlock> {
        let open = self.expect(TokenKind::LBrace, "after \\with")?;
        let mut with = WithBlock::default();
        loop {
            let token = self.next(LexMode::Note)?;
            match token.kind.clone() {
                TokenKind::RBrace => break,
                TokenKind::Command(name) if name == "override" => {
                    let path = self.property_path()?;
                    self.expect(TokenKind::Equals, "in \\override")?;
                    let value = self.parse_value()?;
                    if path.ends_with("StaffSymbol.line-count") {
                        let lines = value
                            .parse::<u8>()
                            .ok()
                            .filter(|n| *n > 0)
                            .ok_or_else(|| self.error(&token, format!("invalid line count '{}'", value)))?;
                        with.lines = Some(lines);
                    }
                }
                TokenKind::Command(name) if matches!(name.as_str(), "consists" | "remove") => {
                    self.next(LexMode::Note)?;
                }
                TokenKind::Command(name)
                    if matches!(name.as_str(), "accidentalStyle" | "omit" | "hide" | "revert") =>
                {
                    self.property_path()?;
                }
                TokenKind::Command(name) if IGNORED_COMMANDS.contains(&name.as_str()) => {}
                TokenKind::Word(first) => {
                    let path = self.property_path_from(first)?;
                    self.expect(TokenKind::Equals, "in \\with")?;
                    let value = self.parse_value()?;
                    if path == "midiInstrument" {
                        with.instrument = Some(value);
                    }
                }
                TokenKind::Eof => return Err(self.error(&open, "unterminated \\with")),
                _ => return Err(self.unexpected(&token)),
            }
        }
        Ok(with)
    }

    fn property_path(&mut self) -> Result<String> {
        let token = self.next(LexMode::Note)?;
        match token.kind.clone() {
            TokenKind::Word(first) => self.property_path_from(first),
            TokenKind::Scheme(raw) => self.property_path_from(raw.trim_start_matches('\'').to_string()),
            _ => Err(self.error(&token, "expected a property name")),
        }
    }

    /// Rest of a dotted path like `Staff.TimeSignature.stencil`; the old
    /// `Stem #'direction` form is accepted too
    fn property_path_from(&mut self, first: String) -> Result<String> {
        let mut path = first;
        loop {
            match self.peek(LexMode::Note)?.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let part = self.next(LexMode::Note)?;
                    match part.kind.clone() {
                        TokenKind::Word(word) => {
                            path.push('.');
                            path.push_str(&word);
                        }
                        _ => return Err(self.unexpected(&part)),
                    }
                }
                TokenKind::Scheme(raw) if raw.starts_with('\'') => {
                    self.advance()?;
                    path.push('.');
                    path.push_str(raw.trim_start_matches('\''));
                }
                _ => break,
            }
        }
        Ok(path)
    }

    fn parse_sheet_music(&mut self, sheet: &mut SheetBuilder) -> Result<()> {
        let token = self.peek(LexMode::Note)?;
        match &token.kind {
            TokenKind::Command(name) if name == "new" || name == "context" => {
                let kind = self.context_type()?;
                match kind.as_str() {
                    "Staff" => {
                        self.advance()?;
                        self.advance()?;
                        let (name, with) = self.context_header()?;
                        self.parse_staff(StaffBuilder::new(name, with), sheet)?;
                    }
                    "StaffGroup" | "PianoStaff" | "GrandStaff" | "ChoirStaff" => {
                        self.advance()?;
                        self.advance()?;
                        self.context_header()?;
                        self.parse_sheet_music(sheet)?;
                    }
                    "Lyrics" => {
                        self.advance()?;
                        self.advance()?;
                        let (name, _) = self.context_header()?;
                        let pending = self.parse_lyrics_context(name)?;
                        sheet.add_lyrics(pending);
                    }
                    "Voice" => self.parse_staff(StaffBuilder::new(None, WithBlock::default()), sheet)?,
                    other => {
                        return Err(self.error(&token, format!("unsupported context type '{}'", other)))
                    }
                }
            }
            TokenKind::SimultaneousOpen => {
                self.advance()?;
                loop {
                    let next = self.peek(LexMode::Note)?;
                    match &next.kind {
                        TokenKind::SimultaneousClose => {
                            self.advance()?;
                            break;
                        }
                        TokenKind::Eof => return Err(self.error(&token, "unterminated '<<'")),
                        TokenKind::Command(name) if name == "\\" => {
                            return Err(self.error(&next, POLYPHONY))
                        }
                        _ => self.parse_sheet_music(sheet)?,
                    }
                }
            }
            TokenKind::Command(name) if name == "addlyrics" => {
                return Err(self.error(&token, "\\addlyrics without preceding music"))
            }
            _ => self.parse_staff(StaffBuilder::new(None, WithBlock::default()), sheet)?,
        }
        for pending in self.parse_addlyrics(sheet.last_voice)? {
            sheet.add_lyrics(pending);
        }
        Ok(())
    }

    fn parse_staff(&mut self, mut staff: StaffBuilder, sheet: &mut SheetBuilder) -> Result<()> {
        self.state.key = KeySignature::c_major();
        self.parse_staff_music(&mut staff, sheet)?;
        sheet.add_staff(staff);
        Ok(())
    }

    fn new_voice(&mut self, staff: &StaffBuilder, name: Option<String>) -> VoiceBuilder {
        let id = VoiceId(self.next_id());
        VoiceBuilder::new(id, staff.voices.len() as u32 + 1, name)
    }

    fn parse_staff_music(&mut self, staff: &mut StaffBuilder, sheet: &mut SheetBuilder) -> Result<()> {
        let token = self.peek(LexMode::Note)?;
        match &token.kind {
            TokenKind::Command(name) if name == "new" || name == "context" => {
                let kind = self.context_type()?;
                match kind.as_str() {
                    "Voice" => {
                        self.advance()?;
                        self.advance()?;
                        let (name, with) = self.context_header()?;
                        let mut voice = self.new_voice(staff, name);
                        if let Some(instrument) = with.instrument {
                            voice.voice.instrument = instrument;
                        }
                        self.parse_voice_body(&mut voice)?;
                        sheet.last_voice = Some(voice.voice.id);
                        staff.voices.push(voice);
                    }
                    "Lyrics" => {
                        self.advance()?;
                        self.advance()?;
                        let (name, _) = self.context_header()?;
                        let pending = self.parse_lyrics_context(name)?;
                        staff.lyrics.push(pending);
                    }
                    other => {
                        return Err(self.error(&token, format!("a {} cannot be nested in a staff", other)))
                    }
                }
            }
            TokenKind::SimultaneousOpen => {
                self.advance()?;
                loop {
                    let next = self.peek(LexMode::Note)?;
                    match &next.kind {
                        TokenKind::SimultaneousClose => {
                            self.advance()?;
                            break;
                        }
                        TokenKind::Eof => return Err(self.error(&token, "unterminated '<<'")),
                        TokenKind::Command(name) if name == "\\" => {
                            return Err(self.error(&next, POLYPHONY))
                        }
                        TokenKind::Command(name) if name == "new" || name == "context" => {
                            self.parse_staff_music(staff, sheet)?
                        }
                        _ => {
                            let mut voice = self.new_voice(staff, None);
                            self.parse_voice_body(&mut voice)?;
                            sheet.last_voice = Some(voice.voice.id);
                            staff.voices.push(voice);
                        }
                    }
                }
            }
            _ => {
                let index = match staff.implicit_voice {
                    Some(index) => index,
                    None => {
                        let voice = self.new_voice(staff, None);
                        staff.voices.push(voice);
                        staff.voices.len() - 1
                    }
                };
                staff.implicit_voice = Some(index);
                self.parse_voice_body(&mut staff.voices[index])?;
                sheet.last_voice = Some(staff.voices[index].voice.id);
            }
        }
        let lyrics = self.parse_addlyrics(sheet.last_voice)?;
        staff.lyrics.extend(lyrics);
        Ok(())
    }

    // ---- lyrics ----

    fn parse_lyrics_context(&mut self, name: Option<String>) -> Result<PendingLyrics> {
        let mut link = None;
        if self.peek(LexMode::Note)?.is_command("lyricsto") {
            self.advance()?;
            let target = self.next(LexMode::Note)?;
            match target.kind.clone() {
                TokenKind::Str(voice) | TokenKind::Word(voice) => link = Some((voice, target)),
                _ => return Err(self.error(&target, "expected a voice name after \\lyricsto")),
            }
        }
        if self.peek(LexMode::Note)?.is_command("lyricmode") {
            self.advance()?;
        }
        let mut lyrics = LyricsContext::new(String::new());
        self.parse_lyrics(&mut lyrics)?;
        Ok(PendingLyrics {
            lyrics,
            base_name: name.unwrap_or_else(|| "Lyrics".to_string()),
            link,
        })
    }

    fn parse_addlyrics(&mut self, voice: Option<VoiceId>) -> Result<Vec<PendingLyrics>> {
        let mut found = Vec::new();
        while self.peek(LexMode::Note)?.is_command("addlyrics") {
            let token = self.next(LexMode::Note)?;
            let voice = voice.ok_or_else(|| self.error(&token, "\\addlyrics without a preceding voice"))?;
            if self.peek(LexMode::Note)?.is_command("lyricmode") {
                self.advance()?;
            }
            let mut lyrics = LyricsContext::new(String::new());
            self.parse_lyrics(&mut lyrics)?;
            lyrics.associated_voice = Some(voice);
            found.push(PendingLyrics {
                lyrics,
                base_name: "Lyrics".to_string(),
                link: None,
            });
        }
        Ok(found)
    }

    fn parse_lyrics(&mut self, lyrics: &mut LyricsContext) -> Result<()> {
        let token = self.next(LexMode::Lyric)?;
        match token.kind.clone() {
            TokenKind::LBrace => loop {
                let next = self.peek(LexMode::Lyric)?;
                match next.kind {
                    TokenKind::RBrace => {
                        self.next(LexMode::Lyric)?;
                        break;
                    }
                    TokenKind::Eof => return Err(self.error(&token, "unterminated lyrics")),
                    _ => self.parse_lyrics(lyrics)?,
                }
            },
            TokenKind::Syllable(text) => match text.as_str() {
                "--" => match lyrics.syllables.last_mut() {
                    Some(last) => last.hyphen = true,
                    None => log::warn!("{}:{}: hyphen before any syllable", token.line, token.column),
                },
                "__" => match lyrics.syllables.last_mut() {
                    Some(last) => last.extender = true,
                    None => log::warn!("{}:{}: extender before any syllable", token.line, token.column),
                },
                "_" => lyrics.syllables.push(Syllable::new("")),
                _ => lyrics.syllables.push(Syllable::new(text.replace('~', " "))),
            },
            TokenKind::Str(text) => lyrics.syllables.push(Syllable::new(text)),
            // Durations of lyric syllables are not kept
            TokenKind::Number(_) => {}
            TokenKind::Command(name) => match name.as_str() {
                "lyricmode" => self.parse_lyrics(lyrics)?,
                "skip" => {
                    self.next(LexMode::Lyric)?;
                    lyrics.syllables.push(Syllable::new(""));
                }
                "set" | "override" => {
                    let (path, value) = self.lyric_assignment()?;
                    if path.ends_with("stanza") {
                        lyrics.stanza = leading_number(&value);
                    }
                }
                "unset" | "revert" => {
                    self.next(LexMode::Lyric)?;
                }
                "markup" => lyrics.syllables.push(Syllable::new(self.parse_markup()?)),
                other if IGNORED_COMMANDS.contains(&other) => {}
                other => {
                    return Err(self.error(&token, format!("\\{} is not supported in lyrics", other)))
                }
            },
            TokenKind::Eof => return Err(self.error(&token, "unexpected end of input in lyrics")),
            _ => return Err(self.unexpected(&token)),
        }
        Ok(())
    }

    /// `path = value` in lyric mode
    fn lyric_assignment(&mut self) -> Result<(String, String)> {
        let token = self.next(LexMode::Lyric)?;
        let path = match token.kind.clone() {
            TokenKind::Syllable(path) => path,
            _ => return Err(self.error(&token, "expected a property name")),
        };
        let equals = self.next(LexMode::Lyric)?;
        if equals.kind != TokenKind::Syllable("=".to_string()) {
            return Err(self.error(&equals, format!("expected '=', found {}", equals.kind.describe())));
        }
        let value = self.next(LexMode::Lyric)?;
        let value = match value.kind.clone() {
            TokenKind::Str(text) | TokenKind::Syllable(text) => text,
            TokenKind::Scheme(raw) => scheme_text(&raw),
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Command(name) if name == "markup" => self.parse_markup()?,
            _ => return Err(self.error(&value, "expected a value")),
        };
        Ok((path, value))
    }

    // ---- voice level ----

    fn parse_voice_body(&mut self, voice: &mut VoiceBuilder) -> Result<()> {
        let saved = self.state.stem;
        self.state.stem = NoteStem::Preferred;
        let result = self.parse_voice_music(voice);
        self.state.stem = saved;
        result
    }

    /// One music expression inside a voice
    fn parse_voice_music(&mut self, voice: &mut VoiceBuilder) -> Result<()> {
        let token = self.peek(LexMode::Note)?;
        match &token.kind {
            TokenKind::LBrace => {
                self.advance()?;
                loop {
                    let next = self.peek(LexMode::Note)?;
                    match next.kind {
                        TokenKind::RBrace => {
                            self.advance()?;
                            break;
                        }
                        TokenKind::Eof => return Err(self.error(&token, "unterminated '{'")),
                        _ => self.parse_voice_music(voice)?,
                    }
                }
            }
            TokenKind::SimultaneousOpen => {
                return Err(self.error(&token, "simultaneous music inside a voice is not supported"))
            }
            TokenKind::Command(name) => match name.as_str() {
                "relative" => {
                    self.advance()?;
                    let reference = if self.next_is_pitch()? {
                        self.parse_plain_pitch()?
                    } else {
                        default_relative_reference()
                    };
                    let saved = self.state.octave;
                    self.state.octave = OctaveMode::Relative(RelativeOctave::new(reference));
                    let result = self.parse_voice_music(voice);
                    self.state.octave = saved;
                    result?;
                }
                "fixed" => {
                    self.advance()?;
                    let reference = self.parse_plain_pitch()?;
                    let saved = self.state.octave;
                    self.state.octave = OctaveMode::Fixed(reference.octave);
                    let result = self.parse_voice_music(voice);
                    self.state.octave = saved;
                    result?;
                }
                "absolute" => {
                    self.advance()?;
                    let saved = self.state.octave;
                    self.state.octave = OctaveMode::Absolute;
                    let result = self.parse_voice_music(voice);
                    self.state.octave = saved;
                    result?;
                }
                "new" | "context" => {
                    let kind = self.context_type()?;
                    if kind != "Voice" {
                        return Err(self.error(&token, format!("a {} cannot start inside a voice", kind)));
                    }
                    self.advance()?;
                    self.advance()?;
                    let (name, with) = self.context_header()?;
                    if let Some(name) = name {
                        if voice.voice.name.is_empty() {
                            voice.voice.name = name;
                        }
                    }
                    if let Some(instrument) = with.instrument {
                        voice.voice.instrument = instrument;
                    }
                    self.parse_voice_music(voice)?;
                }
                "repeat" => {
                    self.advance()?;
                    self.parse_repeat(voice, &token)?;
                }
                "lyricmode" | "lyricsto" | "addlyrics" => {
                    return Err(self.error(&token, "lyrics cannot appear inside a voice"))
                }
                _ => self.parse_event(voice)?,
            },
            _ => self.parse_event(voice)?,
        }
        Ok(())
    }

    fn parse_repeat(&mut self, voice: &mut VoiceBuilder, repeat: &Token) -> Result<()> {
        let kind_token = self.next(LexMode::Note)?;
        let kind = match kind_token.kind.clone() {
            TokenKind::Word(kind) | TokenKind::Str(kind) => kind,
            _ => return Err(self.error(&kind_token, "expected a repeat type")),
        };
        let count_token = self.next(LexMode::Note)?;
        let TokenKind::Number(count) = count_token.kind else {
            return Err(self.error(&count_token, "expected a repeat count"));
        };
        match kind.as_str() {
            "volta" => {
                let times = u8::try_from(count)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| self.error(&count_token, format!("invalid repeat count {}", count)))?;
                voice.push(MusicElement::Barline(Barline::new(BarlineKind::RepeatOpen { times })));
                self.parse_voice_music(voice)?;
                if self.peek(LexMode::Note)?.is_command("alternative") {
                    self.advance()?;
                    self.parse_alternatives(voice)?;
                } else {
                    voice.push(MusicElement::Barline(Barline::new(BarlineKind::RepeatClose)));
                }
            }
            "unfold" => {
                if count > MAX_MULTIPLIER {
                    return Err(self.error(&count_token, format!("repeat count {} exceeds {}", count, MAX_MULTIPLIER)));
                }
                let span = self.capture_expression()?;
                let depth = self.lexers.len();
                let octave = self.state.octave;
                let duration = self.state.duration;
                for _ in 0..count {
                    self.state.octave = octave;
                    self.state.duration = duration;
                    self.lexers.push(Lexer::over(self.src, span));
                    self.parse_voice_music(voice)?;
                    self.finish_expansion(depth)?;
                }
                if self.peek(LexMode::Note)?.is_command("alternative") {
                    return Err(self.error(repeat, "\\alternative after \\repeat unfold is not supported"));
                }
            }
            "percent" | "tremolo" | "segno" => {
                return Err(self.error(&kind_token, format!("\\repeat {} is not supported", kind)))
            }
            other => return Err(self.error(&kind_token, format!("unknown repeat type '{}'", other))),
        }
        Ok(())
    }

    /// `\alternative { {A} {B} }`: each ending is opened by a volta mark;
    /// all but the last end in a repeat barline
    fn parse_alternatives(&mut self, voice: &mut VoiceBuilder) -> Result<()> {
        let open = self.expect(TokenKind::LBrace, "after \\alternative")?;
        let mut number = 1u8;
        loop {
            if self.peek(LexMode::Note)?.kind == TokenKind::RBrace {
                return Err(self.error(&open, "empty \\alternative"));
            }
            voice.push_mark(Mark::Repeat(RepeatMark::Volta { number }));
            self.parse_voice_music(voice)?;
            if self.peek(LexMode::Note)?.kind == TokenKind::RBrace {
                self.advance()?;
                voice.push_mark(Mark::Repeat(RepeatMark::VoltaEnd));
                return Ok(());
            }
            voice.push(MusicElement::Barline(Barline::new(BarlineKind::RepeatClose)));
            number = number
                .checked_add(1)
                .ok_or_else(|| self.error(&open, "too many alternatives"))?;
        }
    }

    /// Drops exhausted copies pushed by `\repeat unfold`
    fn finish_expansion(&mut self, depth: usize) -> Result<()> {
        while self.lexers.len() > depth {
            let Some(lexer) = self.lexers.last() else {
                break;
            };
            let token = lexer.clone().next_token(LexMode::Note)?;
            if token.kind != TokenKind::Eof {
                return Err(self.unexpected(&token));
            }
            self.lexers.pop();
        }
        Ok(())
    }

    fn parse_event(&mut self, voice: &mut VoiceBuilder) -> Result<()> {
        let token = self.next(LexMode::Note)?;
        match token.kind.clone() {
            TokenKind::Word(word) => match word.as_str() {
                "r" | "R" => self.parse_rest(voice, &token, RestKind::Normal)?,
                "s" => self.parse_rest(voice, &token, RestKind::Spacer)?,
                "q" => self.parse_chord_repeat(voice, &token)?,
                _ => self.parse_note(voice, &token, &word)?,
            },
            TokenKind::ChordOpen => self.parse_chord(voice, &token)?,
            TokenKind::Command(name) => self.parse_command(voice, &token, &name)?,
            TokenKind::Tilde => {
                let start = voice
                    .last_head
                    .ok_or_else(|| self.error(&token, "tie without a note"))?;
                voice.pending_tie = Some((start, token));
            }
            TokenKind::OpenParen => self.open_slur(voice, SpannerKind::Slur, token)?,
            TokenKind::CloseParen => self.close_slur(voice, SpannerKind::Slur, &token),
            TokenKind::Dash | TokenKind::Caret | TokenKind::Underscore => {
                let mark = self.parse_script(&token)?;
                voice.push_mark(mark);
            }
            // Bar checks and manual beams
            TokenKind::Pipe | TokenKind::OpenBracket | TokenKind::CloseBracket => {}
            TokenKind::Colon => return Err(self.error(&token, "tremolo subdivisions are not supported")),
            TokenKind::Number(_) => return Err(self.error(&token, "duration without a note")),
            TokenKind::Eof => return Err(self.error(&token, "unexpected end of input")),
            _ => return Err(self.unexpected(&token)),
        }
        Ok(())
    }

    fn next_is_pitch(&mut self) -> Result<bool> {
        let token = self.peek(LexMode::Note)?;
        Ok(matches!(&token.kind, TokenKind::Word(w) if self.state.language.lookup(w).is_some()))
    }

    fn lookup_pitch(&self, token: &Token, name: &str) -> Result<(u8, i8)> {
        self.state
            .language
            .lookup(name)
            .ok_or_else(|| self.error(token, format!("unknown note name '{}'", name)))
    }

    fn octave_marks(&mut self) -> Result<i32> {
        let mut marks = 0;
        loop {
            match self.peek(LexMode::Note)?.kind {
                TokenKind::Quote => marks += 1,
                TokenKind::Comma => marks -= 1,
                _ => return Ok(marks),
            }
            self.advance()?;
        }
    }

    /// An absolute pitch, as used by `\relative c'` and `\fixed`
    fn parse_plain_pitch(&mut self) -> Result<Pitch> {
        let token = self.next(LexMode::Note)?;
        let TokenKind::Word(name) = token.kind.clone() else {
            return Err(self.error(&token, format!("expected a pitch, found {}", token.kind.describe())));
        };
        let (step, accidental) = self.lookup_pitch(&token, &name)?;
        let marks = self.octave_marks()?;
        let octave = i8::try_from(UNMARKED_OCTAVE + marks)
            .map_err(|_| self.error(&token, "octave out of range"))?;
        Pitch::new(step, accidental, octave).map_err(|e| self.error(&token, e.to_string()))
    }

    /// Octave marks, `!`/`?` and an octave check after a note name
    fn finish_pitch(&mut self, token: &Token, name: &str) -> Result<(Pitch, AccidentalDisplay)> {
        let (step, mut accidental) = self.lookup_pitch(token, name)?;
        if self.key_accidentals && accidental == 0 {
            accidental = self.state.key.accidental_for_step(step);
        }
        let marks = self.octave_marks()?;
        let display = match self.peek(LexMode::Note)?.kind {
            TokenKind::Exclamation => {
                self.advance()?;
                AccidentalDisplay::Forced
            }
            TokenKind::Question => {
                self.advance()?;
                AccidentalDisplay::Cautionary
            }
            _ => AccidentalDisplay::Auto,
        };
        let mut pitch = self
            .state
            .pitch(step, accidental, marks)
            .map_err(|e| self.error(token, e.to_string()))?;
        if self.peek(LexMode::Note)?.kind == TokenKind::Equals {
            self.advance()?;
            let check = self.octave_marks()?;
            pitch = self
                .state
                .check_octave(pitch, check)
                .map_err(|e| self.error(token, e.to_string()))?;
        }
        Ok((pitch, display))
    }

    /// Written duration, if any: a number or `\breve` plus dots
    fn parse_duration(&mut self) -> Result<Option<Duration>> {
        let token = self.peek(LexMode::Note)?;
        let length = match &token.kind {
            TokenKind::Number(n) => BaseLength::from_number(*n)
                .ok_or_else(|| self.error(&token, format!("invalid duration {}", n)))?,
            TokenKind::Command(name) if name == "breve" => BaseLength::Breve,
            _ => return Ok(None),
        };
        self.advance()?;
        let mut dots = 0u8;
        while self.peek(LexMode::Note)?.kind == TokenKind::Dot {
            self.advance()?;
            dots = dots.saturating_add(1);
        }
        Duration::new(length, dots)
            .map(Some)
            .map_err(|e| self.error(&token, e.to_string()))
    }

    fn reject_scaling(&mut self) -> Result<()> {
        let token = self.peek(LexMode::Note)?;
        if token.kind == TokenKind::Star {
            return Err(self.error(&token, "scaled durations are only supported on rests"));
        }
        Ok(())
    }

    fn new_note(&mut self, pitch: Pitch, duration: Duration, display: AccidentalDisplay, chorded: bool) -> MusicElement {
        let mut note = if chorded {
            Note::chorded(pitch, duration)
        } else {
            Note::new(pitch, duration)
        };
        note.id = ElementId(self.next_id());
        note.stem = self.state.stem;
        note.accidental_display = display;
        MusicElement::Note(note)
    }

    fn parse_note(&mut self, voice: &mut VoiceBuilder, token: &Token, name: &str) -> Result<()> {
        let (pitch, display) = self.finish_pitch(token, name)?;
        let written = self.parse_duration()?;
        self.reject_scaling()?;
        let duration = self.state.duration.resolve(written);
        let note = self.new_note(pitch, duration, display, false);
        voice.push_playable(note);
        Ok(())
    }

    fn parse_rest(&mut self, voice: &mut VoiceBuilder, token: &Token, kind: RestKind) -> Result<()> {
        let written = self.parse_duration()?;
        let duration = self.state.duration.resolve(written);
        let mut count = 1;
        if self.peek(LexMode::Note)?.kind == TokenKind::Star {
            self.advance()?;
            let factor = self.next(LexMode::Note)?;
            count = match factor.kind {
                TokenKind::Number(n) if n > 0 => n,
                _ => return Err(self.error(&factor, "expected a whole number after '*'")),
            };
            if count > MAX_MULTIPLIER {
                return Err(self.error(&factor, format!("rest count {} exceeds {}", count, MAX_MULTIPLIER)));
            }
        }
        log::trace!("{}:{}: {} rest(s)", token.line, token.column, count);
        for _ in 0..count {
            let mut rest = match kind {
                RestKind::Normal => Rest::new(duration),
                RestKind::Spacer => Rest::spacer(duration),
            };
            rest.id = ElementId(self.next_id());
            voice.push_playable(MusicElement::Rest(rest));
        }
        Ok(())
    }

    fn parse_chord(&mut self, voice: &mut VoiceBuilder, open: &Token) -> Result<()> {
        let mut pitches = Vec::new();
        let mut marks = Vec::new();
        let mut tie = false;
        loop {
            let token = self.next(LexMode::Note)?;
            match token.kind.clone() {
                TokenKind::ChordClose => break,
                TokenKind::Word(name) => pitches.push(self.finish_pitch(&token, &name)?),
                TokenKind::Tilde => tie = true,
                TokenKind::Dash | TokenKind::Caret | TokenKind::Underscore => {
                    marks.push(self.parse_script(&token)?)
                }
                TokenKind::Command(name) => match postfix_mark(&name) {
                    Some(mark) => marks.push(mark),
                    None => {
                        return Err(self.error(&token, format!("\\{} is not allowed inside a chord", name)))
                    }
                },
                TokenKind::Eof => return Err(self.error(open, "unterminated chord")),
                _ => return Err(self.unexpected(&token)),
            }
        }

        let written = self.parse_duration()?;
        self.reject_scaling()?;
        if pitches.is_empty() {
            // `<>` only carries marks
            for mark in marks {
                voice.push_mark(mark);
            }
            return Ok(());
        }

        let duration = self.state.duration.resolve(written);
        let head = pitches[0].0;
        for (index, (pitch, display)) in pitches.iter().enumerate() {
            let note = self.new_note(*pitch, duration, *display, index > 0);
            if index == 0 {
                voice.push_playable(note);
            } else {
                voice.push(note);
            }
        }
        self.state.end_chord(head);
        voice.last_chord = pitches;
        for mark in marks {
            voice.push_mark(mark);
        }
        if tie {
            if let Some(start) = voice.last_head {
                voice.pending_tie = Some((start, open.clone()));
            }
        }
        Ok(())
    }

    /// `q` repeats the previous chord's pitches
    fn parse_chord_repeat(&mut self, voice: &mut VoiceBuilder, token: &Token) -> Result<()> {
        if voice.last_chord.is_empty() {
            return Err(self.error(token, "'q' without a preceding chord"));
        }
        let written = self.parse_duration()?;
        self.reject_scaling()?;
        let duration = self.state.duration.resolve(written);
        let pitches = voice.last_chord.clone();
        for (index, (pitch, display)) in pitches.into_iter().enumerate() {
            let note = self.new_note(pitch, duration, display, index > 0);
            if index == 0 {
                voice.push_playable(note);
            } else {
                voice.push(note);
            }
        }
        Ok(())
    }

    fn open_slur(&mut self, voice: &mut VoiceBuilder, kind: SpannerKind, token: Token) -> Result<()> {
        let start = voice
            .last_head
            .ok_or_else(|| self.error(&token, format!("{} without a note", kind.name())))?;
        voice.open_slurs.push((kind, start, token));
        Ok(())
    }

    fn close_slur(&self, voice: &mut VoiceBuilder, kind: SpannerKind, token: &Token) {
        let Some(position) = voice.open_slurs.iter().rposition(|(k, _, _)| *k == kind) else {
            log::warn!("{}:{}: unmatched end of {}, ignored", token.line, token.column, kind.name());
            return;
        };
        let (_, start, _) = voice.open_slurs.remove(position);
        match voice.last_head {
            Some(end) if end != start => voice.voice.spanners.push(Spanner::new(kind, start, end)),
            _ => log::warn!(
                "{}:{}: {} on a single note, dropped",
                token.line,
                token.column,
                kind.name()
            ),
        }
    }

    /// Articulation, fingering or text after `-`, `^` or `_`
    fn parse_script(&mut self, direction: &Token) -> Result<Mark> {
        let placement = match direction.kind {
            TokenKind::Caret => Placement::Above,
            TokenKind::Underscore => Placement::Below,
            _ => Placement::Neutral,
        };
        let token = self.next(LexMode::Note)?;
        let articulation = |articulation| Mark::Articulation { articulation };
        let mark = match token.kind.clone() {
            TokenKind::Dot => articulation(ArticulationKind::Staccato),
            TokenKind::Dash => articulation(ArticulationKind::Tenuto),
            TokenKind::ChordClose => articulation(ArticulationKind::Accent),
            TokenKind::Caret => articulation(ArticulationKind::Marcato),
            TokenKind::Plus => articulation(ArticulationKind::Stopped),
            TokenKind::Underscore => articulation(ArticulationKind::Portato),
            TokenKind::Exclamation => articulation(ArticulationKind::Staccatissimo),
            TokenKind::Number(n) => Mark::Fingering {
                finger: u8::try_from(n).map_err(|_| self.error(&token, "fingering out of range"))?,
            },
            TokenKind::Str(text) => Mark::Text { text, placement },
            TokenKind::Command(name) if name == "markup" => Mark::Text {
                text: self.parse_markup()?,
                placement,
            },
            TokenKind::Command(name) => postfix_mark(&name)
                .ok_or_else(|| self.error(&token, format!("unknown script \\{}", name)))?,
            _ => {
                return Err(self.error(
                    &token,
                    format!("expected an articulation, found {}", token.kind.describe()),
                ))
            }
        };
        Ok(mark)
    }

    fn parse_command(&mut self, voice: &mut VoiceBuilder, token: &Token, name: &str) -> Result<()> {
        if let Some(mark) = postfix_mark(name) {
            voice.push_mark(mark);
            return Ok(());
        }
        match name {
            "(" => self.open_slur(voice, SpannerKind::PhrasingSlur, token.clone())?,
            ")" => self.close_slur(voice, SpannerKind::PhrasingSlur, token),
            "clef" => {
                let clef = self.parse_clef()?;
                voice.push(MusicElement::Clef(clef));
            }
            "key" => {
                let key = self.parse_key()?;
                self.state.key = key;
                voice.push(MusicElement::KeySignature(key));
            }
            "time" => {
                let time = self.parse_time()?;
                voice.push(MusicElement::TimeSignature(time));
            }
            "bar" => {
                let (text, at) = self.expect_string("after \\bar")?;
                if let Some(kind) = barline_kind(&text, &at) {
                    voice.push(MusicElement::Barline(Barline::new(kind)));
                }
            }
            "tempo" => {
                let tempo = self.parse_tempo(token)?;
                voice.push_mark(Mark::Tempo(tempo));
            }
            "skip" => {
                let duration = self
                    .parse_duration()?
                    .ok_or_else(|| self.error(token, "\\skip needs a duration"))?;
                let mut rest = Rest::spacer(duration);
                rest.id = ElementId(self.next_id());
                voice.push_playable(MusicElement::Rest(rest));
            }
            "markup" => {
                let text = self.parse_markup()?;
                voice.push_mark(Mark::Text {
                    text,
                    placement: Placement::Neutral,
                });
            }
            "voiceOne" | "voiceThree" => voice.voice.stem_direction = StemDirection::Up,
            "voiceTwo" | "voiceFour" => voice.voice.stem_direction = StemDirection::Down,
            "oneVoice" => voice.voice.stem_direction = StemDirection::Neutral,
            "stemUp" => self.state.stem = NoteStem::Up,
            "stemDown" => self.state.stem = NoteStem::Down,
            "stemNeutral" => self.state.stem = NoteStem::Preferred,
            "set" => {
                let path = self.property_path()?;
                self.expect(TokenKind::Equals, "in \\set")?;
                let value = self.parse_value()?;
                if path.ends_with("midiInstrument") {
                    voice.voice.instrument = value;
                } else {
                    log::debug!("{}:{}: \\set {} ignored", token.line, token.column, path);
                }
            }
            "override" => {
                self.property_path()?;
                self.expect(TokenKind::Equals, "in \\override")?;
                self.parse_value()?;
            }
            "unset" | "revert" | "accidentalStyle" | "omit" | "hide" => {
                self.property_path()?;
            }
            "partial" => {
                self.parse_duration()?;
            }
            "mark" => {
                if self.peek(LexMode::Note)?.is_command("default") {
                    self.advance()?;
                } else {
                    self.parse_value()?;
                }
            }
            "ottava" => {
                self.parse_value()?;
            }
            "layout" | "midi" | "paper" => {
                self.capture_expression()?;
            }
            "\\" => return Err(self.error(token, POLYPHONY)),
            other if IGNORED_COMMANDS.contains(&other) => {}
            other if UNSUPPORTED_COMMANDS.contains(&other) => {
                return Err(self.error(token, format!("\\{} is not supported", other)))
            }
            other => return Err(self.error(token, format!("unknown command \\{}", other))),
        }
        Ok(())
    }

    fn parse_clef(&mut self) -> Result<Clef> {
        let token = self.next(LexMode::Note)?;
        let text = match token.kind.clone() {
            TokenKind::Str(text) | TokenKind::Word(text) => text,
            _ => return Err(self.error(&token, "expected a clef name")),
        };
        let (name, offset) = match text.find(['_', '^']) {
            Some(at) => {
                let amount: i8 = text[at + 1..]
                    .parse()
                    .map_err(|_| self.error(&token, format!("invalid clef '{}'", text)))?;
                let sign = if text[at..].starts_with('_') { -1 } else { 1 };
                (&text[..at], sign * amount)
            }
            None => (text.as_str(), 0),
        };
        if !matches!(offset.abs(), 0 | 8 | 15) {
            return Err(self.error(&token, format!("unsupported clef transposition in '{}'", text)));
        }
        let kind = ClefKind::from_name(name)
            .ok_or_else(|| self.error(&token, format!("unknown clef '{}'", name)))?;
        Ok(Clef { kind, offset })
    }

    fn parse_key(&mut self) -> Result<KeySignature> {
        let token = self.next(LexMode::Note)?;
        let TokenKind::Word(name) = token.kind.clone() else {
            return Err(self.error(&token, "expected a key tonic"));
        };
        let (step, accidental) = self.lookup_pitch(&token, &name)?;
        let tonic = PitchClass::new(step, accidental).map_err(|e| self.error(&token, e.to_string()))?;
        let mode_token = self.next(LexMode::Note)?;
        let mode = match &mode_token.kind {
            TokenKind::Command(mode) => KeyMode::from_name(mode),
            _ => None,
        }
        .ok_or_else(|| self.error(&mode_token, "expected a mode such as \\major"))?;
        Ok(KeySignature::new(tonic, mode))
    }

    fn parse_time(&mut self) -> Result<TimeSignature> {
        loop {
            let token = self.next(LexMode::Note)?;
            match token.kind {
                TokenKind::Fraction(beats, beat) => {
                    let beats = u8::try_from(beats).ok().filter(|n| *n > 0);
                    let beat = u8::try_from(beat)
                        .ok()
                        .filter(|n| n.is_power_of_two() && *n <= 64);
                    return match (beats, beat) {
                        (Some(beats), Some(beat)) => Ok(TimeSignature::new(beats, beat)),
                        _ => Err(self.error(&token, "invalid time signature")),
                    };
                }
                // Beat grouping like `\time 2,2,3 7/8`
                TokenKind::Number(_) | TokenKind::Comma => {}
                _ => return Err(self.error(&token, "expected a time signature like 3/4")),
            }
        }
    }

    fn parse_tempo(&mut self, token: &Token) -> Result<Tempo> {
        let mut text = None;
        match self.peek(LexMode::Note)?.kind {
            TokenKind::Str(value) => {
                self.advance()?;
                text = Some(value);
            }
            TokenKind::Command(name) if name == "markup" => {
                self.advance()?;
                text = Some(self.parse_markup()?);
            }
            _ => {}
        }
        let mut metronome = None;
        if let Some(beat) = self.parse_duration()? {
            self.expect(TokenKind::Equals, "in \\tempo")?;
            let bpm_token = self.next(LexMode::Note)?;
            let bpm = match bpm_token.kind {
                TokenKind::Number(n) => u16::try_from(n)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| self.error(&bpm_token, "tempo out of range"))?,
                _ => return Err(self.error(&bpm_token, "expected beats per minute")),
            };
            if self.peek(LexMode::Note)?.kind == TokenKind::Dash {
                return Err(self.error(&bpm_token, "tempo ranges are not supported"));
            }
            metronome = Some(Metronome { beat, bpm });
        }
        if text.is_none() && metronome.is_none() {
            return Err(self.error(token, "\\tempo needs a text or a metronome mark"));
        }
        Ok(Tempo { text, metronome })
    }
}

/// Marks written as a command after a note
fn postfix_mark(name: &str) -> Option<Mark> {
    if let Some(dynamic) = DynamicKind::from_name(name) {
        return Some(Mark::Dynamic { dynamic });
    }
    if let Some(articulation) = ArticulationKind::from_name(name) {
        return Some(Mark::Articulation { articulation });
    }
    let hairpin = |hairpin| Some(Mark::Hairpin { hairpin });
    match name {
        "fermata" => Some(Mark::Fermata),
        "segno" => Some(Mark::Repeat(RepeatMark::Segno)),
        "coda" => Some(Mark::Repeat(RepeatMark::Coda)),
        "varcoda" => Some(Mark::Repeat(RepeatMark::VarCoda)),
        "<" | "cresc" => hairpin(HairpinKind::Crescendo),
        ">" | "decresc" | "dim" => hairpin(HairpinKind::Decrescendo),
        "!" => hairpin(HairpinKind::End),
        _ => None,
    }
}

fn barline_kind(text: &str, token: &Token) -> Option<BarlineKind> {
    let kind = match text {
        "" => return None,
        "|" => BarlineKind::Single,
        "||" => BarlineKind::Double,
        "|." => BarlineKind::End,
        ".|:" | "|:" | "[|:" => BarlineKind::RepeatOpen { times: 2 },
        ":|." | ":|" | ":|]" => BarlineKind::RepeatClose,
        ":..:" | ":|.|:" | ":|.:" | ":|][|:" => BarlineKind::RepeatCloseOpen,
        ";" | "!" => BarlineKind::Dotted,
        other => {
            log::warn!(
                "{}:{}: unknown bar line \"{}\", using a single bar",
                token.line,
                token.column,
                other
            );
            BarlineKind::Single
        }
    };
    Some(kind)
}

/// `#"flute"` gives `flute`; other scheme values are kept as written
fn scheme_text(raw: &str) -> String {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
        .to_string()
}

/// `"2."` gives 2
fn leading_number(text: &str) -> u32 {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Document> {
        Parser::new(text, &ImportSettings::default(), None).parse()
    }

    fn first_voice(doc: &Document) -> &Voice {
        &doc.sheets[0].contexts[0].as_staff().unwrap().voices[0]
    }

    fn notes(voice: &Voice) -> Vec<&Note> {
        voice.elements.iter().filter_map(MusicElement::as_note).collect()
    }

    fn pitch(step: u8, accidental: i8, octave: i8) -> Pitch {
        Pitch::new(step, accidental, octave).unwrap()
    }

    fn parse_error(text: &str) -> ParseError {
        match parse(text) {
            Err(EditorError::Parse(error)) => error,
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_sticky_duration() {
        let doc = parse("{ c4 d e8 f }").unwrap();
        let durations: Vec<Duration> = notes(first_voice(&doc)).iter().map(|n| n.duration).collect();
        let quarter = Duration::QUARTER;
        let eighth = Duration::plain(BaseLength::Eighth);
        assert_eq!(durations, vec![quarter, quarter, eighth, eighth]);
    }

    #[test]
    fn test_dotted_durations() {
        let doc = parse("{ c4. d8.. }").unwrap();
        let voice = first_voice(&doc);
        let lengths: Vec<Time> = notes(voice).iter().map(|n| n.duration.time_value()).collect();
        assert_eq!(lengths, vec![Time::new(3, 8), Time::new(7, 32)]);
        assert!(parse("{ c4... }").is_err());
    }

    #[test]
    fn test_absolute_octaves() {
        let doc = parse("{ c c' c'' c, fis' bes }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(
            pitches,
            vec![
                pitch(0, 0, 3),
                pitch(0, 0, 4),
                pitch(0, 0, 5),
                pitch(0, 0, 2),
                pitch(3, 1, 4),
                pitch(6, -1, 3),
            ]
        );
    }

    #[test]
    fn test_relative_mode() {
        let doc = parse("\\relative c' { c d e f g a b c c, f b f }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches[0], pitch(0, 0, 4));
        assert_eq!(pitches[6], pitch(6, 0, 4));
        assert_eq!(pitches[7], pitch(0, 0, 5));
        assert_eq!(pitches[8], pitch(0, 0, 4));
        // F to B goes up, B to F goes down
        assert_eq!(pitches[9], pitch(3, 0, 4));
        assert_eq!(pitches[10], pitch(6, 0, 4));
        assert_eq!(pitches[11], pitch(3, 0, 4));
    }

    #[test]
    fn test_relative_without_reference() {
        let doc = parse("\\relative { c' g }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![pitch(0, 0, 4), pitch(4, 0, 3)]);
    }

    #[test]
    fn test_chords() {
        let doc = parse("\\relative c' { <c e g>2 <f a c>4 d }").unwrap();
        let voice = first_voice(&doc);
        let notes = notes(voice);
        assert_eq!(notes.len(), 7);
        assert!(!notes[0].chorded);
        assert!(notes[1].chorded && notes[2].chorded);
        assert_eq!(notes[2].pitch, pitch(4, 0, 4));
        assert_eq!(notes[1].duration, Duration::plain(BaseLength::Half));
        // The second chord starts from c, not from g
        assert_eq!(notes[3].pitch, pitch(3, 0, 4));
        assert_eq!(notes[5].pitch, pitch(0, 0, 5));
        // After the chord, relative mode continues from its first note
        assert_eq!(notes[6].pitch, pitch(1, 0, 4));
        assert_eq!(voice.length(), Time::from_integer(1));
    }

    #[test]
    fn test_ties_and_slurs() {
        let doc = parse("{ c4~ c d( e f) g\\( a\\) }").unwrap();
        let voice = first_voice(&doc);
        let ids: Vec<ElementId> = voice.elements.iter().filter_map(MusicElement::id).collect();
        assert_eq!(
            voice.spanners,
            vec![
                Spanner::new(SpannerKind::Tie, ids[0], ids[1]),
                Spanner::new(SpannerKind::Slur, ids[2], ids[4]),
                Spanner::new(SpannerKind::PhrasingSlur, ids[5], ids[6]),
            ]
        );
    }

    #[test]
    fn test_marks_follow_their_note() {
        let doc = parse("{ c4-. d\\f e^\"dolce\" f-3 g\\fermata\\< a\\! }").unwrap();
        let voice = first_voice(&doc);
        assert!(matches!(
            voice.elements[1],
            MusicElement::Mark(Mark::Articulation {
                articulation: ArticulationKind::Staccato
            })
        ));
        assert!(matches!(
            voice.elements[3],
            MusicElement::Mark(Mark::Dynamic {
                dynamic: DynamicKind::F
            })
        ));
        match &voice.elements[5] {
            MusicElement::Mark(Mark::Text { text, placement }) => {
                assert_eq!(text, "dolce");
                assert_eq!(*placement, Placement::Above);
            }
            other => panic!("expected text, got {:?}", other),
        }
        assert!(matches!(
            voice.elements[7],
            MusicElement::Mark(Mark::Fingering { finger: 3 })
        ));
        assert!(matches!(voice.elements[9], MusicElement::Mark(Mark::Fermata)));
        assert!(matches!(
            voice.elements[10],
            MusicElement::Mark(Mark::Hairpin {
                hairpin: HairpinKind::Crescendo
            })
        ));
    }

    #[test]
    fn test_error_position() {
        let error = parse_error("\\score { \\new Staff { c4 X } }");
        assert_eq!((error.line, error.column), (1, 26));
        assert!(error.message.contains("X"));

        let error = parse_error("{ c4\n  d4 e4\n  q }");
        assert_eq!((error.line, error.column), (3, 3));
    }

    #[test]
    fn test_unterminated_block() {
        let error = parse_error("\\score {\n  { c d e\n");
        assert_eq!(error.line, 2);
    }

    #[test]
    fn test_cancellation() {
        let cancel = AtomicBool::new(true);
        let result = Parser::new("{ c d e }", &ImportSettings::default(), Some(&cancel)).parse();
        assert!(matches!(result, Err(EditorError::Cancelled)));
    }

    #[test]
    fn test_volta_repeat_with_alternatives() {
        let doc = parse("{ \\repeat volta 2 { c d } \\alternative { { e } { f } } g }").unwrap();
        let voice = first_voice(&doc);
        let kinds: Vec<String> = voice
            .elements
            .iter()
            .map(|e| match e {
                MusicElement::Note(n) => n.pitch.to_string(),
                MusicElement::Barline(b) => format!("{:?}", b.kind),
                MusicElement::Mark(Mark::Repeat(r)) => format!("{:?}", r),
                other => other.kind_name().to_string(),
            })
            .collect();
        assert_eq!(kinds[0], "RepeatOpen { times: 2 }");
        assert_eq!(kinds[3], "Volta { number: 1 }");
        assert_eq!(kinds[5], "RepeatClose");
        assert_eq!(kinds[6], "Volta { number: 2 }");
        assert_eq!(kinds[8], "VoltaEnd");
        assert_eq!(voice.elements.len(), 10);
    }

    #[test]
    fn test_unfold_repeat() {
        let doc = parse("\\relative c' { \\repeat unfold 3 { c e } }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches.len(), 6);
        // Each copy starts from the same reference
        assert!(pitches.chunks(2).all(|pair| pair == [pitch(0, 0, 4), pitch(2, 0, 4)]));
    }

    #[test]
    fn test_unfold_repeat_matches_written_out_durations() {
        let unfolded = parse("{ c'4 \\repeat unfold 2 { c' d'8 } }").unwrap();
        let written = parse("{ c'4 c' d'8 c'4 d'8 }").unwrap();
        let durations = |doc: &Document| -> Vec<Duration> {
            notes(first_voice(doc)).iter().map(|n| n.duration).collect()
        };
        let eighth = Duration::plain(BaseLength::Eighth);
        assert_eq!(
            durations(&unfolded),
            vec![Duration::QUARTER, Duration::QUARTER, eighth, Duration::QUARTER, eighth]
        );
        assert_eq!(durations(&unfolded), durations(&written));
    }

    #[test]
    fn test_unfold_repeat_after_relative_leap() {
        let doc = parse("\\relative c' { c'' \\repeat unfold 2 { d e } f }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(
            pitches,
            vec![
                pitch(0, 0, 6),
                pitch(1, 0, 6),
                pitch(2, 0, 6),
                pitch(1, 0, 6),
                pitch(2, 0, 6),
                pitch(3, 0, 6),
            ]
        );
    }

    #[test]
    fn test_multiplier_limits() {
        let error = parse_error("{ R1*4000000000 }");
        assert_eq!((error.line, error.column), (1, 6));
        assert!(error.message.contains("exceeds"));

        let error = parse_error("{ \\repeat unfold 5000 { c'4 } }");
        assert_eq!((error.line, error.column), (1, 18));

        let doc = parse("{ R1*12 }").unwrap();
        assert_eq!(first_voice(&doc).elements.len(), 12);
    }

    #[test]
    fn test_variables() {
        let doc = parse(
            "melody = \\relative c'' { a b }\nalias = \\melody\n\\score { \\new Staff { \\alias \\melody } }",
        )
        .unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![pitch(5, 0, 4), pitch(6, 0, 4), pitch(5, 0, 4), pitch(6, 0, 4)]);
    }

    #[test]
    fn test_lyrics() {
        let doc = parse(
            r#"\score {
  <<
    \new Staff \new Voice = "melody" { c d e f }
    \new Lyrics \lyricsto "melody" { \set stanza = "2." Hal -- le -- lu __ _ }
  >>
}"#,
        )
        .unwrap();
        let sheet = &doc.sheets[0];
        let voice_id = first_voice(&doc).id;
        let lyrics = match &sheet.contexts[1] {
            Context::Lyrics(lyrics) => lyrics,
            other => panic!("expected lyrics, got {:?}", other),
        };
        assert_eq!(lyrics.associated_voice, Some(voice_id));
        assert_eq!(lyrics.stanza, 2);
        let texts: Vec<&str> = lyrics.syllables.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Hal", "le", "lu", ""]);
        assert!(lyrics.syllables[0].hyphen && lyrics.syllables[1].hyphen);
        assert!(lyrics.syllables[2].extender);
    }

    #[test]
    fn test_addlyrics() {
        let doc = parse("{ c d } \\addlyrics { la la }").unwrap();
        let sheet = &doc.sheets[0];
        assert_eq!(sheet.contexts.len(), 2);
        assert_eq!(sheet.contexts[1].associated_voice(), Some(first_voice(&doc).id));
    }

    #[test]
    fn test_unknown_lyrics_voice() {
        let error = parse_error("\\score { << \\new Staff { c } \\new Lyrics \\lyricsto \"nope\" { la } >> }");
        assert!(error.message.contains("nope"));
    }

    #[test]
    fn test_header_and_score_names() {
        let doc = parse(
            r#"\version "2.24.0"
\header { title = "Sonata" composer = \markup { \bold "J. S." Bach } tagline = ##f }
\score { \new Staff { c } \header { piece = "Allegro" } }
\score { \new Staff { d } \header { piece = "Allegro" } }
{ e }"#,
        )
        .unwrap();
        assert_eq!(doc.metadata.title, "Sonata");
        assert_eq!(doc.metadata.composer, "J. S. Bach");
        let names: Vec<&str> = doc.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "Allegro");
        assert_ne!(names[1], names[0]);
        assert_eq!(names[2], "Sheet 3");
    }

    #[test]
    fn test_staff_settings() {
        let doc = parse(
            r#"\new Staff = "Flute" \with { \override StaffSymbol.line-count = #3 midiInstrument = #"flute" } {
  \clef "treble^8" \key d \major \time 6/8 \tempo "Allegro" 4. = 120
  \voiceOne c \bar "|."
}"#,
        )
        .unwrap();
        let staff = doc.sheets[0].contexts[0].as_staff().unwrap();
        assert_eq!(staff.name, "Flute");
        assert_eq!(staff.number_of_lines, 3);
        let voice = &staff.voices[0];
        assert_eq!(voice.instrument, "flute");
        assert_eq!(voice.stem_direction, StemDirection::Up);
        assert_eq!(
            voice.elements[0],
            MusicElement::Clef(Clef {
                kind: ClefKind::Treble,
                offset: 8
            })
        );
        assert_eq!(
            voice.elements[1],
            MusicElement::KeySignature(KeySignature::new(PitchClass::new(1, 0).unwrap(), KeyMode::Major))
        );
        assert_eq!(voice.elements[2], MusicElement::TimeSignature(TimeSignature::new(6, 8)));
        match &voice.elements[3] {
            MusicElement::Mark(Mark::Tempo(tempo)) => {
                assert_eq!(tempo.text.as_deref(), Some("Allegro"));
                assert_eq!(tempo.metronome.map(|m| m.bpm), Some(120));
            }
            other => panic!("expected a tempo, got {:?}", other),
        }
        assert_eq!(
            voice.elements.last(),
            Some(&MusicElement::Barline(Barline::new(BarlineKind::End)))
        );
    }

    #[test]
    fn test_multiple_voices_in_staff() {
        let doc = parse(
            "\\new Staff << \\new Voice = \"up\" { \\voiceOne c'' } \\new Voice = \"down\" { \\voiceTwo c' } >>",
        )
        .unwrap();
        let staff = doc.sheets[0].contexts[0].as_staff().unwrap();
        let numbers: Vec<u32> = staff.voices.iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(staff.voices[1].name, "down");
        assert_eq!(staff.voices[1].stem_direction, StemDirection::Down);
    }

    #[test]
    fn test_polyphony_shorthand_is_rejected() {
        let error = parse_error("\\new Staff << { c } \\\\ { d } >>");
        assert!(error.message.contains("polyphony"));
    }

    #[test]
    fn test_multi_measure_rests() {
        let doc = parse("{ R1*3 s2 \\skip 4 }").unwrap();
        let voice = first_voice(&doc);
        assert_eq!(voice.elements.len(), 5);
        assert_eq!(voice.length(), Time::new(15, 4));
    }

    #[test]
    fn test_key_accidentals_setting() {
        let settings = ImportSettings {
            key_accidentals: true,
            ..ImportSettings::default()
        };
        let doc = Parser::new("{ \\key g \\major f' c'' fis' }", &settings, None)
            .parse()
            .unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![pitch(3, 1, 4), pitch(0, 0, 5), pitch(3, 1, 4)]);

        let doc = parse("{ \\key g \\major f' }").unwrap();
        assert_eq!(notes(first_voice(&doc))[0].pitch, pitch(3, 0, 4));
    }

    #[test]
    fn test_language_switch() {
        let doc = parse("\\language \"english\" { bf' cs'' }").unwrap();
        let pitches: Vec<Pitch> = notes(first_voice(&doc)).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![pitch(6, -1, 4), pitch(0, 1, 5)]);
    }

    #[test]
    fn test_unsupported_music() {
        let error = parse_error("{ \\tuplet 3/2 { c d e } }");
        assert!(error.message.contains("tuplet"));
    }
}

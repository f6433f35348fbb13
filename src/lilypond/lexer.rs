//! Mode-aware LilyPond tokenizer
//!
//! Note mode splits `cis'4.` into a word, octave marks, a number and dots.
//! Lyric mode reads whole whitespace-separated syllables instead. The parser
//! picks the mode for every token it asks for.

use crate::error::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TokenKind {
    LBrace,
    RBrace,
    /// `<<`
    SimultaneousOpen,
    /// `>>`
    SimultaneousClose,
    /// `<`
    ChordOpen,
    /// `>`
    ChordClose,
    /// `\name`, or `\(`, `\)`, `\<`, `\>`, `\!`, `\\`
    Command(String),
    Word(String),
    Number(u32),
    Fraction(u32, u32),
    Str(String),
    /// Raw text after `#`
    Scheme(String),
    /// A syllable in lyric mode (including `--`, `__` and `_`)
    Syllable(String),
    Quote,
    Comma,
    Dot,
    Tilde,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Pipe,
    Exclamation,
    Question,
    Dash,
    Caret,
    Underscore,
    Plus,
    Equals,
    Star,
    Colon,
    Eof,
}

impl TokenKind {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::SimultaneousOpen => "'<<'".to_string(),
            TokenKind::SimultaneousClose => "'>>'".to_string(),
            TokenKind::ChordOpen => "'<'".to_string(),
            TokenKind::ChordClose => "'>'".to_string(),
            TokenKind::Command(name) => format!("'\\{}'", name),
            TokenKind::Word(word) | TokenKind::Syllable(word) => format!("'{}'", word),
            TokenKind::Number(n) => format!("'{}'", n),
            TokenKind::Fraction(n, d) => format!("'{}/{}'", n, d),
            TokenKind::Str(s) => format!("\"{}\"", s),
            TokenKind::Scheme(s) => format!("'#{}'", s),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other.punctuation()),
        }
    }

    fn punctuation(&self) -> char {
        match self {
            TokenKind::Quote => '\'',
            TokenKind::Comma => ',',
            TokenKind::Dot => '.',
            TokenKind::Tilde => '~',
            TokenKind::OpenParen => '(',
            TokenKind::CloseParen => ')',
            TokenKind::OpenBracket => '[',
            TokenKind::CloseBracket => ']',
            TokenKind::Pipe => '|',
            TokenKind::Exclamation => '!',
            TokenKind::Question => '?',
            TokenKind::Dash => '-',
            TokenKind::Caret => '^',
            TokenKind::Underscore => '_',
            TokenKind::Plus => '+',
            TokenKind::Equals => '=',
            TokenKind::Star => '*',
            TokenKind::Colon => ':',
            _ => '?',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_command(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Command(n) if n == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LexMode {
    Note,
    Lyric,
}

/// Byte range of the source with the position of its first character
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

/// Cursor over a slice of the source. Cloning is cheap and is how the
/// parser peeks.
#[derive(Clone, Debug)]
pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            end: src.len(),
            line: 1,
            column: 1,
        }
    }

    /// Lexer over a stored range, e.g. the value of a variable
    pub fn over(src: &'a str, span: Span) -> Self {
        Self {
            src,
            pos: span.start,
            end: span.end,
            line: span.line,
            column: span.column,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..self.end].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..self.end].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(line, column, message)
    }

    /// Skips whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '%' {
                let (line, column) = (self.line, self.column);
                self.bump();
                if self.peek_char() == Some('{') {
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('%') if self.peek_char() == Some('}') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error(line, column, "unterminated block comment")),
                        }
                    }
                } else {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    pub fn next_token(&mut self, mode: LexMode) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(c) = self.peek_char() else {
            return Ok(token(TokenKind::Eof));
        };

        // Shared by both modes
        match c {
            '{' => {
                self.bump();
                return Ok(token(TokenKind::LBrace));
            }
            '}' => {
                self.bump();
                return Ok(token(TokenKind::RBrace));
            }
            '"' => return Ok(token(TokenKind::Str(self.string()?))),
            '#' => {
                self.bump();
                return Ok(token(TokenKind::Scheme(self.scheme()?)));
            }
            '\\' => {
                self.bump();
                return Ok(token(TokenKind::Command(self.command(line, column)?)));
            }
            _ => {}
        }

        if mode == LexMode::Lyric {
            return Ok(token(self.syllable()));
        }

        let kind = match c {
            '<' => {
                self.bump();
                if self.peek_char() == Some('<') {
                    self.bump();
                    TokenKind::SimultaneousOpen
                } else {
                    TokenKind::ChordOpen
                }
            }
            '>' => {
                self.bump();
                if self.peek_char() == Some('>') {
                    self.bump();
                    TokenKind::SimultaneousClose
                } else {
                    TokenKind::ChordClose
                }
            }
            c if c.is_ascii_digit() => {
                let n = self.number(line, column)?;
                if self.peek_char() == Some('/') && self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
                    self.bump();
                    let (dl, dc) = (self.line, self.column);
                    TokenKind::Fraction(n, self.number(dl, dc)?)
                } else {
                    TokenKind::Number(n)
                }
            }
            c if c.is_alphabetic() => TokenKind::Word(self.word()),
            _ => {
                self.bump();
                match c {
                    '\'' => TokenKind::Quote,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    '~' => TokenKind::Tilde,
                    '(' => TokenKind::OpenParen,
                    ')' => TokenKind::CloseParen,
                    '[' => TokenKind::OpenBracket,
                    ']' => TokenKind::CloseBracket,
                    '|' => TokenKind::Pipe,
                    '!' => TokenKind::Exclamation,
                    '?' => TokenKind::Question,
                    '-' => TokenKind::Dash,
                    '^' => TokenKind::Caret,
                    '_' => TokenKind::Underscore,
                    '+' => TokenKind::Plus,
                    '=' => TokenKind::Equals,
                    '*' => TokenKind::Star,
                    ':' => TokenKind::Colon,
                    other => {
                        return Err(self.error(line, column, format!("unexpected character '{}'", other)))
                    }
                }
            }
        };
        Ok(token(kind))
    }

    fn number(&mut self, line: usize, column: usize) -> Result<u32, ParseError> {
        let start = self.pos;
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| self.error(line, column, "number out of range"))
    }

    /// Letters, with inner dashes as in `line-count` or `c-sharp`
    fn word(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphabetic() {
                self.bump();
            } else if c == '-' && self.peek_second().map_or(false, char::is_alphabetic) {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn command(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        match self.peek_char() {
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while self.peek_char().map_or(false, |c| c.is_alphanumeric()) {
                    self.bump();
                }
                Ok(self.src[start..self.pos].to_string())
            }
            Some(c) if "()<>!\\[]".contains(c) => {
                self.bump();
                Ok(c.to_string())
            }
            _ => Err(self.error(line, column, "expected a command name after '\\'")),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => break,
                },
                Some(c) => text.push(c),
                None => break,
            }
        }
        Err(self.error(line, column, "unterminated string"))
    }

    /// Scheme value after `#`: a string, a balanced list, or a single atom
    fn scheme(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let (line, column) = (self.line, self.column);
        // Quote prefixes like #'sym or #'(a b)
        while matches!(self.peek_char(), Some('\'') | Some('`')) {
            self.bump();
        }
        match self.peek_char() {
            Some('"') => {
                self.string()?;
            }
            Some('(') => {
                let mut depth = 0usize;
                loop {
                    match self.peek_char() {
                        Some('(') => {
                            depth += 1;
                            self.bump();
                        }
                        Some(')') => {
                            self.bump();
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Some('"') => {
                            self.string()?;
                        }
                        Some(_) => {
                            self.bump();
                        }
                        None => return Err(self.error(line, column, "unterminated scheme expression")),
                    }
                }
            }
            _ => {
                while let Some(c) = self.peek_char() {
                    if c.is_whitespace() || "{}()".contains(c) {
                        break;
                    }
                    self.bump();
                }
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn syllable(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || c == '{' || c == '}' {
                break;
            }
            self.bump();
        }
        let text = &self.src[start..self.pos];
        let digits = text.trim_end_matches('.');
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            // A bare duration; lyric durations are not modelled
            return TokenKind::Number(digits.parse().unwrap_or(4));
        }
        TokenKind::Syllable(strip_duration(text).to_string())
    }

    /// Range of the next expression without interpreting it: a string,
    /// scheme value or number, or everything up to the bracket that closes
    /// the first `{` or `<<`
    pub fn skip_expression(&mut self) -> Result<Span, ParseError> {
        self.skip_trivia()?;
        let (start, line, column) = (self.pos, self.line, self.column);
        match self.peek_char() {
            Some('"') => {
                self.string()?;
            }
            Some('#') => {
                self.bump();
                self.scheme()?;
            }
            Some(c) if c.is_ascii_digit() => {
                self.number(line, column)?;
            }
            None => return Err(self.error(line, column, "expected a value")),
            Some(_) => {
                let mut depth = 0usize;
                loop {
                    let (l, c) = (self.line, self.column);
                    match self.peek_char() {
                        None if depth > 0 => return Err(self.error(line, column, "unterminated block")),
                        None => break,
                        Some('%') | Some(' ') | Some('\t') | Some('\r') | Some('\n') => self.skip_trivia()?,
                        Some('"') => {
                            self.string()?;
                        }
                        Some('#') => {
                            self.bump();
                            self.scheme()?;
                        }
                        Some('{') => {
                            self.bump();
                            depth += 1;
                        }
                        Some('<') if self.peek_second() == Some('<') => {
                            self.bump();
                            self.bump();
                            depth += 1;
                        }
                        Some('}') => {
                            if depth == 0 {
                                return Err(self.error(l, c, "unexpected '}'"));
                            }
                            self.bump();
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Some('>') if self.peek_second() == Some('>') => {
                            if depth == 0 {
                                return Err(self.error(l, c, "unexpected '>>'"));
                            }
                            self.bump();
                            self.bump();
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Some(_) => {
                            self.bump();
                        }
                    }
                }
            }
        }
        Ok(Span {
            start,
            end: self.pos,
            line,
            column,
        })
    }
}

/// `la4.` is the syllable `la` with a duration
fn strip_duration(text: &str) -> &str {
    let without_dots = text.trim_end_matches('.');
    let without_digits = without_dots.trim_end_matches(|c: char| c.is_ascii_digit());
    if without_digits.len() < without_dots.len() && !without_digits.is_empty() {
        without_digits
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, mode: LexMode) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token(mode).unwrap();
            if token.kind == TokenKind::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_note_tokens() {
        assert_eq!(
            kinds("cis''4. r8 <c e>", LexMode::Note),
            vec![
                TokenKind::Word("cis".into()),
                TokenKind::Quote,
                TokenKind::Quote,
                TokenKind::Number(4),
                TokenKind::Dot,
                TokenKind::Word("r".into()),
                TokenKind::Number(8),
                TokenKind::ChordOpen,
                TokenKind::Word("c".into()),
                TokenKind::Word("e".into()),
                TokenKind::ChordClose,
            ]
        );
    }

    #[test]
    fn test_commands_and_punctuation() {
        assert_eq!(
            kinds("\\time 3/4 c-. d\\( e\\) << >> \\\\", LexMode::Note),
            vec![
                TokenKind::Command("time".into()),
                TokenKind::Fraction(3, 4),
                TokenKind::Word("c".into()),
                TokenKind::Dash,
                TokenKind::Dot,
                TokenKind::Word("d".into()),
                TokenKind::Command("(".into()),
                TokenKind::Word("e".into()),
                TokenKind::Command(")".into()),
                TokenKind::SimultaneousOpen,
                TokenKind::SimultaneousClose,
                TokenKind::Command("\\".into()),
            ]
        );
    }

    #[test]
    fn test_comments_strings_and_scheme() {
        assert_eq!(
            kinds("% line\n%{ block\n %} \"a \\\"b\\\"\" #'(1 . 2) #4", LexMode::Note),
            vec![
                TokenKind::Str("a \"b\"".into()),
                TokenKind::Scheme("'(1 . 2)".into()),
                TokenKind::Scheme("4".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let mut lexer = Lexer::new("c4\n  d");
        lexer.next_token(LexMode::Note).unwrap();
        lexer.next_token(LexMode::Note).unwrap();
        let d = lexer.next_token(LexMode::Note).unwrap();
        assert_eq!((d.line, d.column), (2, 3));
    }

    #[test]
    fn test_lyric_mode() {
        assert_eq!(
            kinds("{ Hal -- le __ lu4. _ \"two words\" 8 }", LexMode::Lyric),
            vec![
                TokenKind::LBrace,
                TokenKind::Syllable("Hal".into()),
                TokenKind::Syllable("--".into()),
                TokenKind::Syllable("le".into()),
                TokenKind::Syllable("__".into()),
                TokenKind::Syllable("lu".into()),
                TokenKind::Syllable("_".into()),
                TokenKind::Str("two words".into()),
                TokenKind::Number(8),
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_skip_expression() {
        let src = "\\relative c' { c << d >> \"}\" } rest";
        let mut lexer = Lexer::new(src);
        let span = lexer.skip_expression().unwrap();
        assert_eq!(&src[span.start..span.end], "\\relative c' { c << d >> \"}\" }");

        let mut lexer = Lexer::new("{ c d");
        assert!(lexer.skip_expression().is_err());
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("c4 $");
        lexer.next_token(LexMode::Note).unwrap();
        lexer.next_token(LexMode::Note).unwrap();
        let err = lexer.next_token(LexMode::Note).unwrap_err();
        assert_eq!((err.line, err.column), (1, 4));
    }
}

use std::fmt;

use log::trace;

/// Source position of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Default for Location {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Variable,
    TerminalsSequence,
    Colon,
    Semicolon,
    Bar,
    EndOfFile,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self {
            TokenKind::Variable => "variable",
            TokenKind::TerminalsSequence => "terminals",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Bar => "'|'",
            TokenKind::EndOfFile => "end of file",
        };
        write!(f, "{}", what)
    }
}

/// A token over the grammar source. `text` is the raw slice: for a
/// `TerminalsSequence` it still contains backslash escapes, which the
/// grammar parser expands.
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub location: Location,
}

impl<'a> Token<'a> {
    fn end_of_file(location: Location) -> Self {
        Self {
            kind: TokenKind::EndOfFile,
            text: "",
            location,
        }
    }
}

/// An accumulated lex or parse error with its source position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn new(location: Location, message: String) -> Self {
        Self { location, message }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: error: {}", self.location, self.message)
    }
}

const LOOKAHEAD: usize = 2;

/// Two-token lookahead over a grammar source. Lexical errors are recorded
/// as diagnostics and lexing continues; the parser fails the whole phase
/// once the source has been consumed.
pub trait TokenStream<'a> {
    fn peek(&mut self, index: usize) -> TokenKind;
    fn grab(&mut self) -> Token<'a>;
    fn advance(&mut self);
    fn diagnostics(&mut self) -> &mut Vec<Diagnostic>;

    fn expect(&mut self, expected: TokenKind) -> bool {
        if self.peek(0) != expected {
            return false;
        }
        self.advance();
        true
    }

    fn skip_to_next_semicolon(&mut self) {
        let mut kind = self.peek(0);
        while kind != TokenKind::EndOfFile && kind != TokenKind::Semicolon {
            self.advance();
            kind = self.peek(0);
        }
    }
}

// Shared cursor and ring buffer for both surface lexers.
#[derive(Debug)]
struct Scanner<'a> {
    source: &'a str,
    offset: usize,
    location: Location,
    buffer: [Token<'a>; LOOKAHEAD],
    start: usize,
    count: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            location: Location::default(),
            buffer: [Token::end_of_file(Location::default()); LOOKAHEAD],
            start: 0,
            count: 0,
            diagnostics: Vec::new(),
        }
    }

    fn at(&self) -> Option<u8> {
        self.source.as_bytes().get(self.offset).copied()
    }

    fn at_ahead(&self, n: usize) -> Option<u8> {
        self.source.as_bytes().get(self.offset + n).copied()
    }

    fn bump(&mut self) {
        if let Some(byte) = self.at() {
            self.offset += 1;
            self.location.column += 1;
            if byte == b'\n' {
                self.location.line += 1;
                self.location.column = 1;
            }
        }
    }

    fn error(&mut self, location: Location, message: String) {
        self.diagnostics.push(Diagnostic::new(location, message));
    }

    fn push_token(&mut self, token: Token<'a>) {
        trace!("token {:?} {:?} at {}", token.kind, token.text, token.location);
        debug_assert!(self.count < LOOKAHEAD);
        let index = (self.start + self.count) % LOOKAHEAD;
        self.buffer[index] = token;
        self.count += 1;
    }

    fn grab(&self) -> Token<'a> {
        debug_assert!(self.count > 0);
        self.buffer[self.start]
    }

    fn advance(&mut self) {
        debug_assert!(self.count > 0);
        self.start = (self.start + 1) % LOOKAHEAD;
        self.count -= 1;
    }
}

fn is_escapable(byte: u8) -> bool {
    byte.is_ascii_uppercase()
        || byte == b':'
        || byte == b';'
        || byte == b'|'
        || byte == b' '
        || byte == b'\\'
}

fn is_sequence_boundary(byte: u8) -> bool {
    byte.is_ascii_uppercase()
        || byte.is_ascii_whitespace()
        || byte == b':'
        || byte == b';'
        || byte == b'|'
}

/// Lexer for the custom grammar surface (uppercase variables, bare
/// terminal sequences with backslash escapes, `:` `;` `|` punctuation).
#[derive(Debug)]
pub struct CustomLexer<'a> {
    scanner: Scanner<'a>,
}

impl<'a> CustomLexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            scanner: Scanner::new(source),
        }
    }

    fn buffer_token(&mut self) {
        let s = &mut self.scanner;
        loop {
            while s.at().map_or(false, |b| b.is_ascii_whitespace()) {
                s.bump();
            }

            let location = s.location;
            let start = s.offset;

            let byte = match s.at() {
                None => {
                    s.push_token(Token::end_of_file(location));
                    return;
                }
                Some(byte) => byte,
            };

            let kind = match byte {
                b':' => {
                    s.bump();
                    TokenKind::Colon
                }
                b';' => {
                    s.bump();
                    TokenKind::Semicolon
                }
                b'|' => {
                    s.bump();
                    TokenKind::Bar
                }
                _ if byte.is_ascii_uppercase() => {
                    s.bump();
                    while s.at().map_or(false, |b| {
                        b.is_ascii_alphanumeric() || b == b'\'' || b == b'-' || b == b'_'
                    }) {
                        s.bump();
                    }
                    TokenKind::Variable
                }
                _ if byte.is_ascii_graphic() => {
                    while let Some(b) = s.at() {
                        if is_sequence_boundary(b) {
                            break;
                        }
                        if b == b'\\' {
                            let escape_location = s.location;
                            s.bump();
                            match s.at() {
                                None => {
                                    s.error(
                                        escape_location,
                                        "trailing backslash".to_string(),
                                    );
                                    break;
                                }
                                Some(escaped) if is_escapable(escaped) => s.bump(),
                                Some(escaped) => {
                                    s.error(
                                        escape_location,
                                        format!(
                                            "invalid escape sequence '\\{}'",
                                            escaped as char
                                        ),
                                    );
                                    s.bump();
                                }
                            }
                        } else if !b.is_ascii_graphic() {
                            s.error(
                                s.location,
                                format!("non-printable byte 0x{:02x}", b),
                            );
                            s.bump();
                        } else {
                            s.bump();
                        }
                    }
                    TokenKind::TerminalsSequence
                }
                _ => {
                    // Not printable, not whitespace: report and rescan.
                    s.error(location, format!("non-printable byte 0x{:02x}", byte));
                    s.bump();
                    continue;
                }
            };

            let text = &s.source[start..s.offset];
            s.push_token(Token {
                kind,
                text,
                location,
            });
            return;
        }
    }
}

impl<'a> TokenStream<'a> for CustomLexer<'a> {
    fn peek(&mut self, index: usize) -> TokenKind {
        debug_assert!(index < LOOKAHEAD);
        while index >= self.scanner.count {
            self.buffer_token();
        }
        self.scanner.buffer[(self.scanner.start + index) % LOOKAHEAD].kind
    }

    fn grab(&mut self) -> Token<'a> {
        if self.scanner.count == 0 {
            self.buffer_token();
        }
        self.scanner.grab()
    }

    fn advance(&mut self) {
        if self.scanner.count == 0 {
            self.buffer_token();
        }
        self.scanner.advance();
    }

    fn diagnostics(&mut self) -> &mut Vec<Diagnostic> {
        &mut self.scanner.diagnostics
    }
}

/// Lexer for the BNF grammar surface: `<name>` variables, `"…"` terminal
/// strings, `::=`, `|`, and a significant newline ending a production.
#[derive(Debug)]
pub struct BnfLexer<'a> {
    scanner: Scanner<'a>,
    last_kind: Option<TokenKind>,
}

impl<'a> BnfLexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            scanner: Scanner::new(source),
            last_kind: None,
        }
    }

    // A newline terminates a production, but only where a production can
    // end: never at start of input, after `::=`, after `|`, or right
    // after another terminator. That lets alternatives continue across
    // lines and makes blank lines harmless.
    fn newline_is_significant(&self) -> bool {
        match self.last_kind {
            None | Some(TokenKind::Colon) | Some(TokenKind::Bar) | Some(TokenKind::Semicolon) => {
                false
            }
            Some(_) => true,
        }
    }

    fn buffer_token(&mut self) {
        loop {
            {
                let s = &mut self.scanner;
                while s.at().map_or(false, |b| b != b'\n' && b.is_ascii_whitespace()) {
                    s.bump();
                }
            }

            if self.scanner.at() == Some(b'\n') {
                let location = self.scanner.location;
                let start = self.scanner.offset;
                self.scanner.bump();
                if self.newline_is_significant() {
                    let text = &self.scanner.source[start..start + 1];
                    self.emit(Token {
                        kind: TokenKind::Semicolon,
                        text,
                        location,
                    });
                    return;
                }
                continue;
            }

            let location = self.scanner.location;

            let byte = match self.scanner.at() {
                None => {
                    self.emit(Token::end_of_file(location));
                    return;
                }
                Some(byte) => byte,
            };

            match byte {
                b'<' => {
                    self.scanner.bump();
                    let start = self.scanner.offset;
                    while self
                        .scanner
                        .at()
                        .map_or(false, |b| b != b'>' && b != b'\n')
                    {
                        self.scanner.bump();
                    }
                    let end = self.scanner.offset;
                    if self.scanner.at() == Some(b'>') {
                        self.scanner.bump();
                    } else {
                        self.scanner
                            .error(location, "unterminated variable name".to_string());
                    }
                    if start == end {
                        self.scanner
                            .error(location, "empty variable name".to_string());
                    }
                    let text = &self.scanner.source[start..end];
                    self.emit(Token {
                        kind: TokenKind::Variable,
                        text,
                        location,
                    });
                    return;
                }
                b'"' => {
                    self.scanner.bump();
                    let start = self.scanner.offset;
                    loop {
                        match self.scanner.at() {
                            None | Some(b'\n') => {
                                self.scanner.error(
                                    location,
                                    "unterminated string literal".to_string(),
                                );
                                break;
                            }
                            Some(b'"') => break,
                            Some(b'\\') => {
                                let escape_location = self.scanner.location;
                                self.scanner.bump();
                                match self.scanner.at() {
                                    Some(b'"') | Some(b'\\') => self.scanner.bump(),
                                    Some(escaped) => {
                                        self.scanner.error(
                                            escape_location,
                                            format!(
                                                "invalid escape sequence '\\{}'",
                                                escaped as char
                                            ),
                                        );
                                        self.scanner.bump();
                                    }
                                    None => {
                                        self.scanner.error(
                                            escape_location,
                                            "trailing backslash".to_string(),
                                        );
                                        break;
                                    }
                                }
                            }
                            Some(b) if !b.is_ascii_graphic() && b != b' ' => {
                                let bad = self.scanner.location;
                                self.scanner
                                    .error(bad, format!("non-printable byte 0x{:02x}", b));
                                self.scanner.bump();
                            }
                            Some(_) => self.scanner.bump(),
                        }
                    }
                    let end = self.scanner.offset;
                    if self.scanner.at() == Some(b'"') {
                        self.scanner.bump();
                    }
                    let text = &self.scanner.source[start..end];
                    self.emit(Token {
                        kind: TokenKind::TerminalsSequence,
                        text,
                        location,
                    });
                    return;
                }
                b':' => {
                    let start = self.scanner.offset;
                    self.scanner.bump();
                    if self.scanner.at() == Some(b':') && self.scanner.at_ahead(1) == Some(b'=') {
                        self.scanner.bump();
                        self.scanner.bump();
                    } else {
                        self.scanner
                            .error(location, "expected '::=' after variable".to_string());
                        while self.scanner.at() == Some(b':') || self.scanner.at() == Some(b'=') {
                            self.scanner.bump();
                        }
                    }
                    let text = &self.scanner.source[start..self.scanner.offset];
                    self.emit(Token {
                        kind: TokenKind::Colon,
                        text,
                        location,
                    });
                    return;
                }
                b'|' => {
                    let start = self.scanner.offset;
                    self.scanner.bump();
                    let text = &self.scanner.source[start..self.scanner.offset];
                    self.emit(Token {
                        kind: TokenKind::Bar,
                        text,
                        location,
                    });
                    return;
                }
                _ if byte.is_ascii_graphic() => {
                    self.scanner.error(
                        location,
                        format!("unexpected character '{}'", byte as char),
                    );
                    self.scanner.bump();
                    continue;
                }
                _ => {
                    self.scanner
                        .error(location, format!("non-printable byte 0x{:02x}", byte));
                    self.scanner.bump();
                    continue;
                }
            }
        }
    }

    fn emit(&mut self, token: Token<'a>) {
        self.last_kind = Some(token.kind);
        self.scanner.push_token(token);
    }
}

impl<'a> TokenStream<'a> for BnfLexer<'a> {
    fn peek(&mut self, index: usize) -> TokenKind {
        debug_assert!(index < LOOKAHEAD);
        while index >= self.scanner.count {
            self.buffer_token();
        }
        self.scanner.buffer[(self.scanner.start + index) % LOOKAHEAD].kind
    }

    fn grab(&mut self) -> Token<'a> {
        if self.scanner.count == 0 {
            self.buffer_token();
        }
        self.scanner.grab()
    }

    fn advance(&mut self) {
        if self.scanner.count == 0 {
            self.buffer_token();
        }
        self.scanner.advance();
    }

    fn diagnostics(&mut self) -> &mut Vec<Diagnostic> {
        &mut self.scanner.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<'a, T: TokenStream<'a>>(mut lexer: T) -> (Vec<(TokenKind, String)>, usize) {
        let mut tokens = vec![];
        loop {
            let kind = lexer.peek(0);
            let token = lexer.grab();
            if kind == TokenKind::EndOfFile {
                break;
            }
            tokens.push((token.kind, token.text.to_string()));
            lexer.advance();
        }
        let errors = lexer.diagnostics().len();
        (tokens, errors)
    }

    #[test]
    fn custom_tokens_and_positions() {
        let mut lexer = CustomLexer::new("S : ab | Expr ;");
        assert_eq!(lexer.peek(0), TokenKind::Variable);
        assert_eq!(lexer.peek(1), TokenKind::Colon);
        let token = lexer.grab();
        assert_eq!(token.text, "S");
        assert_eq!(token.location, Location { line: 1, column: 1 });
        lexer.advance();
        lexer.advance();
        let token = lexer.grab();
        assert_eq!(token.kind, TokenKind::TerminalsSequence);
        assert_eq!(token.text, "ab");
        assert_eq!(token.location, Location { line: 1, column: 5 });
    }

    #[test]
    fn custom_sequence_stops_at_uppercase_and_punctuation() {
        let (tokens, errors) = collect(CustomLexer::new("S : aBc|d;"));
        assert_eq!(errors, 0);
        let kinds: Vec<_> = tokens.iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Variable,
                TokenKind::Colon,
                TokenKind::TerminalsSequence,
                TokenKind::Variable,
                TokenKind::Bar,
                TokenKind::TerminalsSequence,
                TokenKind::Semicolon,
            ]
        );
        assert_eq!(tokens[2].1, "a");
        assert_eq!(tokens[3].1, "Bc");
        assert_eq!(tokens[5].1, "d");
    }

    #[test]
    fn custom_escapes_stay_in_one_sequence() {
        let (tokens, errors) = collect(CustomLexer::new(r"S : a\:b\\c\ d"));
        assert_eq!(errors, 0);
        assert_eq!(tokens[2].0, TokenKind::TerminalsSequence);
        assert_eq!(tokens[2].1, r"a\:b\\c\ d");
    }

    #[test]
    fn custom_invalid_escape_is_reported() {
        let mut lexer = CustomLexer::new(r"S : a\qb");
        while lexer.peek(0) != TokenKind::EndOfFile {
            lexer.advance();
        }
        let diagnostics = lexer.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("invalid escape"));
    }

    #[test]
    fn custom_trailing_backslash_is_reported() {
        let mut lexer = CustomLexer::new("S : a\\");
        while lexer.peek(0) != TokenKind::EndOfFile {
            lexer.advance();
        }
        assert_eq!(lexer.diagnostics().len(), 1);
        assert!(lexer.diagnostics()[0].message.contains("trailing backslash"));
    }

    #[test]
    fn eof_repeats_on_further_peeks() {
        let mut lexer = CustomLexer::new("  ");
        assert_eq!(lexer.peek(0), TokenKind::EndOfFile);
        assert_eq!(lexer.peek(1), TokenKind::EndOfFile);
        assert_eq!(lexer.peek(0), TokenKind::EndOfFile);
    }

    #[test]
    fn line_numbers_advance() {
        let mut lexer = CustomLexer::new("S : a\n  | b ;");
        for _ in 0..3 {
            lexer.advance();
        }
        let token = lexer.grab();
        assert_eq!(token.kind, TokenKind::Bar);
        assert_eq!(token.location, Location { line: 2, column: 3 });
    }

    #[test]
    fn bnf_tokens() {
        let (tokens, errors) = collect(BnfLexer::new("<expr> ::= \"ab\" | <expr>\n"));
        assert_eq!(errors, 0);
        let kinds: Vec<_> = tokens.iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Variable,
                TokenKind::Colon,
                TokenKind::TerminalsSequence,
                TokenKind::Bar,
                TokenKind::Variable,
                TokenKind::Semicolon,
            ]
        );
        assert_eq!(tokens[0].1, "expr");
        assert_eq!(tokens[2].1, "ab");
    }

    #[test]
    fn bnf_blank_lines_do_not_pile_up_terminators() {
        let (tokens, errors) = collect(BnfLexer::new("<s> ::= \"a\"\n\n\n<t> ::= \"b\"\n"));
        assert_eq!(errors, 0);
        let semicolons = tokens
            .iter()
            .filter(|t| t.0 == TokenKind::Semicolon)
            .count();
        assert_eq!(semicolons, 2);
    }

    #[test]
    fn bnf_alternatives_continue_past_newline_after_bar() {
        let (tokens, errors) = collect(BnfLexer::new("<s> ::= \"a\" |\n \"b\"\n"));
        assert_eq!(errors, 0);
        let kinds: Vec<_> = tokens.iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Variable,
                TokenKind::Colon,
                TokenKind::TerminalsSequence,
                TokenKind::Bar,
                TokenKind::TerminalsSequence,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn bnf_unterminated_string_is_reported() {
        let mut lexer = BnfLexer::new("<s> ::= \"ab\n");
        while lexer.peek(0) != TokenKind::EndOfFile {
            lexer.advance();
        }
        assert!(lexer
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("unterminated string")));
    }
}

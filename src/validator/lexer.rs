//! Tokenizer for extension script sources.
//!
//! Produces a flat token stream for the parser. Lexical problems (unterminated
//! strings, comments, templates or regex literals) are recorded as issues and
//! lexing continues, so that a single typo does not hide the rest of the
//! script's diagnostics.

use super::{IssueKind, Span, ValidationIssue};

/// Punctuators, longest first so that greedy matching picks `>>>=` over `>`.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

/// Keywords after which a `/` starts a regular expression literal.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword; the parser decides which.
    Ident(String),
    Number,
    Str(String),
    /// Template literal; each `${...}` substitution is lexed separately.
    Template(Vec<Vec<Token>>),
    Regex,
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line terminator precedes this token (drives semicolon insertion).
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(id) if id == name)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    issues: &'a mut Vec<ValidationIssue>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, issues: &'a mut Vec<ValidationIssue>) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            issues,
        }
    }

    /// Lex the entire input, always terminating with an `Eof` token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = self.lex_until(None);
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.span(),
            newline_before: true,
        });
        tokens
    }

    /// Lex tokens until end of input or, when `close_brace` is set, until the
    /// `}` that balances the opening of a template substitution.
    fn lex_until(&mut self, close_brace: Option<Span>) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut depth = 0usize;
        let mut newline_before = false;

        loop {
            newline_before |= self.skip_trivia();
            let Some(c) = self.peek(0) else {
                if let Some(span) = close_brace {
                    self.issue(span, "unterminated template substitution");
                }
                return tokens;
            };
            let span = self.span();

            if close_brace.is_some() {
                if c == '{' {
                    depth += 1;
                } else if c == '}' {
                    if depth == 0 {
                        self.bump();
                        return tokens;
                    }
                    depth -= 1;
                }
            }

            let kind = if is_ident_start(c) {
                TokenKind::Ident(self.lex_ident())
            } else if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit()))
            {
                self.lex_number();
                TokenKind::Number
            } else if c == '"' || c == '\'' {
                TokenKind::Str(self.lex_string(c, span))
            } else if c == '`' {
                TokenKind::Template(self.lex_template(span))
            } else if c == '/' && regex_allowed(tokens.last()) {
                self.lex_regex(span);
                TokenKind::Regex
            } else if let Some(punct) = self.match_punct() {
                TokenKind::Punct(punct)
            } else {
                self.bump();
                self.issue(span, &format!("unexpected character '{c}'"));
                continue;
            };

            tokens.push(Token {
                kind,
                span,
                newline_before,
            });
            newline_before = false;
        }
    }

    /// Skip whitespace and comments; returns whether a line break was seen.
    fn skip_trivia(&mut self) -> bool {
        let mut saw_newline = false;
        while let Some(c) = self.peek(0) {
            match c {
                '\n' | '\r' | '\u{2028}' | '\u{2029}' => {
                    saw_newline = true;
                    self.bump();
                }
                c if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                '/' if self.peek(1) == Some('/') => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' || c == '\r' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek(1) == Some('*') => {
                    let span = self.span();
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.peek(0) {
                        if c == '*' && self.peek(1) == Some('/') {
                            self.bump();
                            self.bump();
                            closed = true;
                            break;
                        }
                        if c == '\n' {
                            saw_newline = true;
                        }
                        self.bump();
                    }
                    if !closed {
                        self.issue(span, "unterminated block comment");
                    }
                }
                _ => break,
            }
        }
        saw_newline
    }

    fn lex_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek(0) {
            if is_ident_part(c) {
                ident.push(c);
                self.bump();
            } else if c == '\\' && self.peek(1) == Some('u') {
                // Unicode escapes in identifiers are kept verbatim.
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn lex_number(&mut self) {
        if self.peek(0) == Some('0')
            && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        {
            self.bump();
            self.bump();
            while self
                .peek(0)
                .is_some_and(|c| c.is_ascii_hexdigit() || c == '_')
            {
                self.bump();
            }
        } else {
            while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.bump();
            }
            if self.peek(0) == Some('.') {
                self.bump();
                while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                    self.bump();
                }
            }
            if matches!(self.peek(0), Some('e' | 'E')) {
                let sign = usize::from(matches!(self.peek(1), Some('+' | '-')));
                if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                    for _ in 0..sign {
                        self.bump();
                    }
                    while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                        self.bump();
                    }
                }
            }
        }
        if self.peek(0) == Some('n') {
            self.bump();
        }
    }

    fn lex_string(&mut self, quote: char, span: Span) -> String {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n' | '\r') => {
                    self.issue(span, "unterminated string literal");
                    return value;
                }
                Some('\\') => {
                    self.bump();
                    if let Some(escaped) = self.peek(0) {
                        value.push(unescape(escaped));
                        self.bump();
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    return value;
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn lex_template(&mut self, span: Span) -> Vec<Vec<Token>> {
        self.bump();
        let mut substitutions = Vec::new();
        loop {
            match self.peek(0) {
                None => {
                    self.issue(span, "unterminated template literal");
                    return substitutions;
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('`') => {
                    self.bump();
                    return substitutions;
                }
                Some('$') if self.peek(1) == Some('{') => {
                    let inner_span = self.span();
                    self.bump();
                    self.bump();
                    let mut inner = self.lex_until(Some(inner_span));
                    inner.push(Token {
                        kind: TokenKind::Eof,
                        span: self.span(),
                        newline_before: false,
                    });
                    substitutions.push(inner);
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn lex_regex(&mut self, span: Span) {
        self.bump();
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some('\n' | '\r') => {
                    self.issue(span, "unterminated regular expression literal");
                    return;
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('[') => {
                    in_class = true;
                    self.bump();
                }
                Some(']') => {
                    in_class = false;
                    self.bump();
                }
                Some('/') if !in_class => {
                    self.bump();
                    while self.peek(0).is_some_and(is_ident_part) {
                        self.bump();
                    }
                    return;
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn match_punct(&mut self) -> Option<&'static str> {
        for punct in PUNCTUATORS {
            let len = punct.chars().count();
            let matches = punct
                .chars()
                .enumerate()
                .all(|(offset, expected)| self.peek(offset) == Some(expected));
            if !matches {
                continue;
            }
            // `a?.5:b` is a conditional, not optional chaining.
            if *punct == "?." && self.peek(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in 0..len {
                self.bump();
            }
            return Some(punct);
        }
        None
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek(0) {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    const fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    fn issue(&mut self, span: Span, message: &str) {
        self.issues
            .push(ValidationIssue::new(IssueKind::Syntax, message, span));
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}'
}

const fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

fn regex_allowed(previous: Option<&Token>) -> bool {
    match previous.map(|token| &token.kind) {
        None => true,
        Some(TokenKind::Punct(p)) => !matches!(*p, ")" | "]" | "}" | "++" | "--"),
        Some(TokenKind::Ident(id)) => REGEX_PRECEDING_KEYWORDS.contains(&id.as_str()),
        Some(_) => false,
    }
}

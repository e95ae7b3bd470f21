use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

/// The largest integer constant representable on the VM's word size.
const MAX_INT_CONST: u32 = 32767;

pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the whole source, failing on the first lexical error.
    ///
    /// The returned stream always ends with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Spanned<Lexeme>>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned<Lexeme>, Diagnostic> {
        self.skip_whitespace_and_comments()?;

        if self.pos >= self.source.len() {
            return Ok(self.make_token(Lexeme::Eof, self.pos, self.pos));
        }

        let start = self.pos;
        let ch = self.source[self.pos];

        if is_ident_start(ch) {
            return Ok(self.scan_ident_or_keyword());
        }

        if ch.is_ascii_digit() {
            return self.scan_number();
        }

        if ch == b'"' {
            return self.scan_string();
        }

        if let Some(sym) = Lexeme::from_symbol(ch) {
            self.pos += 1;
            return Ok(self.make_token(sym, start, self.pos));
        }

        Err(Diagnostic::error(
            format!("unexpected character '{}'", ch as char),
            Span::new(start as u32, start as u32 + 1),
        ))
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            // Line comments: //
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'/'
            {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            // Block comments: /* ... */ (includes doc comments /** ... */)
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'*'
            {
                let start = self.pos;
                self.pos += 2;
                loop {
                    if self.pos + 1 >= self.source.len() {
                        return Err(Diagnostic::error(
                            "unterminated block comment".to_string(),
                            Span::new(start as u32, self.source.len() as u32),
                        )
                        .with_help("close the comment with '*/'".to_string()));
                    }
                    if self.source[self.pos] == b'*' && self.source[self.pos + 1] == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }

            return Ok(());
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        // is_ident_start/is_ident_continue only accept ASCII, so this is UTF-8 safe
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let lexeme = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(lexeme, start, self.pos)
    }

    fn scan_number(&mut self) -> Result<Spanned<Lexeme>, Diagnostic> {
        let start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let span = Span::new(start as u32, self.pos as u32);
        let value: u32 = text.parse().map_err(|_| {
            Diagnostic::error(format!("integer constant '{}' is too large", text), span)
        })?;
        if value > MAX_INT_CONST {
            return Err(Diagnostic::error(
                format!("integer constant '{}' is out of range", text),
                span,
            )
            .with_note(format!("the largest integer constant is {}", MAX_INT_CONST)));
        }
        Ok(Spanned::new(Lexeme::IntConst(value as u16), span))
    }

    fn scan_string(&mut self) -> Result<Spanned<Lexeme>, Diagnostic> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let content_start = self.pos;
        loop {
            if self.pos >= self.source.len() || self.source[self.pos] == b'\n' {
                return Err(Diagnostic::error(
                    "unterminated string constant".to_string(),
                    Span::new(start as u32, self.pos as u32),
                )
                .with_help("close the string with '\"' on the same line".to_string()));
            }
            if self.source[self.pos] == b'"' {
                break;
            }
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.source[content_start..self.pos]).into_owned();
        self.pos += 1; // closing quote
        Ok(self.make_token(Lexeme::StrConst(text), start, self.pos))
    }

    fn make_token(&self, lexeme: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(lexeme, Span::new(start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Byte-walking lexer. All errors are non-fatal: the returned stream is
/// always complete and ends with exactly one `Eof` token.
pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    line: u32,
    line_start: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            line_start: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(TokenKind::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if ch == b'\n' {
                let tok = self.make_token(TokenKind::Newline, start, start + 1);
                self.bump();
                return tok;
            }

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'"' || ch == b'\'' || ch == b'`' {
                return self.scan_string(ch);
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol recorded an error and advanced; try again
        }
    }

    /// Advance one byte, tracking line starts.
    fn bump(&mut self) {
        if self.pos < self.source.len() {
            if self.source[self.pos] == b'\n' {
                self.line += 1;
                self.line_start = self.pos + 1;
            }
            self.pos += 1;
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            // Space, tab, and carriage return are discarded; '\n' is a token.
            while self.pos < self.source.len()
                && matches!(self.source[self.pos], b' ' | b'\t' | b'\r')
            {
                self.pos += 1;
            }

            if self.pos + 1 < self.source.len() && self.source[self.pos] == b'/' {
                match self.source[self.pos + 1] {
                    b'/' => {
                        while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                            self.pos += 1;
                        }
                        continue;
                    }
                    b'*' => {
                        self.skip_block_comment();
                        continue;
                    }
                    _ => {}
                }
            }

            break;
        }
    }

    /// Block comments nest. An unterminated comment reports its starting line.
    fn skip_block_comment(&mut self) {
        let start = self.pos;
        let start_span = self.span_at(start, start + 2);
        self.pos += 2;
        let mut depth = 1u32;
        while self.pos < self.source.len() && depth > 0 {
            if self.pos + 1 < self.source.len() {
                if self.source[self.pos] == b'/' && self.source[self.pos + 1] == b'*' {
                    depth += 1;
                    self.bump();
                    self.bump();
                    continue;
                }
                if self.source[self.pos] == b'*' && self.source[self.pos + 1] == b'/' {
                    depth -= 1;
                    self.bump();
                    self.bump();
                    continue;
                }
            }
            self.bump();
        }
        if depth > 0 {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("unterminated block comment starting on line {}", start_span.line),
                    start_span,
                )
                .with_help("close the comment with '*/'".to_string()),
            );
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        if text == "embed" {
            return self.scan_embed_block(start);
        }
        let kind =
            TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        self.make_token(kind, start, self.pos)
    }

    /// Scan an embedded foreign-code block: `embed <lang> ... endembed`.
    /// The body between the language word and `endembed` is captured raw.
    fn scan_embed_block(&mut self, start: usize) -> Token {
        let start_span = self.span_at(start, start + 5);
        // Skip horizontal whitespace before the language word
        while self.pos < self.source.len()
            && matches!(self.source[self.pos], b' ' | b'\t' | b'\r')
        {
            self.pos += 1;
        }

        let lang_start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let lang = std::str::from_utf8(&self.source[lang_start..self.pos])
            .unwrap()
            .to_string();
        if lang.is_empty() {
            self.diagnostics.push(
                Diagnostic::error(
                    "expected language name after 'embed'".to_string(),
                    start_span,
                )
                .with_help("embedded blocks look like `embed js ... endembed`".to_string()),
            );
        }

        let body_start = self.pos;
        let mut body_end = None;
        while self.pos < self.source.len() {
            if self.source[self.pos..].starts_with(b"endembed")
                && !is_ident_continue(*self.source.get(self.pos + 8).unwrap_or(&b' '))
                && (self.pos == 0 || !is_ident_continue(self.source[self.pos - 1]))
            {
                body_end = Some(self.pos);
                for _ in 0.."endembed".len() {
                    self.bump();
                }
                break;
            }
            self.bump();
        }

        let end = match body_end {
            Some(e) => e,
            None => {
                self.diagnostics.push(
                    Diagnostic::error(
                        "unterminated embedded block: missing 'endembed'".to_string(),
                        start_span,
                    )
                    .with_help("every `embed <lang>` block must end with `endembed`".to_string()),
                );
                self.pos
            }
        };
        let body = std::str::from_utf8(&self.source[body_start..end])
            .unwrap()
            .trim()
            .to_string();

        Token::new(
            TokenKind::EmbedBlock { lang, body },
            Span::new(
                start as u32,
                self.pos as u32,
                start_span.line,
                start_span.column,
            ),
        )
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        // Hex integer
        if self.source[self.pos] == b'0'
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'))
            && self
                .peek_at(2)
                .is_some_and(|c| c.is_ascii_hexdigit())
        {
            self.pos += 2;
            let digits_start = self.pos;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.source[digits_start..self.pos]).unwrap();
            return match i64::from_str_radix(digits, 16) {
                Ok(n) => self.make_token(TokenKind::Int(n), start, self.pos),
                Err(_) => {
                    self.error_at(
                        format!("hex literal '0x{}' is too large", digits),
                        start,
                        self.pos,
                    );
                    self.make_token(TokenKind::Int(0), start, self.pos)
                }
            };
        }

        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }

        let mut is_float = false;

        // A fractional dot only counts when not followed by another dot,
        // so `0..10` stays two integers around a range operator.
        if self.pos < self.source.len()
            && self.source[self.pos] == b'.'
            && self.peek_at(1) != Some(b'.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }

        // Scientific notation with optional sign
        if self.pos < self.source.len()
            && matches!(self.source[self.pos], b'e' | b'E')
        {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += ahead;
                while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => self.make_token(TokenKind::Float(v), start, self.pos),
                Err(_) => {
                    self.error_at(format!("invalid float literal '{}'", text), start, self.pos);
                    self.make_token(TokenKind::Float(0.0), start, self.pos)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.make_token(TokenKind::Int(n), start, self.pos),
                Err(_) => {
                    self.error_at(
                        format!("integer literal '{}' is too large", text),
                        start,
                        self.pos,
                    );
                    self.make_token(TokenKind::Int(0), start, self.pos)
                }
            }
        }
    }

    /// String literals may be delimited by `"`, `'`, or a backtick; the
    /// closing quote must match the opening one.
    fn scan_string(&mut self, quote: u8) -> Token {
        let start = self.pos;
        let start_span = self.span_at(start, start + 1);
        self.bump(); // opening quote
        let mut value = String::new();
        let mut terminated = false;

        while self.pos < self.source.len() {
            let ch = self.source[self.pos];
            if ch == quote {
                self.bump();
                terminated = true;
                break;
            }
            if ch == b'\\' {
                self.bump();
                if self.pos >= self.source.len() {
                    break;
                }
                let esc = self.source[self.pos];
                match esc {
                    b'n' => value.push('\n'),
                    b't' => value.push('\t'),
                    b'r' => value.push('\r'),
                    b'\\' => value.push('\\'),
                    b'\'' => value.push('\''),
                    b'"' => value.push('"'),
                    b'0' => value.push('\0'),
                    b'x' => {
                        let hi = self.peek_at(1);
                        let lo = self.peek_at(2);
                        match (
                            hi.and_then(hex_val),
                            lo.and_then(hex_val),
                        ) {
                            (Some(h), Some(l)) => {
                                value.push((h * 16 + l) as char);
                                self.bump();
                                self.bump();
                            }
                            _ => {
                                self.error_at(
                                    "invalid '\\x' escape: expected two hex digits".to_string(),
                                    self.pos - 1,
                                    self.pos + 1,
                                );
                                value.push('x');
                            }
                        }
                    }
                    other => {
                        self.error_at(
                            format!("invalid escape sequence '\\{}'", other as char),
                            self.pos - 1,
                            self.pos + 1,
                        );
                        value.push(other as char);
                    }
                }
                self.bump();
                continue;
            }
            value.push(ch as char);
            self.bump();
        }

        let span = Span::new(
            start as u32,
            self.pos as u32,
            start_span.line,
            start_span.column,
        );
        if !terminated {
            self.diagnostics.push(Diagnostic::error(
                "unterminated string literal".to_string(),
                span,
            ));
        }
        Token::new(TokenKind::Str(value), span)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Token> {
        let ch = self.source[self.pos];
        self.pos += 1;

        // Greedy two-character forms first
        let two = |lexer: &Self| lexer.peek();
        let kind = match ch {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b'?' => TokenKind::Question,
            b'#' => TokenKind::Hash,
            b'@' => TokenKind::At,
            b'~' => TokenKind::Tilde,
            b'.' => {
                if two(self) == Some(b'.') {
                    self.pos += 1;
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            b'+' => match two(self) {
                Some(b'+') => {
                    self.pos += 1;
                    TokenKind::PlusPlus
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::PlusEq
                }
                _ => TokenKind::Plus,
            },
            b'-' => match two(self) {
                Some(b'-') => {
                    self.pos += 1;
                    TokenKind::MinusMinus
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::MinusEq
                }
                Some(b'>') => {
                    self.pos += 1;
                    TokenKind::Arrow
                }
                _ => TokenKind::Minus,
            },
            b'*' => match two(self) {
                Some(b'*') => {
                    self.pos += 1;
                    TokenKind::StarStar
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::StarEq
                }
                _ => TokenKind::Star,
            },
            b'/' => {
                if two(self) == Some(b'=') {
                    self.pos += 1;
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if two(self) == Some(b'=') {
                    self.pos += 1;
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            b'=' => match two(self) {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::EqEq
                }
                Some(b'>') => {
                    self.pos += 1;
                    TokenKind::FatArrow
                }
                _ => TokenKind::Assign,
            },
            b'!' => {
                if two(self) == Some(b'=') {
                    self.pos += 1;
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'<' => match two(self) {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::LtEq
                }
                Some(b'<') => {
                    self.pos += 1;
                    TokenKind::Shl
                }
                _ => TokenKind::Lt,
            },
            b'>' => match two(self) {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::GtEq
                }
                Some(b'>') => {
                    self.pos += 1;
                    TokenKind::Shr
                }
                _ => TokenKind::Gt,
            },
            b'&' => match two(self) {
                Some(b'&') => {
                    self.pos += 1;
                    TokenKind::AmpAmp
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::AmpEq
                }
                _ => TokenKind::Amp,
            },
            b'|' => match two(self) {
                Some(b'|') => {
                    self.pos += 1;
                    TokenKind::PipePipe
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::PipeEq
                }
                _ => TokenKind::Pipe,
            },
            b'^' => {
                if two(self) == Some(b'=') {
                    self.pos += 1;
                    TokenKind::CaretEq
                } else {
                    TokenKind::Caret
                }
            }
            _ => {
                self.error_at(
                    format!("unexpected character '{}' (U+{:04X})", ch as char, ch),
                    start,
                    self.pos,
                );
                return None;
            }
        };

        Some(self.make_token(kind, start, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn span_at(&self, start: usize, end: usize) -> Span {
        let column = (start.saturating_sub(self.line_start) + 1) as u32;
        Span::new(start as u32, end as u32, self.line, column)
    }

    fn make_token(&self, kind: TokenKind, start: usize, end: usize) -> Token {
        Token::new(kind, self.span_at(start, end))
    }

    fn error_at(&mut self, message: String, start: usize, end: usize) {
        let span = self.span_at(start, end);
        self.diagnostics.push(Diagnostic::error(message, span));
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_val(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty(), "unexpected errors: {:?}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn lex_with_errors(source: &str) -> (Vec<TokenKind>, Vec<Diagnostic>) {
        let (tokens, diags) = Lexer::new(source).tokenize();
        (tokens.into_iter().map(|t| t.kind).collect(), diags)
    }

    #[test]
    fn test_keywords() {
        let tokens = lex("var const function if elif else while for in return");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Var,
                TokenKind::Const,
                TokenKind::Function,
                TokenKind::If,
                TokenKind::Elif,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::For,
                TokenKind::In,
                TokenKind::Return,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_reserved_keywords() {
        let tokens = lex("class try async yield ui");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Class,
                TokenKind::Try,
                TokenKind::Async,
                TokenKind::Yield,
                TokenKind::Ui,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newline_tokens() {
        let tokens = lex("var x\nvar y");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Var,
                TokenKind::Ident("x".into()),
                TokenKind::Newline,
                TokenKind::Var,
                TokenKind::Ident("y".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        let tokens = lex("== != <= >= && || << >> += -= *= /= %= ** ++ -- -> => ..");
        assert_eq!(
            tokens,
            vec![
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::PercentEq,
                TokenKind::StarStar,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::DotDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("0 42 0xff 3.25 1e3 2.5e-2");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Int(0),
                TokenKind::Int(42),
                TokenKind::Int(255),
                TokenKind::Float(3.25),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.025),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_is_not_a_float() {
        let tokens = lex("0..10");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Int(0),
                TokenKind::DotDot,
                TokenKind::Int(10),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = lex(r#""a\tb" 'c' `back`"#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Str("a\tb".into()),
                TokenKind::Str("c".into()),
                TokenKind::Str("back".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hex_escape() {
        let tokens = lex(r#""\x41\x42""#);
        assert_eq!(
            tokens,
            vec![TokenKind::Str("AB".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_nested_block_comment() {
        let tokens = lex("1 /* a /* b */ c */ 2");
        assert_eq!(
            tokens,
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_comment() {
        let tokens = lex("1 // comment\n2");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_and_column() {
        let (tokens, diags) = Lexer::new("var x\n  var y").tokenize();
        assert!(diags.is_empty());
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[0].span.column, 1);
        assert_eq!(tokens[1].span.line, 1);
        assert_eq!(tokens[1].span.column, 5);
        // after the newline: 'var' indented by two spaces on line 2
        assert_eq!(tokens[3].span.line, 2);
        assert_eq!(tokens[3].span.column, 3);
    }

    #[test]
    fn test_embed_block() {
        let tokens = lex("embed js console.log(1) endembed");
        assert_eq!(
            tokens,
            vec![
                TokenKind::EmbedBlock {
                    lang: "js".into(),
                    body: "console.log(1)".into(),
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_error_unknown_byte_is_nonfatal() {
        let (tokens, diags) = lex_with_errors("var $ x");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unexpected character '$'"));
        // Lexing continued past the error
        assert_eq!(
            tokens,
            vec![
                TokenKind::Var,
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_error_unterminated_string_still_emits_token() {
        let (tokens, diags) = lex_with_errors("\"abc");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unterminated string"));
        assert_eq!(tokens[0], TokenKind::Str("abc".into()));
        assert_eq!(*tokens.last().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn test_error_invalid_escape_passes_through() {
        let (tokens, diags) = lex_with_errors(r#""a\qb""#);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("invalid escape"));
        assert_eq!(tokens[0], TokenKind::Str("aqb".into()));
    }

    #[test]
    fn test_error_unterminated_block_comment_reports_start_line() {
        let (_tokens, diags) = lex_with_errors("1\n/* open\nmore");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("line 2"), "{}", diags[0].message);
    }

    #[test]
    fn test_always_ends_with_single_eof() {
        for src in ["", "@@@@", "var x = 1", "\"unterminated", "/*"] {
            let (tokens, _diags) = Lexer::new(src).tokenize();
            assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
            let eofs = tokens.iter().filter(|t| t.kind == TokenKind::Eof).count();
            assert_eq!(eofs, 1, "source {:?}", src);
        }
    }
}

// ABOUTME: Lexer turning Lea source text into a positioned token stream

use crate::diag::Diagnostic;
use crate::token::{TemplatePart, Token, TokenKind};
use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char as nom_char, digit1, one_of},
    combinator::{opt, recognize},
    sequence::preceded,
    IResult, Parser,
};

/// Operator lexemes in longest-match order. Entries sharing a prefix list the
/// longer lexeme first, per the pipe-family scan order `/>>>`, `</>`, `/>`,
/// `</`, `\>`, `@>`.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("/>>>", TokenKind::PipeSpread),
    ("</>", TokenKind::PipeCompose),
    ("/>", TokenKind::PipeForward),
    ("</", TokenKind::PipeReverse),
    ("\\>", TokenKind::PipeParallel),
    ("@>", TokenKind::PipeTap),
    ("::", TokenKind::DoubleColon),
    (":>", TokenKind::ColonGt),
    ("..", TokenKind::Range),
    ("++", TokenKind::Concat),
    ("??", TokenKind::Coalesce),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("->", TokenKind::Arrow),
    ("<-", TokenKind::BackArrow),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("=", TokenKind::Assign),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    ("@", TokenKind::At),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
];

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize((
        digit1,
        opt(preceded(nom_char('.'), digit1)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    diags: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer::with_origin(src, 1, 1)
    }

    /// A lexer whose positions start at the given origin. Used when template
    /// interpolations are re-lexed so their diagnostics land on the enclosing
    /// template's real location.
    pub fn with_origin(src: &'a str, line: usize, column: usize) -> Self {
        Lexer {
            src,
            pos: 0,
            line,
            column,
            tokens: Vec::new(),
            diags: Vec::new(),
        }
    }

    pub fn run(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while self.pos < self.src.len() {
            let (line, column) = (self.line, self.column);
            let rest = &self.src[self.pos..];
            let c = rest.chars().next().unwrap();

            if c == '\n' {
                self.advance(1);
                self.emit_newline(line, column);
            } else if c == ' ' || c == '\t' || c == '\r' {
                self.advance(1);
            } else if rest.starts_with("{--") {
                self.block_comment(line, column);
            } else if rest.starts_with("--") {
                self.line_comment();
            } else if c == '"' {
                self.string(line, column);
            } else if c == '`' {
                self.template(line, column);
            } else if c == '#' {
                self.decorator(line, column);
            } else if let Ok((_, lexeme)) = number(rest) {
                let lexeme = lexeme.to_string();
                self.advance(lexeme.len());
                self.number_token(lexeme, line, column);
            } else if let Ok((_, lexeme)) = identifier(rest) {
                let lexeme = lexeme.to_string();
                self.advance(lexeme.len());
                let kind = TokenKind::keyword(&lexeme)
                    .unwrap_or_else(|| TokenKind::Ident(lexeme.clone()));
                self.tokens.push(Token::new(kind, lexeme, line, column));
            } else if let Some((lexeme, kind)) = OPERATORS
                .iter()
                .find(|(lexeme, _)| rest.starts_with(lexeme))
                .cloned()
            {
                self.advance(lexeme.len());
                self.tokens.push(Token::new(kind, lexeme, line, column));
            } else {
                self.diags.push(Diagnostic::lex(
                    format!("unexpected character `{}`", c),
                    line,
                    column,
                ));
                self.advance(c.len_utf8());
            }
        }

        self.tokens
            .push(Token::new(TokenKind::Eof, "", self.line, self.column));
        (self.tokens, self.diags)
    }

    /// Advance past `n` bytes, keeping line/column bookkeeping in step.
    fn advance(&mut self, n: usize) {
        for c in self.src[self.pos..self.pos + n].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += n;
    }

    /// Newlines are soft statement terminators; runs collapse to one token.
    fn emit_newline(&mut self, line: usize, column: usize) {
        if !matches!(
            self.tokens.last(),
            Some(Token {
                kind: TokenKind::Newline,
                ..
            }) | None
        ) {
            self.tokens
                .push(Token::new(TokenKind::Newline, "\n", line, column));
        }
    }

    fn line_comment(&mut self) {
        let rest = &self.src[self.pos..];
        let len = rest.find('\n').unwrap_or(rest.len());
        self.advance(len);
    }

    /// `{-- label --}` … `{/--}` regions are block comments. Newlines inside
    /// do not terminate statements.
    fn block_comment(&mut self, line: usize, column: usize) {
        let rest = &self.src[self.pos..];
        match rest.find("{/--}") {
            Some(end) => self.advance(end + "{/--}".len()),
            None => {
                self.diags
                    .push(Diagnostic::lex("unterminated block comment", line, column));
                self.advance(rest.len());
            }
        }
    }

    fn number_token(&mut self, lexeme: String, line: usize, column: usize) {
        let is_float = lexeme.contains(['.', 'e', 'E']);
        if is_float {
            match lexeme.parse::<f64>() {
                Ok(value) => self
                    .tokens
                    .push(Token::new(TokenKind::Float(value), lexeme, line, column)),
                Err(_) => self.diags.push(Diagnostic::lex(
                    format!("invalid number literal `{}`", lexeme),
                    line,
                    column,
                )),
            }
        } else {
            match lexeme.parse::<i64>() {
                Ok(value) => self
                    .tokens
                    .push(Token::new(TokenKind::Int(value), lexeme, line, column)),
                Err(_) => self.diags.push(Diagnostic::lex(
                    format!("integer literal `{}` is out of range", lexeme),
                    line,
                    column,
                )),
            }
        }
    }

    fn decorator(&mut self, line: usize, column: usize) {
        let rest = &self.src[self.pos + 1..];
        match identifier(rest) {
            Ok((_, name)) => {
                let lexeme = format!("#{}", name);
                let name = name.to_string();
                self.advance(lexeme.len());
                self.tokens
                    .push(Token::new(TokenKind::Decorator(name), lexeme, line, column));
            }
            Err(_) => {
                self.diags.push(Diagnostic::lex(
                    "`#` must be followed by a decorator name",
                    line,
                    column,
                ));
                self.advance(1);
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) {
        // Owned copy so escape handling can report diagnostics mid-scan.
        let rest: String = self.src[self.pos..].to_string();
        let mut chars = rest.char_indices().skip(1).peekable();
        let mut value = String::new();

        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    let len = i + 1;
                    let lexeme = rest[..len].to_string();
                    self.advance(len);
                    self.tokens
                        .push(Token::new(TokenKind::Str(value), lexeme, line, column));
                    return;
                }
                '\n' => break,
                '\\' => match self.escape(&mut chars, line, column) {
                    Some(decoded) => value.push_str(&decoded),
                    None => break,
                },
                other => value.push(other),
            }
        }

        self.diags
            .push(Diagnostic::lex("unterminated string literal", line, column));
        let len = rest.find('\n').unwrap_or(rest.len());
        self.advance(len);
    }

    fn escape(
        &mut self,
        chars: &mut std::iter::Peekable<impl Iterator<Item = (usize, char)>>,
        line: usize,
        column: usize,
    ) -> Option<String> {
        let (_, c) = chars.next()?;
        let decoded = match c {
            'n' => "\n".to_string(),
            't' => "\t".to_string(),
            'r' => "\r".to_string(),
            '\\' => "\\".to_string(),
            '"' => "\"".to_string(),
            'u' => {
                // \u{XXXX}
                match chars.next() {
                    Some((_, '{')) => {
                        let mut hex = String::new();
                        loop {
                            match chars.next() {
                                Some((_, '}')) => break,
                                Some((_, h)) if h.is_ascii_hexdigit() => hex.push(h),
                                _ => {
                                    self.diags.push(Diagnostic::lex(
                                        "malformed \\u{...} escape",
                                        line,
                                        column,
                                    ));
                                    return Some(String::new());
                                }
                            }
                        }
                        u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| {
                                self.diags.push(Diagnostic::lex(
                                    format!("invalid unicode escape \\u{{{}}}", hex),
                                    line,
                                    column,
                                ));
                                String::new()
                            })
                    }
                    _ => {
                        self.diags
                            .push(Diagnostic::lex("malformed \\u{...} escape", line, column));
                        String::new()
                    }
                }
            }
            other => {
                self.diags.push(Diagnostic::lex(
                    format!("unknown escape `\\{}`", other),
                    line,
                    column,
                ));
                other.to_string()
            }
        };
        Some(decoded)
    }

    /// Backtick template. Literal runs accumulate into `Lit` parts; `${expr}`
    /// interpolations are captured raw (with brace nesting tracked) and
    /// re-parsed by the parser.
    fn template(&mut self, line: usize, column: usize) {
        let start = self.pos;
        self.advance(1); // opening backtick
        let mut parts = Vec::new();
        let mut lit = String::new();

        loop {
            let rest = &self.src[self.pos..];
            let Some(c) = rest.chars().next() else {
                self.diags
                    .push(Diagnostic::lex("unterminated template string", line, column));
                return;
            };

            if c == '`' {
                self.advance(1);
                if !lit.is_empty() {
                    parts.push(TemplatePart::Lit(lit));
                }
                let lexeme = self.src[start..self.pos].to_string();
                self.tokens.push(Token::new(
                    TokenKind::Template(parts),
                    lexeme,
                    line,
                    column,
                ));
                return;
            }

            if c == '\\' {
                let mut it = rest.char_indices().skip(1).peekable();
                if let Some((_, esc)) = it.peek().copied() {
                    match esc {
                        '`' | '$' | '\\' => {
                            lit.push(esc);
                            self.advance(1 + esc.len_utf8());
                        }
                        'n' => {
                            lit.push('\n');
                            self.advance(2);
                        }
                        't' => {
                            lit.push('\t');
                            self.advance(2);
                        }
                        _ => {
                            lit.push('\\');
                            self.advance(1);
                        }
                    }
                } else {
                    self.advance(1);
                }
                continue;
            }

            if rest.starts_with("${") {
                if !lit.is_empty() {
                    parts.push(TemplatePart::Lit(std::mem::take(&mut lit)));
                }
                self.advance(2);
                let (expr_line, expr_column) = (self.line, self.column);
                let inner = &self.src[self.pos..];
                let mut depth = 1usize;
                let mut in_string = false;
                let mut end = None;
                let mut iter = inner.char_indices();
                while let Some((i, ic)) = iter.next() {
                    match ic {
                        '"' => in_string = !in_string,
                        '\\' if in_string => {
                            iter.next();
                        }
                        '{' if !in_string => depth += 1,
                        '}' if !in_string => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                match end {
                    Some(end) => {
                        parts.push(TemplatePart::Interp {
                            src: inner[..end].to_string(),
                            line: expr_line,
                            column: expr_column,
                        });
                        self.advance(end + 1);
                    }
                    None => {
                        self.diags.push(Diagnostic::lex(
                            "unterminated `${` interpolation in template string",
                            expr_line,
                            expr_column,
                        ));
                        self.advance(inner.len());
                        return;
                    }
                }
                continue;
            }

            lit.push(c);
            self.advance(c.len_utf8());
        }
    }
}

/// Lex a complete source text. Always ends with an EOF token; lex errors are
/// collected, not fatal.
pub fn lex(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = lex(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers_and_classification() {
        assert_eq!(
            kinds("1 2.5 3e2"),
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Float(300.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_does_not_eat_dots() {
        assert_eq!(
            kinds("1..5"),
            vec![
                TokenKind::Int(1),
                TokenKind::Range,
                TokenKind::Int(5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_pipe_family_longest_match() {
        assert_eq!(
            kinds("/> />>> </ </> \\> @>"),
            vec![
                TokenKind::PipeForward,
                TokenKind::PipeSpread,
                TokenKind::PipeReverse,
                TokenKind::PipeCompose,
                TokenKind::PipeParallel,
                TokenKind::PipeTap,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("let maybes maybe _ _x"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("maybes".into()),
                TokenKind::Maybe,
                TokenKind::Underscore,
                TokenKind::Ident("_x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\u{41}""#),
            vec![TokenKind::Str("a\nbA".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_is_lex_error() {
        let (_, diags) = lex("\"oops");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 1);
        assert_eq!(diags[0].column, 1);
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            kinds("1 -- comment\n2"),
            vec![
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("1 {-- label --\nstill comment {/--} 2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn test_decorator_token() {
        assert_eq!(
            kinds("#retry(2)"),
            vec![
                TokenKind::Decorator("retry".into()),
                TokenKind::LParen,
                TokenKind::Int(2),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_template_parts() {
        let (tokens, diags) = lex("`a ${x + 1} b`");
        assert!(diags.is_empty());
        match &tokens[0].kind {
            TokenKind::Template(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], TemplatePart::Lit("a ".into()));
                match &parts[1] {
                    TemplatePart::Interp { src, .. } => assert_eq!(src, "x + 1"),
                    other => panic!("expected interpolation, got {:?}", other),
                }
                assert_eq!(parts[2], TemplatePart::Lit(" b".into()));
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_positions_are_one_based() {
        let (tokens, _) = lex("let x\nlet y");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 1));
        assert_eq!((tokens[4].line, tokens[4].column), (2, 5));
    }

    #[test]
    fn test_unknown_character_recovers() {
        let (tokens, diags) = lex("1 § 2");
        assert_eq!(diags.len(), 1);
        assert_eq!(
            tokens.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }
}

//! JavaScript tokenizer.
//!
//! Produces the significant tokens of a source file (comments and whitespace
//! are skipped but remembered through `nl_before`). It is not a parser: it
//! only knows enough grammar to tell regex literals from division and to find
//! the end of template literals. Everything built on top of it (import
//! scanning, ESM rewriting, minification) works on token spans so that string
//! and regex contents are never mistaken for code.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    PrivateName,
    Punct,
    Number,
    String,
    /// Whole template literal, substitutions included
    Template,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A line terminator (or a comment containing one) precedes this token
    pub nl_before: bool,
    /// Template literal containing `${...}`
    pub has_substitutions: bool,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

impl std::error::Error for LexError {}

/// Tokenized source, with helpers for the passes built on top of it
#[derive(Debug, Clone)]
pub struct Lexed<'a> {
    pub source: &'a str,
    pub tokens: Vec<Token>,
}

impl<'a> Lexed<'a> {
    pub fn text(&self, index: usize) -> &'a str {
        self.tokens[index].text(self.source)
    }

    /// Token text at `index`, or "" past either end
    pub fn text_at(&self, index: isize) -> &'a str {
        if index < 0 {
            return "";
        }
        self.tokens
            .get(index as usize)
            .map(|t| t.text(self.source))
            .unwrap_or("")
    }

    pub fn is(&self, index: usize, text: &str) -> bool {
        index < self.tokens.len() && self.text(index) == text
    }

    pub fn is_ident(&self, index: usize) -> bool {
        index < self.tokens.len() && self.tokens[index].kind == TokenKind::Ident
    }

    /// Index of the bracket closing the one at `open`
    pub fn matching(&self, open: usize) -> Option<usize> {
        let (opener, closer) = match self.text(open) {
            "(" => ("(", ")"),
            "[" => ("[", "]"),
            "{" => ("{", "}"),
            _ => return None,
        };
        let mut depth = 0usize;
        for i in open..self.tokens.len() {
            if self.tokens[i].kind != TokenKind::Punct {
                continue;
            }
            let text = self.text(i);
            if text == opener {
                depth += 1;
            } else if text == closer {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Whether every bracket in the stream is balanced
    pub fn is_balanced(&self) -> bool {
        let mut stack = Vec::new();
        for token in &self.tokens {
            if token.kind != TokenKind::Punct {
                continue;
            }
            match token.text(self.source) {
                "(" | "[" | "{" => stack.push(token.text(self.source)),
                ")" => {
                    if stack.pop() != Some("(") {
                        return false;
                    }
                }
                "]" => {
                    if stack.pop() != Some("[") {
                        return false;
                    }
                }
                "}" => {
                    if stack.pop() != Some("{") {
                        return false;
                    }
                }
                _ => {}
            }
        }
        stack.is_empty()
    }

    /// Zero-based line number containing `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        self.source[..offset].matches('\n').count()
    }
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@",
];

/// Keywords after which a `/` starts a regular expression
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Tokenize `source`
pub fn tokenize(source: &str) -> Result<Lexed<'_>, LexError> {
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
    };
    let tokens = lexer.run(false)?;
    Ok(Lexed { source, tokens })
}

/// Byte ranges of the `${ .. }` contents of the template literal `token`
pub fn template_substitutions(source: &str, token: &Token) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    if token.kind != TokenKind::Template || !token.has_substitutions {
        return ranges;
    }
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: token.start + 1,
    };
    while lexer.pos < token.end {
        let c = lexer.peek_char();
        match c {
            '\\' => {
                lexer.pos += 1;
                if lexer.pos < token.end {
                    lexer.pos += lexer.peek_char().len_utf8();
                }
            }
            '$' if lexer.byte_at(lexer.pos + 1) == Some(b'{') => {
                let start = lexer.pos + 2;
                lexer.pos = start;
                if lexer.run(true).is_err() {
                    break;
                }
                ranges.push((start, lexer.pos - 1));
            }
            _ => lexer.pos += c.len_utf8(),
        }
    }
    ranges
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Lex until end of input, or (inside a template substitution) until the
    /// `}` that closes it, which is consumed but not returned.
    fn run(&mut self, in_substitution: bool) -> Result<Vec<Token>, LexError> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut brace_depth = 0usize;

        if self.pos == 0 && self.src.starts_with("#!") {
            self.pos = self.src.find('\n').unwrap_or(self.src.len());
        }

        loop {
            let nl_before = self.skip_trivia()?;
            if self.pos >= self.bytes.len() {
                if in_substitution {
                    return Err(self.error("Unterminated template substitution"));
                }
                return Ok(tokens);
            }

            let start = self.pos;
            let c = self.peek_char();
            let prev = tokens.last().map(|t: &Token| (t.kind, t.text(self.src)));

            let (kind, has_substitutions) = if c == '"' || c == '\'' {
                self.lex_string(c)?;
                (TokenKind::String, false)
            } else if c == '`' {
                let subs = self.lex_template()?;
                (TokenKind::Template, subs)
            } else if c.is_ascii_digit()
                || (c == '.' && self.byte_at(self.pos + 1).is_some_and(|b| b.is_ascii_digit()))
            {
                self.lex_number();
                (TokenKind::Number, false)
            } else if is_ident_start(c) || c == '\\' {
                self.lex_ident()?;
                (TokenKind::Ident, false)
            } else if c == '#' {
                self.pos += 1;
                self.lex_ident()?;
                (TokenKind::PrivateName, false)
            } else if c == '/' && regex_allowed(prev) {
                self.lex_regex()?;
                (TokenKind::Regex, false)
            } else {
                let punct = PUNCTUATORS
                    .iter()
                    .find(|p| self.src[self.pos..].starts_with(*p))
                    .ok_or_else(|| self.error(&format!("Unexpected character '{}'", c)))?;
                // `?.5` is a conditional followed by a number
                if *punct == "?." && self.byte_at(self.pos + 2).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                } else {
                    self.pos += punct.len();
                }
                let text = &self.src[start..self.pos];
                if in_substitution {
                    if text == "{" {
                        brace_depth += 1;
                    } else if text == "}" {
                        if brace_depth == 0 {
                            return Ok(tokens);
                        }
                        brace_depth -= 1;
                    }
                }
                (TokenKind::Punct, false)
            };

            tokens.push(Token {
                kind,
                start,
                end: self.pos,
                nl_before,
                has_substitutions,
            });
        }
    }

    fn error(&self, message: &str) -> LexError {
        LexError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn byte_at(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    fn peek_char(&self) -> char {
        self.src[self.pos..].chars().next().unwrap_or('\0')
    }

    /// Skip whitespace and comments; report whether a line terminator was crossed
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut newline = false;
        while self.pos < self.bytes.len() {
            let c = self.peek_char();
            if c == '\n' || c == '\r' || c == '\u{2028}' || c == '\u{2029}' {
                newline = true;
                self.pos += c.len_utf8();
            } else if c.is_whitespace() || c == '\u{feff}' {
                self.pos += c.len_utf8();
            } else if self.src[self.pos..].starts_with("//") {
                match self.src[self.pos..].find('\n') {
                    Some(offset) => self.pos += offset,
                    None => self.pos = self.bytes.len(),
                }
            } else if self.src[self.pos..].starts_with("/*") {
                match self.src[self.pos + 2..].find("*/") {
                    Some(offset) => {
                        let body = &self.src[self.pos..self.pos + 2 + offset];
                        if body.contains('\n') {
                            newline = true;
                        }
                        self.pos += offset + 4;
                    }
                    None => return Err(self.error("Unterminated block comment")),
                }
            } else if self.src[self.pos..].starts_with("<!--") && self.pos == 0 {
                // HTML-like comment opener at file start
                match self.src.find('\n') {
                    Some(offset) => self.pos = offset,
                    None => self.pos = self.bytes.len(),
                }
            } else {
                break;
            }
        }
        Ok(newline)
    }

    fn lex_string(&mut self, quote: char) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len() {
            let c = self.peek_char();
            match c {
                '\\' => {
                    self.pos += 1;
                    if self.pos < self.bytes.len() {
                        self.pos += self.peek_char().len_utf8();
                    }
                }
                '\n' => break,
                _ if c == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += c.len_utf8(),
            }
        }
        self.pos = start;
        Err(self.error("Unterminated string literal"))
    }

    fn lex_template(&mut self) -> Result<bool, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut has_substitutions = false;
        while self.pos < self.bytes.len() {
            let c = self.peek_char();
            match c {
                '\\' => {
                    self.pos += 1;
                    if self.pos < self.bytes.len() {
                        self.pos += self.peek_char().len_utf8();
                    }
                }
                '`' => {
                    self.pos += 1;
                    return Ok(has_substitutions);
                }
                '$' if self.byte_at(self.pos + 1) == Some(b'{') => {
                    has_substitutions = true;
                    self.pos += 2;
                    self.run(true)?;
                }
                _ => self.pos += c.len_utf8(),
            }
        }
        self.pos = start;
        Err(self.error("Unterminated template literal"))
    }

    fn lex_number(&mut self) {
        let rest = &self.bytes[self.pos..];
        if rest.len() > 1 && rest[0] == b'0' && matches!(rest[1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B') {
            self.pos += 2;
            while self
                .byte_at(self.pos)
                .is_some_and(|b| b.is_ascii_hexdigit() || b == b'_')
            {
                self.pos += 1;
            }
        } else {
            while self
                .byte_at(self.pos)
                .is_some_and(|b| b.is_ascii_digit() || b == b'_' || b == b'.')
            {
                self.pos += 1;
            }
            if matches!(self.byte_at(self.pos), Some(b'e') | Some(b'E')) {
                let mut next = self.pos + 1;
                if matches!(self.byte_at(next), Some(b'+') | Some(b'-')) {
                    next += 1;
                }
                if self.byte_at(next).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos = next;
                    while self.byte_at(self.pos).is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                        self.pos += 1;
                    }
                }
            }
        }
        if self.byte_at(self.pos) == Some(b'n') {
            self.pos += 1;
        }
    }

    fn lex_ident(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let c = self.peek_char();
            if c == '\\' && self.byte_at(self.pos + 1) == Some(b'u') {
                self.pos += 2;
                if self.byte_at(self.pos) == Some(b'{') {
                    match self.src[self.pos..].find('}') {
                        Some(offset) => self.pos += offset + 1,
                        None => return Err(self.error("Invalid unicode escape")),
                    }
                } else {
                    self.pos += 4.min(self.bytes.len() - self.pos);
                }
            } else if is_ident_part(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("Invalid identifier"));
        }
        Ok(())
    }

    fn lex_regex(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while self.pos < self.bytes.len() {
            let c = self.peek_char();
            match c {
                '\\' => {
                    self.pos += 1;
                    if self.pos < self.bytes.len() {
                        self.pos += self.peek_char().len_utf8();
                    }
                }
                '\n' => break,
                '[' => {
                    in_class = true;
                    self.pos += 1;
                }
                ']' => {
                    in_class = false;
                    self.pos += 1;
                }
                '/' if !in_class => {
                    self.pos += 1;
                    while self.pos < self.bytes.len() && is_ident_part(self.peek_char()) {
                        self.pos += self.peek_char().len_utf8();
                    }
                    return Ok(());
                }
                _ => self.pos += c.len_utf8(),
            }
        }
        self.pos = start;
        Err(self.error("Unterminated regular expression"))
    }
}

fn regex_allowed(prev: Option<(TokenKind, &str)>) -> bool {
    match prev {
        None => true,
        Some((TokenKind::Punct, text)) => !matches!(text, ")" | "]"),
        Some((TokenKind::Ident, text)) => REGEX_PRECEDING_KEYWORDS.contains(&text),
        Some(_) => false,
    }
}

pub fn is_ident_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

pub fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '\u{200c}' || c == '\u{200d}' || (!c.is_ascii() && c.is_alphanumeric())
}

/// Reserved words and literals that can never be renamed
pub const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "async", "of",
    "get", "set", "undefined", "NaN", "Infinity", "arguments", "eval",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

/// Decode the value of a simple string literal token (quotes stripped, common escapes).
///
/// Returns `None` for escapes this helper does not understand.
pub fn string_value(literal: &str) -> Option<String> {
    if literal.len() < 2 {
        return None;
    }
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '/' => out.push('/'),
            '\n' => {}
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        let lexed = tokenize(source).unwrap();
        (0..lexed.tokens.len()).map(|i| lexed.text(i).to_string()).collect()
    }

    #[test]
    fn test_strings_hide_code_lookalikes() {
        let tokens = texts(r#"const s = "import x from 'y'"; // import z"#);
        assert_eq!(tokens, vec!["const", "s", "=", r#""import x from 'y'""#, ";"]);
    }

    #[test]
    fn test_regex_vs_division() {
        let lexed = tokenize("a = b / c; d = /x\\/y[/]/g.test(e)").unwrap();
        let kinds: Vec<_> = lexed.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds[3], TokenKind::Punct);
        assert!(lexed.tokens.iter().any(|t| t.kind == TokenKind::Regex && t.text(lexed.source) == "/x\\/y[/]/g"));
    }

    #[test]
    fn test_template_with_nested_braces() {
        let lexed = tokenize("const t = `a ${ {b: 1}.b } c`; next()").unwrap();
        let template = lexed.tokens.iter().find(|t| t.kind == TokenKind::Template).unwrap();
        assert!(template.has_substitutions);
        assert_eq!(template.text(lexed.source), "`a ${ {b: 1}.b } c`");
        assert_eq!(lexed.text(lexed.tokens.len() - 3), "next");
    }

    #[test]
    fn test_template_substitution_ranges() {
        let source = "x = `a ${b} \\${no} ${ {c: d}.c }`;";
        let lexed = tokenize(source).unwrap();
        let template = lexed.tokens.iter().find(|t| t.kind == TokenKind::Template).unwrap();
        let parts: Vec<&str> = template_substitutions(source, template)
            .into_iter()
            .map(|(start, end)| &source[start..end])
            .collect();
        assert_eq!(parts, vec!["b", " {c: d}.c "]);
    }

    #[test]
    fn test_newline_tracking() {
        let lexed = tokenize("a\n/* multi\nline */ b /* x */ c").unwrap();
        assert!(lexed.tokens[1].nl_before);
        assert!(!lexed.tokens[2].nl_before);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(tokenize("const s = 'oops").is_err());
        assert!(tokenize("/* never closed").is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(texts("0x1F 1_000 1.5e-3 .5 10n"), vec!["0x1F", "1_000", "1.5e-3", ".5", "10n"]);
    }

    #[test]
    fn test_matching_bracket() {
        let lexed = tokenize("f(a, (b), [c]) + 1").unwrap();
        assert_eq!(lexed.matching(1), Some(11));
        assert!(lexed.is_balanced());
    }

    #[test]
    fn test_string_value() {
        assert_eq!(string_value(r#"'./util'"#).as_deref(), Some("./util"));
        assert_eq!(string_value(r#""a\"b""#).as_deref(), Some("a\"b"));
    }
}

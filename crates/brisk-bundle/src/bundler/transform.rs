//! Built-in source transforms that run after plugin transform hooks.
//!
//! Both passes work on the token stream. Type elision blanks removed ranges with
//! spaces so line and column positions of the remaining code do not move.

use crate::bundler::lexer::{is_reserved, tokenize, LexError, Lexed, TokenKind};
use std::collections::BTreeMap;

/// Keywords that can never end an expression
const NON_VALUE_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "extends", "export", "import", "default",
];

const MEMBER_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "readonly", "abstract", "override", "declare",
];

/// Strip TypeScript-only syntax: type-only imports and exports, `interface`, `type`
/// aliases, `declare` statements, annotations, `as`/`satisfies` assertions,
/// non-null assertions, declaration generics, `implements` clauses and member
/// modifiers.
///
/// Enums, namespaces and parameter properties are left untouched.
pub fn strip_types(source: &str) -> Result<String, LexError> {
    let lexed = tokenize(source)?;
    let mut stripper = TypeStripper {
        lexed: &lexed,
        cuts: Vec::new(),
    };
    stripper.run();
    Ok(blank_ranges(source, &stripper.cuts))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bracket {
    Paren,
    Square,
    Brace,
    ClassBody,
}

struct TypeStripper<'l, 'a> {
    lexed: &'l Lexed<'a>,
    /// Byte ranges to blank
    cuts: Vec<(usize, usize)>,
}

impl<'l, 'a> TypeStripper<'l, 'a> {
    fn len(&self) -> usize {
        self.lexed.tokens.len()
    }

    fn text(&self, i: usize) -> &'a str {
        self.lexed.text_at(i as isize)
    }

    fn prev(&self, i: usize) -> &'a str {
        self.lexed.text_at(i as isize - 1)
    }

    fn nl(&self, i: usize) -> bool {
        self.lexed.tokens.get(i).is_some_and(|t| t.nl_before)
    }

    fn ident(&self, i: usize) -> bool {
        self.lexed.is_ident(i)
    }

    /// Blank tokens `first..=last`
    fn cut(&mut self, first: usize, last: usize) {
        if first <= last && last < self.len() {
            self.cuts
                .push((self.lexed.tokens[first].start, self.lexed.tokens[last].end));
        }
    }

    fn run(&mut self) {
        let mut stack: Vec<Bracket> = Vec::new();
        let mut pending_class = false;
        let mut skip_until = 0usize;
        let mut i = 0usize;

        while i < self.len() {
            let token = self.lexed.tokens[i];
            let text = self.text(i);

            if i >= skip_until && !matches!(self.prev(i), "." | "?.") {
                if text == "class" {
                    pending_class = true;
                }
                if let Some(next) = self.rule_at(i, &stack) {
                    // brackets inside a cut are balanced; walk them for the stack
                    for j in i..next {
                        track(&mut stack, self.lexed, j, &mut pending_class);
                    }
                    i = next;
                    continue;
                }
                if (text == "import" || text == "export") && self.text(i + 1) == "{" {
                    if let Some(close) = self.lexed.matching(i + 1) {
                        skip_until = close + 1;
                    }
                }
            }

            if token.kind == TokenKind::Punct {
                track(&mut stack, self.lexed, i, &mut pending_class);
            }
            i += 1;
        }
    }

    /// Apply the first matching rule at `i`; returns the index to continue from
    fn rule_at(&mut self, i: usize, stack: &[Bracket]) -> Option<usize> {
        let text = self.text(i);
        let kind = self.lexed.tokens[i].kind;
        let in_class_body = stack.last() == Some(&Bracket::ClassBody);
        let in_paren = stack.last() == Some(&Bracket::Paren);

        if kind == TokenKind::Ident {
            match text {
                "import" if self.text(i + 1) == "type" && !(self.text(i + 2) == "from" && self.lexed.tokens.get(i + 3).is_some_and(|t| t.kind == TokenKind::String)) && self.text(i + 2) != "," => {
                    let end = self.statement_through_specifier(i)?;
                    self.cut(i, end);
                    return Some(end + 1);
                }
                "export" if self.text(i + 1) == "type" && matches!(self.text(i + 2), "{" | "*") => {
                    let end = if self.text(i + 2) == "{" {
                        let close = self.lexed.matching(i + 2)?;
                        if self.text(close + 1) == "from" {
                            self.statement_through_specifier(i)?
                        } else {
                            self.with_semicolon(close)
                        }
                    } else {
                        self.statement_through_specifier(i)?
                    };
                    self.cut(i, end);
                    return Some(end + 1);
                }
                "export" | "declare" | "interface" | "type" | "abstract" if self.statement_start(i) => {
                    let start = i;
                    let at = if text == "export" { i + 1 } else { i };
                    let (keyword_at, keyword) = (at, self.text(at));
                    if keyword == "declare" && self.ident(at + 1) && !self.nl(at + 1) {
                        let end = self.declare_end(at + 1);
                        self.cut(start, end);
                        return Some(end + 1);
                    }
                    if keyword == "interface" && self.ident(at + 1) && !self.nl(at + 1) {
                        let open = (at + 1..self.len()).find(|&j| self.text(j) == "{")?;
                        let close = self.lexed.matching(open)?;
                        self.cut(start, close);
                        return Some(close + 1);
                    }
                    if keyword == "type"
                        && self.ident(at + 1)
                        && !self.nl(at + 1)
                        && matches!(self.text(at + 2), "=" | "<")
                    {
                        let end = self.type_alias_end(at + 2);
                        self.cut(start, end);
                        return Some(end + 1);
                    }
                    if keyword == "abstract" && self.text(at + 1) == "class" {
                        self.cut(keyword_at, keyword_at);
                        return Some(keyword_at + 1);
                    }
                }
                "function" => {
                    let mut name = i + 1;
                    if self.text(name) == "*" {
                        name += 1;
                    }
                    let generic = if self.ident(name) { name + 1 } else { name };
                    if self.text(generic) == "<" {
                        let close = self.angle_close(generic)?;
                        self.cut(generic, close);
                        return Some(close + 1);
                    }
                    return None;
                }
                "class" if self.ident(i + 1) && self.text(i + 2) == "<" => {
                    let close = self.angle_close(i + 2)?;
                    self.cut(i + 2, close);
                    return Some(close + 1);
                }
                "implements" => {
                    let open = (i + 1..self.len()).find(|&j| self.text(j) == "{")?;
                    self.cut(i, open - 1);
                    return Some(open);
                }
                "const" | "let" | "var" if self.ident(i + 1) => {
                    let mut colon = i + 2;
                    if self.text(colon) == "!" {
                        colon += 1;
                    }
                    if self.text(colon) == ":" {
                        let end = self.type_end(colon + 1, &["=", ";", ","], true);
                        self.cut(i + 2, end);
                        return Some(end + 1);
                    }
                    return None;
                }
                "as" | "satisfies" if i > 0 && self.ends_expression(i - 1) && !self.nl(i) => {
                    let end = self.assertion_type_end(i + 1)?;
                    self.cut(i, end);
                    return Some(end + 1);
                }
                _ => {}
            }

            if in_class_body && self.member_start(i) {
                if MEMBER_MODIFIERS.contains(&text)
                    && !self.nl(i + 1)
                    && (self.ident(i + 1)
                        || matches!(self.lexed.tokens.get(i + 1).map(|t| t.kind), Some(TokenKind::PrivateName) | Some(TokenKind::String))
                        || self.text(i + 1) == "[")
                {
                    self.cut(i, i);
                    return Some(i + 1);
                }
            }
        }

        if in_class_body
            && matches!(kind, TokenKind::Ident | TokenKind::PrivateName)
            && self.member_start(i)
        {
            let mut colon = i + 1;
            if matches!(self.text(colon), "?" | "!") {
                colon += 1;
            }
            if self.text(colon) == ":" {
                let end = self.type_end(colon + 1, &["=", ";"], true);
                self.cut(i + 1, end);
                return Some(end + 1);
            }
        }

        if text == ":" && kind == TokenKind::Punct {
            if in_paren && self.is_param_annotation(i) {
                let from = if self.prev(i) == "?" { i - 1 } else { i };
                let end = self.type_end(i + 1, &[",", ")", "="], false);
                self.cut(from, end);
                return Some(end + 1);
            }
            if self.prev(i) == ")" {
                if let Some(end) = self.return_type_end(i) {
                    self.cut(i, end);
                    return Some(end + 1);
                }
            }
        }

        if text == "!" && kind == TokenKind::Punct && i > 0 && !self.nl(i) && self.ends_expression(i - 1) {
            let next = self.text(i + 1);
            if matches!(next, "." | "?." | ")" | "," | ";" | "]" | "[" | "=" | "}" | "") {
                self.cut(i, i);
                return Some(i + 1);
            }
        }

        None
    }

    fn with_semicolon(&self, last: usize) -> usize {
        if self.text(last + 1) == ";" {
            last + 1
        } else {
            last
        }
    }

    /// `import type .. from 'x'` / `export type {..} from 'x'`: index of the final token
    fn statement_through_specifier(&self, start: usize) -> Option<usize> {
        let spec = (start..self.len()).find(|&j| {
            self.lexed.tokens[j].kind == TokenKind::String && self.prev(j) == "from"
        })?;
        Some(self.with_semicolon(spec))
    }

    fn statement_start(&self, i: usize) -> bool {
        i == 0 || self.nl(i) || matches!(self.prev(i), ";" | "{" | "}")
    }

    fn member_start(&self, i: usize) -> bool {
        let prev = self.prev(i);
        matches!(prev, ";" | "{" | "}" | "static") || MEMBER_MODIFIERS.contains(&prev) || self.nl(i)
    }

    /// Whether token `i` can end an expression
    fn ends_expression(&self, i: usize) -> bool {
        let Some(token) = self.lexed.tokens.get(i) else {
            return false;
        };
        match token.kind {
            TokenKind::Ident => {
                let text = self.text(i);
                !NON_VALUE_KEYWORDS.contains(&text) && (!is_reserved(text) || matches!(text, "this" | "super" | "true" | "false" | "null" | "undefined"))
            }
            TokenKind::Punct => matches!(self.text(i), ")" | "]"),
            _ => true,
        }
    }

    fn is_param_annotation(&self, colon: usize) -> bool {
        let mut before = colon - 1;
        if self.text(before) == "?" {
            if before == 0 {
                return false;
            }
            before -= 1;
        }
        let opener_prev = if matches!(self.text(before), "}" | "]") {
            match self.open_of(before) {
                Some(open) if open > 0 => open - 1,
                _ => return false,
            }
        } else if self.ident(before) && before > 0 {
            let mut p = before - 1;
            if self.text(p) == "..." && p > 0 {
                p -= 1;
            }
            p
        } else {
            return false;
        };
        matches!(self.text(opener_prev), "(" | ",")
    }

    fn open_of(&self, close: usize) -> Option<usize> {
        let (open, closer) = match self.text(close) {
            "}" => ("{", "}"),
            "]" => ("[", "]"),
            ")" => ("(", ")"),
            _ => return None,
        };
        let mut depth = 0usize;
        for j in (0..=close).rev() {
            if self.lexed.tokens[j].kind != TokenKind::Punct {
                continue;
            }
            let t = self.text(j);
            if t == closer {
                depth += 1;
            } else if t == open {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
        }
        None
    }

    /// Last index of a return type annotation starting at the `:` after a `)`
    fn return_type_end(&self, colon: usize) -> Option<usize> {
        let open = self.open_of(colon - 1)?;
        let before = self.text_before(open);
        let arrow_only = match before {
            "function" => false,
            "?" | "if" | "while" | "for" | "switch" | "catch" | "with" | "case" | "." | "?." => return None,
            _ if self.ident(open.wrapping_sub(1)) => {
                let prev2 = self.lexed.text_at(open as isize - 2);
                if matches!(prev2, "case" | "?" | ":" | "." | "?.") {
                    return None;
                }
                !(prev2 == "function"
                    || matches!(prev2, "{" | "}" | ";" | "," | "async" | "get" | "set" | "static" | "*")
                    || self.nl(open - 1))
            }
            _ => true,
        };

        let mut j = colon + 1;
        if self.text(j) == "{" {
            j = self.lexed.matching(j)? + 1;
        }
        let mut depth = 0usize;
        while j < self.len() {
            let t = self.text(j);
            if self.lexed.tokens[j].kind == TokenKind::Punct {
                match t {
                    "(" | "[" | "<" => depth += 1,
                    ")" | "]" | ">" if depth > 0 => depth -= 1,
                    "{" if depth == 0 => return if arrow_only { None } else { Some(j - 1) },
                    "=>" if depth == 0 => return Some(j - 1),
                    ";" | ")" | "}" | "," if depth == 0 => return None,
                    _ => {}
                }
            }
            j += 1;
        }
        None
    }

    fn text_before(&self, i: usize) -> &'a str {
        self.lexed.text_at(i as isize - 1)
    }

    /// Last index of a type starting at `start`, stopping before any of `stops` at depth 0
    fn type_end(&self, start: usize, stops: &[&str], stop_at_newline: bool) -> usize {
        let mut depth = 0usize;
        let mut j = start;
        while j < self.len() {
            let t = self.text(j);
            let is_punct = self.lexed.tokens[j].kind == TokenKind::Punct;
            if depth == 0 && j > start && stop_at_newline && self.nl(j) {
                let prev = self.text(j - 1);
                let continues = matches!(prev, "|" | "&" | "," | "=>" | ":" | "<" | "(" | "[" | "{" | "?" | "extends" | "keyof" | "typeof")
                    || matches!(t, "|" | "&" | "?" | ":" | "extends");
                if !continues {
                    return j - 1;
                }
            }
            if is_punct {
                if depth == 0 && stops.contains(&t) {
                    return j - 1;
                }
                match t {
                    "(" | "[" | "{" | "<" => depth += 1,
                    ")" | "]" | "}" | ">" => {
                        if depth == 0 {
                            return j - 1;
                        }
                        depth -= 1;
                    }
                    ">>" => depth = depth.saturating_sub(2),
                    ">>>" => depth = depth.saturating_sub(3),
                    _ => {}
                }
            }
            j += 1;
        }
        self.len() - 1
    }

    /// `type X<T> = ...` ends at `;` or at a line break that does not continue the type
    fn type_alias_end(&self, after_name: usize) -> usize {
        let end = self.type_end(after_name, &[";"], true);
        self.with_semicolon(end)
    }

    /// `declare const x: T;`, `declare function f(): T;`, `declare module 'x' { .. }`
    fn declare_end(&self, start: usize) -> usize {
        let mut j = start;
        while j < self.len() {
            match self.text(j) {
                "{" if self.lexed.tokens[j].kind == TokenKind::Punct => {
                    return self.lexed.matching(j).unwrap_or(self.len() - 1);
                }
                ";" => return j,
                _ if j > start + 1 && self.nl(j) && !matches!(self.text(j - 1), "," | ":" | "|" | "&" | "=" | "(") => {
                    return j - 1
                }
                _ => {}
            }
            j += 1;
        }
        self.len() - 1
    }

    fn angle_close(&self, open: usize) -> Option<usize> {
        let mut depth = 0isize;
        for j in open..self.len() {
            match self.text(j) {
                "<" => depth += 1,
                ">" => depth -= 1,
                ">>" => depth -= 2,
                ">>>" => depth -= 3,
                "{" | ";" if depth > 0 && self.text(j) == ";" => return None,
                _ => {}
            }
            if depth <= 0 {
                return Some(j);
            }
        }
        None
    }

    /// Type after `as`/`satisfies`: `const`, a dotted name with optional generics and
    /// array suffixes, or a bracketed type
    fn assertion_type_end(&self, start: usize) -> Option<usize> {
        let mut j = start;
        match self.text(j) {
            "{" | "(" | "[" => j = self.lexed.matching(j)?,
            _ if self.ident(j) => {
                while self.text(j + 1) == "." && self.ident(j + 2) {
                    j += 2;
                }
                if self.text(j + 1) == "<" && !self.nl(j + 1) {
                    j = self.angle_close(j + 1)?;
                }
            }
            _ => return None,
        }
        while self.text(j + 1) == "[" && self.text(j + 2) == "]" {
            j += 2;
        }
        while matches!(self.text(j + 1), "|" | "&") {
            let next = self.assertion_type_end(j + 2)?;
            j = next;
        }
        Some(j)
    }
}

fn track(stack: &mut Vec<Bracket>, lexed: &Lexed<'_>, i: usize, pending_class: &mut bool) {
    if lexed.tokens[i].kind != TokenKind::Punct {
        return;
    }
    match lexed.text(i) {
        "(" => stack.push(Bracket::Paren),
        "[" => stack.push(Bracket::Square),
        "{" => {
            if *pending_class {
                *pending_class = false;
                stack.push(Bracket::ClassBody);
            } else {
                stack.push(Bracket::Brace);
            }
        }
        ")" | "]" | "}" => {
            stack.pop();
        }
        _ => {}
    }
}

/// Replace every byte in `ranges` with a space, keeping line breaks
fn blank_ranges(source: &str, ranges: &[(usize, usize)]) -> String {
    if ranges.is_empty() {
        return source.to_string();
    }
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();
    let mut out = String::with_capacity(source.len());
    let mut range = 0;
    for (offset, c) in source.char_indices() {
        while range < sorted.len() && sorted[range].1 <= offset {
            range += 1;
        }
        let blanked = range < sorted.len() && sorted[range].0 <= offset && offset < sorted[range].1;
        if blanked && c != '\n' && c != '\r' {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// Replace `define` keys (identifiers or dotted member chains) with their values.
///
/// Property accesses (`a.process.env`) and object keys are left alone.
pub fn apply_defines(source: &str, defines: &BTreeMap<String, String>) -> Result<String, LexError> {
    if defines.is_empty() {
        return Ok(source.to_string());
    }
    let lexed = tokenize(source)?;
    let patterns: Vec<(Vec<&str>, &str)> = defines
        .iter()
        .map(|(key, value)| (key.split('.').collect(), value.as_str()))
        .collect();

    let mut out = String::with_capacity(source.len());
    let mut copied = 0;
    let mut i = 0;
    while i < lexed.tokens.len() {
        let token = lexed.tokens[i];
        let eligible = token.kind == TokenKind::Ident
            && !matches!(lexed.text_at(i as isize - 1), "." | "?.")
            && !(lexed.text_at(i as isize + 1) == ":" && matches!(lexed.text_at(i as isize - 1), "{" | ","));
        if eligible {
            let matched = patterns.iter().find_map(|(segments, value)| {
                let last = i + segments.len() * 2 - 2;
                let all = segments.iter().enumerate().all(|(n, segment)| {
                    lexed.is(i + n * 2, segment) && (n == 0 || lexed.is(i + n * 2 - 1, "."))
                });
                // a longer chain continuing past the key is a different expression
                let continues = lexed.is(last + 1, ".") || lexed.is(last + 1, "=");
                (all && !continues).then_some((last, *value))
            });
            if let Some((last, value)) = matched {
                out.push_str(&source[copied..token.start]);
                out.push_str(value);
                copied = lexed.tokens[last].end;
                i = last + 1;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&source[copied..]);
    Ok(out)
}

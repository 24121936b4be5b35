//! Token-stream JavaScript minifier.
//!
//! Works on the bundler's lexer output: comments and whitespace disappear,
//! newlines survive only where automatic semicolon insertion could depend on
//! them. On top of that it folds literal constants, drops dead `if` branches
//! and renames function-local bindings.

use crate::bundler::lexer::{is_ident_part, is_reserved, tokenize, Lexed, TokenKind};
use super::MinifyError;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct Tok {
    kind: TokenKind,
    text: String,
    nl_before: bool,
    has_substitutions: bool,
}

/// Globals and host names never used as mangled names
const PROTECTED: &[&str] = &[
    "globalThis", "window", "self", "document", "module", "exports", "require", "console", "Object",
    "Array", "Promise", "Symbol", "Error", "JSON", "Math",
];

struct Stream {
    toks: Vec<Tok>,
}

impl Stream {
    fn from_lexed(lexed: &Lexed<'_>) -> Self {
        let toks = lexed
            .tokens
            .iter()
            .map(|t| Tok {
                kind: t.kind,
                text: t.text(lexed.source).to_string(),
                nl_before: t.nl_before,
                has_substitutions: t.has_substitutions,
            })
            .collect();
        Self { toks }
    }

    fn len(&self) -> usize {
        self.toks.len()
    }

    fn text(&self, i: usize) -> &str {
        self.toks.get(i).map(|t| t.text.as_str()).unwrap_or("")
    }

    fn prev_text(&self, i: usize) -> &str {
        if i == 0 {
            ""
        } else {
            self.text(i - 1)
        }
    }

    fn is(&self, i: usize, text: &str) -> bool {
        self.text(i) == text && self.toks.get(i).is_some_and(|t| t.kind != TokenKind::String)
    }

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.toks.get(i).map(|t| t.kind)
    }

    fn is_ident(&self, i: usize) -> bool {
        self.kind(i) == Some(TokenKind::Ident)
    }

    fn after_dot(&self, i: usize) -> bool {
        matches!(self.prev_text(i), "." | "?.")
    }

    fn matching(&self, open: usize) -> Option<usize> {
        let (opener, closer) = match self.text(open) {
            "(" => ("(", ")"),
            "[" => ("[", "]"),
            "{" => ("{", "}"),
            _ => return None,
        };
        let mut depth = 0usize;
        for i in open..self.len() {
            if self.toks[i].kind != TokenKind::Punct {
                continue;
            }
            if self.toks[i].text == opener {
                depth += 1;
            } else if self.toks[i].text == closer {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Replace tokens `first..=last` keeping the line break before them
    fn splice(&mut self, first: usize, last: usize, mut replacement: Vec<Tok>) {
        let nl = self.toks[first].nl_before;
        match replacement.first_mut() {
            Some(tok) => tok.nl_before |= nl,
            None => {
                if let Some(next) = self.toks.get_mut(last + 1) {
                    next.nl_before |= nl;
                }
            }
        }
        self.toks.splice(first..=last, replacement);
    }
}

fn punct(text: &str) -> Tok {
    Tok {
        kind: TokenKind::Punct,
        text: text.to_string(),
        nl_before: false,
        has_substitutions: false,
    }
}

/// Leading `/*! .. */` comments are kept
fn license_header(source: &str) -> String {
    let mut header = String::new();
    let mut rest = source.trim_start();
    while rest.starts_with("/*!") {
        let Some(end) = rest.find("*/") else { break };
        header.push_str(&rest[..end + 2]);
        header.push('\n');
        rest = rest[end + 2..].trim_start();
    }
    header
}

/// Minify a script; errors mean the input could not be handled safely
pub fn minify(source: &str) -> Result<String, MinifyError> {
    let lexed = tokenize(source).map_err(|e| MinifyError(e.to_string()))?;
    if !lexed.is_balanced() {
        return Err(MinifyError("unbalanced brackets".to_string()));
    }
    let mut stream = Stream::from_lexed(&lexed);

    while fold_constants(&mut stream) {}
    while eliminate_dead_branch(&mut stream) {}
    mangle(&mut stream);

    let out = format!("{}{}", license_header(source), print(&stream));
    match tokenize(&out) {
        Ok(check) if check.is_balanced() => Ok(out),
        Ok(_) => Err(MinifyError("minified output is unbalanced".to_string())),
        Err(e) => Err(MinifyError(format!("minified output does not lex: {}", e))),
    }
}

fn is_decimal_integer(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) && (text == "0" || !text.starts_with('0'))
}

fn boundary_before(stream: &Stream, i: usize) -> bool {
    i == 0
        || matches!(
            stream.prev_text(i),
            "(" | "[" | "," | "=" | ":" | "?" | "{" | ";" | "=>" | "return" | "case"
        )
}

fn boundary_after(stream: &Stream, i: usize, op: &str) -> bool {
    if i >= stream.len() {
        return true;
    }
    match stream.text(i) {
        ")" | "]" | "," | ";" | "}" | ":" | "?" => true,
        "+" | "-" => matches!(op, "+" | "-" | "*"),
        "*" => op == "*",
        _ => stream.toks[i].nl_before && stream.is_ident(i),
    }
}

/// One folding step; returns whether anything changed
fn fold_constants(stream: &mut Stream) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i + 2 < stream.len() {
        let (a, op, b) = (&stream.toks[i], &stream.toks[i + 1], &stream.toks[i + 2]);
        let foldable = op.kind == TokenKind::Punct && boundary_before(stream, i);

        if foldable
            && a.kind == TokenKind::Number
            && b.kind == TokenKind::Number
            && is_decimal_integer(&a.text)
            && is_decimal_integer(&b.text)
            && matches!(op.text.as_str(), "+" | "-" | "*")
            && boundary_after(stream, i + 3, &op.text)
        {
            let (Ok(x), Ok(y)) = (a.text.parse::<i64>(), b.text.parse::<i64>()) else {
                i += 1;
                continue;
            };
            let value = match op.text.as_str() {
                "+" => x.checked_add(y),
                "-" => x.checked_sub(y),
                _ => x.checked_mul(y),
            };
            if let Some(value) = value.filter(|v| v.abs() <= (1i64 << 53)) {
                let folded = Tok {
                    kind: TokenKind::Number,
                    text: value.to_string(),
                    nl_before: false,
                    has_substitutions: false,
                };
                stream.splice(i, i + 2, vec![folded]);
                changed = true;
                continue;
            }
        }

        if foldable
            && op.text == "+"
            && a.kind == TokenKind::String
            && b.kind == TokenKind::String
            && a.text.chars().next() == b.text.chars().next()
            && joinable(&a.text[1..a.text.len() - 1], &b.text[1..b.text.len() - 1])
            && boundary_after(stream, i + 3, "+")
        {
            let quote = &a.text[..1];
            let joined = format!(
                "{}{}{}{}",
                quote,
                &a.text[1..a.text.len() - 1],
                &b.text[1..b.text.len() - 1],
                quote
            );
            let folded = Tok {
                kind: TokenKind::String,
                text: joined,
                nl_before: false,
                has_substitutions: false,
            };
            stream.splice(i, i + 2, vec![folded]);
            changed = true;
            continue;
        }

        // `(literal)` outside call/condition position
        if stream.is(i, "(") && stream.is(i + 2, ")") && is_plain_literal(&stream.toks[i + 1]) {
            let prev_ok = i == 0
                || match stream.kind(i - 1) {
                    Some(TokenKind::Punct) => !matches!(stream.prev_text(i), ")" | "]"),
                    Some(TokenKind::Ident) => {
                        matches!(stream.prev_text(i), "return" | "case" | "throw" | "typeof" | "void")
                    }
                    _ => false,
                };
            let next_ok = !matches!(stream.text(i + 3), "." | "?." | "[" | "(" | "=>" | "**")
                && stream.kind(i + 3) != Some(TokenKind::Template);
            if prev_ok && next_ok {
                let literal = stream.toks[i + 1].clone();
                stream.splice(i, i + 2, vec![literal]);
                changed = true;
                continue;
            }
        }
        i += 1;
    }
    changed
}

/// Whether the left string ends in an escape sequence
fn ends_with_escape(inner: &str) -> bool {
    let mut chars = inner.chars();
    let mut escaped = false;
    while let Some(c) = chars.next() {
        escaped = c == '\\';
        if escaped {
            chars.next();
        }
    }
    escaped
}

/// Joining must not turn `'\0' + '1'` into the octal escape `'\01'`
fn joinable(left: &str, right: &str) -> bool {
    !(ends_with_escape(left) && right.starts_with(|c: char| c.is_ascii_digit()))
}

fn is_plain_literal(tok: &Tok) -> bool {
    match tok.kind {
        TokenKind::Number => !tok.text.starts_with('-'),
        TokenKind::String => true,
        TokenKind::Ident => matches!(tok.text.as_str(), "true" | "false" | "null"),
        _ => false,
    }
}

/// Truthiness of a literal condition `( .. )` at `open`, and its closing paren
fn literal_condition(stream: &Stream, open: usize) -> Option<(bool, usize)> {
    let t = stream.text(open + 1);
    if stream.is(open + 2, ")") {
        let value = match (stream.kind(open + 1)?, t) {
            (TokenKind::Ident, "true") => true,
            (TokenKind::Ident, "false") => false,
            (TokenKind::Number, n) if is_decimal_integer(n) => n != "0",
            _ => return None,
        };
        return Some((value, open + 2));
    }
    if t == "!" && stream.is(open + 3, ")") && stream.kind(open + 2) == Some(TokenKind::Number) {
        return match stream.text(open + 2) {
            "0" => Some((true, open + 3)),
            "1" => Some((false, open + 3)),
            _ => None,
        };
    }
    None
}

fn declares_hoisted(stream: &Stream, from: usize, to: usize) -> bool {
    (from..=to).any(|k| stream.is_ident(k) && matches!(stream.text(k), "var" | "function") && !stream.after_dot(k))
}

fn declares_lexical(stream: &Stream, open: usize, close: usize) -> bool {
    let mut depth = 0usize;
    for k in open + 1..close {
        match stream.text(k) {
            "{" | "(" | "[" if stream.kind(k) == Some(TokenKind::Punct) => depth += 1,
            "}" | ")" | "]" if stream.kind(k) == Some(TokenKind::Punct) => depth = depth.saturating_sub(1),
            "let" | "const" | "class" | "function" if depth == 0 && stream.is_ident(k) => return true,
            _ => {}
        }
    }
    false
}

/// Contents of block `open..=close`, unwrapped when that keeps its meaning
fn block_tokens(stream: &Stream, open: usize, close: usize, statement_position: bool) -> Vec<Tok> {
    if statement_position && !declares_lexical(stream, open, close) {
        stream.toks[open + 1..close].to_vec()
    } else {
        stream.toks[open..=close].to_vec()
    }
}

/// Remove one `if` with a literal condition; returns whether it found one
fn eliminate_dead_branch(stream: &mut Stream) -> bool {
    for i in 0..stream.len() {
        if !stream.is_ident(i) || stream.text(i) != "if" || stream.after_dot(i) || !stream.is(i + 1, "(") {
            continue;
        }
        let Some((truthy, close_paren)) = literal_condition(stream, i + 1) else { continue };
        let then_open = close_paren + 1;
        if !stream.is(then_open, "{") {
            continue;
        }
        let Some(then_close) = stream.matching(then_open) else { continue };

        let else_block = if stream.is(then_close + 1, "else") {
            if !stream.is(then_close + 2, "{") {
                // `else if` chains: only the false case is safe to rewrite
                if truthy {
                    continue;
                }
                let statement = i == 0 || matches!(stream.prev_text(i), ";" | "{" | "}");
                if !statement || declares_hoisted(stream, then_open, then_close) {
                    continue;
                }
                stream.splice(i, then_close + 1, Vec::new());
                return true;
            }
            let Some(close) = stream.matching(then_close + 2) else { continue };
            Some((then_close + 2, close))
        } else {
            None
        };

        let last = else_block.map(|(_, close)| close).unwrap_or(then_close);
        let (kept, dropped) = if truthy {
            (Some((then_open, then_close)), else_block)
        } else {
            (else_block, Some((then_open, then_close)))
        };
        if let Some((open, close)) = dropped {
            if declares_hoisted(stream, open, close) {
                continue;
            }
        }

        let statement = i == 0 || matches!(stream.prev_text(i), ";" | "{" | "}");
        let replacement = match kept {
            Some((open, close)) => block_tokens(stream, open, close, statement),
            None if statement => Vec::new(),
            None => vec![punct("{"), punct("}")],
        };
        stream.splice(i, last, replacement);
        return true;
    }
    false
}

/// `function` parameter list and body
struct FunctionSpan {
    params: (usize, usize),
    body: (usize, usize),
}

fn function_at(stream: &Stream, at: usize) -> Option<FunctionSpan> {
    let mut j = at + 1;
    if stream.is(j, "*") {
        j += 1;
    }
    if stream.is_ident(j) {
        j += 1;
    }
    if !stream.is(j, "(") {
        return None;
    }
    let params_close = stream.matching(j)?;
    if !stream.is(params_close + 1, "{") {
        return None;
    }
    let body_close = stream.matching(params_close + 1)?;
    Some(FunctionSpan {
        params: (j, params_close),
        body: (params_close + 1, body_close),
    })
}

/// Whether the `{` at `i` opens an object literal; `conditional` is set when
/// the token before it is the `:` of a `? :` expression
fn opens_object(stream: &Stream, i: usize, enclosing_object: bool, conditional: bool) -> bool {
    if i == 0 {
        return false;
    }
    match (stream.kind(i - 1), stream.prev_text(i)) {
        (Some(TokenKind::Punct), ":") => enclosing_object || conditional,
        (Some(TokenKind::Punct), ")" | "]" | "}" | ";" | "{" | "=>") => false,
        (Some(TokenKind::Punct), _) => true,
        (Some(TokenKind::Ident), text) => matches!(
            text,
            "return" | "typeof" | "yield" | "await" | "in" | "of" | "void" | "delete" | "throw" | "case"
        ),
        _ => false,
    }
}

/// Bracket level in `object_context`
struct Level {
    object: bool,
    /// `?` still waiting for their `:`
    open_conditionals: usize,
}

/// For each token, whether its innermost brace is an object literal
fn object_context(stream: &Stream, from: usize, to: usize) -> Vec<bool> {
    let mut stack: Vec<Level> = vec![Level {
        object: false,
        open_conditionals: 0,
    }];
    let mut conditional_colon = false;
    let mut out = Vec::with_capacity(to + 1 - from);
    for k in from..=to {
        let current = stack.len() > 1 && stack.last().is_some_and(|level| level.object);
        out.push(current);
        if stream.kind(k) != Some(TokenKind::Punct) {
            conditional_colon = false;
            continue;
        }
        let after_conditional = conditional_colon;
        conditional_colon = false;
        match stream.text(k) {
            "{" => stack.push(Level {
                object: opens_object(stream, k, current, after_conditional),
                open_conditionals: 0,
            }),
            "(" | "[" => stack.push(Level {
                object: false,
                open_conditionals: 0,
            }),
            "}" | ")" | "]" => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            "?" => {
                if let Some(level) = stack.last_mut() {
                    level.open_conditionals += 1;
                }
            }
            ":" => {
                if let Some(level) = stack.last_mut() {
                    if level.open_conditionals > 0 {
                        level.open_conditionals -= 1;
                        conditional_colon = true;
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Names declared by `var|let|const` at `keyword`; `None` on destructuring
fn declarators(stream: &Stream, keyword: usize) -> Option<Vec<String>> {
    let mut names = Vec::new();
    let mut j = keyword + 1;
    if stream.is(j, "{") || stream.is(j, "[") {
        return None;
    }
    if !stream.is_ident(j) {
        return Some(names);
    }
    names.push(stream.text(j).to_string());
    j += 1;
    let mut depth = 0usize;
    while j < stream.len() {
        let text = stream.text(j);
        let punct = stream.kind(j) == Some(TokenKind::Punct);
        if punct && matches!(text, "(" | "[" | "{") {
            depth += 1;
        } else if punct && matches!(text, ")" | "]" | "}") {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 {
            if punct && text == ";" {
                break;
            }
            if stream.is_ident(j) && matches!(text, "in" | "of") {
                break;
            }
            if stream.toks[j].nl_before
                && stream.is_ident(j)
                && matches!(stream.kind(j - 1), Some(TokenKind::Ident | TokenKind::Number | TokenKind::String))
            {
                break;
            }
            if punct && text == "," {
                if stream.is(j + 1, "{") || stream.is(j + 1, "[") {
                    return None;
                }
                if stream.is_ident(j + 1) {
                    names.push(stream.text(j + 1).to_string());
                }
            }
        }
        j += 1;
    }
    Some(names)
}

fn mangle(stream: &mut Stream) {
    let mut i = 0;
    while i < stream.len() {
        if stream.is_ident(i) && stream.text(i) == "function" && !stream.after_dot(i) {
            if let Some(span) = function_at(stream, i) {
                mangle_function(stream, &span);
            }
        }
        i += 1;
    }
}

fn short_name(mut n: usize) -> String {
    const FIRST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_$";
    const REST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_$0123456789";
    let mut name = String::new();
    name.push(FIRST[n % FIRST.len()] as char);
    n /= FIRST.len();
    while n > 0 {
        n -= 1;
        name.push(REST[n % REST.len()] as char);
        n /= REST.len();
    }
    name
}

fn declare(name: &str, declared: &mut Vec<String>) {
    if !declared.iter().any(|d| d == name) {
        declared.push(name.to_string());
    }
}

fn mangle_function(stream: &mut Stream, span: &FunctionSpan) {
    let (from, to) = (span.params.0, span.body.1);
    for k in from..=to {
        let tok = &stream.toks[k];
        if tok.kind == TokenKind::Template && tok.has_substitutions {
            return;
        }
        if tok.kind == TokenKind::Ident && matches!(tok.text.as_str(), "eval" | "with" | "class") && !stream.after_dot(k) {
            return;
        }
    }

    let mut declared: Vec<String> = Vec::new();

    // parameters
    let mut depth = 0usize;
    for k in span.params.0 + 1..span.params.1 {
        let text = stream.text(k);
        if stream.kind(k) == Some(TokenKind::Punct) {
            match text {
                "{" | "[" if depth == 0 => return,
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
        } else if depth == 0 && stream.is_ident(k) && matches!(stream.prev_text(k), "(" | "," | "...") {
            declare(text, &mut declared);
        }
    }

    // body declarations, skipping nested functions and arrow bodies
    let mut k = span.body.0 + 1;
    let mut depth = 0usize;
    while k < span.body.1 {
        let text = stream.text(k);
        if stream.kind(k) == Some(TokenKind::Punct) {
            match text {
                "=>" if stream.is(k + 1, "{") => {
                    k = stream.matching(k + 1).unwrap_or(k) + 1;
                    continue;
                }
                "{" | "(" | "[" => depth += 1,
                "}" | ")" | "]" => depth = depth.saturating_sub(1),
                _ => {}
            }
        } else if stream.is_ident(k) && !stream.after_dot(k) {
            match text {
                "function" => {
                    if let Some(inner) = function_at(stream, k) {
                        let statement = matches!(stream.prev_text(k), ";" | "{" | "}");
                        if depth == 0 && statement && stream.is_ident(k + 1) {
                            declare(stream.text(k + 1), &mut declared);
                        }
                        k = inner.body.1 + 1;
                        continue;
                    }
                }
                "var" => match declarators(stream, k) {
                    Some(names) => names.iter().for_each(|n| declare(n, &mut declared)),
                    None => return,
                },
                "let" | "const" => match declarators(stream, k) {
                    Some(names) if depth == 0 || stream.prev_text(k) == "(" => {
                        names.iter().for_each(|n| declare(n, &mut declared))
                    }
                    Some(_) => {}
                    None => return,
                },
                _ => {}
            }
        }
        k += 1;
    }
    if declared.is_empty() {
        return;
    }

    let context = object_context(stream, from, to);
    let mut taken: HashSet<String> = HashSet::new();
    if from > 0 && stream.is_ident(from - 1) {
        taken.insert(stream.text(from - 1).to_string());
    }
    let mut unsafe_names: HashSet<String> = HashSet::new();
    for k in from..=to {
        let tok = &stream.toks[k];
        match tok.kind {
            TokenKind::Ident => {
                taken.insert(tok.text.clone());
                let in_object = context[k - from];
                let prev = stream.prev_text(k);
                let next = stream.text(k + 1);
                let shorthand = matches!(prev, "{" | ",") && matches!(next, "," | "}" | "(" | "=");
                let accessor = matches!(prev, "get" | "set" | "async" | "*") && next == "(";
                // a brace we could not classify may still be an object
                let leading = prev == "{" && matches!(next, "," | "}");
                if ((in_object && (shorthand || accessor)) || leading) && !stream.after_dot(k) {
                    unsafe_names.insert(tok.text.clone());
                }
            }
            TokenKind::String if tok.text.len() >= 2 => {
                unsafe_names.insert(tok.text[1..tok.text.len() - 1].to_string());
            }
            _ => {}
        }
    }

    let mut renames: HashMap<String, String> = HashMap::new();
    let mut counter = 0usize;
    for name in &declared {
        if is_reserved(name) || unsafe_names.contains(name) || name.len() <= 1 {
            continue;
        }
        let replacement = loop {
            let candidate = short_name(counter);
            counter += 1;
            if !taken.contains(&candidate) && !is_reserved(&candidate) && !PROTECTED.contains(&candidate.as_str()) {
                break candidate;
            }
        };
        taken.insert(replacement.clone());
        renames.insert(name.clone(), replacement);
    }

    for k in from..=to {
        if !stream.is_ident(k) || stream.after_dot(k) {
            continue;
        }
        let Some(replacement) = renames.get(&stream.toks[k].text) else { continue };
        let key = context[k - from] && matches!(stream.prev_text(k), "{" | ",") && stream.is(k + 1, ":");
        if !key {
            stream.toks[k].text = replacement.clone();
        }
    }
}

fn ends_expression(tok: &Tok) -> bool {
    match tok.kind {
        TokenKind::Punct => matches!(tok.text.as_str(), ")" | "]" | "}" | "++" | "--"),
        _ => true,
    }
}

fn starts_expression(tok: &Tok) -> bool {
    match tok.kind {
        TokenKind::Punct => matches!(
            tok.text.as_str(),
            "(" | "[" | "{" | "++" | "--" | "+" | "-" | "!" | "~" | "@" | "..."
        ),
        _ => true,
    }
}

fn needs_space(prev: &str, prev_kind: TokenKind, next: &str) -> bool {
    let (Some(a), Some(b)) = (prev.chars().last(), next.chars().next()) else {
        return false;
    };
    ((is_ident_part(a) || a == '\\') && (is_ident_part(b) || b == '\\'))
        || (a == '+' && b == '+')
        || (a == '-' && b == '-')
        || (a == '-' && b == '>')
        || (a == '<' && b == '!')
        || (a == '/' && (b == '/' || b == '*'))
        || (prev_kind == TokenKind::Number && b == '.')
}

/// Text of token `i`, with `true`/`false` shortened where that is safe
fn output_text(stream: &Stream, i: usize) -> &str {
    let tok = &stream.toks[i];
    if tok.kind != TokenKind::Ident || stream.after_dot(i) {
        return &tok.text;
    }
    let prev = stream.prev_text(i);
    let next = stream.text(i + 1);
    let key = matches!(prev, "{" | ",") && next == ":";
    let member = matches!(next, "." | "?." | "[");
    // method names, class fields and the base of `**` need the keyword itself
    let method = next == "(";
    let field = matches!(prev, "{" | ";" | "}" | "," | "static" | "get" | "set" | "async" | "*")
        && matches!(next, "=" | ";" | "}");
    if key || member || method || field || next == "**" {
        return &tok.text;
    }
    match tok.text.as_str() {
        "true" => "!0",
        "false" => "!1",
        _ => &tok.text,
    }
}

fn print(stream: &Stream) -> String {
    let mut out = String::new();
    let mut prev: Option<(&str, TokenKind, usize)> = None;
    for i in 0..stream.len() {
        let text = output_text(stream, i);
        if let Some((prev_text, prev_kind, prev_index)) = prev {
            let tok = &stream.toks[i];
            if tok.nl_before && ends_expression(&stream.toks[prev_index]) && starts_expression(tok) {
                out.push('\n');
            } else if needs_space(prev_text, prev_kind, text) {
                out.push(' ');
            }
        }
        out.push_str(text);
        prev = Some((text, stream.toks[i].kind, i));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min(source: &str) -> String {
        minify(source).unwrap()
    }

    #[test]
    fn test_removes_comments_and_whitespace() {
        assert_eq!(min("// note\nconst  a = 1; /* x */ const b = 2;\n"), "const a=1;const b=2;");
    }

    #[test]
    fn test_keeps_newlines_needed_by_asi() {
        assert_eq!(min("let a = b\nlet c = d\n"), "let a=b\nlet c=d");
        assert_eq!(min("return\nx"), "return\nx");
        assert_eq!(min("a = b\n(c)"), "a=b\n(c)");
        assert_eq!(min("x = 1,\ny = 2"), "x=1,y=2");
    }

    #[test]
    fn test_keeps_required_spaces() {
        assert_eq!(min("a + +b; c - -d; typeof x;"), "a+ +b;c- -d;typeof x;");
        assert_eq!(min("var re = /ab+c/g; x = y / 2;"), "var re=/ab+c/g;x=y/2;");
        assert_eq!(min("x = 1 .toString();"), "x=1 .toString();");
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(min("const a = 2 * 3;"), "const a=6;");
        assert_eq!(min("const a = 1 + 2 + x;"), "const a=3+x;");
        assert_eq!(min("const a = x * 1 + 2;"), "const a=x*1+2;");
        assert_eq!(min("const s = 'ab' + 'cd';"), "const s='abcd';");
        assert_eq!(min("const s = 'ab' + \"cd\";"), "const s='ab'+\"cd\";");
        assert_eq!(min("const a = (5), b = true, c = false;"), "const a=5,b=!0,c=!1;");
        assert_eq!(min("f(1);"), "f(1);");
    }

    #[test]
    fn test_dead_branch_elimination() {
        assert_eq!(min("if (false) { a(); }\nb();"), "b();");
        assert_eq!(min("if (true) { x(); }"), "x();");
        assert_eq!(min("if (false) { a(); } else { b(); }"), "b();");
        assert_eq!(min("if (true) { a(); } else { b(); }"), "a();");
        assert_eq!(min("if (0) { a(); } else if (c) { d(); }"), "if(c){d();}");
        // hoisted declarations keep the branch
        assert_eq!(min("if (false) { var x = 1; }"), "if(!1){var x=1;}");
        // lexical declarations keep their block
        assert_eq!(min("if (true) { let y = 1; }"), "{let y=1;}");
    }

    #[test]
    fn test_mangles_function_locals() {
        let out = min("function add(first, second) { var total = first + second; return total; }");
        assert_eq!(out, "function add(a,b){var c=a+b;return c;}");
    }

    #[test]
    fn test_mangling_is_deterministic_per_function() {
        let out = min("function f(alpha) { return alpha; }\nfunction g(beta) { return beta; }");
        assert_eq!(out, "function f(a){return a;}\nfunction g(a){return a;}");
    }

    #[test]
    fn test_mangling_skips_unsafe_functions() {
        let source = "function f(value) { return eval('value'); }";
        assert_eq!(min(source), "function f(value){return eval('value');}");

        let source = "function f(value) { return { value }; }";
        assert_eq!(min(source), "function f(value){return{value};}");

        let source = "function f(value) { return `${value}`; }";
        assert_eq!(min(source), "function f(value){return`${value}`;}");

        let source = "function f({ value }) { return value; }";
        assert_eq!(min(source), "function f({value}){return value;}");
    }

    #[test]
    fn test_mangling_keeps_keys_and_globals() {
        let out = min("function f(name) { return { name: name, other: window.name }; }");
        assert_eq!(out, "function f(a){return{name:a,other:window.name};}");
    }

    #[test]
    fn test_nested_function_names_avoid_outer_bindings() {
        let out = min("function outer(count) { function inner(step) { return count + step; } return inner(1); }");
        assert_eq!(out, "function outer(a){function b(c){return a+c;}return b(1);}");
    }

    #[test]
    fn test_strings_are_untouched() {
        assert_eq!(min("const s = \"a  // b\";"), "const s=\"a  // b\";");
    }

    #[test]
    fn test_fails_open_on_bad_input() {
        assert!(minify("const a = 'unterminated").is_err());
        assert!(minify("function f( {").is_err());
    }

    #[test]
    fn test_object_after_conditional_colon_keeps_keys() {
        let out = min("function f(total, flag) { return flag ? null : { total: total, flag }; }");
        assert_eq!(out, "function f(a,flag){return flag?null:{total:a,flag};}");

        let out = min("function f(total, flag) { return flag ? null : { total }; }");
        assert_eq!(out, "function f(total,a){return a?null:{total};}");

        // labels and case blocks still open blocks
        let out = min("function f(count) { a: { count++; } return count; }");
        assert_eq!(out, "function f(b){a:{b++;}return b;}");
    }

    #[test]
    fn test_string_folding_never_forms_octal_escapes() {
        assert_eq!(min("const s = '\\0' + '1';"), "const s='\\0'+'1';");
        assert_eq!(min("const s = '\\n' + '1';"), "const s='\\n'+'1';");
        assert_eq!(min("const s = '\\0' + 'a';"), "const s='\\0a';");
        assert_eq!(min("const s = '\\\\' + '1';"), "const s='\\\\'+'1';");
        assert_eq!(min("const s = '\\x41' + '1';"), "const s='\\x411';");
    }

    #[test]
    fn test_booleans_keep_their_keyword_where_required() {
        assert_eq!(min("var o = { true() { return 1; } };"), "var o={true(){return 1;}};");
        assert_eq!(min("var o = { get true() { return 1; } };"), "var o={get true(){return 1;}};");
        assert_eq!(min("class A { static false = 1; }"), "class A{static false=1;}");
        assert_eq!(min("x = true ** 2;"), "x=true**2;");
        assert_eq!(min("x = 2 ** true;"), "x=2**!0;");
        assert_eq!(min("f(true, x.false);"), "f(!0,x.false);");
    }

    #[test]
    fn test_folding_respects_tighter_operators_on_the_left() {
        assert_eq!(min("const a = x ** 2 + 3;"), "const a=x**2+3;");
        assert_eq!(min("const a = x / 2 + 3;"), "const a=x/2+3;");
        assert_eq!(min("const a = -2 + 3;"), "const a=-2+3;");
        assert_eq!(min("const a = typeof 2 + 3;"), "const a=typeof 2+3;");
    }

    #[test]
    fn test_license_comment_survives() {
        assert_eq!(min("/*! (c) brisk */\nconst a = 1;"), "/*! (c) brisk */\nconst a=1;");
    }
}

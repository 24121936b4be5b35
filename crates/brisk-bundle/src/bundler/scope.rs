//! Finds the identifiers of a module that read an imported binding.
//!
//! Imports are never copied into locals when a module is rendered. Each use
//! site reads the exporter's namespace instead, so bindings stay live through
//! import cycles and later reassignment. Declarations that shadow an imported
//! name (parameters, `var`/`let`/`const`, `function`, `class`, `catch`) are
//! tracked per scope so their uses are left alone.

use crate::bundler::lexer::{template_substitutions, tokenize, Lexed, TokenKind};
use std::collections::{HashMap, HashSet};

/// An identifier reading an imported binding, as a byte range of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingUse {
    pub start: usize,
    pub end: usize,
    pub name: String,
    /// `{ name }` shorthand in an object literal
    pub shorthand: bool,
    /// Callee of a call or a tagged template
    pub callee: bool,
}

/// A `let`/`var` statement outside any function or block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelVariable {
    pub keyword: usize,
    pub names: Vec<String>,
    /// Some declarator is an object or array pattern
    pub destructures: bool,
}

struct Brackets {
    /// Innermost open bracket enclosing each token
    parent: Vec<Option<usize>>,
    close: HashMap<usize, usize>,
    open: HashMap<usize, usize>,
}

impl Brackets {
    fn of(lexed: &Lexed<'_>) -> Self {
        let mut parent = Vec::with_capacity(lexed.tokens.len());
        let mut close = HashMap::new();
        let mut open = HashMap::new();
        let mut stack: Vec<usize> = Vec::new();
        for (i, token) in lexed.tokens.iter().enumerate() {
            parent.push(stack.last().copied());
            if token.kind != TokenKind::Punct {
                continue;
            }
            match lexed.text(i) {
                "(" | "[" | "{" => stack.push(i),
                ")" | "]" | "}" => {
                    if let Some(at) = stack.pop() {
                        close.insert(at, i);
                        open.insert(i, at);
                    }
                }
                _ => {}
            }
        }
        Self { parent, close, open }
    }

    fn is_opener(lexed: &Lexed<'_>, i: usize) -> bool {
        lexed.tokens[i].kind == TokenKind::Punct && matches!(lexed.text(i), "(" | "[" | "{")
    }
}

fn after_dot(lexed: &Lexed<'_>, i: usize) -> bool {
    matches!(lexed.text_at(i as isize - 1), "." | "?.")
}

/// Whether the `(` at `open` starts a parameter list: functions, methods,
/// arrows and `catch` clauses
fn is_param_list(lexed: &Lexed<'_>, b: &Brackets, open: usize) -> bool {
    let Some(&close) = b.close.get(&open) else { return false };
    if lexed.is(close + 1, "=>") {
        return true;
    }
    if !lexed.is(close + 1, "{") || open == 0 {
        return false;
    }
    let prev = lexed.text(open - 1);
    let same_line = !lexed.tokens[close + 1].nl_before;
    match lexed.tokens[open - 1].kind {
        TokenKind::Ident => match prev {
            "if" | "for" | "while" | "switch" | "with" => false,
            "function" | "catch" => true,
            _ => same_line || lexed.text_at(open as isize - 2) == "function",
        },
        TokenKind::Punct => matches!(prev, "*" | "]") && same_line,
        TokenKind::String | TokenKind::Number | TokenKind::PrivateName => same_line,
        _ => false,
    }
}

/// Whether the `{` at `open` is the body of a function (not a `catch` block)
fn is_function_body(lexed: &Lexed<'_>, b: &Brackets, open: usize) -> bool {
    if open == 0 {
        return false;
    }
    if lexed.is(open - 1, "=>") {
        return true;
    }
    match b.open.get(&(open - 1)) {
        Some(&params) if lexed.is(open - 1, ")") => {
            is_param_list(lexed, b, params) && lexed.text_at(params as isize - 1) != "catch"
        }
        _ => false,
    }
}

/// Last token of the expression starting at `start`
fn expression_end(lexed: &Lexed<'_>, b: &Brackets, start: usize) -> usize {
    let len = lexed.tokens.len();
    let mut i = start;
    while i < len {
        if Brackets::is_opener(lexed, i) {
            match b.close.get(&i) {
                Some(&close) => {
                    i = close + 1;
                    continue;
                }
                None => return len - 1,
            }
        }
        if lexed.tokens[i].kind == TokenKind::Punct && matches!(lexed.text(i), ")" | "]" | "}" | "," | ";") {
            return i.saturating_sub(1).max(start);
        }
        i += 1;
    }
    len.saturating_sub(1)
}

fn arrow_end(lexed: &Lexed<'_>, b: &Brackets, arrow: usize) -> usize {
    if lexed.is(arrow + 1, "{") {
        b.close.get(&(arrow + 1)).copied().unwrap_or(arrow)
    } else {
        expression_end(lexed, b, arrow + 1)
    }
}

/// Last token of the function whose parameter list opens at `open`
fn function_end(lexed: &Lexed<'_>, b: &Brackets, open: usize) -> usize {
    let Some(&close) = b.close.get(&open) else { return open };
    if lexed.is(close + 1, "=>") {
        arrow_end(lexed, b, close + 1)
    } else {
        b.close.get(&(close + 1)).copied().unwrap_or(close)
    }
}

/// Skip a default value or initializer up to the next top-level `,` before `limit`
fn skip_initializer(lexed: &Lexed<'_>, b: &Brackets, mut i: usize, limit: usize) -> usize {
    while i < limit {
        if Brackets::is_opener(lexed, i) {
            i = b.close.get(&i).map(|c| c + 1).unwrap_or(limit);
            continue;
        }
        if lexed.is(i, ",") {
            return i;
        }
        i += 1;
    }
    limit
}

/// Binding identifiers of the pattern or parameter list opening at `open`
fn pattern_bindings(lexed: &Lexed<'_>, b: &Brackets, open: usize, out: &mut Vec<usize>) {
    let Some(&close) = b.close.get(&open) else { return };
    let object = lexed.is(open, "{");
    let mut i = open + 1;
    while i < close {
        let token = lexed.tokens[i];
        match (token.kind, lexed.text(i)) {
            (TokenKind::Punct, "{" | "[") => {
                pattern_bindings(lexed, b, i, out);
                i = b.close.get(&i).copied().unwrap_or(close) + 1;
                continue;
            }
            (TokenKind::Punct, "(") => {
                i = b.close.get(&i).copied().unwrap_or(close) + 1;
                continue;
            }
            (TokenKind::Punct, "=") => {
                i = skip_initializer(lexed, b, i + 1, close);
                continue;
            }
            (TokenKind::Ident, _) => {
                let key = object && lexed.is(i + 1, ":");
                if !key && !after_dot(lexed, i) {
                    out.push(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Binding tokens of the declaration list after `var`/`let`/`const` at
/// `keyword`, and whether any declarator destructures
fn declarators(lexed: &Lexed<'_>, b: &Brackets, keyword: usize) -> (Vec<usize>, bool) {
    let len = lexed.tokens.len();
    let mut out = Vec::new();
    let mut destructures = false;
    let mut i = keyword + 1;
    loop {
        if i >= len {
            break;
        }
        if lexed.is(i, "{") || lexed.is(i, "[") {
            destructures = true;
            pattern_bindings(lexed, b, i, &mut out);
            match b.close.get(&i) {
                Some(&close) => i = close + 1,
                None => break,
            }
        } else if lexed.is_ident(i) {
            out.push(i);
            i += 1;
        } else {
            break;
        }
        if lexed.is(i, "=") {
            i += 1;
            while i < len {
                if Brackets::is_opener(lexed, i) {
                    match b.close.get(&i) {
                        Some(&close) => {
                            i = close + 1;
                            continue;
                        }
                        None => return (out, destructures),
                    }
                }
                let text = lexed.text(i);
                let punct = lexed.tokens[i].kind == TokenKind::Punct;
                if punct && text == "," {
                    break;
                }
                if punct && matches!(text, ")" | "]" | "}" | ";") {
                    return (out, destructures);
                }
                if lexed.tokens[i].nl_before {
                    let prev = lexed.tokens[i - 1];
                    let continues =
                        prev.kind == TokenKind::Punct && !matches!(lexed.text(i - 1), ")" | "]" | "}");
                    if !continues {
                        return (out, destructures);
                    }
                }
                i += 1;
            }
        }
        if lexed.is(i, ",") {
            i += 1;
        } else {
            break;
        }
    }
    (out, destructures)
}

/// Innermost block holding a lexical declaration at `at`; `None` at module level
fn block_scope(lexed: &Lexed<'_>, b: &Brackets, at: usize) -> Option<(usize, usize)> {
    let parent = b.parent[at]?;
    let close = *b.close.get(&parent)?;
    if lexed.is(parent, "(") && lexed.text_at(parent as isize - 1) == "for" {
        let end = if lexed.is(close + 1, "{") {
            b.close.get(&(close + 1)).copied().unwrap_or(close)
        } else {
            expression_end(lexed, b, close + 1)
        };
        return Some((parent, end));
    }
    Some((parent, close))
}

/// Function body holding a `var` at `at`; `None` at module level
fn function_scope(lexed: &Lexed<'_>, b: &Brackets, at: usize) -> Option<(usize, usize)> {
    let mut current = b.parent[at];
    while let Some(open) = current {
        if lexed.is(open, "{") && is_function_body(lexed, b, open) {
            return b.close.get(&open).map(|&close| (open, close));
        }
        current = b.parent[open];
    }
    None
}

/// Whether `function`/`class` at `at` starts an expression rather than a declaration
fn expression_position(lexed: &Lexed<'_>, at: usize) -> bool {
    if at == 0 {
        return false;
    }
    let prev = lexed.text(at - 1);
    match lexed.tokens[at - 1].kind {
        TokenKind::Punct => !matches!(prev, ";" | "{" | "}" | ")"),
        TokenKind::Ident => matches!(
            prev,
            "return" | "typeof" | "void" | "new" | "await" | "yield" | "in" | "of" | "case" | "throw" | "delete" | "async"
        ),
        _ => false,
    }
}

struct Shadow {
    name: String,
    first: usize,
    last: usize,
}

struct Declarations {
    /// Tokens that declare one of the names
    tokens: HashSet<usize>,
    shadows: Vec<Shadow>,
}

impl Declarations {
    fn shadowed(&self, name: &str, at: usize) -> bool {
        self.shadows
            .iter()
            .any(|s| s.name == name && s.first <= at && at <= s.last)
    }

    fn add(&mut self, lexed: &Lexed<'_>, names: &HashSet<String>, token: usize, scope: Option<(usize, usize)>) {
        let name = lexed.text(token);
        if !names.contains(name) {
            return;
        }
        self.tokens.insert(token);
        if let Some((first, last)) = scope {
            self.shadows.push(Shadow {
                name: name.to_string(),
                first,
                last,
            });
        }
    }
}

fn declarations(lexed: &Lexed<'_>, b: &Brackets, names: &HashSet<String>) -> Declarations {
    let mut found = Declarations {
        tokens: HashSet::new(),
        shadows: Vec::new(),
    };
    for i in 0..lexed.tokens.len() {
        let kind = lexed.tokens[i].kind;
        let text = lexed.text(i);
        if kind == TokenKind::Punct {
            if text == "(" && is_param_list(lexed, b, i) {
                let scope = Some((i, function_end(lexed, b, i)));
                let mut params = Vec::new();
                pattern_bindings(lexed, b, i, &mut params);
                for param in params {
                    found.add(lexed, names, param, scope);
                }
            } else if text == "=>" && i > 0 && lexed.is_ident(i - 1) {
                found.add(lexed, names, i - 1, Some((i - 1, arrow_end(lexed, b, i))));
            }
            continue;
        }
        if kind != TokenKind::Ident || after_dot(lexed, i) {
            continue;
        }
        match text {
            "var" | "let" | "const" => {
                if text == "let" && !(lexed.is_ident(i + 1) || lexed.is(i + 1, "{") || lexed.is(i + 1, "[")) {
                    continue;
                }
                let scope = if text == "var" {
                    function_scope(lexed, b, i)
                } else {
                    block_scope(lexed, b, i)
                };
                for binding in declarators(lexed, b, i).0 {
                    found.add(lexed, names, binding, scope);
                }
            }
            "function" | "class" => {
                let mut at = i + 1;
                if lexed.is(at, "*") {
                    at += 1;
                }
                if !lexed.is_ident(at) || lexed.is(at, "extends") {
                    continue;
                }
                let scope = if expression_position(lexed, i) {
                    // the name is only visible inside the expression
                    let body = (at..lexed.tokens.len()).find(|&k| lexed.is(k, "{") && b.parent[k] == b.parent[i]);
                    body.and_then(|open| b.close.get(&open)).map(|&close| (at, close))
                } else {
                    block_scope(lexed, b, i)
                };
                found.add(lexed, names, at, scope);
            }
            _ => {}
        }
    }
    found
}

/// Whether the `{` at `open` is a class body
fn is_class_body(lexed: &Lexed<'_>, b: &Brackets, open: usize) -> bool {
    let mut j = open;
    for _ in 0..64 {
        if j == 0 {
            return false;
        }
        j -= 1;
        match lexed.text(j) {
            "class" if lexed.is_ident(j) => return true,
            ")" | "]" => match b.open.get(&j) {
                Some(&at) => j = at,
                None => return false,
            },
            ";" | "{" | "}" => return false,
            _ => {}
        }
    }
    false
}

/// Method names and class fields
fn is_member_name(lexed: &Lexed<'_>, b: &Brackets, i: usize, prev: &str, next: &str) -> bool {
    if !matches!(prev, "{" | "," | ";" | "}" | "get" | "set" | "static" | "async" | "*") {
        return false;
    }
    if next == "(" {
        return b
            .close
            .get(&(i + 1))
            .is_some_and(|&close| lexed.is(close + 1, "{") && !lexed.tokens[close + 1].nl_before);
    }
    let in_class = b.parent[i].is_some_and(|open| lexed.is(open, "{") && is_class_body(lexed, b, open));
    in_class && matches!(prev, "{" | ";" | "}" | "static") && matches!(next, "=" | ";" | "}")
}

/// Uses of `names` in `lexed`, template substitutions included
pub fn binding_uses(lexed: &Lexed<'_>, names: &HashSet<String>) -> Vec<BindingUse> {
    let mut uses = Vec::new();
    collect(lexed, names, 0, &mut uses);
    uses
}

fn collect(lexed: &Lexed<'_>, names: &HashSet<String>, offset: usize, uses: &mut Vec<BindingUse>) {
    if names.is_empty() {
        return;
    }
    let b = Brackets::of(lexed);
    let declared = declarations(lexed, &b, names);

    for i in 0..lexed.tokens.len() {
        let token = lexed.tokens[i];
        if token.kind == TokenKind::Template && token.has_substitutions {
            let visible: HashSet<String> = names
                .iter()
                .filter(|name| !declared.shadowed(name, i))
                .cloned()
                .collect();
            for (start, end) in template_substitutions(lexed.source, &token) {
                if let Ok(inner) = tokenize(&lexed.source[start..end]) {
                    collect(&inner, &visible, offset + start, uses);
                }
            }
            continue;
        }

        let name = lexed.text(i);
        if token.kind != TokenKind::Ident || !names.contains(name) || declared.tokens.contains(&i) {
            continue;
        }
        if declared.shadowed(name, i) {
            continue;
        }
        let prev = lexed.text_at(i as isize - 1);
        let next = lexed.text_at(i as isize + 1);
        if matches!(prev, "." | "?." | "break" | "continue") {
            continue;
        }
        // object key or label
        if next == ":" && matches!(prev, "" | "{" | "," | ";" | "}") {
            continue;
        }
        if is_member_name(lexed, &b, i, prev, next) {
            continue;
        }

        let in_brace = b.parent[i].is_some_and(|open| lexed.is(open, "{"));
        let callee = prev != "new"
            && (next == "("
                || lexed
                    .tokens
                    .get(i + 1)
                    .is_some_and(|t| t.kind == TokenKind::Template));
        uses.push(BindingUse {
            start: offset + token.start,
            end: offset + token.end,
            name: name.to_string(),
            shorthand: in_brace && matches!(prev, "{" | ",") && matches!(next, "," | "}"),
            callee,
        });
    }
}

/// `let`/`var` statements at the top level of a module
pub fn top_level_variables(lexed: &Lexed<'_>) -> Vec<TopLevelVariable> {
    let b = Brackets::of(lexed);
    let mut found = Vec::new();
    for i in 0..lexed.tokens.len() {
        if b.parent[i].is_some() || !lexed.is_ident(i) || after_dot(lexed, i) {
            continue;
        }
        if !matches!(lexed.text(i), "let" | "var") {
            continue;
        }
        if !(lexed.is_ident(i + 1) || lexed.is(i + 1, "{") || lexed.is(i + 1, "[")) {
            continue;
        }
        let (bindings, destructures) = declarators(lexed, &b, i);
        found.push(TopLevelVariable {
            keyword: i,
            names: bindings.iter().map(|&t| lexed.text(t).to_string()).collect(),
            destructures,
        });
    }
    found
}

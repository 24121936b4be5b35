use crate::bundler::lexer::{is_reserved, string_value, Lexed, TokenKind};
use std::collections::BTreeMap;

/// How a dependency is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImportKind {
    /// `import ... from 'x'` or `import 'x'`
    Static,
    /// `export ... from 'x'`
    ReExport,
    /// `require('x')`
    Require,
    /// `import('x')`
    Dynamic,
}

impl ImportKind {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, ImportKind::Dynamic)
    }
}

/// One unique specifier found in a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub specifier: String,
    pub kind: ImportKind,
}

/// Token range `[first, last]` of a statement, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub first: usize,
    pub last: usize,
}

/// `import` / `export` statements and dependency call sites of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsmStatement {
    Import {
        span: TokenSpan,
        specifier: String,
        default: Option<String>,
        namespace: Option<String>,
        /// (imported, local)
        named: Vec<(String, String)>,
    },
    ExportFrom {
        span: TokenSpan,
        specifier: String,
        /// (imported, exported)
        named: Vec<(String, String)>,
        /// `export * from`
        star: bool,
        /// `export * as ns from`
        star_as: Option<String>,
    },
    /// `export { a as b }`
    ExportNamed {
        span: TokenSpan,
        /// (local, exported)
        named: Vec<(String, String)>,
    },
    /// `export const a = ..`, `export function f() {}`, `export class C {}`;
    /// only the `export` keyword is removed when rendering
    ExportDecl {
        export_token: usize,
        names: Vec<String>,
    },
    /// `export default <expr>`
    ExportDefaultExpr { export_token: usize, default_token: usize },
    /// `export default function name() {}` / `export default class {}`
    ExportDefaultDecl {
        export_token: usize,
        default_token: usize,
        /// Token index of `function`/`class` (after an optional `async`)
        keyword_token: usize,
        name: Option<String>,
    },
}

/// A `require('x')` or `import('x')` call with a literal argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub span: TokenSpan,
    pub specifier: String,
    pub kind: ImportKind,
}

/// Everything the bundler needs to know about a module's syntax
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSyntax {
    pub statements: Vec<EsmStatement>,
    pub calls: Vec<CallSite>,
    /// `import(expr)` / `require(expr)` with non-literal arguments
    pub unanalyzable: usize,
    /// Module calls `import.meta.hot.accept` or `module.hot.accept`
    pub accepts_hot: bool,
    /// Occurrences of each free-standing identifier (not property names or object keys)
    pub references: BTreeMap<String, usize>,
}

impl ModuleSyntax {
    pub fn is_esm(&self) -> bool {
        !self.statements.is_empty()
    }

    pub fn reference_count(&self, name: &str) -> usize {
        self.references.get(name).copied().unwrap_or(0)
    }

    /// Unique specifiers in source order; static kinds win over dynamic
    pub fn imports(&self) -> Vec<ImportRecord> {
        let mut records: Vec<ImportRecord> = Vec::new();
        let mut push = |specifier: &str, kind: ImportKind| {
            if let Some(existing) = records.iter_mut().find(|r| r.specifier == specifier) {
                if existing.kind.is_dynamic() && !kind.is_dynamic() {
                    existing.kind = kind;
                }
            } else {
                records.push(ImportRecord {
                    specifier: specifier.to_string(),
                    kind,
                });
            }
        };

        let mut events: Vec<(usize, &str, ImportKind)> = Vec::new();
        for statement in &self.statements {
            match statement {
                EsmStatement::Import { span, specifier, .. } => {
                    events.push((span.first, specifier, ImportKind::Static))
                }
                EsmStatement::ExportFrom { span, specifier, .. } => {
                    events.push((span.first, specifier, ImportKind::ReExport))
                }
                _ => {}
            }
        }
        for call in &self.calls {
            events.push((call.span.first, &call.specifier, call.kind));
        }
        events.sort_by_key(|(position, _, _)| *position);
        for (_, specifier, kind) in events {
            push(specifier, kind);
        }
        records
    }

    /// Names this module exports (`default` included), without `export *` expansion
    pub fn export_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for statement in &self.statements {
            match statement {
                EsmStatement::ExportNamed { named, .. } | EsmStatement::ExportFrom { named, .. } => {
                    names.extend(named.iter().map(|(_, exported)| exported.clone()))
                }
                EsmStatement::ExportDecl { names: decl, .. } => names.extend(decl.iter().cloned()),
                EsmStatement::ExportDefaultExpr { .. } | EsmStatement::ExportDefaultDecl { .. } => {
                    names.push("default".to_string())
                }
                _ => {}
            }
            if let EsmStatement::ExportFrom {
                star_as: Some(name), ..
            } = statement
            {
                names.push(name.clone());
            }
        }
        names
    }

    /// Specifiers re-exported wholesale with `export * from`
    pub fn star_reexports(&self) -> Vec<&str> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                EsmStatement::ExportFrom {
                    specifier,
                    star: true,
                    star_as: None,
                    ..
                } => Some(specifier.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Scan the module syntax of a tokenized JS/TS file
pub fn scan(lexed: &Lexed<'_>) -> ModuleSyntax {
    let mut syntax = ModuleSyntax::default();
    let len = lexed.tokens.len();
    let mut i = 0;

    while i < len {
        let token = lexed.tokens[i];
        let after_dot = i > 0 && matches!(lexed.text(i - 1), "." | "?.");
        if token.kind != TokenKind::Ident || after_dot {
            i += 1;
            continue;
        }
        count_reference(lexed, i, &mut syntax.references);

        match lexed.text(i) {
            "import" => {
                if lexed.is(i + 1, "(") {
                    i = scan_call(lexed, i, ImportKind::Dynamic, &mut syntax);
                } else if lexed.is(i + 1, ".") {
                    if is_hot_accept(lexed, i + 2, &["meta", ".", "hot", ".", "accept"]) {
                        syntax.accepts_hot = true;
                    }
                    i += 1;
                } else if let Some((statement, next)) = scan_import(lexed, i) {
                    syntax.statements.push(statement);
                    i = next;
                } else {
                    i += 1;
                }
            }
            "export" => {
                if let Some((statement, next)) = scan_export(lexed, i) {
                    syntax.statements.push(statement);
                    i = next;
                } else {
                    i += 1;
                }
            }
            "require" if lexed.is(i + 1, "(") => {
                i = scan_call(lexed, i, ImportKind::Require, &mut syntax);
            }
            "module" if lexed.is(i + 1, ".") => {
                if is_hot_accept(lexed, i + 2, &["hot", ".", "accept"]) {
                    syntax.accepts_hot = true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    syntax
}

fn count_reference(lexed: &Lexed<'_>, i: usize, references: &mut BTreeMap<String, usize>) {
    let text = lexed.text(i);
    let object_key = lexed.is(i + 1, ":") && matches!(lexed.text_at(i as isize - 1), "{" | ",");
    if !object_key && !is_reserved(text) {
        *references.entry(text.to_string()).or_insert(0) += 1;
    }
}

fn is_hot_accept(lexed: &Lexed<'_>, start: usize, chain: &[&str]) -> bool {
    chain
        .iter()
        .enumerate()
        .all(|(offset, text)| lexed.is(start + offset, text) || (*text == "." && lexed.is(start + offset, "?.")))
}

fn scan_call(lexed: &Lexed<'_>, at: usize, kind: ImportKind, syntax: &mut ModuleSyntax) -> usize {
    let arg = at + 2;
    let literal = arg < lexed.tokens.len()
        && lexed.tokens[arg].kind == TokenKind::String
        && lexed.is(arg + 1, ")");
    if literal {
        if let Some(specifier) = string_value(lexed.text(arg)) {
            syntax.calls.push(CallSite {
                span: TokenSpan {
                    first: at,
                    last: arg + 1,
                },
                specifier,
                kind,
            });
            return arg + 2;
        }
    }
    // `require` may be a local function; only count real call sites
    if kind == ImportKind::Dynamic || !lexed.is(at.wrapping_sub(1), "function") {
        syntax.unanalyzable += 1;
    }
    at + 1
}

/// Extend a statement ending at `last` over `with {..}` / `assert {..}` and a trailing `;`
fn statement_end(lexed: &Lexed<'_>, mut last: usize) -> usize {
    if (lexed.is(last + 1, "with") || lexed.is(last + 1, "assert"))
        && lexed.is(last + 2, "{")
        && !lexed.tokens[last + 1].nl_before
    {
        if let Some(close) = lexed.matching(last + 2) {
            last = close;
        }
    }
    if lexed.is(last + 1, ";") {
        last += 1;
    }
    last
}

fn specifier_at(lexed: &Lexed<'_>, index: usize) -> Option<String> {
    if index < lexed.tokens.len() && lexed.tokens[index].kind == TokenKind::String {
        string_value(lexed.text(index))
    } else {
        None
    }
}

/// Parse `{ a, b as c, "d" as e }` starting at the `{`; returns pairs and the `}` index
fn named_list(lexed: &Lexed<'_>, open: usize) -> Option<(Vec<(String, String)>, usize)> {
    let close = lexed.matching(open)?;
    let mut pairs = Vec::new();
    let mut i = open + 1;
    while i < close {
        if lexed.is(i, ",") {
            i += 1;
            continue;
        }
        // TS inline `type` modifier: `{ type Foo, bar }`
        if lexed.is(i, "type") && i + 1 < close && !matches!(lexed.text(i + 1), "," | "as" | "}") {
            i += 2;
            while i < close && !lexed.is(i, ",") {
                i += 1;
            }
            continue;
        }
        let first = name_text(lexed, i)?;
        if lexed.is(i + 1, "as") {
            let second = name_text(lexed, i + 2)?;
            pairs.push((first, second));
            i += 3;
        } else {
            pairs.push((first.clone(), first));
            i += 1;
        }
    }
    Some((pairs, close))
}

fn name_text(lexed: &Lexed<'_>, index: usize) -> Option<String> {
    let token = lexed.tokens.get(index)?;
    match token.kind {
        TokenKind::Ident => Some(lexed.text(index).to_string()),
        TokenKind::String => string_value(lexed.text(index)),
        _ => None,
    }
}

fn scan_import(lexed: &Lexed<'_>, at: usize) -> Option<(EsmStatement, usize)> {
    let mut i = at + 1;

    // `import 'side-effect'`
    if let Some(specifier) = specifier_at(lexed, i) {
        let last = statement_end(lexed, i);
        return Some((
            EsmStatement::Import {
                span: TokenSpan { first: at, last },
                specifier,
                default: None,
                namespace: None,
                named: Vec::new(),
            },
            last + 1,
        ));
    }

    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();

    if lexed.is_ident(i) && !lexed.is(i, "from") || (lexed.is(i, "from") && lexed.is(i + 1, "from")) {
        default = Some(lexed.text(i).to_string());
        i += 1;
        if lexed.is(i, ",") {
            i += 1;
        }
    }
    if lexed.is(i, "*") && lexed.is(i + 1, "as") {
        namespace = Some(lexed.text(i + 2).to_string());
        i += 3;
    } else if lexed.is(i, "{") {
        let (pairs, close) = named_list(lexed, i)?;
        named = pairs;
        i = close + 1;
    }
    if !lexed.is(i, "from") {
        return None;
    }
    let specifier = specifier_at(lexed, i + 1)?;
    let last = statement_end(lexed, i + 1);
    Some((
        EsmStatement::Import {
            span: TokenSpan { first: at, last },
            specifier,
            default,
            namespace,
            named,
        },
        last + 1,
    ))
}

fn scan_export(lexed: &Lexed<'_>, at: usize) -> Option<(EsmStatement, usize)> {
    let i = at + 1;
    match lexed.text_at(i as isize) {
        "*" => {
            let (star_as, from_at) = if lexed.is(i + 1, "as") {
                (name_text(lexed, i + 2), i + 3)
            } else {
                (None, i + 1)
            };
            if !lexed.is(from_at, "from") {
                return None;
            }
            let specifier = specifier_at(lexed, from_at + 1)?;
            let last = statement_end(lexed, from_at + 1);
            Some((
                EsmStatement::ExportFrom {
                    span: TokenSpan { first: at, last },
                    specifier,
                    named: Vec::new(),
                    star: star_as.is_none(),
                    star_as,
                },
                last + 1,
            ))
        }
        "{" => {
            let (named, close) = named_list(lexed, i)?;
            if lexed.is(close + 1, "from") {
                let specifier = specifier_at(lexed, close + 2)?;
                let last = statement_end(lexed, close + 2);
                Some((
                    EsmStatement::ExportFrom {
                        span: TokenSpan { first: at, last },
                        specifier,
                        named,
                        star: false,
                        star_as: None,
                    },
                    last + 1,
                ))
            } else {
                let last = if lexed.is(close + 1, ";") { close + 1 } else { close };
                Some((
                    EsmStatement::ExportNamed {
                        span: TokenSpan { first: at, last },
                        named,
                    },
                    last + 1,
                ))
            }
        }
        "default" => {
            let mut keyword = i + 1;
            if lexed.is(keyword, "async") && lexed.is(keyword + 1, "function") && !lexed.tokens[keyword + 1].nl_before {
                keyword += 1;
            }
            if lexed.is(keyword, "function") || lexed.is(keyword, "class") {
                let mut name_at = keyword + 1;
                if lexed.is(name_at, "*") {
                    name_at += 1;
                }
                let name = if lexed.is_ident(name_at) && !lexed.is(name_at, "extends") {
                    Some(lexed.text(name_at).to_string())
                } else {
                    None
                };
                Some((
                    EsmStatement::ExportDefaultDecl {
                        export_token: at,
                        default_token: i,
                        keyword_token: keyword,
                        name,
                    },
                    keyword,
                ))
            } else {
                Some((
                    EsmStatement::ExportDefaultExpr {
                        export_token: at,
                        default_token: i,
                    },
                    i + 1,
                ))
            }
        }
        "const" | "let" | "var" => {
            let names = declared_names(lexed, i + 1);
            Some((EsmStatement::ExportDecl { export_token: at, names }, i + 1))
        }
        "function" | "class" | "async" => {
            let mut name_at = i + 1;
            if lexed.is(i, "async") {
                name_at += 1;
            }
            if lexed.is(name_at, "*") {
                name_at += 1;
            }
            let names = if lexed.is_ident(name_at) {
                vec![lexed.text(name_at).to_string()]
            } else {
                Vec::new()
            };
            Some((EsmStatement::ExportDecl { export_token: at, names }, i + 1))
        }
        _ => None,
    }
}

/// Binding names of a `const`/`let`/`var` declaration list starting at `start`.
///
/// Handles simple names and one level of object/array destructuring.
pub fn declared_names(lexed: &Lexed<'_>, start: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut i = start;
    let len = lexed.tokens.len();
    loop {
        if i >= len {
            break;
        }
        if lexed.is(i, "{") || lexed.is(i, "[") {
            let Some(close) = lexed.matching(i) else { break };
            let mut j = i + 1;
            while j < close {
                let is_binding = lexed.is_ident(j)
                    && matches!(lexed.text_at(j as isize + 1), "," | "}" | "]" | "=")
                    && !matches!(lexed.text_at(j as isize - 1), "." | "=");
                if is_binding {
                    names.push(lexed.text(j).to_string());
                }
                j += 1;
            }
            i = close + 1;
        } else if lexed.is_ident(i) {
            names.push(lexed.text(i).to_string());
            i += 1;
        } else {
            break;
        }
        // skip the initializer up to the next top-level comma
        let mut depth = 0usize;
        while i < len {
            let text = lexed.text(i);
            let kind = lexed.tokens[i].kind;
            if kind == TokenKind::Punct {
                match text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        if depth == 0 {
                            return names;
                        }
                        depth -= 1;
                    }
                    ";" if depth == 0 => return names,
                    "," if depth == 0 => break,
                    _ => {}
                }
            } else if depth == 0 && lexed.tokens[i].nl_before && i > start {
                let prev = lexed.text(i - 1);
                let continues = lexed.tokens[i - 1].kind == TokenKind::Punct && !matches!(prev, ")" | "]" | "}");
                if !continues {
                    return names;
                }
            }
            i += 1;
        }
        if i >= len || !lexed.is(i, ",") {
            break;
        }
        i += 1;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::lexer::tokenize;

    fn syntax(source: &str) -> ModuleSyntax {
        scan(&tokenize(source).unwrap())
    }

    #[test]
    fn test_import_forms() {
        let s = syntax(
            "import a, { b as c, d } from './x';\nimport * as ns from \"./y\"\nimport './z';\nconst lazy = () => import('./lazy');\nconst cjs = require('./cjs');",
        );
        let imports = s.imports();
        let specifiers: Vec<_> = imports.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(specifiers, vec!["./x", "./y", "./z", "./lazy", "./cjs"]);
        assert_eq!(imports[3].kind, ImportKind::Dynamic);
        assert_eq!(imports[4].kind, ImportKind::Require);

        match &s.statements[0] {
            EsmStatement::Import { default, named, .. } => {
                assert_eq!(default.as_deref(), Some("a"));
                assert_eq!(named, &vec![("b".to_string(), "c".to_string()), ("d".to_string(), "d".to_string())]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_export_forms() {
        let s = syntax(
            "export const x = 1, y = f(1, 2);\nexport function g() {}\nexport default class {}\nexport { x as z };\nexport * from './all';\nexport { q } from './q';",
        );
        assert_eq!(s.export_names(), vec!["x", "y", "g", "default", "z", "q"]);
        assert_eq!(s.star_reexports(), vec!["./all"]);
    }

    #[test]
    fn test_lookalikes_in_strings_are_ignored() {
        let s = syntax("const s = \"import x from './nope'\"; obj.import('y'); a.require('z')");
        assert!(s.imports().is_empty());
    }

    #[test]
    fn test_static_kind_wins_over_dynamic() {
        let s = syntax("import('./a'); import { b } from './a';");
        let imports = s.imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::Static);
    }

    #[test]
    fn test_hot_accept_detection() {
        assert!(syntax("if (import.meta.hot) { import.meta.hot.accept() }").accepts_hot);
        assert!(syntax("module.hot?.accept()").accepts_hot);
        assert!(!syntax("import.meta.url").accepts_hot);
    }

    #[test]
    fn test_destructured_export_names() {
        let s = syntax("export const { a, b: renamed } = obj, [c] = list;");
        assert_eq!(s.export_names(), vec!["a", "renamed", "c"]);
    }

    #[test]
    fn test_reference_counts_skip_keys_and_import_bindings() {
        let s = syntax("import { a, b } from './x';\nexport const c = { a: 1, b };\nfoo.a = c;");
        assert_eq!(s.reference_count("a"), 0);
        assert_eq!(s.reference_count("b"), 1);
        assert_eq!(s.reference_count("c"), 2);
        assert_eq!(s.reference_count("foo"), 1);
    }

    #[test]
    fn test_unanalyzable_dynamic_import() {
        let s = syntax("const m = await import(name);");
        assert_eq!(s.unanalyzable, 1);
        assert!(s.imports().is_empty());
    }
}

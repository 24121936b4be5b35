use crate::bundler::graph::{Loader, ModuleGraph, ModuleIdx};
use crate::bundler::lexer::{is_reserved, Lexed, TokenKind};
use crate::bundler::parser::{EsmStatement, ImportKind, ModuleSyntax};
use std::collections::{BTreeSet, HashMap};

/// Which exports of a module some importer reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsedExports {
    All,
    Names(BTreeSet<String>),
}

impl UsedExports {
    pub fn none() -> Self {
        UsedExports::Names(BTreeSet::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            UsedExports::All => true,
            UsedExports::Names(names) => names.contains(name),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, UsedExports::Names(names) if names.is_empty())
    }

    /// Returns true when the set grew
    fn insert(&mut self, name: &str) -> bool {
        match self {
            UsedExports::All => false,
            UsedExports::Names(names) => names.insert(name.to_string()),
        }
    }

    fn set_all(&mut self) -> bool {
        let grew = !matches!(self, UsedExports::All);
        *self = UsedExports::All;
        grew
    }
}

static ALL: UsedExports = UsedExports::All;

/// Cross-module export usage, computed to a fixed point over the graph
#[derive(Debug, Clone, Default)]
pub struct TreeShaker {
    enabled: bool,
    used: HashMap<ModuleIdx, UsedExports>,
}

impl TreeShaker {
    /// A shaker that keeps everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn analyze(graph: &ModuleGraph) -> Self {
        let mut used: HashMap<ModuleIdx, UsedExports> =
            graph.iter().map(|(idx, _)| (idx, UsedExports::none())).collect();
        for (_, entry) in graph.entries() {
            used.insert(*entry, UsedExports::All);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for (idx, module) in graph.iter() {
                let own = used.get(&idx).cloned().unwrap_or(UsedExports::All);

                for (dep, kind) in module.module_deps() {
                    if matches!(kind, ImportKind::Require | ImportKind::Dynamic) {
                        changed |= used.entry(dep).or_insert_with(UsedExports::none).set_all();
                    }
                }
                if !module.syntax.is_esm() {
                    // scripts without ESM syntax reach their deps through require()
                    continue;
                }

                for statement in &module.syntax.statements {
                    changed |= propagate(graph, idx, statement, &own, &mut used);
                }
            }
        }

        Self { enabled: true, used }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn used(&self, idx: ModuleIdx) -> &UsedExports {
        if !self.enabled {
            return &ALL;
        }
        self.used.get(&idx).unwrap_or(&ALL)
    }

    /// Side-effect-free module whose exports nobody reads
    pub fn is_dropped(&self, graph: &ModuleGraph, idx: ModuleIdx) -> bool {
        if !self.enabled || graph.is_entry(idx) {
            return false;
        }
        match graph.get(idx) {
            Some(module) => module.loader != Loader::Css && !module.side_effects && self.used(idx).is_empty(),
            None => false,
        }
    }
}

fn propagate(
    graph: &ModuleGraph,
    idx: ModuleIdx,
    statement: &EsmStatement,
    own: &UsedExports,
    used: &mut HashMap<ModuleIdx, UsedExports>,
) -> bool {
    let Some(module) = graph.get(idx) else {
        return false;
    };
    let syntax = &module.syntax;
    let target = |specifier: &str| module.dep_for(specifier).and_then(|d| d.module());
    let mut changed = false;

    match statement {
        EsmStatement::Import {
            specifier,
            default,
            namespace,
            named,
            ..
        } => {
            let Some(dep) = target(specifier) else { return false };
            let set = used.entry(dep).or_insert_with(UsedExports::none);
            if namespace.as_deref().is_some_and(|ns| syntax.reference_count(ns) > 0) {
                changed |= set.set_all();
            }
            if default.as_deref().is_some_and(|d| syntax.reference_count(d) > 0) {
                changed |= set.insert("default");
            }
            for (imported, local) in named {
                if syntax.reference_count(local) > 0 {
                    changed |= set.insert(imported);
                }
            }
        }
        EsmStatement::ExportFrom {
            specifier,
            named,
            star,
            star_as,
            ..
        } => {
            let Some(dep) = target(specifier) else { return false };
            let set = used.entry(dep).or_insert_with(UsedExports::none);
            for (imported, exported) in named {
                if own.contains(exported) {
                    changed |= set.insert(imported);
                }
            }
            if star_as.as_deref().is_some_and(|name| own.contains(name)) {
                changed |= set.set_all();
            }
            if *star {
                match own {
                    UsedExports::All => changed |= set.set_all(),
                    UsedExports::Names(names) => {
                        for name in names {
                            if name != "default" && !module.exports.contains(name) {
                                changed |= set.insert(name);
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
    changed
}

/// An exported declaration that can be blanked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub first: usize,
    pub last: usize,
    pub names: Vec<String>,
}

/// Exported declarations nobody imports, that nothing in the module refers to,
/// and whose evaluation has no effects
pub fn removable_exports(lexed: &Lexed<'_>, syntax: &ModuleSyntax, used: &UsedExports) -> Vec<Removal> {
    if matches!(used, UsedExports::All) {
        return Vec::new();
    }
    // names re-exported under another name through `export { a as b }`
    let aliased: Vec<&str> = syntax
        .statements
        .iter()
        .filter_map(|s| match s {
            EsmStatement::ExportNamed { named, .. } => Some(named),
            _ => None,
        })
        .flatten()
        .map(|(local, _)| local.as_str())
        .collect();

    let mut removals = Vec::new();
    for statement in &syntax.statements {
        let EsmStatement::ExportDecl { export_token, names } = statement else {
            continue;
        };
        let unused = !names.is_empty()
            && names.iter().all(|name| {
                !used.contains(name) && syntax.reference_count(name) <= 1 && !aliased.contains(&name.as_str())
            });
        if !unused {
            continue;
        }
        let decl = export_token + 1;
        let last = statement_end(lexed, decl);
        let pure = match lexed.text(decl) {
            "function" | "async" | "class" => true,
            "const" | "let" | "var" => range_is_pure(lexed, decl + 1, last),
            _ => false,
        };
        if pure {
            removals.push(Removal {
                first: *export_token,
                last,
                names: names.clone(),
            });
        }
    }
    removals
}

/// Tokens after which an expression continues on the next line
fn continues_after(text: &str) -> bool {
    matches!(
        text,
        "=" | "," | "(" | "[" | "{" | "." | "?." | "?" | ":" | "=>" | "+" | "-" | "*" | "/" | "%"
            | "**" | "&&" | "||" | "??" | "&" | "|" | "^" | "<" | ">" | "<=" | ">=" | "==" | "!="
            | "===" | "!==" | "<<" | ">>" | ">>>" | "!" | "~" | "+=" | "-=" | "new" | "typeof"
            | "in" | "instanceof" | "return" | "await" | "yield" | "void" | "delete" | "extends"
    )
}

/// Tokens that continue the previous line's expression
fn continues_before(text: &str) -> bool {
    matches!(
        text,
        "." | "?." | "," | "?" | ":" | "=>" | "=" | "*" | "/" | "%" | "**" | "&&" | "||" | "??" | "&"
            | "|" | "^" | "==" | "!=" | "===" | "!==" | "<" | ">" | "<=" | ">=" | "instanceof" | "in"
            | "(" | "[" | "`"
    )
}

/// Index of the last token of the statement starting at `start`
pub fn statement_end(lexed: &Lexed<'_>, start: usize) -> usize {
    let len = lexed.tokens.len();
    let mut keyword = start;
    if lexed.is(keyword, "async") && lexed.is(keyword + 1, "function") {
        keyword += 1;
    }
    if lexed.is(keyword, "function") || lexed.is(keyword, "class") {
        if let Some(open) = (keyword + 1..len).find(|&j| lexed.is(j, "{")) {
            return lexed.matching(open).unwrap_or(len - 1);
        }
        return len - 1;
    }

    let mut depth = 0usize;
    let mut j = start;
    while j < len {
        let token = lexed.tokens[j];
        let text = lexed.text(j);
        if j > start && depth == 0 && token.nl_before {
            let prev = lexed.text(j - 1);
            if !continues_after(prev) && !continues_before(text) {
                return j - 1;
            }
        }
        if token.kind == TokenKind::Punct {
            match text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    if depth == 0 {
                        return j.saturating_sub(1);
                    }
                    depth -= 1;
                }
                ";" if depth == 0 => return j,
                _ => {}
            }
        }
        j += 1;
    }
    len - 1
}

/// Whether evaluating tokens `from..=to` can have no observable effect.
///
/// Function and class bodies are skipped; calls, `new`, assignments, updates,
/// `delete`, `await`, `yield` and tagged templates are effects. The `=` of a
/// declarator is allowed.
pub fn range_is_pure(lexed: &Lexed<'_>, from: usize, to: usize) -> bool {
    let mut depth = 0usize;
    let mut i = from;
    while i <= to && i < lexed.tokens.len() {
        let token = lexed.tokens[i];
        let text = lexed.text(i);
        match (token.kind, text) {
            (TokenKind::Ident, "function") | (TokenKind::Ident, "class") => {
                match (i + 1..=to).find(|&j| lexed.is(j, "{")).and_then(|open| lexed.matching(open)) {
                    Some(close) => {
                        i = close + 1;
                        continue;
                    }
                    None => return false,
                }
            }
            (TokenKind::Punct, "=>") => {
                if lexed.is(i + 1, "{") {
                    match lexed.matching(i + 1) {
                        Some(close) => {
                            i = close + 1;
                            continue;
                        }
                        None => return false,
                    }
                }
                // concise body: skip to the end of the arrow expression
                let mut inner = 0usize;
                let mut j = i + 1;
                while j <= to {
                    match lexed.text(j) {
                        "(" | "[" | "{" => inner += 1,
                        ")" | "]" | "}" if inner == 0 => break,
                        ")" | "]" | "}" => inner -= 1,
                        "," | ";" if inner == 0 => break,
                        _ => {}
                    }
                    j += 1;
                }
                i = j;
                continue;
            }
            (TokenKind::Ident, "new" | "delete" | "await" | "yield" | "import" | "require") => return false,
            (TokenKind::Punct, "++" | "--") => return false,
            (TokenKind::Punct, "(" | "[" | "{") => {
                if text == "(" && i > 0 && is_callee_end(lexed, i - 1) {
                    return false;
                }
                depth += 1;
            }
            (TokenKind::Punct, ")" | "]" | "}") => depth = depth.saturating_sub(1),
            (TokenKind::Punct, "=") if depth > 0 => return false,
            (TokenKind::Punct, op) if op.len() >= 2 && op.ends_with('=') && !matches!(op, "==" | "===" | "!=" | "!==" | "<=" | ">=") => {
                return false
            }
            (TokenKind::Template, _) if i > 0 && is_callee_end(lexed, i - 1) => return false,
            _ => {}
        }
        i += 1;
    }
    true
}

fn is_callee_end(lexed: &Lexed<'_>, i: usize) -> bool {
    let token = lexed.tokens[i];
    match token.kind {
        TokenKind::Ident => {
            let text = lexed.text(i);
            !is_reserved(text) || matches!(text, "this" | "super")
        }
        TokenKind::Punct => matches!(lexed.text(i), ")" | "]"),
        _ => false,
    }
}

/// Whether a script does anything at top level besides declaring things
pub fn has_top_level_effects(lexed: &Lexed<'_>) -> bool {
    let len = lexed.tokens.len();
    let mut i = 0;
    while i < len {
        let text = lexed.text(i);
        if text == ";" {
            i += 1;
            continue;
        }
        let last = statement_end(lexed, i);
        let pure = match text {
            "import" if !lexed.is(i + 1, "(") && !lexed.is(i + 1, ".") => true,
            "export" => match lexed.text_at(i as isize + 1) {
                "{" | "*" => true,
                "default" => {
                    let body = i + 2;
                    matches!(lexed.text_at(body as isize), "function" | "class" | "async")
                        || range_is_pure(lexed, body, statement_end(lexed, body))
                }
                "function" | "class" | "async" => true,
                "const" | "let" | "var" => range_is_pure(lexed, i + 2, last),
                _ => false,
            },
            "function" | "class" => true,
            "async" if lexed.is(i + 1, "function") => true,
            "const" | "let" | "var" => range_is_pure(lexed, i + 1, last),
            _ => false,
        };
        if !pure {
            return true;
        }
        let last = if text == "export" && lexed.text_at(i as isize + 1) == "default" {
            statement_end(lexed, i + 2)
        } else if text == "export" && matches!(lexed.text_at(i as isize + 1), "function" | "class" | "async") {
            statement_end(lexed, i + 1)
        } else {
            last
        };
        i = last + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::module;
    use crate::bundler::graph::Dependency;
    use crate::bundler::lexer::tokenize;
    use crate::bundler::parser::scan;

    fn effects(source: &str) -> bool {
        has_top_level_effects(&tokenize(source).unwrap())
    }

    #[test]
    fn test_declaration_only_modules_are_pure() {
        assert!(!effects("import { x } from './x';\nexport const a = 1, b = [1, 2];\nexport function f() { sideEffect(); }\nconst g = () => call();\nexport default class {}"));
        assert!(effects("console.log('hi');"));
        assert!(effects("export const a = compute();"));
        assert!(effects("window.flag = true;"));
        assert!(effects("const t = new Thing();"));
    }

    #[test]
    fn test_removable_exports() {
        let source = "export const unused = 1;\nexport function used() { return helper(); }\nexport function helper() { return 2; }\nexport const effect = init();\n";
        let lexed = tokenize(source).unwrap();
        let syntax = scan(&lexed);
        let mut names = BTreeSet::new();
        names.insert("used".to_string());
        let removals = removable_exports(&lexed, &syntax, &UsedExports::Names(names));

        let removed: Vec<_> = removals.iter().flat_map(|r| r.names.clone()).collect();
        // helper is referenced by used(); effect has a call in its initializer
        assert_eq!(removed, vec!["unused"]);
        assert_eq!(lexed.text(removals[0].last), ";");
    }

    fn esm(path: &str, source: &str) -> crate::bundler::graph::Module {
        let lexed = tokenize(source).unwrap();
        let syntax = scan(&lexed);
        let mut m = module(path, &[]);
        m.imports = syntax.imports();
        m.exports = syntax.export_names();
        m.side_effects = has_top_level_effects(&lexed);
        m.syntax = syntax;
        m.code = source.to_string();
        m
    }

    #[test]
    fn test_usage_propagates_through_reexports() {
        let mut graph = ModuleGraph::new();
        let util = graph.insert(esm("/util.ts", "export const a = 1;\nexport const b = 2;\nexport const c = 3;"));
        let mut barrel = esm("/barrel.ts", "export * from './util';\nexport { c as renamed } from './util';");
        barrel.deps = vec![Dependency::Module(util)];
        let barrel = graph.insert(barrel);
        let mut pure = esm("/pure.ts", "export const unusedEverywhere = 1;");
        pure.deps = Vec::new();
        let pure = graph.insert(pure);
        let mut index = esm(
            "/index.ts",
            "import { a, renamed } from './barrel';\nimport './pure';\nconsole.log(a);",
        );
        index.deps = vec![Dependency::Module(barrel), Dependency::Module(pure)];
        let index = graph.insert(index);
        graph.set_entries(vec![("index".to_string(), index)]);

        let shaker = TreeShaker::analyze(&graph);
        assert!(shaker.used(util).contains("a"));
        assert!(!shaker.used(util).contains("b"));
        // `renamed` is imported but never referenced
        assert!(!shaker.used(util).contains("c"));
        assert!(shaker.is_dropped(&graph, pure));
        assert!(!shaker.is_dropped(&graph, index));
        assert!(TreeShaker::disabled().used(util).contains("b"));
    }
}

//! Turns modules into registry factories and chunks into output files.
//!
//! Module bodies keep their line layout: `import`/`export` syntax is blanked or
//! rewritten in place, and every read of an imported binding becomes a read of
//! the exporter's namespace. Namespaces and export getters are set up on the
//! factory's first line. That is what makes the line-level source maps valid.

use crate::bundler::chunker::{Chunk, ChunkKind, ChunkPlan};
use crate::bundler::graph::{Dependency, Loader, Module, ModuleGraph, ModuleIdx};
use crate::bundler::lexer::{is_ident_part, is_ident_start, is_reserved, tokenize, Lexed};
use crate::bundler::parser::{EsmStatement, ImportKind};
use crate::bundler::runtime::runtime_source;
use crate::bundler::scope::{binding_uses, top_level_variables};
use crate::bundler::sourcemap::{SourceMap, SourceMapBuilder};
use crate::bundler::tree_shaker::{removable_exports, TreeShaker};
use brisk_core::{BriskError, BriskResult, OutputFormat};
use std::collections::{BTreeSet, HashMap, HashSet};

const FACTORY_PARAMS: &str = "module, exports, __require, __import";
const DEFAULT_LOCAL: &str = "__brisk_default";

/// A module wrapped into `__brisk.define(..)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedModule {
    /// `__brisk.define("id", function (..) {` plus hoisted bindings, one line
    pub head: String,
    /// Rewritten module code, same line count as the transformed source
    pub body: String,
    /// Top-level `let`/`var` names the chunk must declare for this module
    pub lifted: Vec<String>,
    /// (local, exported) pairs of lifted bindings
    pub live_exports: Vec<(String, String)>,
}

impl RenderedModule {
    pub fn body_lines(&self) -> usize {
        if self.body.is_empty() {
            0
        } else {
            self.body.lines().count()
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "\\\"")))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_part)
}

/// `obj.name` or `obj["name"]`
fn member(object: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, js_string(name))
    }
}

fn property_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        js_string(name)
    }
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Replacement keeping the newlines of `range`
fn blank(code: &str, start: usize, end: usize) -> String {
    "\n".repeat(code[start..end].matches('\n').count())
}

fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.start < cursor {
            // nested in an edit already applied
            continue;
        }
        out.push_str(&code[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&code[cursor..]);
    out
}

/// Rewrites one module against the graph it belongs to
pub struct ModuleRenderer<'a> {
    graph: &'a ModuleGraph,
    shaker: &'a TreeShaker,
    live_entry: Option<ModuleIdx>,
}

impl<'a> ModuleRenderer<'a> {
    pub fn new(graph: &'a ModuleGraph, shaker: &'a TreeShaker) -> Self {
        Self {
            graph,
            shaker,
            live_entry: None,
        }
    }

    /// Exported top-level `let`/`var` bindings of `entry` move to the chunk
    /// scope so an ESM chunk can export them as live bindings
    pub fn with_live_entry(mut self, entry: ModuleIdx) -> Self {
        self.live_entry = Some(entry);
        self
    }

    fn head(module: &Module, hoisted: &[String]) -> String {
        let mut head = format!(
            "__brisk.define({}, function ({}) {{",
            js_string(&module.id),
            FACTORY_PARAMS
        );
        for line in hoisted {
            head.push(' ');
            head.push_str(line);
        }
        head
    }

    /// Registry id for an edge, or `None` when the target was shaken out
    fn target_id(&self, module: &Module, specifier: &str) -> Option<String> {
        match module.dep_for(specifier) {
            Some(Dependency::Module(idx)) => {
                if self.shaker.is_dropped(self.graph, *idx) {
                    None
                } else {
                    self.graph.get(*idx).map(|m| m.id.clone())
                }
            }
            Some(Dependency::External(name)) => Some(name.clone()),
            None => Some(specifier.to_string()),
        }
    }

    pub fn render(&self, idx: ModuleIdx) -> BriskResult<RenderedModule> {
        let module = self
            .graph
            .get(idx)
            .ok_or_else(|| BriskError::Chunking(format!("module #{} is not in the graph", idx.0)))?;

        match module.loader {
            Loader::Css => Ok(RenderedModule {
                head: Self::head(module, &[]),
                ..RenderedModule::default()
            }),
            Loader::Json | Loader::Text | Loader::File => {
                let value = module
                    .code
                    .trim_end()
                    .trim_end_matches(';')
                    .strip_prefix("export default ")
                    .unwrap_or(&module.code);
                Ok(RenderedModule {
                    head: Self::head(module, &[]),
                    body: format!("module.exports = {};", value),
                    ..RenderedModule::default()
                })
            }
            Loader::Js | Loader::Jsx | Loader::Ts | Loader::Tsx => self.render_script(idx, module),
        }
    }

    fn render_script(&self, idx: ModuleIdx, module: &Module) -> BriskResult<RenderedModule> {
        let code = module.code.as_str();
        let lexed = tokenize(code).map_err(|e| BriskError::transform(&module.path, "render", e))?;
        let syntax = &module.syntax;
        let span = |first: usize, last: usize| (lexed.tokens[first].start, lexed.tokens[last].end);

        let mut edits: Vec<Edit> = Vec::new();
        let mut getters: Vec<(String, String)> = Vec::new();
        let mut imports: Vec<String> = Vec::new();
        let mut reexports: Vec<String> = Vec::new();
        // imported local -> namespace read
        let mut live: HashMap<String, String> = HashMap::new();
        let mut counter = 0usize;
        let mut binding = |imports: &mut Vec<String>, target: &str| {
            let name = format!("__brisk_i{}", counter);
            counter += 1;
            imports.push(format!(
                "const {} = __brisk.interop(__require({}));",
                name,
                js_string(target)
            ));
            name
        };

        let removals = removable_exports(&lexed, syntax, self.shaker.used(idx));
        let removed: HashSet<&str> = removals.iter().flat_map(|r| r.names.iter().map(String::as_str)).collect();
        for removal in &removals {
            let (start, end) = span(removal.first, removal.last);
            edits.push(Edit {
                start,
                end,
                text: blank(code, start, end),
            });
        }

        for statement in &syntax.statements {
            match statement {
                EsmStatement::Import {
                    span: s,
                    specifier,
                    default,
                    namespace,
                    named,
                } => {
                    let (start, end) = span(s.first, s.last);
                    edits.push(Edit {
                        start,
                        end,
                        text: blank(code, start, end),
                    });
                    let Some(target) = self.target_id(module, specifier) else { continue };
                    if default.is_none() && namespace.is_none() && named.is_empty() {
                        imports.push(format!("__require({});", js_string(&target)));
                        continue;
                    }
                    let ns = binding(&mut imports, &target);
                    if let Some(local) = namespace {
                        imports.push(format!("const {} = {};", local, ns));
                    }
                    if let Some(local) = default {
                        live.insert(local.clone(), format!("{}.default", ns));
                    }
                    for (imported, local) in named {
                        live.insert(local.clone(), member(&ns, imported));
                    }
                }
                EsmStatement::ExportFrom {
                    span: s,
                    specifier,
                    named,
                    star,
                    star_as,
                } => {
                    let (start, end) = span(s.first, s.last);
                    edits.push(Edit {
                        start,
                        end,
                        text: blank(code, start, end),
                    });
                    let Some(target) = self.target_id(module, specifier) else { continue };
                    let ns = binding(&mut imports, &target);
                    for (imported, exported) in named {
                        getters.push((exported.clone(), member(&ns, imported)));
                    }
                    if let Some(name) = star_as {
                        getters.push((name.clone(), ns.clone()));
                    }
                    if *star {
                        reexports.push(format!("__brisk.reexport(exports, {});", ns));
                    }
                }
                EsmStatement::ExportNamed { span: s, named } => {
                    let (start, end) = span(s.first, s.last);
                    edits.push(Edit {
                        start,
                        end,
                        text: blank(code, start, end),
                    });
                    for (local, exported) in named {
                        getters.push((exported.clone(), local.clone()));
                    }
                }
                EsmStatement::ExportDecl { export_token, names } => {
                    if names.iter().any(|n| removed.contains(n.as_str())) {
                        continue;
                    }
                    let (start, end) = span(*export_token, *export_token);
                    edits.push(Edit {
                        start,
                        end,
                        text: String::new(),
                    });
                    for name in names {
                        getters.push((name.clone(), name.clone()));
                    }
                }
                EsmStatement::ExportDefaultExpr {
                    export_token,
                    default_token,
                } => {
                    let (start, end) = span(*export_token, *default_token);
                    edits.push(Edit {
                        start,
                        end,
                        text: format!("const {} =", DEFAULT_LOCAL),
                    });
                    getters.push(("default".to_string(), DEFAULT_LOCAL.to_string()));
                }
                EsmStatement::ExportDefaultDecl {
                    export_token,
                    default_token,
                    keyword_token,
                    name,
                } => {
                    let (start, end) = span(*export_token, *default_token);
                    edits.push(Edit {
                        start,
                        end,
                        text: String::new(),
                    });
                    let local = match name {
                        Some(name) => name.clone(),
                        None => {
                            let mut after = *keyword_token;
                            if lexed.is(after + 1, "*") {
                                after += 1;
                            }
                            let at = lexed.tokens[after].end;
                            edits.push(Edit {
                                start: at,
                                end: at,
                                text: format!(" {}", DEFAULT_LOCAL),
                            });
                            DEFAULT_LOCAL.to_string()
                        }
                    };
                    getters.push(("default".to_string(), local));
                }
            }
        }

        for call in &syntax.calls {
            let (start, end) = span(call.span.first, call.span.last);
            let target = self
                .target_id(module, &call.specifier)
                .unwrap_or_else(|| call.specifier.clone());
            let callee = match call.kind {
                ImportKind::Dynamic => "__import",
                _ => "__require",
            };
            edits.push(Edit {
                start,
                end,
                text: format!("{}({})", callee, js_string(&target)),
            });
        }

        let names: HashSet<String> = live.keys().cloned().collect();
        for found in binding_uses(&lexed, &names) {
            let Some(read) = live.get(&found.name) else { continue };
            // calls through a namespace must not see it as `this`
            let read = if found.callee {
                format!("(0, {})", read)
            } else {
                read.clone()
            };
            let text = if found.shorthand {
                format!("{}: {}", found.name, read)
            } else {
                read
            };
            edits.push(Edit {
                start: found.start,
                end: found.end,
                text,
            });
        }
        for getter in &mut getters {
            if let Some(read) = live.get(&getter.1) {
                getter.1 = read.clone();
            }
        }

        let mut lifted: Vec<String> = Vec::new();
        let mut live_exports = Vec::new();
        if self.live_entry == Some(idx) {
            let exported: HashSet<&str> = getters.iter().map(|(_, local)| local.as_str()).collect();
            for variable in top_level_variables(&lexed) {
                let wanted = variable.names.iter().any(|n| exported.contains(n.as_str()));
                let kept = variable.names.iter().all(|n| !removed.contains(n.as_str()));
                if variable.destructures || !wanted || !kept {
                    continue;
                }
                let keyword = lexed.tokens[variable.keyword];
                edits.push(Edit {
                    start: keyword.start,
                    end: keyword.end,
                    text: String::new(),
                });
                for name in variable.names {
                    if !lifted.contains(&name) {
                        lifted.push(name);
                    }
                }
            }
            live_exports = getters
                .iter()
                .filter(|(exported, local)| lifted.contains(local) && is_identifier(exported))
                .map(|(exported, local)| (local.clone(), exported.clone()))
                .collect();
        }

        edits.extend(hot_rewrites(&lexed));

        let mut hoisted = Vec::new();
        if !getters.is_empty() {
            let list: Vec<String> = getters
                .iter()
                .map(|(name, local)| format!("{}: () => {}", property_key(name), local))
                .collect();
            hoisted.push(format!("__brisk.export(exports, {{ {} }});", list.join(", ")));
        }
        hoisted.extend(imports);
        hoisted.extend(reexports);

        Ok(RenderedModule {
            head: Self::head(module, &hoisted),
            body: apply_edits(code, edits),
            lifted,
            live_exports,
        })
    }
}

/// `import.meta.hot` -> `module.hot`
fn hot_rewrites(lexed: &Lexed<'_>) -> Vec<Edit> {
    let mut edits = Vec::new();
    for i in 0..lexed.tokens.len() {
        let chain = lexed.is(i, "import")
            && lexed.is(i + 1, ".")
            && lexed.is(i + 2, "meta")
            && matches!(lexed.text_at(i as isize + 3), "." | "?.")
            && lexed.is(i + 4, "hot");
        if chain && !matches!(lexed.text_at(i as isize - 1), "." | "?.") {
            edits.push(Edit {
                start: lexed.tokens[i].start,
                end: lexed.tokens[i + 2].end,
                text: "module".to_string(),
            });
        }
    }
    edits
}

/// Output of rendering one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChunk {
    pub code: String,
    pub map: Option<SourceMap>,
    /// Concatenated CSS of the chunk's stylesheet modules
    pub css: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions<'a> {
    pub format: OutputFormat,
    pub banner: Option<&'a str>,
    pub global_name: Option<&'a str>,
    pub sourcemap: bool,
    /// Give modules a `module.hot` API
    pub hmr: bool,
}

/// Accumulates chunk text while tracking the current line
struct ChunkWriter {
    code: String,
    line: usize,
    map: Option<SourceMapBuilder>,
}

impl ChunkWriter {
    fn push(&mut self, text: &str) {
        self.code.push_str(text);
        if !text.ends_with('\n') {
            self.code.push('\n');
        }
        self.line += text.trim_end_matches('\n').matches('\n').count() + 1;
    }

    fn push_module(&mut self, module: &Module, rendered: &RenderedModule) {
        self.push(&rendered.head);
        if !rendered.body.is_empty() {
            let start = self.line;
            let lines = rendered.body_lines();
            self.push(&rendered.body);
            if let Some(map) = &mut self.map {
                let source = map.add_source(&module.id, &module.source);
                map.map_lines(start, source, 0, lines);
            }
        }
        self.push("});");
    }
}

fn banner_comment(banner: &str) -> String {
    let trimmed = banner.trim();
    if trimmed.starts_with("/*") || trimmed.starts_with("//") {
        trimmed.to_string()
    } else {
        format!("/*! {} */", trimmed.replace("*/", "* /"))
    }
}

/// Export names of an ESM entry, following `export *` chains
fn entry_export_names(graph: &ModuleGraph, idx: ModuleIdx) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(idx, true)];
    while let Some((current, is_root)) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let Some(module) = graph.get(current) else { continue };
        for name in &module.exports {
            if is_root || name != "default" {
                names.insert(name.clone());
            }
        }
        for specifier in &module.star_exports {
            if let Some(Dependency::Module(dep)) = module.dep_for(specifier) {
                stack.push((*dep, false));
            }
        }
    }
    names
}

fn external_binding(position: usize) -> String {
    format!("__brisk_ext{}", position)
}

/// Render one chunk: runtime, module factories and the format wrapper
pub fn render_chunk(
    graph: &ModuleGraph,
    shaker: &TreeShaker,
    plan: &ChunkPlan,
    chunk: &Chunk,
    options: &ChunkOptions<'_>,
) -> BriskResult<RenderedChunk> {
    let entry = match (chunk.kind, chunk.root) {
        (ChunkKind::Entry, Some(root)) => graph.get(root).map(|m| (root, m)),
        _ => None,
    };
    let renderer = match (options.format, entry) {
        (OutputFormat::Esm, Some((root, _))) => ModuleRenderer::new(graph, shaker).with_live_entry(root),
        _ => ModuleRenderer::new(graph, shaker),
    };
    let mut writer = ChunkWriter {
        code: String::new(),
        line: 0,
        map: options.sourcemap.then(|| SourceMapBuilder::new(chunk.file_name.clone())),
    };
    let externals = &chunk.externals;
    let ext_params: Vec<String> = (0..externals.len()).map(external_binding).collect();

    if let Some(banner) = options.banner {
        writer.push(&banner_comment(banner));
    }

    match options.format {
        OutputFormat::Esm => {
            for (position, specifier) in externals.iter().enumerate() {
                writer.push(&format!(
                    "import * as {} from {};",
                    external_binding(position),
                    js_string(specifier)
                ));
            }
            for file in &chunk.imports {
                writer.push(&format!("import {};", js_string(&format!("./{}", file))));
            }
        }
        OutputFormat::Cjs => {
            for file in &chunk.imports {
                writer.push(&format!("require({});", js_string(&format!("./{}", file))));
            }
        }
        OutputFormat::Umd => {
            let requires: Vec<String> = externals
                .iter()
                .map(|s| format!("require({})", js_string(s)))
                .collect();
            let amd: Vec<String> = externals.iter().map(|s| js_string(s)).collect();
            let globals: Vec<String> = externals.iter().map(|s| member("root", s)).collect();
            let global = match options.global_name {
                Some(name) => format!("{} = ", member("root", name)),
                None => String::new(),
            };
            writer.push("(function (root, factory) {");
            writer.push(&format!(
                "  if (typeof exports === \"object\" && typeof module !== \"undefined\") module.exports = factory({});",
                requires.join(", ")
            ));
            writer.push(&format!(
                "  else if (typeof define === \"function\" && define.amd) define([{}], factory);",
                amd.join(", ")
            ));
            writer.push(&format!("  else {}factory({});", global, globals.join(", ")));
            writer.push(&format!(
                "}})(typeof globalThis !== \"undefined\" ? globalThis : this, function ({}) {{",
                ext_params.join(", ")
            ));
        }
        OutputFormat::Iife => match options.global_name {
            Some(name) => writer.push(&format!("var {} = (function () {{", name)),
            None => writer.push("(function () {"),
        },
    }

    writer.push(runtime_source());
    if options.hmr {
        writer.push("__brisk.hmr = true;");
    }
    if !plan.dynamic_loads.is_empty() {
        let loader = match options.format {
            OutputFormat::Esm => "function (file) { return import(\"./\" + file); }",
            _ => "function (file) { return require(\"./\" + file); }",
        };
        writer.push(&format!("__brisk.loader = __brisk.loader || {};", loader));
        for (root, files) in &plan.dynamic_loads {
            let Some(module) = graph.get(*root) else { continue };
            let list: Vec<String> = files.iter().map(|f| js_string(f)).collect();
            writer.push(&format!(
                "__brisk.chunks[{}] = [{}];",
                js_string(&module.id),
                list.join(", ")
            ));
        }
    }

    for (position, specifier) in externals.iter().enumerate() {
        let value = match options.format {
            OutputFormat::Esm | OutputFormat::Umd => external_binding(position),
            OutputFormat::Cjs => format!("require({})", js_string(specifier)),
            OutputFormat::Iife => member("globalThis", specifier),
        };
        writer.push(&format!("__brisk.external({}, {});", js_string(specifier), value));
    }

    let mut css = Vec::new();
    let mut lifted = Vec::new();
    let mut live_exports = Vec::new();
    for idx in &chunk.modules {
        if shaker.is_dropped(graph, *idx) {
            continue;
        }
        let Some(module) = graph.get(*idx) else { continue };
        if module.is_css() && !module.code.trim().is_empty() {
            css.push(module.code.trim_end().to_string());
        }
        let mut rendered = renderer.render(*idx)?;
        writer.push_module(module, &rendered);
        lifted.append(&mut rendered.lifted);
        live_exports.append(&mut rendered.live_exports);
    }

    match options.format {
        OutputFormat::Esm => {
            if let Some((root, entry)) = entry {
                if !lifted.is_empty() {
                    writer.push(&format!("let {};", lifted.join(", ")));
                }
                writer.push(&format!("const __brisk_entry = __brisk.require({});", js_string(&entry.id)));
                if entry.syntax.is_esm() {
                    let names = entry_export_names(graph, root);
                    let is_live = |name: &str| live_exports.iter().any(|(_, exported)| exported == name);
                    let named: Vec<&str> = names
                        .iter()
                        .map(String::as_str)
                        .filter(|n| *n != "default" && is_identifier(n) && !is_reserved(n) && !is_live(n))
                        .collect();
                    if !named.is_empty() {
                        writer.push(&format!("export const {{ {} }} = __brisk_entry;", named.join(", ")));
                    }
                    if !live_exports.is_empty() {
                        let list: Vec<String> = live_exports
                            .iter()
                            .map(|(local, exported)| {
                                if local == exported {
                                    local.clone()
                                } else {
                                    format!("{} as {}", local, exported)
                                }
                            })
                            .collect();
                        writer.push(&format!("export {{ {} }};", list.join(", ")));
                    }
                    if names.contains("default") && !is_live("default") {
                        writer.push("export default __brisk_entry.default;");
                    }
                } else {
                    writer.push("export default __brisk_entry;");
                }
            }
        }
        OutputFormat::Cjs => {
            if let Some((_, entry)) = entry {
                writer.push(&format!("module.exports = __brisk.require({});", js_string(&entry.id)));
            }
        }
        OutputFormat::Umd | OutputFormat::Iife => {
            match entry {
                Some((_, entry)) => writer.push(&format!("return __brisk.require({});", js_string(&entry.id))),
                None => writer.push("return __brisk;"),
            }
            writer.push(if options.format == OutputFormat::Umd { "});" } else { "})();" });
        }
    }

    Ok(RenderedChunk {
        code: writer.code,
        map: writer.map.map(SourceMapBuilder::build),
        css: (!css.is_empty()).then(|| css.join("\n") + "\n"),
    })
}

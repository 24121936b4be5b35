use crate::bundler::graph::{Dependency, ModuleGraph, ModuleIdx};
use crate::bundler::parser::ImportKind;
use brisk_core::core::fingerprint::short_hash;
use brisk_core::{BriskError, BriskResult, OutputFormat};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Entry,
    Vendor,
    Dynamic,
    Common,
}

/// A group of modules emitted as one output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub file_name: String,
    pub format: OutputFormat,
    pub kind: ChunkKind,
    /// Dependencies first
    pub modules: Vec<ModuleIdx>,
    /// Root module executed when the chunk loads (entry chunks) or on `import()` (dynamic chunks)
    pub root: Option<ModuleIdx>,
    /// File names of chunks that must be loaded before this one
    pub imports: Vec<String>,
    /// External specifiers used by modules in this chunk
    pub externals: Vec<String>,
}

impl Chunk {
    pub fn contains(&self, idx: ModuleIdx) -> bool {
        self.modules.contains(&idx)
    }
}

/// Chunk layout of one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// Chunk files needed before `import(id)` of a dynamic root can run
    pub dynamic_loads: BTreeMap<ModuleIdx, Vec<String>>,
}

impl ChunkPlan {
    /// Membership view used to decide whether a rebuild can reuse chunks
    pub fn topology(&self) -> Vec<(String, Vec<ModuleIdx>, Vec<String>)> {
        self.chunks
            .iter()
            .map(|c| (c.file_name.clone(), c.modules.clone(), c.imports.clone()))
            .collect()
    }

    pub fn chunk_of(&self, idx: ModuleIdx) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.contains(idx))
    }
}

fn file_name(name: &str, format: OutputFormat) -> String {
    format!("{}.{}", name, format.extension())
}

fn stem_of(graph: &ModuleGraph, idx: ModuleIdx) -> String {
    graph
        .get(idx)
        .and_then(|m| Path::new(&m.id).file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| format!("chunk{}", idx.0))
}

fn externals_of(graph: &ModuleGraph, modules: &[ModuleIdx]) -> Vec<String> {
    let set: BTreeSet<String> = modules
        .iter()
        .filter_map(|idx| graph.get(*idx))
        .flat_map(|m| m.deps.iter())
        .filter_map(|dep| match dep {
            Dependency::External(specifier) => Some(specifier.clone()),
            Dependency::Module(_) => None,
        })
        .collect();
    set.into_iter().collect()
}

fn kind_rank(kind: ChunkKind) -> u8 {
    match kind {
        ChunkKind::Entry => 0,
        ChunkKind::Dynamic => 1,
        ChunkKind::Vendor => 2,
        ChunkKind::Common => 3,
    }
}

fn is_static(kind: ImportKind) -> bool {
    !kind.is_dynamic()
}

/// Split the graph into chunks.
///
/// Without splitting, every entry gets one chunk with all modules it reaches.
/// With splitting, node_modules go to `vendor`, modules reached by one root go to
/// that root's chunk, and modules shared by several roots go to a `common` chunk
/// named after the root set.
pub fn split(graph: &ModuleGraph, format: OutputFormat, splitting: bool) -> BriskResult<ChunkPlan> {
    if graph.entries().is_empty() {
        return Err(BriskError::Chunking("no entry modules in the graph".to_string()));
    }
    if splitting {
        Ok(split_shared(graph, format))
    } else {
        Ok(split_per_entry(graph, format))
    }
}

fn split_per_entry(graph: &ModuleGraph, format: OutputFormat) -> ChunkPlan {
    let chunks = graph
        .entries()
        .iter()
        .map(|(name, entry)| {
            let mut visited = HashSet::new();
            let mut modules = Vec::new();
            graph.post_order_from(*entry, |_| true, &mut visited, &mut modules);
            Chunk {
                name: name.clone(),
                file_name: file_name(name, format),
                format,
                kind: ChunkKind::Entry,
                externals: externals_of(graph, &modules),
                modules,
                root: Some(*entry),
                imports: Vec::new(),
            }
        })
        .collect();
    ChunkPlan {
        chunks,
        dynamic_loads: BTreeMap::new(),
    }
}

/// Entries in config order, then dynamic-import targets in DFS discovery order
fn collect_roots(graph: &ModuleGraph) -> Vec<ModuleIdx> {
    let mut roots: Vec<ModuleIdx> = graph.entries().iter().map(|(_, idx)| *idx).collect();
    let mut seen: HashSet<ModuleIdx> = HashSet::new();
    let mut stack: Vec<ModuleIdx> = roots.iter().rev().copied().collect();

    while let Some(idx) = stack.pop() {
        if !seen.insert(idx) {
            continue;
        }
        let Some(module) = graph.get(idx) else { continue };
        let deps: Vec<_> = module.module_deps().collect();
        for (dep, kind) in &deps {
            if kind.is_dynamic() && !roots.contains(dep) {
                roots.push(*dep);
            }
        }
        // visit in source order
        for (dep, _) in deps.iter().rev() {
            if !seen.contains(dep) {
                stack.push(*dep);
            }
        }
    }
    roots
}

fn static_closure(graph: &ModuleGraph, root: ModuleIdx) -> Vec<ModuleIdx> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    graph.post_order_from(root, is_static, &mut visited, &mut out);
    out
}

fn split_shared(graph: &ModuleGraph, format: OutputFormat) -> ChunkPlan {
    let roots = collect_roots(graph);
    let closures: Vec<Vec<ModuleIdx>> = roots.iter().map(|r| static_closure(graph, *r)).collect();

    // root positions reaching each module
    let mut reached_by: HashMap<ModuleIdx, BTreeSet<usize>> = HashMap::new();
    for (position, closure) in closures.iter().enumerate() {
        for idx in closure {
            reached_by.entry(*idx).or_default().insert(position);
        }
    }

    let order = graph.post_order();
    let root_names = root_names(graph, &roots);

    #[derive(Clone, PartialEq, Eq, Hash)]
    enum Home {
        Root(usize),
        Vendor,
        Common(Vec<usize>),
    }

    let mut homes: Vec<(ModuleIdx, Home)> = Vec::new();
    for idx in &order {
        let Some(module) = graph.get(*idx) else { continue };
        let Some(reach) = reached_by.get(idx) else { continue };
        let home = if let Some(root) = roots.iter().position(|r| r == idx) {
            // roots always own their chunk, even when shared or vendored
            Home::Root(root)
        } else if module.in_node_modules() {
            Home::Vendor
        } else if reach.len() == 1 {
            Home::Root(*reach.iter().next().unwrap_or(&0))
        } else {
            Home::Common(reach.iter().copied().collect())
        };
        homes.push((*idx, home));
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut home_chunk: HashMap<Home, usize> = HashMap::new();

    for (position, root) in roots.iter().enumerate() {
        let is_entry = position < graph.entries().len();
        let name = root_names[position].clone();
        home_chunk.insert(Home::Root(position), chunks.len());
        chunks.push(Chunk {
            file_name: file_name(&name, format),
            name,
            format,
            kind: if is_entry { ChunkKind::Entry } else { ChunkKind::Dynamic },
            modules: Vec::new(),
            root: Some(*root),
            imports: Vec::new(),
            externals: Vec::new(),
        });
    }

    for (idx, home) in &homes {
        let chunk = match home_chunk.get(home) {
            Some(chunk) => *chunk,
            None => {
                let (name, kind) = match home {
                    Home::Vendor => ("vendor".to_string(), ChunkKind::Vendor),
                    Home::Common(set) => {
                        let key: Vec<String> = set
                            .iter()
                            .filter_map(|p| graph.get(roots[*p]).map(|m| m.id.clone()))
                            .collect();
                        (format!("common-{}", short_hash(&key.join("\n"), 8)), ChunkKind::Common)
                    }
                    Home::Root(_) => unreachable!("root chunks are created up front"),
                };
                home_chunk.insert(home.clone(), chunks.len());
                chunks.push(Chunk {
                    file_name: file_name(&name, format),
                    name,
                    format,
                    kind,
                    modules: Vec::new(),
                    root: None,
                    imports: Vec::new(),
                    externals: Vec::new(),
                });
                chunks.len() - 1
            }
        };
        chunks[chunk].modules.push(*idx);
    }

    // root chunks lead, so sorting the rest keeps their positions
    chunks.sort_by_key(|c| kind_rank(c.kind));

    // which chunk holds each module
    let mut location: HashMap<ModuleIdx, usize> = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        for idx in &chunk.modules {
            location.insert(*idx, i);
        }
    }

    let mut dynamic_loads = BTreeMap::new();
    for (position, root) in roots.iter().enumerate() {
        let Some(&own) = home_chunk.get(&Home::Root(position)) else { continue };
        let mut needed: Vec<usize> = Vec::new();
        for idx in &closures[position] {
            if let Some(&chunk) = location.get(idx) {
                if chunk != own && !needed.contains(&chunk) {
                    needed.push(chunk);
                }
            }
        }
        // shared chunks register before the chunk that needs them
        needed.sort_unstable();
        let files: Vec<String> = needed.iter().map(|c| chunks[*c].file_name.clone()).collect();
        chunks[own].imports = files.clone();
        if position >= graph.entries().len() {
            let mut all = files;
            all.push(chunks[own].file_name.clone());
            dynamic_loads.insert(*root, all);
        }
    }

    for chunk in &mut chunks {
        chunk.externals = externals_of(graph, &chunk.modules);
    }

    ChunkPlan { chunks, dynamic_loads }
}

/// Chunk names for roots: entry names, then file stems made unique with a hash
fn root_names(graph: &ModuleGraph, roots: &[ModuleIdx]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (position, root) in roots.iter().enumerate() {
        let name = if position < graph.entries().len() {
            graph.entries()[position].0.clone()
        } else {
            let stem = stem_of(graph, *root);
            let id = graph.get(*root).map(|m| m.id.clone()).unwrap_or_default();
            if names.contains(&stem) || stem == "vendor" {
                format!("{}-{}", stem, short_hash(&id, 8))
            } else {
                stem
            }
        };
        names.push(name);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::module;
    use crate::bundler::graph::Module;

    fn with_deps(mut m: Module, deps: Vec<Dependency>) -> Module {
        m.deps = deps;
        m
    }

    /// a and b both import shared; a lazily imports lazy; a imports lodash
    fn two_entries() -> (ModuleGraph, [ModuleIdx; 6]) {
        let mut graph = ModuleGraph::new();
        let shared = graph.insert(module("/src/shared.ts", &[]));
        let lodash = graph.insert(module("/node_modules/lodash/index.js", &[]));
        let lazy = graph.insert(with_deps(
            module("/src/lazy.ts", &[("./shared", ImportKind::Static)]),
            vec![Dependency::Module(shared)],
        ));
        let only_a = graph.insert(module("/src/only-a.ts", &[]));
        let a = graph.insert(with_deps(
            module(
                "/src/a.ts",
                &[
                    ("./shared", ImportKind::Static),
                    ("lodash", ImportKind::Static),
                    ("./only-a", ImportKind::Static),
                    ("./lazy", ImportKind::Dynamic),
                    ("react", ImportKind::Static),
                ],
            ),
            vec![
                Dependency::Module(shared),
                Dependency::Module(lodash),
                Dependency::Module(only_a),
                Dependency::Module(lazy),
                Dependency::External("react".to_string()),
            ],
        ));
        let b = graph.insert(with_deps(
            module("/src/b.ts", &[("./shared", ImportKind::Static)]),
            vec![Dependency::Module(shared)],
        ));
        graph.set_entries(vec![("a".to_string(), a), ("b".to_string(), b)]);
        (graph, [shared, lodash, lazy, only_a, a, b])
    }

    #[test]
    fn test_without_splitting_duplicates_shared_modules() {
        let (graph, [shared, lodash, lazy, only_a, a, b]) = two_entries();
        let plan = split(&graph, OutputFormat::Esm, false).unwrap();
        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(plan.chunks[0].modules, vec![shared, lodash, only_a, lazy, a]);
        assert_eq!(plan.chunks[0].externals, vec!["react".to_string()]);
        assert_eq!(plan.chunks[1].modules, vec![shared, b]);
        assert_eq!(plan.chunks[1].file_name, "b.js");
    }

    #[test]
    fn test_splitting_assigns_vendor_common_and_dynamic() {
        let (graph, [shared, lodash, lazy, only_a, a, b]) = two_entries();
        let plan = split(&graph, OutputFormat::Esm, true).unwrap();
        let names: Vec<_> = plan.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names[..4], ["a", "b", "lazy", "vendor"]);

        let chunk = |name: &str| plan.chunks.iter().find(|c| c.name == name).unwrap();
        assert_eq!(chunk("a").modules, vec![only_a, a]);
        assert_eq!(chunk("b").modules, vec![b]);
        assert_eq!(chunk("lazy").modules, vec![lazy]);
        assert_eq!(chunk("vendor").modules, vec![lodash]);

        let common = plan.chunks.iter().find(|c| c.kind == ChunkKind::Common).unwrap();
        assert!(common.name.starts_with("common-"));
        assert_eq!(common.modules, vec![shared]);

        assert!(chunk("a").imports.contains(&common.file_name));
        assert!(chunk("a").imports.contains(&"vendor.js".to_string()));
        assert_eq!(
            plan.dynamic_loads[&lazy],
            vec![common.file_name.clone(), "lazy.js".to_string()]
        );
    }

    #[test]
    fn test_split_is_deterministic() {
        let (graph, _) = two_entries();
        let first = split(&graph, OutputFormat::Cjs, true).unwrap();
        let second = split(&graph, OutputFormat::Cjs, true).unwrap();
        assert_eq!(first, second);
        assert!(first.chunks.iter().all(|c| c.file_name.ends_with(".cjs")));
    }
}

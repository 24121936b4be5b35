use crate::bundler::parser::{ImportKind, ImportRecord, ModuleSyntax};
use brisk_core::Fingerprint;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// How a file's contents are turned into a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    Json,
    Text,
    File,
}

impl Loader {
    /// Pick a loader from the file extension; unknown extensions are copied as files
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "js" | "mjs" | "cjs" => Loader::Js,
            "jsx" => Loader::Jsx,
            "ts" | "mts" | "cts" => Loader::Ts,
            "tsx" => Loader::Tsx,
            "css" => Loader::Css,
            "json" => Loader::Json,
            "txt" | "md" | "html" | "svg" => Loader::Text,
            _ => Loader::File,
        }
    }

    pub fn is_typescript(&self) -> bool {
        matches!(self, Loader::Ts | Loader::Tsx)
    }

    pub fn needs_jsx_transform(&self) -> bool {
        matches!(self, Loader::Jsx | Loader::Tsx)
    }
}

/// Arena index of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(pub u32);

impl ModuleIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A resolved edge, parallel to `Module::imports`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    Module(ModuleIdx),
    External(String),
}

impl Dependency {
    pub fn module(&self) -> Option<ModuleIdx> {
        match self {
            Dependency::Module(idx) => Some(*idx),
            Dependency::External(_) => None,
        }
    }
}

/// Asset copied to the output for `file`-loader modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSource {
    /// Output path relative to `out_dir`, content-hashed
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub path: PathBuf,
    pub id: String,
    pub source: String,
    pub loader: Loader,
    pub imports: Vec<ImportRecord>,
    pub deps: Vec<Dependency>,
    /// Output of load + transform hooks, as JavaScript (or CSS for the css loader)
    pub code: String,
    pub fingerprint: Fingerprint,
    pub side_effects: bool,
    pub accepts_hot: bool,
    pub exports: Vec<String>,
    /// Specifiers of `export * from` statements
    pub star_exports: Vec<String>,
    /// Scan of `code`; empty for non-script loaders
    pub syntax: ModuleSyntax,
    pub asset: Option<AssetSource>,
}

impl Module {
    pub fn is_css(&self) -> bool {
        self.loader == Loader::Css
    }

    pub fn in_node_modules(&self) -> bool {
        self.path.components().any(|c| c.as_os_str() == "node_modules")
    }

    /// Resolved module edges with their import kind
    pub fn module_deps(&self) -> impl Iterator<Item = (ModuleIdx, ImportKind)> + '_ {
        self.deps
            .iter()
            .zip(&self.imports)
            .filter_map(|(dep, record)| dep.module().map(|idx| (idx, record.kind)))
    }

    /// Dependency for `specifier`, if this module imports it
    pub fn dep_for(&self, specifier: &str) -> Option<&Dependency> {
        self.imports
            .iter()
            .position(|r| r.specifier == specifier)
            .and_then(|i| self.deps.get(i))
    }
}

/// Dependency graph of every module reachable from the entries
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    modules: Vec<Option<Module>>,
    by_path: HashMap<PathBuf, ModuleIdx>,
    entries: Vec<(String, ModuleIdx)>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new module; its path must not be in the graph yet
    pub fn insert(&mut self, module: Module) -> ModuleIdx {
        let idx = ModuleIdx(self.modules.len() as u32);
        self.by_path.insert(module.path.clone(), idx);
        self.modules.push(Some(module));
        idx
    }

    /// Replace a module in place, keeping its arena slot
    pub fn replace(&mut self, idx: ModuleIdx, module: Module) {
        self.by_path.insert(module.path.clone(), idx);
        self.modules[idx.index()] = Some(module);
    }

    pub fn get(&self, idx: ModuleIdx) -> Option<&Module> {
        self.modules.get(idx.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: ModuleIdx) -> Option<&mut Module> {
        self.modules.get_mut(idx.index()).and_then(Option::as_mut)
    }

    pub fn by_path(&self, path: &Path) -> Option<ModuleIdx> {
        self.by_path.get(path).copied()
    }

    pub fn set_entries(&mut self, entries: Vec<(String, ModuleIdx)>) {
        self.entries = entries;
    }

    pub fn entries(&self) -> &[(String, ModuleIdx)] {
        &self.entries
    }

    pub fn is_entry(&self, idx: ModuleIdx) -> bool {
        self.entries.iter().any(|(_, e)| *e == idx)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Live modules in arena order
    pub fn iter(&self) -> impl Iterator<Item = (ModuleIdx, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|m| (ModuleIdx(i as u32), m)))
    }

    /// Modules that import `idx`, in arena order
    pub fn importers_of(&self, idx: ModuleIdx) -> Vec<ModuleIdx> {
        self.iter()
            .filter(|(_, m)| m.module_deps().any(|(dep, _)| dep == idx))
            .map(|(i, _)| i)
            .collect()
    }

    /// Every module reachable from the entries over static and dynamic edges
    pub fn reachable(&self) -> HashSet<ModuleIdx> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ModuleIdx> = self.entries.iter().map(|(_, idx)| *idx).collect();
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            if let Some(module) = self.get(idx) {
                stack.extend(module.module_deps().map(|(dep, _)| dep));
            }
        }
        seen
    }

    /// Drop modules no entry reaches any more; returns their paths
    pub fn prune_unreachable(&mut self) -> Vec<PathBuf> {
        let live = self.reachable();
        let mut removed = Vec::new();
        for (i, slot) in self.modules.iter_mut().enumerate() {
            let dead = slot.is_some() && !live.contains(&ModuleIdx(i as u32));
            if dead {
                if let Some(module) = slot.take() {
                    self.by_path.remove(&module.path);
                    removed.push(module.path);
                }
            }
        }
        removed
    }

    /// Dependencies-first order from `root`, following imports in source order.
    ///
    /// `follow` decides which edge kinds are walked; `visited` is shared so callers
    /// can build one order across several roots.
    pub fn post_order_from(
        &self,
        root: ModuleIdx,
        follow: impl Fn(ImportKind) -> bool + Copy,
        visited: &mut HashSet<ModuleIdx>,
        out: &mut Vec<ModuleIdx>,
    ) {
        // iterative DFS: (module, next edge to visit)
        let mut stack: Vec<(ModuleIdx, usize)> = Vec::new();
        if !visited.insert(root) {
            return;
        }
        stack.push((root, 0));
        while let Some((idx, edge)) = stack.pop() {
            let next = self.get(idx).and_then(|m| {
                m.module_deps()
                    .enumerate()
                    .skip(edge)
                    .find(|(_, (dep, kind))| follow(*kind) && !visited.contains(dep))
                    .map(|(position, (dep, _))| (position, dep))
            });
            match next {
                Some((position, dep)) => {
                    stack.push((idx, position + 1));
                    visited.insert(dep);
                    stack.push((dep, 0));
                }
                None => out.push(idx),
            }
        }
    }

    /// Post-order over all entries (static edges, then dynamic targets)
    pub fn post_order(&self) -> Vec<ModuleIdx> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        for (_, entry) in &self.entries {
            self.post_order_from(*entry, |_| true, &mut visited, &mut out);
        }
        out
    }

    /// Structural view used to compare two graphs
    pub fn snapshot(&self) -> GraphSnapshot {
        let modules = self
            .iter()
            .map(|(_, module)| {
                let edges = module
                    .deps
                    .iter()
                    .map(|dep| match dep {
                        Dependency::Module(idx) => self
                            .get(*idx)
                            .map(|m| m.path.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        Dependency::External(specifier) => format!("external:{}", specifier),
                    })
                    .collect();
                (
                    module.path.clone(),
                    ModuleSnapshot {
                        fingerprint: module.fingerprint.clone(),
                        edges,
                    },
                )
            })
            .collect();
        let entries = self
            .entries
            .iter()
            .filter_map(|(name, idx)| self.get(*idx).map(|m| (name.clone(), m.path.clone())))
            .collect();
        GraphSnapshot { modules, entries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSnapshot {
    pub fingerprint: Fingerprint,
    /// Resolved edge targets in import order
    pub edges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub modules: BTreeMap<PathBuf, ModuleSnapshot>,
    pub entries: Vec<(String, PathBuf)>,
}

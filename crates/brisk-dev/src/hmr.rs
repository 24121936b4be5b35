//! Hot module replacement bookkeeping.
//!
//! [`HmrManager`] mirrors the module graph as a reverse-dependency index and
//! turns file changes into [`UpdateRecord`]s: a targeted `update` when every
//! importer chain of the changed module reaches a module that accepts hot
//! updates, a `full-reload` otherwise.

use brisk_bundle::bundler::graph::ModuleGraph;
use brisk_bundle::bundler::BuildResult;
use brisk_core::core::path::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    Connected,
    Update,
    FullReload,
    Error,
}

/// One message pushed to every connected browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub seq: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Output files to fetch again (chunks and stylesheets)
    #[serde(default)]
    pub files: Vec<String>,
    /// Module ids to re-run, dependencies first
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UpdateRecord {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"type\":\"full-reload\",\"seq\":{}}}", self.seq))
    }
}

/// How one changed file propagates through the graph
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// Stale modules, in the order they were reached
    Update(Vec<PathBuf>),
    FullReload(String),
}

#[derive(Debug)]
pub struct HmrManager {
    seq: AtomicU64,
    /// index.html locations that force a reload when edited
    html_files: Vec<PathBuf>,
    importers: HashMap<PathBuf, Vec<PathBuf>>,
    ids: HashMap<PathBuf, String>,
    entries: HashSet<PathBuf>,
    accepting: HashSet<PathBuf>,
    /// Module id -> output files containing it
    files: HashMap<String, Vec<String>>,
}

impl HmrManager {
    /// `served_roots` are the directories whose `index.html` is served
    pub fn new(served_roots: &[PathBuf]) -> Self {
        Self {
            seq: AtomicU64::new(0),
            html_files: served_roots.iter().map(|r| normalize_path(&r.join("index.html"))).collect(),
            importers: HashMap::new(),
            ids: HashMap::new(),
            entries: HashSet::new(),
            accepting: HashSet::new(),
            files: HashMap::new(),
        }
    }

    /// Rebuild the reverse-dependency index from `graph`
    pub fn track(&mut self, graph: &ModuleGraph) {
        self.importers.clear();
        self.ids.clear();
        self.accepting.clear();
        self.entries = graph
            .entries()
            .iter()
            .filter_map(|(_, idx)| graph.get(*idx).map(|m| m.path.clone()))
            .collect();

        for (_, module) in graph.iter() {
            self.ids.insert(module.path.clone(), module.id.clone());
            if module.accepts_hot || module.is_css() {
                self.accepting.insert(module.path.clone());
            }
            for (dep, _) in module.module_deps() {
                if let Some(target) = graph.get(dep) {
                    let importers = self.importers.entry(target.path.clone()).or_default();
                    if !importers.contains(&module.path) {
                        importers.push(module.path.clone());
                    }
                }
            }
        }
        debug!("HMR tracking {} modules", self.ids.len());
    }

    /// Remember which output files carry each module
    pub fn track_output(&mut self, result: &BuildResult) {
        self.files.clear();
        for chunk in &result.chunks {
            for id in &chunk.modules {
                let files = self.files.entry(id.clone()).or_default();
                files.push(chunk.file_name.clone());
                if let Some(css) = &chunk.css_file {
                    files.push(css.clone());
                }
            }
        }
    }

    fn record(&self, kind: UpdateKind, files: Vec<String>, modules: Vec<String>, message: Option<String>) -> UpdateRecord {
        UpdateRecord {
            kind,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: chrono::Utc::now().timestamp_millis(),
            files,
            modules,
            message,
        }
    }

    /// Greeting sent to a newly connected client
    pub fn connected(&self) -> UpdateRecord {
        self.record(UpdateKind::Connected, Vec::new(), Vec::new(), None)
    }

    /// Error overlay record
    pub fn error(&self, message: impl Into<String>) -> UpdateRecord {
        self.record(UpdateKind::Error, Vec::new(), Vec::new(), Some(message.into()))
    }

    fn propagate(&self, path: &Path) -> Option<Outcome> {
        let path = normalize_path(path);
        if self.html_files.contains(&path) {
            return Some(Outcome::FullReload(format!("{} changed", path.display())));
        }
        if !self.ids.contains_key(&path) {
            return None;
        }

        let mut stale = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([path]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            stale.push(current.clone());
            if self.accepting.contains(&current) {
                continue;
            }
            let importers = self.importers.get(&current).map(Vec::as_slice).unwrap_or_default();
            if self.entries.contains(&current) || importers.is_empty() {
                return Some(Outcome::FullReload(format!(
                    "{} is not accepted by any importer",
                    self.ids.get(&current).map(String::as_str).unwrap_or("module")
                )));
            }
            queue.extend(importers.iter().cloned());
        }
        Some(Outcome::Update(stale))
    }

    pub fn on_file_changed(&self, path: &Path) -> Option<UpdateRecord> {
        self.on_files_changed(&[path.to_path_buf()])
    }

    /// One record for a batch of changes; a single full reload wins over updates
    pub fn on_files_changed(&self, paths: &[PathBuf]) -> Option<UpdateRecord> {
        let mut modules: Vec<String> = Vec::new();
        let mut reload: Option<String> = None;
        for path in paths {
            match self.propagate(path) {
                None => {}
                Some(Outcome::FullReload(reason)) => {
                    reload.get_or_insert(reason);
                }
                Some(Outcome::Update(stale)) => {
                    for module in stale {
                        if let Some(id) = self.ids.get(&module) {
                            if !modules.contains(id) {
                                modules.push(id.clone());
                            }
                        }
                    }
                }
            }
        }

        if let Some(reason) = reload {
            debug!("HMR full reload: {}", reason);
            return Some(self.record(UpdateKind::FullReload, Vec::new(), Vec::new(), Some(reason)));
        }
        if modules.is_empty() {
            return None;
        }
        let files: BTreeSet<String> = modules
            .iter()
            .filter_map(|id| self.files.get(id))
            .flatten()
            .cloned()
            .collect();
        Some(self.record(UpdateKind::Update, files.into_iter().collect(), modules, None))
    }
}

/// Folds bursts of change events into one batch.
///
/// A batch is emitted once `window` passes without a new event.
pub struct ChangeCoalescer {
    rx: mpsc::Receiver<PathBuf>,
    window: Duration,
}

impl ChangeCoalescer {
    pub fn new(rx: mpsc::Receiver<PathBuf>, window: Duration) -> Self {
        Self { rx, window }
    }

    /// Next deduplicated batch, in first-seen order; `None` once the sender is gone
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        let first = self.rx.recv().await?;
        let mut seen = HashSet::from([first.clone()]);
        let mut batch = vec![first];
        loop {
            match tokio::time::timeout(self.window, self.rx.recv()).await {
                Ok(Some(path)) => {
                    if seen.insert(path.clone()) {
                        batch.push(path);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brisk_bundle::bundler::graph::{Dependency, Loader, Module, ModuleIdx};
    use brisk_bundle::bundler::parser::{ImportKind, ImportRecord, ModuleSyntax};
    use brisk_core::Fingerprint;

    fn module(path: &str, accepts_hot: bool) -> Module {
        Module {
            path: PathBuf::from(format!("/app/{}", path)),
            id: path.to_string(),
            source: String::new(),
            loader: Loader::from_path(Path::new(path)),
            imports: Vec::new(),
            deps: Vec::new(),
            code: String::new(),
            fingerprint: Fingerprint::of(path.as_bytes()),
            side_effects: true,
            accepts_hot,
            exports: Vec::new(),
            star_exports: Vec::new(),
            syntax: ModuleSyntax::default(),
            asset: None,
        }
    }

    fn link(graph: &mut ModuleGraph, from: ModuleIdx, targets: &[(ModuleIdx, &str)]) {
        let m = graph.get_mut(from).unwrap();
        for (target, specifier) in targets {
            m.imports.push(ImportRecord {
                specifier: specifier.to_string(),
                kind: ImportKind::Static,
            });
            m.deps.push(Dependency::Module(*target));
        }
    }

    /// index -> app (accepts) -> button; index -> style.css; index -> config
    fn graph() -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        let index = graph.insert(module("src/index.js", false));
        let app = graph.insert(module("src/app.js", true));
        let button = graph.insert(module("src/button.js", false));
        let style = graph.insert(module("src/style.css", false));
        let config = graph.insert(module("src/config.js", false));

        link(&mut graph, index, &[(app, "./app.js"), (style, "./style.css"), (config, "./config.js")]);
        link(&mut graph, app, &[(button, "./button.js")]);
        graph.set_entries(vec![("index".to_string(), index)]);
        graph
    }

    fn manager() -> HmrManager {
        let mut hmr = HmrManager::new(&[PathBuf::from("/app")]);
        hmr.track(&graph());
        hmr
    }

    #[test]
    fn test_update_stops_at_accepting_module() {
        let record = manager().on_file_changed(Path::new("/app/src/button.js")).unwrap();
        assert_eq!(record.kind, UpdateKind::Update);
        assert_eq!(record.modules, vec!["src/button.js", "src/app.js"]);
    }

    #[test]
    fn test_unaccepted_change_reloads() {
        let record = manager().on_file_changed(Path::new("/app/src/config.js")).unwrap();
        assert_eq!(record.kind, UpdateKind::FullReload);
        assert!(record.message.unwrap().contains("src/index.js"));
    }

    #[test]
    fn test_css_self_accepts() {
        let record = manager().on_file_changed(Path::new("/app/src/style.css")).unwrap();
        assert_eq!(record.kind, UpdateKind::Update);
        assert_eq!(record.modules, vec!["src/style.css"]);
    }

    #[test]
    fn test_untracked_files_are_ignored_except_index_html() {
        let hmr = manager();
        assert!(hmr.on_file_changed(Path::new("/app/README.md")).is_none());
        let record = hmr.on_file_changed(Path::new("/app/index.html")).unwrap();
        assert_eq!(record.kind, UpdateKind::FullReload);
    }

    #[test]
    fn test_batch_merges_and_full_reload_dominates() {
        let hmr = manager();
        let batch = [PathBuf::from("/app/src/button.js"), PathBuf::from("/app/src/style.css")];
        let merged = hmr.on_files_changed(&batch).unwrap();
        assert_eq!(merged.kind, UpdateKind::Update);
        assert_eq!(merged.modules, vec!["src/button.js", "src/app.js", "src/style.css"]);

        let batch = [PathBuf::from("/app/src/button.js"), PathBuf::from("/app/src/config.js")];
        assert_eq!(hmr.on_files_changed(&batch).unwrap().kind, UpdateKind::FullReload);
    }

    #[test]
    fn test_seq_strictly_increases() {
        let hmr = manager();
        let a = hmr.connected();
        let b = hmr.error("boom");
        let c = hmr.on_file_changed(Path::new("/app/src/button.js")).unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_eq!(b.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&manager().connected().to_json()).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["seq"], 1);
        assert!(json.get("message").is_none());

        let json: serde_json::Value = serde_json::from_str(&manager().error("x").to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_coalesce_into_one_record() {
        let (tx, rx) = mpsc::channel(16);
        let mut coalescer = ChangeCoalescer::new(rx, Duration::from_millis(100));
        let path = PathBuf::from("/app/src/button.js");
        for _ in 0..3 {
            tx.send(path.clone()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let batch = coalescer.next_batch().await.unwrap();
        assert_eq!(batch, vec![path.clone()]);

        let hmr = manager();
        let record = hmr.on_files_changed(&batch).unwrap();
        assert_eq!(record.seq, 1);

        tx.send(PathBuf::from("/app/src/config.js")).await.unwrap();
        drop(tx);
        assert_eq!(coalescer.next_batch().await.unwrap().len(), 1);
        assert!(coalescer.next_batch().await.is_none());
    }
}

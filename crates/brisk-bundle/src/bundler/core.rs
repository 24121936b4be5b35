use crate::bundler::chunker::{self, Chunk, ChunkKind, ChunkPlan};
use crate::bundler::graph::{Dependency, Module, ModuleGraph, ModuleIdx};
use crate::bundler::loader::{load_module, LoadContext};
use crate::bundler::output::{BuildResult, BuildStats, Manifest, ManifestEntry, OutputAsset, OutputChunk};
use crate::bundler::render::{render_chunk, ChunkOptions};
use crate::bundler::resolver::{Resolved, Resolver};
use crate::bundler::tree_shaker::{TreeShaker, UsedExports};
use crate::optimizer::{OptimizeKind, Optimizer};
use crate::plugins::PluginManager;
use brisk_core::core::path::{normalize_path, CONFIG_FILE_NAME};
use brisk_core::{BriskError, BriskResult, BuildConfig, Fingerprint, SourcemapMode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Where a build currently is; `Failed` can follow any state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Resolving,
    Loading,
    Transforming,
    GraphComplete,
    Chunking,
    Emitting,
    Done,
    Failed,
}

/// Chunk membership by module id, comparable across rebuilds
type Topology = Vec<(String, Vec<String>, Vec<String>)>;

/// What the previous emit produced, kept for incremental rebuilds
struct EmitCache {
    topology: Topology,
    used: HashMap<String, UsedExports>,
    chunks: HashMap<String, (OutputChunk, Option<OutputAsset>)>,
}

/// One module after its load task: loaded fresh or carried over, with its
/// import specifiers resolved in order
struct ModuleTask {
    module: Module,
    resolved: Vec<Resolved>,
    warnings: Vec<String>,
    fresh: bool,
}

/// Bundle a project described by a `BuildConfig`.
///
/// The bundler owns the module graph and the resolver cache for the whole
/// session, so `rebuild` can reuse unchanged modules and chunks.
pub struct Bundler {
    config: BuildConfig,
    plugins: Arc<PluginManager>,
    resolver: Arc<Resolver>,
    context: LoadContext,
    optimizer: Optimizer,
    graph: ModuleGraph,
    state: BuildState,
    hmr: bool,
    module_warnings: HashMap<PathBuf, Vec<String>>,
    config_warnings: Vec<String>,
    cache: Option<EmitCache>,
    /// Changed paths of failed rebuilds, reloaded until a rebuild succeeds
    pending: HashSet<PathBuf>,
}

impl Bundler {
    pub fn new(config: BuildConfig, plugins: PluginManager) -> BriskResult<Self> {
        config.validate()?;
        let plugins = Arc::new(plugins);
        let resolver = Arc::new(Resolver::new(&config)?);
        let context = LoadContext {
            root: config.root.clone(),
            plugins: plugins.clone(),
            resolver: resolver.clone(),
            defines: Arc::new(config.define.clone()),
            respect_side_effects: config.treeshake.side_effects,
        };

        let mut config_warnings = circular_aliases(&config.alias);
        if config.splitting && !config.format.supports_splitting() {
            config_warnings.push(format!(
                "splitting is ignored for {:?} output; every entry is emitted as one chunk",
                config.format
            ));
        }
        for warning in &config_warnings {
            warn!("{}", warning);
        }

        Ok(Self {
            optimizer: Optimizer::from_config(&config),
            config,
            plugins,
            resolver,
            context,
            graph: ModuleGraph::new(),
            state: BuildState::Idle,
            hmr: false,
            module_warnings: HashMap::new(),
            config_warnings,
            cache: None,
            pending: HashSet::new(),
        })
    }

    /// Give emitted modules a `module.hot` API (dev server)
    pub fn with_hmr(mut self, hmr: bool) -> Self {
        self.hmr = hmr;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Full build from the configured entries
    pub async fn build(&mut self) -> BriskResult<BuildResult> {
        self.cache = None;
        let result = self.run(HashMap::new(), HashSet::new()).await;
        if result.is_ok() {
            self.pending.clear();
        }
        result
    }

    /// Incremental build after `changed` files were modified, created or deleted.
    ///
    /// Produces the same output as a fresh `build` of the current tree.
    pub async fn rebuild(&mut self, changed: &[PathBuf]) -> BriskResult<BuildResult> {
        if self.cache.is_none() || self.graph.is_empty() {
            return self.build().await;
        }

        let mut changed: HashSet<PathBuf> = changed.iter().map(|p| normalize_path(p)).collect();
        changed.extend(self.pending.iter().cloned());
        let created_or_deleted = changed
            .iter()
            .any(|path| !path.exists() || self.graph.by_path(path).is_none());
        if created_or_deleted {
            debug!("Files were created or deleted; clearing the resolution cache");
            self.resolver.clear_cache();
        }

        let mut reuse = HashMap::new();
        let mut stale = HashSet::new();
        for (_, module) in self.graph.iter() {
            // a failed rebuild may have left the graph or the chunk cache behind
            let failed_before = self.pending.contains(&module.path);
            if changed.contains(&module.path) && (failed_before || fingerprint_changed(module).await) {
                stale.insert(module.path.clone());
            } else {
                reuse.insert(module.path.clone(), module.clone());
            }
        }
        debug!("Rebuild: {} changed, {} reused", stale.len(), reuse.len());
        let result = self.run(reuse, stale).await;
        match &result {
            Ok(_) => self.pending.clear(),
            Err(_) => self.pending = changed,
        }
        result
    }

    async fn run(&mut self, reuse: HashMap<PathBuf, Module>, stale: HashSet<PathBuf>) -> BriskResult<BuildResult> {
        let started = Instant::now();
        match self.run_with_hooks(reuse, stale, started).await {
            Ok(result) => {
                self.state = BuildState::Done;
                info!(
                    "Built {} modules into {} chunks in {:?}",
                    result.stats.modules, result.stats.chunks, result.duration
                );
                Ok(result)
            }
            Err(e) => {
                self.state = BuildState::Failed;
                Err(e)
            }
        }
    }

    /// `on_start` and `on_end` wrap every build, incremental ones included
    async fn run_with_hooks(
        &mut self,
        reuse: HashMap<PathBuf, Module>,
        stale: HashSet<PathBuf>,
        started: Instant,
    ) -> BriskResult<BuildResult> {
        self.plugins.run_start(&self.config).await?;
        let result = self.run_inner(reuse, stale, started).await?;
        self.plugins.run_end(&result).await?;
        Ok(result)
    }

    async fn run_inner(
        &mut self,
        reuse: HashMap<PathBuf, Module>,
        stale: HashSet<PathBuf>,
        started: Instant,
    ) -> BriskResult<BuildResult> {
        let (graph, fresh) = self.load_graph(reuse).await?;
        self.graph = graph;

        self.state = BuildState::GraphComplete;
        let format = self.config.format;
        let plan = chunker::split(&self.graph, format, self.config.effective_splitting())?;
        let shaker = if self.config.treeshake.enabled {
            TreeShaker::analyze(&self.graph)
        } else {
            TreeShaker::disabled()
        };

        let topology = self.topology(&plan);
        let used = self.used_by_id(&shaker);
        let affected = match &self.cache {
            Some(cache) if cache.topology == topology => {
                let mut changed: HashSet<ModuleIdx> = self
                    .graph
                    .iter()
                    .filter(|(_, m)| fresh.contains(&m.path) || stale.contains(&m.path))
                    .map(|(idx, _)| idx)
                    .collect();
                for (idx, module) in self.graph.iter() {
                    if cache.used.get(&module.id) != used.get(&module.id) {
                        changed.insert(idx);
                    }
                }
                let importers: Vec<ModuleIdx> = changed
                    .iter()
                    .flat_map(|idx| self.graph.importers_of(*idx))
                    .collect();
                changed.extend(importers);
                Some(changed)
            }
            _ => {
                self.state = BuildState::Chunking;
                None
            }
        };

        self.state = BuildState::Emitting;
        let mut result = self.emit(&plan, &shaker, affected.as_ref())?;
        result.duration = started.elapsed();
        self.cache = Some(EmitCache {
            topology,
            used,
            chunks: result
                .chunks
                .iter()
                .map(|chunk| {
                    let css = chunk
                        .css_file
                        .as_ref()
                        .and_then(|file| result.assets.iter().find(|a| &a.file_name == file))
                        .cloned();
                    (chunk.file_name.clone(), (chunk.clone(), css))
                })
                .collect(),
        });
        Ok(result)
    }

    /// Load every reachable module and link the graph.
    ///
    /// Modules in `reuse` are not reloaded, only their imports are resolved
    /// again. Returns the graph and the paths that were loaded fresh.
    async fn load_graph(&mut self, mut reuse: HashMap<PathBuf, Module>) -> BriskResult<(ModuleGraph, HashSet<PathBuf>)> {
        self.state = BuildState::Resolving;
        let importer = self.config.root.join(CONFIG_FILE_NAME);
        let mut entries = Vec::new();
        for (name, path) in self.config.entries() {
            match resolve_import(&self.context, &path.to_string_lossy(), &importer).await? {
                Resolved::Module(resolved) => entries.push((name, resolved)),
                Resolved::External(specifier) => {
                    return Err(BriskError::Config(format!(
                        "Entry '{}' resolves to the external module '{}'",
                        name, specifier
                    )))
                }
            }
        }

        self.state = BuildState::Loading;
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut tasks: JoinSet<BriskResult<ModuleTask>> = JoinSet::new();
        for (_, path) in &entries {
            if visited.insert(path.clone()) {
                spawn_module(&mut tasks, &self.context, path.clone(), reuse.remove(path));
            }
        }

        let mut loaded: BTreeMap<PathBuf, (Module, Vec<Resolved>)> = BTreeMap::new();
        let mut fresh = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let task = joined.map_err(|e| BriskError::Io(std::io::Error::other(e)))??;
            for dep in &task.resolved {
                if let Resolved::Module(path) = dep {
                    if visited.insert(path.clone()) {
                        spawn_module(&mut tasks, &self.context, path.clone(), reuse.remove(path));
                    }
                }
            }
            let path = task.module.path.clone();
            if task.fresh {
                fresh.insert(path.clone());
                self.module_warnings.insert(path.clone(), task.warnings);
            }
            loaded.insert(path, (task.module, task.resolved));
        }

        self.state = BuildState::Transforming;
        self.module_warnings.retain(|path, _| loaded.contains_key(path));
        let mut graph = ModuleGraph::new();
        let mut edges = Vec::with_capacity(loaded.len());
        for (_, (module, resolved)) in loaded {
            let idx = graph.insert(module);
            edges.push((idx, resolved));
        }
        for (idx, resolved) in edges {
            let deps = resolved
                .into_iter()
                .map(|r| match r {
                    Resolved::Module(path) => graph
                        .by_path(&path)
                        .map(Dependency::Module)
                        .ok_or_else(|| BriskError::Path(format!("{} was resolved but never loaded", path.display()))),
                    Resolved::External(specifier) => Ok(Dependency::External(specifier)),
                })
                .collect::<BriskResult<Vec<_>>>()?;
            if let Some(module) = graph.get_mut(idx) {
                module.deps = deps;
            }
        }
        let entries = entries
            .into_iter()
            .filter_map(|(name, path)| graph.by_path(&path).map(|idx| (name, idx)))
            .collect();
        graph.set_entries(entries);
        debug!("Graph complete: {} modules ({} loaded)", graph.len(), fresh.len());
        Ok((graph, fresh))
    }

    fn topology(&self, plan: &ChunkPlan) -> Topology {
        let id = |idx: &ModuleIdx| self.graph.get(*idx).map(|m| m.id.clone()).unwrap_or_default();
        plan.topology()
            .into_iter()
            .map(|(file, modules, imports)| (file, modules.iter().map(id).collect(), imports))
            .collect()
    }

    fn used_by_id(&self, shaker: &TreeShaker) -> HashMap<String, UsedExports> {
        self.graph
            .iter()
            .map(|(idx, module)| (module.id.clone(), shaker.used(idx).clone()))
            .collect()
    }

    /// Whether `chunk` must be rendered again for the `affected` modules
    fn needs_render(&self, chunk: &Chunk, affected: Option<&HashSet<ModuleIdx>>) -> bool {
        let Some(affected) = affected else { return true };
        if chunk.modules.iter().any(|idx| affected.contains(idx)) {
            return true;
        }
        // entry footers list names re-exported through `export *`
        match (chunk.kind, chunk.root) {
            (ChunkKind::Entry, Some(root)) => star_closure(&self.graph, root).iter().any(|idx| affected.contains(idx)),
            _ => false,
        }
    }

    fn emit(
        &self,
        plan: &ChunkPlan,
        shaker: &TreeShaker,
        affected: Option<&HashSet<ModuleIdx>>,
    ) -> BriskResult<BuildResult> {
        let sourcemap = self.config.sourcemap;
        let options = ChunkOptions {
            format: self.config.format,
            banner: self.config.banner.as_deref(),
            global_name: self.config.global_name.as_deref(),
            sourcemap: sourcemap.enabled(),
            hmr: self.hmr,
        };

        let mut warnings = self.config_warnings.clone();
        for (_, module) in self.graph.iter() {
            if let Some(module_warnings) = self.module_warnings.get(&module.path) {
                warnings.extend(module_warnings.iter().cloned());
            }
        }

        let mut stats = BuildStats {
            modules: self.graph.len(),
            chunks: plan.chunks.len(),
            ..BuildStats::default()
        };
        let mut chunks = Vec::with_capacity(plan.chunks.len());
        let mut assets = Vec::new();

        for chunk in &plan.chunks {
            let cached = self.cache.as_ref().and_then(|c| c.chunks.get(&chunk.file_name));
            if let (false, Some((output, css))) = (self.needs_render(chunk, affected), cached) {
                debug!("Reusing chunk {}", chunk.file_name);
                stats.reused_chunks += 1;
                chunks.push(output.clone());
                assets.extend(css.clone());
                continue;
            }

            let rendered = render_chunk(&self.graph, shaker, plan, chunk, &options)?;
            stats.rendered_chunks += 1;

            let (mut code, js_warnings) = self.optimizer.minify(&rendered.code, OptimizeKind::Js);
            warnings.extend(js_warnings.iter().map(ToString::to_string));
            let map = match rendered.map {
                Some(map) if self.config.minify => Some(map.without_mappings().to_json()?),
                Some(map) => Some(map.to_json()?),
                None => None,
            };
            if map.is_some() && sourcemap == SourcemapMode::Linked {
                code.push_str(&format!("\n//# sourceMappingURL={}.map\n", chunk.file_name));
            }

            let css_file = match rendered.css {
                Some(css) => {
                    let file_name = css_file_name(&chunk.file_name);
                    let (css, css_warnings) = self.optimizer.minify(&css, OptimizeKind::Css);
                    warnings.extend(css_warnings.iter().map(ToString::to_string));
                    assets.push(OutputAsset {
                        compressed: self.optimizer.compress_all(css.as_bytes())?,
                        file_name: file_name.clone(),
                        source: css.into_bytes(),
                    });
                    Some(file_name)
                }
                None => None,
            };

            chunks.push(OutputChunk {
                name: chunk.name.clone(),
                file_name: chunk.file_name.clone(),
                kind: chunk.kind,
                compressed: self.optimizer.compress_all(code.as_bytes())?,
                code,
                map,
                css_file,
                modules: chunk
                    .modules
                    .iter()
                    .filter_map(|idx| self.graph.get(*idx).map(|m| m.id.clone()))
                    .collect(),
                imports: chunk.imports.clone(),
            });
        }

        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (idx, module) in self.graph.iter() {
            if let Some(asset) = &module.asset {
                if !shaker.is_dropped(&self.graph, idx) {
                    files.insert(asset.file_name.clone(), asset.bytes.clone());
                }
            }
        }
        assets.extend(files.into_iter().map(|(file_name, source)| OutputAsset {
            file_name,
            source,
            compressed: Vec::new(),
        }));

        let manifest = self.config.manifest.then(|| self.manifest(&chunks));
        stats.assets = assets.len();
        stats.output_bytes = chunks.iter().map(|c| c.code.len()).sum::<usize>()
            + assets.iter().map(|a| a.source.len()).sum::<usize>();

        Ok(BuildResult {
            chunks,
            assets,
            manifest,
            warnings,
            stats,
            duration: Default::default(),
        })
    }

    fn manifest(&self, chunks: &[OutputChunk]) -> Manifest {
        self.graph
            .entries()
            .iter()
            .filter_map(|(name, _)| {
                let chunk = chunks.iter().find(|c| c.kind == ChunkKind::Entry && &c.name == name)?;
                Some((
                    name.clone(),
                    ManifestEntry {
                        file: chunk.file_name.clone(),
                        css: chunk.css_file.clone(),
                        imports: chunk.imports.clone(),
                    },
                ))
            })
            .collect()
    }
}

fn spawn_module(tasks: &mut JoinSet<BriskResult<ModuleTask>>, ctx: &LoadContext, path: PathBuf, reused: Option<Module>) {
    let ctx = ctx.clone();
    tasks.spawn(async move {
        let (module, warnings, fresh) = match reused {
            Some(module) => (module, Vec::new(), false),
            None => {
                let loaded = load_module(&ctx, &path).await?;
                (loaded.module, loaded.warnings, true)
            }
        };
        let mut resolved = Vec::with_capacity(module.imports.len());
        for record in &module.imports {
            resolved.push(resolve_import(&ctx, &record.specifier, &module.path).await?);
        }
        Ok(ModuleTask {
            module,
            resolved,
            warnings,
            fresh,
        })
    });
}

/// Plugin resolve hooks first, then the built-in resolver
async fn resolve_import(ctx: &LoadContext, specifier: &str, importer: &Path) -> BriskResult<Resolved> {
    if let Some(result) = ctx.plugins.resolve(specifier, importer).await? {
        return Ok(if result.external {
            Resolved::External(result.path.to_string_lossy().into_owned())
        } else {
            Resolved::Module(result.path)
        });
    }
    ctx.resolver.resolve(specifier, importer)
}

async fn fingerprint_changed(module: &Module) -> bool {
    match tokio::fs::read(&module.path).await {
        Ok(bytes) => Fingerprint::of(&bytes) != module.fingerprint,
        Err(_) => true,
    }
}

fn css_file_name(chunk_file: &str) -> String {
    match chunk_file.rsplit_once('.') {
        Some((stem, _)) => format!("{}.css", stem),
        None => format!("{}.css", chunk_file),
    }
}

/// `root` plus every module reached through `export * from`
fn star_closure(graph: &ModuleGraph, root: ModuleIdx) -> HashSet<ModuleIdx> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if !seen.insert(idx) {
            continue;
        }
        let Some(module) = graph.get(idx) else { continue };
        for specifier in &module.star_exports {
            if let Some(Dependency::Module(dep)) = module.dep_for(specifier) {
                stack.push(*dep);
            }
        }
    }
    seen
}

/// Aliases whose chain of targets leads back to themselves
fn circular_aliases(alias: &BTreeMap<String, String>) -> Vec<String> {
    alias
        .keys()
        .filter(|start| {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(next) = alias.get(current) {
                if next == *start {
                    return true;
                }
                if !seen.insert(next.as_str()) {
                    return false;
                }
                current = next;
            }
            false
        })
        .map(|key| format!("alias '{}' is circular; it is applied once", key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Plugin;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Lifecycle {
        starts: AtomicUsize,
        ends: AtomicUsize,
        fail_start: bool,
        fail_end: bool,
    }

    #[async_trait]
    impl Plugin for Arc<Lifecycle> {
        fn name(&self) -> &str {
            "lifecycle"
        }

        async fn on_start(&self, _config: &BuildConfig) -> BriskResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(BriskError::Config("start refused".to_string()));
            }
            Ok(())
        }

        async fn on_end(&self, _result: &BuildResult) -> BriskResult<()> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            if self.fail_end {
                return Err(BriskError::Config("end refused".to_string()));
            }
            Ok(())
        }
    }

    fn with_plugin(plugin: &Arc<Lifecycle>) -> PluginManager {
        let mut plugins = PluginManager::new();
        plugins.register(plugin.clone()).unwrap();
        plugins
    }

    fn project(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        temp
    }

    fn config(root: &Path, yaml: &str) -> BuildConfig {
        BuildConfig::from_yaml_str(yaml, root.to_path_buf()).unwrap()
    }

    #[test]
    fn test_circular_alias_detection() {
        let mut alias = BTreeMap::new();
        alias.insert("a".to_string(), "b".to_string());
        alias.insert("b".to_string(), "a".to_string());
        alias.insert("c".to_string(), "./src/c".to_string());
        let warnings = circular_aliases(&alias);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("'a'"));
    }

    #[test]
    fn test_css_file_name() {
        assert_eq!(css_file_name("index.js"), "index.css");
        assert_eq!(css_file_name("index.cjs"), "index.css");
    }

    #[tokio::test]
    async fn test_state_machine_reaches_done() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), PluginManager::new()).unwrap();
        assert_eq!(bundler.state(), BuildState::Idle);
        bundler.build().await.unwrap();
        assert_eq!(bundler.state(), BuildState::Done);
    }

    #[tokio::test]
    async fn test_failed_build_sets_failed_state() {
        let temp = project(&[("src/index.js", "import './missing';\n")]);
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), PluginManager::new()).unwrap();
        assert!(bundler.build().await.is_err());
        assert_eq!(bundler.state(), BuildState::Failed);
    }

    #[tokio::test]
    async fn test_failing_lifecycle_hooks_set_failed_state() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);

        let plugin = Arc::new(Lifecycle {
            fail_start: true,
            ..Lifecycle::default()
        });
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), with_plugin(&plugin)).unwrap();
        assert!(matches!(bundler.build().await, Err(BriskError::Plugin { .. })));
        assert_eq!(bundler.state(), BuildState::Failed);

        let plugin = Arc::new(Lifecycle {
            fail_end: true,
            ..Lifecycle::default()
        });
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), with_plugin(&plugin)).unwrap();
        assert!(matches!(bundler.build().await, Err(BriskError::Plugin { .. })));
        assert_eq!(bundler.state(), BuildState::Failed);
        assert_eq!(plugin.ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_wrap_every_rebuild() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let plugin = Arc::new(Lifecycle::default());
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), with_plugin(&plugin)).unwrap();
        bundler.build().await.unwrap();

        let index = temp.path().join("src/index.js");
        fs::write(&index, "export const a = 2;\n").unwrap();
        bundler.rebuild(&[index]).await.unwrap();
        assert_eq!(plugin.starts.load(Ordering::SeqCst), 2);
        assert_eq!(plugin.ends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rebuild_after_failed_rebuild_matches_fresh_build() {
        let temp = project(&[
            ("src/index.js", "import './x.js';\nimport './y.js';\n"),
            ("src/x.js", "console.log('X1');\n"),
            ("src/y.js", "console.log('Y1');\n"),
        ]);
        let mut bundler = Bundler::new(config(temp.path(), "entry: src/index.js\n"), PluginManager::new()).unwrap();
        bundler.build().await.unwrap();

        let x = temp.path().join("src/x.js");
        let y = temp.path().join("src/y.js");
        fs::write(&x, "import './missing.js';\nconsole.log('X2');\n").unwrap();
        assert!(bundler.rebuild(&[x.clone()]).await.is_err());

        // an unrelated edit must not resurrect the old x.js
        fs::write(&y, "console.log('Y2');\n").unwrap();
        match bundler.rebuild(&[y.clone()]).await {
            Err(BriskError::Resolution { specifier, .. }) => assert_eq!(specifier, "./missing.js"),
            other => panic!("expected the missing import again, got {:?}", other.map(|_| ())),
        }

        fs::write(&x, "console.log('X3');\n").unwrap();
        let result = bundler.rebuild(&[x]).await.unwrap();
        let code = &result.chunk("index.js").unwrap().code;
        assert!(code.contains("X3"));
        assert!(code.contains("Y2"));
        assert!(!code.contains("X1"));
    }

    #[tokio::test]
    async fn test_splitting_warning_for_iife() {
        let temp = project(&[("src/index.js", "console.log(1);\n")]);
        let yaml = "entry: src/index.js\nformat: iife\nsplitting: true\n";
        let mut bundler = Bundler::new(config(temp.path(), yaml), PluginManager::new()).unwrap();
        let result = bundler.build().await.unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("splitting is ignored")));
        assert_eq!(result.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_reuses_untouched_chunks() {
        let temp = project(&[
            ("src/a.js", "import { shared } from './shared.js';\nconsole.log('a', shared);\n"),
            ("src/b.js", "console.log('b');\n"),
            ("src/shared.js", "export const shared = 1;\n"),
        ]);
        let yaml = "entry:\n  - src/a.js\n  - src/b.js\n";
        let mut bundler = Bundler::new(config(temp.path(), yaml), PluginManager::new()).unwrap();
        bundler.build().await.unwrap();

        let shared = temp.path().join("src/shared.js");
        fs::write(&shared, "export const shared = 2;\n").unwrap();
        let result = bundler.rebuild(&[shared]).await.unwrap();
        assert_eq!(result.stats.rendered_chunks, 1);
        assert_eq!(result.stats.reused_chunks, 1);
        assert!(result.chunk("a.js").unwrap().code.contains("shared = 2"));
    }
}

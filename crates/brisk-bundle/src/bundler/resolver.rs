use brisk_core::core::path::normalize_path;
use brisk_core::{BriskError, BriskResult, BuildConfig};
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions probed for extension-less specifiers, in priority order
pub const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json", "css"];

/// Outcome of resolving one specifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolved {
    Module(PathBuf),
    /// Left to the runtime environment; keeps the (aliased) specifier
    External(String),
}

/// Matches `external` config entries: exact names (plus their subpaths) and globs
#[derive(Debug, Clone)]
struct ExternalMatcher {
    names: Vec<String>,
    globs: GlobSet,
}

impl ExternalMatcher {
    fn new(patterns: &[String]) -> BriskResult<Self> {
        let mut names = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if pattern.contains(['*', '?', '[', '{']) {
                let glob = Glob::new(pattern)
                    .map_err(|e| BriskError::Config(format!("Invalid external pattern '{}': {}", pattern, e)))?;
                builder.add(glob);
            } else {
                names.push(pattern.clone());
            }
        }
        let globs = builder
            .build()
            .map_err(|e| BriskError::Config(format!("Failed to build external patterns: {}", e)))?;
        Ok(Self { names, globs })
    }

    fn matches(&self, specifier: &str) -> bool {
        self.names.iter().any(|name| {
            specifier == name
                || specifier
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        }) || self.globs.is_match(specifier)
    }
}

/// Built-in resolver: alias substitution, externals, path probing and node_modules lookup.
///
/// The cache survives across rebuilds of one session; call [`Resolver::clear_cache`]
/// when files are created or deleted.
pub struct Resolver {
    alias: BTreeMap<String, String>,
    root: PathBuf,
    externals: ExternalMatcher,
    cache: Mutex<HashMap<(PathBuf, String), Resolved>>,
    side_effects: Mutex<HashMap<PathBuf, Option<bool>>>,
}

impl Resolver {
    pub fn new(config: &BuildConfig) -> BriskResult<Self> {
        Ok(Self {
            alias: config.alias.clone(),
            root: config.root.clone(),
            externals: ExternalMatcher::new(&config.external)?,
            cache: Mutex::new(HashMap::new()),
            side_effects: Mutex::new(HashMap::new()),
        })
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        self.side_effects.lock().clear();
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        self.externals.matches(specifier)
    }

    /// Resolve `specifier` imported from the file `importer`
    pub fn resolve(&self, specifier: &str, importer: &Path) -> BriskResult<Resolved> {
        // virtual importers have no directory; resolve against the root
        let dir = importer
            .parent()
            .filter(|p| p.is_absolute())
            .unwrap_or(&self.root)
            .to_path_buf();
        let key = (dir.clone(), specifier.to_string());
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(specifier, importer, &dir)?;
        debug!("Resolved {} -> {:?}", specifier, resolved);
        self.cache.lock().insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, specifier: &str, importer: &Path, dir: &Path) -> BriskResult<Resolved> {
        let aliased = self.apply_alias(specifier);
        let specifier = aliased.as_str();

        if self.externals.matches(specifier) {
            return Ok(Resolved::External(specifier.to_string()));
        }

        let mut candidates = Vec::new();
        let found = if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
            probe_path(&dir.join(specifier), &mut candidates)
        } else if Path::new(specifier).is_absolute() {
            probe_path(Path::new(specifier), &mut candidates)
        } else if specifier.starts_with("node:") {
            return Ok(Resolved::External(specifier.to_string()));
        } else {
            self.resolve_bare(specifier, dir, &mut candidates)
        };

        match found {
            Some(path) => Ok(Resolved::Module(normalize_path(&path))),
            None => Err(BriskError::Resolution {
                importer: importer.to_path_buf(),
                specifier: specifier.to_string(),
                candidates,
            }),
        }
    }

    /// Exact alias match, or the longest alias that is a path prefix of `specifier`
    fn apply_alias(&self, specifier: &str) -> String {
        if let Some(target) = self.alias.get(specifier) {
            return self.alias_target(target);
        }
        self.alias
            .iter()
            .filter(|(key, _)| {
                specifier
                    .strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{}{}", self.alias_target(target), &specifier[key.len()..]))
            .unwrap_or_else(|| specifier.to_string())
    }

    /// Relative alias targets are anchored at the project root
    fn alias_target(&self, target: &str) -> String {
        if target.starts_with("./") || target.starts_with("../") {
            self.root.join(target).to_string_lossy().into_owned()
        } else {
            target.to_string()
        }
    }

    fn resolve_bare(&self, specifier: &str, dir: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let (package, subpath) = split_package(specifier);
        for ancestor in dir.ancestors() {
            let package_dir = ancestor.join("node_modules").join(package);
            if !package_dir.is_dir() {
                candidates.push(package_dir);
                continue;
            }
            if let Some(found) = resolve_package_entry(&package_dir, subpath, candidates) {
                return Some(found);
            }
        }
        None
    }

    /// `sideEffects` flag from the nearest package.json, if declared as a bool
    pub fn package_side_effects(&self, path: &Path) -> Option<bool> {
        let dir = path.parent()?.to_path_buf();
        if let Some(cached) = self.side_effects.lock().get(&dir) {
            return *cached;
        }
        let flag = dir
            .ancestors()
            .map(|d| d.join("package.json"))
            .find(|p| p.is_file())
            .and_then(|manifest| read_json(&manifest))
            .and_then(|json| json.get("sideEffects").and_then(Value::as_bool));
        self.side_effects.lock().insert(dir, flag);
        flag
    }
}

/// Split `@scope/pkg/sub/path` into (`@scope/pkg`, `sub/path`)
fn split_package(specifier: &str) -> (&str, &str) {
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut end = specifier.len();
    let mut seen = 0;
    for (index, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == segments {
                end = index;
                break;
            }
        }
    }
    let package = &specifier[..end];
    let subpath = specifier.get(end + 1..).unwrap_or("");
    (package, subpath)
}

fn read_json(path: &Path) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Pick `import`, then `default`, then `require` from a conditions object
fn pick_condition(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["import", "default", "require"]
            .iter()
            .find_map(|key| map.get(*key).and_then(pick_condition)),
        _ => None,
    }
}

fn resolve_package_entry(package_dir: &Path, subpath: &str, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
    let manifest = read_json(&package_dir.join("package.json"));

    if let Some(exports) = manifest.as_ref().and_then(|m| m.get("exports")) {
        let key = if subpath.is_empty() {
            ".".to_string()
        } else {
            format!("./{}", subpath)
        };
        let target = match exports {
            Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => map.get(&key).and_then(pick_condition),
            other if subpath.is_empty() => pick_condition(other),
            _ => None,
        };
        if let Some(target) = target {
            let path = package_dir.join(&target);
            candidates.push(path.clone());
            if path.is_file() {
                return Some(path);
            }
        }
    }

    if !subpath.is_empty() {
        return probe_path(&package_dir.join(subpath), candidates);
    }

    for field in ["module", "main"] {
        if let Some(entry) = manifest.as_ref().and_then(|m| m.get(field)).and_then(Value::as_str) {
            if let Some(found) = probe_path(&package_dir.join(entry), candidates) {
                return Some(found);
            }
        }
    }

    probe_index(package_dir, candidates)
}

/// Probe `base` as a file, with each extension appended, then as a directory
pub fn probe_path(base: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
    candidates.push(base.to_path_buf());
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    for ext in RESOLVE_EXTENSIONS {
        let mut name = base.as_os_str().to_os_string();
        name.push(".");
        name.push(ext);
        let candidate = PathBuf::from(name);
        candidates.push(candidate.clone());
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if base.is_dir() {
        if let Some(entry) = read_json(&base.join("package.json"))
            .and_then(|m| m.get("main").and_then(Value::as_str).map(str::to_string))
        {
            let main = base.join(entry);
            if main.is_file() {
                return Some(main);
            }
        }
        return probe_index(base, candidates);
    }
    None
}

fn probe_index(dir: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
    for ext in RESOLVE_EXTENSIONS {
        let candidate = dir.join(format!("index.{}", ext));
        candidates.push(candidate.clone());
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

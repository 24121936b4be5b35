use crate::core::path::{absolutize, find_config_file, CONFIG_FILE_NAME};
use crate::core::{BriskError, BriskResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output module format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Esm,
    Cjs,
    Umd,
    Iife,
}

impl OutputFormat {
    /// Whether multiple chunks can reference each other in this format
    pub fn supports_splitting(&self) -> bool {
        matches!(self, OutputFormat::Esm | OutputFormat::Cjs)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Cjs => "cjs",
            _ => "js",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Esm => "esm",
            OutputFormat::Cjs => "cjs",
            OutputFormat::Umd => "umd",
            OutputFormat::Iife => "iife",
        };
        f.write_str(name)
    }
}

/// Source map emission mode (`true`, `false` or `"external"` in brisk.yaml)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SourcemapMode {
    #[default]
    Off,
    /// `.map` file plus a `sourceMappingURL` comment
    Linked,
    /// `.map` file without the comment
    External,
}

impl SourcemapMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, SourcemapMode::Off)
    }
}

impl<'de> Deserialize<'de> for SourcemapMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Mode(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(SourcemapMode::Linked),
            Raw::Flag(false) => Ok(SourcemapMode::Off),
            Raw::Mode(mode) => match mode.as_str() {
                "external" => Ok(SourcemapMode::External),
                "linked" => Ok(SourcemapMode::Linked),
                other => Err(serde::de::Error::custom(format!(
                    "invalid sourcemap mode '{}', expected true, false or \"external\"",
                    other
                ))),
            },
        }
    }
}

/// Tree-shaking switch (`true`, `false` or an options object)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeshakeOptions {
    pub enabled: bool,
    /// Honor `"sideEffects": false` in package.json when dropping modules
    pub side_effects: bool,
}

impl Default for TreeshakeOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            side_effects: true,
        }
    }
}

impl<'de> Deserialize<'de> for TreeshakeOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Options {
                #[serde(default = "default_true")]
                side_effects: bool,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(enabled) => TreeshakeOptions {
                enabled,
                side_effects: true,
            },
            Raw::Options { side_effects } => TreeshakeOptions {
                enabled: true,
                side_effects,
            },
        })
    }
}

/// Entry points: a single path, a list of paths, or a name -> path map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
    Single(String),
    List(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl Default for EntryConfig {
    fn default() -> Self {
        EntryConfig::Single("src/index.ts".to_string())
    }
}

/// Compressed sibling outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressConfig {
    #[serde(default)]
    pub gzip: bool,
    #[serde(default)]
    pub brotli: bool,
    /// gzip level 0-9, brotli quality 0-11
    #[serde(default)]
    pub level: Option<u32>,
}

impl CompressConfig {
    pub fn enabled(&self) -> bool {
        self.gzip || self.brotli
    }
}

/// One proxied path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Upstream base URL, e.g. `http://localhost:8080`
    pub target: String,
    /// Replacement for the matched prefix (default: keep the prefix)
    #[serde(default)]
    pub rewrite: Option<String>,
    /// Rewrite the Host header to the target's host
    #[serde(default)]
    pub change_origin: bool,
}

/// A canned response served by the dev server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRoute {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// `dev:` section of brisk.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub hmr: bool,
    /// Watch roots (default: `src`)
    #[serde(default)]
    pub watch: Vec<PathBuf>,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default)]
    pub proxy: BTreeMap<String, ProxyRule>,
    #[serde(default)]
    pub mocks: Vec<MockRoute>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hmr: true,
            watch: Vec::new(),
            ignore: default_ignore(),
            debounce_ms: default_debounce_ms(),
            public_dir: default_public_dir(),
            proxy: BTreeMap::new(),
            mocks: Vec::new(),
        }
    }
}

/// Build configuration loaded from brisk.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory the config was loaded from; relative paths resolve against it
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub sourcemap: SourcemapMode,
    #[serde(default)]
    pub splitting: bool,
    #[serde(default)]
    pub treeshake: TreeshakeOptions,
    /// Import prefix -> replacement path or specifier
    #[serde(default)]
    pub alias: BTreeMap<String, String>,
    /// Identifier or member chain -> literal replacement
    #[serde(default)]
    pub define: BTreeMap<String, String>,
    /// Specifiers left as runtime imports (globs or package names)
    #[serde(default)]
    pub external: Vec<String>,
    /// Global variable for iife/umd output
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub compress: CompressConfig,
    #[serde(default = "default_true")]
    pub manifest: bool,
    /// Comment prepended to every JS module
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub dev: DevConfig,
}

fn default_true() -> bool {
    true
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_target() -> String {
    "es2020".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5173
}

fn default_ignore() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/.git/**".to_string(),
        "**/*.swp".to_string(),
        "**/*~".to_string(),
    ]
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: EntryConfig::default(),
            out_dir: default_out_dir(),
            format: OutputFormat::default(),
            target: default_target(),
            minify: false,
            sourcemap: SourcemapMode::default(),
            splitting: false,
            treeshake: TreeshakeOptions::default(),
            alias: BTreeMap::new(),
            define: BTreeMap::new(),
            external: Vec::new(),
            global_name: None,
            compress: CompressConfig::default(),
            manifest: true,
            banner: None,
            dev: DevConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Default config rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a config file; its directory becomes the project root
    pub fn load(path: &Path) -> BriskResult<Self> {
        if !path.exists() {
            return Err(BriskError::Config(format!(
                "{} not found at {}",
                CONFIG_FILE_NAME,
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let root = absolutize(&std::env::current_dir()?, &root);
        debug!("Loading config from {}", path.display());
        Self::from_yaml_str(&content, root)
    }

    /// Find brisk.yaml by walking up from `start`, or use `explicit` when given
    pub fn discover(start: &Path, explicit: Option<&Path>) -> BriskResult<Self> {
        match explicit {
            Some(path) => Self::load(&absolutize(start, path)),
            None => match find_config_file(start) {
                Some(path) => Self::load(&path),
                None => Err(BriskError::Config(format!(
                    "{} not found in {} or its parents",
                    CONFIG_FILE_NAME,
                    start.display()
                ))),
            },
        }
    }

    pub fn from_yaml_str(content: &str, root: PathBuf) -> BriskResult<Self> {
        let mut config: BuildConfig = if content.trim().is_empty() {
            BuildConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| BriskError::Config(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e)))?
        };
        config.root = root;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> BriskResult<()> {
        if self.entries().is_empty() {
            return Err(BriskError::Config("At least one entry is required".to_string()));
        }

        for (name, path) in self.entries() {
            if name.is_empty() {
                return Err(BriskError::Config("Entry name cannot be empty".to_string()));
            }
            if path.as_os_str().is_empty() {
                return Err(BriskError::Config(format!("Entry '{}' has an empty path", name)));
            }
        }

        for key in self.alias.keys() {
            if key.is_empty() {
                return Err(BriskError::Config("Alias keys cannot be empty".to_string()));
            }
        }

        if let Some(level) = self.compress.level {
            let max = if self.compress.brotli { 11 } else { 9 };
            if level > max {
                return Err(BriskError::Config(format!(
                    "compress.level {} is out of range (0-{})",
                    level, max
                )));
            }
        }

        for prefix in self.dev.proxy.keys() {
            if !prefix.starts_with('/') {
                return Err(BriskError::Config(format!(
                    "Proxy prefix '{}' must start with '/'",
                    prefix
                )));
            }
        }

        Ok(())
    }

    /// Entry points as (name, absolute path), in a stable order
    pub fn entries(&self) -> Vec<(String, PathBuf)> {
        let named = |path: &str| {
            let name = Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            (name, absolutize(&self.root, Path::new(path)))
        };

        match &self.entry {
            EntryConfig::Single(path) => vec![named(path)],
            EntryConfig::List(paths) => paths.iter().map(|p| named(p)).collect(),
            EntryConfig::Named(map) => map
                .iter()
                .map(|(name, path)| (name.clone(), absolutize(&self.root, Path::new(path))))
                .collect(),
        }
    }

    pub fn out_dir_path(&self) -> PathBuf {
        absolutize(&self.root, &self.out_dir)
    }

    /// Watch roots resolved against the project root (default: `src`)
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        if self.dev.watch.is_empty() {
            vec![self.root.join("src")]
        } else {
            self.dev.watch.iter().map(|p| absolutize(&self.root, p)).collect()
        }
    }

    /// Whether chunks are split for this config (splitting is esm/cjs only)
    pub fn effective_splitting(&self) -> bool {
        self.splitting && self.format.supports_splitting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config() {
        let temp = TempDir::new().unwrap();
        let content = r#"
entry:
  main: src/index.ts
  admin: src/admin.ts
out_dir: build
format: cjs
sourcemap: external
treeshake:
  side_effects: false
alias:
  "@app": ./src
define:
  process.env.NODE_ENV: '"production"'
dev:
  port: 4000
  proxy:
    /api:
      target: http://localhost:8080
      change_origin: true
"#;
        fs::write(temp.path().join(CONFIG_FILE_NAME), content).unwrap();

        let config = BuildConfig::load(&temp.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.format, OutputFormat::Cjs);
        assert_eq!(config.sourcemap, SourcemapMode::External);
        assert!(config.treeshake.enabled);
        assert!(!config.treeshake.side_effects);
        assert_eq!(config.dev.port, 4000);
        assert!(config.dev.proxy["/api"].change_origin);

        let entries = config.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "admin");
        assert!(entries[1].1.ends_with("src/index.ts"));
        assert!(config.out_dir_path().ends_with("build"));
    }

    #[test]
    fn test_defaults() {
        let config = BuildConfig::from_yaml_str("", PathBuf::from("/app")).unwrap();
        assert_eq!(config.format, OutputFormat::Esm);
        assert_eq!(config.sourcemap, SourcemapMode::Off);
        assert!(!config.treeshake.enabled);
        assert!(config.manifest);
        assert_eq!(config.entries()[0].0, "index");
        assert_eq!(config.watch_roots(), vec![PathBuf::from("/app/src")]);
    }

    #[test]
    fn test_sourcemap_flag() {
        let config = BuildConfig::from_yaml_str("sourcemap: true", PathBuf::from("/app")).unwrap();
        assert_eq!(config.sourcemap, SourcemapMode::Linked);
        assert!(BuildConfig::from_yaml_str("sourcemap: inline-ish", PathBuf::from("/app")).is_err());
    }

    #[test]
    fn test_splitting_requires_esm_or_cjs() {
        let config = BuildConfig::from_yaml_str("splitting: true\nformat: iife", PathBuf::from("/app")).unwrap();
        assert!(!config.effective_splitting());
    }

    #[test]
    fn test_invalid_proxy_prefix() {
        let content = "dev:\n  proxy:\n    api:\n      target: http://localhost:1\n";
        assert!(BuildConfig::from_yaml_str(content, PathBuf::from("/app")).is_err());
    }
}

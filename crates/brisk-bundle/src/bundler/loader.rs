use crate::bundler::graph::{AssetSource, Loader, Module};
use crate::bundler::lexer::tokenize;
use crate::bundler::parser::{self, ImportKind, ImportRecord, ModuleSyntax};
use crate::bundler::resolver::Resolver;
use crate::bundler::transform::{apply_defines, strip_types};
use crate::bundler::tree_shaker::has_top_level_effects;
use crate::plugins::PluginManager;
use brisk_core::core::path::module_id;
use brisk_core::{BriskError, BriskResult, Fingerprint};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Everything a load task needs; cheap to clone into spawned tasks
#[derive(Clone)]
pub struct LoadContext {
    pub root: PathBuf,
    pub plugins: Arc<PluginManager>,
    pub resolver: Arc<Resolver>,
    pub defines: Arc<BTreeMap<String, String>>,
    /// Honor `"sideEffects": false` from package.json
    pub respect_side_effects: bool,
}

/// A module ready for graph insertion (edges not resolved yet)
#[derive(Debug)]
pub struct LoadedModule {
    pub module: Module,
    pub warnings: Vec<String>,
}

fn css_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?["']([^"']+)["']\s*\)?[^;\n]*;"#)
            .expect("valid css import regex")
    })
}

/// Load, transform and scan one module
pub async fn load_module(ctx: &LoadContext, path: &Path) -> BriskResult<LoadedModule> {
    let mut warnings = Vec::new();
    let id = module_id(&ctx.root, path);

    let (bytes, mut loader) = match ctx.plugins.load(path).await? {
        Some(loaded) => {
            let loader = loaded.loader.unwrap_or_else(|| Loader::from_path(path));
            (loaded.code.into_bytes(), loader)
        }
        None => {
            let bytes = tokio::fs::read(path).await?;
            (bytes, Loader::from_path(path))
        }
    };
    let fingerprint = Fingerprint::of(&bytes);

    if loader == Loader::File {
        return Ok(LoadedModule {
            module: file_module(path, id, bytes, fingerprint),
            warnings,
        });
    }

    let source = String::from_utf8(bytes).map_err(|e| BriskError::transform(path, "load", e))?;
    let (code, transformed) = ctx.plugins.transform(path, source.clone()).await?;
    if loader.needs_jsx_transform() && !transformed {
        warnings.push(format!(
            "{}: JSX needs a transform plugin; the module is emitted as written",
            id
        ));
        // plugin-less JSX is treated as plain script
        loader = if loader.is_typescript() { Loader::Ts } else { Loader::Js };
    }

    let mut module = Module {
        path: path.to_path_buf(),
        id,
        source,
        loader,
        imports: Vec::new(),
        deps: Vec::new(),
        code: String::new(),
        fingerprint,
        side_effects: true,
        accepts_hot: false,
        exports: Vec::new(),
        star_exports: Vec::new(),
        syntax: ModuleSyntax::default(),
        asset: None,
    };

    match loader {
        Loader::Js | Loader::Jsx | Loader::Ts | Loader::Tsx => {
            let code = if loader.is_typescript() {
                strip_types(&code).map_err(|e| BriskError::transform(path, "typescript", e))?
            } else {
                code
            };
            let code = apply_defines(&code, &ctx.defines).map_err(|e| BriskError::transform(path, "define", e))?;
            let lexed = tokenize(&code).map_err(|e| BriskError::transform(path, "scan", e))?;
            let syntax = parser::scan(&lexed);
            if syntax.unanalyzable > 0 {
                warnings.push(format!(
                    "{}: {} dynamic import/require call(s) with non-literal arguments are left to the runtime",
                    module.id, syntax.unanalyzable
                ));
            }
            module.imports = syntax.imports();
            module.exports = syntax.export_names();
            module.star_exports = syntax.star_reexports().into_iter().map(str::to_string).collect();
            module.accepts_hot = syntax.accepts_hot;
            module.side_effects = has_top_level_effects(&lexed);
            module.syntax = syntax;
            drop(lexed);
            module.code = code;
        }
        Loader::Css => {
            let mut imports = Vec::new();
            let stripped = css_import_regex().replace_all(&code, |caps: &regex::Captures<'_>| {
                let specifier = &caps[1];
                if !specifier.contains("://") && !specifier.starts_with("//") {
                    imports.push(ImportRecord {
                        specifier: specifier.to_string(),
                        kind: ImportKind::Static,
                    });
                    String::new()
                } else {
                    caps[0].to_string()
                }
            });
            module.code = stripped.into_owned();
            module.imports = imports;
            module.accepts_hot = true;
        }
        Loader::Json => {
            serde_json::from_str::<serde_json::Value>(&code).map_err(|e| BriskError::transform(path, "json", e))?;
            module.code = format!("export default {};", code.trim_end());
            module.exports = vec!["default".to_string()];
            module.side_effects = false;
        }
        Loader::Text => {
            module.code = format!("export default {};", serde_json::to_string(&code)?);
            module.exports = vec!["default".to_string()];
            module.side_effects = false;
        }
        Loader::File => unreachable!("file modules return early"),
    }

    if ctx.respect_side_effects && ctx.resolver.package_side_effects(path) == Some(false) {
        module.side_effects = false;
    }

    debug!("Loaded {} ({:?}, {} imports)", module.id, module.loader, module.imports.len());
    Ok(LoadedModule { module, warnings })
}

/// Binary asset copied under `assets/` with a content hash
fn file_module(path: &Path, id: String, bytes: Vec<u8>, fingerprint: Fingerprint) -> Module {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let file_name = match path.extension() {
        Some(ext) => format!("assets/{}-{}.{}", stem, fingerprint.short(8), ext.to_string_lossy()),
        None => format!("assets/{}-{}", stem, fingerprint.short(8)),
    };
    Module {
        path: path.to_path_buf(),
        id,
        source: String::new(),
        loader: Loader::File,
        imports: Vec::new(),
        deps: Vec::new(),
        code: format!("export default \"/{}\";", file_name),
        fingerprint,
        side_effects: false,
        accepts_hot: false,
        exports: vec!["default".to_string()],
        star_exports: Vec::new(),
        syntax: ModuleSyntax::default(),
        asset: Some(AssetSource { file_name, bytes }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brisk_core::BuildConfig;
    use std::fs;
    use tempfile::TempDir;

    fn context(root: &Path) -> LoadContext {
        let config = BuildConfig::with_root(root);
        let mut defines = BTreeMap::new();
        defines.insert("__DEV__".to_string(), "false".to_string());
        LoadContext {
            root: root.to_path_buf(),
            plugins: Arc::new(PluginManager::new()),
            resolver: Arc::new(Resolver::new(&config).unwrap()),
            defines: Arc::new(defines),
            respect_side_effects: true,
        }
    }

    #[tokio::test]
    async fn test_load_typescript_module() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("util.ts");
        fs::write(
            &path,
            "import type { T } from './types';\nimport { dep } from './dep';\nexport const add = (a: number, b: number): number => a + b + dep;\nif (__DEV__) console.log('dev');\n",
        )
        .unwrap();

        let loaded = load_module(&context(temp.path()), &path).await.unwrap();
        let module = loaded.module;
        assert_eq!(module.id, "util.ts");
        let specifiers: Vec<_> = module.imports.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(specifiers, vec!["./dep"]);
        assert_eq!(module.exports, vec!["add"]);
        assert!(module.code.contains("if (false)"));
        assert!(!module.code.contains("number"));
        assert_eq!(module.code.lines().count(), module.source.lines().count());
    }

    #[tokio::test]
    async fn test_css_imports_become_edges() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.css");
        fs::write(&path, "@import './base.css';\n@import url(\"https://fonts.example/a.css\");\nbody { color: red; }\n").unwrap();

        let module = load_module(&context(temp.path()), &path).await.unwrap().module;
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].specifier, "./base.css");
        assert!(module.code.contains("https://fonts.example/a.css"));
        assert!(!module.code.contains("base.css"));
        assert!(module.accepts_hot);
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_transform_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.json");
        fs::write(&path, "{ broken").unwrap();

        match load_module(&context(temp.path()), &path).await {
            Err(BriskError::Transform { hook, .. }) => assert_eq!(hook, "json"),
            other => panic!("expected transform error, got {:?}", other.map(|l| l.module.id)),
        }
    }

    #[tokio::test]
    async fn test_file_asset_is_hashed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logo.png");
        fs::write(&path, [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

        let module = load_module(&context(temp.path()), &path).await.unwrap().module;
        let asset = module.asset.unwrap();
        assert!(asset.file_name.starts_with("assets/logo-"));
        assert!(asset.file_name.ends_with(".png"));
        assert!(module.code.contains(&asset.file_name));
    }
}

use super::{LoadResult, Plugin, ResolveResult};
use crate::bundler::BuildResult;
use brisk_core::core::path::to_slash;
use brisk_core::{BriskError, BriskResult, BuildConfig};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

struct Registered {
    plugin: Arc<dyn Plugin>,
    resolve: Option<Regex>,
    load: Option<Regex>,
    transform: Option<Regex>,
}

/// Ordered plugin registry. Built before a build starts and shared read-only
/// (behind an `Arc`) while it runs.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Registered>,
}

fn compile(plugin: &str, hook: &str, filter: Option<&str>) -> BriskResult<Option<Regex>> {
    filter
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                BriskError::plugin(plugin, format!("invalid {} filter '{}': {}", hook, pattern, e))
            })
        })
        .transpose()
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: impl Plugin + 'static) -> BriskResult<()> {
        self.register_arc(Arc::new(plugin))
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn Plugin>) -> BriskResult<()> {
        let name = plugin.name().to_string();
        let registered = Registered {
            resolve: compile(&name, "resolve", plugin.resolve_filter())?,
            load: compile(&name, "load", plugin.load_filter())?,
            transform: compile(&name, "transform", plugin.transform_filter())?,
            plugin,
        };
        debug!("Registered plugin {}", name);
        self.plugins.push(registered);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.plugin.name()).collect()
    }

    pub async fn run_start(&self, config: &BuildConfig) -> BriskResult<()> {
        for registered in &self.plugins {
            registered
                .plugin
                .on_start(config)
                .await
                .map_err(|e| BriskError::plugin(registered.plugin.name(), e))?;
        }
        Ok(())
    }

    /// First plugin answering wins
    pub async fn resolve(&self, specifier: &str, importer: &Path) -> BriskResult<Option<ResolveResult>> {
        for registered in &self.plugins {
            let Some(filter) = &registered.resolve else { continue };
            if !filter.is_match(specifier) {
                continue;
            }
            let name = registered.plugin.name();
            let answer = registered
                .plugin
                .resolve(specifier, importer)
                .await
                .map_err(|e| BriskError::transform(importer, format!("{}:resolve", name), e))?;
            if let Some(result) = answer {
                debug!("{} resolved {} -> {}", name, specifier, result.path.display());
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// First plugin answering wins
    pub async fn load(&self, path: &Path) -> BriskResult<Option<LoadResult>> {
        let subject = to_slash(path);
        for registered in &self.plugins {
            let Some(filter) = &registered.load else { continue };
            if !filter.is_match(&subject) {
                continue;
            }
            let name = registered.plugin.name();
            let answer = registered
                .plugin
                .load(path)
                .await
                .map_err(|e| BriskError::transform(path, format!("{}:load", name), e))?;
            if answer.is_some() {
                return Ok(answer);
            }
        }
        Ok(None)
    }

    /// Run every matching transform hook in order, feeding each the previous output.
    ///
    /// Returns the final code and whether any plugin changed it.
    pub async fn transform(&self, path: &Path, code: String) -> BriskResult<(String, bool)> {
        let subject = to_slash(path);
        let mut code = code;
        let mut changed = false;
        for registered in &self.plugins {
            let Some(filter) = &registered.transform else { continue };
            if !filter.is_match(&subject) {
                continue;
            }
            let name = registered.plugin.name();
            let next = registered
                .plugin
                .transform(path, &code)
                .await
                .map_err(|e| BriskError::transform(path, format!("{}:transform", name), e))?;
            if let Some(next) = next {
                code = next;
                changed = true;
            }
        }
        Ok((code, changed))
    }

    pub async fn run_end(&self, result: &BuildResult) -> BriskResult<()> {
        for registered in &self.plugins {
            registered
                .plugin
                .on_end(result)
                .await
                .map_err(|e| BriskError::plugin(registered.plugin.name(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct Suffix(&'static str);

    #[async_trait]
    impl Plugin for Suffix {
        fn name(&self) -> &str {
            self.0
        }

        fn transform_filter(&self) -> Option<&str> {
            Some(r"\.js$")
        }

        async fn transform(&self, _path: &Path, code: &str) -> BriskResult<Option<String>> {
            Ok(Some(format!("{} /*{}*/", code, self.0)))
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn load_filter(&self) -> Option<&str> {
            Some(".*")
        }

        async fn load(&self, _path: &Path) -> BriskResult<Option<LoadResult>> {
            Err(BriskError::Config("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_transforms_compose_in_registration_order() {
        let mut manager = PluginManager::new();
        manager.register(Suffix("a")).unwrap();
        manager.register(Suffix("b")).unwrap();

        let (code, changed) = manager
            .transform(Path::new("/src/x.js"), "x()".to_string())
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(code, "x() /*a*/ /*b*/");

        let (code, changed) = manager
            .transform(Path::new("/src/x.css"), "a{}".to_string())
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(code, "a{}");
    }

    #[tokio::test]
    async fn test_hook_failure_names_plugin_and_hook() {
        let mut manager = PluginManager::new();
        manager.register(Failing).unwrap();

        match manager.load(Path::new("/src/x.js")).await {
            Err(BriskError::Transform { path, hook, .. }) => {
                assert_eq!(path, PathBuf::from("/src/x.js"));
                assert_eq!(hook, "failing:load");
            }
            other => panic!("expected transform error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        struct Broken;

        #[async_trait]
        impl Plugin for Broken {
            fn name(&self) -> &str {
                "broken"
            }

            fn resolve_filter(&self) -> Option<&str> {
                Some("(")
            }
        }

        let mut manager = PluginManager::new();
        assert!(matches!(manager.register(Broken), Err(BriskError::Plugin { .. })));
        assert!(manager.is_empty());
    }
}

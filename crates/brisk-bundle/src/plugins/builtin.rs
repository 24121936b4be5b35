use super::{LoadResult, Plugin, ResolveResult};
use crate::bundler::graph::Loader;
use async_trait::async_trait;
use brisk_core::BriskResult;
use std::collections::BTreeMap;
use std::path::Path;

/// Prepends a comment to every module whose path matches `filter`.
///
/// The comment is placed on the module's first line so line numbers are kept.
pub struct BannerPlugin {
    banner: String,
    filter: String,
}

impl BannerPlugin {
    pub fn new(banner: impl Into<String>) -> Self {
        Self {
            banner: banner.into(),
            filter: r"\.(m|c)?(j|t)sx?$".to_string(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    fn comment(&self) -> String {
        format!("/*! {} */ ", self.banner.replace("*/", "* /").replace('\n', " "))
    }
}

#[async_trait]
impl Plugin for BannerPlugin {
    fn name(&self) -> &str {
        "banner"
    }

    fn transform_filter(&self) -> Option<&str> {
        Some(&self.filter)
    }

    async fn transform(&self, _path: &Path, code: &str) -> BriskResult<Option<String>> {
        Ok(Some(format!("{}{}", self.comment(), code)))
    }
}

/// Serves `virtual:<name>` imports from memory
#[derive(Default)]
pub struct VirtualModulePlugin {
    modules: BTreeMap<String, String>,
}

pub const VIRTUAL_PREFIX: &str = "virtual:";

impl VirtualModulePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module reachable as `virtual:<name>`
    pub fn module(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.modules.insert(name.into(), code.into());
        self
    }
}

#[async_trait]
impl Plugin for VirtualModulePlugin {
    fn name(&self) -> &str {
        "virtual-modules"
    }

    fn resolve_filter(&self) -> Option<&str> {
        Some("^virtual:")
    }

    fn load_filter(&self) -> Option<&str> {
        Some("^virtual:")
    }

    async fn resolve(&self, specifier: &str, _importer: &Path) -> BriskResult<Option<ResolveResult>> {
        let Some(name) = specifier.strip_prefix(VIRTUAL_PREFIX) else {
            return Ok(None);
        };
        Ok(self
            .modules
            .contains_key(name)
            .then(|| ResolveResult::path(specifier)))
    }

    async fn load(&self, path: &Path) -> BriskResult<Option<LoadResult>> {
        let id = path.to_string_lossy();
        let Some(name) = id.strip_prefix(VIRTUAL_PREFIX) else {
            return Ok(None);
        };
        Ok(self.modules.get(name).map(|code| LoadResult {
            code: code.clone(),
            loader: Some(Loader::Js),
        }))
    }
}

//! Plugin contract and the ordered hook registry.
//!
//! Plugins participate in a build through four hook kinds. Each hook kind has a
//! regex filter; a plugin whose filter for a hook is `None` is never asked.
//! Resolve and load hooks stop at the first plugin that answers, transform hooks
//! compose in registration order.

mod builtin;
mod manager;

pub use builtin::{BannerPlugin, VirtualModulePlugin};
pub use manager::PluginManager;

use crate::bundler::graph::Loader;
use crate::bundler::BuildResult;
use async_trait::async_trait;
use brisk_core::{BriskResult, BuildConfig};
use std::path::{Path, PathBuf};

/// Answer from a resolve hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    /// Absolute file path, or a plugin-defined id such as `virtual:config`
    pub path: PathBuf,
    /// Leave the import to the runtime environment
    pub external: bool,
}

impl ResolveResult {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            external: false,
        }
    }

    pub fn external(specifier: impl Into<PathBuf>) -> Self {
        Self {
            path: specifier.into(),
            external: true,
        }
    }
}

/// Answer from a load hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub code: String,
    /// Loader override; defaults to the one picked from the path's extension
    pub loader: Option<Loader>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Regex matched against the import specifier
    fn resolve_filter(&self) -> Option<&str> {
        None
    }

    /// Regex matched against the module path (forward slashes)
    fn load_filter(&self) -> Option<&str> {
        None
    }

    /// Regex matched against the module path (forward slashes)
    fn transform_filter(&self) -> Option<&str> {
        None
    }

    async fn on_start(&self, _config: &BuildConfig) -> BriskResult<()> {
        Ok(())
    }

    async fn resolve(&self, _specifier: &str, _importer: &Path) -> BriskResult<Option<ResolveResult>> {
        Ok(None)
    }

    async fn load(&self, _path: &Path) -> BriskResult<Option<LoadResult>> {
        Ok(None)
    }

    /// Return `Some(code)` to replace the module code, `None` to leave it alone
    async fn transform(&self, _path: &Path, _code: &str) -> BriskResult<Option<String>> {
        Ok(None)
    }

    async fn on_end(&self, _result: &BuildResult) -> BriskResult<()> {
        Ok(())
    }
}

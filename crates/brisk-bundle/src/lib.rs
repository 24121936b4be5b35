//! The brisk bundler: loads a module graph from entry points, splits it into
//! chunks, renders them for the configured output format and optimizes the
//! result.

pub mod bundler;
pub mod optimizer;
pub mod plugins;

pub use bundler::{BuildResult, BuildState, Bundler, OutputChunk};
pub use optimizer::{OptimizeKind, Optimizer, OptimizerOptions};
pub use plugins::{Plugin, PluginManager};

pub mod chunker;
pub mod core;
pub mod graph;
pub mod lexer;
pub mod loader;
pub mod output;
pub mod parser;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod scope;
pub mod sourcemap;
pub mod transform;
pub mod tree_shaker;

pub use core::{BuildState, Bundler};
pub use output::{BuildResult, BuildStats, Manifest, ManifestEntry, OutputAsset, OutputChunk, MANIFEST_FILE};

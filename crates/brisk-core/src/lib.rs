// Core functionality
pub mod core;

// brisk.yaml configuration
pub mod config;

// Re-export commonly used types
pub use config::{BuildConfig, DevConfig, OutputFormat, SourcemapMode};
pub use core::{format_error_with_help, BriskError, BriskResult, ErrorHelp, Fingerprint};

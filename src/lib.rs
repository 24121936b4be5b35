//! brisk: a JavaScript and TypeScript bundler with a hot-reloading dev server
//!
//! This crate ties the workspace together, re-exporting the configuration and
//! error types from `brisk-core`, the bundler from `brisk-bundle` and the dev
//! server from `brisk-dev`.

pub use brisk_core::{format_error_with_help, BriskError, BriskResult, BuildConfig, DevConfig, ErrorHelp};

/// Bundling pipeline re-exported from brisk-bundle.
pub mod bundle {
    pub use brisk_bundle::*;
}

/// Dev server re-exported from brisk-dev.
pub mod dev {
    pub use brisk_dev::*;
}

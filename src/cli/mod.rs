pub mod build;
pub mod dev;

use anyhow::Context;
use brisk::BuildConfig;
use std::env;
use std::path::{Path, PathBuf};

/// Load the project config from `--config` or by searching upwards from the current directory
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, BuildConfig)> {
    let current_dir = env::current_dir().context("Failed to get current directory")?;
    let config = BuildConfig::discover(&current_dir, explicit)?;
    Ok((current_dir, config))
}

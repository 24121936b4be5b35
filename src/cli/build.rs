use brisk::bundle::{Bundler, PluginManager};
use brisk_core::core::path::absolutize;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub async fn run(config: Option<PathBuf>, minify: bool, out_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let (current_dir, mut config) = super::load_config(config.as_deref())?;
    if minify {
        config.minify = true;
    }
    if let Some(dir) = out_dir {
        config.out_dir = absolutize(&current_dir, &dir);
    }
    let out_dir = config.out_dir_path();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message("Bundling...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let mut bundler = Bundler::new(config, PluginManager::new())?;
    let built = bundler.build().await;
    spinner.finish_and_clear();
    // nothing is written when the build fails
    let result = built?;
    result.write(&out_dir).await?;

    for warning in &result.warnings {
        eprintln!("{} {}", "⚠".yellow(), warning.yellow());
    }

    println!(
        "{} Built {} modules into {} chunks in {}ms",
        "✓".green(),
        result.stats.modules,
        result.stats.chunks,
        result.duration.as_millis()
    );
    for chunk in &result.chunks {
        println!(
            "  {} {}",
            chunk.file_name.bright_cyan(),
            format!("{:.1} kB", chunk.code.len() as f64 / 1024.0).bright_black()
        );
        if let Some(css) = &chunk.css_file {
            println!("  {}", css.bright_magenta());
        }
    }
    for asset in result.assets.iter().filter(|a| !a.file_name.ends_with(".css")) {
        println!("  {}", asset.file_name.bright_black());
    }
    println!("  → {}", out_dir.display());

    Ok(())
}

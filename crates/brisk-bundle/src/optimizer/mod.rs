//! Output optimization: minifiers for JS, CSS and HTML plus gzip/brotli
//! compression of the result.
//!
//! Minification fails open: anything a minifier cannot handle safely is
//! returned unchanged together with an [`OptimizationWarning`].

pub mod compress;
pub mod css;
pub mod html;
pub mod js;

pub use compress::{compress, decompress, Algorithm, CompressOptions};

use brisk_core::config::BuildConfig;
use brisk_core::BriskResult;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// A minifier refused its input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MinifyError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeKind {
    Js,
    Css,
    Html,
    Other,
}

impl OptimizeKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("js" | "mjs" | "cjs") => OptimizeKind::Js,
            Some("css") => OptimizeKind::Css,
            Some("html" | "htm") => OptimizeKind::Html,
            _ => OptimizeKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationWarning {
    pub kind: OptimizeKind,
    pub message: String,
}

impl fmt::Display for OptimizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} optimization skipped: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizeStats {
    pub original_size: usize,
    pub minified_size: usize,
    /// Smallest compressed variant, if any was produced
    pub compressed_size: Option<usize>,
    pub compression_ratio: f64,
    pub time_taken_ms: f64,
}

impl OptimizeStats {
    fn new(original_size: usize, minified_size: usize) -> Self {
        let compression_ratio = if original_size == 0 {
            0.0
        } else {
            (original_size as f64 - minified_size as f64) / original_size as f64
        };
        Self {
            original_size,
            minified_size,
            compressed_size: None,
            compression_ratio,
            time_taken_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub algorithm: Algorithm,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OptimizeOutput {
    pub code: String,
    pub compressed: Vec<Compressed>,
    pub stats: OptimizeStats,
    pub warnings: Vec<OptimizationWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub files: usize,
    pub original_size: usize,
    pub minified_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
    pub time_taken_ms: f64,
    pub warnings: usize,
}

impl BatchStats {
    fn add(&mut self, output: &OptimizeOutput) {
        self.files += 1;
        self.original_size += output.stats.original_size;
        self.minified_size += output.stats.minified_size;
        self.compressed_size += output.stats.compressed_size.unwrap_or(0);
        self.time_taken_ms += output.stats.time_taken_ms;
        self.warnings += output.warnings.len();
        self.compression_ratio = OptimizeStats::new(self.original_size, self.minified_size).compression_ratio;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerOptions {
    pub minify: bool,
    pub gzip: bool,
    pub brotli: bool,
    pub level: Option<u32>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            minify: true,
            gzip: false,
            brotli: false,
            level: None,
        }
    }
}

pub struct Optimizer {
    options: OptimizerOptions,
}

impl Optimizer {
    pub fn new(options: OptimizerOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(OptimizerOptions {
            minify: config.minify,
            gzip: config.compress.gzip,
            brotli: config.compress.brotli,
            level: config.compress.level,
        })
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Minify `code` per `kind`; failures keep the input and add a warning
    pub fn minify(&self, code: &str, kind: OptimizeKind) -> (String, Vec<OptimizationWarning>) {
        let mut warnings = Vec::new();
        if !self.options.minify {
            return (code.to_string(), warnings);
        }
        let result = match kind {
            OptimizeKind::Js => js::minify(code),
            OptimizeKind::Css => css::minify(code),
            OptimizeKind::Html => html::minify(code).map(|out| {
                warnings.extend(out.warnings.into_iter().map(|message| OptimizationWarning { kind, message }));
                out.code
            }),
            OptimizeKind::Other => return (code.to_string(), warnings),
        };
        match result {
            Ok(minified) => (minified, warnings),
            Err(e) => {
                warn!("{:?} minification skipped: {}", kind, e);
                warnings.push(OptimizationWarning {
                    kind,
                    message: e.to_string(),
                });
                (code.to_string(), warnings)
            }
        }
    }

    /// One compressed variant per enabled algorithm
    pub fn compress_all(&self, bytes: &[u8]) -> BriskResult<Vec<Compressed>> {
        let algorithms = [
            (self.options.gzip, Algorithm::Gzip),
            (self.options.brotli, Algorithm::Brotli),
        ];
        let mut compressed = Vec::new();
        for (enabled, algorithm) in algorithms {
            if !enabled {
                continue;
            }
            let options = CompressOptions {
                algorithm,
                level: self.options.level,
            };
            compressed.push(Compressed {
                algorithm,
                bytes: compress(bytes, options)?,
            });
        }
        Ok(compressed)
    }

    /// Minify (per `kind`) then compress with every enabled algorithm
    pub fn optimize(&self, code: &str, kind: OptimizeKind) -> BriskResult<OptimizeOutput> {
        let started = Instant::now();
        let (minified, warnings) = self.minify(code, kind);
        let compressed = self.compress_all(minified.as_bytes())?;

        let mut stats = OptimizeStats::new(code.len(), minified.len());
        stats.compressed_size = compressed.iter().map(|c| c.bytes.len()).min();
        stats.time_taken_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "optimized {:?}: {} -> {} bytes ({:.1}%)",
            kind,
            stats.original_size,
            stats.minified_size,
            stats.compression_ratio * 100.0
        );

        Ok(OptimizeOutput {
            code: minified,
            compressed,
            stats,
            warnings,
        })
    }

    /// Optimize several `(code, kind)` inputs, in order
    pub fn optimize_batch(&self, files: &[(&str, OptimizeKind)]) -> BriskResult<(Vec<OptimizeOutput>, BatchStats)> {
        let mut outputs = Vec::with_capacity(files.len());
        let mut stats = BatchStats::default();
        for (code, kind) in files {
            let output = self.optimize(code, *kind)?;
            stats.add(&output);
            outputs.push(output);
        }
        Ok((outputs, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(OptimizeKind::from_path(Path::new("a/index.mjs")), OptimizeKind::Js);
        assert_eq!(OptimizeKind::from_path(Path::new("style.css")), OptimizeKind::Css);
        assert_eq!(OptimizeKind::from_path(Path::new("index.html")), OptimizeKind::Html);
        assert_eq!(OptimizeKind::from_path(Path::new("logo.png")), OptimizeKind::Other);
    }

    #[test]
    fn test_stats_are_byte_based() {
        let optimizer = Optimizer::new(OptimizerOptions::default());
        let output = optimizer.optimize("const  a = 1 ;\n", OptimizeKind::Js).unwrap();
        assert_eq!(output.code, "const a=1;");
        assert_eq!(output.stats.original_size, 15);
        assert_eq!(output.stats.minified_size, 10);
        assert!((output.stats.compression_ratio - 5.0 / 15.0).abs() < 1e-9);
        assert!(output.compressed.is_empty());
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_empty_input_has_zero_ratio() {
        let optimizer = Optimizer::new(OptimizerOptions::default());
        let output = optimizer.optimize("", OptimizeKind::Css).unwrap();
        assert_eq!(output.stats.compression_ratio, 0.0);
    }

    #[test]
    fn test_fails_open_with_warning() {
        let optimizer = Optimizer::new(OptimizerOptions::default());
        let source = "const s = 'unterminated";
        let output = optimizer.optimize(source, OptimizeKind::Js).unwrap();
        assert_eq!(output.code, source);
        assert_eq!(output.stats.compression_ratio, 0.0);
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].kind, OptimizeKind::Js);
    }

    #[test]
    fn test_compresses_minified_code() {
        let optimizer = Optimizer::new(OptimizerOptions {
            minify: true,
            gzip: true,
            brotli: true,
            level: None,
        });
        let source = "a { color: red; }\n".repeat(50);
        let output = optimizer.optimize(&source, OptimizeKind::Css).unwrap();
        assert_eq!(output.compressed.len(), 2);
        for variant in &output.compressed {
            let restored = decompress(&variant.bytes, variant.algorithm).unwrap();
            assert_eq!(restored, output.code.as_bytes());
        }
        assert!(output.stats.compressed_size.unwrap() < output.stats.minified_size);
    }

    #[test]
    fn test_minify_disabled_passes_through() {
        let optimizer = Optimizer::new(OptimizerOptions {
            minify: false,
            ..OptimizerOptions::default()
        });
        let output = optimizer.optimize("a { }", OptimizeKind::Css).unwrap();
        assert_eq!(output.code, "a { }");
    }

    #[test]
    fn test_batch_aggregates() {
        let optimizer = Optimizer::new(OptimizerOptions::default());
        let (outputs, stats) = optimizer
            .optimize_batch(&[("let  a = 1;", OptimizeKind::Js), ("a { top : 0 }", OptimizeKind::Css)])
            .unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.original_size, 11 + 13);
        assert_eq!(stats.minified_size, "let a=1;".len() + "a{top:0}".len());
        assert_eq!(stats.warnings, 0);
    }
}

use crate::bundler::chunker::ChunkKind;
use crate::optimizer::Compressed;
use brisk_core::core::path::ensure_dir;
use brisk_core::BriskResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "manifest.json";

/// One emitted JavaScript file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub name: String,
    pub file_name: String,
    pub kind: ChunkKind,
    pub code: String,
    /// Source map JSON, written next to the chunk as `<file_name>.map`
    pub map: Option<String>,
    /// Extracted stylesheet asset, if the chunk contains CSS modules
    pub css_file: Option<String>,
    /// Module ids, dependencies first
    pub modules: Vec<String>,
    pub imports: Vec<String>,
    pub compressed: Vec<Compressed>,
}

impl OutputChunk {
    pub fn map_file_name(&self) -> String {
        format!("{}.map", self.file_name)
    }
}

/// Non-script output: extracted CSS and copied `file` assets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAsset {
    pub file_name: String,
    pub source: Vec<u8>,
    pub compressed: Vec<Compressed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    pub imports: Vec<String>,
}

/// Entry name -> emitted files
pub type Manifest = BTreeMap<String, ManifestEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub modules: usize,
    pub chunks: usize,
    pub rendered_chunks: usize,
    pub reused_chunks: usize,
    pub assets: usize,
    pub output_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub chunks: Vec<OutputChunk>,
    pub assets: Vec<OutputAsset>,
    pub manifest: Option<Manifest>,
    pub warnings: Vec<String>,
    pub stats: BuildStats,
    pub duration: Duration,
}

impl BuildResult {
    pub fn chunk(&self, file_name: &str) -> Option<&OutputChunk> {
        self.chunks.iter().find(|c| c.file_name == file_name)
    }

    /// Chunk emitted for the entry called `name`
    pub fn entry_chunk(&self, name: &str) -> Option<&OutputChunk> {
        self.chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Entry && c.name == name)
    }

    /// Every output file as (path relative to `out_dir`, contents), compressed
    /// siblings excluded
    pub fn files(&self) -> BriskResult<Vec<(String, Vec<u8>)>> {
        let mut files = Vec::new();
        for chunk in &self.chunks {
            files.push((chunk.file_name.clone(), chunk.code.clone().into_bytes()));
            if let Some(map) = &chunk.map {
                files.push((chunk.map_file_name(), map.clone().into_bytes()));
            }
        }
        for asset in &self.assets {
            files.push((asset.file_name.clone(), asset.source.clone()));
        }
        if let Some(manifest) = &self.manifest {
            files.push((MANIFEST_FILE.to_string(), serde_json::to_vec_pretty(manifest)?));
        }
        Ok(files)
    }

    /// Write every output file (and compressed siblings) under `out_dir`
    pub async fn write(&self, out_dir: &Path) -> BriskResult<()> {
        ensure_dir(out_dir)?;
        let mut written = 0usize;
        for (file_name, bytes) in self.files()? {
            write_file(out_dir, &file_name, &bytes).await?;
            written += 1;
        }

        let compressed = self
            .chunks
            .iter()
            .map(|c| (&c.file_name, &c.compressed))
            .chain(self.assets.iter().map(|a| (&a.file_name, &a.compressed)));
        for (file_name, variants) in compressed {
            for variant in variants {
                let sibling = format!("{}.{}", file_name, variant.algorithm.extension());
                write_file(out_dir, &sibling, &variant.bytes).await?;
                written += 1;
            }
        }

        info!("Wrote {} files to {}", written, out_dir.display());
        Ok(())
    }
}

async fn write_file(out_dir: &Path, file_name: &str, bytes: &[u8]) -> BriskResult<()> {
    let path = out_dir.join(file_name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{decompress, Algorithm};
    use tempfile::TempDir;

    fn result() -> BuildResult {
        let code = "console.log(1);\n".repeat(20);
        let compressed = crate::optimizer::compress(
            code.as_bytes(),
            crate::optimizer::CompressOptions::new(Algorithm::Gzip),
        )
        .unwrap();
        let mut manifest = Manifest::new();
        manifest.insert(
            "index".to_string(),
            ManifestEntry {
                file: "index.js".to_string(),
                css: Some("index.css".to_string()),
                imports: Vec::new(),
            },
        );
        BuildResult {
            chunks: vec![OutputChunk {
                name: "index".to_string(),
                file_name: "index.js".to_string(),
                kind: ChunkKind::Entry,
                code,
                map: Some("{\"version\":3}".to_string()),
                css_file: Some("index.css".to_string()),
                modules: vec!["src/index.ts".to_string()],
                imports: Vec::new(),
                compressed: vec![Compressed {
                    algorithm: Algorithm::Gzip,
                    bytes: compressed,
                }],
            }],
            assets: vec![
                OutputAsset {
                    file_name: "index.css".to_string(),
                    source: b"body{margin:0}".to_vec(),
                    compressed: Vec::new(),
                },
                OutputAsset {
                    file_name: "assets/logo-abcdef12.png".to_string(),
                    source: vec![1, 2, 3],
                    compressed: Vec::new(),
                },
            ],
            manifest: Some(manifest),
            warnings: Vec::new(),
            stats: BuildStats::default(),
            duration: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_write_all_outputs() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dist");
        let result = result();
        result.write(&out).await.unwrap();

        assert!(out.join("index.js").exists());
        assert!(out.join("index.js.map").exists());
        assert!(out.join("index.css").exists());
        assert_eq!(std::fs::read(out.join("assets/logo-abcdef12.png")).unwrap(), vec![1, 2, 3]);

        let gz = std::fs::read(out.join("index.js.gz")).unwrap();
        assert_eq!(decompress(&gz, Algorithm::Gzip).unwrap(), result.chunks[0].code.as_bytes());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["index"]["file"], "index.js");
        assert_eq!(manifest["index"]["css"], "index.css");
    }

    #[test]
    fn test_lookup_helpers() {
        let result = result();
        assert!(result.entry_chunk("index").is_some());
        assert!(result.entry_chunk("other").is_none());
        assert!(result.chunk("index.js").is_some());
        let names: Vec<String> = result.files().unwrap().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["index.js", "index.js.map", "index.css", "assets/logo-abcdef12.png", MANIFEST_FILE]
        );
    }
}

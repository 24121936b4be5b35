use brisk_core::{BriskError, BriskResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Gzip,
    Brotli,
}

impl Algorithm {
    /// Suffix of the compressed sibling file
    pub fn extension(&self) -> &'static str {
        match self {
            Algorithm::Gzip => "gz",
            Algorithm::Brotli => "br",
        }
    }

    pub fn max_level(&self) -> u32 {
        match self {
            Algorithm::Gzip => 9,
            Algorithm::Brotli => 11,
        }
    }

    fn default_level(&self) -> u32 {
        match self {
            Algorithm::Gzip => 6,
            Algorithm::Brotli => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub algorithm: Algorithm,
    /// Clamped to the algorithm's range; `None` picks its default
    pub level: Option<u32>,
}

impl CompressOptions {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm, level: None }
    }

    pub fn level(&self) -> u32 {
        self.level
            .unwrap_or_else(|| self.algorithm.default_level())
            .min(self.algorithm.max_level())
    }
}

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

pub fn compress(bytes: &[u8], options: CompressOptions) -> BriskResult<Vec<u8>> {
    let failed = |e: std::io::Error| BriskError::Compression(format!("{:?}: {}", options.algorithm, e));
    match options.algorithm {
        Algorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(options.level()));
            encoder.write_all(bytes).map_err(failed)?;
            encoder.finish().map_err(failed)
        }
        Algorithm::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer =
                    brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, options.level(), BROTLI_WINDOW);
                writer.write_all(bytes).map_err(failed)?;
                writer.flush().map_err(failed)?;
            }
            Ok(out)
        }
    }
}

pub fn decompress(bytes: &[u8], algorithm: Algorithm) -> BriskResult<Vec<u8>> {
    let failed = |e: std::io::Error| BriskError::Compression(format!("{:?}: {}", algorithm, e));
    let mut out = Vec::new();
    match algorithm {
        Algorithm::Gzip => {
            GzDecoder::new(bytes).read_to_end(&mut out).map_err(failed)?;
        }
        Algorithm::Brotli => {
            brotli::Decompressor::new(bytes, BROTLI_BUFFER)
                .read_to_end(&mut out)
                .map_err(failed)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"function add(a, b) { return a + b; }\nfunction add(a, b) { return a + b; }\n";

    #[test]
    fn test_round_trip_both_algorithms() {
        for algorithm in [Algorithm::Gzip, Algorithm::Brotli] {
            let compressed = compress(SAMPLE, CompressOptions::new(algorithm)).unwrap();
            assert!(compressed.len() < SAMPLE.len(), "{:?} did not shrink", algorithm);
            assert_eq!(decompress(&compressed, algorithm).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn test_empty_input_round_trips() {
        for algorithm in [Algorithm::Gzip, Algorithm::Brotli] {
            let compressed = compress(b"", CompressOptions::new(algorithm)).unwrap();
            assert!(decompress(&compressed, algorithm).unwrap().is_empty());
        }
    }

    #[test]
    fn test_level_is_clamped() {
        let options = CompressOptions {
            algorithm: Algorithm::Gzip,
            level: Some(42),
        };
        assert_eq!(options.level(), 9);
        assert_eq!(CompressOptions::new(Algorithm::Brotli).level(), 9);
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        assert!(matches!(
            decompress(b"not gzip at all", Algorithm::Gzip),
            Err(BriskError::Compression(_))
        ));
    }
}
